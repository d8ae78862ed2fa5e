//! pingward-state — the client registry.
//!
//! Holds one [`ClientRecord`] per client id for the lifetime of the
//! process. The set is replaced wholesale by periodic refreshes; liveness
//! state (downtime counter, clocks) is carried across refreshes for ids
//! that survive them.
//!
//! The `ClientRegistry` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<RwLock<..>>`) and can be shared across async tasks. Mutations are
//! expressed as "read current, apply change, write back" closures so a
//! long sweep never writes through a stale copy.

pub mod error;
pub mod registry;
pub mod types;

pub use error::{StateError, StateResult};
pub use registry::{ClientRegistry, RefreshSummary};
pub use types::*;

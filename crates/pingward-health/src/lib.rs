//! pingward-health — liveness tracking and self-healing for the client fleet.
//!
//! # Architecture
//!
//! ```text
//! Watchdog (shared context, built once)
//!   ├── tick loop
//!   │   ├── every tick        → ConnectionSequencer::drain_tick (guarded)
//!   │   └── every n-th tick   → LivenessMonitor::sweep (guarded)
//!   ├── RegistryRefresher     → ClientRegistry::upsert_all
//!   └── inbound operations    → heartbeat / activate / request_call
//! ```
//!
//! # Self-Healing
//!
//! Each sweep probes every client. Failures accumulate in the client's
//! downtime counter; once it passes the restart threshold the restart hook
//! fires and the counter drops to a negative sentinel, so the next restart
//! needs a fresh run of consecutive failures. A single successful probe
//! resets the counter to zero.

mod busy;
pub mod checker;
pub mod monitor;
pub mod refresher;
pub mod remote;
#[cfg(any(test, feature = "test-util"))]
pub mod scripted;
pub mod sequencer;
pub mod watchdog;

pub use checker::{EscalationPolicy, LivenessPhase, ProbeOutcome, ProbeVerdict, Staleness};
pub use monitor::{LivenessMonitor, SweepReport};
pub use refresher::{RefreshError, RegistryRefresher};
pub use remote::{HttpRemote, RemoteClientApi};
#[cfg(any(test, feature = "test-util"))]
pub use scripted::{RemoteCall, ScriptedRemote};
pub use sequencer::{ConnectionEntry, ConnectionSequencer, DrainReport};
pub use watchdog::{ClientStatus, Watchdog};

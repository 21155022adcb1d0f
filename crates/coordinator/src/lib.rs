//! Upload coordination for Splice.
//!
//! [`UploadCoordinator`] is the service the transport layer talks to: it
//! creates sessions, accepts chunks, finalizes uploads and sweeps expired
//! ones. [`transport`] maps those calls onto HTTP status codes and JSON
//! bodies without depending on any particular HTTP framework.

mod clock;
mod config;
mod coordinator;
mod events;
mod sweeper;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ConfigError, CoordinatorConfig, DEFAULT_EXPIRATION_WINDOW, DEFAULT_RETENTION_WINDOW,
    DEFAULT_SWEEP_INTERVAL,
};
pub use coordinator::{ChunkAck, ChunkOutcome, FinalizeOutcome, SweepReport, UploadCoordinator};
pub use events::{EventBus, EventCallback, UploadEvent};
pub use sweeper::ExpirationSweeper;
pub use transport::Reply;

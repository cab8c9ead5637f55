//! Deduplication for events observed on the source chat surface.
//!
//! The source view is re-scanned repeatedly (mutation bursts, periodic
//! sweeps, reconnects) and virtualized lists re-mount the same message under
//! fresh nodes. The [`SessionTracker`] makes sure each logical event is
//! emitted once per process lifetime (or once per retention window when one
//! is configured), keyed by a content-derived [`Fingerprint`].

pub mod fingerprint;
pub mod tracker;

pub use fingerprint::{EventSignature, Fingerprint};
pub use tracker::{NodeId, Observation, SessionTracker, TrackerSettings};

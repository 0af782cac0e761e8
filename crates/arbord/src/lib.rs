//! Arbor daemon crate: scanning, topology inference, snapshot cache and branch lifecycle.

pub mod cache;
pub mod collectors;
pub mod events;
pub mod inference;
pub mod lifecycle;
pub mod overlay;
pub mod persistence;
pub mod scan;
pub mod service;

pub use cache::{CachedSnapshot, ScanTicket, SharedStore, SnapshotCache};
pub use collectors::{collect_observations, CollectRequest, GitDivergenceOracle, Observations};
pub use events::*;
pub use inference::*;
pub use lifecycle::*;
pub use overlay::*;
pub use persistence::*;
pub use scan::*;
pub use service::*;

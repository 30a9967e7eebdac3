//! Snapshot storage backends.

mod memory;
mod traits;

pub use memory::InMemorySnapshotStorage;
pub use traits::SnapshotStorage;

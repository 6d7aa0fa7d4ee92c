//! In-memory [`crate::store::TimerStore`] used by this crate's own tests
//! and available to downstream crates under the `test-utils` feature,
//! mirroring how the teacher gates its in-memory store test double.

mod in_memory_store;

pub use in_memory_store::InMemoryTimerStore;

//! The disk tier: a single-file block allocator (see [`store::DiskStore`])
//! backed by a persisted index (see [`index`]).

pub mod index;
pub mod store;

pub use index::DiskElement;
pub use store::DiskStore;

//! Data persistence: the host store, its in-memory registry, the SQL and
//! in-memory backends, and the update feed.

pub mod feed;
pub mod host_store;
pub mod memory;
pub mod postgres;
pub mod registry;

pub use feed::UpdateFeed;
pub use host_store::HostStore;
pub use memory::MemoryPersistence;
pub use postgres::PostgresPersistence;
pub use registry::HostRegistry;

// Adapters layer: concrete implementations of the domain ports (storage, catalog source, clock)

pub mod clock;
pub mod memory;
pub mod snapshot;

pub use clock::{ManualClock, SystemClock};
pub use memory::InMemorySessionStore;
pub use snapshot::StaticCatalog;

//! Storage and messaging adapters
pub mod memory;
pub mod nats;
pub mod postgres;

pub use memory::MemoryStore;
pub use nats::{LogPublisher, NatsPublisher};
pub use postgres::PgStore;

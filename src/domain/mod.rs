//! Domain model: aggregates, events, value objects and the ports they are stored through
pub mod aggregates;
pub mod events;
pub mod ports;
pub mod value_objects;

//! Domain types, state machines and ports. Nothing in here performs I/O.

pub mod address;
pub mod instruction;
pub mod ports;
pub mod schedule;
pub mod stream;
pub mod username;

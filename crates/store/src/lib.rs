//! Room/message store consumed by plugins.
//!
//! The plugin core only ever needs two operations from the store: listing
//! rooms and appending a message to a room. [`RoomStore`] captures exactly
//! that surface; [`InMemoryRoomStore`] backs the gateway and tests.

pub mod memory;
pub mod store;
pub mod types;

pub use {
    memory::InMemoryRoomStore,
    store::{RoomStore, StoreError},
    types::{Message, NewMessage, Room},
};

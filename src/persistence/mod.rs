//! The `persistence` module provides durable, actor-local storage.
//!
//! Each actor gets its own `sled` tree through [`Persistence::store`], so
//! state survives restarts and can be wiped in one call when the actor goes
//! dormant.

pub mod sled_store;

pub use sled_store::{ActorStore, Persistence, key_sequence, timestamp_key};

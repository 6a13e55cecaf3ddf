//! The `client` module defines the representation of a client connection.
//!
//! A [`Connection`] pairs the session id a subscriber allocated with the
//! channel used to push frames to that client.

pub mod connection;
pub use connection::Connection;

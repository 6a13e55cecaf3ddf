//! The `transport` module puts the broker on the network.
//!
//! - [`websocket`]: the client gateway. Clients connect to `/ws`, send
//!   comma-separated topic lists and receive JSON value frames.
//! - [`http`]: the read-only debug API over the tracker, plus a feed trigger.
//! - [`message`]: inbound frame decoding.

pub mod http;
pub mod message;
pub mod websocket;

#[cfg(test)]
mod tests;

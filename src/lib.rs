//! # tickcast
//!
//! `tickcast` is a topic-based publish/subscribe broker for ticker values,
//! built from small message-driven actors. Clients connect over WebSockets,
//! send a comma-separated list of topics, and receive every new value for
//! those topics as JSON.
//!
//! ## Core Modules
//!
//! - `actor`: mailbox runtime, per-actor timers, clocks and the actor directory.
//! - `broker`: publishers, subscribers and distributors, plus the `Broker` facade.
//! - `client`: one live WebSocket connection inside a subscriber.
//! - `config`: layered configuration (file, `TICKCAST__*` environment, defaults).
//! - `debug`: interaction tracking and the tracker actor behind the debug API.
//! - `ingest`: the value ingress queue and the synthetic ticker feed.
//! - `persistence`: sled-backed per-actor state.
//! - `transport`: the WebSocket gateway and the debug HTTP surface.
//! - `utils`: error taxonomy and logging setup.

pub mod actor;
pub mod broker;
pub mod client;
pub mod config;
pub mod debug;
pub mod ingest;
pub mod persistence;
pub mod transport;
pub mod utils;

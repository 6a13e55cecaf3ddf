//! The `utils` module provides the error taxonomy and logging setup shared
//! across `tickcast`.

pub mod error;
pub mod logging;

pub use error::{BrokerError, Result};

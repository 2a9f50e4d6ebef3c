//! Runtime configuration types for paywatch.
//!
//! These are the validated values handed to the core components. Loading
//! and parsing the configuration file is the server crate's job.

mod chain;
mod stream;
mod worker;

pub use chain::{ChainConfig, DEFAULT_TRANSFER_TOPIC};
pub use stream::StreamConfig;
pub use worker::WorkerConfig;

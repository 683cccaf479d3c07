//! An HTTP-to-message-broker gateway: translates REST requests into typed
//! request messages on a topic-routed broker exchange, correlates
//! asynchronous replies by request id, and inflates nested entity ids via
//! further broker round-trips before responding.

pub mod config;
pub mod demux;
pub mod dispatcher;
pub mod entities;
pub mod error;
pub mod http;
pub mod identifiers;
pub mod request_table;
pub mod resolver;
pub mod shared;
pub mod terminator;
pub mod transport;
pub mod types;

pub use config::Config;
pub use demux::Demultiplexer;
pub use dispatcher::Dispatcher;
pub use error::{GatewayError, Result};
pub use resolver::Resolver;
pub use shared::Shared;
pub use terminator::Terminator;

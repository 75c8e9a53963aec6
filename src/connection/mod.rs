pub mod connection_manager;

pub use connection_manager::{ConnectionError, ConnectionManager, ConnectionOptions, RequestBody};

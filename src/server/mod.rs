//! Protocol server for Unix domain socket and TCP clients

mod endpoint;
mod listener;

pub use endpoint::{Endpoint, EndpointError};
pub use listener::Server;

//! Transport module - TCP connection to the debug server.

mod tcp;

pub use tcp::{connect, Endpoint};

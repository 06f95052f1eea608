//! Connection lifecycle: negotiation policy, state machine and the tasks
//! that drive one live link.

mod connection;
mod controller;
mod manager;
mod negotiation;

pub use connection::{
    Session, SessionBuilder, SessionConfig, DEFAULT_READ_BUFFER_SIZE,
    DEFAULT_WORK_QUEUE_CAPACITY, LOST_CONNECTION,
};
pub use controller::{SessionController, SessionState, StreamPhase};
pub use manager::SessionManager;
pub use negotiation::{
    ClientConfigDefaults, NegotiationPolicy, DEFAULT_AVERAGE_POINTS, DEFAULT_PERIOD,
    DEFAULT_ROWS,
};

pub mod connection;
pub mod signaling;

pub use connection::ConnectionState;
pub use signaling::{Negotiation, Role, SignalingState};

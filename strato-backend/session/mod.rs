pub mod client;
pub mod crlf;
pub mod events;
pub mod mailbox;
pub mod mux;
pub mod protocol;
pub mod tracking;

pub use mux::{SessionDeps, run_session};
pub use protocol::{MessageType, WireMessage};

pub mod config;
pub mod constants;
pub mod controller;
pub mod error;
pub mod framing;
pub mod message;
pub mod packet;
pub mod param;
pub mod session;
pub mod transport;

#[cfg(test)]
mod tests;

// Re-export the session entry points for easy access
pub use controller::{SessionController, SessionHandle};
pub use session::{RunState, Session, SessionEvent};
pub use transport::{Link, Transport};

pub mod error;
pub mod manager;
pub mod types;

pub use error::SessionError;
pub use manager::{SessionRegistry, OUTBOUND_QUEUE_CAPACITY};
pub use types::{Session, SessionState};

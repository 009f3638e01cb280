//! Sessions: the scope in which objects live between commits.
//!
//! A [`Session`] owns the resident objects of one partition, stages their
//! changes, and writes them out on [`Session::commit`]. The
//! [`SessionManager`] hands out one session per thread or task and
//! partition, commits them all on demand or on a timer, and the
//! [`InvocationHandler`] serves inbound calls with a fresh session each.

pub mod auto_commit;
pub mod config;
pub mod error;
pub mod handler;
pub mod manager;
pub mod session;

#[cfg(test)]
mod testing;

pub use auto_commit::AutoCommitter;
pub use config::SessionConfig;
pub use error::{SessionError, SessionResult};
pub use handler::{InvocationHandler, LoopbackTransport};
pub use manager::{SessionHandle, SessionManager};
pub use session::{CommitReport, ObjectHandle, Session};

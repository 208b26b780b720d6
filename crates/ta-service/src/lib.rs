//! # ta-service
//!
//! A single-client storage service in the style of a trusted application:
//! it speaks the `ta-proto` message format over a duplex byte stream,
//! scopes all storage to capability-token session directories, and
//! dispatches the six storage commands (OPEN, STORE, RETRIEVE, CHECK,
//! CLOSE, MAP) against at most one open file per session.
//!
//! The crate is organized around one blocking loop:
//!
//! - [`session`]: token generation, the 44-byte wire form, and the
//!   directory-backed [`session::SessionStore`].
//! - [`dispatch`]: per-command handlers running against a
//!   [`dispatch::SessionContext`].
//! - [`transport`]: [`transport::run_loop`], the read/act/reply loop.
//! - [`fault`]: the soft/fatal failure split the loop is built on.
//! - [`config`]: TOML configuration (data root, failure policy, log
//!   level).

pub mod config;
pub mod dispatch;
pub mod fault;
pub mod session;
pub mod transport;

pub use config::{Config, FailurePolicy};
pub use dispatch::SessionContext;
pub use fault::{Fault, FatalFault, SoftFault};
pub use session::{CapabilityHandle, SessionError, SessionStore, SessionToken};
pub use transport::run_loop;

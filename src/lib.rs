//! commcore: the single-threaded communications core for a multi-user
//! text server — byte-level telnet decoding lives in the `telnet-machine`
//! crate; this crate owns the session table, output buffering, snoop
//! graph, ERQ co-process bridge, and the scheduler that ties them
//! together behind a small host-callback trait.

pub mod addr_cache;
pub mod config;
pub mod erq;
pub mod errors;
pub mod host;
pub mod log;
pub mod output;
pub mod redirect;
pub mod scheduler;
pub mod session;
pub mod snoop;
pub mod sys;

pub use config::CommConfig;
pub use errors::{CommError, CommResult};
pub use host::{HostBridge, HostObjectId};
pub use scheduler::Scheduler;
pub use session::{Session, SessionTable};
pub use snoop::SessionId;

//! # respawn
//!
//! Minimal process supervisor: spawn N replicas of a command, multiplex their
//! stdout/stderr into two line sinks, and respawn a replica whenever it exits.
//! SIGINT/SIGTERM terminates the whole fleet, SIGTERM first and SIGKILL after
//! a 5 second grace period.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use respawn::{ConsoleSink, Supervisor};
//!
//! let mut sup = Supervisor::new(Box::new(ConsoleSink), Box::new(ConsoleSink)).unwrap();
//! sup.supervise("./worker", &[], None).unwrap();
//!
//! // blocks until an interrupt terminates the fleet
//! sup.run().unwrap();
//! ```

pub mod error;
pub mod mux;
pub mod process;
pub mod registry;
pub mod sink;
pub mod supervisor;

pub use error::Error;
pub use mux::{Event, Interest, Multiplexer, PollMux};
pub use process::{ManagedProcess, GRACE_PERIOD};
pub use registry::StreamRegistry;
pub use sink::{ConsoleSink, FileSink, LineSink, StreamKind};
pub use supervisor::{ShutdownHandle, Supervisor};

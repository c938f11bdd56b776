//! st-core: Core library for the st Swift CLI client
//!
//! This crate provides the pieces of the client that do not depend on
//! the wire protocol:
//! - Error taxonomy with structured HTTP context
//! - Credential resolution
//! - The generic bounded-queue worker pool behind every bulk operation
//! - Progress/error reporting sinks
//!
//! Keeping this crate independent of any HTTP client lets the
//! concurrency machinery be unit-tested in isolation.

pub mod credentials;
pub mod error;
pub mod pool;
pub mod report;

pub use credentials::Credentials;
pub use error::{Error, ProtocolError, Result};
pub use pool::{AbortFlag, DEFAULT_WIDTH, JobHandler, PoolHandle, QUEUE_CAPACITY, WorkerPool};
pub use report::{ReportSink, Reporter};

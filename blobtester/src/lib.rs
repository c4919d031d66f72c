//! Load generation and integrity verification for blob storage services.
//!
//! A test consists of a number of runs, each of which uploads a pseudo-random payload, optionally
//! downloads it again to compare SHA-256 digests, and finally deletes the blob. The
//! [`Coordinator`] splits the runs into equal [`WorkSlice`]s and executes every slice on its own
//! [`Worker`] concurrently. Payloads are generated and hashed while they stream, so they are never
//! held in memory as a whole.
//!
//! Every completed run is handed to a [`RecordSink`] right away, which in the binary prints one CSV
//! line per run to stdout.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod digest;
pub mod observability;
pub mod payload;
pub mod record;
pub mod report;
pub mod settings;
pub mod sink;
pub mod worker;

pub use crate::config::{ByteCount, TestConfiguration};
pub use crate::coordinator::{Coordinator, RunSummary};
pub use crate::record::TestRunRecord;
pub use crate::sink::RecordSink;
pub use crate::worker::{WorkSlice, Worker};

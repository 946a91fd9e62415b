//! certsync daemon: adapter contracts, supervision, and process runtime.

pub mod adapter;
mod error;
pub mod runtime;
pub mod supervisor;

pub use adapter::{AdapterInfo, AdapterRegistry, ConfiguredAdapters, Exporter, Importer};
pub use error::{io_err, AdapterError, DaemonError};
pub use runtime::{init_tracing, run, run_until, start_blocking, LogFormat, RunSummary};
pub use supervisor::{AdapterState, SupervisionReport, Supervisor};

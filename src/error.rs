//! Fatal startup errors.
//!
//! Per-request errors (bad request, forbidden, missing resource, ...) stay close to the
//! mechanism they're modeled on: small hand-rolled enums living next to the code that
//! produces them (see `connection::HttpCode`). Failures that prevent the server
//! from starting at all get their own type so `main` has exactly one exit path with full
//! chained context, the way a small `thiserror`-based top-level error typically reports a
//! fatal startup failure.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort startup before the server can begin serving requests.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind listening socket: {0}")]
    Bind(#[source] io::Error),

    #[error("failed to register a source with the reactor: {0}")]
    PollRegister(#[source] io::Error),

    #[error("failed to create the reactor's readiness interface: {0}")]
    PollCreate(#[source] io::Error),

    #[error("polling for readiness events failed: {0}")]
    PollWait(#[source] io::Error),

    #[error("failed to install signal handlers: {0}")]
    SignalHandler(#[source] io::Error),

    #[error("failed to spawn a worker thread: {0}")]
    WorkerSpawn(#[source] io::Error),

    #[error("database setup failed ({index} of {total} connections): {source}")]
    DbConnect {
        index: u32,
        total: u32,
        #[source]
        source: mysql::Error,
    },

    #[error("failed to open log file under {path:?}: {source}")]
    LogFileOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to load the initial account table: {0}")]
    AccountsLoad(#[source] mysql::Error),

    #[error("missing required argument: {0}")]
    MissingArgument(&'static str),

    #[error("invalid value for argument {name}: {value:?}")]
    InvalidArgument { name: &'static str, value: String },
}

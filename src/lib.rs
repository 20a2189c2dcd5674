//! Stackctl starts, stops and monitors a local web development stack: a web server,
//! a PHP FastCGI runner, a relational database, a document store and a cache server.
//! A settings file supplies installation paths and autostart flags; the supervisor
//! owns the daemon processes and reports every status change to an observer.

/// CLI interface.
pub mod cli;

/// Settings store.
pub mod config;

/// Constants shared across modules.
pub mod constants;

/// Static daemon descriptors.
pub mod descriptor;

/// Detection of daemons running outside the supervisor.
pub mod detect;

/// Error handling.
pub mod error;

/// Autostart and shutdown policy.
pub mod policy;

/// Status values and observers.
pub mod status;

/// Process supervisor.
pub mod supervisor;

/// Daemon version probing.
pub mod version;

#[doc(hidden)]
pub mod test_utils;

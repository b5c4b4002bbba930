//! # smax-postgres — Core Library
//!
//! Mirrors SMA-X shared variables into PostgreSQL, evolving each variable's
//! table schema as its observed shape and type change over time.
//!
//! ## Module Organization
//!
//! - [`config`] — config file grammar, validation, defaults
//! - [`rules`] — glob-pattern rule engine deciding force/exclude/sampling per variable
//! - [`encoding`] — SMA-X element type to SQL column type mapping, literal formatting
//! - [`descriptor`] — per-variable table descriptor cache
//! - [`scan`] — rebuilds the descriptor cache from the database at startup
//! - [`queue`] — bounded channel decoupling the grabber from the writer
//! - [`smax`] — adapter over the source store
//! - [`grabber`] — periodic poller producing samples onto the queue
//! - [`writer`] — consumes samples, evolves schema, writes rows transactionally
//! - [`dbconn`] — connection retry, master table bootstrap
//! - [`daemon`] — owns the above and runs them to completion
//! - [`cli`], [`signals`], [`notify`] — process-level plumbing

pub mod cli;
pub mod config;
pub mod daemon;
pub mod dbconn;
pub mod descriptor;
pub mod encoding;
pub mod error;
pub mod grabber;
pub mod notify;
pub mod queue;
pub mod rules;
pub mod scan;
pub mod signals;
pub mod smax;
pub mod writer;

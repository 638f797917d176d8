//! Core logic for `apply`: spawn a command once per item, multiplex
//! output, forward signals, and escalate against children that won't die.
//! The binary crate (`apply`) is a thin `clap` shell around
//! [`supervisor::run`].

pub mod child;
pub mod diag;
pub mod error;
pub mod interpolate;
pub mod line;
pub mod poller;
pub mod signal;
pub mod supervisor;
pub mod timefmt;

pub use error::AppError;
pub use supervisor::{resolve, run, IpPref, ItemSource, ResolvedRun, RunOptions};

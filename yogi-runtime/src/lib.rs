//! Yogi branch runtime: the event loop, timers, signal sets and branches.
//!
//! Socket I/O runs on an internal tokio runtime owned by the [`Context`];
//! user handlers only ever run inside `Context::poll*`/`Context::run*`.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod branch;
pub mod config;
pub mod context;
pub mod logging;
pub mod signal_set;
pub mod timer;

pub use branch::{Branch, EventHandler};
pub use config::{CommandLineOptions, Configuration, ConfigurationFlags};
pub use context::Context;
pub use signal_set::{forward_os_signals, raise_signal, SignalArg, SignalOutcome, SignalSet};
pub use timer::Timer;

pub use yogi_core::{
    BranchEvent, BranchEvents, Duration, Error, ErrorCode, EventOutcome, LocalBranchInfo,
    RemoteBranchInfo, Result, Signals, Timestamp,
};

/// Lock ignoring poisoning; a handler that panicked does not invalidate the
/// bookkeeping these mutexes protect.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

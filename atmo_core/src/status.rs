//! Socket status and its lock-free cell.

use core::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// The observable state of a socket or transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Created, not yet connected.
    Init,
    /// Connected; messages flow.
    Open,
    /// A polling transport completed a cycle and has not re-armed yet.
    Reopened,
    /// Torn down by either side.
    Close,
    /// A fatal error was recorded.
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Init => "INIT",
            Status::Open => "OPEN",
            Status::Reopened => "REOPENED",
            Status::Close => "CLOSE",
            Status::Error => "ERROR",
        })
    }
}

const INIT: u8 = 0;
const OPEN: u8 = 1;
const REOPENED: u8 = 2;
const CLOSE: u8 = 3;
const ERROR: u8 = 4;

fn encode(status: Status) -> u8 {
    match status {
        Status::Init => INIT,
        Status::Open => OPEN,
        Status::Reopened => REOPENED,
        Status::Close => CLOSE,
        Status::Error => ERROR,
    }
}

fn decode(raw: u8) -> Status {
    match raw {
        OPEN => Status::Open,
        REOPENED => Status::Reopened,
        CLOSE => Status::Close,
        ERROR => Status::Error,
        _ => Status::Init,
    }
}

/// An atomic [`Status`] holder shared between a transport's read loop and
/// callers observing it.
#[derive(Debug)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    /// A new cell in [`Status::Init`].
    #[must_use]
    pub const fn new() -> Self {
        StatusCell(AtomicU8::new(INIT))
    }

    /// Current status.
    pub fn load(&self) -> Status {
        decode(self.0.load(Ordering::SeqCst))
    }

    /// Unconditionally set the status.
    pub fn store(&self, status: Status) {
        self.0.store(encode(status), Ordering::SeqCst);
    }

    /// Transition `from` to `to`; returns whether this call performed it.
    pub fn transition(&self, from: Status, to: Status) -> bool {
        self.0
            .compare_exchange(encode(from), encode(to), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        StatusCell::new()
    }
}

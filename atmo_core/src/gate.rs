//! The connection gate.
//!
//! A multi-waiter latch a transport signals once it is usable, and the
//! carrier for fatal errors discovered later. Openers block on the root
//! gate; `fire` blocks on the connected gate. The first terminal signal
//! wins; an error recorded after the latch opened (a write on a dead
//! socket) is still observable through [`ConnectGate::finish`] and later
//! waits.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::Error;

#[derive(Debug, Clone, Default)]
struct GateState {
    latched: bool,
    error: Option<Error>,
    timed_out: bool,
}

/// A one-shot completion latch shared between a transport and its waiters.
///
/// Clones alias the same latch.
#[derive(Debug, Clone)]
pub struct ConnectGate {
    tx: Arc<watch::Sender<GateState>>,
}

impl ConnectGate {
    /// A fresh, unlatched gate.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(GateState::default());
        ConnectGate { tx: Arc::new(tx) }
    }

    /// Open the latch successfully. A no-op once latched.
    pub fn done(&self) {
        self.tx.send_if_modified(|state| {
            if state.latched {
                return false;
            }
            state.latched = true;
            true
        });
    }

    /// Record a fatal error and open the latch. The first error wins;
    /// later calls are no-ops. An error recorded after [`done`](Self::done)
    /// is still kept for [`finish`](Self::finish) and later waits.
    pub fn io_error(&self, error: Error) {
        self.tx.send_if_modified(|state| {
            if state.error.is_some() {
                return false;
            }
            state.error = Some(error);
            state.latched = true;
            true
        });
    }

    /// Record that a write's response timed out. Does not fail the gate.
    pub fn record_timeout(&self) {
        self.tx.send_if_modified(|state| {
            if state.timed_out {
                return false;
            }
            state.timed_out = true;
            true
        });
    }

    /// Whether a write response has ever timed out.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.tx.borrow().timed_out
    }

    /// Whether the latch is open.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.tx.borrow().latched
    }

    /// The recorded fatal error, if any.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        self.tx.borrow().error.clone()
    }

    /// Block until the latch opens; errors recorded by then are returned.
    ///
    /// # Errors
    ///
    /// Returns the recorded error if the gate was failed.
    pub async fn wait(&self) -> Result<(), Error> {
        let mut rx = self.tx.subscribe();
        loop {
            let outcome = {
                let state = rx.borrow_and_update();
                if state.latched {
                    Some(state.error.clone())
                } else {
                    None
                }
            };
            match outcome {
                Some(Some(error)) => return Err(error),
                Some(None) => return Ok(()),
                None => {
                    if rx.changed().await.is_err() {
                        return Err(Error::Closed);
                    }
                }
            }
        }
    }

    /// Settle the gate after a write: raise any recorded fatal error,
    /// otherwise mark the gate done.
    ///
    /// # Errors
    ///
    /// Returns the recorded error if the gate was failed.
    pub fn finish(&self) -> Result<(), Error> {
        let error = self.tx.borrow().error.clone();
        match error {
            Some(error) => Err(error),
            None => {
                self.done();
                Ok(())
            }
        }
    }
}

impl Default for ConnectGate {
    fn default() -> Self {
        ConnectGate::new()
    }
}

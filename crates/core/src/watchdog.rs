use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::cancel::CancelScope;

#[derive(Debug, Error)]
pub enum WatchdogError<E> {
    #[error("work did not finish within {ceiling:?}")]
    TimedOut { ceiling: Duration },
    #[error(transparent)]
    Failed(E),
    #[error("worker panicked: {0}")]
    Crashed(String),
}

/// Runs a unit of work on a worker thread and waits at most `ceiling` for it.
///
/// The work receives a child [`CancelScope`] whose deadline is the ceiling.
/// On timeout the scope is cancelled and the watchdog waits for the worker to
/// notice before returning, so no work outlives the call.
#[derive(Clone, Copy, Debug)]
pub struct Watchdog {
    ceiling: Duration,
}

impl Watchdog {
    pub fn new(ceiling: Duration) -> Self {
        Self { ceiling }
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    pub fn run<T, E, F>(&self, scope: &CancelScope, work: F) -> Result<T, WatchdogError<E>>
    where
        F: FnOnce(&CancelScope) -> Result<T, E> + Send,
        T: Send,
        E: Send,
    {
        let started = Instant::now();
        let child = match started.checked_add(self.ceiling) {
            Some(deadline) => scope.child_with_deadline(deadline),
            None => scope.clone(),
        };
        let (tx, rx) = mpsc::channel();

        thread::scope(|threads| {
            let worker_scope = child.clone();
            let handle = threads.spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| work(&worker_scope)));
                // The receiver is gone once the watchdog has given up.
                let _ = tx.send(());
                result
            });

            let timed_out = matches!(
                rx.recv_timeout(self.ceiling),
                Err(mpsc::RecvTimeoutError::Timeout)
            );
            if timed_out {
                child.cancel();
            }

            let joined = handle.join();
            if timed_out {
                return Err(WatchdogError::TimedOut {
                    ceiling: self.ceiling,
                });
            }
            match joined {
                Ok(Ok(Ok(value))) => Ok(value),
                Ok(Ok(Err(err))) => Err(WatchdogError::Failed(err)),
                Ok(Err(payload)) | Err(payload) => {
                    Err(WatchdogError::Crashed(panic_message(payload.as_ref())))
                }
            }
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

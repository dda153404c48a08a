//! Cancellable execution of long-running native calls.
//!
//! A [`NativeCommand`] wraps one native entry point together with its
//! arguments. It goes through exactly one `initialize → execute → result`
//! cycle, enforced by move semantics: [`NativeCommand::execute`] consumes the
//! command and yields a [`CompletedCommand`], whose
//! [`CompletedCommand::into_result`] consumes it in turn.
//!
//! The native call runs on a scoped worker thread. The driving thread stays
//! responsive while it waits:
//! - progress reported by the engine is forwarded to a [`ProgressObserver`],
//!   whose [`Flow`] answer is handed back to the engine synchronously;
//! - between reports the driver wakes every `poll_interval` and asks the
//!   observer whether to cancel ([`ProgressObserver::on_idle`]);
//! - a [`CancelToken`] can be tripped from any thread.
//!
//! Cancellation is cooperative: the engine sees it the next time it polls its
//! callback and is expected to return the null sentinel. There is no timeout;
//! callers that want one cancel the token themselves.

use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::bridge_error::BridgeError;
use crate::native::handle::{HandleKind, OwnedHandle};
use crate::native::{NativeCallback, NativeEngine, Progress, RawHandle};

/// Shared cancellation flag. Clones observe the same flag.
///
/// A [`CancelToken::child`] is cancelled whenever its parent is, but cancelling
/// the child leaves the parent untouched.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<CancelToken>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh token linked to this one.
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::default(),
            parent: Some(Arc::new(self.clone())),
        }
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }
}

/// Answer to a progress report.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Cancel,
}

/// Receives progress on the driving thread while a native call runs.
pub trait ProgressObserver {
    fn on_progress(&mut self, progress: &Progress) -> Flow;

    /// Called every poll interval without a report.
    fn on_idle(&mut self) -> Flow {
        Flow::Continue
    }
}

impl<F> ProgressObserver for F
where
    F: FnMut(&Progress) -> Flow,
{
    fn on_progress(&mut self, progress: &Progress) -> Flow {
        self(progress)
    }
}

/// Observer that ignores progress and never cancels.
#[derive(Copy, Clone, Debug, Default)]
pub struct Silent;

impl ProgressObserver for Silent {
    fn on_progress(&mut self, _: &Progress) -> Flow {
        Flow::Continue
    }
}

/// Driver-side timing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExecSettings {
    pub poll_interval: Duration,
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(20),
        }
    }
}

enum Event {
    Progress(Progress),
    Done,
}

/// Worker-side callback: relays reports to the driver and waits for its answer.
struct Relay<'t> {
    token: &'t CancelToken,
    events: mpsc::Sender<Event>,
    replies: mpsc::Receiver<Flow>,
}

impl NativeCallback for Relay<'_> {
    fn report(&mut self, progress: Progress) -> bool {
        if self.token.is_cancelled() {
            return true;
        }
        if self.events.send(Event::Progress(progress)).is_err() {
            return true;
        }
        !matches!(self.replies.recv(), Ok(Flow::Continue)) || self.token.is_cancelled()
    }
}

/// A native call ready to run.
pub struct NativeCommand<'e, K: HandleKind, F> {
    engine: &'e dyn NativeEngine,
    operation: &'static str,
    entry: F,
    _kind: PhantomData<K>,
}

impl<'e, K, F> NativeCommand<'e, K, F>
where
    K: HandleKind,
    F: FnOnce(&dyn NativeEngine, &mut dyn NativeCallback) -> Option<RawHandle> + Send,
{
    /// Binds a native entry point and its argument tuple (captured by `entry`).
    pub fn initialize(engine: &'e dyn NativeEngine, operation: &'static str, entry: F) -> Self {
        Self {
            engine,
            operation,
            entry,
            _kind: PhantomData,
        }
    }

    /// Runs the call to completion or until cancellation is observed.
    ///
    /// A returned handle is adopted immediately. If cancellation was requested
    /// but the engine still produced a result, that result is released and the
    /// command reports cancellation.
    pub fn execute(
        self,
        token: &CancelToken,
        observer: &mut dyn ProgressObserver,
        settings: ExecSettings,
    ) -> Result<CompletedCommand<'e, K>, BridgeError> {
        let Self {
            engine,
            operation,
            entry,
            ..
        } = self;
        if token.is_cancelled() {
            log::info!("{operation}: cancelled before start");
            return Ok(CompletedCommand {
                operation,
                result: None,
                cancelled: true,
            });
        }

        let (event_tx, event_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        let (joined, observer_panic) = thread::scope(move |s| {
            let done_tx = event_tx.clone();
            let worker = s.spawn(move || {
                let mut relay = Relay {
                    token,
                    events: event_tx,
                    replies: reply_rx,
                };
                let raw = entry(engine, &mut relay);
                let _ = done_tx.send(Event::Done);
                raw
            });
            // a panicking observer cancels the call; the panic resumes once the worker is done
            let mut observer_panic = None;
            let mut ask = |answer: thread::Result<Flow>| match answer {
                Ok(Flow::Continue) => {}
                Ok(Flow::Cancel) => token.cancel(),
                Err(payload) => {
                    log::error!("{operation}: progress observer panicked; cancelling");
                    token.cancel();
                    observer_panic.get_or_insert(payload);
                }
            };
            loop {
                match event_rx.recv_timeout(settings.poll_interval) {
                    Ok(Event::Progress(p)) => {
                        log::trace!(
                            "{operation}: {} / {} ({:.0}%)",
                            p.stage,
                            p.step,
                            p.fraction * 100.0
                        );
                        if !token.is_cancelled() {
                            ask(panic::catch_unwind(AssertUnwindSafe(|| observer.on_progress(&p))));
                        }
                        let flow = if token.is_cancelled() {
                            Flow::Cancel
                        } else {
                            Flow::Continue
                        };
                        let _ = reply_tx.send(flow);
                    }
                    Ok(Event::Done) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        if !token.is_cancelled() {
                            ask(panic::catch_unwind(AssertUnwindSafe(|| observer.on_idle())));
                        }
                    }
                }
            }
            drop(reply_tx);
            (worker.join(), observer_panic)
        });
        let raw = joined.map_err(|_| BridgeError::WorkerPanicked { operation })?;

        // SAFETY: `raw` was just returned by `engine` as a fresh result of kind `K`.
        let result = raw.map(|r| unsafe { OwnedHandle::<K>::from_raw(engine, r) });
        let cancelled = token.is_cancelled();
        let result = match result {
            Some(h) if cancelled => {
                log::info!("{operation}: result discarded after cancellation");
                drop(h);
                None
            }
            other => other,
        };
        if let Some(payload) = observer_panic {
            panic::resume_unwind(payload);
        }
        if cancelled {
            log::info!("{operation}: cancelled");
        }
        Ok(CompletedCommand {
            operation,
            result,
            cancelled,
        })
    }
}

/// A command that has run. Yields its result once.
#[derive(Debug)]
pub struct CompletedCommand<'e, K: HandleKind> {
    operation: &'static str,
    result: Option<OwnedHandle<'e, K>>,
    cancelled: bool,
}

impl<'e, K: HandleKind> CompletedCommand<'e, K> {
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// True if cancellation was requested before the call completed.
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// The result handle, or `None` for the null sentinel.
    pub fn into_result(self) -> Option<OwnedHandle<'e, K>> {
        self.result
    }
}

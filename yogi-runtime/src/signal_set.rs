//! Process-wide signals delivered to signal sets.
//!
//! `raise_signal` hands the signal to every live [`SignalSet`] whose mask
//! contains it. A set without a pending handler queues the signal until the
//! next `await_signal`. The optional cleanup handler runs once the last set
//! has released the raised signal.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use tracing::{debug, warn};

use crate::context::{Context, Poster};
use crate::lock;
use yogi_core::{Error, ErrorCode, OneShotSlot, Result, Signals};

/// Payload shared by all receivers of one raised signal.
pub type SignalArg = Arc<dyn Any + Send + Sync>;

pub type CleanupHandler = Box<dyn FnOnce(Option<SignalArg>) + Send>;
pub type SignalHandler = Box<dyn FnOnce(SignalOutcome) + Send>;

/// What a signal wait resolves to.
#[derive(Clone)]
pub enum SignalOutcome {
    Raised {
        signal: Signals,
        arg: Option<SignalArg>,
    },
    Canceled,
}

impl SignalOutcome {
    pub fn result(&self) -> Result<Signals> {
        match self {
            SignalOutcome::Raised { signal, .. } => Ok(*signal),
            SignalOutcome::Canceled => Err(ErrorCode::Canceled.into()),
        }
    }
}

impl std::fmt::Debug for SignalOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalOutcome::Raised { signal, arg } => f
                .debug_struct("Raised")
                .field("signal", signal)
                .field("has_arg", &arg.is_some())
                .finish(),
            SignalOutcome::Canceled => f.write_str("Canceled"),
        }
    }
}

struct RaisedSignal {
    signal: Signals,
    arg: Option<SignalArg>,
    // Behind a mutex so the raised signal can be shared across threads.
    cleanup: Mutex<Option<CleanupHandler>>,
}

impl Drop for RaisedSignal {
    fn drop(&mut self) {
        let cleanup = self
            .cleanup
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(cleanup) = cleanup {
            cleanup(self.arg.take());
        }
    }
}

struct SetInner {
    queue: VecDeque<Arc<RaisedSignal>>,
    slot: OneShotSlot<SignalHandler>,
}

struct SetShared {
    signals: Signals,
    poster: Poster,
    inner: Mutex<SetInner>,
}

impl SetShared {
    fn deliver(&self, handler: SignalHandler, raised: Arc<RaisedSignal>) {
        self.poster.post(move || {
            let outcome = SignalOutcome::Raised {
                signal: raised.signal,
                arg: raised.arg.clone(),
            };
            handler(outcome);
            drop(raised);
        });
    }

    fn cancel(&self, handler: SignalHandler) {
        self.poster.post(move || handler(SignalOutcome::Canceled));
    }
}

fn registry() -> &'static Mutex<Vec<Weak<SetShared>>> {
    static SETS: OnceLock<Mutex<Vec<Weak<SetShared>>>> = OnceLock::new();
    SETS.get_or_init(|| Mutex::new(Vec::new()))
}

/// Broadcast `signal` (exactly one flag) to all signal sets that contain it.
pub fn raise_signal<C>(signal: Signals, arg: Option<SignalArg>, cleanup: Option<C>) -> Result<()>
where
    C: FnOnce(Option<SignalArg>) + Send + 'static,
{
    if !signal.is_single() {
        return Err(Error::with_details(
            ErrorCode::InvalidParam,
            format!("{:?} is not a single signal", signal),
        ));
    }
    let raised = Arc::new(RaisedSignal {
        signal,
        arg,
        cleanup: Mutex::new(cleanup.map(|c| Box::new(c) as CleanupHandler)),
    });

    let targets: Vec<Arc<SetShared>> = {
        let mut sets = lock(registry());
        sets.retain(|w| w.strong_count() > 0);
        sets.iter()
            .filter_map(Weak::upgrade)
            .filter(|s| s.signals.contains(signal))
            .collect()
    };
    debug!("raising {:?} for {} signal sets", signal, targets.len());

    for set in targets {
        let mut inner = lock(&set.inner);
        match inner.slot.take() {
            Some(handler) => {
                drop(inner);
                set.deliver(handler, Arc::clone(&raised));
            }
            None => inner.queue.push_back(Arc::clone(&raised)),
        }
    }
    // The last reference may be ours; cleanup then runs here.
    drop(raised);
    Ok(())
}

/// Receives the signals in its mask.
pub struct SignalSet {
    shared: Arc<SetShared>,
    _ctx: Context,
}

impl SignalSet {
    pub fn new(ctx: &Context, signals: Signals) -> Self {
        let shared = Arc::new(SetShared {
            signals,
            poster: ctx.poster(),
            inner: Mutex::new(SetInner {
                queue: VecDeque::new(),
                slot: OneShotSlot::new(),
            }),
        });
        lock(registry()).push(Arc::downgrade(&shared));
        Self {
            shared,
            _ctx: ctx.clone(),
        }
    }

    pub fn signals(&self) -> Signals {
        self.shared.signals
    }

    /// Wait for the next signal. Replaces a pending wait, which receives
    /// `Canceled`. Queued signals are delivered first, in raise order.
    pub fn await_signal<F>(&self, handler: F)
    where
        F: FnOnce(SignalOutcome) + Send + 'static,
    {
        let mut inner = lock(&self.shared.inner);
        let (_, old) = inner.slot.replace(Box::new(handler));
        if let Some(old) = old {
            self.shared.cancel(old);
        }
        if let Some(raised) = inner.queue.pop_front() {
            if let Some(handler) = inner.slot.take() {
                drop(inner);
                self.shared.deliver(handler, raised);
            }
        }
    }

    /// Cancel the pending wait. False if there was none.
    pub fn cancel_await_signal(&self) -> bool {
        let handler = lock(&self.shared.inner).slot.take();
        match handler {
            Some(h) => {
                self.shared.cancel(h);
                true
            }
            None => false,
        }
    }
}

impl Drop for SignalSet {
    fn drop(&mut self) {
        self.cancel_await_signal();
        let queued: VecDeque<_> = std::mem::take(&mut lock(&self.shared.inner).queue);
        if !queued.is_empty() {
            debug!("dropping {} undelivered signals", queued.len());
        }
        drop(queued);
    }
}

/// Forwards SIGINT/SIGTERM (Ctrl+C where there is no SIGTERM) to
/// `raise_signal` until dropped.
pub struct OsSignalForwarder {
    task: tokio::task::JoinHandle<()>,
}

impl Drop for OsSignalForwarder {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn forward_os_signals(ctx: &Context) -> Result<OsSignalForwarder> {
    let _enter = ctx.io().enter();
    #[cfg(unix)]
    let task = {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| Error::with_details(ErrorCode::Unknown, e.to_string()))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| Error::with_details(ErrorCode::Unknown, e.to_string()))?;
        ctx.spawn(async move {
            loop {
                let sig = tokio::select! {
                    Some(_) = sigint.recv() => Signals::INT,
                    Some(_) = sigterm.recv() => Signals::TERM,
                    else => break,
                };
                forward(sig);
            }
        })
    };
    #[cfg(not(unix))]
    let task = ctx.spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            forward(Signals::INT);
        }
    });
    Ok(OsSignalForwarder { task })
}

fn forward(sig: Signals) {
    debug!("received OS signal {:?}", sig);
    if let Err(e) = raise_signal(sig, None, None::<CleanupHandler>) {
        warn!("forwarding {:?} failed: {}", sig, e);
    }
}

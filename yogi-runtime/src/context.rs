//! Event loop. Handlers are queued FIFO and executed by whichever threads
//! call `poll*`/`run*`; socket I/O and timers are driven by an internal tokio
//! runtime and post their completions into the queue.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use tokio::runtime::{Handle, Runtime};
use tracing::{debug, warn};

use crate::lock;
use yogi_core::{Duration, Error, ErrorCode, Result};

type Job = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct LoopState {
    queue: VecDeque<Job>,
    running: usize,
    stopped: bool,
}

struct Background {
    thread: JoinHandle<()>,
    id: ThreadId,
}

pub(crate) struct ContextInner {
    state: Mutex<LoopState>,
    cond: Condvar,
    background: Mutex<Option<Background>>,
    io: Handle,
}

/// Posts handlers into a context's queue. Held by I/O tasks; does not keep
/// the I/O runtime alive.
#[derive(Clone)]
pub(crate) struct Poster(Arc<ContextInner>);

impl Poster {
    pub(crate) fn post<F: FnOnce() + Send + 'static>(&self, f: F) {
        self.0.post(Box::new(f));
    }
}

struct ContextHandle {
    inner: Arc<ContextInner>,
    runtime: Mutex<Option<Runtime>>,
}

/// Shared handle to an event loop. Cloning is cheap; the loop, its
/// background thread and its I/O runtime go away with the last clone.
#[derive(Clone)]
pub struct Context {
    handle: Arc<ContextHandle>,
}

impl Context {
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("yogi-io")
            .enable_all()
            .build()
            .map_err(|e| Error::with_details(ErrorCode::Unknown, e.to_string()))?;
        let inner = Arc::new(ContextInner {
            state: Mutex::new(LoopState::default()),
            cond: Condvar::new(),
            background: Mutex::new(None),
            io: runtime.handle().clone(),
        });
        Ok(Self {
            handle: Arc::new(ContextHandle {
                inner,
                runtime: Mutex::new(Some(runtime)),
            }),
        })
    }

    fn inner(&self) -> &Arc<ContextInner> {
        &self.handle.inner
    }

    /// Queue `f` for execution by a runner. Never runs `f` synchronously.
    pub fn post<F: FnOnce() + Send + 'static>(&self, f: F) {
        self.inner().post(Box::new(f));
    }

    /// Run all ready handlers without blocking. Returns how many ran.
    pub fn poll(&self) -> usize {
        self.inner().run_loop(Some(Instant::now()), usize::MAX, false)
    }

    /// Run at most one ready handler without blocking.
    pub fn poll_one(&self) -> usize {
        self.inner().run_loop(Some(Instant::now()), 1, false)
    }

    /// Run handlers until `duration` elapses or `stop()` is called.
    pub fn run(&self, duration: Duration) -> usize {
        self.inner().run_loop(deadline(duration), usize::MAX, true)
    }

    /// Run until one handler ran, `duration` elapsed or `stop()` was called.
    pub fn run_one(&self, duration: Duration) -> usize {
        self.inner().run_loop(deadline(duration), 1, true)
    }

    /// Run the loop on a dedicated thread until `stop()`. `Busy` if a
    /// background runner already exists.
    pub fn run_in_background(&self) -> Result<()> {
        let mut bg = lock(&self.inner().background);
        if let Some(b) = bg.as_ref() {
            if !b.thread.is_finished() {
                return Err(ErrorCode::Busy.into());
            }
        }
        if let Some(old) = bg.take() {
            let _ = old.thread.join();
        }

        // Counted as running before the thread starts so that an immediate
        // stop() is not lost.
        self.inner().enter();
        let inner = Arc::clone(self.inner());
        let spawned = thread::Builder::new()
            .name("yogi-context".into())
            .spawn(move || {
                let _guard = RunningGuard(&inner);
                inner.drain(None, usize::MAX, true);
            });
        match spawned {
            Ok(thread) => {
                let id = thread.thread().id();
                *bg = Some(Background { thread, id });
                debug!("context running in background");
                Ok(())
            }
            Err(e) => {
                self.inner().leave();
                Err(Error::with_details(ErrorCode::Unknown, e.to_string()))
            }
        }
    }

    /// Make every runner return after its current handler. Idempotent.
    pub fn stop(&self) {
        self.inner().stop();
    }

    /// Block until at least one runner is active or `duration` elapsed.
    pub fn wait_for_running(&self, duration: Duration) -> bool {
        let inner = self.inner();
        let state = lock(&inner.state);
        inner.wait_until(state, deadline(duration), |s| s.running > 0).1
    }

    /// Block until no runner is active or `duration` elapsed. Joins a
    /// finished background thread.
    pub fn wait_for_stopped(&self, duration: Duration) -> bool {
        let inner = self.inner();
        let state = lock(&inner.state);
        let (state, ok) = inner.wait_until(state, deadline(duration), |s| s.running == 0);
        drop(state);
        if ok {
            inner.join_background();
        }
        ok
    }

    pub(crate) fn poster(&self) -> Poster {
        Poster(Arc::clone(self.inner()))
    }

    pub(crate) fn io(&self) -> &Handle {
        &self.inner().io
    }

    pub(crate) fn spawn<F>(&self, fut: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner().io.spawn(fut)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner().state);
        f.debug_struct("Context")
            .field("queued", &state.queue.len())
            .field("running", &state.running)
            .finish()
    }
}

/// `None` blocks until stopped; so does a duration too long to represent.
fn deadline(d: Duration) -> Option<Instant> {
    d.as_std().and_then(|d| Instant::now().checked_add(d))
}

/// Decrements the runner count even if a handler panics.
struct RunningGuard<'a>(&'a ContextInner);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.leave();
    }
}

impl ContextInner {
    fn post(&self, job: Job) {
        lock(&self.state).queue.push_back(job);
        self.cond.notify_all();
    }

    fn enter(&self) {
        let mut state = lock(&self.state);
        if state.running == 0 {
            state.stopped = false;
        }
        state.running += 1;
        drop(state);
        self.cond.notify_all();
    }

    fn leave(&self) {
        let mut state = lock(&self.state);
        state.running -= 1;
        drop(state);
        self.cond.notify_all();
    }

    fn stop(&self) {
        lock(&self.state).stopped = true;
        self.cond.notify_all();
    }

    fn run_loop(&self, deadline: Option<Instant>, max: usize, block: bool) -> usize {
        self.enter();
        let _guard = RunningGuard(self);
        self.drain(deadline, max, block)
    }

    /// Execute up to `max` handlers. Blocking runners wait for new handlers
    /// until `deadline` (`None` = forever); non-blocking ones return as soon
    /// as the queue is empty.
    fn drain(&self, deadline: Option<Instant>, max: usize, block: bool) -> usize {
        let mut executed = 0;
        while executed < max {
            let job = {
                let mut state = lock(&self.state);
                loop {
                    if state.stopped {
                        break None;
                    }
                    if let Some(job) = state.queue.pop_front() {
                        break Some(job);
                    }
                    if !block {
                        break None;
                    }
                    let (s, timed_out) = self.wait_step(state, deadline);
                    state = s;
                    if timed_out {
                        break None;
                    }
                }
            };
            match job {
                Some(job) => {
                    job();
                    executed += 1;
                }
                None => break,
            }
        }
        executed
    }

    /// One condvar wait. Returns true once `deadline` has passed.
    fn wait_step<'a>(
        &self,
        state: MutexGuard<'a, LoopState>,
        deadline: Option<Instant>,
    ) -> (MutexGuard<'a, LoopState>, bool) {
        match deadline {
            None => (
                self.cond
                    .wait(state)
                    .unwrap_or_else(std::sync::PoisonError::into_inner),
                false,
            ),
            Some(d) => {
                let now = Instant::now();
                if now >= d {
                    return (state, true);
                }
                let (s, _) = self
                    .cond
                    .wait_timeout(state, d - now)
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                (s, false)
            }
        }
    }

    fn wait_until<'a>(
        &self,
        mut state: MutexGuard<'a, LoopState>,
        deadline: Option<Instant>,
        pred: impl Fn(&LoopState) -> bool,
    ) -> (MutexGuard<'a, LoopState>, bool) {
        loop {
            if pred(&state) {
                return (state, true);
            }
            let (s, timed_out) = self.wait_step(state, deadline);
            state = s;
            if timed_out {
                let ok = pred(&state);
                return (state, ok);
            }
        }
    }

    fn join_background(&self) {
        let bg = lock(&self.background).take();
        if let Some(bg) = bg {
            if bg.id == thread::current().id() {
                return;
            }
            if bg.thread.join().is_err() {
                warn!("context background thread panicked");
            }
        }
    }
}

impl Drop for ContextHandle {
    fn drop(&mut self) {
        self.inner.stop();
        self.inner.join_background();
        let queued = lock(&self.inner.state).queue.len();
        if queued > 0 {
            debug!("context dropped with {} handlers still queued", queued);
        }
        if let Some(rt) = lock(&self.runtime).take() {
            rt.shutdown_background();
        }
    }
}

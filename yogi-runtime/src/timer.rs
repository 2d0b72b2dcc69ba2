//! Single-shot timers on a context.

use std::sync::{Arc, Mutex, Weak};

use tokio::task::JoinHandle;

use crate::context::{Context, Poster};
use crate::lock;
use yogi_core::{Duration, ErrorCode, Result};

pub type TimerHandler = Box<dyn FnOnce(Result<()>) + Send>;

struct PendingWait {
    id: u64,
    handler: TimerHandler,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct TimerState {
    next_id: u64,
    pending: Option<PendingWait>,
}

/// Calls a handler once after a delay. Restarting cancels the previous wait.
pub struct Timer {
    ctx: Context,
    state: Arc<Mutex<TimerState>>,
}

impl Timer {
    pub fn new(ctx: &Context) -> Self {
        Self {
            ctx: ctx.clone(),
            state: Arc::new(Mutex::new(TimerState::default())),
        }
    }

    /// Start waiting. The handler receives `Ok(())` on expiry or `Canceled`.
    /// An infinite duration only ends by cancellation.
    pub fn start<F>(&self, duration: Duration, handler: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let poster = self.ctx.poster();
        let mut state = lock(&self.state);
        if let Some(old) = state.pending.take() {
            cancel_wait(&poster, old);
        }
        state.next_id += 1;
        let id = state.next_id;
        let task = duration.as_std().map(|d| {
            let weak = Arc::downgrade(&self.state);
            let poster = poster.clone();
            self.ctx.spawn(async move {
                tokio::time::sleep(d).await;
                expire(&weak, &poster, id);
            })
        });
        state.pending = Some(PendingWait {
            id,
            handler: Box::new(handler),
            task,
        });
    }

    /// Cancel the pending wait. False if the timer was never started or has
    /// already expired.
    pub fn cancel(&self) -> bool {
        let pending = lock(&self.state).pending.take();
        match pending {
            Some(p) => {
                cancel_wait(&self.ctx.poster(), p);
                true
            }
            None => false,
        }
    }
}

fn cancel_wait(poster: &Poster, wait: PendingWait) {
    if let Some(task) = wait.task {
        task.abort();
    }
    let handler = wait.handler;
    poster.post(move || handler(Err(ErrorCode::Canceled.into())));
}

fn expire(state: &Weak<Mutex<TimerState>>, poster: &Poster, id: u64) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let mut state = lock(&state);
    if state.pending.as_ref().map(|p| p.id) != Some(id) {
        return;
    }
    if let Some(p) = state.pending.take() {
        let handler = p.handler;
        poster.post(move || handler(Ok(())));
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

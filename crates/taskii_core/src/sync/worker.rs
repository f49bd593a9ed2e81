//! Background drain worker.
//!
//! # Responsibility
//! - Run sync cycles off the caller's thread on an interval or on `wake()`.
//! - Cancel in-flight backend calls on `suspend()` and resume on `resume()`.
//!
//! # Invariants
//! - Local store calls never wait on the worker.
//! - A suspended worker performs no backend calls.

use crate::sync::backend::CancelToken;
use crate::sync::engine::{SyncEngine, SyncError};
use log::{debug, info, warn};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const MIN_RETRY_WAIT_MS: u64 = 250;

#[derive(Default)]
struct WorkerState {
    stop: bool,
    suspended: bool,
    wake: bool,
}

struct WorkerControl {
    state: Mutex<WorkerState>,
    changed: Condvar,
    cancel: CancelToken,
}

impl WorkerControl {
    fn lock_state(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the background sync thread. Dropping it stops the thread.
pub struct SyncWorker {
    control: Arc<WorkerControl>,
    handle: Option<JoinHandle<()>>,
}

impl SyncWorker {
    /// Spawns the worker; it runs a first cycle immediately.
    pub fn spawn(engine: Arc<SyncEngine>) -> std::io::Result<Self> {
        let control = Arc::new(WorkerControl {
            state: Mutex::new(WorkerState {
                wake: true,
                ..WorkerState::default()
            }),
            changed: Condvar::new(),
            cancel: CancelToken::new(),
        });

        let handle = {
            let control = Arc::clone(&control);
            thread::Builder::new()
                .name("taskii-sync".to_string())
                .spawn(move || run_loop(&engine, &control))?
        };
        info!("event=sync_worker_start module=sync status=ok");

        Ok(Self {
            control,
            handle: Some(handle),
        })
    }

    /// Requests a cycle as soon as possible.
    pub fn wake(&self) {
        self.control.lock_state().wake = true;
        self.control.changed.notify_all();
    }

    /// Cancels in-flight calls and pauses cycles (app moved to background).
    pub fn suspend(&self) {
        self.control.cancel.cancel();
        self.control.lock_state().suspended = true;
        self.control.changed.notify_all();
        info!("event=sync_worker_suspend module=sync status=ok");
    }

    /// Resumes cycles; the next drain continues from the first unacknowledged
    /// entry.
    pub fn resume(&self) {
        {
            let mut state = self.control.lock_state();
            self.control.cancel.reset();
            state.suspended = false;
            state.wake = true;
        }
        self.control.changed.notify_all();
        info!("event=sync_worker_resume module=sync status=ok");
    }

    pub fn is_suspended(&self) -> bool {
        self.control.lock_state().suspended
    }

    /// Stops the thread and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.control.cancel.cancel();
        self.control.lock_state().stop = true;
        self.control.changed.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("event=sync_worker_stop module=sync status=error error=worker_panicked");
                return;
            }
            info!("event=sync_worker_stop module=sync status=ok");
        }
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(engine: &SyncEngine, control: &WorkerControl) {
    let interval_ms = engine.config().drain_interval_ms;
    let mut wait_ms = interval_ms;

    loop {
        {
            let state = control.lock_state();
            let (mut state, _) = control
                .changed
                .wait_timeout_while(state, Duration::from_millis(wait_ms), |state| {
                    !state.stop && (state.suspended || !state.wake)
                })
                .unwrap_or_else(PoisonError::into_inner);
            if state.stop {
                return;
            }
            if state.suspended {
                continue;
            }
            state.wake = false;
        }

        wait_ms = match engine.run_cycle(&control.cancel) {
            Ok(report) => {
                debug!(
                    "event=sync_cycle module=sync status=ok delivered={} parked={} pulled={}",
                    report.drain.delivered,
                    report.drain.parked,
                    report.pull.as_ref().map_or(0, |pull| pull.applied)
                );
                next_wait_ms(interval_ms, report.drain.deferred_until_ms, engine)
            }
            Err(SyncError::Unavailable(err)) => {
                debug!(
                    "event=sync_cycle module=sync status=unavailable code={}",
                    err.code
                );
                next_wait_ms(interval_ms, None, engine)
            }
            Err(err) => {
                warn!("event=sync_cycle module=sync status=error error={}", err);
                interval_ms
            }
        };
    }
}

fn next_wait_ms(interval_ms: u64, deferred_until_ms: Option<i64>, engine: &SyncEngine) -> u64 {
    let retry_at = deferred_until_ms.or_else(|| {
        engine
            .status()
            .ok()
            .and_then(|status| status.next_retry_at_ms)
    });
    let Some(retry_at) = retry_at else {
        return interval_ms;
    };

    let until_retry = u64::try_from(retry_at.saturating_sub(engine.now_ms())).unwrap_or(0);
    until_retry.clamp(MIN_RETRY_WAIT_MS, interval_ms.max(MIN_RETRY_WAIT_MS))
}

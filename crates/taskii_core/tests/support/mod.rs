#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use taskii_core::{
    CancelToken, Mutation, PushAck, RemoteBackend, RemoteError, RemotePage, RemoteResult,
    SyncStage,
};

pub const BACKEND_ID: &str = "firebase_database";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStep {
    Accept,
    Unavailable,
    Reject,
    BlockUntilCancelled,
}

/// Backend that answers pushes from a script and pulls from queued pages.
///
/// Once the push script is exhausted every push is accepted.
#[derive(Default)]
pub struct ScriptedBackend {
    push_script: Mutex<VecDeque<PushStep>>,
    attempts: Mutex<Vec<Mutation>>,
    delivered: Mutex<Vec<Mutation>>,
    pages: Mutex<VecDeque<RemotePage>>,
    pull_cursors: Mutex<Vec<Option<String>>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, steps: &[PushStep]) {
        self.push_script.lock().unwrap().extend(steps.iter().copied());
    }

    pub fn queue_page(&self, page: RemotePage) {
        self.pages.lock().unwrap().push_back(page);
    }

    pub fn attempts(&self) -> Vec<Mutation> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> Vec<Mutation> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn pull_cursors(&self) -> Vec<Option<String>> {
        self.pull_cursors.lock().unwrap().clone()
    }
}

impl RemoteBackend for ScriptedBackend {
    fn backend_id(&self) -> &str {
        BACKEND_ID
    }

    fn push(&self, mutation: &Mutation, cancel: &CancelToken) -> RemoteResult<PushAck> {
        self.attempts.lock().unwrap().push(*mutation);
        let step = self
            .push_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PushStep::Accept);

        match step {
            PushStep::Accept => {
                self.delivered.lock().unwrap().push(*mutation);
                Ok(PushAck::default())
            }
            PushStep::Unavailable => Err(RemoteError::unavailable(
                BACKEND_ID,
                SyncStage::Push,
                "network unreachable",
            )),
            PushStep::Reject => Err(RemoteError::new(
                BACKEND_ID,
                SyncStage::Push,
                "permission_denied",
                "write rejected by rules",
                false,
            )),
            PushStep::BlockUntilCancelled => {
                let started = Instant::now();
                while !cancel.is_cancelled() {
                    if started.elapsed() > Duration::from_secs(5) {
                        return Err(RemoteError::unavailable(BACKEND_ID, SyncStage::Push, "timeout"));
                    }
                    thread::sleep(Duration::from_millis(5));
                }
                Err(RemoteError::cancelled(BACKEND_ID, SyncStage::Push))
            }
        }
    }

    fn pull(
        &self,
        cursor: Option<&str>,
        _limit: u32,
        _cancel: &CancelToken,
    ) -> RemoteResult<RemotePage> {
        self.pull_cursors
            .lock()
            .unwrap()
            .push(cursor.map(str::to_string));
        Ok(self.pages.lock().unwrap().pop_front().unwrap_or_default())
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

//! Fetch executor: replays a planned action list on a background task.
//!
//! Actions run strictly one after another. A `LocalRead` is served from the
//! cache store as one delivery; a `RemoteFetch` streams a range request and
//! writes every chunk to the store before handing it to the consumer.
//!
//! Control flows in through two channels: a `watch` carrying run/suspend and a
//! [`CancellationToken`]. Suspension drops the in-flight body after the bytes
//! received so far are stored; on resume the unfinished part of the action is
//! re-planned against the index, so nothing is requested or written twice.

use bytes::Bytes;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cache::LocalCacheStore;
use crate::error::{Error, Result};
use crate::interval::Interval;
use crate::planner::Action;
use crate::transport::{RangeResponse, RangeTransport, ResponseHead};
use crate::types::{DataSource, ExecutorState};

use super::{SharedStore, lock_ignoring_poison};

/// Receiver of executor progress (implemented by the orchestrator)
pub(crate) trait ExecutorDelegate: Send + Sync {
    /// Response head of the range request for `requested` arrived
    fn on_response(&self, head: ResponseHead, requested: Interval);
    /// Bytes ready for the consumer
    fn on_data(&self, offset: u64, bytes: Bytes, source: DataSource);
    /// Terminal notification, exactly once
    fn on_finished(&self, error: Option<Error>);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Control {
    Run,
    Suspend,
}

struct ExecutorShared {
    state: Mutex<ExecutorState>,
    /// Cleared by whoever sends the terminal notification, or when the owner detached
    listening: AtomicBool,
}

impl ExecutorShared {
    fn state(&self) -> ExecutorState {
        *lock_ignoring_poison(&self.state)
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Claim the terminal notification; true for exactly one caller
    fn take_terminal(&self) -> bool {
        self.listening.swap(false, Ordering::SeqCst)
    }

    /// Move to `Cancelled` unless already terminal; true if this call did it
    fn mark_cancelled(&self) -> bool {
        let mut state = lock_ignoring_poison(&self.state);
        if state.is_terminal() {
            return false;
        }
        *state = ExecutorState::Cancelled;
        true
    }

    /// Like [`mark_cancelled`](Self::mark_cancelled), also claiming the
    /// terminal notification under the same lock the task finishes under
    fn cancel_and_claim(&self) -> bool {
        let mut state = lock_ignoring_poison(&self.state);
        if state.is_terminal() {
            return false;
        }
        *state = ExecutorState::Cancelled;
        self.take_terminal()
    }
}

/// Handle to one execution of an action list
pub(crate) struct FetchExecutor {
    shared: Arc<ExecutorShared>,
    control: watch::Sender<Control>,
    cancel: CancellationToken,
    pending: Option<Run>,
    delegate: Arc<dyn ExecutorDelegate>,
    task: Option<JoinHandle<()>>,
}

impl FetchExecutor {
    pub(crate) fn new(
        url: Url,
        actions: Vec<Action>,
        store: SharedStore,
        transport: Arc<dyn RangeTransport>,
        delegate: Arc<dyn ExecutorDelegate>,
    ) -> Self {
        let shared = Arc::new(ExecutorShared {
            state: Mutex::new(ExecutorState::Idle),
            listening: AtomicBool::new(true),
        });
        let (control, control_rx) = watch::channel(Control::Run);
        let cancel = CancellationToken::new();

        let run = Run {
            url,
            actions: actions.into(),
            store,
            transport,
            delegate: delegate.clone(),
            control: control_rx,
            cancel: cancel.clone(),
            shared: shared.clone(),
        };

        Self {
            shared,
            control,
            cancel,
            pending: Some(run),
            delegate,
            task: None,
        }
    }

    /// Spawn the execution task; a suspend issued before this is honoured
    pub(crate) fn start(&mut self) {
        let Some(run) = self.pending.take() else {
            return;
        };

        {
            let mut state = lock_ignoring_poison(&self.shared.state);
            if *state == ExecutorState::Idle {
                *state = ExecutorState::Running;
            }
        }
        self.task = Some(tokio::spawn(run.execute()));
    }

    pub(crate) fn state(&self) -> ExecutorState {
        self.shared.state()
    }

    pub(crate) fn suspend(&self) {
        let mut state = lock_ignoring_poison(&self.shared.state);
        if matches!(*state, ExecutorState::Idle | ExecutorState::Running) {
            *state = ExecutorState::Suspended;
            self.control.send_replace(Control::Suspend);
        }
    }

    pub(crate) fn resume(&self) {
        let mut state = lock_ignoring_poison(&self.shared.state);
        if *state == ExecutorState::Suspended {
            *state = if self.pending.is_some() {
                ExecutorState::Idle
            } else {
                ExecutorState::Running
            };
            self.control.send_replace(Control::Run);
        }
    }

    /// Stop and report `Error::Cancelled` exactly once; no-op when already terminal
    pub(crate) fn cancel(&mut self) {
        if !self.shared.mark_cancelled() {
            return;
        }
        self.cancel.cancel();

        // never started: there is no task to deliver the terminal event
        if self.pending.take().is_some() && self.shared.take_terminal() {
            self.delegate.on_finished(Some(Error::Cancelled));
        }
    }

    /// Stop because a newer plan replaces this one
    ///
    /// `Error::Cancelled` is delivered before this returns, so it precedes
    /// every event of the replacing executor. If the task already reached a
    /// terminal state it reports that itself.
    pub(crate) fn supersede(&mut self) {
        let delivered_here = self.shared.cancel_and_claim();
        self.cancel.cancel();
        self.pending.take();

        if delivered_here {
            self.delegate.on_finished(Some(Error::Cancelled));
        }
    }

    /// Stop without any further notification
    pub(crate) fn abort(&mut self) {
        self.shared.listening.store(false, Ordering::SeqCst);
        self.shared.mark_cancelled();
        self.cancel.cancel();
        self.pending.take();
    }
}

impl Drop for FetchExecutor {
    fn drop(&mut self) {
        self.abort();
        // the task observes the token and winds down by itself
        self.task.take();
    }
}

enum StreamOutcome {
    Done,
    Suspended { cursor: u64 },
}

struct Run {
    url: Url,
    actions: VecDeque<Action>,
    store: SharedStore,
    transport: Arc<dyn RangeTransport>,
    delegate: Arc<dyn ExecutorDelegate>,
    control: watch::Receiver<Control>,
    cancel: CancellationToken,
    shared: Arc<ExecutorShared>,
}

impl Run {
    async fn execute(mut self) {
        tracing::debug!(url = %self.url, actions = self.actions.len(), "Executing download plan");
        let result = self.run_actions().await;
        self.finish(result);
    }

    async fn run_actions(&mut self) -> Result<()> {
        while let Some(action) = self.actions.pop_front() {
            self.wait_until_runnable().await?;
            match action {
                Action::LocalRead(interval) => self.replay(interval)?,
                Action::RemoteFetch(interval) => self.fetch(interval).await?,
            }
        }
        Ok(())
    }

    fn replay(&mut self, interval: Interval) -> Result<()> {
        tracing::debug!(url = %self.url, range = %interval, "Replaying cached bytes");

        let bytes = self.store().read(interval).inspect_err(|e| {
            tracing::error!(url = %self.url, range = %interval, error = %e, "Cache index out of sync with data file");
        })?;

        if self.is_detached() {
            return Err(Error::Cancelled);
        }
        self.delegate
            .on_data(interval.start(), bytes, DataSource::Local);
        Ok(())
    }

    async fn fetch(&mut self, interval: Interval) -> Result<()> {
        match self.stream(interval).await? {
            StreamOutcome::Done => Ok(()),
            StreamOutcome::Suspended { cursor } => {
                self.flush_store();
                tracing::debug!(url = %self.url, cursor, "Fetch suspended");
                self.wait_until_runnable().await?;

                // re-plan what is still missing; the index already holds [start, cursor)
                if let Some(rest) = interval.remainder_from(cursor) {
                    let replanned = self.store().plan(rest);
                    for action in replanned.into_iter().rev() {
                        self.actions.push_front(action);
                    }
                }
                Ok(())
            }
        }
    }

    async fn stream(&mut self, interval: Interval) -> Result<StreamOutcome> {
        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            response = self.transport.fetch_range(&self.url, interval) => response?,
        };
        let RangeResponse { head, mut body } = response;

        // a plain 200 carries the resource from offset 0
        let mut stream_pos = if head.is_partial() { interval.start() } else { 0 };
        if self.is_detached() {
            return Err(Error::Cancelled);
        }
        self.delegate.on_response(head, interval);
        let end = self.resync(interval);

        let mut cursor = interval.start();
        while cursor < end {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                changed = self.control.changed() => {
                    if changed.is_err() {
                        return Err(Error::Cancelled);
                    }
                    // only a suspend signals while running; a resume may already have followed it
                    return Ok(StreamOutcome::Suspended { cursor });
                }
                chunk = body.next() => {
                    let bytes = match chunk {
                        Some(chunk) => chunk?,
                        None => break,
                    };
                    let chunk_start = stream_pos;
                    stream_pos += bytes.len() as u64;

                    let from = cursor.max(chunk_start);
                    let to = stream_pos.min(end);
                    if to <= from {
                        continue;
                    }
                    let piece = bytes.slice((from - chunk_start) as usize..(to - chunk_start) as usize);

                    {
                        // checked under the store lock so a superseding plan sees every write
                        let mut store = self.store();
                        if self.is_detached() {
                            return Err(Error::Cancelled);
                        }
                        store.write(from, &piece)?;
                    }
                    cursor = to;

                    if self.is_detached() {
                        return Err(Error::Cancelled);
                    }
                    self.delegate.on_data(from, piece, DataSource::Remote);
                }
            }
        }
        drop(body);
        self.flush_store();

        if end != u64::MAX && cursor < end {
            return Err(Error::IncompleteBody {
                url: self.url.to_string(),
                expected: end - interval.start(),
                received: cursor - interval.start(),
            });
        }
        Ok(StreamOutcome::Done)
    }

    /// Apply a newly learned content length: effective end of `current`, and
    /// queued actions clamped (or dropped) to the resource length
    fn resync(&mut self, current: Interval) -> u64 {
        let Some(length) = self
            .store()
            .metadata()
            .and_then(|metadata| metadata.known_length())
        else {
            return current.end();
        };

        self.actions = self
            .actions
            .drain(..)
            .filter_map(|action| {
                action
                    .interval()
                    .clamp_end(length)
                    .map(|clamped| action.with_interval(clamped))
            })
            .collect();

        current.end().min(length)
    }

    /// Cancelled, superseded or dropped: nothing more reaches the delegate
    fn is_detached(&self) -> bool {
        self.cancel.is_cancelled() || !self.shared.is_listening()
    }

    async fn wait_until_runnable(&mut self) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if *self.control.borrow_and_update() == Control::Run {
                return Ok(());
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                changed = self.control.changed() => {
                    if changed.is_err() {
                        return Err(Error::Cancelled);
                    }
                }
            }
        }
    }

    fn finish(self, result: Result<()>) {
        self.flush_store();

        let (error, notify) = {
            let mut state = lock_ignoring_poison(&self.shared.state);
            let error = if *state == ExecutorState::Cancelled {
                Some(Error::Cancelled)
            } else {
                match result {
                    Ok(()) => {
                        *state = ExecutorState::Completed;
                        None
                    }
                    Err(Error::Cancelled) => {
                        *state = ExecutorState::Cancelled;
                        Some(Error::Cancelled)
                    }
                    Err(e) => {
                        *state = ExecutorState::Failed;
                        Some(e)
                    }
                }
            };
            (error, self.shared.take_terminal())
        };

        match &error {
            None => tracing::debug!(url = %self.url, "Download plan completed"),
            Some(Error::Cancelled) => tracing::debug!(url = %self.url, "Download plan cancelled"),
            Some(e) => tracing::warn!(url = %self.url, error = %e, "Download plan failed"),
        }

        if notify {
            self.delegate.on_finished(error);
        }
    }

    fn flush_store(&self) {
        if let Err(e) = self.store().flush() {
            tracing::warn!(url = %self.url, error = %e, "Failed to persist cache index");
        }
    }

    fn store(&self) -> std::sync::MutexGuard<'_, LocalCacheStore> {
        lock_ignoring_poison(&self.store)
    }
}

//! Action planning: split a requested interval into cache replays and network fetches.

use serde::{Deserialize, Serialize};

use crate::interval::{Interval, IntervalSet};
use crate::types::ResourceMetadata;

/// One planned unit of work covering a sub-interval of a request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "interval", rename_all = "snake_case")]
pub enum Action {
    /// Serve the bytes from the local cache
    LocalRead(Interval),
    /// Fetch the bytes with a range request and cache them
    RemoteFetch(Interval),
}

impl Action {
    /// The interval this action covers
    pub fn interval(&self) -> Interval {
        match self {
            Action::LocalRead(interval) | Action::RemoteFetch(interval) => *interval,
        }
    }

    /// Same kind of action over a different interval
    pub(crate) fn with_interval(&self, interval: Interval) -> Action {
        match self {
            Action::LocalRead(_) => Action::LocalRead(interval),
            Action::RemoteFetch(_) => Action::RemoteFetch(interval),
        }
    }
}

/// Plan `requested` against the cached intervals in `index`
///
/// The returned actions are contiguous, ascending and tile the request
/// exactly. When `metadata` carries a known content length the request is
/// first clamped to it, which may leave nothing to do. Without a known length
/// the request is planned as given and corrected by the executor once the
/// first response arrives.
pub fn plan(
    requested: Interval,
    index: &IntervalSet,
    metadata: Option<&ResourceMetadata>,
) -> Vec<Action> {
    let requested = match metadata.and_then(ResourceMetadata::known_length) {
        Some(length) => match requested.clamp_end(length) {
            Some(clamped) => clamped,
            None => return Vec::new(),
        },
        None => requested,
    };

    let mut covered = index.covered(requested).into_iter().peekable();
    let mut gaps = index.gaps(requested).into_iter().peekable();
    let mut actions = Vec::new();

    loop {
        let next = match (covered.peek(), gaps.peek()) {
            (Some(local), Some(remote)) if local.start() < remote.start() => {
                covered.next().map(Action::LocalRead)
            }
            (_, Some(_)) => gaps.next().map(Action::RemoteFetch),
            (Some(_), None) => covered.next().map(Action::LocalRead),
            (None, None) => None,
        };

        match next {
            Some(action) => actions.push(action),
            None => break,
        }
    }

    actions
}

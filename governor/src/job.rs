use std::cmp::Ordering;
use std::collections::HashMap;

use tokio::sync::oneshot;

use adapters::AdapterResponse;
use corelib::{IngestError, Priority, RequestId};

/// A single outbound provider call, queued on the target provider's worker.
/// The request's overall fallback chain may touch more than one provider
/// worker over its lifetime; each `Job` is one step against one provider.
pub struct Job {
    pub request_id: RequestId,
    pub endpoint: String,
    pub params: HashMap<String, String>,
    pub priority: Priority,
    pub seq: u64,
    pub respond: oneshot::Sender<Result<AdapterResponse, IngestError>>,
}

/// Explicit total order for the provider worker's ready queue: priority
/// ascending (more urgent first), then insertion sequence ascending. Never
/// an embedded comparator on the request itself.
struct QueueKey {
    priority: Priority,
    seq: u64,
}

impl QueueKey {
    fn of(job: &Job) -> Self {
        Self {
            priority: job.priority,
            seq: job.seq,
        }
    }
}

impl PartialEq for QueueKey {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueueKey {}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Wraps a `Job` for storage in a `BinaryHeap` (a max-heap) so that the
/// lowest `QueueKey` — highest priority, earliest sequence — pops first.
pub struct ReadyJob(pub Job);

impl PartialEq for ReadyJob {
    fn eq(&self, other: &Self) -> bool {
        QueueKey::of(&self.0) == QueueKey::of(&other.0)
    }
}
impl Eq for ReadyJob {}

impl PartialOrd for ReadyJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap pops the greatest element, but we want the
        // smallest QueueKey (highest priority) to pop first.
        QueueKey::of(&other.0).cmp(&QueueKey::of(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    fn job(priority: Priority, seq: u64) -> Job {
        let (tx, _rx) = oneshot::channel();
        Job {
            request_id: RequestId(seq),
            endpoint: "price".into(),
            params: HashMap::new(),
            priority,
            seq,
            respond: tx,
        }
    }

    #[test]
    fn higher_priority_pops_first() {
        let mut heap = BinaryHeap::new();
        heap.push(ReadyJob(job(Priority::Low, 1)));
        heap.push(ReadyJob(job(Priority::Critical, 2)));
        heap.push(ReadyJob(job(Priority::Medium, 3)));

        let first = heap.pop().unwrap().0;
        assert_eq!(first.priority, Priority::Critical);
    }

    #[test]
    fn ties_broken_by_insertion_sequence() {
        let mut heap = BinaryHeap::new();
        heap.push(ReadyJob(job(Priority::High, 5)));
        heap.push(ReadyJob(job(Priority::High, 1)));

        let first = heap.pop().unwrap().0;
        assert_eq!(first.seq, 1);
    }
}

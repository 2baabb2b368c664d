use crate::domain::{DomainError, DomainResult};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

type AckSender = oneshot::Sender<DomainResult<()>>;

/// Receives the broker's verdict on one publish.
pub type AckReceiver = oneshot::Receiver<DomainResult<()>>;

#[derive(Default)]
struct AckState {
    /// Handed to the client, packet id not yet assigned. The event loop
    /// assigns ids in request order, so the front is always the next one.
    queued: VecDeque<AckSender>,
    /// Written to the broker, waiting for PUBACK (QoS 1) or PUBCOMP (QoS 2).
    inflight: HashMap<u16, VecDeque<AckSender>>,
    /// Parked by the client on a packet id collision until that id frees up.
    collided: Option<(u16, AckSender)>,
}

/// Correlates publishes with broker acknowledgements.
///
/// Publishers register under the same lock that orders their requests into
/// the client queue; the event loop driver reports packet ids and acks.
#[derive(Clone, Default)]
pub struct PublishAcks {
    state: Arc<Mutex<AckState>>,
}

impl PublishAcks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AckState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `submit` and, if it queued a publish, register a waiter for it.
    /// `submit` must not block: it runs under the tracker lock.
    pub fn register<E>(&self, submit: impl FnOnce() -> Result<(), E>) -> Result<AckReceiver, E> {
        let mut state = self.lock();
        submit()?;
        let (tx, rx) = oneshot::channel();
        state.queued.push_back(tx);
        Ok(rx)
    }

    /// A publish went out with `pkid`; 0 means QoS 0, which is done once written.
    pub fn on_publish_sent(&self, pkid: u16) {
        let mut state = self.lock();

        let waiter = match state.collided.take() {
            Some((parked, waiter)) if parked == pkid => Some(waiter),
            other => {
                state.collided = other;
                state.queued.pop_front()
            }
        };
        let Some(waiter) = waiter else {
            return;
        };

        if pkid == 0 {
            let _ = waiter.send(Ok(()));
        } else {
            state.inflight.entry(pkid).or_default().push_back(waiter);
        }
    }

    /// The client parked the next publish because `pkid` is still in flight.
    pub fn on_publish_parked(&self, pkid: u16) {
        let mut state = self.lock();
        if let Some(waiter) = state.queued.pop_front() {
            state.collided = Some((pkid, waiter));
        }
    }

    /// PUBACK or PUBCOMP for `pkid`.
    pub fn on_acked(&self, pkid: u16) {
        let mut state = self.lock();
        let Some(waiters) = state.inflight.get_mut(&pkid) else {
            return;
        };
        if let Some(waiter) = waiters.pop_front() {
            let _ = waiter.send(Ok(()));
        }
        if waiters.is_empty() {
            state.inflight.remove(&pkid);
        }
    }

    /// Fail every outstanding publish. `purge` runs under the tracker lock so
    /// the caller can drop the matching client requests atomically.
    pub fn fail_all(&self, reason: &str, purge: impl FnOnce()) -> usize {
        let mut state = self.lock();
        purge();

        let mut waiters: Vec<AckSender> = state.queued.drain(..).collect();
        waiters.extend(state.inflight.drain().flat_map(|(_, queue)| queue));
        waiters.extend(state.collided.take().map(|(_, waiter)| waiter));

        let failed = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(Err(DomainError::Publish(reason.to_string())));
        }
        failed
    }

    pub fn outstanding(&self) -> usize {
        let state = self.lock();
        state.queued.len()
            + state.inflight.values().map(VecDeque::len).sum::<usize>()
            + usize::from(state.collided.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(acks: &PublishAcks) -> AckReceiver {
        acks.register(|| Ok::<(), ()>(())).unwrap()
    }

    #[tokio::test]
    async fn test_resolves_on_ack_for_assigned_packet_id() {
        let acks = PublishAcks::new();
        let first = register(&acks);
        let mut second = register(&acks);

        acks.on_publish_sent(1);
        acks.on_publish_sent(2);
        acks.on_acked(1);

        assert!(first.await.unwrap().is_ok());
        assert!(second.try_recv().is_err());
        assert_eq!(acks.outstanding(), 1);

        acks.on_acked(2);
        assert!(second.await.unwrap().is_ok());
        assert_eq!(acks.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_qos0_resolves_when_written() {
        let acks = PublishAcks::new();
        let rx = register(&acks);
        acks.on_publish_sent(0);
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_failed_submit_registers_nothing() {
        let acks = PublishAcks::new();
        let result = acks.register(|| Err::<(), _>("queue full"));
        assert_eq!(result.err(), Some("queue full"));
        assert_eq!(acks.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_fail_all_reports_loss() {
        let acks = PublishAcks::new();
        let written = register(&acks);
        let queued = register(&acks);
        acks.on_publish_sent(7);

        let mut purged = false;
        assert_eq!(acks.fail_all("connection lost", || purged = true), 2);
        assert!(purged);

        assert!(matches!(written.await.unwrap(), Err(DomainError::Publish(_))));
        assert!(matches!(queued.await.unwrap(), Err(DomainError::Publish(_))));
        assert_eq!(acks.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_collided_publish_resolves_after_original() {
        let acks = PublishAcks::new();
        let original = register(&acks);
        let mut parked = register(&acks);

        acks.on_publish_sent(3);
        acks.on_publish_parked(3);
        // The parked publish is written before the ack for the original is reported.
        acks.on_publish_sent(3);
        acks.on_acked(3);

        assert!(original.await.unwrap().is_ok());
        assert!(parked.try_recv().is_err());

        acks.on_acked(3);
        assert!(parked.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_unsolicited_ack_is_ignored() {
        let acks = PublishAcks::new();
        let mut rx = register(&acks);
        acks.on_publish_sent(1);
        acks.on_acked(9);
        assert!(rx.try_recv().is_err());
        assert_eq!(acks.outstanding(), 1);
    }
}

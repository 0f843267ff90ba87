//! A single SSE subscriber's state: what it's watching, its claims for the
//! per-event visibility probe, and its bounded outbound queue.

use crate::event::OutboundEvent;
use ayb_auth::Claims;
use ayb_filter::Expr;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

/// How long the outbound queue may stay full before the subscription is
/// dropped and the client must reconnect.
pub const DEFAULT_BACKPRESSURE_CUTOFF: Duration = Duration::from_secs(5);

pub struct Subscription {
    pub id: Uuid,
    pub table_key: String,
    pub filter: Option<Expr>,
    pub claims: Claims,
    sender: mpsc::Sender<OutboundEvent>,
    backpressure_cutoff: Duration,
    full_since: Mutex<Option<Instant>>,
}

pub enum PushOutcome {
    Delivered,
    /// Queue is momentarily full but within the backpressure grace period.
    Dropped,
    /// Queue has been full for longer than the cutoff — caller should tear
    /// the subscription down.
    Terminate,
}

impl Subscription {
    #[must_use]
    pub fn new(
        table_key: String,
        filter: Option<Expr>,
        claims: Claims,
        queue_capacity: usize,
    ) -> (Self, mpsc::Receiver<OutboundEvent>) {
        let (sender, receiver) = mpsc::channel(queue_capacity);
        let subscription = Self {
            id: Uuid::new_v4(),
            table_key,
            filter,
            claims,
            sender,
            backpressure_cutoff: DEFAULT_BACKPRESSURE_CUTOFF,
            full_since: Mutex::new(None),
        };
        (subscription, receiver)
    }

    #[must_use]
    pub fn with_backpressure_cutoff(mut self, cutoff: Duration) -> Self {
        self.backpressure_cutoff = cutoff;
        self
    }

    pub fn push(&self, event: OutboundEvent) -> PushOutcome {
        match self.sender.try_send(event) {
            Ok(()) => {
                *self.full_since.lock() = None;
                PushOutcome::Delivered
            }
            Err(mpsc::error::TrySendError::Closed(_)) => PushOutcome::Terminate,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let mut guard = self.full_since.lock();
                let since = *guard.get_or_insert(Instant::now());
                if since.elapsed() >= self.backpressure_cutoff {
                    PushOutcome::Terminate
                } else {
                    PushOutcome::Dropped
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ayb_auth::Claims;
    use uuid::Uuid as UuidT;

    fn anon_claims() -> Claims {
        Claims::anonymous(UuidT::new_v4())
    }

    #[test]
    fn delivers_when_queue_has_room() {
        let (sub, mut rx) = Subscription::new("public.posts".into(), None, anon_claims(), 4);
        let outcome = sub.push(OutboundEvent {
            action: crate::event::Action::Insert,
            data: serde_json::json!({"id": 1}),
        });
        assert!(matches!(outcome, PushOutcome::Delivered));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn drops_without_terminating_within_grace_period() {
        let (sub, _rx) = Subscription::new("public.posts".into(), None, anon_claims(), 1);
        let ev = || OutboundEvent {
            action: crate::event::Action::Insert,
            data: serde_json::json!({}),
        };
        assert!(matches!(sub.push(ev()), PushOutcome::Delivered));
        assert!(matches!(sub.push(ev()), PushOutcome::Dropped));
    }

    #[test]
    fn terminates_once_backpressure_cutoff_elapses() {
        let (sub, _rx) = Subscription::new("public.posts".into(), None, anon_claims(), 1);
        let sub = sub.with_backpressure_cutoff(Duration::from_millis(1));
        let ev = || OutboundEvent {
            action: crate::event::Action::Insert,
            data: serde_json::json!({}),
        };
        assert!(matches!(sub.push(ev()), PushOutcome::Delivered));
        assert!(matches!(sub.push(ev()), PushOutcome::Dropped));
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(sub.push(ev()), PushOutcome::Terminate));
    }
}

//! Subject-addressed in-process broker.
//!
//! Two delivery modes, matching the dispatch contract:
//! - the exec-request subject is backed by a stream with a durable
//!   consumer: messages are pulled, must be acked, and are redelivered
//!   after `ack_wait` if not (at-least-once);
//! - every other subject is an ephemeral inbox: fire-and-forget fan-in
//!   to the single live subscription, dropped when nobody listens.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tracing::{debug, trace};

use swarm_core::config::BusConfig;

use crate::error::{BusError, Result};

/// Ack returned by a publish: the stream name and the message's sequence.
#[derive(Debug, Clone)]
pub struct PubAck {
    pub stream: String,
    pub seq: u64,
}

/// One message pulled from the durable exec-request consumer. Must be
/// acked via [`Broker::ack`] or it is redelivered after `ack_wait`.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub seq: u64,
    pub payload: Vec<u8>,
}

struct Pending {
    seq: u64,
    payload: Vec<u8>,
    delivered_at: Option<Instant>,
}

pub struct Broker {
    cfg: BusConfig,
    seq: AtomicU64,
    subjects: Arc<DashMap<String, mpsc::UnboundedSender<Vec<u8>>>>,
    stream: Mutex<VecDeque<Pending>>,
    stream_notify: Notify,
}

impl Broker {
    pub fn new(cfg: BusConfig) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            seq: AtomicU64::new(0),
            subjects: Arc::new(DashMap::new()),
            stream: Mutex::new(VecDeque::new()),
            stream_notify: Notify::new(),
        })
    }

    pub fn config(&self) -> &BusConfig {
        &self.cfg
    }

    /// Publish `payload` on `subject` and return the broker ack.
    ///
    /// Publishing on the exec-request subject appends to the durable
    /// stream; any other subject is treated as an ephemeral inbox and
    /// the payload is dropped when no subscription exists.
    pub async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<PubAck> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;

        if subject == self.cfg.exec_req_subject {
            {
                let mut stream = self
                    .stream
                    .lock()
                    .map_err(|_| BusError::Internal("stream lock poisoned".into()))?;
                stream.push_back(Pending {
                    seq,
                    payload,
                    delivered_at: None,
                });
            }
            self.stream_notify.notify_one();
            trace!(subject, seq, "published to request stream");
        } else {
            match self.subjects.get(subject) {
                Some(tx) => {
                    // A closed receiver races with unsubscribe; treat as a drop.
                    if tx.send(payload).is_err() {
                        debug!(subject, "subscriber gone; response dropped");
                    }
                }
                None => debug!(subject, "no subscriber; message dropped"),
            }
            trace!(subject, seq, "published to inbox");
        }

        Ok(PubAck {
            stream: self.cfg.exec_stream.clone(),
            seq,
        })
    }

    /// Subscribe to an ephemeral subject. The subscription owns the
    /// subject entry and removes it on drop (drain semantics).
    pub fn subscribe(&self, subject: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subjects.insert(subject.to_string(), tx);
        Subscription {
            subject: subject.to_string(),
            rx,
            subjects: Arc::clone(&self.subjects),
        }
    }

    /// Pull the next deliverable message from the exec-request stream:
    /// either a fresh one or one whose previous delivery went unacked
    /// for longer than `ack_wait`.
    pub async fn pull(&self) -> Result<StreamMessage> {
        let ack_wait = Duration::from_secs_f64(self.cfg.ack_wait_secs);
        loop {
            let (found, next_due) = {
                let mut stream = self
                    .stream
                    .lock()
                    .map_err(|_| BusError::Internal("stream lock poisoned".into()))?;
                let now = Instant::now();
                let mut found = None;
                let mut next_due: Option<Instant> = None;
                for msg in stream.iter_mut() {
                    match msg.delivered_at {
                        Some(t) if now.duration_since(t) < ack_wait => {
                            let due = t + ack_wait;
                            next_due = Some(next_due.map_or(due, |d| d.min(due)));
                        }
                        _ => {
                            msg.delivered_at = Some(now);
                            found = Some(StreamMessage {
                                seq: msg.seq,
                                payload: msg.payload.clone(),
                            });
                            break;
                        }
                    }
                }
                (found, next_due)
            };

            if let Some(msg) = found {
                trace!(seq = msg.seq, "delivered from request stream");
                return Ok(msg);
            }

            match next_due {
                Some(due) => {
                    tokio::select! {
                        _ = self.stream_notify.notified() => {}
                        _ = tokio::time::sleep_until(tokio::time::Instant::from_std(due)) => {}
                    }
                }
                None => self.stream_notify.notified().await,
            }
        }
    }

    /// Ack a pulled message so it is removed from the stream.
    pub fn ack(&self, seq: u64) -> Result<()> {
        let mut stream = self
            .stream
            .lock()
            .map_err(|_| BusError::Internal("stream lock poisoned".into()))?;
        stream.retain(|m| m.seq != seq);
        trace!(seq, "acked");
        Ok(())
    }

    /// Messages currently held by the request stream (acked ones are gone).
    pub fn stream_depth(&self) -> usize {
        self.stream.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// An ephemeral subject subscription. Dropping it unsubscribes and
/// discards anything not yet read.
pub struct Subscription {
    subject: String,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    subjects: Arc<DashMap<String, mpsc::UnboundedSender<Vec<u8>>>>,
}

impl Subscription {
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Await the next message, bounded by `timeout`.
    pub async fn next(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(payload)) => Ok(payload),
            Ok(None) => Err(BusError::SubjectClosed(self.subject.clone())),
            Err(_) => Err(BusError::ResponseTimeout {
                inbox: self.subject.clone(),
                secs: timeout.as_secs_f64(),
            }),
        }
    }

    /// Discard everything already queued on the inbox.
    pub fn drain(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.subjects.remove(&self.subject);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg(ack_wait_secs: f64) -> BusConfig {
        BusConfig {
            ack_wait_secs,
            ..BusConfig::default()
        }
    }

    #[tokio::test]
    async fn inbox_delivers_to_subscriber() {
        let broker = Broker::new(test_cfg(30.0));
        let mut sub = broker.subscribe("tools.execute.response.abc");
        broker
            .publish("tools.execute.response.abc", b"hi".to_vec())
            .await
            .unwrap();
        let msg = sub.next(Duration::from_millis(100)).await.unwrap();
        assert_eq!(msg, b"hi");
    }

    #[tokio::test]
    async fn inbox_times_out_without_publisher() {
        let broker = Broker::new(test_cfg(30.0));
        let mut sub = broker.subscribe("tools.execute.response.xyz");
        let err = sub.next(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, BusError::ResponseTimeout { .. }));
    }

    #[tokio::test]
    async fn stream_seq_is_monotonic() {
        let broker = Broker::new(test_cfg(30.0));
        let subject = broker.config().exec_req_subject.clone();
        let a = broker.publish(&subject, b"1".to_vec()).await.unwrap();
        let b = broker.publish(&subject, b"2".to_vec()).await.unwrap();
        assert!(b.seq > a.seq);
    }

    #[tokio::test]
    async fn unacked_message_is_redelivered() {
        let broker = Broker::new(test_cfg(0.05));
        let subject = broker.config().exec_req_subject.clone();
        broker.publish(&subject, b"job".to_vec()).await.unwrap();

        let first = broker.pull().await.unwrap();
        // Not acked: after ack_wait the same seq comes around again.
        let second = broker.pull().await.unwrap();
        assert_eq!(first.seq, second.seq);

        broker.ack(second.seq).unwrap();
        assert_eq!(broker.stream_depth(), 0);
    }

    #[tokio::test]
    async fn acked_message_is_not_redelivered() {
        let broker = Broker::new(test_cfg(0.05));
        let subject = broker.config().exec_req_subject.clone();
        broker.publish(&subject, b"a".to_vec()).await.unwrap();
        broker.publish(&subject, b"b".to_vec()).await.unwrap();

        let first = broker.pull().await.unwrap();
        broker.ack(first.seq).unwrap();
        let second = broker.pull().await.unwrap();
        assert_ne!(first.seq, second.seq);
        assert_eq!(second.payload, b"b");
    }

    #[tokio::test]
    async fn drain_discards_queued_messages() {
        let broker = Broker::new(test_cfg(30.0));
        let mut sub = broker.subscribe("inbox.1");
        broker.publish("inbox.1", b"first".to_vec()).await.unwrap();
        broker.publish("inbox.1", b"second".to_vec()).await.unwrap();

        let first = sub.next(Duration::from_millis(100)).await.unwrap();
        assert_eq!(first, b"first");
        sub.drain();
        let err = sub.next(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, BusError::ResponseTimeout { .. }));
    }
}

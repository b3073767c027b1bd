//! Per-session event fan-out with bounded backlog and backpressure.
//!
//! One writer (the stage sequencer) appends ordered events per session;
//! any number of subscribers consume them, attaching at any time. The
//! multiplexer keeps a bounded backlog for late-subscriber replay and
//! never lets a slow reader throttle the producer: a subscriber whose
//! outbound buffer fills is disconnected instead.

use std::collections::VecDeque;
use std::pin::Pin;

use dashmap::DashMap;
use futures::Stream;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use liaison_core::events::{EventEnvelope, WorkflowEvent};

/// Ordered event stream handed to a subscriber: buffered replay first,
/// then live events. Ends when the session's stream closes or the
/// subscriber is disconnected for falling behind.
pub type EventStream = Pin<Box<dyn Stream<Item = EventEnvelope> + Send>>;

/// Errors returned by [`StreamMultiplexer::subscribe`].
#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    /// No event log exists for this session.
    #[error("no event stream for session {0}")]
    UnknownSession(String),

    /// The requested sequence was evicted from the bounded backlog. The
    /// caller must fall back to reading the session's checkpoint state.
    #[error("backlog unavailable: requested seq {requested}, oldest retained {oldest}")]
    BacklogUnavailable {
        /// Sequence the subscriber asked for.
        requested: u64,
        /// Oldest sequence still retained.
        oldest: u64,
    },
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<EventEnvelope>,
}

struct SessionLog {
    /// Sequence of the oldest retained event.
    base_seq: u64,
    /// Sequence the next published event will get.
    next_seq: u64,
    backlog: VecDeque<EventEnvelope>,
    subscribers: Vec<Subscriber>,
    next_subscriber_id: u64,
    closed: bool,
}

impl SessionLog {
    fn new() -> Self {
        Self {
            base_seq: 0,
            next_seq: 0,
            backlog: VecDeque::new(),
            subscribers: Vec::new(),
            next_subscriber_id: 0,
            closed: false,
        }
    }
}

/// Distributes each session's ordered events to its subscribers.
pub struct StreamMultiplexer {
    backlog_capacity: usize,
    subscriber_buffer: usize,
    sessions: DashMap<String, Mutex<SessionLog>>,
}

impl StreamMultiplexer {
    /// Create a multiplexer with the given per-session backlog bound and
    /// per-subscriber buffer size.
    pub fn new(backlog_capacity: usize, subscriber_buffer: usize) -> Self {
        Self {
            backlog_capacity,
            subscriber_buffer,
            sessions: DashMap::new(),
        }
    }

    /// Open a fresh event log for a session. Idempotent.
    pub fn open_session(&self, session_id: &str) {
        let _ = self
            .sessions
            .entry(session_id.to_owned())
            .or_insert_with(|| Mutex::new(SessionLog::new()));
    }

    /// Append an event to a session's log and fan it out, returning the
    /// assigned sequence number.
    ///
    /// Subscribers that cannot keep pace are disconnected here; that is
    /// never an error for the producer. A terminal event closes the
    /// session's stream after the fan-out.
    pub fn publish(&self, session_id: &str, event: WorkflowEvent) -> u64 {
        let entry = self
            .sessions
            .entry(session_id.to_owned())
            .or_insert_with(|| Mutex::new(SessionLog::new()));
        let mut log = entry.lock();

        let seq = log.next_seq;
        log.next_seq += 1;
        let terminal = event.is_terminal();
        let envelope = EventEnvelope::new(session_id, seq, event);

        log.backlog.push_back(envelope.clone());
        while log.backlog.len() > self.backlog_capacity {
            let _ = log.backlog.pop_front();
            log.base_seq += 1;
        }

        log.subscribers.retain(|sub| {
            match sub.tx.try_send(envelope.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        session_id,
                        subscriber = sub.id,
                        "subscriber fell behind, disconnecting"
                    );
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });

        if terminal {
            debug!(session_id, seq, "terminal event, closing subscriptions");
            log.closed = true;
            // Dropping the senders ends each live stream after the
            // already-buffered events are drained.
            log.subscribers.clear();
        }
        seq
    }

    /// Attach a subscriber starting at `from_seq`.
    ///
    /// Buffered events with `seq >= from_seq` are replayed first, then
    /// live events follow with no gap or duplicate (registration and the
    /// replay snapshot happen under one lock).
    pub fn subscribe(&self, session_id: &str, from_seq: u64) -> Result<EventStream, SubscribeError> {
        let entry = self
            .sessions
            .get(session_id)
            .ok_or_else(|| SubscribeError::UnknownSession(session_id.to_owned()))?;
        let mut log = entry.lock();

        if from_seq < log.base_seq {
            return Err(SubscribeError::BacklogUnavailable {
                requested: from_seq,
                oldest: log.base_seq,
            });
        }

        let replay: Vec<EventEnvelope> = log
            .backlog
            .iter()
            .filter(|e| e.seq >= from_seq)
            .cloned()
            .collect();

        let (tx, rx) = mpsc::channel(self.subscriber_buffer);
        if !log.closed {
            let id = log.next_subscriber_id;
            log.next_subscriber_id += 1;
            log.subscribers.push(Subscriber { id, tx });
        }
        // For a closed session the sender is dropped immediately and the
        // stream ends right after the replay.
        Ok(Box::pin(stream::iter(replay).chain(ReceiverStream::new(rx))))
    }

    /// Number of live subscribers for a session (0 for unknown sessions).
    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.sessions
            .get(session_id)
            .map_or(0, |entry| entry.lock().subscribers.len())
    }

    /// Drop a session's log entirely. Embedders may call this once a
    /// terminal session no longer needs replay.
    pub fn remove_session(&self, session_id: &str) {
        let _ = self.sessions.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use liaison_core::session::Stage;

    fn token(i: usize) -> WorkflowEvent {
        WorkflowEvent::Token {
            delta: format!("t{i}"),
        }
    }

    fn error_event() -> WorkflowEvent {
        WorkflowEvent::Error {
            category: "provider".into(),
            message: "provider failed".into(),
        }
    }

    #[tokio::test]
    async fn sequences_are_gapless_and_increasing() {
        let mux = StreamMultiplexer::new(64, 16);
        mux.open_session("sess_1");
        let mut events = mux.subscribe("sess_1", 0).unwrap();

        for i in 0..5 {
            let _ = mux.publish("sess_1", token(i));
        }
        let _ = mux.publish("sess_1", error_event());

        let mut seqs = Vec::new();
        while let Some(env) = events.next().await {
            seqs.push(env.seq);
        }
        assert_eq!(seqs, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn late_subscriber_replays_backlog_then_live() {
        let mux = StreamMultiplexer::new(64, 16);
        mux.open_session("sess_1");
        let _ = mux.publish("sess_1", token(0));
        let _ = mux.publish("sess_1", token(1));

        let mut events = mux.subscribe("sess_1", 0).unwrap();
        let _ = mux.publish("sess_1", token(2));
        let _ = mux.publish("sess_1", error_event());

        let mut seqs = Vec::new();
        while let Some(env) = events.next().await {
            seqs.push(env.seq);
        }
        assert_eq!(seqs, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn subscribe_from_mid_stream_skips_earlier_events() {
        let mux = StreamMultiplexer::new(64, 16);
        mux.open_session("sess_1");
        for i in 0..4 {
            let _ = mux.publish("sess_1", token(i));
        }
        let mut events = mux.subscribe("sess_1", 2).unwrap();
        let _ = mux.publish("sess_1", error_event());

        let mut seqs = Vec::new();
        while let Some(env) = events.next().await {
            seqs.push(env.seq);
        }
        assert_eq!(seqs, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn evicted_backlog_is_an_explicit_error() {
        let mux = StreamMultiplexer::new(2, 16);
        mux.open_session("sess_1");
        for i in 0..5 {
            let _ = mux.publish("sess_1", token(i));
        }
        // only seqs 3 and 4 are retained
        let err = mux.subscribe("sess_1", 0).err().expect("seq 0 was evicted");
        assert_matches!(
            err,
            SubscribeError::BacklogUnavailable {
                requested: 0,
                oldest: 3
            }
        );
        assert!(mux.subscribe("sess_1", 3).is_ok());
    }

    #[tokio::test]
    async fn unknown_session_is_an_error() {
        let mux = StreamMultiplexer::new(8, 8);
        let err = mux
            .subscribe("sess_missing", 0)
            .err()
            .expect("no log exists");
        assert_matches!(err, SubscribeError::UnknownSession(_));
    }

    #[tokio::test]
    async fn slow_subscriber_is_disconnected_producer_unaffected() {
        let mux = StreamMultiplexer::new(1024, 4);
        mux.open_session("sess_1");
        let mut events = mux.subscribe("sess_1", 0).unwrap();
        assert_eq!(mux.subscriber_count("sess_1"), 1);

        // Subscriber never reads: buffer (4) fills, fifth publish drops it.
        let mut last_seq = 0;
        for i in 0..10 {
            last_seq = mux.publish("sess_1", token(i));
        }
        assert_eq!(last_seq, 9, "producer kept assigning sequences");
        assert_eq!(mux.subscriber_count("sess_1"), 0);

        // The disconnected subscriber sees only what was buffered, then end.
        let mut received = 0;
        while let Some(_env) = events.next().await {
            received += 1;
        }
        assert_eq!(received, 4);
    }

    #[tokio::test]
    async fn terminal_event_closes_all_subscriptions_after_flush() {
        let mux = StreamMultiplexer::new(64, 16);
        mux.open_session("sess_1");
        let mut a = mux.subscribe("sess_1", 0).unwrap();
        let mut b = mux.subscribe("sess_1", 0).unwrap();

        let _ = mux.publish("sess_1", token(0));
        let _ = mux.publish(
            "sess_1",
            WorkflowEvent::StageComplete {
                stage: Stage::Translating,
            },
        );
        let _ = mux.publish("sess_1", error_event());

        for events in [&mut a, &mut b] {
            let mut count = 0;
            let mut terminal = 0;
            while let Some(env) = events.next().await {
                count += 1;
                if env.event.is_terminal() {
                    terminal += 1;
                }
            }
            assert_eq!(count, 3);
            assert_eq!(terminal, 1);
        }
        assert_eq!(mux.subscriber_count("sess_1"), 0);
    }

    #[tokio::test]
    async fn subscribing_to_closed_session_replays_then_ends() {
        let mux = StreamMultiplexer::new(64, 16);
        mux.open_session("sess_1");
        let _ = mux.publish("sess_1", token(0));
        let _ = mux.publish("sess_1", error_event());

        let mut events = mux.subscribe("sess_1", 0).unwrap();
        let mut seqs = Vec::new();
        while let Some(env) = events.next().await {
            seqs.push(env.seq);
        }
        assert_eq!(seqs, vec![0, 1]);
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let mux = StreamMultiplexer::new(64, 16);
        mux.open_session("sess_a");
        mux.open_session("sess_b");
        let mut a = mux.subscribe("sess_a", 0).unwrap();

        let _ = mux.publish("sess_b", token(0));
        let _ = mux.publish("sess_a", error_event());

        let env = a.next().await.unwrap();
        assert_eq!(env.session_id, "sess_a");
        assert_eq!(env.seq, 0);
        assert!(a.next().await.is_none());
    }
}

//! Live fan-out of published facts to filtered subscribers.
//!
//! ```text
//! shard workers / news ──► Broadcaster::publish ──► per-connection bounded queue ──► SSE
//!                                │
//!                                └─► replay ring (resumption by sequence number)
//! ```
//!
//! Producers never block: a full connection queue moves that connection to
//! `Draining` and removes it from the fan-out set.

use crate::config::BroadcastConfig;
use crate::domain::{normalize_tag, TimeMs, TopicCategory};
use futures::Stream;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod filter;

pub use filter::{BroadcastError, Envelope, LiveUpdate, NewsItem, SubscriptionFilter, UpdateType};

/// Lifecycle of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Streaming,
    Idle,
    Draining,
    Closed,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Streaming,
            2 => ConnectionState::Idle,
            3 => ConnectionState::Draining,
            _ => ConnectionState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Connecting => 0,
            ConnectionState::Streaming => 1,
            ConnectionState::Idle => 2,
            ConnectionState::Draining => 3,
            ConnectionState::Closed => 4,
        }
    }
}

/// Shared, lock-free connection state. `Closed` is terminal and `Draining`
/// only moves to `Closed`.
#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(ConnectionState::Connecting.as_u8()))
    }

    fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn transition(&self, to: ConnectionState) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                match (ConnectionState::from_u8(current), to) {
                    (ConnectionState::Closed, _) => None,
                    (ConnectionState::Draining, ConnectionState::Closed) => Some(to.as_u8()),
                    (ConnectionState::Draining, _) => None,
                    _ => Some(to.as_u8()),
                }
            });
    }
}

/// Signalled when a resuming client asked for facts no longer retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Gap {
    pub requested_after: u64,
    pub resumed_from: u64,
}

/// Items yielded by a subscription stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Update(Arc<Envelope>),
    Heartbeat { timestamp: TimeMs },
    Gap(Gap),
    /// Connection was closed by the server after draining its queue.
    Closed { reason: String },
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    forced_disconnects: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastStats {
    pub published: u64,
    pub delivered: u64,
    pub forced_disconnects: u64,
    pub active_connections: usize,
}

struct Slot {
    filter: SubscriptionFilter,
    tx: mpsc::Sender<Arc<Envelope>>,
    state: Arc<StateCell>,
}

#[derive(Default)]
struct Hub {
    last_seq: u64,
    retained: VecDeque<Arc<Envelope>>,
    connections: HashMap<Uuid, Slot>,
}

pub struct Broadcaster {
    config: BroadcastConfig,
    hub: Mutex<Hub>,
    counters: Counters,
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Broadcaster {
    pub fn new(config: BroadcastConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            hub: Mutex::new(Hub::default()),
            counters: Counters::default(),
        })
    }

    /// Publish one fact to every matching connection. Never blocks.
    pub fn publish(
        &self,
        payload: LiveUpdate,
        timestamp: TimeMs,
        region: Option<&str>,
        category: Option<TopicCategory>,
    ) -> u64 {
        let region = Some(normalize_tag(region)).filter(|r| !r.is_empty());
        let mut hub = self.hub.lock();
        hub.last_seq += 1;
        let envelope = Arc::new(Envelope {
            seq: hub.last_seq,
            timestamp,
            update_type: payload.update_type(),
            region,
            category,
            payload,
        });

        if self.config.replay_capacity > 0 {
            if hub.retained.len() == self.config.replay_capacity {
                hub.retained.pop_front();
            }
            hub.retained.push_back(Arc::clone(&envelope));
        }

        let mut dropped = Vec::new();
        for (id, slot) in &hub.connections {
            if !slot.filter.matches(&envelope) {
                continue;
            }
            match slot.tx.try_send(Arc::clone(&envelope)) {
                Ok(()) => {
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => dropped.push((*id, true)),
                Err(TrySendError::Closed(_)) => dropped.push((*id, false)),
            }
        }
        for (id, overflowed) in dropped {
            if let Some(slot) = hub.connections.remove(&id) {
                if overflowed {
                    slot.state.transition(ConnectionState::Draining);
                    self.counters
                        .forced_disconnects
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(
                        connection_id = %id,
                        buffer_depth = self.config.buffer_depth,
                        "Subscriber queue full, disconnecting"
                    );
                } else {
                    slot.state.transition(ConnectionState::Closed);
                }
            }
        }

        self.counters.published.fetch_add(1, Ordering::Relaxed);
        envelope.seq
    }

    /// Register a connection. With `last_seq`, retained newer facts are
    /// replayed; if some were already evicted the subscription carries a gap
    /// and resumes from now.
    pub fn connect(
        self: &Arc<Self>,
        filter: SubscriptionFilter,
        last_seq: Option<u64>,
    ) -> Subscription {
        let id = Uuid::new_v4();
        let depth = self.config.buffer_depth.max(1);
        let (tx, rx) = mpsc::channel(depth);
        let state = Arc::new(StateCell::new());

        let mut hub = self.hub.lock();
        let mut gap = None;
        if let Some(last) = last_seq.filter(|l| *l < hub.last_seq) {
            let oldest = hub.retained.front().map_or(hub.last_seq + 1, |e| e.seq);
            let missed: Vec<Arc<Envelope>> = hub
                .retained
                .iter()
                .filter(|e| e.seq > last && filter.matches(e))
                .cloned()
                .collect();
            if last + 1 < oldest || missed.len() > depth {
                gap = Some(Gap {
                    requested_after: last,
                    resumed_from: hub.last_seq,
                });
            } else {
                for envelope in missed {
                    // Capacity checked above.
                    let _ = tx.try_send(envelope);
                }
            }
        }
        hub.connections.insert(
            id,
            Slot {
                filter: filter.clone(),
                tx,
                state: Arc::clone(&state),
            },
        );
        let active = hub.connections.len();
        drop(hub);

        state.transition(ConnectionState::Streaming);
        info!(connection_id = %id, active, resumed = last_seq.is_some(), gap = gap.is_some(), "Subscriber connected");

        Subscription {
            id,
            rx,
            gap,
            state,
            broadcaster: Arc::clone(self),
        }
    }

    fn disconnect(&self, id: Uuid) {
        if self.hub.lock().connections.remove(&id).is_some() {
            debug!(connection_id = %id, "Subscriber disconnected");
        }
    }

    /// Highest sequence number published so far.
    pub fn last_seq(&self) -> u64 {
        self.hub.lock().last_seq
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            forced_disconnects: self.counters.forced_disconnects.load(Ordering::Relaxed),
            active_connections: self.hub.lock().connections.len(),
        }
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        self.config.heartbeat_interval
    }
}

/// Receiving half of one connection. Dropping it disconnects.
pub struct Subscription {
    id: Uuid,
    rx: mpsc::Receiver<Arc<Envelope>>,
    gap: Option<Gap>,
    state: Arc<StateCell>,
    broadcaster: Arc<Broadcaster>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn gap(&self) -> Option<Gap> {
        self.gap
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Next queued fact; None once the server has closed the connection and
    /// the queue is drained.
    pub async fn recv(&mut self) -> Option<Arc<Envelope>> {
        let next = self.rx.recv().await;
        match next {
            Some(_) => self.state.transition(ConnectionState::Streaming),
            None => self.state.transition(ConnectionState::Closed),
        }
        next
    }

    /// Stream of facts interleaved with heartbeats, led by the gap signal if any.
    pub fn into_stream(self) -> impl Stream<Item = StreamMessage> + Send {
        let period = self.broadcaster.heartbeat_interval();
        let ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        let pending_gap = self.gap;
        let state = StreamState {
            sub: self,
            ticker,
            pending_gap,
            delivered_since_tick: false,
            finished: false,
        };

        futures::stream::unfold(state, |mut st| async move {
            if st.finished {
                return None;
            }
            if let Some(gap) = st.pending_gap.take() {
                return Some((StreamMessage::Gap(gap), st));
            }

            let next = tokio::select! {
                msg = st.sub.rx.recv() => Next::Message(msg),
                _ = st.ticker.tick() => Next::Tick,
            };
            match next {
                Next::Message(Some(envelope)) => {
                    st.sub.state.transition(ConnectionState::Streaming);
                    st.delivered_since_tick = true;
                    Some((StreamMessage::Update(envelope), st))
                }
                Next::Message(None) => {
                    st.sub.state.transition(ConnectionState::Closed);
                    st.finished = true;
                    let reason = "subscriber queue overflowed".to_string();
                    Some((StreamMessage::Closed { reason }, st))
                }
                Next::Tick => {
                    if !st.delivered_since_tick {
                        st.sub.state.transition(ConnectionState::Idle);
                    }
                    st.delivered_since_tick = false;
                    Some((
                        StreamMessage::Heartbeat {
                            timestamp: TimeMs::now(),
                        },
                        st,
                    ))
                }
            }
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.state.transition(ConnectionState::Closed);
        self.broadcaster.disconnect(self.id);
    }
}

struct StreamState {
    sub: Subscription,
    ticker: tokio::time::Interval,
    pending_gap: Option<Gap>,
    delivered_since_tick: bool,
    finished: bool,
}

enum Next {
    Message(Option<Arc<Envelope>>),
    Tick,
}

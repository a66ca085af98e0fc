//! Connection registry: the single owner of all subscription state.
//!
//! One mutex guards both maps (topic to subscribers, topic to worker)
//! together. Serializing subscribe, unsubscribe, and worker start/stop
//! through that one guard is what makes the single-worker-per-topic
//! invariant structural: two concurrent subscribes cannot both decide
//! "I'm first" and spawn twice, and a subscribe racing a teardown cannot
//! observe a half-dead worker, because `unsubscribe` awaits worker exit
//! while still holding the guard.
//!
//! The guard covers membership only, never the act of sending bytes:
//! `broadcast` snapshots the subscriber list under the guard and performs
//! the sends outside it, so one slow client cannot stall subscription
//! traffic for every topic.

use crate::directory::TopicDirectory;
use crate::source::PriceSource;
use crate::worker::{PollSchedule, WorkerHandle};
use crate::{GatewayError, Result};
use metrics::{counter, gauge};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};
use types::{Principal, PriceUpdate, StreamFrame, TopicId};
use uuid::Uuid;

/// Unique connection identifier.
pub type ConnectionId = Uuid;

/// One live client connection, owned by the registry while subscribed.
/// Frames flow through an unbounded channel; the gateway task on the other
/// end writes them to the socket.
pub struct ConnectionHandle {
    pub(crate) id: ConnectionId,
    pub(crate) principal: Principal,
    pub(crate) sender: mpsc::UnboundedSender<StreamFrame>,
}

impl ConnectionHandle {
    pub fn new(principal: Principal, sender: mpsc::UnboundedSender<StreamFrame>) -> Self {
        Self {
            id: Uuid::new_v4(),
            principal,
            sender,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

struct TopicEntry {
    subscribers: HashMap<ConnectionId, ConnectionHandle>,
    worker: WorkerHandle,
    /// Most recent broadcast payload, served to joining subscribers as
    /// their immediate current-state frame.
    last_update: Option<PriceUpdate>,
}

#[derive(Default)]
struct RegistryInner {
    topics: HashMap<TopicId, TopicEntry>,
    total_connections: usize,
}

pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
    directory: Arc<dyn TopicDirectory>,
    source: Arc<PriceSource>,
    schedule: PollSchedule,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(
        directory: Arc<dyn TopicDirectory>,
        source: Arc<PriceSource>,
        schedule: PollSchedule,
        max_connections: usize,
    ) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            directory,
            source,
            schedule,
            max_connections,
        }
    }

    /// Add `connection` to `topic`'s subscriber set. The caller has already
    /// authenticated and authorized it; this does not re-check.
    ///
    /// The 0→1 transition spawns the topic's worker before returning, under
    /// the guard. Subscribing the same connection id twice is a no-op (and
    /// never spawns a duplicate worker).
    ///
    /// Returns the topic's most recent payload so the caller can emit the
    /// immediate current-state frame without waiting for the next tick.
    pub async fn subscribe(
        self: &Arc<Self>,
        topic: TopicId,
        connection: ConnectionHandle,
    ) -> Result<Option<PriceUpdate>> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        if inner.total_connections >= self.max_connections {
            return Err(GatewayError::AtCapacity {
                max: self.max_connections,
            });
        }

        let connection_id = connection.id;
        let user_id = connection.principal.user_id;
        let last = match inner.topics.entry(topic) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.subscribers.insert(connection_id, connection).is_none() {
                    inner.total_connections += 1;
                }
                entry.last_update.clone()
            }
            Entry::Vacant(vacant) => {
                // First subscriber: bring up the topic's one worker.
                let worker = WorkerHandle::spawn(
                    topic,
                    Arc::clone(self),
                    self.directory.clone(),
                    self.source.clone(),
                    self.schedule.clone(),
                );
                let mut subscribers = HashMap::new();
                subscribers.insert(connection_id, connection);
                vacant.insert(TopicEntry {
                    subscribers,
                    worker,
                    last_update: None,
                });
                inner.total_connections += 1;
                info!(topic = %topic, "first subscriber; topic worker spawned");
                None
            }
        };

        gauge!("gateway_active_connections").set(inner.total_connections as f64);
        gauge!("gateway_active_topics").set(inner.topics.len() as f64);
        debug!(topic = %topic, connection = %connection_id, user = user_id, "subscribed");
        Ok(last)
    }

    /// Remove `connection_id` from `topic`. Safe to call for connections
    /// that were never registered (or already dropped by a failed send).
    ///
    /// The 1→0 transition cancels the topic's worker and awaits its exit
    /// before returning, still under the guard, so an immediately following
    /// subscribe is guaranteed to observe "no worker" and start a fresh
    /// one.
    pub async fn unsubscribe(&self, topic: TopicId, connection_id: ConnectionId) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let Some(entry) = inner.topics.get_mut(&topic) else {
            return;
        };
        if entry.subscribers.remove(&connection_id).is_some() {
            inner.total_connections -= 1;
            debug!(topic = %topic, connection = %connection_id, "unsubscribed");
        }

        if entry.subscribers.is_empty() {
            if let Some(entry) = inner.topics.remove(&topic) {
                entry.worker.stop().await;
                info!(topic = %topic, "last subscriber gone; topic worker stopped");
            }
        }

        gauge!("gateway_active_connections").set(inner.total_connections as f64);
        gauge!("gateway_active_topics").set(inner.topics.len() as f64);
    }

    /// Fan one payload out to every current subscriber of `topic`.
    ///
    /// Called by the topic's own worker once per cycle. Sends happen
    /// outside the guard against a snapshot of the subscriber set. A
    /// failed send drops that connection from membership (its gateway
    /// task is already gone and will drive the usual unsubscribe path for
    /// worker teardown); the remaining sends proceed.
    pub async fn broadcast(&self, topic: TopicId, update: PriceUpdate) {
        let targets: Vec<(ConnectionId, mpsc::UnboundedSender<StreamFrame>)> = {
            let mut guard = self.inner.lock().await;
            let Some(entry) = guard.topics.get_mut(&topic) else {
                return;
            };
            entry.last_update = Some(update.clone());
            entry
                .subscribers
                .values()
                .map(|c| (c.id, c.sender.clone()))
                .collect()
        };

        let frame = StreamFrame::PriceUpdate(update);
        let mut dead = Vec::new();
        for (id, sender) in &targets {
            if sender.send(frame.clone()).is_err() {
                dead.push(*id);
            }
        }
        counter!("gateway_broadcast_frames_total").increment(targets.len() as u64);

        if !dead.is_empty() {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            if let Some(entry) = inner.topics.get_mut(&topic) {
                for id in dead {
                    if entry.subscribers.remove(&id).is_some() {
                        inner.total_connections -= 1;
                        debug!(topic = %topic, connection = %id, "dropped dead connection");
                    }
                }
            }
            gauge!("gateway_active_connections").set(inner.total_connections as f64);
        }
    }

    /// Live connections across all topics.
    pub async fn connection_count(&self) -> usize {
        self.inner.lock().await.total_connections
    }

    /// Topics with at least one subscriber (each has exactly one worker).
    pub async fn topic_count(&self) -> usize {
        self.inner.lock().await.topics.len()
    }
}

//! Connection hub: the single owner of "who is connected".
//!
//! All registry mutation happens on one task ([`HubLoop::run`]) fed by one ordered command queue.
//! Producers and sessions only hold a [`Hub`] handle and enqueue commands; the loop never waits on
//! a session, since every mailbox send is non-blocking with eviction as the fallback.

mod event;
mod registry;
pub mod session;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::metrics::HubMetrics;
use registry::{Delivery, Registry, SessionEntry, Targets};

pub use event::Event;
pub use session::{SessionConfig, SessionEnd, SessionGuard, MIN_MAILBOX_CAPACITY};

/// One serialized outbound message, shared by every mailbox it is pushed to.
pub type Frame = Arc<str>;

/// Authenticated identity a session belongs to. Opaque to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        UserId(id.to_owned())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        UserId(id)
    }
}

impl From<uuid::Uuid> for UserId {
    fn from(id: uuid::Uuid) -> Self {
        UserId(id.to_string())
    }
}

/// Stable per-process session identifier, allocated in increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("hub is not running")]
    Closed,
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

enum Command {
    Register(SessionEntry),
    Unregister {
        user_id: UserId,
        session_id: SessionId,
    },
    Broadcast {
        targets: Targets,
        frame: Frame,
    },
    ActiveUsers(oneshot::Sender<Vec<UserId>>),
}

/// Cloneable handle to the hub loop.
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::UnboundedSender<Command>,
    next_session_id: Arc<AtomicU64>,
}

impl Hub {
    /// Creates a handle and the loop it feeds. The loop stops once every handle
    /// (including those held by session guards) is dropped.
    pub fn new(metrics: HubMetrics) -> (Hub, HubLoop) {
        // Unbounded: the hub never waits on producers, and `SessionGuard::drop` has to enqueue
        // its unregister synchronously. Per-session mailboxes are the bounded queues.
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Hub {
            tx,
            next_session_id: Arc::new(AtomicU64::new(1)),
        };
        let event_loop = HubLoop {
            rx,
            registry: Registry::new(),
            metrics,
        };
        (hub, event_loop)
    }

    /// Creates the hub and runs its loop on a new task.
    pub fn spawn(metrics: HubMetrics) -> (Hub, JoinHandle<()>) {
        let (hub, event_loop) = Hub::new(metrics);
        (hub, tokio::spawn(event_loop.run()))
    }

    /// Allocates a session for `user_id` with a mailbox of `capacity` frames (raised to
    /// [`MIN_MAILBOX_CAPACITY`]) and queues its registration. The guard unregisters the session
    /// when dropped; the receiver is the mailbox the session's writer drains.
    pub fn open_session(
        &self,
        user_id: UserId,
        capacity: usize,
    ) -> Result<(SessionGuard, mpsc::Receiver<Frame>), HubError> {
        let session_id = SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(capacity.max(MIN_MAILBOX_CAPACITY));
        self.send(Command::Register(SessionEntry {
            session_id,
            user_id: user_id.clone(),
            tx,
        }))?;
        Ok((SessionGuard::new(self.clone(), user_id, session_id), rx))
    }

    /// Sends `event` to every session of the listed users. Users without sessions are skipped.
    pub fn broadcast(&self, user_ids: &[UserId], event: &Event) -> Result<(), HubError> {
        if user_ids.is_empty() {
            return Ok(());
        }
        let frame = encode(event)?;
        self.send(Command::Broadcast {
            targets: Targets::Users(user_ids.to_vec()),
            frame,
        })
    }

    /// Sends `event` to every connected session.
    pub fn broadcast_to_all(&self, event: &Event) -> Result<(), HubError> {
        let frame = encode(event)?;
        self.send(Command::Broadcast {
            targets: Targets::All,
            frame,
        })
    }

    /// Snapshot of users with at least one session. Only consistent at the instant the loop
    /// produced it; meant for diagnostics.
    pub async fn active_user_ids(&self) -> Result<Vec<UserId>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ActiveUsers(reply))?;
        rx.await.map_err(|_| HubError::Closed)
    }

    pub(crate) fn unregister(
        &self,
        user_id: UserId,
        session_id: SessionId,
    ) -> Result<(), HubError> {
        self.send(Command::Unregister {
            user_id,
            session_id,
        })
    }

    fn send(&self, command: Command) -> Result<(), HubError> {
        self.tx.send(command).map_err(|_| HubError::Closed)
    }
}

fn encode(event: &Event) -> Result<Frame, HubError> {
    match serde_json::to_string(event) {
        Ok(json) => Ok(Frame::from(json)),
        Err(e) => {
            tracing::error!(
                kind = event.kind(),
                error = %e,
                "failed to encode event, broadcast dropped"
            );
            Err(HubError::Encode(e))
        }
    }
}

/// The hub's event loop. Sole owner of the registry.
pub struct HubLoop {
    rx: mpsc::UnboundedReceiver<Command>,
    registry: Registry,
    metrics: HubMetrics,
}

impl HubLoop {
    pub async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            self.handle(command);
        }
        tracing::debug!("hub loop stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register(entry) => self.register(entry),
            Command::Unregister {
                user_id,
                session_id,
            } => self.unregister(&user_id, session_id),
            Command::Broadcast { targets, frame } => {
                self.metrics.broadcasts.inc();
                let delivery = self.registry.deliver(&targets, &frame);
                tracing::trace!(
                    delivered = delivery.delivered,
                    evicted = delivery.evicted.len(),
                    "broadcast delivered"
                );
                self.settle(delivery);
            }
            Command::ActiveUsers(reply) => {
                let _ = reply.send(self.registry.active_user_ids());
            }
        }
        self.metrics
            .sessions
            .set(self.registry.session_count() as i64);
        self.metrics
            .online_users
            .set(self.registry.user_count() as i64);
    }

    fn register(&mut self, entry: SessionEntry) {
        let user_id = entry.user_id.clone();
        let session_id = entry.session_id;
        let came_online = self.registry.insert(entry);
        tracing::debug!(%user_id, %session_id, "session registered");

        let ack = Frame::from(format!("connected:{user_id}"));
        let acked = self.registry.send_to(&user_id, session_id, &ack);

        if came_online {
            tracing::debug!(%user_id, "user online");
            self.metrics
                .presence_transitions
                .with_label_values(&["online"])
                .inc();
            self.announce_presence();
        }
        self.settle(acked);
    }

    fn unregister(&mut self, user_id: &UserId, session_id: SessionId) {
        match self.registry.remove(user_id, session_id) {
            None => tracing::trace!(%user_id, %session_id, "unregister for unknown session"),
            Some(last) => {
                tracing::debug!(%user_id, %session_id, "session unregistered");
                if last {
                    tracing::debug!(%user_id, "user offline");
                    self.metrics
                        .presence_transitions
                        .with_label_values(&["offline"])
                        .inc();
                    self.announce_presence();
                }
            }
        }
    }

    /// Broadcasts the presence event to everyone currently connected.
    fn announce_presence(&mut self) {
        let Ok(frame) = encode(&Event::UserStatusChange) else {
            return;
        };
        let delivery = self.registry.deliver(&Targets::All, &frame);
        self.settle(delivery);
    }

    /// Accounts for evictions, announcing every user whose last session was evicted. Those
    /// announcements can evict further sessions; the worklist ends because each round removes
    /// at least one user.
    fn settle(&mut self, delivery: Delivery) {
        let mut pending = vec![delivery];
        while let Some(delivery) = pending.pop() {
            self.metrics.evictions.inc_by(delivery.evicted.len() as u64);
            for user_id in delivery.went_offline {
                tracing::debug!(%user_id, "user offline after eviction");
                self.metrics
                    .presence_transitions
                    .with_label_values(&["offline"])
                    .inc();
                let Ok(frame) = encode(&Event::UserStatusChange) else {
                    continue;
                };
                pending.push(self.registry.deliver(&Targets::All, &frame));
            }
        }
    }
}

//! One live connection. The writer loop is the only code that writes to the transport; the
//! reader loop only watches for liveness and peer close. Whichever ends first ends the session,
//! and dropping the [`SessionGuard`] tells the hub exactly once.

use std::fmt;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::{Frame, Hub, SessionId, UserId};

/// Smallest usable mailbox: a new session's acknowledgement and its own online presence event
/// are queued back to back before the writer can drain either.
pub const MIN_MAILBOX_CAPACITY: usize = 2;

/// Session tunables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Frames a mailbox holds before the session counts as unresponsive. At least
    /// [`MIN_MAILBOX_CAPACITY`].
    pub mailbox_capacity: usize,
    /// Idle time after which a ping is written.
    pub ping_period: Duration,
    /// Maximum silence from the peer before the session is dropped. Must exceed `ping_period`.
    pub pong_wait: Duration,
    /// Deadline for a single transport write.
    pub write_timeout: Duration,
    /// Largest inbound frame accepted from the peer.
    pub max_message_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            ping_period: Duration::from_secs(54),
            pong_wait: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            max_message_size: 512,
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The hub closed the mailbox (unregistered or evicted).
    MailboxClosed,
    WriteFailed,
    PingFailed,
    PeerClosed,
    ReadFailed,
    ReadTimeout,
}

impl SessionEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEnd::MailboxClosed => "mailbox_closed",
            SessionEnd::WriteFailed => "write_failed",
            SessionEnd::PingFailed => "ping_failed",
            SessionEnd::PeerClosed => "peer_closed",
            SessionEnd::ReadFailed => "read_failed",
            SessionEnd::ReadTimeout => "read_timeout",
        }
    }
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration token for one session. Unregisters on drop, on every exit path including
/// unwinding.
pub struct SessionGuard {
    hub: Hub,
    user_id: UserId,
    session_id: SessionId,
}

impl SessionGuard {
    pub(super) fn new(hub: Hub, user_id: UserId, session_id: SessionId) -> Self {
        Self {
            hub,
            user_id,
            session_id,
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self
            .hub
            .unregister(self.user_id.clone(), self.session_id)
            .is_err()
        {
            tracing::trace!(
                user_id = %self.user_id,
                session_id = %self.session_id,
                "hub gone before unregister"
            );
        }
    }
}

/// Drives a session over a split transport until either direction ends, then releases the
/// guard.
pub async fn run<S, R, E>(
    guard: SessionGuard,
    mut mailbox: mpsc::Receiver<Frame>,
    mut sink: S,
    mut stream: R,
    config: &SessionConfig,
) -> SessionEnd
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    tracing::debug!(user_id = %guard.user_id(), session_id = %guard.session_id(), "session open");

    let end = tokio::select! {
        end = write_loop(&mut sink, &mut mailbox, config) => end,
        end = read_loop(&mut stream, config) => end,
    };
    let _ = time::timeout(config.write_timeout, sink.close()).await;

    tracing::debug!(
        user_id = %guard.user_id(),
        session_id = %guard.session_id(),
        reason = %end,
        "session closed"
    );
    drop(guard);
    end
}

/// Drains the mailbox onto the transport. Frames already queued behind the one just received
/// are joined with newlines into the same text message. After `ping_period` without output a
/// ping is written.
pub async fn write_loop<S>(
    sink: &mut S,
    mailbox: &mut mpsc::Receiver<Frame>,
    config: &SessionConfig,
) -> SessionEnd
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let mut keepalive = time::interval_at(Instant::now() + config.ping_period, config.ping_period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = mailbox.recv() => {
                let Some(frame) = frame else {
                    let _ = send_within(sink, Message::Close(None), config.write_timeout).await;
                    return SessionEnd::MailboxClosed;
                };
                let text = coalesce(frame, mailbox);
                if !send_within(sink, Message::Text(text.into()), config.write_timeout).await {
                    return SessionEnd::WriteFailed;
                }
                keepalive.reset();
            }
            _ = keepalive.tick() => {
                let ping = Message::Ping(Default::default());
                if !send_within(sink, ping, config.write_timeout).await {
                    return SessionEnd::PingFailed;
                }
            }
        }
    }
}

/// Reads until the peer closes, errors, or stays silent for `pong_wait`. Inbound frames
/// (pongs included) only refresh the deadline.
pub async fn read_loop<R, E>(stream: &mut R, config: &SessionConfig) -> SessionEnd
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    loop {
        match time::timeout(config.pong_wait, stream.next()).await {
            Err(_) => return SessionEnd::ReadTimeout,
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => return SessionEnd::PeerClosed,
            Ok(Some(Err(e))) => {
                tracing::debug!(error = %e, "websocket read failed");
                return SessionEnd::ReadFailed;
            }
            Ok(Some(Ok(_))) => {}
        }
    }
}

fn coalesce(first: Frame, mailbox: &mut mpsc::Receiver<Frame>) -> String {
    let mut text = String::from(&*first);
    while let Ok(next) = mailbox.try_recv() {
        text.push('\n');
        text.push_str(&next);
    }
    text
}

async fn send_within<S>(sink: &mut S, message: Message, deadline: Duration) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    match time::timeout(deadline, sink.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "websocket write failed");
            false
        }
        Err(_) => {
            tracing::debug!("websocket write timed out");
            false
        }
    }
}

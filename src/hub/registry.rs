//! Session registry: maps user id to that user's live sessions and resolves broadcast targets.
//! Owned by the hub loop; nothing else reads or writes it.

use std::collections::{BTreeMap, HashMap, HashSet};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::{Frame, SessionId, UserId};

/// Hub-side half of a session. The registry holds the only mailbox sender, so dropping the
/// entry closes the mailbox and lets the session's writer drain and exit.
#[derive(Debug)]
pub(crate) struct SessionEntry {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub tx: mpsc::Sender<Frame>,
}

#[derive(Debug, Clone)]
pub(crate) enum Targets {
    Users(Vec<UserId>),
    All,
}

/// Outcome of one delivery pass.
#[derive(Debug, Default)]
pub(crate) struct Delivery {
    pub delivered: usize,
    pub evicted: Vec<(UserId, SessionId)>,
    /// Users whose last session was evicted during this pass.
    pub went_offline: Vec<UserId>,
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    /// uid -> sessions. Session ids only grow, so each map iterates in registration order.
    /// A user with no sessions has no key.
    inner: HashMap<UserId, BTreeMap<SessionId, mpsc::Sender<Frame>>>,
    sessions: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session. Returns true when it is the user's first one.
    /// An id that is already registered is left untouched.
    pub fn insert(&mut self, entry: SessionEntry) -> bool {
        let sessions = self.inner.entry(entry.user_id).or_default();
        if sessions.contains_key(&entry.session_id) {
            return false;
        }
        let first = sessions.is_empty();
        sessions.insert(entry.session_id, entry.tx);
        self.sessions += 1;
        first
    }

    /// Removes one session by id. `None` if it is not registered (e.g. already evicted),
    /// otherwise whether that was the user's last session.
    pub fn remove(&mut self, user_id: &UserId, session_id: SessionId) -> Option<bool> {
        let sessions = self.inner.get_mut(user_id)?;
        sessions.remove(&session_id)?;
        self.sessions -= 1;
        let last = sessions.is_empty();
        if last {
            self.inner.remove(user_id);
        }
        Some(last)
    }

    /// Offers `frame` to every session of the resolved targets. Unknown users are skipped;
    /// a user listed twice is served once.
    pub fn deliver(&mut self, targets: &Targets, frame: &Frame) -> Delivery {
        let mut delivery = Delivery::default();
        match targets {
            Targets::All => {
                let user_ids: Vec<UserId> = self.inner.keys().cloned().collect();
                for user_id in &user_ids {
                    self.deliver_user(user_id, None, frame, &mut delivery);
                }
            }
            Targets::Users(user_ids) => {
                let mut seen = HashSet::with_capacity(user_ids.len());
                for user_id in user_ids {
                    if seen.insert(user_id) {
                        self.deliver_user(user_id, None, frame, &mut delivery);
                    }
                }
            }
        }
        delivery
    }

    /// Offers `frame` to a single session.
    pub fn send_to(&mut self, user_id: &UserId, session_id: SessionId, frame: &Frame) -> Delivery {
        let mut delivery = Delivery::default();
        self.deliver_user(user_id, Some(session_id), frame, &mut delivery);
        delivery
    }

    fn deliver_user(
        &mut self,
        user_id: &UserId,
        only: Option<SessionId>,
        frame: &Frame,
        delivery: &mut Delivery,
    ) {
        let Some(sessions) = self.inner.get_mut(user_id) else {
            return;
        };
        let before = sessions.len();
        sessions.retain(|&session_id, tx| {
            if only.is_some_and(|id| id != session_id) {
                return true;
            }
            if offer(user_id, session_id, tx, frame) {
                delivery.delivered += 1;
                true
            } else {
                delivery.evicted.push((user_id.clone(), session_id));
                false
            }
        });
        self.sessions -= before - sessions.len();
        if sessions.is_empty() {
            self.inner.remove(user_id);
            delivery.went_offline.push(user_id.clone());
        }
    }

    /// Users with at least one session, sorted.
    pub fn active_user_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.inner.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn session_count(&self) -> usize {
        self.sessions
    }

    pub fn user_count(&self) -> usize {
        self.inner.len()
    }

    #[cfg(test)]
    pub fn sessions_of(&self, user_id: &UserId) -> Vec<SessionId> {
        self.inner
            .get(user_id)
            .map(|sessions| sessions.keys().copied().collect())
            .unwrap_or_default()
    }
}

/// Non-blocking enqueue. False means the session must go: its mailbox is full (slow consumer)
/// or already closed (writer gone, unregister still in flight).
fn offer(user_id: &UserId, session_id: SessionId, tx: &mpsc::Sender<Frame>, frame: &Frame) -> bool {
    match tx.try_send(frame.clone()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            tracing::warn!(%user_id, %session_id, "mailbox full, evicting session");
            false
        }
        Err(TrySendError::Closed(_)) => {
            tracing::debug!(%user_id, %session_id, "mailbox closed, dropping session");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(user: &str, id: u64, capacity: usize) -> (SessionEntry, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            SessionEntry {
                session_id: SessionId(id),
                user_id: UserId::from(user),
                tx,
            },
            rx,
        )
    }

    fn frame(text: &str) -> Frame {
        Frame::from(text)
    }

    #[test]
    fn first_insert_reports_user_coming_online() {
        let mut registry = Registry::new();
        let (a, _rx_a) = entry("u1", 1, 4);
        let (b, _rx_b) = entry("u1", 2, 4);
        assert!(registry.insert(a));
        assert!(!registry.insert(b));
        assert_eq!(registry.session_count(), 2);
        assert_eq!(registry.user_count(), 1);
    }

    #[test]
    fn duplicate_session_id_is_not_tracked_twice() {
        let mut registry = Registry::new();
        let (a, _rx_a) = entry("u1", 7, 4);
        let (dup, _rx_dup) = entry("u1", 7, 4);
        registry.insert(a);
        assert!(!registry.insert(dup));
        assert_eq!(registry.session_count(), 1);
        assert_eq!(registry.sessions_of(&UserId::from("u1")), vec![SessionId(7)]);
    }

    #[test]
    fn remove_is_by_id_and_reports_last_session() {
        let mut registry = Registry::new();
        let user = UserId::from("u1");
        let (a, _rx_a) = entry("u1", 1, 4);
        let (b, _rx_b) = entry("u1", 2, 4);
        let (c, _rx_c) = entry("u1", 3, 4);
        registry.insert(a);
        registry.insert(b);
        registry.insert(c);

        assert_eq!(registry.remove(&user, SessionId(2)), Some(false));
        assert_eq!(registry.sessions_of(&user), vec![SessionId(1), SessionId(3)]);
        assert_eq!(registry.remove(&user, SessionId(2)), None);
        assert_eq!(registry.remove(&user, SessionId(1)), Some(false));
        assert_eq!(registry.remove(&user, SessionId(3)), Some(true));
        assert!(registry.active_user_ids().is_empty());
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn removing_closes_the_mailbox() {
        let mut registry = Registry::new();
        let (a, mut rx) = entry("u1", 1, 4);
        registry.insert(a);
        registry.send_to(&UserId::from("u1"), SessionId(1), &frame("hello"));
        registry.remove(&UserId::from("u1"), SessionId(1));

        assert_eq!(rx.try_recv().unwrap().as_ref(), "hello");
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn targeted_delivery_reaches_every_session_of_listed_users_only() {
        let mut registry = Registry::new();
        let (a1, mut rx_a1) = entry("a", 1, 4);
        let (a2, mut rx_a2) = entry("a", 2, 4);
        let (b, mut rx_b) = entry("b", 3, 4);
        registry.insert(a1);
        registry.insert(a2);
        registry.insert(b);

        let targets = Targets::Users(vec![
            UserId::from("a"),
            UserId::from("a"),
            UserId::from("ghost"),
        ]);
        let delivery = registry.deliver(&targets, &frame("x"));

        assert_eq!(delivery.delivered, 2);
        assert!(delivery.evicted.is_empty());
        assert_eq!(rx_a1.try_recv().unwrap().as_ref(), "x");
        assert_eq!(rx_a2.try_recv().unwrap().as_ref(), "x");
        assert!(rx_a1.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn unknown_user_is_a_silent_no_op() {
        let mut registry = Registry::new();
        let (a, _rx) = entry("a", 1, 4);
        registry.insert(a);

        let delivery = registry.deliver(&Targets::Users(vec![UserId::from("nobody")]), &frame("x"));
        assert_eq!(delivery.delivered, 0);
        assert!(delivery.evicted.is_empty());
        assert!(delivery.went_offline.is_empty());
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn full_mailbox_is_evicted_without_touching_others() {
        let mut registry = Registry::new();
        let (slow, mut rx_slow) = entry("slow", 1, 2);
        let (fast, mut rx_fast) = entry("fast", 2, 8);
        registry.insert(slow);
        registry.insert(fast);

        let mut evicted = Vec::new();
        let mut offline = Vec::new();
        for i in 0..5 {
            let delivery = registry.deliver(&Targets::All, &frame(&i.to_string()));
            evicted.extend(delivery.evicted);
            offline.extend(delivery.went_offline);
        }

        assert_eq!(evicted, vec![(UserId::from("slow"), SessionId(1))]);
        assert_eq!(offline, vec![UserId::from("slow")]);
        assert_eq!(registry.active_user_ids(), vec![UserId::from("fast")]);

        let mut slow_got = Vec::new();
        while let Ok(f) = rx_slow.try_recv() {
            slow_got.push(f.to_string());
        }
        assert_eq!(slow_got, vec!["0", "1"]);
        assert!(matches!(
            rx_slow.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        let mut fast_got = 0;
        while rx_fast.try_recv().is_ok() {
            fast_got += 1;
        }
        assert_eq!(fast_got, 5);
    }

    #[test]
    fn closed_mailbox_is_dropped_on_next_delivery() {
        let mut registry = Registry::new();
        let (a, rx) = entry("a", 1, 4);
        registry.insert(a);
        drop(rx);

        let delivery = registry.deliver(&Targets::All, &frame("x"));
        assert_eq!(delivery.evicted.len(), 1);
        assert_eq!(delivery.went_offline, vec![UserId::from("a")]);
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn session_count_tracks_inserts_minus_removals_and_evictions() {
        let mut registry = Registry::new();
        let mut receivers = HashMap::new();
        let mut expected = 0usize;
        let mut next_id = 0u64;

        // Deterministic interleaving over a handful of users.
        for step in 0..200u64 {
            let user = format!("u{}", step % 5);
            match step % 7 {
                0 | 1 | 2 | 3 => {
                    next_id += 1;
                    let (e, rx) = entry(&user, next_id, 1);
                    registry.insert(e);
                    receivers.insert(next_id, rx);
                    expected += 1;
                }
                4 | 5 => {
                    let user_id = UserId::from(user.as_str());
                    if let Some(&id) = registry.sessions_of(&user_id).first() {
                        assert!(registry.remove(&user_id, id).is_some());
                        receivers.remove(&id.0);
                        expected -= 1;
                    }
                }
                _ => {
                    // Capacity 1: anything holding an undrained frame gets evicted.
                    let delivery = registry.deliver(&Targets::All, &frame("tick"));
                    expected -= delivery.evicted.len();
                }
            }
            assert_eq!(registry.session_count(), expected);

            let total: usize = registry
                .active_user_ids()
                .iter()
                .map(|u| {
                    let ids = registry.sessions_of(u);
                    let unique: HashSet<_> = ids.iter().collect();
                    assert_eq!(unique.len(), ids.len());
                    ids.len()
                })
                .sum();
            assert_eq!(total, expected);
        }
    }
}

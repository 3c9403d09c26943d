//! Username registry and broadcast fan-out.
//!
//! The registry maps each authenticated username to the outbound queue of the
//! session that owns it. All mutation and all fan-out happen under one lock,
//! which gives two guarantees:
//!
//! - Uniqueness: check-and-insert is a single critical section, so two
//!   concurrent logins for the same name can never both succeed.
//! - Consistent order: frames are enqueued to every recipient while the lock
//!   is held, so any two sessions observe broadcasts in the same relative
//!   order.
//!
//! Delivery never blocks. Each session has a bounded queue drained by its own
//! writer task; a session whose queue is full is evicted (its username is
//! released, its connection is told to close, and its departure is announced)
//! rather than stalling the broadcaster.
//!
//! The lock is a `std::sync::Mutex` and is never held across an `.await`.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;
use chatline_core::SessionId;
use chatline_proto::{ChatMessage, FrameCodec};
use tokio::sync::{Notify, mpsc};

/// Outbound side of one connected session.
///
/// Cloned into the registry on login. The connection task keeps its own copy
/// for replies that are not broadcasts.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Connection that owns this handle
    pub session_id: SessionId,
    /// Bounded queue of encoded frames, drained by the writer task
    pub outbound: mpsc::Sender<Bytes>,
    /// Signalled when the registry evicts the session
    pub close: Arc<Notify>,
}

impl SessionHandle {
    /// Create a handle for `session_id`.
    pub fn new(session_id: SessionId, outbound: mpsc::Sender<Bytes>, close: Arc<Notify>) -> Self {
        Self { session_id, outbound, close }
    }
}

/// Result of [`SessionRegistry::try_register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Name claimed; acceptance queued and join announced
    Accepted,
    /// Another session already holds the name
    UsernameTaken,
    /// The session's own queue refused the acceptance. Nothing was registered
    /// and the session should be closed.
    QueueUnavailable,
}

/// Concurrent map from username to live session.
///
/// # Invariants
///
/// - At most one entry per username.
/// - Every entry belongs to a session that has been sent
///   `LoginStatus { accepted: true }`.
/// - No sender ever receives its own `Text` back.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `username` for the session behind `handle`.
    ///
    /// On success, in one critical section: the accepting `LoginStatus` is
    /// queued to the new session, the entry is inserted, and `Login` is
    /// broadcast to every other session. Any other outcome changes nothing.
    pub fn try_register(&self, username: &str, handle: SessionHandle) -> Registration {
        let mut sessions = self.lock();

        if sessions.contains_key(username) {
            tracing::debug!(username, session_id = handle.session_id, "username already taken");
            return Registration::UsernameTaken;
        }

        let session_id = handle.session_id;
        if let Err(e) = handle.outbound.try_send(FrameCodec::encode(&ChatMessage::accepted())) {
            // Never observed the acceptance, so nobody hears about the join
            tracing::warn!(username, session_id, "failed to queue login status: {}", e);
            return Registration::QueueUnavailable;
        }

        sessions.insert(username.to_string(), handle);
        tracing::info!(username, session_id, "user logged in");
        fan_out(&mut sessions, &ChatMessage::login(username), Some(session_id));
        Registration::Accepted
    }

    /// Release `username` if it is still held by `session_id`, then broadcast
    /// `Logout` to everyone remaining.
    ///
    /// Idempotent. A stale session (evicted, or replaced after it left) can
    /// never remove a newer owner of the same name. Returns whether an entry
    /// was removed.
    pub fn deregister(&self, username: &str, session_id: SessionId) -> bool {
        let mut sessions = self.lock();

        match sessions.get(username) {
            Some(handle) if handle.session_id == session_id => {},
            _ => return false,
        }

        sessions.remove(username);
        tracing::info!(username, session_id, "user logged out");
        fan_out(&mut sessions, &ChatMessage::logout(username), None);
        true
    }

    /// Queue `message` to every registered session except `exclude`.
    pub fn broadcast(&self, message: &ChatMessage, exclude: Option<SessionId>) {
        let mut sessions = self.lock();
        fan_out(&mut sessions, message, exclude);
    }

    /// True if `username` is registered.
    pub fn contains(&self, username: &str) -> bool {
        self.lock().contains_key(username)
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if nobody is logged in.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of registered usernames, sorted.
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionHandle>> {
        // The map holds no invariant a panicking holder could have broken
        // halfway, so a poisoned lock is still usable
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Enqueue `message` to every session except `exclude`, evicting any session
/// whose queue is full or closed.
///
/// Each eviction announces a `Logout` for the evicted name, delivered after
/// the current frame and subject to the same rules, so an eviction cascade
/// still terminates (every round removes at least one entry or ends).
fn fan_out(
    sessions: &mut HashMap<String, SessionHandle>,
    message: &ChatMessage,
    exclude: Option<SessionId>,
) {
    let mut pending = VecDeque::from([(FrameCodec::encode(message), exclude)]);

    while let Some((frame, exclude)) = pending.pop_front() {
        let mut evicted = Vec::new();

        for (username, handle) in sessions.iter() {
            if Some(handle.session_id) == exclude {
                continue;
            }

            if let Err(e) = handle.outbound.try_send(frame.clone()) {
                tracing::warn!(
                    username = username.as_str(),
                    session_id = handle.session_id,
                    "evicting session: {}",
                    e
                );
                evicted.push(username.clone());
            }
        }

        for username in evicted {
            if let Some(handle) = sessions.remove(&username) {
                handle.close.notify_one();
                pending.push_back((FrameCodec::encode(&ChatMessage::logout(username)), None));
            }
        }
    }
}

//! Per-session request bookkeeping.
//!
//! Each [`AgentLoop`](crate::AgentLoop) owns one tracker. It maps a session
//! id to the cancellation handle of the turn currently running in it, and
//! to the FIFO of prompts that arrived while that turn was busy.
//!
//! Lock order is always `active` before `queues`.

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use taskloom_core::AgentState;
use tokio_util::sync::CancellationToken;
use tracing::info;

struct ActiveRequest {
    token: CancellationToken,
    generation: u64,
}

/// Outcome of asking to start a turn.
#[derive(Debug)]
pub enum Admission {
    /// The session was idle; the turn owns `token` until it calls
    /// [`RequestTracker::finish`] with `generation`.
    Started {
        token: CancellationToken,
        generation: u64,
    },
    /// The session was busy; the prompt was queued.
    Queued,
}

#[derive(Default)]
pub struct RequestTracker {
    active: RwLock<HashMap<String, ActiveRequest>>,
    queues: RwLock<HashMap<String, VecDeque<String>>>,
    next_generation: AtomicU64,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new turn for `session_id`, or queue `content` if one is
    /// already running. Both happen under the same lock.
    pub fn try_begin_or_enqueue(
        &self,
        session_id: &str,
        parent: &CancellationToken,
        content: &str,
    ) -> Admission {
        let mut active = self.active.write();
        if active.contains_key(session_id) {
            self.queues
                .write()
                .entry(session_id.to_string())
                .or_default()
                .push_back(content.to_string());
            return Admission::Queued;
        }

        let token = parent.child_token();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        active.insert(
            session_id.to_string(),
            ActiveRequest {
                token: token.clone(),
                generation,
            },
        );
        Admission::Started { token, generation }
    }

    /// Drop the entry of a completed turn. A newer turn registered after a
    /// `cancel` keeps its entry. Returns whether anything was removed.
    pub fn finish(&self, session_id: &str, generation: u64) -> bool {
        let mut active = self.active.write();
        match active.get(session_id) {
            Some(entry) if entry.generation == generation => {
                active.remove(session_id);
                true
            }
            _ => false,
        }
    }

    /// Unregister a finished turn unless prompts arrived meanwhile. Those are
    /// taken instead and the turn stays registered, so a prompt queued while
    /// the turn wraps up is never left behind an idle session.
    pub fn finish_or_take_queued(&self, session_id: &str, generation: u64) -> Vec<String> {
        let mut active = self.active.write();
        match active.get(session_id) {
            Some(entry) if entry.generation == generation => {}
            _ => return Vec::new(),
        }
        let queued = self
            .queues
            .write()
            .remove(session_id)
            .map(Vec::from)
            .unwrap_or_default();
        if queued.is_empty() {
            active.remove(session_id);
        }
        queued
    }

    /// Cancel the session's running turn and forget its queued prompts.
    pub fn cancel(&self, session_id: &str) {
        let mut active = self.active.write();
        if let Some(entry) = active.remove(session_id) {
            info!(session_id, "Request cancellation initiated");
            entry.token.cancel();
        }
        self.clear_queue_locked(session_id);
    }

    pub fn clear_queue(&self, session_id: &str) {
        let _active = self.active.read();
        self.clear_queue_locked(session_id);
    }

    fn clear_queue_locked(&self, session_id: &str) {
        if let Some(queue) = self.queues.write().remove(session_id) {
            if !queue.is_empty() {
                info!(session_id, count = queue.len(), "Clearing queued prompts");
            }
        }
    }

    /// Take every queued prompt for the session, oldest first.
    pub fn drain(&self, session_id: &str) -> Vec<String> {
        self.queues
            .write()
            .remove(session_id)
            .map(Vec::from)
            .unwrap_or_default()
    }

    pub fn queued_prompts(&self, session_id: &str) -> usize {
        self.queues.read().get(session_id).map_or(0, VecDeque::len)
    }

    pub fn is_busy(&self) -> bool {
        !self.active.read().is_empty()
    }

    pub fn is_session_busy(&self, session_id: &str) -> bool {
        self.active.read().contains_key(session_id)
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.active.read().keys().cloned().collect()
    }

    pub fn state(&self) -> AgentState {
        if self.is_busy() {
            AgentState::Processing
        } else {
            AgentState::Idle
        }
    }
}

impl std::fmt::Debug for RequestTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestTracker")
            .field("active", &self.active.read().len())
            .field("queued_sessions", &self.queues.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(admission: Admission) -> (CancellationToken, u64) {
        match admission {
            Admission::Started { token, generation } => (token, generation),
            Admission::Queued => panic!("expected the turn to start"),
        }
    }

    #[test]
    fn second_request_is_queued() {
        let tracker = RequestTracker::new();
        let parent = CancellationToken::new();
        let _ = started(tracker.try_begin_or_enqueue("s1", &parent, "first"));
        assert!(matches!(
            tracker.try_begin_or_enqueue("s1", &parent, "second"),
            Admission::Queued
        ));
        assert!(matches!(
            tracker.try_begin_or_enqueue("s1", &parent, "third"),
            Admission::Queued
        ));
        assert_eq!(tracker.queued_prompts("s1"), 2);
        assert_eq!(tracker.drain("s1"), vec!["second", "third"]);
        assert_eq!(tracker.queued_prompts("s1"), 0);
    }

    #[test]
    fn sessions_are_independent() {
        let tracker = RequestTracker::new();
        let parent = CancellationToken::new();
        let _ = started(tracker.try_begin_or_enqueue("a", &parent, "x"));
        let _ = started(tracker.try_begin_or_enqueue("b", &parent, "y"));
        assert!(tracker.is_session_busy("a"));
        assert!(tracker.is_session_busy("b"));
        assert_eq!(tracker.state(), AgentState::Processing);
    }

    #[test]
    fn cancel_fires_token_and_clears_queue() {
        let tracker = RequestTracker::new();
        let parent = CancellationToken::new();
        let (token, _) = started(tracker.try_begin_or_enqueue("s1", &parent, "go"));
        tracker.try_begin_or_enqueue("s1", &parent, "later");

        tracker.cancel("s1");
        assert!(token.is_cancelled());
        assert!(!parent.is_cancelled());
        assert!(!tracker.is_session_busy("s1"));
        assert_eq!(tracker.queued_prompts("s1"), 0);
        assert_eq!(tracker.state(), AgentState::Idle);

        // No-op for unknown sessions
        tracker.cancel("nobody");
    }

    #[test]
    fn stale_finish_keeps_newer_turn() {
        let tracker = RequestTracker::new();
        let parent = CancellationToken::new();
        let (_, old) = started(tracker.try_begin_or_enqueue("s1", &parent, "one"));
        tracker.cancel("s1");
        let (_, new) = started(tracker.try_begin_or_enqueue("s1", &parent, "two"));
        assert_ne!(old, new);

        assert!(!tracker.finish("s1", old));
        assert!(tracker.is_session_busy("s1"));
        assert!(tracker.finish("s1", new));
        assert!(!tracker.is_busy());
    }

    #[test]
    fn finishing_takes_late_prompts_before_unregistering() {
        let tracker = RequestTracker::new();
        let parent = CancellationToken::new();
        let (_, generation) = started(tracker.try_begin_or_enqueue("s1", &parent, "go"));
        tracker.try_begin_or_enqueue("s1", &parent, "late");

        assert_eq!(tracker.finish_or_take_queued("s1", generation), vec!["late"]);
        assert!(tracker.is_session_busy("s1"));
        assert!(matches!(
            tracker.try_begin_or_enqueue("s1", &parent, "later"),
            Admission::Queued
        ));

        assert_eq!(tracker.finish_or_take_queued("s1", generation), vec!["later"]);
        assert!(tracker.finish_or_take_queued("s1", generation).is_empty());
        assert!(!tracker.is_session_busy("s1"));
        assert_eq!(tracker.queued_prompts("s1"), 0);

        // A stale generation neither takes prompts nor unregisters
        let (_, newer) = started(tracker.try_begin_or_enqueue("s1", &parent, "again"));
        tracker.try_begin_or_enqueue("s1", &parent, "waiting");
        assert!(tracker.finish_or_take_queued("s1", generation).is_empty());
        assert!(tracker.is_session_busy("s1"));
        assert_eq!(tracker.queued_prompts("s1"), 1);
        assert_eq!(tracker.finish_or_take_queued("s1", newer), vec!["waiting"]);
    }

    #[test]
    fn parent_cancellation_reaches_child() {
        let tracker = RequestTracker::new();
        let parent = CancellationToken::new();
        let (token, _) = started(tracker.try_begin_or_enqueue("s1", &parent, "go"));
        parent.cancel();
        assert!(token.is_cancelled());
    }
}

//! Repetition detection.
//!
//! Tracks, per session and scope, the last raw message and how many times in
//! a row it was sent. Matching is exact (after trimming); paraphrased
//! repetitions are not detected.

use tracing::warn;

use crate::{
    intent::IntentLabel,
    node::Node,
    state::{ConversationState, LoopEntry, TurnOutcome},
};

pub const REPHRASE_MESSAGE: &str = "It looks like we are going around in circles. Could you rephrase your request, or tell me which step you would like to do next (diagnose a plant, get treatment, insurance or find a vendor)?";

#[derive(Debug, Clone)]
pub struct LoopGuard {
    threshold: u32,
}

impl LoopGuard {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(2),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Record `message` under `scope` and report whether the loop was broken.
    ///
    /// When the threshold is reached the session is set to await input and
    /// the scope's tracker is cleared.
    pub fn check(&self, state: &mut ConversationState, scope: &str, message: &str) -> bool {
        let message = message.trim();
        let entry = state.loop_tracker.entry(scope.to_string()).or_default();

        if entry.last_message.as_deref() == Some(message) {
            entry.repeat_count += 1;
        } else {
            entry.last_message = Some(message.to_string());
            entry.repeat_count = 1;
        }

        if entry.repeat_count < self.threshold {
            return false;
        }

        warn!(
            session_id = %state.session_id,
            scope,
            repeats = entry.repeat_count,
            "Repeated message detected, asking user to rephrase"
        );
        *entry = LoopEntry::default();
        state.outcome = TurnOutcome::await_because("loop_detected");
        true
    }
}

/// Scope a message is tracked under.
///
/// Messages aimed at insurance share one scope whichever node the session is
/// in, so a request that keeps bouncing between intake and the insurance node
/// is still seen as the same loop.
pub fn scope_for(node: Node, intent: IntentLabel) -> &'static str {
    match intent {
        IntentLabel::Insurance => Node::Insurance.category(),
        _ => node.category(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn third_identical_message_breaks_the_loop() {
        let guard = LoopGuard::new(3);
        let mut state = ConversationState::new("s1");

        assert!(!guard.check(&mut state, "insurance", "Help me with insurance"));
        assert!(!guard.check(&mut state, "insurance", "Help me with insurance "));
        assert_eq!(state.loop_entry("insurance").unwrap().repeat_count, 2);

        assert!(guard.check(&mut state, "insurance", "Help me with insurance"));
        let entry = state.loop_entry("insurance").unwrap();
        assert_eq!(entry.repeat_count, 0);
        assert!(entry.last_message.is_none());
        assert!(state.requires_user_input());
    }

    #[test]
    fn a_different_message_restarts_the_count() {
        let guard = LoopGuard::new(3);
        let mut state = ConversationState::new("s1");

        guard.check(&mut state, "vendor", "find seeds");
        guard.check(&mut state, "vendor", "find seeds");
        assert!(!guard.check(&mut state, "vendor", "find fertilizer"));
        assert_eq!(state.loop_entry("vendor").unwrap().repeat_count, 1);
    }

    #[test]
    fn scopes_are_tracked_independently() {
        let guard = LoopGuard::new(3);
        let mut state = ConversationState::new("s1");

        guard.check(&mut state, "intake", "hello");
        guard.check(&mut state, "intake", "hello");
        assert!(!guard.check(&mut state, "vendor", "hello"));
        assert!(guard.check(&mut state, "intake", "hello"));
    }

    #[test]
    fn insurance_messages_share_a_scope() {
        assert_eq!(scope_for(Node::Initial, IntentLabel::Insurance), "insurance");
        assert_eq!(scope_for(Node::Insurance, IntentLabel::Insurance), "insurance");
        assert_eq!(scope_for(Node::Followup, IntentLabel::General), "intake");
        assert_eq!(scope_for(Node::ShowVendors, IntentLabel::Vendor), "vendor");
    }
}

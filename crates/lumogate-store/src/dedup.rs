use lumogate_core::types::Message;
use tracing::warn;

/// Continuation-validated positional dedup: compare `incoming`'s prefix
/// against `stored` by `semantic_id()` alone (never by content), and
/// return only the new tail.
///
/// A `tool` message whose `content` mutated under a stable
/// `tool_call_id` still matches position-by-position, since its
/// `semantic_id()` is the `tool_call_id`, not a content hash — so it is
/// never re-appended, only genuinely new messages are.
///
/// If `incoming` is shorter than `stored`, or any prefix position's
/// semantic id doesn't match what's stored there, the continuation is
/// invalid: this is logged and an empty tail is returned rather than
/// guessing which messages are new.
pub fn find_new_messages(incoming: &[Message], stored: &[Message]) -> Vec<Message> {
    if incoming.len() < stored.len() {
        warn!(
            incoming = incoming.len(),
            stored = stored.len(),
            "invalid continuation: incoming history shorter than stored"
        );
        return Vec::new();
    }

    for (i, stored_message) in stored.iter().enumerate() {
        if incoming[i].semantic_id() != stored_message.semantic_id() {
            warn!(position = i, "invalid continuation: semantic id mismatch against stored history");
            return Vec::new();
        }
    }

    incoming[stored.len()..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumogate_core::types::Role;

    #[test]
    fn no_stored_messages_returns_the_whole_incoming_list() {
        let incoming = vec![Message::text(Role::User, "hi")];
        assert_eq!(find_new_messages(&incoming, &[]).len(), 1);
    }

    #[test]
    fn matching_prefix_returns_only_the_new_tail() {
        let stored = vec![Message::text(Role::User, "hi")];
        let incoming = vec![stored[0].clone(), Message::text(Role::Assistant, "hello there")];
        let tail = find_new_messages(&incoming, &stored);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].semantic_id(), incoming[1].semantic_id());
    }

    #[test]
    fn exact_resend_with_no_new_messages_returns_empty() {
        let stored = vec![Message::text(Role::User, "hi")];
        let incoming = stored.clone();
        assert!(find_new_messages(&incoming, &stored).is_empty());
    }

    #[test]
    fn tool_result_mutation_under_same_id_is_deduplicated_not_appended() {
        let stored = vec![Message::tool_result("call_1", "42")];
        let incoming = vec![Message::tool_result("call_1", "43")];
        // Same semantic id (the tool_call_id) at the same position, so the
        // mutated-content message matches the stored prefix and is dropped
        // — the canonical fix for resent tool output whose content changed.
        assert!(find_new_messages(&incoming, &stored).is_empty());
    }

    #[test]
    fn tool_result_mutation_followed_by_a_genuinely_new_message_still_dedups_the_mutation() {
        let stored = vec![Message::tool_result("call_1", "42")];
        let incoming = vec![Message::tool_result("call_1", "43"), Message::text(Role::Assistant, "done")];
        let tail = find_new_messages(&incoming, &stored);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].semantic_id(), incoming[1].semantic_id());
    }

    #[test]
    fn shorter_incoming_than_stored_is_an_invalid_continuation() {
        let stored = vec![Message::text(Role::User, "one"), Message::text(Role::User, "two")];
        let incoming = vec![Message::text(Role::User, "one")];
        assert!(find_new_messages(&incoming, &stored).is_empty());
    }

    #[test]
    fn mismatched_prefix_with_no_shared_id_is_an_invalid_continuation() {
        let stored = vec![Message::text(Role::User, "hi")];
        let incoming = vec![Message::text(Role::User, "goodbye")];
        assert!(find_new_messages(&incoming, &stored).is_empty());
    }
}

//! Demonstration consumer: logs what it would do with each event.

use serde_json::{Value, json};
use tracing::info;

use livequeue_core::GiftInfo;
use livequeue_engine::{ActiveService, HandlerResult, HandlerSet, WILDCARD, streak_final_only};

/// Consumer id of the demonstration service.
pub const DEMO_CONSUMER: &str = "console";

pub fn demo_service() -> ActiveService {
    ActiveService::new(DEMO_CONSUMER, demo_handlers())
}

pub fn demo_handlers() -> HandlerSet {
    HandlerSet::new()
        .with_handler("gift", handle_gift)
        .with_handler("chat", handle_chat)
        .with_handler("follow", |payload: &Value| {
            info!(user = user_of(payload), "new follower");
            HandlerResult::Success
        })
        .with_handler("like", |payload: &Value| {
            let count = payload.get("likeCount").and_then(Value::as_u64).unwrap_or(1);
            info!(user = user_of(payload), count, "likes");
            HandlerResult::Success
        })
        .with_handler(WILDCARD, |_: &Value| {
            HandlerResult::Skip("no console action for this event type".to_string())
        })
        .with_admission(streak_final_only())
}

fn handle_gift(payload: &Value) -> HandlerResult {
    let gift = GiftInfo::from_payload(payload);
    let Some(name) = gift.name else {
        return HandlerResult::Failure("gift payload without giftName".to_string());
    };
    let repeat = payload.get("repeatCount").and_then(Value::as_u64).unwrap_or(1);
    info!(
        user = user_of(payload),
        gift = %name,
        repeat,
        diamonds = gift.cost.unwrap_or(0),
        "gift received"
    );
    HandlerResult::Success
}

fn handle_chat(payload: &Value) -> HandlerResult {
    match payload.get("comment").and_then(Value::as_str) {
        Some(comment) if !comment.trim().is_empty() => {
            info!(user = user_of(payload), comment, "chat");
            HandlerResult::Success
        }
        _ => HandlerResult::Skip("empty chat message".to_string()),
    }
}

fn user_of(payload: &Value) -> &str {
    payload
        .get("uniqueId")
        .and_then(Value::as_str)
        .unwrap_or("anonymous")
}

/// A small mixed burst of events for local runs.
pub fn demo_events(n: usize) -> Vec<(&'static str, Value)> {
    (0..n)
        .map(|i| match i % 5 {
            0 => (
                "gift",
                json!({"uniqueId": format!("viewer{i}"), "giftName": "Rose", "giftId": 5655,
                       "diamondCount": 1, "giftType": 1, "repeatCount": 3, "repeatEnd": true}),
            ),
            1 => ("chat", json!({"uniqueId": format!("viewer{i}"), "comment": "hello"})),
            2 => ("like", json!({"uniqueId": format!("viewer{i}"), "likeCount": 15})),
            3 => ("follow", json!({"uniqueId": format!("viewer{i}")})),
            _ => ("share", json!({"uniqueId": format!("viewer{i}")})),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(set: &HandlerSet, event_type: &str, payload: Value) -> HandlerResult {
        if let Some(admission) = set.admission() {
            if let Err(reason) = admission(event_type, &payload) {
                return HandlerResult::Skip(reason);
            }
        }
        let handler = set.handler_for(event_type).unwrap();
        handler(&payload)
    }

    #[test]
    fn gifts_need_a_name() {
        let set = demo_handlers();
        assert_eq!(
            run(&set, "gift", json!({"giftName": "Rose", "diamondCount": 1})),
            HandlerResult::Success
        );
        assert!(matches!(
            run(&set, "gift", json!({"diamondCount": 1})),
            HandlerResult::Failure(_)
        ));
    }

    #[test]
    fn streak_in_progress_is_skipped() {
        let set = demo_handlers();
        let payload = json!({"giftName": "Rose", "giftType": 1, "repeatEnd": false});
        assert!(matches!(run(&set, "gift", payload), HandlerResult::Skip(_)));
    }

    #[test]
    fn unknown_events_fall_through_to_the_wildcard() {
        let set = demo_handlers();
        assert!(matches!(run(&set, "viewerCount", json!({})), HandlerResult::Skip(_)));
        assert!(matches!(run(&set, "chat", json!({"comment": " "})), HandlerResult::Skip(_)));
    }

    #[test]
    fn demo_burst_cycles_event_types() {
        let events = demo_events(10);
        assert_eq!(events.len(), 10);
        assert_eq!(events[0].0, "gift");
        assert_eq!(events[4].0, "share");
        assert_eq!(events[5].0, "gift");
    }
}

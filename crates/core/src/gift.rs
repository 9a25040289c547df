//! Reading gift fields out of opaque event payloads.
//!
//! Payloads are passed to handlers verbatim; only the priority resolver and
//! the streak predicate look inside them. Both camelCase (as emitted by the
//! live-stream client) and snake_case keys are accepted.

use serde_json::Value;

/// Gift attributes relevant to priority resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GiftInfo {
    pub name: Option<String>,
    /// Normalized to a string whether the payload carries a number or a string.
    pub id: Option<String>,
    /// Cost in the platform's currency unit (diamonds).
    pub cost: Option<i64>,
}

impl GiftInfo {
    pub fn from_payload(payload: &Value) -> Self {
        let name = field(payload, "giftName", "gift_name")
            .and_then(Value::as_str)
            .map(str::to_string);

        let id = field(payload, "giftId", "gift_id").and_then(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        let cost = field(payload, "diamondCount", "diamond_count").and_then(|v| match v {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        });

        Self { name, id, cost }
    }
}

/// A gift that is part of a repeat streak which has not ended yet.
///
/// Streakable gifts (`giftType == 1`) emit one event per repeat; only the
/// event carrying `repeatEnd == true` holds the final count.
pub fn is_unfinished_streak(payload: &Value) -> bool {
    let streakable = field(payload, "giftType", "gift_type").and_then(Value::as_i64) == Some(1);
    let ended = field(payload, "repeatEnd", "repeat_end")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    streakable && !ended
}

fn field<'a>(payload: &'a Value, camel: &str, snake: &str) -> Option<&'a Value> {
    payload.get(camel).or_else(|| payload.get(snake))
}

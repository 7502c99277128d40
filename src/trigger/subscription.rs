//! Event subscription rule
//!
//! Pattern registered once on the event bus so state changes reach the
//! lifecycle endpoint.

use super::lifecycle::{EVENT_DETAIL_TYPE, EVENT_SOURCE, TRIGGERING_STATES};
use serde_json::{json, Value};

/// Rule pattern matching running/terminated instance notifications
pub fn event_rule_pattern() -> Value {
    json!({
        "source": [EVENT_SOURCE],
        "detail-type": [EVENT_DETAIL_TYPE],
        "detail": {
            "state": TRIGGERING_STATES,
        }
    })
}

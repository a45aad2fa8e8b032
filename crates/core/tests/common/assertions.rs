//! Custom assertion helpers for E2E tests.

use tk_protocol::ipc::{EventType, SseMessageRecord};
use tk_protocol::pipeline_models::PipelineState;
use tk_protocol::process_models::AgentState;

/// States announced by `state_update` events, in publication order.
pub fn published_states(records: &[SseMessageRecord]) -> Vec<PipelineState> {
    records
        .iter()
        .filter(|r| r.event_type == EventType::StateUpdate)
        .filter_map(|r| serde_json::from_value::<AgentState>(r.event_data.clone()).ok())
        .map(|s| s.current_state)
        .collect()
}

/// Assert that `expected` appears in `actual` in order, other entries allowed
/// in between.
pub fn assert_state_sequence(actual: &[PipelineState], expected: &[PipelineState]) {
    let mut remaining = actual.iter();
    for wanted in expected {
        assert!(
            remaining.any(|s| s == wanted),
            "Expected {wanted} in order within {actual:?}"
        );
    }
}

/// Assert that the history is a chain of non-decreasing progress until a
/// failure.
#[allow(dead_code)]
pub fn assert_progress_monotonic(history: &[AgentState]) {
    for pair in history.windows(2) {
        if pair[1].is_failed() {
            continue;
        }
        assert!(
            pair[1].progress >= pair[0].progress,
            "Progress went backwards: {} ({}) -> {} ({})",
            pair[0].current_state,
            pair[0].progress,
            pair[1].current_state,
            pair[1].progress
        );
    }
}

/// Assert that a string contains a substring (case-insensitive).
#[allow(dead_code)]
pub fn assert_contains_ci(haystack: &str, needle: &str) {
    let haystack_lower = haystack.to_lowercase();
    let needle_lower = needle.to_lowercase();
    assert!(
        haystack_lower.contains(&needle_lower),
        "Expected '{haystack}' to contain '{needle}' (case-insensitive)"
    );
}

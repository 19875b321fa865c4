//! Brain Unit accounting (spec.md §4.6 "Unit calculation", glossary).

use std::collections::HashMap;
use std::sync::OnceLock;

/// The closed fixed-cost table: `taskType -> units`. Tasks absent from this
/// table fall back to `ceil(totalTokens / 100)`.
fn unit_cost_table() -> &'static HashMap<&'static str, u64> {
    static TABLE: OnceLock<HashMap<&'static str, u64>> = OnceLock::new();
    TABLE.get_or_init(|| {
        HashMap::from([
            ("agency.scope", 50),
            ("agency.proposal", 100),
        ])
    })
}

/// Compute the Brain Units charged for a call.
///
/// `units = UNIT_COST[task_type]` when present; otherwise
/// `ceil((total_tokens ?? 1000) / 100)`, rounding up. `total_tokens = Some(0)`
/// for an unknown task type yields `0` units.
#[must_use]
pub fn calculate_units(task_type: &str, total_tokens: Option<u32>) -> u64 {
    if let Some(&fixed) = unit_cost_table().get(task_type) {
        return fixed;
    }
    let tokens = total_tokens.unwrap_or(1000) as u64;
    tokens.div_ceil(100)
}

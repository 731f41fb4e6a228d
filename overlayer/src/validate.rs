//! Frequency and bounds filtering for insertion decisions.
//!
//! Dropped decisions are logged, never raised. Inputs are not modified; every
//! function returns a fresh sequence.

use tracing::{debug, info, warn};

use crate::config::SpacingRule;
use crate::decision::{InsertionDecision, MIN_DURATION};

/// Apply the spacing rule, then the bounds rule.
pub fn validate(
    decisions: &[InsertionDecision],
    rule: &SpacingRule,
    total_duration: f64,
) -> Vec<InsertionDecision> {
    let spaced = enforce_spacing(decisions, rule);
    enforce_bounds(&spaced, total_duration)
}

/// Keep decisions at least `rule.min_gap()` seconds apart.
///
/// Greedy earliest-first: decisions are walked in timestamp order and a
/// decision is kept only if it is far enough from the last kept one. A later
/// decision with higher confidence inside the same window is still dropped.
pub fn enforce_spacing(
    decisions: &[InsertionDecision],
    rule: &SpacingRule,
) -> Vec<InsertionDecision> {
    let mut sorted: Vec<&InsertionDecision> = decisions.iter().collect();
    sorted.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

    let gap = rule.min_gap();
    let mut kept = Vec::with_capacity(sorted.len());
    let mut last_kept: Option<f64> = None;

    for decision in sorted {
        match last_kept {
            Some(last) if decision.timestamp - last < gap => {
                debug!(
                    timestamp = decision.timestamp,
                    since_last = format!("{:.1}", decision.timestamp - last),
                    min_gap = format!("{gap:.1}"),
                    "skipping insertion too close to previous one"
                );
            }
            _ => {
                last_kept = Some(decision.timestamp);
                kept.push(decision.clone());
            }
        }
    }

    let removed = decisions.len() - kept.len();
    if removed > 0 {
        info!(removed, "filtered insertions due to frequency constraints");
    }

    kept
}

/// Clamp decisions to `[0, total_duration]`.
///
/// Negative timestamps are dropped. A decision running past the end is
/// shortened to fit if at least [`MIN_DURATION`] seconds remain, otherwise
/// dropped.
pub fn enforce_bounds(
    decisions: &[InsertionDecision],
    total_duration: f64,
) -> Vec<InsertionDecision> {
    let mut kept = Vec::with_capacity(decisions.len());

    for decision in decisions {
        if decision.timestamp < 0.0 {
            warn!(
                timestamp = decision.timestamp,
                "skipping insertion with negative timestamp"
            );
            continue;
        }

        if decision.end() > total_duration {
            let remaining = total_duration - decision.timestamp;
            if remaining >= MIN_DURATION {
                info!(
                    timestamp = decision.timestamp,
                    duration = format!("{remaining:.1}"),
                    "shortened insertion to fit video bounds"
                );
                kept.push(InsertionDecision {
                    duration: remaining,
                    ..decision.clone()
                });
            } else {
                warn!(
                    timestamp = decision.timestamp,
                    "skipping insertion that exceeds video duration"
                );
            }
            continue;
        }

        kept.push(decision.clone());
    }

    kept
}

/// Drop decisions below `threshold` confidence.
pub fn filter_confidence(
    decisions: &[InsertionDecision],
    threshold: f64,
) -> Vec<InsertionDecision> {
    let kept: Vec<InsertionDecision> = decisions
        .iter()
        .filter(|d| d.confidence >= threshold)
        .cloned()
        .collect();

    let removed = decisions.len() - kept.len();
    if removed > 0 {
        info!(removed, threshold, "filtered insertions below confidence threshold");
    }
    kept
}

//! Escalation trigger evaluation over a work trace.
//!
//! Triggers are checked after every appended step against the whole updated
//! trace. Any that fire are recorded together as one escalation whose
//! `highestLevel` drives the recommendation returned to the agent.

use super::models::{EscalationTrigger, StepOutcome, WorkTrace};
use crate::constants;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Evaluate all step-time triggers. Returns the triggers that fired, empty
/// when the trace looks healthy.
pub fn evaluate_triggers(trace: &WorkTrace, now: DateTime<Utc>) -> Vec<EscalationTrigger> {
    let mut fired = Vec::new();

    if let Some(trigger) = stuck_loop(trace, now) {
        fired.push(trigger);
    }

    let failures = trace
        .steps
        .iter()
        .filter(|s| s.outcome == StepOutcome::Nothing)
        .count();
    if failures >= constants::REPEATED_FAILURES_THRESHOLD {
        fired.push(EscalationTrigger {
            trigger_type: "repeated_failures".to_string(),
            level: 1,
            reason: format!("{failures} steps came back with nothing"),
            detected_at: now,
        });
    }

    let errors = trace
        .steps
        .iter()
        .filter(|s| s.outcome == StepOutcome::Error)
        .count();
    if errors >= constants::ERROR_ACCUMULATION_THRESHOLD {
        fired.push(EscalationTrigger {
            trigger_type: "error_accumulation".to_string(),
            level: 2,
            reason: format!("{errors} steps ended in errors"),
            detected_at: now,
        });
    }

    let elapsed_ms = (now - trace.started_at).num_milliseconds();
    if elapsed_ms > constants::TRACE_TIME_EXCEEDED_MS {
        fired.push(EscalationTrigger {
            trigger_type: "time_exceeded".to_string(),
            level: 1,
            reason: format!("session open for {} minutes", elapsed_ms / 60_000),
            detected_at: now,
        });
    }

    if trace.steps.len() >= constants::LOW_EFFICIENCY_MIN_STEPS {
        let non_productive = trace.steps.iter().filter(|s| !s.is_productive()).count();
        let ratio = non_productive as f64 / trace.steps.len() as f64;
        if ratio > constants::LOW_EFFICIENCY_RATIO {
            fired.push(EscalationTrigger {
                trigger_type: "low_efficiency".to_string(),
                level: 1,
                reason: format!(
                    "{non_productive} of {} steps were non-productive",
                    trace.steps.len()
                ),
                detected_at: now,
            });
        }
    }

    fired
}

/// Same tool used in at least three of the last five steps, with none of
/// those uses producing more than a partial outcome.
fn stuck_loop(trace: &WorkTrace, now: DateTime<Utc>) -> Option<EscalationTrigger> {
    let window: Vec<_> = trace
        .steps
        .iter()
        .rev()
        .take(constants::STUCK_LOOP_WINDOW)
        .collect();
    if window.len() < constants::STUCK_LOOP_MIN_REPEATS {
        return None;
    }

    let mut by_tool: HashMap<&str, Vec<StepOutcome>> = HashMap::new();
    for step in &window {
        by_tool.entry(step.tool.as_str()).or_default().push(step.outcome);
    }

    for (tool, outcomes) in by_tool {
        if outcomes.len() >= constants::STUCK_LOOP_MIN_REPEATS
            && outcomes
                .iter()
                .all(|o| matches!(o, StepOutcome::Nothing | StepOutcome::Partial))
        {
            return Some(EscalationTrigger {
                trigger_type: "stuck_loop".to_string(),
                level: 2,
                reason: format!(
                    "{tool} used {} of the last {} steps without progress",
                    outcomes.len(),
                    window.len()
                ),
                detected_at: now,
            });
        }
    }
    None
}

/// Recommendation string surfaced alongside a recorded step.
pub fn recommendation_for(highest_level: u8) -> String {
    match highest_level {
        0 => "continue, no intervention needed".to_string(),
        1 => "consider pausing to reassess the approach".to_string(),
        2 => "pause and ask a peer for help before burning more time".to_string(),
        _ => "stop and escalate to a human".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::models::{StepInput, WorkStep};

    fn trace_with(steps: Vec<(&str, StepOutcome)>) -> WorkTrace {
        WorkTrace {
            session_id: "s1".to_string(),
            task: "t".to_string(),
            started_at: Utc::now(),
            completed_at: None,
            steps: steps
                .into_iter()
                .map(|(tool, outcome)| {
                    WorkStep::from_input(StepInput {
                        tool: tool.to_string(),
                        intent: "search".to_string(),
                        outcome,
                        duration_ms: 100,
                        contribution_type: None,
                        knowledge_gained: vec![],
                        eliminated_paths: vec![],
                        depends_on: vec![],
                    })
                })
                .collect(),
            summary: None,
        }
    }

    #[test]
    fn three_empty_grep_steps_fire_stuck_loop_and_repeated_failures() {
        let trace = trace_with(vec![
            ("grep", StepOutcome::Nothing),
            ("grep", StepOutcome::Nothing),
            ("grep", StepOutcome::Nothing),
        ]);
        let fired = evaluate_triggers(&trace, Utc::now());
        let types: Vec<_> = fired.iter().map(|t| t.trigger_type.as_str()).collect();
        assert!(types.contains(&"stuck_loop"));
        assert!(types.contains(&"repeated_failures"));

        let highest = fired.iter().map(|t| t.level).max().unwrap();
        assert_eq!(highest, 2);
        assert!(recommendation_for(highest).contains("pause"));
    }

    #[test]
    fn stuck_loop_needs_unproductive_outcomes() {
        let trace = trace_with(vec![
            ("grep", StepOutcome::Found),
            ("grep", StepOutcome::Found),
            ("grep", StepOutcome::Found),
        ]);
        let fired = evaluate_triggers(&trace, Utc::now());
        assert!(fired.iter().all(|t| t.trigger_type != "stuck_loop"));
    }

    #[test]
    fn two_errors_fire_error_accumulation() {
        let trace = trace_with(vec![
            ("build", StepOutcome::Error),
            ("build", StepOutcome::Error),
        ]);
        let fired = evaluate_triggers(&trace, Utc::now());
        assert!(fired.iter().any(|t| t.trigger_type == "error_accumulation" && t.level == 2));
    }

    #[test]
    fn time_exceeded_fires_after_ten_minutes() {
        let mut trace = trace_with(vec![("read", StepOutcome::Found)]);
        trace.started_at = Utc::now() - chrono::Duration::minutes(11);
        let fired = evaluate_triggers(&trace, Utc::now());
        assert!(fired.iter().any(|t| t.trigger_type == "time_exceeded"));
    }

    #[test]
    fn low_efficiency_fires_above_ratio() {
        let trace = trace_with(vec![
            ("a", StepOutcome::Nothing),
            ("b", StepOutcome::Error),
            ("c", StepOutcome::Nothing),
            ("d", StepOutcome::Error),
            ("e", StepOutcome::Found),
        ]);
        let fired = evaluate_triggers(&trace, Utc::now());
        assert!(fired.iter().any(|t| t.trigger_type == "low_efficiency"));
    }

    #[test]
    fn healthy_trace_fires_nothing() {
        let trace = trace_with(vec![
            ("read", StepOutcome::Found),
            ("edit", StepOutcome::Found),
        ]);
        assert!(evaluate_triggers(&trace, Utc::now()).is_empty());
        assert!(recommendation_for(0).contains("continue"));
    }
}

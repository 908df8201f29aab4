//! Flow classification and the per-agent dashboard aggregate.

use super::models::{Escalation, FlowState, ShadowMonitor, Soul, WorkTrace};
use super::soul::NextLevel;
use crate::constants;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Flow classification with the context callers route work on.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowReport {
    pub state: FlowState,
    /// Milliseconds spent in the current flow window, when `in_flow`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_duration_ms: Option<i64>,
    /// True when callers should avoid interrupting this agent.
    pub respect_flow: bool,
}

/// Classify productivity from open traces and unresolved escalations.
///
/// Stuck beats everything: an unresolved escalation means the agent needs
/// help regardless of recent output. Otherwise a burst of productive steps
/// in the last fifteen minutes reads as flow, a trace opened in the last
/// hour as available, and silence as offline.
pub fn flow_state(
    open_traces: &[WorkTrace],
    unresolved: &[Escalation],
    now: DateTime<Utc>,
) -> FlowReport {
    if !unresolved.is_empty() {
        return FlowReport {
            state: FlowState::Stuck,
            flow_duration_ms: None,
            respect_flow: false,
        };
    }

    let window_start = now - Duration::milliseconds(constants::FLOW_WINDOW_MS);
    let mut recent: Vec<_> = open_traces
        .iter()
        .flat_map(|t| t.steps.iter())
        .filter(|s| s.timestamp >= window_start)
        .collect();
    recent.sort_by_key(|s| s.timestamp);
    let inspected: Vec<_> = recent
        .iter()
        .rev()
        .take(constants::FLOW_RECENT_STEPS)
        .collect();

    let productive = inspected
        .iter()
        .filter(|s| s.outcome.is_productive())
        .count();
    if productive >= constants::FLOW_PRODUCTIVE_MIN {
        let earliest = inspected
            .iter()
            .map(|s| s.timestamp)
            .min()
            .unwrap_or(now);
        return FlowReport {
            state: FlowState::InFlow,
            flow_duration_ms: Some((now - earliest).num_milliseconds().max(0)),
            respect_flow: true,
        };
    }

    let available_start = now - Duration::milliseconds(constants::AVAILABLE_WINDOW_MS);
    if open_traces.iter().any(|t| t.started_at >= available_start) {
        return FlowReport {
            state: FlowState::Available,
            flow_duration_ms: None,
            respect_flow: false,
        };
    }

    FlowReport {
        state: FlowState::Offline,
        flow_duration_ms: None,
        respect_flow: false,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceDigest {
    pub session_id: String,
    pub task: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_steps: usize,
    pub efficiency: Option<f64>,
}

impl TraceDigest {
    fn from_trace(trace: &WorkTrace) -> Self {
        Self {
            session_id: trace.session_id.clone(),
            task: trace.task.clone(),
            started_at: trace.started_at,
            completed_at: trace.completed_at,
            total_steps: trace.steps.len(),
            efficiency: trace.summary.as_ref().map(|s| s.efficiency),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatHealth {
    pub is_healthy: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub stall_threshold_ms: i64,
}

/// Everything an agent (or its shadow) needs to decide what to do next.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub agent_id: String,
    pub soul: Option<Soul>,
    pub flow: FlowReport,
    pub recent_traces: Vec<TraceDigest>,
    pub pending_escalations: Vec<Escalation>,
    pub streak_at_risk: bool,
    pub next_level: Option<NextLevel>,
    pub shadow: ShadowMonitor,
    pub heartbeat: HeartbeatHealth,
    pub suggestions: Vec<String>,
}

/// Build the dashboard from already-loaded state. Pure so it can be tested
/// without storage.
#[allow(clippy::too_many_arguments)]
pub fn build_dashboard(
    agent_id: &str,
    soul: Option<Soul>,
    open_traces: &[WorkTrace],
    recent_traces: &[WorkTrace],
    unresolved: Vec<Escalation>,
    shadow: ShadowMonitor,
    last_completed_at: Option<DateTime<Utc>>,
    unread_messages: usize,
    now: DateTime<Utc>,
) -> Dashboard {
    let flow = flow_state(open_traces, &unresolved, now);

    // A live streak decays if a full day passes without a completed task
    let streak_at_risk = soul
        .as_ref()
        .map(|s| s.current_streak > 0)
        .unwrap_or(false)
        && last_completed_at
            .map(|at| (now - at) > Duration::hours(20))
            .unwrap_or(true);

    let next = soul.as_ref().and_then(super::soul::next_level);

    let mut suggestions = Vec::new();
    if !unresolved.is_empty() {
        suggestions.push(format!(
            "{} unresolved escalation(s) — resolve or ask for help",
            unresolved.len()
        ));
    }
    if unread_messages > 0 {
        suggestions.push(format!("{unread_messages} unread direct message(s)"));
    }
    if streak_at_risk {
        suggestions.push("streak at risk: complete a task today to keep it".to_string());
    }
    if let Some(next) = &next {
        if next.xp_needed > 0 && next.xp_needed <= 50 {
            suggestions.push(format!(
                "{} XP away from {} — one good task could do it",
                next.xp_needed, next.level
            ));
        }
    }
    if let Some(soul) = &soul {
        if soul.rust_level > 0.0 {
            suggestions.push(format!(
                "rust is at {:.1}: XP gains are decayed until you complete a trace",
                soul.rust_level
            ));
        }
    }
    if open_traces.is_empty() && suggestions.is_empty() {
        suggestions.push("no open work: check the coordinator for todo tasks".to_string());
    }
    suggestions.truncate(constants::DASHBOARD_SUGGESTION_CAP);

    let heartbeat = HeartbeatHealth {
        is_healthy: shadow.is_healthy(now),
        last_heartbeat: shadow.last_heartbeat,
        stall_threshold_ms: shadow.stall_threshold_ms,
    };

    Dashboard {
        agent_id: agent_id.to_string(),
        soul,
        flow,
        recent_traces: recent_traces.iter().map(TraceDigest::from_trace).collect(),
        pending_escalations: unresolved,
        streak_at_risk,
        next_level: next,
        shadow,
        heartbeat,
        suggestions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::models::{StepInput, StepOutcome, WorkStep};

    fn open_trace_with_steps(outcomes: &[StepOutcome], age_secs: i64) -> WorkTrace {
        let now = Utc::now();
        WorkTrace {
            session_id: "s1".to_string(),
            task: "t".to_string(),
            started_at: now - Duration::seconds(age_secs),
            completed_at: None,
            steps: outcomes
                .iter()
                .map(|&outcome| {
                    let mut step = WorkStep::from_input(StepInput {
                        tool: "read".to_string(),
                        intent: "i".to_string(),
                        outcome,
                        duration_ms: 10,
                        contribution_type: None,
                        knowledge_gained: vec![],
                        eliminated_paths: vec![],
                        depends_on: vec![],
                    });
                    step.timestamp = now - Duration::seconds(30);
                    step
                })
                .collect(),
            summary: None,
        }
    }

    #[test]
    fn unresolved_escalation_means_stuck() {
        let trace = open_trace_with_steps(&[StepOutcome::Found; 6], 60);
        let report = flow_state(&[trace], &[Escalation::new("s1", vec![])], Utc::now());
        assert_eq!(report.state, FlowState::Stuck);
        assert!(!report.respect_flow);
    }

    #[test]
    fn productive_burst_means_in_flow() {
        let trace = open_trace_with_steps(&[StepOutcome::Found; 6], 120);
        let report = flow_state(&[trace], &[], Utc::now());
        assert_eq!(report.state, FlowState::InFlow);
        assert!(report.respect_flow);
        assert!(report.flow_duration_ms.unwrap() >= 0);
    }

    #[test]
    fn fresh_trace_without_output_means_available() {
        let trace = open_trace_with_steps(&[StepOutcome::Nothing], 120);
        let report = flow_state(&[trace], &[], Utc::now());
        assert_eq!(report.state, FlowState::Available);
    }

    #[test]
    fn stale_trace_means_offline() {
        let mut trace = open_trace_with_steps(&[], 0);
        trace.started_at = Utc::now() - Duration::hours(2);
        let report = flow_state(&[trace], &[], Utc::now());
        assert_eq!(report.state, FlowState::Offline);
    }

    #[test]
    fn no_traces_means_offline() {
        let report = flow_state(&[], &[], Utc::now());
        assert_eq!(report.state, FlowState::Offline);
    }

    #[test]
    fn dashboard_caps_suggestions() {
        let mut soul = Soul::fresh("alice");
        soul.current_streak = 2;
        soul.total_xp = 60;
        soul.tasks_completed = 3;
        soul.rust_level = 0.2;

        let dashboard = build_dashboard(
            "alice",
            Some(soul),
            &[],
            &[],
            vec![Escalation::new("s1", vec![]), Escalation::new("s1", vec![])],
            ShadowMonitor::default(),
            None,
            7,
            Utc::now(),
        );
        assert!(dashboard.suggestions.len() <= constants::DASHBOARD_SUGGESTION_CAP);
        assert!(!dashboard.suggestions.is_empty());
        assert!(dashboard.streak_at_risk);
        assert!(!dashboard.heartbeat.is_healthy);
    }
}

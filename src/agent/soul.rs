//! Soul progression: XP awards, level thresholds, abilities, trust, rust.

use super::models::{Abilities, Escalation, ResolvedBy, Soul, SoulLevel, TraceSummary};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Promotion thresholds: all three of (xp, streak, tasks) must hold.
pub const LEVEL_THRESHOLDS: &[(SoulLevel, i64, i64, i64)] = &[
    (SoulLevel::Novice, 0, 0, 0),
    (SoulLevel::Capable, 100, 3, 5),
    (SoulLevel::Expert, 500, 5, 25),
    (SoulLevel::Master, 2000, 10, 100),
];

/// Highest level whose xp, streak and task thresholds are all met.
pub fn level_for(total_xp: i64, streak: i64, tasks_completed: i64) -> SoulLevel {
    let mut level = SoulLevel::Novice;
    for &(candidate, xp, min_streak, min_tasks) in LEVEL_THRESHOLDS {
        if total_xp >= xp && streak >= min_streak && tasks_completed >= min_tasks {
            level = candidate;
        }
    }
    level
}

/// Abilities are cumulative: each level keeps everything below it.
pub fn abilities_for(level: SoulLevel) -> Abilities {
    Abilities {
        can_commit: level >= SoulLevel::Capable,
        can_spawn_subagents: level >= SoulLevel::Expert,
        can_mentor_peers: level >= SoulLevel::Expert,
        can_access_prod: level >= SoulLevel::Master,
        extended_budget: level >= SoulLevel::Master,
    }
}

/// Base XP for a completed trace, before the rust multiplier.
///
/// 10 base, plus an efficiency bonus, plus 10 when no escalation needed
/// outside help (peer or human), plus 5 for a run with no escalations at
/// all.
pub fn xp_for_trace(summary: &TraceSummary, escalations: &[Escalation]) -> i64 {
    let mut xp = 10;

    if summary.efficiency > 0.7 {
        xp += 15;
    } else if summary.efficiency > 0.5 {
        xp += 5;
    }

    let self_handled = escalations.iter().all(|e| {
        matches!(e.resolved_by, None | Some(ResolvedBy::SelfResolved))
    });
    if self_handled {
        xp += 10;
    }

    if escalations.is_empty() {
        xp += 5;
    }

    xp
}

/// Rust decay tier for days of inactivity.
pub fn rust_level(days_inactive: i64) -> f64 {
    if days_inactive < 7 {
        0.0
    } else if days_inactive < 30 {
        0.2
    } else if days_inactive < 90 {
        0.4
    } else {
        0.6
    }
}

pub fn effective_xp_multiplier(rust: f64) -> f64 {
    1.0 - 0.5 * rust
}

/// Trust combines success rate, self-sufficiency under escalation, and a
/// penalty that grows with human escalations. Capped at 1.
pub fn trust_score(soul: &Soul) -> f64 {
    let success_rate = if soul.tasks_completed == 0 {
        0.0
    } else {
        soul.tasks_successful as f64 / soul.tasks_completed as f64
    };

    let self_total = soul.self_resolved_count + soul.human_escalation_count;
    let self_ratio = if self_total == 0 {
        0.5
    } else {
        soul.self_resolved_count as f64 / self_total as f64
    };

    let human_penalty = 1.0 / (1.0 + soul.human_escalation_count as f64 * 0.1);

    (0.5 * success_rate + 0.3 * self_ratio + 0.2 * human_penalty).min(1.0)
}

/// Requirements still outstanding for the next level, if any.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextLevel {
    pub level: SoulLevel,
    pub xp_needed: i64,
    pub streak_needed: i64,
    pub tasks_needed: i64,
}

pub fn next_level(soul: &Soul) -> Option<NextLevel> {
    LEVEL_THRESHOLDS
        .iter()
        .find(|(level, _, _, _)| *level > soul.level)
        .map(|&(level, xp, streak, tasks)| NextLevel {
            level,
            xp_needed: (xp - soul.total_xp).max(0),
            streak_needed: (streak - soul.current_streak).max(0),
            tasks_needed: (tasks - soul.tasks_completed).max(0),
        })
}

/// What a trace-driven progression update changed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionOutcome {
    pub xp_awarded: i64,
    pub leveled_up: bool,
    pub level: SoulLevel,
    pub successful: bool,
}

/// Fold a completed trace into the soul: XP (rust-decayed), task and streak
/// counters, running-mean efficiency, escalation counters, specialization,
/// level and abilities, and the derived scores.
pub fn apply_trace(
    soul: &mut Soul,
    trace_id: &str,
    summary: &TraceSummary,
    escalations: &[Escalation],
    domain: Option<&str>,
    days_inactive: i64,
) -> ProgressionOutcome {
    let rust = rust_level(days_inactive);
    let base_xp = xp_for_trace(summary, escalations);
    let xp = (base_xp as f64 * effective_xp_multiplier(rust)).floor() as i64;

    let human_resolved = escalations
        .iter()
        .any(|e| e.resolved_by == Some(ResolvedBy::Human));
    let successful = !human_resolved;

    soul.total_xp += xp;
    soul.tasks_completed += 1;
    if successful {
        soul.tasks_successful += 1;
        soul.current_streak += 1;
    } else {
        soul.current_streak = 0;
    }
    soul.longest_streak = soul.longest_streak.max(soul.current_streak);

    let n = soul.tasks_completed as f64;
    soul.avg_efficiency = (soul.avg_efficiency * (n - 1.0) + summary.efficiency) / n;

    soul.escalation_count += escalations.len() as i64;
    for escalation in escalations {
        match escalation.resolved_by {
            Some(ResolvedBy::SelfResolved) => soul.self_resolved_count += 1,
            Some(ResolvedBy::Peer) => soul.peer_assist_count += 1,
            Some(ResolvedBy::Human) => soul.human_escalation_count += 1,
            None => {}
        }
    }

    if let Some(domain) = domain {
        soul.specializations.add(domain, xp / 2);
    }

    soul.last_trace_id = Some(trace_id.to_string());

    let new_level = level_for(soul.total_xp, soul.current_streak, soul.tasks_completed);
    let leveled_up = new_level != soul.level;
    if leveled_up {
        soul.level = new_level;
        soul.abilities = abilities_for(new_level);
    }

    soul.trust_score = trust_score(soul);
    soul.transparency_score = transparency_score(soul);
    soul.track_record_score = track_record_score(soul);

    ProgressionOutcome {
        xp_awarded: xp,
        leveled_up,
        level: soul.level,
        successful,
    }
}

/// How openly the agent works: rewarded for resolving its own escalations
/// rather than hiding them until a human has to step in.
fn transparency_score(soul: &Soul) -> f64 {
    if soul.escalation_count == 0 {
        return 0.5;
    }
    let resolved = soul.self_resolved_count + soul.peer_assist_count;
    (0.5 + 0.5 * resolved as f64 / soul.escalation_count as f64).min(1.0)
}

/// Long-horizon reliability: success rate weighted with streak depth.
fn track_record_score(soul: &Soul) -> f64 {
    let success_rate = if soul.tasks_completed == 0 {
        0.0
    } else {
        soul.tasks_successful as f64 / soul.tasks_completed as f64
    };
    let streak_factor = (soul.current_streak as f64 / 10.0).min(1.0);
    (0.7 * success_rate + 0.3 * streak_factor).min(1.0)
}

/// Refresh the derived fields before a soul leaves the singleton.
pub fn refresh_derived(soul: &mut Soul, last_activity: Option<DateTime<Utc>>, now: DateTime<Utc>) {
    let anchor = last_activity.unwrap_or(soul.created_at);
    let days = (now - anchor).num_days().max(0);
    soul.rust_level = rust_level(days);
    soul.effective_xp_multiplier = effective_xp_multiplier(soul.rust_level);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::models::EscalationTrigger;

    fn summary(efficiency: f64) -> TraceSummary {
        TraceSummary {
            total_steps: 4,
            dead_ends: 1,
            exploration_time_ms: 1000,
            solution_time_ms: 1000,
            efficiency,
        }
    }

    fn escalation(resolved_by: Option<ResolvedBy>) -> Escalation {
        let mut e = Escalation::new(
            "s1",
            vec![EscalationTrigger {
                trigger_type: "repeated_failures".to_string(),
                level: 1,
                reason: "r".to_string(),
                detected_at: Utc::now(),
            }],
        );
        if resolved_by.is_some() {
            e.resolved_at = Some(Utc::now());
            e.resolved_by = resolved_by;
        }
        e
    }

    #[test]
    fn promotion_requires_all_three_thresholds() {
        assert_eq!(level_for(100, 3, 5), SoulLevel::Capable);
        assert_eq!(level_for(99, 3, 5), SoulLevel::Novice);
        assert_eq!(level_for(100, 2, 5), SoulLevel::Novice);
        assert_eq!(level_for(100, 3, 4), SoulLevel::Novice);
        assert_eq!(level_for(2000, 10, 100), SoulLevel::Master);
    }

    #[test]
    fn abilities_accumulate_with_level() {
        let capable = abilities_for(SoulLevel::Capable);
        assert!(capable.can_commit);
        assert!(!capable.can_spawn_subagents);

        let expert = abilities_for(SoulLevel::Expert);
        assert!(expert.can_commit);
        assert!(expert.can_spawn_subagents);
        assert!(expert.can_mentor_peers);
        assert!(!expert.can_access_prod);

        let master = abilities_for(SoulLevel::Master);
        assert!(master.can_access_prod);
        assert!(master.extended_budget);
    }

    #[test]
    fn clean_efficient_trace_earns_full_bonus() {
        // 10 base + 15 efficiency + 10 self-handled + 5 clean
        assert_eq!(xp_for_trace(&summary(0.8), &[]), 40);
    }

    #[test]
    fn human_resolved_escalation_reduces_xp_and_breaks_streak() {
        let escalations = vec![escalation(Some(ResolvedBy::Human))];
        // 10 base + 15 efficiency, no self-handled bonus, no clean bonus
        assert_eq!(xp_for_trace(&summary(0.8), &escalations), 25);

        let mut soul = Soul::fresh("alice");
        soul.current_streak = 4;
        let outcome = apply_trace(&mut soul, "t1", &summary(0.8), &escalations, None, 0);
        assert!(!outcome.successful);
        assert_eq!(soul.current_streak, 0);
        assert_eq!(soul.longest_streak, 4);
        assert_eq!(soul.human_escalation_count, 1);
    }

    #[test]
    fn unresolved_escalations_still_count_as_self_handled() {
        let escalations = vec![escalation(None)];
        // 10 base + 15 efficiency + 10 self-handled, no clean bonus
        assert_eq!(xp_for_trace(&summary(0.8), &escalations), 35);
    }

    #[test]
    fn mid_efficiency_earns_small_bonus() {
        assert_eq!(xp_for_trace(&summary(0.6), &[]), 30);
        assert_eq!(xp_for_trace(&summary(0.3), &[]), 25);
    }

    #[test]
    fn rust_tiers_follow_day_boundaries() {
        assert_eq!(rust_level(6), 0.0);
        assert_eq!(rust_level(7), 0.2);
        assert_eq!(rust_level(29), 0.2);
        assert_eq!(rust_level(30), 0.4);
        assert_eq!(rust_level(90), 0.6);
        assert!((effective_xp_multiplier(0.2) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn trust_defaults_to_half_self_ratio_when_unused() {
        let soul = Soul::fresh("alice");
        // 0.5·0 + 0.3·0.5 + 0.2·1
        assert!((trust_score(&soul) - 0.35).abs() < 1e-9);
    }

    #[test]
    fn five_clean_traces_promote_to_capable() {
        let mut soul = Soul::fresh("alice");
        let mut leveled = false;
        for i in 0..5 {
            let outcome = apply_trace(
                &mut soul,
                &format!("t{i}"),
                &summary(0.9),
                &[],
                Some("backend"),
                0,
            );
            leveled |= outcome.leveled_up;
        }
        assert!(soul.total_xp >= 100);
        assert_eq!(soul.current_streak, 5);
        assert_eq!(soul.tasks_completed, 5);
        assert!(leveled);
        assert_eq!(soul.level, SoulLevel::Capable);
        assert!(soul.abilities.can_commit);
        assert_eq!(soul.specializations.backend, 5 * 20);
        assert!(soul.current_streak <= soul.longest_streak);
    }

    #[test]
    fn rusty_agent_earns_decayed_xp() {
        let mut soul = Soul::fresh("alice");
        let outcome = apply_trace(&mut soul, "t1", &summary(0.9), &[], None, 10);
        // 40 base decayed by 0.9 multiplier
        assert_eq!(outcome.xp_awarded, 36);
    }

    #[test]
    fn next_level_reports_remaining_requirements() {
        let mut soul = Soul::fresh("alice");
        soul.total_xp = 40;
        soul.current_streak = 1;
        soul.tasks_completed = 2;
        let next = next_level(&soul).unwrap();
        assert_eq!(next.level, SoulLevel::Capable);
        assert_eq!(next.xp_needed, 60);
        assert_eq!(next.streak_needed, 2);
        assert_eq!(next.tasks_needed, 3);

        soul.level = SoulLevel::Master;
        assert!(next_level(&soul).is_none());
    }
}

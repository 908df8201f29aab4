use crate::{
    agent::models::{SoulLevel, StepInput, StepOutcome},
    api::Hub,
    config::Config,
    coordinator::models::{AuthorType, CreateHandoff, CreateTask, TaskPriority, TaskStatus},
    coordinator::onboarding::SuggestionSource,
    HubError,
};

fn hub() -> Hub {
    Hub::new(&Config::for_tests()).unwrap()
}

fn step(outcome: StepOutcome) -> StepInput {
    StepInput {
        tool: "edit".to_string(),
        intent: "apply the fix".to_string(),
        outcome,
        duration_ms: 500,
        contribution_type: None,
        knowledge_gained: vec![],
        eliminated_paths: vec![],
        depends_on: vec![],
    }
}

/// Two agents race for the same task; exactly one wins, the loser learns
/// who did and cannot complete the task.
#[tokio::test]
async fn concurrent_pickup_has_exactly_one_winner() {
    let hub = hub();
    let task = hub
        .coordinator
        .create_task(CreateTask {
            title: "ship".to_string(),
            description: None,
            priority: Some(TaskPriority::High),
            created_by: "u".to_string(),
            tags: vec![],
            files: vec![],
        })
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        hub.coordinator.pickup_task(&task.id, "alice"),
        hub.coordinator.pickup_task(&task.id, "bob"),
    );

    let (winner, loser_err) = match (a, b) {
        (Ok(t), Err(e)) => (t, e),
        (Err(e), Ok(t)) => (t, e),
        other => panic!("expected exactly one winner, got {other:?}"),
    };
    assert_eq!(winner.status, TaskStatus::InProgress);
    let winner_id = winner.assignee.clone().unwrap();

    match loser_err {
        HubError::Conflict { context, .. } => {
            assert_eq!(context["assignedTo"], winner_id.as_str());
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    let loser_id = if winner_id == "alice" { "bob" } else { "alice" };
    assert!(matches!(
        hub.coordinator.complete_task(&task.id, loser_id).await,
        Err(HubError::Forbidden(_))
    ));
}

/// A full working day: onboard, pick up the suggested task, trace the work,
/// level the soul, complete, and hand the remainder off to the next agent.
#[tokio::test]
async fn day_in_the_life_round_trip() {
    let hub = hub();

    // The board has one task; alice onboards and is pointed at it
    let task = hub
        .coordinator
        .create_task(CreateTask {
            title: "wire up the exporter".to_string(),
            description: None,
            priority: Some(TaskPriority::High),
            created_by: "pm".to_string(),
            tags: vec![],
            files: vec![],
        })
        .await
        .unwrap();

    let bundle = hub.coordinator.onboard("alice").await.unwrap();
    assert!(bundle.is_new_agent);
    assert_eq!(bundle.suggested_task.source, SuggestionSource::TodoTask);
    assert_eq!(bundle.suggested_task.task_id.as_deref(), Some(task.id.as_str()));

    hub.coordinator.pickup_task(&task.id, "alice").await.unwrap();

    // Work is traced on alice's own singleton
    let alice = hub.agents.get_or_create("alice").await.unwrap();
    let trace = alice.start_trace("wire up the exporter", None).await.unwrap();
    for _ in 0..4 {
        let recorded = alice
            .record_step(&trace.session_id, step(StepOutcome::Found))
            .await
            .unwrap();
        assert!(recorded.escalation.is_none());
    }
    alice.complete_trace(&trace.session_id).await.unwrap();
    let (soul, outcome) = alice
        .update_soul_from_trace(&trace.session_id, Some("backend"))
        .await
        .unwrap();
    assert!(outcome.successful);
    assert!(soul.total_xp >= 40);

    hub.coordinator.complete_task(&task.id, "alice").await.unwrap();

    // Alice saves context and hands the rest off to anyone
    alice
        .save_checkpoint(crate::agent::models::CheckpointUpdate {
            accomplishments: Some(vec!["exporter wired".to_string()]),
            ..Default::default()
        })
        .await
        .unwrap();
    hub.coordinator
        .create_handoff(CreateHandoff {
            from_agent: "alice".to_string(),
            to_agent: None,
            title: "add retries to the exporter".to_string(),
            context: "the happy path works; failures need backoff".to_string(),
            code: None,
            file_path: Some("src/export.rs".to_string()),
            next_steps: vec!["wrap the send call".to_string()],
            priority: Some(TaskPriority::Medium),
        })
        .await
        .unwrap();

    // Bob arrives and the hub proposes the handoff
    let bundle = hub.coordinator.onboard("bob").await.unwrap();
    assert_eq!(bundle.suggested_task.source, SuggestionSource::Handoff);
    assert_eq!(bundle.suggested_task.task, "add retries to the exporter");
    let handoff_id = bundle.suggested_task.handoff_id.unwrap();

    let claimed = hub.coordinator.claim_handoff(&handoff_id, "bob").await.unwrap();
    assert_eq!(claimed.claimed_by.as_deref(), Some("bob"));
    hub.coordinator
        .complete_handoff(&handoff_id, "bob")
        .await
        .unwrap();
}

/// Soul progression across five clean traces promotes novice → capable at
/// exactly the moment all three thresholds hold.
#[tokio::test]
async fn five_clean_traces_promote_and_unlock_commit() {
    let hub = hub();
    let alice = hub.agents.get_or_create("alice").await.unwrap();

    for i in 0..5 {
        let trace = alice.start_trace(&format!("task {i}"), None).await.unwrap();
        for _ in 0..3 {
            alice
                .record_step(&trace.session_id, step(StepOutcome::Found))
                .await
                .unwrap();
        }
        alice.complete_trace(&trace.session_id).await.unwrap();
        let (soul, _) = alice
            .update_soul_from_trace(&trace.session_id, None)
            .await
            .unwrap();
        if i < 4 {
            assert_eq!(soul.level, SoulLevel::Novice, "no early promotion");
            assert!(!soul.abilities.can_commit);
        } else {
            assert_eq!(soul.level, SoulLevel::Capable);
            assert!(soul.abilities.can_commit);
        }
    }
}

/// Escalated work feeds back into session-resume and the dashboard: the
/// stuck agent reads as stuck until the escalation is resolved.
#[tokio::test]
async fn escalation_shows_up_in_flow_until_resolved() {
    let hub = hub();
    let alice = hub.agents.get_or_create("alice").await.unwrap();

    let trace = alice.start_trace("find the regression", None).await.unwrap();
    let mut escalated = None;
    for _ in 0..3 {
        let recorded = alice
            .record_step(
                &trace.session_id,
                StepInput {
                    tool: "grep".to_string(),
                    intent: "search logs".to_string(),
                    outcome: StepOutcome::Nothing,
                    duration_ms: 100,
                    contribution_type: None,
                    knowledge_gained: vec![],
                    eliminated_paths: vec![],
                    depends_on: vec![],
                },
            )
            .await
            .unwrap();
        if recorded.escalation.is_some() {
            escalated = recorded.escalation;
        }
    }
    let escalation = escalated.expect("repeated fruitless steps must escalate");
    assert_eq!(escalation.highest_level, 2);

    let dashboard = alice.dashboard().await.unwrap();
    assert_eq!(
        dashboard.flow.state,
        crate::agent::models::FlowState::Stuck
    );
    assert_eq!(dashboard.pending_escalations.len(), 1);

    alice
        .resolve_escalation(
            &trace.session_id,
            crate::agent::ResolveEscalation {
                escalation_id: Some(escalation.id),
                resolved_by: crate::agent::models::ResolvedBy::SelfResolved,
                resolver_agent: None,
                helpful_hint: None,
            },
        )
        .await
        .unwrap();

    let dashboard = alice.dashboard().await.unwrap();
    assert_ne!(
        dashboard.flow.state,
        crate::agent::models::FlowState::Stuck
    );
}

/// Exclusive work claims compose: zone, claim and lock all name their
/// holder on contention.
#[tokio::test]
async fn exclusivity_layers_name_their_holder() {
    let hub = hub();

    hub.coordinator
        .claim_zone("z1", "/src/export", "alice", None)
        .await
        .unwrap();
    let zone = hub
        .coordinator
        .resolve_zone("/src/export/mod.rs")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(zone.owner, "alice");

    hub.coordinator
        .claim("exporter-rework", "alice", None)
        .await
        .unwrap();
    match hub.coordinator.claim("exporter-rework", "bob", None).await {
        Err(HubError::Conflict { context, .. }) => assert_eq!(context["claimedBy"], "alice"),
        other => panic!("expected conflict, got {other:?}"),
    }

    let lock = hub.locks.get_or_create("/src/export/mod.rs").await.unwrap();
    lock.acquire("alice", None, Some(60_000), None).await.unwrap();
    match lock.acquire("bob", None, Some(60_000), None).await {
        Err(HubError::Conflict { context, .. }) => assert_eq!(context["lockedBy"], "alice"),
        other => panic!("expected conflict, got {other:?}"),
    }
}

/// The session-resume bundle reconstructs the story told in chat.
#[tokio::test]
async fn session_resume_reflects_the_day() {
    let hub = hub();

    hub.coordinator
        .post_chat("alice", AuthorType::Agent, "✅ exporter wired up")
        .await
        .unwrap();
    hub.coordinator
        .post_chat("bob", AuthorType::Agent, "fixed the flaky queue test")
        .await
        .unwrap();
    hub.coordinator
        .post_chat("bob", AuthorType::Agent, "looking at retries next")
        .await
        .unwrap();

    let task = hub
        .coordinator
        .create_task(CreateTask {
            title: "retries".to_string(),
            description: None,
            priority: Some(TaskPriority::Medium),
            created_by: "bob".to_string(),
            tags: vec![],
            files: vec![],
        })
        .await
        .unwrap();
    hub.coordinator.pickup_task(&task.id, "bob").await.unwrap();

    let bundle = hub.coordinator.session_resume().await.unwrap();
    assert!(bundle
        .accomplishments
        .iter()
        .any(|a| a.contains("exporter wired up")));
    assert!(bundle
        .accomplishments
        .iter()
        .any(|a| a.contains("fixed the flaky queue test")));
    assert_eq!(bundle.in_progress_tasks.len(), 1);
    assert!(bundle
        .quick_actions
        .iter()
        .any(|a| a.id == "check-in-progress"));
    assert!(bundle.participants.iter().any(|p| p.author == "bob"));
}

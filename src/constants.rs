//! System-wide configuration values shared across the coordination runtime.

// Service metadata
pub const SERVICE_NAME: &str = "fleethub";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

// Coordinator
/// A claim older than this without a refresh is considered stale and may be
/// overwritten by another agent.
pub const CLAIM_STALE_SECS: i64 = 1800;

/// Chat is append-only; retention trims the oldest rows past this cap.
pub const CHAT_RETENTION_LIMIT: usize = 1000;

/// Default page size for chat retrieval.
pub const CHAT_DEFAULT_LIMIT: usize = 50;

/// Messages included in the work-bundle snapshot.
pub const WORK_BUNDLE_CHAT_LIMIT: usize = 20;

/// Messages included in the onboarding bundle.
pub const ONBOARD_CHAT_LIMIT: usize = 5;

/// Chat window scanned by the session-resume aggregator.
pub const SESSION_RESUME_CHAT_WINDOW: usize = 100;

/// Deduped accomplishments kept by session-resume.
pub const SESSION_RESUME_ACCOMPLISHMENT_CAP: usize = 10;

pub const SESSION_RESUME_HANDOFF_CAP: usize = 5;
pub const SESSION_RESUME_TASK_CAP: usize = 5;
pub const SESSION_RESUME_CLAIM_CAP: usize = 10;

/// Keyword set used to spot accomplishment lines in chat. Overridable via
/// `ACCOMPLISHMENT_KEYWORDS`.
pub const DEFAULT_ACCOMPLISHMENT_KEYWORDS: &[&str] = &[
    "✅",
    "shipped",
    "completed",
    "built",
    "added",
    "fixed",
    "implemented",
    "deployed",
];

// Locks
/// Default lock TTL when the caller does not provide one: two hours.
pub const DEFAULT_LOCK_TTL_MS: i64 = 7_200_000;

/// Default page size for lock history retrieval.
pub const LOCK_HISTORY_DEFAULT_LIMIT: usize = 50;

// Work traces and escalation triggers
/// A trace older than this (still open) trips the `time_exceeded` trigger.
pub const TRACE_TIME_EXCEEDED_MS: i64 = 600_000;

/// Window of trailing steps inspected by the `stuck_loop` trigger.
pub const STUCK_LOOP_WINDOW: usize = 5;

/// Tool repetitions within the window that trip `stuck_loop`.
pub const STUCK_LOOP_MIN_REPEATS: usize = 3;

/// `outcome=nothing` steps that trip `repeated_failures`.
pub const REPEATED_FAILURES_THRESHOLD: usize = 3;

/// `outcome=error` steps that trip `error_accumulation`.
pub const ERROR_ACCUMULATION_THRESHOLD: usize = 2;

/// Minimum steps before `low_efficiency` is evaluated.
pub const LOW_EFFICIENCY_MIN_STEPS: usize = 5;

/// Non-productive fraction above which `low_efficiency` fires.
pub const LOW_EFFICIENCY_RATIO: f64 = 0.6;

// Flow state
/// Step recency window for flow detection: fifteen minutes.
pub const FLOW_WINDOW_MS: i64 = 900_000;

/// Trailing steps inspected for flow detection.
pub const FLOW_RECENT_STEPS: usize = 10;

/// Productive steps within the window required for `in_flow`.
pub const FLOW_PRODUCTIVE_MIN: usize = 5;

/// A trace started within this window keeps an agent `available`.
pub const AVAILABLE_WINDOW_MS: i64 = 3_600_000;

// Shadow monitoring
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: i64 = 60_000;
pub const DEFAULT_STALL_THRESHOLD_MS: i64 = 300_000;

/// Heartbeats kept per agent (append-only ring).
pub const HEARTBEAT_RING_SIZE: usize = 100;

// Memory
/// Most-recent entries returned by a memory search.
pub const MEMORY_SEARCH_LIMIT: usize = 50;

// Dashboard
/// Context-sensitive suggestions surfaced on the dashboard.
pub const DASHBOARD_SUGGESTION_CAP: usize = 5;

/// Recent traces summarized on the dashboard.
pub const DASHBOARD_RECENT_TRACES: usize = 5;

use deepresearch_common::SessionId;

/// One observable transition of the state machine, translated by the API
/// layer into the SSE payload shapes of §6.1. The Orchestrator never
/// formats SSE itself — it only emits these.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// Emitted exactly once, immediately after the session row is inserted.
    SessionStarted(SessionId),
    /// A chunk of assistant-visible text, forwarded verbatim (including any
    /// `<think>...</think>` spans).
    Content(String),
    /// Always the last event, success or failure.
    Done,
}

//! The loop engine: one governed think-act session.
//!
//! Each iteration:
//!
//! 1. **Checkpoint**: stop if aborted, park if paused, stop if a limit is hit
//! 2. **Compact** the working context when it nears the window
//! 3. **Call** the model through the resolver (a failure becomes a system turn)
//! 4. **Text reply**: finish if complete
//! 5. **Action reply**: gate, maybe approve, execute each action in order,
//!    appending every result to the context
//!
//! The engine owns its context and records outright. Everything shared
//! (resolver, policies, memory, approvals) is behind an `Arc`, and a failing
//! session leaves it untouched.

use helmsman_core::memory::{MemoryBackend, MemoryEntry, MemoryKind};
use helmsman_core::provider::{ActionDefinition, ProviderRequest};
use helmsman_core::session::{
    ActionRecord, Disposition, LoopStatus, SessionConfig, SessionId, SessionResult,
};
use helmsman_core::tool::{ActionExecutor, ActionOutcome, ExecutionScope};
use helmsman_core::turn::{RequestedAction, Turn};
use helmsman_providers::ModelResolver;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::completion::CompletionDetector;
use crate::context::{ContextAssembler, ContextGuard};
use crate::control::LoopControl;
use crate::gate::{ApprovalDecision, ApprovalRequest, ApprovalRequester, GateRequest, GateVerdict, PolicyGate};
use crate::hooks::LoopHooks;
use crate::parser::ParsedReply;

pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_ITERATIONS_MESSAGE: &str = "Max iterations reached without completing the task.";
const TIMEOUT_MESSAGE: &str = "Task timed out";
const REJECTED_MESSAGE: &str = "Action rejected by human reviewer";
const MEMORY_EXCERPT_CHARS: usize = 500;

/// Runs one session. Build it, grab [`control`](Self::control) if you need
/// to steer it, then [`run`](Self::run) it.
pub struct LoopEngine {
    session_id: SessionId,
    config: SessionConfig,
    resolver: Arc<ModelResolver>,
    executor: Arc<dyn ActionExecutor>,
    memory: Option<Arc<dyn MemoryBackend>>,
    gate: Option<Arc<dyn PolicyGate>>,
    approvals: Option<Arc<dyn ApprovalRequester>>,
    hooks: Vec<Arc<dyn LoopHooks>>,
    control: LoopControl,
    assembler: ContextAssembler,
    guard: ContextGuard,
    detector: CompletionDetector,
    action_timeout: Duration,
}

/// Mutable bookkeeping of one run.
struct RunState {
    started: Instant,
    iteration: u32,
    total_tokens: u64,
    cost_usd: f64,
    actions: Vec<ActionRecord>,
    last_text: Option<String>,
}

/// How a run ended, short of an error.
struct Finish {
    status: LoopStatus,
    response: String,
}

enum ActionStep {
    Resolved(ActionRecord),
    /// Abort arrived while the action waited for approval.
    Aborted,
}

impl LoopEngine {
    pub fn new(
        config: SessionConfig,
        resolver: Arc<ModelResolver>,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        let guard = ContextGuard::new(config.max_tokens);
        Self {
            session_id: SessionId::new(),
            config,
            resolver,
            executor,
            memory: None,
            gate: None,
            approvals: None,
            hooks: Vec::new(),
            control: LoopControl::new(),
            assembler: ContextAssembler::default(),
            guard,
            detector: CompletionDetector::default(),
            action_timeout: DEFAULT_ACTION_TIMEOUT,
        }
    }

    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = session_id;
        self
    }

    /// Recall context from, and record the session into, `memory`.
    pub fn with_memory(mut self, memory: Arc<dyn MemoryBackend>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Without a gate every action is allowed.
    pub fn with_policy_gate(mut self, gate: Arc<dyn PolicyGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Without a requester, actions that need approval run unreviewed.
    pub fn with_approvals(mut self, approvals: Arc<dyn ApprovalRequester>) -> Self {
        self.approvals = Some(approvals);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn LoopHooks>) -> Self {
        self.hooks.push(hooks);
        self
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub fn with_completion(mut self, detector: CompletionDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Fraction of `max_tokens` at which the working context is compacted.
    pub fn with_compaction_threshold(mut self, threshold: f64) -> Self {
        self.guard = self.guard.with_threshold(threshold);
        self
    }

    pub fn with_recall_limit(mut self, limit: usize) -> Self {
        self.assembler = ContextAssembler::new(limit);
        self
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// A handle that can abort, pause or resume this session from elsewhere.
    pub fn control(&self) -> LoopControl {
        self.control.clone()
    }

    /// Run `task` to a terminal status. Never panics on collaborator failure:
    /// anything unrecoverable comes back as an `errored` result.
    pub async fn run(self, task: &str) -> SessionResult {
        let mut state = RunState {
            started: Instant::now(),
            iteration: 0,
            total_tokens: 0,
            cost_usd: 0.0,
            actions: Vec::new(),
            last_text: None,
        };
        self.control.set_status(LoopStatus::Running);

        info!(
            session_id = %self.session_id,
            subject_id = %self.config.subject_id,
            model = %self.config.model.model,
            max_iterations = self.config.max_iterations,
            "Session started"
        );

        let (status, response, error) = match self.drive(task, &mut state).await {
            Ok(finish) => (finish.status, finish.response, None),
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Session errored");
                (LoopStatus::Errored, String::new(), Some(e.to_string()))
            }
        };
        self.control.set_status(status);

        let result = SessionResult {
            session_id: self.session_id.clone(),
            subject_id: self.config.subject_id.clone(),
            response,
            error,
            actions: state.actions,
            iterations: state.iteration,
            total_tokens: state.total_tokens,
            cost_usd: state.cost_usd,
            duration_ms: state.started.elapsed().as_millis() as u64,
            status,
        };

        info!(
            session_id = %self.session_id,
            status = %result.status,
            iterations = result.iterations,
            total_tokens = result.total_tokens,
            cost_usd = result.cost_usd,
            duration_ms = result.duration_ms,
            "Session finished"
        );

        for hooks in &self.hooks {
            if let Some(error) = &result.error {
                hooks.on_error(&self.session_id, error);
            }
            hooks.on_complete(&result);
        }
        result
    }

    async fn drive(&self, task: &str, state: &mut RunState) -> helmsman_core::Result<Finish> {
        let catalogue = ContextAssembler::permitted_actions(&self.config, &self.executor.definitions());
        let mut turns = self
            .assembler
            .assemble_initial(&self.config, task, self.memory.as_deref(), &catalogue)
            .await;

        self.remember(format!("Task: {task}"), 1.0, None).await;

        loop {
            // ── Checkpoints ──
            if self.control.is_aborted() {
                return Ok(self.terminated(state));
            }
            if self.control.is_paused() {
                self.control.set_status(LoopStatus::Paused);
                info!(session_id = %self.session_id, iteration = state.iteration, "Session paused");
                if !self.control.wait_for_resume().await {
                    return Ok(self.terminated(state));
                }
                self.control.set_status(LoopStatus::Running);
                info!(session_id = %self.session_id, "Session resumed");
            }
            if let Some(status) = self.detector.should_stop(
                state.iteration,
                self.config.max_iterations,
                state.started.elapsed(),
                self.config.timeout(),
            ) {
                return Ok(self.limit_reached(status, state));
            }

            state.iteration += 1;
            debug!(session_id = %self.session_id, iteration = state.iteration, "Loop iteration");

            if self.guard.exceeds_budget(&turns) {
                turns = self.guard.compact(turns);
            }

            // ── Think ──
            let request = self.request(&turns, &catalogue);
            let resolution = match self
                .resolver
                .resolve(request, Some(&self.config.model.provider))
                .await
            {
                Ok(resolution) => resolution,
                Err(e) => {
                    warn!(
                        session_id = %self.session_id,
                        iteration = state.iteration,
                        error = %e,
                        "Model call failed"
                    );
                    ContextAssembler::append_system(
                        &mut turns,
                        format!("Model call failed: {e}. Please try a different approach."),
                    );
                    self.iteration_done(state);
                    continue;
                }
            };

            state.total_tokens += u64::from(resolution.reply.usage.total_tokens);
            state.cost_usd += resolution.cost_usd;

            // ── Act ──
            let parsed = ParsedReply::parse(&resolution.reply);
            match &parsed {
                ParsedReply::Text { text } => {
                    ContextAssembler::append_assistant(&mut turns, Turn::assistant(text.clone()));
                    if !text.trim().is_empty() {
                        state.last_text = Some(text.clone());
                    }
                    if self.detector.is_complete(&parsed) {
                        self.iteration_done(state);
                        return Ok(Finish {
                            status: LoopStatus::Completed,
                            response: text.clone(),
                        });
                    }
                }
                ParsedReply::Actions { text, actions } => {
                    ContextAssembler::append_assistant(
                        &mut turns,
                        Turn::assistant_with_actions(text.clone(), actions.clone()),
                    );
                    if !text.trim().is_empty() {
                        state.last_text = Some(text.clone());
                    }

                    for action in actions {
                        let record = match self.resolve_action(action, state).await? {
                            ActionStep::Resolved(record) => record,
                            ActionStep::Aborted => return Ok(self.terminated(state)),
                        };
                        ContextAssembler::append_action_result(
                            &mut turns,
                            &record.id,
                            &record.name,
                            &record.output,
                        );
                        self.remember_action(&record).await;
                        self.hooks
                            .iter()
                            .for_each(|h| h.on_action(&self.session_id, &record));
                        state.actions.push(record);
                    }
                }
            }

            self.iteration_done(state);
        }
    }

    /// Gate, approve and execute one action.
    async fn resolve_action(
        &self,
        action: &RequestedAction,
        state: &RunState,
    ) -> helmsman_core::Result<ActionStep> {
        let started = Instant::now();

        if let Some(gate) = &self.gate {
            let request = GateRequest {
                subject_id: &self.config.subject_id,
                session_id: self.session_id.as_str(),
                action,
                iteration: state.iteration,
                total_cost: self.resolver.cost_tracker().total_cost(),
                session_cost: state.cost_usd,
                policy_ids: &self.config.policy_ids,
            };

            match gate.check(&request).await? {
                GateVerdict::Allow => {}
                GateVerdict::Deny { reason } => {
                    return Ok(ActionStep::Resolved(record(
                        action,
                        ActionOutcome::failure(reason),
                        Disposition::Denied,
                        started,
                    )));
                }
                GateVerdict::RequireApproval { reason } => match &self.approvals {
                    Some(approvals) => {
                        let request = ApprovalRequest::new(
                            self.session_id.as_str(),
                            &self.config.subject_id,
                            action,
                            reason,
                        );

                        self.control.set_status(LoopStatus::WaitingApproval);
                        let decision = tokio::select! {
                            decision = approvals.request(request) => decision,
                            () = self.control.aborted() => return Ok(ActionStep::Aborted),
                        };
                        self.control.set_status(LoopStatus::Running);

                        if let ApprovalDecision::Rejected { reason } = decision? {
                            info!(
                                session_id = %self.session_id,
                                action = %action.name,
                                reason = %reason,
                                "Action rejected"
                            );
                            return Ok(ActionStep::Resolved(record(
                                action,
                                ActionOutcome::failure(REJECTED_MESSAGE),
                                Disposition::Rejected,
                                started,
                            )));
                        }
                    }
                    None => {
                        debug!(action = %action.name, "No approval requester, proceeding");
                    }
                },
            }
        }

        let scope = ExecutionScope {
            subject_id: self.config.subject_id.clone(),
            session_id: self.session_id.to_string(),
        };
        let outcome = match tokio::time::timeout(
            self.action_timeout,
            self.executor.execute(&action.name, action.input.clone(), &scope),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    session_id = %self.session_id,
                    action = %action.name,
                    timeout_secs = self.action_timeout.as_secs(),
                    "Action timed out"
                );
                ActionOutcome::failure(format!(
                    "Action timed out after {}s",
                    self.action_timeout.as_secs()
                ))
            }
        };

        debug!(
            session_id = %self.session_id,
            action = %action.name,
            success = outcome.success,
            "Action executed"
        );
        Ok(ActionStep::Resolved(record(
            action,
            outcome,
            Disposition::Allowed,
            started,
        )))
    }

    // ── Internal ───────────────────────────────────────────────────

    fn request(&self, turns: &[Turn], catalogue: &[ActionDefinition]) -> ProviderRequest {
        ProviderRequest {
            model: self.config.model.model.clone(),
            turns: turns.to_vec(),
            actions: catalogue.to_vec(),
            temperature: self.config.model.effective_temperature(),
            max_tokens: self.config.model.max_output_tokens,
            credential: None,
        }
    }

    fn iteration_done(&self, state: &RunState) {
        self.hooks
            .iter()
            .for_each(|h| h.on_iteration(&self.session_id, state.iteration, state.total_tokens));
    }

    fn terminated(&self, state: &RunState) -> Finish {
        info!(session_id = %self.session_id, iteration = state.iteration, "Session aborted");
        Finish {
            status: LoopStatus::Terminated,
            response: state.last_text.clone().unwrap_or_default(),
        }
    }

    fn limit_reached(&self, status: LoopStatus, state: &RunState) -> Finish {
        warn!(
            session_id = %self.session_id,
            status = %status,
            iterations = state.iteration,
            "Session limit reached"
        );
        let response = match status {
            LoopStatus::Timeout => TIMEOUT_MESSAGE.to_string(),
            _ => state
                .last_text
                .clone()
                .unwrap_or_else(|| MAX_ITERATIONS_MESSAGE.to_string()),
        };
        Finish { status, response }
    }

    async fn remember_action(&self, record: &ActionRecord) {
        let output = serde_json::to_string(&record.output).unwrap_or_default();
        let excerpt: String = output.chars().take(MEMORY_EXCERPT_CHARS).collect();
        self.remember(
            format!("Tool: {} -> {}", record.name, excerpt),
            0.6,
            Some(&record.id),
        )
        .await;
    }

    /// Best effort: a memory failure is logged and otherwise ignored.
    async fn remember(&self, content: String, importance: f32, action_id: Option<&str>) {
        let Some(memory) = &self.memory else {
            return;
        };

        let mut entry = MemoryEntry::new(
            &self.config.subject_id,
            MemoryKind::ShortTerm,
            content,
            importance,
        )
        .with_metadata("session_id", json!(self.session_id.as_str()));
        if let Some(id) = action_id {
            entry = entry.with_metadata("action_id", json!(id));
        }

        if let Err(e) = memory.remember(entry).await {
            warn!(session_id = %self.session_id, error = %e, "Failed to record memory");
        }
    }
}

fn record(
    action: &RequestedAction,
    output: ActionOutcome,
    disposition: Disposition,
    started: Instant,
) -> ActionRecord {
    ActionRecord {
        id: action.id.clone(),
        name: action.name.clone(),
        input: action.input.clone(),
        output,
        duration_ms: started.elapsed().as_millis() as u64,
        disposition,
        timestamp: chrono::Utc::now(),
    }
}

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use conduit_orchestrator::apply_transition;
use conduit_orchestrator::RunCommand;
use conduit_providers::ProviderRegistry;
use conduit_tools::ToolRegistry;
use conduit_types::{
    AgentAction, Artifact, ArtifactOwner, ChatMessage, ChatRequest, ErrorCode, EventType, OrchestratorError, Run, RunStatus, Step,
    StepStatus, ToolCall,
};
use serde_json::json;
use tracing::warn;

use crate::cancellation::CancellationRegistry;
use crate::credit::CreditManager;
use crate::event_stream::EventStream;
use crate::extract_first_json_object;
use crate::persistence::{ArtifactStore, FileArtifactStore, SharedArtifactStore, SharedRunStore};
use crate::planner::Planner;

const MAX_DECISION_ATTEMPTS: u32 = 3;
const MAX_TOOL_RETRIES: u32 = 3;
const TOOL_RETRY_BASE_MS: u64 = 500;
const TOOL_RETRY_CAP_MS: u64 = 30_000;
const PACING_INTERVAL_MS: u64 = 50;

/// Drives a single `Run` through `queued -> ... -> <terminal>` (§4.3). One
/// `Supervisor` is shared across every run a worker is driving concurrently;
/// the step log used for idempotency replay lives on the `Run` itself (so a
/// lease re-acquired by a different worker after a crash sees it too), and
/// every other collaborator (credits, events, persistence) is itself a shared,
/// internally-locked collaborator.
pub struct Supervisor {
    providers: Arc<ProviderRegistry>,
    tools: Arc<ToolRegistry>,
    credits: CreditManager,
    events: EventStream,
    store: SharedRunStore,
    artifacts: SharedArtifactStore,
    planner: Planner,
    cancellations: CancellationRegistry,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        providers: Arc<ProviderRegistry>,
        tools: Arc<ToolRegistry>,
        store: SharedRunStore,
        artifacts: SharedArtifactStore,
        events: EventStream,
        credits: CreditManager,
    ) -> Self {
        let planner = Planner::new(providers.clone());
        Self {
            providers,
            tools,
            credits,
            events,
            store,
            artifacts,
            planner,
            cancellations: CancellationRegistry::new(),
        }
    }

    /// Signals the cancellation token for `run_id`, if one is live. A `drive` loop
    /// notices on its next iteration and transitions the run to `cancelled` rather
    /// than stopping mid-step; it has no effect on a run with no in-flight `drive`.
    pub async fn cancel(&self, run_id: &str) -> bool {
        self.cancellations.cancel(run_id).await
    }

    /// Applies a guarded transition, persists the result, and executes the
    /// commands the transition table returns. Mutates `run` in place so callers
    /// keep driving off the post-transition value.
    async fn transition(&self, run: &mut Run, target: RunStatus) -> Result<(), OrchestratorError> {
        let (next, commands) = apply_transition(run, target, Utc::now())?;
        *run = next;

        self.store
            .save(run)
            .await
            .map_err(|err| OrchestratorError::new(ErrorCode::InvalidRequest, format!("failed to persist run: {err}")))?;

        if run.status.is_terminal() {
            self.cancellations.remove(&run.id).await;
        }

        for command in commands {
            match command {
                RunCommand::Enqueue => {}
                RunCommand::ReleaseCredits { run_id } => self.credits.release(&run_id).await,
                RunCommand::FinalizeCredits { run_id } => self.credits.finalize(&run_id).await,
                RunCommand::EmitEvent { event_type, payload } => {
                    self.events.publish(&run.id, event_type, payload);
                }
            }
        }
        Ok(())
    }

    fn publish(&self, run: &Run, event_type: EventType, payload: serde_json::Value) {
        self.events.publish(&run.id, event_type, payload);
    }

    /// Runs `run` from wherever it currently sits through to a terminal status.
    /// Returns `Ok(())` once `run.status.is_terminal()`, or `Ok(())` immediately if
    /// the caller hands back a `paused`/`waiting_user` run — those are legitimate
    /// suspension points, not errors.
    pub async fn drive(&self, run: &mut Run) -> Result<(), OrchestratorError> {
        if run.status == RunStatus::Queued {
            self.transition(run, RunStatus::Planning).await?;
        }

        if run.status == RunStatus::Planning {
            self.ensure_plan(run).await?;
        }

        if !matches!(run.status, RunStatus::Executing) {
            return Ok(());
        }

        self.publish(run, EventType::TaskStarted, json!({ "run_id": run.id }));

        let deadline = run.timeout_at;
        let mut steps_this_call: u32 = 0;
        let cancel_token = self.cancellations.create(&run.id).await;

        loop {
            if run.status.is_terminal() || matches!(run.status, RunStatus::Paused | RunStatus::WaitingUser) {
                return Ok(());
            }

            if cancel_token.is_cancelled() {
                return self.cancel_run(run).await;
            }

            if run.step_count >= run.config.max_steps {
                return self.fail_with_timeout(run).await;
            }
            if let Some(deadline) = deadline {
                if Utc::now() >= deadline {
                    return self.fail_with_timeout(run).await;
                }
            }

            let Some(phase_id) = run.plan.as_ref().and_then(|p| p.next_active_phase()).map(|p| p.id) else {
                self.transition(run, RunStatus::Completed).await?;
                return Ok(());
            };
            run.current_phase_id = Some(phase_id);
            let mut phase_just_started = false;
            if let Some(plan) = run.plan.as_mut() {
                if let Some(phase) = plan.phase_mut(phase_id) {
                    if phase.status == conduit_types::PhaseStatus::Pending {
                        phase.status = conduit_types::PhaseStatus::Executing;
                        phase.started_at = Some(Utc::now());
                        phase_just_started = true;
                    }
                }
            }
            if phase_just_started {
                self.publish(run, EventType::PhaseStarted, json!({ "phase_id": phase_id }));
            }

            let action = match self.decide_action(run, phase_id).await {
                Ok(action) => action,
                Err(err) => {
                    run.error = Some(err.clone());
                    self.transition(run, RunStatus::Failed).await?;
                    return Err(err);
                }
            };

            match action {
                AgentAction::Tool { tool_name, tool_input, .. } => {
                    self.execute_tool_action(run, phase_id, tool_name, tool_input).await?;
                }
                AgentAction::Message { content } => {
                    self.publish(run, EventType::Message, json!({ "role": "assistant", "content": content }));
                }
                AgentAction::PhaseComplete => {
                    if let Some(plan) = run.plan.as_mut() {
                        if let Some(phase) = plan.phase_mut(phase_id) {
                            phase.status = conduit_types::PhaseStatus::Completed;
                            phase.completed_at = Some(Utc::now());
                        }
                    }
                    self.publish(run, EventType::PhaseCompleted, json!({ "phase_id": phase_id }));
                    let all_settled = run.plan.as_ref().map(|p| p.all_settled()).unwrap_or(false);
                    if all_settled {
                        self.transition(run, RunStatus::Completed).await?;
                        return Ok(());
                    }
                }
                AgentAction::TaskComplete { message } => {
                    if let Some(message) = message {
                        self.publish(run, EventType::Message, json!({ "role": "assistant", "content": message }));
                    }
                    if let Some(plan) = run.plan.as_mut() {
                        for phase in plan.phases.iter_mut() {
                            if !phase.status.is_settled() {
                                phase.status = conduit_types::PhaseStatus::Completed;
                                phase.completed_at = Some(Utc::now());
                            }
                        }
                    }
                    self.transition(run, RunStatus::Completed).await?;
                    return Ok(());
                }
                AgentAction::RequestInput { question } => {
                    self.publish(run, EventType::Message, json!({ "role": "assistant", "content": question }));
                    self.transition(run, RunStatus::WaitingUser).await?;
                    return Ok(());
                }
            }

            run.step_count += 1;
            steps_this_call += 1;
            if steps_this_call % run.config.checkpoint_interval.max(1) == 0 {
                let _ = self.store.save(run).await;
            }

            tokio::time::sleep(StdDuration::from_millis(PACING_INTERVAL_MS)).await;
        }
    }

    /// Re-enters the loop for a run parked in `waiting_user` or `paused` (§6: `resume`
    /// is valid from either). `user_input` is only meaningful coming out of
    /// `waiting_user` — a plain `paused` resume passes an empty string and no message
    /// is published.
    pub async fn resume(&self, run: &mut Run, user_input: &str) -> Result<(), OrchestratorError> {
        if !matches!(run.status, RunStatus::WaitingUser | RunStatus::Paused) {
            return Err(OrchestratorError::new(ErrorCode::InvalidTransition, "resume is only valid from waiting_user or paused"));
        }
        if run.status == RunStatus::WaitingUser && !user_input.is_empty() {
            self.publish(run, EventType::Message, json!({ "role": "user", "content": user_input }));
        }
        self.transition(run, RunStatus::Executing).await?;
        self.drive(run).await
    }

    async fn fail_with_timeout(&self, run: &mut Run) -> Result<(), OrchestratorError> {
        run.error = Some(OrchestratorError::new(ErrorCode::RunTimeout, "run exceeded its step or duration budget").recoverable(false));
        self.transition(run, RunStatus::Timeout).await?;
        Ok(())
    }

    /// Moves a run to `cancelled` in response to an external `stop` (§6). The
    /// in-flight step, if any, is left exactly as `execute_tool_action` last recorded
    /// it — `completed` or already `failed` — rather than rewritten, matching the
    /// "never `failed` from cancellation alone" expectation.
    async fn cancel_run(&self, run: &mut Run) -> Result<(), OrchestratorError> {
        self.transition(run, RunStatus::Cancelled).await
    }

    async fn ensure_plan(&self, run: &mut Run) -> Result<(), OrchestratorError> {
        if run.plan.is_some() {
            return self.transition(run, RunStatus::Executing).await;
        }
        match self.planner.plan(&run.id, &run.prompt, None).await {
            Ok(plan) => {
                self.publish(run, EventType::PlanCreated, json!({ "phase_count": plan.phases.len() }));
                run.plan = Some(plan);
                self.transition(run, RunStatus::Executing).await
            }
            Err(err) => {
                run.error = Some(err.clone());
                self.transition(run, RunStatus::Failed).await?;
                Err(err)
            }
        }
    }

    async fn decide_action(&self, run: &Run, phase_id: u32) -> Result<AgentAction, OrchestratorError> {
        let phase_desc = run.plan.as_ref().and_then(|p| p.phase(phase_id)).map(|p| p.description.clone()).unwrap_or_default();
        let mut last_error = String::new();

        for _ in 0..MAX_DECISION_ATTEMPTS {
            let prompt = decision_prompt(&run.prompt, &phase_desc, &last_error);
            let request = ChatRequest {
                messages: vec![ChatMessage { role: "user".to_string(), content: prompt }],
                model: Some(run.config.model.clone()),
                temperature: Some(run.config.temperature),
                run_id: Some(run.id.clone()),
                ..ChatRequest::default()
            };

            let response = match self.providers.route(request).await {
                Ok(response) => response,
                Err(err) => {
                    last_error = err.to_string();
                    continue;
                }
            };

            let Some(json_span) = extract_first_json_object(&response.content) else {
                last_error = "no JSON object found in decision response".to_string();
                continue;
            };

            match serde_json::from_str::<AgentAction>(&json_span) {
                Ok(action) => return Ok(action),
                Err(err) => {
                    last_error = format!("decision JSON did not match an AgentAction shape: {err}");
                }
            }
        }

        Err(OrchestratorError::new(ErrorCode::DecisionFailed, format!("exhausted {MAX_DECISION_ATTEMPTS} decision attempts: {last_error}")))
    }

    async fn execute_tool_action(
        &self,
        run: &mut Run,
        phase_id: u32,
        tool_name: String,
        tool_input: serde_json::Value,
    ) -> Result<(), OrchestratorError> {
        if !run.config.allows_tool(&tool_name) {
            return self.fail_step(run, ErrorCode::ToolNotAllowed, format!("{tool_name} is not in this run's tools_enabled")).await;
        }
        if !self.tools.has(&tool_name).await {
            return self.fail_step(run, ErrorCode::UnknownTool, format!("no tool registered as {tool_name}")).await;
        }

        let sequence = run.step_count;
        let mut step = Step::new(&run.id, phase_id, sequence, &tool_name, tool_input.clone());

        if let Some(existing) = find_reusable_step(run, &step.idempotency_key) {
            self.publish(run, EventType::ToolCompleted, json!({ "tool_name": tool_name, "reused": true }));
            run.current_step_id = Some(existing.id);
            return Ok(());
        }

        self.publish(run, EventType::ToolStarted, json!({ "tool_name": tool_name, "step_id": step.id }));
        step.status = StepStatus::Running;
        step.started_at = Some(Utc::now());

        let mut attempt = 0u32;
        loop {
            let call = ToolCall {
                tool_name: tool_name.clone(),
                input: tool_input.clone(),
                tenant_id: run.tenant_id.clone(),
                run_id: run.id.clone(),
                step_id: step.id.clone(),
                idempotency_key: step.idempotency_key.clone(),
                timeout_ms: 30_000,
                credit_budget: run.remaining_credits(),
            };
            let result = self.tools.execute(call).await;

            if result.success {
                step.status = StepStatus::Completed;
                step.completed_at = Some(Utc::now());
                step.tool_output = result.output.clone();
                step.duration_ms = Some(result.duration_ms);
                step.tokens_used = result.tokens_used.unwrap_or(0);

                // Billing is the catalog's call, not the handler's: a handler can only report
                // what it did, not what it should cost.
                step.credits_consumed = self.tools.definition(&tool_name).await.map(|def| def.cost_credits).unwrap_or(0);
                if step.credits_consumed > 0 {
                    self.credits.consume(run, step.credits_consumed).await?;
                }

                let artifact_ids = self.record_artifacts(run, &step, &tool_name, &result.artifacts).await;

                self.publish(
                    run,
                    EventType::ToolCompleted,
                    json!({ "tool_name": tool_name, "step_id": step.id, "output": result.output, "artifacts": artifact_ids }),
                );
                run.current_step_id = Some(step.id.clone());
                self.record_step(run, step).await?;
                return Ok(());
            }

            let error = result.error.clone().unwrap_or_else(|| OrchestratorError::new(ErrorCode::ToolFailed, "tool failed with no error detail"));
            if !error.recoverable || attempt >= MAX_TOOL_RETRIES {
                step.status = StepStatus::Failed;
                step.completed_at = Some(Utc::now());
                step.error = Some(error.clone());
                self.record_step(run, step).await?;
                return self.fail_step(run, error.code, error.message).await;
            }

            warn!(tool = %tool_name, attempt, error = %error, "tool_call_retrying");
            attempt += 1;
            step.retry_count = attempt;
            let backoff_ms = (TOOL_RETRY_BASE_MS * 2u64.pow(attempt - 1)).min(TOOL_RETRY_CAP_MS);
            tokio::time::sleep(StdDuration::from_millis(backoff_ms)).await;
        }
    }

    /// Records `error` on the run and drives it to `Failed`, so a failing step always
    /// leaves the run in a terminal state rather than stuck `executing` with an error
    /// field nobody transitions off of.
    async fn fail_step(&self, run: &mut Run, code: ErrorCode, message: impl Into<String>) -> Result<(), OrchestratorError> {
        let error = OrchestratorError::new(code, message);
        run.error = Some(error.clone());
        self.transition(run, RunStatus::Failed).await?;
        Err(error)
    }

    /// Reads each path a tool handler reported emitting, content-addresses it, and saves
    /// it to the Artifact Store Seam (§4.3: "emitted artifacts are recorded"). Creation is
    /// idempotent under the content hash — the hash doubles as the artifact id, so writing
    /// the same bytes twice yields the same id rather than a duplicate record. A path that
    /// can no longer be read (deleted between tool return and this call) is logged and
    /// skipped rather than failing the step; the tool already completed successfully.
    async fn record_artifacts(&self, run: &Run, step: &Step, tool_name: &str, paths: &[String]) -> Vec<String> {
        let mut ids = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = match tokio::fs::read(path).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(tool = %tool_name, path = %path, error = %err, "artifact_read_failed");
                    continue;
                }
            };
            let content_hash = FileArtifactStore::content_hash(&bytes);
            let file_name = std::path::Path::new(path)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.clone());
            let mime_type = mime_guess::from_path(path).first_or_octet_stream().to_string();
            let artifact = Artifact {
                id: content_hash.clone(),
                kind: "file".to_string(),
                mime_type,
                file_name,
                size: bytes.len() as u64,
                storage_path: format!("blobs/{content_hash}"),
                created_by: ArtifactOwner { run_id: run.id.clone(), step_id: step.id.clone(), tool_name: tool_name.to_string() },
                metadata: None,
                parent_artifacts: Vec::new(),
            };
            if let Err(err) = self.artifacts.save(&artifact, &bytes).await {
                warn!(tool = %tool_name, path = %path, error = %err, "artifact_save_failed");
                continue;
            }
            ids.push(artifact.id);
        }
        ids
    }

    /// Appends `step` to the run's own step log and persists the run immediately —
    /// a lease re-acquired by another worker after this worker dies must see this
    /// step as already settled, not re-invoke the tool (§4.3 invariant 3).
    async fn record_step(&self, run: &mut Run, step: Step) -> Result<(), OrchestratorError> {
        run.steps.push(step);
        self.store
            .save(run)
            .await
            .map_err(|err| OrchestratorError::new(ErrorCode::InvalidRequest, format!("failed to persist run: {err}")))
    }
}

fn find_reusable_step(run: &Run, idempotency_key: &str) -> Option<Step> {
    run.steps
        .iter()
        .find(|step| step.idempotency_key == idempotency_key && step.status.is_terminal())
        .cloned()
}

fn decision_prompt(prompt: &str, phase_description: &str, repair_reason: &str) -> String {
    let repair = if repair_reason.is_empty() {
        String::new()
    } else {
        format!(" Your previous response was rejected: {repair_reason}. Return ONLY the JSON object.")
    };
    format!(
        "Task: {prompt}\nCurrent phase: {phase_description}\n\
         Respond with a single JSON object describing your next action, one of:\n\
         {{\"kind\": \"tool\", \"tool_name\": string, \"tool_input\": object}}\n\
         {{\"kind\": \"message\", \"content\": string}}\n\
         {{\"kind\": \"phase_complete\"}}\n\
         {{\"kind\": \"task_complete\", \"message\": string}}\n\
         {{\"kind\": \"request_input\", \"question\": string}}{repair}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conduit_providers::ProviderAdapter;
    use conduit_types::{ChatResponse, ProviderFormat, RunConfig, TokenUsage};
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    struct ScriptedAdapter {
        id: String,
        responses: Arc<RwLock<Vec<String>>>,
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedAdapter {
        fn provider_id(&self) -> &str {
            &self.id
        }

        fn format(&self) -> ProviderFormat {
            ProviderFormat::Google
        }

        async fn complete(&self, _request: &ChatRequest, model: &str) -> anyhow::Result<ChatResponse> {
            let mut responses = self.responses.write().await;
            if responses.is_empty() {
                anyhow::bail!("scripted adapter exhausted");
            }
            let content = responses.remove(0);
            Ok(ChatResponse {
                id: "resp-1".to_string(),
                model: model.to_string(),
                provider: self.id.clone(),
                content,
                finish_reason: "stop".to_string(),
                usage: TokenUsage { prompt: 10, completion: 10, total: 20 },
                latency_ms: 5,
            })
        }
    }

    struct InMemoryRunStore {
        runs: RwLock<HashMap<String, Run>>,
    }

    #[async_trait]
    impl crate::persistence::RunStore for InMemoryRunStore {
        async fn save(&self, run: &Run) -> anyhow::Result<()> {
            self.runs.write().await.insert(run.id.clone(), run.clone());
            Ok(())
        }
        async fn load(&self, run_id: &str) -> anyhow::Result<Option<Run>> {
            Ok(self.runs.read().await.get(run_id).cloned())
        }
        async fn list_by_tenant(&self, _tenant_id: &str) -> anyhow::Result<Vec<Run>> {
            Ok(vec![])
        }
        async fn delete(&self, run_id: &str) -> anyhow::Result<()> {
            self.runs.write().await.remove(run_id);
            Ok(())
        }
    }

    struct InMemoryArtifactStore {
        saved: RwLock<HashMap<String, (Artifact, Vec<u8>)>>,
    }

    #[async_trait]
    impl ArtifactStore for InMemoryArtifactStore {
        async fn save(&self, artifact: &Artifact, bytes: &[u8]) -> anyhow::Result<()> {
            self.saved.write().await.insert(artifact.id.clone(), (artifact.clone(), bytes.to_vec()));
            Ok(())
        }
        async fn load_metadata(&self, artifact_id: &str) -> anyhow::Result<Option<Artifact>> {
            Ok(self.saved.read().await.get(artifact_id).map(|(artifact, _)| artifact.clone()))
        }
        async fn load_bytes(&self, artifact_id: &str) -> anyhow::Result<Option<Vec<u8>>> {
            Ok(self.saved.read().await.get(artifact_id).map(|(_, bytes)| bytes.clone()))
        }
    }

    fn new_supervisor(scripted_responses: Vec<&str>) -> Supervisor {
        new_supervisor_with_tools(scripted_responses, ToolRegistry::new())
    }

    fn new_supervisor_with_tools(scripted_responses: Vec<&str>, tools: ToolRegistry) -> Supervisor {
        let mut registry = ProviderRegistry::new();
        registry.register_adapter(Arc::new(ScriptedAdapter {
            id: "google".to_string(),
            responses: Arc::new(RwLock::new(scripted_responses.into_iter().map(String::from).collect())),
        }));
        // The planner's ChatRequest omits `model`, so it resolves through the router's
        // hard default; the decision loop always sets `run.config.model` explicitly.
        registry.register_model(conduit_providers::DEFAULT_MODEL, "google");
        registry.register_model("gemini-2.5-flash", "google");

        let tools = Arc::new(tools);
        let store: SharedRunStore = Arc::new(InMemoryRunStore { runs: RwLock::new(HashMap::new()) });
        let artifacts: SharedArtifactStore = Arc::new(InMemoryArtifactStore { saved: RwLock::new(HashMap::new()) });
        Supervisor::new(Arc::new(registry), tools, store, artifacts, EventStream::default(), CreditManager::new())
    }

    fn new_run() -> Run {
        let mut run = Run::new("run-1".to_string(), "tenant-1".to_string(), "user-1".to_string(), "summarize x".to_string(), RunConfig::default());
        run.credits_reserved = 100;
        run
    }

    #[tokio::test]
    async fn happy_path_completes_via_task_complete_action() {
        let plan_response = r#"{"goal": "summarize", "phases": [
            {"title": "research", "description": "gather facts", "capabilities": [], "estimated_steps": 1},
            {"title": "deliver summary", "description": "send final report", "capabilities": [], "estimated_steps": 1}
        ]}"#;
        let decision_response = r#"{"kind": "task_complete", "message": "done"}"#;

        let supervisor = new_supervisor(vec![plan_response, decision_response]);
        let mut run = new_run();
        run.status = RunStatus::Queued;

        supervisor.drive(&mut run).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.completed_at.is_some());
    }

    #[tokio::test]
    async fn request_input_parks_run_in_waiting_user() {
        let plan_response = r#"{"goal": "summarize", "phases": [
            {"title": "research", "description": "gather facts", "capabilities": [], "estimated_steps": 1},
            {"title": "deliver summary", "description": "send final report", "capabilities": [], "estimated_steps": 1}
        ]}"#;
        let decision_response = r#"{"kind": "request_input", "question": "which dataset?"}"#;

        let supervisor = new_supervisor(vec![plan_response, decision_response]);
        let mut run = new_run();
        run.status = RunStatus::Queued;

        supervisor.drive(&mut run).await.unwrap();
        assert_eq!(run.status, RunStatus::WaitingUser);
    }

    #[tokio::test]
    async fn unrecognized_tool_fails_the_run_non_recoverably() {
        let plan_response = r#"{"goal": "summarize", "phases": [
            {"title": "research", "description": "gather facts", "capabilities": [], "estimated_steps": 1},
            {"title": "deliver summary", "description": "send final report", "capabilities": [], "estimated_steps": 1}
        ]}"#;
        let decision_response = r#"{"kind": "tool", "tool_name": "nonexistent_tool", "tool_input": {}}"#;

        let supervisor = new_supervisor(vec![plan_response, decision_response]);
        let mut run = new_run();
        run.status = RunStatus::Queued;

        let err = supervisor.drive(&mut run).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownTool);
        assert_eq!(run.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn max_steps_exhaustion_times_out_the_run() {
        let plan_response = r#"{"goal": "summarize", "phases": [
            {"title": "research", "description": "gather facts", "capabilities": [], "estimated_steps": 1},
            {"title": "deliver summary", "description": "send final report", "capabilities": [], "estimated_steps": 1}
        ]}"#;
        let message_response = r#"{"kind": "message", "content": "still working"}"#;

        let responses: Vec<&str> = std::iter::once(plan_response).chain(std::iter::repeat(message_response).take(5)).collect();
        let supervisor = new_supervisor(responses);
        let mut run = new_run();
        run.status = RunStatus::Queued;
        run.config.max_steps = 2;

        supervisor.drive(&mut run).await.unwrap();
        assert_eq!(run.status, RunStatus::Timeout);
        assert_eq!(run.error.as_ref().unwrap().code, ErrorCode::RunTimeout);
    }

    #[tokio::test]
    async fn cancel_mid_run_transitions_to_cancelled_not_failed() {
        let plan_response = r#"{"goal": "summarize", "phases": [
            {"title": "research", "description": "gather facts", "capabilities": [], "estimated_steps": 1},
            {"title": "deliver summary", "description": "send final report", "capabilities": [], "estimated_steps": 1}
        ]}"#;
        let message_response = r#"{"kind": "message", "content": "still working"}"#;
        let responses: Vec<&str> = std::iter::once(plan_response).chain(std::iter::repeat(message_response).take(20)).collect();

        let supervisor = Arc::new(new_supervisor(responses));
        let mut run = new_run();
        run.status = RunStatus::Queued;
        let run_id = run.id.clone();

        let driver = {
            let supervisor = supervisor.clone();
            tokio::spawn(async move {
                supervisor.drive(&mut run).await.unwrap();
                run
            })
        };

        tokio::time::sleep(StdDuration::from_millis(PACING_INTERVAL_MS * 2)).await;
        assert!(supervisor.cancel(&run_id).await);

        let run = driver.await.unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn credits_are_finalized_on_successful_completion() {
        let plan_response = r#"{"goal": "summarize", "phases": [
            {"title": "research", "description": "gather facts", "capabilities": [], "estimated_steps": 1},
            {"title": "deliver summary", "description": "send final report", "capabilities": [], "estimated_steps": 1}
        ]}"#;
        let decision_response = r#"{"kind": "task_complete", "message": null}"#;

        let supervisor = new_supervisor(vec![plan_response, decision_response]);
        let mut run = new_run();
        run.status = RunStatus::Queued;
        supervisor.credits.reserve(&mut run, 100).await.unwrap();

        supervisor.drive(&mut run).await.unwrap();
        let reservation = supervisor.credits.reservation_for(&run.id).await.unwrap();
        assert_eq!(reservation.status, conduit_types::ReservationStatus::Consumed);
    }

    struct WritesFileTool {
        path: std::path::PathBuf,
    }

    #[async_trait]
    impl conduit_tools::Tool for WritesFileTool {
        async fn call(&self, _input: serde_json::Value, _ctx: &conduit_tools::ToolExecutionContext) -> anyhow::Result<serde_json::Value> {
            tokio::fs::write(&self.path, b"report").await?;
            Ok(json!({ "artifacts": [self.path.to_string_lossy()] }))
        }
    }

    fn demo_write_definition() -> conduit_types::ToolDefinition {
        conduit_types::ToolDefinition {
            name: "demo_write".to_string(),
            category: conduit_types::ToolCategory::File,
            parameters_schema: json!({}),
            required_capabilities: Vec::new(),
            timeout_ms: 5_000,
            cost_credits: 7,
            rate_limit: conduit_types::RateLimitSpec { per_minute: 60, per_hour: 600, concurrent: 4 },
            idempotent: false,
        }
    }

    #[tokio::test]
    async fn successful_tool_step_charges_catalog_cost_and_records_its_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");

        let plan_response = r#"{"goal": "summarize", "phases": [
            {"title": "research", "description": "gather facts", "capabilities": [], "estimated_steps": 1},
            {"title": "deliver summary", "description": "send final report", "capabilities": [], "estimated_steps": 1}
        ]}"#;
        let tool_response = r#"{"kind": "tool", "tool_name": "demo_write", "tool_input": {}}"#;
        let complete_response = r#"{"kind": "task_complete", "message": null}"#;

        let tools = ToolRegistry::new();
        tools.register(demo_write_definition(), Arc::new(WritesFileTool { path: path.clone() })).await;

        let supervisor = new_supervisor_with_tools(vec![plan_response, tool_response, complete_response], tools);
        let mut run = new_run();
        run.status = RunStatus::Queued;
        supervisor.credits.reserve(&mut run, 100).await.unwrap();

        supervisor.drive(&mut run).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.steps.len(), 1);
        assert_eq!(run.steps[0].credits_consumed, 7);
        assert_eq!(run.credits_consumed, 7);

        let content_hash = FileArtifactStore::content_hash(b"report");
        let saved = supervisor.artifacts.load_bytes(&content_hash).await.unwrap();
        assert_eq!(saved, Some(b"report".to_vec()));
    }
}

use std::sync::Arc;

use conduit_providers::ProviderRegistry;
use conduit_types::{
    Capability, ChatMessage, ChatRequest, ErrorCode, OrchestratorError, Phase, PhaseStatus, Plan, PlanMetadata, PlanTokens,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Instant;

const MAX_PLANNING_ATTEMPTS: u32 = 3;

#[derive(Debug, Deserialize)]
struct RawPhase {
    title: String,
    description: String,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default = "default_estimated_steps")]
    estimated_steps: u32,
}

fn default_estimated_steps() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    goal: String,
    phases: Vec<RawPhase>,
}

/// Turns a prompt into a validated `Plan` via the LLM Router (§4.4). The response is
/// expected to be a JSON object; anything the model wraps it in (markdown fences,
/// leading prose) is tolerated by scanning for the first balanced `{...}` span rather
/// than requiring the whole response to parse as JSON.
pub struct Planner {
    providers: Arc<ProviderRegistry>,
}

impl Planner {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self { providers }
    }

    pub async fn plan(&self, run_id: &str, prompt: &str, capability_hint: Option<Capability>) -> Result<Plan, OrchestratorError> {
        let mut last_error = String::new();

        for attempt in 1..=MAX_PLANNING_ATTEMPTS {
            let started = Instant::now();
            let instructions = if attempt == 1 {
                planning_instructions(prompt, capability_hint)
            } else {
                repair_instructions(prompt, capability_hint, &last_error)
            };

            let request = ChatRequest {
                messages: vec![ChatMessage { role: "user".to_string(), content: instructions }],
                run_id: Some(run_id.to_string()),
                capability: capability_hint.map(|c| c.as_str().to_string()),
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
                last_error = "no JSON object found in planner response".to_string();
                continue;
            };

            let raw: RawPlan = match serde_json::from_str(&json_span) {
                Ok(raw) => raw,
                Err(err) => {
                    last_error = format!("plan JSON did not match expected shape: {err}");
                    continue;
                }
            };

            match build_plan(raw, attempt, &response.model, response.usage.prompt, response.usage.completion, started.elapsed().as_millis() as u64) {
                Ok(plan) => return Ok(plan),
                Err(reason) => {
                    last_error = reason;
                    continue;
                }
            }
        }

        Err(OrchestratorError::new(
            ErrorCode::PlanningFailed,
            format!("planner exhausted {MAX_PLANNING_ATTEMPTS} attempts: {last_error}"),
        ))
    }
}

fn build_plan(raw: RawPlan, attempt: u32, model: &str, input_tokens: u64, output_tokens: u64, generation_time_ms: u64) -> Result<Plan, String> {
    if raw.phases.len() < 2 || raw.phases.len() > 15 {
        return Err(format!("plan has {} phases, expected 2-15", raw.phases.len()));
    }

    let mut phases = Vec::with_capacity(raw.phases.len());
    for (idx, raw_phase) in raw.phases.into_iter().enumerate() {
        let mut capabilities = HashSet::new();
        for name in &raw_phase.capabilities {
            let Some(capability) = Capability::from_str(name) else {
                return Err(format!("unrecognized capability {name:?}"));
            };
            capabilities.insert(capability);
        }
        phases.push(Phase {
            id: (idx as u32) + 1,
            title: raw_phase.title,
            description: raw_phase.description,
            capabilities,
            estimated_steps: raw_phase.estimated_steps,
            status: PhaseStatus::Pending,
            started_at: None,
            completed_at: None,
            steps_completed: 0,
        });
    }

    let last = phases.last().expect("validated len >= 2");
    if !is_delivery_phase(last) {
        return Err("last phase is not recognizable as a delivery phase".to_string());
    }

    let plan = Plan {
        version: 1,
        goal: raw.goal,
        phases,
        current_phase_id: 1,
        metadata: PlanMetadata {
            attempt,
            model: model.to_string(),
            tokens: PlanTokens { input: input_tokens, output: output_tokens },
            generation_time_ms,
        },
    };

    if !plan.validate_ordering() {
        return Err("plan failed phase ordering validation".to_string());
    }

    Ok(plan)
}

fn is_delivery_phase(phase: &Phase) -> bool {
    let haystack = format!("{} {}", phase.title, phase.description).to_lowercase();
    haystack.contains("deliver") || haystack.contains("summar") || haystack.contains("final") || haystack.contains("report")
}

fn planning_instructions(prompt: &str, capability_hint: Option<Capability>) -> String {
    let hint = capability_hint.map(|c| format!(" The primary capability needed is {}.", c.as_str())).unwrap_or_default();
    format!(
        "Produce a plan for the following task as a single JSON object: {{\"goal\": string, \"phases\": [{{\"title\": string, \"description\": string, \"capabilities\": string[], \"estimated_steps\": number}}]}}. \
         Use 2 to 15 phases, the last of which must deliver the final result to the user. Task: {prompt}.{hint} Respond with ONLY the JSON object."
    )
}

fn repair_instructions(prompt: &str, capability_hint: Option<Capability>, reason: &str) -> String {
    format!(
        "{} Your previous response was rejected: {reason}. Return ONLY a single valid JSON object matching the schema, with no prose, no markdown fences.",
        planning_instructions(prompt, capability_hint)
    )
}

use crate::extract_first_json_object;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_plan_rejects_too_few_phases() {
        let raw = RawPlan { goal: "g".to_string(), phases: vec![RawPhase { title: "only".to_string(), description: "one phase".to_string(), capabilities: vec![], estimated_steps: 1 }] };
        assert!(build_plan(raw, 1, "model", 0, 0, 0).is_err());
    }

    #[test]
    fn build_plan_rejects_non_delivery_last_phase() {
        let raw = RawPlan {
            goal: "g".to_string(),
            phases: vec![
                RawPhase { title: "research".to_string(), description: "look things up".to_string(), capabilities: vec!["web_search".to_string()], estimated_steps: 2 },
                RawPhase { title: "draft".to_string(), description: "write something".to_string(), capabilities: vec![], estimated_steps: 2 },
            ],
        };
        assert!(build_plan(raw, 1, "model", 0, 0, 0).is_err());
    }

    #[test]
    fn build_plan_accepts_valid_plan_with_delivery_phase() {
        let raw = RawPlan {
            goal: "g".to_string(),
            phases: vec![
                RawPhase { title: "research".to_string(), description: "look things up".to_string(), capabilities: vec!["web_search".to_string()], estimated_steps: 2 },
                RawPhase { title: "deliver summary".to_string(), description: "send the final report".to_string(), capabilities: vec![], estimated_steps: 1 },
            ],
        };
        let plan = build_plan(raw, 1, "model", 10, 20, 5).unwrap();
        assert_eq!(plan.phases.len(), 2);
        assert!(plan.validate_ordering());
    }
}

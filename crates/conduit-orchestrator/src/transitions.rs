use chrono::{DateTime, Utc};
use conduit_types::{ErrorCode, EventType, OrchestratorError, Run, RunStatus};
use serde_json::{json, Value};

/// Side-effects the caller (the Supervisor / Dispatcher) must perform after a transition is
/// durably persisted. Mirrors the orchestrator model lineage's reduce-to-(state, commands)
/// shape, specialized to Run instead of Mission.
#[derive(Debug, Clone)]
pub enum RunCommand {
    Enqueue,
    ReleaseCredits { run_id: String },
    FinalizeCredits { run_id: String },
    EmitEvent { event_type: EventType, payload: Value },
}

fn terminal_commands(run: &Run, completed: bool) -> Vec<RunCommand> {
    let credit_cmd = if completed {
        RunCommand::FinalizeCredits { run_id: run.id.clone() }
    } else {
        RunCommand::ReleaseCredits { run_id: run.id.clone() }
    };
    let status_event = if completed {
        EventType::TaskCompleted
    } else {
        EventType::TaskFailed
    };
    vec![
        credit_cmd,
        RunCommand::EmitEvent {
            event_type: status_event,
            payload: json!({ "run_id": run.id, "status": run.status.as_str() }),
        },
        RunCommand::EmitEvent {
            event_type: EventType::StreamEnd,
            payload: json!({ "run_id": run.id }),
        },
    ]
}

/// §4.1's transition table as a pure guard check, independent of persistence. Returns
/// `INVALID_TRANSITION` for anything not in the table, and the guard-specific code otherwise.
pub fn guard_transition(run: &Run, target: RunStatus) -> Result<(), OrchestratorError> {
    use RunStatus::*;
    let legal = match (run.status, target) {
        (Pending, Queued) => {
            if run.credits_reserved == 0 {
                return Err(OrchestratorError::new(
                    ErrorCode::InvalidTransition,
                    "cannot move pending -> queued without a positive credit reservation",
                ));
            }
            true
        }
        (Pending, Cancelled) | (Pending, Failed) => true,
        (Queued, Planning) | (Queued, Cancelled) | (Queued, Timeout) => true,
        (Planning, Executing) => {
            if run.plan.is_none() {
                return Err(OrchestratorError::new(
                    ErrorCode::InvalidTransition,
                    "cannot move planning -> executing before a plan is persisted",
                ));
            }
            true
        }
        (Planning, Failed) | (Planning, Cancelled) => true,
        (Executing, Executing) => true,
        (Executing, Paused) | (Executing, WaitingUser) => true,
        (Executing, Completed) => {
            let all_settled = run.plan.as_ref().map(|p| p.all_settled()).unwrap_or(false);
            if !all_settled {
                return Err(OrchestratorError::new(
                    ErrorCode::InvalidTransition,
                    "cannot move executing -> completed while phases remain unsettled",
                ));
            }
            true
        }
        (Executing, Failed) | (Executing, Cancelled) | (Executing, Timeout) => true,
        (Paused, Executing) | (Paused, Cancelled) => true,
        (WaitingUser, Executing) | (WaitingUser, Cancelled) | (WaitingUser, Timeout) => true,
        // A worker's lease can expire mid-phase (dead process, network partition); the
        // reaper returns the run to `queued` for another worker to pick up rather than
        // failing it outright, as long as retries remain (§4.2). `paused`/`waiting_user`
        // intentionally have no requeue edge here — a lapsed lease in those states is
        // expected (§5), not a dead worker, so the reaper routes them through `timeout`
        // or leaves them alone instead.
        (Planning, Queued) | (Executing, Queued) => true,
        _ => false,
    };

    if legal {
        Ok(())
    } else {
        Err(OrchestratorError::new(
            ErrorCode::InvalidTransition,
            format!(
                "no transition from {} to {}",
                run.status.as_str(),
                target.as_str()
            ),
        ))
    }
}

/// Applies a guarded transition, returning the mutated Run and the commands the caller owes
/// the rest of the system. Does not perform the `(id, version)` optimistic-concurrency check
/// itself — that's the Persistence Seam's job on write; this function assumes `run` is the
/// freshly read row the caller is about to persist.
pub fn apply_transition(
    run: &Run,
    target: RunStatus,
    now: DateTime<Utc>,
) -> Result<(Run, Vec<RunCommand>), OrchestratorError> {
    guard_transition(run, target)?;

    let mut next = run.clone();
    next.status = target;
    next.version += 1;

    let mut commands = Vec::new();

    match target {
        RunStatus::Queued => commands.push(RunCommand::Enqueue),
        RunStatus::Completed => {
            next.completed_at = Some(now);
            commands.extend(terminal_commands(&next, true));
        }
        RunStatus::Failed | RunStatus::Cancelled | RunStatus::Timeout => {
            next.completed_at = Some(now);
            commands.extend(terminal_commands(&next, false));
        }
        RunStatus::Planning => {
            if next.started_at.is_none() {
                next.started_at = Some(now);
            }
            if next.timeout_at.is_none() {
                next.timeout_at = Some(now + chrono::Duration::seconds(next.config.max_duration_seconds as i64));
            }
        }
        _ => {}
    }

    Ok((next, commands))
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_types::{Phase, PhaseStatus, Plan, PlanMetadata, PlanTokens, RunConfig};
    use std::collections::HashSet;

    fn base_run(status: RunStatus) -> Run {
        let mut run = Run::new(
            "run-1".to_string(),
            "tenant-1".to_string(),
            "user-1".to_string(),
            "do the thing".to_string(),
            RunConfig::default(),
        );
        run.status = status;
        run
    }

    fn base_plan(all_settled: bool) -> Plan {
        Plan {
            version: 1,
            goal: "do the thing".to_string(),
            phases: vec![
                Phase {
                    id: 1,
                    title: "research".to_string(),
                    description: String::new(),
                    capabilities: HashSet::new(),
                    estimated_steps: 2,
                    status: if all_settled { PhaseStatus::Completed } else { PhaseStatus::Executing },
                    started_at: None,
                    completed_at: None,
                    steps_completed: 0,
                },
                Phase {
                    id: 2,
                    title: "deliver".to_string(),
                    description: String::new(),
                    capabilities: HashSet::new(),
                    estimated_steps: 1,
                    status: if all_settled { PhaseStatus::Completed } else { PhaseStatus::Pending },
                    started_at: None,
                    completed_at: None,
                    steps_completed: 0,
                },
            ],
            current_phase_id: 1,
            metadata: PlanMetadata {
                attempt: 1,
                model: "gemini-2.5-flash".to_string(),
                tokens: PlanTokens::default(),
                generation_time_ms: 10,
            },
        }
    }

    #[test]
    fn pending_to_queued_requires_reservation() {
        let run = base_run(RunStatus::Pending);
        let err = apply_transition(&run, RunStatus::Queued, Utc::now()).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidTransition);
    }

    #[test]
    fn pending_to_queued_succeeds_with_reservation() {
        let mut run = base_run(RunStatus::Pending);
        run.credits_reserved = 100;
        let (next, commands) = apply_transition(&run, RunStatus::Queued, Utc::now()).unwrap();
        assert_eq!(next.status, RunStatus::Queued);
        assert_eq!(next.version, 1);
        assert!(matches!(commands[0], RunCommand::Enqueue));
    }

    #[test]
    fn planning_to_executing_requires_plan() {
        let run = base_run(RunStatus::Planning);
        let err = apply_transition(&run, RunStatus::Executing, Utc::now()).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidTransition);
    }

    #[test]
    fn executing_to_completed_requires_all_phases_settled() {
        let mut run = base_run(RunStatus::Executing);
        run.plan = Some(base_plan(false));
        let err = apply_transition(&run, RunStatus::Completed, Utc::now()).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidTransition);

        run.plan = Some(base_plan(true));
        let (next, commands) = apply_transition(&run, RunStatus::Completed, Utc::now()).unwrap();
        assert_eq!(next.status, RunStatus::Completed);
        assert!(next.completed_at.is_some());
        assert!(commands
            .iter()
            .any(|c| matches!(c, RunCommand::FinalizeCredits { .. })));
        assert!(commands
            .iter()
            .any(|c| matches!(c, RunCommand::EmitEvent { event_type: EventType::StreamEnd, .. })));
    }

    #[test]
    fn failed_run_releases_rather_than_finalizes() {
        let mut run = base_run(RunStatus::Executing);
        run.plan = Some(base_plan(false));
        let (next, commands) = apply_transition(&run, RunStatus::Failed, Utc::now()).unwrap();
        assert_eq!(next.status, RunStatus::Failed);
        assert!(commands
            .iter()
            .any(|c| matches!(c, RunCommand::ReleaseCredits { .. })));
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for terminal in [RunStatus::Completed, RunStatus::Failed, RunStatus::Cancelled, RunStatus::Timeout] {
            let run = base_run(terminal);
            for target in [RunStatus::Executing, RunStatus::Queued, RunStatus::Pending] {
                assert!(apply_transition(&run, target, Utc::now()).is_err());
            }
        }
    }

    #[test]
    fn entering_planning_stamps_timeout_at_from_max_duration() {
        let mut run = base_run(RunStatus::Queued);
        run.config.max_duration_seconds = 5;
        let now = Utc::now();
        let (next, _) = apply_transition(&run, RunStatus::Planning, now).unwrap();
        let deadline = next.timeout_at.expect("timeout_at must be stamped on entering planning");
        assert_eq!(deadline, now + chrono::Duration::seconds(5));

        // Re-entering planning (e.g. via the reaper's requeue-then-replan path) must not
        // push the deadline out further.
        let (replanned, _) = apply_transition(&next, RunStatus::Queued, now).unwrap();
        let (replanned, _) = apply_transition(&replanned, RunStatus::Planning, now + chrono::Duration::seconds(2)).unwrap();
        assert_eq!(replanned.timeout_at, Some(deadline));
    }

    #[test]
    fn version_is_monotonic() {
        let mut run = base_run(RunStatus::Pending);
        run.credits_reserved = 10;
        let (after_queue, _) = apply_transition(&run, RunStatus::Queued, Utc::now()).unwrap();
        assert_eq!(after_queue.version, run.version + 1);
        let (after_planning, _) = apply_transition(&after_queue, RunStatus::Planning, Utc::now()).unwrap();
        assert_eq!(after_planning.version, after_queue.version + 1);
    }
}

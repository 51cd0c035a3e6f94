//! Plan executor.
//!
//! Runs a [`Plan`] in waves. A wave is every pending step whose predecessors
//! have all committed; its provider calls run concurrently (bounded by
//! `max_parallelism`) and the next wave starts only after the whole wave has
//! settled. State is written back as each step commits, one write at a time
//! from the coordinating loop.
//!
//! A failed step marks everything downstream of it `Skipped`; independent
//! branches keep going. Failed and skipped steps leave their applied state
//! untouched, so the next run retries exactly that subset.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use strata_core::{
    Action, AppliedState, AppliedStates, Composition, Outputs, Plan, PlanStep, Planner,
    Properties, Reference,
};
use strata_state::StateStore;

use crate::config::{EngineConfig, RetryPolicy};
use crate::error::{EngineResult, ProviderError, ProviderResult, SkipReason, StepFailure};
use crate::provider::{
    CreateRequest, Created, DeleteRequest, IdempotencyKey, ResourceProvider, UpdateRequest,
};
use crate::report::{RunOutcome, RunReport, StepReport, StepState};

/// Applies plans against a provider and records the results in a state store.
pub struct Executor {
    provider: Arc<dyn ResourceProvider>,
    store: Arc<dyn StateStore>,
    config: EngineConfig,
}

impl Executor {
    pub fn new(
        provider: Arc<dyn ResourceProvider>,
        store: Arc<dyn StateStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            store,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Plan a composition against the store's current state.
    ///
    /// A state store that cannot be read is fatal: diffing against untrusted
    /// state is unsafe.
    pub fn plan(&self, composition: &Composition) -> EngineResult<Plan> {
        let applied = self.store.load()?;
        Ok(Planner::new().plan(composition, &applied)?)
    }

    /// Execute `plan`. Raising `cancel` stops new waves from being dispatched;
    /// calls already sent to the provider are allowed to finish.
    pub async fn apply(&self, plan: &Plan, cancel: &CancellationToken) -> EngineResult<RunReport> {
        self.config.validate()?;
        let prior = self.store.load()?;
        let started_at = Utc::now();
        let mut run = RunState::new(plan);
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallelism));

        info!(
            "Applying plan with {} steps via provider '{}'",
            plan.len(),
            self.provider.name()
        );

        loop {
            let runnable = run.runnable(plan);
            if runnable.is_empty() {
                break;
            }
            if cancel.is_cancelled() {
                warn!("Run cancelled; {} steps not dispatched", run.pending_count());
                run.skip_pending(SkipReason::Cancelled);
                break;
            }

            run.waves += 1;
            info!("Wave {}: {} runnable steps", run.waves, runnable.len());

            let mut join_set = JoinSet::new();
            for index in runnable {
                let step = &plan.steps[index];
                run.states[index] = StepState::Resolving;
                match self.prepare(step, &run.outputs, &prior) {
                    Prepared::Done(outputs) => {
                        debug!("{} committed without provider call", step.logical_path);
                        run.outputs.insert(step.logical_path.clone(), outputs);
                        run.states[index] = StepState::Committed;
                    }
                    Prepared::Failed(failure) => {
                        run.fail(plan, index, failure);
                    }
                    Prepared::Call(call) => {
                        run.states[index] = StepState::Applying;
                        run.provider_called[index] = true;
                        join_set.spawn(
                            StepTask {
                                index,
                                provider: self.provider.clone(),
                                call,
                                timeout: self.config.timeout_for(&step.kind),
                                retry: self.config.retry.clone(),
                                semaphore: semaphore.clone(),
                                cancel: cancel.clone(),
                            }
                            .run(),
                        );
                    }
                }
            }

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((index, attempts, end)) => {
                        run.attempts[index] = attempts;
                        self.settle(plan, &mut run, index, end);
                    }
                    Err(join_err) => {
                        error!(?join_err, "step task panicked");
                    }
                }
            }

            // A task that panicked never reported back.
            let lost: Vec<usize> = (0..plan.len())
                .filter(|i| matches!(run.states[*i], StepState::Applying))
                .collect();
            for index in lost {
                run.fail(
                    plan,
                    index,
                    StepFailure::Provider {
                        cause: ProviderError::internal("step task panicked"),
                    },
                );
            }
        }

        // Steps whose `after` edges point nowhere or form a loop.
        let stranded = run.pending_count();
        if stranded > 0 {
            warn!("{} steps could never become runnable", stranded);
            for state in &mut run.states {
                if state.is_pending() {
                    *state = StepState::Skipped {
                        reason: SkipReason::Unreachable,
                    };
                }
            }
        }

        Ok(run.into_report(plan, started_at))
    }

    /// Resolve a step's references and decide whether the provider is needed.
    fn prepare(
        &self,
        step: &PlanStep,
        outputs: &HashMap<String, Outputs>,
        prior: &AppliedStates,
    ) -> Prepared {
        match step.action {
            Action::NoOp => match prior.get(&step.logical_path) {
                Some(state) => Prepared::Done(state.outputs.clone()),
                None => Prepared::Failed(StepFailure::State {
                    message: format!("no applied state for {}", step.logical_path),
                }),
            },
            Action::Delete => match &step.provider_id {
                Some(id) => Prepared::Call(ProviderCall::Delete(DeleteRequest {
                    logical_path: step.logical_path.clone(),
                    kind: step.kind.clone(),
                    provider_id: id.clone(),
                })),
                None => Prepared::Failed(StepFailure::State {
                    message: format!("no provider id recorded for {}", step.logical_path),
                }),
            },
            Action::Create | Action::Update => {
                let lookup = |r: &Reference| {
                    outputs
                        .get(&r.target)
                        .and_then(|o| o.get(&r.attribute))
                        .cloned()
                };
                let resolved = step.properties.resolve_with(&lookup);
                let json = match resolved.to_json() {
                    Ok(json) => json,
                    Err(missing) => {
                        return Prepared::Failed(StepFailure::Unresolved {
                            target: missing.target,
                            attribute: missing.attribute,
                        })
                    }
                };

                if step.action == Action::Create {
                    return Prepared::Call(ProviderCall::Create {
                        request: CreateRequest {
                            logical_path: step.logical_path.clone(),
                            kind: step.kind.clone(),
                            properties: json,
                            idempotency_key: IdempotencyKey::for_resource(
                                &step.kind,
                                &step.logical_path,
                            ),
                        },
                        resolved,
                    });
                }

                if step.previous.as_ref() == Some(&resolved) {
                    if let Some(state) = prior.get(&step.logical_path) {
                        return Prepared::Done(state.outputs.clone());
                    }
                }
                match &step.provider_id {
                    Some(id) => Prepared::Call(ProviderCall::Update {
                        request: UpdateRequest {
                            logical_path: step.logical_path.clone(),
                            kind: step.kind.clone(),
                            provider_id: id.clone(),
                            properties: json,
                        },
                        resolved,
                    }),
                    None => Prepared::Failed(StepFailure::State {
                        message: format!("no provider id recorded for {}", step.logical_path),
                    }),
                }
            }
        }
    }

    /// Record the end of a provider call: persist on success, fail otherwise.
    fn settle(&self, plan: &Plan, run: &mut RunState, index: usize, end: TaskEnd) {
        let step = &plan.steps[index];
        match end {
            TaskEnd::NotStarted => {
                warn!("{} not dispatched: run cancelled", step.logical_path);
                run.provider_called[index] = false;
                run.states[index] = StepState::Skipped {
                    reason: SkipReason::Cancelled,
                };
                run.skip_dependents(plan, index);
            }
            TaskEnd::Failed(failure) => {
                error!("{} ({}) failed: {}", step.logical_path, step.action, failure);
                run.fail(plan, index, failure);
            }
            TaskEnd::Deleted => match self.store.remove(&step.logical_path) {
                Ok(()) => {
                    info!("Deleted {}", step.logical_path);
                    run.states[index] = StepState::Committed;
                }
                Err(e) => run.fail(plan, index, StepFailure::State { message: e.to_string() }),
            },
            TaskEnd::Applied {
                provider_id,
                outputs,
                properties,
            } => {
                let state = AppliedState {
                    logical_path: step.logical_path.clone(),
                    kind: step.kind.clone(),
                    last_properties: properties,
                    provider_id,
                    outputs: outputs.clone(),
                    dependencies: step.dependencies.clone(),
                    applied_at: Utc::now(),
                };
                match self.store.commit(&step.logical_path, state) {
                    Ok(()) => {
                        info!("{} {}", past_tense(step.action.as_str()), step.logical_path);
                        run.outputs.insert(step.logical_path.clone(), outputs);
                        run.states[index] = StepState::Committed;
                    }
                    Err(e) => run.fail(plan, index, StepFailure::State { message: e.to_string() }),
                }
            }
        }
    }
}

fn past_tense(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>() + "d",
        None => String::new(),
    }
}

/// Mutable bookkeeping of one run.
struct RunState {
    states: Vec<StepState>,
    attempts: Vec<u32>,
    provider_called: Vec<bool>,
    /// Outputs captured this run, by logical path.
    outputs: HashMap<String, Outputs>,
    /// step index -> indices of steps that wait for it
    dependents: Vec<BTreeSet<usize>>,
    waves: usize,
    cancelled: bool,
}

impl RunState {
    fn new(plan: &Plan) -> Self {
        let mut dependents = vec![BTreeSet::new(); plan.len()];
        for (index, step) in plan.steps.iter().enumerate() {
            for &before in &step.after {
                if let Some(set) = dependents.get_mut(before) {
                    set.insert(index);
                }
            }
        }
        Self {
            states: vec![StepState::Pending; plan.len()],
            attempts: vec![0; plan.len()],
            provider_called: vec![false; plan.len()],
            outputs: HashMap::new(),
            dependents,
            waves: 0,
            cancelled: false,
        }
    }

    fn runnable(&self, plan: &Plan) -> Vec<usize> {
        plan.steps
            .iter()
            .enumerate()
            .filter(|(i, step)| {
                self.states[*i].is_pending()
                    && step
                        .after
                        .iter()
                        .all(|b| self.states.get(*b).map_or(false, StepState::is_committed))
            })
            .map(|(i, _)| i)
            .collect()
    }

    fn pending_count(&self) -> usize {
        self.states.iter().filter(|s| s.is_pending()).count()
    }

    fn skip_pending(&mut self, reason: SkipReason) {
        self.cancelled = true;
        for state in &mut self.states {
            if state.is_pending() {
                *state = StepState::Skipped {
                    reason: reason.clone(),
                };
            }
        }
    }

    fn fail(&mut self, plan: &Plan, index: usize, failure: StepFailure) {
        self.states[index] = StepState::Failed { failure };
        self.skip_dependents(plan, index);
    }

    /// Mark every pending step downstream of `index` as skipped.
    fn skip_dependents(&mut self, plan: &Plan, index: usize) {
        let origin = plan.steps[index].logical_path.clone();
        let mut stack: Vec<usize> = self.dependents[index].iter().copied().collect();
        while let Some(next) = stack.pop() {
            if !self.states[next].is_pending() {
                continue;
            }
            warn!(
                "Skipping {} ({}): depends on {}",
                plan.steps[next].logical_path, plan.steps[next].action, origin
            );
            self.states[next] = StepState::Skipped {
                reason: SkipReason::DependencyFailed {
                    logical_path: origin.clone(),
                },
            };
            stack.extend(self.dependents[next].iter().copied());
        }
    }

    fn into_report(self, plan: &Plan, started_at: chrono::DateTime<Utc>) -> RunReport {
        let outcome = if self.states.iter().all(StepState::is_committed) {
            RunOutcome::Success
        } else {
            RunOutcome::PartialFailure
        };
        let steps = plan
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| StepReport {
                index,
                logical_path: step.logical_path.clone(),
                kind: step.kind.clone(),
                action: step.action,
                state: self.states[index].clone(),
                provider_called: self.provider_called[index],
                attempts: self.attempts[index],
            })
            .collect();
        let report = RunReport {
            outcome,
            steps,
            waves: self.waves,
            cancelled: self.cancelled,
            started_at,
            finished_at: Utc::now(),
        };
        match report.outcome {
            RunOutcome::Success => info!("{}", report),
            RunOutcome::PartialFailure => warn!("{}", report),
        }
        report
    }
}

enum Prepared {
    /// Nothing to send; the step commits with these outputs.
    Done(Outputs),
    Failed(StepFailure),
    Call(ProviderCall),
}

enum ProviderCall {
    Create {
        request: CreateRequest,
        resolved: Properties,
    },
    Update {
        request: UpdateRequest,
        resolved: Properties,
    },
    Delete(DeleteRequest),
}

enum TaskEnd {
    Applied {
        provider_id: String,
        outputs: Outputs,
        properties: Properties,
    },
    Deleted,
    Failed(StepFailure),
    /// Cancelled while waiting for a permit; the provider was never called.
    NotStarted,
}

/// One provider call, run on the wave's `JoinSet`.
struct StepTask {
    index: usize,
    provider: Arc<dyn ResourceProvider>,
    call: ProviderCall,
    timeout: Option<Duration>,
    retry: RetryPolicy,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl StepTask {
    async fn run(self) -> (usize, u32, TaskEnd) {
        let Ok(_permit) = self.semaphore.clone().acquire_owned().await else {
            return (self.index, 0, TaskEnd::NotStarted);
        };
        if self.cancel.is_cancelled() {
            return (self.index, 0, TaskEnd::NotStarted);
        }

        let index = self.index;
        let timeout = self.timeout;
        // Counted outside the call so a timeout still reports the retries it cut short.
        let attempts = Arc::new(AtomicU32::new(0));
        let call = self.call_with_retry(attempts.clone());
        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(done) => done,
                Err(_) => {
                    return (
                        index,
                        attempts.load(Ordering::SeqCst),
                        TaskEnd::Failed(StepFailure::Timeout { after: limit }),
                    )
                }
            },
            None => call.await,
        };

        let end = match result {
            Ok(end) => end,
            Err(cause) => TaskEnd::Failed(StepFailure::Provider { cause }),
        };
        (index, attempts.load(Ordering::SeqCst), end)
    }

    async fn call_with_retry(self, attempts: Arc<AtomicU32>) -> ProviderResult<TaskEnd> {
        let max_attempts = self.retry.max_attempts.max(1);
        loop {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            match self.call_once().await {
                Ok(end) => return Ok(end),
                Err(e) if e.retryable && attempt < max_attempts => {
                    let delay = self.retry.delay_for_attempt(attempt - 1);
                    warn!(
                        "Attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_once(&self) -> ProviderResult<TaskEnd> {
        match &self.call {
            ProviderCall::Create { request, resolved } => {
                let Created {
                    provider_id,
                    outputs,
                } = self.provider.create(request.clone()).await?;
                Ok(TaskEnd::Applied {
                    provider_id,
                    outputs,
                    properties: resolved.clone(),
                })
            }
            ProviderCall::Update { request, resolved } => {
                let outputs = self.provider.update(request.clone()).await?;
                Ok(TaskEnd::Applied {
                    provider_id: request.provider_id.clone(),
                    outputs,
                    properties: resolved.clone(),
                })
            }
            ProviderCall::Delete(request) => {
                self.provider.delete(request.clone()).await?;
                Ok(TaskEnd::Deleted)
            }
        }
    }
}

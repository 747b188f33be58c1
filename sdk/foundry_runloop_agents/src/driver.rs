//! Drive a run from creation to a terminal status.
//!
//! [`RunDriver`] polls the run with exponential backoff, resolves
//! `requires_action` rounds through the [`ToolRegistry`] and
//! [`ApprovalPolicy`], and only returns once the run is terminal or the
//! deadline has passed. A successful result is always a `completed` run, so
//! callers can read the final messages straight away.
//!
//! ```rust,no_run
//! use foundry_runloop_agents::driver::{PollPolicy, RunDriver};
//! use foundry_runloop_agents::run::RunCreateRequest;
//! use foundry_runloop_agents::tools::ToolRegistry;
//! use foundry_runloop_core::config::ServiceConfig;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ServiceConfig::from_env()?.client()?;
//! let driver = RunDriver::new(client, ToolRegistry::new())
//!     .with_policy(PollPolicy::fixed(Duration::from_secs(2)));
//!
//! let request = RunCreateRequest::for_agent("asst_abc")?;
//! let outcome = driver.execute("thread_abc", &request).await?;
//! println!("run {} completed after {} tool rounds", outcome.run.id, outcome.tool_rounds);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use foundry_runloop_core::client::ServiceClient;
use tokio::time::Instant;

use crate::approval::ApprovalPolicy;
use crate::error::{RunLoopError, RunLoopResult};
use crate::run::{self, RequiredAction, Run, RunCreateRequest, RunStatus};
use crate::tools::ToolRegistry;

/// Default wait before the first status poll.
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_secs(1);

/// Default cap on the wait between polls.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(8);

/// Default overall time limit for one run.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// Upper bound for the best-effort cancel sent after a failure or timeout.
const CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

/// How often to poll and when to give up.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Wait before the first poll and after every tool submission.
    pub initial_interval: Duration,
    /// Upper bound for the wait between polls.
    pub max_interval: Duration,
    /// Factor applied to the wait after each non-terminal poll.
    pub multiplier: f64,
    /// Total time allowed from the start of [`RunDriver::drive`].
    pub deadline: Duration,
    /// Extra attempts for a status fetch that failed with a transient error.
    pub fetch_retries: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            multiplier: 2.0,
            deadline: DEFAULT_DEADLINE,
            fetch_retries: 2,
        }
    }
}

impl PollPolicy {
    /// Poll at a constant interval.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_interval: interval,
            max_interval: interval,
            multiplier: 1.0,
            ..Self::default()
        }
    }

    /// Set the first wait. Raises `max_interval` if it is smaller.
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self.max_interval = self.max_interval.max(interval);
        self
    }

    /// Set the wait cap. Values below `initial_interval` are raised to it.
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval.max(self.initial_interval);
        self
    }

    /// Values below 1.0 are raised to 1.0.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Set the total time allowed for one run, including every request.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Set how often a transient status-fetch failure is retried.
    pub fn with_fetch_retries(mut self, retries: u32) -> Self {
        self.fetch_retries = retries;
        self
    }

    /// The wait that follows `current`.
    pub fn next_interval(&self, current: Duration) -> Duration {
        if current >= self.max_interval {
            return self.max_interval;
        }
        current.mul_f64(self.multiplier).min(self.max_interval)
    }
}

/// Where the driver is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Sleeping before the next poll.
    Waiting,
    /// Fetching the run status.
    Fetching,
    /// Resolving and submitting pending tool calls.
    Resolving,
    /// The run is terminal.
    Finished,
}

impl DriverState {
    /// The state that handles a run observed with `status`.
    pub fn after(status: RunStatus) -> Self {
        match status {
            s if s.is_terminal() => Self::Finished,
            RunStatus::RequiresAction => Self::Resolving,
            _ => Self::Waiting,
        }
    }
}

/// A run that reached `completed`.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run: Run,
    /// Number of `requires_action` rounds answered.
    pub tool_rounds: usize,
    /// Number of tool calls answered across all rounds.
    pub tool_calls: usize,
}

/// Runs agents to completion, answering tool calls on the way.
#[derive(Debug, Clone)]
pub struct RunDriver {
    client: ServiceClient,
    tools: ToolRegistry,
    approvals: ApprovalPolicy,
    policy: PollPolicy,
}

impl RunDriver {
    /// A driver with the default [`PollPolicy`] that approves every MCP call.
    pub fn new(client: ServiceClient, tools: ToolRegistry) -> Self {
        Self {
            client,
            tools,
            approvals: ApprovalPolicy::default(),
            policy: PollPolicy::default(),
        }
    }

    /// Replace the polling and deadline settings.
    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the policy used for `submit_tool_approval` rounds.
    pub fn with_approvals(mut self, approvals: ApprovalPolicy) -> Self {
        self.approvals = approvals;
        self
    }

    /// The client used for every run request.
    pub fn client(&self) -> &ServiceClient {
        &self.client
    }

    /// The registry that resolves function calls.
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// The active polling settings.
    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Create a run on `thread_id` and drive it to completion.
    ///
    /// # Tracing
    ///
    /// Emits a span named `foundry::runs::execute` with fields `thread_id`
    /// and `assistant_id`.
    #[tracing::instrument(
        name = "foundry::runs::execute",
        skip(self, request),
        fields(thread_id = %thread_id, assistant_id = %request.assistant_id)
    )]
    pub async fn execute(
        &self,
        thread_id: &str,
        request: &RunCreateRequest,
    ) -> RunLoopResult<RunOutcome> {
        let run = run::create(&self.client, thread_id, request).await?;
        self.drive(run).await
    }

    /// Drive an already created run to completion.
    ///
    /// Returns [`RunLoopError::RunFailed`] for any terminal status other
    /// than `completed`, and [`RunLoopError::Timeout`] (after a best-effort
    /// cancel) when the deadline passes first.
    ///
    /// # Tracing
    ///
    /// Emits a span named `foundry::runs::drive` with fields `thread_id`
    /// and `run_id`.
    #[tracing::instrument(
        name = "foundry::runs::drive",
        skip(self, run),
        fields(thread_id = %run.thread_id, run_id = %run.id)
    )]
    pub async fn drive(&self, run: Run) -> RunLoopResult<RunOutcome> {
        let started = Instant::now();
        let mut run = run;
        let mut interval = self.policy.initial_interval;
        let mut tool_rounds = 0usize;
        let mut tool_calls = 0usize;
        // Call ids of the last submitted round; a poll may still show them.
        let mut answered: Vec<String> = Vec::new();

        let mut state = DriverState::after(run.status);

        loop {
            tracing::trace!(?state, status = %run.status, "driver step");

            state = match state {
                DriverState::Waiting => {
                    let elapsed = started.elapsed();
                    if elapsed + interval > self.policy.deadline {
                        return Err(self.time_out(&run, elapsed).await);
                    }
                    tokio::time::sleep(interval).await;
                    DriverState::Fetching
                }
                DriverState::Fetching => {
                    let fetched =
                        tokio::time::timeout(self.remaining(started), self.fetch(&run, started))
                            .await;
                    let Ok(next) = fetched else {
                        return Err(self.time_out(&run, started.elapsed()).await);
                    };
                    Self::observe(&mut run, next?)?;
                    let state = Self::next_state(&run, &answered);
                    if state == DriverState::Waiting {
                        interval = self.policy.next_interval(interval);
                    }
                    state
                }
                DriverState::Resolving => {
                    let answering =
                        tokio::time::timeout(self.remaining(started), self.answer(&run)).await;
                    let (next, ids) = match answering {
                        Ok(Ok(submitted)) => submitted,
                        Ok(Err(err)) => {
                            self.cancel_quietly(&run).await;
                            return Err(err);
                        }
                        Err(_) => return Err(self.time_out(&run, started.elapsed()).await),
                    };
                    Self::observe(&mut run, next)?;
                    tool_rounds = tool_rounds.saturating_add(1);
                    tool_calls = tool_calls.saturating_add(ids.len());
                    answered = ids;
                    interval = self.policy.initial_interval;
                    Self::next_state(&run, &answered)
                }
                DriverState::Finished => {
                    return Self::finish(run, tool_rounds, tool_calls);
                }
            };
        }
    }

    /// Time left before the deadline.
    fn remaining(&self, started: Instant) -> Duration {
        self.policy.deadline.saturating_sub(started.elapsed())
    }

    /// Like [`DriverState::after`], but a `requires_action` listing exactly
    /// the calls already submitted waits for the service to catch up.
    fn next_state(run: &Run, answered: &[String]) -> DriverState {
        let state = DriverState::after(run.status);
        if state != DriverState::Resolving || answered.is_empty() {
            return state;
        }
        let pending = run
            .required_action
            .as_ref()
            .map(|action| action.tool_calls())
            .unwrap_or_default();
        let same_round = pending.len() == answered.len()
            && pending
                .iter()
                .all(|call| answered.iter().any(|id| id == call.id()));
        if same_round {
            tracing::debug!("run still lists the submitted round, waiting");
            DriverState::Waiting
        } else {
            state
        }
    }

    /// Replace `run` with `next` if the status change is possible.
    fn observe(run: &mut Run, next: Run) -> RunLoopResult<()> {
        if !run.status.can_transition_to(next.status) {
            return Err(RunLoopError::InvalidTransition {
                from: run.status,
                to: next.status,
            });
        }
        if next.status != run.status {
            tracing::debug!(from = %run.status, to = %next.status, "run status changed");
        }
        *run = next;
        Ok(())
    }

    async fn fetch(&self, current: &Run, started: Instant) -> RunLoopResult<Run> {
        let mut attempt = 0u32;
        loop {
            match run::get(&self.client, &current.thread_id, &current.id).await {
                Ok(run) => return Ok(run),
                Err(err)
                    if err.is_retriable()
                        && attempt < self.policy.fetch_retries
                        && started.elapsed() + self.policy.initial_interval
                            <= self.policy.deadline =>
                {
                    attempt += 1;
                    tracing::warn!(error = %err, attempt, "run status fetch failed, retrying");
                    tokio::time::sleep(self.policy.initial_interval).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Resolve every pending call and submit the results in one request.
    ///
    /// Returns the submit response and the ids of the calls answered.
    async fn answer(&self, run: &Run) -> RunLoopResult<(Run, Vec<String>)> {
        let action = run
            .required_action
            .as_ref()
            .ok_or(RunLoopError::MissingToolCalls)?;
        let calls = action.tool_calls();
        if calls.is_empty() {
            return Err(RunLoopError::MissingToolCalls);
        }
        let ids = calls.iter().map(|call| call.id().to_string()).collect();

        let next = match action {
            RequiredAction::SubmitToolOutputs { .. } => {
                let mut outputs = Vec::with_capacity(calls.len());
                for call in calls {
                    outputs.push(self.tools.resolve(call).await?);
                }
                run::submit_tool_outputs(&self.client, &run.thread_id, &run.id, &outputs).await?
            }
            RequiredAction::SubmitToolApproval { .. } => {
                let approvals = self.approvals.decide(calls);
                run::submit_tool_approvals(&self.client, &run.thread_id, &run.id, &approvals)
                    .await?
            }
        };

        Ok((next, ids))
    }

    async fn time_out(&self, run: &Run, elapsed: Duration) -> RunLoopError {
        tracing::warn!(?elapsed, status = %run.status, "run deadline exceeded, cancelling");
        self.cancel_quietly(run).await;
        RunLoopError::Timeout {
            elapsed,
            last_status: run.status,
        }
    }

    async fn cancel_quietly(&self, run: &Run) {
        let cancel = run::cancel(&self.client, &run.thread_id, &run.id);
        match tokio::time::timeout(CANCEL_TIMEOUT, cancel).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => tracing::warn!(error = %err, "best-effort run cancel failed"),
            Err(_) => tracing::warn!("best-effort run cancel timed out"),
        }
    }

    fn finish(run: Run, tool_rounds: usize, tool_calls: usize) -> RunLoopResult<RunOutcome> {
        if run.status == RunStatus::Completed {
            tracing::debug!(tool_rounds, tool_calls, "run completed");
            return Ok(RunOutcome {
                run,
                tool_rounds,
                tool_calls,
            });
        }

        let status = run.status;
        let (code, message) = match run.last_error {
            Some(err) => (err.code, err.message),
            None => (status.as_str().to_string(), format!("run ended as {status}")),
        };
        tracing::warn!(%status, %code, "run did not complete");
        Err(RunLoopError::RunFailed {
            status,
            code,
            message,
        })
    }
}

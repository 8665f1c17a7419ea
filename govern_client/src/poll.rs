//! Poll-driven observation of long-running backend jobs.
//!
//! All state changes go through [`transition`]. A [`PollSession`] owns the one
//! timer task for its job and publishes every state on a `watch` channel;
//! dropping the session aborts the task.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::api::{JobSource, StatusReply};
use crate::config::{ClientConfig, DEFAULT_MAX_POLL_FAILURES, DEFAULT_POLL_INTERVAL};
use crate::error::ApiError;
use crate::{JobRef, JobStatus};

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    /// Consecutive transient failures tolerated before giving up.
    pub max_consecutive_failures: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_consecutive_failures: DEFAULT_MAX_POLL_FAILURES,
        }
    }
}

impl From<&ClientConfig> for PollConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            interval: config.poll_interval,
            max_consecutive_failures: config.max_consecutive_failures,
        }
    }
}

/// How a poll session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    Completed { result: Option<Value> },
    /// Reported by the job itself, or an application error response.
    Failed { error: String },
    /// The job disappeared while being polled.
    NotFound,
    /// Too many consecutive network failures.
    GaveUp { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Idle,
    /// Started, no response yet.
    Loading,
    Polling { status: JobStatus },
    Terminal(Terminal),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollState {
    pub phase: Phase,
    pub consecutive_failures: u32,
    pub fetches: u32,
    pub last_error: Option<String>,
}

impl Default for PollState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            consecutive_failures: 0,
            fetches: 0,
            last_error: None,
        }
    }
}

impl PollState {
    /// No further requests will be issued from this state.
    pub fn is_final(&self) -> bool {
        matches!(self.phase, Phase::Terminal(_) | Phase::Cancelled)
    }

    pub fn terminal(&self) -> Option<&Terminal> {
        match &self.phase {
            Phase::Terminal(t) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum PollEvent {
    Start,
    Reply(Result<StatusReply, ApiError>),
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Continue,
    Stop,
}

pub fn transition(state: &PollState, event: PollEvent, max_failures: u32) -> (PollState, Directive) {
    if state.is_final() {
        return (state.clone(), Directive::Stop);
    }

    let mut next = state.clone();
    match event {
        PollEvent::Start => {
            if next.phase == Phase::Idle {
                next.phase = Phase::Loading;
            }
            (next, Directive::Continue)
        }
        PollEvent::Cancel => {
            next.phase = Phase::Cancelled;
            (next, Directive::Stop)
        }
        PollEvent::Reply(Ok(reply)) => {
            next.fetches += 1;
            next.consecutive_failures = 0;
            next.last_error = None;
            let job = reply.job;
            match job.status {
                JobStatus::Completed => {
                    next.phase = Phase::Terminal(Terminal::Completed { result: job.result });
                    (next, Directive::Stop)
                }
                JobStatus::Failed => {
                    let error = job.error.unwrap_or_else(|| "Job failed".to_string());
                    next.phase = Phase::Terminal(Terminal::Failed { error });
                    (next, Directive::Stop)
                }
                status => {
                    next.phase = Phase::Polling { status };
                    (next, Directive::Continue)
                }
            }
        }
        PollEvent::Reply(Err(err)) => {
            next.fetches += 1;
            if err.is_transient() {
                next.consecutive_failures += 1;
                next.last_error = Some(err.to_string());
                if next.consecutive_failures >= max_failures {
                    next.phase = Phase::Terminal(Terminal::GaveUp {
                        error: err.user_message(),
                    });
                    return (next, Directive::Stop);
                }
                return (next, Directive::Continue);
            }

            next.last_error = Some(err.to_string());
            next.phase = if err.is_not_found() {
                Phase::Terminal(Terminal::NotFound)
            } else {
                Phase::Terminal(Terminal::Failed {
                    error: err.user_message(),
                })
            };
            (next, Directive::Stop)
        }
    }
}

/// Applies `event` to the published state and returns what the timer should do.
fn apply(tx: &watch::Sender<PollState>, event: PollEvent, max_failures: u32) -> Directive {
    let mut directive = Directive::Stop;
    tx.send_modify(|state| {
        let (next, d) = transition(state, event, max_failures);
        *state = next;
        directive = d;
    });
    directive
}

async fn run(source: Arc<dyn JobSource>, job: JobRef, config: PollConfig, tx: Arc<watch::Sender<PollState>>) {
    let max = config.max_consecutive_failures;
    apply(&tx, PollEvent::Start, max);

    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let reply = source.fetch_status(job.kind, &job.id).await;
        let directive = apply(&tx, PollEvent::Reply(reply), max);

        let state = tx.borrow().clone();
        match &state.phase {
            Phase::Polling { status } => tracing::debug!("{}: {}", job, status),
            Phase::Terminal(Terminal::GaveUp { error }) => {
                tracing::warn!("{}: giving up after {} failures: {}", job, state.consecutive_failures, error)
            }
            Phase::Terminal(terminal) => tracing::info!("{}: finished {:?}", job, terminal),
            _ => {
                if let Some(err) = &state.last_error {
                    tracing::debug!("{}: retrying after {}", job, err);
                }
            }
        }

        if directive == Directive::Stop {
            break;
        }
    }
}

/// One job's poll timer. Dropping the session cancels it.
pub struct PollSession {
    job: JobRef,
    handle: JoinHandle<()>,
    tx: Arc<watch::Sender<PollState>>,
    max_failures: u32,
}

impl PollSession {
    pub fn start(source: Arc<dyn JobSource>, job: JobRef, config: PollConfig) -> Self {
        let tx = Arc::new(watch::Sender::new(PollState::default()));
        let handle = tokio::spawn(run(source, job.clone(), config, tx.clone()));
        Self {
            job,
            handle,
            tx,
            max_failures: config.max_consecutive_failures,
        }
    }

    pub fn job(&self) -> &JobRef {
        &self.job
    }

    pub fn state(&self) -> PollState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollState> {
        self.tx.subscribe()
    }

    /// True once the timer task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel(&self) {
        self.handle.abort();
        apply(&self.tx, PollEvent::Cancel, self.max_failures);
    }

    /// Waits until the session reaches a terminal or cancelled state.
    pub async fn wait(&self) -> PollState {
        wait_final(self.subscribe()).await
    }
}

impl Drop for PollSession {
    fn drop(&mut self) {
        if !self.handle.is_finished() {
            tracing::debug!("{}: poll session dropped", self.job);
            self.cancel();
        }
    }
}

/// Resolves with the first final state seen on `rx`, or the last state if the session went away.
pub async fn wait_final(mut rx: watch::Receiver<PollState>) -> PollState {
    let result = rx.wait_for(PollState::is_final).await.map(|state| state.clone());
    match result {
        Ok(state) => state,
        Err(_) => rx.borrow().clone(),
    }
}

/// At most one live poll session per job.
pub struct PollRegistry {
    source: Arc<dyn JobSource>,
    config: PollConfig,
    sessions: DashMap<JobRef, PollSession>,
}

impl PollRegistry {
    pub fn new(source: Arc<dyn JobSource>, config: PollConfig) -> Self {
        Self {
            source,
            config,
            sessions: DashMap::new(),
        }
    }

    /// Starts polling `job`, cancelling any session already running for it.
    /// Sessions that already finished are forgotten first.
    pub fn start(&self, job: JobRef) -> watch::Receiver<PollState> {
        self.prune_finished();
        if let Some((_, previous)) = self.sessions.remove(&job) {
            tracing::debug!("{}: replacing existing poll session", job);
            previous.cancel();
        }
        let session = PollSession::start(self.source.clone(), job.clone(), self.config);
        let rx = session.subscribe();
        self.sessions.insert(job, session);
        rx
    }

    pub fn cancel(&self, job: &JobRef) -> bool {
        match self.sessions.remove(job) {
            Some((_, session)) => {
                session.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        self.sessions.iter().for_each(|entry| entry.value().cancel());
        self.sessions.clear();
    }

    /// Sessions currently held, finished or not.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn state(&self, job: &JobRef) -> Option<PollState> {
        self.sessions.get(job).map(|session| session.state())
    }

    /// Sessions whose timer is still running.
    pub fn active(&self) -> usize {
        self.sessions.iter().filter(|entry| !entry.value().is_finished()).count()
    }

    /// Forgets sessions that already reached a final state.
    pub fn prune_finished(&self) {
        self.sessions.retain(|_, session| !session.state().is_final());
    }
}

impl Drop for PollRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

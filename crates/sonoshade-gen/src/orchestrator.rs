//! Generation cycle state machine.
//!
//! ```text
//! Idle -> Requesting -> Streaming -> Validating -> { Applying, Failed }
//! Applying -> { Idle (accepted), Requesting (retry), RolledBack (retries exhausted) }
//! ```
//!
//! `Idle`, `Failed` and `RolledBack` are resting states from which a new
//! cycle may start. Each cycle carries an epoch; every side effect (state
//! change, progress, activation, report) first checks that the epoch is still
//! current, so a destroyed or superseded cycle never touches the target.
//! Listeners may call back into the orchestrator, so the epoch is checked
//! again after every emit. Target calls also carry the cycle's
//! [`CancelToken`], which `destroy` cancels before it returns.

use crate::error::{GenerationError, ProviderError};
use crate::provider::{GenerativeProvider, ProviderEvent, ProviderStream};
use futures::StreamExt;
use parking_lot::{Mutex, ReentrantMutex};
use sonoshade_core::program::{self, DEFAULT_PROGRAM};
use sonoshade_core::{
    CancelToken, GenerationRequest, Listeners, OrchestratorConfig, ProgramTarget, ProgressEvent,
    Subscription,
};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Description attached to the built-in program when it is substituted
pub const DEFAULT_DESCRIPTION: &str = "Built-in default program";

/// Where the current cycle is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrchestratorState {
    Idle,
    Requesting,
    Streaming,
    Validating,
    Applying,
    Failed,
    RolledBack,
}

impl OrchestratorState {
    /// True if a new cycle may start
    pub fn is_resting(&self) -> bool {
        matches!(self, Self::Idle | Self::Failed | Self::RolledBack)
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Requesting => "requesting",
            Self::Streaming => "streaming",
            Self::Validating => "validating",
            Self::Applying => "applying",
            Self::Failed => "failed",
            Self::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

/// How a cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A program was activated. It may be the default program if the
    /// provider's answer had to be replaced.
    Succeeded {
        code: String,
        description: String,
        attempts: u32,
    },
    /// Provider failure, or retries exhausted (after rollback)
    Failed(GenerationError),
    /// The orchestrator was destroyed before the cycle finished
    Cancelled,
}

/// Reports besides progress and state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorEvent {
    /// Absorbed problem, the default program was substituted
    Warning(GenerationError),
    /// The cycle ended
    Finished(CycleOutcome),
}

/// Handle to a started cycle
#[derive(Debug)]
pub struct CycleHandle {
    epoch: u64,
    outcome: oneshot::Receiver<CycleOutcome>,
}

impl CycleHandle {
    /// Epoch of this cycle
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Wait for the cycle to end
    pub async fn outcome(self) -> CycleOutcome {
        self.outcome.await.unwrap_or(CycleOutcome::Cancelled)
    }
}

struct Slot {
    state: OrchestratorState,
    retry_count: u32,
    last_request: Option<GenerationRequest>,
    task: Option<JoinHandle<()>>,
    /// Cancelled when the running cycle is torn down
    token: Option<CancelToken>,
    destroyed: bool,
}

struct Inner {
    provider: Arc<dyn GenerativeProvider>,
    target: Arc<dyn ProgramTarget>,
    config: OrchestratorConfig,
    runtime: Handle,
    epoch: AtomicU64,
    slot: Mutex<Slot>,
    /// Held while checking the epoch and emitting, so nothing is delivered
    /// after `destroy` returns. Re-entrant for listeners that call back in.
    gate: ReentrantMutex<()>,
    progress: Listeners<ProgressEvent>,
    states: Listeners<OrchestratorState>,
    events: Listeners<OrchestratorEvent>,
}

/// Candidate gathered from one provider stream
struct Collected {
    result: Option<(String, String)>,
    raw_text: String,
    last_partial: String,
}

enum StreamEnd {
    Provider(ProviderError),
    Cancelled,
}

/// Drives one generation cycle at a time against a provider and a target
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Create an idle orchestrator whose cycles run on `runtime`
    pub fn new(
        provider: Arc<dyn GenerativeProvider>,
        target: Arc<dyn ProgramTarget>,
        config: OrchestratorConfig,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                target,
                config,
                runtime,
                epoch: AtomicU64::new(0),
                slot: Mutex::new(Slot {
                    state: OrchestratorState::Idle,
                    retry_count: 0,
                    last_request: None,
                    task: None,
                    token: None,
                    destroyed: false,
                }),
                gate: ReentrantMutex::new(()),
                progress: Listeners::new(),
                states: Listeners::new(),
                events: Listeners::new(),
            }),
        }
    }

    /// Start a cycle for `request`. Returns `None` (and does nothing) while
    /// another cycle is running or after `destroy`.
    pub fn generate(&self, request: GenerationRequest) -> Option<CycleHandle> {
        let inner = &self.inner;
        let _gate = inner.gate.lock();

        let token = CancelToken::new();
        let epoch = {
            let mut slot = inner.slot.lock();
            if slot.destroyed {
                debug!("Generate ignored: orchestrator destroyed");
                return None;
            }
            if !slot.state.is_resting() {
                debug!("Generate ignored: cycle already {}", slot.state);
                return None;
            }
            let epoch = inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            slot.state = OrchestratorState::Requesting;
            slot.retry_count = 0;
            slot.last_request = Some(request.clone());
            slot.token = Some(token.clone());
            epoch
        };

        info!(
            "Starting generation cycle {} ({} via {})",
            epoch, request.model_id, request.provider
        );
        inner.states.emit(&OrchestratorState::Requesting);

        let (tx, rx) = oneshot::channel();
        let task = inner
            .runtime
            .spawn(Inner::run_cycle(Arc::clone(inner), epoch, token, request, tx));

        let mut slot = inner.slot.lock();
        if inner.is_current(epoch) {
            slot.task = Some(task);
        }

        Some(CycleHandle { epoch, outcome: rx })
    }

    /// Start a new cycle with the previous request. No-op while busy or if
    /// nothing was requested yet.
    pub fn regenerate(&self) -> Option<CycleHandle> {
        let request = self.inner.slot.lock().last_request.clone()?;
        self.generate(request)
    }

    /// Cancel any running cycle and drop every listener. Idempotent.
    pub fn destroy(&self) {
        let inner = &self.inner;
        let _gate = inner.gate.lock();
        inner.epoch.fetch_add(1, Ordering::SeqCst);

        let (task, token) = {
            let mut slot = inner.slot.lock();
            if slot.destroyed {
                return;
            }
            slot.destroyed = true;
            slot.state = OrchestratorState::Idle;
            (slot.task.take(), slot.token.take())
        };
        // Waits out an activation already committing on the target
        if let Some(token) = token {
            token.cancel();
        }
        if let Some(task) = task {
            task.abort();
        }

        inner.progress.clear();
        inner.states.clear();
        inner.events.clear();
        info!("Orchestrator destroyed");
    }

    /// Current state
    pub fn state(&self) -> OrchestratorState {
        self.inner.slot.lock().state
    }

    /// Rejected activations in the current cycle
    pub fn retry_count(&self) -> u32 {
        self.inner.slot.lock().retry_count
    }

    /// Request of the most recent cycle
    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.inner.slot.lock().last_request.clone()
    }

    /// True after [`destroy`](Self::destroy)
    pub fn is_destroyed(&self) -> bool {
        self.inner.slot.lock().destroyed
    }

    /// Partial and final program text
    pub fn subscribe_progress<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.inner.progress.subscribe(callback)
    }

    /// Every state transition
    pub fn subscribe_state<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&OrchestratorState) + Send + Sync + 'static,
    {
        self.inner.states.subscribe(callback)
    }

    /// Warnings and cycle outcomes
    pub fn subscribe_events<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&OrchestratorEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(callback)
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl Inner {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Transition and notify, unless the cycle is stale
    fn transition(&self, epoch: u64, state: OrchestratorState) -> bool {
        let _gate = self.gate.lock();
        if !self.is_current(epoch) {
            return false;
        }
        self.slot.lock().state = state;
        debug!("Cycle {} -> {}", epoch, state);
        self.states.emit(&state);
        self.is_current(epoch)
    }

    fn publish_progress(&self, epoch: u64, event: ProgressEvent) -> bool {
        let _gate = self.gate.lock();
        if !self.is_current(epoch) {
            return false;
        }
        self.progress.emit(&event);
        self.is_current(epoch)
    }

    fn publish_event(&self, epoch: u64, event: OrchestratorEvent) -> bool {
        let _gate = self.gate.lock();
        if !self.is_current(epoch) {
            return false;
        }
        self.events.emit(&event);
        self.is_current(epoch)
    }

    async fn run_cycle(
        self: Arc<Self>,
        epoch: u64,
        token: CancelToken,
        request: GenerationRequest,
        reply: oneshot::Sender<CycleOutcome>,
    ) {
        let outcome = self.drive(epoch, &token, &request).await;
        let outcome = if self.publish_event(epoch, OrchestratorEvent::Finished(outcome.clone())) {
            outcome
        } else {
            CycleOutcome::Cancelled
        };

        {
            let mut slot = self.slot.lock();
            if self.is_current(epoch) {
                slot.task = None;
                slot.token = None;
            }
        }
        let _ = reply.send(outcome);
    }

    async fn drive(
        &self,
        epoch: u64,
        token: &CancelToken,
        request: &GenerationRequest,
    ) -> CycleOutcome {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if attempt > 1 && !self.transition(epoch, OrchestratorState::Requesting) {
                return CycleOutcome::Cancelled;
            }

            let stream = match self.provider.generate_program(request).await {
                Ok(stream) => stream,
                Err(e) => return self.provider_failed(epoch, attempt, e),
            };

            if !self.transition(epoch, OrchestratorState::Streaming) {
                return CycleOutcome::Cancelled;
            }
            let collected = match self.collect(epoch, attempt, stream).await {
                Ok(collected) => collected,
                Err(StreamEnd::Provider(e)) => return self.provider_failed(epoch, attempt, e),
                Err(StreamEnd::Cancelled) => return CycleOutcome::Cancelled,
            };

            if !self.transition(epoch, OrchestratorState::Validating) {
                return CycleOutcome::Cancelled;
            }
            let (code, description) = self.validate(epoch, collected);
            if !self.publish_progress(epoch, ProgressEvent::complete(code.clone(), attempt)) {
                return CycleOutcome::Cancelled;
            }

            if !self.transition(epoch, OrchestratorState::Applying) {
                return CycleOutcome::Cancelled;
            }
            let accepted = self.target.try_activate_guarded(&code, token).await;
            if !self.is_current(epoch) {
                return CycleOutcome::Cancelled;
            }

            if accepted {
                self.slot.lock().retry_count = 0;
                info!("Cycle {} activated a program on attempt {}", epoch, attempt);
                self.transition(epoch, OrchestratorState::Idle);
                return CycleOutcome::Succeeded {
                    code,
                    description,
                    attempts: attempt,
                };
            }

            let retries = {
                let mut slot = self.slot.lock();
                slot.retry_count += 1;
                slot.retry_count
            };
            warn!(
                "Cycle {}: program rejected ({}/{})",
                epoch, retries, self.config.max_retries
            );

            if retries < self.config.max_retries {
                tokio::time::sleep(self.config.retry_backoff()).await;
                if !self.is_current(epoch) {
                    return CycleOutcome::Cancelled;
                }
                continue;
            }

            let restored = self.target.rollback_guarded(token).await;
            if !self.is_current(epoch) {
                return CycleOutcome::Cancelled;
            }
            if !restored {
                error!("Cycle {}: rollback failed, current program kept", epoch);
            }
            self.slot.lock().retry_count = 0;
            self.transition(epoch, OrchestratorState::RolledBack);
            return CycleOutcome::Failed(GenerationError::MaxRetriesExceeded { attempts: attempt });
        }
    }

    fn provider_failed(&self, epoch: u64, attempt: u32, err: ProviderError) -> CycleOutcome {
        if !self.is_current(epoch) {
            return CycleOutcome::Cancelled;
        }
        error!("Cycle {}: provider {} failed: {}", epoch, self.provider.name(), err);
        self.publish_progress(epoch, ProgressEvent::complete(String::new(), attempt));
        self.transition(epoch, OrchestratorState::Failed);
        CycleOutcome::Failed(GenerationError::Provider(err))
    }

    /// Republish partial code in order, dropping regressions, and gather the
    /// final answer.
    async fn collect(
        &self,
        epoch: u64,
        attempt: u32,
        mut stream: ProviderStream,
    ) -> Result<Collected, StreamEnd> {
        let mut collected = Collected {
            result: None,
            raw_text: String::new(),
            last_partial: String::new(),
        };

        while let Some(item) = stream.next().await {
            if !self.is_current(epoch) {
                return Err(StreamEnd::Cancelled);
            }
            match item {
                Ok(ProviderEvent::Partial(code)) => {
                    if code.len() < collected.last_partial.len() {
                        trace!("Dropped regressing partial ({} bytes)", code.len());
                        continue;
                    }
                    if code == collected.last_partial {
                        continue;
                    }
                    collected.last_partial = code.clone();
                    if !self.publish_progress(epoch, ProgressEvent::partial(code, attempt)) {
                        return Err(StreamEnd::Cancelled);
                    }
                }
                Ok(ProviderEvent::Text(text)) => collected.raw_text.push_str(&text),
                Ok(ProviderEvent::Completed(result)) => {
                    collected.result = Some((result.code, result.description));
                }
                Err(e) => return Err(StreamEnd::Provider(e)),
            }
        }

        Ok(collected)
    }

    /// Pick the candidate and substitute the default program when it is
    /// missing or malformed.
    fn validate(&self, epoch: u64, collected: Collected) -> (String, String) {
        let candidate = match collected.result {
            Some((code, description)) if !code.trim().is_empty() => {
                // Models sometimes fence the code inside the JSON field
                let code = program::extract_code(&code).unwrap_or(code);
                Some((code, description))
            }
            _ => program::extract_code(&collected.raw_text)
                .or_else(|| program::extract_code(&collected.last_partial))
                .map(|code| (code, String::new())),
        };

        let Some((code, description)) = candidate else {
            warn!("Cycle {}: provider returned no program, using default", epoch);
            self.publish_event(epoch, OrchestratorEvent::Warning(GenerationError::NoCandidate));
            return (DEFAULT_PROGRAM.to_string(), DEFAULT_DESCRIPTION.to_string());
        };

        if !program::has_entry_point(&code) {
            warn!("Cycle {}: program has no entry point, using default", epoch);
            self.publish_event(
                epoch,
                OrchestratorEvent::Warning(GenerationError::MalformedProgram),
            );
            return (DEFAULT_PROGRAM.to_string(), DEFAULT_DESCRIPTION.to_string());
        }

        (code, description)
    }
}

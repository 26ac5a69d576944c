//! Generation cycles driving a real render host on an in-memory surface.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use sonoshade_core::program::{DEFAULT_PROGRAM, PROGRAM_PRELUDE};
use sonoshade_core::{GenerationRequest, GenerationResult, OrchestratorConfig, ProviderChoice};
use sonoshade_gen::{
    CycleOutcome, GenerationError, GenerativeProvider, Orchestrator, OrchestratorState,
    ProviderError, ProviderEvent, ProviderStream,
};
use sonoshade_render::{DisplaySurface, ProgramInputs, RenderError, RenderHost};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Modules containing this do not compile on [`MemorySurface`]
const BROKEN: &str = "syntax error";

/// Compiles by stripping the prelude; remembers what it drew
#[derive(Default)]
struct MemorySurface {
    compiles: AtomicUsize,
    drawn: Mutex<Vec<String>>,
}

impl DisplaySurface for MemorySurface {
    type Program = String;

    fn compile(&self, module: &str) -> Result<String, RenderError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        if module.contains(BROKEN) {
            return Err(RenderError::ShaderCompilation("unexpected token".into()));
        }
        Ok(module[PROGRAM_PRELUDE.len()..].trim().to_string())
    }

    fn draw(&self, program: &String, _inputs: &ProgramInputs) -> Result<(), RenderError> {
        self.drawn.lock().push(program.clone());
        Ok(())
    }

    fn size(&self) -> (u32, u32) {
        (640, 360)
    }

    fn resize(&self, _width: u32, _height: u32) {}

    fn release(&self) {}
}

/// Answers with queued programs, repeating the last one
struct QueuedProvider {
    programs: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl QueuedProvider {
    fn new(programs: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            programs: Mutex::new(programs.iter().map(|p| p.to_string()).collect()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl GenerativeProvider for QueuedProvider {
    fn name(&self) -> &str {
        "queued"
    }

    async fn generate_program(
        &self,
        _request: &GenerationRequest,
    ) -> Result<ProviderStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let code = {
            let mut programs = self.programs.lock();
            if programs.len() > 1 {
                programs.pop_front()
            } else {
                programs.front().cloned()
            }
        }
        .unwrap_or_default();

        let events = vec![
            Ok(ProviderEvent::Partial(code.clone())),
            Ok(ProviderEvent::Completed(GenerationResult {
                code,
                description: "queued".to_string(),
            })),
        ];
        Ok(stream::iter(events).boxed())
    }
}

fn fragment(body: &str) -> String {
    format!(
        "@fragment\nfn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {{\n    {}\n    return vec4<f32>(u.bass, u.mid, u.high, 1.0);\n}}\n",
        body
    )
}

fn request() -> GenerationRequest {
    GenerationRequest::from_prompt("slow aurora", ProviderChoice::Gemini, "test-model")
}

fn setup(
    provider: Arc<QueuedProvider>,
) -> (Orchestrator, Arc<RenderHost<MemorySurface>>) {
    let host = Arc::new(RenderHost::initialize(MemorySurface::default()).unwrap());
    let config = OrchestratorConfig {
        max_retries: 5,
        retry_backoff_ms: 1500,
    };
    let orch = Orchestrator::new(
        provider,
        host.clone(),
        config,
        tokio::runtime::Handle::current(),
    );
    (orch, host)
}

fn last_drawn(host: &RenderHost<MemorySurface>) -> String {
    host.render_frame(0.0).unwrap();
    host.surface().drawn.lock().last().cloned().unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_five_rejections_restore_last_good_program() {
    let good = fragment("let glow = u.volume;");
    let broken = fragment("let x = ; // syntax error");
    let provider = QueuedProvider::new(&[&good, &broken]);
    let (orch, host) = setup(provider.clone());

    let accepted = orch.generate(request()).expect("start").outcome().await;
    let CycleOutcome::Succeeded { code: live, .. } = accepted.clone() else {
        panic!("first cycle failed: {:?}", accepted);
    };
    assert_eq!(host.state().last_good_code.as_deref(), Some(live.as_str()));

    let compiles_before = host.surface().compiles.load(Ordering::SeqCst);
    let outcome = orch.generate(request()).expect("second cycle").outcome().await;

    assert_eq!(
        outcome,
        CycleOutcome::Failed(GenerationError::MaxRetriesExceeded { attempts: 5 })
    );
    assert_eq!(orch.state(), OrchestratorState::RolledBack);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 6);
    // Five rejected candidates plus the rollback recompile
    assert_eq!(
        host.surface().compiles.load(Ordering::SeqCst) - compiles_before,
        6
    );

    let state = host.state();
    assert_eq!(state.current_code, state.last_good_code);
    assert_eq!(state.current_code.as_deref(), Some(live.as_str()));
    assert_eq!(last_drawn(&host), live.trim());
}

#[tokio::test(start_paused = true)]
async fn test_rejections_without_history_restore_default() {
    let provider = QueuedProvider::new(&[&fragment("// syntax error")]);
    let (orch, host) = setup(provider);

    let outcome = orch.generate(request()).expect("start").outcome().await;

    assert_eq!(
        outcome,
        CycleOutcome::Failed(GenerationError::MaxRetriesExceeded { attempts: 5 })
    );
    let state = host.state();
    assert_eq!(state.current_code, None);
    assert_eq!(state.current_code, state.last_good_code);
    assert!(host.is_default_active());
    assert_eq!(last_drawn(&host), DEFAULT_PROGRAM.trim());
}

#[tokio::test(start_paused = true)]
async fn test_destroyed_host_rejects_every_attempt() {
    let provider = QueuedProvider::new(&[&fragment("let glow = u.volume;")]);
    let (orch, host) = setup(provider);
    host.destroy();

    // A destroyed host refuses every activation and the rollback
    let outcome = orch.generate(request()).expect("start").outcome().await;
    assert_eq!(
        outcome,
        CycleOutcome::Failed(GenerationError::MaxRetriesExceeded { attempts: 5 })
    );
    assert_eq!(host.surface().compiles.load(Ordering::SeqCst), 1);
}

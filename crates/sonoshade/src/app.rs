//! Window, render host and generation wiring.

use anyhow::{Context, Result};
use sonoshade_core::{AudioSource, GenerationRequest, SonoshadeConfig, SpectrumAnalyzer};
use sonoshade_gen::{
    build_provider, CycleOutcome, Orchestrator, OrchestratorEvent, OrchestratorState,
};
use sonoshade_render::{RenderError, RenderHost, WgpuBackend, WgpuSurface};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::ActiveEventLoop;
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

/// The running application
pub struct App {
    config: SonoshadeConfig,
    /// Cycle to start once the display is up
    pending_request: Option<GenerationRequest>,
    analyzer: Arc<SpectrumAnalyzer>,
    window: Option<Arc<Window>>,
    // Dropped before the runtime its cycles run on
    orchestrator: Option<Orchestrator>,
    host: Option<Arc<RenderHost<WgpuSurface>>>,
    runtime: tokio::runtime::Runtime,
    start_time: Instant,
    /// First fatal error, reported after the event loop returns
    fatal: Option<anyhow::Error>,
}

impl App {
    /// Create the app and start audio analysis. The window and GPU are set
    /// up on the first `resumed` event.
    pub fn new(
        config: SonoshadeConfig,
        initial_request: Option<GenerationRequest>,
        audio: Option<Box<dyn AudioSource>>,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("sonoshade-gen")
            .build()
            .context("Failed to create Tokio runtime")?;

        let analyzer = Arc::new(SpectrumAnalyzer::new(config.analyzer.clone()));
        match audio {
            Some(source) => {
                let name = source.name();
                if let Err(e) = analyzer.attach(source) {
                    // Generation and rendering continue with silent frames
                    warn!("Audio input '{}' unavailable: {}", name, e);
                }
            }
            None => warn!("No audio input configured, visuals will not react to sound"),
        }

        Ok(Self {
            config,
            pending_request: initial_request,
            analyzer,
            window: None,
            orchestrator: None,
            host: None,
            runtime,
            start_time: Instant::now(),
            fatal: None,
        })
    }

    /// Fatal error recorded while the event loop was running
    pub fn into_result(mut self) -> Result<()> {
        match self.fatal.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let render = &self.config.render;
        let attributes = Window::default_attributes()
            .with_title("Sonoshade")
            .with_inner_size(PhysicalSize::new(render.window_width, render.window_height));
        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .context("Failed to create window")?,
        );

        let backend = pollster::block_on(WgpuBackend::new(render.preferred_gpu.as_deref()))
            .context("Failed to initialize GPU")?;
        let surface = WgpuSurface::new(&backend, window.clone())
            .context("Failed to create display surface")?;

        let host = match RenderHost::initialize(surface) {
            Ok(host) => Arc::new(host),
            Err(e @ RenderError::DefaultProgramRejected(_)) => {
                return Err(e).context("The display cannot run the built-in program");
            }
            Err(e) => return Err(e).context("Failed to start render host"),
        };

        self.orchestrator = self.build_orchestrator(&host);
        self.host = Some(host);
        self.window = Some(window);
        self.start_time = Instant::now();

        info!("--- Entering main event loop ---");
        if let Some(request) = self.pending_request.take() {
            self.generate(request);
        } else {
            info!("No prompt or clip given, showing the built-in program");
        }
        Ok(())
    }

    fn build_orchestrator(&self, host: &Arc<RenderHost<WgpuSurface>>) -> Option<Orchestrator> {
        let provider = match build_provider(&self.config.provider) {
            Ok(provider) => provider,
            Err(e) => {
                warn!("Generation disabled: {}", e);
                return None;
            }
        };

        let orchestrator = Orchestrator::new(
            provider,
            host.clone(),
            self.config.orchestrator.clone(),
            self.runtime.handle().clone(),
        );

        // Listeners stay registered for the orchestrator's lifetime
        let _ = orchestrator.subscribe_progress(|event| {
            if event.is_complete {
                debug!(
                    "Attempt {} produced {} bytes of program text",
                    event.attempt,
                    event.partial_code.len()
                );
            } else {
                trace!("Attempt {}: {} bytes so far", event.attempt, event.partial_code.len());
            }
        });
        let _ = orchestrator.subscribe_state(|state| {
            if *state == OrchestratorState::RolledBack {
                warn!("Rolled back to the last working program");
            }
        });
        let _ = orchestrator.subscribe_events(|event| match event {
            OrchestratorEvent::Warning(warning) => warn!("Generation: {}", warning),
            OrchestratorEvent::Finished(CycleOutcome::Succeeded {
                description,
                attempts,
                ..
            }) => info!("New program live after {} attempt(s): {}", attempts, description),
            OrchestratorEvent::Finished(CycleOutcome::Failed(e)) => {
                error!("Generation failed: {}", e)
            }
            OrchestratorEvent::Finished(CycleOutcome::Cancelled) => {}
        });

        Some(orchestrator)
    }

    fn generate(&self, request: GenerationRequest) {
        let Some(orchestrator) = &self.orchestrator else {
            warn!("Generation is disabled");
            return;
        };
        let request = if request.features.is_none() {
            request.with_features(self.analyzer.latest_frame())
        } else {
            request
        };
        if orchestrator.generate(request).is_none() {
            info!("A generation cycle is already running");
        }
    }

    fn regenerate(&self) {
        let Some(orchestrator) = &self.orchestrator else {
            return;
        };
        if orchestrator.last_request().is_none() {
            info!("Nothing to regenerate yet");
        } else if orchestrator.regenerate().is_none() {
            info!("A generation cycle is already running");
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(host) = &self.host else {
            return;
        };
        host.push_audio_frame(&self.analyzer.latest_frame(), self.config.render.sensitivity);
        if let Err(e) = host.render_frame(self.start_time.elapsed().as_secs_f32()) {
            error!("Rendering stopped: {}", e);
            self.fatal = Some(e.into());
            event_loop.exit();
        }
    }

    fn shutdown(&mut self) {
        if let Some(orchestrator) = self.orchestrator.take() {
            orchestrator.destroy();
        }
        self.analyzer.detach();
        if let Some(host) = self.host.take() {
            host.destroy();
        }
        info!("Sonoshade shut down");
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.fatal.is_some() {
            return;
        }
        if let Err(e) = self.start(event_loop) {
            error!("Startup failed: {:#}", e);
            self.fatal = Some(e);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let Some(host) = &self.host {
                    host.resize(size.width, size.height);
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key,
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => match logical_key {
                Key::Named(NamedKey::Escape) => event_loop.exit(),
                Key::Character(c) if c.eq_ignore_ascii_case("r") => self.regenerate(),
                _ => {}
            },
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

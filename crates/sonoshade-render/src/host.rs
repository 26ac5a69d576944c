//! Render host: owns the running program and swaps in candidates.
//!
//! Invariant: once initialized, a compiled program is always running. A
//! candidate replaces it only after it compiled; a failed candidate changes
//! nothing.

use crate::surface::{DisplaySurface, ProgramInputs};
use crate::{RenderError, Result};
use arc_swap::{ArcSwap, ArcSwapOption};
use async_trait::async_trait;
use parking_lot::Mutex;
use sonoshade_core::program::{self, DEFAULT_PROGRAM};
use sonoshade_core::{AudioFeatureFrame, CancelToken, ProgramTarget};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Which generated program is running and which one to fall back to.
///
/// Both are `None` while the built-in default program runs because nothing
/// has activated yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveProgramState {
    pub current_code: Option<String>,
    pub last_good_code: Option<String>,
}

struct RunningProgram<P> {
    program: P,
    /// `None` for the built-in default
    code: Option<String>,
}

/// Hosts the active rendering program on a [`DisplaySurface`]
pub struct RenderHost<S: DisplaySurface> {
    surface: S,
    running: ArcSwapOption<RunningProgram<S::Program>>,
    /// Held for the whole of an activation or rollback
    state: Mutex<ActiveProgramState>,
    inputs: ArcSwap<AudioFeatureFrame>,
    destroyed: AtomicBool,
}

impl<S: DisplaySurface> RenderHost<S> {
    /// Compile and start the built-in default program.
    ///
    /// Fails with [`RenderError::DefaultProgramRejected`] if the default
    /// program does not compile on this surface.
    pub fn initialize(surface: S) -> Result<Self> {
        let default = surface
            .compile(&program::assemble(DEFAULT_PROGRAM))
            .map_err(|e| RenderError::DefaultProgramRejected(e.to_string()))?;

        info!("Render host initialized with the default program");

        Ok(Self {
            surface,
            running: ArcSwapOption::from_pointee(RunningProgram {
                program: default,
                code: None,
            }),
            state: Mutex::new(ActiveProgramState::default()),
            inputs: ArcSwap::from_pointee(AudioFeatureFrame::silent()),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Try to make `code` the running program.
    ///
    /// Returns false (and keeps the current program) if the host is destroyed
    /// or the candidate does not compile.
    pub fn try_activate(&self, code: &str) -> bool {
        self.activate(code, None)
    }

    /// Re-activate the last good program, or the default when there is none.
    ///
    /// On failure the current program keeps running.
    pub fn rollback(&self) -> bool {
        self.restore(None)
    }

    fn activate(&self, code: &str, token: Option<&CancelToken>) -> bool {
        let mut state = self.state.lock();
        if self.is_destroyed() {
            debug!("Activation ignored: render host destroyed");
            return false;
        }

        let compiled = match self.surface.compile(&program::assemble(code)) {
            Ok(compiled) => compiled,
            Err(e) => {
                warn!("Candidate program rejected: {}", e);
                return false;
            }
        };

        let _commit = match token.map(CancelToken::hold) {
            Some(None) => {
                debug!("Activation dropped: cycle cancelled");
                return false;
            }
            Some(guard) => guard,
            None => None,
        };
        self.running.store(Some(Arc::new(RunningProgram {
            program: compiled,
            code: Some(code.to_string()),
        })));
        state.current_code = Some(code.to_string());
        state.last_good_code = Some(code.to_string());
        info!("Activated candidate program ({} bytes)", code.len());
        true
    }

    fn restore(&self, token: Option<&CancelToken>) -> bool {
        let mut state = self.state.lock();
        if self.is_destroyed() {
            return false;
        }

        let target = state.last_good_code.clone();
        let source = target.as_deref().unwrap_or(DEFAULT_PROGRAM);
        let compiled = match self.surface.compile(&program::assemble(source)) {
            Ok(compiled) => compiled,
            Err(e) => {
                error!("Rollback failed, keeping current program: {}", e);
                return false;
            }
        };

        let _commit = match token.map(CancelToken::hold) {
            Some(None) => {
                debug!("Rollback dropped: cycle cancelled");
                return false;
            }
            Some(guard) => guard,
            None => None,
        };
        self.running.store(Some(Arc::new(RunningProgram {
            program: compiled,
            code: target.clone(),
        })));
        info!(
            "Rolled back to {}",
            if target.is_some() {
                "last good program"
            } else {
                "default program"
            }
        );
        state.current_code = target;
        true
    }

    /// Store the inputs for the next frames. Never waits on an activation.
    pub fn push_audio_frame(&self, frame: &AudioFeatureFrame, sensitivity: f32) {
        self.inputs.store(Arc::new(frame.scaled(sensitivity)));
    }

    /// Inputs the next frame will be drawn with (already scaled)
    pub fn current_inputs(&self) -> AudioFeatureFrame {
        **self.inputs.load()
    }

    /// Draw the running program.
    ///
    /// Surface hiccups are logged and skipped; only a lost device is returned.
    pub fn render_frame(&self, elapsed_seconds: f32) -> Result<()> {
        let Some(running) = self.running.load_full() else {
            return Ok(());
        };

        let inputs = ProgramInputs::new(&self.inputs.load(), self.surface.size(), elapsed_seconds);
        match self.surface.draw(&running.program, &inputs) {
            Ok(()) => Ok(()),
            Err(RenderError::DeviceLost) => {
                error!("Device lost while rendering");
                Err(RenderError::DeviceLost)
            }
            Err(e) => {
                debug!("Skipped frame: {}", e);
                Ok(())
            }
        }
    }

    /// Forward a size change to the surface; the running program is kept
    pub fn resize(&self, width: u32, height: u32) {
        if !self.is_destroyed() {
            self.surface.resize(width, height);
        }
    }

    /// Release the program and the surface. Idempotent.
    pub fn destroy(&self) {
        let mut state = self.state.lock();
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.running.store(None);
        *state = ActiveProgramState::default();
        self.surface.release();
        info!("Render host destroyed");
    }

    /// Snapshot of the program bookkeeping
    pub fn state(&self) -> ActiveProgramState {
        self.state.lock().clone()
    }

    /// True while the built-in default program is the one running
    pub fn is_default_active(&self) -> bool {
        self.running
            .load_full()
            .map(|r| r.code.is_none())
            .unwrap_or(false)
    }

    /// True after [`destroy`](Self::destroy)
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// The surface this host draws on
    pub fn surface(&self) -> &S {
        &self.surface
    }
}

#[async_trait]
impl<S: DisplaySurface> ProgramTarget for RenderHost<S> {
    async fn try_activate(&self, code: &str) -> bool {
        RenderHost::try_activate(self, code)
    }

    async fn rollback(&self) -> bool {
        RenderHost::rollback(self)
    }

    async fn try_activate_guarded(&self, code: &str, token: &CancelToken) -> bool {
        self.activate(code, Some(token))
    }

    async fn rollback_guarded(&self, token: &CancelToken) -> bool {
        self.restore(Some(token))
    }
}

impl<S: DisplaySurface> Drop for RenderHost<S> {
    fn drop(&mut self) {
        self.destroy();
    }
}

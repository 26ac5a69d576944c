//! Sonoshade - audio-reactive visuals from generated shaders
//!
//! Keys: `R` regenerates with the last request, `Esc` quits.

mod app;
mod cli;
mod logging_setup;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use sonoshade_core::{AudioSource, WavClip};
use tracing::{info, warn};
use winit::event_loop::{ControlFlow, EventLoop};

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.list_devices {
        list_devices();
        return Ok(());
    }

    let config = cli.resolve_config()?;
    let _log_guard = logging_setup::init(&config.log)?;

    if cli.save_config {
        match config.save() {
            Ok(()) => info!("Configuration saved"),
            Err(e) => warn!("Failed to save configuration: {}", e),
        }
    }

    let request = cli.initial_request(&config)?;
    let mut app = app::App::new(config, request, audio_source(&cli))?;

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);
    event_loop.run_app(&mut app)?;

    app.into_result()
}

fn audio_source(cli: &Cli) -> Option<Box<dyn AudioSource>> {
    if let Some(path) = &cli.wav {
        return Some(Box::new(WavClip::from_path(path).looping(cli.looping)));
    }
    live_input(cli.device.as_deref())
}

#[cfg(feature = "audio")]
fn live_input(device: Option<&str>) -> Option<Box<dyn AudioSource>> {
    use sonoshade_core::CpalInput;
    Some(match device {
        Some(name) => Box::new(CpalInput::named(name)),
        None => Box::new(CpalInput::default_device()),
    })
}

#[cfg(not(feature = "audio"))]
fn live_input(_device: Option<&str>) -> Option<Box<dyn AudioSource>> {
    None
}

#[cfg(feature = "audio")]
fn list_devices() {
    let devices = sonoshade_core::CpalInput::list_devices();
    if devices.is_empty() {
        println!("No audio input devices found");
    }
    for name in devices {
        println!("{}", name);
    }
}

#[cfg(not(feature = "audio"))]
fn list_devices() {
    println!("Built without live audio input");
}

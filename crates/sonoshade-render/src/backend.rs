//! wgpu device selection.

use crate::{RenderError, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Instance, adapter, device and queue shared by the display surface
pub struct WgpuBackend {
    pub instance: Arc<wgpu::Instance>,
    pub adapter: Arc<wgpu::Adapter>,
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub adapter_info: wgpu::AdapterInfo,
}

impl WgpuBackend {
    /// Pick an adapter and open a device.
    ///
    /// Vulkan, Metal and DX12 are tried first; GL only if none of them yields
    /// a device, since eager GL initialization can abort on headless hosts.
    pub async fn new(preferred_gpu: Option<&str>) -> Result<Self> {
        let native = wgpu::Backends::all() & !wgpu::Backends::GL;
        match Self::with_backends(native, preferred_gpu).await {
            Ok(backend) => Ok(backend),
            Err(e) => {
                info!("No native GPU backend ({}), trying GL", e);
                Self::with_backends(wgpu::Backends::GL, preferred_gpu).await
            }
        }
    }

    /// Open a device on one of `backends`
    pub async fn with_backends(backends: wgpu::Backends, preferred_gpu: Option<&str>) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let candidates = instance.enumerate_adapters(backends);
        debug!("{} adapter(s) on {:?}", candidates.len(), backends);

        let chosen = match preferred_gpu.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => pick_named(candidates, name),
            None => pick_best(candidates),
        };

        let adapter = match chosen {
            Some(adapter) => adapter,
            None => instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .map_err(|e| RenderError::DeviceError(format!("No adapter found: {}", e)))?,
        };

        let adapter_info = adapter.get_info();
        info!(
            "Using adapter {} ({:?}, {:?})",
            adapter_info.name, adapter_info.device_type, adapter_info.backend
        );

        // A fullscreen fragment pass needs nothing beyond downlevel limits
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Sonoshade Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults()
                    .using_resolution(adapter.limits()),
                ..Default::default()
            })
            .await
            .map_err(|e| RenderError::DeviceError(e.to_string()))?;

        Ok(Self {
            instance: Arc::new(instance),
            adapter: Arc::new(adapter),
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_info,
        })
    }

    /// Window surface on this backend's instance
    pub fn create_surface(
        &self,
        window: Arc<winit::window::Window>,
    ) -> Result<wgpu::Surface<'static>> {
        self.instance
            .create_surface(window)
            .map_err(|e| RenderError::DeviceError(format!("Failed to create surface: {}", e)))
    }
}

/// First adapter whose name contains `name` (case-insensitive), else the best one
fn pick_named(candidates: Vec<wgpu::Adapter>, name: &str) -> Option<wgpu::Adapter> {
    let needle = name.to_lowercase();
    let position = candidates
        .iter()
        .position(|a| a.get_info().name.to_lowercase().contains(&needle));

    match position {
        Some(index) => candidates.into_iter().nth(index),
        None => {
            warn!("GPU '{}' not found, choosing automatically", name);
            pick_best(candidates)
        }
    }
}

fn pick_best(candidates: Vec<wgpu::Adapter>) -> Option<wgpu::Adapter> {
    candidates
        .into_iter()
        .max_by_key(|a| device_rank(a.get_info().device_type))
}

/// Discrete > Integrated > Virtual > software
fn device_rank(device_type: wgpu::DeviceType) -> u8 {
    match device_type {
        wgpu::DeviceType::DiscreteGpu => 3,
        wgpu::DeviceType::IntegratedGpu => 2,
        wgpu::DeviceType::VirtualGpu => 1,
        wgpu::DeviceType::Cpu | wgpu::DeviceType::Other => 0,
    }
}

//! Core GPU context for headless rendering.
//!
//! This module provides [`GpuContext`], the struct that holds the wgpu
//! device and queue every GPU-touching part of the pipeline works against.
//! Unlike a windowed renderer there is no surface and no swapchain: all
//! rendering goes to offscreen textures owned by the render target.
//!
//! A context is created once, on the render thread, during target
//! initialization. Creation is the only fatal failure point in the whole
//! pipeline — a machine with no usable adapter cannot run it at all, so the
//! error is propagated to the session constructor instead of being logged
//! and swallowed.

/// Fatal GPU initialization errors.
///
/// Per-frame GPU problems (texture allocation rejected, pass skipped) are
/// logged and degrade gracefully; only the failures in this enum abort
/// construction.
#[derive(Debug)]
pub enum GpuError {
    /// No suitable GPU adapter was found.
    AdapterNotFound(String),
    /// The adapter refused to create a device.
    DeviceRequest(String),
}

impl std::fmt::Display for GpuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuError::AdapterNotFound(msg) => {
                write!(f, "No suitable GPU adapter: {}", msg)
            }
            GpuError::DeviceRequest(msg) => write!(f, "Device request failed: {}", msg),
        }
    }
}

impl std::error::Error for GpuError {}

/// Core GPU context holding the wgpu device and queue.
///
/// All fields are public to allow direct access to wgpu APIs when needed.
/// The context is created once and shared by reference with every pass and
/// with effect engines through [`RenderScene`](crate::RenderScene).
pub struct GpuContext {
    /// The logical GPU device for creating resources and pipelines.
    pub device: wgpu::Device,
    /// The command queue for submitting work to the GPU.
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Create a new headless GPU context.
    ///
    /// This performs all wgpu initialization:
    /// 1. Creates a wgpu instance with primary backends (Vulkan, Metal, DX12)
    /// 2. Requests an adapter with no surface compatibility constraint
    /// 3. Creates the logical device and command queue
    pub fn new() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| GpuError::AdapterNotFound(e.to_string()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Peltast Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
            experimental_features: Default::default(),
        }))
        .map_err(|e| GpuError::DeviceRequest(e.to_string()))?;

        Ok(Self { device, queue })
    }
}

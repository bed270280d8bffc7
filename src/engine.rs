//! The effect-engine seam.
//!
//! The pipeline treats the actual effect engine — script execution, face
//! tracking, neural inference — as an opaque external collaborator. This
//! module defines the traits it is consumed through: submit a frame, draw,
//! report completion, and expose the optional effect-manager capability for
//! loading effects and calling into their scripts.
//!
//! Everything here is object-safe so engines can be handed to
//! [`OffscreenEffectPlayer`](crate::OffscreenEffectPlayer) as boxed trait
//! objects, and so tests can substitute lightweight mocks.

use crate::frame::InputFrame;
use crate::gpu::GpuContext;

/// Session configuration, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Target surface width in pixels.
    pub width: u32,
    /// Target surface height in pixels.
    pub height: u32,
    /// When true, audio-effect triggering is routed to the caller instead
    /// of playing automatically.
    pub manual_audio: bool,
}

impl SessionConfig {
    /// Create a configuration with automatic audio playback.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            manual_audio: false,
        }
    }
}

/// Completion state of one engine draw step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawStatus {
    /// The engine has not produced the frame yet; poll again.
    Pending,
    /// The frame is fully rendered into the scene's attachment.
    Ready,
}

/// GPU handles an engine draws with, borrowed for one frame.
pub struct SceneGpu<'a> {
    /// Device for creating per-draw resources.
    pub device: &'a wgpu::Device,
    /// Queue for uploads and submission.
    pub queue: &'a wgpu::Queue,
    /// The render target's primary texture view. Everything the engine
    /// draws lands here and feeds the orientation pass.
    pub view: &'a wgpu::TextureView,
}

/// Execution context handed to the engine for each draw.
///
/// Prepared by the render target at the start of a frame. `gpu` is `None`
/// when the target could not produce an attachment (allocation failure, or
/// a non-GPU target in tests); engines must treat that as "draw nowhere"
/// and still report [`DrawStatus::Ready`] once done.
pub struct RenderScene<'a> {
    /// Attachment width in pixels.
    pub width: u32,
    /// Attachment height in pixels.
    pub height: u32,
    /// GPU handles, when an attachment is available.
    pub gpu: Option<SceneGpu<'a>>,
}

impl<'a> RenderScene<'a> {
    /// A scene with no attachment.
    pub fn detached(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            gpu: None,
        }
    }

    /// A scene backed by the given context and target view.
    pub fn attached(gpu: &'a GpuContext, view: &'a wgpu::TextureView, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            gpu: Some(SceneGpu {
                device: &gpu.device,
                queue: &gpu.queue,
                view,
            }),
        }
    }
}

/// An opaque effect engine driven by the render thread.
///
/// All methods except [`call`](EffectManager) paths are invoked on the
/// dedicated render thread, strictly serialized. The engine is contracted
/// to eventually return [`DrawStatus::Ready`] from `draw`; the pipeline
/// polls with no internal timeout.
pub trait EffectEngine: Send {
    /// Called once on the render thread before the first frame.
    fn surface_created(&mut self, config: &SessionConfig);

    /// Called when the session surface is resized.
    fn surface_changed(&mut self, width: u32, height: u32);

    /// Called during teardown, before GPU resources are destroyed.
    fn surface_destroyed(&mut self);

    /// Ingest one input frame. Ownership moves to the engine.
    fn push_frame(&mut self, frame: InputFrame);

    /// Advance rendering of the most recently pushed frame.
    fn draw(&mut self, scene: &mut RenderScene<'_>) -> DrawStatus;

    /// The effect-manager capability, if this engine has one.
    fn effect_manager(&mut self) -> Option<&mut dyn EffectManager>;
}

/// Loads and tracks the currently active effect.
pub trait EffectManager {
    /// Load the effect at `path`. The empty path unloads the current
    /// effect.
    fn load(&mut self, path: &str);

    /// Propagate a new surface size to the effect runtime.
    fn set_effect_size(&mut self, width: u32, height: u32);

    /// The currently loaded effect, if any.
    fn current(&mut self) -> Option<&mut dyn Effect>;
}

/// A loaded effect's scripting surface.
pub trait Effect {
    /// Invoke a method in the effect's script with an opaque parameter.
    fn call_js_method(&mut self, method: &str, param: &str);
}

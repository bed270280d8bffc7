//! The frame session manager.
//!
//! [`OffscreenEffectPlayer`] is the top-level orchestrator: it owns the
//! effect engine, the render target, and the current output handle, and it
//! implements frame ingestion with the pipeline's backpressure policy.
//!
//! # Backpressure
//!
//! Every submitted frame increments a pending counter before it is queued
//! and decrements it when its task resolves, so every submission resolves
//! in order whether it renders or not. A task only touches the GPU when it
//! observes a pending count of exactly 1 at run time — meaning no newer
//! frame is queued behind it. Anything else resolves immediately as "no
//! frame": the pipeline always prefers the freshest frame over working
//! through stale backlog. A frame also drops when the previous consumer
//! still holds the output handle locked.
//!
//! # Threading
//!
//! All engine and GPU work is serialized on the scheduler's render thread.
//! Queued tasks hold only weak references to the session; destroying the
//! session while tasks are queued is the only cancellation mechanism, and
//! such tasks resolve as silent no-ops.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;

use crate::bootstrap::RuntimeContext;
use crate::engine::{DrawStatus, EffectEngine, SessionConfig};
use crate::frame::{FrameData, InputFrame};
use crate::gpu::GpuError;
use crate::orientation::OrientFormat;
use crate::pixel_buffer::PixelBuffer;
use crate::scheduler::RenderScheduler;
use crate::target::{OffscreenTarget, RenderTarget};

type FrameReadyCallback = Box<dyn FnOnce(Option<Arc<PixelBuffer>>) + Send>;

/// Shared session state. Tasks and output handles reach it through weak
/// references; the last strong reference is released on the render thread
/// during teardown.
pub(crate) struct PlayerInner {
    // Engine is declared before the target so it is stopped and dropped
    // before the GPU resources it draws into.
    pub(crate) engine: Mutex<Box<dyn EffectEngine>>,
    pub(crate) target: Mutex<Box<dyn RenderTarget>>,
    pub(crate) scheduler: Arc<RenderScheduler>,
    pub(crate) pending: AtomicUsize,
    pub(crate) current_frame: Mutex<Option<Arc<PixelBuffer>>>,
    pub(crate) surface_generation: AtomicU64,
    pub(crate) config: Mutex<SessionConfig>,
}

impl PlayerInner {
    /// Get the output handle for this frame's size/orientation, creating or
    /// replacing it as needed. A locked handle is never replaced.
    fn current_output_for(self: &Arc<Self>, image: &InputFrame) -> Arc<PixelBuffer> {
        let mut current = self.current_frame.lock().unwrap();
        let replace = match &*current {
            None => true,
            Some(frame) => {
                !frame.is_locked()
                    && (frame.width() != image.width
                        || frame.height() != image.height
                        || frame.orientation() != image.orientation)
            }
        };
        if replace {
            *current = Some(Arc::new(PixelBuffer::new(
                Arc::downgrade(self),
                image.width,
                image.height,
                image.orientation,
                self.surface_generation.load(Ordering::SeqCst),
            )));
        }
        Arc::clone(current.as_ref().expect("output handle was just ensured"))
    }

    /// Body of one queued frame task. Runs on the render thread.
    fn run_frame_task(
        self: &Arc<Self>,
        image: InputFrame,
        callback: FrameReadyCallback,
        orient: OrientFormat,
    ) {
        let frame = self.current_output_for(&image);

        if frame.is_locked() {
            tracing::warn!("Previous output frame is still locked; dropping frame");
            callback(None);
        } else if self.pending.load(Ordering::SeqCst) == 1 {
            // No backlog behind this task: render it. The count is checked
            // against exactly 1 because the increment happens before
            // enqueue and the decrement after resolution.
            frame.lock();
            {
                let mut engine = self.engine.lock().unwrap();
                let mut target = self.target.lock().unwrap();
                let mut scene = target.prepare_rendering();
                engine.push_frame(image);
                while engine.draw(&mut scene) == DrawStatus::Pending {
                    thread::yield_now();
                }
                drop(scene);
                target.orient_image(orient);
            }
            callback(Some(Arc::clone(&frame)));
            frame.unlock();
        } else {
            // Stale backlog; resolve without touching the engine.
            callback(None);
        }

        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Orchestrates offscreen effect rendering for one consumer.
///
/// Construct with [`OffscreenEffectPlayer::new`], submit frames with
/// [`process_image_async`](OffscreenEffectPlayer::process_image_async), and
/// receive [`PixelBuffer`] handles through the callback. Dropping the
/// player tears the session down on the render thread; frame tasks still
/// queued at that point become silent no-ops.
pub struct OffscreenEffectPlayer {
    inner: Arc<PlayerInner>,
}

impl OffscreenEffectPlayer {
    /// Create a session.
    ///
    /// `runtime` is the process-wide bootstrap context; requiring it here
    /// keeps sessions impossible to construct before initialization. When
    /// `target` is `None` the default wgpu [`OffscreenTarget`] is used.
    ///
    /// Target initialization and the engine's `surface_created` run on the
    /// render thread before this returns; a fatal GPU failure there aborts
    /// construction.
    pub fn new(
        runtime: &RuntimeContext,
        config: SessionConfig,
        engine: Box<dyn EffectEngine>,
        target: Option<Box<dyn RenderTarget>>,
    ) -> Result<Self, GpuError> {
        tracing::debug!(
            width = config.width,
            height = config.height,
            manual_audio = config.manual_audio,
            resource_paths = ?runtime.resource_paths(),
            "Creating offscreen effect session"
        );

        let target = target
            .unwrap_or_else(|| Box::new(OffscreenTarget::new(config.width, config.height)));

        let inner = Arc::new(PlayerInner {
            engine: Mutex::new(engine),
            target: Mutex::new(target),
            scheduler: Arc::new(RenderScheduler::new()),
            pending: AtomicUsize::new(0),
            current_frame: Mutex::new(None),
            surface_generation: AtomicU64::new(0),
            config: Mutex::new(config),
        });

        // Initialize on the render thread, but surface any fatal error to
        // this constructor's caller.
        let (result_tx, result_rx) = mpsc::channel();
        let weak = Arc::downgrade(&inner);
        inner.scheduler.enqueue(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let result = inner.target.lock().unwrap().init();
            if result.is_ok() {
                let config = *inner.config.lock().unwrap();
                inner.engine.lock().unwrap().surface_created(&config);
            }
            let _ = result_tx.send(result);
        });
        result_rx
            .recv()
            .map_err(|_| GpuError::DeviceRequest("render thread terminated".into()))??;

        Ok(Self { inner })
    }

    /// Submit one frame for effect processing.
    ///
    /// The callback always fires exactly once, on the render thread:
    /// `Some(handle)` when the frame rendered, `None` when it was dropped
    /// because the output handle was locked or newer frames were already
    /// queued. When `target_orient` is omitted the frame's own orientation
    /// is corrected for, with a vertical flip.
    pub fn process_image_async<F>(
        &self,
        image: InputFrame,
        callback: F,
        target_orient: Option<OrientFormat>,
    ) where
        F: FnOnce(Option<Arc<PixelBuffer>>) + Send + 'static,
    {
        let orient = target_orient.unwrap_or(OrientFormat::new(image.orientation, true));

        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        let weak = Arc::downgrade(&self.inner);
        self.inner.scheduler.enqueue(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.run_frame_task(image, Box::new(callback), orient);
        });
    }

    /// Adopt a new surface size.
    ///
    /// Resizes the engine surface, invalidates the current output handle
    /// (handles created before this call become permanently inert), and
    /// releases the target's textures so the next frame rebuilds them.
    pub fn surface_changed(&self, width: u32, height: u32) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.scheduler.enqueue(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            {
                let mut engine = inner.engine.lock().unwrap();
                engine.surface_changed(width, height);
                if let Some(manager) = engine.effect_manager() {
                    manager.set_effect_size(width, height);
                }
            }
            inner.current_frame.lock().unwrap().take();
            inner.surface_generation.fetch_add(1, Ordering::SeqCst);
            inner.target.lock().unwrap().surface_changed(width, height);
            let mut config = inner.config.lock().unwrap();
            config.width = width;
            config.height = height;
        });
    }

    /// Load the effect at `path` on the render thread.
    ///
    /// The empty path is the canonical unload. The callback receives
    /// `false` (after an error log) when the engine exposes no
    /// effect-manager capability, `true` once the load completed.
    pub fn load_effect<F>(&self, path: impl Into<String>, callback: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let path = path.into();
        let weak = Arc::downgrade(&self.inner);
        self.inner.scheduler.enqueue(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut engine = inner.engine.lock().unwrap();
            match engine.effect_manager() {
                Some(manager) => {
                    manager.load(&path);
                    callback(true);
                }
                None => {
                    tracing::error!("Effect manager not initialized");
                    callback(false);
                }
            }
        });
    }

    /// Unload the current effect. Equivalent to loading the empty path.
    pub fn unload_effect(&self) {
        self.load_effect("", |_| {});
    }

    /// Call a method in the loaded effect's script.
    ///
    /// Returns `false` (after an error log) when no effect manager exists
    /// or no effect is loaded. Whatever the method itself produces travels
    /// through the effect's own side channels, not through this call.
    pub fn call_js_method(&self, method: &str, param: &str) -> bool {
        let mut engine = self.inner.engine.lock().unwrap();
        match engine.effect_manager() {
            Some(manager) => match manager.current() {
                Some(effect) => {
                    effect.call_js_method(method, param);
                    true
                }
                None => {
                    tracing::error!("No effect loaded");
                    false
                }
            },
            None => {
                tracing::error!("Effect manager not initialized");
                false
            }
        }
    }

    /// Read the render target's current contents.
    ///
    /// Uses the same affinity-aware dispatch as
    /// [`PixelBuffer::read_pixels`]: inline when already on the render
    /// thread, queued otherwise. A session destroyed before the read runs
    /// makes it a silent no-op.
    pub fn read_current_buffer<F>(&self, callback: F)
    where
        F: FnOnce(FrameData) + Send + 'static,
    {
        let weak = Arc::downgrade(&self.inner);
        self.inner.scheduler.dispatch(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let data = inner.target.lock().unwrap().read_current_buffer();
            callback(data);
        });
    }
}

impl Drop for OffscreenEffectPlayer {
    fn drop(&mut self) {
        // Move the last strong reference into a teardown task so the engine
        // stops, and all session state drops, on the render thread.
        let inner = Arc::clone(&self.inner);
        self.inner.scheduler.enqueue(move || {
            inner.engine.lock().unwrap().surface_destroyed();
        });
    }
}

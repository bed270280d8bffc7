//! The lockable output frame handle.
//!
//! A [`PixelBuffer`] is the reference-style handle a consumer receives for
//! one rendered frame. It does not own pixel bytes itself — it names the
//! render target's current contents and knows how to read them back on the
//! render thread. The lock counter is the pipeline's sole user-facing
//! mutual-exclusion primitive: while a consumer holds the handle locked,
//! the session refuses to overwrite the underlying texture and resolves
//! incoming frames as "no frame" instead.
//!
//! The handle holds only a weak, generation-checked back-reference to its
//! session: reads against a destroyed session, or against a session whose
//! surface was resized after the handle was created, are silent no-ops
//! rather than errors.

use std::sync::Weak;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::frame::FrameData;
use crate::orientation::Orientation;
use crate::player::PlayerInner;

/// Lockable handle over one rendered frame's pixels.
pub struct PixelBuffer {
    width: u32,
    height: u32,
    orientation: Orientation,
    lock_count: AtomicU32,
    player: Weak<PlayerInner>,
    generation: u64,
}

impl PixelBuffer {
    pub(crate) fn new(
        player: Weak<PlayerInner>,
        width: u32,
        height: u32,
        orientation: Orientation,
        generation: u64,
    ) -> Self {
        Self {
            width,
            height,
            orientation,
            lock_count: AtomicU32::new(0),
            player,
            generation,
        }
    }

    /// Width of the rendered frame in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height of the rendered frame in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Source orientation the frame was submitted with.
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Take a lock on the handle. Locks nest; each `lock` needs a matching
    /// [`unlock`](PixelBuffer::unlock).
    pub fn lock(&self) {
        self.lock_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Release one lock.
    ///
    /// Unlocking a handle that is not locked is a usage error; it is logged
    /// and the counter stays at zero rather than wrapping.
    pub fn unlock(&self) {
        let mut current = self.lock_count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                tracing::warn!("PixelBuffer::unlock called without a matching lock");
                return;
            }
            match self.lock_count.compare_exchange(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// True while at least one lock is held.
    pub fn is_locked(&self) -> bool {
        self.lock_count.load(Ordering::Acquire) > 0
    }

    /// Read the frame's RGBA8 bytes asynchronously.
    ///
    /// Routed through the session's render-thread dispatch: callers already
    /// on the render thread (for example inside a frame-ready callback) get
    /// the callback inline, everyone else gets it from the render thread
    /// later. If the owning session is gone, or the surface was resized
    /// since this handle was created, nothing happens.
    pub fn read_pixels<F>(&self, callback: F)
    where
        F: FnOnce(FrameData) + Send + 'static,
    {
        let Some(inner) = self.player.upgrade() else {
            return;
        };
        if inner.surface_generation.load(Ordering::SeqCst) != self.generation {
            tracing::debug!("Output handle predates a surface resize; read ignored");
            return;
        }

        let player = self.player.clone();
        let generation = self.generation;
        inner.scheduler.dispatch(move || {
            let Some(inner) = player.upgrade() else {
                return;
            };
            if inner.surface_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            let data = inner.target.lock().unwrap().read_current_buffer();
            callback(data);
        });
    }
}

//! # Peltast
//!
//! **A headless real-time effect frame pipeline.**
//!
//! Feed it image frames, get oriented, effect-applied RGBA pixels back —
//! asynchronously, with no window or on-screen surface anywhere. All GPU
//! and effect-engine work is serialized on one dedicated render thread;
//! orientation/flip correction runs as a single offscreen textured-quad
//! pass in wgpu.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use peltast::*;
//!
//! # fn engine() -> Box<dyn EffectEngine> { unimplemented!() }
//! fn main() -> Result<(), GpuError> {
//!     let runtime = RuntimeContext::initialize("CLIENT_TOKEN", ["/opt/effects"]);
//!
//!     let player = OffscreenEffectPlayer::new(
//!         runtime,
//!         SessionConfig::new(1280, 720),
//!         engine(),
//!         None, // default wgpu offscreen target
//!     )?;
//!
//!     player.load_effect("effects/retrowave", |ok| assert!(ok));
//!
//!     let frame = InputFrame::rgba(vec![0; 1280 * 720 * 4], 1280, 720);
//!     player.process_image_async(
//!         frame,
//!         |result| {
//!             if let Some(handle) = result {
//!                 // Hold the lock until the read completes, so the next
//!                 // frame cannot overwrite the pixels mid-read.
//!                 handle.lock();
//!                 let done = Arc::clone(&handle);
//!                 handle.read_pixels(move |data| {
//!                     println!("{} bytes", data.bytes.len());
//!                     done.unlock();
//!                 });
//!             }
//!         },
//!         None,
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Backpressure
//!
//! The pipeline never works through stale backlog: when frames arrive
//! faster than the effect engine renders, only the freshest queued frame is
//! processed and the rest resolve promptly as "no frame". A consumer that
//! keeps an output handle locked likewise causes new frames to drop rather
//! than block. Every submission gets its callback exactly once, in
//! submission order.
//!
//! ## The effect engine is yours
//!
//! Script execution, tracking, and inference live behind the
//! [`EffectEngine`] trait; this crate only contracts how frames go in and
//! pixels come out. See the trait docs for the draw protocol.

mod bootstrap;
mod engine;
mod frame;
mod gpu;
mod orientation;
mod pixel_buffer;
mod player;
mod scheduler;
mod target;

pub use bootstrap::RuntimeContext;
pub use engine::{
    DrawStatus, Effect, EffectEngine, EffectManager, RenderScene, SceneGpu, SessionConfig,
};
pub use frame::{FrameContent, FrameData, InputFrame};
pub use gpu::{GpuContext, GpuError};
pub use orientation::{OrientFormat, Orientation, QUAD_INDICES, QuadVertex, quad_vertices};
pub use pixel_buffer::PixelBuffer;
pub use player::OffscreenEffectPlayer;
pub use scheduler::RenderScheduler;
pub use target::{OffscreenTarget, RenderTarget, TARGET_FORMAT};

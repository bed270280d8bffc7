//! End-to-end pipeline tests over the public API.
//!
//! The effect engine and render target are mocks, so these run without any
//! GPU: they exercise the scheduling, backpressure, lock discipline, and
//! resize behavior of the session itself.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, mpsc};
use std::time::Duration;

use peltast::{
    DrawStatus, Effect, EffectEngine, EffectManager, FrameData, InputFrame, OffscreenEffectPlayer,
    OrientFormat, Orientation, PixelBuffer, RenderScene, RenderTarget, RuntimeContext,
    SessionConfig,
};

const TIMEOUT: Duration = Duration::from_secs(5);
const FILL: u8 = 0x2a;

fn runtime() -> &'static RuntimeContext {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    RuntimeContext::initialize("TEST_TOKEN", ["/tmp/effects"])
}

/// A manually opened gate for stalling the render thread inside mock
/// engine/manager calls.
#[derive(Default)]
struct Gate {
    open: Mutex<bool>,
    condvar: Condvar,
}

impl Gate {
    fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.condvar.notify_all();
    }

    fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.condvar.wait(open).unwrap();
        }
    }
}

/// Shared observation point for everything the mocks see.
#[derive(Default)]
struct Probe {
    pushed_frames: Mutex<Vec<u32>>,
    orient_calls: Mutex<Vec<OrientFormat>>,
    js_calls: Mutex<Vec<(String, String)>>,
    loaded: Mutex<Option<String>>,
    effect_sizes: Mutex<Vec<(u32, u32)>>,
    destroyed: AtomicBool,
}

struct MockEffect {
    probe: Arc<Probe>,
}

impl Effect for MockEffect {
    fn call_js_method(&mut self, method: &str, param: &str) {
        self.probe
            .js_calls
            .lock()
            .unwrap()
            .push((method.into(), param.into()));
    }
}

struct MockManager {
    probe: Arc<Probe>,
    effect: MockEffect,
    load_gate: Option<Arc<Gate>>,
}

impl EffectManager for MockManager {
    fn load(&mut self, path: &str) {
        if let Some(gate) = &self.load_gate {
            gate.wait();
        }
        let mut loaded = self.probe.loaded.lock().unwrap();
        *loaded = if path.is_empty() {
            None
        } else {
            Some(path.into())
        };
    }

    fn set_effect_size(&mut self, width: u32, height: u32) {
        self.probe.effect_sizes.lock().unwrap().push((width, height));
    }

    fn current(&mut self) -> Option<&mut dyn Effect> {
        if self.probe.loaded.lock().unwrap().is_some() {
            Some(&mut self.effect)
        } else {
            None
        }
    }
}

struct MockEngine {
    probe: Arc<Probe>,
    manager: Option<MockManager>,
    /// Signalled when `draw` is entered, so tests can line up backlog.
    in_draw: Option<Arc<Gate>>,
    draw_gate: Option<Arc<Gate>>,
}

impl MockEngine {
    fn new(probe: Arc<Probe>) -> Self {
        Self {
            manager: Some(MockManager {
                probe: Arc::clone(&probe),
                effect: MockEffect {
                    probe: Arc::clone(&probe),
                },
                load_gate: None,
            }),
            probe,
            in_draw: None,
            draw_gate: None,
        }
    }

    fn without_manager(probe: Arc<Probe>) -> Self {
        Self {
            probe,
            manager: None,
            in_draw: None,
            draw_gate: None,
        }
    }
}

impl EffectEngine for MockEngine {
    fn surface_created(&mut self, _config: &SessionConfig) {}

    fn surface_changed(&mut self, _width: u32, _height: u32) {}

    fn surface_destroyed(&mut self) {
        self.probe.destroyed.store(true, Ordering::SeqCst);
    }

    fn push_frame(&mut self, frame: InputFrame) {
        // Frames in these tests are tagged by their first RGBA byte.
        let tag = match &frame.content {
            peltast::FrameContent::Rgba(data) => u32::from(data[0]),
            _ => u32::MAX,
        };
        self.probe.pushed_frames.lock().unwrap().push(tag);
    }

    fn draw(&mut self, _scene: &mut RenderScene<'_>) -> DrawStatus {
        if let Some(gate) = &self.in_draw {
            gate.open();
        }
        if let Some(gate) = &self.draw_gate {
            gate.wait();
        }
        DrawStatus::Ready
    }

    fn effect_manager(&mut self) -> Option<&mut dyn EffectManager> {
        self.manager
            .as_mut()
            .map(|manager| manager as &mut dyn EffectManager)
    }
}

struct MockTarget {
    width: u32,
    height: u32,
    probe: Arc<Probe>,
}

impl RenderTarget for MockTarget {
    fn init(&mut self) -> Result<(), peltast::GpuError> {
        Ok(())
    }

    fn prepare_rendering(&mut self) -> RenderScene<'_> {
        RenderScene::detached(self.width, self.height)
    }

    fn orient_image(&mut self, format: OrientFormat) {
        self.probe.orient_calls.lock().unwrap().push(format);
    }

    fn read_current_buffer(&mut self) -> FrameData {
        FrameData {
            bytes: vec![FILL; self.width as usize * self.height as usize * 4],
            width: self.width,
            height: self.height,
        }
    }

    fn surface_changed(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }
}

struct Harness {
    player: OffscreenEffectPlayer,
    probe: Arc<Probe>,
}

fn harness_with(engine: MockEngine, probe: Arc<Probe>, width: u32, height: u32) -> Harness {
    let target = MockTarget {
        width,
        height,
        probe: Arc::clone(&probe),
    };
    let player = OffscreenEffectPlayer::new(
        runtime(),
        SessionConfig::new(width, height),
        Box::new(engine),
        Some(Box::new(target)),
    )
    .expect("mock session must construct");
    Harness { player, probe }
}

fn harness(width: u32, height: u32) -> Harness {
    let probe = Arc::new(Probe::default());
    harness_with(MockEngine::new(Arc::clone(&probe)), probe, width, height)
}

fn tagged_frame(tag: u8, width: u32, height: u32) -> InputFrame {
    let mut data = vec![0u8; width as usize * height as usize * 4];
    data[0] = tag;
    InputFrame::rgba(data, width, height)
}

/// Submit a frame and wait for its resolution.
fn submit(
    harness: &Harness,
    frame: InputFrame,
    orient: Option<OrientFormat>,
) -> Option<Arc<PixelBuffer>> {
    let (tx, rx) = mpsc::channel();
    harness.player.process_image_async(
        frame,
        move |result| {
            tx.send(result).unwrap();
        },
        orient,
    );
    rx.recv_timeout(TIMEOUT).expect("frame never resolved")
}

#[test]
fn renders_a_frame_end_to_end() {
    let h = harness(640, 480);

    let handle = submit(&h, tagged_frame(7, 640, 480), None).expect("frame should render");
    assert_eq!((handle.width(), handle.height()), (640, 480));
    assert!(!handle.is_locked());

    let (tx, rx) = mpsc::channel();
    handle.read_pixels(move |data| tx.send(data).unwrap());
    let data = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(data.bytes.len(), 640 * 480 * 4);
    assert_eq!(data.bytes, vec![FILL; 640 * 480 * 4]);

    assert_eq!(*h.probe.pushed_frames.lock().unwrap(), vec![7]);
}

#[test]
fn default_orient_is_source_orientation_with_flip() {
    let h = harness(64, 64);

    let frame = tagged_frame(1, 64, 64).with_orientation(Orientation::Deg90);
    submit(&h, frame, None).expect("frame should render");

    let explicit = OrientFormat::new(Orientation::Deg180, false);
    submit(&h, tagged_frame(2, 64, 64), Some(explicit)).expect("frame should render");

    assert_eq!(
        *h.probe.orient_calls.lock().unwrap(),
        vec![OrientFormat::new(Orientation::Deg90, true), explicit]
    );
}

#[test]
fn explicit_identity_orient_renders_and_is_forwarded() {
    let h = harness(64, 64);

    let identity = OrientFormat::default();
    assert!(submit(&h, tagged_frame(1, 64, 64), Some(identity)).is_some());

    // The identity format still reaches the target; skipping the GPU pass
    // for it is the target's decision.
    assert_eq!(*h.probe.orient_calls.lock().unwrap(), vec![identity]);
}

#[test]
fn reading_inside_the_ready_callback_runs_inline() {
    let h = harness(64, 64);

    let (tx, rx) = mpsc::channel();
    h.player.process_image_async(
        tagged_frame(1, 64, 64),
        move |result| {
            let handle = result.expect("frame should render");
            handle.lock();
            let done = Arc::clone(&handle);
            handle.read_pixels(move |data| {
                tx.send(data.bytes.len()).unwrap();
                done.unlock();
            });
            // On the render thread the read dispatches inline, so the
            // unlock in its callback has already happened.
            assert!(!handle.is_locked());
        },
        None,
    );
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 64 * 64 * 4);

    // The handle was released in time for the next frame.
    assert!(submit(&h, tagged_frame(2, 64, 64), None).is_some());
}

#[test]
fn locked_handle_drops_new_frames() {
    let h = harness(64, 64);

    // Take an extra lock inside the ready callback, before the session
    // releases its own.
    let (tx, rx) = mpsc::channel();
    h.player.process_image_async(
        tagged_frame(1, 64, 64),
        move |result| {
            let handle = result.expect("first frame should render");
            handle.lock();
            tx.send(handle).unwrap();
        },
        None,
    );
    let held = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(held.is_locked());

    // Every submission while locked resolves as "no frame".
    for tag in 2..5 {
        assert!(submit(&h, tagged_frame(tag, 64, 64), None).is_none());
    }
    assert_eq!(*h.probe.pushed_frames.lock().unwrap(), vec![1]);

    // Unlocking restores rendering; a leaked pending count would make this
    // frame observe a backlog and drop.
    held.unlock();
    assert!(submit(&h, tagged_frame(9, 64, 64), None).is_some());
    assert_eq!(*h.probe.pushed_frames.lock().unwrap(), vec![1, 9]);
}

#[test]
fn backlog_renders_only_the_freshest_frame() {
    let probe = Arc::new(Probe::default());
    let gate = Arc::new(Gate::default());
    let mut engine = MockEngine::new(Arc::clone(&probe));
    if let Some(manager) = engine.manager.as_mut() {
        manager.load_gate = Some(Arc::clone(&gate));
    }
    let h = harness_with(engine, probe, 64, 64);

    // Stall the render thread inside a load, then pile up frames.
    let (load_tx, load_rx) = mpsc::channel();
    h.player
        .load_effect("effects/slow", move |ok| load_tx.send(ok).unwrap());

    let (tx, rx) = mpsc::channel();
    for tag in 1..=5u8 {
        let tx = tx.clone();
        h.player.process_image_async(
            tagged_frame(tag, 64, 64),
            move |result| tx.send((tag, result.is_some())).unwrap(),
            None,
        );
    }
    gate.open();
    assert!(load_rx.recv_timeout(TIMEOUT).unwrap());

    let mut resolutions = Vec::new();
    for _ in 0..5 {
        resolutions.push(rx.recv_timeout(TIMEOUT).unwrap());
    }

    // All five resolve in submission order; only the last frame, which
    // observed no backlog behind it, actually rendered.
    assert_eq!(
        resolutions,
        vec![(1, false), (2, false), (3, false), (4, false), (5, true)]
    );
    assert_eq!(*h.probe.pushed_frames.lock().unwrap(), vec![5]);
}

#[test]
fn one_of_two_queued_behind_an_inflight_frame_renders() {
    let probe = Arc::new(Probe::default());
    let in_draw = Arc::new(Gate::default());
    let draw_gate = Arc::new(Gate::default());
    let mut engine = MockEngine::new(Arc::clone(&probe));
    engine.in_draw = Some(Arc::clone(&in_draw));
    engine.draw_gate = Some(Arc::clone(&draw_gate));
    let h = harness_with(engine, probe, 640, 480);

    let (tx_a, rx_a) = mpsc::channel();
    h.player.process_image_async(
        tagged_frame(1, 640, 480),
        move |result| tx_a.send(result.is_some()).unwrap(),
        None,
    );
    // A is now mid-draw; B and C arrive behind it.
    in_draw.wait();

    let (tx, rx) = mpsc::channel();
    for tag in [2u8, 3u8] {
        let tx = tx.clone();
        h.player.process_image_async(
            tagged_frame(tag, 640, 480),
            move |result| tx.send((tag, result.is_some())).unwrap(),
            None,
        );
    }
    draw_gate.open();

    // A is unaffected by B/C.
    assert!(rx_a.recv_timeout(TIMEOUT).unwrap());
    let b = rx.recv_timeout(TIMEOUT).unwrap();
    let c = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!((b.0, c.0), (2, 3));
    assert_eq!(
        usize::from(b.1) + usize::from(c.1),
        1,
        "exactly one of B/C renders"
    );
    assert_eq!(*h.probe.pushed_frames.lock().unwrap(), vec![1, 3]);
}

#[test]
fn resize_inerts_old_handles_and_renders_the_new_size() {
    let h = harness(640, 480);

    let old = submit(&h, tagged_frame(1, 640, 480), None).expect("frame should render");

    h.player.surface_changed(1280, 720);

    let fresh = submit(&h, tagged_frame(2, 1280, 720), None).expect("frame should render");
    let (tx, rx) = mpsc::channel();
    fresh.read_pixels(move |data| tx.send(data).unwrap());
    let data = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!((data.width, data.height), (1280, 720));
    assert_eq!(data.bytes.len(), 1280 * 720 * 4);

    // The pre-resize handle is permanently inert: its read is refused on
    // the calling thread, before anything is queued.
    let stale_read = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&stale_read);
    old.read_pixels(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(stale_read.load(Ordering::SeqCst), 0);

    // The engine was told about the new surface and effect size.
    assert_eq!(*h.probe.effect_sizes.lock().unwrap(), vec![(1280, 720)]);
}

#[test]
fn load_and_unload_effect_with_scripting() {
    let h = harness(64, 64);

    // Nothing loaded yet: scripting fails.
    assert!(!h.player.call_js_method("onStart", "{}"));

    let (tx, rx) = mpsc::channel();
    h.player
        .load_effect("effects/retrowave", move |ok| tx.send(ok).unwrap());
    assert!(rx.recv_timeout(TIMEOUT).unwrap());
    assert_eq!(
        h.probe.loaded.lock().unwrap().as_deref(),
        Some("effects/retrowave")
    );

    assert!(h.player.call_js_method("setIntensity", "0.5"));
    assert_eq!(
        *h.probe.js_calls.lock().unwrap(),
        vec![("setIntensity".to_string(), "0.5".to_string())]
    );

    // The empty path is the canonical unload and still reports success.
    let (tx, rx) = mpsc::channel();
    h.player.load_effect("", move |ok| tx.send(ok).unwrap());
    assert!(rx.recv_timeout(TIMEOUT).unwrap());
    assert!(h.probe.loaded.lock().unwrap().is_none());
    assert!(!h.player.call_js_method("setIntensity", "0.9"));
}

#[test]
fn engine_without_manager_reports_capability_unavailable() {
    let probe = Arc::new(Probe::default());
    let engine = MockEngine::without_manager(Arc::clone(&probe));
    let h = harness_with(engine, probe, 64, 64);

    let (tx, rx) = mpsc::channel();
    h.player
        .load_effect("effects/any", move |ok| tx.send(ok).unwrap());
    assert!(!rx.recv_timeout(TIMEOUT).unwrap());
    assert!(!h.player.call_js_method("onStart", "{}"));

    // Frames still render without an effect manager.
    assert!(submit(&h, tagged_frame(1, 64, 64), None).is_some());
}

#[test]
fn drop_resolves_queued_frames_and_stops_the_engine() {
    let probe = Arc::new(Probe::default());
    let gate = Arc::new(Gate::default());
    let mut engine = MockEngine::new(Arc::clone(&probe));
    if let Some(manager) = engine.manager.as_mut() {
        manager.load_gate = Some(Arc::clone(&gate));
    }
    let h = harness_with(engine, Arc::clone(&probe), 64, 64);

    h.player.load_effect("effects/slow", |_| {});
    let (tx, rx) = mpsc::channel();
    for tag in [1u8, 2u8] {
        let tx = tx.clone();
        h.player.process_image_async(
            tagged_frame(tag, 64, 64),
            move |result| tx.send(result.is_some()).unwrap(),
            None,
        );
    }

    drop(h.player);
    gate.open();

    // Tasks queued before teardown still resolve, in order; then the
    // engine is stopped on the render thread.
    assert!(!rx.recv_timeout(TIMEOUT).unwrap());
    assert!(rx.recv_timeout(TIMEOUT).unwrap());
    let deadline = std::time::Instant::now() + TIMEOUT;
    while !probe.destroyed.load(Ordering::SeqCst) {
        assert!(std::time::Instant::now() < deadline, "engine never stopped");
        std::thread::yield_now();
    }
}

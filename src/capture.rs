use crate::calibration::Projector;
use crate::error::{Error, Result};
use crate::frame::{FrameTimestamps, RgbdFrame};
use crate::runtime::{
    CaptureConfig, ColorSample, DepthSample, DeviceInfo, NodeDesc, NodeId, NodeKind, Resolution,
    SensorObserver, SensorRuntime,
};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How long `shutdown()` waits for the runtime thread before proceeding
/// without it.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(200);
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Condition of the streaming side, readable at any time from the polling
/// thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamHealth {
    Running = 0,
    /// The runtime reported a fault; the stable buffers still serve the last
    /// committed data.
    Degraded = 1,
    Stopped = 2,
}

impl StreamHealth {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StreamHealth::Running,
            1 => StreamHealth::Degraded,
            _ => StreamHealth::Stopped,
        }
    }
}

/// Frame accounting. `*_frames` counts callbacks seen, `*_dropped` the subset
/// discarded because the pending lock was contended or the sample was
/// malformed.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureStats {
    pub color_frames: u64,
    pub depth_frames: u64,
    pub color_dropped: u64,
    pub depth_dropped: u64,
}

#[derive(Default)]
struct Counters {
    color_frames: AtomicU64,
    depth_frames: AtomicU64,
    color_dropped: AtomicU64,
    depth_dropped: AtomicU64,
}

/// Producer-written half of the double buffer, plus the capture times that
/// travel with it. Everything here is guarded by one lock.
struct Pending {
    color: Vec<u8>,
    depth: Vec<f32>,
    timestamps: FrameTimestamps,
}

struct Bindings {
    color: Option<NodeId>,
    depth: Option<NodeId>,
}

/// State shared with the runtime's dispatch thread.
struct Shared {
    runtime: Weak<dyn SensorRuntime>,
    config: CaptureConfig,
    resolution: Resolution,
    pending: Mutex<Pending>,
    projector: Mutex<Option<Projector>>,
    bindings: Mutex<Bindings>,
    device_present: AtomicBool,
    health: AtomicU8,
    counters: Counters,
}

/// Configure and subscribe `node` if its slot is free, returning the
/// negotiated resolution when it was bound. Audio nodes are not captured.
fn bind_node(
    runtime: &dyn SensorRuntime,
    config: &CaptureConfig,
    bindings: &mut Bindings,
    node: NodeDesc,
) -> Result<Option<Resolution>> {
    match node.kind {
        NodeKind::Color if bindings.color.is_none() => {
            let resolution = runtime.configure_color(node.id, &config.color)?;
            runtime.register_node(node.id)?;
            bindings.color = Some(node.id);
            info!(
                "color node {:?} configured at {}x{}",
                node.id, resolution.width, resolution.height
            );
            Ok(Some(resolution))
        }
        NodeKind::Depth if bindings.depth.is_none() => {
            let resolution = runtime.configure_depth(node.id, &config.depth)?;
            runtime.register_node(node.id)?;
            bindings.depth = Some(node.id);
            info!(
                "depth node {:?} configured at {}x{}",
                node.id, resolution.width, resolution.height
            );
            Ok(Some(resolution))
        }
        _ => Ok(None),
    }
}

impl Shared {
    fn lock_bindings(&self) -> std::sync::MutexGuard<'_, Bindings> {
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SensorObserver for Shared {
    fn on_device_added(&self, device: &DeviceInfo) {
        if !self.device_present.swap(true, Ordering::SeqCst) {
            info!("device {} ({}) attached", device.id, device.model);
        }
    }

    fn on_device_removed(&self, device_id: &str) {
        self.device_present.store(false, Ordering::SeqCst);
        warn!("device {} detached", device_id);
    }

    fn on_node_added(&self, device_id: &str, node: NodeDesc) {
        let Some(runtime) = self.runtime.upgrade() else {
            return;
        };
        let mut bindings = self.lock_bindings();
        match bind_node(runtime.as_ref(), &self.config, &mut bindings, node) {
            Ok(Some(resolution))
                if node.kind == NodeKind::Color && resolution != self.resolution =>
            {
                // Buffers are sized once at startup; a color node negotiating
                // a different resolution cannot be captured into them.
                warn!(
                    "color node on {} negotiated {}x{}, buffers are {}x{}; ignoring node",
                    device_id,
                    resolution.width,
                    resolution.height,
                    self.resolution.width,
                    self.resolution.height
                );
                bindings.color = None;
                if let Err(e) = runtime.unregister_node(node.id) {
                    warn!("failed to unregister mismatched color node: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("failed to configure node on {}: {}", device_id, e),
        }
    }

    fn on_node_removed(&self, device_id: &str, node: NodeDesc) {
        let mut bindings = self.lock_bindings();
        if bindings.color == Some(node.id) {
            bindings.color = None;
            info!("color node on {} removed", device_id);
        }
        if bindings.depth == Some(node.id) {
            bindings.depth = None;
            info!("depth node on {} removed", device_id);
        }
    }

    fn on_color_frame(&self, sample: ColorSample<'_>) {
        self.counters.color_frames.fetch_add(1, Ordering::Relaxed);
        let Ok(mut pending) = self.pending.try_lock() else {
            // A grab is in flight; skip this frame rather than stall the
            // runtime's dispatch thread.
            self.counters.color_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if sample.data.len() != pending.color.len() {
            warn!(
                "color sample of {} bytes does not fit the {}x{} buffer; dropping",
                sample.data.len(),
                self.resolution.width,
                self.resolution.height
            );
            self.counters.color_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        pending.color.copy_from_slice(sample.data);
        pending.timestamps.color_ns = sample.timestamp_ns;
    }

    fn on_depth_frame(&self, sample: DepthSample<'_>) {
        self.counters.depth_frames.fetch_add(1, Ordering::Relaxed);

        // Refresh calibration before touching the buffer lock, so a committed
        // frame is always projected with the parameters it arrived with.
        let mut guard = self
            .projector
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let projector = guard.get_or_insert_with(|| Projector::new(*sample.calibration));
        if projector.calibration() != sample.calibration {
            projector.set_calibration(*sample.calibration);
        }

        let Ok(mut pending) = self.pending.try_lock() else {
            self.counters.depth_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        let width = self.resolution.width as f32;
        let height = self.resolution.height as f32;
        let stride = self.resolution.width as usize;
        pending.depth.fill(0.0);
        for vertex in sample.vertices {
            let Some((u, v)) = projector.to_color_plane(vertex) else {
                continue;
            };
            if u >= 0.0 && u < width && v >= 0.0 && v < height {
                // Last writer wins when several vertices land on one pixel.
                pending.depth[v as usize * stride + u as usize] = vertex.z;
            }
        }
        pending.timestamps.depth_ns = sample.timestamp_ns;
    }
}

/// Double-buffered capture of the latest color + depth frame pair.
///
/// The runtime's dispatch thread writes into a pending buffer pair under a
/// try-lock, dropping frames when the lock is contended. [`grab`] copies the
/// pending pair into stable buffers that [`retrieve`] exposes without any
/// locking; a snapshot therefore stays valid and unaliased until the next
/// grab.
///
/// [`grab`]: RgbdCapture::grab
/// [`retrieve`]: RgbdCapture::retrieve
pub struct RgbdCapture {
    runtime: Arc<dyn SensorRuntime>,
    shared: Arc<Shared>,
    stable_color: Vec<u8>,
    stable_depth: Vec<f32>,
    stable_timestamps: FrameTimestamps,
    width: u32,
    height: u32,
    runtime_thread: Option<JoinHandle<()>>,
}

impl RgbdCapture {
    /// Open the first device the runtime reports, configure its color and
    /// depth nodes and start streaming.
    ///
    /// A color node is required since it fixes the buffer dimensions; a
    /// device without a depth node streams color with an all-zero depth
    /// buffer.
    pub fn open(runtime: Arc<dyn SensorRuntime>, config: CaptureConfig) -> Result<Self> {
        let device = runtime
            .devices()?
            .into_iter()
            .next()
            .ok_or(Error::NoDevice)?;
        info!("using device {} ({})", device.id, device.model);

        let mut bindings = Bindings {
            color: None,
            depth: None,
        };
        let mut color_resolution = None;
        for node in runtime.nodes(&device.id)? {
            if let Some(resolution) = bind_node(runtime.as_ref(), &config, &mut bindings, node)? {
                if node.kind == NodeKind::Color {
                    color_resolution = Some(resolution);
                }
            }
        }
        let resolution = color_resolution.ok_or(Error::NoColorStream)?;
        if bindings.depth.is_none() {
            warn!(
                "device {} exposes no depth node; depth buffer will stay empty",
                device.id
            );
        }

        let pixels = resolution.width as usize * resolution.height as usize;
        let shared = Arc::new(Shared {
            runtime: Arc::downgrade(&runtime),
            config,
            resolution,
            pending: Mutex::new(Pending {
                color: vec![0; pixels * 3],
                depth: vec![0.0; pixels],
                timestamps: FrameTimestamps::default(),
            }),
            projector: Mutex::new(None),
            bindings: Mutex::new(bindings),
            device_present: AtomicBool::new(true),
            health: AtomicU8::new(StreamHealth::Running as u8),
            counters: Counters::default(),
        });
        runtime.set_observer(shared.clone());

        let thread_runtime = Arc::clone(&runtime);
        let thread_shared = Arc::clone(&shared);
        let runtime_thread = std::thread::spawn(move || {
            let result = thread_runtime
                .start_nodes()
                .and_then(|()| thread_runtime.run());
            match result {
                Ok(()) => thread_shared
                    .health
                    .store(StreamHealth::Stopped as u8, Ordering::SeqCst),
                Err(e) => {
                    warn!("sensor runtime stopped with a fault: {}", e);
                    thread_shared
                        .health
                        .store(StreamHealth::Degraded as u8, Ordering::SeqCst);
                }
            }
        });

        Ok(Self {
            runtime,
            shared,
            stable_color: vec![0; pixels * 3],
            stable_depth: vec![0.0; pixels],
            stable_timestamps: FrameTimestamps::default(),
            width: resolution.width,
            height: resolution.height,
            runtime_thread: Some(runtime_thread),
        })
    }

    /// Copy the pending frame pair into the stable buffers.
    ///
    /// Blocks until any in-flight producer write releases the lock. The
    /// producer never blocks on it in return; a callback that loses the race
    /// drops its frame.
    pub fn grab(&mut self) {
        let pending = self
            .shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.stable_color.copy_from_slice(&pending.color);
        self.stable_depth.copy_from_slice(&pending.depth);
        self.stable_timestamps = pending.timestamps;
    }

    /// View the stable buffers. Repeated calls return identical data until
    /// the next [`grab`](RgbdCapture::grab), which is the only mutator of the
    /// stable side.
    pub fn retrieve(&self) -> RgbdFrame<'_> {
        RgbdFrame {
            color: &self.stable_color,
            depth: &self.stable_depth,
            width: self.width,
            height: self.height,
        }
    }

    /// Capture times of the frames currently in the stable buffers.
    pub fn timestamps(&self) -> FrameTimestamps {
        self.stable_timestamps
    }

    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.width,
            height: self.height,
        }
    }

    pub fn health(&self) -> StreamHealth {
        StreamHealth::from_u8(self.shared.health.load(Ordering::SeqCst))
    }

    pub fn stats(&self) -> CaptureStats {
        let c = &self.shared.counters;
        CaptureStats {
            color_frames: c.color_frames.load(Ordering::Relaxed),
            depth_frames: c.depth_frames.load(Ordering::Relaxed),
            color_dropped: c.color_dropped.load(Ordering::Relaxed),
            depth_dropped: c.depth_dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop the runtime and release the bound nodes.
    ///
    /// Returns whether the runtime thread exited within the shutdown window;
    /// teardown proceeds either way. Subsequent calls are no-ops.
    pub fn shutdown(&mut self) -> Result<bool> {
        let Some(handle) = self.runtime_thread.take() else {
            return Ok(true);
        };
        self.runtime.quit();

        let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
        let mut exited = false;
        loop {
            if handle.is_finished() {
                exited = true;
                let _ = handle.join();
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    "runtime thread still busy after {:?}; proceeding with teardown",
                    SHUTDOWN_TIMEOUT
                );
                break;
            }
            std::thread::sleep(JOIN_POLL_INTERVAL);
        }

        self.runtime.stop_nodes()?;
        let nodes = {
            let mut bindings = self.shared.lock_bindings();
            [bindings.color.take(), bindings.depth.take()]
        };
        for node in nodes.into_iter().flatten() {
            self.runtime.unregister_node(node)?;
        }
        self.shared
            .health
            .store(StreamHealth::Stopped as u8, Ordering::SeqCst);
        Ok(exited)
    }
}

impl std::fmt::Debug for RgbdCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RgbdCapture")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("health", &self.health())
            .finish_non_exhaustive()
    }
}

impl Drop for RgbdCapture {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

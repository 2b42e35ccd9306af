use nalgebra::Point3;
use rgbd_capture::{
    CaptureConfig, ColorSample, DepthSample, DeviceInfo, Error, Extrinsics, FrameTimestamps,
    Intrinsics, NodeDesc, NodeId, NodeKind, RgbdCapture, Resolution, SensorObserver,
    SensorRuntime, StereoCalibration, StreamHealth,
};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Clone, Copy)]
enum RunBehavior {
    /// Block until `quit()`, then exit cleanly.
    WaitForQuit,
    /// Keep running well past the shutdown window, then exit.
    IgnoreQuit,
    /// Fail immediately, as a faulting stream would.
    Fail,
}

struct FakeRuntime {
    devices: Vec<DeviceInfo>,
    nodes: Vec<NodeDesc>,
    behavior: RunBehavior,
    observer: Mutex<Option<Arc<dyn SensorObserver>>>,
    quit: Mutex<bool>,
    quit_cv: Condvar,
}

impl FakeRuntime {
    fn new(behavior: RunBehavior) -> Self {
        Self {
            devices: vec![DeviceInfo {
                id: "fake-0".into(),
                model: "scripted".into(),
            }],
            nodes: vec![
                NodeDesc {
                    id: NodeId(0),
                    kind: NodeKind::Color,
                },
                NodeDesc {
                    id: NodeId(1),
                    kind: NodeKind::Depth,
                },
            ],
            behavior,
            observer: Mutex::new(None),
            quit: Mutex::new(false),
            quit_cv: Condvar::new(),
        }
    }

    fn without_devices() -> Self {
        let mut runtime = Self::new(RunBehavior::WaitForQuit);
        runtime.devices.clear();
        runtime
    }

    fn without_color_node() -> Self {
        let mut runtime = Self::new(RunBehavior::WaitForQuit);
        runtime.nodes.retain(|n| n.kind != NodeKind::Color);
        runtime
    }

    /// The observer the capture registered during `open()`.
    fn observer(&self) -> Arc<dyn SensorObserver> {
        self.observer
            .lock()
            .unwrap()
            .clone()
            .expect("observer not registered")
    }
}

impl SensorRuntime for FakeRuntime {
    fn devices(&self) -> rgbd_capture::Result<Vec<DeviceInfo>> {
        Ok(self.devices.clone())
    }

    fn nodes(&self, _device_id: &str) -> rgbd_capture::Result<Vec<NodeDesc>> {
        Ok(self.nodes.clone())
    }

    fn configure_color(
        &self,
        _node: NodeId,
        config: &rgbd_capture::ColorConfig,
    ) -> rgbd_capture::Result<Resolution> {
        Ok(config.frame_format.resolution())
    }

    fn configure_depth(
        &self,
        _node: NodeId,
        config: &rgbd_capture::DepthConfig,
    ) -> rgbd_capture::Result<Resolution> {
        Ok(config.frame_format.resolution())
    }

    fn register_node(&self, _node: NodeId) -> rgbd_capture::Result<()> {
        Ok(())
    }

    fn unregister_node(&self, _node: NodeId) -> rgbd_capture::Result<()> {
        Ok(())
    }

    fn set_observer(&self, observer: Arc<dyn SensorObserver>) {
        *self.observer.lock().unwrap() = Some(observer);
    }

    fn start_nodes(&self) -> rgbd_capture::Result<()> {
        Ok(())
    }

    fn stop_nodes(&self) -> rgbd_capture::Result<()> {
        Ok(())
    }

    fn run(&self) -> rgbd_capture::Result<()> {
        match self.behavior {
            RunBehavior::WaitForQuit => {
                let mut quit = self.quit.lock().unwrap();
                while !*quit {
                    quit = self.quit_cv.wait(quit).unwrap();
                }
                Ok(())
            }
            RunBehavior::IgnoreQuit => {
                std::thread::sleep(Duration::from_millis(600));
                Ok(())
            }
            RunBehavior::Fail => Err(Error::Runtime("stream fault".into())),
        }
    }

    fn quit(&self) {
        *self.quit.lock().unwrap() = true;
        self.quit_cv.notify_all();
    }
}

/// Unit-focal calibration: a vertex (x, y, z) projects to (x/z, y/z).
fn unit_calibration() -> StereoCalibration {
    let unit = |width, height| Intrinsics {
        width,
        height,
        fx: 1.0,
        fy: 1.0,
        cx: 0.0,
        cy: 0.0,
    };
    StereoCalibration {
        color: unit(640, 480),
        depth: unit(320, 240),
        extrinsics: Extrinsics::identity(),
    }
}

#[test]
fn end_to_end_single_vertex_scenario() {
    let runtime = Arc::new(FakeRuntime::new(RunBehavior::WaitForQuit));
    let mut capture = RgbdCapture::open(runtime.clone(), CaptureConfig::default()).unwrap();
    let observer = runtime.observer();

    let color = vec![128u8; 640 * 480 * 3];
    observer.on_color_frame(ColorSample {
        data: &color,
        timestamp_ns: 1_000,
    });

    let calibration = unit_calibration();
    // Projects to color pixel (100, 50) with z = 1.5.
    let vertices = [Point3::new(150.0, 75.0, 1.5)];
    observer.on_depth_frame(DepthSample {
        vertices: &vertices,
        calibration: &calibration,
        timestamp_ns: 2_000,
    });

    capture.grab();
    let frame = capture.retrieve();
    assert_eq!(frame.width, 640);
    assert_eq!(frame.height, 480);
    assert!(frame.color.iter().all(|&b| b == 128));
    for (i, &d) in frame.depth.iter().enumerate() {
        if i == 50 * 640 + 100 {
            assert_eq!(d, 1.5);
        } else {
            assert_eq!(d, 0.0);
        }
    }
    assert_eq!(
        capture.timestamps(),
        FrameTimestamps {
            color_ns: 1_000,
            depth_ns: 2_000,
        }
    );

    assert!(capture.shutdown().unwrap());
}

#[test]
fn retrieve_is_idempotent_between_grabs() {
    let runtime = Arc::new(FakeRuntime::new(RunBehavior::WaitForQuit));
    let mut capture = RgbdCapture::open(runtime.clone(), CaptureConfig::default()).unwrap();
    let observer = runtime.observer();

    observer.on_color_frame(ColorSample {
        data: &vec![10u8; 640 * 480 * 3],
        timestamp_ns: 1,
    });
    capture.grab();

    let first: Vec<u8> = capture.retrieve().color.to_vec();
    let second: Vec<u8> = capture.retrieve().color.to_vec();
    assert_eq!(first, second);

    // New pending data must not show through until the next grab.
    observer.on_color_frame(ColorSample {
        data: &vec![20u8; 640 * 480 * 3],
        timestamp_ns: 2,
    });
    assert_eq!(capture.retrieve().color.to_vec(), first);

    capture.grab();
    assert!(capture.retrieve().color.iter().all(|&b| b == 20));

    capture.shutdown().unwrap();
}

#[test]
fn out_of_bounds_vertices_leave_the_depth_buffer_untouched() {
    let runtime = Arc::new(FakeRuntime::new(RunBehavior::WaitForQuit));
    let mut capture = RgbdCapture::open(runtime.clone(), CaptureConfig::default()).unwrap();
    let observer = runtime.observer();

    let calibration = unit_calibration();
    let vertices = [
        Point3::new(-10.0, 5.0, 1.0),   // left of the image
        Point3::new(640.0, 0.0, 1.0),   // one past the right edge
        Point3::new(0.0, 480.0, 1.0),   // one past the bottom edge
        Point3::new(0.0, 0.0, 0.75),    // exactly (0, 0)
    ];
    observer.on_depth_frame(DepthSample {
        vertices: &vertices,
        calibration: &calibration,
        timestamp_ns: 1,
    });

    capture.grab();
    let frame = capture.retrieve();
    assert_eq!(frame.depth_at(0, 0), Some(0.75));
    assert_eq!(frame.depth.iter().filter(|&&d| d != 0.0).count(), 1);

    capture.shutdown().unwrap();
}

#[test]
fn open_fails_without_a_device_or_color_stream() {
    let err = RgbdCapture::open(
        Arc::new(FakeRuntime::without_devices()),
        CaptureConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::NoDevice));

    let err = RgbdCapture::open(
        Arc::new(FakeRuntime::without_color_node()),
        CaptureConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::NoColorStream));
}

#[test]
fn grab_before_any_frame_yields_zeroed_buffers() {
    let runtime = Arc::new(FakeRuntime::new(RunBehavior::WaitForQuit));
    let mut capture = RgbdCapture::open(runtime, CaptureConfig::default()).unwrap();

    capture.grab();
    let frame = capture.retrieve();
    assert!(frame.color.iter().all(|&b| b == 0));
    assert!(frame.depth.iter().all(|&d| d == 0.0));
    assert_eq!(capture.timestamps(), FrameTimestamps::default());

    capture.shutdown().unwrap();
}

#[test]
fn runtime_fault_is_reported_as_degraded_health() {
    let runtime = Arc::new(FakeRuntime::new(RunBehavior::Fail));
    let mut capture = RgbdCapture::open(runtime, CaptureConfig::default()).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while capture.health() != StreamHealth::Degraded {
        assert!(Instant::now() < deadline, "health never became Degraded");
        std::thread::sleep(Duration::from_millis(5));
    }

    // The failed thread has exited, so shutdown still reports a clean join.
    assert!(capture.shutdown().unwrap());
    assert_eq!(capture.health(), StreamHealth::Stopped);
}

#[test]
fn shutdown_joins_a_cooperative_runtime() {
    let runtime = Arc::new(FakeRuntime::new(RunBehavior::WaitForQuit));
    let mut capture = RgbdCapture::open(runtime, CaptureConfig::default()).unwrap();

    assert!(capture.shutdown().unwrap());
    assert_eq!(capture.health(), StreamHealth::Stopped);
    // Idempotent.
    assert!(capture.shutdown().unwrap());
}

#[test]
fn shutdown_gives_up_on_a_stuck_runtime() {
    let runtime = Arc::new(FakeRuntime::new(RunBehavior::IgnoreQuit));
    let mut capture = RgbdCapture::open(runtime, CaptureConfig::default()).unwrap();

    let exited = capture.shutdown().unwrap();
    assert!(!exited, "stuck runtime should outlive the shutdown window");
    assert_eq!(capture.health(), StreamHealth::Stopped);
}

#[test]
fn concurrent_producer_never_tears_a_frame() {
    let runtime = Arc::new(FakeRuntime::new(RunBehavior::WaitForQuit));
    let mut capture = RgbdCapture::open(runtime.clone(), CaptureConfig::default()).unwrap();
    let observer = runtime.observer();

    let producer = std::thread::spawn(move || {
        let mut data = vec![0u8; 640 * 480 * 3];
        for i in 0..500u32 {
            data.fill((i % 251) as u8);
            observer.on_color_frame(ColorSample {
                data: &data,
                timestamp_ns: i as u64,
            });
        }
    });

    // Every snapshot must be uniform: a mix of two fill values would mean a
    // torn copy.
    for _ in 0..200 {
        capture.grab();
        let frame = capture.retrieve();
        let first = frame.color[0];
        assert!(frame.color.iter().all(|&b| b == first));
    }

    producer.join().unwrap();
    let stats = capture.stats();
    assert_eq!(stats.color_frames, 500);
    assert!(stats.color_dropped <= stats.color_frames);

    capture.shutdown().unwrap();
}

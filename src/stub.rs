//! Synthetic in-process runtime for running the capture stack without
//! hardware. Generates a scrolling color gradient and a rippled depth plane
//! under a fixed stereo calibration.

use crate::calibration::{Extrinsics, Intrinsics, StereoCalibration};
use crate::error::Result;
use crate::runtime::{
    ColorConfig, ColorSample, DepthConfig, DepthSample, DeviceInfo, NodeDesc, NodeId, NodeKind,
    Resolution, SensorObserver, SensorRuntime,
};
use nalgebra::{Point3, Vector3};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

const COLOR_NODE: NodeId = NodeId(0);
const DEPTH_NODE: NodeId = NodeId(1);

pub struct SyntheticRuntime {
    observer: Mutex<Option<Arc<dyn SensorObserver>>>,
    color_resolution: Mutex<Resolution>,
    depth_resolution: Mutex<Resolution>,
    quit_requested: AtomicBool,
    frame_period: Duration,
    started: Instant,
}

impl SyntheticRuntime {
    pub fn new() -> Self {
        Self::with_frame_period(Duration::from_millis(40))
    }

    pub fn with_frame_period(frame_period: Duration) -> Self {
        Self {
            observer: Mutex::new(None),
            color_resolution: Mutex::new(Resolution {
                width: 640,
                height: 480,
            }),
            depth_resolution: Mutex::new(Resolution {
                width: 320,
                height: 240,
            }),
            quit_requested: AtomicBool::new(false),
            frame_period,
            started: Instant::now(),
        }
    }

    fn calibration(&self, color: Resolution, depth: Resolution) -> StereoCalibration {
        StereoCalibration {
            color: Intrinsics {
                width: color.width,
                height: color.height,
                fx: 0.89 * color.width as f32,
                fy: 0.89 * color.width as f32,
                cx: color.width as f32 / 2.0 - 0.5,
                cy: color.height as f32 / 2.0 - 0.5,
            },
            depth: Intrinsics {
                width: depth.width,
                height: depth.height,
                fx: 0.89 * depth.width as f32,
                fy: 0.89 * depth.width as f32,
                cx: depth.width as f32 / 2.0 - 0.5,
                cy: depth.height as f32 / 2.0 - 0.5,
            },
            // 25 mm stereo baseline along x.
            extrinsics: Extrinsics {
                rotation: nalgebra::Matrix3::identity(),
                translation: Vector3::new(-0.025, 0.0, 0.0),
            },
        }
    }

    fn color_frame(resolution: Resolution, tick: u64) -> Vec<u8> {
        let mut data = Vec::with_capacity((resolution.width * resolution.height * 3) as usize);
        for y in 0..resolution.height {
            for x in 0..resolution.width {
                data.push((x as u64 + tick) as u8);
                data.push(y as u8);
                data.push(128);
            }
        }
        data
    }

    fn depth_vertices(
        calibration: &StereoCalibration,
        resolution: Resolution,
        tick: u64,
    ) -> Vec<Point3<f32>> {
        let d = &calibration.depth;
        let phase = tick as f32 * 0.1;
        let mut vertices = Vec::with_capacity((resolution.width * resolution.height) as usize);
        for y in 0..resolution.height {
            for x in 0..resolution.width {
                let z = 1.0
                    + 0.25
                        * (x as f32 / 32.0 + phase).sin()
                        * (y as f32 / 32.0).cos();
                vertices.push(Point3::new(
                    (x as f32 - d.cx) / d.fx * z,
                    (y as f32 - d.cy) / d.fy * z,
                    z,
                ));
            }
        }
        vertices
    }

    fn current_observer(&self) -> Option<Arc<dyn SensorObserver>> {
        self.observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for SyntheticRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorRuntime for SyntheticRuntime {
    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(vec![DeviceInfo {
            id: "synthetic-0".into(),
            model: "synthetic".into(),
        }])
    }

    fn nodes(&self, _device_id: &str) -> Result<Vec<NodeDesc>> {
        Ok(vec![
            NodeDesc {
                id: COLOR_NODE,
                kind: NodeKind::Color,
            },
            NodeDesc {
                id: DEPTH_NODE,
                kind: NodeKind::Depth,
            },
        ])
    }

    fn configure_color(&self, _node: NodeId, config: &ColorConfig) -> Result<Resolution> {
        let resolution = config.frame_format.resolution();
        *self
            .color_resolution
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = resolution;
        Ok(resolution)
    }

    fn configure_depth(&self, _node: NodeId, config: &DepthConfig) -> Result<Resolution> {
        let resolution = config.frame_format.resolution();
        *self
            .depth_resolution
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = resolution;
        Ok(resolution)
    }

    fn register_node(&self, _node: NodeId) -> Result<()> {
        Ok(())
    }

    fn unregister_node(&self, _node: NodeId) -> Result<()> {
        Ok(())
    }

    fn set_observer(&self, observer: Arc<dyn SensorObserver>) {
        *self
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(observer);
    }

    fn start_nodes(&self) -> Result<()> {
        Ok(())
    }

    fn stop_nodes(&self) -> Result<()> {
        Ok(())
    }

    fn run(&self) -> Result<()> {
        let color_resolution = *self
            .color_resolution
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let depth_resolution = *self
            .depth_resolution
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let calibration = self.calibration(color_resolution, depth_resolution);

        let mut tick = 0u64;
        while !self.quit_requested.load(Ordering::SeqCst) {
            std::thread::sleep(self.frame_period);
            let Some(observer) = self.current_observer() else {
                continue;
            };
            let timestamp_ns = self.started.elapsed().as_nanos() as u64;

            let color = Self::color_frame(color_resolution, tick);
            observer.on_color_frame(ColorSample {
                data: &color,
                timestamp_ns,
            });

            let vertices = Self::depth_vertices(&calibration, depth_resolution, tick);
            observer.on_depth_frame(DepthSample {
                vertices: &vertices,
                calibration: &calibration,
                timestamp_ns,
            });

            tick += 1;
        }
        Ok(())
    }

    fn quit(&self) {
        self.quit_requested.store(true, Ordering::SeqCst);
    }
}

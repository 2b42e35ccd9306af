//! Boundary types for the vendor sensor runtime.
//!
//! The runtime owns device enumeration, stream decoding and event dispatch.
//! The crate talks to it through [`SensorRuntime`] and receives data back
//! through a registered [`SensorObserver`], whose frame callbacks are invoked
//! on the runtime's own dispatch thread.

use crate::calibration::StereoCalibration;
use crate::error::Result;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Color,
    Depth,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeDesc {
    pub id: NodeId,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    Qqvga,
    Qvga,
    Vga,
    WxgaH,
}

impl FrameFormat {
    pub fn resolution(self) -> Resolution {
        let (width, height) = match self {
            FrameFormat::Qqvga => (160, 120),
            FrameFormat::Qvga => (320, 240),
            FrameFormat::Vga => (640, 480),
            FrameFormat::WxgaH => (1280, 720),
        };
        Resolution { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    Mjpeg,
    Yuy2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerLineFrequency {
    Disabled,
    Hz50,
    Hz60,
}

/// Operating range of the depth sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepthMode {
    Close,
    Long,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColorConfig {
    pub frame_format: FrameFormat,
    pub framerate: u32,
    pub compression: Compression,
    pub power_line_frequency: PowerLineFrequency,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            frame_format: FrameFormat::Vga,
            framerate: 25,
            compression: Compression::Mjpeg,
            power_line_frequency: PowerLineFrequency::Hz50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthConfig {
    pub frame_format: FrameFormat,
    pub framerate: u32,
    pub mode: DepthMode,
    pub saturation: bool,
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            frame_format: FrameFormat::Qvga,
            framerate: 25,
            mode: DepthMode::Close,
            saturation: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub color: ColorConfig,
    pub depth: DepthConfig,
}

/// One decoded color frame, borrowed from the runtime for the duration of the
/// callback. `data` is interleaved RGB, row-major, at the negotiated color
/// resolution.
#[derive(Debug, Clone, Copy)]
pub struct ColorSample<'a> {
    pub data: &'a [u8],
    pub timestamp_ns: u64,
}

/// One depth frame: sensor-space vertices at the depth stream's own
/// resolution, together with the calibration they were captured under.
#[derive(Debug, Clone, Copy)]
pub struct DepthSample<'a> {
    pub vertices: &'a [Point3<f32>],
    pub calibration: &'a StereoCalibration,
    pub timestamp_ns: u64,
}

/// Receiver for runtime events. All methods default to no-ops; frame
/// callbacks arrive on the runtime's dispatch thread and must not block it.
pub trait SensorObserver: Send + Sync {
    fn on_device_added(&self, device: &DeviceInfo) {
        let _ = device;
    }

    fn on_device_removed(&self, device_id: &str) {
        let _ = device_id;
    }

    fn on_node_added(&self, device_id: &str, node: NodeDesc) {
        let _ = (device_id, node);
    }

    fn on_node_removed(&self, device_id: &str, node: NodeDesc) {
        let _ = (device_id, node);
    }

    fn on_color_frame(&self, sample: ColorSample<'_>) {
        let _ = sample;
    }

    fn on_depth_frame(&self, sample: DepthSample<'_>) {
        let _ = sample;
    }
}

/// Control surface of the vendor runtime.
///
/// Methods take `&self`; implementations are expected to use interior
/// mutability so that `run()` can block on one thread while control calls
/// arrive from another.
pub trait SensorRuntime: Send + Sync {
    fn devices(&self) -> Result<Vec<DeviceInfo>>;

    fn nodes(&self, device_id: &str) -> Result<Vec<NodeDesc>>;

    /// Apply `config` to a color node and return the resolution the stream
    /// actually negotiated.
    fn configure_color(&self, node: NodeId, config: &ColorConfig) -> Result<Resolution>;

    fn configure_depth(&self, node: NodeId, config: &DepthConfig) -> Result<Resolution>;

    /// Subscribe a node's samples to the registered observer.
    fn register_node(&self, node: NodeId) -> Result<()>;

    fn unregister_node(&self, node: NodeId) -> Result<()>;

    fn set_observer(&self, observer: Arc<dyn SensorObserver>);

    fn start_nodes(&self) -> Result<()>;

    fn stop_nodes(&self) -> Result<()>;

    /// Dispatch events until `quit()` is called. Blocks the calling thread.
    fn run(&self) -> Result<()>;

    fn quit(&self);
}

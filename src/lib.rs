mod calibration;
mod capture;
mod error;
mod frame;
mod runtime;
#[cfg(feature = "stub-runtime")]
mod stub;

pub use calibration::{Extrinsics, Intrinsics, Projector, StereoCalibration};
pub use capture::{CaptureStats, RgbdCapture, StreamHealth};
pub use error::{Error, Result};
pub use frame::{FrameTimestamps, RgbdFrame};
pub use runtime::{
    CaptureConfig, ColorConfig, ColorSample, Compression, DepthConfig, DepthMode, DepthSample,
    DeviceInfo, FrameFormat, NodeDesc, NodeId, NodeKind, PowerLineFrequency, Resolution,
    SensorObserver, SensorRuntime,
};
#[cfg(feature = "stub-runtime")]
pub use stub::SyntheticRuntime;

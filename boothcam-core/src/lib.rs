// 开启一些 Clippy 检查，保证代码质量
#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

// 模块定义
pub mod builder;
pub mod convert;
pub mod device;
pub mod error;
pub mod frame;
pub mod pixel_format;
pub mod traits;
pub mod yuv;

// 方便用户使用的 Prelude
pub mod prelude {
    pub use crate::builder::{CaptureConfig, StillConfig};
    pub use crate::convert::{convert, Converter};
    pub use crate::device::{CaptureDevice, CaptureMode};
    pub use crate::error::{CameraError, Result};
    pub use crate::frame::{DeviceMemory, FrameBuffer, Size};
    pub use crate::pixel_format::FourCC;
    pub use crate::traits::CaptureBackend;
}

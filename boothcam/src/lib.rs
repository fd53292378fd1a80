//! boothcam：照相亭的视频采集核心
//!
//! 预览流 (V4L2 mmap 或阻塞 read)、YUV 到 RGB 的转换，以及高分辨率 JPEG 拍照。

pub mod camera;
pub mod imgcodecs;
pub mod still;

// Re-export 核心模块，方便只依赖本 crate
pub use boothcam_core::{builder, convert, device, error, frame, pixel_format, traits, yuv};

#[cfg(all(feature = "linux-v4l2", target_os = "linux"))]
pub use boothcam_backend_v4l2 as v4l2;

/// 预置模块，用户可以通过 `use boothcam::prelude::*;` 导入常用项
pub mod prelude {
    pub use crate::camera::{configure_preview, get_frame};
    pub use crate::imgcodecs::{imwrite, write_jpeg, ImageJpegEncoder, JpegEncoder};
    pub use crate::still::{capture_still, RestoreFormat, StillCapture};
    pub use boothcam_core::prelude::*;

    #[cfg(all(feature = "linux-v4l2", target_os = "linux"))]
    pub use crate::camera::open_camera;
}

//! Linux V4L2 采集后端
//!
//! 实现 `boothcam_core::traits::CaptureBackend`，支持阻塞 read 和 mmap 流两种 I/O。
//! 其他平台上本 crate 为空。

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod backend;
        mod device;
        mod ioctl;
        mod mmap;
        pub mod pixel_map;

        pub use backend::V4l2Backend;
        pub use device::{list_devices, open, V4l2Device};
    }
}

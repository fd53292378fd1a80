//! 高分辨率静态拍照
//!
//! 预览流通常以低分辨率运行。拍照时临时切换到高分辨率、启动一个小缓冲池、
//! 丢弃几帧等待自动曝光/白平衡稳定，然后编码一帧为 JPEG，最后恢复预览格式。

use std::path::{Path, PathBuf};

use boothcam_core::builder::{CaptureConfig, StillConfig};
use boothcam_core::device::CaptureDevice;
use boothcam_core::error::{CameraError, Result};
use boothcam_core::frame::Size;
use boothcam_core::pixel_format::FourCC;
use boothcam_core::traits::CaptureBackend;

use crate::imgcodecs::{self, ImageJpegEncoder, JpegEncoder};

/// 拍照结束后恢复的预览格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreFormat {
    pub format: FourCC,
    pub size: Size,
}

impl RestoreFormat {
    pub fn new(format: FourCC, size: Size) -> Self {
        Self { format, size }
    }

    /// 记录设备当前的格式
    pub fn current<B: CaptureBackend>(device: &CaptureDevice<B>) -> Self {
        Self::new(device.format(), device.resolution())
    }
}

/// 一次成功拍照的结果
#[derive(Debug, Clone, PartialEq)]
pub struct StillCapture {
    pub path: PathBuf,
    /// 实际拍摄的分辨率 (设备可能调整了请求)
    pub size: Size,
    /// 设备输出的原始格式
    pub source_format: FourCC,
    /// 设备给出的帧序号
    pub sequence: u64,
}

/// 拍一张高分辨率照片并保存为 JPEG
///
/// 分辨率、缓冲区数量和预热帧数取自 `config`，JPEG 质量由 `quality` 给出。
/// 设备必须处于非流状态。无论拍照是否成功，结束前都会停止流并恢复 `restore`；
/// 恢复失败只有在拍照本身成功时才会作为错误返回。
pub fn capture_still<B: CaptureBackend>(
    device: &mut CaptureDevice<B>,
    restore: RestoreFormat,
    path: impl AsRef<Path>,
    quality: u8,
    encoder: &dyn JpegEncoder,
    config: &StillConfig,
) -> Result<StillCapture> {
    if device.is_streaming() {
        return Err(CameraError::StreamingActive);
    }

    let captured = acquire(device, path.as_ref(), quality, encoder, config);
    let restored = restore_preview(device, restore);

    match (captured, restored) {
        (Ok(still), Ok(())) => Ok(still),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(restore_err)) => {
            log::warn!("Restoring the preview after a failed capture also failed: {}", restore_err);
            Err(e)
        }
    }
}

/// 按 `CaptureConfig` 拍照：恢复到配置的预览格式，使用默认 JPEG 编码器
pub fn capture_still_with_config<B: CaptureBackend>(
    device: &mut CaptureDevice<B>,
    config: &CaptureConfig,
    path: impl AsRef<Path>,
) -> Result<StillCapture> {
    capture_still(
        device,
        RestoreFormat::new(config.format, config.resolution),
        path,
        config.quality,
        &ImageJpegEncoder,
        &config.still,
    )
}

fn acquire<B: CaptureBackend>(
    device: &mut CaptureDevice<B>,
    path: &Path,
    quality: u8,
    encoder: &dyn JpegEncoder,
    config: &StillConfig,
) -> Result<StillCapture> {
    // 1. 切换到高分辨率；设备调整了尺寸时按实际尺寸继续
    match device.set_resolution(config.resolution) {
        Ok(()) => {}
        Err(e) if e.is_negotiation() => {
            log::warn!("{}; capturing at {}", e, device.resolution());
        }
        Err(e) => return Err(e),
    }

    // 2. 小缓冲池，非 burst
    device.start_streaming(false, config.buffer_count)?;

    // 3. 丢弃预热帧
    for _ in 0..config.warmup_frames {
        device.query_frame()?;
    }

    // 4. 取一帧并转换为 RGB24
    let frame = device.query_frame()?;
    let source_format = frame.format();
    let sequence = frame.sequence();
    let rgb = imgcodecs::to_rgb24(frame)?;

    // 5. 编码
    encoder.encode(
        rgb.buffer(),
        rgb.width(),
        rgb.height(),
        imgcodecs::rgb_stride(&rgb),
        quality,
        path,
    )?;

    log::info!(
        "Still {} captured at {} (frame {}) -> {}",
        source_format,
        rgb.size(),
        sequence,
        path.display()
    );

    Ok(StillCapture {
        path: path.to_path_buf(),
        size: rgb.size(),
        source_format,
        sequence,
    })
}

/// 停止流并恢复预览格式
fn restore_preview<B: CaptureBackend>(
    device: &mut CaptureDevice<B>,
    restore: RestoreFormat,
) -> Result<()> {
    let stopped = device.stop_streaming();
    if let Err(e) = &stopped {
        log::warn!("Stop streaming after still capture failed: {}", e);
    }

    let restored = device.set_image_format(restore.format, Some(restore.size));
    if let Err(e) = &restored {
        log::warn!(
            "Unable to restore preview {} {}: {}",
            restore.format,
            restore.size,
            e
        );
    }

    stopped.and(restored)
}

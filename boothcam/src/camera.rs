use boothcam_core::builder::CaptureConfig;
use boothcam_core::device::CaptureDevice;
use boothcam_core::error::Result;
use boothcam_core::frame::FrameBuffer;
use boothcam_core::traits::CaptureBackend;

use crate::imgcodecs;

/// 按配置设置预览格式、分辨率和帧率
///
/// 设备调整了分辨率或不支持设置帧率时只记录警告，其余错误直接返回。
pub fn configure_preview<B: CaptureBackend>(
    device: &mut CaptureDevice<B>,
    config: &CaptureConfig,
) -> Result<()> {
    match device.set_image_format(config.format, Some(config.resolution)) {
        Ok(()) => {}
        Err(e) if e.is_negotiation() => log::warn!("Preview: {}", e),
        Err(e) => return Err(e),
    }

    if let Some(fps) = config.fps {
        if let Err(e) = device.set_frame_rate(fps) {
            log::warn!("Preview frame rate {}: {}", fps, e);
        }
    }

    log::info!(
        "Preview configured: {} {} @ {:?} fps",
        device.format(),
        device.resolution(),
        device.fps()
    );
    Ok(())
}

/// 打开配置中的设备节点并设置预览参数
#[cfg(all(feature = "linux-v4l2", target_os = "linux"))]
pub fn open_camera(config: &CaptureConfig) -> Result<boothcam_backend_v4l2::V4l2Device> {
    let mut device = boothcam_backend_v4l2::open(&config.device)?;
    configure_preview(&mut device, config)?;
    Ok(device)
}

/// 获取一帧并转换为新的 RGB24 帧
///
/// 返回的帧是私有副本，不会被之后的采集覆盖。
pub fn get_frame<B: CaptureBackend>(device: &mut CaptureDevice<B>) -> Result<FrameBuffer> {
    let frame = device.query_frame()?;
    let rgb = imgcodecs::to_rgb24(frame)?;
    if rgb.ptr_eq(frame) {
        // 设备直接输出 RGB24，复制一份以脱离缓冲池
        return Ok(rgb.duplicate());
    }
    Ok(rgb)
}

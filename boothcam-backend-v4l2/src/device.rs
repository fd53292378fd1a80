use v4l::capability::Flags;

use boothcam_core::device::CaptureDevice;
use boothcam_core::error::Result;
use boothcam_core::traits::DeviceInfo;

use crate::backend::V4l2Backend;

/// 基于 V4L2 的采集设备
pub type V4l2Device = CaptureDevice<V4l2Backend>;

/// 枚举系统中的摄像头设备
pub fn list_devices() -> Vec<DeviceInfo> {
    let mut devices = Vec::new();

    // 遍历 /dev/video* 节点
    for node in v4l::context::enum_devices() {
        // 尝试打开设备查询能力
        let path = node.path().to_string_lossy().to_string();
        let caps = match v4l::Device::with_path(&path).and_then(|dev| dev.query_caps()) {
            Ok(caps) => caps,
            Err(e) => {
                tracing::debug!(target: "boothcam::v4l2", "Skipping {}: {}", path, e);
                continue;
            }
        };

        // 过滤：必须支持 Video Capture
        // 忽略 Metadata 设备或 Output 设备
        if caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            devices.push(DeviceInfo {
                name: node.name().unwrap_or_else(|| caps.card.clone()),
                driver: caps.driver,
                bus: caps.bus,
                location: path,
            });
        }
    }

    devices
}

/// 打开设备节点并读取初始状态
pub fn open(path: &str) -> Result<V4l2Device> {
    let backend = V4l2Backend::open(path)?;
    CaptureDevice::open(backend, path)
}

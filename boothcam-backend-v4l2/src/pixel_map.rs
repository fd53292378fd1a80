use boothcam_core::pixel_format::{self, FourCC};
use boothcam_core::traits::Capabilities;
use v4l::capability::Flags;
use v4l::format::fourcc::FourCC as V4lFourCC;

/// 将 v4l crate 的 FourCC 转换为 boothcam-core 的 FourCC
///
/// 两者都是 V4L2 的小端序四字符码，只是类型不同。未注册的格式原样保留，
/// 仍可以被协商，只是无法计算大小也无法转换。
pub fn from_v4l_fourcc(cc: V4lFourCC) -> FourCC {
    // 提取 u32 原始值
    let code: u32 = cc.into();
    let core_cc = FourCC(code);

    if pixel_format::descriptor(core_cc).is_none() {
        tracing::debug!(target: "boothcam::v4l2", "Unregistered V4L2 pixel format: {}", core_cc);
    }
    core_cc
}

/// 将 boothcam-core 的 FourCC 转换为 v4l 的 FourCC
/// 用于请求设备设置格式
pub fn to_v4l_fourcc(cc: FourCC) -> V4lFourCC {
    V4lFourCC::new(&cc.to_bytes())
}

/// QUERYCAP 标志位到核心能力位
///
/// 两边的位定义都取自 videodev2.h，核心只保留采集相关的几位。
pub fn capabilities(flags: Flags) -> Capabilities {
    Capabilities::from_bits_truncate(flags.bits())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_round_trip() {
        for cc in [FourCC::YUYV, FourCC::YUV420, FourCC::RGB24, FourCC::MJPEG] {
            assert_eq!(from_v4l_fourcc(to_v4l_fourcc(cc)), cc);
        }
        assert_eq!(to_v4l_fourcc(FourCC::YUYV), V4lFourCC::new(b"YUYV"));
    }

    #[test]
    fn capability_flags() {
        let caps = capabilities(Flags::VIDEO_CAPTURE | Flags::STREAMING);
        assert!(caps.contains(Capabilities::VIDEO_CAPTURE | Capabilities::STREAMING));
        assert!(!caps.contains(Capabilities::READ_WRITE));
    }
}

use crate::error::Result;
use crate::frame::{DeviceMemory, Size};
use crate::pixel_format::FourCC;
use bitflags::bitflags;

bitflags! {
    /// 设备能力 (取值与 V4L2_CAP_* 一致)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct Capabilities: u32 {
        const VIDEO_CAPTURE = 0x0000_0001;
        const VIDEO_OUTPUT  = 0x0000_0002;
        const VIDEO_OVERLAY = 0x0000_0004;
        const TUNER         = 0x0001_0000;
        const AUDIO         = 0x0002_0000;
        const READ_WRITE    = 0x0100_0000;
        const ASYNC_IO      = 0x0200_0000;
        const STREAMING     = 0x0400_0000;
    }
}

bitflags! {
    /// 设备接受的缓冲区类型 (通过 TRY_FMT 探测)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct BufferTypes: u32 {
        const VIDEO_CAPTURE = 1 << 1;
        const VIDEO_OUTPUT  = 1 << 2;
        const VIDEO_OVERLAY = 1 << 3;
        const VBI_CAPTURE   = 1 << 4;
        const VBI_OUTPUT    = 1 << 5;
    }
}

/// 设备基本信息
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInfo {
    /// 对用户友好的显示名称 (e.g. "UVC Camera (046d:0990)")
    pub name: String,

    /// 驱动名 (e.g. "uvcvideo")
    pub driver: String,

    /// 硬件总线信息 (e.g. "usb-0000:00:14.0-1")
    pub bus: String,

    /// 设备节点 (e.g. "/dev/video0")
    pub location: String,
}

/// QUERYCAP 的结果
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCaps {
    pub card: String,
    pub driver: String,
    pub bus: String,
    pub capabilities: Capabilities,
}

/// 视频制式 (PAL / NTSC ...)
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct VideoStandard {
    pub name: String,
    pub id: u64,
}

/// 设备当前协商的图像格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ImageFormat {
    pub fourcc: FourCC,
    pub size: Size,
    /// Bytes per line
    pub stride: u32,
    /// 一帧的字节数 (sizeimage)
    pub buffer_size: u32,
}

/// 帧间隔 (秒) = numerator / denominator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fraction {
    pub numerator: u32,
    pub denominator: u32,
}

impl Fraction {
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// 帧间隔换算为帧率
    pub fn fps(&self) -> Option<f64> {
        if self.numerator == 0 || self.denominator == 0 {
            return None;
        }
        Some(self.denominator as f64 / self.numerator as f64)
    }
}

/// 设备的帧间隔参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    /// 是否支持设置 time-per-frame
    pub time_per_frame: bool,
    pub interval: Fraction,
}

/// DQBUF 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    pub index: usize,
    pub bytes_used: usize,
    pub sequence: u64,
}

/// 采集后端：每个方法对应一次 ioctl (或等价的系统调用)
///
/// `CaptureDevice` 只通过这个接口和设备交互。真实设备由 V4L2 后端实现，
/// 测试和演示使用仿真后端。所有调用都是同步阻塞的。
pub trait CaptureBackend {
    /// VIDIOC_QUERYCAP
    fn query_caps(&mut self) -> Result<DeviceCaps>;

    /// VIDIOC_ENUMINPUT：返回所有输入通道名
    fn enum_inputs(&mut self) -> Result<Vec<String>>;
    /// VIDIOC_G_INPUT
    fn input(&mut self) -> Result<u32>;
    /// VIDIOC_S_INPUT
    fn set_input(&mut self, index: u32) -> Result<()>;

    /// VIDIOC_ENUMSTD
    fn enum_standards(&mut self) -> Result<Vec<VideoStandard>>;
    /// VIDIOC_G_STD
    fn standard(&mut self) -> Result<u64>;
    /// VIDIOC_S_STD
    fn set_standard(&mut self, id: u64) -> Result<()>;

    /// 探测设备接受的缓冲区类型 (VIDIOC_TRY_FMT)
    fn buffer_types(&mut self) -> Result<BufferTypes>;

    /// VIDIOC_ENUM_FMT
    fn enum_formats(&mut self) -> Result<Vec<FourCC>>;
    /// VIDIOC_ENUM_FRAMESIZES (离散尺寸)
    fn enum_frame_sizes(&mut self, fourcc: FourCC) -> Result<Vec<Size>>;
    /// VIDIOC_G_FMT
    fn format(&mut self) -> Result<ImageFormat>;
    /// VIDIOC_S_FMT，返回设备调整后的格式
    fn set_format(&mut self, fourcc: FourCC, size: Size) -> Result<ImageFormat>;

    /// VIDIOC_G_PARM
    fn params(&mut self) -> Result<StreamParams>;
    /// VIDIOC_S_PARM
    fn set_frame_interval(&mut self, interval: Fraction) -> Result<()>;

    /// VIDIOC_REQBUFS (MMAP)，返回驱动实际分配的数量。count = 0 释放缓冲区。
    fn request_buffers(&mut self, count: usize) -> Result<usize>;
    /// VIDIOC_QUERYBUF + mmap
    fn map_buffer(&mut self, index: usize) -> Result<Box<dyn DeviceMemory>>;
    /// VIDIOC_QBUF
    fn enqueue(&mut self, index: usize) -> Result<()>;
    /// VIDIOC_DQBUF (阻塞)
    fn dequeue(&mut self) -> Result<DequeuedBuffer>;
    /// VIDIOC_STREAMON
    fn stream_on(&mut self) -> Result<()>;
    /// VIDIOC_STREAMOFF
    fn stream_off(&mut self) -> Result<()>;

    /// read() 方式采集，返回实际读取的字节数
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

impl<B: CaptureBackend + ?Sized> CaptureBackend for Box<B> {
    fn query_caps(&mut self) -> Result<DeviceCaps> {
        (**self).query_caps()
    }

    fn enum_inputs(&mut self) -> Result<Vec<String>> {
        (**self).enum_inputs()
    }

    fn input(&mut self) -> Result<u32> {
        (**self).input()
    }

    fn set_input(&mut self, index: u32) -> Result<()> {
        (**self).set_input(index)
    }

    fn enum_standards(&mut self) -> Result<Vec<VideoStandard>> {
        (**self).enum_standards()
    }

    fn standard(&mut self) -> Result<u64> {
        (**self).standard()
    }

    fn set_standard(&mut self, id: u64) -> Result<()> {
        (**self).set_standard(id)
    }

    fn buffer_types(&mut self) -> Result<BufferTypes> {
        (**self).buffer_types()
    }

    fn enum_formats(&mut self) -> Result<Vec<FourCC>> {
        (**self).enum_formats()
    }

    fn enum_frame_sizes(&mut self, fourcc: FourCC) -> Result<Vec<Size>> {
        (**self).enum_frame_sizes(fourcc)
    }

    fn format(&mut self) -> Result<ImageFormat> {
        (**self).format()
    }

    fn set_format(&mut self, fourcc: FourCC, size: Size) -> Result<ImageFormat> {
        (**self).set_format(fourcc, size)
    }

    fn params(&mut self) -> Result<StreamParams> {
        (**self).params()
    }

    fn set_frame_interval(&mut self, interval: Fraction) -> Result<()> {
        (**self).set_frame_interval(interval)
    }

    fn request_buffers(&mut self, count: usize) -> Result<usize> {
        (**self).request_buffers(count)
    }

    fn map_buffer(&mut self, index: usize) -> Result<Box<dyn DeviceMemory>> {
        (**self).map_buffer(index)
    }

    fn enqueue(&mut self, index: usize) -> Result<()> {
        (**self).enqueue(index)
    }

    fn dequeue(&mut self) -> Result<DequeuedBuffer> {
        (**self).dequeue()
    }

    fn stream_on(&mut self) -> Result<()> {
        (**self).stream_on()
    }

    fn stream_off(&mut self) -> Result<()> {
        (**self).stream_off()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }
}

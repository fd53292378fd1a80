use std::io;
use std::os::fd::RawFd;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use v4l::buffer::Type;
use v4l::framesize::FrameSizeEnum;
use v4l::parameters::Capabilities as ParamCaps;
use v4l::video::capture::Parameters;
use v4l::video::Capture;

use boothcam_core::error::{CameraError, Result};
use boothcam_core::frame::{DeviceMemory, Size};
use boothcam_core::pixel_format::{self, FourCC};
use boothcam_core::traits::{
    BufferTypes, CaptureBackend, DequeuedBuffer, DeviceCaps, Fraction, ImageFormat, StreamParams,
    VideoStandard,
};

use crate::ioctl;
use crate::mmap::MmapRegion;
use crate::pixel_map;

/// 驱动只给出步进范围时逐一尝试的常见分辨率
const PROBE_SIZES: [Size; 7] = [
    Size::new(160, 120),
    Size::new(320, 240),
    Size::new(352, 288),
    Size::new(640, 480),
    Size::new(800, 600),
    Size::new(960, 720),
    Size::new(1024, 768),
];

/// 记录失败的 ioctl 并包装成 CameraError
fn ioctl_err(op: &'static str) -> impl FnOnce(io::Error) -> CameraError {
    move |e| {
        tracing::error!(target: "boothcam::v4l2", "ioctl({}) failed: {}", op, e);
        CameraError::ioctl(op, e)
    }
}

/// V4L2 设备句柄
///
/// 常规查询走 v4l crate 的高层接口，其余的 ioctl 见 `ioctl` 模块。
/// 打开后清除 O_NONBLOCK：read 和 DQBUF 都是阻塞调用。
pub struct V4l2Backend {
    device: v4l::Device,
    path: String,
    /// STREAMON 成功后为 true
    streaming: bool,
}

impl std::fmt::Debug for V4l2Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V4l2Backend")
            .field("path", &self.path)
            .field("fd", &self.fd())
            .field("streaming", &self.streaming)
            .finish()
    }
}

impl V4l2Backend {
    /// 打开设备节点 (e.g. "/dev/video0")
    pub fn open(path: &str) -> Result<Self> {
        let device = v4l::Device::with_path(path).map_err(|e| {
            tracing::error!(target: "boothcam::v4l2", "Cannot open {}: {}", path, e);
            CameraError::Io(e)
        })?;

        let backend = Self {
            device,
            path: path.to_string(),
            streaming: false,
        };
        backend.set_blocking()?;
        Ok(backend)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn fd(&self) -> RawFd {
        self.device.handle().fd()
    }

    fn set_blocking(&self) -> Result<()> {
        let fd = self.fd();
        let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(|e| CameraError::Io(e.into()))?;
        let flags = OFlag::from_bits_truncate(flags) - OFlag::O_NONBLOCK;
        fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(|e| CameraError::Io(e.into()))?;
        Ok(())
    }

    fn image_format(fmt: &v4l::Format) -> ImageFormat {
        ImageFormat {
            fourcc: pixel_map::from_v4l_fourcc(fmt.fourcc),
            size: Size::new(fmt.width, fmt.height),
            stride: fmt.stride,
            buffer_size: fmt.size,
        }
    }
}

impl CaptureBackend for V4l2Backend {
    fn query_caps(&mut self) -> Result<DeviceCaps> {
        let caps = self.device.query_caps().map_err(ioctl_err("VIDIOC_QUERYCAP"))?;
        Ok(DeviceCaps {
            card: caps.card,
            driver: caps.driver,
            bus: caps.bus,
            capabilities: pixel_map::capabilities(caps.capabilities),
        })
    }

    fn enum_inputs(&mut self) -> Result<Vec<String>> {
        ioctl::enum_inputs(self.fd()).map_err(ioctl_err("VIDIOC_ENUMINPUT"))
    }

    fn input(&mut self) -> Result<u32> {
        ioctl::input(self.fd()).map_err(ioctl_err("VIDIOC_G_INPUT"))
    }

    fn set_input(&mut self, index: u32) -> Result<()> {
        ioctl::set_input(self.fd(), index).map_err(ioctl_err("VIDIOC_S_INPUT"))
    }

    fn enum_standards(&mut self) -> Result<Vec<VideoStandard>> {
        Ok(ioctl::enum_standards(self.fd())
            .into_iter()
            .map(|(name, id)| VideoStandard { name, id })
            .collect())
    }

    fn standard(&mut self) -> Result<u64> {
        ioctl::standard(self.fd()).map_err(ioctl_err("VIDIOC_G_STD"))
    }

    fn set_standard(&mut self, id: u64) -> Result<()> {
        ioctl::set_standard(self.fd(), id).map_err(ioctl_err("VIDIOC_S_STD"))
    }

    fn buffer_types(&mut self) -> Result<BufferTypes> {
        let fd = self.fd();
        let mut types = BufferTypes::empty();
        for (typ, flag) in [
            (Type::VideoCapture, BufferTypes::VIDEO_CAPTURE),
            (Type::VideoOutput, BufferTypes::VIDEO_OUTPUT),
            (Type::VideoOverlay, BufferTypes::VIDEO_OVERLAY),
            (Type::VbiCapture, BufferTypes::VBI_CAPTURE),
            (Type::VbiOutput, BufferTypes::VBI_OUTPUT),
        ] {
            if ioctl::supports_buffer_type(fd, typ) {
                types |= flag;
            }
        }
        Ok(types)
    }

    fn enum_formats(&mut self) -> Result<Vec<FourCC>> {
        let formats = self
            .device
            .enum_formats()
            .map_err(ioctl_err("VIDIOC_ENUM_FMT"))?;
        Ok(formats
            .into_iter()
            .map(|desc| pixel_map::from_v4l_fourcc(desc.fourcc))
            .collect())
    }

    fn enum_frame_sizes(&mut self, fourcc: FourCC) -> Result<Vec<Size>> {
        let sizes = self
            .device
            .enum_framesizes(pixel_map::to_v4l_fourcc(fourcc))
            .map_err(ioctl_err("VIDIOC_ENUM_FRAMESIZES"))?;

        let mut out = Vec::new();
        for size in sizes {
            match size.size {
                FrameSizeEnum::Discrete(d) => out.push(Size::new(d.width, d.height)),
                FrameSizeEnum::Stepwise(s) => {
                    // 步进范围内只报告常见分辨率
                    let fits = |value: u32, min: u32, max: u32, step: u32| {
                        value >= min && value <= max && (step == 0 || (value - min) % step == 0)
                    };
                    out.extend(PROBE_SIZES.iter().copied().filter(|p| {
                        fits(p.width, s.min_width, s.max_width, s.step_width)
                            && fits(p.height, s.min_height, s.max_height, s.step_height)
                    }));
                }
            }
        }
        Ok(out)
    }

    fn format(&mut self) -> Result<ImageFormat> {
        let fmt = self.device.format().map_err(ioctl_err("VIDIOC_G_FMT"))?;
        Ok(Self::image_format(&fmt))
    }

    fn set_format(&mut self, fourcc: FourCC, size: Size) -> Result<ImageFormat> {
        let mut fmt = self.device.format().map_err(ioctl_err("VIDIOC_G_FMT"))?;
        fmt.width = size.width;
        fmt.height = size.height;
        fmt.fourcc = pixel_map::to_v4l_fourcc(fourcc);

        let applied = self
            .device
            .set_format(&fmt)
            .map_err(ioctl_err("VIDIOC_S_FMT"))?;

        tracing::info!(
            target: "boothcam::v4l2",
            "Format applied: {}x{} @ {}",
            applied.width,
            applied.height,
            pixel_format::describe(pixel_map::from_v4l_fourcc(applied.fourcc))
        );
        Ok(Self::image_format(&applied))
    }

    fn params(&mut self) -> Result<StreamParams> {
        let params = self.device.params().map_err(ioctl_err("VIDIOC_G_PARM"))?;
        Ok(StreamParams {
            time_per_frame: params.capabilities.contains(ParamCaps::TIME_PER_FRAME),
            interval: Fraction::new(params.interval.numerator, params.interval.denominator),
        })
    }

    fn set_frame_interval(&mut self, interval: Fraction) -> Result<()> {
        let params = Parameters::new(v4l::Fraction::new(
            interval.numerator,
            interval.denominator,
        ));
        self.device
            .set_params(&params)
            .map_err(ioctl_err("VIDIOC_S_PARM"))?;
        Ok(())
    }

    fn request_buffers(&mut self, count: usize) -> Result<usize> {
        let granted = ioctl::request_buffers(self.fd(), count as u32)
            .map_err(ioctl_err("VIDIOC_REQBUFS"))?;
        tracing::debug!(target: "boothcam::v4l2", "REQBUFS {} -> {}", count, granted);
        Ok(granted as usize)
    }

    fn map_buffer(&mut self, index: usize) -> Result<Box<dyn DeviceMemory>> {
        let fd = self.fd();
        let (offset, len) =
            ioctl::query_buffer(fd, index as u32).map_err(ioctl_err("VIDIOC_QUERYBUF"))?;
        let region = MmapRegion::map(fd, offset, len).map_err(|e| {
            tracing::error!(target: "boothcam::v4l2", "mmap of buffer {} failed: {}", index, e);
            CameraError::Io(e)
        })?;
        Ok(Box::new(region))
    }

    fn enqueue(&mut self, index: usize) -> Result<()> {
        ioctl::queue_buffer(self.fd(), index as u32).map_err(ioctl_err("VIDIOC_QBUF"))
    }

    fn dequeue(&mut self) -> Result<DequeuedBuffer> {
        let (index, bytes_used, sequence) =
            ioctl::dequeue_buffer(self.fd()).map_err(ioctl_err("VIDIOC_DQBUF"))?;
        Ok(DequeuedBuffer {
            index: index as usize,
            bytes_used: bytes_used as usize,
            sequence: sequence as u64,
        })
    }

    fn stream_on(&mut self) -> Result<()> {
        ioctl::set_streaming(self.fd(), true).map_err(ioctl_err("VIDIOC_STREAMON"))?;
        self.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> Result<()> {
        let streaming = std::mem::take(&mut self.streaming);
        ioctl::set_streaming(self.fd(), false).map_err(|e| {
            // 未启动流时驱动通常拒绝 STREAMOFF，调用方会忽略这个结果
            if streaming {
                tracing::error!(target: "boothcam::v4l2", "ioctl(VIDIOC_STREAMOFF) failed: {}", e);
            } else {
                tracing::debug!(target: "boothcam::v4l2", "VIDIOC_STREAMOFF while idle: {}", e);
            }
            CameraError::ioctl("VIDIOC_STREAMOFF", e)
        })
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        nix::unistd::read(self.fd(), buf).map_err(|e| {
            tracing::error!(target: "boothcam::v4l2", "read() failed: {}", e);
            CameraError::Io(e.into())
        })
    }
}

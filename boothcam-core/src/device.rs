use crate::convert;
use crate::error::{CameraError, Result};
use crate::frame::{FrameBuffer, Size};
use crate::pixel_format::{self, FourCC};
use crate::traits::{
    BufferTypes, Capabilities, CaptureBackend, DeviceInfo, Fraction, ImageFormat, VideoStandard,
};

/// read() 模式下的缓冲池大小
const READ_POOL_SIZE: usize = 2;

/// mmap 流模式至少需要的缓冲区数量
const MIN_STREAM_BUFFERS: usize = 2;

/// 当前 I/O 模式 (对外只读)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum CaptureMode {
    /// 阻塞 read()
    Read,
    /// mmap 流
    Streaming,
}

#[derive(Debug, Default)]
struct ReadPool {
    slots: Vec<FrameBuffer>,
    cursor: Option<usize>,
    frames: u64,
}

#[derive(Debug)]
struct StreamPool {
    /// 与设备缓冲区一一对应的只读槽位，启动后数量固定
    slots: Vec<FrameBuffer>,
    cursor: Option<usize>,
    burst: bool,
}

#[derive(Debug)]
enum IoMode {
    Read(ReadPool),
    Streaming(StreamPool),
}

/// 视频采集设备
///
/// 包装一个 [`CaptureBackend`]，缓存协商后的状态，并管理两种 I/O 模式：
/// 初始为阻塞 read 模式，`start_streaming` 后进入 mmap 流模式。
/// 所有访问器都只读取缓存，不会发起 ioctl。
#[derive(Debug)]
pub struct CaptureDevice<B: CaptureBackend> {
    backend: B,
    info: DeviceInfo,
    capabilities: Capabilities,
    buffer_types: BufferTypes,

    format: FourCC,
    resolution: Size,
    stride: usize,
    buffer_size: usize,
    fps: Option<f64>,

    channels: Vec<String>,
    channel: Option<u32>,
    standards: Vec<VideoStandard>,
    standard: Option<u64>,
    formats: Vec<FourCC>,

    mode: IoMode,
    released: bool,
}

impl<B: CaptureBackend> CaptureDevice<B> {
    /// 打开设备并读取初始状态
    ///
    /// 不支持视频采集的设备返回 `NotCaptureDevice`。
    pub fn open(mut backend: B, location: impl Into<String>) -> Result<Self> {
        let location = location.into();

        let caps = backend.query_caps()?;
        if !caps.capabilities.contains(Capabilities::VIDEO_CAPTURE) {
            tracing::error!(target: "boothcam::device", "{} is not a video capture device", location);
            return Err(CameraError::NotCaptureDevice(location));
        }

        let formats = backend.enum_formats()?;

        // 摄像头通常没有输入/制式/帧率的概念，这些查询失败不算致命
        let channels = backend.enum_inputs().unwrap_or_else(|e| {
            tracing::warn!(target: "boothcam::device", "No input channels on {}: {}", location, e);
            Vec::new()
        });
        let standards = backend.enum_standards().unwrap_or_else(|e| {
            tracing::warn!(target: "boothcam::device", "No video standards on {}: {}", location, e);
            Vec::new()
        });
        let channel = backend.input().ok();
        let standard = backend.standard().ok();
        let buffer_types = backend.buffer_types().unwrap_or_default();
        let fps = backend.params().ok().and_then(|p| p.interval.fps());

        let current = backend.format()?;

        tracing::info!(
            target: "boothcam::device",
            "Opened {} ({}, driver {}): {} {} with {} format(s)",
            location,
            caps.card,
            caps.driver,
            pixel_format::describe(current.fourcc),
            current.size,
            formats.len()
        );

        let mut device = Self {
            backend,
            info: DeviceInfo {
                name: caps.card,
                driver: caps.driver,
                bus: caps.bus,
                location,
            },
            capabilities: caps.capabilities,
            buffer_types,
            format: FourCC::default(),
            resolution: Size::default(),
            stride: 0,
            buffer_size: 0,
            fps,
            channels,
            channel,
            standards,
            standard,
            formats,
            mode: IoMode::Read(ReadPool::default()),
            released: false,
        };
        device.cache_format(current);
        Ok(device)
    }

    fn cache_format(&mut self, fmt: ImageFormat) {
        self.format = fmt.fourcc;
        self.resolution = fmt.size;
        self.stride = fmt.stride as usize;
        self.buffer_size = fmt.buffer_size as usize;
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.is_streaming() {
            return Err(CameraError::StreamingActive);
        }
        Ok(())
    }

    fn negotiate(&mut self, fourcc: FourCC, size: Size) -> Result<()> {
        self.ensure_idle()?;
        self.backend.set_format(fourcc, size)?;

        // 设备可能调整请求，重新查询真实结果
        let accepted = self.backend.format()?;
        self.cache_format(accepted);
        // read 缓冲池的几何信息已过期
        self.mode = IoMode::Read(ReadPool::default());

        if accepted.fourcc != fourcc {
            return Err(mismatch(
                "image format",
                pixel_format::describe(fourcc),
                pixel_format::describe(accepted.fourcc),
            ));
        }
        if accepted.size != size {
            return Err(mismatch("resolution", size, accepted.size));
        }

        tracing::debug!(
            target: "boothcam::device",
            "Image format set to {} {} (stride {}, {} bytes)",
            pixel_format::describe(self.format),
            self.resolution,
            self.stride,
            self.buffer_size
        );
        Ok(())
    }

    /// 设置像素格式，`size` 为 None 时保持当前分辨率
    pub fn set_image_format(&mut self, format: FourCC, size: Option<Size>) -> Result<()> {
        let size = size.unwrap_or(self.resolution);
        self.negotiate(format, size)
    }

    /// 在设备支持的格式中选择第一个能转换到 `output` 的格式并应用
    pub fn auto_set_image_format(&mut self, output: FourCC) -> Result<FourCC> {
        let candidates = self.formats.clone();
        for format in candidates {
            if convert::find(format, output).is_none() {
                tracing::debug!(
                    target: "boothcam::device",
                    "Skipping {}: no converter to {}",
                    pixel_format::describe(format),
                    pixel_format::describe(output)
                );
                continue;
            }

            match self.set_image_format(format, None) {
                Ok(()) => return Ok(format),
                // 格式被接受，只是分辨率被调整
                Err(e) if e.is_negotiation() && self.format == format => return Ok(format),
                Err(e) => {
                    tracing::warn!(
                        target: "boothcam::device",
                        "Format {} rejected: {}",
                        pixel_format::describe(format),
                        e
                    );
                }
            }
        }

        tracing::error!(
            target: "boothcam::device",
            "No supported format converts to {}",
            pixel_format::describe(output)
        );
        Err(CameraError::NoConverter {
            input: self.format,
            output,
        })
    }

    /// 保持当前像素格式，修改分辨率
    pub fn set_resolution(&mut self, size: Size) -> Result<()> {
        self.negotiate(self.format, size)
    }

    /// 设置帧率 (需要设备支持 time-per-frame)
    pub fn set_frame_rate(&mut self, fps: u32) -> Result<()> {
        if fps == 0 {
            return Err(CameraError::Unsupported("frame rate of zero"));
        }

        let params = self.backend.params()?;
        if !params.time_per_frame {
            tracing::warn!(target: "boothcam::device", "Device can't set the frame rate");
            return Err(CameraError::Unsupported("setting the frame rate"));
        }

        self.backend.set_frame_interval(Fraction::new(1, fps))?;
        self.fps = self.backend.params()?.interval.fps();

        match self.fps {
            Some(actual) if (actual - fps as f64).abs() < 0.01 => Ok(()),
            Some(actual) => Err(mismatch("frame rate", fps, actual)),
            None => Err(mismatch("frame rate", fps, "unknown")),
        }
    }

    /// 切换输入通道 (`channels()` 中的下标)
    pub fn set_channel(&mut self, index: usize) -> Result<()> {
        if index >= self.channels.len() {
            return Err(CameraError::InvalidIndex {
                index,
                len: self.channels.len(),
            });
        }

        self.backend.set_input(index as u32)?;
        let current = self.backend.input()?;
        self.channel = Some(current);

        if current as usize != index {
            return Err(mismatch("channel", index, current));
        }
        Ok(())
    }

    /// 切换视频制式 (`standards()` 中的下标)
    pub fn set_standard(&mut self, index: usize) -> Result<()> {
        let id = match self.standards.get(index) {
            Some(std) => std.id,
            None => {
                return Err(CameraError::InvalidIndex {
                    index,
                    len: self.standards.len(),
                })
            }
        };

        self.backend.set_standard(id)?;
        let current = self.backend.standard()?;
        self.standard = Some(current);

        if current != id {
            return Err(mismatch(
                "video standard",
                format!("{:#x}", id),
                format!("{:#x}", current),
            ));
        }
        Ok(())
    }

    /// 当前格式下设备提供的分辨率 (去重，保持设备的枚举顺序)
    pub fn query_resolutions(&mut self) -> Result<Vec<Size>> {
        let mut sizes: Vec<Size> = Vec::new();
        for size in self.backend.enum_frame_sizes(self.format)? {
            if !sizes.contains(&size) {
                sizes.push(size);
            }
        }
        Ok(sizes)
    }

    /// 进入 mmap 流模式
    ///
    /// 非 burst 模式只入队第一个缓冲区，设备始终只领先一帧；burst 模式入队全部
    /// 缓冲区以获得最大吞吐。失败时模式保持不变。
    pub fn start_streaming(&mut self, burst: bool, buffer_count: usize) -> Result<()> {
        if self.is_streaming() {
            return Err(CameraError::AlreadyStreaming);
        }
        if !self.capabilities.contains(Capabilities::STREAMING) {
            tracing::error!(target: "boothcam::device", "Video mmap-streaming is not supported");
            return Err(CameraError::StreamingUnsupported);
        }

        let requested = buffer_count.max(MIN_STREAM_BUFFERS);
        let granted = self.backend.request_buffers(requested)?;
        if granted < MIN_STREAM_BUFFERS {
            tracing::error!(
                target: "boothcam::device",
                "Insufficient buffer memory: {} of {} buffers granted",
                granted,
                requested
            );
            self.free_device_buffers();
            return Err(CameraError::Unsupported("fewer than two streaming buffers"));
        }
        if granted != requested {
            tracing::warn!(
                target: "boothcam::device",
                "Requested {} buffers, device granted {}",
                requested,
                granted
            );
        }

        match self.map_pool(granted, burst) {
            Ok(pool) => {
                tracing::info!(
                    target: "boothcam::device",
                    "Streaming started: {} buffers, burst = {}",
                    granted,
                    burst
                );
                self.mode = IoMode::Streaming(pool);
                Ok(())
            }
            Err(e) => {
                self.free_device_buffers();
                Err(e)
            }
        }
    }

    fn map_pool(&mut self, count: usize, burst: bool) -> Result<StreamPool> {
        let mut slots = Vec::with_capacity(count);
        for index in 0..count {
            let memory = self.backend.map_buffer(index)?;
            slots.push(FrameBuffer::from_device_memory(
                memory,
                self.format,
                self.resolution,
                self.stride,
                self.buffer_size,
            ));
        }

        let queued = if burst { count } else { 1 };
        for index in 0..queued {
            self.backend.enqueue(index)?;
        }

        self.backend.stream_on()?;
        Ok(StreamPool {
            slots,
            cursor: None,
            burst,
        })
    }

    fn free_device_buffers(&mut self) {
        if let Err(e) = self.backend.request_buffers(0) {
            tracing::warn!(target: "boothcam::device", "Failed to free device buffers: {}", e);
        }
    }

    /// 获取下一帧
    ///
    /// 流模式下返回缓冲池中的只读槽位，设备在之后的 `query_frame` 中会覆盖它。
    /// 需要保留像素时调用 `duplicate()` (或对 `retain()` 得到的句柄调用
    /// `ensure_writable()`)，并且要在下一次 `query_frame` 之前完成；
    /// 从槽位借出的 `&[u8]` 不能跨越下一次 `query_frame` 持有。
    /// read 模式下读取恰好 `buffer_size` 字节，不足时返回 `ShortRead`。
    pub fn query_frame(&mut self) -> Result<&FrameBuffer> {
        let Self {
            backend,
            mode,
            format,
            resolution,
            stride,
            buffer_size,
            ..
        } = self;

        match mode {
            IoMode::Streaming(pool) => {
                let len = pool.slots.len();
                let expected = pool.cursor.map_or(0, |c| (c + 1) % len);

                let buf = backend.dequeue()?;
                if buf.index >= len {
                    return Err(CameraError::InvalidIndex {
                        index: buf.index,
                        len,
                    });
                }
                if buf.index != expected {
                    tracing::warn!(
                        target: "boothcam::device",
                        "Dequeued buffer {} but expected {}",
                        buf.index,
                        expected
                    );
                }
                pool.cursor = Some(buf.index);

                // 立即把下一个 (或刚取出的) 缓冲区交还设备，保证采集不停顿
                let requeue = if pool.burst {
                    buf.index
                } else {
                    (buf.index + 1) % len
                };
                backend.enqueue(requeue)?;

                tracing::debug!(
                    target: "boothcam::device",
                    "Frame {} in slot {} ({} bytes), requeued slot {}",
                    buf.sequence,
                    buf.index,
                    buf.bytes_used,
                    requeue
                );

                let slot = &pool.slots[buf.index];
                slot.mark_captured(buf.sequence);
                Ok(slot)
            }
            IoMode::Read(pool) => {
                if pool.slots.is_empty() {
                    pool.slots = (0..READ_POOL_SIZE).map(|_| FrameBuffer::new()).collect();
                }
                let next = pool.cursor.map_or(0, |c| (c + 1) % READ_POOL_SIZE);
                let expected = *buffer_size;

                let slot = &mut pool.slots[next];
                slot.ensure_cache();
                slot.set_layout(*format, *resolution, *stride, expected)?;

                let actual = backend.read(slot.data_mut()?)?;
                if actual < expected {
                    tracing::warn!(
                        target: "boothcam::device",
                        "Expected {} bytes read but only {} returned",
                        expected,
                        actual
                    );
                    return Err(CameraError::ShortRead { expected, actual });
                }

                pool.cursor = Some(next);
                slot.mark_captured(pool.frames);
                pool.frames += 1;
                Ok(slot)
            }
        }
    }

    /// 停止流 (幂等)
    ///
    /// 总会发出 stream-off；read 模式下忽略其结果。流模式下释放缓冲池并回到 read 模式。
    pub fn stop_streaming(&mut self) -> Result<()> {
        let result = self.backend.stream_off();

        if !self.is_streaming() {
            if let Err(e) = result {
                tracing::debug!(target: "boothcam::device", "Stream-off ignored in read mode: {}", e);
            }
            return Ok(());
        }

        // 先解除映射 (drop 槽位)，再释放设备缓冲区
        self.mode = IoMode::Read(ReadPool::default());
        self.free_device_buffers();
        tracing::info!(target: "boothcam::device", "Streaming stopped");
        result
    }

    /// 停止流并释放设备
    pub fn release(mut self) -> Result<()> {
        let result = self.stop_streaming();
        self.released = true;
        result
    }

    // --- 访问器 (缓存状态) ---

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn driver(&self) -> &str {
        &self.info.driver
    }

    pub fn location(&self) -> &str {
        &self.info.location
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn buffer_types(&self) -> BufferTypes {
        self.buffer_types
    }

    pub fn mode(&self) -> CaptureMode {
        match self.mode {
            IoMode::Read(_) => CaptureMode::Read,
            IoMode::Streaming(_) => CaptureMode::Streaming,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.mode, IoMode::Streaming(_))
    }

    /// 是否以 burst 模式流式采集
    pub fn is_burst(&self) -> bool {
        matches!(&self.mode, IoMode::Streaming(pool) if pool.burst)
    }

    /// 最近一次取出的槽位下标，只在流模式下有值
    pub fn pool_cursor(&self) -> Option<usize> {
        match &self.mode {
            IoMode::Streaming(pool) => pool.cursor,
            IoMode::Read(_) => None,
        }
    }

    /// 流模式缓冲池大小
    pub fn pool_size(&self) -> usize {
        match &self.mode {
            IoMode::Streaming(pool) => pool.slots.len(),
            IoMode::Read(pool) => pool.slots.len(),
        }
    }

    pub fn format(&self) -> FourCC {
        self.format
    }

    pub fn resolution(&self) -> Size {
        self.resolution
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn fps(&self) -> Option<f64> {
        self.fps
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn channel(&self) -> Option<u32> {
        self.channel
    }

    pub fn standards(&self) -> &[VideoStandard] {
        &self.standards
    }

    /// 当前制式 (如果设备报告的 id 在列表中)
    pub fn standard(&self) -> Option<&VideoStandard> {
        let id = self.standard?;
        self.standards.iter().find(|s| s.id == id)
    }

    pub fn formats(&self) -> &[FourCC] {
        &self.formats
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// 缓存状态的 JSON 快照
    #[cfg(feature = "serialize")]
    pub fn export_state(&self) -> Result<String> {
        #[derive(serde::Serialize)]
        struct State<'a> {
            info: &'a DeviceInfo,
            capabilities: Capabilities,
            buffer_types: BufferTypes,
            mode: CaptureMode,
            format: FourCC,
            resolution: Size,
            stride: usize,
            buffer_size: usize,
            fps: Option<f64>,
            channels: &'a [String],
            channel: Option<u32>,
            standards: &'a [VideoStandard],
            standard: Option<&'a VideoStandard>,
            formats: &'a [FourCC],
            pool_cursor: Option<usize>,
            burst: bool,
        }

        let state = State {
            info: &self.info,
            capabilities: self.capabilities,
            buffer_types: self.buffer_types,
            mode: self.mode(),
            format: self.format,
            resolution: self.resolution,
            stride: self.stride,
            buffer_size: self.buffer_size,
            fps: self.fps,
            channels: &self.channels,
            channel: self.channel,
            standards: &self.standards,
            standard: self.standard(),
            formats: &self.formats,
            pool_cursor: self.pool_cursor(),
            burst: self.is_burst(),
        };

        serde_json::to_string_pretty(&state).map_err(|e| {
            CameraError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }
}

impl<B: CaptureBackend> Drop for CaptureDevice<B> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.stop_streaming() {
            tracing::warn!(target: "boothcam::device", "Stop streaming on drop failed: {}", e);
        }
    }
}

fn mismatch(
    what: &'static str,
    requested: impl std::fmt::Display,
    accepted: impl std::fmt::Display,
) -> CameraError {
    tracing::warn!(
        target: "boothcam::device",
        "Unable to set {} to {}, device accepted {}",
        what,
        requested,
        accepted
    );
    CameraError::Negotiation {
        what,
        requested: requested.to_string(),
        accepted: accepted.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DeviceMemory;
    use crate::traits::{DequeuedBuffer, DeviceCaps, StreamParams};
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Debug)]
    struct Mapped(Rc<[u8]>);

    unsafe impl DeviceMemory for Mapped {
        fn as_ptr(&self) -> *const u8 {
            self.0.as_ptr()
        }

        fn len(&self) -> usize {
            self.0.len()
        }
    }

    /// 最小的内存后端：每个缓冲区填充自己的下标
    #[derive(Debug)]
    struct FakeBackend {
        caps: Capabilities,
        fmt: ImageFormat,
        /// 设备允许的最大分辨率，超出时会被裁剪
        max: Size,
        buffers: usize,
        queue: VecDeque<usize>,
        log: Vec<String>,
        short_read: Option<usize>,
        /// 输入枚举失败 (ENOTTY)
        no_inputs: bool,
        streaming: bool,
    }

    impl FakeBackend {
        fn new() -> Self {
            Self {
                caps: Capabilities::VIDEO_CAPTURE | Capabilities::STREAMING | Capabilities::READ_WRITE,
                fmt: layout(FourCC::YUYV, Size::new(4, 2)),
                max: Size::new(8, 8),
                buffers: 0,
                queue: VecDeque::new(),
                log: Vec::new(),
                short_read: None,
                no_inputs: false,
                streaming: false,
            }
        }
    }

    fn layout(fourcc: FourCC, size: Size) -> ImageFormat {
        let bytes = pixel_format::size_for(fourcc, size.width, size.height).unwrap_or(0);
        ImageFormat {
            fourcc,
            size,
            stride: size.width * 2,
            buffer_size: bytes as u32,
        }
    }

    impl CaptureBackend for FakeBackend {
        fn query_caps(&mut self) -> Result<DeviceCaps> {
            Ok(DeviceCaps {
                card: "Fake".into(),
                driver: "fake".into(),
                bus: "none".into(),
                capabilities: self.caps,
            })
        }

        fn enum_inputs(&mut self) -> Result<Vec<String>> {
            if self.no_inputs {
                return Err(CameraError::ioctl(
                    "VIDIOC_ENUMINPUT",
                    std::io::Error::from_raw_os_error(25),
                ));
            }
            Ok(vec!["Camera 1".into()])
        }

        fn input(&mut self) -> Result<u32> {
            Ok(0)
        }

        fn set_input(&mut self, _index: u32) -> Result<()> {
            Ok(())
        }

        fn enum_standards(&mut self) -> Result<Vec<VideoStandard>> {
            Ok(Vec::new())
        }

        fn standard(&mut self) -> Result<u64> {
            Err(CameraError::Unsupported("video standards"))
        }

        fn set_standard(&mut self, _id: u64) -> Result<()> {
            Err(CameraError::Unsupported("video standards"))
        }

        fn buffer_types(&mut self) -> Result<BufferTypes> {
            Ok(BufferTypes::VIDEO_CAPTURE)
        }

        fn enum_formats(&mut self) -> Result<Vec<FourCC>> {
            Ok(vec![FourCC::MJPEG, FourCC::YUYV])
        }

        fn enum_frame_sizes(&mut self, _fourcc: FourCC) -> Result<Vec<Size>> {
            Ok(vec![Size::new(4, 2), Size::new(8, 8), Size::new(4, 2)])
        }

        fn format(&mut self) -> Result<ImageFormat> {
            Ok(self.fmt)
        }

        fn set_format(&mut self, fourcc: FourCC, size: Size) -> Result<ImageFormat> {
            let size = Size::new(size.width.min(self.max.width), size.height.min(self.max.height));
            self.fmt = layout(fourcc, size);
            Ok(self.fmt)
        }

        fn params(&mut self) -> Result<StreamParams> {
            Ok(StreamParams {
                time_per_frame: false,
                interval: Fraction::new(1, 30),
            })
        }

        fn set_frame_interval(&mut self, _interval: Fraction) -> Result<()> {
            Err(CameraError::Unsupported("setting the frame rate"))
        }

        fn request_buffers(&mut self, count: usize) -> Result<usize> {
            self.log.push(format!("reqbufs {}", count));
            self.buffers = count;
            Ok(count)
        }

        fn map_buffer(&mut self, index: usize) -> Result<Box<dyn DeviceMemory>> {
            let bytes = vec![index as u8; self.fmt.buffer_size as usize];
            Ok(Box::new(Mapped(bytes.into())))
        }

        fn enqueue(&mut self, index: usize) -> Result<()> {
            self.log.push(format!("qbuf {}", index));
            self.queue.push_back(index);
            Ok(())
        }

        fn dequeue(&mut self) -> Result<DequeuedBuffer> {
            let index = self
                .queue
                .pop_front()
                .ok_or_else(|| CameraError::SimulationError("queue empty".into()))?;
            Ok(DequeuedBuffer {
                index,
                bytes_used: self.fmt.buffer_size as usize,
                sequence: 0,
            })
        }

        fn stream_on(&mut self) -> Result<()> {
            self.log.push("streamon".into());
            self.streaming = true;
            Ok(())
        }

        fn stream_off(&mut self) -> Result<()> {
            self.log.push("streamoff".into());
            self.queue.clear();
            // 和驱动一样，未启动流时拒绝 STREAMOFF
            if !std::mem::take(&mut self.streaming) {
                return Err(CameraError::ioctl(
                    "VIDIOC_STREAMOFF",
                    std::io::Error::from_raw_os_error(22),
                ));
            }
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let n = self.short_read.unwrap_or(buf.len()).min(buf.len());
            buf[..n].fill(0x5a);
            Ok(n)
        }
    }

    fn open() -> CaptureDevice<FakeBackend> {
        CaptureDevice::open(FakeBackend::new(), "/dev/fake0").unwrap()
    }

    #[test]
    fn open_reads_initial_state() {
        let dev = open();
        assert_eq!(dev.name(), "Fake");
        assert_eq!(dev.location(), "/dev/fake0");
        assert_eq!(dev.format(), FourCC::YUYV);
        assert_eq!(dev.resolution(), Size::new(4, 2));
        assert_eq!(dev.buffer_size(), 16);
        assert_eq!(dev.fps(), Some(30.0));
        assert_eq!(dev.channels(), ["Camera 1".to_string()]);
        assert!(dev.standard().is_none());
        assert_eq!(dev.mode(), CaptureMode::Read);
        assert_eq!(dev.pool_cursor(), None);
    }

    #[test]
    fn open_tolerates_failed_input_enumeration() {
        let mut backend = FakeBackend::new();
        backend.no_inputs = true;

        let mut dev = CaptureDevice::open(backend, "/dev/fake0").unwrap();
        assert!(dev.channels().is_empty());
        assert_eq!(dev.format(), FourCC::YUYV);
        assert!(matches!(
            dev.set_channel(0),
            Err(CameraError::InvalidIndex { index: 0, len: 0 })
        ));
    }

    #[test]
    fn open_rejects_non_capture_devices() {
        let mut backend = FakeBackend::new();
        backend.caps = Capabilities::VIDEO_OUTPUT;
        assert!(matches!(
            CaptureDevice::open(backend, "/dev/out"),
            Err(CameraError::NotCaptureDevice(_))
        ));
    }

    #[test]
    fn negotiation_mismatch_keeps_accepted_state() {
        let mut dev = open();
        let err = dev.set_resolution(Size::new(16, 16)).unwrap_err();
        assert!(err.is_negotiation());
        assert_eq!(dev.resolution(), Size::new(8, 8));
        assert_eq!(dev.buffer_size(), 128);
    }

    #[test]
    fn frame_rate_requires_time_per_frame() {
        let mut dev = open();
        assert!(matches!(dev.set_frame_rate(10), Err(CameraError::Unsupported(_))));
        assert_eq!(dev.fps(), Some(30.0));
    }

    #[test]
    fn out_of_range_channel_and_standard() {
        let mut dev = open();
        assert!(dev.set_channel(0).is_ok());
        assert!(matches!(
            dev.set_channel(3),
            Err(CameraError::InvalidIndex { index: 3, len: 1 })
        ));
        assert!(matches!(
            dev.set_standard(0),
            Err(CameraError::InvalidIndex { index: 0, len: 0 })
        ));
    }

    #[test]
    fn auto_format_skips_formats_without_converter() {
        let mut dev = open();
        assert_eq!(dev.auto_set_image_format(FourCC::RGB24).unwrap(), FourCC::YUYV);
        assert!(matches!(
            dev.auto_set_image_format(FourCC::RGB32),
            Err(CameraError::NoConverter { .. })
        ));
    }

    #[test]
    fn resolutions_are_deduplicated() {
        let mut dev = open();
        assert_eq!(
            dev.query_resolutions().unwrap(),
            vec![Size::new(4, 2), Size::new(8, 8)]
        );
    }

    #[test]
    fn non_burst_streaming_follows_the_pool_cursor() {
        let mut dev = open();
        dev.start_streaming(false, 3).unwrap();
        assert_eq!(dev.backend().log, ["reqbufs 3", "qbuf 0", "streamon"]);
        assert!(!dev.is_burst());

        for expected in [0, 1, 2, 0] {
            let frame = dev.query_frame().unwrap();
            assert!(frame.is_read_only());
            assert_eq!(frame.data()[0], expected as u8);
            assert_eq!(dev.pool_cursor(), Some(expected));
        }
        assert!(matches!(
            dev.set_image_format(FourCC::YUYV, None),
            Err(CameraError::StreamingActive)
        ));
        assert!(matches!(
            dev.start_streaming(false, 3),
            Err(CameraError::AlreadyStreaming)
        ));
    }

    #[test]
    fn burst_streaming_requeues_the_consumed_slot() {
        let mut dev = open();
        dev.start_streaming(true, 1).unwrap();
        // 数量被提升到 2，全部入队
        assert_eq!(dev.backend().log, ["reqbufs 2", "qbuf 0", "qbuf 1", "streamon"]);

        dev.query_frame().unwrap();
        assert_eq!(dev.backend().log.last().map(String::as_str), Some("qbuf 0"));
        dev.query_frame().unwrap();
        assert_eq!(dev.backend().log.last().map(String::as_str), Some("qbuf 1"));
    }

    #[test]
    fn streaming_requires_the_capability() {
        let mut backend = FakeBackend::new();
        backend.caps.remove(Capabilities::STREAMING);
        let mut dev = CaptureDevice::open(backend, "/dev/fake0").unwrap();
        assert!(matches!(
            dev.start_streaming(false, 4),
            Err(CameraError::StreamingUnsupported)
        ));
        assert_eq!(dev.mode(), CaptureMode::Read);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut dev = open();
        dev.stop_streaming().unwrap();
        dev.start_streaming(false, 2).unwrap();
        dev.stop_streaming().unwrap();
        dev.stop_streaming().unwrap();
        assert_eq!(dev.mode(), CaptureMode::Read);
        assert_eq!(dev.pool_cursor(), None);

        let log = &dev.backend().log;
        assert_eq!(log.iter().filter(|l| *l == "streamoff").count(), 3);
        assert_eq!(log.iter().filter(|l| *l == "reqbufs 0").count(), 1);
    }

    #[test]
    fn rejected_stream_off_is_ignored_while_idle() {
        let mut dev = open();
        assert!(dev.backend_mut().stream_off().is_err());
        assert!(dev.stop_streaming().is_ok());
        assert_eq!(dev.mode(), CaptureMode::Read);
        assert!(!dev.backend().log.contains(&"reqbufs 0".to_string()));
    }

    #[test]
    fn read_mode_uses_a_two_slot_pool() {
        let mut dev = open();
        let first = dev.query_frame().unwrap().retain();
        assert_eq!(first.data(), &[0x5a; 16]);
        assert!(!first.is_read_only());

        dev.query_frame().unwrap();
        // 第三次回到第一个槽位，被持有的旧帧不会被覆盖
        dev.backend_mut().short_read = Some(4);
        assert!(matches!(
            dev.query_frame(),
            Err(CameraError::ShortRead { expected: 16, actual: 4 })
        ));
        dev.backend_mut().short_read = None;
        assert_eq!(first.data(), &[0x5a; 16]);
        assert_eq!(dev.pool_size(), 2);
    }

    #[cfg(feature = "serialize")]
    #[test]
    fn export_state_is_json() -> anyhow::Result<()> {
        let dev = open();
        let json: serde_json::Value = serde_json::from_str(&dev.export_state()?)?;
        assert_eq!(json["format"], "YUYV");
        assert_eq!(json["mode"], "Read");
        assert_eq!(json["resolution"]["width"], 4);
        Ok(())
    }
}

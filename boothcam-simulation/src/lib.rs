//! 仿真采集后端
//!
//! 在内存中模拟一个 V4L2 设备：协商格式、分配缓冲区、维护驱动侧的入队 FIFO，
//! 出队时填充合成图像。所有调用都会被记录下来，测试可以据此检查入队顺序。

#![warn(missing_debug_implementations, rust_2018_idioms)]

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use boothcam_core::device::CaptureDevice;
use boothcam_core::error::{CameraError, Result};
use boothcam_core::frame::{DeviceMemory, Size};
use boothcam_core::pixel_format::{self, FourCC};
use boothcam_core::traits::{
    BufferTypes, Capabilities, CaptureBackend, DequeuedBuffer, DeviceCaps, Fraction, ImageFormat,
    StreamParams, VideoStandard,
};

/// 仿真设备的节点名
pub const SIM_LOCATION: &str = "sim://camera0";

/// 后端收到的调用 (按顺序记录)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    SetFormat(FourCC, Size),
    RequestBuffers(usize),
    Enqueue(usize),
    Dequeue(usize),
    StreamOn,
    StreamOff,
    Read(usize),
}

/// 与映射共享的缓冲区内存
///
/// 只在 `dequeue` 中写入，与真实驱动一样：槽位借出的 `&[u8]` 不能跨越下一次出队。
type SharedMemory = Rc<[Cell<u8>]>;

#[derive(Debug)]
struct SimMapping(SharedMemory);

// SAFETY: Cell<u8> 与 u8 布局相同；Rc 保证映射存活期间内存有效
unsafe impl DeviceMemory for SimMapping {
    fn as_ptr(&self) -> *const u8 {
        self.0.as_ptr() as *const u8
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

/// 内存中的仿真摄像头
#[derive(Debug)]
pub struct SimulatedBackend {
    card: String,
    capabilities: Capabilities,
    formats: Vec<FourCC>,
    sizes: Vec<Size>,
    inputs: Vec<String>,
    standards: Vec<VideoStandard>,
    time_per_frame: bool,
    max_fps: u32,
    max_buffers: usize,

    current: ImageFormat,
    input: u32,
    standard: Option<u64>,
    interval: Fraction,

    buffers: Vec<SharedMemory>,
    queue: VecDeque<usize>,
    streaming: bool,
    sequence: u64,
    calls: Vec<Call>,

    short_read: Option<usize>,
    fail_request_buffers: bool,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBackend {
    /// 默认配置：YUYV 640x480 @ 30fps，支持 read 与 mmap 流
    pub fn new() -> Self {
        Self {
            card: "Simulated Camera".to_string(),
            capabilities: Capabilities::VIDEO_CAPTURE
                | Capabilities::READ_WRITE
                | Capabilities::STREAMING,
            formats: vec![FourCC::YUYV, FourCC::YUV420, FourCC::MJPEG],
            sizes: vec![
                Size::new(160, 120),
                Size::new(320, 240),
                Size::new(640, 480),
                Size::new(960, 720),
            ],
            inputs: vec!["Camera 1".to_string()],
            standards: Vec::new(),
            time_per_frame: true,
            max_fps: 30,
            max_buffers: 32,

            current: layout(FourCC::YUYV, Size::new(640, 480)),
            input: 0,
            standard: None,
            interval: Fraction::new(1, 30),

            buffers: Vec::new(),
            queue: VecDeque::new(),
            streaming: false,
            sequence: 0,
            calls: Vec::new(),

            short_read: None,
            fail_request_buffers: false,
        }
    }

    // --- 构造参数 ---

    pub fn with_name(mut self, card: impl Into<String>) -> Self {
        self.card = card.into();
        self
    }

    pub fn with_capabilities(mut self, caps: Capabilities) -> Self {
        self.capabilities = caps;
        self
    }

    /// 支持的像素格式，第一个成为当前格式
    pub fn with_formats(mut self, formats: &[FourCC]) -> Self {
        self.formats = formats.to_vec();
        if let Some(&first) = formats.first() {
            self.current = layout(first, self.current.size);
        }
        self
    }

    /// 支持的离散分辨率
    pub fn with_sizes(mut self, sizes: &[Size]) -> Self {
        self.sizes = sizes.to_vec();
        self
    }

    /// 初始格式 (不经过协商)
    pub fn with_format(mut self, fourcc: FourCC, size: Size) -> Self {
        self.current = layout(fourcc, size);
        self
    }

    pub fn with_inputs(mut self, inputs: &[&str]) -> Self {
        self.inputs = inputs.iter().map(|s| s.to_string()).collect();
        self
    }

    /// 支持的制式，第一个成为当前制式
    pub fn with_standards(mut self, standards: &[(&str, u64)]) -> Self {
        self.standards = standards
            .iter()
            .map(|&(name, id)| VideoStandard {
                name: name.to_string(),
                id,
            })
            .collect();
        self.standard = self.standards.first().map(|s| s.id);
        self
    }

    /// 设备能接受的最高帧率
    pub fn with_max_fps(mut self, fps: u32) -> Self {
        self.max_fps = fps.max(1);
        self
    }

    /// 不支持设置 time-per-frame
    pub fn without_frame_rate_control(mut self) -> Self {
        self.time_per_frame = false;
        self
    }

    /// 驱动最多分配的缓冲区数量
    pub fn with_max_buffers(mut self, count: usize) -> Self {
        self.max_buffers = count;
        self
    }

    // --- 故障注入 ---

    /// 之后的 read() 最多返回 `bytes` 字节，None 恢复正常
    pub fn inject_short_read(&mut self, bytes: Option<usize>) {
        self.short_read = bytes;
    }

    /// 下一次 request_buffers (count > 0) 失败
    pub fn fail_next_request_buffers(&mut self) {
        self.fail_request_buffers = true;
    }

    // --- 检查 ---

    /// 收到的全部调用
    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// 只看入队的缓冲区下标
    pub fn enqueued(&self) -> Vec<usize> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Enqueue(i) => Some(*i),
                _ => None,
            })
            .collect()
    }

    /// 当前在驱动队列中等待填充的缓冲区
    pub fn pending(&self) -> Vec<usize> {
        self.queue.iter().copied().collect()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// 已分配的设备缓冲区数量
    pub fn allocated(&self) -> usize {
        self.buffers.len()
    }

    fn nearest_size(&self, requested: Size) -> Size {
        if self.sizes.is_empty() {
            return requested;
        }
        // 不超过请求的最大尺寸，否则取最小尺寸
        let area = |s: &Size| s.width as u64 * s.height as u64;
        self.sizes
            .iter()
            .filter(|s| s.width <= requested.width && s.height <= requested.height)
            .max_by_key(|s| area(s))
            .or_else(|| self.sizes.iter().min_by_key(|s| area(s)))
            .copied()
            .unwrap_or(requested)
    }

    fn fill(&self, target: &[Cell<u8>]) {
        let pattern = synthetic_frame(self.current.fourcc, self.current.size, self.sequence);
        for (cell, byte) in target.iter().zip(pattern) {
            cell.set(byte);
        }
    }
}

fn fail(msg: impl Into<String>) -> CameraError {
    let msg = msg.into();
    tracing::error!(target: "boothcam::simulation", "{}", msg);
    CameraError::SimulationError(msg)
}

/// 按格式计算行跨距和帧大小 (压缩格式按 2 字节/像素预留)
fn layout(fourcc: FourCC, size: Size) -> ImageFormat {
    let (w, h) = (size.width, size.height);
    let stride = match fourcc {
        FourCC::YUV420
        | FourCC::YVU420
        | FourCC::YUV422P
        | FourCC::YUV411P
        | FourCC::YUV410
        | FourCC::YVU410
        | FourCC::GREY => w,
        _ => pixel_format::size_for(fourcc, w, 1)
            .map(|n| n as u32)
            .unwrap_or(w * 2),
    };
    let buffer_size = pixel_format::size_for(fourcc, w, h)
        .map(|n| n as u32)
        .unwrap_or(w * h * 2);
    ImageFormat {
        fourcc,
        size,
        stride,
        buffer_size,
    }
}

/// 合成一帧图像
///
/// 亮度为 `16 + (x + y + sequence) % 220` 的斜向渐变，色度恒为 128 (中性)，
/// 因此转换到 RGB 后每个像素都是灰色，且 R = G = B = Y。
pub fn synthetic_frame(fourcc: FourCC, size: Size, sequence: u64) -> Vec<u8> {
    let (w, h) = (size.width as usize, size.height as usize);
    let luma = |x: usize, y: usize| (16 + (x + y + sequence as usize) % 220) as u8;

    match fourcc {
        FourCC::YUYV => {
            let mut out = Vec::with_capacity(w * h * 2);
            for y in 0..h {
                for x in (0..w).step_by(2) {
                    out.extend_from_slice(&[luma(x, y), 128, luma(x + 1, y), 128]);
                }
            }
            out
        }
        FourCC::YUV420 | FourCC::YVU420 => {
            let mut out = Vec::with_capacity(w * h * 3 / 2);
            for y in 0..h {
                for x in 0..w {
                    out.push(luma(x, y));
                }
            }
            out.resize(w * h + 2 * (w * h / 4), 128);
            out
        }
        _ => {
            let len = layout(fourcc, size).buffer_size as usize;
            vec![(sequence % 256) as u8; len]
        }
    }
}

impl CaptureBackend for SimulatedBackend {
    fn query_caps(&mut self) -> Result<DeviceCaps> {
        Ok(DeviceCaps {
            card: self.card.clone(),
            driver: "boothcam-sim".to_string(),
            bus: "virtual".to_string(),
            capabilities: self.capabilities,
        })
    }

    fn enum_inputs(&mut self) -> Result<Vec<String>> {
        Ok(self.inputs.clone())
    }

    fn input(&mut self) -> Result<u32> {
        if self.inputs.is_empty() {
            return Err(fail("device has no inputs"));
        }
        Ok(self.input)
    }

    fn set_input(&mut self, index: u32) -> Result<()> {
        if index as usize >= self.inputs.len() {
            return Err(fail(format!("no input {}", index)));
        }
        self.input = index;
        Ok(())
    }

    fn enum_standards(&mut self) -> Result<Vec<VideoStandard>> {
        Ok(self.standards.clone())
    }

    fn standard(&mut self) -> Result<u64> {
        self.standard
            .ok_or_else(|| fail("device has no video standards"))
    }

    fn set_standard(&mut self, id: u64) -> Result<()> {
        if !self.standards.iter().any(|s| s.id == id) {
            return Err(fail(format!("unknown video standard {:#x}", id)));
        }
        self.standard = Some(id);
        Ok(())
    }

    fn buffer_types(&mut self) -> Result<BufferTypes> {
        Ok(BufferTypes::VIDEO_CAPTURE)
    }

    fn enum_formats(&mut self) -> Result<Vec<FourCC>> {
        Ok(self.formats.clone())
    }

    fn enum_frame_sizes(&mut self, fourcc: FourCC) -> Result<Vec<Size>> {
        if !self.formats.contains(&fourcc) {
            return Ok(Vec::new());
        }
        Ok(self.sizes.clone())
    }

    fn format(&mut self) -> Result<ImageFormat> {
        Ok(self.current)
    }

    fn set_format(&mut self, fourcc: FourCC, size: Size) -> Result<ImageFormat> {
        if !self.buffers.is_empty() {
            return Err(fail("set_format while buffers are allocated"));
        }
        self.calls.push(Call::SetFormat(fourcc, size));

        // 和真实驱动一样：不支持的格式保持原样，尺寸取最接近的
        let fourcc = if self.formats.contains(&fourcc) {
            fourcc
        } else {
            self.current.fourcc
        };
        self.current = layout(fourcc, self.nearest_size(size));
        Ok(self.current)
    }

    fn params(&mut self) -> Result<StreamParams> {
        Ok(StreamParams {
            time_per_frame: self.time_per_frame,
            interval: self.interval,
        })
    }

    fn set_frame_interval(&mut self, interval: Fraction) -> Result<()> {
        if !self.time_per_frame {
            return Err(fail("time-per-frame is not supported"));
        }
        let fps = interval
            .fps()
            .ok_or_else(|| fail("invalid frame interval"))?;
        let fps = (fps.round() as u32).clamp(1, self.max_fps);
        self.interval = Fraction::new(1, fps);
        Ok(())
    }

    fn request_buffers(&mut self, count: usize) -> Result<usize> {
        self.calls.push(Call::RequestBuffers(count));
        if self.streaming {
            return Err(fail("request_buffers while streaming"));
        }
        if count > 0 && std::mem::take(&mut self.fail_request_buffers) {
            return Err(fail("out of buffer memory"));
        }

        let granted = count.min(self.max_buffers);
        let len = self.current.buffer_size as usize;
        self.queue.clear();
        self.buffers = (0..granted)
            .map(|_| (0..len).map(|_| Cell::new(0)).collect())
            .collect();
        Ok(granted)
    }

    fn map_buffer(&mut self, index: usize) -> Result<Box<dyn DeviceMemory>> {
        let memory = self
            .buffers
            .get(index)
            .ok_or_else(|| fail(format!("no buffer {}", index)))?;
        Ok(Box::new(SimMapping(Rc::clone(memory))))
    }

    fn enqueue(&mut self, index: usize) -> Result<()> {
        if index >= self.buffers.len() {
            return Err(fail(format!("no buffer {}", index)));
        }
        if self.queue.contains(&index) {
            return Err(fail(format!("buffer {} is already queued", index)));
        }
        self.calls.push(Call::Enqueue(index));
        self.queue.push_back(index);
        Ok(())
    }

    fn dequeue(&mut self) -> Result<DequeuedBuffer> {
        if !self.streaming {
            return Err(fail("dequeue while not streaming"));
        }
        // 真实设备会一直阻塞，仿真直接报错
        let index = self
            .queue
            .pop_front()
            .ok_or_else(|| fail("no buffer queued"))?;

        self.fill(&self.buffers[index]);
        let sequence = self.sequence;
        self.sequence += 1;
        self.calls.push(Call::Dequeue(index));

        Ok(DequeuedBuffer {
            index,
            bytes_used: self.current.buffer_size as usize,
            sequence,
        })
    }

    fn stream_on(&mut self) -> Result<()> {
        if self.buffers.is_empty() {
            return Err(fail("stream_on without buffers"));
        }
        self.calls.push(Call::StreamOn);
        self.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> Result<()> {
        self.calls.push(Call::StreamOff);
        self.streaming = false;
        self.queue.clear();
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.capabilities.contains(Capabilities::READ_WRITE) {
            return Err(fail("read() is not supported"));
        }

        let frame = synthetic_frame(self.current.fourcc, self.current.size, self.sequence);
        self.sequence += 1;

        let n = frame
            .len()
            .min(buf.len())
            .min(self.short_read.unwrap_or(usize::MAX));
        buf[..n].copy_from_slice(&frame[..n]);
        self.calls.push(Call::Read(n));
        Ok(n)
    }
}

/// 打开一个仿真设备
pub fn open(backend: SimulatedBackend) -> Result<CaptureDevice<SimulatedBackend>> {
    CaptureDevice::open(backend, SIM_LOCATION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiates_like_a_driver() {
        let mut sim = SimulatedBackend::new();
        let fmt = sim.set_format(FourCC::YUV420, Size::new(800, 600)).unwrap();
        assert_eq!(fmt.fourcc, FourCC::YUV420);
        assert_eq!(fmt.size, Size::new(640, 480));
        assert_eq!(fmt.stride, 640);
        assert_eq!(fmt.buffer_size, 640 * 480 * 3 / 2);

        // 不支持的格式保持原格式
        let fmt = sim.set_format(FourCC::RGB32, Size::new(100, 100)).unwrap();
        assert_eq!(fmt.fourcc, FourCC::YUV420);
        assert_eq!(fmt.size, Size::new(160, 120));
    }

    #[test]
    fn driver_queue_is_fifo() -> anyhow::Result<()> {
        let mut sim = SimulatedBackend::new().with_format(FourCC::YUYV, Size::new(4, 2));
        assert_eq!(sim.request_buffers(3)?, 3);
        sim.enqueue(2)?;
        sim.enqueue(0)?;
        assert!(sim.enqueue(0).is_err());
        sim.stream_on()?;

        assert_eq!(sim.dequeue()?.index, 2);
        let second = sim.dequeue()?;
        assert_eq!(second.index, 0);
        assert_eq!(second.sequence, 1);
        assert!(sim.dequeue().is_err());
        Ok(())
    }

    #[test]
    fn mapping_sees_filled_frames() -> anyhow::Result<()> {
        let size = Size::new(4, 2);
        let mut sim = SimulatedBackend::new().with_format(FourCC::YUYV, size);
        sim.request_buffers(2)?;
        let mapping = sim.map_buffer(1)?;
        sim.enqueue(1)?;
        sim.stream_on()?;
        sim.dequeue()?;

        // SAFETY: 映射存活，长度来自映射本身
        let bytes = unsafe { std::slice::from_raw_parts(mapping.as_ptr(), mapping.len()) };
        assert_eq!(bytes, synthetic_frame(FourCC::YUYV, size, 0).as_slice());
        Ok(())
    }

    #[test]
    fn frame_rate_is_clamped() {
        let mut sim = SimulatedBackend::new().with_max_fps(15);
        sim.set_frame_interval(Fraction::new(1, 25)).unwrap();
        assert_eq!(sim.params().unwrap().interval, Fraction::new(1, 15));

        let mut fixed = SimulatedBackend::new().without_frame_rate_control();
        assert!(fixed.set_frame_interval(Fraction::new(1, 10)).is_err());
    }

    #[test]
    fn injected_faults() {
        let mut sim = SimulatedBackend::new().with_format(FourCC::YUYV, Size::new(2, 2));
        sim.fail_next_request_buffers();
        assert!(sim.request_buffers(4).is_err());
        assert_eq!(sim.request_buffers(4).unwrap(), 4);

        sim.inject_short_read(Some(3));
        let mut buf = [0u8; 8];
        assert_eq!(sim.read(&mut buf).unwrap(), 3);
    }

    #[test]
    fn synthetic_frames_are_neutral_grey() {
        let frame = synthetic_frame(FourCC::YUYV, Size::new(4, 1), 5);
        assert_eq!(frame, vec![21, 128, 22, 128, 23, 128, 24, 128]);

        let planar = synthetic_frame(FourCC::YUV420, Size::new(2, 2), 0);
        assert_eq!(planar, vec![16, 17, 17, 18, 128, 128]);
    }
}

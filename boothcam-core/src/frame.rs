use crate::error::{CameraError, Result};
use crate::pixel_format::{self, FourCC};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::SystemTime;

/// 图像尺寸 (像素)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// 与设备共享的内存 (例如 mmap 映射的内核缓冲区)
///
/// 设备 (或仿真后端) 在出队时会写入这块内存，因此指向它的 `&[u8]`
/// 只在两次出队之间有效。
///
/// # Safety
/// `as_ptr()` 必须在对象存活期间对 `len()` 个字节有效且可读。
/// 实现者只能在缓冲区处于驱动队列中时写入 (即出队完成之前)。
/// 映射的释放 (munmap) 应放在实现者的 `Drop` 中。
pub unsafe trait DeviceMemory: fmt::Debug {
    fn as_ptr(&self) -> *const u8;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

enum Storage {
    Heap(Vec<u8>),
    Device(Box<dyn DeviceMemory>),
}

impl Storage {
    fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Heap(v) => v,
            Storage::Device(mem) => {
                if mem.is_empty() {
                    return &[];
                }
                // SAFETY: DeviceMemory 保证指针在 mem 存活期间有效
                unsafe { std::slice::from_raw_parts(mem.as_ptr(), mem.len()) }
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            Storage::Heap(v) => v.len(),
            Storage::Device(mem) => mem.len(),
        }
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Storage::Heap(v) => write!(f, "Heap({} bytes)", v.len()),
            Storage::Device(mem) => write!(f, "Device({:?})", mem),
        }
    }
}

#[derive(Debug)]
struct FrameInner {
    name: Option<String>,
    read_only: bool,
    size: Size,
    format: FourCC,
    /// 行跨距 (Bytes per line)，部分格式可能为 0
    stride: usize,
    /// 当前格式下的期望图像大小
    image_size: usize,
    storage: Storage,
    timestamp: Cell<SystemTime>,
    sequence: Cell<u64>,
}

impl FrameInner {
    fn empty() -> Self {
        Self {
            name: None,
            read_only: false,
            size: Size::default(),
            format: FourCC::default(),
            stride: 0,
            image_size: 0,
            storage: Storage::Heap(Vec::new()),
            timestamp: Cell::new(SystemTime::now()),
            sequence: Cell::new(0),
        }
    }

    fn is_writable(&self) -> bool {
        !self.read_only && matches!(self.storage, Storage::Heap(_))
    }

    fn grow(&mut self, capacity: usize) {
        if let Storage::Heap(v) = &mut self.storage {
            if v.len() < capacity {
                v.resize(capacity, 0);
            }
        }
    }

    fn touch(&self) {
        self.timestamp.set(SystemTime::now());
    }
}

/// 引用计数的帧缓冲区
///
/// 计数非原子 (`Rc`)，帧只在单线程内流转。共享 (`ref_count() > 1`) 或只读的帧
/// 永远不会被原地修改：所有修改接口在这种情况下返回 `Busy` / `ReadOnly`，
/// 调用方应先 `ensure_writable()` / `ensure_cache()` 拿到私有副本。
///
/// 来自 mmap 缓冲池的帧是只读的，所有权属于设备的缓冲池。
pub struct FrameBuffer {
    inner: Rc<FrameInner>,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for FrameBuffer {
    /// 等价于 `retain()`：只增加引用计数，不复制像素
    fn clone(&self) -> Self {
        self.retain()
    }
}

impl FrameBuffer {
    /// 创建一个空帧，引用计数为 1
    pub fn new() -> Self {
        Self {
            inner: Rc::new(FrameInner::empty()),
        }
    }

    /// 创建并分配指定格式的帧
    pub fn with_format(format: FourCC, width: u32, height: u32) -> Result<Self> {
        let mut frame = Self::new();
        frame.change_format(format, width, height)?;
        Ok(frame)
    }

    /// 用现成的像素数据构造一个可写帧
    pub fn from_bytes(format: FourCC, size: Size, stride: usize, bytes: Vec<u8>) -> Self {
        let image_size = pixel_format::size_for(format, size.width, size.height)
            .map_or(bytes.len(), |n| n.min(bytes.len()));
        Self {
            inner: Rc::new(FrameInner {
                size,
                format,
                stride,
                image_size,
                storage: Storage::Heap(bytes),
                ..FrameInner::empty()
            }),
        }
    }

    /// 构造一个指向设备内存的只读帧 (缓冲池槽位)
    pub fn from_device_memory(
        memory: Box<dyn DeviceMemory>,
        format: FourCC,
        size: Size,
        stride: usize,
        image_size: usize,
    ) -> Self {
        let image_size = image_size.min(memory.len());
        Self {
            inner: Rc::new(FrameInner {
                read_only: true,
                size,
                format,
                stride,
                image_size,
                storage: Storage::Device(memory),
                ..FrameInner::empty()
            }),
        }
    }

    /// 增加引用计数
    ///
    /// 对缓冲池槽位而言，新句柄仍指向设备内存；跨越下一次采集前需要
    /// `ensure_writable()` 或 `duplicate()` 得到私有副本。
    pub fn retain(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }

    /// 释放当前引用；计数归零时缓冲区和名称随之释放
    pub fn release(self) {
        if Rc::strong_count(&self.inner) == 1 {
            tracing::debug!(target: "boothcam::frame", "A frame's refcount dropped to zero");
        }
    }

    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    /// 是否与本句柄共享同一份底层帧
    pub fn ptr_eq(&self, other: &FrameBuffer) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn inner_mut(&mut self) -> Result<&mut FrameInner> {
        let count = Rc::strong_count(&self.inner);
        let inner = Rc::get_mut(&mut self.inner).ok_or(CameraError::Busy(count))?;
        if !inner.is_writable() {
            return Err(CameraError::ReadOnly);
        }
        Ok(inner)
    }

    /// 调整缓冲区容量，不会缩小到当前图像大小以下
    pub fn resize_buffer(&mut self, capacity: usize) -> Result<usize> {
        let inner = self.inner_mut()?;
        let capacity = capacity.max(inner.image_size);
        if let Storage::Heap(v) = &mut inner.storage {
            v.resize(capacity, 0);
        }
        Ok(capacity)
    }

    /// 写时复制闸门：共享或只读时，替换为深拷贝的私有帧
    pub fn ensure_writable(&mut self) {
        if self.ref_count() > 1 || !self.inner.is_writable() {
            let private = self.duplicate();
            std::mem::replace(self, private).release();
        }
    }

    /// 和 `ensure_writable` 类似，但不保留原有像素 (调用方将整体覆盖)
    pub fn ensure_cache(&mut self) {
        if self.ref_count() > 1 || !self.inner.is_writable() {
            let src = &self.inner;
            let private = Self {
                inner: Rc::new(FrameInner {
                    size: src.size,
                    format: src.format,
                    stride: src.stride,
                    image_size: src.image_size,
                    storage: Storage::Heap(vec![0; src.storage.len()]),
                    ..FrameInner::empty()
                }),
            };
            std::mem::replace(self, private).release();
        }
    }

    /// 修改帧格式并分配缓冲区
    ///
    /// 行跨距不会被重新计算，由转换函数在知道真实排布时设置。
    pub fn change_format(&mut self, format: FourCC, width: u32, height: u32) -> Result<()> {
        let inner = match self.inner_mut() {
            Ok(inner) => inner,
            Err(e) => {
                tracing::error!(target: "boothcam::frame", "Change format rejected: {}", e);
                return Err(e);
            }
        };

        let image_size = pixel_format::size_for(format, width, height);
        if let Some(n) = image_size {
            inner.grow(n);
        }

        inner.format = format;
        inner.size = Size::new(width, height);
        inner.image_size = image_size.unwrap_or(0);
        inner.touch();
        Ok(())
    }

    /// 深拷贝：新帧的引用计数为 1，可写，像素逐字节复制
    pub fn duplicate(&self) -> Self {
        let src = &self.inner;
        Self {
            inner: Rc::new(FrameInner {
                size: src.size,
                format: src.format,
                stride: src.stride,
                image_size: src.image_size,
                storage: Storage::Heap(src.storage.as_slice().to_vec()),
                sequence: Cell::new(src.sequence.get()),
                ..FrameInner::empty()
            }),
        }
    }

    // --- 访问器 ---

    pub fn width(&self) -> u32 {
        self.inner.size.width
    }

    pub fn height(&self) -> u32 {
        self.inner.size.height
    }

    pub fn size(&self) -> Size {
        self.inner.size
    }

    pub fn format(&self) -> FourCC {
        self.inner.format
    }

    /// 行跨距，某些格式可能为 0
    pub fn row_stride(&self) -> usize {
        self.inner.stride
    }

    pub fn image_size(&self) -> usize {
        self.inner.image_size
    }

    /// 已分配的缓冲区长度 (>= image_size)
    pub fn capacity(&self) -> usize {
        self.inner.storage.len()
    }

    /// 图像数据 (长度为 image_size)
    pub fn data(&self) -> &[u8] {
        let buf = self.inner.storage.as_slice();
        &buf[..self.inner.image_size.min(buf.len())]
    }

    /// 整个缓冲区
    pub fn buffer(&self) -> &[u8] {
        self.inner.storage.as_slice()
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    /// 最后修改/采集时间
    pub fn timestamp(&self) -> SystemTime {
        self.inner.timestamp.get()
    }

    /// 采集序号 (由设备填写)
    pub fn sequence(&self) -> u64 {
        self.inner.sequence.get()
    }

    /// 以像素三元组视图访问 RGB24/BGR24 数据 (仅限无行填充的紧凑排布)
    pub fn pixels24(&self) -> Option<&[[u8; 3]]> {
        if !matches!(self.format(), FourCC::RGB24 | FourCC::BGR24)
            || self.row_stride() != self.width() as usize * 3
        {
            return None;
        }
        bytemuck::try_cast_slice(self.data()).ok()
    }

    // --- 修改接口 (都要求独占且可写) ---

    pub fn data_mut(&mut self) -> Result<&mut [u8]> {
        let inner = self.inner_mut()?;
        inner.touch();
        let image_size = inner.image_size;
        match &mut inner.storage {
            Storage::Heap(v) => {
                let end = image_size.min(v.len());
                Ok(&mut v[..end])
            }
            Storage::Device(_) => Err(CameraError::ReadOnly),
        }
    }

    pub fn buffer_mut(&mut self) -> Result<&mut [u8]> {
        let inner = self.inner_mut()?;
        inner.touch();
        match &mut inner.storage {
            Storage::Heap(v) => Ok(v.as_mut_slice()),
            Storage::Device(_) => Err(CameraError::ReadOnly),
        }
    }

    pub fn set_row_stride(&mut self, stride: usize) -> Result<()> {
        self.inner_mut()?.stride = stride;
        Ok(())
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> Result<()> {
        self.inner_mut()?.name = Some(name.into());
        Ok(())
    }

    /// 设置只读标记。设备内存无法被标记为可写。
    pub fn set_read_only(&mut self, read_only: bool) -> Result<()> {
        let count = Rc::strong_count(&self.inner);
        let inner = Rc::get_mut(&mut self.inner).ok_or(CameraError::Busy(count))?;
        if !read_only && matches!(inner.storage, Storage::Device(_)) {
            return Err(CameraError::ReadOnly);
        }
        inner.read_only = read_only;
        Ok(())
    }

    /// 一次性设置几何信息 (用于转换输出和 read 模式缓冲池)
    pub(crate) fn set_layout(
        &mut self,
        format: FourCC,
        size: Size,
        stride: usize,
        image_size: usize,
    ) -> Result<()> {
        let inner = self.inner_mut()?;
        inner.grow(image_size);
        inner.format = format;
        inner.size = size;
        inner.stride = stride;
        inner.image_size = image_size;
        inner.touch();
        Ok(())
    }

    /// 设备完成一次采集后更新时间戳和序号 (只涉及元数据)
    pub(crate) fn mark_captured(&self, sequence: u64) {
        self.inner.sequence.set(sequence);
        self.inner.touch();
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("name", &self.inner.name)
            .field("size", &self.inner.size)
            .field("format", &self.inner.format)
            .field("stride", &self.inner.stride)
            .field("image_size", &self.inner.image_size)
            .field("storage", &self.inner.storage)
            .field("read_only", &self.inner.read_only)
            .field("refcount", &self.ref_count())
            .finish()
    }
}

use crate::pixel_format::FourCC;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("{0} is not a video capture device")]
    NotCaptureDevice(String),

    #[error("ioctl({op}) failed: {source}")]
    Ioctl {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// 设备接受了请求，但调整了参数。缓存状态保存的是设备实际接受的值。
    #[error("{what} negotiation failed: requested {requested}, device accepted {accepted}")]
    Negotiation {
        what: &'static str,
        requested: String,
        accepted: String,
    },

    #[error("Video mmap-streaming is not supported")]
    StreamingUnsupported,

    #[error("Not supported by device: {0}")]
    Unsupported(&'static str),

    #[error("Device is already streaming")]
    AlreadyStreaming,

    #[error("Operation not allowed while streaming; stop the stream first")]
    StreamingActive,

    #[error("Expected {expected} bytes read but only {actual} returned")]
    ShortRead { expected: usize, actual: usize },

    #[error("No converter from {input} to {output}")]
    NoConverter { input: FourCC, output: FourCC },

    #[error("Unknown image size for format [{0}]")]
    UnknownSize(String),

    #[error("Frame is shared (refcount = {0})")]
    Busy(usize),

    #[error("Frame is read only")]
    ReadOnly,

    #[error("Frame holds {actual} bytes but {expected} are required")]
    FrameTooSmall { expected: usize, actual: usize },

    #[error("Index {index} out of range (len {len})")]
    InvalidIndex { index: usize, len: usize },

    #[error("Image encoding failed: {0}")]
    Encode(String),

    #[error("Simulation backend error: {0}")]
    SimulationError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CameraError {
    /// 包装一次失败的 ioctl 调用
    pub fn ioctl(op: &'static str, source: std::io::Error) -> Self {
        Self::Ioctl { op, source }
    }

    /// 是否为协商失败 (设备接受了不同的值，调用方可以继续使用)
    pub fn is_negotiation(&self) -> bool {
        matches!(self, Self::Negotiation { .. })
    }
}

pub type Result<T> = std::result::Result<T, CameraError>;

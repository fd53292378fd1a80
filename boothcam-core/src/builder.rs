use crate::frame::Size;
use crate::pixel_format::FourCC;

/// 预览与拍照的采集配置
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(default))]
pub struct CaptureConfig {
    /// 设备节点 (e.g. "/dev/video0")
    pub device: String,
    /// 预览流的像素格式
    pub format: FourCC,
    /// 预览分辨率
    pub resolution: Size,
    /// 预览帧率，None 表示保持设备默认值
    pub fps: Option<u32>,
    /// 预览流 mmap 缓冲区数量 (最少 2)
    pub buffer_count: usize,
    /// 是否以 burst 模式入队
    pub burst: bool,
    /// 静态照片的 JPEG 质量 [0, 100]
    pub quality: u8,
    /// 高分辨率拍照参数
    pub still: StillConfig,
}

/// 高分辨率静态拍照参数
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(default))]
pub struct StillConfig {
    pub resolution: Size,
    pub buffer_count: usize,
    /// 丢弃的预热帧数 (等待自动曝光/白平衡稳定)
    pub warmup_frames: usize,
}

impl Default for StillConfig {
    fn default() -> Self {
        Self {
            resolution: Size::new(960, 720),
            buffer_count: 4,
            warmup_frames: 2,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureConfig {
    pub fn new() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            format: FourCC::YUYV,
            resolution: Size::new(640, 480),
            fps: Some(10),
            buffer_count: 4,
            burst: false,
            quality: 85,
            still: StillConfig::default(),
        }
    }

    /// 设置设备节点
    pub fn device(mut self, path: impl Into<String>) -> Self {
        self.device = path.into();
        self
    }

    /// 设置预览像素格式
    /// 支持传入 FourCC 或原始 u32 编码
    pub fn format<T: Into<FourCC>>(mut self, fmt: T) -> Self {
        self.format = fmt.into();
        self
    }

    /// 设置预览分辨率
    pub fn resolution(mut self, w: u32, h: u32) -> Self {
        self.resolution = Size::new(w, h);
        self
    }

    /// 设置预览帧率
    pub fn fps(mut self, fps: u32) -> Self {
        self.fps = Some(fps);
        self
    }

    /// 设置缓冲区数量 (默认 4)
    pub fn buffer_count(mut self, count: usize) -> Self {
        self.buffer_count = count;
        self
    }

    pub fn burst(mut self, burst: bool) -> Self {
        self.burst = burst;
        self
    }

    /// 设置拍照分辨率
    pub fn still_resolution(mut self, w: u32, h: u32) -> Self {
        self.still.resolution = Size::new(w, h);
        self
    }

    /// 设置拍照前丢弃的帧数
    pub fn warmup_frames(mut self, frames: usize) -> Self {
        self.still.warmup_frames = frames;
        self
    }

    /// 设置 JPEG 质量，超出 100 的值会被截断
    pub fn quality(mut self, quality: u8) -> Self {
        self.quality = quality.min(100);
        self
    }

    /// 从 JSON 加载配置，缺省字段使用默认值
    #[cfg(feature = "serialize")]
    pub fn from_json(text: &str) -> crate::error::Result<Self> {
        let mut config: Self = serde_json::from_str(text).map_err(|e| {
            crate::error::CameraError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        // 和 quality() 一致：超出 100 的值截断
        config.quality = config.quality.min(100);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_booth_camera() {
        let config = CaptureConfig::default();
        assert_eq!(config.device, "/dev/video0");
        assert_eq!(config.format, FourCC::YUYV);
        assert_eq!(config.resolution, Size::new(640, 480));
        assert_eq!(config.fps, Some(10));
        assert_eq!(config.still.resolution, Size::new(960, 720));
        assert_eq!(config.quality, 85);
    }

    #[test]
    fn builder_chain() {
        let config = CaptureConfig::new()
            .device("/dev/video2")
            .format(FourCC::YUV420)
            .resolution(320, 240)
            .fps(30)
            .buffer_count(6)
            .burst(true)
            .still_resolution(1600, 1200)
            .warmup_frames(1)
            .quality(250);

        assert_eq!(config.device, "/dev/video2");
        assert_eq!(config.format, FourCC::YUV420);
        assert_eq!(config.buffer_count, 6);
        assert!(config.burst);
        assert_eq!(config.still.resolution, Size::new(1600, 1200));
        assert_eq!(config.still.warmup_frames, 1);
        assert_eq!(config.quality, 100);
    }

    #[cfg(feature = "serialize")]
    #[test]
    fn load_from_json() -> anyhow::Result<()> {
        let config = CaptureConfig::from_json(
            r#"{ "device": "/dev/video1", "format": "YU12", "quality": 70, "still": { "warmup_frames": 5 } }"#,
        )?;
        assert_eq!(config.device, "/dev/video1");
        assert_eq!(config.format, FourCC::YUV420);
        assert_eq!(config.resolution, Size::new(640, 480));
        assert_eq!(config.quality, 70);
        assert_eq!(config.still.warmup_frames, 5);
        assert_eq!(config.still.buffer_count, 4);

        assert!(CaptureConfig::from_json(r#"{ "format": "TOOLONG" }"#).is_err());
        Ok(())
    }

    #[cfg(feature = "serialize")]
    #[test]
    fn json_quality_is_clamped() -> anyhow::Result<()> {
        let config = CaptureConfig::from_json(r#"{ "quality": 250 }"#)?;
        assert_eq!(config.quality, 100);
        Ok(())
    }
}

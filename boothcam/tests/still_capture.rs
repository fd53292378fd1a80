use std::cell::Cell;
use std::path::Path;

use boothcam::camera::configure_preview;
use boothcam::imgcodecs::{ImageJpegEncoder, JpegEncoder};
use boothcam::prelude::*;
use boothcam::still::capture_still_with_config;
use boothcam_simulation::{Call, SimulatedBackend};

fn preview(backend: SimulatedBackend) -> anyhow::Result<CaptureDevice<SimulatedBackend>> {
    let mut device = boothcam_simulation::open(backend)?;
    configure_preview(&mut device, &CaptureConfig::new())?;
    device.backend_mut().clear_calls();
    Ok(device)
}

fn dequeues(device: &CaptureDevice<SimulatedBackend>) -> usize {
    device
        .backend()
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::Dequeue(_)))
        .count()
}

fn assert_restored(device: &CaptureDevice<SimulatedBackend>, format: FourCC) {
    assert!(!device.is_streaming());
    assert_eq!(device.format(), format);
    assert_eq!(device.resolution(), Size::new(640, 480));
    assert_eq!(device.backend().allocated(), 0);
}

#[test]
fn still_is_captured_at_high_resolution() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("still.jpg");
    let mut device = preview(SimulatedBackend::new())?;

    let still = capture_still_with_config(&mut device, &CaptureConfig::new(), &path)?;
    assert_eq!(still.size, Size::new(960, 720));
    assert_eq!(still.source_format, FourCC::YUYV);
    // 两帧预热后的第三帧
    assert_eq!(still.sequence, 2);
    assert_eq!(dequeues(&device), 3);

    let decoded = image::open(&path)?.to_rgb8();
    assert_eq!(decoded.dimensions(), (960, 720));

    assert_restored(&device, FourCC::YUYV);
    assert_eq!(
        device.backend().calls().last(),
        Some(&Call::SetFormat(FourCC::YUYV, Size::new(640, 480)))
    );

    // 预览可以照常继续
    device.start_streaming(false, 4)?;
    assert_eq!(device.query_frame()?.size(), Size::new(640, 480));
    Ok(())
}

#[test]
fn negotiated_down_resolution_is_used() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("small.jpg");
    let backend = SimulatedBackend::new().with_sizes(&[Size::new(320, 240), Size::new(640, 480)]);
    let mut device = preview(backend)?;

    let config = StillConfig {
        warmup_frames: 0,
        ..StillConfig::default()
    };
    let restore = RestoreFormat::current(&device);
    let still = capture_still(&mut device, restore, &path, 90, &ImageJpegEncoder, &config)?;

    assert_eq!(still.size, Size::new(640, 480));
    assert_eq!(dequeues(&device), 1);
    assert_eq!(image::open(&path)?.to_rgb8().dimensions(), (640, 480));
    assert_restored(&device, FourCC::YUYV);
    Ok(())
}

#[test]
fn unconvertible_format_still_restores() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("rgb32.jpg");
    let mut device = preview(SimulatedBackend::new().with_formats(&[FourCC::RGB32]))?;
    assert_eq!(device.format(), FourCC::RGB32);

    let restore = RestoreFormat::current(&device);
    let result = capture_still(
        &mut device,
        restore,
        &path,
        85,
        &ImageJpegEncoder,
        &StillConfig::default(),
    );

    assert!(matches!(result, Err(CameraError::NoConverter { .. })));
    assert!(!path.exists());
    assert_restored(&device, FourCC::RGB32);
    Ok(())
}

#[test]
fn capture_is_rejected_while_previewing() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut device = preview(SimulatedBackend::new())?;
    device.start_streaming(false, 4)?;

    let result = capture_still_with_config(
        &mut device,
        &CaptureConfig::new(),
        dir.path().join("busy.jpg"),
    );
    assert!(matches!(result, Err(CameraError::StreamingActive)));
    assert!(device.is_streaming());
    Ok(())
}

struct FailingEncoder;

impl JpegEncoder for FailingEncoder {
    fn encode(&self, _: &[u8], _: u32, _: u32, _: usize, _: u8, _: &Path) -> Result<()> {
        Err(CameraError::Encode("disk full".to_string()))
    }
}

#[test]
fn encoder_failure_still_restores() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut device = preview(SimulatedBackend::new())?;

    let restore = RestoreFormat::current(&device);
    let result = capture_still(
        &mut device,
        restore,
        dir.path().join("never.jpg"),
        85,
        &FailingEncoder,
        &StillConfig::default(),
    );

    match result {
        Err(CameraError::Encode(msg)) => assert_eq!(msg, "disk full"),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_restored(&device, FourCC::YUYV);
    Ok(())
}

/// 记录编码器收到的参数
#[derive(Default)]
struct RecordingEncoder {
    quality: Cell<Option<u8>>,
    stride: Cell<usize>,
}

impl JpegEncoder for RecordingEncoder {
    fn encode(&self, _: &[u8], _: u32, _: u32, stride: usize, quality: u8, _: &Path) -> Result<()> {
        self.quality.set(Some(quality));
        self.stride.set(stride);
        Ok(())
    }
}

#[test]
fn quality_is_passed_to_the_encoder() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut device = preview(SimulatedBackend::new())?;
    let encoder = RecordingEncoder::default();

    let restore = RestoreFormat::current(&device);
    let path = dir.path().join("q.jpg");
    capture_still(&mut device, restore, &path, 42, &encoder, &StillConfig::default())?;

    assert_eq!(encoder.quality.get(), Some(42));
    assert_eq!(encoder.stride.get(), 960 * 3);
    Ok(())
}

#[test]
fn config_quality_drives_the_default_path() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut device = preview(SimulatedBackend::new())?;

    // 同一帧，质量越低文件越小
    let low = dir.path().join("low.jpg");
    let high = dir.path().join("high.jpg");
    capture_still_with_config(&mut device, &CaptureConfig::new().quality(5), &low)?;
    capture_still_with_config(&mut device, &CaptureConfig::new().quality(100), &high)?;

    assert!(low.metadata()?.len() < high.metadata()?.len());
    Ok(())
}

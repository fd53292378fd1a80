#[cfg(target_os = "linux")]
use anyhow::{Context, Result};
#[cfg(target_os = "linux")]
use boothcam_core::convert;
#[cfg(target_os = "linux")]
use boothcam_core::frame::Size;
#[cfg(target_os = "linux")]
use boothcam_core::pixel_format::FourCC;
#[cfg(target_os = "linux")]
use minifb::{Key, Window, WindowOptions};
#[cfg(target_os = "linux")]
use std::time::{Duration, Instant};

#[cfg(target_os = "linux")]
fn main() -> Result<()> {
    // 1. 初始化日志，以便看到 boothcam::v4l2 / boothcam::device 的输出
    tracing_subscriber::fmt::init();

    println!("=== boothcam V4L2 Backend Demo ===");

    // 2. 枚举设备
    let devices = boothcam_backend_v4l2::list_devices();
    if devices.is_empty() {
        anyhow::bail!("No cameras found! Please plug in a USB camera.");
    }

    println!("Found {} devices:", devices.len());
    for (i, dev) in devices.iter().enumerate() {
        println!("  [{}] {} ({}) - {}", i, dev.name, dev.location, dev.bus);
    }

    // 默认选择第一个设备
    let target = &devices[0];
    println!("\nOpening device: {}", target.name);
    let mut device = boothcam_backend_v4l2::open(&target.location).context("Failed to open camera")?;

    // 3. 打印能力
    println!("Driver: {}, capabilities: {:?}", device.driver(), device.capabilities());
    for format in device.formats().to_vec() {
        println!("[Format] {}", format);
    }
    println!("Resolutions: {:?}", device.query_resolutions()?);

    // 4. 选一个能转换到 RGB24 的格式，请求 640x480 @ 10fps
    let format = device.auto_set_image_format(FourCC::RGB24)?;
    if let Err(e) = device.set_image_format(format, Some(Size::new(640, 480))) {
        eprintln!("Warning: {}. Using {}.", e, device.resolution());
    }
    if let Err(e) = device.set_frame_rate(10) {
        eprintln!("Warning: {}", e);
    }

    let (width, height) = (device.resolution().width as usize, device.resolution().height as usize);

    // 5. 启动流 (非 burst，4 个缓冲区)
    device.start_streaming(false, 4).context("Failed to start stream")?;
    println!("Stream started! Press ESC to exit.");

    let mut window = Window::new("boothcam - Camera Preview", width, height, WindowOptions::default())?;

    // 用于 FPS 计算
    let mut last_time = Instant::now();
    let mut frame_count = 0;

    // minifb 需要 u32 格式: 0x00RRGGBB
    let mut argb: Vec<u32> = vec![0; width * height];

    while window.is_open() && !window.is_key_down(Key::Escape) {
        // 6. 获取下一帧 (直接指向内核 mmap 区域)，转换到 RGB24
        let frame = device.query_frame()?;
        let rgb = convert::convert(frame, FourCC::RGB24)?;

        for (dst, px) in argb.iter_mut().zip(rgb.data().chunks_exact(3)) {
            *dst = (px[0] as u32) << 16 | (px[1] as u32) << 8 | px[2] as u32;
        }

        // 7. 更新窗口
        window.update_with_buffer(&argb, width, height)?;

        // 8. 每秒打印一次帧率
        frame_count += 1;
        if last_time.elapsed() >= Duration::from_secs(1) {
            let fps = frame_count as f64 / last_time.elapsed().as_secs_f64();
            println!("FPS: {:.1} | Slot: {:?}", fps, device.pool_cursor());
            last_time = Instant::now();
            frame_count = 0;
        }
    }

    // 9. 停止流并释放设备
    device.release()?;
    println!("Stream stopped.");

    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn main() {
    println!("This example is only supported on Linux with V4L2.");
}

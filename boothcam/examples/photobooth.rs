// boothcam/examples/photobooth.rs

use anyhow::Result;
use boothcam::prelude::*;
use boothcam::still::capture_still_with_config;
use boothcam_simulation::SimulatedBackend;
use minifb::{Key, KeyRepeat, Window, WindowOptions};
use std::time::Instant;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    // 1. 预览 640x480 @ 10fps，拍照 960x720
    let config = CaptureConfig::new()
        .resolution(640, 480)
        .fps(10)
        .still_resolution(960, 720)
        .quality(90);

    // 2. 有真实摄像头时使用 V4L2，否则退回仿真设备
    #[cfg(all(feature = "linux-v4l2", target_os = "linux"))]
    match boothcam::camera::open_camera(&config) {
        Ok(device) => return run(device, &config),
        Err(e) => eprintln!("Warning: {}. Falling back to the simulated camera.", e),
    }

    let mut device = boothcam_simulation::open(SimulatedBackend::new())?;
    boothcam::camera::configure_preview(&mut device, &config)?;
    run(device, &config)
}

fn run<B: CaptureBackend>(mut device: CaptureDevice<B>, config: &CaptureConfig) -> Result<()> {
    println!("Camera: {} ({})", device.name(), device.driver());

    let (width, height) = (
        device.resolution().width as usize,
        device.resolution().height as usize,
    );
    let mut window = Window::new("boothcam - Photo Booth", width, height, WindowOptions::default())?;
    let mut argb: Vec<u32> = vec![0; width * height];

    device.start_streaming(config.burst, config.buffer_count)?;
    println!("Press SPACE to take a photo, ESC to exit.");

    let mut shots = 0;
    let mut last_time = Instant::now();
    let mut frame_count = 0;

    while window.is_open() && !window.is_key_down(Key::Escape) {
        // 3. 预览帧 (RGB24 私有副本)
        let frame = get_frame(&mut device)?;
        for (dst, px) in argb.iter_mut().zip(frame.data().chunks_exact(3)) {
            *dst = (px[0] as u32) << 16 | (px[1] as u32) << 8 | px[2] as u32;
        }
        window.update_with_buffer(&argb, width, height)?;

        // 4. 拍照：停止预览，高分辨率拍一张，再恢复预览
        if window.is_key_pressed(Key::Space, KeyRepeat::No) {
            device.stop_streaming()?;
            shots += 1;
            let path = format!("photo_{:03}.jpg", shots);
            match capture_still_with_config(&mut device, config, &path) {
                Ok(still) => println!("Saved {} ({})", path, still.size),
                Err(e) => eprintln!("Capture failed: {}", e),
            }
            device.start_streaming(config.burst, config.buffer_count)?;
        }

        frame_count += 1;
        if last_time.elapsed().as_secs() >= 1 {
            println!("FPS: {:.1}", frame_count as f64 / last_time.elapsed().as_secs_f64());
            last_time = Instant::now();
            frame_count = 0;
        }
    }

    device.release()?;
    Ok(())
}

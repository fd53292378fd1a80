use boothcam_core::convert;
use boothcam_core::error::{CameraError, Result};
use boothcam_core::frame::FrameBuffer;
use boothcam_core::pixel_format::FourCC;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// JPEG 编码器边界
///
/// 输入为 3 通道交错 RGB，`stride` 为每行字节数 (>= width * 3)，`quality` 取值 [0, 100]。
pub trait JpegEncoder {
    fn encode(
        &self,
        rgb: &[u8],
        width: u32,
        height: u32,
        stride: usize,
        quality: u8,
        path: &Path,
    ) -> Result<()>;
}

/// 基于 `image` crate 的纯 Rust 编码器 (默认)
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageJpegEncoder;

impl JpegEncoder for ImageJpegEncoder {
    fn encode(
        &self,
        rgb: &[u8],
        width: u32,
        height: u32,
        stride: usize,
        quality: u8,
        path: &Path,
    ) -> Result<()> {
        let packed = pack_rows(rgb, width, height, stride)?;

        let mut writer = BufWriter::new(File::create(path)?);
        // image 要求质量在 [1, 100]
        let mut encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100));
        encoder
            .encode(&packed, width, height, image::ColorType::Rgb8)
            .map_err(|e| CameraError::Encode(e.to_string()))?;
        writer.flush()?;
        Ok(())
    }
}

/// libjpeg-turbo 编码器，直接支持带行填充的输入
#[cfg(feature = "turbojpeg")]
#[derive(Debug, Default, Clone, Copy)]
pub struct TurboJpegEncoder;

#[cfg(feature = "turbojpeg")]
impl JpegEncoder for TurboJpegEncoder {
    fn encode(
        &self,
        rgb: &[u8],
        width: u32,
        height: u32,
        stride: usize,
        quality: u8,
        path: &Path,
    ) -> Result<()> {
        check_len(rgb, width, height, stride)?;

        let image = turbojpeg::Image {
            pixels: rgb,
            width: width as usize,
            pitch: stride,
            height: height as usize,
            format: turbojpeg::PixelFormat::RGB,
        };
        let jpeg = turbojpeg::compress(image, quality.min(100) as i32, turbojpeg::Subsamp::Sub2x2)
            .map_err(|e| CameraError::Encode(e.to_string()))?;
        std::fs::write(path, &jpeg[..])?;
        Ok(())
    }
}

fn check_len(rgb: &[u8], width: u32, height: u32, stride: usize) -> Result<()> {
    let row = width as usize * 3;
    if stride < row {
        return Err(CameraError::Encode(format!(
            "row stride {} is smaller than {} bytes per row",
            stride, row
        )));
    }

    let expected = match height as usize {
        0 => 0,
        h => stride * (h - 1) + row,
    };
    if rgb.len() < expected {
        return Err(CameraError::FrameTooSmall {
            expected,
            actual: rgb.len(),
        });
    }
    Ok(())
}

/// 去掉行尾填充，得到紧凑排布的 RGB 数据
fn pack_rows(rgb: &[u8], width: u32, height: u32, stride: usize) -> Result<Cow<'_, [u8]>> {
    check_len(rgb, width, height, stride)?;

    let row = width as usize * 3;
    let h = height as usize;
    if stride == row {
        return Ok(Cow::Borrowed(&rgb[..row * h]));
    }

    let mut packed = Vec::with_capacity(row * h);
    for line in rgb.chunks(stride).take(h) {
        packed.extend_from_slice(&line[..row]);
    }
    Ok(Cow::Owned(packed))
}

/// 帧的实际行跨距 (未设置时按紧凑 24-bit 排布计算)
pub fn rgb_stride(frame: &FrameBuffer) -> usize {
    match frame.row_stride() {
        0 => frame.width() as usize * 3,
        stride => stride,
    }
}

/// 得到 RGB24 格式的帧：已经是 RGB24 时共享原帧，否则经转换器生成新帧
pub fn to_rgb24(frame: &FrameBuffer) -> Result<FrameBuffer> {
    if frame.format() == FourCC::RGB24 {
        return Ok(frame.retain());
    }
    convert::convert(frame, FourCC::RGB24)
}

/// 用指定编码器把帧保存为 JPEG (必要时先转换为 RGB24)
pub fn write_jpeg_with(
    encoder: &dyn JpegEncoder,
    frame: &FrameBuffer,
    path: impl AsRef<Path>,
    quality: u8,
) -> Result<()> {
    let rgb = to_rgb24(frame)?;
    // 带行填充的帧，data() 只覆盖 image_size，因此传整个缓冲区
    encoder.encode(
        rgb.buffer(),
        rgb.width(),
        rgb.height(),
        rgb_stride(&rgb),
        quality,
        path.as_ref(),
    )
}

/// 把帧保存为 JPEG (默认编码器)
pub fn write_jpeg(frame: &FrameBuffer, path: impl AsRef<Path>, quality: u8) -> Result<()> {
    write_jpeg_with(&ImageJpegEncoder, frame, path, quality)
}

/// 保存图像文件
///
/// 根据文件扩展名自动决定格式。只支持 RGB24 / BGR24 帧。
pub fn imwrite<P: AsRef<Path>>(path: P, frame: &FrameBuffer) -> Result<()> {
    let bgr = match frame.format() {
        FourCC::RGB24 => false,
        FourCC::BGR24 => true,
        _ => return Err(CameraError::Unsupported("imwrite needs an RGB24 or BGR24 frame")),
    };

    let packed = pack_rows(frame.buffer(), frame.width(), frame.height(), rgb_stride(frame))?;

    // image crate 需要 RGB
    let rgb: Cow<'_, [u8]> = if bgr {
        let mut swapped = packed.into_owned();
        for px in swapped.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
        Cow::Owned(swapped)
    } else {
        packed
    };

    image::save_buffer(
        path,
        &rgb,
        frame.width(),
        frame.height(),
        image::ColorType::Rgb8,
    )
    .map_err(|e| CameraError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use boothcam_core::frame::Size;

    fn gradient(format: FourCC, size: Size, stride: usize) -> FrameBuffer {
        let bytes = (0..stride * size.height as usize)
            .map(|i| (i % 251) as u8)
            .collect();
        FrameBuffer::from_bytes(format, size, stride, bytes)
    }

    #[test]
    fn rows_are_unpadded() {
        let rgb = [1, 2, 3, 0xee, 4, 5, 6, 0xee];
        let packed = pack_rows(&rgb, 1, 2, 4).unwrap();
        assert_eq!(&*packed, &[1, 2, 3, 4, 5, 6]);
        assert!(matches!(pack_rows(&rgb, 1, 2, 3).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn short_input_is_rejected() {
        assert!(matches!(
            pack_rows(&[0; 5], 1, 2, 3),
            Err(CameraError::FrameTooSmall { expected: 6, actual: 5 })
        ));
        assert!(matches!(pack_rows(&[0; 12], 2, 2, 3), Err(CameraError::Encode(_))));
    }

    #[test]
    fn jpeg_round_trip_keeps_dimensions() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("still.jpg");

        // 行尾带 4 字节填充
        let frame = gradient(FourCC::RGB24, Size::new(16, 8), 16 * 3 + 4);
        write_jpeg(&frame, &path, 90)?;

        let decoded = image::open(&path)?.to_rgb8();
        assert_eq!(decoded.dimensions(), (16, 8));
        Ok(())
    }

    #[test]
    fn write_jpeg_converts_yuv_first() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("yuyv.jpg");

        let frame = FrameBuffer::from_bytes(FourCC::YUYV, Size::new(4, 2), 8, vec![128; 16]);
        write_jpeg(&frame, &path, 80)?;
        assert!(path.metadata()?.len() > 0);
        Ok(())
    }

    #[test]
    fn imwrite_swaps_bgr() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pixel.png");

        let frame = FrameBuffer::from_bytes(FourCC::BGR24, Size::new(1, 1), 3, vec![10, 20, 30]);
        imwrite(&path, &frame)?;

        let decoded = image::open(&path)?.to_rgb8();
        assert_eq!(decoded.get_pixel(0, 0).0, [30, 20, 10]);

        let grey = FrameBuffer::from_bytes(FourCC::GREY, Size::new(1, 1), 1, vec![0]);
        assert!(imwrite(&path, &grey).is_err());
        Ok(())
    }
}

use crate::error::{CameraError, Result};
use crate::frame::FrameBuffer;
use crate::pixel_format::{self, FourCC};
use crate::yuv::{self, ChannelOrder};

/// 转换例程 (封闭集合，按输入/输出对选择)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionKind {
    /// 4:2:0 平面；`swap_uv` 表示 YVU 顺序
    Yuv420 { order: ChannelOrder, swap_uv: bool },
    /// 4:2:2 打包 (YUYV)
    Yuyv { order: ChannelOrder },
}

/// 图像格式转换器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Converter {
    pub name: &'static str,
    pub input: FourCC,
    pub output: FourCC,
    pub kind: ConversionKind,
}

static CONVERTERS: [Converter; 6] = [
    Converter {
        name: "YUV420 to RGB24 Converter",
        input: FourCC::YUV420,
        output: FourCC::RGB24,
        kind: ConversionKind::Yuv420 {
            order: ChannelOrder::RGB,
            swap_uv: false,
        },
    },
    Converter {
        name: "YUV420 to BGR24 Converter",
        input: FourCC::YUV420,
        output: FourCC::BGR24,
        kind: ConversionKind::Yuv420 {
            order: ChannelOrder::BGR,
            swap_uv: false,
        },
    },
    Converter {
        name: "YVU420 to RGB24 Converter",
        input: FourCC::YVU420,
        output: FourCC::RGB24,
        kind: ConversionKind::Yuv420 {
            order: ChannelOrder::RGB,
            swap_uv: true,
        },
    },
    Converter {
        name: "YVU420 to BGR24 Converter",
        input: FourCC::YVU420,
        output: FourCC::BGR24,
        kind: ConversionKind::Yuv420 {
            order: ChannelOrder::BGR,
            swap_uv: true,
        },
    },
    Converter {
        name: "YUYV to RGB24 Converter",
        input: FourCC::YUYV,
        output: FourCC::RGB24,
        kind: ConversionKind::Yuyv {
            order: ChannelOrder::RGB,
        },
    },
    Converter {
        name: "YUYV to BGR24 Converter",
        input: FourCC::YUYV,
        output: FourCC::BGR24,
        kind: ConversionKind::Yuyv {
            order: ChannelOrder::BGR,
        },
    },
];

/// 所有已注册的转换器
pub fn converters() -> &'static [Converter] {
    &CONVERTERS
}

/// 查找 input -> output 的转换器
pub fn find(input: FourCC, output: FourCC) -> Option<&'static Converter> {
    CONVERTERS
        .iter()
        .find(|c| c.input == input && c.output == output)
}

impl Converter {
    /// 执行转换
    ///
    /// `dest` 先按缓存语义脱离共享 (原像素不保留)，随后被设置为输出格式、
    /// 源帧尺寸以及注册表给出的图像大小。
    pub fn run(&self, src: &FrameBuffer, dest: &mut FrameBuffer) -> Result<()> {
        let size = src.size();
        let image_size = match pixel_format::size_for(self.output, size.width, size.height) {
            Some(n) => n,
            None => {
                let name = pixel_format::describe(self.output);
                tracing::error!(target: "boothcam::convert", "Unknown image size for format [{}]", name);
                return Err(CameraError::UnknownSize(name));
            }
        };

        let required = match self.kind {
            ConversionKind::Yuv420 { .. } => yuv::yuv420_len(size),
            ConversionKind::Yuyv { .. } => yuv::yuyv_len(size),
        };
        let even = size.width % 2 == 0
            && (size.height % 2 == 0 || matches!(self.kind, ConversionKind::Yuyv { .. }));
        if !even {
            return Err(CameraError::Unsupported("odd frame dimensions for chroma subsampling"));
        }
        if src.data().len() < required {
            return Err(CameraError::FrameTooSmall {
                expected: required,
                actual: src.data().len(),
            });
        }

        dest.ensure_cache();
        dest.set_layout(self.output, size, size.width as usize * 3, image_size)?;
        let out = dest.data_mut()?;

        match self.kind {
            ConversionKind::Yuv420 { order, swap_uv } => {
                yuv::yuv420_to_rgb24(src.data(), out, size, order, swap_uv)
            }
            ConversionKind::Yuyv { order } => yuv::yuyv_to_rgb24(src.data(), out, size, order),
        }
        Ok(())
    }
}

/// 便捷函数：把 `src` 转换为 `output` 格式的新帧
pub fn convert(src: &FrameBuffer, output: FourCC) -> Result<FrameBuffer> {
    let converter = find(src.format(), output).ok_or_else(|| {
        tracing::error!(
            target: "boothcam::convert",
            "Can't find converter for {} to {}",
            pixel_format::describe(src.format()),
            pixel_format::describe(output)
        );
        CameraError::NoConverter {
            input: src.format(),
            output,
        }
    })?;

    let mut dest = FrameBuffer::new();
    converter.run(src, &mut dest)?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Size;
    use crate::yuv::TABLES;

    fn yuyv_frame(size: Size, fill: impl Fn(usize) -> u8) -> FrameBuffer {
        let bytes = (0..yuv::yuyv_len(size)).map(fill).collect();
        FrameBuffer::from_bytes(FourCC::YUYV, size, size.width as usize * 2, bytes)
    }

    #[test]
    fn at_most_one_converter_per_pair() {
        let all = converters();
        for (i, a) in all.iter().enumerate() {
            assert!(all[i + 1..]
                .iter()
                .all(|b| (b.input, b.output) != (a.input, a.output)));
        }
    }

    #[test]
    fn unregistered_pairs_are_not_found() {
        assert!(find(FourCC::RGB32, FourCC::BGR24).is_none());
        assert!(find(FourCC::MJPEG, FourCC::RGB24).is_none());
        assert!(find(FourCC::RGB24, FourCC::YUYV).is_none());
        assert_eq!(find(FourCC::YUYV, FourCC::RGB24).map(|c| c.name), Some("YUYV to RGB24 Converter"));
    }

    #[test]
    fn run_fills_destination_layout() {
        let size = Size::new(4, 2);
        let src = yuyv_frame(size, |i| if i % 2 == 0 { 100 } else { 128 });
        let mut dest = FrameBuffer::new();
        find(FourCC::YUYV, FourCC::BGR24).unwrap().run(&src, &mut dest).unwrap();

        assert_eq!(dest.format(), FourCC::BGR24);
        assert_eq!(dest.size(), size);
        assert_eq!(dest.row_stride(), 12);
        assert_eq!(dest.image_size(), 24);
        assert!(dest.data().iter().all(|&b| b == 100));
    }

    #[test]
    fn run_detaches_a_shared_destination() {
        let size = Size::new(2, 2);
        let src = yuyv_frame(size, |_| 128);
        let mut dest = FrameBuffer::with_format(FourCC::GREY, 2, 2).unwrap();
        let held = dest.retain();

        find(FourCC::YUYV, FourCC::RGB24).unwrap().run(&src, &mut dest).unwrap();
        assert!(!dest.ptr_eq(&held));
        assert_eq!(held.format(), FourCC::GREY);
        assert_eq!(held.data(), &[0, 0, 0, 0]);
    }

    #[test]
    fn convert_reports_missing_converter() {
        let src = FrameBuffer::with_format(FourCC::RGB32, 2, 2).unwrap();
        assert!(matches!(
            convert(&src, FourCC::BGR24),
            Err(CameraError::NoConverter { .. })
        ));
    }

    #[test]
    fn convert_rejects_truncated_source() {
        let src = FrameBuffer::from_bytes(FourCC::YUYV, Size::new(4, 4), 8, vec![0; 10]);
        assert!(matches!(
            convert(&src, FourCC::RGB24),
            Err(CameraError::FrameTooSmall { expected: 32, actual: 10 })
        ));
    }

    #[test]
    fn convert_yuv420_to_rgb() {
        let size = Size::new(2, 2);
        let src = FrameBuffer::from_bytes(FourCC::YUV420, size, 2, vec![50, 60, 70, 80, 30, 200]);
        let rgb = convert(&src, FourCC::RGB24).unwrap();
        let expected: Vec<[u8; 3]> = [50, 60, 70, 80].iter().map(|&y| TABLES.rgb(y, 30, 200)).collect();
        assert_eq!(rgb.pixels24().unwrap(), expected.as_slice());
    }
}

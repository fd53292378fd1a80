use std::fmt::{self, Display};
use std::str::FromStr;

/// 四字符代码 (Four Character Code)，视频工业标准
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct FourCC(pub u32);

impl FourCC {
    /// 从 ASCII 字符创建 FourCC
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self((a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24))
    }

    /// 原始字节 (小端序，与 V4L2 一致)
    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_le_bytes();

        write!(f, "{}", String::from_utf8_lossy(&bytes))
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({})", self)
    }
}

/// 解析 FourCC 字符串时的错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFourCCError(pub String);

impl Display for ParseFourCCError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid fourcc code: {:?}", self.0)
    }
}

impl std::error::Error for ParseFourCCError {}

impl FromStr for FourCC {
    type Err = ParseFourCCError;

    /// 接受 1~4 个 ASCII 字符，不足 4 位时用空格补齐 (如 "Y16" -> "Y16 ")
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.is_empty() || bytes.len() > 4 || !s.is_ascii() {
            return Err(ParseFourCCError(s.to_string()));
        }

        let mut code = [b' '; 4];
        code[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(u32::from_le_bytes(code)))
    }
}

impl From<u32> for FourCC {
    fn from(val: u32) -> Self {
        Self(val)
    }
}

impl From<FourCC> for u32 {
    fn from(cc: FourCC) -> Self {
        cc.0
    }
}

#[cfg(feature = "serialize")]
impl serde::Serialize for FourCC {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(feature = "serialize")]
impl<'de> serde::Deserialize<'de> for FourCC {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 常用像素格式定义 (V4L2 编码)
impl FourCC {
    // --- Compressed Formats ---
    /// Motion-JPEG
    pub const MJPEG: Self = Self::new(b'M', b'J', b'P', b'G');
    /// Philips 网络摄像头私有压缩格式
    pub const PWC2: Self = Self::new(b'P', b'W', b'C', b'2');

    // --- YUV Formats ---
    /// YUYV 4:2:2 - 大多数 UVC 摄像头的未压缩格式
    pub const YUYV: Self = Self::new(b'Y', b'U', b'Y', b'V');
    /// UYVY 4:2:2
    pub const UYVY: Self = Self::new(b'U', b'Y', b'V', b'Y');
    /// YUV 4:2:0 Planar (Y, U, V 顺序)
    pub const YUV420: Self = Self::new(b'Y', b'U', b'1', b'2');
    /// YVU 4:2:0 Planar (Y, V, U 顺序)
    pub const YVU420: Self = Self::new(b'Y', b'V', b'1', b'2');
    /// YUV 4:2:2 Planar
    pub const YUV422P: Self = Self::new(b'4', b'2', b'2', b'P');
    /// YUV 4:1:1 Planar
    pub const YUV411P: Self = Self::new(b'4', b'1', b'1', b'P');
    /// YUV 4:1:0 Planar
    pub const YUV410: Self = Self::new(b'Y', b'U', b'V', b'9');
    /// YVU 4:1:0 Planar
    pub const YVU410: Self = Self::new(b'Y', b'V', b'U', b'9');

    // --- RGB Formats ---
    /// RGB24 (R-G-B)
    pub const RGB24: Self = Self::new(b'R', b'G', b'B', b'3');
    /// BGR24 (B-G-R)
    pub const BGR24: Self = Self::new(b'B', b'G', b'R', b'3');
    /// RGB32
    pub const RGB32: Self = Self::new(b'R', b'G', b'B', b'4');
    /// BGR32
    pub const BGR32: Self = Self::new(b'B', b'G', b'R', b'4');
    /// RGB 5:5:5
    pub const RGB555: Self = Self::new(b'R', b'G', b'B', b'O');
    /// RGB 5:5:5 大端
    pub const RGB555X: Self = Self::new(b'R', b'G', b'B', b'Q');
    /// RGB 5:6:5
    pub const RGB565: Self = Self::new(b'R', b'G', b'B', b'P');
    /// RGB 5:6:5 大端
    pub const RGB565X: Self = Self::new(b'R', b'G', b'B', b'R');

    // --- Misc ---
    /// 8-bit 灰度
    pub const GREY: Self = Self::new(b'G', b'R', b'E', b'Y');
    /// 8-bit 调色板 (BT848)
    pub const HI240: Self = Self::new(b'H', b'I', b'2', b'4');
}

/// 像素格式注册表条目
///
/// `numerator / denominator` 是每像素字节数。分子非正数表示无法仅凭宽高
/// 计算帧大小 (压缩格式或不规则的子采样格式)。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub code: FourCC,
    pub name: &'static str,
    pub numerator: i32,
    pub denominator: i32,
    pub bpp: Option<u32>,
}

impl FormatDescriptor {
    const fn new(
        code: FourCC,
        name: &'static str,
        numerator: i32,
        denominator: i32,
        bpp: Option<u32>,
    ) -> Self {
        Self {
            code,
            name,
            numerator,
            denominator,
            bpp,
        }
    }

    /// 按本条目的倍率计算帧大小
    pub fn size_for(&self, width: u32, height: u32) -> Option<usize> {
        if self.numerator <= 0 || self.denominator <= 0 {
            return None;
        }
        let pixels = width as u64 * height as u64;
        Some((pixels * self.numerator as u64 / self.denominator as u64) as usize)
    }

    /// 是否可由宽高直接计算大小
    pub fn is_sizable(&self) -> bool {
        self.numerator > 0 && self.denominator > 0
    }
}

// 新格式只需在这里追加一行，转换代码无需改动。
static FORMAT_TABLE: [FormatDescriptor; 20] = [
    FormatDescriptor::new(FourCC::MJPEG, "MJPEG", -1, 1, None),
    FormatDescriptor::new(FourCC::YUYV, "YUYV/YUY2", 2, 1, Some(16)),
    FormatDescriptor::new(FourCC::YUV420, "YUV420/YU12", 3, 2, Some(12)),
    FormatDescriptor::new(FourCC::PWC2, "PWC2", -1, 1, None),
    FormatDescriptor::new(FourCC::RGB24, "RGB24", 3, 1, Some(24)),
    FormatDescriptor::new(FourCC::BGR24, "BGR24", 3, 1, Some(24)),
    FormatDescriptor::new(FourCC::BGR32, "BGR32", 4, 1, Some(32)),
    FormatDescriptor::new(FourCC::RGB32, "RGB32", 4, 1, Some(32)),
    FormatDescriptor::new(FourCC::UYVY, "UYVY", 2, 1, Some(16)),
    FormatDescriptor::new(FourCC::YUV422P, "YUV422P", 2, 1, Some(16)),
    FormatDescriptor::new(FourCC::GREY, "GREY", 1, 1, Some(8)),
    FormatDescriptor::new(FourCC::HI240, "HI240", 1, 1, Some(8)),
    FormatDescriptor::new(FourCC::RGB555, "RGB555", 2, 1, Some(16)),
    FormatDescriptor::new(FourCC::RGB555X, "RGB555X", 2, 1, Some(16)),
    FormatDescriptor::new(FourCC::RGB565, "RGB565", 2, 1, Some(16)),
    FormatDescriptor::new(FourCC::RGB565X, "RGB565X", 2, 1, Some(16)),
    FormatDescriptor::new(FourCC::YUV411P, "YUV411P", 3, 2, Some(12)),
    FormatDescriptor::new(FourCC::YVU420, "YVU420/YV12", 3, 2, Some(12)),
    FormatDescriptor::new(FourCC::YUV410, "YUV410/YUV410P", 0, 1, Some(9)),
    FormatDescriptor::new(FourCC::YVU410, "YVU410", 0, 1, Some(9)),
];

/// 所有已注册的格式
pub fn descriptors() -> &'static [FormatDescriptor] {
    &FORMAT_TABLE
}

/// 按 FourCC 查找注册表条目
pub fn descriptor(code: FourCC) -> Option<&'static FormatDescriptor> {
    FORMAT_TABLE.iter().find(|d| d.code == code)
}

/// 格式的显示名称，未注册时返回 None
pub fn name_for(code: FourCC) -> Option<&'static str> {
    descriptor(code).map(|d| d.name)
}

/// 计算 `width x height` 的帧占用字节数
///
/// 压缩格式或未注册的格式返回 None。
pub fn size_for(code: FourCC, width: u32, height: u32) -> Option<usize> {
    descriptor(code).and_then(|d| d.size_for(width, height))
}

/// 日志用：优先显示注册名，否则显示原始十六进制码
pub fn describe(code: FourCC) -> String {
    match name_for(code) {
        Some(name) => name.to_string(),
        None => format!("{:08x}", code.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_follow_the_rational_multiplier() {
        for d in descriptors().iter().filter(|d| d.is_sizable()) {
            for (w, h) in [(640u32, 480u32), (160, 120), (1, 1), (2, 2)] {
                let expected =
                    (w as i64 * h as i64 * d.numerator as i64 / d.denominator as i64) as usize;
                assert_eq!(size_for(d.code, w, h), Some(expected), "{}", d.name);
            }
        }
    }

    #[test]
    fn known_sizes() {
        assert_eq!(size_for(FourCC::YUYV, 640, 480), Some(614_400));
        assert_eq!(size_for(FourCC::YUV420, 640, 480), Some(460_800));
        assert_eq!(size_for(FourCC::RGB24, 640, 480), Some(921_600));
        // 1x1 的 4:2:0 帧按整数截断为 1 字节
        assert_eq!(size_for(FourCC::YUV420, 1, 1), Some(1));
    }

    #[test]
    fn compressed_and_unknown_formats_have_no_size() {
        assert_eq!(size_for(FourCC::MJPEG, 640, 480), None);
        assert_eq!(size_for(FourCC::YUV410, 640, 480), None);
        assert_eq!(size_for(FourCC::new(b'Z', b'1', b'6', b' '), 640, 480), None);
    }

    #[test]
    fn one_descriptor_per_code() {
        let table = descriptors();
        for (i, a) in table.iter().enumerate() {
            assert!(table[i + 1..].iter().all(|b| b.code != a.code), "{}", a.name);
        }
    }

    #[test]
    fn names_and_display() {
        assert_eq!(name_for(FourCC::YUYV), Some("YUYV/YUY2"));
        assert_eq!(name_for(FourCC(0)), None);
        assert_eq!(FourCC::YUYV.to_string(), "YUYV");
        assert_eq!(FourCC::YUYV.0, 0x5659_5559);
        assert_eq!(describe(FourCC(0x1234)), "00001234");
    }

    #[test]
    fn parse_fourcc() {
        assert_eq!("YUYV".parse::<FourCC>(), Ok(FourCC::YUYV));
        assert_eq!("Y16".parse::<FourCC>().map(|c| c.to_string()), Ok("Y16 ".to_string()));
        assert!("".parse::<FourCC>().is_err());
        assert!("TOOLONG".parse::<FourCC>().is_err());
    }
}

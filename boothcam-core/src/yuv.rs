//! YCbCr -> RGB 整数定点转换
//!
//! 参考 xawtv / camstream 的 ccvt 实现：四张 256 项色度查找表加一张钳位表，
//! 中间结果 (可能远小于 0 或大于 255) 通过查表钳位到 [0, 255]，内循环无分支。
//! 所有表在编译期由 `const fn` 生成，进程内只读共享。

use crate::frame::Size;

/// 钳位表两侧的余量
const CLIP: usize = 320;
const CLIP_LEN: usize = 256 + 2 * CLIP;

/// 色度查找表与钳位表
#[derive(Debug)]
pub struct YuvTables {
    pub cb: [i32; 256],
    pub cr: [i32; 256],
    pub cg1: [i32; 256],
    pub cg2: [i32; 256],
    pub clip: [u8; CLIP_LEN],
}

impl YuvTables {
    const fn build() -> Self {
        let mut cb = [0i32; 256];
        let mut cr = [0i32; 256];
        let mut cg1 = [0i32; 256];
        let mut cg2 = [0i32; 256];

        let mut i = 0;
        while i < 256 {
            let d = i as i32 - 128;
            cb[i] = (d * 454) >> 8;
            cr[i] = (d * 359) >> 8;
            cg1[i] = (d * 183) >> 8;
            cg2[i] = (d * 88) >> 8;
            i += 1;
        }

        let mut clip = [0u8; CLIP_LEN];
        let mut i = 0;
        while i < CLIP_LEN {
            clip[i] = if i < CLIP {
                0
            } else if i < CLIP + 256 {
                (i - CLIP) as u8
            } else {
                255
            };
            i += 1;
        }

        Self {
            cb,
            cr,
            cg1,
            cg2,
            clip,
        }
    }

    /// 查表钳位，`value` 必须落在 [-320, 575] 内
    #[inline(always)]
    pub fn clamp(&self, value: i32) -> u8 {
        self.clip[(value + CLIP as i32) as usize]
    }

    /// 单个像素的 (R, G, B)
    #[inline(always)]
    pub fn rgb(&self, y: u8, u: u8, v: u8) -> [u8; 3] {
        let y = y as i32;
        let (u, v) = (u as usize, v as usize);
        [
            self.clamp(y + self.cr[v]),
            self.clamp(y - (self.cg1[v] + self.cg2[u])),
            self.clamp(y + self.cb[u]),
        ]
    }
}

/// 全局转换表
pub static TABLES: YuvTables = YuvTables::build();

/// 输出通道顺序：`rgb()` 结果的下标排列
///
/// 同一个内循环通过这个排列同时服务 RGB 与 BGR 输出。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOrder(pub [usize; 3]);

impl ChannelOrder {
    pub const RGB: Self = Self([0, 1, 2]);
    pub const BGR: Self = Self([2, 1, 0]);

    #[inline(always)]
    fn emit(self, out: &mut [u8], channel: [u8; 3]) {
        out[0] = channel[self.0[0]];
        out[1] = channel[self.0[1]];
        out[2] = channel[self.0[2]];
    }
}

/// 4:2:0 平面格式需要的输入字节数
pub fn yuv420_len(size: Size) -> usize {
    let luma = size.width as usize * size.height as usize;
    luma + 2 * (luma / 4)
}

/// 4:2:2 打包格式需要的输入字节数
pub fn yuyv_len(size: Size) -> usize {
    size.width as usize * size.height as usize * 2
}

/// 输出的 RGB24/BGR24 字节数
pub fn rgb24_len(size: Size) -> usize {
    size.width as usize * size.height as usize * 3
}

/// 4:2:0 平面 -> 24-bit 打包
///
/// 输入排布：Y 平面 `w*h`，随后两个 `w*h/4` 的色度平面。`swap_uv` 为 false 时
/// 顺序为 U、V (YU12)，为 true 时为 V、U (YV12)。每个色度样本覆盖 2x2 亮度块。
///
/// 调用方保证宽高为偶数，且 `src`/`dest` 的长度足够。
pub fn yuv420_to_rgb24(src: &[u8], dest: &mut [u8], size: Size, order: ChannelOrder, swap_uv: bool) {
    let t = &TABLES;
    let w = size.width as usize;
    let h = size.height as usize;
    let luma = w * h;
    let quarter = luma / 4;
    let cw = w / 2;

    let (y_plane, chroma) = src.split_at(luma);
    let (first, second) = chroma.split_at(quarter);
    let (u_plane, v_plane) = if swap_uv {
        (&second[..quarter], first)
    } else {
        (first, &second[..quarter])
    };

    for row in 0..h {
        let y_row = &y_plane[row * w..(row + 1) * w];
        // 色度行每两行亮度才前进一次
        let c = (row / 2) * cw;
        let u_row = &u_plane[c..c + cw];
        let v_row = &v_plane[c..c + cw];
        let d_row = &mut dest[row * w * 3..(row + 1) * w * 3];

        for (j, (ys, out)) in y_row
            .chunks_exact(2)
            .zip(d_row.chunks_exact_mut(6))
            .enumerate()
        {
            let (u, v) = (u_row[j], v_row[j]);
            order.emit(&mut out[..3], t.rgb(ys[0], u, v));
            order.emit(&mut out[3..], t.rgb(ys[1], u, v));
        }
    }
}

/// 4:2:2 打包 (YUYV) -> 24-bit 打包
///
/// 输入排布：`Y0 U0 Y1 V0 Y2 U2 Y3 V2 ...`，每 4 字节输出两个共享 (U, V) 的像素。
pub fn yuyv_to_rgb24(src: &[u8], dest: &mut [u8], size: Size, order: ChannelOrder) {
    let t = &TABLES;
    let n = yuyv_len(size);

    for (s, out) in src[..n].chunks_exact(4).zip(dest.chunks_exact_mut(6)) {
        let (u, v) = (s[1], s[3]);
        order.emit(&mut out[..3], t.rgb(s[0], u, v));
        order.emit(&mut out[3..], t.rgb(s[2], u, v));
    }
}

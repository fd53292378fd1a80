//! v4l crate 没有高层封装的 ioctl
//!
//! 输入通道、视频制式和 mmap 缓冲区管理直接通过 `v4l::v4l2::ioctl` 调用，
//! 结构体来自 v4l 导出的 videodev2.h 绑定。

use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::os::raw::{c_int, c_void};

use v4l::buffer::Type;
use v4l::memory::Memory;
use v4l::v4l2;
use v4l::v4l2::vidioc;
use v4l::v4l_sys::{v4l2_buffer, v4l2_format, v4l2_input, v4l2_requestbuffers, v4l2_standard};

/// 把以 NUL 结尾的 C 字符串数组转换为 String
fn c_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// 执行一次 ioctl
///
/// # Safety
/// `arg` 必须是 `request` 期望的结构体类型
unsafe fn xioctl<T>(fd: RawFd, request: vidioc::_IOC_TYPE, arg: &mut T) -> io::Result<()> {
    v4l2::ioctl(fd, request, arg as *mut T as *mut c_void)
}

/// VIDIOC_ENUMINPUT：从 0 开始枚举，直到驱动返回 EINVAL
pub(crate) fn enum_inputs(fd: RawFd) -> io::Result<Vec<String>> {
    let mut inputs = Vec::new();
    for index in 0.. {
        // SAFETY: 全零是 v4l2_input 的合法初始值
        let mut input: v4l2_input = unsafe { mem::zeroed() };
        input.index = index;
        match unsafe { xioctl(fd, vidioc::VIDIOC_ENUMINPUT, &mut input) } {
            Ok(()) => inputs.push(c_name(&input.name)),
            Err(e) if e.raw_os_error() == Some(libc::EINVAL) => break,
            Err(e) if index == 0 => return Err(e),
            Err(_) => break,
        }
    }
    Ok(inputs)
}

/// VIDIOC_G_INPUT
pub(crate) fn input(fd: RawFd) -> io::Result<u32> {
    let mut index: c_int = 0;
    unsafe { xioctl(fd, vidioc::VIDIOC_G_INPUT, &mut index)? };
    Ok(index as u32)
}

/// VIDIOC_S_INPUT
pub(crate) fn set_input(fd: RawFd, index: u32) -> io::Result<()> {
    let mut index = index as c_int;
    unsafe { xioctl(fd, vidioc::VIDIOC_S_INPUT, &mut index) }
}

/// VIDIOC_ENUMSTD：摄像头一般不支持 (ENODATA / ENOTTY)，此时返回空列表
pub(crate) fn enum_standards(fd: RawFd) -> Vec<(String, u64)> {
    let mut standards = Vec::new();
    for index in 0.. {
        // SAFETY: 全零是 v4l2_standard 的合法初始值
        let mut entry: v4l2_standard = unsafe { mem::zeroed() };
        entry.index = index;
        if unsafe { xioctl(fd, vidioc::VIDIOC_ENUMSTD, &mut entry) }.is_err() {
            break;
        }
        standards.push((c_name(&entry.name), entry.id));
    }
    standards
}

/// VIDIOC_G_STD
pub(crate) fn standard(fd: RawFd) -> io::Result<u64> {
    let mut id: u64 = 0;
    unsafe { xioctl(fd, vidioc::VIDIOC_G_STD, &mut id)? };
    Ok(id)
}

/// VIDIOC_S_STD
pub(crate) fn set_standard(fd: RawFd, id: u64) -> io::Result<()> {
    let mut id = id;
    unsafe { xioctl(fd, vidioc::VIDIOC_S_STD, &mut id) }
}

/// 用 VIDIOC_G_FMT 探测设备是否接受某种缓冲区类型
pub(crate) fn supports_buffer_type(fd: RawFd, typ: Type) -> bool {
    // SAFETY: 全零是 v4l2_format 的合法初始值
    let mut fmt: v4l2_format = unsafe { mem::zeroed() };
    fmt.type_ = typ as u32;
    unsafe { xioctl(fd, vidioc::VIDIOC_G_FMT, &mut fmt) }.is_ok()
}

/// VIDIOC_REQBUFS (MMAP)，返回驱动实际分配的数量
pub(crate) fn request_buffers(fd: RawFd, count: u32) -> io::Result<u32> {
    // SAFETY: 全零是 v4l2_requestbuffers 的合法初始值
    let mut req: v4l2_requestbuffers = unsafe { mem::zeroed() };
    req.count = count;
    req.type_ = Type::VideoCapture as u32;
    req.memory = Memory::Mmap as u32;
    unsafe { xioctl(fd, vidioc::VIDIOC_REQBUFS, &mut req)? };
    Ok(req.count)
}

fn capture_buffer(index: u32) -> v4l2_buffer {
    // SAFETY: 全零是 v4l2_buffer 的合法初始值
    let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
    buf.index = index;
    buf.type_ = Type::VideoCapture as u32;
    buf.memory = Memory::Mmap as u32;
    buf
}

/// VIDIOC_QUERYBUF：返回 (mmap 偏移, 长度)
pub(crate) fn query_buffer(fd: RawFd, index: u32) -> io::Result<(u32, usize)> {
    let mut buf = capture_buffer(index);
    unsafe { xioctl(fd, vidioc::VIDIOC_QUERYBUF, &mut buf)? };
    // SAFETY: MMAP 缓冲区的联合体中有效的是 offset
    let offset = unsafe { buf.m.offset };
    Ok((offset, buf.length as usize))
}

/// VIDIOC_QBUF
pub(crate) fn queue_buffer(fd: RawFd, index: u32) -> io::Result<()> {
    let mut buf = capture_buffer(index);
    unsafe { xioctl(fd, vidioc::VIDIOC_QBUF, &mut buf) }
}

/// VIDIOC_DQBUF：返回 (下标, 有效字节数, 序号)
pub(crate) fn dequeue_buffer(fd: RawFd) -> io::Result<(u32, u32, u32)> {
    let mut buf = capture_buffer(0);
    unsafe { xioctl(fd, vidioc::VIDIOC_DQBUF, &mut buf)? };
    Ok((buf.index, buf.bytesused, buf.sequence))
}

/// VIDIOC_STREAMON / VIDIOC_STREAMOFF
pub(crate) fn set_streaming(fd: RawFd, on: bool) -> io::Result<()> {
    let mut typ = Type::VideoCapture as c_int;
    let request = if on {
        vidioc::VIDIOC_STREAMON
    } else {
        vidioc::VIDIOC_STREAMOFF
    };
    unsafe { xioctl(fd, request, &mut typ) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_names_stop_at_nul() {
        assert_eq!(c_name(b"Camera 1\0\0\0garbage"), "Camera 1");
        assert_eq!(c_name(b"PAL"), "PAL");
        assert_eq!(c_name(b"\0"), "");
    }
}

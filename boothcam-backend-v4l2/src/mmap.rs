use std::io;
use std::os::fd::RawFd;
use std::ptr;

use boothcam_core::frame::DeviceMemory;

/// 一个 mmap 映射的内核视频缓冲区 (只读)
///
/// Drop 时自动 munmap。
#[derive(Debug)]
pub(crate) struct MmapRegion {
    ptr: *mut libc::c_void,
    len: usize,
}

impl MmapRegion {
    /// 映射 `fd` 上 `offset` 处长度为 `len` 的缓冲区 (来自 VIDIOC_QUERYBUF)
    pub(crate) fn map(fd: RawFd, offset: u32, len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "zero-length video buffer",
            ));
        }

        // SAFETY: 参数来自驱动的 QUERYBUF；失败时返回 MAP_FAILED
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_SHARED,
                fd,
                offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self { ptr, len })
    }
}

// SAFETY: 映射在 Drop 之前一直有效，长度与 mmap 时一致
unsafe impl DeviceMemory for MmapRegion {
    fn as_ptr(&self) -> *const u8 {
        self.ptr as *const u8
    }

    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/len 来自成功的 mmap，且只 munmap 一次
        if let Err(e) = unsafe { nix::sys::mman::munmap(self.ptr, self.len) } {
            tracing::warn!(target: "boothcam::v4l2", "munmap failed: {}", e);
        }
    }
}

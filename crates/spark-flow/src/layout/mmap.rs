//! 基于 `MAP_SHARED` 文件映射的布局存储。
//!
//! # 教案式说明
//! - **意图（Why）**：多进程部署时，各进程的分片通过同一组 `budgets<N>` 文件共享预算表。
//! - **逻辑（How）**：所有者 `create` 时截断并扩展文件（权限 `0600`），其余参与者 `attach`
//!   以文件大小决定容量；两者都以读写方式映射。
//! - **契约（What）**：映射起始地址按页对齐，满足 [`AtomicI64`] 的对齐要求；
//!   只有所有者在 `Drop` 时删除文件。

use std::{
    fs::{self, File, OpenOptions},
    io,
    os::unix::{fs::PermissionsExt, io::AsRawFd},
    path::{Path, PathBuf},
    ptr, slice,
};

use core::sync::atomic::AtomicI64;

use tracing::debug;

use super::{LayoutStorage, WORD_BYTES};
use crate::{
    error::{FlowError, Result},
    observability::targets,
};

/// 文件映射存储。
pub struct MmapStorage {
    ptr: *mut u8,
    len: usize,
    // 保持文件句柄存活，映射期间不关闭。
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
    label: String,
    owns_file: bool,
}

impl MmapStorage {
    /// 创建（或截断）文件并映射 `bytes` 字节。调用者成为文件所有者。
    pub fn create(path: &Path, bytes: usize) -> Result<Self> {
        if bytes < WORD_BYTES {
            return Err(FlowError::storage(
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "mapping must hold one word"),
            ));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|err| FlowError::storage(path, err))?;
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|err| FlowError::storage(path, err))?;
        file.set_len(bytes as u64)
            .map_err(|err| FlowError::storage(path, err))?;

        let storage = Self::map(file, path, bytes, true)?;
        debug!(target: targets::LAYOUT, path = %path.display(), bytes, "budget layout created");
        Ok(storage)
    }

    /// 附着到已存在的文件，容量由文件大小决定。
    pub fn attach(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| FlowError::storage(path, err))?;
        let bytes = file
            .metadata()
            .map_err(|err| FlowError::storage(path, err))?
            .len() as usize;
        if bytes < WORD_BYTES {
            return Err(FlowError::storage(
                path,
                io::Error::new(io::ErrorKind::InvalidData, "budget layout file is empty"),
            ));
        }

        let storage = Self::map(file, path, bytes, false)?;
        debug!(target: targets::LAYOUT, path = %path.display(), bytes, "budget layout attached");
        Ok(storage)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn map(file: File, path: &Path, bytes: usize, owns_file: bool) -> Result<Self> {
        // SAFETY: 文件以读写方式打开且长度至少为 `bytes`；映射结果在 `Drop` 中解除。
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                bytes,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(FlowError::storage(path, io::Error::last_os_error()));
        }

        Ok(Self {
            ptr: ptr.cast::<u8>(),
            len: bytes,
            file,
            path: path.to_path_buf(),
            label: path.display().to_string(),
            owns_file,
        })
    }
}

impl LayoutStorage for MmapStorage {
    fn words(&self) -> &[AtomicI64] {
        // SAFETY: 映射页对齐且在 `self` 存活期间有效；`AtomicI64` 与 `i64` 布局一致，
        // 跨进程的并发访问全部经由原子操作完成。
        unsafe { slice::from_raw_parts(self.ptr.cast::<AtomicI64>(), self.len / WORD_BYTES) }
    }

    fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Debug for MmapStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmapStorage")
            .field("path", &self.path)
            .field("len", &self.len)
            .field("owns_file", &self.owns_file)
            .finish_non_exhaustive()
    }
}

impl Drop for MmapStorage {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` 来自成功的 `mmap` 调用，且只在此处解除一次。
        unsafe {
            libc::munmap(self.ptr.cast::<libc::c_void>(), self.len);
        }
        if self.owns_file {
            let _ = fs::remove_file(&self.path);
        }
    }
}

// SAFETY: 映射在整个生命周期内有效，所有访问都通过原子字完成。
unsafe impl Send for MmapStorage {}
unsafe impl Sync for MmapStorage {}

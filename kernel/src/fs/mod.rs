//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 文件系统接口
//!
//! 内核只依赖按名字创建、打开、删除文件的后备存储；
//! 磁盘布局不在内核范围内。`MemFileSystem` 是内存实现。
//!
//! - `file`: 打开的文件（带读写位置）和每进程的文件描述符表
//! - `noff`: NOFF 可执行文件格式

pub mod file;
pub mod noff;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use log::debug;
use spin::Mutex;

use crate::errno::{Errno, KResult};

pub use file::{FdTable, File, FileDescriptor, CONSOLE_INPUT, CONSOLE_OUTPUT};

/// 已打开文件的底层存储
///
/// 按偏移读写，读写位置由 [`File`] 维护。
pub trait OpenFile: Send + Sync {
    /// 从 `offset` 开始读入 `buf`，返回读到的字节数
    fn read_at(&self, buf: &mut [u8], offset: usize) -> usize;
    /// 从 `offset` 开始写入 `buf`，必要时扩展文件，返回写入的字节数
    fn write_at(&self, buf: &[u8], offset: usize) -> usize;
    /// 文件长度
    fn length(&self) -> usize;
}

/// 按名字访问的文件存储
pub trait FileSystem: Send + Sync {
    /// 创建文件，已存在时截断为空
    fn create(&self, name: &str) -> KResult<()>;
    /// 打开文件
    fn open(&self, name: &str) -> KResult<Arc<dyn OpenFile>>;
    /// 删除文件
    fn remove(&self, name: &str) -> KResult<()>;
}

/// 内存文件
#[derive(Debug, Default)]
pub struct MemFile {
    data: Mutex<Vec<u8>>,
}

impl MemFile {
    pub fn with_contents(data: &[u8]) -> Self {
        Self {
            data: Mutex::new(data.to_vec()),
        }
    }

    /// 文件全部内容
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl OpenFile for MemFile {
    fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        let data = self.data.lock();
        if offset >= data.len() {
            return 0;
        }
        let count = buf.len().min(data.len() - offset);
        buf[..count].copy_from_slice(&data[offset..offset + count]);
        count
    }

    fn write_at(&self, buf: &[u8], offset: usize) -> usize {
        let mut data = self.data.lock();
        let end = offset + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buf);
        buf.len()
    }

    fn length(&self) -> usize {
        self.data.lock().len()
    }
}

/// 内存文件系统
#[derive(Default)]
pub struct MemFileSystem {
    files: Mutex<BTreeMap<String, Arc<MemFile>>>,
}

impl MemFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以给定内容安装文件（例如可执行映像）
    pub fn install(&self, name: &str, contents: &[u8]) {
        debug!(target: "fs", "install {} ({} bytes)", name, contents.len());
        self.files
            .lock()
            .insert(String::from(name), Arc::new(MemFile::with_contents(contents)));
    }

    /// 读取文件全部内容
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().get(name).map(|file| file.contents())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }
}

impl FileSystem for MemFileSystem {
    fn create(&self, name: &str) -> KResult<()> {
        if name.is_empty() {
            return Err(Errno::InvalidArgument);
        }
        debug!(target: "fs", "create {}", name);
        self.files
            .lock()
            .insert(String::from(name), Arc::new(MemFile::default()));
        Ok(())
    }

    fn open(&self, name: &str) -> KResult<Arc<dyn OpenFile>> {
        match self.files.lock().get(name) {
            Some(file) => Ok(Arc::clone(file) as Arc<dyn OpenFile>),
            None => Err(Errno::NoSuchFileOrDirectory),
        }
    }

    fn remove(&self, name: &str) -> KResult<()> {
        self.files
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or(Errno::NoSuchFileOrDirectory)
    }
}

/// 读取文件全部内容
pub fn read_all(file: &dyn OpenFile) -> Vec<u8> {
    let mut buf = alloc::vec![0; file.length()];
    let count = file.read_at(&mut buf, 0);
    buf.truncate(count);
    buf
}

//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 打开的文件与文件描述符表
//!
//! 每个进程有自己的文件描述符表：
//! - fd 0: 控制台输入（保留）
//! - fd 1: 控制台输出（保留）
//! - fd 2 起: 用户打开的文件，总是分配编号最小的空闲 fd，关闭后可复用

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use spin::Mutex;

use super::OpenFile;
use crate::errno::{Errno, KResult};

/// 控制台输入
pub const CONSOLE_INPUT: usize = 0;
/// 控制台输出
pub const CONSOLE_OUTPUT: usize = 1;

/// 打开的文件：底层存储加顺序读写位置
pub struct File {
    handle: Arc<dyn OpenFile>,
    pos: Mutex<usize>,
}

impl File {
    pub fn new(handle: Arc<dyn OpenFile>) -> Self {
        Self {
            handle,
            pos: Mutex::new(0),
        }
    }

    /// 从当前位置读，位置前移读到的字节数
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut pos = self.pos.lock();
        let count = self.handle.read_at(buf, *pos);
        *pos += count;
        count
    }

    /// 从当前位置写，位置前移写入的字节数
    pub fn write(&self, buf: &[u8]) -> usize {
        let mut pos = self.pos.lock();
        let count = self.handle.write_at(buf, *pos);
        *pos += count;
        count
    }

    pub fn length(&self) -> usize {
        self.handle.length()
    }

    pub fn get_pos(&self) -> usize {
        *self.pos.lock()
    }
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("pos", &self.get_pos())
            .field("length", &self.length())
            .finish()
    }
}

/// 文件描述符指向的对象
#[derive(Debug, Clone)]
pub enum FileDescriptor {
    ConsoleInput,
    ConsoleOutput,
    File(Arc<File>),
}

/// 文件描述符表
#[derive(Debug)]
pub struct FdTable {
    fds: Vec<Option<FileDescriptor>>,
}

impl FdTable {
    /// 创建只含控制台描述符的表
    ///
    /// `max_open_files` 含两个控制台描述符。
    pub fn new(max_open_files: usize) -> Self {
        let mut fds = alloc::vec![None; max_open_files.max(2)];
        fds[CONSOLE_INPUT] = Some(FileDescriptor::ConsoleInput);
        fds[CONSOLE_OUTPUT] = Some(FileDescriptor::ConsoleOutput);
        Self { fds }
    }

    /// 安装文件，返回编号最小的空闲 fd
    ///
    /// 表满时返回 `Errno::TooManyOpenFiles`。
    pub fn install(&mut self, file: Arc<File>) -> KResult<usize> {
        let fd = self
            .fds
            .iter()
            .position(Option::is_none)
            .ok_or(Errno::TooManyOpenFiles)?;
        self.fds[fd] = Some(FileDescriptor::File(file));
        Ok(fd)
    }

    /// 获取 fd 指向的对象
    pub fn get(&self, fd: usize) -> KResult<FileDescriptor> {
        self.fds
            .get(fd)
            .and_then(Option::clone)
            .ok_or(Errno::BadFileNumber)
    }

    /// 关闭用户文件
    ///
    /// 控制台描述符不能关闭，关闭未打开的 fd 返回 `Errno::BadFileNumber`。
    pub fn close(&mut self, fd: usize) -> KResult<()> {
        match self.fds.get_mut(fd) {
            Some(slot @ Some(FileDescriptor::File(_))) => {
                *slot = None;
                Ok(())
            }
            _ => Err(Errno::BadFileNumber),
        }
    }

    /// 关闭所有用户文件（进程退出时调用）
    pub fn close_all(&mut self) -> usize {
        let mut closed = 0;
        for slot in self.fds.iter_mut() {
            if matches!(slot, Some(FileDescriptor::File(_))) {
                *slot = None;
                closed += 1;
            }
        }
        closed
    }

    /// 打开的用户文件数量
    pub fn num_open_files(&self) -> usize {
        self.fds
            .iter()
            .filter(|slot| matches!(slot, Some(FileDescriptor::File(_))))
            .count()
    }
}

//! 控制台设备
//!
//! 用户程序通过 fd 1 写出的字节进入输出缓冲区，并按行记录日志；
//! fd 0 的读取从输入缓冲区取字节，缓冲区为空时读到 0 字节。

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;

use log::info;
use spin::Mutex;

/// 控制台
#[derive(Debug, Default)]
pub struct Console {
    output: Mutex<Vec<u8>>,
    input: Mutex<VecDeque<u8>>,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写出字节，返回写入的数量
    pub fn write(&self, bytes: &[u8]) -> usize {
        self.output.lock().extend_from_slice(bytes);
        for line in String::from_utf8_lossy(bytes).lines() {
            info!(target: "console", "{}", line);
        }
        bytes.len()
    }

    /// 读取至多 `buf.len()` 个输入字节
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut input = self.input.lock();
        let count = buf.len().min(input.len());
        for (slot, byte) in buf.iter_mut().zip(input.drain(..count)) {
            *slot = byte;
        }
        count
    }

    /// 追加输入字节
    pub fn push_input(&self, bytes: &[u8]) {
        self.input.lock().extend(bytes.iter().copied());
    }

    /// 迄今为止的全部输出
    pub fn output(&self) -> Vec<u8> {
        self.output.lock().clone()
    }

    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output.lock()).into_owned()
    }
}

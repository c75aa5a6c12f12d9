//! 用户内存访问
//!
//! 系统调用参数中的字符串和缓冲区逐字节经过当前页表翻译后复制，
//! 不假设虚拟地址等于物理地址。任何一个字节翻译失败，整个调用返回
//! `Errno::BadAddress`。

use alloc::string::String;
use alloc::vec::Vec;

use crate::errno::{Errno, KResult};
use crate::machine::Machine;

/// 复制以 0 结尾的用户字符串
///
/// 超过 `max_len` 字节仍未遇到结尾时返回 `Errno::NameTooLong`。
pub fn copy_string_in(machine: &Machine, vaddr: i32, max_len: usize) -> KResult<String> {
    let mut bytes = Vec::new();
    for offset in 0..=max_len {
        let addr = vaddr.checked_add(offset as i32).ok_or(Errno::BadAddress)?;
        let byte = machine.read_mem(addr, 1).map_err(|_| Errno::BadAddress)? as u8;
        if byte == 0 {
            return String::from_utf8(bytes).map_err(|_| Errno::InvalidArgument);
        }
        bytes.push(byte);
    }
    Err(Errno::NameTooLong)
}

/// 从用户内存复制 `len` 字节
pub fn copy_in(machine: &Machine, vaddr: i32, len: usize) -> KResult<Vec<u8>> {
    (0..len)
        .map(|offset| {
            let addr = vaddr.checked_add(offset as i32).ok_or(Errno::BadAddress)?;
            machine
                .read_mem(addr, 1)
                .map(|byte| byte as u8)
                .map_err(|_| Errno::BadAddress)
        })
        .collect()
}

/// 把 `bytes` 复制到用户内存
pub fn copy_out(machine: &Machine, vaddr: i32, bytes: &[u8]) -> KResult<()> {
    for (offset, byte) in bytes.iter().enumerate() {
        let addr = vaddr.checked_add(offset as i32).ok_or(Errno::BadAddress)?;
        machine
            .write_mem(addr, 1, *byte as i32)
            .map_err(|_| Errno::BadAddress)?;
    }
    Ok(())
}

/// 检查 `[vaddr, vaddr + len)` 是否全部可写
///
/// 每页只翻译一次，不触碰内存内容。
pub fn check_writable(machine: &Machine, vaddr: i32, len: usize) -> KResult<()> {
    if len == 0 {
        return Ok(());
    }
    let last = i32::try_from(len - 1)
        .ok()
        .and_then(|span| vaddr.checked_add(span))
        .ok_or(Errno::BadAddress)?;
    let page_size = machine.page_size() as i32;
    let mut addr = vaddr;
    loop {
        machine.translate(addr, 1, true).map_err(|_| Errno::BadAddress)?;
        // 下一页的起始地址
        let next = match (addr / page_size + 1).checked_mul(page_size) {
            Some(next) if next <= last => next,
            _ => return Ok(()),
        };
        addr = next;
    }
}

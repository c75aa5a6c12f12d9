//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 模拟机器 (Machine)
//!
//! 内核只通过接口使用机器：
//! - 40 个 32 位整数寄存器（MIPS 布局，含 PC/NextPC/PrevPC）
//! - 按字节寻址的物理内存，大小为 `num_phys_pages * page_size`
//! - 当前安装的页表，以及基于页表的虚拟地址翻译
//!
//! 指令级执行不在内核中实现，由 [`Cpu`] 的实现者提供。

pub mod interrupt;
pub mod native;

use alloc::sync::Arc;
use alloc::vec::Vec;

use bitflags::bitflags;
use spin::Mutex;

use crate::kernel::Kernel;

pub use interrupt::{IntStatus, Interrupt, InterruptGuard};
pub use native::{NativeCpu, Routine, UserContext};

/// 通用寄存器数量
pub const NUM_GP_REGS: usize = 32;
/// 栈指针寄存器
pub const STACK_REG: usize = 29;
/// 返回地址寄存器
pub const RET_ADDR_REG: usize = 31;
/// 乘法结果高位
pub const HI_REG: usize = 32;
/// 乘法结果低位
pub const LO_REG: usize = 33;
/// 当前程序计数器
pub const PC_REG: usize = 34;
/// 下一条指令地址（分支延迟槽）
pub const NEXT_PC_REG: usize = 35;
/// 上一条指令地址
pub const PREV_PC_REG: usize = 36;
/// 延迟加载的目标寄存器
pub const LOAD_REG: usize = 37;
/// 延迟加载的值
pub const LOAD_VALUE_REG: usize = 38;
/// 出错的虚拟地址
pub const BAD_VADDR_REG: usize = 39;
/// 寄存器总数
pub const NUM_TOTAL_REGS: usize = 40;

/// 系统调用号 / 返回值寄存器
pub const RESULT_REG: usize = 2;
/// 前四个参数寄存器
pub const ARG_REGS: [usize; 4] = [4, 5, 6, 7];

/// 指令宽度（字节）
pub const INSTRUCTION_WIDTH: i32 = 4;

/// 一组完整的用户寄存器
pub type Registers = [i32; NUM_TOTAL_REGS];

/// 用户程序触发的异常
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExceptionType {
    /// 系统调用陷入
    Syscall,
    /// 页表中没有有效映射
    PageFault,
    /// 写只读页
    ReadOnly,
    /// 地址越界或未对齐
    AddressError,
    /// 未定义指令
    IllegalInstr,
}

bitflags! {
    /// 页表项标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u8 {
        /// 映射有效
        const VALID = 1 << 0;
        /// 只读页，写入触发 ReadOnly 异常
        const READ_ONLY = 1 << 1;
    }
}

/// 页表项：虚拟页号 → 物理页号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEntry {
    pub virtual_page: usize,
    pub physical_page: usize,
    pub flags: PteFlags,
}

impl TranslationEntry {
    pub fn is_valid(&self) -> bool {
        self.flags.contains(PteFlags::VALID)
    }

    pub fn is_read_only(&self) -> bool {
        self.flags.contains(PteFlags::READ_ONLY)
    }
}

/// 页表：按虚拟页号排列，构造后不再修改
pub type PageTable = Arc<[TranslationEntry]>;

/// 用户代码的执行者
///
/// `run` 从当前上下文的 PC 寄存器开始执行用户代码，系统调用和异常通过
/// [`crate::syscall::exception_handler`] 陷入内核。`run` 正常返回表示
/// 用户程序执行完毕，内核把它当作 `Exit(0)`。
pub trait Cpu: Send + Sync {
    fn run(&self, kernel: &Arc<Kernel>);
}

/// 模拟机器：寄存器、物理内存和当前页表
pub struct Machine {
    registers: Mutex<Registers>,
    memory: Mutex<Vec<u8>>,
    page_table: Mutex<Option<PageTable>>,
    page_size: usize,
    num_phys_pages: usize,
}

impl Machine {
    pub fn new(page_size: usize, num_phys_pages: usize) -> Self {
        assert!(page_size > 0 && page_size % 4 == 0, "page size must be a positive multiple of 4");
        Self {
            registers: Mutex::new([0; NUM_TOTAL_REGS]),
            memory: Mutex::new(alloc::vec![0; page_size * num_phys_pages]),
            page_table: Mutex::new(None),
            page_size,
            num_phys_pages,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn num_phys_pages(&self) -> usize {
        self.num_phys_pages
    }

    pub fn read_register(&self, reg: usize) -> i32 {
        self.registers.lock()[reg]
    }

    pub fn write_register(&self, reg: usize, value: i32) {
        self.registers.lock()[reg] = value;
    }

    /// 读取全部寄存器（上下文切换时保存用户状态）
    pub fn registers(&self) -> Registers {
        *self.registers.lock()
    }

    /// 写入全部寄存器（上下文切换时恢复用户状态）
    pub fn set_registers(&self, regs: &Registers) {
        *self.registers.lock() = *regs;
    }

    /// 系统调用返回前推进程序计数器
    ///
    /// PrevPC ← PC，PC ← NextPC，NextPC ← NextPC + 4
    pub fn advance_pc(&self) {
        let mut regs = self.registers.lock();
        regs[PREV_PC_REG] = regs[PC_REG];
        regs[PC_REG] = regs[NEXT_PC_REG];
        regs[NEXT_PC_REG] = regs[NEXT_PC_REG].wrapping_add(INSTRUCTION_WIDTH);
    }

    /// 安装页表，之后的地址翻译都使用它
    pub fn install_page_table(&self, table: PageTable) {
        *self.page_table.lock() = Some(table);
    }

    /// 如果当前安装的是 `table`，则卸载
    pub fn uninstall_page_table(&self, table: &PageTable) {
        let mut installed = self.page_table.lock();
        if installed.as_ref().is_some_and(|t| Arc::ptr_eq(t, table)) {
            *installed = None;
        }
    }

    /// 当前安装的页表
    pub fn page_table(&self) -> Option<PageTable> {
        self.page_table.lock().clone()
    }

    /// 用当前页表翻译虚拟地址
    ///
    /// `size` 为访问宽度（1/2/4），`writing` 表示写访问。失败时把出错地址
    /// 写入 BadVAddr 寄存器并返回对应的异常。
    pub fn translate(&self, vaddr: i32, size: usize, writing: bool) -> Result<usize, ExceptionType> {
        let result = self.translate_inner(vaddr, size, writing);
        if result.is_err() {
            self.write_register(BAD_VADDR_REG, vaddr);
        }
        result
    }

    fn translate_inner(&self, vaddr: i32, size: usize, writing: bool) -> Result<usize, ExceptionType> {
        if vaddr < 0 {
            return Err(ExceptionType::AddressError);
        }
        let vaddr = vaddr as usize;
        if (size == 4 && vaddr % 4 != 0) || (size == 2 && vaddr % 2 != 0) {
            return Err(ExceptionType::AddressError);
        }

        let table = self.page_table.lock();
        let table = table.as_ref().ok_or(ExceptionType::PageFault)?;
        let vpn = vaddr / self.page_size;
        let offset = vaddr % self.page_size;
        let entry = table.get(vpn).ok_or(ExceptionType::AddressError)?;
        if !entry.is_valid() {
            return Err(ExceptionType::PageFault);
        }
        if writing && entry.is_read_only() {
            return Err(ExceptionType::ReadOnly);
        }
        if entry.physical_page >= self.num_phys_pages {
            return Err(ExceptionType::AddressError);
        }
        Ok(entry.physical_page * self.page_size + offset)
    }

    /// 读用户内存，`size` 为 1、2 或 4 字节，小端序
    pub fn read_mem(&self, vaddr: i32, size: usize) -> Result<i32, ExceptionType> {
        let paddr = self.translate(vaddr, size, false)?;
        let memory = self.memory.lock();
        let bytes = &memory[paddr..paddr + size];
        Ok(match size {
            1 => bytes[0] as i32,
            2 => u16::from_le_bytes([bytes[0], bytes[1]]) as i32,
            4 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            _ => return Err(ExceptionType::AddressError),
        })
    }

    /// 写用户内存，`size` 为 1、2 或 4 字节，小端序
    pub fn write_mem(&self, vaddr: i32, size: usize, value: i32) -> Result<(), ExceptionType> {
        let paddr = self.translate(vaddr, size, true)?;
        let mut memory = self.memory.lock();
        match size {
            1 => memory[paddr] = value as u8,
            2 => memory[paddr..paddr + 2].copy_from_slice(&(value as u16).to_le_bytes()),
            4 => memory[paddr..paddr + 4].copy_from_slice(&value.to_le_bytes()),
            _ => return Err(ExceptionType::AddressError),
        }
        Ok(())
    }

    /// 将物理页帧清零
    pub fn zero_frame(&self, frame: usize) {
        let start = frame * self.page_size;
        self.memory.lock()[start..start + self.page_size].fill(0);
    }

    /// 把物理页帧 `from` 的全部内容复制到 `to`
    pub fn copy_frame(&self, from: usize, to: usize) {
        let src = from * self.page_size;
        let dst = to * self.page_size;
        self.memory
            .lock()
            .copy_within(src..src + self.page_size, dst);
    }

    /// 直接写物理内存
    pub fn write_phys(&self, paddr: usize, data: &[u8]) {
        self.memory.lock()[paddr..paddr + data.len()].copy_from_slice(data);
    }

    /// 直接读物理内存
    pub fn read_phys(&self, paddr: usize, buf: &mut [u8]) {
        let len = buf.len();
        buf.copy_from_slice(&self.memory.lock()[paddr..paddr + len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_table(pages: usize, flags: PteFlags) -> PageTable {
        (0..pages)
            .map(|vpn| TranslationEntry {
                virtual_page: vpn,
                physical_page: vpn,
                flags,
            })
            .collect::<Vec<_>>()
            .into()
    }

    #[test]
    fn translate_through_installed_table() {
        let machine = Machine::new(128, 4);
        let table: PageTable = alloc::vec![
            TranslationEntry { virtual_page: 0, physical_page: 3, flags: PteFlags::VALID },
            TranslationEntry { virtual_page: 1, physical_page: 1, flags: PteFlags::VALID },
        ]
        .into();
        machine.install_page_table(table);

        assert_eq!(machine.translate(4, 4, false), Ok(3 * 128 + 4));
        assert_eq!(machine.translate(130, 1, true), Ok(130));
        assert_eq!(machine.translate(256, 1, false), Err(ExceptionType::AddressError));
        assert_eq!(machine.read_register(BAD_VADDR_REG), 256);
    }

    #[test]
    fn misaligned_and_negative_addresses_fault() {
        let machine = Machine::new(128, 2);
        machine.install_page_table(identity_table(2, PteFlags::VALID));
        assert_eq!(machine.read_mem(2, 4), Err(ExceptionType::AddressError));
        assert_eq!(machine.read_mem(-4, 4), Err(ExceptionType::AddressError));
        assert_eq!(machine.read_mem(1, 2), Err(ExceptionType::AddressError));
    }

    #[test]
    fn read_only_page_rejects_writes() {
        let machine = Machine::new(128, 2);
        machine.install_page_table(identity_table(2, PteFlags::VALID | PteFlags::READ_ONLY));
        assert_eq!(machine.read_mem(0, 4), Ok(0));
        assert_eq!(machine.write_mem(0, 4, 1), Err(ExceptionType::ReadOnly));
    }

    #[test]
    fn memory_is_little_endian() {
        let machine = Machine::new(128, 2);
        machine.install_page_table(identity_table(2, PteFlags::VALID));
        machine.write_mem(8, 4, 0x1234_5678).unwrap();
        assert_eq!(machine.read_mem(8, 1), Ok(0x78));
        assert_eq!(machine.read_mem(10, 2), Ok(0x1234));
        assert_eq!(machine.read_mem(8, 4), Ok(0x1234_5678));
    }

    #[test]
    fn advance_pc_shifts_program_counters() {
        let machine = Machine::new(128, 1);
        machine.write_register(PC_REG, 8);
        machine.write_register(NEXT_PC_REG, 12);
        machine.advance_pc();
        assert_eq!(machine.read_register(PREV_PC_REG), 8);
        assert_eq!(machine.read_register(PC_REG), 12);
        assert_eq!(machine.read_register(NEXT_PC_REG), 16);
    }

    #[test]
    fn frame_copy_and_zero() {
        let machine = Machine::new(128, 3);
        machine.write_phys(128, b"frame one");
        machine.copy_frame(1, 2);
        let mut buf = [0u8; 9];
        machine.read_phys(256, &mut buf);
        assert_eq!(&buf, b"frame one");
        machine.zero_frame(2);
        machine.read_phys(256, &mut buf);
        assert_eq!(buf, [0u8; 9]);
    }

    #[test]
    fn uninstall_only_matching_table() {
        let machine = Machine::new(128, 2);
        let a = identity_table(1, PteFlags::VALID);
        let b = identity_table(1, PteFlags::VALID);
        machine.install_page_table(a.clone());
        machine.uninstall_page_table(&b);
        assert!(machine.page_table().is_some());
        machine.uninstall_page_table(&a);
        assert!(machine.page_table().is_none());
    }
}

//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 用户地址空间 (Address Space)
//!
//! 地址空间 = 页表 + 页表引用的物理页帧。两种构造方式：
//! - `load()`: 从 NOFF 可执行映像构造
//! - `fork_clone()`: 复制父进程的地址空间
//!
//! 两种方式都是 "全有或全无"：中途分配失败时，已分配的帧全部归还，
//! 不会留下半构造的地址空间。
//!
//! 地址空间销毁时归还所有帧。它只记录所属进程的 PID（非拥有引用），
//! PCB 的生命周期完全由进程表管理。

use alloc::sync::Arc;
use alloc::vec::Vec;

use log::{debug, trace};

use super::page::{FrameAllocator, PhysFrame};
use crate::errno::{Errno, KResult};
use crate::fs::noff::{NoffHeader, Segment};
use crate::kernel::KernelConfig;
use crate::machine::{
    Machine, PageTable, PteFlags, Registers, TranslationEntry, INSTRUCTION_WIDTH, NEXT_PC_REG,
    NUM_TOTAL_REGS, PC_REG, STACK_REG,
};
use crate::process::Pid;

/// 用户地址空间
///
/// 不变量：
/// - `page_table.len() == num_pages`
/// - 页表引用的每个物理帧都被本地址空间独占，直到销毁
pub struct AddrSpace {
    page_table: PageTable,
    num_pages: usize,
    stack_margin: usize,
    owner: Option<Pid>,
    frames: Arc<FrameAllocator>,
    machine: Arc<Machine>,
}

impl AddrSpace {
    /// 从 NOFF 可执行映像构造地址空间
    ///
    /// 1. 计算所需页数：三个段 + 用户栈，向上取整到页
    /// 2. 逐页分配物理帧，失败时归还已分配的帧
    /// 3. 清零所有帧，把 code 和 initData 段复制到映射的位置
    ///
    /// # 返回
    /// - `Err(Errno::ExecFormatError)` - 映像格式错误
    /// - `Err(Errno::OutOfMemory)` - 物理帧不足
    pub fn load(
        image: &[u8],
        frames: &Arc<FrameAllocator>,
        machine: &Arc<Machine>,
        config: &KernelConfig,
    ) -> KResult<Self> {
        let header = NoffHeader::parse(image)?;
        let page_size = machine.page_size();
        let size = header.image_size() + config.user_stack_size;
        let num_pages = size.div_ceil(page_size);
        if num_pages > frames.num_frames() {
            debug!(target: "mm", "image needs {} pages, machine has {}", num_pages, frames.num_frames());
            return Err(Errno::OutOfMemory);
        }

        let allocated = Self::allocate_frames(frames, num_pages)?;
        let page_table: Vec<TranslationEntry> = allocated
            .iter()
            .enumerate()
            .map(|(vpn, frame)| TranslationEntry {
                virtual_page: vpn,
                physical_page: frame.number,
                flags: if Self::page_within(&header.code, vpn, page_size)
                    && !Self::page_touches(&header.init_data, vpn, page_size)
                {
                    PteFlags::VALID | PteFlags::READ_ONLY
                } else {
                    PteFlags::VALID
                },
            })
            .collect();

        let space = Self {
            page_table: page_table.into(),
            num_pages,
            stack_margin: config.stack_margin,
            owner: None,
            frames: Arc::clone(frames),
            machine: Arc::clone(machine),
        };

        for entry in space.page_table.iter() {
            machine.zero_frame(entry.physical_page);
        }
        for segment in [header.code, header.init_data] {
            if segment.size == 0 {
                continue;
            }
            let start = segment.in_file_addr as usize;
            let bytes = &image[start..start + segment.size as usize];
            space.copy_into(segment.virtual_addr as usize, bytes);
        }

        debug!(target: "mm", "loaded image: {} pages, {} bytes", num_pages, size);
        Ok(space)
    }

    /// 复制地址空间（fork）
    ///
    /// 分配与父空间相同数量的帧，逐帧复制全部内容，只读标志随之复制。
    /// 任一帧分配失败时，归还本次已分配的所有帧并返回 `Errno::OutOfMemory`。
    pub fn fork_clone(&self) -> KResult<Self> {
        let allocated = Self::allocate_frames(&self.frames, self.num_pages)?;
        let page_table: Vec<TranslationEntry> = self
            .page_table
            .iter()
            .zip(allocated.iter())
            .map(|(parent, frame)| {
                self.machine.copy_frame(parent.physical_page, frame.number);
                TranslationEntry {
                    virtual_page: parent.virtual_page,
                    physical_page: frame.number,
                    flags: parent.flags,
                }
            })
            .collect();

        trace!(target: "mm", "cloned address space of {} pages", self.num_pages);
        Ok(Self {
            page_table: page_table.into(),
            num_pages: self.num_pages,
            stack_margin: self.stack_margin,
            owner: None,
            frames: Arc::clone(&self.frames),
            machine: Arc::clone(&self.machine),
        })
    }

    fn allocate_frames(frames: &FrameAllocator, count: usize) -> KResult<Vec<PhysFrame>> {
        let mut allocated = Vec::with_capacity(count);
        for _ in 0..count {
            match frames.allocate() {
                Ok(frame) => allocated.push(frame),
                Err(err) => {
                    debug!(
                        target: "mm",
                        "frame allocation failed after {} of {} pages, rolling back",
                        allocated.len(),
                        count
                    );
                    for frame in allocated {
                        frames.free(frame);
                    }
                    return Err(err);
                }
            }
        }
        Ok(allocated)
    }

    fn page_within(segment: &Segment, vpn: usize, page_size: usize) -> bool {
        let start = segment.virtual_addr as usize;
        let end = start + segment.size as usize;
        segment.size > 0 && vpn * page_size >= start && (vpn + 1) * page_size <= end
    }

    fn page_touches(segment: &Segment, vpn: usize, page_size: usize) -> bool {
        let start = segment.virtual_addr as usize;
        let end = start + segment.size as usize;
        segment.size > 0 && vpn * page_size < end && (vpn + 1) * page_size > start
    }

    /// 通过本空间的页表把 `bytes` 写到虚拟地址 `vaddr`
    fn copy_into(&self, mut vaddr: usize, mut bytes: &[u8]) {
        let page_size = self.machine.page_size();
        while !bytes.is_empty() {
            let entry = &self.page_table[vaddr / page_size];
            let offset = vaddr % page_size;
            let chunk = bytes.len().min(page_size - offset);
            self.machine
                .write_phys(entry.physical_page * page_size + offset, &bytes[..chunk]);
            vaddr += chunk;
            bytes = &bytes[chunk..];
        }
    }

    /// 初始寄存器：全部清零，PC 指向入口 0，NextPC 指向下一条指令，
    /// 栈指针指向地址空间顶部减去预留字节
    pub fn initial_registers(&self) -> Registers {
        let mut regs = [0; NUM_TOTAL_REGS];
        regs[PC_REG] = 0;
        regs[NEXT_PC_REG] = INSTRUCTION_WIDTH;
        regs[STACK_REG] = (self.num_pages * self.machine.page_size() - self.stack_margin) as i32;
        regs
    }

    /// 把初始寄存器写入机器
    pub fn init_registers(&self) {
        let regs = self.initial_registers();
        trace!(target: "mm", "init registers, sp = {}", regs[STACK_REG]);
        self.machine.set_registers(&regs);
    }

    /// 切换出去时保存地址空间相关的机器状态
    ///
    /// 页表构造后不再改变，没有需要写回的状态。
    pub fn save_state(&self) {}

    /// 切换进来时安装本空间的页表
    pub fn restore_state(&self) {
        self.machine.install_page_table(Arc::clone(&self.page_table));
    }

    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    /// 本空间占用的物理帧
    pub fn frames(&self) -> impl Iterator<Item = PhysFrame> + '_ {
        self.page_table
            .iter()
            .map(|entry| PhysFrame::new(entry.physical_page))
    }

    /// 所属进程（非拥有引用）
    pub fn owner(&self) -> Option<Pid> {
        self.owner
    }

    pub fn set_owner(&mut self, pid: Pid) {
        self.owner = Some(pid);
    }
}

impl Drop for AddrSpace {
    fn drop(&mut self) {
        self.machine.uninstall_page_table(&self.page_table);
        for entry in self.page_table.iter() {
            self.frames.free(PhysFrame::new(entry.physical_page));
        }
        trace!(target: "mm", "address space of {:?} freed {} pages", self.owner, self.num_pages);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::noff::NoffBuilder;

    fn setup(num_frames: usize) -> (Arc<FrameAllocator>, Arc<Machine>, KernelConfig) {
        let config = KernelConfig {
            num_phys_pages: num_frames,
            ..KernelConfig::default()
        };
        (
            Arc::new(FrameAllocator::new(num_frames)),
            Arc::new(Machine::new(config.page_size, num_frames)),
            config,
        )
    }

    #[test]
    fn load_copies_segments_and_zeroes_the_rest() {
        let (frames, machine, config) = setup(32);
        let image = NoffBuilder::new()
            .code_words(&[0x1111_1111, 0x2222_2222])
            .init_data(b"data")
            .uninit(8)
            .build();
        let space = AddrSpace::load(&image, &frames, &machine, &config).unwrap();

        // 8 + 4 + 8 字节映像加 1024 字节栈，共 9 页
        assert_eq!(space.num_pages(), 9);
        assert_eq!(space.page_table().len(), 9);
        assert_eq!(frames.num_free(), 32 - 9);

        space.restore_state();
        assert_eq!(machine.read_mem(4, 4), Ok(0x2222_2222));
        assert_eq!(machine.read_mem(8, 1), Ok(b'd' as i32));
        assert_eq!(machine.read_mem(12, 4), Ok(0));
        assert_eq!(machine.read_mem(1000, 4), Ok(0));
    }

    #[test]
    fn load_failure_rolls_back_frames() {
        let (frames, machine, config) = setup(12);
        let hog: Vec<_> = (0..4).map(|_| frames.allocate().unwrap()).collect();
        let image = NoffBuilder::new().code_words(&[1]).build();

        let result = AddrSpace::load(&image, &frames, &machine, &config);
        assert_eq!(result.err(), Some(Errno::OutOfMemory));
        assert_eq!(frames.num_free(), 8);
        for frame in hog {
            frames.free(frame);
        }
    }

    #[test]
    fn load_rejects_oversized_image() {
        let (frames, machine, config) = setup(4);
        let image = NoffBuilder::new().code_words(&[1]).build();
        let result = AddrSpace::load(&image, &frames, &machine, &config);
        assert_eq!(result.err(), Some(Errno::OutOfMemory));
        assert_eq!(frames.num_free(), 4);
    }

    #[test]
    fn fork_clone_copies_content_into_new_frames() {
        let (frames, machine, config) = setup(32);
        let image = NoffBuilder::new().code_words(&[42]).build();
        let parent = AddrSpace::load(&image, &frames, &machine, &config).unwrap();
        parent.restore_state();
        machine.write_mem(512, 4, 77).unwrap();

        let child = parent.fork_clone().unwrap();
        assert_eq!(child.num_pages(), parent.num_pages());
        assert!(child.frames().all(|f| parent.frames().all(|p| p != f)));

        child.restore_state();
        assert_eq!(machine.read_mem(0, 4), Ok(42));
        assert_eq!(machine.read_mem(512, 4), Ok(77));
        machine.write_mem(512, 4, 5).unwrap();

        parent.restore_state();
        assert_eq!(machine.read_mem(512, 4), Ok(77));
    }

    #[test]
    fn fork_clone_is_all_or_nothing() {
        let (frames, machine, config) = setup(12);
        let image = NoffBuilder::new().code_words(&[42]).build();
        let parent = AddrSpace::load(&image, &frames, &machine, &config).unwrap();
        assert_eq!(frames.num_free(), 3);

        assert_eq!(parent.fork_clone().err(), Some(Errno::OutOfMemory));
        assert_eq!(frames.num_free(), 3);
    }

    #[test]
    fn drop_returns_every_frame() {
        let (frames, machine, config) = setup(32);
        let image = NoffBuilder::new().code_words(&[1]).build();
        let space = AddrSpace::load(&image, &frames, &machine, &config).unwrap();
        space.restore_state();
        let child = space.fork_clone().unwrap();
        assert_eq!(frames.num_free(), 32 - 18);

        drop(space);
        assert!(machine.page_table().is_none());
        drop(child);
        assert_eq!(frames.num_free(), 32);
    }

    #[test]
    fn init_registers_layout() {
        let (frames, machine, config) = setup(32);
        let image = NoffBuilder::new().code_words(&[1]).build();
        let space = AddrSpace::load(&image, &frames, &machine, &config).unwrap();
        machine.write_register(8, 99);
        space.init_registers();

        assert_eq!(machine.read_register(PC_REG), 0);
        assert_eq!(machine.read_register(NEXT_PC_REG), 4);
        assert_eq!(machine.read_register(STACK_REG), (9 * 128 - 16) as i32);
        assert_eq!(machine.read_register(8), 0);
    }

    #[test]
    fn full_code_pages_are_read_only() {
        let (frames, machine, config) = setup(32);
        let code: Vec<u32> = (0..64).collect();
        let image = NoffBuilder::new().code_words(&code).init_data(&[1; 8]).build();
        let space = AddrSpace::load(&image, &frames, &machine, &config).unwrap();

        let flags: Vec<bool> = space.page_table().iter().map(|e| e.is_read_only()).collect();
        assert_eq!(&flags[..3], &[true, true, false]);

        space.restore_state();
        assert_eq!(machine.read_mem(4, 4), Ok(1));
        assert_eq!(
            machine.write_mem(4, 4, 0),
            Err(crate::machine::ExceptionType::ReadOnly)
        );
        assert!(space.fork_clone().unwrap().page_table()[0].is_read_only());
    }
}

//! NOFF 可执行文件格式解析
//!
//! NOFF (Nachos Object File Format) 文件由一个 40 字节的文件头和三个段组成：
//! - code: 代码段
//! - initData: 已初始化数据段
//! - uninitData: 未初始化数据段（只占地址空间，不占文件）
//!
//! 文件头的每个字段都是 32 位小端整数。魔数按字节反序出现时，
//! 整个文件头按反序解析。

use alloc::vec::Vec;

use crate::errno::{Errno, KResult};

/// NOFF 魔数
pub const NOFF_MAGIC: u32 = 0x00ba_dfad;

/// 文件头大小（字节）
pub const NOFF_HEADER_SIZE: usize = 40;

/// 段描述
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Segment {
    /// 段在虚拟地址空间中的起始位置
    pub virtual_addr: u32,
    /// 段在文件中的偏移
    pub in_file_addr: u32,
    /// 段大小（字节）
    pub size: u32,
}

impl Segment {
    fn end_in_file(&self) -> Option<usize> {
        (self.in_file_addr as usize).checked_add(self.size as usize)
    }

    fn end_in_memory(&self) -> Option<usize> {
        (self.virtual_addr as usize).checked_add(self.size as usize)
    }
}

/// NOFF 文件头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoffHeader {
    pub magic: u32,
    pub code: Segment,
    pub init_data: Segment,
    pub uninit_data: Segment,
}

impl NoffHeader {
    /// 解析并校验文件头
    ///
    /// # 返回
    /// - `Ok(header)` - 魔数正确，且 code/initData 段都在文件范围内
    /// - `Err(Errno::ExecFormatError)` - 文件太短、魔数错误或段越界
    pub fn parse(image: &[u8]) -> KResult<Self> {
        if image.len() < NOFF_HEADER_SIZE {
            return Err(Errno::ExecFormatError);
        }

        let mut words = [0u32; NOFF_HEADER_SIZE / 4];
        for (i, word) in words.iter_mut().enumerate() {
            let bytes = [image[i * 4], image[i * 4 + 1], image[i * 4 + 2], image[i * 4 + 3]];
            *word = u32::from_le_bytes(bytes);
        }

        if words[0] != NOFF_MAGIC {
            if words[0].swap_bytes() != NOFF_MAGIC {
                return Err(Errno::ExecFormatError);
            }
            for word in words.iter_mut() {
                *word = word.swap_bytes();
            }
        }

        let segment = |base: usize| Segment {
            virtual_addr: words[base],
            in_file_addr: words[base + 1],
            size: words[base + 2],
        };
        let header = Self {
            magic: words[0],
            code: segment(1),
            init_data: segment(4),
            uninit_data: segment(7),
        };

        for seg in [header.code, header.init_data] {
            if seg.size > 0 && seg.end_in_file().map_or(true, |end| end > image.len()) {
                return Err(Errno::ExecFormatError);
            }
        }
        for seg in [header.code, header.init_data, header.uninit_data] {
            if seg.end_in_memory().is_none() {
                return Err(Errno::ExecFormatError);
            }
        }
        Ok(header)
    }

    /// 程序映像（三个段）占用的字节数，不含栈
    pub fn image_size(&self) -> usize {
        [self.code, self.init_data, self.uninit_data]
            .iter()
            .filter(|seg| seg.size > 0)
            .filter_map(|seg| seg.end_in_memory())
            .max()
            .unwrap_or(0)
    }
}

/// NOFF 映像构造器
///
/// 代码段从虚拟地址 0 开始，数据段紧随其后，未初始化数据段再随其后。
///
/// # 示例
/// ```
/// use nachos_kernel::fs::noff::{NoffBuilder, NoffHeader};
///
/// let image = NoffBuilder::new().code_words(&[1, 2]).uninit(64).build();
/// let header = NoffHeader::parse(&image).unwrap();
/// assert_eq!(header.code.size, 8);
/// assert_eq!(header.image_size(), 72);
/// ```
#[derive(Debug, Clone, Default)]
pub struct NoffBuilder {
    code: Vec<u8>,
    init_data: Vec<u8>,
    uninit_size: u32,
}

impl NoffBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 代码段内容
    pub fn code(mut self, code: &[u8]) -> Self {
        self.code = code.to_vec();
        self
    }

    /// 以 32 位小端字组成的代码段
    pub fn code_words(mut self, words: &[u32]) -> Self {
        self.code = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        self
    }

    /// 已初始化数据段内容
    pub fn init_data(mut self, data: &[u8]) -> Self {
        self.init_data = data.to_vec();
        self
    }

    /// 未初始化数据段大小
    pub fn uninit(mut self, size: u32) -> Self {
        self.uninit_size = size;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let code_len = self.code.len() as u32;
        let data_len = self.init_data.len() as u32;
        let header_len = NOFF_HEADER_SIZE as u32;

        let code = if code_len > 0 {
            Segment { virtual_addr: 0, in_file_addr: header_len, size: code_len }
        } else {
            Segment::default()
        };
        let init_data = if data_len > 0 {
            Segment {
                virtual_addr: code_len,
                in_file_addr: header_len + code_len,
                size: data_len,
            }
        } else {
            Segment::default()
        };
        let uninit_data = if self.uninit_size > 0 {
            Segment {
                virtual_addr: code_len + data_len,
                in_file_addr: 0,
                size: self.uninit_size,
            }
        } else {
            Segment::default()
        };

        let mut image = Vec::with_capacity(NOFF_HEADER_SIZE + self.code.len() + self.init_data.len());
        image.extend_from_slice(&NOFF_MAGIC.to_le_bytes());
        for seg in [code, init_data, uninit_data] {
            image.extend_from_slice(&seg.virtual_addr.to_le_bytes());
            image.extend_from_slice(&seg.in_file_addr.to_le_bytes());
            image.extend_from_slice(&seg.size.to_le_bytes());
        }
        image.extend_from_slice(&self.code);
        image.extend_from_slice(&self.init_data);
        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_layout() {
        let image = NoffBuilder::new()
            .code_words(&[7, 8, 9])
            .init_data(b"hello")
            .uninit(20)
            .build();
        let header = NoffHeader::parse(&image).unwrap();
        assert_eq!(header.code, Segment { virtual_addr: 0, in_file_addr: 40, size: 12 });
        assert_eq!(header.init_data, Segment { virtual_addr: 12, in_file_addr: 52, size: 5 });
        assert_eq!(header.uninit_data.virtual_addr, 17);
        assert_eq!(header.image_size(), 37);
        assert_eq!(&image[52..57], b"hello");
    }

    #[test]
    fn byte_swapped_header_is_accepted() {
        let image = NoffBuilder::new().code_words(&[1]).build();
        let mut swapped = image.clone();
        for chunk in swapped[..NOFF_HEADER_SIZE].chunks_mut(4) {
            chunk.reverse();
        }
        assert_eq!(NoffHeader::parse(&swapped), NoffHeader::parse(&image));
    }

    #[test]
    fn rejects_bad_images() {
        assert_eq!(NoffHeader::parse(b"short"), Err(Errno::ExecFormatError));

        let mut bad_magic = NoffBuilder::new().code_words(&[1]).build();
        bad_magic[0] ^= 0xff;
        assert_eq!(NoffHeader::parse(&bad_magic), Err(Errno::ExecFormatError));

        let mut truncated = NoffBuilder::new().code_words(&[1, 2, 3]).build();
        truncated.truncate(44);
        assert_eq!(NoffHeader::parse(&truncated), Err(Errno::ExecFormatError));
    }
}

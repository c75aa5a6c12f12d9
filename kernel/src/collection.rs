//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 位图 (Bitmap)
//!
//! 固定大小的空闲/占用位向量，物理页分配器和 PID 分配器共用。
//! 位被置 1 表示占用，清 0 表示空闲。

use alloc::vec::Vec;

const BITS_PER_WORD: usize = u64::BITS as usize;

/// 固定大小的位图
#[derive(Debug, Clone)]
pub struct Bitmap {
    words: Vec<u64>,
    num_bits: usize,
}

impl Bitmap {
    /// 创建 `num_bits` 位的位图，初始全部空闲
    pub fn new(num_bits: usize) -> Self {
        let num_words = num_bits.div_ceil(BITS_PER_WORD);
        Self {
            words: alloc::vec![0; num_words],
            num_bits,
        }
    }

    /// 位图容量
    pub fn len(&self) -> usize {
        self.num_bits
    }

    pub fn is_empty(&self) -> bool {
        self.num_bits == 0
    }

    #[inline]
    fn locate(&self, which: usize) -> (usize, u64) {
        assert!(
            which < self.num_bits,
            "bitmap index {} out of range (size {})",
            which,
            self.num_bits
        );
        (which / BITS_PER_WORD, 1u64 << (which % BITS_PER_WORD))
    }

    /// 将第 `which` 位置为占用
    pub fn mark(&mut self, which: usize) {
        let (word, mask) = self.locate(which);
        self.words[word] |= mask;
    }

    /// 将第 `which` 位置为空闲
    pub fn clear(&mut self, which: usize) {
        let (word, mask) = self.locate(which);
        self.words[word] &= !mask;
    }

    /// 第 `which` 位是否被占用
    pub fn test(&self, which: usize) -> bool {
        let (word, mask) = self.locate(which);
        self.words[word] & mask != 0
    }

    /// 找到编号最小的空闲位，标记为占用并返回其编号
    ///
    /// 没有空闲位时返回 `None`。
    pub fn find(&mut self) -> Option<usize> {
        let found = self
            .words
            .iter()
            .enumerate()
            .find(|(_, word)| **word != u64::MAX)
            .map(|(index, word)| index * BITS_PER_WORD + word.trailing_ones() as usize)
            .filter(|&bit| bit < self.num_bits)?;
        self.mark(found);
        Some(found)
    }

    /// 空闲位的数量
    pub fn num_clear(&self) -> usize {
        let set: usize = self.words.iter().map(|w| w.count_ones() as usize).sum();
        self.num_bits - set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_returns_lowest_clear_bit() {
        let mut map = Bitmap::new(10);
        assert_eq!(map.find(), Some(0));
        assert_eq!(map.find(), Some(1));
        map.mark(2);
        assert_eq!(map.find(), Some(3));
        map.clear(1);
        assert_eq!(map.find(), Some(1));
    }

    #[test]
    fn find_spans_word_boundary() {
        let mut map = Bitmap::new(70);
        for i in 0..64 {
            map.mark(i);
        }
        assert_eq!(map.find(), Some(64));
        assert_eq!(map.num_clear(), 5);
    }

    #[test]
    fn find_stops_at_capacity() {
        let mut map = Bitmap::new(3);
        assert_eq!(map.find(), Some(0));
        assert_eq!(map.find(), Some(1));
        assert_eq!(map.find(), Some(2));
        assert_eq!(map.find(), None);
        assert_eq!(map.num_clear(), 0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_index_panics() {
        let map = Bitmap::new(4);
        map.test(4);
    }
}

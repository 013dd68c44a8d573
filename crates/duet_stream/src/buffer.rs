//! 播放缓冲区
//!
//! 保存已收到但尚未被解码器消费的字节，容量受高水位限制。

use std::collections::VecDeque;
use std::io::Read;

/// 缓冲区溢出（追加后会超过高水位）
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Buffer overflow: {occupancy} + {incoming} bytes exceeds high water {high_water}")]
pub struct BufferOverflow {
    pub occupancy: usize,
    pub incoming: usize,
    pub high_water: usize,
}

/// 单首歌曲的播放缓冲
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    data: VecDeque<u8>,
    low_water: usize,
    high_water: usize,
    /// 自创建或上次清空以来解码器消费的字节数
    consumed: u64,
    end_of_stream: bool,
}

impl PlaybackBuffer {
    pub fn new(low_water: usize, high_water: usize) -> Self {
        Self {
            data: VecDeque::new(),
            low_water,
            high_water,
            consumed: 0,
            end_of_stream: false,
        }
    }

    /// 当前占用字节数
    pub fn occupancy(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 距高水位的剩余空间
    pub fn free_space(&self) -> usize {
        self.high_water.saturating_sub(self.data.len())
    }

    pub fn below_low_water(&self) -> bool {
        self.data.len() < self.low_water
    }

    /// 追加 READ 数据，超过高水位时拒绝且不修改缓冲
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), BufferOverflow> {
        if bytes.len() > self.free_space() {
            return Err(BufferOverflow {
                occupancy: self.data.len(),
                incoming: bytes.len(),
                high_water: self.high_water,
            });
        }
        self.data.extend(bytes.iter().copied());
        Ok(())
    }

    /// 解码器消费数据，返回实际读取的字节数
    pub fn consume(&mut self, output: &mut [u8]) -> usize {
        let to_read = output.len().min(self.data.len());

        let (a, b) = self.data.as_slices();
        let a_len = a.len().min(to_read);
        output[..a_len].copy_from_slice(&a[..a_len]);
        let b_len = to_read - a_len;
        if b_len > 0 {
            output[a_len..to_read].copy_from_slice(&b[..b_len]);
        }

        self.data.drain(..to_read);
        self.consumed += to_read as u64;
        to_read
    }

    /// 解码游标（已消费字节数）
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// 丢弃所有缓冲数据并重置流末尾标记（SEEK / 关闭时）
    pub fn clear(&mut self) {
        self.data.clear();
        self.consumed = 0;
        self.end_of_stream = false;
    }

    pub fn mark_end_of_stream(&mut self) {
        self.end_of_stream = true;
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// 流已结束且数据已全部消费
    pub fn is_end_of_media(&self) -> bool {
        self.end_of_stream && self.data.is_empty()
    }
}

impl Read for PlaybackBuffer {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(self.consume(buf))
    }
}

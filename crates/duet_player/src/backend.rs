//! 解码/播放后端接口

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use duet_stream::{PlaybackBuffer, RemoteSong};

/// 后端错误
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Nothing loaded")]
    NotLoaded,
}

/// 解码与输出
///
/// 远程歌曲的数据只通过 [`AudioBackend::feed`] 从播放缓冲按序取得。
pub trait AudioBackend {
    /// 载入本地文件
    fn load_local(&mut self, path: &Path) -> Result<(), BackendError>;

    /// 准备播放远程歌曲（数据随后由 `feed` 提供）
    fn load_stream(&mut self, song: &RemoteSong) -> Result<(), BackendError>;

    /// 从播放缓冲消费数据，返回消费的字节数
    fn feed(&mut self, buffer: &mut PlaybackBuffer) -> Result<usize, BackendError>;

    /// 推进本地歌曲的播放，返回处理的字节数
    fn render(&mut self) -> Result<usize, BackendError> {
        Ok(0)
    }

    /// 跳转到字节偏移（远程歌曲的缓冲由流管理负责清空）
    fn seek(&mut self, position: u64) -> Result<(), BackendError>;

    fn set_paused(&mut self, paused: bool);

    /// 停止并卸载当前歌曲
    fn stop(&mut self);

    fn set_volume(&mut self, volume: f32);

    /// 本地歌曲是否播放完毕
    fn is_finished(&self) -> bool;
}

/// 把收到的字节原样写入 `W` 的后端
///
/// 每次 `feed` / `render` 至多处理 `chunk_size` 字节，模拟解码器的消费节奏。
pub struct SinkBackend<W: Write> {
    sink: W,
    chunk_size: usize,
    local: Option<File>,
    loaded: bool,
    paused: bool,
    finished: bool,
    volume: f32,
    written: u64,
}

impl<W: Write> SinkBackend<W> {
    pub fn new(sink: W, chunk_size: usize) -> Self {
        Self {
            sink,
            chunk_size: chunk_size.max(1),
            local: None,
            loaded: false,
            paused: true,
            finished: false,
            volume: 1.0,
            written: 0,
        }
    }

    /// 累计写出的字节数
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> Result<usize, BackendError> {
        self.sink.write_all(chunk)?;
        self.written += chunk.len() as u64;
        Ok(chunk.len())
    }
}

impl<W: Write> AudioBackend for SinkBackend<W> {
    fn load_local(&mut self, path: &Path) -> Result<(), BackendError> {
        self.stop();
        self.local = Some(File::open(path)?);
        self.loaded = true;
        Ok(())
    }

    fn load_stream(&mut self, _song: &RemoteSong) -> Result<(), BackendError> {
        self.stop();
        self.loaded = true;
        Ok(())
    }

    fn feed(&mut self, buffer: &mut PlaybackBuffer) -> Result<usize, BackendError> {
        if !self.loaded {
            return Err(BackendError::NotLoaded);
        }
        if self.paused {
            return Ok(0);
        }

        let mut chunk = vec![0u8; self.chunk_size];
        let n = buffer.consume(&mut chunk);
        self.write_chunk(&chunk[..n])
    }

    fn render(&mut self) -> Result<usize, BackendError> {
        if self.paused || self.finished {
            return Ok(0);
        }
        let Some(file) = self.local.as_mut() else {
            return Err(BackendError::NotLoaded);
        };

        let mut chunk = vec![0u8; self.chunk_size];
        let n = file.read(&mut chunk)?;
        if n == 0 {
            self.finished = true;
        }
        self.write_chunk(&chunk[..n])
    }

    fn seek(&mut self, position: u64) -> Result<(), BackendError> {
        if !self.loaded {
            return Err(BackendError::NotLoaded);
        }
        if let Some(file) = self.local.as_mut() {
            file.seek(SeekFrom::Start(position))?;
        }
        self.finished = false;
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    fn stop(&mut self) {
        self.local = None;
        self.loaded = false;
        self.paused = true;
        self.finished = false;
        let _ = self.sink.flush();
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

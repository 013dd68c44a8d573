//! 远程歌曲状态

use duet_proto::{SongId, SongInfo, SongSettings};

/// 单首远程歌曲的流状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    /// 服务端无游标
    #[default]
    Idle,
    Opening,
    Streaming,
    Seeking,
    Closed,
    /// 直到重新 OPEN 前不再发出请求
    Errored,
}

impl StreamState {
    /// 是否持有服务端游标（或正在建立）
    pub fn is_active(self) -> bool {
        matches!(
            self,
            StreamState::Opening | StreamState::Streaming | StreamState::Seeking
        )
    }
}

/// 远程歌曲
#[derive(Debug, Clone)]
pub struct RemoteSong {
    /// 本地曲库中的标识
    pub id: SongId,
    /// 对端曲库中的标识（协议中使用）
    pub remote_id: SongId,
    /// 服务端文件标识，对客户端不透明
    pub file_path: String,
    /// 总字节数（OPEN 之后可知）
    pub length: u32,
    pub artist: String,
    pub title: String,
    pub settings: SongSettings,
    /// 出现流错误后为 false
    pub available: bool,
    /// 服务端游标的本地镜像
    pub cursor: u32,
}

impl RemoteSong {
    pub fn new(id: SongId, remote_id: SongId, file_path: impl Into<String>) -> Self {
        Self {
            id,
            remote_id,
            file_path: file_path.into(),
            length: 0,
            artist: String::new(),
            title: String::new(),
            settings: SongSettings::default(),
            available: true,
            cursor: 0,
        }
    }

    /// 应用 OPEN 应答中的信息
    pub fn apply_info(&mut self, info: SongInfo) {
        self.length = info.length;
        if !info.artist.is_empty() {
            self.artist = info.artist;
        }
        if !info.title.is_empty() {
            self.title = info.title;
        }
        self.settings = info.settings;
        self.cursor = 0;
    }
}

/// 按对端标识查找远程歌曲
pub trait RemoteSongs {
    fn remote_song_mut(&mut self, remote_id: SongId) -> Option<&mut RemoteSong>;
}

impl RemoteSongs for RemoteSong {
    fn remote_song_mut(&mut self, remote_id: SongId) -> Option<&mut RemoteSong> {
        (self.remote_id == remote_id).then_some(self)
    }
}

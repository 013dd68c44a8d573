//! 播放命令和事件定义

use duet_proto::SongId;

/// 播放器命令（UI -> 播放器）
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    /// 切换到指定歌曲
    ChangeSong(SongId),
    Next,
    Previous,
    First,
    Play,
    Pause,
    Stop,
    Mute(bool),
    /// 设置音量 (0.0 - 1.0)
    SetVolume(f32),
    SetLoop(bool),
    /// 跳转到字节偏移
    Seek(u32),
}

/// 播放器事件（播放器 -> UI）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    /// 当前歌曲变更，`None` 表示未定义位置
    SongChanged(Option<SongId>),
    StateChanged(PlayerState),
    /// 远程歌曲已打开，长度和元数据可用
    StreamOpened(SongId),
    /// 远程歌曲出错，已标记为不可用
    StreamError(SongId),
}

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    Playing,
    Paused,
    #[default]
    Stopped,
}

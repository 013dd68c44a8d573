//! 命令定义
//!
//! 请求与应答统一为 [`Command`]，按 (song_id, command_type) 配对。

use serde::{Deserialize, Serialize};

use crate::codec;

/// 歌曲标识（在一方的曲库内唯一）
pub type SongId = u32;

/// 命令类型
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    Open = 0x01,
    Close = 0x02,
    Read = 0x03,
    Seek = 0x04,
}

impl CommandType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Self::Open),
            0x02 => Some(Self::Close),
            0x03 => Some(Self::Read),
            0x04 => Some(Self::Seek),
            _ => None,
        }
    }
}

/// 请求种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// 在服务端为该歌曲分配读游标
    Open,
    /// 释放服务端游标（幂等）
    Close,
    /// 从服务端游标处读取至多 `byte_count` 字节
    Read { byte_count: u32 },
    /// 将服务端游标移到 `position`，不传输数据
    Seek { position: u32 },
}

/// 请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub song_id: SongId,
    pub kind: RequestKind,
}

impl Request {
    pub fn open(song_id: SongId) -> Self {
        Self {
            song_id,
            kind: RequestKind::Open,
        }
    }

    pub fn close(song_id: SongId) -> Self {
        Self {
            song_id,
            kind: RequestKind::Close,
        }
    }

    pub fn read(song_id: SongId, byte_count: u32) -> Self {
        Self {
            song_id,
            kind: RequestKind::Read { byte_count },
        }
    }

    pub fn seek(song_id: SongId, position: u32) -> Self {
        Self {
            song_id,
            kind: RequestKind::Seek { position },
        }
    }

    pub fn command_type(&self) -> CommandType {
        match self.kind {
            RequestKind::Open => CommandType::Open,
            RequestKind::Close => CommandType::Close,
            RequestKind::Read { .. } => CommandType::Read,
            RequestKind::Seek { .. } => CommandType::Seek,
        }
    }
}

/// 解码参数（随 OPEN 应答下发）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SongSettings {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    /// 格式提示（扩展名，如 "mp3"）
    pub format: Option<String>,
}

impl SongSettings {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// OPEN 应答携带的歌曲信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SongInfo {
    /// 总字节数
    pub length: u32,
    pub artist: String,
    pub title: String,
    pub settings: SongSettings,
}

/// 服务端错误类型
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Unknown = 0x00,
    /// 歌曲不存在或文件无法打开
    NotFound = 0x01,
    /// 未先 OPEN
    NotOpen = 0x02,
    /// 文件或请求超出协议范围
    TooLarge = 0x03,
    Io = 0x04,
}

impl FailureKind {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0x01 => Self::NotFound,
            0x02 => Self::NotOpen,
            0x03 => Self::TooLarge,
            0x04 => Self::Io,
            _ => Self::Unknown,
        }
    }
}

/// 服务端返回的失败
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct ServerFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ServerFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// 成功应答的内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    Opened(SongInfo),
    Closed,
    /// READ 数据，到达流末尾时可能短于请求长度
    Data(Vec<u8>),
    Sought,
}

impl ReplyBody {
    pub fn command_type(&self) -> CommandType {
        match self {
            ReplyBody::Opened(_) => CommandType::Open,
            ReplyBody::Closed => CommandType::Close,
            ReplyBody::Data(_) => CommandType::Read,
            ReplyBody::Sought => CommandType::Seek,
        }
    }
}

/// 应答结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    Success(ReplyBody),
    Failure {
        command_type: CommandType,
        failure: ServerFailure,
    },
}

/// 应答
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub song_id: SongId,
    pub outcome: ReplyOutcome,
}

impl Reply {
    pub fn success(song_id: SongId, body: ReplyBody) -> Self {
        Self {
            song_id,
            outcome: ReplyOutcome::Success(body),
        }
    }

    pub fn failure(song_id: SongId, command_type: CommandType, failure: ServerFailure) -> Self {
        Self {
            song_id,
            outcome: ReplyOutcome::Failure {
                command_type,
                failure,
            },
        }
    }

    pub fn command_type(&self) -> CommandType {
        match &self.outcome {
            ReplyOutcome::Success(body) => body.command_type(),
            ReplyOutcome::Failure { command_type, .. } => *command_type,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ReplyOutcome::Success(_))
    }
}

/// 协议命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Request(Request),
    Reply(Reply),
}

impl Command {
    pub fn song_id(&self) -> SongId {
        match self {
            Command::Request(req) => req.song_id,
            Command::Reply(reply) => reply.song_id,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Command::Request(_))
    }

    pub fn is_reply(&self) -> bool {
        matches!(self, Command::Reply(_))
    }

    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Request(req) => req.command_type(),
            Command::Reply(reply) => reply.command_type(),
        }
    }

    /// 序列化为一帧
    pub fn to_frame(&self) -> Vec<u8> {
        codec::encode(self)
    }
}

impl From<Request> for Command {
    fn from(req: Request) -> Self {
        Command::Request(req)
    }
}

impl From<Reply> for Command {
    fn from(reply: Reply) -> Self {
        Command::Reply(reply)
    }
}

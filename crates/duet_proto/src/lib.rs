//! duet_proto - 远程歌曲流协议
//!
//! OPEN / CLOSE / READ / SEEK 请求与应答的类型定义及帧编解码。

mod codec;
mod command;

pub use codec::*;
pub use command::*;

/// 协议错误
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtoError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(&'static str),
}

impl ProtoError {
    /// 帧损坏意味着字节流已失去同步，连接应由传输层关闭
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, ProtoError::MalformedFrame(_))
    }
}

impl From<std::io::Error> for ProtoError {
    fn from(_: std::io::Error) -> Self {
        ProtoError::MalformedFrame("truncated frame")
    }
}

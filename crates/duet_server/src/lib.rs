//! duet_server - 歌曲服务端
//!
//! 向对端提供本地曲库，执行 OPEN / CLOSE / READ / SEEK 请求。

mod library;
mod probe;
mod server;

pub use library::*;
pub use probe::*;
pub use server::*;

/// 服务端错误
#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Protocol error: {0}")]
    Proto(#[from] duet_proto::ProtoError),
}

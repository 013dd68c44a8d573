//! duet_stream - 远程歌曲流
//!
//! 客户端侧的请求分发、远程歌曲状态与流缓冲管理。

mod buffer;
mod config;
mod dispatcher;
mod manager;
mod song;
mod transport;

pub use buffer::*;
pub use config::*;
pub use dispatcher::*;
pub use manager::*;
pub use song::*;
pub use transport::*;

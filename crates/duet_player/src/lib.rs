//! duet_player - 播放器
//!
//! 管理本地与远程歌曲的曲库，选择和切换当前歌曲，
//! 并驱动远程歌曲的流缓冲。

mod backend;
mod catalog;
mod command;
mod player;

pub use backend::*;
pub use catalog::*;
pub use command::*;
pub use player::*;

//! 请求执行
//!
//! 每个连接一个 [`SongServer`]，为打开的歌曲各维护一个读游标。

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use duet_proto::{
    Command, FailureKind, ProtoError, Reply, ReplyBody, Request, RequestKind, ServerFailure,
    SongId, SongInfo,
};
use duet_stream::{ChannelTransport, Transport};
use tracing::{debug, info, warn};

use crate::{probe_meta, Library, ServerError};

/// 单次 READ 的上限
pub const MAX_READ_SIZE: u32 = 16 * 1024 * 1024; // 16MB

struct OpenSong {
    file: File,
}

/// 歌曲服务端
pub struct SongServer {
    library: Library,
    open: HashMap<SongId, OpenSong>,
    max_read: u32,
}

impl SongServer {
    pub fn new(library: Library) -> Self {
        Self {
            library,
            open: HashMap::new(),
            max_read: MAX_READ_SIZE,
        }
    }

    pub fn with_max_read(mut self, max_read: u32) -> Self {
        self.max_read = max_read;
        self
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    /// 当前持有游标的歌曲数
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// 执行请求，总是产生一个应答
    pub fn execute(&mut self, request: &Request) -> Reply {
        let song_id = request.song_id;
        let result = match request.kind {
            RequestKind::Open => self.open(song_id).map(ReplyBody::Opened),
            RequestKind::Close => {
                self.open.remove(&song_id);
                Ok(ReplyBody::Closed)
            }
            RequestKind::Read { byte_count } => self.read(song_id, byte_count).map(ReplyBody::Data),
            RequestKind::Seek { position } => {
                self.seek(song_id, position).map(|_| ReplyBody::Sought)
            }
        };

        match result {
            Ok(body) => Reply::success(song_id, body),
            Err(failure) => {
                warn!(song_id, kind = ?request.kind, %failure, "request failed");
                Reply::failure(song_id, request.command_type(), failure)
            }
        }
    }

    fn open(&mut self, song_id: SongId) -> Result<SongInfo, ServerFailure> {
        let entry = self.library.get(song_id).ok_or_else(|| {
            ServerFailure::new(FailureKind::NotFound, format!("unknown song {song_id}"))
        })?;
        let file = File::open(&entry.path)
            .map_err(|e| ServerFailure::new(FailureKind::NotFound, e.to_string()))?;
        let size = file.metadata().map_err(io_failure)?.len();
        let length = u32::try_from(size).map_err(|_| {
            ServerFailure::new(FailureKind::TooLarge, format!("file is {size} bytes"))
        })?;

        let meta = probe_meta(&entry.path);
        info!(song_id, length, path = %entry.path.display(), "song opened");

        // 重复 OPEN 重置游标
        self.open.insert(song_id, OpenSong { file });
        Ok(SongInfo {
            length,
            artist: meta.artist,
            title: meta.title,
            settings: meta.settings,
        })
    }

    fn read(&mut self, song_id: SongId, byte_count: u32) -> Result<Vec<u8>, ServerFailure> {
        if byte_count > self.max_read {
            return Err(ServerFailure::new(
                FailureKind::TooLarge,
                format!("read of {byte_count} bytes exceeds {}", self.max_read),
            ));
        }
        let song = self.open.get_mut(&song_id).ok_or_else(|| not_open(song_id))?;

        // 只在文件末尾返回短读
        let mut data = Vec::with_capacity(byte_count as usize);
        (&mut song.file)
            .take(u64::from(byte_count))
            .read_to_end(&mut data)
            .map_err(io_failure)?;
        debug!(song_id, requested = byte_count, returned = data.len(), "read");
        Ok(data)
    }

    fn seek(&mut self, song_id: SongId, position: u32) -> Result<(), ServerFailure> {
        let song = self.open.get_mut(&song_id).ok_or_else(|| not_open(song_id))?;
        // 越过文件末尾是允许的，之后的 READ 返回 0 字节
        song.file
            .seek(SeekFrom::Start(u64::from(position)))
            .map_err(io_failure)?;
        debug!(song_id, position, "seek");
        Ok(())
    }

    /// 处理一帧入站数据，返回要回写的应答帧
    ///
    /// 收到应答帧时忽略；帧损坏时返回错误，连接应被关闭。
    pub fn handle_frame(&mut self, frame: &[u8]) -> Result<Option<Vec<u8>>, ProtoError> {
        match duet_proto::decode(frame)? {
            Command::Request(request) => {
                let reply = self.execute(&request);
                Ok(Some(Command::Reply(reply).to_frame()))
            }
            Command::Reply(reply) => {
                warn!(song_id = reply.song_id, "reply received on server side, dropped");
                Ok(None)
            }
        }
    }

    /// 阻塞服务一个连接，直到对端断开
    ///
    /// 连接结束时释放所有游标。
    pub fn serve(&mut self, transport: &mut ChannelTransport) -> Result<(), ServerError> {
        let result = self.serve_frames(transport);
        self.open.clear();
        result
    }

    fn serve_frames(&mut self, transport: &mut ChannelTransport) -> Result<(), ServerError> {
        while let Ok(frame) = transport.recv_frame() {
            if let Some(reply) = self.handle_frame(&frame)? {
                if transport.send_frame(reply).is_err() {
                    break;
                }
            }
        }
        info!("peer disconnected");
        Ok(())
    }
}

fn not_open(song_id: SongId) -> ServerFailure {
    ServerFailure::new(FailureKind::NotOpen, format!("song {song_id} is not open"))
}

fn io_failure(e: std::io::Error) -> ServerFailure {
    ServerFailure::new(FailureKind::Io, e.to_string())
}

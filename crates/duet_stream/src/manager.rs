//! 流缓冲管理
//!
//! 按解码器的消费情况与低水位决定何时发出 READ，
//! 并把收到的数据送入播放缓冲区。每首歌一个状态机：
//!
//! ```text
//! Idle -> Opening -> Streaming <-> Seeking -> Closed
//!            \___________\____________\-----> Errored
//! ```

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Instant;

use duet_proto::{ReplyBody, ReplyOutcome, Request, SongId};
use tracing::{debug, error, info, warn};

use crate::{
    ConfigError, DispatchError, Dispatcher, Outcome, PlaybackBuffer, RemoteSong, RemoteSongs,
    Resolved, StreamConfig, StreamState, Transport,
};

/// 流错误
#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Song {0} is not streaming")]
    NotStreaming(SongId),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// 流事件（歌曲标识为本地曲库标识）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    Opened { song_id: SongId },
    EndOfStream { song_id: SongId },
    Error { song_id: SongId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReadRange {
    start: u32,
    count: u32,
}

/// 本地记录的在途请求，与分发器中的条目一一对应
#[derive(Debug, Clone, Copy)]
enum InFlight {
    Open,
    Read(ReadRange),
    /// `retry` 为重试 READ 前的游标同步
    Seek {
        position: u32,
        retry: Option<ReadRange>,
    },
}

struct StreamContext<'a> {
    dispatcher: &'a mut Dispatcher,
    config: &'a StreamConfig,
    events: &'a mut Vec<StreamEvent>,
}

struct SongStream {
    song_id: SongId,
    state: StreamState,
    buffer: PlaybackBuffer,
    in_flight: Option<InFlight>,
    /// 连续失败次数
    failures: u8,
    /// 等待发出或在途的 SEEK 目标
    seek_target: Option<u32>,
}

impl SongStream {
    fn new(song_id: SongId, config: &StreamConfig) -> Self {
        Self {
            song_id,
            state: StreamState::Idle,
            buffer: new_buffer(config),
            in_flight: None,
            failures: 0,
            seek_target: None,
        }
    }

    fn send(
        &mut self,
        song: &mut RemoteSong,
        ctx: &mut StreamContext<'_>,
        request: Request,
        in_flight: InFlight,
    ) -> Result<(), DispatchError> {
        match ctx.dispatcher.submit(request) {
            Ok(()) => {
                self.in_flight = Some(in_flight);
                Ok(())
            }
            Err(e) => {
                warn!(song_id = self.song_id, error = %e, "failed to send request");
                self.enter_errored(song, ctx);
                Err(e)
            }
        }
    }

    /// 没有在途请求时推进状态机
    fn advance(&mut self, song: &mut RemoteSong, ctx: &mut StreamContext<'_>) {
        if self.in_flight.is_some() {
            return;
        }

        match self.state {
            StreamState::Seeking => {
                if let Some(position) = self.seek_target {
                    let _ = self.send(
                        song,
                        ctx,
                        Request::seek(song.remote_id, position),
                        InFlight::Seek {
                            position,
                            retry: None,
                        },
                    );
                }
            }
            StreamState::Streaming => self.request_more(song, ctx),
            _ => {}
        }
    }

    fn request_more(&mut self, song: &mut RemoteSong, ctx: &mut StreamContext<'_>) {
        if self.buffer.is_end_of_stream() || !self.buffer.below_low_water() {
            return;
        }

        // 请求长度不超过剩余空间，保证缓冲永不越过高水位
        let count = (ctx.config.read_size as usize).min(self.buffer.free_space()) as u32;
        if count == 0 {
            return;
        }

        let range = ReadRange {
            start: song.cursor,
            count,
        };
        self.send_read(song, ctx, range);
    }

    fn send_read(&mut self, song: &mut RemoteSong, ctx: &mut StreamContext<'_>, range: ReadRange) {
        let request = Request::read(song.remote_id, range.count);
        if self.send(song, ctx, request, InFlight::Read(range)).is_ok() {
            // 乐观推进，应答到达时按实际字节数校正
            song.cursor = range.start.saturating_add(range.count);
        }
    }

    fn on_outcome(
        &mut self,
        song: &mut RemoteSong,
        ctx: &mut StreamContext<'_>,
        in_flight: InFlight,
        outcome: Outcome,
    ) {
        match in_flight {
            InFlight::Open => self.on_open(song, ctx, outcome),
            InFlight::Read(range) => self.on_read(song, ctx, range, outcome),
            InFlight::Seek { position, retry } => self.on_seek(song, ctx, position, retry, outcome),
        }
    }

    fn on_open(&mut self, song: &mut RemoteSong, ctx: &mut StreamContext<'_>, outcome: Outcome) {
        match outcome.map(|reply| reply.outcome) {
            Ok(ReplyOutcome::Success(ReplyBody::Opened(info))) => {
                song.apply_info(info);
                song.available = true;
                self.failures = 0;
                self.state = if self.seek_target.is_some() {
                    StreamState::Seeking
                } else {
                    StreamState::Streaming
                };
                info!(song_id = self.song_id, length = song.length, "stream opened");
                ctx.events.push(StreamEvent::Opened {
                    song_id: self.song_id,
                });
            }
            Err(DispatchError::RequestTimeout { .. }) if self.failures == 0 => {
                self.failures = 1;
                debug!(song_id = self.song_id, "retrying open");
                let _ = self.send(song, ctx, Request::open(song.remote_id), InFlight::Open);
            }
            Ok(ReplyOutcome::Failure { failure, .. }) => {
                warn!(song_id = self.song_id, %failure, "open rejected by peer");
                self.enter_errored(song, ctx);
            }
            other => {
                warn!(song_id = self.song_id, outcome = ?other.err(), "open failed");
                self.enter_errored(song, ctx);
            }
        }
    }

    fn on_read(
        &mut self,
        song: &mut RemoteSong,
        ctx: &mut StreamContext<'_>,
        range: ReadRange,
        outcome: Outcome,
    ) {
        if self.state == StreamState::Seeking {
            // 数据已过时，随后发出排队的 SEEK
            debug!(song_id = self.song_id, "discarding read reply superseded by seek");
            return;
        }

        let bytes = match outcome.map(|reply| reply.outcome) {
            Ok(ReplyOutcome::Success(ReplyBody::Data(bytes))) => bytes,
            Ok(ReplyOutcome::Failure { failure, .. }) => {
                warn!(song_id = self.song_id, %failure, "read rejected by peer");
                self.read_failed(song, ctx, range);
                return;
            }
            other => {
                warn!(song_id = self.song_id, outcome = ?other.err(), "read failed");
                self.read_failed(song, ctx, range);
                return;
            }
        };

        if bytes.len() > range.count as usize {
            warn!(
                song_id = self.song_id,
                requested = range.count,
                received = bytes.len(),
                "peer returned more bytes than requested"
            );
            self.read_failed(song, ctx, range);
            return;
        }
        if let Err(overflow) = self.buffer.append(&bytes) {
            warn!(song_id = self.song_id, %overflow, "read reply does not fit");
            self.read_failed(song, ctx, range);
            return;
        }

        let received = bytes.len() as u32;
        song.cursor = range.start.saturating_add(received);
        self.failures = 0;
        debug!(
            song_id = self.song_id,
            received,
            cursor = song.cursor,
            occupancy = self.buffer.occupancy(),
            "read reply buffered"
        );

        if received < range.count {
            self.buffer.mark_end_of_stream();
            info!(song_id = self.song_id, cursor = song.cursor, "end of stream");
            ctx.events.push(StreamEvent::EndOfStream {
                song_id: self.song_id,
            });
        }
    }

    /// READ 失败：先 SEEK 回区间起点同步服务端游标，再重读同一区间
    fn read_failed(
        &mut self,
        song: &mut RemoteSong,
        ctx: &mut StreamContext<'_>,
        range: ReadRange,
    ) {
        song.cursor = range.start;
        self.failures = self.failures.saturating_add(1);
        if self.failures > 1 {
            self.enter_errored(song, ctx);
            return;
        }

        debug!(song_id = self.song_id, start = range.start, "retrying read");
        let _ = self.send(
            song,
            ctx,
            Request::seek(song.remote_id, range.start),
            InFlight::Seek {
                position: range.start,
                retry: Some(range),
            },
        );
    }

    fn on_seek(
        &mut self,
        song: &mut RemoteSong,
        ctx: &mut StreamContext<'_>,
        position: u32,
        retry: Option<ReadRange>,
        outcome: Outcome,
    ) {
        match outcome.map(|reply| reply.outcome) {
            Ok(ReplyOutcome::Success(ReplyBody::Sought)) => {
                song.cursor = position;
                match (self.seek_target, retry) {
                    // 期间又有新的 SEEK，保持 Seeking 等待 advance 发出
                    (Some(target), _) if target != position => {}
                    (None, Some(range)) => self.send_read(song, ctx, range),
                    _ => {
                        self.seek_target = None;
                        self.failures = 0;
                        self.state = StreamState::Streaming;
                        info!(song_id = self.song_id, position, "seek complete");
                    }
                }
            }
            Ok(ReplyOutcome::Failure { failure, .. }) => {
                warn!(song_id = self.song_id, %failure, "seek rejected by peer");
                self.enter_errored(song, ctx);
            }
            other => {
                warn!(song_id = self.song_id, outcome = ?other.err(), "seek failed");
                self.enter_errored(song, ctx);
            }
        }
    }

    fn enter_errored(&mut self, song: &mut RemoteSong, ctx: &mut StreamContext<'_>) {
        if self.state == StreamState::Errored {
            return;
        }

        ctx.dispatcher.abandon(song.remote_id);
        self.in_flight = None;
        self.seek_target = None;
        self.failures = 0;
        self.buffer = new_buffer(ctx.config);
        self.state = StreamState::Errored;
        song.available = false;

        error!(song_id = self.song_id, "stream error");
        ctx.events.push(StreamEvent::Error {
            song_id: self.song_id,
        });
    }
}

fn new_buffer(config: &StreamConfig) -> PlaybackBuffer {
    PlaybackBuffer::new(config.low_water as usize, config.high_water as usize)
}

/// 流缓冲管理器
pub struct StreamManager {
    dispatcher: Dispatcher,
    config: StreamConfig,
    /// 按对端标识索引
    streams: HashMap<SongId, SongStream>,
    events: Vec<StreamEvent>,
}

impl StreamManager {
    pub fn new(transport: Box<dyn Transport>, config: StreamConfig) -> Result<Self, StreamError> {
        config.validate()?;
        Ok(Self {
            dispatcher: Dispatcher::new(transport, config.request_timeout()),
            config,
            streams: HashMap::new(),
            events: Vec::new(),
        })
    }

    /// 发出 OPEN（Idle / Closed / Errored -> Opening）
    pub fn open(&mut self, song: &mut RemoteSong) -> Result<(), StreamError> {
        let Self {
            dispatcher,
            config,
            streams,
            events,
        } = self;

        if streams
            .get(&song.remote_id)
            .is_some_and(|s| s.state.is_active())
        {
            return Ok(());
        }

        dispatcher.abandon(song.remote_id);
        let mut ctx = StreamContext {
            dispatcher,
            config,
            events,
        };
        let mut fresh = SongStream::new(song.id, ctx.config);
        fresh.state = StreamState::Opening;
        let stream = match streams.entry(song.remote_id) {
            Entry::Occupied(mut entry) => {
                entry.insert(fresh);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(fresh),
        };
        song.cursor = 0;

        info!(song_id = song.id, remote_id = song.remote_id, "opening stream");
        stream.send(song, &mut ctx, Request::open(song.remote_id), InFlight::Open)?;
        Ok(())
    }

    /// 跳转：立即清空缓冲，有在途请求时 SEEK 排队
    pub fn seek(&mut self, song: &mut RemoteSong, position: u32) -> Result<(), StreamError> {
        let Self {
            dispatcher,
            config,
            streams,
            events,
        } = self;

        let stream = streams
            .get_mut(&song.remote_id)
            .filter(|s| s.state.is_active())
            .ok_or(StreamError::NotStreaming(song.id))?;

        stream.buffer.clear();
        stream.seek_target = Some(position);
        stream.failures = 0;
        if stream.state != StreamState::Opening {
            stream.state = StreamState::Seeking;
        }
        debug!(song_id = song.id, position, "seek requested");

        let mut ctx = StreamContext {
            dispatcher,
            config,
            events,
        };
        stream.advance(song, &mut ctx);
        Ok(())
    }

    /// 关闭：放弃在途请求，发出不跟踪的 CLOSE，丢弃缓冲
    pub fn close(&mut self, remote_id: SongId) {
        let Some(stream) = self.streams.get_mut(&remote_id) else {
            return;
        };
        if stream.state == StreamState::Closed {
            return;
        }

        let holds_cursor = stream.state.is_active() || stream.state == StreamState::Errored;
        self.dispatcher.abandon(remote_id);
        stream.in_flight = None;
        stream.seek_target = None;
        stream.failures = 0;
        stream.buffer = new_buffer(&self.config);
        stream.state = StreamState::Closed;

        if holds_cursor {
            if let Err(e) = self.dispatcher.send_untracked(Request::close(remote_id)) {
                debug!(remote_id, error = %e, "close not delivered");
            }
        }
        info!(song_id = stream.song_id, "stream closed");
    }

    /// 关闭并移除流记录（歌曲离开曲库时）
    pub fn remove(&mut self, remote_id: SongId) {
        self.close(remote_id);
        self.streams.remove(&remote_id);
    }

    /// 处理一帧入站数据
    pub fn on_frame_received<S: RemoteSongs + ?Sized>(
        &mut self,
        frame: &[u8],
        songs: &mut S,
    ) -> Result<(), StreamError> {
        match self.dispatcher.on_frame_received(frame) {
            Ok(resolved) => {
                self.on_resolved(resolved, songs);
                Ok(())
            }
            Err(e @ DispatchError::Proto(_)) => {
                error!(error = %e, "malformed frame, connection is unusable");
                self.fail_all(songs);
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 处理传输层中所有已到达的帧，返回处理的帧数
    pub fn pump<S: RemoteSongs + ?Sized>(&mut self, songs: &mut S) -> Result<usize, StreamError> {
        let mut handled = 0;
        loop {
            let frame = match self.dispatcher.poll_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    if self.has_active_streams() {
                        error!(error = %e, "transport lost");
                        self.fail_all(songs);
                    }
                    return Err(e.into());
                }
            };
            handled += 1;

            match self.on_frame_received(&frame, songs) {
                Ok(()) | Err(StreamError::Dispatch(DispatchError::UnexpectedReply { .. })) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(handled)
    }

    /// 处理超时并为低于低水位的流补发 READ
    pub fn tick<S: RemoteSongs + ?Sized>(&mut self, now: Instant, songs: &mut S) {
        for resolved in self.dispatcher.tick(now) {
            self.on_resolved(resolved, songs);
        }
        self.refill(songs);
    }

    /// 为所有活动流推进一次（解码器消费后调用）
    pub fn refill<S: RemoteSongs + ?Sized>(&mut self, songs: &mut S) {
        let Self {
            dispatcher,
            config,
            streams,
            events,
        } = self;
        let mut ctx = StreamContext {
            dispatcher,
            config,
            events,
        };

        for (remote_id, stream) in streams.iter_mut() {
            if !matches!(stream.state, StreamState::Streaming | StreamState::Seeking) {
                continue;
            }
            if let Some(song) = songs.remote_song_mut(*remote_id) {
                stream.advance(song, &mut ctx);
            }
        }
    }

    fn on_resolved<S: RemoteSongs + ?Sized>(&mut self, resolved: Resolved, songs: &mut S) {
        let remote_id = resolved.request.song_id;
        let Self {
            dispatcher,
            config,
            streams,
            events,
        } = self;

        let Some(song) = songs.remote_song_mut(remote_id) else {
            warn!(remote_id, "reply for a song no longer in the catalog");
            dispatcher.abandon(remote_id);
            streams.remove(&remote_id);
            return;
        };
        let Some(stream) = streams.get_mut(&remote_id) else {
            debug!(remote_id, "reply for an unknown stream dropped");
            return;
        };
        let Some(in_flight) = stream.in_flight.take() else {
            debug!(remote_id, "reply without local in-flight record dropped");
            return;
        };

        let mut ctx = StreamContext {
            dispatcher,
            config,
            events,
        };
        stream.on_outcome(song, &mut ctx, in_flight, resolved.outcome);
        stream.advance(song, &mut ctx);
    }

    /// 连接不可用：所有活动流进入 Errored
    fn fail_all<S: RemoteSongs + ?Sized>(&mut self, songs: &mut S) {
        let Self {
            dispatcher,
            config,
            streams,
            events,
        } = self;
        let mut ctx = StreamContext {
            dispatcher,
            config,
            events,
        };

        for (remote_id, stream) in streams.iter_mut() {
            if !stream.state.is_active() {
                continue;
            }
            if let Some(song) = songs.remote_song_mut(*remote_id) {
                stream.enter_errored(song, &mut ctx);
            }
        }
    }

    fn has_active_streams(&self) -> bool {
        self.streams.values().any(|s| s.state.is_active())
    }

    /// 流状态（从未打开过的歌曲为 Idle）
    pub fn state(&self, remote_id: SongId) -> StreamState {
        self.streams
            .get(&remote_id)
            .map(|s| s.state)
            .unwrap_or_default()
    }

    pub fn buffer(&self, remote_id: SongId) -> Option<&PlaybackBuffer> {
        self.streams.get(&remote_id).map(|s| &s.buffer)
    }

    pub fn buffer_mut(&mut self, remote_id: SongId) -> Option<&mut PlaybackBuffer> {
        self.streams.get_mut(&remote_id).map(|s| &mut s.buffer)
    }

    /// 流已结束且缓冲已被解码器读完
    pub fn is_end_of_media(&self, remote_id: SongId) -> bool {
        self.streams
            .get(&remote_id)
            .is_some_and(|s| s.state == StreamState::Streaming && s.buffer.is_end_of_media())
    }

    /// 取出累积的事件
    pub fn drain_events(&mut self) -> Vec<StreamEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChannelTransport;
    use duet_proto::{Command, CommandType, FailureKind, Reply, ServerFailure, SongInfo};
    use std::io::Read;
    use std::time::Duration;

    fn config() -> StreamConfig {
        StreamConfig {
            request_timeout_ms: 100,
            read_size: 256,
            low_water: 512,
            high_water: 1024,
        }
    }

    fn manager(config: StreamConfig) -> (StreamManager, ChannelTransport) {
        let (client, peer) = ChannelTransport::pair();
        (StreamManager::new(Box::new(client), config).unwrap(), peer)
    }

    fn expect_request(peer: &mut ChannelTransport) -> Request {
        let frame = peer.try_recv_frame().unwrap().expect("no request sent");
        match duet_proto::decode(&frame).unwrap() {
            Command::Request(request) => request,
            other => panic!("unexpected command: {other:?}"),
        }
    }

    fn respond(peer: &mut ChannelTransport, reply: Reply) {
        peer.send_frame(Command::Reply(reply).to_frame()).unwrap();
    }

    fn opened(remote_id: SongId, length: u32) -> Reply {
        Reply::success(
            remote_id,
            ReplyBody::Opened(SongInfo {
                length,
                artist: "Artist".into(),
                title: "Title".into(),
                ..Default::default()
            }),
        )
    }

    fn data(remote_id: SongId, len: usize) -> Reply {
        Reply::success(remote_id, ReplyBody::Data(vec![0x5a; len]))
    }

    fn later() -> Instant {
        Instant::now() + Duration::from_secs(1)
    }

    /// 打开并完成 OPEN 握手，返回首个 READ
    fn open_streaming(
        mgr: &mut StreamManager,
        peer: &mut ChannelTransport,
        song: &mut RemoteSong,
        length: u32,
    ) -> Request {
        mgr.open(song).unwrap();
        assert_eq!(expect_request(peer), Request::open(song.remote_id));
        respond(peer, opened(song.remote_id, length));
        assert_eq!(mgr.pump(song).unwrap(), 1);
        expect_request(peer)
    }

    #[test]
    fn test_open_read_seek_until_end_of_media() {
        let (mut mgr, mut peer) = manager(config());
        let mut song = RemoteSong::new(1, 7, "song.mp3");

        mgr.open(&mut song).unwrap();
        assert_eq!(mgr.state(7), StreamState::Opening);
        assert_eq!(expect_request(&mut peer), Request::open(7));

        respond(&mut peer, opened(7, 1000));
        mgr.pump(&mut song).unwrap();
        assert_eq!(mgr.state(7), StreamState::Streaming);
        assert_eq!(song.length, 1000);
        assert_eq!(song.title, "Title");
        assert_eq!(expect_request(&mut peer), Request::read(7, 256));

        respond(&mut peer, data(7, 256));
        mgr.pump(&mut song).unwrap();
        assert_eq!(mgr.buffer(7).unwrap().occupancy(), 256);
        // 仍低于低水位，继续请求
        assert_eq!(expect_request(&mut peer), Request::read(7, 256));

        // READ 在途时跳转：缓冲立即清空，SEEK 排队
        mgr.seek(&mut song, 800).unwrap();
        assert_eq!(mgr.state(7), StreamState::Seeking);
        assert!(mgr.buffer(7).unwrap().is_empty());
        assert_eq!(peer.try_recv_frame().unwrap(), None);

        // 过时的 READ 应答被丢弃，随后发出 SEEK
        respond(&mut peer, data(7, 256));
        mgr.pump(&mut song).unwrap();
        assert!(mgr.buffer(7).unwrap().is_empty());
        assert_eq!(expect_request(&mut peer), Request::seek(7, 800));

        respond(&mut peer, Reply::success(7, ReplyBody::Sought));
        mgr.pump(&mut song).unwrap();
        assert_eq!(mgr.state(7), StreamState::Streaming);
        assert_eq!(expect_request(&mut peer), Request::read(7, 256));

        // 短读表示流结束
        respond(&mut peer, data(7, 200));
        mgr.pump(&mut song).unwrap();
        assert_eq!(song.cursor, 1000);
        assert_eq!(peer.try_recv_frame().unwrap(), None);
        assert!(!mgr.is_end_of_media(7));

        let mut decoded = Vec::new();
        mgr.buffer_mut(7).unwrap().read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded.len(), 200);
        assert!(mgr.is_end_of_media(7));

        assert_eq!(
            mgr.drain_events(),
            vec![
                StreamEvent::Opened { song_id: 1 },
                StreamEvent::EndOfStream { song_id: 1 }
            ]
        );
    }

    #[test]
    fn test_open_times_out_twice_then_errors() {
        let (mut mgr, mut peer) = manager(config());
        let mut song = RemoteSong::new(2, 3, "missing.flac");

        mgr.open(&mut song).unwrap();
        assert_eq!(expect_request(&mut peer), Request::open(3));

        mgr.tick(later(), &mut song);
        assert_eq!(expect_request(&mut peer), Request::open(3));
        assert_eq!(mgr.state(3), StreamState::Opening);
        assert!(mgr.drain_events().is_empty());

        mgr.tick(later(), &mut song);
        assert_eq!(mgr.state(3), StreamState::Errored);
        assert!(!song.available);
        assert_eq!(mgr.dispatcher().pending_count(), 0);
        assert_eq!(mgr.drain_events(), vec![StreamEvent::Error { song_id: 2 }]);
        assert_eq!(peer.try_recv_frame().unwrap(), None);

        // 出错后不再发出请求
        mgr.tick(later(), &mut song);
        mgr.refill(&mut song);
        assert_eq!(peer.try_recv_frame().unwrap(), None);
        assert!(mgr.drain_events().is_empty());
    }

    #[test]
    fn test_open_rejected_by_peer() {
        let (mut mgr, mut peer) = manager(config());
        let mut song = RemoteSong::new(2, 3, "missing.flac");

        mgr.open(&mut song).unwrap();
        expect_request(&mut peer);
        respond(
            &mut peer,
            Reply::failure(
                3,
                CommandType::Open,
                ServerFailure::new(FailureKind::NotFound, "no such song"),
            ),
        );
        mgr.pump(&mut song).unwrap();

        assert_eq!(mgr.state(3), StreamState::Errored);
        assert_eq!(mgr.drain_events(), vec![StreamEvent::Error { song_id: 2 }]);
        assert_eq!(peer.try_recv_frame().unwrap(), None);
    }

    #[test]
    fn test_close_abandons_pending_and_drops_late_reply() {
        let (mut mgr, mut peer) = manager(config());
        let mut song = RemoteSong::new(1, 7, "song.mp3");
        open_streaming(&mut mgr, &mut peer, &mut song, 1000);
        assert_eq!(mgr.dispatcher().pending_count(), 1);

        mgr.close(7);
        assert_eq!(mgr.state(7), StreamState::Closed);
        assert_eq!(mgr.dispatcher().pending_count(), 0);
        assert!(mgr.buffer(7).unwrap().is_empty());
        assert_eq!(expect_request(&mut peer), Request::close(7));

        respond(&mut peer, data(7, 256));
        assert_eq!(mgr.pump(&mut song).unwrap(), 1);
        assert_eq!(mgr.state(7), StreamState::Closed);
        assert!(mgr.buffer(7).unwrap().is_empty());

        // 重复关闭不再发出 CLOSE
        mgr.close(7);
        assert_eq!(peer.try_recv_frame().unwrap(), None);
    }

    #[test]
    fn test_reads_never_exceed_high_water() {
        let (mut mgr, mut peer) = manager(StreamConfig {
            read_size: 768,
            ..config()
        });
        let mut song = RemoteSong::new(1, 7, "song.mp3");
        assert_eq!(
            open_streaming(&mut mgr, &mut peer, &mut song, 10_000),
            Request::read(7, 768)
        );

        respond(&mut peer, data(7, 768));
        mgr.pump(&mut song).unwrap();
        // 高于低水位，不再请求
        assert_eq!(peer.try_recv_frame().unwrap(), None);

        let mut out = [0u8; 300];
        assert_eq!(mgr.buffer_mut(7).unwrap().consume(&mut out), 300);
        mgr.refill(&mut song);
        // 请求长度被剩余空间截断：1024 - 468
        assert_eq!(expect_request(&mut peer), Request::read(7, 556));

        respond(&mut peer, data(7, 556));
        mgr.pump(&mut song).unwrap();
        assert_eq!(mgr.buffer(7).unwrap().occupancy(), 1024);
        assert_eq!(song.cursor, 768 + 556);
    }

    #[test]
    fn test_read_failure_resyncs_and_retries_once() {
        let (mut mgr, mut peer) = manager(config());
        let mut song = RemoteSong::new(1, 7, "song.mp3");
        open_streaming(&mut mgr, &mut peer, &mut song, 1000);

        let io_failure = || {
            Reply::failure(
                7,
                CommandType::Read,
                ServerFailure::new(FailureKind::Io, "disk error"),
            )
        };

        respond(&mut peer, io_failure());
        mgr.pump(&mut song).unwrap();
        assert_eq!(expect_request(&mut peer), Request::seek(7, 0));
        assert_eq!(mgr.state(7), StreamState::Streaming);

        respond(&mut peer, Reply::success(7, ReplyBody::Sought));
        mgr.pump(&mut song).unwrap();
        assert_eq!(expect_request(&mut peer), Request::read(7, 256));

        // 重试仍失败则进入 Errored
        respond(&mut peer, io_failure());
        mgr.pump(&mut song).unwrap();
        assert_eq!(mgr.state(7), StreamState::Errored);
        assert!(!song.available);
        assert_eq!(
            mgr.drain_events(),
            vec![
                StreamEvent::Opened { song_id: 1 },
                StreamEvent::Error { song_id: 1 }
            ]
        );
        assert_eq!(peer.try_recv_frame().unwrap(), None);

        // 重新 OPEN 可恢复
        mgr.open(&mut song).unwrap();
        assert_eq!(mgr.state(7), StreamState::Opening);
        assert_eq!(expect_request(&mut peer), Request::open(7));
    }

    #[test]
    fn test_read_timeout_is_retried() {
        let (mut mgr, mut peer) = manager(config());
        let mut song = RemoteSong::new(1, 7, "song.mp3");
        open_streaming(&mut mgr, &mut peer, &mut song, 1000);

        mgr.tick(later(), &mut song);
        assert_eq!(expect_request(&mut peer), Request::seek(7, 0));
        respond(&mut peer, Reply::success(7, ReplyBody::Sought));
        mgr.pump(&mut song).unwrap();
        assert_eq!(expect_request(&mut peer), Request::read(7, 256));

        respond(&mut peer, data(7, 256));
        mgr.pump(&mut song).unwrap();
        assert_eq!(mgr.state(7), StreamState::Streaming);
        assert_eq!(mgr.buffer(7).unwrap().occupancy(), 256);
    }

    #[test]
    fn test_seek_during_open_is_queued() {
        let (mut mgr, mut peer) = manager(config());
        let mut song = RemoteSong::new(1, 7, "song.mp3");

        mgr.open(&mut song).unwrap();
        expect_request(&mut peer);
        mgr.seek(&mut song, 300).unwrap();
        assert_eq!(mgr.state(7), StreamState::Opening);
        assert_eq!(peer.try_recv_frame().unwrap(), None);

        respond(&mut peer, opened(7, 1000));
        mgr.pump(&mut song).unwrap();
        assert_eq!(mgr.state(7), StreamState::Seeking);
        assert_eq!(expect_request(&mut peer), Request::seek(7, 300));

        respond(&mut peer, Reply::success(7, ReplyBody::Sought));
        mgr.pump(&mut song).unwrap();
        assert_eq!(song.cursor, 300 + 256);
        assert_eq!(expect_request(&mut peer), Request::read(7, 256));
    }

    #[test]
    fn test_seek_requires_open_stream() {
        let (mut mgr, _peer) = manager(config());
        let mut song = RemoteSong::new(1, 7, "song.mp3");
        assert!(matches!(
            mgr.seek(&mut song, 10),
            Err(StreamError::NotStreaming(1))
        ));
    }

    #[test]
    fn test_seek_rejected_by_peer_errors_stream() {
        let (mut mgr, mut peer) = manager(config());
        let mut song = RemoteSong::new(1, 7, "song.mp3");
        open_streaming(&mut mgr, &mut peer, &mut song, 4096);

        mgr.seek(&mut song, 2000).unwrap();
        respond(&mut peer, data(7, 256));
        mgr.pump(&mut song).unwrap();
        assert_eq!(expect_request(&mut peer), Request::seek(7, 2000));
        mgr.drain_events();

        respond(
            &mut peer,
            Reply::failure(
                7,
                CommandType::Seek,
                ServerFailure::new(FailureKind::NotOpen, "no cursor"),
            ),
        );
        mgr.pump(&mut song).unwrap();

        assert_eq!(mgr.state(7), StreamState::Errored);
        assert!(!song.available);
        assert_eq!(mgr.dispatcher().pending_count(), 0);
        assert_eq!(mgr.drain_events(), vec![StreamEvent::Error { song_id: 1 }]);

        // 出错后不再发请求，也不再重复上报
        mgr.tick(later(), &mut song);
        assert!(mgr.drain_events().is_empty());
        assert_eq!(peer.try_recv_frame().unwrap(), None);
    }

    #[test]
    fn test_seek_past_length_then_empty_read_is_end_of_media() {
        let (mut mgr, mut peer) = manager(config());
        let mut song = RemoteSong::new(1, 7, "song.mp3");
        open_streaming(&mut mgr, &mut peer, &mut song, 1000);

        mgr.seek(&mut song, 5000).unwrap();
        respond(&mut peer, data(7, 256));
        mgr.pump(&mut song).unwrap();
        assert_eq!(expect_request(&mut peer), Request::seek(7, 5000));

        respond(&mut peer, Reply::success(7, ReplyBody::Sought));
        mgr.pump(&mut song).unwrap();
        assert_eq!(mgr.state(7), StreamState::Streaming);
        assert_eq!(expect_request(&mut peer), Request::read(7, 256));

        respond(&mut peer, data(7, 0));
        mgr.pump(&mut song).unwrap();

        assert_eq!(song.cursor, 5000);
        assert!(mgr.buffer(7).unwrap().is_end_of_stream());
        assert!(mgr.is_end_of_media(7));
        assert_eq!(peer.try_recv_frame().unwrap(), None);
        assert_eq!(
            mgr.drain_events(),
            vec![
                StreamEvent::Opened { song_id: 1 },
                StreamEvent::EndOfStream { song_id: 1 }
            ]
        );
    }

    #[test]
    fn test_malformed_frame_errors_active_streams() {
        let (mut mgr, mut peer) = manager(config());
        let mut song = RemoteSong::new(1, 7, "song.mp3");
        open_streaming(&mut mgr, &mut peer, &mut song, 1000);

        peer.send_frame(vec![0xff, 0, 0]).unwrap();
        assert!(matches!(
            mgr.pump(&mut song),
            Err(StreamError::Dispatch(DispatchError::Proto(_)))
        ));
        assert_eq!(mgr.state(7), StreamState::Errored);
        assert_eq!(mgr.dispatcher().pending_count(), 0);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let (client, _peer) = ChannelTransport::pair();
        let result = StreamManager::new(
            Box::new(client),
            StreamConfig {
                low_water: 0,
                ..config()
            },
        );
        assert!(matches!(result, Err(StreamError::Config(_))));
    }
}

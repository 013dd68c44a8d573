//! 播放器
//!
//! 持有曲库、当前歌曲位置、播放标志和流缓冲管理器，
//! 由外部以 [`REFRESH_INTERVAL`] 周期调用 [`Player::update`] 驱动。

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use duet_proto::{SongId, SongSettings};
use duet_stream::{
    DispatchError, StreamConfig, StreamError, StreamEvent, StreamManager, StreamState, Transport,
};
use tracing::{debug, info, warn};

use crate::{
    AudioBackend, BackendError, Catalog, PlayerCommand, PlayerEvent, PlayerState, Song, SongList,
};

/// 建议的 `update` 调用间隔
pub const REFRESH_INTERVAL: Duration = Duration::from_millis(50);

/// 播放器错误
#[derive(thiserror::Error, Debug)]
pub enum PlayerError {
    #[error("Song not found: {0}")]
    SongNotFound(SongId),

    #[error("No current song")]
    NoCurrentSong,

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// 播放器
pub struct Player<B: AudioBackend> {
    catalog: Catalog,
    list: SongList,
    current: Option<SongId>,
    /// 当前歌曲已交给后端
    loaded: bool,
    state: PlayerState,
    muted: bool,
    looping: bool,
    volume: f32,
    streams: StreamManager,
    /// 传输层已断开（只记录一次警告）
    disconnected: bool,
    backend: B,
    evt_tx: Sender<PlayerEvent>,
    evt_rx: Receiver<PlayerEvent>,
}

impl<B: AudioBackend> Player<B> {
    pub fn new(
        backend: B,
        transport: Box<dyn Transport>,
        config: StreamConfig,
    ) -> Result<Self, PlayerError> {
        let (evt_tx, evt_rx) = unbounded();
        let mut player = Self {
            catalog: Catalog::new(),
            list: SongList::All,
            current: None,
            loaded: false,
            state: PlayerState::Stopped,
            muted: false,
            looping: false,
            volume: 1.0,
            streams: StreamManager::new(transport, config)?,
            disconnected: false,
            backend,
            evt_tx,
            evt_rx,
        };
        player.backend.set_volume(player.volume);
        Ok(player)
    }

    /// 事件接收端
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.evt_rx.clone()
    }

    // ========== 曲库 ==========

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn create_local_song(&mut self, path: impl Into<PathBuf>) -> SongId {
        self.catalog.create_local_song(path)
    }

    pub fn create_remote_song(
        &mut self,
        file: impl Into<String>,
        remote_id: SongId,
        length: u32,
        artist: impl Into<String>,
        settings: SongSettings,
    ) -> SongId {
        self.catalog.create_remote_song(file, remote_id, length, artist, settings)
    }

    /// 移除歌曲；移除当前歌曲时停止播放并进入未定义位置
    pub fn remove_song(&mut self, id: SongId) -> Result<(), PlayerError> {
        if !self.catalog.contains(id) {
            return Err(PlayerError::SongNotFound(id));
        }
        if self.current == Some(id) {
            self.go_undefined();
        }
        if let Some(Song::Remote(song)) = self.catalog.remove_song(id) {
            self.streams.remove(song.remote_id);
        }
        Ok(())
    }

    pub fn clear_songs(&mut self, list: SongList) {
        if self.current_song().is_some_and(|song| song.in_list(list)) {
            self.go_undefined();
        }
        for song in self.catalog.clear_songs(list) {
            if let Song::Remote(remote) = song {
                self.streams.remove(remote.remote_id);
            }
        }
    }

    pub fn songs_count(&self, list: SongList) -> usize {
        self.catalog.songs_count(list)
    }

    /// 设置 next / previous 的遍历范围
    pub fn set_song_list(&mut self, list: SongList) {
        self.list = list;
    }

    pub fn song_list(&self) -> SongList {
        self.list
    }

    // ========== 当前歌曲 ==========

    pub fn current_song_id(&self) -> Option<SongId> {
        self.current
    }

    pub fn current_song(&self) -> Option<&Song> {
        self.current.and_then(|id| self.catalog.get(id))
    }

    /// 切换当前歌曲
    ///
    /// 标识不存在时返回 `SongNotFound`，当前歌曲与流状态都不变。
    pub fn change_song(&mut self, id: SongId) -> Result<(), PlayerError> {
        if !self.catalog.contains(id) {
            return Err(PlayerError::SongNotFound(id));
        }

        self.unload_current();
        self.current = Some(id);

        // 远程歌曲先发出 OPEN，再通知当前歌曲已切换
        let loaded = self.load_current();
        self.forward_stream_events();
        info!(song_id = id, "song changed");
        let _ = self.evt_tx.send(PlayerEvent::SongChanged(Some(id)));

        if let Err(e) = loaded {
            warn!(song_id = id, error = %e, "failed to load song");
            self.set_state(PlayerState::Stopped);
            return Err(e);
        }
        Ok(())
    }

    pub fn first_song(&mut self) -> Result<(), PlayerError> {
        match self.catalog.ids(self.list).first() {
            Some(&id) => self.change_song(id),
            None => {
                self.go_undefined();
                Ok(())
            }
        }
    }

    /// 下一首；末尾时开启循环则回到第一首，否则进入未定义位置
    pub fn next_song(&mut self) -> Result<(), PlayerError> {
        let ids = self.catalog.ids(self.list);
        let target = match self.position_in(&ids) {
            Some(pos) if pos + 1 < ids.len() => Some(ids[pos + 1]),
            Some(_) if self.looping => ids.first().copied(),
            Some(_) => None,
            None => ids.first().copied(),
        };
        self.go_to(target)
    }

    /// 上一首；开头时开启循环则回到最后一首，否则进入未定义位置
    pub fn previous_song(&mut self) -> Result<(), PlayerError> {
        let ids = self.catalog.ids(self.list);
        let target = match self.position_in(&ids) {
            Some(pos) if pos > 0 => Some(ids[pos - 1]),
            Some(_) if self.looping => ids.last().copied(),
            Some(_) => None,
            None => ids.last().copied(),
        };
        self.go_to(target)
    }

    fn position_in(&self, ids: &[SongId]) -> Option<usize> {
        let current = self.current?;
        ids.iter().position(|&id| id == current)
    }

    fn go_to(&mut self, target: Option<SongId>) -> Result<(), PlayerError> {
        match target {
            Some(id) => self.change_song(id),
            None => {
                self.go_undefined();
                Ok(())
            }
        }
    }

    fn go_undefined(&mut self) {
        self.unload_current();
        self.set_state(PlayerState::Stopped);
        if self.current.take().is_some() {
            debug!("current song is undefined");
            let _ = self.evt_tx.send(PlayerEvent::SongChanged(None));
        }
    }

    /// 把当前歌曲交给后端；远程歌曲发出 OPEN
    fn load_current(&mut self) -> Result<(), PlayerError> {
        let id = self.current.ok_or(PlayerError::NoCurrentSong)?;
        match self.catalog.get(id) {
            Some(Song::Local(song)) => {
                let path = song.path.clone();
                self.backend.load_local(&path)?;
            }
            Some(Song::Remote(_)) => {
                let Some(song) = self.catalog.remote_mut(id) else {
                    return Err(PlayerError::SongNotFound(id));
                };
                // 发送失败时流已进入 Errored，错误通过事件上报
                if let Err(e) = self.streams.open(song) {
                    warn!(song_id = id, error = %e, "open not sent");
                }
                self.backend.load_stream(song)?;
            }
            None => return Err(PlayerError::SongNotFound(id)),
        }

        self.loaded = true;
        self.backend.set_paused(self.state != PlayerState::Playing);
        Ok(())
    }

    /// 关闭当前远程流并停止后端
    fn unload_current(&mut self) {
        if let Some(remote_id) = self.current_remote_id() {
            self.streams.close(remote_id);
        }
        if self.loaded {
            self.backend.stop();
            self.loaded = false;
        }
    }

    fn current_remote_id(&self) -> Option<SongId> {
        self.current
            .and_then(|id| self.catalog.remote(id))
            .map(|song| song.remote_id)
    }

    // ========== 播放控制 ==========

    /// 播放；没有当前歌曲时从第一首开始
    pub fn play(&mut self) -> Result<(), PlayerError> {
        if self.current.is_none() {
            self.first_song()?;
            if self.current.is_none() {
                return Ok(());
            }
        }
        if !self.loaded {
            self.load_current()?;
            self.forward_stream_events();
        }

        self.backend.set_paused(false);
        self.set_state(PlayerState::Playing);
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.state == PlayerState::Playing {
            self.backend.set_paused(true);
            self.set_state(PlayerState::Paused);
        }
    }

    /// 停止；远程歌曲的缓冲被丢弃，再次播放时重新 OPEN
    pub fn stop(&mut self) {
        self.unload_current();
        self.set_state(PlayerState::Stopped);
    }

    pub fn mute(&mut self, mute: bool) {
        self.muted = mute;
        self.backend.set_volume(if mute { 0.0 } else { self.volume });
    }

    /// 设置音量 (0.0 - 1.0)
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        if !self.muted {
            self.backend.set_volume(self.volume);
        }
    }

    pub fn set_loop(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// 跳转到当前歌曲的字节偏移
    pub fn seek(&mut self, position: u32) -> Result<(), PlayerError> {
        let id = self.current.ok_or(PlayerError::NoCurrentSong)?;
        if !self.loaded {
            return Err(PlayerError::NoCurrentSong);
        }
        if let Some(song) = self.catalog.remote_mut(id) {
            self.streams.seek(song, position)?;
        }
        self.backend.seek(u64::from(position))?;
        Ok(())
    }

    pub fn handle_command(&mut self, cmd: PlayerCommand) -> Result<(), PlayerError> {
        match cmd {
            PlayerCommand::ChangeSong(id) => self.change_song(id)?,
            PlayerCommand::Next => self.next_song()?,
            PlayerCommand::Previous => self.previous_song()?,
            PlayerCommand::First => self.first_song()?,
            PlayerCommand::Play => self.play()?,
            PlayerCommand::Pause => self.pause(),
            PlayerCommand::Stop => self.stop(),
            PlayerCommand::Mute(mute) => self.mute(mute),
            PlayerCommand::SetVolume(volume) => self.set_volume(volume),
            PlayerCommand::SetLoop(looping) => self.set_loop(looping),
            PlayerCommand::Seek(position) => self.seek(position)?,
        }
        Ok(())
    }

    // ========== 驱动 ==========

    pub fn update(&mut self) {
        self.update_at(Instant::now());
    }

    /// 处理入站帧和超时，向后端供数据，播放完毕时切到下一首
    pub fn update_at(&mut self, now: Instant) {
        match self.streams.pump(&mut self.catalog) {
            Ok(_) => self.disconnected = false,
            Err(StreamError::Dispatch(DispatchError::Transport(e))) => {
                if !self.disconnected {
                    warn!(error = %e, "transport disconnected");
                    self.disconnected = true;
                }
            }
            Err(e) => warn!(error = %e, "inbound frames not fully processed"),
        }
        self.streams.tick(now, &mut self.catalog);
        self.feed_backend();
        self.streams.refill(&mut self.catalog);
        self.forward_stream_events();

        if self.state == PlayerState::Playing && self.current_finished() {
            debug!(song_id = ?self.current, "end of media");
            if let Err(e) = self.next_song() {
                warn!(error = %e, "failed to advance");
            }
        }
    }

    fn feed_backend(&mut self) {
        if self.state != PlayerState::Playing || !self.loaded {
            return;
        }

        let fed = match self.current_remote_id() {
            Some(remote_id) => match self.streams.buffer_mut(remote_id) {
                Some(buffer) => self.backend.feed(buffer),
                None => Ok(0),
            },
            None => self.backend.render(),
        };
        if let Err(e) = fed {
            warn!(error = %e, "backend failed");
            self.stop();
        }
    }

    fn current_finished(&self) -> bool {
        match self.current_remote_id() {
            Some(remote_id) => self.streams.is_end_of_media(remote_id),
            None => self.loaded && self.backend.is_finished(),
        }
    }

    fn forward_stream_events(&mut self) {
        for event in self.streams.drain_events() {
            match event {
                StreamEvent::Opened { song_id } => {
                    let _ = self.evt_tx.send(PlayerEvent::StreamOpened(song_id));
                }
                StreamEvent::EndOfStream { song_id } => {
                    debug!(song_id, "stream fully received");
                }
                StreamEvent::Error { song_id } => {
                    warn!(song_id, "song unavailable");
                    let _ = self.evt_tx.send(PlayerEvent::StreamError(song_id));
                    if self.current == Some(song_id) && self.loaded {
                        self.backend.stop();
                        self.loaded = false;
                        self.set_state(PlayerState::Stopped);
                    }
                }
            }
        }
    }

    fn set_state(&mut self, state: PlayerState) {
        if self.state != state {
            self.state = state;
            let _ = self.evt_tx.send(PlayerEvent::StateChanged(state));
        }
    }

    // ========== 查询 ==========

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlayerState::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.state == PlayerState::Paused
    }

    pub fn is_stopped(&self) -> bool {
        self.state == PlayerState::Stopped
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_loop(&self) -> bool {
        self.looping
    }

    /// 最近一次 `update` 时传输层是否可用
    pub fn is_connected(&self) -> bool {
        !self.disconnected
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// 远程歌曲的流状态，本地歌曲返回 `None`
    pub fn stream_state(&self, id: SongId) -> Option<StreamState> {
        self.catalog
            .remote(id)
            .map(|song| self.streams.state(song.remote_id))
    }

    pub fn streams(&self) -> &StreamManager {
        &self.streams
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_proto::{
        Command, CommandType, FailureKind, Reply, ReplyBody, Request, ServerFailure, SongInfo,
    };
    use duet_stream::{ChannelTransport, PlaybackBuffer, RemoteSong};
    use std::path::Path;

    #[derive(Debug, Default)]
    struct FakeBackend {
        loaded: Option<String>,
        paused: bool,
        volume: f32,
        fed: usize,
        finished: bool,
    }

    impl AudioBackend for FakeBackend {
        fn load_local(&mut self, path: &Path) -> Result<(), BackendError> {
            self.loaded = Some(path.display().to_string());
            self.finished = false;
            Ok(())
        }

        fn load_stream(&mut self, song: &RemoteSong) -> Result<(), BackendError> {
            self.loaded = Some(song.file_path.clone());
            Ok(())
        }

        fn feed(&mut self, buffer: &mut PlaybackBuffer) -> Result<usize, BackendError> {
            let mut out = [0u8; 64];
            let n = buffer.consume(&mut out);
            self.fed += n;
            Ok(n)
        }

        // 本地歌曲一次渲染即结束
        fn render(&mut self) -> Result<usize, BackendError> {
            self.finished = true;
            Ok(0)
        }

        fn seek(&mut self, _position: u64) -> Result<(), BackendError> {
            Ok(())
        }

        fn set_paused(&mut self, paused: bool) {
            self.paused = paused;
        }

        fn stop(&mut self) {
            self.loaded = None;
        }

        fn set_volume(&mut self, volume: f32) {
            self.volume = volume;
        }

        fn is_finished(&self) -> bool {
            self.finished
        }
    }

    fn player() -> (Player<FakeBackend>, ChannelTransport) {
        let (client, peer) = ChannelTransport::pair();
        let config = StreamConfig {
            request_timeout_ms: 100,
            read_size: 256,
            low_water: 512,
            high_water: 1024,
        };
        let player = Player::new(FakeBackend::default(), Box::new(client), config).unwrap();
        (player, peer)
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
                ..Default::default()
            }),
        )
    }

    fn drain(events: &Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
        events.try_iter().collect()
    }

    fn add_locals(player: &mut Player<FakeBackend>, n: usize) -> Vec<SongId> {
        (0..n)
            .map(|i| player.create_local_song(format!("/music/{i}.mp3")))
            .collect()
    }

    #[test]
    fn test_change_song_to_unknown_id_changes_nothing() {
        let (mut player, mut peer) = player();
        let id = player.create_remote_song("song.mp3", 7, 0, "", SongSettings::default());
        player.change_song(id).unwrap();
        assert_eq!(expect_request(&mut peer), Request::open(7));

        let events = player.events();
        drain(&events);
        assert!(matches!(
            player.change_song(99),
            Err(PlayerError::SongNotFound(99))
        ));
        assert_eq!(player.current_song_id(), Some(id));
        assert_eq!(player.stream_state(id), Some(StreamState::Opening));
        assert_eq!(player.streams().dispatcher().pending_count(), 1);
        assert_eq!(peer.try_recv_frame().unwrap(), None);
        assert!(drain(&events).is_empty());
    }

    #[test]
    fn test_change_song_opens_remote_stream() {
        let (mut player, mut peer) = player();
        let events = player.events();
        let id = player.create_remote_song("song.mp3", 7, 0, "Artist", SongSettings::default());

        player.change_song(id).unwrap();
        assert_eq!(drain(&events), vec![PlayerEvent::SongChanged(Some(id))]);
        assert_eq!(player.backend().loaded.as_deref(), Some("song.mp3"));
        assert_eq!(expect_request(&mut peer), Request::open(7));

        respond(&mut peer, opened(7, 4096));
        player.update();
        assert_eq!(drain(&events), vec![PlayerEvent::StreamOpened(id)]);
        assert_eq!(player.stream_state(id), Some(StreamState::Streaming));
        assert_eq!(player.catalog().remote(id).unwrap().length, 4096);
        assert_eq!(expect_request(&mut peer), Request::read(7, 256));
    }

    #[test]
    fn test_change_song_reports_open_failure_before_song_changed() {
        let (mut player, peer) = player();
        let events = player.events();
        let id = player.create_remote_song("song.mp3", 7, 0, "", SongSettings::default());
        drop(peer);

        player.change_song(id).unwrap();
        assert_eq!(
            drain(&events),
            vec![PlayerEvent::StreamError(id), PlayerEvent::SongChanged(Some(id))]
        );
        assert_eq!(player.current_song_id(), Some(id));
        assert_eq!(player.stream_state(id), Some(StreamState::Errored));
        assert!(player.backend().loaded.is_none());
    }

    #[test]
    fn test_playback_consumes_stream_and_advances() {
        let (mut player, mut peer) = player();
        let id = player.create_remote_song("song.mp3", 7, 0, "", SongSettings::default());
        player.play().unwrap();
        assert_eq!(player.current_song_id(), Some(id));
        expect_request(&mut peer);

        respond(&mut peer, opened(7, 100));
        player.update();
        assert_eq!(expect_request(&mut peer), Request::read(7, 256));

        respond(&mut peer, Reply::success(7, ReplyBody::Data(vec![1; 100])));
        player.update();
        assert_eq!(player.backend().fed, 64);
        assert!(player.is_playing());

        player.update();
        assert_eq!(player.backend().fed, 100);
        // 最后一首且未循环：进入未定义位置
        assert_eq!(player.current_song_id(), None);
        assert!(player.is_stopped());
        assert_eq!(player.stream_state(id), Some(StreamState::Closed));
        assert_eq!(expect_request(&mut peer), Request::close(7));
    }

    #[test]
    fn test_next_and_previous_respect_loop() {
        let (mut player, _peer) = player();
        let ids = add_locals(&mut player, 3);
        let events = player.events();

        player.first_song().unwrap();
        player.next_song().unwrap();
        player.next_song().unwrap();
        assert_eq!(player.current_song_id(), Some(ids[2]));

        player.next_song().unwrap();
        assert_eq!(player.current_song_id(), None);
        assert!(player.is_stopped());
        assert_eq!(drain(&events).last(), Some(&PlayerEvent::SongChanged(None)));

        // 未定义位置时 next 从第一首开始
        player.next_song().unwrap();
        assert_eq!(player.current_song_id(), Some(ids[0]));
        player.previous_song().unwrap();
        assert_eq!(player.current_song_id(), None);

        player.set_loop(true);
        player.change_song(ids[0]).unwrap();
        player.previous_song().unwrap();
        assert_eq!(player.current_song_id(), Some(ids[2]));
        player.next_song().unwrap();
        assert_eq!(player.current_song_id(), Some(ids[0]));
    }

    #[test]
    fn test_song_list_scopes_iteration() {
        let (mut player, mut peer) = player();
        let first = player.create_local_song("/music/a.mp3");
        let remote = player.create_remote_song("b.mp3", 40, 0, "", SongSettings::default());
        let last = player.create_local_song("/music/c.mp3");

        player.set_song_list(SongList::Local);
        player.change_song(first).unwrap();
        player.next_song().unwrap();
        assert_eq!(player.current_song_id(), Some(last));

        player.set_song_list(SongList::Remote);
        player.next_song().unwrap();
        assert_eq!(player.current_song_id(), Some(remote));
        assert_eq!(expect_request(&mut peer), Request::open(40));
    }

    #[test]
    fn test_local_songs_play_through() {
        let (mut player, _peer) = player();
        let ids = add_locals(&mut player, 2);

        player.play().unwrap();
        assert_eq!(player.current_song_id(), Some(ids[0]));
        assert!(!player.backend().paused);

        player.update();
        assert_eq!(player.current_song_id(), Some(ids[1]));
        assert!(player.is_playing());
        assert_eq!(player.backend().loaded.as_deref(), Some("/music/1.mp3"));

        player.update();
        assert_eq!(player.current_song_id(), None);
        assert!(player.is_stopped());
    }

    #[test]
    fn test_stream_error_stops_current_song() {
        let (mut player, mut peer) = player();
        let events = player.events();
        let id = player.create_remote_song("gone.mp3", 3, 0, "", SongSettings::default());

        player.play().unwrap();
        assert_eq!(expect_request(&mut peer), Request::open(3));
        respond(
            &mut peer,
            Reply::failure(
                3,
                CommandType::Open,
                ServerFailure::new(FailureKind::NotFound, "gone"),
            ),
        );
        player.update();

        assert_eq!(
            drain(&events),
            vec![
                PlayerEvent::SongChanged(Some(id)),
                PlayerEvent::StateChanged(PlayerState::Playing),
                PlayerEvent::StreamError(id),
                PlayerEvent::StateChanged(PlayerState::Stopped),
            ]
        );
        assert_eq!(player.stream_state(id), Some(StreamState::Errored));
        assert!(!player.catalog().remote(id).unwrap().available);
        assert_eq!(player.current_song_id(), Some(id));

        // 再次播放会重新 OPEN
        player.play().unwrap();
        assert_eq!(expect_request(&mut peer), Request::open(3));
    }

    #[test]
    fn test_disconnect_is_reported_once() {
        let (mut player, peer) = player();
        let events = player.events();
        add_locals(&mut player, 1);
        player.update();
        assert!(player.is_connected());

        drop(peer);
        player.update();
        player.update();
        assert!(!player.is_connected());
        // 没有活动流时断开不产生事件
        assert!(drain(&events).is_empty());
    }

    #[test]
    fn test_open_timeouts_report_one_error() {
        let (mut player, mut peer) = player();
        let events = player.events();
        let id = player.create_remote_song("slow.mp3", 3, 0, "", SongSettings::default());
        player.change_song(id).unwrap();
        drain(&events);

        let later = || Instant::now() + Duration::from_secs(1);
        player.update_at(later());
        player.update_at(later());
        player.update_at(later());

        assert_eq!(expect_request(&mut peer), Request::open(3));
        assert_eq!(expect_request(&mut peer), Request::open(3));
        assert_eq!(peer.try_recv_frame().unwrap(), None);
        assert_eq!(drain(&events), vec![PlayerEvent::StreamError(id)]);
        assert_eq!(player.stream_state(id), Some(StreamState::Errored));
    }

    #[test]
    fn test_stop_closes_remote_stream() {
        let (mut player, mut peer) = player();
        let id = player.create_remote_song("song.mp3", 7, 0, "", SongSettings::default());
        player.play().unwrap();
        expect_request(&mut peer);
        respond(&mut peer, opened(7, 4096));
        player.update();
        expect_request(&mut peer);

        player.stop();
        assert!(player.is_stopped());
        assert_eq!(player.stream_state(id), Some(StreamState::Closed));
        assert_eq!(player.streams().dispatcher().pending_count(), 0);
        assert_eq!(expect_request(&mut peer), Request::close(7));
        assert!(player.backend().loaded.is_none());
    }

    #[test]
    fn test_volume_and_mute() {
        let (mut player, _peer) = player();
        player.set_volume(1.5);
        assert_eq!(player.volume(), 1.0);

        player.mute(true);
        assert!(player.is_muted());
        assert_eq!(player.backend().volume, 0.0);

        player.set_volume(0.5);
        assert_eq!(player.backend().volume, 0.0);
        player.mute(false);
        assert_eq!(player.backend().volume, 0.5);
    }

    #[test]
    fn test_commands_and_seek() {
        let (mut player, _peer) = player();
        assert!(matches!(player.seek(10), Err(PlayerError::NoCurrentSong)));

        let ids = add_locals(&mut player, 2);
        player.handle_command(PlayerCommand::ChangeSong(ids[1])).unwrap();
        player.handle_command(PlayerCommand::Play).unwrap();
        player.handle_command(PlayerCommand::Seek(10)).unwrap();
        player.handle_command(PlayerCommand::Pause).unwrap();
        assert!(player.is_paused());
        player.handle_command(PlayerCommand::SetLoop(true)).unwrap();
        player.handle_command(PlayerCommand::Next).unwrap();
        assert_eq!(player.current_song_id(), Some(ids[0]));
        assert!(player.is_paused());

        player.remove_song(ids[0]).unwrap();
        assert_eq!(player.current_song_id(), None);
        assert!(player.is_stopped());
        assert!(matches!(
            player.remove_song(ids[0]),
            Err(PlayerError::SongNotFound(_))
        ));
        assert_eq!(player.songs_count(SongList::All), 1);
    }
}

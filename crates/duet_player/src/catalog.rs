//! 曲库
//!
//! 歌曲以稳定的 [`SongId`] 索引，按加入顺序遍历。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use duet_proto::{SongId, SongSettings};
use duet_stream::{RemoteSong, RemoteSongs};

/// 遍历范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SongList {
    #[default]
    All,
    Local,
    Remote,
}

/// 本地歌曲
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSong {
    pub id: SongId,
    pub path: PathBuf,
}

/// 曲库中的歌曲
#[derive(Debug, Clone)]
pub enum Song {
    Local(LocalSong),
    Remote(RemoteSong),
}

impl Song {
    pub fn id(&self) -> SongId {
        match self {
            Song::Local(song) => song.id,
            Song::Remote(song) => song.id,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Song::Remote(_))
    }

    /// 显示用标题
    pub fn title(&self) -> String {
        match self {
            Song::Local(song) => file_stem(&song.path),
            Song::Remote(song) if !song.title.is_empty() => song.title.clone(),
            Song::Remote(song) => file_stem(Path::new(&song.file_path)),
        }
    }

    pub fn in_list(&self, list: SongList) -> bool {
        match list {
            SongList::All => true,
            SongList::Local => !self.is_remote(),
            SongList::Remote => self.is_remote(),
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// 曲库
#[derive(Debug, Default)]
pub struct Catalog {
    next_id: SongId,
    order: Vec<SongId>,
    songs: HashMap<SongId, Song>,
    /// 对端标识 -> 本地标识
    remote_index: HashMap<SongId, SongId>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn new_song_id(&mut self) -> SongId {
        self.next_id += 1;
        self.next_id
    }

    /// 加入本地歌曲，路径已存在时返回原标识
    pub fn create_local_song(&mut self, path: impl Into<PathBuf>) -> SongId {
        let path = path.into();
        let existing = self.songs.values().find_map(|song| match song {
            Song::Local(local) if local.path == path => Some(local.id),
            _ => None,
        });
        if let Some(id) = existing {
            return id;
        }

        let id = self.new_song_id();
        self.insert(Song::Local(LocalSong { id, path }));
        id
    }

    /// 加入远程歌曲，对端标识已存在时返回原标识
    pub fn create_remote_song(
        &mut self,
        file: impl Into<String>,
        remote_id: SongId,
        length: u32,
        artist: impl Into<String>,
        settings: SongSettings,
    ) -> SongId {
        if let Some(&id) = self.remote_index.get(&remote_id) {
            return id;
        }

        let id = self.new_song_id();
        let mut song = RemoteSong::new(id, remote_id, file);
        song.length = length;
        song.artist = artist.into();
        song.settings = settings;
        self.remote_index.insert(remote_id, id);
        self.insert(Song::Remote(song));
        id
    }

    fn insert(&mut self, song: Song) {
        let id = song.id();
        self.order.push(id);
        self.songs.insert(id, song);
    }

    pub fn remove_song(&mut self, id: SongId) -> Option<Song> {
        let song = self.songs.remove(&id)?;
        self.order.retain(|&i| i != id);
        if let Song::Remote(remote) = &song {
            self.remote_index.remove(&remote.remote_id);
        }
        Some(song)
    }

    /// 清空指定范围，返回被移除的歌曲
    pub fn clear_songs(&mut self, list: SongList) -> Vec<Song> {
        self.ids(list)
            .into_iter()
            .filter_map(|id| self.remove_song(id))
            .collect()
    }

    pub fn songs_count(&self, list: SongList) -> usize {
        self.songs.values().filter(|s| s.in_list(list)).count()
    }

    /// 指定范围内的标识，按加入顺序
    pub fn ids(&self, list: SongList) -> Vec<SongId> {
        self.order
            .iter()
            .copied()
            .filter(|id| self.songs.get(id).is_some_and(|s| s.in_list(list)))
            .collect()
    }

    pub fn contains(&self, id: SongId) -> bool {
        self.songs.contains_key(&id)
    }

    pub fn get(&self, id: SongId) -> Option<&Song> {
        self.songs.get(&id)
    }

    pub fn remote(&self, id: SongId) -> Option<&RemoteSong> {
        match self.songs.get(&id)? {
            Song::Remote(song) => Some(song),
            Song::Local(_) => None,
        }
    }

    pub fn remote_mut(&mut self, id: SongId) -> Option<&mut RemoteSong> {
        match self.songs.get_mut(&id)? {
            Song::Remote(song) => Some(song),
            Song::Local(_) => None,
        }
    }

    /// 按对端标识查找本地标识
    pub fn find_remote(&self, remote_id: SongId) -> Option<SongId> {
        self.remote_index.get(&remote_id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }
}

impl RemoteSongs for Catalog {
    fn remote_song_mut(&mut self, remote_id: SongId) -> Option<&mut RemoteSong> {
        let id = self.find_remote(remote_id)?;
        self.remote_mut(id)
    }
}

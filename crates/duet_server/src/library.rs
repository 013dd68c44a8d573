//! 本地曲库

use std::path::{Path, PathBuf};

use duet_proto::SongId;
use serde::Serialize;
use tracing::debug;

/// 可提供的音频扩展名
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "ogg", "flac", "wav"];

/// 曲库错误
#[derive(thiserror::Error, Debug)]
pub enum LibraryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a file: {0}")]
    NotAFile(PathBuf),
}

/// 曲库条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryEntry {
    pub id: SongId,
    pub path: PathBuf,
}

/// 按单调递增标识索引的本地文件
#[derive(Debug, Default)]
pub struct Library {
    next_id: SongId,
    entries: Vec<LibraryEntry>,
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    /// 扫描目录（不递归），按文件名顺序加入支持的音频文件
    pub fn scan(dir: &Path) -> Result<Self, LibraryError> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && is_supported(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut library = Self::new();
        for path in paths {
            library.add(path)?;
        }
        debug!(dir = %dir.display(), songs = library.len(), "library scanned");
        Ok(library)
    }

    /// 加入文件，已存在时返回原标识
    pub fn add(&mut self, path: impl Into<PathBuf>) -> Result<SongId, LibraryError> {
        let path = path.into();
        if !path.is_file() {
            return Err(LibraryError::NotAFile(path));
        }
        if let Some(entry) = self.entries.iter().find(|e| e.path == path) {
            return Ok(entry.id);
        }

        self.next_id += 1;
        let id = self.next_id;
        self.entries.push(LibraryEntry { id, path });
        Ok(id)
    }

    pub fn get(&self, id: SongId) -> Option<&LibraryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn entries(&self) -> &[LibraryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| SUPPORTED_EXTENSIONS.contains(&e.as_str()))
}

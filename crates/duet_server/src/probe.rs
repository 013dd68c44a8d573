//! 歌曲元数据探测

use std::path::Path;

use duet_proto::SongSettings;
use serde::Serialize;
use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey, Value as MetaValue};
use symphonia::core::probe::Hint;

/// OPEN 应答所需的元数据
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SongMeta {
    pub artist: String,
    pub title: String,
    pub settings: SongSettings,
}

/// 尽力探测；无法识别的文件以文件名作为标题
pub fn probe_meta(path: &Path) -> SongMeta {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let mut meta = probe_with_symphonia(path, ext.as_deref()).unwrap_or_default();
    if meta.title.is_empty() {
        meta.title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    if meta.settings.format.is_none() {
        meta.settings.format = ext;
    }
    meta
}

fn probe_with_symphonia(path: &Path, ext: Option<&str>) -> Option<SongMeta> {
    let file = std::fs::File::open(path).ok()?;

    let mut hint = Hint::new();
    if let Some(ext) = ext {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .ok()?;

    let mut meta = SongMeta::default();

    if let Some(t) = probed
        .format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
    {
        meta.settings.sample_rate = t.codec_params.sample_rate;
        meta.settings.channels = t.codec_params.channels.map(|c| c.count() as u16);
    }

    // 容器内标签优先，其次是探测阶段读到的标签（如 ID3）
    if let Some(rev) = probed.format.metadata().current() {
        apply_tags(&mut meta, rev);
    }
    if let Some(early) = probed.metadata.get() {
        if let Some(rev) = early.current() {
            apply_tags(&mut meta, rev);
        }
    }

    Some(meta)
}

fn apply_tags(meta: &mut SongMeta, rev: &MetadataRevision) {
    for tag in rev.tags() {
        let MetaValue::String(value) = &tag.value else {
            continue;
        };
        let slot = match tag.std_key {
            Some(StandardTagKey::Artist) => &mut meta.artist,
            Some(StandardTagKey::TrackTitle) => &mut meta.title,
            _ => continue,
        };
        if slot.is_empty() {
            *slot = value.trim().to_string();
        }
    }
}

//! duet-cli - 命令行工具
//!
//! 列出可提供的曲库，或在进程内用服务端线程演示远程流式播放。

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use duet_player::{Player, PlayerEvent, SinkBackend, REFRESH_INTERVAL};
use duet_server::{probe_meta, Library, SongMeta, SongServer};
use duet_stream::{ChannelTransport, StreamConfig};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// 每次 update 后端消费的字节数
const SINK_CHUNK_SIZE: usize = 16 * 1024; // 16KB

#[derive(Serialize)]
struct ListedSong<'a> {
    id: u32,
    path: &'a Path,
    length: u64,
    #[serde(flatten)]
    meta: SongMeta,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage:");
        eprintln!("  {} list <dir>   # prints JSON", args[0]);
        eprintln!("  {} stream <dir> <song-id> <output> [config.json]", args[0]);
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "list" => list(Path::new(&args[2])),
        "stream" => {
            if args.len() < 5 {
                eprintln!("Usage: {} stream <dir> <song-id> <output> [config.json]", args[0]);
                std::process::exit(1);
            }
            let Ok(song_id) = args[3].parse() else {
                eprintln!("Invalid song id: {}", args[3]);
                std::process::exit(1);
            };
            stream(
                Path::new(&args[2]),
                song_id,
                &PathBuf::from(&args[4]),
                args.get(5).map(Path::new),
            )
        }
        other => {
            eprintln!("Unknown command: {}", other);
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        error!(error = %e, "command failed");
        std::process::exit(2);
    }
}

fn list(dir: &Path) -> CliResult<()> {
    let library = Library::scan(dir)?;
    let mut songs = Vec::with_capacity(library.len());
    for entry in library.entries() {
        songs.push(ListedSong {
            id: entry.id,
            path: &entry.path,
            length: std::fs::metadata(&entry.path)?.len(),
            meta: probe_meta(&entry.path),
        });
    }
    println!("{}", serde_json::to_string_pretty(&songs)?);
    Ok(())
}

fn stream(dir: &Path, song_id: u32, output: &Path, config: Option<&Path>) -> CliResult<()> {
    let config = match config {
        Some(path) => StreamConfig::from_json_file(path)?,
        None => StreamConfig::default(),
    };
    let library = Library::scan(dir)?;
    info!(songs = library.len(), "serving library");

    let (client, mut peer) = ChannelTransport::pair();
    let server = thread::spawn(move || {
        let mut server = SongServer::new(library);
        if let Err(e) = server.serve(&mut peer) {
            error!(error = %e, "server stopped");
        }
    });

    let backend = SinkBackend::new(BufWriter::new(File::create(output)?), SINK_CHUNK_SIZE);
    let mut player = Player::new(backend, Box::new(client), config)?;
    let events = player.events();
    let id = player.create_remote_song(
        format!("song-{song_id}"),
        song_id,
        0,
        "",
        Default::default(),
    );

    let started = Instant::now();
    player.change_song(id)?;
    player.play()?;

    let mut failed = false;
    while player.current_song_id().is_some() && !failed {
        player.update();
        for event in events.try_iter() {
            match event {
                PlayerEvent::StreamOpened(_) => {
                    if let Some(song) = player.catalog().remote(id) {
                        info!(
                            title = %song.title,
                            artist = %song.artist,
                            length = song.length,
                            "stream opened"
                        );
                    }
                }
                PlayerEvent::StreamError(_) => failed = true,
                _ => {}
            }
        }
        if !player.is_connected() {
            failed = true;
        }
        thread::sleep(REFRESH_INTERVAL);
    }

    let written = player.backend().written();
    let elapsed = started.elapsed();
    drop(player);
    let _ = server.join();

    if failed {
        return Err(format!("song {song_id} could not be streamed").into());
    }

    println!("Streamed successfully!");
    println!("  Output:  {}", output.display());
    println!("  Bytes:   {}", written);
    println!("  Elapsed: {:.2}s", elapsed.as_secs_f64());
    Ok(())
}

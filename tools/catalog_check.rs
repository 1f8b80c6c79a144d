use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use library::{Library, LoftyReader};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let audio_root = env::args()
        .nth(1)
        .or_else(|| env::var("AUDIO_ROOT").ok())
        .ok_or("AUDIO_ROOT not set and no path argument")?;

    let library = Library::load(PathBuf::from(&audio_root), Arc::new(LoftyReader))?;
    for playlist in library.playlists() {
        let tag = playlist
            .tag()
            .map(|tag| tag.to_string())
            .unwrap_or_else(|| "-".repeat(12));
        println!(
            "{}  {} ({} albums, {} songs)",
            tag,
            playlist.name(),
            playlist.albums().len(),
            playlist.count_songs()
        );
    }

    let stats = library.stats();
    println!(
        "Checked: {} playlists, {} albums, {} songs",
        stats.playlists, stats.albums, stats.songs
    );
    Ok(())
}

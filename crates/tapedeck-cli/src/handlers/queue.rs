//! Enqueue and inspection handlers.

use std::path::Path;

use tapedeck_core::{TaskStatus, TrackFile};

use crate::bootstrap::CliContext;
use crate::error::CliError;
use crate::presentation::{format_bytes, print_task_table};

/// Turn a `file://` URL or local path into a track.
///
/// The track is named after the last path segment; its size and format
/// come from the file itself when it exists.
pub fn track_from_source(source: &str) -> Result<TrackFile, CliError> {
    let path = Path::new(source.strip_prefix("file://").unwrap_or(source));
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| CliError::Arguments(format!("'{source}' does not name a file")))?;

    let url = if source.starts_with("file://") {
        source.to_string()
    } else {
        format!("file://{}", path.display())
    };

    let mut track = TrackFile::new(filename, url);
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        track = track.with_format(ext.to_ascii_lowercase());
    }
    if let Ok(meta) = std::fs::metadata(path) {
        track = track.with_size(meta.len());
    }
    Ok(track)
}

/// Add tracks of a recording to the queue.
pub async fn enqueue(
    ctx: &CliContext,
    recording_id: &str,
    sources: &[String],
    priority: i32,
) -> Result<(), CliError> {
    let files = sources
        .iter()
        .map(|source| track_from_source(source))
        .collect::<Result<Vec<_>, _>>()?;

    let ids = ctx
        .manager()
        .enqueue_with_priority(recording_id, &files, priority)
        .await?;

    println!("Queued {} track(s) of '{recording_id}':", ids.len());
    for (id, file) in ids.iter().zip(&files) {
        println!("  {id}  {}", file.filename);
    }
    println!("Run 'tapedeck run' to start downloading.");
    Ok(())
}

/// List tasks, optionally filtered by status.
pub async fn list(ctx: &CliContext, status: Option<&str>, json: bool) -> Result<(), CliError> {
    let filter = status
        .map(|raw| {
            TaskStatus::parse(&raw.to_ascii_lowercase())
                .ok_or_else(|| CliError::Arguments(format!("unknown status '{raw}'")))
        })
        .transpose()?;

    let mut tasks = ctx.manager().all_tasks().await?;
    if let Some(wanted) = filter {
        tasks.retain(|t| t.status == wanted);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }

    if tasks.is_empty() {
        println!("No tasks found.");
        println!("Use 'tapedeck enqueue <recording> <file>...' to queue tracks.");
        return Ok(());
    }

    println!("Found {} task(s):\n", tasks.len());
    print_task_table(&tasks);
    Ok(())
}

/// Print queue statistics.
pub async fn stats(ctx: &CliContext, json: bool) -> Result<(), CliError> {
    let stats = ctx.manager().stats().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Tasks:        {}", stats.total);
    println!("  queued      {}", stats.queued);
    println!("  downloading {}", stats.downloading);
    println!("  paused      {}", stats.paused);
    println!("  completed   {}", stats.completed);
    println!("  failed      {}", stats.failed);
    println!("  cancelled   {}", stats.cancelled);
    println!(
        "Downloaded:   {}",
        format_bytes(stats.total_bytes_downloaded)
    );
    if let Some(bps) = stats.average_throughput_bps {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let bps = bps as u64;
        println!("Throughput:   {}/s", format_bytes(bps));
    }
    Ok(())
}

/// Print the aggregate status of a recording.
pub async fn recording(ctx: &CliContext, recording_id: &str) -> Result<(), CliError> {
    let status = ctx.manager().recording_status(recording_id).await?;

    if status.total == 0 {
        println!("No tasks for recording '{recording_id}'.");
        return Ok(());
    }

    println!("Recording {recording_id}");
    println!(
        "  {}/{} tracks complete{}",
        status.completed,
        status.total,
        if status.is_complete() { " (done)" } else { "" }
    );
    println!(
        "  queued {}, downloading {}, paused {}, failed {}, cancelled {}",
        status.queued, status.downloading, status.paused, status.failed, status.cancelled
    );
    match status.total_bytes {
        Some(total) => println!(
            "  {} of {}",
            format_bytes(status.bytes_downloaded),
            format_bytes(total)
        ),
        None => println!("  {} downloaded", format_bytes(status.bytes_downloaded)),
    }
    if status.is_marked_for_deletion {
        println!("  marked for deletion");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_from_plain_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d1t01.FLAC");
        std::fs::write(&path, vec![0u8; 300]).unwrap();

        let track = track_from_source(path.to_str().unwrap()).unwrap();
        assert_eq!(track.filename, "d1t01.FLAC");
        assert_eq!(track.source_url, format!("file://{}", path.display()));
        assert_eq!(track.format.as_deref(), Some("flac"));
        assert_eq!(track.size, Some(300));
    }

    #[test]
    fn test_track_from_missing_file_url() {
        let track = track_from_source("file:///nowhere/d2t03.mp3").unwrap();
        assert_eq!(track.filename, "d2t03.mp3");
        assert_eq!(track.source_url, "file:///nowhere/d2t03.mp3");
        assert_eq!(track.size, None);
    }

    #[test]
    fn test_track_from_directory_like_source() {
        assert!(matches!(
            track_from_source("file:///"),
            Err(CliError::Arguments(_))
        ));
    }
}

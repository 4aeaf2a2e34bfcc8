//! Table formatting utilities for CLI output.

use tapedeck_core::DownloadTask;

/// Truncates a string to a maximum length, adding "..." if needed.
///
/// # Examples
///
/// ```rust
/// use tapedeck_cli::presentation::truncate_string;
///
/// assert_eq!(truncate_string("Hello", 10), "Hello");
/// assert_eq!(truncate_string("Hello World", 8), "Hello...");
/// ```
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Print a horizontal separator line.
pub fn print_separator(width: usize) {
    println!("{}", "-".repeat(width));
}

/// Human-readable byte count (binary units).
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Progress column: percentage when the size is known, bytes otherwise.
pub fn format_progress(task: &DownloadTask) -> String {
    match task.progress_fraction {
        Some(fraction) => format!("{:.0}%", fraction * 100.0),
        None => format_bytes(task.bytes_downloaded),
    }
}

/// Print tasks as a table.
pub fn print_task_table(tasks: &[DownloadTask]) {
    println!(
        "{:<18} {:<28} {:<24} {:<12} {:>4} {:>9}  Note",
        "ID", "Recording", "Track", "Status", "Pri", "Progress"
    );
    print_separator(110);

    for task in tasks {
        let note = if task.is_marked_for_deletion {
            "marked for deletion".to_string()
        } else {
            task.error_message.clone().unwrap_or_default()
        };
        println!(
            "{:<18} {:<28} {:<24} {:<12} {:>4} {:>9}  {}",
            truncate_string(task.id.as_str(), 18),
            truncate_string(&task.recording_id, 27),
            truncate_string(&task.track_filename, 23),
            task.status,
            task.priority,
            format_progress(task),
            note
        );
    }
}

/*!
 * clouddeck CLI style system
 *
 * Themed text, icons and tables shared by every subcommand.
 */

use crate::protocol::s3::{Entry, TransferMode, TransferPlan};
use chrono::{DateTime, Utc};
use comfy_table::{presets, Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};
use console::{style, StyledObject};

// ============================================================================
// THEME COLORS
// ============================================================================

/// Brand colors for consistent styling
pub struct Theme;

impl Theme {
    /// Primary accent color (cyan/blue)
    pub fn primary<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).cyan()
    }

    /// Success color (green)
    pub fn success<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).green()
    }

    /// Warning color (yellow)
    pub fn warning<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).yellow()
    }

    /// Error color (red)
    pub fn error<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).red()
    }

    /// Muted/secondary text (dim)
    pub fn muted<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).dim()
    }

    /// Header style (bold cyan)
    pub fn header<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).cyan().bold()
    }
}

// ============================================================================
// ICONS
// ============================================================================

/// Unicode icons for visual feedback
pub struct Icons;

impl Icons {
    pub const SUCCESS: &'static str = "✓";
    pub const ERROR: &'static str = "✗";
    pub const WARNING: &'static str = "⚠";
    pub const INFO: &'static str = "ℹ";
    pub const FOLDER: &'static str = "📁";
    pub const FILE: &'static str = "📄";
    pub const LINK: &'static str = "🔗";
    pub const ARROW_RIGHT: &'static str = "→";
    pub const BULLET: &'static str = "•";
}

// ============================================================================
// TABLES
// ============================================================================

/// Create a styled data table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Create a minimal table (no outer borders)
pub fn create_minimal_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_NO_BORDERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn header_cell(text: &str) -> Cell {
    Cell::new(text).fg(Color::Cyan).add_attribute(Attribute::Bold)
}

/// Create a key-value table
pub fn stats_table(items: &[(&str, String)]) -> Table {
    let mut table = create_minimal_table();

    for (key, value) in items {
        table.add_row(vec![
            Cell::new(key).fg(Color::Cyan),
            Cell::new(value)
                .fg(Color::White)
                .add_attribute(Attribute::Bold),
        ]);
    }

    table
}

/// Folder listing: folders first, then files with size and timestamp
pub fn entries_table(entries: &[Entry]) -> Table {
    let mut table = create_table();
    table.set_header(vec![
        header_cell("Name"),
        header_cell("Size"),
        header_cell("Last Modified"),
    ]);

    for entry in entries {
        match entry {
            Entry::Folder { name, .. } => {
                table.add_row(vec![
                    Cell::new(format!("{} {}/", Icons::FOLDER, name))
                        .fg(Color::Cyan)
                        .add_attribute(Attribute::Bold),
                    Cell::new("-").fg(Color::DarkGrey),
                    Cell::new("-").fg(Color::DarkGrey),
                ]);
            }
            Entry::File {
                name,
                size,
                last_modified,
                ..
            } => {
                let modified = last_modified
                    .map(|t| DateTime::<Utc>::from(t).format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                table.add_row(vec![
                    Cell::new(format!("{} {}", Icons::FILE, name)),
                    Cell::new(format_bytes(*size)).set_alignment(CellAlignment::Right),
                    Cell::new(modified).fg(Color::DarkGrey),
                ]);
            }
        }
    }

    table
}

/// Upload plan summary
pub fn plan_table(key: &str, size: u64, media: &str, plan: &TransferPlan) -> Table {
    let mode = match plan.mode {
        TransferMode::SingleShot => "single request",
        TransferMode::Chunked => "multipart",
    };
    let mut items = vec![
        ("Key", key.to_string()),
        ("Size", format_bytes(size)),
        ("Media", media.to_string()),
        ("Mode", mode.to_string()),
    ];
    if plan.mode == TransferMode::Chunked {
        items.push(("Part size", format_bytes(plan.part_size)));
        items.push(("Parts", plan.part_count(size).to_string()));
        items.push(("Concurrency", plan.max_concurrent_parts.to_string()));
    }
    stats_table(&items)
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Format bytes into human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let base = 1024.0_f64;
    let exp = (bytes_f.ln() / base.ln()).floor() as usize;
    let exp = exp.min(UNITS.len() - 1);

    let value = bytes_f / base.powi(exp as i32);

    if exp == 0 {
        format!("{} {}", bytes, UNITS[exp])
    } else {
        format!("{:.2} {}", value, UNITS[exp])
    }
}

/// Format duration into human-readable string
pub fn format_duration(secs: f64) -> String {
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor();
        let remaining = secs % 60.0;
        format!("{}m {:.0}s", mins, remaining)
    } else {
        let hours = (secs / 3600.0).floor();
        let mins = ((secs % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours, mins)
    }
}

/// Print a styled error message with optional suggestion
pub fn print_error(message: &str, suggestion: Option<&str>) {
    eprintln!(
        "\n{} {}",
        Theme::error(format!("{} Error:", Icons::ERROR)),
        message
    );

    if let Some(hint) = suggestion {
        eprintln!(
            "  {} {}",
            Theme::muted(Icons::ARROW_RIGHT),
            Theme::muted(hint)
        );
    }
    eprintln!();
}

/// Print a styled warning message
pub fn print_warning(message: &str) {
    eprintln!(
        "{} {}",
        Theme::warning(Icons::WARNING.to_string()),
        Theme::warning(message)
    );
}

/// Print a styled success message
pub fn print_success(message: &str) {
    println!(
        "{} {}",
        Theme::success(Icons::SUCCESS.to_string()),
        Theme::success(message)
    );
}

/// Print a styled info message
pub fn print_info(message: &str) {
    println!("{} {}", Theme::primary(Icons::INFO.to_string()), message);
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
        assert_eq!(format_bytes(1073741824), "1.00 GB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.5), "500ms");
        assert_eq!(format_duration(1.0), "1.0s");
        assert_eq!(format_duration(65.0), "1m 5s");
        assert_eq!(format_duration(3665.0), "1h 1m");
    }

    #[test]
    fn test_entries_table_rows() {
        let entries = vec![
            Entry::Folder {
                name: "2024".into(),
                prefix: "trips/2024/".into(),
            },
            Entry::File {
                name: "a.jpg".into(),
                key: "trips/a.jpg".into(),
                size: 2048,
                last_modified: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(86_400)),
            },
        ];

        let rendered = entries_table(&entries).to_string();
        assert!(rendered.contains("2024/"));
        assert!(rendered.contains("a.jpg"));
        assert!(rendered.contains("2.00 KB"));
        assert!(rendered.contains("1970-01-02 00:00"));
    }

    #[test]
    fn test_plan_table_shows_parts_only_when_chunked() {
        let single = TransferPlan {
            mode: TransferMode::SingleShot,
            part_size: 100,
            max_concurrent_parts: 1,
        };
        assert!(!plan_table("a", 100, "document", &single).to_string().contains("Parts"));

        let chunked = TransferPlan {
            mode: TransferMode::Chunked,
            part_size: 10 * 1024 * 1024,
            max_concurrent_parts: 2,
        };
        let rendered = plan_table("clip.mp4", 120 * 1024 * 1024, "video", &chunked).to_string();
        assert!(rendered.contains("Parts"));
        assert!(rendered.contains("12"));
    }
}

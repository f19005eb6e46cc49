//! Output formatting for the CLI.

use colored::Colorize;

use crate::cli::OutputFormat;
use crate::store::{DocumentResult, SearchResult};

/// Human-readable byte count (B, KB, MB, GB).
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}{}", UNITS[0])
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}

/// "3 days ago"-style rendering of an RFC3339 timestamp.
pub fn format_time_ago(timestamp: &str) -> String {
    let Ok(then) = chrono::DateTime::parse_from_rfc3339(timestamp) else {
        return timestamp.to_string();
    };
    let seconds = (chrono::Utc::now() - then.with_timezone(&chrono::Utc)).num_seconds();
    if seconds < 0 {
        return "just now".to_string();
    }
    match seconds {
        0..=59 => "just now".to_string(),
        60..=3599 => format!("{} minutes ago", seconds / 60),
        3600..=86399 => format!("{} hours ago", seconds / 3600),
        86400..=2591999 => format!("{} days ago", seconds / 86400),
        _ => format!("{} months ago", seconds / 2592000),
    }
}

/// Compact `ls`-style timestamp (`Jan 02 15:04`).
pub fn format_ls_time(timestamp: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(timestamp)
        .map(|t| t.format("%b %d %H:%M").to_string())
        .unwrap_or_else(|_| timestamp.to_string())
}

/// Prefix each line with its number, starting at `start`.
pub fn add_line_numbers(text: &str, start: usize) -> String {
    text.lines()
        .enumerate()
        .map(|(i, line)| format!("{}: {}", start + i, line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn search_result_json(result: &SearchResult, full: bool) -> serde_json::Value {
    serde_json::json!({
        "file": result.doc.filepath,
        "displayPath": result.doc.display_path,
        "docid": format!("#{}", result.doc.docid.trim_start_matches('#')),
        "title": result.doc.title,
        "score": (result.score * 10000.0).round() / 10000.0,
        "source": result.source,
        "context": result.doc.context,
        "body": if full { result.doc.body.clone() } else { None },
    })
}

/// Print search results in the requested format.
pub fn format_search_results(results: &[SearchResult], format: &OutputFormat, full: bool) {
    match format {
        OutputFormat::Json => {
            let items: Vec<_> = results
                .iter()
                .map(|r| search_result_json(r, full))
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&items).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Files => {
            for r in results {
                println!("{}", r.doc.filepath);
            }
        }
        OutputFormat::Text => {
            if results.is_empty() {
                println!("{}", "No results found.".dimmed());
                return;
            }
            for (i, r) in results.iter().enumerate() {
                println!(
                    "{}. {} {} {}",
                    (i + 1).to_string().cyan(),
                    format!("{:.2}", r.score).dimmed(),
                    r.doc.display_path.bold(),
                    format!("- {}", r.doc.title).dimmed()
                );
                if let Some(ref ctx) = r.doc.context {
                    println!("   {}", ctx.dimmed());
                }
                if full && let Some(ref body) = r.doc.body {
                    println!("{body}\n");
                }
            }
        }
    }
}

/// Print documents from multi-get, flagging skipped ones.
pub fn format_documents(
    results: &[(DocumentResult, bool, Option<String>)],
    format: &OutputFormat,
) {
    match format {
        OutputFormat::Json => {
            let items: Vec<_> = results
                .iter()
                .map(|(doc, skipped, reason)| {
                    serde_json::json!({
                        "file": doc.filepath,
                        "title": doc.title,
                        "size": doc.body_length,
                        "skipped": skipped,
                        "reason": reason,
                        "context": doc.context,
                        "body": doc.body,
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&items).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Files => {
            for (doc, skipped, _) in results {
                if !skipped {
                    println!("{}", doc.filepath);
                }
            }
        }
        OutputFormat::Text => {
            for (doc, skipped, reason) in results {
                println!("{} {}", "==>".cyan(), doc.filepath.bold());
                if *skipped {
                    println!(
                        "{}\n",
                        format!(
                            "Skipped: {}",
                            reason.as_deref().unwrap_or("file too large")
                        )
                        .yellow()
                    );
                    continue;
                }
                if let Some(ref ctx) = doc.context {
                    println!("{}", format!("Folder Context: {ctx}").dimmed());
                }
                if let Some(ref body) = doc.body {
                    println!("{body}\n");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_units() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.0KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0MB");
    }

    #[test]
    fn line_numbers_start_offset() {
        assert_eq!(add_line_numbers("a\nb", 5), "5: a\n6: b");
    }

    #[test]
    fn time_ago_buckets() {
        let now = chrono::Utc::now();
        let mins = (now - chrono::Duration::minutes(5)).to_rfc3339();
        assert_eq!(format_time_ago(&mins), "5 minutes ago");
        let days = (now - chrono::Duration::days(3)).to_rfc3339();
        assert_eq!(format_time_ago(&days), "3 days ago");
        assert_eq!(format_time_ago("not a timestamp"), "not a timestamp");
    }
}

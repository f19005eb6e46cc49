//! Terminal progress reporting for long-running operations.
//!
//! Emits OSC 9;4 sequences so terminals with taskbar integration show
//! progress, plus plain-text bar rendering for the inline display.

use std::io::Write;

/// Taskbar progress state, reported via OSC 9;4.
pub struct Progress;

impl Progress {
    pub fn new() -> Self {
        Self
    }

    /// Switch the terminal progress indicator to indeterminate.
    pub fn indeterminate(&self) {
        eprint!("\x1b]9;4;3;0\x1b\\");
        let _ = std::io::stderr().flush();
    }

    /// Report a percentage (0-100).
    pub fn set(&self, percent: f64) {
        eprint!("\x1b]9;4;1;{}\x1b\\", percent.clamp(0.0, 100.0) as u32);
        let _ = std::io::stderr().flush();
    }

    /// Clear the terminal progress indicator.
    pub fn clear(&self) {
        eprint!("\x1b]9;4;0;0\x1b\\");
        let _ = std::io::stderr().flush();
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Terminal cursor visibility control.
pub struct Cursor;

impl Cursor {
    pub fn hide() {
        eprint!("\x1b[?25l");
        let _ = std::io::stderr().flush();
    }

    pub fn show() {
        eprint!("\x1b[?25h");
        let _ = std::io::stderr().flush();
    }

    /// Hide the cursor until the guard drops. The guard restores the
    /// cursor on every exit path, including panics and early returns.
    pub fn hide_guard() -> CursorGuard {
        Self::hide();
        CursorGuard
    }
}

/// Restores the cursor on drop.
pub struct CursorGuard;

impl Drop for CursorGuard {
    fn drop(&mut self) {
        Cursor::show();
    }
}

/// Render a fixed-width progress bar like `[=====>    ]`.
pub fn render_progress_bar(percent: f64, width: usize) -> String {
    let filled = ((percent / 100.0) * width as f64).round() as usize;
    let filled = filled.min(width);
    let mut bar = String::with_capacity(width + 2);
    bar.push('[');
    for i in 0..width {
        if i < filled {
            bar.push('=');
        } else if i == filled && percent < 100.0 {
            bar.push('>');
        } else {
            bar.push(' ');
        }
    }
    bar.push(']');
    bar
}

/// Format an ETA in seconds as a compact human string.
pub fn format_eta(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "...".to_string();
    }
    let secs = seconds.round() as u64;
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_bounds() {
        assert_eq!(render_progress_bar(0.0, 10), "[>         ]");
        assert_eq!(render_progress_bar(100.0, 10), "[==========]");
        assert_eq!(render_progress_bar(50.0, 10).len(), 12);
    }

    #[test]
    fn eta_formatting() {
        assert_eq!(format_eta(5.0), "5s");
        assert_eq!(format_eta(83.0), "1m 23s");
        assert_eq!(format_eta(3700.0), "1h 1m");
        assert_eq!(format_eta(f64::NAN), "...");
    }
}

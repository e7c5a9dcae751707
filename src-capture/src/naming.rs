//! Screenshot file naming.
//!
//! Files are named `YYYYMMDD_HHMMSS_mmm_<screen>_<event>.png` so captures sort
//! chronologically and say which screen and trigger produced them.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, TimeZone};

/// What caused a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureTrigger {
    /// First frame drawn after entering a screen
    Enter,
    /// Last frame of a screen being left
    Exit,
    /// Player pressed the screenshot key
    Manual,
}

impl CaptureTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::Exit => "exit",
            Self::Manual => "manual",
        }
    }
}

/// Build a file name for a capture taken at `at`.
pub fn screenshot_file_name<Tz: TimeZone>(
    at: &DateTime<Tz>,
    screen: &str,
    trigger: CaptureTrigger,
) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}_{:03}_{}_{}.png",
        at.format("%Y%m%d_%H%M%S"),
        at.timestamp_subsec_millis().min(999),
        sanitize_screen(screen),
        trigger.as_str()
    )
}

/// Full path for a capture taken now in local time.
pub fn capture_path(dir: &Path, screen: &str, trigger: CaptureTrigger) -> PathBuf {
    dir.join(screenshot_file_name(&Local::now(), screen, trigger))
}

/// Keep screen names safe for use in a file name.
fn sanitize_screen(screen: &str) -> String {
    let cleaned: String = screen
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "screen".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn at() -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2026, 3, 7)
            .unwrap()
            .and_hms_milli_opt(14, 5, 9, 42)
            .unwrap()
            .and_utc()
    }

    #[test]
    fn test_file_name_format() {
        assert_eq!(
            screenshot_file_name(&at(), "game", CaptureTrigger::Manual),
            "20260307_140509_042_game_manual.png"
        );
        assert_eq!(
            screenshot_file_name(&at(), "title", CaptureTrigger::Exit),
            "20260307_140509_042_title_exit.png"
        );
    }

    #[test]
    fn test_screen_names_sanitized() {
        assert_eq!(
            screenshot_file_name(&at(), "Game Over/2", CaptureTrigger::Enter),
            "20260307_140509_042_game_over_2_enter.png"
        );
        assert_eq!(
            screenshot_file_name(&at(), "", CaptureTrigger::Enter),
            "20260307_140509_042_screen_enter.png"
        );
    }

    #[test]
    fn test_capture_path_in_dir() {
        let path = capture_path(Path::new("/shots"), "menu", CaptureTrigger::Enter);
        assert_eq!(path.parent(), Some(Path::new("/shots")));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("_menu_enter.png"));
    }
}

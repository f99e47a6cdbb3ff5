//! # Settings
//!
//! Tunable settings stored as flat key→value pairs in the store.
//!
//! Every key has a fixed default; an absent or unparseable value falls
//! back to the default for that key. The configuration UI that writes
//! these keys is an external collaborator; this module only reads.

use std::time::Duration;

/// Recognized settings keys.
pub mod keys {
    /// Initial lookback window (days) for a machine with no stored data.
    pub const DAYS_BACK: &str = "days_back";
    /// Remote-write chunk size for attendance batches.
    pub const BATCH_SIZE: &str = "batch_size";
    /// Minutes between scheduled runs.
    pub const SCHEDULER_DELAY: &str = "scheduler_delay";
    /// Audit entries older than this many days are pruned.
    pub const CLEAN_LOGS_DAYS: &str = "clean_logs_days";
    /// Attendance rows older than this many days are pruned.
    pub const DELETE_ATTENDANCE_DAYS: &str = "delete_attendance_days";
}

/// Engine settings with their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Lookback window for the first fetch of a machine, in days.
    pub days_back: u32,

    /// Maximum attendance records per remote create call.
    pub batch_size: usize,

    /// Minutes between scheduled runs.
    pub scheduler_delay_minutes: u64,

    /// Retention window for audit entries, in days.
    pub clean_logs_days: u32,

    /// Retention window for attendance rows, in days.
    pub delete_attendance_days: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            days_back: 31,
            batch_size: 1000,
            scheduler_delay_minutes: 10,
            clean_logs_days: 30,
            delete_attendance_days: 180,
        }
    }
}

impl Settings {
    /// Builds settings from stored key/value pairs.
    ///
    /// Unknown keys are ignored; missing or unparseable values keep the
    /// default for that key.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut settings = Settings::default();
        for (key, value) in pairs {
            match key {
                keys::DAYS_BACK => {
                    if let Ok(v) = value.trim().parse() {
                        settings.days_back = v;
                    }
                }
                keys::BATCH_SIZE => {
                    if let Ok(v) = value.trim().parse::<usize>() {
                        if v > 0 {
                            settings.batch_size = v;
                        }
                    }
                }
                keys::SCHEDULER_DELAY => {
                    if let Ok(v) = value.trim().parse() {
                        settings.scheduler_delay_minutes = v;
                    }
                }
                keys::CLEAN_LOGS_DAYS => {
                    if let Ok(v) = value.trim().parse() {
                        settings.clean_logs_days = v;
                    }
                }
                keys::DELETE_ATTENDANCE_DAYS => {
                    if let Ok(v) = value.trim().parse() {
                        settings.delete_attendance_days = v;
                    }
                }
                _ => {}
            }
        }
        settings
    }

    /// Interval between scheduled runs.
    pub fn scheduler_period(&self) -> Duration {
        Duration::from_secs(self.scheduler_delay_minutes * 60)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.days_back, 31);
        assert_eq!(s.batch_size, 1000);
        assert_eq!(s.scheduler_delay_minutes, 10);
        assert_eq!(s.clean_logs_days, 30);
        assert_eq!(s.delete_attendance_days, 180);
    }

    #[test]
    fn from_pairs_overrides_known_keys() {
        let s = Settings::from_pairs([
            (keys::DAYS_BACK, "5"),
            (keys::BATCH_SIZE, "2"),
            (keys::SCHEDULER_DELAY, "30"),
        ]);
        assert_eq!(s.days_back, 5);
        assert_eq!(s.batch_size, 2);
        assert_eq!(s.scheduler_delay_minutes, 30);
        // untouched keys keep defaults
        assert_eq!(s.clean_logs_days, 30);
    }

    #[test]
    fn from_pairs_is_lenient() {
        let s = Settings::from_pairs([
            (keys::DAYS_BACK, "not-a-number"),
            (keys::BATCH_SIZE, "0"), // zero chunks make no progress
            ("some_future_key", "7"),
        ]);
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn scheduler_period_is_minutes() {
        let s = Settings {
            scheduler_delay_minutes: 15,
            ..Settings::default()
        };
        assert_eq!(s.scheduler_period(), Duration::from_secs(900));
    }
}

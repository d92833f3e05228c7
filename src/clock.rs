//! A minimal UTC RFC3339 formatter. Avoids pulling in a date/time crate purely for the
//! compose-document header comment and the bundle manifest's `generated_at_utc` field.

use std::time::{SystemTime, UNIX_EPOCH};

fn is_leap_year(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i64, month: u32) -> i64 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => unreachable!("month out of range"),
    }
}

/// Format the current wall-clock time as `YYYY-MM-DDTHH:MM:SSZ`.
#[must_use]
pub fn utc_now_rfc3339() -> String {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format_unix_timestamp(since_epoch.as_secs())
}

/// Format a Unix timestamp (seconds since epoch) as `YYYY-MM-DDTHH:MM:SSZ`.
#[must_use]
pub fn format_unix_timestamp(total_seconds: u64) -> String {
    let days = (total_seconds / 86_400) as i64;
    let remainder = total_seconds % 86_400;
    let hour = remainder / 3600;
    let minute = (remainder % 3600) / 60;
    let second = remainder % 60;

    let mut year = 1970i64;
    let mut remaining_days = days;
    loop {
        let year_len = if is_leap_year(year) { 366 } else { 365 };
        if remaining_days < year_len {
            break;
        }
        remaining_days -= year_len;
        year += 1;
    }

    let mut month = 1u32;
    loop {
        let month_len = days_in_month(year, month);
        if remaining_days < month_len {
            break;
        }
        remaining_days -= month_len;
        month += 1;
    }
    let day = remaining_days + 1;

    format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}Z")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_formats_as_1970() {
        assert_eq!(format_unix_timestamp(0), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn known_timestamp_round_trips() {
        // 2024-03-01T12:30:45Z
        assert_eq!(format_unix_timestamp(1_709_296_245), "2024-03-01T12:30:45Z");
    }

    #[test]
    fn leap_day_is_handled() {
        // 2024-02-29T00:00:00Z
        assert_eq!(format_unix_timestamp(1_709_164_800), "2024-02-29T00:00:00Z");
    }

    #[test]
    fn now_produces_a_plausible_string() {
        let now = utc_now_rfc3339();
        assert_eq!(now.len(), 20);
        assert!(now.starts_with("20"));
    }
}

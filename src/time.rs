use chrono::NaiveDateTime;

/// Parses the upstream `YYYYMMDD HH:MM` timestamps. Some feeds append seconds.
pub fn parse_upstream(timestamp: &str) -> Option<NaiveDateTime> {
    let timestamp = timestamp.trim();
    NaiveDateTime::parse_from_str(timestamp, "%Y%m%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(timestamp, "%Y%m%d %H:%M"))
        // Train Tracker uses ISO-8601 without an offset.
        .or_else(|_| NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

/// `20240105 14:32` -> `2024-01-05 14:32`. Unparseable input is passed through.
pub fn display_timestamp(timestamp: &str) -> String {
    match parse_upstream(timestamp) {
        Some(time) => time.format("%Y-%m-%d %H:%M").to_string(),
        None => timestamp.to_string(),
    }
}

/// Wall-clock form shown next to a prediction, e.g. `2:45 PM`.
pub fn clock_time(timestamp: &str) -> String {
    match parse_upstream(timestamp) {
        Some(time) => time.format("%-I:%M %p").to_string(),
        None => timestamp.to_string(),
    }
}

/// Whole minutes from `requested` until `predicted`, rounded.
pub fn minutes_between(requested: &str, predicted: &str) -> Option<i64> {
    let requested = parse_upstream(requested)?;
    let predicted = parse_upstream(predicted)?;
    let secs = (predicted - requested).num_seconds();
    Some((secs as f64 / 60.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reformats_bus_tracker_timestamps() {
        assert_eq!(display_timestamp("20240105 14:32"), "2024-01-05 14:32");
        assert_eq!(display_timestamp("20240105 14:32:10"), "2024-01-05 14:32");
        assert_eq!(display_timestamp("garbage"), "garbage");
    }

    #[test]
    fn prediction_minutes_round() {
        assert_eq!(minutes_between("20240105 14:32", "20240105 14:45"), Some(13));
        assert_eq!(minutes_between("20240105 14:32:00", "20240105 14:33:40"), Some(2));
        assert_eq!(minutes_between("20240105 23:58", "20240106 00:03"), Some(5));
        assert_eq!(minutes_between("nope", "20240106 00:03"), None);
    }

    #[test]
    fn clock_time_is_twelve_hour() {
        assert_eq!(clock_time("20240105 14:05"), "2:05 PM");
        assert_eq!(clock_time("2024-01-05T09:30:00"), "9:30 AM");
    }
}

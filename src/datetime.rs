use anyhow::Result;
use chrono::{Local, NaiveDateTime};

/// Canonical timestamp format used everywhere a record carries a time:
/// timezone-naive, second precision, lexicographically sortable.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format(at: NaiveDateTime) -> String {
    at.format(DATETIME_FORMAT).to_string()
}

pub fn parse(source: &str) -> Result<NaiveDateTime> {
    Ok(NaiveDateTime::parse_from_str(source, DATETIME_FORMAT)?)
}

/// Current local wall-clock time, truncated to the canonical precision.
pub fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn format_and_parse_round_trip() -> anyhow::Result<()> {
        let at = NaiveDate::from_ymd_opt(2013, 12, 12)
            .unwrap()
            .and_hms_opt(11, 11, 11)
            .unwrap();
        let formatted = format(at);
        assert_eq!(formatted, "2013-12-12 11:11:11");
        assert_eq!(parse(&formatted)?, at);
        Ok(())
    }

    #[test]
    fn canonical_format_sorts_lexicographically() {
        let earlier = NaiveDate::from_ymd_opt(2014, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let later = NaiveDate::from_ymd_opt(2014, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 1)
            .unwrap();
        assert!(format(earlier) < format(later));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse("not a datetime").is_err());
        assert!(parse("2014-01-01T00:00:00").is_err());
    }
}

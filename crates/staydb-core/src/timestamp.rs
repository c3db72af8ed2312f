use time::{format_description::FormatItem, macros::format_description, OffsetDateTime, PrimitiveDateTime};

/// Canonical textual form. Fixed width, so lexical order matches time order.
const FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]");

/// Accepted on input for documents written without fractional seconds.
const FORMAT_WHOLE_SECONDS: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

/// Current UTC time truncated to the precision the canonical form can carry.
pub fn now() -> OffsetDateTime {
    truncate(OffsetDateTime::now_utc())
}

pub fn truncate(ts: OffsetDateTime) -> OffsetDateTime {
    let micros = ts.nanosecond() / 1_000;
    ts.replace_nanosecond(micros * 1_000).unwrap_or(ts)
}

pub fn format(ts: OffsetDateTime) -> String {
    let utc = ts.to_offset(time::UtcOffset::UTC);
    utc.format(FORMAT).unwrap_or_else(|_| utc.to_string())
}

pub fn parse(value: &str) -> Option<OffsetDateTime> {
    PrimitiveDateTime::parse(value, FORMAT)
        .or_else(|_| PrimitiveDateTime::parse(value, FORMAT_WHOLE_SECONDS))
        .ok()
        .map(|dt| truncate(dt.assume_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_format_is_fixed_width() {
        let ts = datetime!(2017-09-28 21:05:54.119427 UTC);
        assert_eq!(format(ts), "2017-09-28T21:05:54.119427");

        let whole = datetime!(2017-09-28 21:05:54 UTC);
        assert_eq!(format(whole), "2017-09-28T21:05:54.000000");
    }

    #[test]
    fn test_parse_accepts_both_forms() {
        assert_eq!(parse("2017-09-28T21:05:54.119427"), Some(datetime!(2017-09-28 21:05:54.119427 UTC)));
        assert_eq!(parse("2017-09-28T21:05:54"), Some(datetime!(2017-09-28 21:05:54 UTC)));
        assert_eq!(parse("yesterday"), None);
    }

    #[test]
    fn test_now_round_trips() {
        let ts = now();
        assert_eq!(parse(&format(ts)), Some(ts));
    }

    #[test]
    fn test_lexical_order_matches_time_order() {
        let earlier = format(datetime!(2023-01-01 09:00:00.5 UTC));
        let later = format(datetime!(2023-01-01 10:00:00 UTC));
        assert!(earlier < later);
    }
}

//! Parsing for the `modified` system field.

use chrono::NaiveDateTime;

/// A sentinel earlier than every valid `modified` value. Used only for
/// conflict tie-breaking and totality in the Direction Resolver — never
/// persisted.
pub fn sentinel() -> NaiveDateTime {
    NaiveDateTime::parse_from_str("0001-01-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
}

/// Parse a Frappe-style `modified` timestamp: tries
/// `YYYY-MM-DD HH:MM:SS.ffffff` first, falls back to
/// `YYYY-MM-DD HH:MM:SS`, and returns [`sentinel`] when absent or
/// unparseable.
pub fn parse(value: Option<&str>) -> NaiveDateTime {
    let Some(text) = value.filter(|s| !s.is_empty()) else {
        return sentinel();
    };

    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S"))
        .unwrap_or_else(|_| sentinel())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_microseconds() {
        let t = parse(Some("2024-02-01 09:00:00.123456"));
        assert_eq!(t.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-02-01 09:00:00");
    }

    #[test]
    fn parses_without_microseconds() {
        let t = parse(Some("2024-02-01 09:00:00"));
        assert!(t > sentinel());
    }

    #[test]
    fn falls_back_to_sentinel_on_missing_or_garbage() {
        assert_eq!(parse(None), sentinel());
        assert_eq!(parse(Some("")), sentinel());
        assert_eq!(parse(Some("not a date")), sentinel());
    }

    #[test]
    fn orders_correctly_for_tie_breaking() {
        let earlier = parse(Some("2024-02-01 09:00:00"));
        let later = parse(Some("2024-02-01 10:00:00"));
        assert!(later > earlier);
    }
}

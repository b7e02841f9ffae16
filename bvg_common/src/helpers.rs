/// Parse a boolean flag from a string value, or return the given default value otherwise.
pub fn parse_boolean_flag(value: Option<String>, default: bool) -> bool {
    let value = match value {
        Some(v) => v,
        None => return default,
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

/// Parse a whole number of seconds from a string value. Returns `None` for missing or malformed input so that the
/// caller can log and fall back to its default.
pub fn parse_seconds(value: Option<String>) -> Option<i64> {
    value.and_then(|v| v.trim().parse::<i64>().ok()).filter(|secs| *secs >= 0)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn boolean_flags() {
        assert!(parse_boolean_flag(Some("1".into()), false));
        assert!(parse_boolean_flag(Some("Yes".into()), false));
        assert!(!parse_boolean_flag(Some("off".into()), true));
        assert!(parse_boolean_flag(None, true));
        assert!(!parse_boolean_flag(Some("garbage".into()), false));
    }

    #[test]
    fn seconds() {
        assert_eq!(parse_seconds(Some("90".into())), Some(90));
        assert_eq!(parse_seconds(Some(" 15 ".into())), Some(15));
        assert_eq!(parse_seconds(Some("-3".into())), None);
        assert_eq!(parse_seconds(Some("abc".into())), None);
        assert_eq!(parse_seconds(None), None);
    }
}

// Price input parsing.
//
// Accepts what a player would type into a price box: surrounding whitespace,
// an optional sign, and a run of decimal digits. Anything after the digits is
// ignored, so "150 credits" reads as 150.

/// Parse a price typed by a player.
///
/// Returns `None` when there are no leading digits, when the value does not
/// fit in an `i64`, or when it is negative.
pub fn parse_price(text: &str) -> Option<i64> {
    let trimmed = text.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let digits_len = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits_len == 0 {
        return None;
    }

    let value: i64 = rest[..digits_len].parse().ok()?;
    if negative && value != 0 {
        return None;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_numbers() {
        assert_eq!(parse_price("150"), Some(150));
        assert_eq!(parse_price("0"), Some(0));
        assert_eq!(parse_price("  42"), Some(42));
        assert_eq!(parse_price("+7"), Some(7));
    }

    #[test]
    fn test_trailing_text_is_ignored() {
        assert_eq!(parse_price("150 credits"), Some(150));
        assert_eq!(parse_price("12.5"), Some(12));
    }

    #[test]
    fn test_rejects_non_numeric() {
        assert_eq!(parse_price("abc"), None);
        assert_eq!(parse_price(""), None);
        assert_eq!(parse_price("   "), None);
        assert_eq!(parse_price("-"), None);
        assert_eq!(parse_price("$5"), None);
    }

    #[test]
    fn test_rejects_negative_and_overflow() {
        assert_eq!(parse_price("-5"), None);
        assert_eq!(parse_price("-0"), Some(0));
        assert_eq!(parse_price("99999999999999999999"), None);
    }
}

use crate::error::RowIssue;

/// 1) Trim whitespace + strip outer quotes if present.
pub fn clean_str(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// 2) Normalize a spreadsheet count such as `"120.500"` into `120500`.
///
/// `.` is a thousands separator, never a decimal point. Anything left over
/// that is not an ASCII digit (including an empty cell) is a `NumericParse`.
pub fn normalize_count(raw: &str) -> Result<u64, RowIssue> {
    let cleaned = clean_str(raw);
    let digits: String = cleaned.chars().filter(|c| *c != '.').collect();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RowIssue::NumericParse);
    }
    digits.parse::<u64>().map_err(|_| RowIssue::NumericParse)
}

/// Same as [`normalize_count`] but for optional cells; a missing cell is an error.
pub fn normalize_opt_count(raw: Option<&str>) -> Result<u64, RowIssue> {
    raw.map_or(Err(RowIssue::NumericParse), normalize_count)
}

/// A zip is exactly five ASCII digits.
pub fn is_zip(s: &str) -> bool {
    s.len() == 5 && s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_str() {
        assert_eq!(clean_str("  08001 "), "08001");
        assert_eq!(clean_str("\" Barcelona \""), "Barcelona");
        assert_eq!(clean_str("\""), "\"");
    }

    #[test]
    fn test_normalize_count_strips_separators() {
        assert_eq!(normalize_count("120.500"), Ok(120_500));
        assert_eq!(normalize_count("1.234.567"), Ok(1_234_567));
        assert_eq!(normalize_count(" 42 "), Ok(42));
        assert_eq!(normalize_count("0"), Ok(0));
    }

    #[test]
    fn test_normalize_count_rejects_non_digits() {
        assert_eq!(normalize_count(""), Err(RowIssue::NumericParse));
        assert_eq!(normalize_count("..."), Err(RowIssue::NumericParse));
        assert_eq!(normalize_count("12,5"), Err(RowIssue::NumericParse));
        assert_eq!(normalize_count("-3"), Err(RowIssue::NumericParse));
        assert_eq!(normalize_count("n/a"), Err(RowIssue::NumericParse));
        assert_eq!(normalize_opt_count(None), Err(RowIssue::NumericParse));
    }

    #[test]
    fn test_is_zip() {
        assert!(is_zip("08001"));
        assert!(!is_zip("8001"));
        assert!(!is_zip("08a01"));
    }
}

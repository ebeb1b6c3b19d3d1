use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

static READING_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})([-/])(\d{2})([-/])(\d{2})(?:[ T].*)?$").expect("reading date regex")
});

/// Parse the leading `YYYY-MM-DD` (or `YYYY/MM/DD`) of a reading's region
/// text, optionally followed by a time part. Both separators must agree and
/// the date must exist on the calendar.
pub fn parse_reading_date(s: &str) -> Option<NaiveDate> {
    let caps = READING_DATE.captures(s.trim())?;
    if &caps[2] != &caps[4] {
        return None;
    }
    let year: i32 = caps[1].parse().ok()?;
    let month: u32 = caps[3].parse().ok()?;
    let day: u32 = caps[5].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

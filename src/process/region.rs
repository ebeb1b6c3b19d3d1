// src/process/region.rs
//! Classification of the `region` cell.
//!
//! A header looks like `"08001 Barcelona"`: five digits at the very start,
//! then whitespace, then the district name. A reading looks like
//! `"2020-01-01"`. The zip match is anchored so a district name that itself
//! contains five digits (or the zip again) keeps that text intact.

use chrono::Datelike;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::process::date_parser::parse_reading_date;

static HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^(\d{5})(?:\s+(.*))?$").expect("header regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionKind {
    /// `district` may be empty: the row still opens a new group but its
    /// readings cannot be attributed.
    Header { zip: String, district: String },
    Reading { year: i32 },
    Malformed,
}

impl RegionKind {
    pub fn is_header(&self) -> bool {
        matches!(self, RegionKind::Header { .. })
    }
}

pub fn classify(region: &str) -> RegionKind {
    let text = region.trim();

    if let Some(caps) = HEADER.captures(text) {
        let zip = caps[1].to_string();
        let district = caps
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        return RegionKind::Header { zip, district };
    }

    match parse_reading_date(text) {
        Some(date) => RegionKind::Reading { year: date.year() },
        None => RegionKind::Malformed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(zip: &str, district: &str) -> RegionKind {
        RegionKind::Header {
            zip: zip.into(),
            district: district.into(),
        }
    }

    #[test]
    fn test_classify_header() {
        assert_eq!(classify("08001 Barcelona"), header("08001", "Barcelona"));
        assert_eq!(
            classify("  08030   Sant Andreu  "),
            header("08030", "Sant Andreu")
        );
    }

    #[test]
    fn test_header_removes_only_the_leading_zip() {
        assert_eq!(
            classify("08001 Barcelona 08001"),
            header("08001", "Barcelona 08001")
        );
        assert_eq!(
            classify("08001 08001 Nord"),
            header("08001", "08001 Nord")
        );
        assert_eq!(classify("08002 Zona 12345"), header("08002", "Zona 12345"));
    }

    #[test]
    fn test_header_round_trips_generated_zips_and_names() {
        let words = ["Barcelona", "Sant Martí", "Nou Barris", "L'Hospitalet", "Zona 4"];
        for i in 0..200u32 {
            let zip = format!("{:05}", (i * 7919) % 100_000);
            let mut district = words[(i as usize) % words.len()].to_string();
            for k in 0..(i % 3) {
                district.push_str(&format!(" {}", words[((i + k) as usize * 3) % words.len()]));
            }
            assert!(!district.contains(&zip));
            let sep = if i % 2 == 0 { " " } else { "\t " };
            assert_eq!(
                classify(&format!("{}{}{}", zip, sep, district)),
                header(&zip, &district),
                "zip={} district={}",
                zip,
                district
            );
        }
    }

    #[test]
    fn test_header_without_name_is_still_a_header() {
        assert_eq!(classify("08001"), header("08001", ""));
    }

    #[test]
    fn test_digits_not_at_start_are_not_a_zip() {
        assert_eq!(classify("Barcelona 08001"), RegionKind::Malformed);
        assert_eq!(classify("080011 Barcelona"), RegionKind::Malformed);
        assert_eq!(classify("08001-Barcelona"), RegionKind::Malformed);
    }

    #[test]
    fn test_classify_reading() {
        assert_eq!(classify("2020-01-01"), RegionKind::Reading { year: 2020 });
        assert_eq!(
            classify("2021-01-01 00:00:00"),
            RegionKind::Reading { year: 2021 }
        );
    }

    #[test]
    fn test_classify_malformed() {
        assert_eq!(classify(""), RegionKind::Malformed);
        assert_eq!(classify("Total"), RegionKind::Malformed);
        assert_eq!(classify("2020-02-30"), RegionKind::Malformed);
    }
}

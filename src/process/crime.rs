// src/process/crime.rs
//! Landed crime counts, one row per (zip, year, quarter, category).

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::RowIssue;
use crate::process::utils::{clean_str, is_zip, normalize_count};

/// A crime row as it appears in the landed CSV, every cell still text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawCrimeRow {
    pub zip: String,
    #[serde(default)]
    pub district: String,
    pub year: String,
    pub quarter: String,
    #[serde(default)]
    pub category: String,
    pub count: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrimeRecord {
    pub zip: String,
    pub district: String,
    pub year: i32,
    pub quarter: u8,
    pub category: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrimeReport {
    pub input_rows: u64,
    pub output_rows: u64,
    pub invalid_zip: u64,
    pub invalid_quarter: u64,
    pub numeric_parse: u64,
}

impl TryFrom<&RawCrimeRow> for CrimeRecord {
    type Error = RowIssue;

    fn try_from(raw: &RawCrimeRow) -> Result<Self, RowIssue> {
        let zip = clean_str(&raw.zip);
        if !is_zip(&zip) {
            return Err(RowIssue::InvalidZip);
        }
        let year = clean_str(&raw.year)
            .parse::<i32>()
            .map_err(|_| RowIssue::NumericParse)?;
        let quarter = clean_str(&raw.quarter)
            .parse::<u8>()
            .ok()
            .filter(|q| (1..=4).contains(q))
            .ok_or(RowIssue::InvalidQuarter)?;
        let count = normalize_count(&raw.count)?;

        Ok(CrimeRecord {
            zip,
            district: clean_str(&raw.district),
            year,
            quarter,
            category: clean_str(&raw.category),
            count,
        })
    }
}

/// Normalize landed rows, excluding (and counting) the ones that fail.
pub fn normalize_crime(rows: &[RawCrimeRow]) -> (Vec<CrimeRecord>, CrimeReport) {
    let mut report = CrimeReport {
        input_rows: rows.len() as u64,
        ..Default::default()
    };
    let mut out = Vec::with_capacity(rows.len());

    for (serial, raw) in rows.iter().enumerate() {
        match CrimeRecord::try_from(raw) {
            Ok(rec) => out.push(rec),
            Err(issue) => {
                warn!(serial, zip = %raw.zip, reason = %issue, "crime row excluded");
                match issue {
                    RowIssue::InvalidZip => report.invalid_zip += 1,
                    RowIssue::InvalidQuarter => report.invalid_quarter += 1,
                    _ => report.numeric_parse += 1,
                }
            }
        }
    }
    report.output_rows = out.len() as u64;
    info!(
        input = report.input_rows,
        output = report.output_rows,
        "normalized crime rows"
    );
    (out, report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(zip: &str, year: &str, quarter: &str, count: &str) -> RawCrimeRow {
        RawCrimeRow {
            zip: zip.into(),
            district: "Ciutat Vella".into(),
            year: year.into(),
            quarter: quarter.into(),
            category: "theft".into(),
            count: count.into(),
        }
    }

    #[test]
    fn test_normalize_crime() {
        let rows = vec![
            raw("08001", "2020", "1", "1.501"),
            raw("8001", "2020", "1", "3"),
            raw("08001", "2020", "5", "3"),
            raw("08001", "2020", "2", "x"),
            raw("08002", "twenty", "2", "1"),
        ];
        let (out, report) = normalize_crime(&rows);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].count, 1501);
        assert_eq!(out[0].quarter, 1);
        assert_eq!(
            report,
            CrimeReport {
                input_rows: 5,
                output_rows: 1,
                invalid_zip: 1,
                invalid_quarter: 1,
                numeric_parse: 2,
            }
        );
    }
}

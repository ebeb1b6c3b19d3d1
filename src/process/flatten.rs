// src/process/flatten.rs
//! Turns order-encoded district groups into self-contained yearly readings.
//!
//! Every row gets a serial equal to its position. Header rows mark their own
//! serial as "parent"; a forward-fill over that column gives every reading
//! the serial of the header it belongs to, from which zip and district are
//! resolved. Classification and count parsing are per-row and run on the
//! rayon pool; only the fill depends on order.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::RowIssue;
use crate::process::fill::forward_fill_sharded;
use crate::process::raw_table::RawRecord;
use crate::process::region::{classify, RegionKind};
use crate::process::utils::normalize_opt_count;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlattenedRecord {
    pub zip: String,
    pub district: String,
    pub year: i32,
    pub men: u64,
    pub women: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlattenReport {
    pub input_rows: u64,
    pub header_rows: u64,
    pub reading_rows: u64,
    pub output_rows: u64,
    pub malformed_region: u64,
    pub numeric_parse: u64,
    pub orphaned: u64,
}

impl FlattenReport {
    fn count(&mut self, issue: RowIssue) {
        match issue {
            RowIssue::MalformedRegion => self.malformed_region += 1,
            RowIssue::NumericParse => self.numeric_parse += 1,
            RowIssue::Orphaned => self.orphaned += 1,
            // not produced by the flattener
            RowIssue::InvalidZip | RowIssue::InvalidQuarter => {}
        }
    }

    pub fn excluded(&self) -> u64 {
        self.malformed_region + self.numeric_parse + self.orphaned
    }
}

#[derive(Debug, Clone, Default)]
pub struct Flattened {
    pub records: Vec<FlattenedRecord>,
    pub report: FlattenReport,
}

enum Outcome {
    Header { valid: bool },
    Record(FlattenedRecord),
    Excluded(RowIssue),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HierarchyFlattener {
    /// Rows per shard for the parallel fill; `0` scans sequentially.
    shard_len: usize,
}

impl HierarchyFlattener {
    pub fn new(shard_len: usize) -> Self {
        Self { shard_len }
    }

    /// `rows` must be in the order the reader produced them.
    #[instrument(level = "info", skip(self, rows), fields(rows = rows.len()))]
    pub fn flatten(&self, rows: &[RawRecord]) -> Flattened {
        // 1) classify every row; position in `kinds` is the serial
        let kinds: Vec<RegionKind> = rows.par_iter().map(|r| classify(&r.region)).collect();

        // 2) parent column: a header points at itself, everything else is unset
        let markers: Vec<Option<usize>> = kinds
            .iter()
            .enumerate()
            .map(|(serial, kind)| kind.is_header().then_some(serial))
            .collect();

        // 3) forward-fill the parent serial
        let parents = forward_fill_sharded(&markers, self.shard_len);
        debug!(shard_len = self.shard_len, "parent serials filled");

        // 4) resolve, drop headers, parse year and counts
        let outcomes: Vec<Outcome> = rows
            .par_iter()
            .zip(kinds.par_iter())
            .zip(parents.par_iter())
            .map(|((row, kind), parent)| resolve(row, kind, *parent, &kinds))
            .collect();

        let mut report = FlattenReport {
            input_rows: rows.len() as u64,
            ..Default::default()
        };
        let mut records = Vec::with_capacity(outcomes.len());
        for (serial, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Outcome::Header { valid } => {
                    report.header_rows += 1;
                    if !valid {
                        warn!(serial, region = %rows[serial].region, "header without district name");
                        report.count(RowIssue::MalformedRegion);
                    }
                }
                Outcome::Record(rec) => {
                    report.reading_rows += 1;
                    records.push(rec);
                }
                Outcome::Excluded(issue) => {
                    if issue != RowIssue::MalformedRegion {
                        report.reading_rows += 1;
                    }
                    warn!(serial, region = %rows[serial].region, reason = %issue, "row excluded");
                    report.count(issue);
                }
            }
        }
        report.output_rows = records.len() as u64;

        info!(
            input = report.input_rows,
            headers = report.header_rows,
            output = report.output_rows,
            excluded = report.excluded(),
            malformed_region = report.malformed_region,
            numeric_parse = report.numeric_parse,
            orphaned = report.orphaned,
            "flattened"
        );
        Flattened { records, report }
    }
}

fn resolve(row: &RawRecord, kind: &RegionKind, parent: Option<usize>, kinds: &[RegionKind]) -> Outcome {
    let year = match kind {
        RegionKind::Header { district, .. } => {
            return Outcome::Header {
                valid: !district.is_empty(),
            }
        }
        RegionKind::Malformed => return Outcome::Excluded(RowIssue::MalformedRegion),
        RegionKind::Reading { year } => *year,
    };

    let (zip, district) = match parent.map(|p| &kinds[p]) {
        Some(RegionKind::Header { zip, district }) if !district.is_empty() => (zip, district),
        _ => return Outcome::Excluded(RowIssue::Orphaned),
    };

    let counts = normalize_opt_count(row.men.as_deref())
        .and_then(|men| normalize_opt_count(row.women.as_deref()).map(|women| (men, women)));
    let (men, women) = match counts {
        Ok(pair) => pair,
        Err(issue) => return Outcome::Excluded(issue),
    };
    match men.checked_add(women) {
        Some(total) => Outcome::Record(FlattenedRecord {
            zip: zip.clone(),
            district: district.clone(),
            year,
            men,
            women,
            total,
        }),
        None => Outcome::Excluded(RowIssue::NumericParse),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(region: &str) -> RawRecord {
        RawRecord::new(region, None, None)
    }

    fn reading(region: &str, men: &str, women: &str) -> RawRecord {
        RawRecord::new(region, Some(men), Some(women))
    }

    fn scenario() -> Vec<RawRecord> {
        vec![
            header("08001 Barcelona"),
            reading("2020-01-01", "120.500", "130.200"),
            reading("2021-01-01", "125.000", "135.000"),
            header("08002 Badalona"),
            reading("2020-01-01", "10.000", "12.000"),
        ]
    }

    fn rec(zip: &str, district: &str, year: i32, men: u64, women: u64) -> FlattenedRecord {
        FlattenedRecord {
            zip: zip.into(),
            district: district.into(),
            year,
            men,
            women,
            total: men + women,
        }
    }

    #[test]
    fn test_flatten_scenario() {
        let out = HierarchyFlattener::default().flatten(&scenario());
        assert_eq!(
            out.records,
            vec![
                rec("08001", "Barcelona", 2020, 120_500, 130_200),
                rec("08001", "Barcelona", 2021, 125_000, 135_000),
                rec("08002", "Badalona", 2020, 10_000, 12_000),
            ]
        );
        assert_eq!(out.records[0].total, 250_700);
        assert_eq!(out.report.header_rows, 2);
        assert_eq!(out.report.output_rows, 3);
        assert_eq!(out.report.excluded(), 0);
    }

    #[test]
    fn test_sharded_flatten_is_identical() {
        let mut rows = Vec::new();
        for d in 0..30 {
            rows.push(header(&format!("{:05} District {}", 8000 + d, d)));
            for y in 0..(d % 4) {
                rows.push(reading(&format!("{}-01-01", 2015 + y), "1.000", &format!("{}", d)));
            }
        }
        let expected = HierarchyFlattener::new(0).flatten(&rows);
        for shard_len in [1, 2, 3, 5, 7, 64] {
            let got = HierarchyFlattener::new(shard_len).flatten(&rows);
            assert_eq!(got.records, expected.records, "shard_len={}", shard_len);
            assert_eq!(got.report, expected.report);
        }
    }

    #[test]
    fn test_header_without_readings_yields_nothing() {
        let rows = vec![
            header("08001 Barcelona"),
            header("08002 Badalona"),
            reading("2020-01-01", "1", "2"),
        ];
        let out = HierarchyFlattener::default().flatten(&rows);
        assert_eq!(out.records, vec![rec("08002", "Badalona", 2020, 1, 2)]);
        assert_eq!(out.report.excluded(), 0);
    }

    #[test]
    fn test_district_keeps_embedded_zip() {
        let rows = vec![
            header("08001 Ciutat 08001 Vella"),
            reading("2020-01-01", "1", "1"),
        ];
        let out = HierarchyFlattener::default().flatten(&rows);
        assert_eq!(out.records[0].zip, "08001");
        assert_eq!(out.records[0].district, "Ciutat 08001 Vella");
    }

    #[test]
    fn test_bad_rows_are_counted_not_fatal() {
        let rows = vec![
            reading("2019-01-01", "5", "5"),
            header("08001 Barcelona"),
            reading("2020-01-01", "1,5", "2"),
            RawRecord::new("Total", Some("9"), Some("9")),
            reading("2021-01-01", "3", "4"),
            RawRecord::new("2022-01-01", Some("3"), None),
            header("08003"),
            reading("2020-01-01", "7", "7"),
        ];
        let out = HierarchyFlattener::default().flatten(&rows);
        assert_eq!(out.records, vec![rec("08001", "Barcelona", 2021, 3, 4)]);
        let r = out.report;
        assert_eq!(r.input_rows, 8);
        assert_eq!(r.header_rows, 2);
        assert_eq!(r.orphaned, 2);
        assert_eq!(r.numeric_parse, 2);
        // "Total" plus the nameless header
        assert_eq!(r.malformed_region, 2);
        assert_eq!(r.output_rows, 1);
    }

    #[test]
    fn test_total_overflow_is_excluded() {
        let rows = vec![
            header("08001 Barcelona"),
            reading("2020-01-01", "18.446.744.073.709.551.615", "1"),
            reading("2021-01-01", "18.446.744.073.709.551.614", "1"),
        ];
        let out = HierarchyFlattener::new(1).flatten(&rows);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].total, u64::MAX);
        assert_eq!(out.report.numeric_parse, 1);
        assert_eq!(out.report.reading_rows, 2);
    }

    #[test]
    fn test_total_is_sum() {
        let out = HierarchyFlattener::new(2).flatten(&scenario());
        assert!(out.records.iter().all(|r| r.total == r.men + r.women));
    }
}

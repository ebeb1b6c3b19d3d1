// src/process/integrate.rs
//! Inner join of crime counts onto flattened demographics by `(zip, year)`,
//! deriving incidents per thousand residents.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::process::crime::CrimeRecord;
use crate::process::flatten::FlattenedRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedRecord {
    pub zip: String,
    pub district: String,
    pub year: i32,
    pub quarter: u8,
    pub category: String,
    pub count: u64,
    pub men: u64,
    pub women: u64,
    pub total: u64,
    /// `None` when the population is zero.
    pub crime_incidence: Option<f64>,
    pub incidence_undefined: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationReport {
    pub demographic_rows: u64,
    pub crime_rows: u64,
    pub joined_rows: u64,
    /// Distinct `(zip, year)` keys only present in demographics.
    pub unmatched_demographic_keys: u64,
    /// Distinct `(zip, year)` keys only present in crime data.
    pub unmatched_crime_keys: u64,
    pub undefined_metric: u64,
}

/// `round(count / total * 1000, 2)`, rounding half away from zero.
pub fn crime_incidence(count: u64, total: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    let per_thousand = count as f64 / total as f64 * 1000.0;
    Some((per_thousand * 100.0).round() / 100.0)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Integrator;

impl Integrator {
    /// Output follows crime input order; several demographic rows for one key
    /// each produce a joined row, in demographic order.
    #[instrument(level = "info", skip_all, fields(demographics = demographics.len(), crime = crime.len()))]
    pub fn integrate(
        &self,
        demographics: &[FlattenedRecord],
        crime: &[CrimeRecord],
    ) -> (Vec<JoinedRecord>, IntegrationReport) {
        let mut index: HashMap<(&str, i32), Vec<&FlattenedRecord>> = HashMap::new();
        for d in demographics {
            index.entry((d.zip.as_str(), d.year)).or_default().push(d);
        }

        let mut report = IntegrationReport {
            demographic_rows: demographics.len() as u64,
            crime_rows: crime.len() as u64,
            ..Default::default()
        };
        let mut matched: BTreeSet<(&str, i32)> = BTreeSet::new();
        let mut unmatched_crime: BTreeSet<(&str, i32)> = BTreeSet::new();
        let mut out = Vec::with_capacity(crime.len());

        for c in crime {
            let key = (c.zip.as_str(), c.year);
            let Some(pop) = index.get(&key) else {
                unmatched_crime.insert(key);
                continue;
            };
            matched.insert(key);
            for d in pop {
                let incidence = crime_incidence(c.count, d.total);
                if incidence.is_none() {
                    report.undefined_metric += 1;
                    warn!(zip = %c.zip, year = c.year, quarter = c.quarter, "zero population, incidence undefined");
                }
                out.push(JoinedRecord {
                    zip: c.zip.clone(),
                    district: c.district.clone(),
                    year: c.year,
                    quarter: c.quarter,
                    category: c.category.clone(),
                    count: c.count,
                    men: d.men,
                    women: d.women,
                    total: d.total,
                    crime_incidence: incidence,
                    incidence_undefined: incidence.is_none(),
                });
            }
        }

        report.joined_rows = out.len() as u64;
        report.unmatched_crime_keys = unmatched_crime.len() as u64;
        report.unmatched_demographic_keys =
            index.keys().filter(|k| !matched.contains(*k)).count() as u64;

        if report.unmatched_crime_keys > 0 || report.unmatched_demographic_keys > 0 {
            warn!(
                unmatched_demographic_keys = report.unmatched_demographic_keys,
                unmatched_crime_keys = report.unmatched_crime_keys,
                sample_crime_keys = ?unmatched_crime.iter().take(5).collect::<Vec<_>>(),
                "join dropped keys present on one side only"
            );
        }
        info!(
            joined = report.joined_rows,
            undefined_metric = report.undefined_metric,
            "integrated"
        );
        (out, report)
    }
}

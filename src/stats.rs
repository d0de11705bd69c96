//! Summaries over a loaded record set. Pure: no I/O, no mutation.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::{Record, RecordStatus};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub analyzed: usize,
    pub flagged: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.analyzed + self.flagged
    }
}

/// How repeated allergens inside one record's list are counted.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AllergenCounting {
    /// Each allergen counts at most once per record.
    #[default]
    DistinctPerRecord,
    /// Every list entry counts, duplicates included.
    EveryOccurrence,
}

pub fn counts_by_status(records: &[Record]) -> StatusCounts {
    records.iter().fold(StatusCounts::default(), |mut acc, r| {
        match r.status {
            RecordStatus::Pending => acc.pending += 1,
            RecordStatus::Analyzed => acc.analyzed += 1,
            RecordStatus::Flagged => acc.flagged += 1,
        }
        acc
    })
}

pub fn allergen_frequency(records: &[Record], counting: AllergenCounting) -> BTreeMap<String, usize> {
    let mut freq = BTreeMap::new();
    for record in records {
        match counting {
            AllergenCounting::EveryOccurrence => {
                for allergen in &record.potential_allergens {
                    *freq.entry(allergen.clone()).or_insert(0) += 1;
                }
            }
            AllergenCounting::DistinctPerRecord => {
                let distinct: BTreeSet<&String> = record.potential_allergens.iter().collect();
                for allergen in distinct {
                    *freq.entry(allergen.clone()).or_insert(0) += 1;
                }
            }
        }
    }
    freq
}

/// Case-insensitive substring match on owner, status, or any allergen.
/// An empty query keeps everything. Whitespace in the query is significant.
pub fn filter_records<'a>(records: &'a [Record], query: &str) -> Vec<&'a Record> {
    let needle = query.to_lowercase();
    records
        .iter()
        .filter(|r| {
            needle.is_empty()
                || r.owner.to_lowercase().contains(&needle)
                || r.status.as_str().contains(&needle)
                || r.potential_allergens.iter().any(|a| a.to_lowercase().contains(&needle))
        })
        .collect()
}

/// Everything a dashboard shows in one value.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub counts: StatusCounts,
    pub allergens: BTreeMap<String, usize>,
}

pub fn summarize(records: &[Record], counting: AllergenCounting) -> Summary {
    Summary {
        counts: counts_by_status(records),
        allergens: allergen_frequency(records, counting),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: &str, owner: &str, status: RecordStatus, allergens: &[&str]) -> Record {
        Record {
            id: id.into(),
            encrypted_food: String::new(),
            encrypted_symptoms: String::new(),
            timestamp: 0,
            owner: owner.into(),
            status,
            potential_allergens: allergens.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn sample() -> Vec<Record> {
        vec![
            rec("1", "0xAAA", RecordStatus::Analyzed, &["Dairy", "Dairy", "Nuts"]),
            rec("2", "0xbbb", RecordStatus::Flagged, &["Dairy"]),
            rec("3", "0xbbb", RecordStatus::Pending, &[]),
            rec("4", "0xccc", RecordStatus::Pending, &[]),
        ]
    }

    #[test]
    fn status_counts() {
        let counts = counts_by_status(&sample());
        assert_eq!(counts, StatusCounts { pending: 2, analyzed: 1, flagged: 1 });
        assert_eq!(counts.total(), 4);
        assert_eq!(counts_by_status(&[]), StatusCounts::default());
    }

    #[test]
    fn allergen_counting_modes() {
        let distinct = allergen_frequency(&sample(), AllergenCounting::DistinctPerRecord);
        assert_eq!(distinct.get("Dairy"), Some(&2));
        assert_eq!(distinct.get("Nuts"), Some(&1));

        let every = allergen_frequency(&sample(), AllergenCounting::EveryOccurrence);
        assert_eq!(every.get("Dairy"), Some(&3));
        assert_eq!(every.len(), 2);
    }

    #[test]
    fn search_matches_owner_status_and_allergens() {
        let records = sample();
        let ids = |q: &str| filter_records(&records, q).iter().map(|r| r.id.clone()).collect::<Vec<_>>();

        assert_eq!(ids("0xaaa"), vec!["1"]);
        assert_eq!(ids("PENDING"), vec!["3", "4"]);
        assert_eq!(ids("nut"), vec!["1"]);
        assert_eq!(ids(""), vec!["1", "2", "3", "4"]);
        assert!(ids("shellfish").is_empty());
        assert!(ids(" nut").is_empty());
    }

    #[test]
    fn summary_combines_both_views() {
        let summary = summarize(&sample(), AllergenCounting::default());
        assert_eq!(summary.counts.flagged, 1);
        assert_eq!(summary.allergens.get("Dairy"), Some(&2));
    }
}

use crate::reactivation::ReactivationSet;
use serde::Serialize;
use std::fmt;

/// Inactivity band of a reactivation. Lower bounds are inclusive, upper bounds exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Band {
    ZeroToSeven,
    SevenToFourteen,
    FourteenToThirty,
    ThirtyToNinety,
    NinetyPlus,
}

impl Band {
    /// Report order.
    pub const ALL: [Band; 5] = [
        Band::ZeroToSeven,
        Band::SevenToFourteen,
        Band::FourteenToThirty,
        Band::ThirtyToNinety,
        Band::NinetyPlus,
    ];

    pub fn for_gap(gap_days: i64) -> Band {
        match gap_days {
            g if g < 7 => Band::ZeroToSeven,
            g if g < 14 => Band::SevenToFourteen,
            g if g < 30 => Band::FourteenToThirty,
            g if g < 90 => Band::ThirtyToNinety,
            _ => Band::NinetyPlus,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Band::ZeroToSeven => "0-7 days",
            Band::SevenToFourteen => "7-14 days",
            Band::FourteenToThirty => "14-30 days",
            Band::ThirtyToNinety => "30-90 days",
            Band::NinetyPlus => "90+ days",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BandSummary {
    pub label: String,
    pub count: usize,
    pub avg_gap_days: f64,
    pub percentage: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReactivationReport {
    pub start: String,
    pub end: String,
    /// One row per band, in [`Band::ALL`] order.
    pub bands: Vec<BandSummary>,
    pub total: BandSummary,
    pub depositors: usize,
    pub new_count: usize,
    pub below_floor_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users_requested: Option<usize>,
}

impl ReactivationReport {
    /// Share of the requested users that reactivated, when a user list was given.
    pub fn reactivation_rate(&self) -> Option<f64> {
        self.users_requested
            .map(|requested| percentage(self.total.count, requested))
    }
}

pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round1(count as f64 / total as f64 * 100.0)
}

fn mean(gaps: &[i64]) -> f64 {
    if gaps.is_empty() {
        return 0.0;
    }
    round1(gaps.iter().sum::<i64>() as f64 / gaps.len() as f64)
}

/// Aggregates reactivations into the fixed bands.
pub fn summarize(set: &ReactivationSet) -> ReactivationReport {
    let total = set.records.len();
    let mut gaps_by_band: [Vec<i64>; 5] = Default::default();

    for record in &set.records {
        let idx = Band::ALL
            .iter()
            .position(|band| *band == record.band())
            .unwrap_or(Band::ALL.len() - 1);
        gaps_by_band[idx].push(record.gap_days);
    }

    let bands = Band::ALL
        .iter()
        .zip(gaps_by_band.iter())
        .map(|(band, gaps)| BandSummary {
            label: band.label().to_string(),
            count: gaps.len(),
            avg_gap_days: mean(gaps),
            percentage: percentage(gaps.len(), total),
        })
        .collect();

    let all_gaps: Vec<i64> = set.records.iter().map(|r| r.gap_days).collect();

    ReactivationReport {
        start: set.window.start().to_string(),
        end: set.window.end().to_string(),
        bands,
        total: BandSummary {
            label: "Total".to_string(),
            count: total,
            avg_gap_days: mean(&all_gaps),
            percentage: percentage(total, total),
        },
        depositors: set.depositors,
        new_count: set.new_count,
        below_floor_count: set.below_floor_count,
        users_requested: set.users_requested,
    }
}

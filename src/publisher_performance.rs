//! Publisher performance with deposits split into first-time (FTD) and
//! repeat (RD) deposits, joined with spend.
//!
//! A deposit is an FTD when it falls on its user's first deposit timestamp
//! ever, everything else is an RD. Each paid publisher is scored against the
//! spend-weighted averages of all significant paid publishers; a negative
//! score means cheaper than average.

use crate::bid_coefficients::{AdFormat, SpendRow};
use crate::event_source::PublisherSplit;
use std::collections::HashMap;

pub const DEFAULT_MIN_SPEND: f64 = 100.0;
/// Publishers below this many deposits are not scored.
const MIN_SCORED_DEPOSITS: u64 = 100;
const ORGANIC_PUBLISHER: i64 = 0;

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// `spend / count`, with a zero count treated as one.
fn per_deposit(spend: f64, count: u64) -> f64 {
    spend / count.max(1) as f64
}

#[derive(Clone, Debug, PartialEq)]
pub struct PublisherPerformance {
    pub publisher_id: i64,
    pub publisher_name: Option<String>,
    pub format: AdFormat,
    pub total_deps: u64,
    pub ftd: u64,
    pub rd: u64,
    pub spend: f64,
    pub ftd_cpa: f64,
    pub rd_cpa: f64,
    pub total_cpa: f64,
    /// Share of repeat deposits, in percent.
    pub rd_rate: f64,
}

impl PublisherPerformance {
    pub fn new(split: &PublisherSplit, spend: Option<&SpendRow>) -> Self {
        let amount = spend.map_or(0.0, |row| row.spend);
        let rd_rate = if split.total == 0 {
            0.0
        } else {
            round_to(split.repeat as f64 / split.total as f64 * 100.0, 1)
        };

        PublisherPerformance {
            publisher_id: split.publisher_id,
            publisher_name: spend.map(|row| row.publisher_name.clone()),
            format: spend.map_or(AdFormat::Other, |row| row.format),
            total_deps: split.total,
            ftd: split.first,
            rd: split.repeat,
            spend: amount,
            ftd_cpa: round_to(per_deposit(amount, split.first), 2),
            rd_cpa: round_to(per_deposit(amount, split.repeat), 4),
            total_cpa: round_to(per_deposit(amount, split.total), 3),
            rd_rate,
        }
    }

    pub fn display_name(&self) -> String {
        self.publisher_name
            .clone()
            .unwrap_or_else(|| format!("Publisher {}", self.publisher_id))
    }

    fn is_paid(&self) -> bool {
        self.publisher_id != ORGANIC_PUBLISHER
    }
}

/// One row per publisher with tracked deposits. Spend rows without tracked
/// deposits are ignored; the first spend row of a publisher wins.
pub fn publisher_performance(
    splits: &[PublisherSplit],
    spend: &[SpendRow],
) -> Vec<PublisherPerformance> {
    let mut spend_by_publisher: HashMap<i64, &SpendRow> = HashMap::new();
    for row in spend {
        spend_by_publisher.entry(row.publisher_id).or_insert(row);
    }

    splits
        .iter()
        .map(|split| {
            PublisherPerformance::new(
                split,
                spend_by_publisher.get(&split.publisher_id).copied(),
            )
        })
        .collect()
}

/// Spend-weighted CPAs over a set of publishers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CpaAverages {
    pub spend: f64,
    pub total_deps: u64,
    pub ftd: u64,
    pub rd: u64,
    pub total_cpa: f64,
    pub ftd_cpa: f64,
    pub rd_cpa: f64,
}

impl CpaAverages {
    /// `None` when any of the deposit counts is zero.
    fn of<'a>(publishers: impl Iterator<Item = &'a PublisherPerformance>) -> Option<Self> {
        let (spend, total_deps, ftd, rd) =
            publishers.fold((0.0, 0, 0, 0), |(spend, total, ftd, rd), p| {
                (spend + p.spend, total + p.total_deps, ftd + p.ftd, rd + p.rd)
            });

        if total_deps == 0 || ftd == 0 || rd == 0 {
            return None;
        }

        Some(CpaAverages {
            spend,
            total_deps,
            ftd,
            rd,
            total_cpa: spend / total_deps as f64,
            ftd_cpa: spend / ftd as f64,
            rd_cpa: spend / rd as f64,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn label(&self) -> &'static str {
        match self {
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recommendation {
    IncreaseStrongly,
    IncreaseModerately,
    Keep,
    DecreaseModerately,
    DecreaseStrongly,
}

impl Recommendation {
    pub const ALL: [Recommendation; 5] = [
        Recommendation::IncreaseStrongly,
        Recommendation::IncreaseModerately,
        Recommendation::Keep,
        Recommendation::DecreaseModerately,
        Recommendation::DecreaseStrongly,
    ];

    /// Larger publishers need a larger deviation before a strong change.
    pub fn from_score(score: f64, deposits: u64) -> Self {
        if score <= -20.0 && deposits >= 5000 {
            Recommendation::IncreaseStrongly
        } else if score <= -10.0 && deposits >= 2000 {
            Recommendation::IncreaseModerately
        } else if score >= 20.0 && deposits >= 5000 {
            Recommendation::DecreaseStrongly
        } else if score >= 10.0 && deposits >= 2000 {
            Recommendation::DecreaseModerately
        } else {
            Recommendation::Keep
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            Recommendation::IncreaseStrongly | Recommendation::DecreaseStrongly => Priority::High,
            Recommendation::IncreaseModerately | Recommendation::DecreaseModerately => {
                Priority::Medium
            }
            Recommendation::Keep => Priority::Low,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Recommendation::IncreaseStrongly => "increase bid +30-50%",
            Recommendation::IncreaseModerately => "increase bid +15-25%",
            Recommendation::Keep => "keep bid",
            Recommendation::DecreaseModerately => "decrease bid -15-25%",
            Recommendation::DecreaseStrongly => "decrease bid -30-50%",
        }
    }
}

/// Relative CPA of a publisher against the averages, in percent. Total CPA
/// weighs three times as much as FTD and RD CPA.
pub fn efficiency_score(publisher: &PublisherPerformance, averages: &CpaAverages) -> f64 {
    let relative = |cpa: f64, avg: f64| (cpa / avg - 1.0) * 100.0;

    (relative(publisher.total_cpa, averages.total_cpa) * 3.0
        + relative(publisher.ftd_cpa, averages.ftd_cpa)
        + relative(publisher.rd_cpa, averages.rd_cpa))
        / 5.0
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScoredPublisher {
    pub publisher_id: i64,
    pub score: f64,
    pub recommendation: Recommendation,
}

#[derive(Clone, Debug)]
pub struct PerformanceOptions {
    pub min_spend: f64,
}

impl Default for PerformanceOptions {
    fn default() -> Self {
        PerformanceOptions {
            min_spend: DEFAULT_MIN_SPEND,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PerformanceReport {
    /// Every tracked publisher.
    pub publishers: Vec<PublisherPerformance>,
    /// Publishers above the spend threshold, highest spend first.
    pub significant: Vec<PublisherPerformance>,
    /// Averages over the significant paid publishers.
    pub paid_averages: Option<CpaAverages>,
    /// Scored paid publishers, most efficient first.
    pub scored: Vec<ScoredPublisher>,
}

impl PerformanceReport {
    pub fn publisher(&self, publisher_id: i64) -> Option<&PublisherPerformance> {
        self.publishers
            .iter()
            .find(|p| p.publisher_id == publisher_id)
    }

    pub fn count_of(&self, recommendation: Recommendation) -> usize {
        self.scored
            .iter()
            .filter(|s| s.recommendation == recommendation)
            .count()
    }
}

pub fn build_performance_report(
    splits: &[PublisherSplit],
    spend: &[SpendRow],
    options: &PerformanceOptions,
) -> PerformanceReport {
    let publishers = publisher_performance(splits, spend);

    let mut significant: Vec<_> = publishers
        .iter()
        .filter(|p| p.spend > options.min_spend)
        .cloned()
        .collect();
    significant.sort_by(|a, b| b.spend.total_cmp(&a.spend));

    let paid_averages = CpaAverages::of(significant.iter().filter(|p| p.is_paid()));

    let mut scored: Vec<_> = match &paid_averages {
        Some(averages) => significant
            .iter()
            .filter(|p| p.is_paid() && p.total_deps >= MIN_SCORED_DEPOSITS)
            .map(|p| {
                let score = efficiency_score(p, averages);
                ScoredPublisher {
                    publisher_id: p.publisher_id,
                    score,
                    recommendation: Recommendation::from_score(score, p.total_deps),
                }
            })
            .collect(),
        None => vec![],
    };
    scored.sort_by(|a, b| a.score.total_cmp(&b.score));

    PerformanceReport {
        publishers,
        significant,
        paid_averages,
        scored,
    }
}

//! Publisher bid coefficients.
//!
//! Each ad format gets a target cost per deposit derived from the benchmark
//! (PLR/NOR) campaigns of that format, discounted. A publisher's coefficient
//! is the target divided by its current cost per deposit: above 1 the bid
//! can go up, below 1 it should come down. Multiply the current bid by the
//! coefficient to get the new bid.

use crate::bucketing::round1;
use std::collections::HashMap;
use std::fmt;

pub const DEFAULT_DISCOUNT: f64 = 0.7;
pub const DEFAULT_MIN_SPEND: f64 = 50.0;
const MIN_COEFFICIENT: f64 = 0.1;
const MAX_COEFFICIENT: f64 = 3.0;
/// Organic traffic is attributed to this publisher id.
const ORGANIC_PUBLISHER: i64 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AdFormat {
    Pop,
    Push,
    Video,
    Banner,
    Native,
    Other,
}

impl AdFormat {
    /// Formats that get their own target CPA.
    pub const RATED: [AdFormat; 5] = [
        AdFormat::Pop,
        AdFormat::Push,
        AdFormat::Video,
        AdFormat::Banner,
        AdFormat::Native,
    ];

    pub fn from_publisher_name(name: &str) -> Self {
        let name = name.to_uppercase();

        if name.contains("POP") {
            AdFormat::Pop
        } else if name.contains("PUSH") || name.contains("IN-PAGE") || name.contains("INPAGE") {
            AdFormat::Push
        } else if name.contains("VIDEO") {
            AdFormat::Video
        } else if name.contains("BANNER") {
            AdFormat::Banner
        } else if name.contains("NATIVE") {
            AdFormat::Native
        } else {
            AdFormat::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdFormat::Pop => "POP",
            AdFormat::Push => "PUSH",
            AdFormat::Video => "VIDEO",
            AdFormat::Banner => "BANNER",
            AdFormat::Native => "NATIVE",
            AdFormat::Other => "OTHER",
        }
    }
}

impl fmt::Display for AdFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses the id out of a `"(123) Publisher name"` label.
pub fn extract_publisher_id(name: &str) -> Option<i64> {
    let rest = name.strip_prefix('(')?;
    let (digits, _) = rest.split_once(')')?;

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn is_benchmark(name: &str) -> bool {
    let name = name.to_uppercase();
    name.contains("PLR") || name.contains("NOR")
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// One publisher line of a spend export.
#[derive(Clone, Debug, PartialEq)]
pub struct SpendRow {
    pub publisher_id: i64,
    pub publisher_name: String,
    pub format: AdFormat,
    pub deposits_reported: f64,
    pub spend: f64,
    pub current_cpa: f64,
}

impl SpendRow {
    /// Returns `None` when the name carries no publisher id.
    pub fn new(publisher_name: &str, deposits_reported: f64, spend: f64) -> Option<Self> {
        let publisher_id = extract_publisher_id(publisher_name)?;
        let divisor = if deposits_reported == 0.0 {
            1.0
        } else {
            deposits_reported
        };

        Some(SpendRow {
            publisher_id,
            publisher_name: publisher_name.to_string(),
            format: AdFormat::from_publisher_name(publisher_name),
            deposits_reported,
            spend,
            current_cpa: round3(spend / divisor),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetSource {
    Benchmark,
    AllCampaigns,
    NoData,
}

impl TargetSource {
    pub fn label(&self) -> &'static str {
        match self {
            TargetSource::Benchmark => "PLR/NOR",
            TargetSource::AllCampaigns => "all campaigns",
            TargetSource::NoData => "no data",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FormatTarget {
    pub format: AdFormat,
    pub avg_cpa: f64,
    pub target_cpa: f64,
    pub source: TargetSource,
}

fn pooled_cpa<'a>(rows: impl Iterator<Item = &'a SpendRow>) -> Option<f64> {
    let (spend, deposits) = rows.fold((0.0, 0.0), |(spend, deposits), row| {
        (spend + row.spend, deposits + row.deposits_reported)
    });

    (deposits > 0.0).then(|| spend / deposits)
}

/// Target CPA for every rated format.
pub fn target_cpas(rows: &[SpendRow], discount: f64) -> Vec<FormatTarget> {
    AdFormat::RATED
        .iter()
        .map(|format| {
            let of_format = || rows.iter().filter(|row| row.format == *format);
            let benchmark = pooled_cpa(of_format().filter(|row| is_benchmark(&row.publisher_name)));

            let (avg_cpa, source) = match benchmark {
                Some(cpa) => (cpa, TargetSource::Benchmark),
                None => match pooled_cpa(of_format()) {
                    Some(cpa) => (cpa, TargetSource::AllCampaigns),
                    None => (0.0, TargetSource::NoData),
                },
            };

            FormatTarget {
                format: *format,
                avg_cpa,
                target_cpa: avg_cpa * discount,
                source,
            }
        })
        .collect()
}

/// `target / current`, clamped to a sane range. Neutral when either side is unknown.
pub fn coefficient(target_cpa: f64, current_cpa: f64) -> f64 {
    if target_cpa == 0.0 || current_cpa == 0.0 {
        return 1.0;
    }
    round3((target_cpa / current_cpa).clamp(MIN_COEFFICIENT, MAX_COEFFICIENT))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BidAction {
    IncreaseStrongly,
    IncreaseSlightly,
    Keep,
    DecreaseSlightly,
    DecreaseStrongly,
}

impl BidAction {
    pub const ALL: [BidAction; 5] = [
        BidAction::IncreaseStrongly,
        BidAction::IncreaseSlightly,
        BidAction::Keep,
        BidAction::DecreaseSlightly,
        BidAction::DecreaseStrongly,
    ];

    pub fn from_coefficient(coefficient: f64) -> Self {
        if coefficient >= 1.3 {
            BidAction::IncreaseStrongly
        } else if coefficient >= 1.1 {
            BidAction::IncreaseSlightly
        } else if coefficient >= 0.9 {
            BidAction::Keep
        } else if coefficient >= 0.7 {
            BidAction::DecreaseSlightly
        } else {
            BidAction::DecreaseStrongly
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BidAction::IncreaseStrongly => "increase +30%+",
            BidAction::IncreaseSlightly => "increase +10-30%",
            BidAction::Keep => "keep",
            BidAction::DecreaseSlightly => "decrease -10-30%",
            BidAction::DecreaseStrongly => "decrease -30%+",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PublisherBid {
    pub publisher_id: i64,
    pub publisher_name: Option<String>,
    pub format: AdFormat,
    pub total_deposits: u64,
    pub spend: f64,
    pub current_cpa: f64,
    pub target_cpa: f64,
    pub coefficient: f64,
    pub change_pct: f64,
    pub action: BidAction,
}

impl PublisherBid {
    pub fn display_name(&self) -> String {
        self.publisher_name
            .clone()
            .unwrap_or_else(|| format!("Publisher {}", self.publisher_id))
    }
}

/// Joins tracked deposit counts with the spend export. Every publisher with
/// tracked deposits gets a row; spend rows without tracked deposits are ignored.
pub fn publisher_bids(
    deposit_counts: &[(i64, u64)],
    spend: &[SpendRow],
    targets: &[FormatTarget],
) -> Vec<PublisherBid> {
    let mut spend_by_publisher: HashMap<i64, &SpendRow> = HashMap::new();
    for row in spend {
        spend_by_publisher.entry(row.publisher_id).or_insert(row);
    }

    deposit_counts
        .iter()
        .map(|(publisher_id, total_deposits)| {
            let row = spend_by_publisher.get(publisher_id);
            let format = row.map_or(AdFormat::Other, |r| r.format);
            let current_cpa = row.map_or(0.0, |r| r.current_cpa);
            let target_cpa = targets
                .iter()
                .find(|t| t.format == format)
                .map_or(0.0, |t| t.target_cpa);
            let coefficient = coefficient(target_cpa, current_cpa);

            PublisherBid {
                publisher_id: *publisher_id,
                publisher_name: row.map(|r| r.publisher_name.clone()),
                format,
                total_deposits: *total_deposits,
                spend: row.map_or(0.0, |r| r.spend),
                current_cpa,
                target_cpa,
                coefficient,
                change_pct: round1((coefficient - 1.0) * 100.0),
                action: BidAction::from_coefficient(coefficient),
            }
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq)]
pub struct FormatSummary {
    pub format: AdFormat,
    pub target_cpa: f64,
    pub avg_cpa: f64,
    pub change_pct: f64,
    pub publishers: usize,
    /// Publisher count per action, in [`BidAction::ALL`] order.
    pub actions: [usize; 5],
}

#[derive(Clone, Debug)]
pub struct BidOptions {
    pub discount: f64,
    pub min_spend: f64,
}

impl Default for BidOptions {
    fn default() -> Self {
        BidOptions {
            discount: DEFAULT_DISCOUNT,
            min_spend: DEFAULT_MIN_SPEND,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BidReport {
    pub targets: Vec<FormatTarget>,
    /// Every tracked publisher.
    pub publishers: Vec<PublisherBid>,
    /// Publishers above the spend threshold, highest spend first.
    pub significant: Vec<PublisherBid>,
    pub formats: Vec<FormatSummary>,
}

impl BidReport {
    fn rated_in(&self, format: AdFormat) -> impl Iterator<Item = &PublisherBid> {
        self.significant
            .iter()
            .filter(move |bid| bid.format == format && bid.publisher_id != ORGANIC_PUBLISHER)
    }

    /// Publishers of a format sorted by coefficient, highest first.
    pub fn ranked(&self, format: AdFormat) -> Vec<&PublisherBid> {
        let mut ranked: Vec<_> = self.rated_in(format).collect();
        ranked.sort_by(|a, b| b.coefficient.total_cmp(&a.coefficient));
        ranked
    }

    /// Up to `n` publishers of a format whose bid should go up.
    pub fn top_increases(&self, format: AdFormat, n: usize) -> Vec<&PublisherBid> {
        self.ranked(format)
            .into_iter()
            .take(n)
            .filter(|bid| bid.coefficient >= 1.1)
            .collect()
    }

    /// Up to `n` publishers of a format whose bid should come down, lowest first.
    pub fn top_decreases(&self, format: AdFormat, n: usize) -> Vec<&PublisherBid> {
        self.ranked(format)
            .into_iter()
            .rev()
            .take(n)
            .filter(|bid| bid.coefficient < 0.9)
            .collect()
    }
}

pub fn build_bid_report(
    deposit_counts: &[(i64, u64)],
    spend: &[SpendRow],
    options: &BidOptions,
) -> BidReport {
    let targets = target_cpas(spend, options.discount);
    let publishers = publisher_bids(deposit_counts, spend, &targets);

    let mut significant: Vec<_> = publishers
        .iter()
        .filter(|bid| bid.spend > options.min_spend)
        .cloned()
        .collect();
    significant.sort_by(|a, b| b.spend.total_cmp(&a.spend));

    let mut report = BidReport {
        targets,
        publishers,
        significant,
        formats: vec![],
    };

    let formats = AdFormat::RATED
        .iter()
        .filter_map(|format| {
            let bids: Vec<_> = report.rated_in(*format).collect();
            if bids.is_empty() {
                return None;
            }

            let spend: f64 = bids.iter().map(|b| b.spend).sum();
            let deposits: u64 = bids.iter().map(|b| b.total_deposits).sum();
            let avg_cpa = if deposits > 0 {
                spend / deposits as f64
            } else {
                0.0
            };
            let target_cpa = report
                .targets
                .iter()
                .find(|t| t.format == *format)
                .map_or(0.0, |t| t.target_cpa);
            let change_pct = if avg_cpa > 0.0 {
                round1((target_cpa / avg_cpa - 1.0) * 100.0)
            } else {
                0.0
            };

            let mut actions = [0; 5];
            for bid in &bids {
                if let Some(idx) = BidAction::ALL.iter().position(|a| *a == bid.action) {
                    actions[idx] += 1;
                }
            }

            Some(FormatSummary {
                format: *format,
                target_cpa,
                avg_cpa,
                change_pct,
                publishers: bids.len(),
                actions,
            })
        })
        .collect();

    report.formats = formats;
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spend_rows() -> Vec<SpendRow> {
        vec![
            SpendRow::new("(10) PLR Pop main", 100.0, 200.0).unwrap(),
            SpendRow::new("(11) Some POP network", 50.0, 300.0).unwrap(),
            SpendRow::new("(20) In-Page push", 10.0, 40.0).unwrap(),
            SpendRow::new("(21) Push partner", 0.0, 60.0).unwrap(),
            SpendRow::new("(30) Display banner", 0.0, 0.0).unwrap(),
            SpendRow::new("(0) Organic", 0.0, 100.0).unwrap(),
        ]
    }

    #[test]
    fn test_extract_publisher_id() {
        assert_eq!(extract_publisher_id("(123) Publisher"), Some(123));
        assert_eq!(extract_publisher_id("(0)"), Some(0));
        assert_eq!(extract_publisher_id("Publisher (123)"), None);
        assert_eq!(extract_publisher_id("(abc) Publisher"), None);
        assert_eq!(extract_publisher_id("() Publisher"), None);
        assert_eq!(extract_publisher_id("(12"), None);
    }

    #[test]
    fn test_format_extraction_order() {
        assert_eq!(AdFormat::from_publisher_name("(1) popunder"), AdFormat::Pop);
        assert_eq!(AdFormat::from_publisher_name("(1) POP push combo"), AdFormat::Pop);
        assert_eq!(AdFormat::from_publisher_name("(1) inpage ads"), AdFormat::Push);
        assert_eq!(AdFormat::from_publisher_name("(1) In-Page ads"), AdFormat::Push);
        assert_eq!(AdFormat::from_publisher_name("(1) Video pre-roll"), AdFormat::Video);
        assert_eq!(AdFormat::from_publisher_name("(1) banner 300x250"), AdFormat::Banner);
        assert_eq!(AdFormat::from_publisher_name("(1) Native feed"), AdFormat::Native);
        assert_eq!(AdFormat::from_publisher_name("(1) Search"), AdFormat::Other);
    }

    #[test]
    fn test_spend_row_cpa_uses_one_for_zero_deposits() {
        let row = SpendRow::new("(21) Push partner", 0.0, 60.0).unwrap();
        assert_eq!(row.current_cpa, 60.0);

        let row = SpendRow::new("(5) Pop", 3.0, 10.0).unwrap();
        assert_eq!(row.current_cpa, 3.333);

        assert!(SpendRow::new("Total", 10.0, 10.0).is_none());
    }

    #[test]
    fn test_target_cpa_prefers_benchmark_campaigns() {
        let targets = target_cpas(&spend_rows(), DEFAULT_DISCOUNT);

        let pop = targets.iter().find(|t| t.format == AdFormat::Pop).unwrap();
        assert_eq!(pop.source, TargetSource::Benchmark);
        assert!((pop.avg_cpa - 2.0).abs() < 1e-9);
        assert!((pop.target_cpa - 1.4).abs() < 1e-9);

        let push = targets.iter().find(|t| t.format == AdFormat::Push).unwrap();
        assert_eq!(push.source, TargetSource::AllCampaigns);
        assert!((push.avg_cpa - 10.0).abs() < 1e-9);

        let banner = targets.iter().find(|t| t.format == AdFormat::Banner).unwrap();
        assert_eq!(banner.source, TargetSource::NoData);
        assert_eq!(banner.target_cpa, 0.0);
        assert_eq!(targets.len(), 5);
    }

    #[test]
    fn test_coefficient_is_clamped_and_neutral_without_data() {
        assert_eq!(coefficient(0.0, 2.0), 1.0);
        assert_eq!(coefficient(2.0, 0.0), 1.0);
        assert_eq!(coefficient(1.4, 2.0), 0.7);
        assert_eq!(coefficient(10.0, 1.0), 3.0);
        assert_eq!(coefficient(0.01, 1.0), 0.1);
    }

    #[test]
    fn test_bid_action_thresholds() {
        assert_eq!(BidAction::from_coefficient(1.3), BidAction::IncreaseStrongly);
        assert_eq!(BidAction::from_coefficient(1.1), BidAction::IncreaseSlightly);
        assert_eq!(BidAction::from_coefficient(1.0), BidAction::Keep);
        assert_eq!(BidAction::from_coefficient(0.9), BidAction::Keep);
        assert_eq!(BidAction::from_coefficient(0.7), BidAction::DecreaseSlightly);
        assert_eq!(BidAction::from_coefficient(0.69), BidAction::DecreaseStrongly);
    }

    #[test]
    fn test_publisher_bids_left_join_on_tracked_deposits() {
        let rows = spend_rows();
        let targets = target_cpas(&rows, DEFAULT_DISCOUNT);
        let bids = publisher_bids(&[(10, 90), (99, 4)], &rows, &targets);

        assert_eq!(bids.len(), 2);
        let main = &bids[0];
        assert_eq!(main.format, AdFormat::Pop);
        assert_eq!(main.current_cpa, 2.0);
        assert_eq!(main.coefficient, 0.7);
        assert_eq!(main.change_pct, -30.0);
        assert_eq!(main.action, BidAction::DecreaseSlightly);

        let unknown = &bids[1];
        assert_eq!(unknown.format, AdFormat::Other);
        assert_eq!(unknown.spend, 0.0);
        assert_eq!(unknown.coefficient, 1.0);
        assert_eq!(unknown.display_name(), "Publisher 99");
    }

    #[test]
    fn test_bid_report_filters_and_summarizes_formats() {
        let report = build_bid_report(
            &[(10, 100), (11, 40), (20, 10), (21, 5), (0, 500)],
            &spend_rows(),
            &BidOptions::default(),
        );

        // publisher 20 spent 40, under the threshold
        let ids: Vec<_> = report.significant.iter().map(|b| b.publisher_id).collect();
        assert_eq!(ids, vec![11, 10, 0, 21]);

        let pop = report
            .formats
            .iter()
            .find(|f| f.format == AdFormat::Pop)
            .unwrap();
        assert_eq!(pop.publishers, 2);
        assert!((pop.avg_cpa - 500.0 / 140.0).abs() < 1e-9);
        assert_eq!(pop.actions.iter().sum::<usize>(), 2);

        // organic never shows up in a format breakdown
        assert!(report.formats.iter().all(|f| f.format != AdFormat::Other));
        assert_eq!(report.publishers.len(), 5);
    }

    #[test]
    fn test_top_increases_and_decreases() {
        let rows = vec![
            SpendRow::new("(1) PLR pop", 100.0, 100.0).unwrap(),
            SpendRow::new("(2) cheap pop", 200.0, 100.0).unwrap(),
            SpendRow::new("(3) pricey pop", 20.0, 100.0).unwrap(),
        ];
        let report = build_bid_report(&[(1, 100), (2, 200), (3, 20)], &rows, &BidOptions::default());

        let up: Vec<_> = report
            .top_increases(AdFormat::Pop, 5)
            .iter()
            .map(|b| b.publisher_id)
            .collect();
        assert_eq!(up, vec![2]);

        let down: Vec<_> = report
            .top_decreases(AdFormat::Pop, 5)
            .iter()
            .map(|b| b.publisher_id)
            .collect();
        assert_eq!(down, vec![3, 1]);
    }
}

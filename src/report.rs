//! Plain-text renderings of the reports for stdout.

use crate::bid_coefficients::{BidAction, BidReport, PublisherBid};
use crate::bucketing::{BandSummary, ReactivationReport};
use crate::publisher_performance::{
    PerformanceReport, Priority, PublisherPerformance, Recommendation,
};
use std::fmt;

const SIGNIFICANT_ROWS: usize = 50;
const TOP_PUBLISHERS: usize = 30;
const TOP_N: usize = 5;

fn rule(f: &mut fmt::Formatter<'_>, width: usize) -> fmt::Result {
    writeln!(f, "{}", "-".repeat(width))
}

fn truncate(name: &str, width: usize) -> String {
    name.chars().take(width).collect()
}

struct BandRow<'a>(&'a BandSummary);

impl fmt::Display for BandRow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<12} {:>8} {:>10.1} {:>8.1}%",
            self.0.label, self.0.count, self.0.avg_gap_days, self.0.percentage
        )
    }
}

impl fmt::Display for ReactivationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Reactivations from {} to {}", self.start, self.end)?;
        writeln!(
            f,
            "{:<12} {:>8} {:>10} {:>9}",
            "band", "count", "avg gap", "share"
        )?;
        rule(f, 42)?;
        for band in &self.bands {
            writeln!(f, "{}", BandRow(band))?;
        }
        rule(f, 42)?;
        writeln!(f, "{}", BandRow(&self.total))?;
        writeln!(f)?;

        writeln!(f, "Depositors in window: {}", self.depositors)?;
        writeln!(f, "New depositors:       {}", self.new_count)?;
        if self.below_floor_count > 0 {
            writeln!(f, "Below gap floor:      {}", self.below_floor_count)?;
        }
        if let (Some(requested), Some(rate)) = (self.users_requested, self.reactivation_rate()) {
            writeln!(f, "Users in list:        {}", requested)?;
            writeln!(f, "Reactivation rate:    {:.1}%", rate)?;
        }

        Ok(())
    }
}

struct BidRow<'a>(&'a PublisherBid);

impl fmt::Display for BidRow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bid = self.0;
        write!(
            f,
            "{:>8} {:<32} {:<7} {:>6} {:>10.2} {:>8.3} {:>8.3} {:>6.3} {:>7.1}% {}",
            bid.publisher_id,
            truncate(&bid.display_name(), 32),
            bid.format.as_str(),
            bid.total_deposits,
            bid.spend,
            bid.current_cpa,
            bid.target_cpa,
            bid.coefficient,
            bid.change_pct,
            bid.action.label()
        )
    }
}

fn bid_changes(f: &mut fmt::Formatter<'_>, heading: &str, bids: &[&PublisherBid]) -> fmt::Result {
    if bids.is_empty() {
        return Ok(());
    }
    writeln!(f, "  {}:", heading)?;
    for bid in bids {
        writeln!(
            f,
            "    {} x{:.3} ({:+.1}%)",
            bid.display_name(),
            bid.coefficient,
            bid.change_pct
        )?;
    }
    Ok(())
}

impl fmt::Display for BidReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Target CPA per format")?;
        for target in &self.targets {
            writeln!(
                f,
                "  {:<7} avg {:>8.3}  target {:>8.3}  ({})",
                target.format.as_str(),
                target.avg_cpa,
                target.target_cpa,
                target.source.label()
            )?;
        }
        writeln!(f)?;

        writeln!(
            f,
            "Publishers with significant spend ({} of {})",
            self.significant.len(),
            self.publishers.len()
        )?;
        writeln!(
            f,
            "{:>8} {:<32} {:<7} {:>6} {:>10} {:>8} {:>8} {:>6} {:>8} {}",
            "id", "publisher", "format", "deps", "spend", "cpa", "target", "coef", "change", "action"
        )?;
        rule(f, 120)?;
        for bid in self.significant.iter().take(SIGNIFICANT_ROWS) {
            writeln!(f, "{}", BidRow(bid))?;
        }
        writeln!(f)?;

        for summary in &self.formats {
            writeln!(
                f,
                "{}: {} publishers, avg CPA {:.3}, target CPA {:.3}, change {:.1}%",
                summary.format,
                summary.publishers,
                summary.avg_cpa,
                summary.target_cpa,
                summary.change_pct
            )?;
            for (action, count) in BidAction::ALL.iter().zip(summary.actions.iter()) {
                if *count > 0 {
                    writeln!(f, "  {:<18} {}", action.label(), count)?;
                }
            }

            bid_changes(f, "raise bids", &self.top_increases(summary.format, TOP_N))?;
            bid_changes(f, "lower bids", &self.top_decreases(summary.format, TOP_N))?;
        }

        Ok(())
    }
}

struct PerformanceRow<'a>(&'a PublisherPerformance);

impl fmt::Display for PerformanceRow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.0;
        write!(
            f,
            "{:>6} | {:>10.0} | {:>8} | {:>9.3} | {:>8.2} | {:>9.4} | {:>6.1}%",
            p.publisher_id, p.spend, p.total_deps, p.total_cpa, p.ftd_cpa, p.rd_cpa, p.rd_rate
        )
    }
}

impl fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Top {} of {} publishers by spend",
            self.significant.len().min(TOP_PUBLISHERS),
            self.significant.len()
        )?;
        writeln!(
            f,
            "{:>6} | {:>10} | {:>8} | {:>9} | {:>8} | {:>9} | {:>7}",
            "pub", "spend", "deps", "total cpa", "ftd cpa", "rd cpa", "rd rate"
        )?;
        rule(f, 80)?;
        for publisher in self.significant.iter().take(TOP_PUBLISHERS) {
            writeln!(f, "{}", PerformanceRow(publisher))?;
        }
        writeln!(f)?;

        let Some(averages) = &self.paid_averages else {
            return writeln!(f, "No paid publisher has both first and repeat deposits");
        };
        writeln!(f, "Paid publishers")?;
        writeln!(f, "  spend:     {:.0}", averages.spend)?;
        writeln!(
            f,
            "  deposits:  {} ({} FTD, {} RD)",
            averages.total_deps, averages.ftd, averages.rd
        )?;
        writeln!(f, "  total CPA: {:.3}", averages.total_cpa)?;
        writeln!(f, "  FTD CPA:   {:.2}", averages.ftd_cpa)?;
        writeln!(f, "  RD CPA:    {:.4}", averages.rd_cpa)?;

        for priority in [Priority::High, Priority::Medium] {
            let scored: Vec<_> = self
                .scored
                .iter()
                .filter(|s| s.recommendation.priority() == priority)
                .collect();
            if scored.is_empty() {
                continue;
            }

            writeln!(f)?;
            writeln!(f, "Priority {}", priority.label())?;
            for s in scored {
                let Some(p) = self.publisher(s.publisher_id) else {
                    continue;
                };
                writeln!(
                    f,
                    "  {} score {:+.1}%: {}",
                    truncate(&p.display_name(), 40),
                    s.score,
                    s.recommendation.label()
                )?;
            }
        }

        writeln!(f)?;
        writeln!(f, "Recommendations for {} scored publishers", self.scored.len())?;
        for recommendation in Recommendation::ALL {
            writeln!(
                f,
                "  {:<22} {}",
                recommendation.label(),
                self.count_of(recommendation)
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bid_coefficients::{build_bid_report, BidOptions, SpendRow};
    use crate::bucketing::summarize;
    use crate::event::{ts, window, Event};
    use crate::event_source::{EventHistory, PublisherSplit};
    use crate::publisher_performance::{build_performance_report, PerformanceOptions};
    use crate::reactivation::{reactivations_from_history, ReactivationOptions};

    fn report(options: ReactivationOptions) -> ReactivationReport {
        let history = EventHistory::from_events(vec![
            Event::deposit("U", ts("2025-01-01 00:00:00")),
            Event::deposit("U", ts("2025-01-10 00:00:00")),
            Event::deposit("N", ts("2025-01-10 12:00:00")),
        ]);
        summarize(&reactivations_from_history(
            &history,
            &window("2025-01-10", "2025-01-10"),
            &options,
        ))
    }

    #[test]
    fn test_render_reactivation_report() {
        let text = report(ReactivationOptions::default()).to_string();

        assert!(text.starts_with("Reactivations from 2025-01-10 to 2025-01-10\n"));
        assert!(text.contains("7-14 days           1        9.0    100.0%"));
        assert!(text.contains("0-7 days            0        0.0      0.0%"));
        assert!(text.contains("Total               1        9.0    100.0%"));
        assert!(text.contains("Depositors in window: 2"));
        assert!(text.contains("New depositors:       1"));
        assert!(!text.contains("Below gap floor"));
        assert!(!text.contains("Reactivation rate"));
    }

    #[test]
    fn test_render_reactivation_report_with_user_list() {
        let options = ReactivationOptions::default().with_user_list(vec![
            "U".to_string(),
            "X".to_string(),
            "X".to_string(),
        ]);
        let text = report(options).to_string();

        assert!(text.contains("Users in list:        3"));
        assert!(text.contains("Reactivation rate:    33.3%"));
    }

    #[test]
    fn test_render_bid_report() {
        let rows = vec![
            SpendRow::new("(1) PLR pop", 100.0, 100.0).unwrap(),
            SpendRow::new("(2) cheap pop", 200.0, 100.0).unwrap(),
            SpendRow::new("(3) pricey pop", 20.0, 100.0).unwrap(),
        ];
        let report = build_bid_report(&[(1, 100), (2, 200), (3, 20)], &rows, &BidOptions::default());
        let text = report.to_string();

        assert!(text.contains("POP     avg    1.000  target    0.700  (PLR/NOR)"));
        assert!(text.contains("PUSH    avg    0.000  target    0.000  (no data)"));
        assert!(text.contains("Publishers with significant spend (3 of 3)"));
        assert!(text.contains("POP: 3 publishers"));
        assert!(text.contains("  raise bids:\n    (2) cheap pop x1.400 (+40.0%)"));
        assert!(text.contains("  lower bids:\n    (3) pricey pop x0.140 (-86.0%)"));
    }

    #[test]
    fn test_render_performance_report() {
        let spend = vec![
            SpendRow::new("(1) Cheap pop", 0.0, 1000.0).unwrap(),
            SpendRow::new("(2) Pricey pop", 0.0, 3000.0).unwrap(),
        ];
        let splits = [(1, 1000), (2, 1000)].map(|(publisher_id, n)| PublisherSplit {
            publisher_id,
            total: 2 * n,
            first: n,
            repeat: n,
        });
        let report = build_performance_report(&splits, &spend, &PerformanceOptions::default());
        let text = report.to_string();

        assert!(text.starts_with("Top 2 of 2 publishers by spend\n"));
        assert!(text.contains("     2 |       3000 |     2000 |     1.500 |     3.00 |    3.0000 |   50.0%"));
        assert!(text.contains("  FTD CPA:   2.00"));
        assert!(text.contains("Priority MEDIUM\n  (1) Cheap pop score -50.0%: increase bid +15-25%"));
        assert!(!text.contains("Priority HIGH"));
        assert!(text.contains("Recommendations for 2 scored publishers"));
        assert!(text.contains("  keep bid               0"));
    }

    #[test]
    fn test_render_performance_report_without_averages() {
        let report = build_performance_report(&[], &[], &PerformanceOptions::default());
        let text = report.to_string();

        assert!(text.starts_with("Top 0 of 0 publishers by spend\n"));
        assert!(text.ends_with("No paid publisher has both first and repeat deposits\n"));
    }
}

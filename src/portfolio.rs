use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::info;

use crate::model::{AggregatedPosition, FundContribution, FundFiling};
use crate::stocks::TickerTable;

/// Number of aggregated positions kept in the summary dataset.
pub const TOP_HOLDINGS_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataQuality {
    /// Every requested fund produced a filing.
    Complete,
    Partial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateMetadata {
    pub funds_requested: usize,
    pub funds_analyzed: usize,
    pub total_aum: f64,
    pub unique_securities: usize,
    pub data_quality: DataQuality,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult {
    pub top_holdings: Vec<AggregatedPosition>,
    pub metadata: AggregateMetadata,
}

/// Running totals for one security while walking the filings.
struct PositionAccumulator {
    cusip: String,
    company_name: String,
    total_value: f64,
    total_shares: f64,
    funds: Vec<FundContribution>,
}

/// Value-weighted share of `part` in `whole`, as a percentage. Zero for an empty whole.
pub fn percent_of(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

fn by_value_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Combine every fund's holdings into the ranked top positions.
///
/// Repeated lines for one security inside a fund are summed first, so each
/// fund contributes at most once per security. Ties keep first-seen order.
pub fn aggregate(filings: &[FundFiling], funds_requested: usize, tickers: &TickerTable) -> AggregateResult {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut positions: Vec<PositionAccumulator> = Vec::new();
    let mut total_aum = 0.0;

    for filing in filings {
        let fund_total = filing.total_value();
        total_aum += fund_total;

        for holding in filing.consolidated_holdings() {
            let contribution = FundContribution {
                fund_name: filing.fund_name.clone(),
                value: holding.value,
                shares: holding.shares,
                percent_of_portfolio: percent_of(holding.value, fund_total),
            };

            let slot = *index.entry(holding.security_id.clone()).or_insert_with(|| {
                positions.push(PositionAccumulator {
                    cusip: holding.security_id.clone(),
                    company_name: holding.issuer_name.clone(),
                    total_value: 0.0,
                    total_shares: 0.0,
                    funds: Vec::new(),
                });
                positions.len() - 1
            });

            let position = &mut positions[slot];
            position.total_value += holding.value;
            position.total_shares += holding.shares;
            position.funds.push(contribution);
        }
    }

    let unique_securities = positions.len();

    // stable: equal totals stay in first-seen order
    positions.sort_by(|a, b| by_value_desc(a.total_value, b.total_value));

    let top_holdings: Vec<AggregatedPosition> = positions
        .into_iter()
        .take(TOP_HOLDINGS_LIMIT)
        .enumerate()
        .map(|(i, mut p)| {
            p.funds.sort_by(|a, b| by_value_desc(a.value, b.value));
            AggregatedPosition {
                rank: i + 1,
                ticker: tickers.lookup(&p.cusip).to_string(),
                percent_of_aggregate_aum: percent_of(p.total_value, total_aum),
                fund_count: p.funds.len(),
                cusip: p.cusip,
                company_name: p.company_name,
                total_value: p.total_value,
                total_shares: p.total_shares,
                funds_holding: p.funds,
            }
        })
        .collect();

    let data_quality = if filings.len() >= funds_requested {
        DataQuality::Complete
    } else {
        DataQuality::Partial
    };

    info!(
        funds = filings.len(),
        requested = funds_requested,
        securities = unique_securities,
        total_aum,
        "aggregated holdings"
    );

    AggregateResult {
        top_holdings,
        metadata: AggregateMetadata {
            funds_requested,
            funds_analyzed: filings.len(),
            total_aum,
            unique_securities,
            data_quality,
        },
    }
}

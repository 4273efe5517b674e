//! Picks each fund's "most purchased" position for the quarter.
//!
//! With a previous filing for the same CIK, the pick is the holding whose
//! value grew the most; securities missing from the previous filing count as
//! entirely new. Without one, the fund's largest holding is used and the
//! comparison is left null.

use std::collections::HashMap;
use tracing::{debug, info};

use crate::model::{
    ChangeSummary, FundFiling, FundTopHolding, Holding, PercentChange, PositionChange,
    QuarterSnapshot, SelectedHolding,
};
use crate::portfolio::percent_of;
use crate::stocks::TickerTable;

struct Candidate {
    holding: Holding,
    change: PositionChange,
}

pub fn identify_most_purchased(
    current: &[FundFiling],
    previous: Option<&[FundFiling]>,
    tickers: &TickerTable,
) -> Vec<FundTopHolding> {
    let mut selections = Vec::with_capacity(current.len());

    for filing in current {
        let prior = previous.and_then(|p| p.iter().find(|f| f.cik == filing.cik));

        let picked = match prior {
            Some(prior) => most_increased(filing, prior),
            None => {
                debug!(fund = filing.fund_name.as_str(), "no previous filing, using largest holding");
                largest_holding(filing).map(|h| (h, None))
            }
        };

        match picked {
            Some((holding, change)) => {
                selections.push(FundTopHolding {
                    fund_name: filing.fund_name.clone(),
                    cik: filing.cik.clone(),
                    most_purchased: select(&holding, filing.total_value(), tickers),
                    position_change: change,
                    investor: None,
                });
            }
            None => info!(
                fund = filing.fund_name.as_str(),
                "no position grew since the previous quarter, fund left out"
            ),
        }
    }

    selections
}

/// Compare one holding against its previous-quarter counterpart (if any).
pub fn compare(
    current: &Holding,
    current_total: f64,
    previous: Option<&Holding>,
    previous_total: f64,
) -> PositionChange {
    let current_quarter = QuarterSnapshot {
        value: current.value,
        shares: current.shares,
        percent_of_portfolio: percent_of(current.value, current_total),
    };

    let previous_quarter = match previous {
        Some(prev) => QuarterSnapshot {
            value: prev.value,
            shares: prev.shares,
            percent_of_portfolio: percent_of(prev.value, previous_total),
        },
        None => QuarterSnapshot { value: 0.0, shares: 0.0, percent_of_portfolio: 0.0 },
    };

    let value_change = current_quarter.value - previous_quarter.value;
    let percent_change = if previous_quarter.value > 0.0 {
        PercentChange::Percent(value_change / previous_quarter.value * 100.0)
    } else {
        PercentChange::NewPosition
    };

    PositionChange {
        previous_quarter: Some(previous_quarter),
        current_quarter,
        change: ChangeSummary {
            value_change,
            shares_change: current_quarter.shares - previous_quarter.shares,
            percent_change,
        },
    }
}

fn most_increased(filing: &FundFiling, prior: &FundFiling) -> Option<(Holding, Option<PositionChange>)> {
    let current_total = filing.total_value();
    let previous_total = prior.total_value();

    let previous_holdings = prior.consolidated_holdings();
    let by_cusip: HashMap<&str, &Holding> = previous_holdings
        .iter()
        .map(|h| (h.security_id.as_str(), h))
        .collect();

    let mut best: Option<Candidate> = None;

    for holding in filing.consolidated_holdings() {
        let change = compare(
            &holding,
            current_total,
            by_cusip.get(holding.security_id.as_str()).copied(),
            previous_total,
        );
        if change.change.value_change <= 0.0 {
            continue;
        }
        // strictly greater, so the first of equal increases wins
        let better = best
            .as_ref()
            .map_or(true, |b| change.change.value_change > b.change.change.value_change);
        if better {
            best = Some(Candidate { holding, change });
        }
    }

    best.map(|c| (c.holding, Some(c.change)))
}

fn largest_holding(filing: &FundFiling) -> Option<Holding> {
    filing
        .consolidated_holdings()
        .into_iter()
        .fold(None, |best: Option<Holding>, h| match best {
            Some(b) if b.value >= h.value => Some(b),
            _ => Some(h),
        })
}

fn select(holding: &Holding, fund_total: f64, tickers: &TickerTable) -> SelectedHolding {
    SelectedHolding {
        cusip: holding.security_id.clone(),
        company_name: holding.issuer_name.clone(),
        ticker: tickers.lookup(&holding.security_id).to_string(),
        title_of_class: holding.title_of_class.clone(),
        value: holding.value,
        shares: holding.shares,
        share_type: holding.share_type.clone(),
        percent_of_portfolio: percent_of(holding.value, fund_total),
        price_history: Vec::new(),
        valuation_metrics: None,
    }
}

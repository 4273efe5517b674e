//! Holdings data model shared by the fetch, aggregate and assemble stages.
//!
//! All monetary values are whole US dollars (see `parser::ValueUnit`).

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

use crate::stocks::{PricePoint, ValuationMetrics};

pub const DEFAULT_TITLE_OF_CLASS: &str = "COM";
pub const DEFAULT_SHARE_TYPE: &str = "SH";

/// One position reported by one fund in one filing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    /// 9-character CUSIP, kept as text so leading zeros survive.
    #[serde(rename = "cusip")]
    pub security_id: String,
    #[serde(rename = "companyName")]
    pub issuer_name: String,
    pub title_of_class: String,
    pub value: f64,
    pub shares: f64,
    pub share_type: String,
}

impl Holding {
    /// Left-pads a raw CUSIP to 9 characters with zeros.
    pub fn normalize_security_id(raw: &str) -> String {
        format!("{:0>9}", raw.trim().to_ascii_uppercase())
    }
}

/// One fund's holdings for one quarter. Built once by the fetcher and never mutated.
#[derive(Debug, Clone)]
pub struct FundFiling {
    pub fund_name: String,
    pub cik: String,
    pub filing_date: NaiveDate,
    pub accession_number: String,
    /// May contain several lines for the same security.
    pub holdings: Vec<Holding>,
}

impl FundFiling {
    pub fn total_value(&self) -> f64 {
        self.holdings.iter().map(|h| h.value).sum()
    }

    /// Holdings with repeated securities summed into one line each, in first-seen order.
    pub fn consolidated_holdings(&self) -> Vec<Holding> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut merged: Vec<Holding> = Vec::new();

        for holding in &self.holdings {
            match index.get(holding.security_id.as_str()) {
                Some(&i) => {
                    merged[i].value += holding.value;
                    merged[i].shares += holding.shares;
                }
                None => {
                    index.insert(holding.security_id.as_str(), merged.len());
                    merged.push(holding.clone());
                }
            }
        }

        merged
    }
}

/// One fund's share of an [`AggregatedPosition`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundContribution {
    pub fund_name: String,
    pub value: f64,
    pub shares: f64,
    pub percent_of_portfolio: f64,
}

/// A security's combined position across every fetched fund.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedPosition {
    pub rank: usize,
    pub cusip: String,
    pub company_name: String,
    pub ticker: String,
    pub total_value: f64,
    pub total_shares: f64,
    pub fund_count: usize,
    pub percent_of_aggregate_aum: f64,
    pub funds_holding: Vec<FundContribution>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarterSnapshot {
    pub value: f64,
    pub shares: f64,
    pub percent_of_portfolio: f64,
}

/// Percent change between quarters. A security absent from the previous
/// quarter has no meaningful percentage and is reported as `"NEW"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PercentChange {
    NewPosition,
    Percent(f64),
}

pub const NEW_POSITION_MARKER: &str = "NEW";

impl Serialize for PercentChange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PercentChange::NewPosition => serializer.serialize_str(NEW_POSITION_MARKER),
            PercentChange::Percent(p) => serializer.serialize_f64(*p),
        }
    }
}

impl<'de> Deserialize<'de> for PercentChange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde_json::Value;

        match Value::deserialize(deserializer)? {
            Value::String(s) if s == NEW_POSITION_MARKER => Ok(PercentChange::NewPosition),
            Value::Number(n) => n
                .as_f64()
                .map(PercentChange::Percent)
                .ok_or_else(|| serde::de::Error::custom("percentChange out of range")),
            other => Err(serde::de::Error::custom(format!(
                "unexpected percentChange value: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSummary {
    pub value_change: f64,
    pub shares_change: f64,
    pub percent_change: PercentChange,
}

/// Quarter-over-quarter delta for one fund's selected holding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionChange {
    pub previous_quarter: Option<QuarterSnapshot>,
    pub current_quarter: QuarterSnapshot,
    pub change: ChangeSummary,
}

/// The holding picked for a fund, plus the slots the enrichment collaborator fills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedHolding {
    pub cusip: String,
    pub company_name: String,
    #[serde(default)]
    pub ticker: String,
    pub title_of_class: String,
    pub value: f64,
    pub shares: f64,
    pub share_type: String,
    pub percent_of_portfolio: f64,
    #[serde(default, deserialize_with = "crate::stocks::deserialize_price_history")]
    pub price_history: Vec<PricePoint>,
    #[serde(default)]
    pub valuation_metrics: Option<ValuationMetrics>,
}

/// Display metadata attached to each detailed-dataset entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestorDisplay {
    pub name: String,
    pub manager: String,
    pub description: String,
    pub category: String,
}

/// Per-fund record in the detailed dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundTopHolding {
    pub fund_name: String,
    pub cik: String,
    pub most_purchased: SelectedHolding,
    /// `None` when there was no previous filing to compare against.
    pub position_change: Option<PositionChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub investor: Option<InvestorDisplay>,
}

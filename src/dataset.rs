//! Summary and detailed documents for one `(category, quarter)`, and writing them out.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;
use crate::investor::{InvestorCategory, QuarterInfo};
use crate::model::{AggregatedPosition, FundFiling, FundTopHolding};
use crate::portfolio::{AggregateMetadata, AggregateResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundSummary {
    pub name: String,
    pub cik: String,
    pub manager: String,
    pub category: String,
    pub aum: f64,
    pub holdings_count: usize,
    pub filing_date: NaiveDate,
    pub accession_number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryMetadata {
    #[serde(flatten)]
    pub aggregate: AggregateMetadata,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryDocument {
    pub quarter: String,
    pub quarter_end_date: NaiveDate,
    pub filing_deadline: String,
    pub generated_at: DateTime<Utc>,
    pub category: String,
    pub category_label: String,
    pub funds: Vec<FundSummary>,
    pub top_holdings: Vec<AggregatedPosition>,
    pub metadata: SummaryMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedDocument {
    pub quarter: String,
    pub category: String,
    pub fund_top_holdings: Vec<FundTopHolding>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuarterDataset {
    pub summary: SummaryDocument,
    pub detailed: DetailedDocument,
}

/// Build both documents. Output depends only on the inputs; `generated_at`
/// is the one field that changes between otherwise identical builds.
pub fn assemble(
    filings: &[FundFiling],
    aggregate: &AggregateResult,
    top_holdings: Vec<FundTopHolding>,
    category: &InvestorCategory,
    quarter: &QuarterInfo,
    generated_at: DateTime<Utc>,
) -> QuarterDataset {
    let funds = filings
        .iter()
        .map(|filing| FundSummary {
            name: filing.fund_name.clone(),
            cik: filing.cik.clone(),
            manager: category
                .investor_by_cik(&filing.cik)
                .map(|i| i.manager.clone())
                .unwrap_or_default(),
            category: category.key.clone(),
            aum: filing.total_value(),
            holdings_count: filing.consolidated_holdings().len(),
            filing_date: filing.filing_date,
            accession_number: filing.accession_number.clone(),
        })
        .collect();

    let fund_top_holdings = top_holdings
        .into_iter()
        .map(|mut entry| {
            entry.investor = category
                .investor_by_cik(&entry.cik)
                .map(|investor| investor.display(&category.key));
            entry
        })
        .collect();

    QuarterDataset {
        summary: SummaryDocument {
            quarter: quarter.label.clone(),
            quarter_end_date: quarter.end_date,
            filing_deadline: quarter.filing_deadline.clone(),
            generated_at,
            category: category.key.clone(),
            category_label: category.label.clone(),
            funds,
            top_holdings: aggregate.top_holdings.clone(),
            metadata: SummaryMetadata {
                aggregate: aggregate.metadata.clone(),
                category: category.key.clone(),
            },
        },
        detailed: DetailedDocument {
            quarter: quarter.label.clone(),
            category: category.key.clone(),
            fund_top_holdings,
        },
    }
}

/// `{category}-{quarter}.json` and `{category}-{quarter}-detailed.json`.
pub fn dataset_file_names(category: &str, quarter: &str) -> (String, String) {
    (
        format!("{}-{}.json", category, quarter),
        format!("{}-{}-detailed.json", category, quarter),
    )
}

/// Write both documents into `dir`, replacing any earlier build of the same key.
///
/// Both documents are serialized before anything touches the disk.
pub fn write_dataset(dir: &Path, dataset: &QuarterDataset) -> Result<(PathBuf, PathBuf)> {
    let summary_json = serde_json::to_string_pretty(&dataset.summary)?;
    let detailed_json = serde_json::to_string_pretty(&dataset.detailed)?;

    let (summary_name, detailed_name) =
        dataset_file_names(&dataset.summary.category, &dataset.summary.quarter);
    let summary_path = dir.join(summary_name);
    let detailed_path = dir.join(detailed_name);

    fs::create_dir_all(dir)?;
    write_replacing(&summary_path, &summary_json)?;
    write_replacing(&detailed_path, &detailed_json)?;

    info!(
        summary = %summary_path.display(),
        detailed = %detailed_path.display(),
        "wrote dataset"
    );
    Ok((summary_path, detailed_path))
}

fn write_replacing(path: &Path, contents: &str) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

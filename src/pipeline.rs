//! One dataset build: fetch, aggregate, compare, enrich, assemble.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::dataset::{assemble, QuarterDataset};
use crate::edgar::{FilingFetcher, FilingSource};
use crate::error::{PipelineError, Result};
use crate::investor::{Catalog, Investor};
use crate::model::FundTopHolding;
use crate::portfolio::aggregate;
use crate::position_change::identify_most_purchased;
use crate::stocks::EnrichmentService;

pub struct Pipeline<S> {
    catalog: Catalog,
    fetcher: FilingFetcher<S>,
    enricher: Option<Box<dyn EnrichmentService>>,
}

impl<S: FilingSource> Pipeline<S> {
    /// `enricher: None` skips enrichment entirely.
    pub fn new(catalog: Catalog, fetcher: FilingFetcher<S>, enricher: Option<Box<dyn EnrichmentService>>) -> Self {
        Pipeline { catalog, fetcher, enricher }
    }

    /// Build the dataset for `category_key` and `quarter_label` without writing it.
    ///
    /// Unknown category or quarter fail before any request is made. A quarter
    /// where no fund yields a filing fails with [`PipelineError::NoFilings`].
    /// Everything else (missing funds, no previous quarter, enrichment
    /// trouble) is logged and the dataset shrinks accordingly.
    pub async fn build(
        &self,
        category_key: &str,
        quarter_label: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<QuarterDataset> {
        let category = self.catalog.category(category_key)?;
        let quarter_info = self.catalog.quarter(quarter_label)?;
        let quarter = quarter_info.quarter().ok_or_else(|| PipelineError::UnknownQuarter {
            label: quarter_info.label.clone(),
            valid: String::new(),
        })?;

        info!(
            category = category.key.as_str(),
            quarter = quarter_info.label.as_str(),
            funds = category.investors.len(),
            "building dataset"
        );

        let current = self
            .fetcher
            .fetch_filings_for_quarter(quarter_info.end_date, &category.investors)
            .await;
        if current.is_empty() {
            return Err(PipelineError::NoFilings {
                category: category.key.clone(),
                quarter: quarter_info.label.clone(),
            });
        }

        let aggregated = aggregate(&current, category.investors.len(), &self.catalog.tickers);

        // Only funds present this quarter need a comparison basis.
        let fetched: Vec<Investor> = category
            .investors
            .iter()
            .filter(|i| current.iter().any(|f| f.cik == i.cik))
            .cloned()
            .collect();
        let previous_quarter = quarter.previous();
        info!(quarter = previous_quarter.label().as_str(), "fetching previous quarter for comparison");
        let previous = self
            .fetcher
            .fetch_filings_for_quarter(previous_quarter.end_date(), &fetched)
            .await;
        if previous.is_empty() {
            warn!(
                quarter = previous_quarter.label().as_str(),
                "previous quarter unavailable, falling back to largest holdings"
            );
        }
        let previous = (!previous.is_empty()).then_some(previous);

        let picks = identify_most_purchased(&current, previous.as_deref(), &self.catalog.tickers);
        let picks = self.enrich(picks).await;

        Ok(assemble(&current, &aggregated, picks, category, quarter_info, generated_at))
    }

    async fn enrich(&self, picks: Vec<FundTopHolding>) -> Vec<FundTopHolding> {
        let Some(enricher) = self.enricher.as_ref() else {
            info!("enrichment skipped");
            return picks;
        };
        if picks.is_empty() {
            return picks;
        }

        match enricher.enrich(&picks).await {
            Ok(enriched) => {
                info!(holdings = enriched.len(), "enriched top holdings");
                enriched
            }
            Err(e) => {
                warn!("continuing without enrichment: {}", e);
                picks
            }
        }
    }
}

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use holdings_tracker::config::SecConfig;
use holdings_tracker::edgar::{FilingFetcher, FilingSource};
use holdings_tracker::investor::{Catalog, Investor, InvestorCategory};
use holdings_tracker::model::{FundTopHolding, PercentChange};
use holdings_tracker::pipeline::Pipeline;
use holdings_tracker::portfolio::DataQuality;
use holdings_tracker::stocks::{EnrichmentService, PricePoint, ValuationMetrics};
use holdings_tracker::{PipelineError, Result};

const SUBMISSIONS: &str = "https://data.test/submissions";
const ARCHIVES: &str = "https://www.test/Archives/edgar/data";

/// Serves canned pages and records every URL asked for.
#[derive(Default)]
struct FakeEdgar {
    pages: HashMap<String, String>,
    requests: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl FilingSource for FakeEdgar {
    async fn get_text(&self, url: &str) -> Result<String> {
        self.requests.lock().unwrap().push(url.to_string());
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| PipelineError::Status { url: url.to_string(), status: 404 })
    }
}

/// One 13F-HR in a fund's submissions history.
struct Report {
    accession: String,
    filed: &'static str,
    table: String,
}

impl FakeEdgar {
    fn fund(mut self, cik: u32, reports: Vec<Report>) -> Self {
        let list = |values: Vec<String>| {
            values.iter().map(|v| format!("\"{}\"", v)).collect::<Vec<_>>().join(",")
        };
        let submissions = format!(
            r#"{{"filings": {{"recent": {{
                "accessionNumber": [{}],
                "filingDate": [{}],
                "form": [{}],
                "primaryDocument": [{}]
            }}}}}}"#,
            list(reports.iter().map(|r| r.accession.clone()).collect()),
            list(reports.iter().map(|r| r.filed.to_string()).collect()),
            list(reports.iter().map(|_| "13F-HR".to_string()).collect()),
            list(reports.iter().map(|_| "primary_doc.xml".to_string()).collect()),
        );
        self.pages
            .insert(format!("{}/CIK{:010}.json", SUBMISSIONS, cik), submissions);

        for report in reports {
            let folder = format!("{}/{}/{}", ARCHIVES, cik, report.accession.replace('-', ""));
            self.pages.insert(format!("{}/infotable.xml", folder), report.table);
        }
        self
    }

    fn request_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.requests)
    }
}

fn report(cik: u32, seq: u32, filed: &'static str, rows: &[(&str, &str, u64, u64)]) -> Report {
    let entries: String = rows
        .iter()
        .map(|(name, cusip, value, shares)| {
            format!(
                "<infoTable><nameOfIssuer>{}</nameOfIssuer><titleOfClass>COM</titleOfClass>\
                 <cusip>{}</cusip><value>{}</value><shrsOrPrnAmt><sshPrnamt>{}</sshPrnamt>\
                 <sshPrnamtType>SH</sshPrnamtType></shrsOrPrnAmt></infoTable>",
                name, cusip, value, shares
            )
        })
        .collect();
    Report {
        accession: format!("{:010}-24-{:06}", cik, seq),
        filed,
        table: format!(
            r#"<?xml version="1.0"?><informationTable xmlns="http://www.sec.gov/edgar/document/thirteenf/informationtable">{}</informationTable>"#,
            entries
        ),
    }
}

fn sec_config() -> SecConfig {
    SecConfig {
        submissions_url: SUBMISSIONS.to_string(),
        archives_url: ARCHIVES.to_string(),
        request_delay: Duration::ZERO,
        fund_delay: Duration::ZERO,
        ..SecConfig::default()
    }
}

fn catalog(investors: Vec<Investor>) -> Catalog {
    Catalog {
        categories: vec![InvestorCategory {
            key: "legendary".to_string(),
            label: "Legendary Investors".to_string(),
            investors,
        }],
        ..Catalog::builtin()
    }
}

fn pipeline(
    edgar: FakeEdgar,
    investors: Vec<Investor>,
    enricher: Option<Box<dyn EnrichmentService>>,
) -> Pipeline<FakeEdgar> {
    Pipeline::new(catalog(investors), FilingFetcher::new(edgar, &sec_config()), enricher)
}

fn two_funds() -> Vec<Investor> {
    vec![
        Investor::new("Fund A", "1", "Manager A", "Concentrated value"),
        Investor::new("Fund B", "2", "Manager B", "Macro"),
    ]
}

/// Fund A files for Q2 and Q3 2024, Fund B only for Q3.
fn two_fund_edgar() -> FakeEdgar {
    FakeEdgar::default()
        .fund(
            1,
            vec![
                report(
                    1,
                    2,
                    "2024-11-14",
                    &[("APPLE INC", "037833100", 500, 50), ("ACME CORP", "12345678", 300, 30)],
                ),
                report(
                    1,
                    1,
                    "2024-08-14",
                    &[("APPLE INC", "037833100", 300, 40), ("ACME CORP", "12345678", 400, 40)],
                ),
            ],
        )
        .fund(2, vec![report(2, 1, "2024-11-12", &[("APPLE INC", "037833100", 200, 20)])])
}

struct PricingEnricher;

#[async_trait]
impl EnrichmentService for PricingEnricher {
    async fn enrich(&self, batch: &[FundTopHolding]) -> Result<Vec<FundTopHolding>> {
        Ok(batch
            .iter()
            .cloned()
            .map(|mut entry| {
                entry.most_purchased.price_history =
                    vec![PricePoint { date: "2024-09-30".to_string(), close: 233.0 }];
                entry.most_purchased.valuation_metrics = Some(ValuationMetrics {
                    pe_ratio: Some(35.0),
                    pb_ratio: None,
                    ps_ratio: None,
                    ev_to_ebitda: None,
                    market_cap: Some(3.5e12),
                    last_updated: Some("2024-12-01".to_string()),
                });
                entry
            })
            .collect())
    }
}

struct BrokenEnricher;

#[async_trait]
impl EnrichmentService for BrokenEnricher {
    async fn enrich(&self, _batch: &[FundTopHolding]) -> Result<Vec<FundTopHolding>> {
        Err(PipelineError::Enrichment("price service unreachable".to_string()))
    }
}

#[tokio::test]
async fn builds_both_documents_end_to_end() {
    let ts = Utc.with_ymd_and_hms(2024, 12, 1, 8, 0, 0).unwrap();
    let pipeline = pipeline(two_fund_edgar(), two_funds(), Some(Box::new(PricingEnricher)));

    let dataset = pipeline.build("legendary", "Q3-2024", ts).await.unwrap();
    let summary = &dataset.summary;

    assert_eq!(summary.quarter, "Q3-2024");
    assert_eq!(summary.generated_at, ts);
    assert_eq!(summary.funds.len(), 2);
    assert_eq!(summary.funds[0].aum, 800.0);
    assert_eq!(summary.metadata.aggregate.data_quality, DataQuality::Complete);
    assert_eq!(summary.metadata.aggregate.unique_securities, 2);

    let apple = &summary.top_holdings[0];
    assert_eq!(apple.cusip, "037833100");
    assert_eq!(apple.ticker, "AAPL");
    assert_eq!(apple.total_value, 700.0);
    assert_eq!(apple.fund_count, 2);
    // Leading zero restored from the filing's 8-character CUSIP.
    assert_eq!(summary.top_holdings[1].cusip, "012345678");

    let picks = &dataset.detailed.fund_top_holdings;
    assert_eq!(picks.len(), 2);

    let a = &picks[0];
    assert_eq!(a.fund_name, "Fund A");
    assert_eq!(a.most_purchased.cusip, "037833100");
    assert_eq!(a.most_purchased.price_history.len(), 1);
    let change = a.position_change.unwrap();
    assert_eq!(change.change.value_change, 200.0);
    match change.change.percent_change {
        PercentChange::Percent(p) => assert!((p - 66.67).abs() < 0.01),
        PercentChange::NewPosition => panic!("Apple was held last quarter"),
    }
    assert_eq!(a.investor.as_ref().unwrap().manager, "Manager A");

    // Fund B has no Q2 filing, so it falls back to its largest holding.
    let b = &picks[1];
    assert_eq!(b.fund_name, "Fund B");
    assert!(b.position_change.is_none());
    let json = serde_json::to_value(&dataset.detailed).unwrap();
    assert!(json["fundTopHoldings"][1]["positionChange"].is_null());
    assert_eq!(json["fundTopHoldings"][0]["mostPurchased"]["valuationMetrics"]["peRatio"], 35.0);
}

#[tokio::test]
async fn missing_funds_yield_partial_dataset() {
    let investors: Vec<Investor> = (1..=10)
        .map(|i| Investor::new(&format!("Fund {}", i), &i.to_string(), "", ""))
        .collect();
    let edgar = (1..=8).fold(FakeEdgar::default(), |edgar, cik| {
        edgar.fund(cik, vec![report(cik, 1, "2024-11-14", &[("APPLE INC", "037833100", 100, 1)])])
    });

    let dataset = pipeline(edgar, investors, None)
        .build("legendary", "Q3-2024", Utc::now())
        .await
        .unwrap();
    let metadata = &dataset.summary.metadata.aggregate;
    assert_eq!(metadata.funds_requested, 10);
    assert_eq!(metadata.funds_analyzed, 8);
    assert_eq!(metadata.data_quality, DataQuality::Partial);

    let json = serde_json::to_value(&dataset.summary).unwrap();
    assert_eq!(json["metadata"]["dataQuality"], "partial");
    assert_eq!(json["metadata"]["category"], "legendary");
}

#[tokio::test]
async fn no_filings_is_an_error() {
    let err = pipeline(FakeEdgar::default(), two_funds(), None)
        .build("legendary", "Q3-2024", Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NoFilings { .. }));
}

#[tokio::test]
async fn bad_selection_fails_before_any_request() {
    let edgar = two_fund_edgar();
    let log = edgar.request_log();
    let pipeline = pipeline(edgar, two_funds(), None);

    let err = pipeline.build("nonexistent", "Q3-2024", Utc::now()).await.unwrap_err();
    match err {
        PipelineError::UnknownCategory { valid, .. } => assert!(valid.contains("legendary")),
        other => panic!("unexpected error: {}", other),
    }

    let err = pipeline.build("legendary", "Q9-2024", Utc::now()).await.unwrap_err();
    assert!(matches!(err, PipelineError::UnknownQuarter { .. }));
    let err = pipeline.build("legendary", "Q1-2019", Utc::now()).await.unwrap_err();
    assert!(matches!(err, PipelineError::UnknownQuarter { .. }));

    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn enrichment_failure_keeps_unenriched_picks() {
    let dataset = pipeline(two_fund_edgar(), two_funds(), Some(Box::new(BrokenEnricher)))
        .build("legendary", "Q3-2024", Utc::now())
        .await
        .unwrap();

    let picks = &dataset.detailed.fund_top_holdings;
    assert_eq!(picks.len(), 2);
    assert!(picks.iter().all(|p| p.most_purchased.price_history.is_empty()));
    assert!(picks.iter().all(|p| p.most_purchased.valuation_metrics.is_none()));
    assert_eq!(picks[0].most_purchased.cusip, "037833100");
}

#[tokio::test]
async fn missing_previous_quarter_leaves_comparisons_null() {
    let edgar = FakeEdgar::default()
        .fund(1, vec![report(1, 1, "2024-11-14", &[("APPLE INC", "037833100", 100, 1), ("ACME CORP", "012345678", 900, 9)])]);

    let dataset = pipeline(edgar, two_funds(), None)
        .build("legendary", "Q3-2024", Utc::now())
        .await
        .unwrap();

    let picks = &dataset.detailed.fund_top_holdings;
    assert_eq!(picks.len(), 1);
    assert_eq!(picks[0].most_purchased.cusip, "012345678");
    assert_eq!(picks[0].most_purchased.percent_of_portfolio, 90.0);
    assert!(picks[0].position_change.is_none());
    assert_eq!(dataset.summary.metadata.aggregate.data_quality, DataQuality::Partial);
}

#[tokio::test]
async fn identical_builds_serialize_identically() {
    let ts = Utc.with_ymd_and_hms(2024, 12, 1, 8, 0, 0).unwrap();
    let first = pipeline(two_fund_edgar(), two_funds(), None)
        .build("legendary", "Q3-2024", ts)
        .await
        .unwrap();
    let second = pipeline(two_fund_edgar(), two_funds(), None)
        .build("legendary", "Q3-2024", ts)
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_string_pretty(&first.summary).unwrap(),
        serde_json::to_string_pretty(&second.summary).unwrap()
    );
    assert_eq!(
        serde_json::to_string_pretty(&first.detailed).unwrap(),
        serde_json::to_string_pretty(&second.detailed).unwrap()
    );
}

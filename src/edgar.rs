//! SEC EDGAR access: locating each fund's 13F-HR for a quarter and pulling
//! its information-table XML.
//!
//! Requests go out one at a time. The fetcher sleeps after every request and
//! again between funds, keeping well under the SEC's fair-access ceiling.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SecConfig;
use crate::error::{PipelineError, Result};
use crate::investor::Investor;
use crate::model::FundFiling;
use crate::parser::{looks_like_information_table, parse_filing_document, ValueUnit};

pub const HOLDINGS_FORM_TYPE: &str = "13F-HR";

/// Usual file names for the information table when the index page gives no hint.
const CONVENTIONAL_TABLE_NAMES: &[&str] = &[
    "infotable.xml",
    "InfoTable.xml",
    "informationtable.xml",
    "form13fInfoTable.xml",
    "form13f_infotable.xml",
];

static XML_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)href\s*=\s*"([^"]+\.xml)""#).expect("valid href regex"));

/// Transport used by the fetcher. One GET, body as text.
#[async_trait]
pub trait FilingSource: Send + Sync {
    async fn get_text(&self, url: &str) -> Result<String>;
}

/// reqwest-backed source that identifies itself to the SEC.
pub struct EdgarClient {
    http: reqwest::Client,
}

impl EdgarClient {
    pub fn new(config: &SecConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, application/xml, text/html;q=0.9"),
        );

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .timeout(config.http_timeout)
            .build()?;

        Ok(EdgarClient { http })
    }

    async fn send_get_request(&self, url: &str) -> Result<String> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(PipelineError::Status { url: url.to_string(), status: status.as_u16() });
        }
        Ok(text)
    }
}

#[async_trait]
impl FilingSource for EdgarClient {
    async fn get_text(&self, url: &str) -> Result<String> {
        debug!(url, "GET");
        self.send_get_request(url).await
    }
}

#[derive(Debug, Deserialize)]
struct Submissions {
    filings: SubmissionFilings,
}

#[derive(Debug, Deserialize)]
struct SubmissionFilings {
    recent: RecentFilings,
}

/// The submissions API returns recent filings as parallel arrays.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecentFilings {
    #[serde(default)]
    accession_number: Vec<String>,
    #[serde(default)]
    filing_date: Vec<String>,
    #[serde(default)]
    form: Vec<String>,
    #[serde(default)]
    primary_document: Vec<String>,
}

/// A located filing, before its documents are retrieved.
#[derive(Debug, Clone, PartialEq)]
pub struct FilingRef {
    pub accession_number: String,
    pub filing_date: NaiveDate,
    pub primary_document: String,
}

pub struct FilingFetcher<S> {
    source: S,
    submissions_url: String,
    archives_url: String,
    filing_window_days: i64,
    request_delay: Duration,
    fund_delay: Duration,
}

impl<S: FilingSource> FilingFetcher<S> {
    pub fn new(source: S, config: &SecConfig) -> Self {
        FilingFetcher {
            source,
            submissions_url: config.submissions_url.trim_end_matches('/').to_string(),
            archives_url: config.archives_url.trim_end_matches('/').to_string(),
            filing_window_days: config.filing_window_days,
            request_delay: config.request_delay,
            fund_delay: config.fund_delay,
        }
    }

    /// One GET through the source, then the polite pause whether or not it succeeded.
    async fn get(&self, url: &str) -> Result<String> {
        let result = self.source.get_text(url).await;
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }
        result
    }

    /// Fetch and parse every investor's filing for the quarter ending `quarter_end`.
    ///
    /// Funds without a usable filing are logged and left out; an empty result
    /// is for the caller to judge.
    pub async fn fetch_filings_for_quarter(
        &self,
        quarter_end: NaiveDate,
        investors: &[Investor],
    ) -> Vec<FundFiling> {
        let mut filings = Vec::with_capacity(investors.len());

        for (i, investor) in investors.iter().enumerate() {
            if i > 0 && !self.fund_delay.is_zero() {
                tokio::time::sleep(self.fund_delay).await;
            }

            match self.fetch_fund(investor, quarter_end).await {
                Ok(Some(filing)) => {
                    info!(
                        fund = investor.name.as_str(),
                        holdings = filing.holdings.len(),
                        filed = %filing.filing_date,
                        "fetched 13F"
                    );
                    filings.push(filing);
                }
                Ok(None) => {}
                Err(e) => warn!(fund = investor.name.as_str(), "skipping fund: {}", e),
            }
        }

        info!(
            fetched = filings.len(),
            requested = investors.len(),
            quarter_end = %quarter_end,
            "finished fetching filings"
        );
        filings
    }

    /// `Ok(None)` when the fund has no usable filing for the quarter.
    pub async fn fetch_fund(
        &self,
        investor: &Investor,
        quarter_end: NaiveDate,
    ) -> Result<Option<FundFiling>> {
        let Some(filing) = self.locate_filing(&investor.cik, quarter_end).await? else {
            warn!(
                fund = investor.name.as_str(),
                quarter_end = %quarter_end,
                "no {} filed within {} days of quarter end",
                HOLDINGS_FORM_TYPE,
                self.filing_window_days
            );
            return Ok(None);
        };

        let Some((url, content)) = self.resolve_information_table(&investor.cik, &filing).await
        else {
            warn!(
                fund = investor.name.as_str(),
                accession = filing.accession_number.as_str(),
                "no information table document found in filing"
            );
            return Ok(None);
        };

        let holdings = parse_filing_document(&content, ValueUnit::for_filing_date(filing.filing_date));
        if holdings.is_empty() {
            warn!(fund = investor.name.as_str(), url = url.as_str(), "information table yielded no holdings");
            return Ok(None);
        }

        Ok(Some(FundFiling {
            fund_name: investor.name.clone(),
            cik: investor.cik.clone(),
            filing_date: filing.filing_date,
            accession_number: filing.accession_number,
            holdings,
        }))
    }

    /// First 13F-HR in index order filed after `quarter_end` and within the window.
    pub async fn locate_filing(&self, cik: &str, quarter_end: NaiveDate) -> Result<Option<FilingRef>> {
        let url = format!("{}/CIK{:0>10}.json", self.submissions_url, cik);
        let body = self.get(&url).await?;
        let submissions: Submissions = serde_json::from_str(&body)?;
        let recent = submissions.filings.recent;

        let window_end = quarter_end + ChronoDuration::days(self.filing_window_days);

        for (i, form) in recent.form.iter().enumerate() {
            if form != HOLDINGS_FORM_TYPE {
                continue;
            }
            let (Some(accession), Some(date)) = (recent.accession_number.get(i), recent.filing_date.get(i))
            else {
                continue;
            };
            let Ok(filing_date) = NaiveDate::parse_from_str(date, "%Y-%m-%d") else {
                debug!(date = date.as_str(), "ignoring filing with unparsable date");
                continue;
            };

            if filing_date > quarter_end && filing_date <= window_end {
                return Ok(Some(FilingRef {
                    accession_number: accession.clone(),
                    filing_date,
                    primary_document: recent.primary_document.get(i).cloned().unwrap_or_default(),
                }));
            }
        }

        Ok(None)
    }

    fn filing_folder(&self, cik: &str, accession: &str) -> String {
        format!(
            "{}/{}/{}",
            self.archives_url,
            cik.trim_start_matches('0'),
            accession.replace('-', "")
        )
    }

    /// Candidate document URLs, most likely first: XML links on the filing
    /// index page, then the conventional file names.
    async fn candidate_documents(&self, cik: &str, filing: &FilingRef) -> Vec<String> {
        let folder = self.filing_folder(cik, &filing.accession_number);
        let index_url = format!("{}/{}-index.htm", folder, filing.accession_number);
        let mut candidates: Vec<String> = Vec::new();

        match self.get(&index_url).await {
            Ok(page) => {
                for href in extract_xml_links(&page) {
                    if let Some(url) = absolutize(&index_url, &href) {
                        if !candidates.contains(&url) {
                            candidates.push(url);
                        }
                    }
                }
            }
            Err(e) => debug!(url = index_url.as_str(), "filing index unavailable: {}", e),
        }

        // The indexed primary document is usually the cover page, occasionally the table.
        if is_table_candidate(&filing.primary_document) {
            let url = format!("{}/{}", folder, filing.primary_document);
            if !candidates.contains(&url) {
                candidates.push(url);
            }
        }

        for name in CONVENTIONAL_TABLE_NAMES {
            let url = format!("{}/{}", folder, name);
            if !candidates.contains(&url) {
                candidates.push(url);
            }
        }

        candidates
    }

    /// Probe candidates until one contains an information table.
    pub async fn resolve_information_table(
        &self,
        cik: &str,
        filing: &FilingRef,
    ) -> Option<(String, String)> {
        for url in self.candidate_documents(cik, filing).await {
            match self.get(&url).await {
                Ok(content) if looks_like_information_table(&content) => {
                    debug!(url = url.as_str(), "information table found");
                    return Some((url, content));
                }
                Ok(_) => debug!(url = url.as_str(), "document is not an information table"),
                Err(e) => debug!(url = url.as_str(), "candidate document unavailable: {}", e),
            }
        }
        None
    }
}

/// XML links on a filing index page, minus the cover page and XSL renderings.
fn extract_xml_links(page: &str) -> Vec<String> {
    XML_HREF
        .captures_iter(page)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .filter(|href| is_table_candidate(href))
        .collect()
}

fn is_table_candidate(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    lower.ends_with(".xml") && !lower.ends_with("primary_doc.xml") && !lower.contains("xsl")
}

fn absolutize(base: &str, href: &str) -> Option<String> {
    Url::parse(base).ok()?.join(href).ok().map(|u| u.to_string())
}

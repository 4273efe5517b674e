//! Security metadata and market-data enrichment
//!
//! This module handles:
//! - The static CUSIP to ticker table
//! - Price history / valuation types filled in by the enrichment collaborator
//! - Running the collaborator as a subprocess and reading its output back

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::model::FundTopHolding;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: String, // Format: "YYYY-MM-DD"
    pub close: f64,
}

/// Multiples as reported by the collaborator. Anything that is not a finite
/// number (`"Infinity"`, `null`, `"N/A"`) reads as `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationMetrics {
    #[serde(default, deserialize_with = "deserialize_metric")]
    pub pe_ratio: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_metric")]
    pub pb_ratio: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_metric")]
    pub ps_ratio: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_metric")]
    pub ev_to_ebitda: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_metric")]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

fn finite_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

fn deserialize_metric<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(finite_number(&Value::deserialize(deserializer)?))
}

/// Keeps the price points that carry a date and a finite close; drops the rest.
pub(crate) fn deserialize_price_history<'de, D>(deserializer: D) -> std::result::Result<Vec<PricePoint>, D::Error>
where
    D: Deserializer<'de>,
{
    let points = match Value::deserialize(deserializer)? {
        Value::Array(points) => points,
        _ => return Ok(Vec::new()),
    };
    Ok(points
        .iter()
        .filter_map(|point| {
            let date = point.get("date")?.as_str()?;
            let close = finite_number(point.get("close")?)?;
            Some(PricePoint { date: date.to_string(), close })
        })
        .collect())
}

/// CUSIP -> ticker. Unknown CUSIPs resolve to an empty string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TickerTable(BTreeMap<String, String>);

const BUILTIN_CUSIP_TICKERS: &[(&str, &str)] = &[
    ("037833100", "AAPL"),  // Apple Inc.
    ("02079K107", "GOOGL"), // Alphabet Inc. Class A
    ("02079K305", "GOOG"),  // Alphabet Inc. Class C
    ("594918104", "MSFT"),
    ("17275R102", "CSCO"),
    ("30303M102", "META"),
    ("88160R101", "TSLA"),
    ("01609W102", "BABA"),
    ("91324P102", "UNH"),
    ("67066G104", "NVDA"),
    ("46625H100", "JPM"),
    ("025816109", "AXP"),
    ("023135106", "AMZN"),
    ("060505104", "BAC"),
    ("191216100", "KO"),
    ("166764100", "CVX"),
    ("11135F101", "AVGO"),
    ("084670702", "BRK.B"),
    ("68389X105", "ORCL"),
    ("093712107", "BE"),
    ("722304102", "PDD"),
    ("031162100", "AMGN"),
    ("064058100", "BK"),
    ("451100101", "IEP"),
    ("90353T100", "UBER"),
    ("464287655", "IWM"),
    ("464287200", "IVV"),
    ("464287614", "IWF"),
    ("78462F103", "SPY"),
];

impl TickerTable {
    pub fn builtin() -> Self {
        TickerTable(
            BUILTIN_CUSIP_TICKERS
                .iter()
                .map(|(cusip, ticker)| (cusip.to_string(), ticker.to_string()))
                .collect(),
        )
    }

    pub fn lookup(&self, cusip: &str) -> &str {
        self.0.get(cusip).map(String::as_str).unwrap_or("")
    }

}

impl FromIterator<(String, String)> for TickerTable {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        TickerTable(iter.into_iter().collect())
    }
}

/// Attaches price history and valuation multiples to a batch of top holdings.
///
/// Called once per build with the whole batch. Implementations return the
/// same records with enrichment fields populated, or an error; the pipeline
/// keeps the unenriched batch on error.
#[async_trait]
pub trait EnrichmentService: Send + Sync {
    async fn enrich(&self, batch: &[FundTopHolding]) -> Result<Vec<FundTopHolding>>;
}

/// Runs an external program: JSON batch on stdin, enriched JSON batch on stdout.
#[derive(Debug, Clone)]
pub struct SubprocessEnricher {
    program: String,
    args: Vec<String>,
}

impl SubprocessEnricher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        SubprocessEnricher { program: program.into(), args }
    }

    /// Splits a whitespace-separated command line such as `python3 scripts/fetchStockData.py`.
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| PipelineError::Config("empty enrichment command".to_string()))?;
        Ok(SubprocessEnricher::new(program, parts.collect()))
    }

    fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl EnrichmentService for SubprocessEnricher {
    async fn enrich(&self, batch: &[FundTopHolding]) -> Result<Vec<FundTopHolding>> {
        let command = self.describe();
        let payload = serde_json::to_vec(batch)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::Enrichment(format!("failed to start '{}': {}", command, e)))?;

        // Feed stdin concurrently so a chatty child cannot block on a full stdout pipe.
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                let result = stdin.write_all(&payload).await;
                drop(stdin);
                result
            })
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| PipelineError::Enrichment(format!("'{}' did not finish: {}", command, e)))?;

        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("enrichment stdin closed early: {}", e),
                Err(e) => debug!("enrichment stdin writer panicked: {}", e),
            }
        }

        for line in String::from_utf8_lossy(&output.stderr).lines() {
            debug!(collaborator = "enrichment", "{}", line);
        }

        if !output.status.success() {
            return Err(PipelineError::Enrichment(format!(
                "'{}' exited with {}",
                command, output.status
            )));
        }

        let stdout = replace_non_finite(&String::from_utf8_lossy(&output.stdout));
        let json = extract_json_payload(&stdout).ok_or_else(|| {
            PipelineError::Enrichment(format!("'{}' produced no JSON payload", command))
        })?;

        let enriched: Vec<FundTopHolding> = serde_json::from_str(&json)
            .map_err(|e| PipelineError::Enrichment(format!("unparsable output: {}", e)))?;

        if enriched.len() != batch.len() {
            return Err(PipelineError::Enrichment(format!(
                "returned {} records for {} holdings",
                enriched.len(),
                batch.len()
            )));
        }

        Ok(enriched)
    }
}

/// Bare `NaN`/`Infinity` tokens, as Python's `json.dumps` writes them.
static NON_FINITE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([:\[,]\s*)-?(?:NaN|Infinity)\b").expect("valid non-finite regex")
});

/// Rewrites bare non-finite tokens to `null` so the output is valid JSON.
fn replace_non_finite(output: &str) -> String {
    NON_FINITE_TOKEN.replace_all(output, "${1}null").into_owned()
}

/// Drops log lines printed before the payload. Every line opening with `[`
/// or `{` is tried as the start; the first tail that parses as JSON wins,
/// so log lines like `[INFO] starting` are skipped too.
pub fn extract_json_payload(output: &str) -> Option<String> {
    let lines: Vec<&str> = output.lines().collect();
    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| {
            let trimmed = line.trim_start();
            trimmed.starts_with('[') || trimmed.starts_with('{')
        })
        .map(|(start, _)| lines[start..].join("\n"))
        .find(|tail| serde_json::from_str::<Value>(tail).is_ok())
}

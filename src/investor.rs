//! Static lookup data: tracked investors grouped by category, the CUSIP
//! ticker table and the quarter calendar.
//!
//! Everything here is read-only once built. Components receive a `&Catalog`
//! instead of reaching for globals, so tests can hand in synthetic rosters.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::model::InvestorDisplay;
use crate::stocks::TickerTable;

/// A tracked 13F filer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Investor {
    pub name: String,
    /// SEC Central Index Key, zero-padded to 10 digits.
    pub cik: String,
    #[serde(default)]
    pub manager: String,
    #[serde(default)]
    pub description: String,
}

impl Investor {
    pub fn new(name: &str, cik: &str, manager: &str, description: &str) -> Self {
        Investor {
            name: name.to_string(),
            cik: format!("{:0>10}", cik),
            manager: manager.to_string(),
            description: description.to_string(),
        }
    }

    pub fn display(&self, category: &str) -> InvestorDisplay {
        InvestorDisplay {
            name: self.name.clone(),
            manager: self.manager.clone(),
            description: self.description.clone(),
            category: category.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestorCategory {
    pub key: String,
    pub label: String,
    pub investors: Vec<Investor>,
}

impl InvestorCategory {
    pub fn investor_by_cik(&self, cik: &str) -> Option<&Investor> {
        self.investors.iter().find(|i| i.cik == cik)
    }
}

/// Calendar quarter, written `Q3-2024`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Quarter {
    pub year: i32,
    pub number: u8,
}

static QUARTER_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*q([1-4])[-_ ]?(\d{4})\s*$").expect("valid quarter regex"));

impl Quarter {
    pub fn parse(label: &str) -> Option<Self> {
        let caps = QUARTER_LABEL.captures(label)?;
        let number = caps.get(1)?.as_str().parse().ok()?;
        let year = caps.get(2)?.as_str().parse().ok()?;
        Some(Quarter { year, number })
    }

    pub fn label(&self) -> String {
        format!("Q{}-{}", self.number, self.year)
    }

    /// Last calendar day of the quarter (the 13F "period of report").
    pub fn end_date(&self) -> NaiveDate {
        let (month, day) = match self.number {
            1 => (3, 31),
            2 => (6, 30),
            3 => (9, 30),
            _ => (12, 31),
        };
        NaiveDate::from_ymd_opt(self.year, month, day).unwrap_or(NaiveDate::MIN)
    }

    pub fn previous(&self) -> Self {
        if self.number == 1 {
            Quarter { year: self.year - 1, number: 4 }
        } else {
            Quarter { year: self.year, number: self.number - 1 }
        }
    }
}

/// Calendar entry for a quarter the pipeline knows how to build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarterInfo {
    pub label: String,
    pub end_date: NaiveDate,
    /// Human-readable 13F deadline, e.g. "November 14, 2024". May be empty.
    #[serde(default)]
    pub filing_deadline: String,
}

impl QuarterInfo {
    pub fn quarter(&self) -> Option<Quarter> {
        Quarter::parse(&self.label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub categories: Vec<InvestorCategory>,
    pub quarters: Vec<QuarterInfo>,
    #[serde(default)]
    pub tickers: TickerTable,
}

impl Catalog {
    /// Load a catalog from JSON, replacing the built-in tables.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            PipelineError::Catalog(format!("failed to read '{}': {}", path.display(), e))
        })?;
        let mut catalog: Catalog = serde_json::from_str(&contents)?;
        if catalog.categories.is_empty() {
            return Err(PipelineError::Catalog(format!(
                "'{}' defines no investor categories",
                path.display()
            )));
        }
        for investor in catalog.categories.iter_mut().flat_map(|c| c.investors.iter_mut()) {
            investor.cik = format!("{:0>10}", investor.cik.trim());
        }
        Ok(catalog)
    }

    pub fn category(&self, key: &str) -> Result<&InvestorCategory> {
        self.categories
            .iter()
            .find(|c| c.key.eq_ignore_ascii_case(key))
            .ok_or_else(|| PipelineError::UnknownCategory {
                name: key.to_string(),
                valid: self.category_keys().join(", "),
            })
    }

    pub fn quarter(&self, label: &str) -> Result<&QuarterInfo> {
        let unknown = || PipelineError::UnknownQuarter {
            label: label.to_string(),
            valid: self
                .quarters
                .iter()
                .map(|q| q.label.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        };
        let wanted = Quarter::parse(label).ok_or_else(unknown)?;
        self.quarters
            .iter()
            .find(|q| q.quarter() == Some(wanted))
            .ok_or_else(unknown)
    }

    pub fn category_keys(&self) -> Vec<&str> {
        self.categories.iter().map(|c| c.key.as_str()).collect()
    }

    pub fn builtin() -> Self {
        Catalog {
            categories: vec![
                InvestorCategory {
                    key: "legendary".to_string(),
                    label: "Legendary Investors".to_string(),
                    investors: vec![
                        Investor::new("Berkshire Hathaway", "1067983", "Warren Buffett", "Value investing conglomerate"),
                        Investor::new("Scion Asset Management", "1649339", "Michael Burry", "Contrarian deep value"),
                        Investor::new("Pershing Square Capital", "1336528", "Bill Ackman", "Concentrated activist"),
                        Investor::new("Bridgewater Associates", "1350694", "Ray Dalio", "Global macro"),
                        Investor::new("Appaloosa Management", "1656456", "David Tepper", "Distressed and event driven"),
                        Investor::new("Baupost Group", "1061768", "Seth Klarman", "Margin-of-safety value"),
                        Investor::new("Third Point", "1040273", "Dan Loeb", "Event-driven activist"),
                        Investor::new("Icahn Capital", "921669", "Carl Icahn", "Activist"),
                        Investor::new("Greenlight Capital", "1079114", "David Einhorn", "Long/short value"),
                        Investor::new("Duquesne Family Office", "1536411", "Stanley Druckenmiller", "Macro and growth"),
                    ],
                },
                InvestorCategory {
                    key: "growth".to_string(),
                    label: "Emerging Growth Funds".to_string(),
                    investors: vec![
                        Investor::new("Tiger Global Management", "1167483", "Chase Coleman", "Technology growth"),
                        Investor::new("Coatue Management", "1135730", "Philippe Laffont", "Technology long/short"),
                        Investor::new("ARK Investment Management", "1697748", "Cathie Wood", "Disruptive innovation"),
                        Investor::new("Lone Pine Capital", "1061165", "Stephen Mandel", "Fundamental growth"),
                        Investor::new("Viking Global Investors", "1103804", "Andreas Halvorsen", "Long/short equity"),
                    ],
                },
            ],
            quarters: builtin_quarters(),
            tickers: TickerTable::builtin(),
        }
    }
}

fn builtin_quarters() -> Vec<QuarterInfo> {
    let mut quarters = Vec::new();
    for year in 2023..=2026 {
        for number in 1..=4u8 {
            let quarter = Quarter { year, number };
            let deadline = match number {
                1 => format!("May 15, {}", year),
                2 => format!("August 14, {}", year),
                3 => format!("November 14, {}", year),
                _ => format!("February 14, {}", year + 1),
            };
            quarters.push(QuarterInfo {
                label: quarter.label(),
                end_date: quarter.end_date(),
                filing_deadline: deadline,
            });
        }
    }
    quarters
}

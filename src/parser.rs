//! 13F information-table parsing.
//!
//! Filings disagree on layout: the table may be the document root or sit under
//! an `edgarSubmission`/`formData` wrapper, and any element (the table
//! included) may carry an arbitrary namespace prefix. The document is read
//! into a small element tree first, then the table and its fields are found
//! by trying an ordered list of lookups.

use chrono::NaiveDate;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::model::{Holding, DEFAULT_SHARE_TYPE, DEFAULT_TITLE_OF_CLASS};

const TABLE_NAME: &str = "informationTable";
const ENTRY_NAME: &str = "infoTable";

/// Prefixes seen on 13F fields besides the unprefixed default namespace.
const KNOWN_PREFIXES: &[&str] = &["ns1", "n1", "ns2", "ns4", "com", "eis"];

/// Element paths, below the document, where the table usually lives.
const KNOWN_TABLE_PATHS: &[&[&str]] = &[
    &["informationTable"],
    &["ns1:informationTable"],
    &["n1:informationTable"],
    &["edgarSubmission", "formData", "informationTable"],
    &["edgarSubmission", "informationTable"],
];

/// Unit the filing reports `value` in. The model always stores whole dollars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueUnit {
    Dollars,
    Thousands,
}

impl ValueUnit {
    /// 13F filings submitted from 2023-01-03 on report whole dollars; earlier
    /// ones report thousands.
    pub fn for_filing_date(filing_date: NaiveDate) -> Self {
        match NaiveDate::from_ymd_opt(2023, 1, 3) {
            Some(cutover) if filing_date < cutover => ValueUnit::Thousands,
            _ => ValueUnit::Dollars,
        }
    }

    pub fn multiplier(self) -> f64 {
        match self {
            ValueUnit::Dollars => 1.0,
            ValueUnit::Thousands => 1000.0,
        }
    }
}

/// Minimal element tree. Attributes are not needed for 13F tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    /// Qualified name as written, prefix included.
    pub name: String,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    fn named(name: String) -> Self {
        XmlElement { name, ..Default::default() }
    }

    /// Parses `xml` into an unnamed document node whose children are the top-level elements.
    pub fn parse_document(xml: &str) -> Result<XmlElement> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<XmlElement> = vec![XmlElement::default()];

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    stack.push(XmlElement::named(name));
                }
                Ok(Event::Empty(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(XmlElement::named(name));
                    }
                }
                Ok(Event::End(_)) => {
                    if stack.len() < 2 {
                        return Err(PipelineError::Xml("unbalanced closing tag".to_string()));
                    }
                    if let Some(done) = stack.pop() {
                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(done);
                        }
                    }
                }
                Ok(Event::Text(t)) => {
                    let text = t.unescape().map_err(|e| {
                        PipelineError::Xml(format!("at byte {}: {}", reader.buffer_position(), e))
                    })?;
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text);
                    }
                }
                Ok(Event::CData(c)) => {
                    let raw = c.into_inner();
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&String::from_utf8_lossy(&raw));
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(PipelineError::Xml(format!(
                        "at byte {}: {}",
                        reader.buffer_position(),
                        e
                    )))
                }
            }
        }

        if stack.len() != 1 {
            return Err(PipelineError::Xml("unexpected end of document".to_string()));
        }
        stack
            .pop()
            .ok_or_else(|| PipelineError::Xml("empty document".to_string()))
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    fn path(&self, path: &[&str]) -> Option<&XmlElement> {
        path.iter().try_fold(self, |node, name| node.child(name))
    }

    /// Field lookup tolerant of namespace prefixes: the bare name, then each
    /// known prefix, then any `prefix:name`.
    pub fn field(&self, name: &str) -> Option<&XmlElement> {
        self.child(name)
            .or_else(|| {
                KNOWN_PREFIXES
                    .iter()
                    .find_map(|prefix| self.child(&format!("{}:{}", prefix, name)))
            })
            .or_else(|| {
                let suffix = format!(":{}", name);
                self.children.iter().find(|c| c.name.ends_with(&suffix))
            })
    }

    pub fn field_text(&self, name: &str) -> Option<&str> {
        self.field(name)
            .map(|f| f.text.trim())
            .filter(|t| !t.is_empty())
    }

    /// All children whose name is `name` with or without a namespace prefix.
    pub fn fields<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| local_name(&c.name) == name)
    }

    /// First element in document order (outermost first) whose name satisfies `pred`.
    fn find_first(&self, pred: &dyn Fn(&str) -> bool) -> Option<&XmlElement> {
        for child in &self.children {
            if pred(&child.name) {
                return Some(child);
            }
        }
        self.children.iter().find_map(|c| c.find_first(pred))
    }
}

fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// One way of finding the information table inside a parsed document.
type TableLocator = fn(&XmlElement) -> Option<&XmlElement>;

fn locate_by_known_paths(doc: &XmlElement) -> Option<&XmlElement> {
    KNOWN_TABLE_PATHS.iter().find_map(|path| doc.path(path))
}

fn locate_by_name_scan(doc: &XmlElement) -> Option<&XmlElement> {
    let wanted = TABLE_NAME.to_ascii_lowercase();
    doc.find_first(&|name: &str| name.to_ascii_lowercase().contains(&wanted))
}

const TABLE_LOCATORS: &[(&str, TableLocator)] = &[
    ("known path", locate_by_known_paths),
    ("name scan", locate_by_name_scan),
];

pub fn locate_information_table(doc: &XmlElement) -> Option<&XmlElement> {
    TABLE_LOCATORS.iter().find_map(|(strategy, locate)| {
        let table = locate(doc);
        if table.is_some() {
            debug!(strategy, "located information table");
        }
        table
    })
}

/// Cheap check used while probing candidate documents.
pub fn looks_like_information_table(content: &str) -> bool {
    content.to_ascii_lowercase().contains("informationtable")
}

/// Parse a raw 13F information-table document into holdings.
///
/// Returns an empty list when the document cannot be read or holds no
/// table; callers treat that as a failed fetch. Individual malformed
/// entries are skipped with a warning.
pub fn parse_filing_document(raw_xml: &str, unit: ValueUnit) -> Vec<Holding> {
    let doc = match XmlElement::parse_document(raw_xml) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("could not parse filing document: {}", e);
            return Vec::new();
        }
    };

    let Some(table) = locate_information_table(&doc) else {
        warn!("no information table found in filing document");
        return Vec::new();
    };

    let mut holdings = Vec::new();
    let mut skipped = 0usize;

    for (i, entry) in table.fields(ENTRY_NAME).enumerate() {
        match parse_entry(entry, unit) {
            Ok(Some(holding)) => holdings.push(holding),
            Ok(None) => {}
            Err(reason) => {
                skipped += 1;
                warn!(entry = i, "skipping malformed 13F entry: {}", reason);
            }
        }
    }

    debug!(parsed = holdings.len(), skipped, "parsed information table");
    holdings
}

/// `Ok(None)` for entries that are well-formed but carry no position (zero value).
fn parse_entry(entry: &XmlElement, unit: ValueUnit) -> std::result::Result<Option<Holding>, String> {
    let cusip = entry
        .field_text("cusip")
        .ok_or_else(|| "missing cusip".to_string())?;

    let raw_value = entry
        .field_text("value")
        .ok_or_else(|| format!("missing value for {}", cusip))?;
    let value = parse_number(raw_value)
        .ok_or_else(|| format!("unparsable value '{}' for {}", raw_value, cusip))?
        * unit.multiplier();

    if value <= 0.0 {
        return Ok(None);
    }

    let amounts = entry.field("shrsOrPrnAmt");
    let shares = amounts
        .and_then(|a| a.field_text("sshPrnamt"))
        .and_then(parse_number)
        .unwrap_or(0.0);
    let share_type = amounts
        .and_then(|a| a.field_text("sshPrnamtType"))
        .unwrap_or(DEFAULT_SHARE_TYPE);

    Ok(Some(Holding {
        security_id: Holding::normalize_security_id(cusip),
        issuer_name: entry.field_text("nameOfIssuer").unwrap_or("").to_string(),
        title_of_class: entry
            .field_text("titleOfClass")
            .unwrap_or(DEFAULT_TITLE_OF_CLASS)
            .to_string(),
        value,
        shares,
        share_type: share_type.to_string(),
    }))
}

fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| *c != ',' && *c != '$').collect();
    cleaned.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<informationTable xmlns="http://www.sec.gov/edgar/document/thirteenf/informationtable">
  <infoTable>
    <nameOfIssuer>APPLE INC</nameOfIssuer>
    <titleOfClass>COM</titleOfClass>
    <cusip>037833100</cusip>
    <value>1000000000</value>
    <shrsOrPrnAmt>
      <sshPrnamt>4000000</sshPrnamt>
      <sshPrnamtType>SH</sshPrnamtType>
    </shrsOrPrnAmt>
    <investmentDiscretion>SOLE</investmentDiscretion>
  </infoTable>
  <infoTable>
    <nameOfIssuer>AT&amp;T INC</nameOfIssuer>
    <titleOfClass>COM</titleOfClass>
    <cusip>00206R102</cusip>
    <value>2,500,000</value>
    <shrsOrPrnAmt>
      <sshPrnamt>100,000</sshPrnamt>
      <sshPrnamtType>SH</sshPrnamtType>
    </shrsOrPrnAmt>
  </infoTable>
</informationTable>"#;

    const PREFIXED: &str = r#"<?xml version="1.0"?>
<ns1:informationTable xmlns:ns1="http://www.sec.gov/edgar/document/thirteenf/informationtable">
  <ns1:infoTable>
    <ns1:nameOfIssuer>MICROSOFT CORP</ns1:nameOfIssuer>
    <ns1:titleOfClass>COM</ns1:titleOfClass>
    <ns1:cusip>594918104</ns1:cusip>
    <ns1:value>750000</ns1:value>
    <ns1:shrsOrPrnAmt>
      <ns1:sshPrnamt>2000</ns1:sshPrnamt>
      <ns1:sshPrnamtType>SH</ns1:sshPrnamtType>
    </ns1:shrsOrPrnAmt>
  </ns1:infoTable>
</ns1:informationTable>"#;

    #[test]
    fn parses_plain_table() {
        let holdings = parse_filing_document(PLAIN, ValueUnit::Dollars);
        assert_eq!(holdings.len(), 2);
        assert_eq!(holdings[0].security_id, "037833100");
        assert_eq!(holdings[0].issuer_name, "APPLE INC");
        assert_eq!(holdings[0].value, 1_000_000_000.0);
        assert_eq!(holdings[0].shares, 4_000_000.0);
        assert_eq!(holdings[1].issuer_name, "AT&T INC");
        assert_eq!(holdings[1].value, 2_500_000.0);
        assert_eq!(holdings[1].shares, 100_000.0);
    }

    #[test]
    fn parses_prefixed_table() {
        let holdings = parse_filing_document(PREFIXED, ValueUnit::Dollars);
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].security_id, "594918104");
        assert_eq!(holdings[0].shares, 2000.0);
    }

    #[test]
    fn parses_table_nested_in_submission_wrapper() {
        let xml = r#"<edgarSubmission><headerData/><formData>
            <informationTable><infoTable>
              <nameOfIssuer>ZERO LEAD CORP</nameOfIssuer>
              <cusip>012345678</cusip>
              <value>500</value>
            </infoTable></informationTable>
        </formData></edgarSubmission>"#;
        let holdings = parse_filing_document(xml, ValueUnit::Dollars);
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].security_id, "012345678");
        assert_eq!(holdings[0].title_of_class, DEFAULT_TITLE_OF_CLASS);
        assert_eq!(holdings[0].share_type, DEFAULT_SHARE_TYPE);
        assert_eq!(holdings[0].shares, 0.0);
    }

    #[test]
    fn falls_back_to_name_scan_for_unknown_prefixes() {
        let xml = r#"<XML><xyz:InformationTable xmlns:xyz="urn:x">
              <xyz:infoTable>
                <xyz:nameOfIssuer>ODD PREFIX INC</xyz:nameOfIssuer>
                <xyz:cusip>12345678</xyz:cusip>
                <xyz:value>42</xyz:value>
                <xyz:shrsOrPrnAmt><xyz:sshPrnamt>7</xyz:sshPrnamt></xyz:shrsOrPrnAmt>
              </xyz:infoTable>
            </xyz:InformationTable></XML>"#;
        let holdings = parse_filing_document(xml, ValueUnit::Dollars);
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].security_id, "012345678");
        assert_eq!(holdings[0].issuer_name, "ODD PREFIX INC");
        assert_eq!(holdings[0].shares, 7.0);
    }

    #[test]
    fn skips_malformed_entries_and_zero_values() {
        let xml = r#"<informationTable>
            <infoTable><nameOfIssuer>NO CUSIP</nameOfIssuer><value>10</value></infoTable>
            <infoTable><cusip>111111111</cusip><value>n/a</value></infoTable>
            <infoTable><cusip>222222222</cusip><value>0</value></infoTable>
            <infoTable><cusip>333333333</cusip><value>15</value></infoTable>
        </informationTable>"#;
        let holdings = parse_filing_document(xml, ValueUnit::Dollars);
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].security_id, "333333333");
    }

    #[test]
    fn keeps_repeated_securities_as_separate_lines() {
        let xml = r#"<informationTable>
            <infoTable><cusip>037833100</cusip><value>10</value></infoTable>
            <infoTable><cusip>037833100</cusip><value>20</value></infoTable>
        </informationTable>"#;
        assert_eq!(parse_filing_document(xml, ValueUnit::Dollars).len(), 2);
    }

    #[test]
    fn thousands_unit_scales_values() {
        let holdings = parse_filing_document(PREFIXED, ValueUnit::Thousands);
        assert_eq!(holdings[0].value, 750_000_000.0);
    }

    #[test]
    fn unit_follows_filing_date() {
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
        assert_eq!(ValueUnit::for_filing_date(d(2022, 11, 14)), ValueUnit::Thousands);
        assert_eq!(ValueUnit::for_filing_date(d(2023, 1, 2)), ValueUnit::Thousands);
        assert_eq!(ValueUnit::for_filing_date(d(2023, 1, 3)), ValueUnit::Dollars);
        assert_eq!(ValueUnit::for_filing_date(d(2024, 8, 14)), ValueUnit::Dollars);
    }

    #[test]
    fn unreadable_documents_yield_nothing() {
        assert!(parse_filing_document("<html><body>Not found</body></html>", ValueUnit::Dollars).is_empty());
        assert!(parse_filing_document("<informationTable><infoTable>", ValueUnit::Dollars).is_empty());
        assert!(parse_filing_document("", ValueUnit::Dollars).is_empty());
    }

    #[test]
    fn marker_check_is_case_insensitive() {
        assert!(looks_like_information_table(PREFIXED));
        assert!(looks_like_information_table("<INFORMATIONTABLE/>"));
        assert!(!looks_like_information_table("<edgarSubmission/>"));
    }
}

//! Quarterly 13F holdings pipeline: fetch filings for a roster of funds,
//! aggregate their top positions, find each fund's most-purchased holding and
//! write the dashboard datasets.

pub mod config;
pub mod dataset;
pub mod edgar;
pub mod error;
pub mod investor;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod portfolio;
pub mod position_change;
pub mod stocks;

pub use error::{PipelineError, Result};

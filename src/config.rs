use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings for a build. Static lookup data lives in [`crate::investor::Catalog`].
#[derive(Debug, Clone)]
pub struct Config {
    pub sec: SecConfig,
    pub output_dir: PathBuf,
    pub enrich_command: String,
}

#[derive(Debug, Clone)]
pub struct SecConfig {
    /// Sent as `User-Agent` on every request; the SEC rejects anonymous clients.
    pub user_agent: String,
    pub submissions_url: String,
    pub archives_url: String,
    pub request_delay: Duration,
    pub fund_delay: Duration,
    pub filing_window_days: i64,
    pub http_timeout: Duration,
}

impl Default for SecConfig {
    fn default() -> Self {
        SecConfig {
            user_agent: "holdings-tracker research@example.com".to_string(),
            submissions_url: "https://data.sec.gov/submissions".to_string(),
            archives_url: "https://www.sec.gov/Archives/edgar/data".to_string(),
            request_delay: Duration::from_millis(150),
            fund_delay: Duration::from_millis(1000),
            filing_window_days: 75,
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sec: SecConfig::default(),
            output_dir: PathBuf::from("public/data"),
            enrich_command: "python3 scripts/fetchStockData.py".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Config {
            sec: SecConfig {
                user_agent: env::var("SEC_USER_AGENT").unwrap_or(defaults.sec.user_agent),
                submissions_url: env::var("SEC_SUBMISSIONS_URL")
                    .unwrap_or(defaults.sec.submissions_url),
                archives_url: env::var("SEC_ARCHIVES_URL").unwrap_or(defaults.sec.archives_url),
                request_delay: env_millis("SEC_REQUEST_DELAY_MS", defaults.sec.request_delay),
                fund_delay: env_millis("SEC_FUND_DELAY_MS", defaults.sec.fund_delay),
                filing_window_days: env::var("SEC_FILING_WINDOW_DAYS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.sec.filing_window_days),
                http_timeout: env::var("SEC_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.sec.http_timeout),
            },
            output_dir: env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            enrich_command: env::var("ENRICH_COMMAND").unwrap_or(defaults.enrich_command),
        }
    }
}

fn env_millis(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

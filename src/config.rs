use crate::errors::{FundHubError, Result};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "http://api.fund.eastmoney.com";
pub const DEFAULT_QUOTE_ENDPOINT: &str = "http://fundgz.1234567.com.cn";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
pub const DEFAULT_REFERER: &str = "http://fundf10.eastmoney.com/";
pub const DEFAULT_ACCEPT: &str = "application/json, text/javascript, */*; q=0.01";

/// 运行配置，构造抓取器、存储和调度器时显式传入
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: String,
    pub quote_endpoint: String,
    pub user_agent: String,
    pub referer: String,
    pub accept: String,
    pub request_delay: Duration,
    pub retry_limit: u32,
    pub backoff_base: Duration,
    pub timeout: Duration,
    pub page_size: usize,
    pub max_concurrency: usize,
    pub store_path: String,
    pub interval: Duration,
    pub history_days: i64,
}

impl Config {
    pub fn new() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            quote_endpoint: DEFAULT_QUOTE_ENDPOINT.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            referer: DEFAULT_REFERER.to_string(),
            accept: DEFAULT_ACCEPT.to_string(),
            request_delay: Duration::from_millis(500),
            retry_limit: 3,
            backoff_base: Duration::from_millis(500),
            timeout: Duration::from_secs(15),
            page_size: 10000,
            max_concurrency: 1,
            store_path: "data/fund_history.db".to_string(),
            interval: Duration::from_secs(300),
            history_days: 365,
        }
    }

    /// 从环境变量（以及当前目录下的 .env）加载配置
    ///
    /// 未设置的变量使用默认值；设置了但无法解析的变量返回 `ConfigError`。
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意键值来源加载配置，便于测试
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();

        if let Some(v) = lookup("FUNDHUB_ENDPOINT") {
            config = config.with_endpoint(&v);
        }
        if let Some(v) = lookup("FUNDHUB_QUOTE_ENDPOINT") {
            config = config.with_quote_endpoint(&v);
        }
        if let Some(v) = lookup("FUNDHUB_USER_AGENT") {
            config.user_agent = v;
        }
        if let Some(v) = lookup("FUNDHUB_REFERER") {
            config.referer = v;
        }
        if let Some(v) = lookup("FUNDHUB_STORE_PATH") {
            config.store_path = v;
        }
        if let Some(secs) = parse_var::<f64, _>(&lookup, "FUNDHUB_REQUEST_DELAY_SECS")? {
            config.request_delay = secs_to_duration("FUNDHUB_REQUEST_DELAY_SECS", secs)?;
        }
        if let Some(secs) = parse_var::<f64, _>(&lookup, "FUNDHUB_TIMEOUT_SECS")? {
            config.timeout = secs_to_duration("FUNDHUB_TIMEOUT_SECS", secs)?;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "FUNDHUB_INTERVAL_SECS")? {
            config.interval = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "FUNDHUB_BACKOFF_MS")? {
            config.backoff_base = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var(&lookup, "FUNDHUB_RETRY_LIMIT")? {
            config.retry_limit = n;
        }
        if let Some(n) = parse_var(&lookup, "FUNDHUB_PAGE_SIZE")? {
            config.page_size = n;
        }
        if let Some(n) = parse_var(&lookup, "FUNDHUB_MAX_CONCURRENCY")? {
            config.max_concurrency = n;
        }
        if let Some(n) = parse_var(&lookup, "FUNDHUB_HISTORY_DAYS")? {
            config.history_days = n;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(FundHubError::ConfigError("page size must be at least 1".to_string()));
        }
        if self.max_concurrency == 0 {
            return Err(FundHubError::ConfigError("max concurrency must be at least 1".to_string()));
        }
        if self.interval.is_zero() {
            return Err(FundHubError::ConfigError("monitor interval must be positive".to_string()));
        }
        if self.history_days <= 0 {
            return Err(FundHubError::ConfigError("history days must be positive".to_string()));
        }
        Ok(())
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    pub fn with_quote_endpoint(mut self, endpoint: &str) -> Self {
        self.quote_endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    pub fn with_store_path(mut self, path: &str) -> Self {
        self.store_path = path.to_string();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| FundHubError::ConfigError(format!("{} has invalid value '{}'", key, raw))),
        None => Ok(None),
    }
}

fn secs_to_duration(key: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(FundHubError::ConfigError(format!("{} must be a non-negative number", key)));
    }
    Ok(Duration::from_secs_f64(secs))
}

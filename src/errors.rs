use thiserror::Error;
use std::time::Duration;

#[derive(Error, Debug)]
pub enum FundHubError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// 超时、连接失败或非成功的 HTTP 状态，可以重试
    #[error("Network error: {0}")]
    NetworkError(String),

    /// 服务端限流（429/403），不能盲目重试
    #[error("Rate limited by remote (HTTP {status}){}", retry_after_suffix(.retry_after))]
    RateLimitedError {
        status: u16,
        retry_after: Option<Duration>,
    },

    /// 响应不符合预期结构，跳过该基金
    #[error("Parse error: {0}")]
    ParseError(String),

    /// 单条记录校验失败
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] rusqlite::Error),

    /// 存储不可用（连接锁损坏等）
    #[error("Storage unavailable: {0}")]
    StoreUnavailable(String),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Date parsing error: {0}")]
    DateError(#[from] chrono::ParseError),

    #[error("Config error: {0}")]
    ConfigError(String),
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {}s", d.as_secs()),
        None => String::new(),
    }
}

impl FundHubError {
    /// 是否属于可重试的瞬时网络错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, FundHubError::NetworkError(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FundHubError::RateLimitedError { .. })
    }

    /// 简短的错误类别，用于命令行状态输出
    pub fn kind(&self) -> &'static str {
        match self {
            FundHubError::IoError(_) => "io",
            FundHubError::NetworkError(_) => "network",
            FundHubError::RateLimitedError { .. } => "rate-limited",
            FundHubError::ParseError(_) => "parse",
            FundHubError::ValidationError(_) => "validation",
            FundHubError::StorageError(_) => "storage",
            FundHubError::StoreUnavailable(_) => "storage",
            FundHubError::CsvError(_) => "export",
            FundHubError::JsonError(_) => "parse",
            FundHubError::DateError(_) => "date",
            FundHubError::ConfigError(_) => "config",
        }
    }
}

// reqwest 错误统一归入网络错误
impl From<reqwest::Error> for FundHubError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FundHubError::NetworkError(format!("request timed out: {}", e))
        } else if e.is_connect() {
            FundHubError::NetworkError(format!("connection failed: {}", e))
        } else {
            FundHubError::NetworkError(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, FundHubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_is_not_retryable() {
        let err = FundHubError::RateLimitedError { status: 429, retry_after: None };
        assert!(err.is_rate_limited());
        assert!(!err.is_retryable());

        let err = FundHubError::NetworkError("connection refused".into());
        assert!(err.is_retryable());
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn rate_limit_message_mentions_retry_after() {
        let err = FundHubError::RateLimitedError {
            status: 429,
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(err.to_string(), "Rate limited by remote (HTTP 429), retry after 30s");
    }

    #[test]
    fn unavailable_store_is_a_storage_error() {
        let err = FundHubError::StoreUnavailable("lock poisoned".into());
        assert_eq!(err.kind(), "storage");
        assert!(!err.is_retryable());
    }
}

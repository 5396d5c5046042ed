//! 进程级配置，全部来自环境变量（先加载 .env），每一项都有默认值

use std::str::FromStr;
use std::time::Duration;

use crate::app_config::env::parse_or_default;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Mysql,
}

impl FromStr for StoreBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "mysql" => Ok(StoreBackend::Mysql),
            other => Err(AppError::Config(format!("未知存储后端: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppSettings {
    pub app_env: String,
    pub store_backend: StoreBackend,
    pub db_url: Option<String>,
    pub db_max_open_conns: u64,
    pub seed_file: Option<String>,

    pub n8n_base_url: String,
    pub n8n_api_key: Option<String>,
    pub n8n_timeout: Duration,
    pub callback_base_url: String,

    pub signal_source_url: String,
    pub signal_source_timeout: Duration,
    pub portfolio_service_url: String,
    pub portfolio_timeout: Duration,

    pub dispatch_max_attempts: u32,
    pub dispatch_batch_size: usize,
    pub reconcile_batch_size: usize,
    pub max_symbols_per_tick: usize,
    pub sent_timeout_secs: i64,

    pub log_retention_days: i64,
    pub report_utc_offset_secs: i32,
    pub default_utc_offset_secs: i32,

    pub webhook_bind: String,
    pub webhook_secret: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            app_env: "local".to_string(),
            store_backend: StoreBackend::Memory,
            db_url: None,
            db_max_open_conns: 10,
            seed_file: None,
            n8n_base_url: "http://localhost:5678/api/v1".to_string(),
            n8n_api_key: None,
            n8n_timeout: Duration::from_secs(30),
            callback_base_url: "http://localhost:8088".to_string(),
            signal_source_url: "http://localhost:8000".to_string(),
            signal_source_timeout: Duration::from_secs(15),
            portfolio_service_url: "http://localhost:8001".to_string(),
            portfolio_timeout: Duration::from_secs(30),
            dispatch_max_attempts: 3,
            dispatch_batch_size: 100,
            reconcile_batch_size: 100,
            max_symbols_per_tick: 5,
            sent_timeout_secs: 86_400,
            log_retention_days: 30,
            // Asia/Riyadh
            report_utc_offset_secs: 10_800,
            default_utc_offset_secs: 10_800,
            webhook_bind: "0.0.0.0:8088".to_string(),
            webhook_secret: None,
        }
    }
}

impl AppSettings {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let text = |key: &str, default: String| lookup(key).filter(|v| !v.trim().is_empty()).unwrap_or(default);
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secs = |key: &str, default: Duration| -> Result<Duration, AppError> {
            parse_or_default(key, lookup(key), default.as_secs()).map(Duration::from_secs)
        };

        let store_backend = match optional("STORE_BACKEND") {
            Some(v) => v.parse()?,
            None => d.store_backend,
        };
        let settings = Self {
            app_env: text("APP_ENV", d.app_env),
            store_backend,
            db_url: optional("DB_HOST"),
            db_max_open_conns: parse_or_default("DB_MAX_OPEN_CONNS", lookup("DB_MAX_OPEN_CONNS"), d.db_max_open_conns)?,
            seed_file: optional("SEED_FILE"),
            n8n_base_url: text("N8N_BASE_URL", d.n8n_base_url),
            n8n_api_key: optional("N8N_API_KEY"),
            n8n_timeout: secs("N8N_TIMEOUT_SECS", d.n8n_timeout)?,
            callback_base_url: text("CALLBACK_BASE_URL", d.callback_base_url),
            signal_source_url: text("SIGNAL_SOURCE_URL", d.signal_source_url),
            signal_source_timeout: secs("SIGNAL_SOURCE_TIMEOUT_SECS", d.signal_source_timeout)?,
            portfolio_service_url: text("PORTFOLIO_SERVICE_URL", d.portfolio_service_url),
            portfolio_timeout: secs("PORTFOLIO_TIMEOUT_SECS", d.portfolio_timeout)?,
            dispatch_max_attempts: parse_or_default(
                "DISPATCH_MAX_ATTEMPTS",
                lookup("DISPATCH_MAX_ATTEMPTS"),
                d.dispatch_max_attempts,
            )?,
            dispatch_batch_size: parse_or_default(
                "DISPATCH_BATCH_SIZE",
                lookup("DISPATCH_BATCH_SIZE"),
                d.dispatch_batch_size,
            )?,
            reconcile_batch_size: parse_or_default(
                "RECONCILE_BATCH_SIZE",
                lookup("RECONCILE_BATCH_SIZE"),
                d.reconcile_batch_size,
            )?,
            max_symbols_per_tick: parse_or_default(
                "MAX_SYMBOLS_PER_TICK",
                lookup("MAX_SYMBOLS_PER_TICK"),
                d.max_symbols_per_tick,
            )?,
            sent_timeout_secs: parse_or_default("SENT_TIMEOUT_SECS", lookup("SENT_TIMEOUT_SECS"), d.sent_timeout_secs)?,
            log_retention_days: parse_or_default(
                "LOG_RETENTION_DAYS",
                lookup("LOG_RETENTION_DAYS"),
                d.log_retention_days,
            )?,
            report_utc_offset_secs: parse_or_default(
                "REPORT_UTC_OFFSET_SECS",
                lookup("REPORT_UTC_OFFSET_SECS"),
                d.report_utc_offset_secs,
            )?,
            default_utc_offset_secs: parse_or_default(
                "DEFAULT_UTC_OFFSET_SECS",
                lookup("DEFAULT_UTC_OFFSET_SECS"),
                d.default_utc_offset_secs,
            )?,
            webhook_bind: text("WEBHOOK_BIND", d.webhook_bind),
            webhook_secret: optional("WEBHOOK_SECRET"),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.store_backend == StoreBackend::Mysql && self.db_url.is_none() {
            return Err(AppError::Config("STORE_BACKEND=mysql 需要配置 DB_HOST".to_string()));
        }
        if self.dispatch_max_attempts == 0 {
            return Err(AppError::Config("DISPATCH_MAX_ATTEMPTS 必须大于 0".to_string()));
        }
        if self.sent_timeout_secs <= 0 {
            return Err(AppError::Config("SENT_TIMEOUT_SECS 必须大于 0".to_string()));
        }
        if self.log_retention_days < 0 {
            return Err(AppError::Config("LOG_RETENTION_DAYS 不能为负数".to_string()));
        }
        for (key, offset) in [
            ("REPORT_UTC_OFFSET_SECS", self.report_utc_offset_secs),
            ("DEFAULT_UTC_OFFSET_SECS", self.default_utc_offset_secs),
        ] {
            if offset.abs() >= 86_400 {
                return Err(AppError::Config(format!("{} 超出范围: {}", key, offset)));
            }
        }
        Ok(())
    }

    pub fn is_local(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("local")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(vars: &[(&str, &str)]) -> Result<AppSettings, AppError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppSettings::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = from_map(&[]).unwrap();
        assert_eq!(s.store_backend, StoreBackend::Memory);
        assert_eq!(s.n8n_timeout, Duration::from_secs(30));
        assert_eq!(s.dispatch_max_attempts, 3);
        assert_eq!(s.report_utc_offset_secs, 10_800);
        assert!(s.is_local());
        assert!(s.n8n_api_key.is_none());
    }

    #[test]
    fn test_overrides() {
        let s = from_map(&[
            ("APP_ENV", "prod"),
            ("N8N_API_KEY", "k-1"),
            ("MAX_SYMBOLS_PER_TICK", "2"),
            ("SENT_TIMEOUT_SECS", "600"),
            ("DEFAULT_UTC_OFFSET_SECS", "-18000"),
        ])
        .unwrap();
        assert!(!s.is_local());
        assert_eq!(s.n8n_api_key.as_deref(), Some("k-1"));
        assert_eq!(s.max_symbols_per_tick, 2);
        assert_eq!(s.sent_timeout_secs, 600);
        assert_eq!(s.default_utc_offset_secs, -18_000);
    }

    #[test]
    fn test_mysql_requires_db_host() {
        assert!(matches!(from_map(&[("STORE_BACKEND", "mysql")]), Err(AppError::Config(_))));
        let s = from_map(&[("STORE_BACKEND", "MySQL"), ("DB_HOST", "mysql://u:p@localhost/t")]).unwrap();
        assert_eq!(s.store_backend, StoreBackend::Mysql);
    }

    #[test]
    fn test_invalid_values() {
        assert!(from_map(&[("STORE_BACKEND", "redis")]).is_err());
        assert!(from_map(&[("DISPATCH_MAX_ATTEMPTS", "0")]).is_err());
        assert!(from_map(&[("N8N_TIMEOUT_SECS", "soon")]).is_err());
    }
}

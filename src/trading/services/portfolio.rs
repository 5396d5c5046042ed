//! 组合估值刷新

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::info;

use crate::error::{AppError, ExternalError, ErrorClass};
use crate::trading::http::{build_client, send_json};
use crate::trading::model::LogCategory;
use crate::trading::services::audit_logger::AuditLogger;
use crate::trading::services::RunStats;
use crate::trading::store::Stores;

const SERVICE: &str = "portfolio";

#[async_trait]
pub trait PortfolioValuer: Send + Sync {
    async fn refresh_portfolio_value(&self, portfolio_id: i64) -> Result<(), ExternalError>;
}

/// `POST {base_url}/portfolios/{id}/refresh`
pub struct HttpPortfolioValuer {
    client: Client,
    base_url: String,
}

impl HttpPortfolioValuer {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PortfolioValuer for HttpPortfolioValuer {
    async fn refresh_portfolio_value(&self, portfolio_id: i64) -> Result<(), ExternalError> {
        let url = format!("{}/portfolios/{}/refresh", self.base_url, portfolio_id);
        let _: Value = send_json(SERVICE, self.client.post(&url)).await?;
        Ok(())
    }
}

/// 刷新所有 ACTIVE 策略关联的组合，每个组合只刷新一次
pub struct PortfolioRefresher {
    stores: Stores,
    audit: AuditLogger,
    valuer: std::sync::Arc<dyn PortfolioValuer>,
}

impl PortfolioRefresher {
    pub fn new(stores: Stores, audit: AuditLogger, valuer: std::sync::Arc<dyn PortfolioValuer>) -> Self {
        Self { stores, audit, valuer }
    }

    pub async fn run(&self) -> anyhow::Result<RunStats> {
        let strategies = self.stores.strategies.list_active().await?;
        let portfolio_ids: BTreeSet<i64> = strategies.iter().filter_map(|s| s.portfolio_id).collect();

        let mut stats = RunStats::default();
        for portfolio_id in portfolio_ids {
            match self.valuer.refresh_portfolio_value(portfolio_id).await {
                Ok(()) => stats.processed += 1,
                Err(e) => {
                    stats.errors += 1;
                    self.audit
                        .warn(
                            LogCategory::Portfolio,
                            None,
                            format!("portfolio {} refresh failed: {}", portfolio_id, e),
                            json!({
                                "portfolio_id": portfolio_id,
                                "error": e.message(),
                                "error_class": ErrorClass::from(&e).to_string(),
                            }),
                        )
                        .await;
                }
            }
        }
        info!(
            "组合估值刷新完成: updated={}, errors={}, at={}",
            stats.processed,
            stats.errors,
            Utc::now()
        );
        Ok(stats)
    }
}

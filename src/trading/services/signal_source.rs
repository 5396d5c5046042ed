//! 信号来源（技术分析服务）
//!
//! 对本服务而言是一个可能失败的黑盒：`get_signal(symbol)`。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AppError, ExternalError};
use crate::trading::http::{build_client, send_json};
use crate::trading::model::{Confidence, SignalType};

const SERVICE: &str = "signal_source";

/// 信号来源返回的结果
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSignal {
    pub signal_type: SignalType,
    pub confidence: Confidence,
    pub confidence_score: f64,
    pub target_price: Option<f64>,
    pub technical_indicators: Value,
}

#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn get_signal(&self, symbol: &str) -> Result<SourceSignal, ExternalError>;
}

/// 由分数推导置信度等级
pub fn confidence_from_score(score: f64) -> Confidence {
    if score >= 85.0 {
        Confidence::VeryHigh
    } else if score >= 70.0 {
        Confidence::High
    } else if score >= 50.0 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

/// 把分析服务的操作建议映射为信号类型与默认置信度
pub fn map_recommendation(recommendation: &str) -> Option<(SignalType, Confidence, f64)> {
    let normalised = recommendation.trim().to_uppercase().replace('_', " ");
    let mapped = match normalised.as_str() {
        "STRONG BUY" => (SignalType::Buy, Confidence::VeryHigh, 90.0),
        "BUY" => (SignalType::Buy, Confidence::High, 75.0),
        "HOLD" => (SignalType::Hold, Confidence::Medium, 50.0),
        "SELL" => (SignalType::Sell, Confidence::High, 75.0),
        "STRONG SELL" => (SignalType::Sell, Confidence::VeryHigh, 90.0),
        _ => return None,
    };
    Some(mapped)
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    symbol: &'a str,
    period: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    business_recommendation: Option<String>,
    #[serde(default)]
    signal_type: Option<String>,
    #[serde(default)]
    confidence: Option<String>,
    #[serde(default)]
    confidence_score: Option<f64>,
    #[serde(default)]
    current_price: Option<f64>,
    #[serde(default)]
    technical_indicators: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl AnalyzeResponse {
    fn into_signal(self, symbol: &str) -> Result<SourceSignal, ExternalError> {
        if let Some(err) = self.error.filter(|e| !e.is_empty()) {
            return Err(ExternalError::terminal(SERVICE, format!("{}: {}", symbol, err)));
        }

        let recommendation = self.business_recommendation.or(self.signal_type).unwrap_or_default();
        let (signal_type, default_confidence, default_score) = map_recommendation(&recommendation)
            .ok_or_else(|| ExternalError::terminal(SERVICE, format!("{}: 无法识别的操作建议 '{}'", symbol, recommendation)))?;

        let confidence_score = self.confidence_score.unwrap_or(default_score);
        let confidence = self
            .confidence
            .and_then(|c| c.parse::<Confidence>().ok())
            .unwrap_or_else(|| match self.confidence_score {
                Some(score) => confidence_from_score(score),
                None => default_confidence,
            });

        Ok(SourceSignal {
            signal_type,
            confidence,
            confidence_score,
            target_price: self.current_price,
            technical_indicators: self.technical_indicators.unwrap_or_else(|| json!({})),
        })
    }
}

/// `POST {base_url}/stock/analyze`
pub struct HttpSignalSource {
    client: Client,
    base_url: String,
    period: String,
}

impl HttpSignalSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            period: "1y".to_string(),
        })
    }
}

#[async_trait]
impl SignalSource for HttpSignalSource {
    async fn get_signal(&self, symbol: &str) -> Result<SourceSignal, ExternalError> {
        let url = format!("{}/stock/analyze", self.base_url);
        let body = serde_json::to_string(&AnalyzeRequest {
            symbol,
            period: &self.period,
        })
        .map_err(|e| ExternalError::terminal(SERVICE, e.to_string()))?;

        let request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .body(body);
        let response: AnalyzeResponse = send_json(SERVICE, request).await?;
        response.into_signal(symbol)
    }
}

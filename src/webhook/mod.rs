//! 外部工作流引擎的回调入口
//!
//! 回调只是提示，不是状态的权威来源：带 signal_id 时立即走一次对账（同样的 CAS 路径），
//! 其余情况只记录审计，轮询仍然负责最终一致。

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::trading::model::LogCategory;
use crate::trading::services::{AuditLogger, ReconcileOutcome, ReconciliationLoop};

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

type HmacSha256 = Hmac<Sha256>;

pub struct WebhookState {
    reconciler: Arc<ReconciliationLoop>,
    audit: AuditLogger,
    secret: Option<String>,
}

impl WebhookState {
    pub fn new(reconciler: Arc<ReconciliationLoop>, audit: AuditLogger, secret: Option<String>) -> Self {
        Self {
            reconciler,
            audit,
            secret,
        }
    }
}

pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/webhooks/n8n/", post(n8n_webhook))
        .route("/webhooks/n8n", post(n8n_webhook))
        .with_state(state)
}

pub async fn serve<F>(listener: TcpListener, state: Arc<WebhookState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("webhook 监听 {:?}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// 十六进制 HMAC-SHA256，大小写均可
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn signal_id_of(payload: &Value) -> Option<i64> {
    let raw = payload.get("signal_id").or_else(|| payload.pointer("/data/signal_id"))?;
    raw.as_i64().or_else(|| raw.as_str().and_then(|s| s.trim().parse().ok()))
}

async fn n8n_webhook(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    if let Some(secret) = state.secret.as_deref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !verify_signature(secret, &body, signature) {
            warn!("webhook 签名校验失败");
            state
                .audit
                .warn(
                    LogCategory::Webhook,
                    None,
                    "webhook signature rejected",
                    json!({ "has_signature": !signature.is_empty() }),
                )
                .await;
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"status": "error", "message": "invalid signature"})),
            );
        }
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!("webhook 请求体不是合法 JSON: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"status": "error", "message": "invalid JSON payload"})),
            );
        }
    };

    let signal_id = signal_id_of(&payload);
    state
        .audit
        .info(
            LogCategory::Webhook,
            None,
            "n8n webhook received",
            json!({ "signal_id": signal_id, "payload": payload }),
        )
        .await;

    if let Some(id) = signal_id {
        match state.reconciler.reconcile_signal(id, Utc::now()).await {
            Ok(ReconcileOutcome::Skipped) => info!("webhook 信号 {} 无需对账", id),
            Ok(outcome) => info!("webhook 触发对账: signal={}, outcome={:?}", id, outcome),
            Err(e) => {
                state
                    .audit
                    .warn(
                        LogCategory::Webhook,
                        None,
                        format!("webhook reconciliation of signal {} failed: {}", id, e),
                        json!({ "signal_id": id, "error": e.to_string() }),
                    )
                    .await
            }
        }
    }

    (
        StatusCode::OK,
        Json(json!({"status": "success", "message": "Webhook processed"})),
    )
}

//! 外部 HTTP 调用的公共部分：带超时的客户端与错误归类

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{truncate, AppError, ExternalError};

/// 构造带整体超时的客户端；每个外部调用都必须有上界
pub fn build_client(timeout: Duration) -> Result<Client, AppError> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .build()
        .map_err(|e| AppError::Config(format!("HTTP 客户端创建失败: {}", e)))
}

/// 发送请求并把响应体解析为 `T`
///
/// 非 2xx 按状态码归类，响应体无法解析视为终态错误。
pub async fn send_json<T: DeserializeOwned>(service: &'static str, request: RequestBuilder) -> Result<T, ExternalError> {
    let response = request
        .send()
        .await
        .map_err(|e| ExternalError::from_reqwest(service, e))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ExternalError::from_reqwest(service, e))?;
    debug!("{} response: status={}, body={}", service, status, truncate(&body, 512));

    if !status.is_success() {
        return Err(ExternalError::from_status(service, status, &body));
    }
    serde_json::from_str(&body)
        .map_err(|e| ExternalError::terminal(service, format!("响应解析失败: {}, body={}", e, truncate(&body, 256))))
}

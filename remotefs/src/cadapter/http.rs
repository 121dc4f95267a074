//! HTTP 传输：基于 reqwest 的 GET（可选 Range 头与 Bearer 凭证）。

use crate::cadapter::client::{Transport, TransportError, TransportRequest, TransportResponse};
use async_trait::async_trait;
use reqwest::header::RANGE;
use std::time::Duration;
use tracing::trace;

/// HTTP 传输配置
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// 单次请求（含读取响应体）的超时时间
    pub timeout: Duration,
    /// 建立连接的超时时间
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("remotefs/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent)
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_builder() {
        TransportError::InvalidRequest(e.to_string())
    } else {
        TransportError::Interrupted(e.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        // child names arrive already escaped as path segments
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| TransportError::InvalidRequest(format!("{}: {e}", request.url)))?;
        let mut builder = self.client.get(url);
        if let Some(range) = request.range {
            builder = builder.header(RANGE, range.header_value());
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }

        let resp = builder.send().await.map_err(map_reqwest_error)?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = resp.bytes().await.map_err(map_reqwest_error)?;
        trace!(url = %request.url, status, len = body.len(), "http get complete");
        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

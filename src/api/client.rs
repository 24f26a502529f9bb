//! reqwest client for the versioned backend API (bearer-token authenticated).

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use super::types::{
    Bucket, CreateSplitPlan, Deposit, ReorderBuckets, SplitExecutionResponse, SplitPlan,
    SplitPlanPreview,
};
use super::{ApiError, BucketApi, PlanApi};
use crate::config::ClientConfig;

/// HTTP client for the split backend
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: url::Url,
    token: Option<String>,
}

impl ApiClient {
    /// Build a client from config (base URL, token, timeout)
    pub fn new(cfg: &ClientConfig) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;

        // Keep a trailing slash so relative joins stay under the versioned path
        let mut base = cfg.api_base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url = url::Url::parse(&base)?;

        Ok(Self {
            http,
            base_url,
            token: cfg.access_token.clone().filter(|t| !t.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn url(&self, endpoint: &str) -> Result<url::Url, ApiError> {
        Ok(self.base_url.join(endpoint.trim_start_matches('/'))?)
    }

    fn builder(&self, method: Method, endpoint: &str) -> Result<RequestBuilder, ApiError> {
        let url = self.url(endpoint)?;
        tracing::debug!(method = %method, url = %url, "api request");

        let mut req = self.http.request(method, url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        Ok(req)
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        let req = self.builder(Method::GET, endpoint)?;
        Self::send(req, endpoint).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError> {
        let mut req = self.builder(Method::POST, endpoint)?;
        if let Some(body) = body {
            req = req.json(body);
        }
        Self::send(req, endpoint).await
    }

    async fn send<T: DeserializeOwned>(req: RequestBuilder, endpoint: &str) -> Result<T, ApiError> {
        let resp = req.send().await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let detail = error_detail(status, &body);
            tracing::warn!(endpoint, status = %status, detail = %detail, "api request failed");

            if status == StatusCode::NOT_FOUND {
                return Err(ApiError::NotFound(detail));
            }
            return Err(ApiError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(format!("{}: {}", endpoint, e)))
    }
}

/// Message for a failed response: the JSON `detail` field when present,
/// otherwise `HTTP <status>`.
fn error_detail(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("detail").cloned());

    match detail {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s,
        Some(serde_json::Value::Null) | None => format!("HTTP {}", status.as_u16()),
        Some(other) => other.to_string(),
    }
}

impl PlanApi for ApiClient {
    async fn pending_deposits(&self) -> Result<Vec<Deposit>, ApiError> {
        self.get("deposits/pending").await
    }

    async fn get_deposit(&self, deposit_id: &str) -> Result<Deposit, ApiError> {
        self.get(&format!("deposits/{}", deposit_id)).await
    }

    async fn preview_split_plan(&self, deposit_id: &str) -> Result<SplitPlanPreview, ApiError> {
        self.get(&format!("split-plans/preview/{}", deposit_id)).await
    }

    async fn create_split_plan(&self, body: &CreateSplitPlan) -> Result<SplitPlan, ApiError> {
        self.post("split-plans", Some(body)).await
    }

    async fn approve_split_plan(&self, plan_id: &str) -> Result<SplitPlan, ApiError> {
        self.post::<(), _>(&format!("split-plans/{}/approve", plan_id), None)
            .await
    }

    async fn split_plan_by_deposit(&self, deposit_id: &str) -> Result<SplitPlan, ApiError> {
        self.get(&format!("split-plans/by-deposit/{}", deposit_id))
            .await
    }

    async fn retry_split_plan(&self, plan_id: &str) -> Result<SplitExecutionResponse, ApiError> {
        self.post::<(), _>(&format!("split-plans/{}/retry", plan_id), None)
            .await
    }
}

impl BucketApi for ApiClient {
    async fn get_buckets(&self) -> Result<Vec<Bucket>, ApiError> {
        self.get("buckets").await
    }

    async fn reorder_buckets(&self, bucket_ids: &[String]) -> Result<Vec<Bucket>, ApiError> {
        self.post("buckets/reorder", Some(&ReorderBuckets { bucket_ids }))
            .await
    }
}

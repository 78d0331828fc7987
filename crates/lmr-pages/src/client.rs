use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use lmr_net::{with_deadline, ApiError, Deadlines, RateLimiter, RetryPolicy};
use lmr_schemas::{DatabaseInfo, Page, PropertyKind, PropertyValue};

use crate::wire;
use crate::PagesApi;

#[derive(Clone, Copy)]
enum Method {
    Get,
    Post,
    Patch,
}

/// Live HTTP adapter for the pages store. One shared `reqwest::Client`;
/// pacing and retries happen per call.
pub struct HttpPagesClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    limiter: RateLimiter,
    retry: RetryPolicy,
    deadlines: Deadlines,
}

impl HttpPagesClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        limiter: RateLimiter,
        retry: RetryPolicy,
        deadlines: Deadlines,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            limiter,
            retry,
            deadlines,
        }
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);

        self.retry
            .execute_with_retry(cancel, || {
                let http = self.http.clone();
                let url = url.clone();
                let token = self.token.clone();
                let body = body.clone();
                async move {
                    self.limiter
                        .execute(cancel, with_deadline(deadline, async move {
                            let builder = match method {
                                Method::Get => http.get(&url),
                                Method::Post => http.post(&url),
                                Method::Patch => http.patch(&url),
                            };
                            let mut req = builder.bearer_auth(&token);
                            if let Some(b) = &body {
                                req = req.json(b);
                            }
                            let resp = req.send().await.map_err(ApiError::from_reqwest)?;

                            let status = resp.status();
                            if !status.is_success() {
                                let message = resp.text().await.unwrap_or_default();
                                return Err(ApiError::Status {
                                    code: status.as_u16(),
                                    message,
                                });
                            }

                            resp.json::<T>().await.map_err(ApiError::from_reqwest)
                        }))
                        .await
                }
            })
            .await
    }
}

#[async_trait]
impl PagesApi for HttpPagesClient {
    async fn list_databases(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<DatabaseInfo>, ApiError> {
        let resp: wire::DatabasesResponse = self
            .call_json(
                Method::Get,
                "/v1/databases",
                None,
                self.deadlines.list_ops,
                cancel,
            )
            .await?;
        Ok(resp.databases.into_iter().map(|d| d.into_info()).collect())
    }

    async fn get_database(
        &self,
        db_ref: &str,
        cancel: &CancellationToken,
    ) -> Result<DatabaseInfo, ApiError> {
        let resp: wire::WireDatabase = self
            .call_json(
                Method::Get,
                &format!("/v1/databases/{db_ref}"),
                None,
                self.deadlines.list_ops,
                cancel,
            )
            .await?;
        Ok(resp.into_info())
    }

    async fn query_database(
        &self,
        db: &DatabaseInfo,
        cancel: &CancellationToken,
    ) -> Result<Vec<Page>, ApiError> {
        let path = format!("/v1/databases/{}/query", db.db_ref);
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let body = cursor
                .as_ref()
                .map(|c| json!({ "cursor": c }))
                .unwrap_or_else(|| json!({}));

            let page: wire::QueryResponse = self
                .call_json(
                    Method::Post,
                    &path,
                    Some(body),
                    self.deadlines.list_ops,
                    cancel,
                )
                .await?;

            for raw in page.pages {
                let decoded = raw.into_page(db);
                if !decoded.archived {
                    all.push(decoded);
                }
            }

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!(db_ref = %db.db_ref, count = all.len(), "queried database");
        Ok(all)
    }

    async fn create_page(
        &self,
        db_ref: &str,
        properties: &BTreeMap<String, PropertyValue>,
        cancel: &CancellationToken,
    ) -> Result<String, ApiError> {
        let body = json!({
            "parent_database_id": db_ref,
            "properties": wire::encode_properties(properties),
        });
        let resp: wire::CreatePageResponse = self
            .call_json(
                Method::Post,
                "/v1/pages",
                Some(body),
                self.deadlines.record_ops,
                cancel,
            )
            .await?;
        Ok(resp.id)
    }

    async fn update_page(
        &self,
        page_id: &str,
        properties: &BTreeMap<String, PropertyValue>,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        let body = json!({ "properties": wire::encode_properties(properties) });
        let _: Value = self
            .call_json(
                Method::Patch,
                &format!("/v1/pages/{page_id}"),
                Some(body),
                self.deadlines.record_ops,
                cancel,
            )
            .await?;
        Ok(())
    }

    async fn archive_page(
        &self,
        page_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        let body = json!({ "archived": true });
        let _: Value = self
            .call_json(
                Method::Patch,
                &format!("/v1/pages/{page_id}"),
                Some(body),
                self.deadlines.record_ops,
                cancel,
            )
            .await?;
        Ok(())
    }

    async fn add_property(
        &self,
        db_ref: &str,
        name: &str,
        kind: PropertyKind,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        let body = json!({
            "properties": { name: { "type": kind.as_str() } }
        });
        let _: Value = self
            .call_json(
                Method::Patch,
                &format!("/v1/databases/{db_ref}"),
                Some(body),
                self.deadlines.record_ops,
                cancel,
            )
            .await?;
        Ok(())
    }
}

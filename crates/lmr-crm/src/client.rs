use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lmr_net::{with_deadline, ApiError, Deadlines, RateLimiter, RetryPolicy};
use lmr_schemas::{CrmEntry, CrmField, CrmList, CrmOrganization, CrmPerson, StagedWrite};

use crate::wire;
use crate::{CrmApi, StatusFilter};

/// Live HTTP adapter for the CRM. One shared `reqwest::Client`; pacing and
/// retries happen per call.
pub struct HttpCrmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    limiter: RateLimiter,
    retry: RetryPolicy,
    deadlines: Deadlines,
}

impl HttpCrmClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        limiter: RateLimiter,
        retry: RetryPolicy,
        deadlines: Deadlines,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            limiter,
            retry,
            deadlines,
        }
    }

    /// One GET, paced + retried + deadline-bounded.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);

        self.retry
            .execute_with_retry(cancel, || {
                let http = self.http.clone();
                let url = url.clone();
                let api_key = self.api_key.clone();
                let query: Vec<(String, String)> = query
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect();
                async move {
                    self.limiter
                        .execute(cancel, with_deadline(deadline, async move {
                            let resp = http
                                .get(&url)
                                .query(&query)
                                .bearer_auth(&api_key)
                                .send()
                                .await
                                .map_err(ApiError::from_reqwest)?;

                            let status = resp.status();
                            if !status.is_success() {
                                let body = resp.text().await.unwrap_or_default();
                                return Err(ApiError::Status {
                                    code: status.as_u16(),
                                    message: body,
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
impl CrmApi for HttpCrmClient {
    async fn list_lists(&self, cancel: &CancellationToken) -> Result<Vec<CrmList>, ApiError> {
        let resp: wire::ListsResponse = self
            .get_json("/v1/lists", &[], self.deadlines.list_ops, cancel)
            .await?;
        Ok(resp.lists.into_iter().filter_map(|l| l.into_list()).collect())
    }

    async fn list_fields(
        &self,
        list_ref: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<CrmField>, ApiError> {
        let resp: wire::FieldsResponse = self
            .get_json(
                &format!("/v1/lists/{list_ref}/fields"),
                &[],
                self.deadlines.list_ops,
                cancel,
            )
            .await?;
        Ok(resp.fields.into_iter().filter_map(|f| f.into_field()).collect())
    }

    async fn list_entries(
        &self,
        list_ref: &str,
        filter: Option<&StatusFilter>,
        cancel: &CancellationToken,
    ) -> Result<Vec<CrmEntry>, ApiError> {
        let path = format!("/v1/lists/{list_ref}/entries");
        let mut all = Vec::new();
        let mut seen: HashSet<i64> = HashSet::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query: Vec<(&str, String)> = Vec::new();
            if let Some(c) = &cursor {
                query.push(("cursor", c.clone()));
            }

            let page: wire::EntriesResponse = self
                .get_json(&path, &query, self.deadlines.list_ops, cancel)
                .await?;

            for raw in page.entries {
                let Some(entry) = raw.into_entry() else {
                    warn!(list_ref, "dropping entry with unrecognized shape");
                    continue;
                };
                // The CRM occasionally repeats an entry across page
                // boundaries; do not let that leak upward.
                if !seen.insert(entry.entry_id) {
                    continue;
                }
                if let Some(f) = filter {
                    if !f.accepts(&entry) {
                        continue;
                    }
                }
                all.push(entry);
            }

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!(list_ref, count = all.len(), "listed entries");
        Ok(all)
    }

    async fn get_organization(
        &self,
        id: i64,
        cancel: &CancellationToken,
    ) -> Result<CrmOrganization, ApiError> {
        let org: wire::WireOrganization = self
            .get_json(
                &format!("/v1/organizations/{id}"),
                &[],
                self.deadlines.record_ops,
                cancel,
            )
            .await?;
        Ok(CrmOrganization {
            id: org.id,
            name: org.name,
            domain: org.domain,
        })
    }

    async fn get_person(
        &self,
        id: i64,
        cancel: &CancellationToken,
    ) -> Result<CrmPerson, ApiError> {
        let person: wire::WirePerson = self
            .get_json(
                &format!("/v1/persons/{id}"),
                &[],
                self.deadlines.record_ops,
                cancel,
            )
            .await?;
        Ok(CrmPerson {
            id: person.id,
            name: person.name,
            emails: person.emails,
        })
    }

    async fn update_entry_fields(
        &self,
        entry_id: i64,
        writes: &[StagedWrite],
        _cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        // Journal the intent so the run details carry a replayable record,
        // then report the capability gap. Never a delete, never a create.
        for w in writes {
            info!(
                entry_id,
                field_id = w.field_id,
                field = %w.field_name,
                value = %w.value,
                "staged CRM field write (writes unsupported in this generation)"
            );
        }
        Err(ApiError::WriteUnsupported)
    }
}

//! # HTTP Remote Client
//!
//! [`RemoteClient`] over a PostgREST-style REST API.
//!
//! ## Request Shapes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  fetch    GET   /rest/v1/{table}?store_id=eq.S                         │
//! │                                 &updated_at=gt.T   (when since known)  │
//! │                                 &order=updated_at.asc,id.asc           │
//! │                                 &limit=N&offset=K  (until short page)  │
//! │                                                                         │
//! │  upsert   POST  /rest/v1/{table}                                       │
//! │           Prefer: resolution=merge-duplicates,return=representation    │
//! │           body: [ { ...row, store_id: S } ]                            │
//! │                                                                         │
//! │  delete   PATCH /rest/v1/{table}?id=eq.R&store_id=eq.S                 │
//! │           body: { is_deleted: true, updated_at: now }                  │
//! │                                                                         │
//! │  identity GET   /rest/v1/stores?select=id&limit=1                      │
//! │  probe    GET   /rest/v1/                                              │
//! │                                                                         │
//! │  Every request: apikey: K · Authorization: Bearer K                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Request, Response};
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use tally_core::schema::{id_string, REMOTE_ID, REMOTE_STORE_ID, REMOTE_UPDATED_AT};
use tally_core::{RemotePayload, TableKind};

use crate::config::RemoteSettings;
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteClient;

const REST_PREFIX: &str = "rest/v1/";
const STORES_TABLE: &str = "stores";
const UPSERT_PREFER: &str = "resolution=merge-duplicates,return=representation";

/// Reqwest-backed remote client.
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    client: Client,
    /// `{base_url}/rest/v1/`, always with a trailing slash.
    rest_url: Url,
    page_size: usize,
}

impl HttpRemoteClient {
    /// Builds a client from the `[remote]` config section.
    ///
    /// ## Errors
    /// - `InvalidConfig` when no base URL is configured
    /// - `InvalidUrl` when it doesn't parse
    pub fn new(settings: &RemoteSettings) -> SyncResult<Self> {
        let raw = settings
            .base_url
            .as_deref()
            .ok_or_else(|| SyncError::InvalidConfig("remote.base_url is not set".into()))?;

        let mut base = Url::parse(raw)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let rest_url = base.join(REST_PREFIX)?;

        let mut headers = HeaderMap::new();
        if let Some(key) = settings.api_key.as_deref() {
            let apikey = HeaderValue::from_str(key)
                .map_err(|e| SyncError::InvalidConfig(format!("api_key: {e}")))?;
            let bearer = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| SyncError::InvalidConfig(format!("api_key: {e}")))?;
            headers.insert("apikey", apikey);
            headers.insert(AUTHORIZATION, bearer);
        } else {
            warn!("No remote API key configured; requests will be anonymous");
        }

        let client = Client::builder()
            .timeout(settings.request_timeout())
            .default_headers(headers)
            .build()?;

        Ok(HttpRemoteClient {
            client,
            rest_url,
            page_size: settings.page_size.max(1),
        })
    }

    fn table_url(&self, table: &str) -> SyncResult<Url> {
        Ok(self.rest_url.join(table)?)
    }

    // =========================================================================
    // Request Builders
    // =========================================================================

    fn fetch_request(
        &self,
        store_id: &str,
        table: TableKind,
        since: Option<DateTime<Utc>>,
        offset: usize,
    ) -> SyncResult<Request> {
        let mut url = self.table_url(table.remote_table())?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair(REMOTE_STORE_ID, &format!("eq.{store_id}"));
            if let Some(since) = since {
                query.append_pair(
                    REMOTE_UPDATED_AT,
                    &format!("gt.{}", since.to_rfc3339_opts(SecondsFormat::Micros, true)),
                );
            }
            query.append_pair("order", "updated_at.asc,id.asc");
            query.append_pair("limit", &self.page_size.to_string());
            query.append_pair("offset", &offset.to_string());
        }

        Ok(self.client.get(url).build()?)
    }

    fn upsert_request(
        &self,
        store_id: &str,
        table: TableKind,
        mut row: RemotePayload,
    ) -> SyncResult<Request> {
        row.insert(REMOTE_STORE_ID.to_string(), Value::String(store_id.to_string()));
        let url = self.table_url(table.remote_table())?;

        Ok(self
            .client
            .post(url)
            .header("Prefer", UPSERT_PREFER)
            .json(&[row])
            .build()?)
    }

    fn soft_delete_request(
        &self,
        store_id: &str,
        table: TableKind,
        remote_id: &str,
    ) -> SyncResult<Request> {
        let mut url = self.table_url(table.remote_table())?;
        url.query_pairs_mut()
            .append_pair(REMOTE_ID, &format!("eq.{remote_id}"))
            .append_pair(REMOTE_STORE_ID, &format!("eq.{store_id}"));

        let body = json!({
            "is_deleted": true,
            "updated_at": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        });

        Ok(self
            .client
            .request(Method::PATCH, url)
            .header("Prefer", "return=minimal")
            .json(&body)
            .build()?)
    }

    fn identity_request(&self) -> SyncResult<Request> {
        let mut url = self.table_url(STORES_TABLE)?;
        url.query_pairs_mut()
            .append_pair("select", "id")
            .append_pair("limit", "1");
        Ok(self.client.get(url).build()?)
    }

    // =========================================================================
    // Execution
    // =========================================================================

    async fn execute(&self, request: Request) -> SyncResult<Response> {
        let method = request.method().clone();
        let path = request.url().path().to_string();

        let response = self.client.execute(request).await?;
        let status = response.status();
        debug!(%method, %path, status = status.as_u16(), "Remote request finished");

        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown").to_string());
        Err(SyncError::RemoteRejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn execute_rows(&self, request: Request) -> SyncResult<Vec<RemotePayload>> {
        let response = self.execute(request).await?;
        let rows: Vec<RemotePayload> = response
            .json()
            .await
            .map_err(|e| SyncError::InvalidResponse(e.to_string()))?;
        Ok(rows)
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn resolve_store_identity(&self) -> SyncResult<String> {
        let rows = self.execute_rows(self.identity_request()?).await?;

        rows.first()
            .and_then(|row| id_string(row.get(REMOTE_ID)))
            .ok_or_else(|| SyncError::InvalidResponse("no store visible to this API key".into()))
    }

    async fn fetch_changed_since(
        &self,
        store_id: &str,
        table: TableKind,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<RemotePayload>> {
        let mut rows = Vec::new();
        loop {
            let page = self
                .execute_rows(self.fetch_request(store_id, table, since, rows.len())?)
                .await?;
            let short = page.len() < self.page_size;
            rows.extend(page);
            if short {
                break;
            }
            debug!(table = %table, fetched = rows.len(), "Fetching next page");
        }
        Ok(rows)
    }

    async fn upsert(
        &self,
        store_id: &str,
        table: TableKind,
        row: RemotePayload,
    ) -> SyncResult<RemotePayload> {
        let rows = self
            .execute_rows(self.upsert_request(store_id, table, row)?)
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| SyncError::InvalidResponse(format!("empty upsert response for {table}")))
    }

    async fn soft_delete(
        &self,
        store_id: &str,
        table: TableKind,
        remote_id: &str,
    ) -> SyncResult<()> {
        self.execute(self.soft_delete_request(store_id, table, remote_id)?)
            .await?;
        Ok(())
    }

    /// Any answer below 500 counts as reachable, including auth failures.
    async fn probe(&self) -> bool {
        match self.client.get(self.rest_url.clone()).send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                debug!(error = %e, "Remote probe failed");
                false
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn client() -> HttpRemoteClient {
        let settings = RemoteSettings {
            base_url: Some("https://example.supabase.co".into()),
            api_key: Some("secret".into()),
            ..Default::default()
        };
        HttpRemoteClient::new(&settings).unwrap()
    }

    fn query(request: &Request) -> Vec<(String, String)> {
        request
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn test_requires_base_url() {
        let err = HttpRemoteClient::new(&RemoteSettings::default()).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_base_path_is_preserved() {
        let settings = RemoteSettings {
            base_url: Some("http://localhost:8000/api".into()),
            ..Default::default()
        };
        let client = HttpRemoteClient::new(&settings).unwrap();
        assert_eq!(client.rest_url.as_str(), "http://localhost:8000/api/rest/v1/");
    }

    #[test]
    fn test_fetch_request_shape() {
        let since = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let request = client()
            .fetch_request("store-1", TableKind::Display, Some(since), 0)
            .unwrap();

        assert_eq!(*request.method(), Method::GET);
        assert_eq!(request.url().path(), "/rest/v1/display_batches");
        let pairs = query(&request);
        assert!(pairs.contains(&("store_id".into(), "eq.store-1".into())));
        assert!(pairs.contains(&("updated_at".into(), "gt.2024-01-02T03:04:05.000000Z".into())));
        assert!(pairs.contains(&("order".into(), "updated_at.asc,id.asc".into())));
        assert!(pairs.contains(&("limit".into(), "1000".into())));
        assert!(pairs.contains(&("offset".into(), "0".into())));
    }

    #[test]
    fn test_fetch_pages_by_offset() {
        let settings = RemoteSettings {
            base_url: Some("https://example.supabase.co".into()),
            page_size: 50,
            ..Default::default()
        };
        let client = HttpRemoteClient::new(&settings).unwrap();
        let request = client
            .fetch_request("store-1", TableKind::Products, None, 100)
            .unwrap();

        let pairs = query(&request);
        assert!(pairs.contains(&("limit".into(), "50".into())));
        assert!(pairs.contains(&("offset".into(), "100".into())));
    }

    #[test]
    fn test_full_fetch_has_no_since_filter() {
        let request = client()
            .fetch_request("store-1", TableKind::Products, None, 0)
            .unwrap();
        assert!(!query(&request).iter().any(|(k, _)| k == "updated_at"));
    }

    #[test]
    fn test_upsert_request_shape() {
        let mut row = RemotePayload::new();
        row.insert("local_id".into(), json!("7"));
        let request = client()
            .upsert_request("store-1", TableKind::Products, row)
            .unwrap();

        assert_eq!(*request.method(), Method::POST);
        assert_eq!(request.headers()["Prefer"], UPSERT_PREFER);
        assert_eq!(request.headers()["apikey"], "secret");
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer secret");

        let body: Value = serde_json::from_slice(request.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(body[0]["store_id"], "store-1");
        assert_eq!(body[0]["local_id"], "7");
    }

    #[test]
    fn test_soft_delete_request_shape() {
        let request = client()
            .soft_delete_request("store-1", TableKind::Inventory, "r-9")
            .unwrap();

        assert_eq!(*request.method(), Method::PATCH);
        assert_eq!(request.url().path(), "/rest/v1/inventory");
        assert!(query(&request).contains(&("id".into(), "eq.r-9".into())));

        let body: Value = serde_json::from_slice(request.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(body["is_deleted"], true);
    }

    #[test]
    fn test_identity_request_shape() {
        let request = client().identity_request().unwrap();
        assert_eq!(request.url().path(), "/rest/v1/stores");
        assert!(query(&request).contains(&("limit".into(), "1".into())));
    }
}

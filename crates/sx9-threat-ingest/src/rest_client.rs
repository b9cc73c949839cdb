//! Thin wrapper over a PostgREST-compatible HTTPS endpoint.
//!
//! Generalizes the ad-hoc `execute`/`insert`/`update` free functions in
//! `sx9-cdn-data-fabric::adapters::supabase` into a reusable table client
//! that every adapter shares, budgeting each call through an injected
//! [`Budget`].

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::budget::{Budget, BudgetOutcome};
use crate::error::{IngestError, Result};

pub const USER_AGENT: &str = "Vigil-ThreatIntel/1.0";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Conflict-resolution strategy for [`StoreClient::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    MergeDuplicates,
    IgnoreDuplicates,
}

impl Resolution {
    fn as_prefer_value(self) -> &'static str {
        match self {
            Resolution::MergeDuplicates => "merge-duplicates",
            Resolution::IgnoreDuplicates => "ignore-duplicates",
        }
    }
}

/// Options accepted by [`StoreClient::upsert`].
#[derive(Debug, Clone)]
pub struct UpsertOptions {
    pub on_conflict: String,
    pub resolution: Resolution,
}

impl UpsertOptions {
    pub fn on_conflict(column: impl Into<String>) -> Self {
        Self {
            on_conflict: column.into(),
            resolution: Resolution::MergeDuplicates,
        }
    }

    pub fn ignore_duplicates(mut self) -> Self {
        self.resolution = Resolution::IgnoreDuplicates;
        self
    }
}

/// A table-oriented client over a PostgREST base URL, shared between the
/// dispatcher and every adapter. Stateless and cheap to clone — the inner
/// `reqwest::Client` pools connections.
#[derive(Clone)]
pub struct StoreClient {
    client: Client,
    base_url: String,
    service_key: String,
    budget: Arc<Budget>,
}

impl StoreClient {
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>, budget: Arc<Budget>) -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
            budget,
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn take_one(&self) -> Result<()> {
        match self.budget.take(1) {
            BudgetOutcome::Ok => Ok(()),
            BudgetOutcome::Exhausted => Err(IngestError::BudgetExhausted),
        }
    }

    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("Content-Type", "application/json")
    }

    async fn error_for_status(response: reqwest::Response, source_name: Option<&str>) -> IngestError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        match source_name {
            Some(source_name) => IngestError::Source {
                source_name: source_name.to_string(),
                status,
                body,
            },
            None => IngestError::Store { status, body },
        }
    }

    /// `GET` with a `select=` projection. One subrequest.
    pub async fn select(&self, table: &str, columns: &str) -> Result<Vec<Value>> {
        self.take_one()?;
        let url = format!("{}?select={}", self.table_url(table), columns);
        let response = self.auth(self.client.get(&url)).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_for_status(response, None).await);
        }
        Ok(response.json::<Vec<Value>>().await?)
    }

    /// `GET` with an arbitrary raw PostgREST query string appended as-is
    /// (e.g. `"select=id,name&status=eq.active"`).
    pub async fn select_raw(&self, table: &str, query: &str) -> Result<Vec<Value>> {
        self.take_one()?;
        let url = format!("{}?{}", self.table_url(table), query);
        let response = self.auth(self.client.get(&url)).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_for_status(response, None).await);
        }
        Ok(response.json::<Vec<Value>>().await?)
    }

    /// `POST` with `Prefer: return=minimal`. `records` is always encoded
    /// as a JSON array, one subrequest regardless of batch size.
    pub async fn insert<T: Serialize>(&self, table: &str, records: &[T]) -> Result<()> {
        self.take_one()?;
        let url = self.table_url(table);
        let response = self
            .auth(self.client.post(&url))
            .header("Prefer", "return=minimal")
            .json(records)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_for_status(response, None).await);
        }
        Ok(())
    }

    /// `POST` with `on_conflict=` and `Prefer: resolution=...,return=minimal`.
    pub async fn upsert<T: Serialize>(
        &self,
        table: &str,
        records: &[T],
        options: UpsertOptions,
    ) -> Result<()> {
        self.take_one()?;
        let url = format!("{}?on_conflict={}", self.table_url(table), options.on_conflict);
        let prefer = format!("resolution={},return=minimal", options.resolution.as_prefer_value());
        let response = self
            .auth(self.client.post(&url))
            .header("Prefer", prefer)
            .json(records)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_for_status(response, None).await);
        }
        Ok(())
    }

    /// `POST` to `rpc/<name>`. Returns the decoded body, if any.
    pub async fn rpc(&self, name: &str, params: &Value) -> Result<Option<Value>> {
        self.take_one()?;
        let url = format!("{}/rest/v1/rpc/{}", self.base_url, name);
        let response = self.auth(self.client.post(&url)).json(params).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_for_status(response, None).await);
        }
        let body = response.text().await.unwrap_or_default();
        if body.is_empty() {
            Ok(None)
        } else {
            Ok(serde_json::from_str(&body).ok())
        }
    }

    /// Begin a chained `PATCH` filtered update. Nothing is sent until
    /// [`UpdateBuilder::execute`] is called explicitly — this never
    /// implements `IntoFuture`.
    pub fn update<T: Serialize>(&self, table: &str, record: T) -> UpdateBuilder<'_, T> {
        UpdateBuilder {
            client: self,
            table: table.to_string(),
            record,
            filters: Vec::new(),
        }
    }
}

/// Chainable filtered-update builder returned by [`StoreClient::update`].
pub struct UpdateBuilder<'a, T: Serialize> {
    client: &'a StoreClient,
    table: String,
    record: T,
    filters: Vec<String>,
}

impl<'a, T: Serialize> UpdateBuilder<'a, T> {
    pub fn eq(mut self, column: &str, value: &str) -> Self {
        self.filters.push(format!("{column}=eq.{value}"));
        self
    }

    pub fn in_(mut self, column: &str, values: &[&str]) -> Self {
        self.filters.push(format!("{column}=in.({})", values.join(",")));
        self
    }

    /// Issue the `PATCH`. One subrequest.
    pub async fn execute(self) -> Result<()> {
        self.client.take_one()?;
        let filter = self.filters.join("&");
        let url = format!("{}?{}", self.client.table_url(&self.table), filter);
        let response = self
            .client
            .auth(self.client.client.patch(&url))
            .header("Prefer", "return=minimal")
            .json(&self.record)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreClient::error_for_status(response, None).await);
        }
        Ok(())
    }
}

/// True if `err` reflects a destination table/relation that does not
/// exist, per the `42P01` / `"does not exist"` body convention.
pub fn is_missing_table(err: &IngestError) -> bool {
    err.is_missing_table()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn budget() -> Arc<Budget> {
        Arc::new(Budget::new(10))
    }

    #[tokio::test]
    async fn select_sends_apikey_and_bearer_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/threat_actors"))
            .and(header("apikey", "svc-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"name": "FIN7"}])))
            .mount(&server)
            .await;

        let client = StoreClient::new(server.uri(), "svc-key", budget());
        let rows = client.select("threat_actors", "name").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "FIN7");
    }

    #[tokio::test]
    async fn non_2xx_surfaces_store_error_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/campaigns"))
            .respond_with(ResponseTemplate::new(404).set_body_string(
                "{\"code\":\"42P01\",\"message\":\"relation \\\"campaigns\\\" does not exist\"}",
            ))
            .mount(&server)
            .await;

        let client = StoreClient::new(server.uri(), "svc-key", budget());
        let err = client.select("campaigns", "*").await.unwrap_err();
        assert!(is_missing_table(&err));
    }

    #[tokio::test]
    async fn upsert_sets_on_conflict_and_prefer_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/iocs"))
            .and(header("Prefer", "resolution=merge-duplicates,return=minimal"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let client = StoreClient::new(server.uri(), "svc-key", budget());
        let records = vec![json!({"type": "ip", "value": "1.2.3.4"})];
        client
            .upsert("iocs", &records, UpsertOptions::on_conflict("type,value"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn budget_exhaustion_short_circuits_before_any_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(0)
            .mount(&server)
            .await;

        let empty_budget = Arc::new(Budget::new(0));
        let client = StoreClient::new(server.uri(), "svc-key", empty_budget);
        let err = client.select("iocs", "*").await.unwrap_err();
        assert!(matches!(err, IngestError::BudgetExhausted));
    }

    #[tokio::test]
    async fn update_builder_combines_filters_with_and() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/vulnerabilities"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = StoreClient::new(server.uri(), "svc-key", budget());
        client
            .update("vulnerabilities", json!({"epss_score": 0.5}))
            .eq("cve_id", "CVE-2024-0001")
            .execute()
            .await
            .unwrap();
    }
}

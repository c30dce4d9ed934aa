use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{DomainError, ServiceError, ServiceResult, ValidationError};
use crate::types::EntityTable;

/// A record as the remote API represents it: the server identifier plus the
/// entity's domain fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

impl RemoteRecord {
    pub fn str_field(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn require_str(&self, name: &str) -> Result<String, DomainError> {
        self.str_field(name)
            .ok_or_else(|| DomainError::Validation(ValidationError::required(name)))
    }

    pub fn i64_field(&self, name: &str) -> Option<i64> {
        self.fields.get(name).and_then(Value::as_i64)
    }

    pub fn f64_field(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(Value::as_f64)
    }

    pub fn bool_field(&self, name: &str) -> Option<bool> {
        self.fields.get(name).and_then(Value::as_bool)
    }
}

/// Remote API contract, one resource per entity table.
///
/// The engine never relies on the server for identifier ordering guarantees
/// beyond single-request atomicity.
#[async_trait]
pub trait RemoteDataService: Send + Sync {
    /// Create a record; the response carries the server-assigned identifier.
    async fn create_record(
        &self,
        table: EntityTable,
        payload: &Value,
    ) -> ServiceResult<RemoteRecord>;

    /// Partially update an existing record.
    async fn update_record(
        &self,
        table: EntityTable,
        server_id: &str,
        payload: &Value,
    ) -> ServiceResult<RemoteRecord>;

    /// Delete a record. Returns once the server acknowledges.
    async fn delete_record(&self, table: EntityTable, server_id: &str) -> ServiceResult<()>;

    /// All records owned by a user; used to hydrate the local store.
    async fn list_records(
        &self,
        table: EntityTable,
        user_id: &str,
    ) -> ServiceResult<Vec<RemoteRecord>>;
}

/// Implementation of RemoteDataService that talks to the backend API.
pub struct ApiRemoteDataService {
    client: Client,
    base_url: String,
    api_token: String,
}

impl ApiRemoteDataService {
    pub fn new(base_url: &str, api_token: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.to_string(),
            api_token: api_token.to_string(),
        }
    }

    /// Get the authorization header
    fn auth_header(&self) -> String {
        format!("Bearer {}", self.api_token)
    }

    fn url(&self, table: EntityTable) -> String {
        format!("{}/api/{}", self.base_url, table.api_path())
    }

    async fn parse_record(response: reqwest::Response) -> ServiceResult<RemoteRecord> {
        if response.status().is_success() {
            response.json::<RemoteRecord>().await.map_err(|e| {
                ServiceError::ExternalService(format!("Failed to parse response: {}", e))
            })
        } else {
            Err(Self::status_error(response).await)
        }
    }

    async fn status_error(response: reqwest::Response) -> ServiceError {
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to get error details".to_string());

        ServiceError::ExternalService(format!("Server returned error {}: {}", status, error_text))
    }
}

#[async_trait]
impl RemoteDataService for ApiRemoteDataService {
    async fn create_record(
        &self,
        table: EntityTable,
        payload: &Value,
    ) -> ServiceResult<RemoteRecord> {
        debug!("Creating {} record remotely", table.as_str());

        let response = self
            .client
            .post(self.url(table))
            .header("Authorization", self.auth_header())
            .json(payload)
            .send()
            .await
            .map_err(|e| ServiceError::Network(format!("Failed to create record: {}", e)))?;

        Self::parse_record(response).await
    }

    async fn update_record(
        &self,
        table: EntityTable,
        server_id: &str,
        payload: &Value,
    ) -> ServiceResult<RemoteRecord> {
        debug!("Updating {} {} remotely", table.as_str(), server_id);

        let url = format!("{}/{}", self.url(table), server_id);
        let response = self
            .client
            .patch(url)
            .header("Authorization", self.auth_header())
            .json(payload)
            .send()
            .await
            .map_err(|e| ServiceError::Network(format!("Failed to update record: {}", e)))?;

        Self::parse_record(response).await
    }

    async fn delete_record(&self, table: EntityTable, server_id: &str) -> ServiceResult<()> {
        debug!("Deleting {} {} remotely", table.as_str(), server_id);

        let url = format!("{}/{}", self.url(table), server_id);
        let response = self
            .client
            .delete(url)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| ServiceError::Network(format!("Failed to delete record: {}", e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::status_error(response).await)
        }
    }

    async fn list_records(
        &self,
        table: EntityTable,
        user_id: &str,
    ) -> ServiceResult<Vec<RemoteRecord>> {
        debug!("Listing {} records for {}", table.as_str(), user_id);

        let url = format!("{}?user_id={}", self.url(table), user_id);
        let response = self
            .client
            .get(url)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| ServiceError::Network(format!("Failed to list records: {}", e)))?;

        if response.status().is_success() {
            response.json::<Vec<RemoteRecord>>().await.map_err(|e| {
                ServiceError::ExternalService(format!("Failed to parse list response: {}", e))
            })
        } else {
            Err(Self::status_error(response).await)
        }
    }
}

/// In-memory implementation for tests: assigns sequential server identifiers
/// and keeps the uploaded records, with switchable failure behaviour.
#[cfg(test)]
pub struct MockRemoteDataService {
    state: std::sync::Mutex<MockState>,
}

#[cfg(test)]
#[derive(Default)]
struct MockState {
    next_id: u64,
    records: std::collections::HashMap<(EntityTable, String), serde_json::Map<String, Value>>,
    created_order: Vec<(EntityTable, String)>,
    attempts: u32,
    always_fail: bool,
    fail_times: u32,
}

#[cfg(test)]
impl MockRemoteDataService {
    pub fn new() -> Self {
        Self {
            state: std::sync::Mutex::new(MockState::default()),
        }
    }

    pub fn set_always_fail(&self, fail: bool) {
        self.state.lock().unwrap().always_fail = fail;
    }

    /// Fail the next `n` remote calls, then recover.
    pub fn set_fail_times(&self, n: u32) {
        self.state.lock().unwrap().fail_times = n;
    }

    /// Total remote calls observed, including failed ones.
    pub fn attempts(&self) -> u32 {
        self.state.lock().unwrap().attempts
    }

    /// Tables, in order, whose creates succeeded.
    pub fn created_order(&self) -> Vec<(EntityTable, String)> {
        self.state.lock().unwrap().created_order.clone()
    }

    pub fn record(&self, table: EntityTable, id: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .records
            .get(&(table, id.to_string()))
            .cloned()
            .map(Value::Object)
    }

    pub fn record_count(&self, table: EntityTable) -> usize {
        self.state
            .lock()
            .unwrap()
            .records
            .keys()
            .filter(|(t, _)| *t == table)
            .count()
    }

    fn check_failure(state: &mut MockState) -> ServiceResult<()> {
        state.attempts += 1;
        if state.always_fail {
            return Err(ServiceError::Network("mock network failure".to_string()));
        }
        if state.fail_times > 0 {
            state.fail_times -= 1;
            return Err(ServiceError::Network("mock network failure".to_string()));
        }
        Ok(())
    }

    fn as_map(payload: &Value) -> serde_json::Map<String, Value> {
        payload.as_object().cloned().unwrap_or_default()
    }
}

#[cfg(test)]
#[async_trait]
impl RemoteDataService for MockRemoteDataService {
    async fn create_record(
        &self,
        table: EntityTable,
        payload: &Value,
    ) -> ServiceResult<RemoteRecord> {
        let mut state = self.state.lock().unwrap();
        Self::check_failure(&mut state)?;

        state.next_id += 1;
        let id = format!("srv-{}", state.next_id);
        let fields = Self::as_map(payload);
        state.records.insert((table, id.clone()), fields.clone());
        state.created_order.push((table, id.clone()));

        Ok(RemoteRecord { id, fields })
    }

    async fn update_record(
        &self,
        table: EntityTable,
        server_id: &str,
        payload: &Value,
    ) -> ServiceResult<RemoteRecord> {
        let mut state = self.state.lock().unwrap();
        Self::check_failure(&mut state)?;

        let key = (table, server_id.to_string());
        let fields = state.records.get_mut(&key).ok_or_else(|| {
            ServiceError::ExternalService(format!(
                "Server returned error 404: no {} with id {}",
                table.as_str(),
                server_id
            ))
        })?;
        for (k, v) in Self::as_map(payload) {
            fields.insert(k, v);
        }

        Ok(RemoteRecord {
            id: server_id.to_string(),
            fields: fields.clone(),
        })
    }

    async fn delete_record(&self, table: EntityTable, server_id: &str) -> ServiceResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_failure(&mut state)?;

        let key = (table, server_id.to_string());
        if state.records.remove(&key).is_none() {
            return Err(ServiceError::ExternalService(format!(
                "Server returned error 404: no {} with id {}",
                table.as_str(),
                server_id
            )));
        }

        Ok(())
    }

    async fn list_records(
        &self,
        table: EntityTable,
        user_id: &str,
    ) -> ServiceResult<Vec<RemoteRecord>> {
        let mut state = self.state.lock().unwrap();
        Self::check_failure(&mut state)?;

        let records = state
            .records
            .iter()
            .filter(|((t, _), fields)| {
                *t == table
                    && fields
                        .get("user_id")
                        .and_then(Value::as_str)
                        .map(|u| u == user_id)
                        .unwrap_or(false)
            })
            .map(|((_, id), fields)| RemoteRecord {
                id: id.clone(),
                fields: fields.clone(),
            })
            .collect();

        Ok(records)
    }
}

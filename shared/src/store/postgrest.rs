//! PostgREST (Supabase) command store client

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::traits::{CommandStore, StoreError};
use crate::model::{Command, CommandKind, DeviceFlags, HeartbeatMetadata, Lookup};

/// Connection settings for the REST backend
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`
    pub base_url: String,
    /// Anon or service key, sent as `apikey` and bearer token
    pub api_key: String,
    /// Table holding one-shot commands
    pub commands_table: String,
    /// Table holding per-device flags and heartbeats
    pub devices_table: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:54321".into(),
            api_key: String::new(),
            commands_table: "device_commands".into(),
            devices_table: "devices".into(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// HTTP client for a PostgREST endpoint
pub struct PostgrestStore {
    client: reqwest::Client,
    config: StoreConfig,
}

impl PostgrestStore {
    /// Create a new store client
    pub fn new(mut config: StoreConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.base_url, table)
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, self.table_url(table))
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
    }

    /// Insert or merge a row keyed by `device_id`
    fn upsert_device(&self, body: serde_json::Value) -> RequestBuilder {
        self.request(Method::POST, &self.config.devices_table)
            .query(&[("on_conflict", "device_id")])
            .header("Prefer", "resolution=merge-duplicates")
            .json(&body)
    }

    fn insert_request(&self, device_id: &str, kind: CommandKind) -> RequestBuilder {
        self.request(Method::POST, &self.config.commands_table)
            .header("Prefer", "return=representation")
            .json(&json!({
                "device_id": device_id,
                "command": kind,
                "executed": false,
            }))
    }

    fn pending_request(&self, device_id: &str, kind: CommandKind) -> RequestBuilder {
        self.request(Method::GET, &self.config.commands_table)
            .query(&pending_query(device_id, kind))
    }

    fn mark_request(&self, command_id: i64) -> RequestBuilder {
        // Filtering on executed=false turns a repeat mark into a zero-row update
        self.request(Method::PATCH, &self.config.commands_table)
            .query(&[
                ("id", format!("eq.{}", command_id)),
                ("executed", "eq.false".to_string()),
            ])
            .json(&json!({ "executed": true, "executed_at": Utc::now() }))
    }

    fn flags_request(&self, device_id: &str) -> RequestBuilder {
        self.request(Method::GET, &self.config.devices_table).query(&[
            ("device_id", format!("eq.{}", device_id)),
            ("select", "device_id,kiosk_mode,target_package".to_string()),
            ("limit", "1".to_string()),
        ])
    }

    fn heartbeat_request(&self, device_id: &str, metadata: &HeartbeatMetadata) -> RequestBuilder {
        self.upsert_device(json!({
            "device_id": device_id,
            "last_seen_at": Utc::now(),
            "metadata": metadata,
        }))
    }

    /// Insert a new pending command and return the stored row
    pub async fn insert_command(
        &self,
        device_id: &str,
        kind: CommandKind,
    ) -> Result<Command, StoreError> {
        let response = self
            .insert_request(device_id, kind)
            .send()
            .await
            .map_err(map_reqwest)?;

        let rows: Vec<Command> = read_rows(response).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Decode("insert returned no rows".into()))
    }

    /// Pending commands, newest first, optionally for a single device
    pub async fn list_pending(&self, device_id: Option<&str>) -> Result<Vec<Command>, StoreError> {
        let mut query = vec![
            ("executed", "eq.false".to_string()),
            ("order", "created_at.desc".to_string()),
        ];
        if let Some(id) = device_id {
            query.push(("device_id", format!("eq.{}", id)));
        }

        let response = self
            .request(Method::GET, &self.config.commands_table)
            .query(&query)
            .send()
            .await
            .map_err(map_reqwest)?;
        read_rows(response).await
    }

    /// Turn kiosk mode on or off for a device, creating its row if needed
    pub async fn set_kiosk_mode(&self, device_id: &str, enabled: bool) -> Result<(), StoreError> {
        let response = self
            .upsert_device(json!({ "device_id": device_id, "kiosk_mode": enabled }))
            .send()
            .await
            .map_err(map_reqwest)?;
        expect_success(response).await
    }
}

#[async_trait]
impl CommandStore for PostgrestStore {
    async fn fetch_pending_commands(
        &self,
        device_id: &str,
        kind: CommandKind,
    ) -> Result<Vec<Command>, StoreError> {
        debug!("Fetching pending {} commands for {}", kind, device_id);
        let response = self
            .pending_request(device_id, kind)
            .send()
            .await
            .map_err(map_reqwest)?;
        read_rows(response).await
    }

    async fn mark_executed(&self, command_id: i64) -> Result<(), StoreError> {
        let response = self
            .mark_request(command_id)
            .send()
            .await
            .map_err(map_reqwest)?;
        expect_success(response).await
    }

    async fn fetch_device_flags(&self, device_id: &str) -> Result<Lookup<DeviceFlags>, StoreError> {
        let response = self
            .flags_request(device_id)
            .send()
            .await
            .map_err(map_reqwest)?;

        let rows: Vec<DeviceFlags> = read_rows(response).await?;
        Ok(first_row(rows))
    }

    async fn upsert_heartbeat(
        &self,
        device_id: &str,
        metadata: &HeartbeatMetadata,
    ) -> Result<(), StoreError> {
        let response = self
            .heartbeat_request(device_id, metadata)
            .send()
            .await
            .map_err(map_reqwest)?;
        expect_success(response).await
    }
}

/// Query string selecting outstanding commands of one kind, oldest first
fn pending_query(device_id: &str, kind: CommandKind) -> Vec<(&'static str, String)> {
    vec![
        ("device_id", format!("eq.{}", device_id)),
        ("command", format!("eq.{}", kind)),
        ("executed", "eq.false".to_string()),
        ("order", "created_at.asc".to_string()),
    ]
}

fn first_row<T>(rows: Vec<T>) -> Lookup<T> {
    match rows.into_iter().next() {
        Some(row) => Lookup::Found(row),
        None => Lookup::NotFound,
    }
}

fn map_reqwest(err: reqwest::Error) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout
    } else if err.is_decode() {
        StoreError::Decode(err.to_string())
    } else {
        StoreError::Transport(err.to_string())
    }
}

async fn expect_success(response: Response) -> Result<(), StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn read_rows<T: DeserializeOwned>(response: Response) -> Result<Vec<T>, StoreError> {
    let status = response.status();
    let body = response.text().await.map_err(map_reqwest)?;
    if !status.is_success() {
        return Err(StoreError::Status {
            status: status.as_u16(),
            body,
        });
    }
    parse_rows(&body)
}

fn parse_rows<T: DeserializeOwned>(body: &str) -> Result<Vec<T>, StoreError> {
    serde_json::from_str(body).map_err(|e| StoreError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Request;

    fn store() -> PostgrestStore {
        PostgrestStore::new(StoreConfig {
            base_url: "https://example.supabase.co".into(),
            api_key: "anon-key".into(),
            ..Default::default()
        })
        .expect("client should build")
    }

    fn has_param(req: &Request, key: &str, value: &str) -> bool {
        req.url().query_pairs().any(|(k, v)| k == key && v == value)
    }

    fn header<'a>(req: &'a Request, name: &str) -> &'a str {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }

    fn json_body(req: &Request) -> serde_json::Value {
        let bytes = req.body().and_then(|b| b.as_bytes()).expect("buffered body");
        serde_json::from_slice(bytes).expect("json body")
    }

    #[test]
    fn test_every_request_carries_credentials() {
        let store = store();
        let requests = [
            store.pending_request("dev-1", CommandKind::Reboot),
            store.mark_request(7),
            store.flags_request("dev-1"),
            store.heartbeat_request("dev-1", &HeartbeatMetadata::default()),
            store.insert_request("dev-1", CommandKind::Reboot),
        ];
        for builder in requests {
            let req = builder.build().unwrap();
            assert_eq!(header(&req, "apikey"), "anon-key");
            assert_eq!(header(&req, "authorization"), "Bearer anon-key");
        }
    }

    #[test]
    fn test_mark_executed_only_updates_pending_row() {
        let req = store().mark_request(7).build().unwrap();
        assert_eq!(*req.method(), Method::PATCH);
        assert_eq!(req.url().path(), "/rest/v1/device_commands");
        assert!(has_param(&req, "id", "eq.7"));
        assert!(has_param(&req, "executed", "eq.false"));

        let body = json_body(&req);
        assert_eq!(body["executed"], true);
        assert!(body["executed_at"].is_string());
    }

    #[test]
    fn test_heartbeat_is_merge_upsert_on_device_id() {
        let req = store()
            .heartbeat_request("dev-1", &HeartbeatMetadata::default())
            .build()
            .unwrap();
        assert_eq!(*req.method(), Method::POST);
        assert_eq!(req.url().path(), "/rest/v1/devices");
        assert!(has_param(&req, "on_conflict", "device_id"));
        assert_eq!(header(&req, "prefer"), "resolution=merge-duplicates");
        assert_eq!(json_body(&req)["device_id"], "dev-1");
    }

    #[test]
    fn test_kiosk_toggle_is_merge_upsert() {
        let req = store()
            .upsert_device(json!({ "device_id": "dev-1", "kiosk_mode": true }))
            .build()
            .unwrap();
        assert!(has_param(&req, "on_conflict", "device_id"));
        assert_eq!(header(&req, "prefer"), "resolution=merge-duplicates");
        assert_eq!(json_body(&req)["kiosk_mode"], true);
    }

    #[test]
    fn test_pending_and_flags_requests() {
        let store = store();
        let pending = store
            .pending_request("dev-1", CommandKind::RestartApp)
            .build()
            .unwrap();
        assert_eq!(*pending.method(), Method::GET);
        assert!(has_param(&pending, "command", "eq.restart_app"));
        assert!(has_param(&pending, "order", "created_at.asc"));

        let flags = store.flags_request("dev-1").build().unwrap();
        assert_eq!(flags.url().path(), "/rest/v1/devices");
        assert!(has_param(&flags, "device_id", "eq.dev-1"));
        assert!(has_param(&flags, "limit", "1"));
    }

    #[test]
    fn test_pending_query_filters() {
        let query = pending_query("dev-1", CommandKind::RestartApp);
        assert!(query.contains(&("device_id", "eq.dev-1".to_string())));
        assert!(query.contains(&("command", "eq.restart_app".to_string())));
        assert!(query.contains(&("executed", "eq.false".to_string())));
    }

    #[test]
    fn test_parse_duplicate_rows() {
        let body = r#"[
            {"id": 1, "device_id": "dev-1", "command": "reboot", "executed": false},
            {"id": 2, "device_id": "dev-1", "command": "reboot", "executed": false}
        ]"#;
        let rows: Vec<Command> = parse_rows(body).expect("rows should decode");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|c| c.kind == CommandKind::Reboot));
    }

    #[test]
    fn test_parse_garbage_is_decode_error() {
        let result: Result<Vec<Command>, _> = parse_rows("<html>502</html>");
        assert!(matches!(result, Err(StoreError::Decode(_))));
    }

    #[test]
    fn test_empty_device_rows_are_not_found() {
        let rows: Vec<DeviceFlags> = parse_rows("[]").unwrap();
        assert_eq!(first_row(rows), Lookup::NotFound);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let store = PostgrestStore::new(StoreConfig {
            base_url: "https://example.supabase.co/".into(),
            ..Default::default()
        })
        .expect("client should build");
        assert_eq!(
            store.table_url("devices"),
            "https://example.supabase.co/rest/v1/devices"
        );
    }
}

//! HTTP client for the SoliDB API.
//!
//! Covers exactly the surface the migration engine needs: collection and
//! index management, document CRUD, SDBQL cursors, session-scoped
//! transactions, and the server-side validate/repair commands. Connection
//! pooling is shared process-wide.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use serde_json::Value;

use crate::config::DbConfig;

// Global shared HTTP client for connection pooling
static SHARED_CLIENT: OnceLock<reqwest::blocking::Client> = OnceLock::new();

pub(crate) fn shared_client() -> &'static reqwest::blocking::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(300))
            .pool_max_idle_per_host(100)
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client")
    })
}

/// A server-side transaction. All writes made through a session become
/// visible atomically at commit; an aborted session leaves no trace.
#[derive(Debug, Clone)]
pub struct Session {
    tx_id: String,
}

impl Session {
    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }
}

#[derive(Debug)]
pub struct StoreError {
    message: String,
    code: Option<u16>,
}

impl StoreError {
    pub(crate) fn new(message: impl Into<String>, code: Option<u16>) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }

    /// True when the server rejected a write with a uniqueness conflict.
    pub fn is_conflict(&self) -> bool {
        self.code == Some(409)
    }

    pub fn is_not_found(&self) -> bool {
        self.code == Some(404)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StoreError {}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError {
            message: format!("HTTP error: {}", e),
            code: None,
        }
    }
}

pub struct StoreClient {
    base_url: String,
    database: Option<String>,
    api_key: Option<String>,
    username: Option<String>,
    password: Option<String>,
    client: &'static reqwest::blocking::Client,
}

impl StoreClient {
    pub fn connect(host: &str) -> Result<Self, StoreError> {
        // Add http:// scheme if missing
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", host.trim_end_matches('/'))
        };

        Ok(Self {
            base_url,
            database: None,
            api_key: None,
            username: None,
            password: None,
            client: shared_client(),
        })
    }

    /// Connect and select database/credentials in one step.
    pub fn from_config(config: &DbConfig) -> Result<Self, StoreError> {
        let mut client = Self::connect(&config.host)?;
        if let (Some(u), Some(p)) = (&config.username, &config.password) {
            client = client.with_basic_auth(u, p);
        }
        client.set_database(&config.database);
        Ok(client)
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }

    pub fn with_basic_auth(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    pub fn set_database(&mut self, database: &str) {
        self.database = Some(database.to_string());
    }

    fn get_db(&self) -> Result<&str, StoreError> {
        self.database
            .as_deref()
            .ok_or_else(|| StoreError::new("No database specified", None))
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, StoreError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method.clone(), &url);

        if let Some(api_key) = &self.api_key {
            request = request.header("x-api-key", api_key);
        }

        if let (Some(u), Some(p)) = (&self.username, &self.password) {
            request = request.basic_auth(u, Some(p));
        }

        if let Some(b) = body {
            request = request.json(b);
        }

        let response = request
            .send()
            .map_err(|e| StoreError::new(format!("HTTP request failed: {}", e), None))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(StoreError::new(
                format!("HTTP {} {}: {}", status, path, error_text),
                Some(status.as_u16()),
            ));
        }

        let text = response
            .text()
            .map_err(|e| StoreError::new(format!("Failed to read response: {}", e), None))?;

        if text.is_empty() {
            return Err(StoreError::new(
                format!("Empty response for HTTP {} {}", method, path),
                None,
            ));
        }

        serde_json::from_str(&text).map_err(|e| {
            StoreError::new(format!("Failed to parse JSON: {} - Text: {}", e, text), None)
        })
    }

    // Appends tx_id to document endpoints so writes join the session
    fn tx_suffix(session: Option<&Session>) -> String {
        match session {
            Some(s) => format!("?tx_id={}", s.tx_id),
            None => String::new(),
        }
    }

    pub fn ping(&self) -> Result<bool, StoreError> {
        // Do a simple query to check connectivity
        let db = self.database.as_deref().unwrap_or("solidb");
        let path = format!("/_api/database/{}/cursor", db);
        let _ = self.request(
            reqwest::Method::POST,
            &path,
            Some(&serde_json::json!({
                "query": "RETURN 1"
            })),
        )?;
        Ok(true)
    }

    pub fn list_collections(&self) -> Result<Vec<Value>, StoreError> {
        let db = self.get_db()?;
        let response: Value = self.request(
            reqwest::Method::GET,
            &format!("/_api/database/{}/collection", db),
            None,
        )?;
        Ok(response
            .get("collections")
            .and_then(|c| c.as_array())
            .cloned()
            .unwrap_or_default())
    }

    pub fn collection_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .list_collections()?
            .iter()
            .filter_map(|c| c.get("name").and_then(|n| n.as_str()))
            .map(|s| s.to_string())
            .collect())
    }

    pub fn create_collection(&self, name: &str) -> Result<(), StoreError> {
        let db = self.get_db()?;
        self.request(
            reqwest::Method::POST,
            &format!("/_api/database/{}/collection", db),
            Some(&serde_json::json!({"name": name})),
        )?;
        Ok(())
    }

    pub fn drop_collection(&self, name: &str) -> Result<(), StoreError> {
        let db = self.get_db()?;
        self.request(
            reqwest::Method::DELETE,
            &format!("/_api/database/{}/collection/{}", db, name),
            None,
        )?;
        Ok(())
    }

    /// Create the collection if it does not exist yet.
    pub fn ensure_collection(&self, name: &str) -> Result<(), StoreError> {
        let exists = self
            .collection_names()?
            .iter()
            .any(|c| c == name);
        if !exists {
            self.create_collection(name)?;
        }
        Ok(())
    }

    pub fn insert(
        &self,
        collection: &str,
        key: Option<&str>,
        mut document: Value,
        session: Option<&Session>,
    ) -> Result<Value, StoreError> {
        let db = self.get_db()?;
        if let Some(k) = key {
            if let Some(obj) = document.as_object_mut() {
                obj.insert("_key".to_string(), serde_json::json!(k));
            }
        }
        let path = format!(
            "/_api/database/{}/document/{}{}",
            db,
            collection,
            Self::tx_suffix(session)
        );
        self.request(reqwest::Method::POST, &path, Some(&document))
    }

    pub fn delete(
        &self,
        collection: &str,
        key: &str,
        session: Option<&Session>,
    ) -> Result<(), StoreError> {
        let db = self.get_db()?;
        let path = format!(
            "/_api/database/{}/collection/{}/document/{}{}",
            db,
            collection,
            key,
            Self::tx_suffix(session)
        );
        self.request(reqwest::Method::DELETE, &path, None)?;
        Ok(())
    }

    pub fn list(
        &self,
        collection: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Value>, StoreError> {
        let db = self.get_db()?;
        let path = format!(
            "/_api/database/{}/collection/{}/documents?limit={}&offset={}",
            db, collection, limit, offset
        );
        let response: Value = self.request(reqwest::Method::GET, &path, None)?;
        Ok(response
            .get("documents")
            .and_then(|d| d.as_array())
            .cloned()
            .unwrap_or_default())
    }

    pub fn query(
        &self,
        sdbql: &str,
        bind_vars: Option<HashMap<String, Value>>,
        session: Option<&Session>,
    ) -> Result<Vec<Value>, StoreError> {
        let db = self.get_db()?;
        let mut payload = serde_json::json!({
            "query": sdbql
        });
        if let Some(bv) = bind_vars {
            payload["bindVars"] = serde_json::json!(bv);
        }
        if let Some(s) = session {
            payload["tx_id"] = serde_json::json!(s.tx_id);
        }
        let path = format!("/_api/database/{}/cursor", db);
        let response: Value = self.request(reqwest::Method::POST, &path, Some(&payload))?;
        Ok(response
            .get("result")
            .and_then(|r| r.as_array())
            .cloned()
            .unwrap_or_default())
    }

    pub fn begin_session(&self) -> Result<Session, StoreError> {
        let db = self.get_db()?;
        let payload = serde_json::json!({
            "database": db
        });
        let response: Value = self.request(
            reqwest::Method::POST,
            "/_api/transaction/begin",
            Some(&payload),
        )?;
        response
            .get("tx_id")
            .and_then(|t| t.as_str())
            .map(|s| Session {
                tx_id: s.to_string(),
            })
            .ok_or_else(|| StoreError::new("No tx_id in response", None))
    }

    pub fn commit_session(&self, session: &Session) -> Result<(), StoreError> {
        self.request(
            reqwest::Method::POST,
            "/_api/transaction/commit",
            Some(&serde_json::json!({"tx_id": session.tx_id})),
        )?;
        Ok(())
    }

    pub fn abort_session(&self, session: &Session) -> Result<(), StoreError> {
        self.request(
            reqwest::Method::POST,
            "/_api/transaction/rollback",
            Some(&serde_json::json!({"tx_id": session.tx_id})),
        )?;
        Ok(())
    }

    pub fn create_index(
        &self,
        collection: &str,
        name: &str,
        fields: Vec<String>,
        unique: bool,
        sparse: bool,
    ) -> Result<Value, StoreError> {
        let db = self.get_db()?;
        let payload = serde_json::json!({
            "name": name,
            "type": "hash",
            "fields": fields,
            "unique": unique,
            "sparse": sparse
        });
        let path = format!("/_api/database/{}/{}/indexes", db, collection);
        let response: Value = self.request(reqwest::Method::POST, &path, Some(&payload))?;
        Ok(response)
    }

    pub fn drop_index(&self, collection: &str, name: &str) -> Result<(), StoreError> {
        let db = self.get_db()?;
        let path = format!("/_api/database/{}/{}/indexes/{}", db, collection, name);
        self.request(reqwest::Method::DELETE, &path, None)?;
        Ok(())
    }

    pub fn list_indexes(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        let db = self.get_db()?;
        let path = format!("/_api/database/{}/{}/indexes", db, collection);
        let response: Value = self.request(reqwest::Method::GET, &path, None)?;
        Ok(response
            .get("indexes")
            .and_then(|i| i.as_array())
            .cloned()
            .unwrap_or_default())
    }

    pub fn collection_stats(&self, collection: &str) -> Result<Value, StoreError> {
        let db = self.get_db()?;
        let path = format!("/_api/database/{}/collection/{}/stats", db, collection);
        let response: Value = self.request(reqwest::Method::GET, &path, None)?;
        Ok(response)
    }

    /// Server-side structural validation of one collection. Read-only.
    pub fn validate_collection(&self, collection: &str) -> Result<Value, StoreError> {
        let db = self.get_db()?;
        let path = format!("/_api/database/{}/collection/{}/validate", db, collection);
        let response: Value = self.request(reqwest::Method::POST, &path, None)?;
        Ok(response)
    }

    /// Server-side repair of the whole database. Destructive and blocking.
    pub fn repair_database(&self) -> Result<Value, StoreError> {
        let db = self.get_db()?;
        let path = format!("/_api/database/{}/repair", db);
        let response: Value = self.request(reqwest::Method::POST, &path, None)?;
        Ok(response)
    }
}

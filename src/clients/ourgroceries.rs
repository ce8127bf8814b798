//! OurGroceries web client.
//!
//! OurGroceries has no public API. This client signs in with the account
//! form, scrapes the team id and the category meta-list id from the
//! your-lists page, and then drives the same JSON command endpoint the web
//! app uses (getOverview, getList, insertItem, deleteItem).
//!
//! Sessions expire after about an hour. Each command re-signs-in when the
//! session is stale and replays exactly once when the server rejects a
//! request as unauthenticated.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::clients::{ClientError, ClientResult, DestinationClient, DestinationItem, NewItem};
use crate::config::OurGroceriesConfig;

const LIVE_URL: &str = "https://www.ourgroceries.com";
const REQUEST_TIMEOUT_SECS: u64 = 30;
const SESSION_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Deserialize)]
struct OverviewResponse {
    #[serde(rename = "shoppingLists", default)]
    shopping_lists: Vec<ListRef>,
}

#[derive(Debug, Clone, Deserialize)]
struct ListRef {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct GetListResponse {
    list: ListPayload,
}

#[derive(Debug, Deserialize)]
struct ListPayload {
    #[serde(default)]
    items: Vec<RawItem>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    id: String,
    value: String,
    #[serde(rename = "categoryId", default)]
    category_id: Option<String>,
    #[serde(rename = "crossedOff", default)]
    crossed_off: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct MetaList {
    id: String,
    #[serde(rename = "listType", default)]
    list_type: Option<String>,
}

#[derive(Debug, Default)]
struct Session {
    team_id: Option<String>,
    category_list_id: Option<String>,
    signed_in_at: Option<Instant>,
    overview: Option<Vec<ListRef>>,
    categories: Option<HashMap<String, String>>,
}

pub struct OurGroceriesClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    default_category_id: Option<String>,
    session: Mutex<Session>,
}

impl OurGroceriesClient {
    pub fn new(
        base_url: &str,
        username: &str,
        password: &str,
        default_category_id: Option<String>,
    ) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .cookie_store(true)
            .build()
            .map_err(|e| ClientError::InvalidConfig(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            default_category_id,
            session: Mutex::new(Session::default()),
        })
    }

    pub fn from_config(config: &OurGroceriesConfig) -> ClientResult<Self> {
        Self::new(
            LIVE_URL,
            &config.username,
            &config.password,
            config.default_category_id.clone(),
        )
    }

    /// Drops the overview and category caches. The signed-in session is
    /// kept; it refreshes on its own schedule.
    pub async fn clear_caches(&self) {
        let mut session = self.session.lock().await;
        session.overview = None;
        session.categories = None;
    }

    async fn sign_in(&self) -> ClientResult<()> {
        let url = format!("{}/sign-in", self.base_url);
        let form = [
            ("emailAddress", self.username.as_str()),
            ("action", "sign-in"),
            ("password", self.password.as_str()),
        ];
        let response = self.http.post(&url).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::from_status(
                status.as_u16(),
                "sign-in failed".to_string(),
                None,
            ));
        }

        // The signed-in page carries the team id and the category
        // meta-list id as inline script variables.
        let page = self.http.get(format!("{}/your-lists/", self.base_url)).send().await?;
        let status = page.status();
        if !status.is_success() {
            return Err(ClientError::from_status(
                status.as_u16(),
                "failed to load lists page after sign-in".to_string(),
                None,
            ));
        }
        let html = page.text().await.map_err(|e| ClientError::Decode(e.to_string()))?;
        let team_id = scrape_script_var(&html, "g_teamId").ok_or_else(|| {
            ClientError::Auth("sign-in did not establish a session (check credentials)".to_string())
        })?;
        let category_list_id = scrape_category_list_id(&html);
        if category_list_id.is_none() {
            debug!("no category meta-list found, categories fall back to the default id");
        }

        let mut session = self.session.lock().await;
        session.team_id = Some(team_id);
        session.category_list_id = category_list_id;
        session.signed_in_at = Some(Instant::now());
        session.overview = None;
        session.categories = None;
        Ok(())
    }

    async fn ensure_session(&self) -> ClientResult<()> {
        let stale = {
            let session = self.session.lock().await;
            match session.signed_in_at {
                Some(at) => at.elapsed() >= SESSION_TTL,
                None => true,
            }
        };
        if stale {
            self.sign_in().await?;
        }
        Ok(())
    }

    /// Posts one JSON command, signing in first when the session is stale
    /// and replaying once when the server rejects the session mid-flight.
    async fn command(&self, mut body: Value) -> ClientResult<Value> {
        self.ensure_session().await?;
        match self.post_command(&mut body).await {
            Err(ClientError::Auth(_)) => {
                debug!("session rejected, signing in again");
                self.sign_in().await?;
                self.post_command(&mut body).await
            }
            other => other,
        }
    }

    async fn post_command(&self, body: &mut Value) -> ClientResult<Value> {
        let team_id = self.session.lock().await.team_id.clone();
        if let Some(team_id) = team_id {
            body["teamId"] = json!(team_id);
        }
        let url = format!("{}/your-lists/", self.base_url);
        let response = self.http.post(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let command = body
                .get("command")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            return Err(ClientError::from_status(status.as_u16(), command, retry_after));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn overview(&self) -> ClientResult<Vec<ListRef>> {
        if let Some(cached) = self.session.lock().await.overview.clone() {
            return Ok(cached);
        }
        let value = self.command(json!({"command": "getOverview"})).await?;
        let parsed: OverviewResponse = serde_json::from_value(value)
            .map_err(|e| ClientError::Decode(format!("getOverview: {e}")))?;
        self.session.lock().await.overview = Some(parsed.shopping_lists.clone());
        Ok(parsed.shopping_lists)
    }

    async fn list_id_by_name(&self, name: &str) -> ClientResult<String> {
        let wanted = name.to_lowercase();
        let lists = self.overview().await?;
        lists
            .iter()
            .find(|l| l.name.to_lowercase() == wanted)
            .map(|l| l.id.clone())
            .ok_or_else(|| ClientError::NotFound(format!("shopping list '{name}' not found")))
    }

    async fn fetch_raw_list(&self, list_id: &str) -> ClientResult<Vec<RawItem>> {
        let value = self
            .command(json!({"command": "getList", "listId": list_id}))
            .await?;
        let parsed: GetListResponse = serde_json::from_value(value)
            .map_err(|e| ClientError::Decode(format!("getList: {e}")))?;
        Ok(parsed.list.items)
    }

    async fn categories(&self) -> ClientResult<HashMap<String, String>> {
        if let Some(cached) = self.session.lock().await.categories.clone() {
            return Ok(cached);
        }
        let category_list_id = self.session.lock().await.category_list_id.clone();
        let list_id = match category_list_id {
            Some(id) => id,
            None => return Ok(HashMap::new()),
        };
        let items = self.fetch_raw_list(&list_id).await?;
        let categories: HashMap<String, String> = items
            .into_iter()
            .map(|item| (item.value.to_lowercase(), item.id))
            .collect();
        self.session.lock().await.categories = Some(categories.clone());
        Ok(categories)
    }

    async fn get_or_create_category(&self, name: &str) -> ClientResult<Option<String>> {
        if let Some(id) = self.categories().await?.get(&name.to_lowercase()) {
            return Ok(Some(id.clone()));
        }
        let category_list_id = self.session.lock().await.category_list_id.clone();
        let list_id = match category_list_id {
            Some(id) => id,
            None => return Ok(None),
        };
        debug!(category = name, "creating category");
        self.command(json!({"command": "insertItem", "listId": list_id, "value": name}))
            .await?;
        self.session.lock().await.categories = None;
        Ok(self.categories().await?.get(&name.to_lowercase()).cloned())
    }

    /// Resolves a category name to an id, creating the category when it
    /// does not exist. Failures degrade to the configured default id so a
    /// category problem never blocks an item.
    async fn category_id_for(&self, name: &str) -> Option<String> {
        match self.get_or_create_category(name).await {
            Ok(Some(id)) => Some(id),
            Ok(None) => self.default_category_id.clone(),
            Err(e) => {
                warn!(category = name, error = %e, "category lookup failed, using default");
                self.default_category_id.clone()
            }
        }
    }
}

#[async_trait]
impl DestinationClient for OurGroceriesClient {
    async fn fetch_list_items(&self, list: &str) -> ClientResult<Vec<DestinationItem>> {
        let list_id = self.list_id_by_name(list).await?;
        let items = self.fetch_raw_list(&list_id).await?;
        Ok(items
            .into_iter()
            .map(|item| DestinationItem {
                id: item.id,
                value: item.value,
                category: item.category_id,
                crossed_off: item.crossed_off.unwrap_or(false),
            })
            .collect())
    }

    async fn add_item(&self, list: &str, item: &NewItem) -> ClientResult<()> {
        let list_id = self.list_id_by_name(list).await?;
        let category_id = match &item.category {
            Some(name) => self.category_id_for(name).await,
            None => None,
        };
        let mut body = json!({
            "command": "insertItem",
            "listId": list_id,
            "value": item.value,
        });
        if let Some(category_id) = category_id {
            body["categoryId"] = json!(category_id);
        }
        self.command(body).await?;
        Ok(())
    }

    async fn remove_item(&self, list: &str, item_id: &str) -> ClientResult<()> {
        let list_id = self.list_id_by_name(list).await?;
        self.command(json!({
            "command": "deleteItem",
            "listId": list_id,
            "itemId": item_id,
        }))
        .await?;
        Ok(())
    }

    async fn check_connection(&self) -> ClientResult<()> {
        self.overview().await.map(|_| ())
    }
}

/// Pulls a quoted inline script value, e.g. `g_teamId = "abc";`.
fn scrape_script_var(html: &str, name: &str) -> Option<String> {
    let marker = format!("{name} = \"");
    let start = html.find(&marker)? + marker.len();
    let rest = &html[start..];
    let end = rest.find('"')?;
    let value = &rest[..end];
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// The category meta-list id lives in the `g_staticMetalist` JSON blob as
/// the entry with listType CATEGORY.
fn scrape_category_list_id(html: &str) -> Option<String> {
    let marker = "g_staticMetalist = ";
    let start = html.find(marker)? + marker.len();
    let rest = &html[start..];
    let end = rest.find(';')?;
    let lists: Vec<MetaList> = serde_json::from_str(rest[..end].trim()).ok()?;
    lists
        .into_iter()
        .find(|l| l.list_type.as_deref() == Some("CATEGORY"))
        .map(|l| l.id)
}

//! Menu search and order placement against the browser automation worker.
//!
//! These operations drive a real browser and are slow, so every call uses
//! [`CallClass::Slow`]. Menu searches run in the background on the worker;
//! their results are fetched later through a `resource://search_results/<id>`
//! resource.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use hungry_core::{DomainResponse, OrderItem, ResponseData, ResponseSource, ResponseStatus, SessionId};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::client::McpClient;
use crate::config::CallClass;
use crate::error::McpError;
use crate::tool::{resource_text, tool_text};

pub const SEARCH_RESULTS_PREFIX: &str = "resource://search_results/";

pub const DEFAULT_DELIVERY_ADDRESS: &str = "809 Bouldin Ave, Austin, TX 78704";

/// A menu search started on the worker and not yet collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSearch {
    pub search_term: String,
    pub session_id: SessionId,
    pub started_at: DateTime<Utc>,
}

pub struct OrderingClient {
    client: Arc<McpClient>,
    active: Mutex<HashMap<String, ActiveSearch>>,
}

impl OrderingClient {
    pub fn new(client: Arc<McpClient>) -> Self {
        Self {
            client,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &Arc<McpClient> {
        &self.client
    }

    fn active(&self) -> MutexGuard<'_, HashMap<String, ActiveSearch>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a menu search. The response carries `search_id` when the worker
    /// announced a results resource.
    pub async fn find_menu_options(&self, search_term: &str, session: &SessionId) -> DomainResponse {
        let result = self
            .call_tool("find_menu_options", json!({ "search_term": search_term }))
            .await;
        let text = match result {
            Ok(text) => text,
            Err(e) => return failed(session, "Error calling Uber Eats worker", &e),
        };

        let search_id = extract_search_id(&text);
        if let Some(id) = &search_id {
            info!(search_id = %id, search_term, "Menu search started");
            self.active().insert(
                id.clone(),
                ActiveSearch {
                    search_term: search_term.to_string(),
                    session_id: session.clone(),
                    started_at: Utc::now(),
                },
            );
        }

        let data = ResponseData::new(text, ResponseStatus::SearchStarted, ResponseSource::BrowserAutomation)
            .with_field("search_term", search_term)
            .with_field("search_id", search_id.map_or(Value::Null, Value::from));
        DomainResponse::ok(session.clone(), data)
    }

    /// Collect the results of a search started by [`find_menu_options`](Self::find_menu_options).
    pub async fn search_results(&self, search_id: &str) -> DomainResponse {
        let search = self.active().get(search_id).cloned();
        let Some(search) = search else {
            return DomainResponse::failed(SessionId::default(), "Search ID not found");
        };

        let uri = format!("{}{}", SEARCH_RESULTS_PREFIX, search_id);
        match self
            .client
            .call("resources/read", json!({ "uri": uri }), CallClass::Slow)
            .await
        {
            Ok(result) => {
                self.active().remove(search_id);
                let elapsed = Utc::now().signed_duration_since(search.started_at);
                debug!(search_id, elapsed_secs = elapsed.num_seconds(), "Search results collected");

                let data = ResponseData::new(
                    resource_text(&result),
                    ResponseStatus::ResultsReady,
                    ResponseSource::BrowserAutomation,
                )
                .with_field("results", result)
                .with_field("search_term", search.search_term)
                .with_field("search_id", search_id);
                DomainResponse::ok(search.session_id, data)
            }
            Err(McpError::Remote { message, .. }) => {
                debug!(search_id, error = %message, "Search results not ready");
                DomainResponse::failed(search.session_id, "Results not ready yet")
            }
            Err(e) => failed(&search.session_id, "Error getting search results", &e),
        }
    }

    /// Order a single item.
    pub async fn order_food(
        &self,
        restaurant_name: &str,
        item: &OrderItem,
        item_url: Option<&str>,
        delivery_address: Option<&str>,
        session: &SessionId,
    ) -> DomainResponse {
        if let Err(e) = item.validate() {
            return DomainResponse::failed(session.clone(), e.to_string());
        }

        let arguments = json!({
            "restaurant_name": restaurant_name,
            "item_name": item.name,
            "quantity": item.quantity,
            "item_url": item_url.unwrap_or_default(),
            "delivery_address": delivery_address.unwrap_or(DEFAULT_DELIVERY_ADDRESS),
        });
        match self.call_tool("order_food", arguments).await {
            Ok(text) => {
                info!(restaurant_name, item = %item.name, quantity = item.quantity, "Order started");
                let data = ResponseData::new(text, ResponseStatus::OrderStarted, ResponseSource::BrowserAutomation)
                    .with_field("restaurant_name", restaurant_name)
                    .with_field("item_name", item.name.as_str())
                    .with_field("item_url", item_url.unwrap_or_default());
                DomainResponse::ok(session.clone(), data)
            }
            Err(e) => failed(session, "Error placing order", &e),
        }
    }

    /// Order several items from one restaurant.
    pub async fn place_multiple_items_order(
        &self,
        restaurant_name: &str,
        items: &[OrderItem],
        delivery_address: Option<&str>,
        session: &SessionId,
    ) -> DomainResponse {
        if items.is_empty() {
            return DomainResponse::failed(session.clone(), "Invalid input: no items to order");
        }
        if let Some(e) = items.iter().find_map(|item| item.validate().err()) {
            return DomainResponse::failed(session.clone(), e.to_string());
        }

        let items_json = match serde_json::to_value(items) {
            Ok(value) => value,
            Err(e) => return failed(session, "Error placing multi-item order", &McpError::from(e)),
        };
        let arguments = json!({
            "restaurant_name": restaurant_name,
            "items": items_json,
            "delivery_address": delivery_address.unwrap_or(DEFAULT_DELIVERY_ADDRESS),
        });
        match self.call_tool("place_multiple_items_order", arguments).await {
            Ok(text) => {
                info!(restaurant_name, items = items.len(), "Multi-item order started");
                let data =
                    ResponseData::new(text, ResponseStatus::MultiOrderStarted, ResponseSource::BrowserAutomation)
                        .with_field("restaurant_name", restaurant_name)
                        .with_field("items", items_json);
                DomainResponse::ok(session.clone(), data)
            }
            Err(e) => failed(session, "Error placing multi-item order", &e),
        }
    }

    /// Searches started but not yet collected, oldest first.
    pub fn active_searches(&self) -> Vec<(String, ActiveSearch)> {
        let mut searches: Vec<_> = self
            .active()
            .iter()
            .map(|(id, search)| (id.clone(), search.clone()))
            .collect();
        searches.sort_by_key(|(_, search)| search.started_at);
        searches
    }

    /// Drop searches started more than `max_age` ago. Returns how many were dropped.
    pub fn prune_searches(&self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut active = self.active();
        let before = active.len();
        active.retain(|_, search| search.started_at >= cutoff);
        before - active.len()
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, McpError> {
        let result = self.client.call_tool(name, arguments, CallClass::Slow).await?;
        tool_text(&result)
    }
}

fn failed(session: &SessionId, context: &str, error: &McpError) -> DomainResponse {
    warn!(error = %error, "{}", context);
    DomainResponse::failed(session.clone(), format!("{}: {}", context, error))
}

/// Id of the results resource announced in a search-start message.
fn extract_search_id(text: &str) -> Option<String> {
    let start = text.find(SEARCH_RESULTS_PREFIX)? + SEARCH_RESULTS_PREFIX.len();
    let id: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect();
    (!id.is_empty()).then_some(id)
}

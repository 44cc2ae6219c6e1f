//! Routes intent-resolver function calls to façade operations.

use std::sync::Arc;

use hungry_core::{CoreError, DomainResponse, OrderItem, ResponseData, ResponseSource, ResponseStatus, SessionId};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::batch::{BatchOrders, DEFAULT_BATCH_LOCATION};
use crate::ordering::OrderingClient;
use crate::taco::TacoSearch;

pub const DEFAULT_SEARCH_LIMIT: u32 = 10;
pub const DEFAULT_TOP_RATED_LIMIT: u32 = 5;
pub const DEFAULT_AREA_LIMIT: u32 = 8;

/// A function call as emitted by the intent resolver.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default, alias = "arguments", alias = "input")]
    pub parameters: Value,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            parameters,
        }
    }

    /// Parse `{"name": ..., "parameters": {...}}`.
    pub fn parse(json: &str) -> Result<Self, CoreError> {
        serde_json::from_str(json).map_err(|e| CoreError::InvalidInput(format!("function call: {}", e)))
    }
}

/// Executes function calls against the query and ordering façades.
pub struct ToolDispatcher {
    search: Arc<TacoSearch>,
    ordering: Option<Arc<OrderingClient>>,
    batches: Option<Arc<BatchOrders>>,
}

impl ToolDispatcher {
    pub fn new(search: Arc<TacoSearch>) -> Self {
        Self {
            search,
            ordering: None,
            batches: None,
        }
    }

    /// Enable the ordering functions, including batch orders on the same worker.
    pub fn with_ordering(mut self, ordering: Arc<OrderingClient>) -> Self {
        self.batches = Some(Arc::new(BatchOrders::new(Arc::clone(&ordering))));
        self.ordering = Some(ordering);
        self
    }

    /// Replace the batch order tracker set up by [`with_ordering`](Self::with_ordering).
    pub fn with_batch_orders(mut self, batches: Arc<BatchOrders>) -> Self {
        self.batches = Some(batches);
        self
    }

    pub async fn execute_call(&self, call: &FunctionCall, session: &SessionId) -> DomainResponse {
        self.execute(&call.name, &call.parameters, session).await
    }

    /// Run `function` with `params`. Unknown functions and malformed
    /// parameters produce a failed response.
    pub async fn execute(&self, function: &str, params: &Value, session: &SessionId) -> DomainResponse {
        debug!(function, session = %session, "Dispatching function call");
        match function {
            "search_tacos" | "search_restaurants" | "intelligent_search" => {
                let limit = limit_param(params, DEFAULT_SEARCH_LIMIT);
                self.search.search_tacos(str_param(params, "query"), limit, session).await
            }
            "get_restaurant_details" => {
                self.search
                    .restaurant_details(str_param(params, "restaurant_name"), session)
                    .await
            }
            "get_top_rated_tacos" => {
                let limit = limit_param(params, DEFAULT_TOP_RATED_LIMIT);
                self.search.top_rated(limit, session).await
            }
            "search_by_area" => {
                let limit = limit_param(params, DEFAULT_AREA_LIMIT);
                self.search.search_by_area(str_param(params, "area"), limit, session).await
            }
            "health_check" => self.health(session).await,
            "find_menu_options" | "get_search_results" | "order_food" | "place_multiple_items_order" => {
                match &self.ordering {
                    Some(ordering) => ordering_call(ordering, function, params, session).await,
                    None => DomainResponse::failed(session.clone(), "Ordering worker is not configured"),
                }
            }
            "create_batch_orders" | "get_batch_status" | "place_batch_order" | "cancel_batch_order" => {
                match &self.batches {
                    Some(batches) => batch_call(batches, function, params, session).await,
                    None => DomainResponse::failed(session.clone(), "Ordering worker is not configured"),
                }
            }
            other => {
                warn!(function = other, "Unknown function call");
                DomainResponse::failed(session.clone(), CoreError::UnknownFunction(other.to_string()).to_string())
            }
        }
    }

    async fn health(&self, session: &SessionId) -> DomainResponse {
        let healthy = self.search.health_check().await;
        let message = if healthy {
            "Taco search is available"
        } else {
            "Taco search is unavailable"
        };
        let data = ResponseData::new(message, ResponseStatus::HealthChecked, ResponseSource::FastDatabase)
            .with_field("healthy", healthy)
            .with_field("worker_state", self.search.client().state().to_string());
        DomainResponse::ok(session.clone(), data)
    }
}

async fn ordering_call(
    ordering: &OrderingClient,
    function: &str,
    params: &Value,
    session: &SessionId,
) -> DomainResponse {
    let restaurant = str_param(params, "restaurant_name");
    let address = opt_str_param(params, "delivery_address");
    match function {
        "find_menu_options" => {
            let term = opt_str_param(params, "search_term").unwrap_or_else(|| str_param(params, "query"));
            ordering.find_menu_options(term, session).await
        }
        "get_search_results" => ordering.search_results(str_param(params, "search_id")).await,
        "order_food" => {
            let item = OrderItem::new(str_param(params, "item_name")).with_quantity(u32_param(params, "quantity", 1));
            ordering
                .order_food(restaurant, &item, opt_str_param(params, "item_url"), address, session)
                .await
        }
        _ => match items_param(params) {
            Ok(items) => {
                ordering
                    .place_multiple_items_order(restaurant, &items, address, session)
                    .await
            }
            Err(e) => DomainResponse::failed(session.clone(), e.to_string()),
        },
    }
}

async fn batch_call(batches: &BatchOrders, function: &str, params: &Value, session: &SessionId) -> DomainResponse {
    let order_id = str_param(params, "order_id");
    match function {
        "create_batch_orders" => {
            let created = batch_params(params).and_then(|(queries, items)| {
                let location = opt_str_param(params, "location").unwrap_or(DEFAULT_BATCH_LOCATION);
                batches.create(&queries, &items, location, session)
            });
            match created {
                Ok(order_ids) => {
                    let data = ResponseData::new(
                        format!("Created {} batch orders", order_ids.len()),
                        ResponseStatus::BatchCreated,
                        ResponseSource::BrowserAutomation,
                    )
                    .with_field("order_ids", order_ids)
                    .with_field("estimated_completion", "2-3 minutes per restaurant");
                    DomainResponse::ok(session.clone(), data)
                }
                Err(e) => DomainResponse::failed(session.clone(), format!("Error creating batch orders: {}", e)),
            }
        }
        "get_batch_status" => {
            let orders = batches.status(session);
            let total = orders.len();
            let orders = match serde_json::to_value(&orders) {
                Ok(value) => value,
                Err(e) => return DomainResponse::failed(session.clone(), format!("Error reading batch status: {}", e)),
            };
            let data = ResponseData::new(
                format!("{} batch orders", total),
                ResponseStatus::BatchStatusRetrieved,
                ResponseSource::BrowserAutomation,
            )
            .with_field("orders", orders)
            .with_field("total_orders", total);
            DomainResponse::ok(session.clone(), data)
        }
        "place_batch_order" => {
            batches
                .place(order_id, str_param(params, "item_url"), str_param(params, "item_name"))
                .await
        }
        _ => {
            if batches.cancel(order_id) {
                let data = ResponseData::new(
                    format!("Batch order {} cancelled", order_id),
                    ResponseStatus::BatchCancelled,
                    ResponseSource::BrowserAutomation,
                )
                .with_field("order_id", order_id);
                DomainResponse::ok(session.clone(), data)
            } else {
                DomainResponse::failed(session.clone(), "Order ID not found")
            }
        }
    }
}

fn batch_params(params: &Value) -> Result<(Vec<String>, Vec<Vec<String>>), CoreError> {
    let queries = list_param(params, "restaurant_queries")?;
    let items = list_param(params, "items_per_restaurant")?;
    Ok((queries, items))
}

fn list_param<T: serde::de::DeserializeOwned>(params: &Value, key: &str) -> Result<Vec<T>, CoreError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(list) => Vec::<T>::deserialize(list).map_err(|e| CoreError::InvalidInput(format!("{}: {}", key, e))),
    }
}

fn str_param<'a>(params: &'a Value, key: &str) -> &'a str {
    opt_str_param(params, key).unwrap_or_default()
}

fn opt_str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn limit_param(params: &Value, default: u32) -> u32 {
    u32_param(params, "limit", default)
}

/// Integer parameter; numeric strings are accepted, anything else means `default`.
fn u32_param(params: &Value, key: &str, default: u32) -> u32 {
    let value = match params.get(key) {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    value
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(default)
}

fn items_param(params: &Value) -> Result<Vec<OrderItem>, CoreError> {
    list_param(params, "items")
}

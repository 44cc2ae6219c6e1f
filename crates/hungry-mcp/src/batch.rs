//! Several menu searches started at once, each tracked until an order is placed.
//!
//! Every batch order runs its search in a background task: start the search
//! on the ordering worker, give the browser time to finish, then collect the
//! results. The order then waits for the caller to pick an item and place it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hungry_core::{CoreError, DomainResponse, OrderItem, SessionId};
use serde::Serialize;
use serde_json::Value;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ordering::OrderingClient;

/// Batch orders allowed in flight at once.
pub const MAX_CONCURRENT_ORDERS: usize = 5;

pub const DEFAULT_BATCH_LOCATION: &str = "Austin, TX";

/// Time the browser worker needs to finish a menu search.
pub const DEFAULT_RESULTS_DELAY: Duration = Duration::from_secs(120);

/// Lifecycle of one batch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Searching,
    SearchStarted,
    ReadyToOrder,
    SearchFailed,
    /// An order for this batch entry is being placed right now.
    Placing,
    OrderPlaced,
    OrderFailed,
    Cancelled,
    /// The background search task died.
    Error,
}

impl BatchStatus {
    /// Nothing more happens to an order in this state.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            Self::SearchFailed | Self::OrderPlaced | Self::OrderFailed | Self::Cancelled | Self::Error
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Searching => "searching",
            Self::SearchStarted => "search_started",
            Self::ReadyToOrder => "ready_to_order",
            Self::SearchFailed => "search_failed",
            Self::Placing => "placing",
            Self::OrderPlaced => "order_placed",
            Self::OrderFailed => "order_failed",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Snapshot of one batch order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOrder {
    pub order_id: String,
    pub restaurant_query: String,
    pub items: Vec<String>,
    pub location: String,
    pub session_id: SessionId,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    /// Latest search payload: the search-start response, then the results.
    pub search_results: Option<Value>,
}

struct Tracked {
    order: BatchOrder,
    task: Option<AbortHandle>,
}

type Registry = Arc<Mutex<HashMap<String, Tracked>>>;

fn lock(orders: &Mutex<HashMap<String, Tracked>>) -> MutexGuard<'_, HashMap<String, Tracked>> {
    orders.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Move `order_id` to `status` unless it is gone or was cancelled.
fn transition(orders: &Registry, order_id: &str, status: BatchStatus, results: Option<Value>) -> bool {
    let mut orders = lock(orders);
    match orders.get_mut(order_id) {
        Some(tracked) if tracked.order.status != BatchStatus::Cancelled => {
            debug!(order_id, from = %tracked.order.status, to = %status, "Batch order transition");
            tracked.order.status = status;
            if results.is_some() {
                tracked.order.search_results = results;
            }
            true
        }
        _ => false,
    }
}

/// Runs several menu searches concurrently on one ordering worker.
pub struct BatchOrders {
    ordering: Arc<OrderingClient>,
    orders: Registry,
    results_delay: Duration,
    max_orders: usize,
}

impl BatchOrders {
    pub fn new(ordering: Arc<OrderingClient>) -> Self {
        Self {
            ordering,
            orders: Arc::new(Mutex::new(HashMap::new())),
            results_delay: DEFAULT_RESULTS_DELAY,
            max_orders: MAX_CONCURRENT_ORDERS,
        }
    }

    pub fn with_results_delay(mut self, delay: Duration) -> Self {
        self.results_delay = delay;
        self
    }

    pub fn with_max_orders(mut self, max_orders: usize) -> Self {
        self.max_orders = max_orders;
        self
    }

    fn orders(&self) -> MutexGuard<'_, HashMap<String, Tracked>> {
        lock(&self.orders)
    }

    /// Start one background search per query and return the new order ids.
    ///
    /// `items[i]` belongs to `queries[i]`; missing entries mean no items yet.
    /// Must be called from within a tokio runtime.
    pub fn create(
        &self,
        queries: &[String],
        items: &[Vec<String>],
        location: &str,
        session: &SessionId,
    ) -> Result<Vec<String>, CoreError> {
        if queries.is_empty() {
            return Err(CoreError::InvalidInput("no restaurant queries".to_string()));
        }

        let mut orders = self.orders();
        let in_flight = orders.values().filter(|t| !t.order.status.is_finished()).count();
        if in_flight + queries.len() > self.max_orders {
            return Err(CoreError::InvalidInput(format!(
                "Maximum {} concurrent orders allowed",
                self.max_orders
            )));
        }

        let mut order_ids = Vec::with_capacity(queries.len());
        for (index, query) in queries.iter().enumerate() {
            let order_id = new_order_id(session);
            let order = BatchOrder {
                order_id: order_id.clone(),
                restaurant_query: query.clone(),
                items: items.get(index).cloned().unwrap_or_default(),
                location: location.to_string(),
                session_id: session.clone(),
                status: BatchStatus::Pending,
                created_at: Utc::now(),
                search_results: None,
            };
            let task = Some(self.spawn_search(order_id.clone()));
            orders.insert(order_id.clone(), Tracked { order, task });
            order_ids.push(order_id);
        }

        info!(session = %session, count = order_ids.len(), "Batch orders created");
        Ok(order_ids)
    }

    /// Run the search of `order_id` and mark the order failed if the task dies.
    fn spawn_search(&self, order_id: String) -> AbortHandle {
        let search = tokio::spawn(run_search(
            Arc::clone(&self.ordering),
            Arc::clone(&self.orders),
            order_id.clone(),
            self.results_delay,
        ));
        let abort = search.abort_handle();

        let orders = Arc::clone(&self.orders);
        tokio::spawn(async move {
            if let Err(e) = search.await {
                if e.is_panic() {
                    error!(order_id = %order_id, "Batch search task panicked");
                    transition(&orders, &order_id, BatchStatus::Error, None);
                }
            }
        });
        abort
    }

    pub fn order(&self, order_id: &str) -> Option<BatchOrder> {
        self.orders().get(order_id).map(|t| t.order.clone())
    }

    /// Every batch order of `session`, oldest first.
    pub fn status(&self, session: &SessionId) -> Vec<BatchOrder> {
        let mut orders: Vec<_> = self
            .orders()
            .values()
            .filter(|t| &t.order.session_id == session)
            .map(|t| t.order.clone())
            .collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.order_id.cmp(&b.order_id)));
        orders
    }

    /// Order `item_name` for a batch order whose results are ready.
    pub async fn place(&self, order_id: &str, item_url: &str, item_name: &str) -> DomainResponse {
        let claimed = {
            let mut orders = self.orders();
            match orders.get_mut(order_id) {
                None => Err(DomainResponse::failed(SessionId::default(), "Order ID not found")),
                Some(tracked) if tracked.order.status != BatchStatus::ReadyToOrder => {
                    Err(DomainResponse::failed(
                        tracked.order.session_id.clone(),
                        format!("Order not ready. Current status: {}", tracked.order.status),
                    ))
                }
                Some(tracked) => {
                    tracked.order.status = BatchStatus::Placing;
                    Ok(tracked.order.clone())
                }
            }
        };
        let order = match claimed {
            Ok(order) => order,
            Err(response) => return response,
        };

        let item = OrderItem::new(item_name);
        let item_url = Some(item_url).filter(|url| !url.is_empty());
        let response = self
            .ordering
            .order_food(&order.restaurant_query, &item, item_url, None, &order.session_id)
            .await;

        let status = if response.success {
            BatchStatus::OrderPlaced
        } else {
            BatchStatus::OrderFailed
        };
        transition(&self.orders, order_id, status, None);
        response
    }

    /// Stop the background work of `order_id`. Returns false for unknown ids.
    pub fn cancel(&self, order_id: &str) -> bool {
        let mut orders = self.orders();
        let Some(tracked) = orders.get_mut(order_id) else {
            return false;
        };
        if let Some(task) = tracked.task.take() {
            task.abort();
        }
        tracked.order.status = BatchStatus::Cancelled;
        info!(order_id, "Batch order cancelled");
        true
    }

    /// Forget finished orders created more than `max_age` ago. Returns how many were dropped.
    pub fn cleanup(&self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut orders = self.orders();
        let before = orders.len();
        orders.retain(|_, t| !(t.order.status.is_finished() && t.order.created_at < cutoff));
        before - orders.len()
    }
}

impl Drop for BatchOrders {
    fn drop(&mut self) {
        for tracked in lock(&self.orders).values_mut() {
            if let Some(task) = tracked.task.take() {
                task.abort();
            }
        }
    }
}

fn new_order_id(session: &SessionId) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("batch_{}_{}", session, &suffix[..8])
}

async fn run_search(ordering: Arc<OrderingClient>, orders: Registry, order_id: String, delay: Duration) {
    let order = lock(&orders)
        .get(&order_id)
        .map(|t| (t.order.restaurant_query.clone(), t.order.session_id.clone()));
    let Some((query, session)) = order else {
        return;
    };
    if !transition(&orders, &order_id, BatchStatus::Searching, None) {
        return;
    }

    let started = ordering.find_menu_options(&query, &session).await;
    let search_id = started
        .data
        .as_ref()
        .and_then(|data| data.field("search_id"))
        .and_then(Value::as_str)
        .map(str::to_owned);
    let Some(search_id) = search_id.filter(|_| started.success) else {
        warn!(order_id = %order_id, error = ?started.error, "Batch search did not start");
        transition(&orders, &order_id, BatchStatus::SearchFailed, serde_json::to_value(&started).ok());
        return;
    };
    if !transition(
        &orders,
        &order_id,
        BatchStatus::SearchStarted,
        serde_json::to_value(&started.data).ok(),
    ) {
        return;
    }

    tokio::time::sleep(delay).await;

    let results = ordering.search_results(&search_id).await;
    if results.success {
        info!(order_id = %order_id, search_id = %search_id, "Batch order ready to order");
        transition(
            &orders,
            &order_id,
            BatchStatus::ReadyToOrder,
            serde_json::to_value(&results.data).ok(),
        );
    } else {
        warn!(order_id = %order_id, error = ?results.error, "Batch search results unavailable");
        transition(&orders, &order_id, BatchStatus::SearchFailed, None);
    }
}

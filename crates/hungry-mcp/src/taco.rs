//! Restaurant queries against the fast database worker.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use hungry_core::{DomainResponse, ResponseData, ResponseSource, ResponseStatus, SessionId};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::client::McpClient;
use crate::config::CallClass;
use crate::error::McpError;
use crate::fallback::StaticFallback;
use crate::guard::guarded_call;
use crate::tool::tool_text;

/// Query operations exposed by [`TacoSearch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueryOperation {
    Search,
    Details,
    TopRated,
    Area,
}

impl QueryOperation {
    pub const ALL: [QueryOperation; 4] = [Self::Search, Self::Details, Self::TopRated, Self::Area];

    /// Worker tool implementing this operation.
    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::Search => "search_tacos",
            Self::Details => "get_restaurant_details",
            Self::TopRated => "get_top_rated_tacos",
            Self::Area => "search_by_area",
        }
    }

    fn failure_context(&self) -> &'static str {
        match self {
            Self::Search => "Error calling taco search",
            Self::Details => "Error getting restaurant details",
            Self::TopRated => "Error getting top-rated tacos",
            Self::Area => "Error searching by area",
        }
    }
}

impl std::fmt::Display for QueryOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tool_name())
    }
}

/// Which operations go through the circuit breaker and fallback.
///
/// Unguarded operations report worker failures as a failed
/// [`DomainResponse`] instead of substituting offline content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardPolicy {
    guarded: BTreeSet<QueryOperation>,
}

impl GuardPolicy {
    /// Only keyword search is guarded.
    pub fn search_only() -> Self {
        Self::none().with(QueryOperation::Search)
    }

    pub fn all() -> Self {
        Self {
            guarded: QueryOperation::ALL.into_iter().collect(),
        }
    }

    pub fn none() -> Self {
        Self {
            guarded: BTreeSet::new(),
        }
    }

    pub fn with(mut self, operation: QueryOperation) -> Self {
        self.guarded.insert(operation);
        self
    }

    pub fn without(mut self, operation: QueryOperation) -> Self {
        self.guarded.remove(&operation);
        self
    }

    pub fn is_guarded(&self, operation: QueryOperation) -> bool {
        self.guarded.contains(&operation)
    }
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self::search_only()
    }
}

/// Keyword, detail, top-rated and area queries.
///
/// Every method returns a [`DomainResponse`]; worker errors never escape.
pub struct TacoSearch {
    client: Arc<McpClient>,
    breaker: CircuitBreaker,
    fallback: StaticFallback,
    policy: GuardPolicy,
}

impl TacoSearch {
    pub fn new(client: Arc<McpClient>) -> Self {
        Self {
            client,
            breaker: CircuitBreaker::default(),
            fallback: StaticFallback::new(),
            policy: GuardPolicy::default(),
        }
    }

    pub fn with_breaker(mut self, config: BreakerConfig) -> Self {
        self.breaker = CircuitBreaker::new(config);
        self
    }

    pub fn with_policy(mut self, policy: GuardPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn client(&self) -> &Arc<McpClient> {
        &self.client
    }

    pub async fn search_tacos(&self, query: &str, limit: u32, session: &SessionId) -> DomainResponse {
        let op = QueryOperation::Search;
        self.run(
            op,
            session,
            move || async move {
                let text = self.call_tool(op, json!({ "query": query, "limit": limit })).await?;
                let data = ResponseData::new(text, ResponseStatus::SearchCompleted, ResponseSource::FastDatabase)
                    .with_field("search_term", query);
                Ok(DomainResponse::ok(session.clone(), data))
            },
            || self.fallback.search(query, limit as usize, session),
        )
        .await
    }

    pub async fn restaurant_details(&self, restaurant_name: &str, session: &SessionId) -> DomainResponse {
        let op = QueryOperation::Details;
        self.run(
            op,
            session,
            move || async move {
                let text = self
                    .call_tool(op, json!({ "restaurant_name": restaurant_name }))
                    .await?;
                let data = ResponseData::new(text, ResponseStatus::DetailsRetrieved, ResponseSource::FastDatabase)
                    .with_field("restaurant_name", restaurant_name);
                Ok(DomainResponse::ok(session.clone(), data))
            },
            || self.fallback.restaurant_details(restaurant_name, session),
        )
        .await
    }

    pub async fn top_rated(&self, limit: u32, session: &SessionId) -> DomainResponse {
        let op = QueryOperation::TopRated;
        self.run(
            op,
            session,
            move || async move {
                let text = self.call_tool(op, json!({ "limit": limit })).await?;
                let data = ResponseData::new(text, ResponseStatus::TopRatedRetrieved, ResponseSource::FastDatabase);
                Ok(DomainResponse::ok(session.clone(), data))
            },
            || self.fallback.top_rated(limit as usize, session),
        )
        .await
    }

    pub async fn search_by_area(&self, area: &str, limit: u32, session: &SessionId) -> DomainResponse {
        let op = QueryOperation::Area;
        self.run(
            op,
            session,
            move || async move {
                let text = self.call_tool(op, json!({ "area": area, "limit": limit })).await?;
                let data = ResponseData::new(text, ResponseStatus::AreaSearchCompleted, ResponseSource::FastDatabase)
                    .with_field("area", area);
                Ok(DomainResponse::ok(session.clone(), data))
            },
            || self.fallback.search_by_area(area, limit as usize, session),
        )
        .await
    }

    /// True if a one-result search is answered by the worker itself.
    pub async fn health_check(&self) -> bool {
        let response = self
            .search_tacos("test", 1, &SessionId::new("health_check"))
            .await;
        let healthy = response.success && !response.is_fallback();
        debug!(healthy, "Taco search health check");
        healthy
    }

    async fn call_tool(&self, op: QueryOperation, arguments: Value) -> Result<String, McpError> {
        let result = self.client.call_tool(op.tool_name(), arguments, CallClass::Fast).await?;
        tool_text(&result)
    }

    async fn run<P, Fut, Fb>(
        &self,
        op: QueryOperation,
        session: &SessionId,
        primary: P,
        fallback: Fb,
    ) -> DomainResponse
    where
        P: FnOnce() -> Fut,
        Fut: Future<Output = Result<DomainResponse, McpError>>,
        Fb: FnOnce() -> DomainResponse,
    {
        if self.policy.is_guarded(op) {
            return guarded_call(&self.breaker, op.tool_name(), primary, fallback).await;
        }
        match primary().await {
            Ok(response) => response,
            Err(e) => {
                warn!(operation = %op, error = %e, "Query failed");
                DomainResponse::failed(session.clone(), format!("{}: {}", op.failure_context(), e))
            }
        }
    }
}

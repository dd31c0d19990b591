//! Typed access to the Gamma markets API.
//!
//! Gamma encodes several list fields (outcomes, prices, token ids) as JSON
//! strings inside the JSON record, and ids arrive as either numbers or
//! strings. `Market` keeps the raw fields and decodes them on demand.

use crate::client::QueryClient;
use crate::cache::Params;
use crate::http::RequestDescriptor;
use crate::pagination::PaginatedBinding;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub condition_id: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// JSON-encoded string like `"[\"Yes\",\"No\"]"`
    #[serde(default)]
    pub outcomes: Option<String>,
    #[serde(default)]
    pub outcome_prices: Option<String>,
    #[serde(default)]
    pub clob_token_ids: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub volume_num: Option<f64>,
    #[serde(default)]
    pub liquidity_num: Option<f64>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub closed: Option<bool>,
    #[serde(default)]
    pub accepting_orders: Option<bool>,
    #[serde(default)]
    pub neg_risk: Option<bool>,
}

impl Market {
    /// The id as a string, whichever form the API used.
    pub fn market_id(&self) -> String {
        match &self.id {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            _ => String::new(),
        }
    }

    pub fn outcomes(&self) -> Vec<String> {
        decode_list(self.outcomes.as_deref())
    }

    pub fn clob_token_ids(&self) -> Vec<String> {
        decode_list(self.clob_token_ids.as_deref())
    }

    /// Prices in outcome order. Unparseable entries are dropped.
    pub fn outcome_prices(&self) -> Vec<f64> {
        decode_list::<String>(self.outcome_prices.as_deref())
            .iter()
            .filter_map(|p| p.parse().ok())
            .collect()
    }

    pub fn is_tradable(&self) -> bool {
        self.active.unwrap_or(false) && !self.closed.unwrap_or(false) && self.accepting_orders.unwrap_or(false)
    }
}

fn decode_list<T: serde::de::DeserializeOwned>(raw: Option<&str>) -> Vec<T> {
    raw.and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default()
}

/// Query filters for `/markets`. Unset fields are left off the request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketFilter {
    pub active: Option<bool>,
    pub closed: Option<bool>,
    pub tag_id: Option<u64>,
    pub slug: Option<String>,
    pub order: Option<String>,
    pub ascending: Option<bool>,
}

impl MarketFilter {
    /// Open markets only.
    pub fn open() -> Self {
        Self {
            active: Some(true),
            closed: Some(false),
            ..Self::default()
        }
    }

    pub fn order_by(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.order = Some(field.into());
        self.ascending = Some(ascending);
        self
    }

    pub fn params(&self) -> Params {
        Params::new()
            .with("active", self.active)
            .with("closed", self.closed)
            .with("tag_id", self.tag_id)
            .with("slug", self.slug.as_deref())
            .with("order", self.order.as_deref())
            .with("ascending", self.ascending)
    }
}

/// `GET /markets/{id}`, cached.
pub fn market_query(client: &QueryClient, id: impl std::fmt::Display) -> RequestDescriptor {
    client.query(format!("/markets/{id}"))
}

/// `GET /markets` with `filter` applied, cached.
pub fn markets_query(client: &QueryClient, filter: &MarketFilter) -> RequestDescriptor {
    client.query("/markets").params(filter.params())
}

/// Offset-paginated `/markets`. A page shorter than `page_size` is the last.
pub fn markets_pages(
    client: &QueryClient,
    filter: &MarketFilter,
    page_size: usize,
) -> PaginatedBinding<Vec<Market>> {
    let base = markets_query(client, filter).param("limit", page_size);
    PaginatedBinding::with_cursor(client.clone(), base, "offset", 0, move |page: &Vec<Market>, offset: &Value| {
        if page.is_empty() || page.len() < page_size {
            return None;
        }
        let offset = offset.as_u64().unwrap_or(0);
        Some(Value::from(offset + page.len() as u64))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use crate::http::mock::{MockReply, MockTransport};
    use serde_json::json;
    use std::sync::Arc;

    fn raw_market(id: u64) -> Value {
        json!({
            "id": id.to_string(),
            "conditionId": format!("0x{id:02x}"),
            "question": format!("Market {id}?"),
            "outcomes": "[\"Yes\",\"No\"]",
            "outcomePrices": "[\"0.62\",\"0.38\"]",
            "clobTokenIds": "[\"111\",\"222\"]",
            "active": true,
            "closed": false,
            "acceptingOrders": true
        })
    }

    #[test]
    fn test_stringified_lists() {
        let market: Market = serde_json::from_value(raw_market(7)).unwrap();
        assert_eq!(market.market_id(), "7");
        assert_eq!(market.outcomes(), vec!["Yes", "No"]);
        assert_eq!(market.clob_token_ids(), vec!["111", "222"]);
        assert_eq!(market.outcome_prices(), vec![0.62, 0.38]);
        assert!(market.is_tradable());
    }

    #[test]
    fn test_missing_fields_default() {
        let market: Market = serde_json::from_value(json!({"id": 12, "outcomes": "not json"})).unwrap();
        assert_eq!(market.market_id(), "12");
        assert!(market.outcomes().is_empty());
        assert!(market.question.is_none());
        assert!(!market.is_tradable());
    }

    #[test]
    fn test_filter_params_skip_unset() {
        let params = MarketFilter::open().order_by("volumeNum", false).params();
        assert_eq!(params.len(), 4);
        assert_eq!(params.get("active"), Some(&json!(true)));
        assert_eq!(params.get("order"), Some(&json!("volumeNum")));
        assert!(params.get("slug").is_none());
    }

    #[test]
    fn test_query_descriptors() {
        let client = QueryClient::with_transport(ApiConfig::default(), Arc::new(MockTransport::new()));
        let one = market_query(&client, 7);
        assert_eq!(one.key().as_str(), "/markets/7");
        assert!(one.use_cache);

        let many = markets_query(&client, &MarketFilter::open());
        assert_eq!(many.key().as_str(), r#"/markets?{"active":true,"closed":false}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offset_pages() {
        let mock = MockTransport::new();
        mock.on("/markets", MockReply::json(200, json!([raw_market(1), raw_market(2)])))
            .on("/markets", MockReply::json(200, json!([raw_market(3)])));
        let client = QueryClient::with_transport(ApiConfig::default(), Arc::new(mock.clone()));

        let pages = markets_pages(&client, &MarketFilter::open(), 2);
        assert!(pages.fetch_next().await);
        assert!(pages.state().has_more);
        assert!(pages.fetch_next().await);

        let state = pages.state();
        assert!(!state.has_more);
        let ids: Vec<String> = state.pages.iter().flatten().map(Market::market_id).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);

        let offsets: Vec<String> = mock
            .recorded()
            .iter()
            .flat_map(|c| c.request.query.clone())
            .filter(|(k, _)| k == "offset")
            .map(|(_, v)| v)
            .collect();
        assert_eq!(offsets, vec!["0", "2"]);
    }
}

use serde::Deserialize;
use serde_json::Value;

use crate::client::ApiClient;

/// 选股池分页结果。行结构较宽（价格、成交量、自选/观察标记等），
/// 控制台只做展示，保留原始 JSON。
#[derive(Debug, Deserialize)]
pub struct StockPage {
    pub total: i64,
    pub items: Vec<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct StockQuery {
    pub ts_code: Option<String>,
    pub buy_date_start: Option<String>,
    pub buy_date_end: Option<String>,
    pub gold_date_start: Option<String>,
    pub gold_date_end: Option<String>,
    pub execute_id: Option<String>,
    pub page: i64,
    pub page_size: i64,
}

impl StockQuery {
    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(v) = &self.ts_code {
            query.push(("ts_code", v.clone()));
        }
        if let Some(v) = &self.buy_date_start {
            query.push(("buy_date_start", v.clone()));
        }
        if let Some(v) = &self.buy_date_end {
            query.push(("buy_date_end", v.clone()));
        }
        if let Some(v) = &self.gold_date_start {
            query.push(("gold_date_start", v.clone()));
        }
        if let Some(v) = &self.gold_date_end {
            query.push(("gold_date_end", v.clone()));
        }
        if let Some(v) = &self.execute_id {
            query.push(("execute_id", v.clone()));
        }
        query.push(("page", self.page.max(1).to_string()));
        query.push(("page_size", self.page_size.max(1).to_string()));
        query
    }
}

#[derive(Debug, Deserialize)]
struct ItemsResponse {
    items: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToggleResponse {
    pub success: bool,
    #[serde(default)]
    pub is_favorite: Option<i64>,
    #[serde(default)]
    pub is_observation: Option<i64>,
}

pub async fn query_stock_selected(
    client: &ApiClient,
    query: &StockQuery,
) -> Result<StockPage, String> {
    client
        .get_json("/api/query/stock_selected", &query.query())
        .await
}

/// 所有选股批次号（execute_id），倒序。
pub async fn execute_dates(client: &ApiClient) -> Result<Vec<String>, String> {
    let resp: ItemsResponse = client.get_json("/api/manage/execute_dates", &[]).await?;
    Ok(resp.items)
}

/// 按批次 / 日期 / 时间删除选股记录。
pub async fn delete_stock_selected(
    client: &ApiClient,
    execute_id: Option<&str>,
    execute_date: Option<&str>,
    execute_time: Option<&str>,
) -> Result<Value, String> {
    let mut query: Vec<(&str, String)> = Vec::new();
    if let Some(v) = execute_id {
        query.push(("execute_id", v.to_string()));
    }
    if let Some(v) = execute_date {
        query.push(("execute_date", v.to_string()));
    }
    if let Some(v) = execute_time {
        query.push(("execute_time", v.to_string()));
    }
    client.delete_json("/api/manage/stock_selected", &query).await
}

pub async fn toggle_favorite(
    client: &ApiClient,
    ts_code: &str,
    execute_id: &str,
) -> Result<ToggleResponse, String> {
    let body = serde_json::json!({ "ts_code": ts_code, "execute_id": execute_id });
    client.post_json("/api/stock/toggle_favorite", Some(&body)).await
}

pub async fn toggle_observation(
    client: &ApiClient,
    ts_code: &str,
    execute_id: &str,
) -> Result<ToggleResponse, String> {
    let body = serde_json::json!({ "ts_code": ts_code, "execute_id": execute_id });
    client
        .post_json("/api/stock/toggle_observation", Some(&body))
        .await
}

pub async fn favorite_list(
    client: &ApiClient,
    page: i64,
    page_size: i64,
) -> Result<StockPage, String> {
    let query = page_query(page, page_size);
    client.get_json("/api/stock/favorite_list", &query).await
}

pub async fn observation_list(
    client: &ApiClient,
    page: i64,
    page_size: i64,
) -> Result<StockPage, String> {
    let query = page_query(page, page_size);
    client.get_json("/api/stock/observation_list", &query).await
}

fn page_query(page: i64, page_size: i64) -> Vec<(&'static str, String)> {
    vec![
        ("page", page.max(1).to_string()),
        ("page_size", page_size.max(1).to_string()),
    ]
}

use serde::Deserialize;
use serde_json::Value;

use crate::client::ApiClient;
use crate::reconcile::MonthlyDbCount;

#[derive(Debug, Deserialize)]
struct MonthlyCountsResponse {
    items: Vec<MonthlyDbCount>,
}

/// 按月统计数据库条目数。后端按年月倒序返回。
pub async fn monthly_counts(
    client: &ApiClient,
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> Result<Vec<MonthlyDbCount>, String> {
    let mut query: Vec<(&str, String)> = Vec::new();
    if let Some(s) = start_date {
        query.push(("start_date", s.to_string()));
    }
    if let Some(e) = end_date {
        query.push(("end_date", e.to_string()));
    }
    let resp: MonthlyCountsResponse = client.get_json("/api/stats/monthly_counts", &query).await?;
    Ok(resp.items)
}

/// 首页概览统计，结构随后端演进，原样透传。
pub async fn overview(client: &ApiClient) -> Result<Value, String> {
    client.get_json("/api/stats/overview", &[]).await
}

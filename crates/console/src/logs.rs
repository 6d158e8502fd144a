use serde::{Deserialize, Serialize};

use crate::client::ApiClient;

/// task_logs 表中的一条执行记录。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskLogItem {
    #[serde(default)]
    pub task_name: Option<String>,
    pub execute_time: Option<String>,
    pub status: String,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemsResponse {
    items: Vec<TaskLogItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogFilters {
    pub task_names: Vec<String>,
    pub dates: Vec<String>,
    pub statuses: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteLogsResponse {
    pub success: bool,
    pub deleted_count: i64,
    pub total_count: i64,
}

/// 日志列表 / 删除共用的筛选条件。
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub task_name: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

impl LogFilter {
    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(v) = &self.task_name {
            query.push(("task_name", v.clone()));
        }
        if let Some(v) = &self.start_date {
            query.push(("start_date", v.clone()));
        }
        if let Some(v) = &self.end_date {
            query.push(("end_date", v.clone()));
        }
        if let Some(v) = &self.status {
            query.push(("status", v.clone()));
        }
        if let Some(v) = self.limit {
            query.push(("limit", v.to_string()));
        }
        query
    }
}

/// 某个任务最近的抽取历史（已结束的记录，不含 RUNNING）。
pub async fn recent_logs(
    client: &ApiClient,
    task_name: &str,
    limit: i64,
) -> Result<Vec<TaskLogItem>, String> {
    let query = vec![
        ("task_name", task_name.to_string()),
        ("limit", limit.to_string()),
    ];
    let resp: ItemsResponse = client.get_json("/api/logs", &query).await?;
    Ok(resp.items)
}

pub async fn list_logs(client: &ApiClient, filter: &LogFilter) -> Result<Vec<TaskLogItem>, String> {
    let resp: ItemsResponse = client.get_json("/api/logs/list", &filter.query()).await?;
    Ok(resp.items)
}

pub async fn log_filters(client: &ApiClient) -> Result<LogFilters, String> {
    client.get_json("/api/logs/filters", &[]).await
}

pub async fn delete_logs(
    client: &ApiClient,
    filter: &LogFilter,
) -> Result<DeleteLogsResponse, String> {
    client.delete_json("/api/logs", &filter.query()).await
}

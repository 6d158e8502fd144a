use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::config::ConfigStore;
use crate::runner::TaskType;

/// 与后端通信的 HTTP 客户端。会话基于 Cookie（后端使用 SessionMiddleware），
/// 登录一次后由内置 cookie store 维持。
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct LoginResponse {
    pub ok: bool,
    pub username: String,
    pub name: Option<String>,
    pub role: String,
    /// 会话实际走 Cookie，token 仅为兼容字段
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MeResponse {
    pub authenticated: bool,
    pub username: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TerminateResponse {
    pub ok: bool,
    pub message: Option<String>,
    #[serde(default)]
    pub terminated_count: i64,
}

impl ApiClient {
    pub fn new(config: &ConfigStore) -> Result<Self, String> {
        let base_url = config.api_base_url().trim_end_matches('/').to_string();
        let timeout_seconds = config.get_i64("request_timeout_seconds", 30).max(1) as u64;

        // 注意：不能在 builder 上设置整体超时，流式任务会被它截断；
        // 普通 JSON 请求在发起时单独设置超时。
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("quantum-stock-console/0.1")
            .build()
            .map_err(|e| e.to_string())?;

        Ok(Self {
            http,
            base_url,
            request_timeout: Duration::from_secs(timeout_seconds),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, String> {
        self.post_json(
            "/api/auth/login",
            Some(&serde_json::json!({ "username": username, "password": password })),
        )
        .await
    }

    pub async fn logout(&self) -> Result<(), String> {
        let _: Value = self.post_json::<Value, Value>("/api/auth/logout", None).await?;
        Ok(())
    }

    pub async fn me(&self) -> Result<MeResponse, String> {
        self.get_json("/api/auth/me", &[]).await
    }

    /// 终止指定类型任务的所有后端进程（尽力而为）。
    pub async fn terminate(&self, task_type: TaskType) -> Result<TerminateResponse, String> {
        self.post_json(
            "/api/process/terminate",
            Some(&serde_json::json!({ "task_type": task_type.as_str() })),
        )
        .await
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, String> {
        let resp = self
            .http
            .get(self.url(path))
            .query(query)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        parse_json(resp).await
    }

    pub(crate) async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, String> {
        let mut req = self.http.post(self.url(path)).timeout(self.request_timeout);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await.map_err(|e| e.to_string())?;
        parse_json(resp).await
    }

    pub(crate) async fn put_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, String> {
        let resp = self
            .http
            .put(self.url(path))
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        parse_json(resp).await
    }

    pub(crate) async fn delete_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, String> {
        let resp = self
            .http
            .delete(self.url(path))
            .query(query)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        parse_json(resp).await
    }
}

/// 非 2xx 时优先取后端的 `detail` 字段作为错误信息。
async fn parse_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, String> {
    let status = resp.status();
    let bytes = resp.bytes().await.map_err(|e| e.to_string())?;
    if !status.is_success() {
        if let Ok(value) = serde_json::from_slice::<Value>(&bytes)
            && let Some(detail) = value.get("detail").and_then(|d| d.as_str())
        {
            return Err(detail.to_string());
        }
        return Err(format!("后端返回状态 {status}"));
    }
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}

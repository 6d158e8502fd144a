use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::ApiClient;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserItem {
    pub username: String,
    pub name: Option<String>,
    pub role: String,
    pub created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemsResponse {
    items: Vec<UserItem>,
}

#[derive(Debug, Serialize)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

pub async fn list_users(client: &ApiClient) -> Result<Vec<UserItem>, String> {
    let resp: ItemsResponse = client.get_json("/api/users", &[]).await?;
    Ok(resp.items)
}

pub async fn create_user(client: &ApiClient, user: &NewUser) -> Result<(), String> {
    let _: Value = client.post_json("/api/users", Some(user)).await?;
    Ok(())
}

pub async fn update_user(
    client: &ApiClient,
    username: &str,
    name: Option<&str>,
    role: Option<&str>,
) -> Result<(), String> {
    if name.is_none() && role.is_none() {
        return Err("没有需要更新的字段".to_string());
    }
    let mut body = serde_json::Map::new();
    body.insert("username".into(), Value::String(username.to_string()));
    if let Some(name) = name {
        body.insert("name".into(), Value::String(name.to_string()));
    }
    if let Some(role) = role {
        body.insert("role".into(), Value::String(role.to_string()));
    }
    let _: Value = client.put_json("/api/users", &Value::Object(body)).await?;
    Ok(())
}

pub async fn set_password(client: &ApiClient, username: &str, password: &str) -> Result<(), String> {
    let body = serde_json::json!({ "username": username, "password": password });
    let _: Value = client.put_json("/api/users/password", &body).await?;
    Ok(())
}

pub async fn delete_user(client: &ApiClient, username: &str) -> Result<(), String> {
    let _: Value = client
        .delete_json(&format!("/api/users/{username}"), &[])
        .await?;
    Ok(())
}

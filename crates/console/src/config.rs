use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use serde_json::Value;

#[derive(Clone)]
pub struct ConfigStore {
    path: PathBuf,
    data: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl ConfigStore {
    pub fn load() -> Self {
        let path = detect_config_path();
        let mut data = default_config();

        if path.exists()
            && let Ok(bytes) = fs::read(&path)
            && let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(&bytes)
        {
            for (k, v) in map {
                data.insert(k, v);
            }
        }

        // 环境变量覆盖（与前端 NEXT_PUBLIC_API_URL 的行为保持一致）
        if let Ok(url) = std::env::var("QS_API_URL") {
            data.insert("api_base_url".into(), Value::String(url));
        }
        if let Ok(username) = std::env::var("QS_USERNAME") {
            data.insert("username".into(), Value::String(username));
        }
        if let Ok(password) = std::env::var("QS_PASSWORD") {
            data.insert("password".into(), Value::String(password));
        }
        if let Ok(debug) = std::env::var("DEBUG") {
            data.insert("debug".into(), Value::Bool(debug.to_lowercase() == "true"));
        }

        Self {
            path,
            data: Arc::new(RwLock::new(data)),
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        let guard = self.data.read().expect("config read lock");
        match guard.get(key) {
            Some(Value::Bool(v)) => *v,
            Some(Value::Number(n)) => n.as_i64().unwrap_or_default() != 0,
            _ => default,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        let guard = self.data.read().expect("config read lock");
        match guard.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        let guard = self.data.read().expect("config read lock");
        match guard.get(key) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
            Some(Value::String(s)) => s.parse::<i64>().unwrap_or(default),
            Some(Value::Bool(b)) => {
                if *b {
                    1
                } else {
                    0
                }
            }
            _ => default,
        }
    }

    pub fn set_bool(&self, key: &str, value: bool) {
        let mut guard = self.data.write().expect("config write lock");
        guard.insert(key.to_string(), Value::Bool(value));
    }

    pub fn set_string(&self, key: &str, value: Option<String>) {
        let mut guard = self.data.write().expect("config write lock");
        match value {
            None => {
                guard.insert(key.to_string(), Value::Null);
            }
            Some(v) => {
                guard.insert(key.to_string(), Value::String(v));
            }
        }
    }

    pub fn save(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let guard = self.data.read().expect("config read lock");
        let json = serde_json::to_vec_pretty(&*guard).expect("serialize config");
        fs::write(&self.path, json)
    }

    pub fn api_base_url(&self) -> String {
        self.get_string("api_base_url")
            .unwrap_or_else(|| "http://localhost:8000".to_string())
    }

    pub fn username(&self) -> String {
        self.get_string("username").unwrap_or_else(|| "admin".to_string())
    }

    pub fn password(&self) -> String {
        self.get_string("password").unwrap_or_else(|| "admin".to_string())
    }

    pub fn debug(&self) -> bool {
        self.get_bool("debug", false)
    }
}

fn default_config() -> BTreeMap<String, Value> {
    let mut m = BTreeMap::new();
    m.insert(
        "api_base_url".into(),
        Value::String("http://localhost:8000".into()),
    );
    m.insert("username".into(), Value::String("admin".into()));
    m.insert("password".into(), Value::String("admin".into()));
    m.insert(
        "request_timeout_seconds".into(),
        Value::Number(30.into()),
    );
    m.insert("debug".into(), Value::Bool(false));
    m
}

fn detect_config_path() -> PathBuf {
    if let Ok(dir) = std::env::var("QS_CONFIG_DIR") {
        let dir = Path::new(&dir);
        return dir.join("console.json");
    }
    PathBuf::from("console.json")
}

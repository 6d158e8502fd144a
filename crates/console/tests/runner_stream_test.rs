use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    http::StatusCode,
    routing::{get, post},
};
use bytes::Bytes;
use futures::stream;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use console::client::ApiClient;
use console::config::ConfigStore;
use console::runner::{
    CANCELLED_MARKER, COMPLETION_MARKER, DateRange, RunStatus, StreamingTaskRunner, TaskType,
};

const NAMES_OUTPUT: &str = "正在更新股票名称\n已更新 5000 条\n[执行完成，返回码: 0]\n";

async fn client_for(app: Router) -> ApiClient {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    let config = ConfigStore::load();
    config.set_string("api_base_url", Some(format!("http://{addr}")));
    ApiClient::new(&config).expect("client")
}

fn chunked(parts: Vec<&'static [u8]>) -> Body {
    let items: Vec<Result<Bytes, std::io::Error>> = parts
        .into_iter()
        .map(|p| Ok(Bytes::from_static(p)))
        .collect();
    Body::from_stream(stream::iter(items))
}

#[tokio::test]
async fn names_update_reassembles_chunks_and_succeeds_on_marker() {
    // 在多字节字符中间切分，解码器必须跨块重组
    let bytes = NAMES_OUTPUT.as_bytes();
    let app = Router::new().route(
        "/api/tasks/update_names",
        post(move || async move { chunked(vec![&bytes[..4], &bytes[4..13], &bytes[13..]]) }),
    );
    let client = client_for(app).await;

    let runner = StreamingTaskRunner::new(client);
    let run = runner.start(TaskType::NamesUpdate, None).wait().await;

    assert_eq!(run.status, RunStatus::Success);
    assert!(run.error.is_none());
    assert!(run.transcript.contains("正在更新股票名称"));
    assert!(run.transcript.contains("已更新 5000 条"));
    assert!(run.transcript.ends_with(&format!("{COMPLETION_MARKER}\n")));
}

#[tokio::test]
async fn refresh_hook_fires_exactly_on_success() {
    let bytes = NAMES_OUTPUT.as_bytes();
    let app = Router::new().route(
        "/api/tasks/update_names",
        post(move || async move { chunked(vec![bytes]) }),
    );
    let client = client_for(app).await;

    let fired = Arc::new(AtomicBool::new(false));
    let flag = fired.clone();
    let runner = StreamingTaskRunner::new(client);
    let run = runner
        .start_with_refresh(
            TaskType::NamesUpdate,
            None,
            Some(Box::new(move || flag.store(true, Ordering::SeqCst))),
        )
        .wait()
        .await;

    assert_eq!(run.status, RunStatus::Success);
    assert!(fired.load(Ordering::SeqCst));
}

#[tokio::test]
async fn stream_end_without_marker_is_failure_and_skips_hook() {
    let app = Router::new().route(
        "/api/tasks/update_names",
        post(|| async { chunked(vec!["正在更新股票名称\n".as_bytes(), "中途断流\n".as_bytes()]) }),
    );
    let client = client_for(app).await;

    let fired = Arc::new(AtomicBool::new(false));
    let flag = fired.clone();
    let runner = StreamingTaskRunner::new(client);
    let run = runner
        .start_with_refresh(
            TaskType::NamesUpdate,
            None,
            Some(Box::new(move || flag.store(true, Ordering::SeqCst))),
        )
        .wait()
        .await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.as_deref(), Some("执行失败"));
    assert!(!fired.load(Ordering::SeqCst));
}

#[tokio::test]
async fn marker_in_unterminated_tail_still_counts() {
    // 最后一块没有换行，完成标记只存在于解码器的待决缓冲里
    let app = Router::new().route(
        "/api/tasks/update_names",
        post(|| async { chunked(vec![b"ok\n".as_slice(), "[执行完成，返回码: 0]".as_bytes()]) }),
    );
    let client = client_for(app).await;

    let runner = StreamingTaskRunner::new(client);
    let run = runner.start(TaskType::NamesUpdate, None).wait().await;

    assert_eq!(run.status, RunStatus::Success);
    assert!(run.transcript.contains(COMPLETION_MARKER));
}

#[tokio::test]
async fn daily_update_posts_date_range_body() {
    let bodies: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = bodies.clone();
    let app = Router::new().route(
        "/api/tasks/update_daily",
        post(move |Json(body): Json<Value>| {
            let recorded = recorded.clone();
            async move {
                recorded.lock().expect("lock").push(body);
                chunked(vec!["[执行完成，返回码: 0]\n".as_bytes()])
            }
        }),
    );
    let client = client_for(app).await;

    let runner = StreamingTaskRunner::new(client);
    let run = runner
        .start(
            TaskType::DailyUpdate,
            Some(DateRange {
                start_date: "2024-01-01".to_string(),
                end_date: "2024-01-31".to_string(),
            }),
        )
        .wait()
        .await;

    assert_eq!(run.status, RunStatus::Success);
    let bodies = bodies.lock().expect("lock");
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["start_date"], json!("2024-01-01"));
    assert_eq!(bodies[0]["end_date"], json!("2024-01-31"));
}

#[tokio::test]
async fn daily_update_without_range_fails_before_any_request() {
    let app = Router::new();
    let client = client_for(app).await;

    let runner = StreamingTaskRunner::new(client);
    let run = runner.start(TaskType::DailyUpdate, None).wait().await;

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.as_deref().expect("error").contains("日期范围"));
    assert!(run.transcript.contains("[错误]"));
}

#[tokio::test]
async fn non_success_status_fails_the_run() {
    let app = Router::new().route(
        "/api/tasks/update_names",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let client = client_for(app).await;

    let runner = StreamingTaskRunner::new(client);
    let run = runner.start(TaskType::NamesUpdate, None).wait().await;

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.as_deref().expect("error").contains("后端返回状态"));
}

#[tokio::test]
async fn cancel_wins_over_buffered_completion_marker() {
    // 完成标记先到，流保持打开；取消必须压过已缓冲数据里的成功标记
    let slow = || async {
        let s = stream::unfold(0u32, |n| async move {
            if n == 0 {
                return Some((
                    Ok::<_, std::io::Error>(Bytes::from_static(
                        "[执行完成，返回码: 0]\n".as_bytes(),
                    )),
                    n + 1,
                ));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            Some((Ok(Bytes::from_static(b"tick\n")), n + 1))
        });
        Body::from_stream(s)
    };

    let app = Router::new()
        .route("/api/tasks/update_names", post(slow))
        .route(
            "/api/process/terminate",
            post(|| async { Json(json!({ "ok": true, "terminated_count": 1 })) }),
        );
    let client = client_for(app).await;

    let runner = StreamingTaskRunner::new(client);
    let handle = runner.start(TaskType::NamesUpdate, None);

    // 等完成标记进入执行记录后再取消
    let mut rx = handle.transcript();
    while !rx.borrow().contains(COMPLETION_MARKER) {
        rx.changed().await.expect("transcript channel");
    }
    handle.cancel();

    let run = handle.wait().await;
    assert_eq!(run.status, RunStatus::Cancelled);
    assert!(run.error.is_none());
    assert!(run.transcript.ends_with(&format!("{CANCELLED_MARKER}\n")));
}

#[tokio::test]
async fn cancel_after_natural_success_is_a_noop() {
    let bytes = NAMES_OUTPUT.as_bytes();
    let app = Router::new()
        .route(
            "/api/tasks/update_names",
            post(move || async move { chunked(vec![bytes]) }),
        )
        .route(
            "/api/process/terminate",
            post(|| async { Json(json!({ "ok": true, "terminated_count": 0 })) }),
        );
    let client = client_for(app).await;

    let runner = StreamingTaskRunner::new(client);
    let handle = runner.start(TaskType::NamesUpdate, None);
    let canceller = handle.canceller();

    let run = handle.wait().await;
    assert_eq!(run.status, RunStatus::Success);

    canceller.cancel();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // 已终结的结果不受事后取消影响
    assert_eq!(run.status, RunStatus::Success);
    assert!(run.error.is_none());
    assert!(!run.transcript.contains(CANCELLED_MARKER));
    assert!(run.transcript.ends_with(&format!("{COMPLETION_MARKER}\n")));
}

#[tokio::test]
async fn cancel_stops_stream_and_terminates_backend_once() {
    let terminated: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let slow = || async {
        let s = stream::unfold(0u32, |n| async move {
            if n == 0 {
                return Some((
                    Ok::<_, std::io::Error>(Bytes::from_static(
                        "2024-01-05 成功，共 120 条记录\n".as_bytes(),
                    )),
                    n + 1,
                ));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            Some((Ok(Bytes::from_static(b"tick\n")), n + 1))
        });
        Body::from_stream(s)
    };

    let recorded = terminated.clone();
    let app = Router::new()
        .route("/api/stats/tushare_verify", get(slow))
        .route(
            "/api/process/terminate",
            post(move |Json(body): Json<Value>| {
                let recorded = recorded.clone();
                async move {
                    let task_type = body
                        .get("task_type")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    recorded.lock().expect("lock").push(task_type);
                    Json(json!({ "ok": true, "message": "已终止", "terminated_count": 1 }))
                }
            }),
        );
    let client = client_for(app).await;

    let runner = StreamingTaskRunner::new(client);
    let handle = runner.start(
        TaskType::TushareVerify,
        Some(DateRange {
            start_date: "2024-01-01".to_string(),
            end_date: "2024-01-31".to_string(),
        }),
    );

    // 等到第一行出现再取消，保证取消发生在流中途
    let mut rx = handle.transcript();
    while rx.borrow().is_empty() {
        rx.changed().await.expect("transcript channel");
    }
    let canceller = handle.canceller();
    canceller.cancel();
    canceller.cancel();

    let run = handle.wait().await;
    assert_eq!(run.status, RunStatus::Cancelled);
    assert!(run.transcript.contains("2024-01-05 成功，共 120 条记录"));
    assert!(run.transcript.ends_with(&format!("{CANCELLED_MARKER}\n")));

    // 终止请求是异步发出的，轮询等它落地；重复取消只发一次
    for _ in 0..50 {
        if !terminated.lock().expect("lock").is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    let terminated = terminated.lock().expect("lock");
    assert_eq!(terminated.as_slice(), ["tushare_verify"]);
}

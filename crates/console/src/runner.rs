use std::fmt;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::ApiClient;
use crate::decode::StreamDecoder;

/// 后端在流式输出末尾写入的完成标记（返回码 0 才算成功）。
pub const COMPLETION_MARKER: &str = "[执行完成，返回码: 0]";
/// 取消后追加到执行记录末尾的标记行。
pub const CANCELLED_MARKER: &str = "[已取消]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    DailyUpdate,
    NamesUpdate,
    TushareVerify,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::DailyUpdate => "daily_update",
            TaskType::NamesUpdate => "names_update",
            TaskType::TushareVerify => "tushare_verify",
        }
    }

    /// 任务在 task_logs 表中的名称；校验任务不写历史记录。
    pub fn log_task_name(&self) -> Option<&'static str> {
        match self {
            TaskType::DailyUpdate => Some("日K线抽取"),
            TaskType::NamesUpdate => Some("股票名称抽取"),
            TaskType::TushareVerify => None,
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "daily_update" => Ok(TaskType::DailyUpdate),
            "names_update" => Ok(TaskType::NamesUpdate),
            "tushare_verify" => Ok(TaskType::TushareVerify),
            other => Err(format!("未知的任务类型: {other}")),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Running,
    Success,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    pub start_date: String,
    pub end_date: String,
}

/// 一次流式任务的最终状态：只增不减的执行记录、终态与错误信息。
#[derive(Debug)]
pub struct TaskRun {
    pub task_type: TaskType,
    pub status: RunStatus,
    pub transcript: String,
    pub error: Option<String>,
    pub params: Option<DateRange>,
}

/// 成功路径上恰好调用一次的回调（例如刷新历史记录列表）。
pub type RefreshHook = Box<dyn FnOnce() + Send>;

pub struct StreamingTaskRunner {
    client: ApiClient,
}

impl StreamingTaskRunner {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// 启动一次流式任务。同一 TaskType 同时只允许一个活动任务，
    /// 由调用方保证（执行中禁用触发入口）。
    pub fn start(&self, task_type: TaskType, params: Option<DateRange>) -> RunHandle {
        self.start_with_refresh(task_type, params, None)
    }

    pub fn start_with_refresh(
        &self,
        task_type: TaskType,
        params: Option<DateRange>,
        on_success: Option<RefreshHook>,
    ) -> RunHandle {
        let token = CancellationToken::new();
        let (tx, rx) = watch::channel(String::new());
        let join = tokio::spawn(run_task(
            self.client.clone(),
            task_type,
            params,
            token.clone(),
            tx,
            on_success,
        ));
        RunHandle {
            task_type,
            client: self.client.clone(),
            token,
            transcript_rx: rx,
            join,
        }
    }
}

pub struct RunHandle {
    task_type: TaskType,
    client: ApiClient,
    token: CancellationToken,
    transcript_rx: watch::Receiver<String>,
    join: JoinHandle<TaskRun>,
}

impl RunHandle {
    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    /// 执行记录的实时快照通道，每追加一行推送一次全量文本。
    pub fn transcript(&self) -> watch::Receiver<String> {
        self.transcript_rx.clone()
    }

    pub fn canceller(&self) -> RunCanceller {
        RunCanceller {
            task_type: self.task_type,
            client: self.client.clone(),
            token: self.token.clone(),
        }
    }

    /// 取消本次任务。幂等：重复调用或在自然结束后调用均无效果。
    pub fn cancel(&self) {
        self.canceller().cancel();
    }

    pub async fn wait(self) -> TaskRun {
        match self.join.await {
            Ok(run) => run,
            Err(e) => TaskRun {
                task_type: self.task_type,
                status: RunStatus::Failed,
                transcript: String::new(),
                error: Some(e.to_string()),
                params: None,
            },
        }
    }
}

/// 可跨任务传递的取消句柄：中止本地读取，并向后端发终止请求。
#[derive(Clone)]
pub struct RunCanceller {
    task_type: TaskType,
    client: ApiClient,
    token: CancellationToken,
}

impl RunCanceller {
    pub fn cancel(&self) {
        if self.token.is_cancelled() {
            return;
        }
        self.token.cancel();

        // 后端进程终止是尽力而为：失败只记日志，绝不阻塞本地取消。
        let client = self.client.clone();
        let task_type = self.task_type;
        tokio::spawn(async move {
            match client.terminate(task_type).await {
                Ok(resp) => {
                    tracing::info!(
                        task_type = %task_type,
                        terminated = resp.terminated_count,
                        "后端进程已终止"
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, task_type = %task_type, "终止后端进程失败");
                }
            }
        });
    }
}

async fn run_task(
    client: ApiClient,
    task_type: TaskType,
    params: Option<DateRange>,
    token: CancellationToken,
    tx: watch::Sender<String>,
    on_success: Option<RefreshHook>,
) -> TaskRun {
    let mut run = TaskRun {
        task_type,
        status: RunStatus::Running,
        transcript: String::new(),
        error: None,
        params: params.clone(),
    };

    let opened = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        resp = open_stream(&client, task_type, params.as_ref()) => Some(resp),
    };
    let resp = match opened {
        None => {
            finish_cancelled(&mut run, &tx);
            return run;
        }
        Some(Err(e)) => {
            finish_failed(&mut run, e, &tx);
            return run;
        }
        Some(Ok(resp)) => resp,
    };

    let mut stream = resp.bytes_stream();
    let mut decoder = StreamDecoder::new();
    let mut saw_marker = false;

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            // 流正常结束
            None => break,
            Some(Ok(chunk)) => {
                for line in decoder.push(&chunk) {
                    if line.is_empty() {
                        continue;
                    }
                    if line.contains(COMPLETION_MARKER) {
                        saw_marker = true;
                    }
                    append_line(&mut run, &line, &tx);
                }
            }
            Some(Err(e)) => {
                if token.is_cancelled() {
                    break;
                }
                finish_failed(&mut run, e.to_string(), &tx);
                return run;
            }
        }
    }

    // 取消优先于任何已缓冲数据中的完成标记
    if token.is_cancelled() {
        finish_cancelled(&mut run, &tx);
        return run;
    }

    if let Some(tail) = decoder.finish()
        && !tail.is_empty()
    {
        if tail.contains(COMPLETION_MARKER) {
            saw_marker = true;
        }
        append_line(&mut run, &tail, &tx);
    }

    if saw_marker {
        run.status = RunStatus::Success;
        if let Some(hook) = on_success {
            hook();
        }
    } else {
        // 流正常关闭但没有完成标记：视为失败，与取消区分
        run.status = RunStatus::Failed;
        run.error = Some("执行失败".to_string());
    }
    run
}

async fn open_stream(
    client: &ApiClient,
    task_type: TaskType,
    params: Option<&DateRange>,
) -> Result<reqwest::Response, String> {
    let http = client.http();
    let req = match task_type {
        TaskType::DailyUpdate => {
            let Some(range) = params else {
                return Err("日K线抽取需要日期范围".to_string());
            };
            http.post(client.url("/api/tasks/update_daily")).json(&serde_json::json!({
                "start_date": range.start_date,
                "end_date": range.end_date,
            }))
        }
        TaskType::NamesUpdate => http.post(client.url("/api/tasks/update_names")),
        TaskType::TushareVerify => {
            let mut query: Vec<(&str, String)> = Vec::new();
            if let Some(range) = params {
                query.push(("start_date", range.start_date.clone()));
                query.push(("end_date", range.end_date.clone()));
            }
            http.get(client.url("/api/stats/tushare_verify")).query(&query)
        }
    };

    // 流式请求不设整体超时：后端不保证何时关闭流，取消始终可用
    let resp = req.send().await.map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("后端返回状态 {}", resp.status()));
    }
    Ok(resp)
}

fn append_line(run: &mut TaskRun, line: &str, tx: &watch::Sender<String>) {
    run.transcript.push_str(line);
    run.transcript.push('\n');
    let _ = tx.send(run.transcript.clone());
}

fn finish_cancelled(run: &mut TaskRun, tx: &watch::Sender<String>) {
    append_line(run, CANCELLED_MARKER, tx);
    run.status = RunStatus::Cancelled;
}

fn finish_failed(run: &mut TaskRun, message: String, tx: &watch::Sender<String>) {
    append_line(run, &format!("[错误] {message}"), tx);
    run.status = RunStatus::Failed;
    run.error = Some(message);
}

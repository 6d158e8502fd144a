use std::io::Write;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use console::client::ApiClient;
use console::config::ConfigStore;
use console::logs::{self, LogFilter};
use console::reconcile;
use console::runner::{
    DateRange, RefreshHook, RunStatus, StreamingTaskRunner, TaskRun, TaskType,
};
use console::stats;
use console::stocks::{self, StockQuery};
use console::users::{self, NewUser};

#[derive(Parser)]
#[command(name = "console", version, about = "Quantum Stock 管理控制台")]
struct Cli {
    /// 后端地址，覆盖配置文件与 QS_API_URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 日K线抽取（流式输出，Ctrl-C 取消）
    UpdateDaily {
        #[arg(long)]
        start_date: String,
        #[arg(long)]
        end_date: String,
    },
    /// 股票名称抽取（流式输出，Ctrl-C 取消）
    UpdateNames,
    /// 月度统计 + Tushare 数据校验，输出差异表
    Verify {
        #[arg(long)]
        start_date: Option<String>,
        #[arg(long)]
        end_date: Option<String>,
    },
    /// 月度数据条目统计
    MonthlyCounts {
        #[arg(long)]
        start_date: Option<String>,
        #[arg(long)]
        end_date: Option<String>,
    },
    /// 数据库概览统计
    Overview,
    /// 终止指定类型任务的后端进程
    Terminate {
        /// daily_update | names_update | tushare_verify
        #[arg(long)]
        task_type: String,
    },
    /// 任务执行日志
    #[command(subcommand)]
    Logs(LogsCommand),
    /// 用户管理
    #[command(subcommand)]
    Users(UsersCommand),
    /// 选股池查询与自选/观察股
    #[command(subcommand)]
    Stocks(StocksCommand),
}

#[derive(Subcommand)]
enum LogsCommand {
    /// 某个任务最近的执行记录
    Recent {
        #[arg(long)]
        task_name: String,
        #[arg(long, default_value_t = 5)]
        limit: i64,
    },
    /// 按条件筛选日志
    List {
        #[arg(long)]
        task_name: Option<String>,
        #[arg(long)]
        start_date: Option<String>,
        #[arg(long)]
        end_date: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
    /// 可用的筛选条件（任务名 / 日期 / 状态）
    Filters,
    /// 按条件删除日志
    Delete {
        #[arg(long)]
        task_name: Option<String>,
        #[arg(long)]
        start_date: Option<String>,
        #[arg(long)]
        end_date: Option<String>,
        #[arg(long)]
        status: Option<String>,
    },
}

#[derive(Subcommand)]
enum UsersCommand {
    List,
    Create {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        role: Option<String>,
    },
    Update {
        #[arg(long)]
        username: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        role: Option<String>,
    },
    Passwd {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    Delete {
        #[arg(long)]
        username: String,
    },
}

#[derive(Subcommand)]
enum StocksCommand {
    /// 查询选股池
    Query {
        #[arg(long)]
        ts_code: Option<String>,
        #[arg(long)]
        execute_id: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = 50)]
        page_size: i64,
    },
    /// 选股批次列表
    Dates,
    /// 删除选股记录
    Delete {
        #[arg(long)]
        execute_id: Option<String>,
        #[arg(long)]
        execute_date: Option<String>,
        #[arg(long)]
        execute_time: Option<String>,
    },
    ToggleFavorite {
        #[arg(long)]
        ts_code: String,
        #[arg(long)]
        execute_id: String,
    },
    ToggleObservation {
        #[arg(long)]
        ts_code: String,
        #[arg(long)]
        execute_id: String,
    },
    Favorites {
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = 50)]
        page_size: i64,
    },
    Observations {
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = 50)]
        page_size: i64,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ConfigStore::load();
    if let Some(url) = cli.api_url {
        config.set_string("api_base_url", Some(url));
    }

    if let Err(e) = run(cli.command, &config).await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

async fn run(command: Command, config: &ConfigStore) -> Result<(), String> {
    let client = ApiClient::new(config)?;

    let login = client.login(&config.username(), &config.password()).await?;
    tracing::debug!(username = %login.username, role = %login.role, "登录成功");

    match command {
        Command::UpdateDaily {
            start_date,
            end_date,
        } => {
            let range = DateRange {
                start_date,
                end_date,
            };
            let run = run_streaming(&client, TaskType::DailyUpdate, Some(range)).await;
            finish_extraction(run, "日K线抽取")
        }
        Command::UpdateNames => {
            let run = run_streaming(&client, TaskType::NamesUpdate, None).await;
            finish_extraction(run, "股票名称抽取")
        }
        Command::Verify {
            start_date,
            end_date,
        } => cmd_verify(&client, start_date.as_deref(), end_date.as_deref()).await,
        Command::MonthlyCounts {
            start_date,
            end_date,
        } => {
            let items =
                stats::monthly_counts(&client, start_date.as_deref(), end_date.as_deref()).await?;
            println!("{:<10} {:>12}", "年月", "数据条目");
            for item in &items {
                println!("{:<10} {:>12}", item.year_month, item.count);
            }
            Ok(())
        }
        Command::Overview => {
            let value = stats::overview(&client).await?;
            print_json(&value)
        }
        Command::Terminate { task_type } => {
            let task_type = TaskType::parse(&task_type)?;
            let resp = client.terminate(task_type).await?;
            println!(
                "{}（共 {} 个进程）",
                resp.message.as_deref().unwrap_or("已终止"),
                resp.terminated_count
            );
            Ok(())
        }
        Command::Logs(cmd) => run_logs(&client, cmd).await,
        Command::Users(cmd) => run_users(&client, cmd).await,
        Command::Stocks(cmd) => run_stocks(&client, cmd).await,
    }
}

/// 启动一次流式任务：实时打印执行记录，Ctrl-C 触发取消。
async fn run_streaming(
    client: &ApiClient,
    task_type: TaskType,
    params: Option<DateRange>,
) -> TaskRun {
    let runner = StreamingTaskRunner::new(client.clone());

    // 成功后刷新历史记录列表（校验任务不写历史）。
    // 回调里只负责启动刷新，句柄存下来，结束前等它打印完。
    let refresh_join: std::sync::Arc<std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>> =
        std::sync::Arc::new(std::sync::Mutex::new(None));
    let refresh_slot = refresh_join.clone();
    let on_success: Option<RefreshHook> = task_type.log_task_name().map(|task_name| {
        let client = client.clone();
        Box::new(move || {
            let join = tokio::spawn(async move {
                match logs::recent_logs(&client, task_name, 5).await {
                    Ok(items) => {
                        println!("\n最近抽取记录：");
                        for item in items {
                            println!(
                                "  [{}] {} {}",
                                item.status,
                                item.execute_time.as_deref().unwrap_or(""),
                                item.message.as_deref().unwrap_or("")
                            );
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "刷新历史记录失败"),
                }
            });
            *refresh_slot.lock().expect("refresh slot") = Some(join);
        }) as RefreshHook
    });

    let handle = runner.start_with_refresh(task_type, params, on_success);

    let canceller = handle.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let mut rx = handle.transcript();
    let printer = tokio::spawn(async move {
        let mut printed = 0usize;
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            if snapshot.len() > printed {
                print!("{}", &snapshot[printed..]);
                let _ = std::io::stdout().flush();
                printed = snapshot.len();
            }
        }
    });

    let run = handle.wait().await;
    let _ = printer.await;
    let refresh = refresh_join.lock().expect("refresh slot").take();
    if let Some(join) = refresh {
        let _ = join.await;
    }
    run
}

fn finish_extraction(run: TaskRun, label: &str) -> Result<(), String> {
    match run.status {
        RunStatus::Success => {
            println!("{label}成功");
            Ok(())
        }
        RunStatus::Cancelled => {
            println!("{label}已取消");
            Ok(())
        }
        _ => Err(format!(
            "{label}失败: {}",
            run.error.unwrap_or_else(|| "执行失败".to_string())
        )),
    }
}

async fn cmd_verify(
    client: &ApiClient,
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> Result<(), String> {
    let base = stats::monthly_counts(client, start_date, end_date).await?;
    let (start, end) = reconcile::plan_range(&base)?;

    println!("开始按天获取Tushare数据");
    println!("日期范围: {start} 到 {end}");
    println!("{}", "=".repeat(50));

    let range = DateRange {
        start_date: start.to_string(),
        end_date: end.to_string(),
    };
    let run = run_streaming(client, TaskType::TushareVerify, Some(range)).await;
    if run.status == RunStatus::Cancelled {
        println!("Tushare数据抽取已取消");
        return Ok(());
    }

    let verified = reconcile::scan_verified_counts(&run.transcript)?;
    let rows = reconcile::merge(&base, &verified);

    println!();
    println!(
        "{:<10} {:>12} {:>15} {:>10}",
        "年月", "数据条目", "tushare校验数", "差异条目"
    );
    println!("{}", "-".repeat(52));
    for row in &rows {
        println!(
            "{:<10} {:>12} {:>15} {:>10}",
            row.year_month, row.db_count, row.verified_count, row.diff
        );
    }

    if run.status == RunStatus::Failed {
        return Err(run.error.unwrap_or_else(|| "执行失败".to_string()));
    }
    Ok(())
}

async fn run_logs(client: &ApiClient, cmd: LogsCommand) -> Result<(), String> {
    match cmd {
        LogsCommand::Recent { task_name, limit } => {
            let items = logs::recent_logs(client, &task_name, limit).await?;
            print_log_items(&items);
            Ok(())
        }
        LogsCommand::List {
            task_name,
            start_date,
            end_date,
            status,
            limit,
        } => {
            let filter = LogFilter {
                task_name,
                start_date,
                end_date,
                status,
                limit: Some(limit),
            };
            let items = logs::list_logs(client, &filter).await?;
            print_log_items(&items);
            Ok(())
        }
        LogsCommand::Filters => {
            let filters = logs::log_filters(client).await?;
            println!("任务: {}", filters.task_names.join(", "));
            println!("日期: {}", filters.dates.join(", "));
            println!("状态: {}", filters.statuses.join(", "));
            Ok(())
        }
        LogsCommand::Delete {
            task_name,
            start_date,
            end_date,
            status,
        } => {
            let filter = LogFilter {
                task_name,
                start_date,
                end_date,
                status,
                limit: None,
            };
            let resp = logs::delete_logs(client, &filter).await?;
            println!("已删除 {} / {} 条日志", resp.deleted_count, resp.total_count);
            Ok(())
        }
    }
}

fn print_log_items(items: &[logs::TaskLogItem]) {
    if items.is_empty() {
        println!("暂无记录");
        return;
    }
    for item in items {
        println!(
            "[{}] {} {} {}",
            item.status,
            item.execute_time.as_deref().unwrap_or(""),
            item.task_name.as_deref().unwrap_or(""),
            item.message.as_deref().unwrap_or("")
        );
    }
}

async fn run_users(client: &ApiClient, cmd: UsersCommand) -> Result<(), String> {
    match cmd {
        UsersCommand::List => {
            let items = users::list_users(client).await?;
            for user in &items {
                println!(
                    "{:<20} {:<10} {:<20} {}",
                    user.username,
                    user.role,
                    user.name.as_deref().unwrap_or(""),
                    user.created_at.as_deref().unwrap_or("")
                );
            }
            Ok(())
        }
        UsersCommand::Create {
            username,
            password,
            name,
            role,
        } => {
            users::create_user(
                client,
                &NewUser {
                    username: username.clone(),
                    password,
                    name,
                    role,
                },
            )
            .await?;
            println!("已创建用户 {username}");
            Ok(())
        }
        UsersCommand::Update {
            username,
            name,
            role,
        } => {
            users::update_user(client, &username, name.as_deref(), role.as_deref()).await?;
            println!("已更新用户 {username}");
            Ok(())
        }
        UsersCommand::Passwd { username, password } => {
            users::set_password(client, &username, &password).await?;
            println!("已重置 {username} 的密码");
            Ok(())
        }
        UsersCommand::Delete { username } => {
            users::delete_user(client, &username).await?;
            println!("已删除用户 {username}");
            Ok(())
        }
    }
}

async fn run_stocks(client: &ApiClient, cmd: StocksCommand) -> Result<(), String> {
    match cmd {
        StocksCommand::Query {
            ts_code,
            execute_id,
            page,
            page_size,
        } => {
            let query = StockQuery {
                ts_code,
                execute_id,
                page,
                page_size,
                ..StockQuery::default()
            };
            let result = stocks::query_stock_selected(client, &query).await?;
            println!("共 {} 条", result.total);
            for item in &result.items {
                print_json(item)?;
            }
            Ok(())
        }
        StocksCommand::Dates => {
            let items = stocks::execute_dates(client).await?;
            for execute_id in &items {
                println!("{execute_id}");
            }
            Ok(())
        }
        StocksCommand::Delete {
            execute_id,
            execute_date,
            execute_time,
        } => {
            let resp = stocks::delete_stock_selected(
                client,
                execute_id.as_deref(),
                execute_date.as_deref(),
                execute_time.as_deref(),
            )
            .await?;
            print_json(&resp)
        }
        StocksCommand::ToggleFavorite {
            ts_code,
            execute_id,
        } => {
            let resp = stocks::toggle_favorite(client, &ts_code, &execute_id).await?;
            println!(
                "{}",
                if resp.is_favorite == Some(1) {
                    "已加入自选"
                } else {
                    "已移出自选"
                }
            );
            Ok(())
        }
        StocksCommand::ToggleObservation {
            ts_code,
            execute_id,
        } => {
            let resp = stocks::toggle_observation(client, &ts_code, &execute_id).await?;
            println!(
                "{}",
                if resp.is_observation == Some(1) {
                    "已加入观察"
                } else {
                    "已移出观察"
                }
            );
            Ok(())
        }
        StocksCommand::Favorites { page, page_size } => {
            let result = stocks::favorite_list(client, page, page_size).await?;
            println!("共 {} 条", result.total);
            for item in &result.items {
                print_json(item)?;
            }
            Ok(())
        }
        StocksCommand::Observations { page, page_size } => {
            let result = stocks::observation_list(client, page, page_size).await?;
            println!("共 {} 条", result.total);
            for item in &result.items {
                print_json(item)?;
            }
            Ok(())
        }
    }
}

fn print_json(value: &serde_json::Value) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{text}");
    Ok(())
}

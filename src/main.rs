use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use workqueue_core::traits::{DispatchService, LeaseService, WorkerWatchService};
use workqueue_core::AppConfig;
use workqueue_dispatcher::{
    DependencyChecker, DispatchConfig, LeaseConfig, TaskDispatchService, TaskLeaseService,
    WorkerFailureDetector, WorkerWatchConfig,
};
use workqueue_infrastructure::DatabaseManager;

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("workqueue")
        .version("0.1.0")
        .about("文档分析流水线的持久化任务队列维护节点")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径")
                .default_value("config/workqueue.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"])
                .default_value("pretty"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").unwrap();
    let log_level = matches.get_one::<String>("log-level").unwrap();
    let log_format = matches.get_one::<String>("log-format").unwrap();

    init_logging(log_level, log_format)?;

    info!("启动任务队列维护节点");
    info!("配置文件: {config_path}");

    let config = AppConfig::load(Some(config_path)).context("加载配置失败")?;

    let manager = DatabaseManager::new(&config.database.url, config.database.max_connections)
        .await
        .context("连接数据库失败")?;
    manager.migrate().await.context("初始化数据库结构失败")?;
    info!("数据库就绪: {:?}", manager.database_type());

    if !config.dispatcher.enabled {
        info!("调度侧维护循环已禁用，节点空转等待退出信号");
        signal::ctrl_c().await.context("等待退出信号失败")?;
        manager.close().await;
        return Ok(());
    }

    let task_repo = manager.task_repository();
    let dependency_repo = manager.dependency_repository();
    let worker_repo = manager.worker_repository();

    let lease: Arc<dyn LeaseService> = Arc::new(TaskLeaseService::new(
        task_repo.clone(),
        Some(LeaseConfig {
            lease_duration_seconds: config.dispatcher.lease_duration_seconds,
        }),
    ));
    let worker_watch: Arc<dyn WorkerWatchService> = Arc::new(WorkerFailureDetector::new(
        worker_repo,
        Some(WorkerWatchConfig {
            heartbeat_timeout_seconds: config.worker.heartbeat_timeout_seconds,
        }),
    ));
    let dependency_checker = Arc::new(DependencyChecker::new(
        task_repo.clone(),
        dependency_repo,
    ));
    let dispatch: Arc<dyn DispatchService> = Arc::new(TaskDispatchService::new(
        task_repo,
        lease.clone(),
        dependency_checker,
        Some(DispatchConfig {
            claim_batch_size: config.dispatcher.claim_batch_size,
            claim_attempts: config.dispatcher.claim_attempts,
        }),
    ));

    let (shutdown_tx, _) = broadcast::channel(1);
    let maintenance = tokio::spawn(run_maintenance_loop(
        lease,
        worker_watch,
        dispatch,
        config.dispatcher.sweep_interval_seconds,
        shutdown_tx.subscribe(),
    ));

    signal::ctrl_c().await.context("等待退出信号失败")?;
    info!("收到退出信号，开始关闭");
    let _ = shutdown_tx.send(());
    maintenance.await.ok();
    manager.close().await;
    info!("节点已退出");
    Ok(())
}

/// 维护循环：定时回收过期租约、巡检失联Worker、输出队列概况
async fn run_maintenance_loop(
    lease: Arc<dyn LeaseService>,
    worker_watch: Arc<dyn WorkerWatchService>,
    dispatch: Arc<dyn DispatchService>,
    sweep_interval_seconds: u64,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut sweep_interval = tokio::time::interval(Duration::from_secs(sweep_interval_seconds));
    loop {
        tokio::select! {
            _ = sweep_interval.tick() => {
                match lease.expire_sweep().await {
                    Ok(released) if released > 0 => {
                        info!("本轮回收 {released} 个过期租约");
                    }
                    Ok(_) => {}
                    Err(e) => error!("租约回收失败: {e}"),
                }

                if let Err(e) = worker_watch.sweep_stale_workers().await {
                    error!("Worker巡检失败: {e}");
                }

                match dispatch.queue_summary().await {
                    Ok(summary) => info!(
                        "队列概况: 排队 {} 执行中 {} 待重试 {} 已完成 {} 已失败 {}",
                        summary.queued,
                        summary.processing,
                        summary.retry,
                        summary.completed,
                        summary.failed
                    ),
                    Err(e) => error!("读取队列概况失败: {e}"),
                }
            }
            _ = shutdown_rx.recv() => {
                info!("维护循环退出");
                break;
            }
        }
    }
}

/// 初始化日志系统
fn init_logging(level: &str, format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化日志失败")?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .try_init()
                .context("初始化日志失败")?;
        }
    }
    Ok(())
}

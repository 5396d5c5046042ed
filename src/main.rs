use std::sync::Arc;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info};

use rust_autotrade::app_config::{self, AppSettings, StoreBackend};
use rust_autotrade::job::{Collaborators, JobKind, Orchestrator, SchedulerConfig};
use rust_autotrade::trading::services::{HttpPortfolioValuer, HttpSignalSource};
use rust_autotrade::trading::store::{MemoryStore, MysqlStore, Stores};
use rust_autotrade::trading::workflow::n8n_client::N8nClient;
use rust_autotrade::webhook::{self, WebhookState};

#[derive(Parser, Debug)]
#[command(name = "rust_autotrade", about = "自动交易策略调度与执行同步")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 启动调度器和 webhook（默认）
    Serve,
    /// 执行一次指定任务后退出: generate | dispatch | reconcile | portfolio | cleanup | report
    RunOnce { job: String },
}

async fn build_stores(settings: &AppSettings) -> anyhow::Result<Stores> {
    match settings.store_backend {
        StoreBackend::Memory => {
            let store = match settings.seed_file.as_deref() {
                Some(path) => {
                    info!("加载种子数据: {}", path);
                    MemoryStore::from_seed_file(path)?
                }
                None => MemoryStore::new(),
            };
            Ok(Stores::from_memory(Arc::new(store)))
        }
        StoreBackend::Mysql => {
            let url = settings
                .db_url
                .as_deref()
                .ok_or_else(|| anyhow!("DB_HOST is not configured"))?;
            let rb = app_config::db::init_db(url, settings.db_max_open_conns).await?;
            Ok(Stores::from_mysql(Arc::new(MysqlStore::new(rb))))
        }
    }
}

fn build_collaborators(settings: &AppSettings) -> anyhow::Result<Collaborators> {
    let engine = N8nClient::new(
        settings.n8n_base_url.clone(),
        settings.n8n_api_key.clone(),
        settings.n8n_timeout,
    )?;
    let source = HttpSignalSource::new(settings.signal_source_url.clone(), settings.signal_source_timeout)?;
    let valuer = HttpPortfolioValuer::new(settings.portfolio_service_url.clone(), settings.portfolio_timeout)?;
    Ok(Collaborators {
        engine: Arc::new(engine),
        source: Arc::new(source),
        valuer: Arc::new(valuer),
    })
}

async fn serve(orchestrator: Arc<Orchestrator>, settings: &AppSettings) -> anyhow::Result<()> {
    let scheduler_config = SchedulerConfig::from_env()?;
    let scheduler = Arc::clone(&orchestrator).start(&scheduler_config)?;

    let reconciler = orchestrator
        .reconciler()
        .ok_or_else(|| anyhow!("reconciler is not wired"))?;
    let state = Arc::new(WebhookState::new(
        reconciler,
        orchestrator.audit().clone(),
        settings.webhook_secret.clone(),
    ));
    let listener = TcpListener::bind(&settings.webhook_bind).await?;
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(webhook::serve(listener, state, async move {
        let _ = stop_rx.await;
    }));

    // 捕捉Ctrl+C信号以平滑关闭
    tokio::signal::ctrl_c().await?;
    info!("收到退出信号，等待进行中的任务结束");
    let _ = stop_tx.send(());
    scheduler.shutdown().await;
    match server.await {
        Ok(Err(e)) => error!("webhook 服务异常退出: {}", e),
        Err(e) => error!("webhook 任务异常: {}", e),
        Ok(Ok(())) => {}
    }
    info!("已退出");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 先解析命令行，--help 不依赖环境变量
    let cli = Cli::parse();
    let settings = AppSettings::from_env()?;
    // 设置日志
    app_config::log::setup_logging()?;

    let stores = build_stores(&settings).await?;
    let collaborators = build_collaborators(&settings)?;
    let orchestrator = Arc::new(Orchestrator::wire(stores, collaborators, &settings));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(orchestrator, &settings).await,
        Command::RunOnce { job } => {
            let kind: JobKind = job.parse()?;
            let summary = orchestrator.run_job(kind).await?;
            info!(
                "任务 {} 完成 run_id={} processed={} errors={}",
                kind, summary.run_id, summary.processed_count, summary.error_count
            );
            println!("{}", serde_json::to_string_pretty(&summary.details)?);
            Ok(())
        }
    }
}

use once_cell::sync::OnceCell;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, FmtSubscriber, Layer, Registry};

use crate::app_config::env::{env_is_true, env_or_default};

/// 非阻塞写入的 guard，drop 之后日志不再落盘
static LOG_GUARDS: OnceCell<Vec<WorkerGuard>> = OnceCell::new();

// 设置日志
pub fn setup_logging() -> anyhow::Result<()> {
    let app_env = env_or_default("APP_ENV", "local");
    let log_level = env_or_default("LOG_LEVEL", "info");

    if app_env.eq_ignore_ascii_case("local") {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::new(&log_level))
            .with_ansi(true)
            .with_target(false)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_level(true)
            .with_writer(std::io::stdout)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let log_dir = env_or_default("LOG_DIR", "log_files");
        let info_file = RollingFileAppender::new(Rotation::DAILY, &log_dir, "info.log");
        let error_file = RollingFileAppender::new(Rotation::DAILY, &log_dir, "error.log");

        let (info_non_blocking, info_guard) = tracing_appender::non_blocking(info_file);
        let (error_non_blocking, error_guard) = tracing_appender::non_blocking(error_file);
        let _ = LOG_GUARDS.set(vec![info_guard, error_guard]);

        let console_layer = env_is_true("ENABLE_CONSOLE_LOGGING", false).then(|| {
            fmt::layer()
                .with_ansi(true)
                .with_target(false)
                .with_level(true)
                .with_filter(EnvFilter::new(&log_level))
        });

        let subscriber = Registry::default()
            .with(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_level(true)
                    .with_writer(info_non_blocking)
                    .with_filter(EnvFilter::new(&log_level)),
            )
            .with(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_level(true)
                    .with_writer(error_non_blocking)
                    .with_filter(tracing_subscriber::filter::LevelFilter::from_level(Level::ERROR)),
            )
            .with(console_layer);

        tracing::subscriber::set_global_default(subscriber)?;
    }

    // rbatis 通过 log 门面输出 SQL
    if env_is_true("DB_DEBUG", false) {
        fast_log::init(fast_log::Config::new().console().level(::log::LevelFilter::Debug))
            .map_err(|e| anyhow::anyhow!("fast_log init error: {}", e))?;
    }
    Ok(())
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::AppError;

/// 最小调度间隔
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// 单个周期任务的运行计数
#[derive(Debug, Default)]
pub struct TaskStats {
    pub started: AtomicU64,
    pub skipped: AtomicU64,
}

/// 运行中标记，任务结束（含 panic）时自动清除
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 周期任务调度器
///
/// 每个任务独立计时、单飞运行：上一次还没结束时到来的 tick 直接跳过，不排队。
/// 关闭时不强制中断，等待正在执行的那一次自然结束。
pub struct TaskScheduler {
    periodic_tasks: HashMap<String, JoinHandle<()>>,
    stats: HashMap<String, Arc<TaskStats>>,
    shutdown_sender: broadcast::Sender<()>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        let (shutdown_sender, _) = broadcast::channel(16);
        Self {
            periodic_tasks: HashMap::new(),
            stats: HashMap::new(),
            shutdown_sender,
        }
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    pub fn add_periodic_task<F, Fut>(&mut self, name: String, every: Duration, task_fn: F) -> Result<(), AppError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        if every < MIN_INTERVAL {
            return Err(AppError::Config(format!(
                "任务 {} 的调度间隔 {:?} 小于最小值 {:?}",
                name, every, MIN_INTERVAL
            )));
        }
        if self.periodic_tasks.contains_key(&name) {
            return Err(AppError::Config(format!("任务 {} 重复注册", name)));
        }

        let mut interval_timer = interval(every);
        interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        let running = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(TaskStats::default());
        let task_stats = stats.clone();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let mut in_flight: Option<JoinHandle<()>> = None;
            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        if running
                            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                            .is_err()
                        {
                            task_stats.skipped.fetch_add(1, Ordering::Relaxed);
                            debug!("任务 {} 上一次仍在执行，跳过本次 tick", task_name);
                            continue;
                        }
                        task_stats.started.fetch_add(1, Ordering::Relaxed);
                        let guard = InFlightGuard(running.clone());
                        let fut = task_fn();
                        in_flight = Some(tokio::spawn(async move {
                            let _guard = guard;
                            fut.await;
                        }));
                    }
                    _ = shutdown_receiver.recv() => {
                        info!("Periodic task {} is shutting down", task_name);
                        break;
                    }
                }
            }
            if let Some(h) = in_flight {
                if let Err(e) = h.await {
                    warn!("任务 {} 最后一次执行异常退出: {}", task_name, e);
                }
            }
        });
        self.periodic_tasks.insert(name.clone(), handle);
        self.stats.insert(name, stats);
        Ok(())
    }

    pub fn task_stats(&self, name: &str) -> Option<Arc<TaskStats>> {
        self.stats.get(name).cloned()
    }

    pub async fn shutdown(self) {
        // 发送关闭信号
        let _ = self.shutdown_sender.send(());

        // 等待所有任务完成
        for (name, handle) in self.periodic_tasks {
            if let Err(e) = handle.await {
                warn!("任务 {} 关闭异常: {}", name, e);
            }
        }
    }
}

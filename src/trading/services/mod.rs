pub mod audit_logger;
pub mod eligibility;
pub mod execution_dispatcher;
pub mod maintenance;
pub mod portfolio;
pub mod reconciliation;
pub mod signal_generator;
pub mod signal_source;

use serde_json::Value;

pub use audit_logger::AuditLogger;
pub use eligibility::{EligibilityEvaluator, Ineligible};
pub use execution_dispatcher::{DispatchConfig, ExecutionDispatcher};
pub use maintenance::{DailyReport, MaintenanceJobs};
pub use portfolio::{HttpPortfolioValuer, PortfolioRefresher, PortfolioValuer};
pub use reconciliation::{ReconcileConfig, ReconcileOutcome, ReconciliationLoop};
pub use signal_generator::{GeneratorConfig, SignalGenerator};
pub use signal_source::{HttpSignalSource, SignalSource, SourceSignal};

/// 一次批处理的统计，最终汇总为任务摘要
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    pub processed: u64,
    pub errors: u64,
    /// 附加到摘要里的结构化信息
    pub details: Value,
}

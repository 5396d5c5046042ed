pub mod audit_log;
pub mod signal;
pub mod strategy;

pub use audit_log::{AuditLogEntry, LogCategory, LogLevel, NewAuditLogEntry};
pub use signal::{Confidence, NewSignal, Signal, SignalStatus, SignalType, SignalUpdate};
pub use strategy::{BotConfiguration, Strategy, StrategyStatus};

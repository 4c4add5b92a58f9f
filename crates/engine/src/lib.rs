//! The trading control plane: position lifecycle, decision scheduling,
//! high-frequency risk monitoring, state reconciliation, and the read-only
//! metrics aggregation over closed positions.

pub mod locks;
pub mod metrics;
pub mod monitor;
pub mod position_manager;
pub mod reconciler;
pub mod scheduler;

pub use metrics::{MetricsService, RiskMetrics};
pub use monitor::{RiskMonitor, RiskMonitorConfig};
pub use position_manager::{PositionDefaults, PositionManager};
pub use reconciler::StateReconciler;
pub use scheduler::StrategyScheduler;

#[cfg(test)]
pub(crate) mod testutil;

//! Live monitoring and historical backtesting
//!
//! Both drivers run the same evaluation pipeline, so a snapshot observed live
//! and the same snapshot replayed from history produce identical records.

pub mod monitor;
pub mod backtest;
pub mod reporter;
pub mod settings;

pub use monitor::{MonitorLoop, MonitorState, MonitorStats};
pub use backtest::{BacktestReport, BacktestRunner, StepReport, StepStatus};
pub use reporter::{ChannelReporter, CollectingReporter, LogReporter, MultiReporter, ReportBatch, Reporter};

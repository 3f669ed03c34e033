//! hostwatch-store: SQLite persistence for the metrics time series and the
//! workload lifecycle records. Every cycle is written as one transaction per
//! snapshot kind.

pub mod error;
pub mod sink;
pub mod store;

pub use error::StoreError;
pub use sink::{HostCycle, MetricsSink, WorkloadCycle, WorkloadTotals};
pub use store::Store;

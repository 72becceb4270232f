//! Scheduling and aggregation engine
//!
//! One coordinating task decides, second by second, which targets are due
//! and hands their batches to a bounded worker pool. Results are persisted
//! by the workers themselves; the coordinator only dispatches.
//!
//! ## Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────┐
//!                  │  MonitorController   │  start / stop / reload / status
//!                  └──────────┬───────────┘
//!                             │ spawns
//!                  ┌──────────▼───────────┐   snapshot   ┌────────────────┐
//!                  │   Scheduler (1s)     │◀─────────────│ TargetRegistry │
//!                  └───┬──────────────┬───┘              └────────────────┘
//!          try_submit  │              │ minute boundary
//!                  ┌───▼─────────┐  ┌─▼────────────────┐
//!                  │ WorkerPool  │  │ MinuteAggregator │
//!                  └───┬─────────┘  └─────────┬────────┘
//!                      │ BatchRunner          │
//!                      ▼                      ▼
//!              ProbeExecutor → record_call → StorageBackend
//! ```
//!
//! ## Components
//!
//! - **MonitorController**: serialized lifecycle control
//! - **Scheduler**: the tick loop, pool health, aggregation and cleanup triggers
//! - **WorkerPool**: fixed number of workers, non-blocking submission
//! - **MinuteAggregator**: per-target minute statistics

pub mod aggregator;
pub mod lifecycle;
pub mod pool;
pub mod scheduler;

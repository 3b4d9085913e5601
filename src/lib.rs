//! # Borealis
//!
//! Cluster workload scheduler core in Rust
//!
//! Borealis 是一个集群工作负载调度器核心：接收作业声明，把它们物化为
//! 任务实例，用状态机驱动每个任务的生命周期，并在一个事务性任务存储上
//! 协调滚动更新、回滚、重启与 cron 触发。
//! Borealis is a cluster workload scheduler core: it accepts job
//! declarations, materializes them into task instances, drives each task's
//! lifecycle through a state machine, and coordinates rolling updates,
//! rollbacks, restarts and cron firing against a transactional task store.
//!
//! ## 特性
//! ## Features
//!
//! - 幂等的任务状态机，终止状态吸收一切后续转移
//!   - Idempotent task state machine, terminal states absorb all further transitions
//! - 每个作业实例至多一个活跃任务
//!   - At most one active task per job instance
//! - 服务任务结束后自动重调度，批任务受失败上限约束
//!   - Service tasks reschedule after finishing, batch tasks are bounded by a failure limit
//! - 令牌保护的滚动更新与回滚会话
//!   - Token-protected rolling update and rollback sessions
//! - cron 触发的作业实例化与冲突策略
//!   - Cron-triggered job instantiation with collision policies
//! - 事务提交后才下发终止指令与状态事件
//!   - Kill instructions and state events are dispatched only after the transaction commits
//! - 内存参考存储，无外部服务依赖
//!   - In-memory reference store with no external service dependencies
//!
//! ## 快速开始
//! ## Quick Start
//!
//! ```rust,no_run
//! use borealis::base::{AcceptAllFilter, LoggingDriver, NullEventSink, SystemClock};
//! use borealis::config::ParsedJob;
//! use borealis::core::SchedulerCore;
//! use borealis::cron::TokioCronTrigger;
//! use borealis::memdb::MemStore;
//! use borealis::query::TaskQuery;
//! use borealis::state_manager::StateManager;
//! use borealis::task::{
//!   default_task_id_generator, ExecutorConfig, Identity, JobConfig, JobKey, TaskConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!   let store = Arc::new(MemStore::new());
//!   let clock = Arc::new(SystemClock);
//!   let state_manager = Arc::new(StateManager::new(
//!     store.clone(),
//!     Arc::new(LoggingDriver),
//!     Arc::new(NullEventSink),
//!     clock.clone(),
//!     default_task_id_generator(),
//!   ));
//!   let core = SchedulerCore::new(
//!     store,
//!     state_manager,
//!     Arc::new(TokioCronTrigger::new()),
//!     Arc::new(AcceptAllFilter),
//!     clock,
//!   );
//!   core.startup().await?;
//!
//!   // 声明一个双实例服务作业
//!   // Declare a two-instance service job
//!   let key = JobKey::new("web", "prod", "hello");
//!   let job = JobConfig {
//!     key: key.clone(),
//!     owner: Identity::new("web", "deploy"),
//!     instance_count: 2,
//!     task: TaskConfig {
//!       owner: Identity::new("web", "deploy"),
//!       environment: "prod".to_string(),
//!       job_name: "hello".to_string(),
//!       num_cpus: 1.0,
//!       ram_mb: 1024,
//!       disk_mb: 1024,
//!       is_service: true,
//!       executor_config: Some(ExecutorConfig::new("docker", "hello:latest")),
//!       ..TaskConfig::default()
//!     },
//!     cron_schedule: None,
//!     cron_collision_policy: Default::default(),
//!   };
//!   core.create_job(ParsedJob::from_unparsed(job)?).await?;
//!
//!   // 之后可以整作业终止
//!   // The whole job can be killed later
//!   core.kill_tasks(&TaskQuery::job_scoped(&key), "deploy").await?;
//!   Ok(())
//! }
//! ```

pub mod backfill;
pub mod base;
pub mod config;
pub mod core;
pub mod cron;
pub mod error;
pub mod fsm;
pub mod memdb;
pub mod query;
pub mod state_manager;
pub mod task;

//! 外部协作者抽象层
//! External collaborator abstraction layer
//!
//! 定义了调度器核心与任务存储、执行器驱动、事件总线、cron 触发器等
//! 外部子系统交互的接口
//! Defines the interfaces through which the scheduler core interacts with
//! the task store, the executor driver, the event bus, the cron trigger and
//! other external subsystems

use crate::error::Result;
use crate::query::TaskQuery;
use crate::task::{JobConfig, JobKey, ScheduledTask, UpdateSession};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;

pub mod constants;
pub mod status;

use self::status::ScheduleStatus;

/// 存储快照：一致的只读视图
/// Store snapshot: a consistent read-only view
pub trait StoreSnapshot {
  /// 查询已调度任务
  /// Query scheduled tasks
  fn fetch_tasks(&self, query: &TaskQuery) -> Vec<ScheduledTask>;

  /// 按作业键取作业配置
  /// Fetch a job configuration by key
  fn fetch_job(&self, key: &JobKey) -> Option<JobConfig>;

  /// 取所有已保存的作业配置
  /// Fetch every saved job configuration
  fn fetch_jobs(&self) -> Vec<JobConfig>;

  /// 取作业的在途更新会话
  /// Fetch the in-flight update session for a job
  fn fetch_update(&self, key: &JobKey) -> Option<UpdateSession>;
}

/// 可变存储：写事务作用域内可见
/// Mutable store: visible within the scope of a write transaction
pub trait MutableStore: StoreSnapshot {
  /// 保存（插入或覆盖）一组任务
  /// Save (insert or overwrite) a set of tasks
  fn save_tasks(&mut self, tasks: Vec<ScheduledTask>);

  /// 无条件删除一组任务
  /// Unconditionally delete a set of tasks
  fn delete_tasks(&mut self, task_ids: &BTreeSet<String>);

  /// 原地修改单个任务；任务不存在时返回 false
  /// Mutate a single task in place; returns false if the task does not exist
  fn mutate_task(&mut self, task_id: &str, mutator: &mut dyn FnMut(&mut ScheduledTask)) -> bool;

  /// 保存作业配置
  /// Save a job configuration
  fn save_job(&mut self, job: JobConfig);

  /// 删除作业配置；不存在时返回 false
  /// Remove a job configuration; returns false if absent
  fn remove_job(&mut self, key: &JobKey) -> bool;

  /// 保存更新会话
  /// Save an update session
  fn save_update(&mut self, session: UpdateSession);

  /// 删除更新会话；不存在时返回 false
  /// Remove an update session; returns false if absent
  fn remove_update(&mut self, key: &JobKey) -> bool;
}

/// 事务性任务存储
/// Transactional task store
///
/// 写事务串行执行；闭包返回错误时整个事务回滚，不发生部分提交
/// Write transactions are serialized; when the closure returns an error the
/// whole transaction rolls back, there is no partial commit
pub trait TaskStore: Send + Sync + 'static {
  /// 快照读
  /// Snapshot read
  fn read<T>(&self, work: impl FnOnce(&dyn StoreSnapshot) -> T) -> T;

  /// 串行化写事务；闭包正常返回时原子提交
  /// Serializable write transaction; commits atomically when the closure
  /// returns successfully
  fn write<T>(&self, work: impl FnOnce(&mut dyn MutableStore) -> Result<T>) -> Result<T>;
}

/// 执行器驱动：单向命令下发
/// Executor driver: one-way command sink
///
/// kill 为尽力而为；驱动方需对重复的任务 ID 幂等
/// Kills are best effort; the driver is expected to be idempotent with
/// respect to repeated task ids
#[async_trait]
pub trait Driver: Send + Sync {
  /// 请求终止任务
  /// Request that a task be killed
  async fn kill_task(&self, task_id: &str) -> Result<()>;
}

/// 任务状态变更事件
/// Task state change event
#[derive(Debug, Clone, PartialEq)]
pub struct TaskStateChange {
  /// 任务 ID
  /// Task ID
  pub task_id: String,
  /// 变更前状态；新插入任务为 None
  /// Status before the change; None for a freshly inserted task
  pub old_status: Option<ScheduleStatus>,
  /// 变更后状态
  /// Status after the change
  pub new_status: ScheduleStatus,
  /// 审计信息
  /// Audit message
  pub message: Option<String>,
}

/// 事件总线：向其它子系统发布状态变更
/// Event bus: publishes state changes to other subsystems
///
/// 每个被接受的状态变更在事务提交后发布一次
/// Each accepted state change is published once, after the transaction
/// commits
#[async_trait]
pub trait EventSink: Send + Sync {
  async fn publish(&self, change: TaskStateChange) -> Result<()>;
}

/// 只记录日志的执行器驱动，适合本地运行与测试
/// An executor driver that only logs, suitable for local runs and tests
#[derive(Debug, Default)]
pub struct LoggingDriver;

#[async_trait]
impl Driver for LoggingDriver {
  async fn kill_task(&self, task_id: &str) -> Result<()> {
    tracing::info!("Would kill task {}", task_id);
    Ok(())
  }
}

/// 丢弃所有事件的事件总线
/// An event bus that discards every event
#[derive(Debug, Default)]
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
  async fn publish(&self, _change: TaskStateChange) -> Result<()> {
    Ok(())
  }
}

/// cron 调度句柄，用于注销
/// Opaque cron scheduling handle, used for descheduling
pub type CronHandle = String;

/// cron 触发回调
/// Cron trigger callback
pub type CronCallback = Arc<dyn Fn() + Send + Sync>;

/// cron 触发器：按 cron 表达式调度回调
/// Cron trigger: schedules a callback on a cron expression
pub trait CronTrigger: Send + Sync {
  /// 校验 cron 表达式
  /// Validate a cron expression
  fn is_valid_schedule(&self, schedule: &str) -> bool;

  /// 注册调度，返回用于注销的句柄
  /// Register a schedule, returning a handle used for descheduling
  fn schedule(&self, schedule: &str, callback: CronCallback) -> Result<CronHandle>;

  /// 注销调度
  /// Deschedule
  fn deschedule(&self, handle: &CronHandle);
}

/// 作业准入过滤结果
/// Job admission filter result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobFilterResult {
  /// 通过
  /// Accepted
  Pass,
  /// 拒绝，附原因
  /// Rejected, with a reason
  Fail(String),
}

/// 作业准入过滤器
/// Job admission filter
pub trait JobFilter: Send + Sync {
  fn filter(&self, job: &JobConfig) -> JobFilterResult;
}

/// 接受所有作业的过滤器
/// A filter accepting every job
#[derive(Debug, Default)]
pub struct AcceptAllFilter;

impl JobFilter for AcceptAllFilter {
  fn filter(&self, _job: &JobConfig) -> JobFilterResult {
    JobFilterResult::Pass
  }
}

/// 可注入的时间源
/// Injectable time source
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
/// System clock
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

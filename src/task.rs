//! 任务模块
//! Task module
//!
//! 定义了作业与任务相关的数据结构：作业键、任务配置、已调度任务及其事件轨迹
//! Defines the job and task data structures: job keys, task configuration,
//! scheduled tasks and their event trail

use crate::base::status::ScheduleStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 作业所有者身份
/// Job owner identity
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
  /// 角色（资源归属）
  /// Role (resource ownership)
  pub role: String,
  /// 提交作业的用户
  /// The user who submitted the job
  pub user: String,
}

impl Identity {
  pub fn new<R: Into<String>, U: Into<String>>(role: R, user: U) -> Self {
    Self {
      role: role.into(),
      user: user.into(),
    }
  }
}

/// 作业键：(role, environment, name) 三元组，唯一标识一个作业
/// Job key: the (role, environment, name) triple uniquely identifying a job
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobKey {
  pub role: String,
  pub environment: String,
  pub name: String,
}

impl JobKey {
  pub fn new<R, E, N>(role: R, environment: E, name: N) -> Self
  where
    R: Into<String>,
    E: Into<String>,
    N: Into<String>,
  {
    Self {
      role: role.into(),
      environment: environment.into(),
      name: name.into(),
    }
  }

  /// 作业的规范路径 `role/environment/name`
  /// The canonical job path `role/environment/name`
  pub fn path(&self) -> String {
    format!("{}/{}/{}", self.role, self.environment, self.name)
  }
}

impl std::fmt::Display for JobKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.path())
  }
}

/// cron 作业触发时与既有活跃任务的冲突处理策略
/// Policy applied when a cron job fires while tasks of the job are still active
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CronCollisionPolicy {
  /// 终止既有任务，再插入新一轮任务
  /// Kill the existing tasks, then insert the new run
  #[default]
  KillExisting,
  /// 放弃新一轮任务
  /// Cancel the new run
  CancelNew,
  /// 新旧任务并行运行
  /// Let the new run overlap the existing tasks
  RunOverlap,
}

/// 执行器配置：不透明的 (name, data) 二元组
/// Executor configuration: an opaque (name, data) pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutorConfig {
  pub name: String,
  pub data: String,
}

impl ExecutorConfig {
  pub fn new<N: Into<String>, D: Into<String>>(name: N, data: D) -> Self {
    Self {
      name: name.into(),
      data: data.into(),
    }
  }
}

/// 值约束：属性值必须（或不得）落在给定集合内
/// Value constraint: the attribute value must (or must not) fall in the set
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueConstraint {
  pub negated: bool,
  pub values: BTreeSet<String>,
}

/// 数量约束：限制同一属性值上的任务数
/// Limit constraint: caps the number of tasks per attribute value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LimitConstraint {
  pub limit: i32,
}

/// 约束体
/// Constraint body
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskConstraint {
  Value(ValueConstraint),
  Limit(LimitConstraint),
}

/// 放置约束：约束名加约束体
/// Placement constraint: a name plus a constraint body
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Constraint {
  pub name: String,
  pub constraint: TaskConstraint,
}

impl Constraint {
  /// 创建值约束
  /// Create a value constraint
  pub fn value<N: Into<String>>(name: N, values: BTreeSet<String>) -> Self {
    Self {
      name: name.into(),
      constraint: TaskConstraint::Value(ValueConstraint {
        negated: false,
        values,
      }),
    }
  }

  /// 创建数量约束
  /// Create a limit constraint
  pub fn limit<N: Into<String>>(name: N, limit: i32) -> Self {
    Self {
      name: name.into(),
      constraint: TaskConstraint::Limit(LimitConstraint { limit }),
    }
  }
}

/// 任务配置
/// Task configuration
///
/// 一经赋给已调度任务即不可变；唯一的例外是启动回填对旧数据的原地改写
/// Immutable once attached to a scheduled task; the only exception is the
/// startup backfill rewriting legacy rows in place
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
  /// 所有者身份
  /// Owner identity
  pub owner: Identity,
  /// 所属环境
  /// Environment the job runs in
  pub environment: String,
  /// 作业名称
  /// Job name
  pub job_name: String,
  /// 实例（分片）编号
  /// Instance (shard) id
  pub instance_id: i32,
  /// CPU 核数
  /// CPU cores
  pub num_cpus: f64,
  /// 内存（MB）
  /// RAM in MB
  pub ram_mb: i64,
  /// 磁盘（MB）
  /// Disk in MB
  pub disk_mb: i64,
  /// 服务任务：结束后会被重新调度
  /// Service task: rescheduled after finishing
  pub is_service: bool,
  /// 生产任务（准入优先级透传）
  /// Production task (admission priority tier, passed through)
  pub production: bool,
  /// 非服务任务的失败次数上限；0 表示旧数据中的缺省，回填为 1
  /// Failure threshold for non-service tasks; 0 marks a legacy unset value
  /// and is backfilled to 1
  pub max_task_failures: i32,
  /// 联系邮箱
  /// Contact email
  pub contact_email: Option<String>,
  /// 命名端口请求，分配时绑定具体端口号
  /// Named port requests, bound to concrete ports at assignment time
  pub requested_ports: BTreeSet<String>,
  /// 放置约束集合
  /// Placement constraints
  pub constraints: BTreeSet<Constraint>,
  /// 执行器配置
  /// Executor configuration
  pub executor_config: Option<ExecutorConfig>,
  /// 旧版执行器数据块，由回填转换为 executor_config
  /// Legacy executor data blob, converted to executor_config by the backfill
  pub legacy_executor_data: Option<String>,
}

impl TaskConfig {
  /// 任务所属作业的键
  /// The key of the job this task belongs to
  pub fn job_key(&self) -> JobKey {
    JobKey::new(
      self.owner.role.clone(),
      self.environment.clone(),
      self.job_name.clone(),
    )
  }
}

/// 已分配任务：任务配置加上放置信息
/// Assigned task: the task configuration plus placement information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignedTask {
  /// 任务 ID
  /// Task ID
  pub task_id: String,
  /// 分配到的机器 ID
  /// Machine id the task was assigned to
  pub slave_id: Option<String>,
  /// 分配到的主机名
  /// Host name the task was assigned to
  pub slave_host: Option<String>,
  /// 端口名到端口号的分配结果
  /// Port name to port number assignment
  pub assigned_ports: BTreeMap<String, u16>,
  /// 任务配置
  /// Task configuration
  pub task: TaskConfig,
}

/// 任务事件：每次被接受的状态变更追加一条
/// Task event: one appended per accepted status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
  /// 事件时间戳
  /// Event timestamp
  pub timestamp: DateTime<Utc>,
  /// 变更后的状态
  /// The status after the change
  pub status: ScheduleStatus,
  /// 可选的审计信息
  /// Optional audit message
  pub message: Option<String>,
  /// 记录事件的调度器主机
  /// The scheduler host that recorded the event
  pub scheduler: String,
}

/// 已调度任务：状态机的持久化形态
/// Scheduled task: the persisted form of a state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
  /// 当前状态
  /// Current status
  pub status: ScheduleStatus,
  /// 累计失败次数
  /// Accumulated failure count
  pub failure_count: i32,
  /// 重调度链上前一个任务的 ID
  /// Task id of the predecessor on the reschedule chain
  pub ancestor_id: Option<String>,
  /// 分配信息与配置
  /// Assignment and configuration
  pub assigned_task: AssignedTask,
  /// 按时间排列的事件轨迹
  /// Time-ordered event trail
  pub task_events: Vec<TaskEvent>,
}

impl ScheduledTask {
  /// 任务 ID
  /// Task ID
  pub fn task_id(&self) -> &str {
    &self.assigned_task.task_id
  }

  /// 实例编号
  /// Instance id
  pub fn instance_id(&self) -> i32 {
    self.assigned_task.task.instance_id
  }

  /// 所属作业键
  /// Owning job key
  pub fn job_key(&self) -> JobKey {
    self.assigned_task.task.job_key()
  }

  /// 是否处于活跃（非终止）状态
  /// Whether the task is active (non-terminal)
  pub fn is_active(&self) -> bool {
    self.status.is_active()
  }
}

/// 作业配置
/// Job configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
  /// 作业键
  /// Job key
  pub key: JobKey,
  /// 所有者
  /// Owner
  pub owner: Identity,
  /// 实例数
  /// Instance count
  pub instance_count: i32,
  /// 任务模板；实例化时填入各自的 instance_id
  /// Task template; instance ids are filled in at materialization
  pub task: TaskConfig,
  /// cron 表达式；设置后作业由 cron 触发
  /// Cron expression; when set the job is cron-triggered
  pub cron_schedule: Option<String>,
  /// cron 冲突策略
  /// Cron collision policy
  pub cron_collision_policy: CronCollisionPolicy,
}

impl JobConfig {
  /// 是否为 cron 作业
  /// Whether this is a cron job
  pub fn is_cron(&self) -> bool {
    self.cron_schedule.is_some()
  }

  /// 生成指定实例的任务配置
  /// Produce the task configuration for a given instance
  pub fn task_for_instance(&self, instance_id: i32) -> TaskConfig {
    let mut task = self.task.clone();
    task.instance_id = instance_id;
    task
  }
}

/// 滚动更新会话：每个作业键最多一个在途更新，由随机令牌保护
/// Rolling update session: at most one in-flight update per job key,
/// protected by a random token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSession {
  /// 被更新的作业键
  /// The job key under update
  pub key: JobKey,
  /// 128 位随机十六进制令牌
  /// Random 128-bit hex token
  pub token: String,
  /// 发起更新的用户
  /// The user who initiated the update
  pub user: String,
  /// 更新后的作业配置
  /// The updated job configuration
  pub job: JobConfig,
  /// 更新发起时各实例的旧任务配置
  /// Per-instance task configurations captured when the update was initiated
  pub old_tasks: BTreeMap<i32, TaskConfig>,
}

/// 任务 ID 生成函数，可注入以便测试
/// Task id generation function, injectable for tests
pub type TaskIdGenerator = Arc<dyn Fn(&TaskConfig) -> String + Send + Sync>;

/// 默认任务 ID 生成器：作业路径加进程内单调计数器
/// Default task id generator: job path plus a process-local monotonic counter
///
/// 计数器在构造时初始化，不跨重启持久
/// The counter is initialized at construction and is not durable across
/// restarts
pub fn default_task_id_generator() -> TaskIdGenerator {
  let counter = AtomicU64::new(0);
  Arc::new(move |config: &TaskConfig| {
    let seq = counter.fetch_add(1, Ordering::Relaxed);
    format!(
      "{}-{}-{}-{}-{:08}",
      config.owner.role, config.environment, config.job_name, config.instance_id, seq
    )
  })
}

//! 任务调度状态
//! Task schedule status
//!
//! 任务生命周期状态机的状态集合；终止状态一经进入不再离开
//! The set of states of the task lifecycle state machine; terminal states
//! are never left once entered

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 任务调度状态
/// Task schedule status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScheduleStatus {
  /// 任务等待分配
  /// Task is waiting to be assigned
  Pending,
  /// 任务已分配到一台机器
  /// Task has been assigned to a machine
  Assigned,
  /// 执行器正在准备运行任务
  /// The executor is preparing to run the task
  Starting,
  /// 任务正在运行
  /// Task is running
  Running,
  /// 任务因滚动更新正在被终止
  /// Task is being terminated as part of a rolling update
  Updating,
  /// 任务因更新回滚正在被终止
  /// Task is being terminated as part of an update rollback
  Rollback,
  /// 任务因重启请求正在被终止
  /// Task is being terminated due to a restart request
  Restarting,
  /// 用户请求终止任务，等待执行器确认
  /// A user requested the task be killed, awaiting executor acknowledgement
  Killing,
  /// 任务正常结束（终止状态）
  /// Task completed normally (terminal)
  Finished,
  /// 任务异常退出（终止状态）
  /// Task exited abnormally (terminal)
  Failed,
  /// 任务被终止（终止状态）
  /// Task was killed (terminal)
  Killed,
  /// 任务丢失（终止状态）
  /// Task was lost (terminal)
  Lost,
}

/// 终止状态集合
/// The set of terminal states
pub const TERMINAL_STATES: [ScheduleStatus; 4] = [
  ScheduleStatus::Finished,
  ScheduleStatus::Failed,
  ScheduleStatus::Killed,
  ScheduleStatus::Lost,
];

/// 活跃（非终止）状态集合
/// The set of active (non-terminal) states
pub const ACTIVE_STATES: [ScheduleStatus; 8] = [
  ScheduleStatus::Pending,
  ScheduleStatus::Assigned,
  ScheduleStatus::Starting,
  ScheduleStatus::Running,
  ScheduleStatus::Updating,
  ScheduleStatus::Rollback,
  ScheduleStatus::Restarting,
  ScheduleStatus::Killing,
];

impl ScheduleStatus {
  /// 是否为终止状态
  /// Whether this is a terminal state
  pub fn is_terminal(self) -> bool {
    TERMINAL_STATES.contains(&self)
  }

  /// 是否为活跃状态
  /// Whether this is an active state
  pub fn is_active(self) -> bool {
    !self.is_terminal()
  }

  /// 将状态转换为字符串
  /// Convert the status to a string
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Assigned => "assigned",
      Self::Starting => "starting",
      Self::Running => "running",
      Self::Updating => "updating",
      Self::Rollback => "rollback",
      Self::Restarting => "restarting",
      Self::Killing => "killing",
      Self::Finished => "finished",
      Self::Failed => "failed",
      Self::Killed => "killed",
      Self::Lost => "lost",
    }
  }
}

impl FromStr for ScheduleStatus {
  type Err = ();

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s {
      "pending" => Ok(Self::Pending),
      "assigned" => Ok(Self::Assigned),
      "starting" => Ok(Self::Starting),
      "running" => Ok(Self::Running),
      "updating" => Ok(Self::Updating),
      "rollback" => Ok(Self::Rollback),
      "restarting" => Ok(Self::Restarting),
      "killing" => Ok(Self::Killing),
      "finished" => Ok(Self::Finished),
      "failed" => Ok(Self::Failed),
      "killed" => Ok(Self::Killed),
      "lost" => Ok(Self::Lost),
      _ => Err(()),
    }
  }
}

impl std::fmt::Display for ScheduleStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

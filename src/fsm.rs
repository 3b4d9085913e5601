//! 任务状态机转移表
//! Task state machine transition table
//!
//! 纯函数：给定任务当前状态与目标状态，给出下一状态与要执行的工作项。
//! 终止状态吸收一切后续转移；不合法的转移被静默丢弃。
//! A pure function: given a task's current status and a target status it
//! yields the next status and the work items to perform. Terminal states
//! absorb all further transitions; illegal transitions are silently dropped.

use crate::base::status::ScheduleStatus;
use crate::task::ScheduledTask;

/// 状态机触发的外部工作项
/// External work items triggered by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkItem {
  /// 向执行器驱动发送终止指令
  /// Send a kill instruction to the executor driver
  Kill,
  /// 以本任务为祖先插入后继任务
  /// Insert a successor task with this task as its ancestor
  Reschedule,
  /// 持久化新状态并追加任务事件
  /// Persist the new status and append a task event
  UpdateState,
  /// 从存储中删除本任务
  /// Delete this task from the store
  Delete,
  /// 累加失败计数
  /// Increment the failure count
  IncrementFailures,
}

/// 一次被接受的转移
/// One accepted transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
  /// 转移后的状态
  /// The status after the transition
  pub next: ScheduleStatus,
  /// 按执行顺序排列的工作项
  /// Work items in execution order
  pub work: Vec<WorkItem>,
}

impl TransitionPlan {
  fn to(next: ScheduleStatus, work: Vec<WorkItem>) -> Option<Self> {
    Some(Self { next, work })
  }

  /// 本计划是否改变持久化状态（用于转移计数）
  /// Whether the plan changes persisted state (used for transition counting)
  pub fn changes_state(&self) -> bool {
    self
      .work
      .iter()
      .any(|w| matches!(w, WorkItem::UpdateState | WorkItem::Delete))
  }
}

/// 处于终止前清场状态时，是否仍需补发终止指令
/// Whether a kill must be re-sent while the task is draining toward terminal
fn is_kill_pending(status: ScheduleStatus) -> bool {
  matches!(
    status,
    ScheduleStatus::Killing
      | ScheduleStatus::Updating
      | ScheduleStatus::Rollback
      | ScheduleStatus::Restarting
  )
}

/// 计算一次状态转移
/// Plan a single state transition
///
/// 返回 `None` 表示转移被丢弃：来自终止状态、目标与当前相同、或组合不合法
/// `None` means the transition is dropped: out of a terminal state, target
/// equal to current, or an illegal combination
pub fn plan(task: &ScheduledTask, target: ScheduleStatus) -> Option<TransitionPlan> {
  use ScheduleStatus::*;
  use WorkItem::*;

  let current = task.status;
  let config = &task.assigned_task.task;

  // 终止状态一经进入即吸收一切转移
  // Terminal states absorb every transition once entered
  if current.is_terminal() || current == target {
    return None;
  }

  // 清场状态下执行器仍报告运行：补发终止指令，状态不变
  // The executor still reports the task running while it is draining:
  // re-send the kill, leave the state untouched
  if is_kill_pending(current) && matches!(target, Starting | Running) {
    return TransitionPlan::to(current, vec![Kill]);
  }

  // 失败是否触发重调度：服务任务永远重调度，批任务受失败上限约束
  // Whether a failure reschedules: service tasks always do, batch tasks are
  // bounded by the failure limit
  let reschedule_on_failure =
    config.is_service || task.failure_count + 1 < config.max_task_failures;

  match (current, target) {
    (Pending, Assigned) => TransitionPlan::to(Assigned, vec![UpdateState]),
    // 尚未离开 PENDING 的任务被终止时直接删除
    // A task killed before it ever left PENDING is deleted outright
    (Pending, Killing) => TransitionPlan::to(Killed, vec![Delete]),

    (Assigned, Starting) => TransitionPlan::to(Starting, vec![UpdateState]),
    (Assigned | Starting, Running) => TransitionPlan::to(Running, vec![UpdateState]),

    (Assigned | Starting | Running, Lost) => {
      TransitionPlan::to(Lost, vec![UpdateState, Reschedule])
    }
    (Assigned | Starting | Running, Finished) => {
      if config.is_service {
        TransitionPlan::to(Finished, vec![UpdateState, Reschedule])
      } else {
        TransitionPlan::to(Finished, vec![UpdateState])
      }
    }
    (Assigned | Starting | Running, Failed) => {
      if reschedule_on_failure {
        TransitionPlan::to(Failed, vec![IncrementFailures, UpdateState, Reschedule])
      } else {
        TransitionPlan::to(Failed, vec![IncrementFailures, UpdateState])
      }
    }
    // 未经 KILLING 的直接终止来自执行器侧，一律重调度
    // A direct kill that bypassed KILLING came from the executor side and
    // always reschedules
    (Assigned | Starting | Running, Killed) => {
      TransitionPlan::to(Killed, vec![UpdateState, Reschedule])
    }

    // 用户终止请求
    // User kill request
    (Assigned | Starting | Running, Killing) => {
      TransitionPlan::to(Killing, vec![UpdateState, Kill])
    }
    (Updating | Rollback | Restarting, Killing) => {
      TransitionPlan::to(Killing, vec![UpdateState, Kill])
    }

    // 滚动更新、回滚与重启都以终止现任务开场
    // Updates, rollbacks and restarts all open by terminating the task
    (Assigned | Starting | Running, Updating) => {
      TransitionPlan::to(Updating, vec![UpdateState, Kill])
    }
    (Assigned | Starting | Running, Rollback) => {
      TransitionPlan::to(Rollback, vec![UpdateState, Kill])
    }
    (Assigned | Starting | Running, Restarting) => {
      TransitionPlan::to(Restarting, vec![UpdateState, Kill])
    }

    // 清场状态到达终止：更新流程以相应配置重调度，用户终止不重调度
    // Draining states reaching terminal: update flows reschedule with the
    // appropriate configuration, a user kill does not
    (Killing, Finished | Failed | Killed | Lost) => {
      TransitionPlan::to(target, vec![UpdateState])
    }
    (Updating | Rollback | Restarting, Finished | Failed | Killed | Lost) => {
      TransitionPlan::to(target, vec![UpdateState, Reschedule])
    }

    _ => None,
  }
}

//! 任务查询模块
//! Task query module
//!
//! 对已调度任务的可组合谓词：零个或多个维度同时生效，维度之间取交集
//! A composable predicate over scheduled tasks: zero or more dimensions apply
//! at once and intersect

use crate::base::status::{ScheduleStatus, ACTIVE_STATES};
use crate::task::{JobKey, ScheduledTask};
use std::collections::BTreeSet;

/// 任务查询
/// Task query
///
/// 空集合表示该维度不做过滤
/// An empty set means the dimension is unconstrained
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
  /// 按角色过滤
  /// Filter by role
  pub role: Option<String>,
  /// 按作业键过滤
  /// Filter by job key
  pub job_key: Option<JobKey>,
  /// 按实例编号过滤
  /// Filter by instance ids
  pub instance_ids: BTreeSet<i32>,
  /// 按任务 ID 过滤
  /// Filter by task ids
  pub task_ids: BTreeSet<String>,
  /// 按状态过滤
  /// Filter by statuses
  pub statuses: BTreeSet<ScheduleStatus>,
  /// 按分配主机过滤
  /// Filter by assigned host
  pub slave_host: Option<String>,
}

impl TaskQuery {
  /// 无约束查询，匹配所有任务
  /// Unconstrained query matching every task
  pub fn unscoped() -> Self {
    Self::default()
  }

  /// 按作业键限定
  /// Scope to a job key
  pub fn job_scoped(key: &JobKey) -> Self {
    Self {
      job_key: Some(key.clone()),
      ..Self::default()
    }
  }

  /// 按角色限定
  /// Scope to a role
  pub fn role_scoped<R: Into<String>>(role: R) -> Self {
    Self {
      role: Some(role.into()),
      ..Self::default()
    }
  }

  /// 按单个任务 ID 限定
  /// Scope to a single task id
  pub fn task_scoped<I: Into<String>>(task_id: I) -> Self {
    Self::unscoped().by_id(task_id)
  }

  /// 按作业内单个实例限定
  /// Scope to a single instance within a job
  pub fn instance_scoped(key: &JobKey, instance_id: i32) -> Self {
    Self::job_scoped(key).by_instance(instance_id)
  }

  /// 追加任务 ID 约束
  /// Add a task id constraint
  pub fn by_id<I: Into<String>>(mut self, task_id: I) -> Self {
    self.task_ids.insert(task_id.into());
    self
  }

  /// 追加任务 ID 集合约束
  /// Add a task id set constraint
  pub fn by_ids<I, S>(mut self, task_ids: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.task_ids.extend(task_ids.into_iter().map(Into::into));
    self
  }

  /// 追加实例约束
  /// Add an instance constraint
  pub fn by_instance(mut self, instance_id: i32) -> Self {
    self.instance_ids.insert(instance_id);
    self
  }

  /// 追加实例集合约束
  /// Add an instance set constraint
  pub fn by_instances<I: IntoIterator<Item = i32>>(mut self, instance_ids: I) -> Self {
    self.instance_ids.extend(instance_ids);
    self
  }

  /// 追加状态约束
  /// Add a status constraint
  pub fn by_status(mut self, status: ScheduleStatus) -> Self {
    self.statuses.insert(status);
    self
  }

  /// 追加分配主机约束
  /// Add an assigned host constraint
  pub fn by_slave_host<H: Into<String>>(mut self, host: H) -> Self {
    self.slave_host = Some(host.into());
    self
  }

  /// 限定为活跃（非终止）状态
  /// Restrict to active (non-terminal) statuses
  pub fn active(mut self) -> Self {
    self.statuses = ACTIVE_STATES.into_iter().collect();
    self
  }

  /// 是否严格按作业限定：仅设置了作业键，无其它维度
  /// Whether the query is strictly job scoped: only the job key is set
  ///
  /// 严格按作业限定的 kill 才会移除 cron 注册
  /// Only a strictly job-scoped kill removes a cron registration
  pub fn is_only_job_scoped(&self) -> bool {
    self.job_key.is_some()
      && self.role.is_none()
      && self.instance_ids.is_empty()
      && self.task_ids.is_empty()
      && self.statuses.is_empty()
      && self.slave_host.is_none()
  }

  /// 判断任务是否匹配本查询
  /// Whether a task matches this query
  pub fn matches(&self, task: &ScheduledTask) -> bool {
    if let Some(role) = &self.role {
      if &task.assigned_task.task.owner.role != role {
        return false;
      }
    }
    if let Some(key) = &self.job_key {
      if &task.job_key() != key {
        return false;
      }
    }
    if !self.instance_ids.is_empty() && !self.instance_ids.contains(&task.instance_id()) {
      return false;
    }
    if !self.task_ids.is_empty() && !self.task_ids.contains(task.task_id()) {
      return false;
    }
    if !self.statuses.is_empty() && !self.statuses.contains(&task.status) {
      return false;
    }
    if let Some(host) = &self.slave_host {
      if task.assigned_task.slave_host.as_ref() != Some(host) {
        return false;
      }
    }
    true
  }
}

//! 启动回填
//! Startup backfill
//!
//! 在对外服务前的一个写事务内执行两件事：为旧数据补齐缺省字段，
//! 并强制实例唯一性（同一作业同一实例至多一个活跃任务）
//! Runs two passes in one write transaction before serving external
//! requests: populate defaulted fields on legacy rows, and enforce instance
//! uniqueness (at most one active task per job instance)

use crate::base::status::ScheduleStatus;
use crate::base::{Clock, MutableStore, TaskStateChange};
use crate::config::populate_defaults;
use crate::query::TaskQuery;
use crate::task::{JobKey, TaskEvent};
use std::collections::BTreeMap;

/// 对存储执行回填；返回待发布的状态变更事件
/// Backfill the store; returns the state change events to publish
pub fn backfill(
  store: &mut dyn MutableStore,
  clock: &dyn Clock,
  scheduler_host: &str,
) -> Vec<TaskStateChange> {
  populate_legacy_configs(store);
  enforce_instance_uniqueness(store, clock, scheduler_host)
}

/// 为缺少现代字段的任务配置补齐缺省值
/// Populate defaults on task configurations lacking modern fields
fn populate_legacy_configs(store: &mut dyn MutableStore) {
  let tasks = store.fetch_tasks(&TaskQuery::unscoped());
  for task in tasks {
    let mut config = task.assigned_task.task.clone();
    populate_defaults(&mut config);
    if config != task.assigned_task.task {
      tracing::info!("Backfilling task configuration for {}", task.task_id());
      store.mutate_task(task.task_id(), &mut |t| {
        t.assigned_task.task = config.clone();
      });
    }
  }
}

/// 强制实例唯一性：每个 (作业键, 实例) 保留任务 ID 最小的活跃任务，
/// 其余直接置为 KILLED
/// Enforce instance uniqueness: keep the active task with the
/// lexicographically smallest task id per (job key, instance), force the
/// rest to KILLED
fn enforce_instance_uniqueness(
  store: &mut dyn MutableStore,
  clock: &dyn Clock,
  scheduler_host: &str,
) -> Vec<TaskStateChange> {
  let active = store.fetch_tasks(&TaskQuery::unscoped().active());

  let mut groups: BTreeMap<(JobKey, i32), Vec<(String, ScheduleStatus)>> = BTreeMap::new();
  for task in active {
    groups
      .entry((task.job_key(), task.instance_id()))
      .or_default()
      .push((task.task_id().to_string(), task.status));
  }

  let mut changes = Vec::new();
  for ((key, instance_id), mut tasks) in groups {
    if tasks.len() < 2 {
      continue;
    }
    tasks.sort_by(|a, b| a.0.cmp(&b.0));
    tracing::warn!(
      "Instance {} of {} has {} active tasks, keeping {}",
      instance_id,
      key,
      tasks.len(),
      tasks[0].0
    );
    for (task_id, old_status) in tasks.into_iter().skip(1) {
      let message = Some("Killed duplicate instance".to_string());
      let event = TaskEvent {
        timestamp: clock.now(),
        status: ScheduleStatus::Killed,
        message: message.clone(),
        scheduler: scheduler_host.to_string(),
      };
      store.mutate_task(&task_id, &mut |t| {
        t.status = ScheduleStatus::Killed;
        t.task_events.push(event.clone());
      });
      changes.push(TaskStateChange {
        task_id,
        old_status: Some(old_status),
        new_status: ScheduleStatus::Killed,
        message,
      });
    }
  }
  changes
}

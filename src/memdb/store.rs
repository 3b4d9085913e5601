//! 内存任务存储实现
//! In-memory task store implementation
//!
//! 写事务在状态副本上执行，成功后整体换入；闭包报错时副本被丢弃，
//! 已发布状态不变
//! Write transactions run against a copy of the state and swap it in on
//! success; when the closure errors the copy is discarded and the published
//! state is untouched

use crate::base::{MutableStore, StoreSnapshot, TaskStore};
use crate::error::Result;
use crate::query::TaskQuery;
use crate::task::{JobConfig, JobKey, ScheduledTask, UpdateSession};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

/// 存储内部状态
/// Internal store state
#[derive(Debug, Clone, Default)]
struct Inner {
  /// 任务表 - key: task_id
  /// Task table - key: task_id
  tasks: BTreeMap<String, ScheduledTask>,
  /// 作业配置表
  /// Job configuration table
  jobs: BTreeMap<JobKey, JobConfig>,
  /// 在途更新会话表
  /// In-flight update session table
  updates: BTreeMap<JobKey, UpdateSession>,
}

impl StoreSnapshot for Inner {
  fn fetch_tasks(&self, query: &TaskQuery) -> Vec<ScheduledTask> {
    // 任务 ID 限定时按键直查，避免全表扫描
    // Direct lookup when the query carries task ids, avoiding a full scan
    if !query.task_ids.is_empty() {
      return query
        .task_ids
        .iter()
        .filter_map(|id| self.tasks.get(id))
        .filter(|task| query.matches(task))
        .cloned()
        .collect();
    }
    self
      .tasks
      .values()
      .filter(|task| query.matches(task))
      .cloned()
      .collect()
  }

  fn fetch_job(&self, key: &JobKey) -> Option<JobConfig> {
    self.jobs.get(key).cloned()
  }

  fn fetch_jobs(&self) -> Vec<JobConfig> {
    self.jobs.values().cloned().collect()
  }

  fn fetch_update(&self, key: &JobKey) -> Option<UpdateSession> {
    self.updates.get(key).cloned()
  }
}

impl MutableStore for Inner {
  fn save_tasks(&mut self, tasks: Vec<ScheduledTask>) {
    for task in tasks {
      self.tasks.insert(task.task_id().to_string(), task);
    }
  }

  fn delete_tasks(&mut self, task_ids: &BTreeSet<String>) {
    for id in task_ids {
      self.tasks.remove(id);
    }
  }

  fn mutate_task(&mut self, task_id: &str, mutator: &mut dyn FnMut(&mut ScheduledTask)) -> bool {
    match self.tasks.get_mut(task_id) {
      Some(task) => {
        mutator(task);
        true
      }
      None => false,
    }
  }

  fn save_job(&mut self, job: JobConfig) {
    self.jobs.insert(job.key.clone(), job);
  }

  fn remove_job(&mut self, key: &JobKey) -> bool {
    self.jobs.remove(key).is_some()
  }

  fn save_update(&mut self, session: UpdateSession) {
    self.updates.insert(session.key.clone(), session);
  }

  fn remove_update(&mut self, key: &JobKey) -> bool {
    self.updates.remove(key).is_some()
  }
}

/// 内存任务存储
/// In-memory task store
#[derive(Debug, Default)]
pub struct MemStore {
  inner: RwLock<Inner>,
}

impl MemStore {
  /// 创建空存储
  /// Create an empty store
  pub fn new() -> Self {
    Self::default()
  }
}

impl TaskStore for MemStore {
  fn read<T>(&self, work: impl FnOnce(&dyn StoreSnapshot) -> T) -> T {
    let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
    work(&*guard)
  }

  fn write<T>(&self, work: impl FnOnce(&mut dyn MutableStore) -> Result<T>) -> Result<T> {
    let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
    let mut staged = guard.clone();
    let value = work(&mut staged)?;
    *guard = staged;
    Ok(value)
  }
}

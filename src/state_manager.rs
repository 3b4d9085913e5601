//! 状态管理器
//! State manager
//!
//! 持有每个任务的状态机，并对外暴露调度器需要的全部任务变更操作。
//! 每个变更在一个存储写事务内执行；终止指令与状态变更事件在事务提交后
//! 按序下发，提交失败时不产生任何外部副作用。
//! Owns the per-task state machine and exposes every task mutation the
//! scheduler needs. Each mutation executes inside one store write
//! transaction; kill instructions and state change events are dispatched in
//! order after the commit, and a failed commit produces no external side
//! effects.

use crate::base::constants::MAX_TASK_ID_LENGTH;
use crate::base::status::ScheduleStatus;
use crate::base::{Clock, Driver, EventSink, MutableStore, TaskStateChange, TaskStore};
use crate::error::{Error, Result};
use crate::fsm::{self, TransitionPlan, WorkItem};
use crate::query::TaskQuery;
use crate::task::{
  AssignedTask, ScheduledTask, TaskConfig, TaskEvent, TaskIdGenerator,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// 事务内缓冲、提交后下发的副作用
/// Side effects buffered inside the transaction and dispatched after commit
#[derive(Debug, Default)]
struct SideEffects {
  /// 要下发的终止指令
  /// Kill instructions to deliver
  kills: Vec<String>,
  /// 要发布的状态变更事件
  /// State change events to publish
  changes: Vec<TaskStateChange>,
}

/// 状态管理器
/// State manager
pub struct StateManager<S: TaskStore> {
  store: Arc<S>,
  driver: Arc<dyn Driver>,
  event_sink: Arc<dyn EventSink>,
  clock: Arc<dyn Clock>,
  task_id_generator: TaskIdGenerator,
  /// 记录在任务事件里的本机主机名
  /// Local host name recorded on task events
  scheduler_host: String,
}

impl<S: TaskStore> StateManager<S> {
  /// 创建状态管理器
  /// Create a state manager
  pub fn new(
    store: Arc<S>,
    driver: Arc<dyn Driver>,
    event_sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    task_id_generator: TaskIdGenerator,
  ) -> Self {
    let scheduler_host = hostname::get()
      .map(|h| h.to_string_lossy().into_owned())
      .unwrap_or_else(|_| "localhost".to_string());
    Self {
      store,
      driver,
      event_sink,
      clock,
      task_id_generator,
      scheduler_host,
    }
  }

  /// 本机主机名
  /// Local host name
  pub fn scheduler_host(&self) -> &str {
    &self.scheduler_host
  }

  /// 为每个配置生成任务 ID 并以 PENDING 状态持久化
  /// Generate a task id for each configuration and persist it as PENDING
  pub async fn insert_tasks(&self, configs: Vec<TaskConfig>) -> Result<Vec<ScheduledTask>> {
    let (tasks, effects) = self.store.write(|store| {
      let mut tasks = Vec::with_capacity(configs.len());
      let mut effects = SideEffects::default();
      for config in configs {
        let task = self.make_task(config, None)?;
        effects.changes.push(TaskStateChange {
          task_id: task.task_id().to_string(),
          old_status: None,
          new_status: ScheduleStatus::Pending,
          message: None,
        });
        tasks.push(task.clone());
        store.save_tasks(vec![task]);
      }
      Ok((tasks, effects))
    })?;
    self.dispatch(effects).await;
    Ok(tasks)
  }

  /// 将 PENDING 任务分配到一台机器，并绑定请求的命名端口
  /// Assign a PENDING task to a machine and bind the requested named ports
  ///
  /// 提供的端口数不足以覆盖请求的端口名时分配失败，事务不提交
  /// The assignment fails, without committing, when fewer ports are offered
  /// than port names were requested
  pub async fn assign_task(
    &self,
    task_id: &str,
    slave_host: &str,
    slave_id: &str,
    ports: BTreeSet<u16>,
  ) -> Result<AssignedTask> {
    let (assigned, effects) = self.store.write(|store| {
      let task = store
        .fetch_tasks(&TaskQuery::task_scoped(task_id))
        .pop()
        .ok_or_else(|| Error::TaskNotFound {
          id: task_id.to_string(),
        })?;
      if task.status != ScheduleStatus::Pending {
        return Err(Error::schedule(format!(
          "Task {} is in state {}, expected {}",
          task_id,
          task.status,
          ScheduleStatus::Pending
        )));
      }

      let requested = &task.assigned_task.task.requested_ports;
      if ports.len() < requested.len() {
        return Err(Error::invalid_config(format!(
          "Task {} requests {} ports but only {} were offered",
          task_id,
          requested.len(),
          ports.len()
        )));
      }
      // 端口名与端口号的配对是任意的，只保证一一对应
      // The pairing of names to ports is arbitrary, only required to be
      // one-to-one
      let assigned_ports: BTreeMap<String, u16> = requested
        .iter()
        .cloned()
        .zip(ports.iter().copied())
        .collect();

      let event = self.event(ScheduleStatus::Assigned, None);
      let mut updated = None;
      store.mutate_task(task_id, &mut |t| {
        t.status = ScheduleStatus::Assigned;
        t.assigned_task.slave_host = Some(slave_host.to_string());
        t.assigned_task.slave_id = Some(slave_id.to_string());
        t.assigned_task.assigned_ports = assigned_ports.clone();
        t.task_events.push(event.clone());
        updated = Some(t.assigned_task.clone());
      });
      let assigned = updated.ok_or_else(|| Error::TaskNotFound {
        id: task_id.to_string(),
      })?;

      let mut effects = SideEffects::default();
      effects.changes.push(TaskStateChange {
        task_id: task_id.to_string(),
        old_status: Some(ScheduleStatus::Pending),
        new_status: ScheduleStatus::Assigned,
        message: None,
      });
      Ok((assigned, effects))
    })?;
    self.dispatch(effects).await;
    Ok(assigned)
  }

  /// 对匹配查询的每个任务应用一次状态转移，返回实际转移的任务数
  /// Apply one state transition to each task matching the query, returning
  /// the number of tasks actually transitioned
  ///
  /// 不合法的转移被静默丢弃；终止状态永不离开
  /// Illegal transitions are dropped silently; terminal states are never left
  pub async fn change_state(
    &self,
    query: &TaskQuery,
    target: ScheduleStatus,
    message: Option<String>,
  ) -> Result<usize> {
    let (count, effects) = self.store.write(|store| {
      let tasks = store.fetch_tasks(query);
      let mut count = 0;
      let mut effects = SideEffects::default();
      for task in tasks {
        if let Some(plan) = fsm::plan(&task, target) {
          self.apply_plan(store, &task, &plan, &message, &mut effects)?;
          if plan.changes_state() {
            count += 1;
          }
        } else {
          tracing::debug!(
            "Dropping {} -> {} for task {}",
            task.status,
            target,
            task.task_id()
          );
        }
      }
      Ok((count, effects))
    })?;
    self.dispatch(effects).await;
    Ok(count)
  }

  /// 无条件删除一组任务
  /// Unconditionally delete a set of tasks
  pub fn delete_tasks(&self, task_ids: &BTreeSet<String>) -> Result<()> {
    self.store.write(|store| {
      store.delete_tasks(task_ids);
      Ok(())
    })
  }

  /// 快照读
  /// Snapshot read
  pub fn fetch_tasks(&self, query: &TaskQuery) -> Vec<ScheduledTask> {
    self.store.read(|store| store.fetch_tasks(query))
  }

  /// 发布一组状态变更事件（供启动回填使用）
  /// Publish a batch of state change events (used by the startup backfill)
  pub(crate) async fn publish_changes(&self, changes: Vec<TaskStateChange>) {
    self
      .dispatch(SideEffects {
        kills: Vec::new(),
        changes,
      })
      .await;
  }

  /// 构造一条任务事件
  /// Build one task event
  fn event(&self, status: ScheduleStatus, message: Option<String>) -> TaskEvent {
    TaskEvent {
      timestamp: self.clock.now(),
      status,
      message,
      scheduler: self.scheduler_host.clone(),
    }
  }

  /// 构造一个新的 PENDING 任务并校验生成的任务 ID 长度
  /// Build a new PENDING task, validating the generated task id length
  fn make_task(
    &self,
    config: TaskConfig,
    ancestor: Option<(&str, i32)>,
  ) -> Result<ScheduledTask> {
    let task_id = (self.task_id_generator)(&config);
    if task_id.len() > MAX_TASK_ID_LENGTH {
      return Err(Error::invalid_config(format!(
        "Task ID '{}' is {} bytes, exceeding the limit of {}",
        task_id,
        task_id.len(),
        MAX_TASK_ID_LENGTH
      )));
    }
    Ok(ScheduledTask {
      status: ScheduleStatus::Pending,
      failure_count: ancestor.map(|(_, failures)| failures).unwrap_or(0),
      ancestor_id: ancestor.map(|(id, _)| id.to_string()),
      assigned_task: AssignedTask {
        task_id,
        slave_id: None,
        slave_host: None,
        assigned_ports: BTreeMap::new(),
        task: config,
      },
      task_events: vec![self.event(ScheduleStatus::Pending, None)],
    })
  }

  /// 选择后继任务的配置
  /// Choose the configuration of the successor task
  ///
  /// 更新中的任务以新配置重调度，回滚中的任务以旧配置重调度，
  /// 其余情况沿用原配置
  /// A task under update reschedules with the new configuration, one under
  /// rollback with the old configuration, everything else keeps its own
  fn successor_config(
    &self,
    store: &dyn MutableStore,
    task: &ScheduledTask,
  ) -> Option<TaskConfig> {
    let key = task.job_key();
    let instance_id = task.instance_id();
    match task.status {
      ScheduleStatus::Updating => match store.fetch_update(&key) {
        Some(session) => Some(session.job.task_for_instance(instance_id)),
        None => {
          tracing::warn!(
            "No update session for {} while rescheduling updated task {}, keeping its configuration",
            key,
            task.task_id()
          );
          Some(task.assigned_task.task.clone())
        }
      },
      ScheduleStatus::Rollback => match store
        .fetch_update(&key)
        .and_then(|session| session.old_tasks.get(&instance_id).cloned())
      {
        Some(config) => Some(config),
        None => {
          tracing::warn!(
            "No prior configuration for instance {} of {}, not rescheduling task {}",
            instance_id,
            key,
            task.task_id()
          );
          None
        }
      },
      _ => Some(task.assigned_task.task.clone()),
    }
  }

  /// 在事务内按序执行一次转移的工作项
  /// Execute the work items of one transition, in order, inside the
  /// transaction
  fn apply_plan(
    &self,
    store: &mut dyn MutableStore,
    task: &ScheduledTask,
    plan: &TransitionPlan,
    message: &Option<String>,
    effects: &mut SideEffects,
  ) -> Result<()> {
    let task_id = task.task_id().to_string();
    let incremented = plan.work.contains(&WorkItem::IncrementFailures);

    for work in &plan.work {
      match work {
        WorkItem::IncrementFailures => {
          store.mutate_task(&task_id, &mut |t| t.failure_count += 1);
        }
        WorkItem::UpdateState => {
          let event = self.event(plan.next, message.clone());
          store.mutate_task(&task_id, &mut |t| {
            t.status = plan.next;
            t.task_events.push(event.clone());
          });
          effects.changes.push(TaskStateChange {
            task_id: task_id.clone(),
            old_status: Some(task.status),
            new_status: plan.next,
            message: message.clone(),
          });
        }
        WorkItem::Reschedule => {
          if let Some(config) = self.successor_config(store, task) {
            let failures = task.failure_count + i32::from(incremented);
            let successor = self.make_task(config, Some((&task_id, failures)))?;
            effects.changes.push(TaskStateChange {
              task_id: successor.task_id().to_string(),
              old_status: None,
              new_status: ScheduleStatus::Pending,
              message: None,
            });
            tracing::debug!(
              "Rescheduling task {} as {}",
              task_id,
              successor.task_id()
            );
            store.save_tasks(vec![successor]);
          }
        }
        WorkItem::Delete => {
          store.delete_tasks(&[task_id.clone()].into_iter().collect());
          effects.changes.push(TaskStateChange {
            task_id: task_id.clone(),
            old_status: Some(task.status),
            new_status: plan.next,
            message: message.clone(),
          });
        }
        WorkItem::Kill => {
          effects.kills.push(task_id.clone());
        }
      }
    }
    Ok(())
  }

  /// 提交后下发副作用：先终止指令，后事件发布
  /// Dispatch side effects after commit: kills first, then event publication
  ///
  /// 下发失败只记录日志，已提交的状态不回退
  /// Delivery failures are only logged; committed state is never undone
  async fn dispatch(&self, effects: SideEffects) {
    for task_id in effects.kills {
      if let Err(e) = self.driver.kill_task(&task_id).await {
        tracing::warn!("Failed to deliver kill for task {}: {}", task_id, e);
      }
    }
    for change in effects.changes {
      if let Err(e) = self.event_sink.publish(change.clone()).await {
        tracing::warn!(
          "Failed to publish state change for task {}: {}",
          change.task_id,
          e
        );
      }
    }
  }
}

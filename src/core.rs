//! 调度器核心门面
//! Scheduler core facade
//!
//! 作业与任务变更的统一入口：作业准入、实例物化、cron 作业、
//! 终止与重启分发、滚动更新与回滚编排
//! The single entry point for job and task mutation: job admission, instance
//! materialization, cron jobs, kill and restart dispatch, rolling update and
//! rollback orchestration

use crate::backfill;
use crate::base::status::ScheduleStatus;
use crate::base::{Clock, CronTrigger, JobFilter, JobFilterResult, TaskStore};
use crate::config::ParsedJob;
use crate::cron::CronJobRegistry;
use crate::error::{Error, Result};
use crate::query::TaskQuery;
use crate::state_manager::StateManager;
use crate::task::{JobKey, ScheduledTask, TaskConfig, UpdateSession};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// 单个实例在一次 update/rollback 调用中的处理结果
/// Outcome of one instance in an update/rollback call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardUpdateResult {
  /// 该实例此前不存在，已新增
  /// The instance did not exist and was added
  Added,
  /// 该实例正在以目标配置重启
  /// The instance is restarting with the target configuration
  Restarting,
  /// 该实例的配置与目标一致，未动
  /// The instance already matches the target configuration
  Unchanged,
}

/// finish_update 的结果语义
/// Result semantics of finish_update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
  /// 更新成功，收敛到新配置
  /// The update succeeded, converge on the new configuration
  Success,
  /// 更新失败，收敛到旧配置
  /// The update failed, converge on the old configuration
  Failed,
  /// 强制终止更新会话
  /// Forcefully terminate the update session
  Terminate,
}

/// 调度器核心
/// Scheduler core
pub struct SchedulerCore<S: TaskStore> {
  store: Arc<S>,
  state_manager: Arc<StateManager<S>>,
  cron: CronJobRegistry,
  job_filter: Arc<dyn JobFilter>,
  clock: Arc<dyn Clock>,
}

impl<S: TaskStore> SchedulerCore<S> {
  /// 创建调度器核心并在构造期接好 cron 回调
  /// Create the scheduler core, wiring the cron callback at construction
  pub fn new(
    store: Arc<S>,
    state_manager: Arc<StateManager<S>>,
    cron_trigger: Arc<dyn CronTrigger>,
    job_filter: Arc<dyn JobFilter>,
    clock: Arc<dyn Clock>,
  ) -> Arc<Self> {
    Arc::new_cyclic(|weak: &Weak<Self>| {
      let weak = weak.clone();
      let on_trigger = Arc::new(move |key: JobKey| {
        let Some(core) = weak.upgrade() else {
          return;
        };
        tokio::spawn(async move {
          if let Err(e) = core.start_cron_job(&key).await {
            tracing::warn!("Cron run of job {} failed: {}", key, e);
          }
        });
      });
      Self {
        store,
        state_manager,
        cron: CronJobRegistry::new(cron_trigger, on_trigger),
        job_filter,
        clock,
      }
    })
  }

  /// 对外服务前的启动流程：回填存储并恢复 cron 注册
  /// Startup flow ahead of serving: backfill the store and recover cron
  /// registrations
  pub async fn startup(&self) -> Result<()> {
    let host = self.state_manager.scheduler_host().to_string();
    let clock = self.clock.clone();
    let changes = self
      .store
      .write(|store| Ok(backfill::backfill(store, clock.as_ref(), &host)))?;
    self.state_manager.publish_changes(changes).await;

    for job in self.store.read(|store| store.fetch_jobs()) {
      if job.is_cron() && !self.cron.has_job(&job.key) {
        self.cron.schedule(job)?;
      }
    }
    Ok(())
  }

  /// cron 注册表（只读访问）
  /// The cron job registry (read-only access)
  pub fn cron(&self) -> &CronJobRegistry {
    &self.cron
  }

  /// 状态管理器
  /// The state manager
  pub fn state_manager(&self) -> &StateManager<S> {
    &self.state_manager
  }

  /// 准入一个作业
  /// Admit a job
  ///
  /// cron 作业仅注册不物化；普通作业立即物化 `[0, instance_count)` 的
  /// PENDING 任务
  /// A cron job is registered without materializing; a regular job
  /// immediately materializes PENDING tasks for `[0, instance_count)`
  pub async fn create_job(&self, parsed: ParsedJob) -> Result<()> {
    let job = parsed.job();

    if let JobFilterResult::Fail(reason) = self.job_filter.filter(job) {
      return Err(Error::invalid_config(format!(
        "Job filter rejected {}: {}",
        job.key, reason
      )));
    }
    if self.cron.has_job(&job.key) {
      return Err(Error::schedule(format!(
        "Job already exists: {}",
        job.key
      )));
    }
    let active = self
      .state_manager
      .fetch_tasks(&TaskQuery::job_scoped(&job.key).active());
    if !active.is_empty() {
      return Err(Error::schedule(format!(
        "Job already exists: {}",
        job.key
      )));
    }

    if let Some(schedule) = &job.cron_schedule {
      if !self.cron.is_valid_schedule(schedule) {
        return Err(Error::InvalidCronSchedule {
          expr: schedule.clone(),
        });
      }
      let job = job.clone();
      self.store.write(|store| {
        store.save_job(job.clone());
        Ok(())
      })?;
      self.cron.schedule(job)?;
    } else {
      self.state_manager.insert_tasks(parsed.task_configs()).await?;
      tracing::info!(
        "Accepted job {} with {} instances",
        job.key,
        job.instance_count
      );
    }
    Ok(())
  }

  /// 触发一次 cron 作业运行，按冲突策略处理既有活跃任务
  /// Trigger one cron job run, handling existing active tasks per the
  /// collision policy
  pub async fn start_cron_job(&self, key: &JobKey) -> Result<()> {
    use crate::task::CronCollisionPolicy::*;

    let job = self.cron.job(key).ok_or_else(|| {
      Error::schedule(format!("No cron job registered for {key}"))
    })?;
    let configs: Vec<TaskConfig> = (0..job.instance_count)
      .map(|instance_id| job.task_for_instance(instance_id))
      .collect();

    let active = self
      .state_manager
      .fetch_tasks(&TaskQuery::job_scoped(key).active());
    if active.is_empty() {
      self.state_manager.insert_tasks(configs).await?;
      return Ok(());
    }

    match job.cron_collision_policy {
      KillExisting => {
        tracing::info!(
          "Cron job {} fired with {} tasks still active, killing them",
          key,
          active.len()
        );
        self
          .state_manager
          .change_state(
            &TaskQuery::job_scoped(key).active(),
            ScheduleStatus::Killing,
            Some("Killed by overlapping cron run".to_string()),
          )
          .await?;
        self.state_manager.insert_tasks(configs).await?;
      }
      CancelNew => {
        tracing::info!("Cron job {} fired while tasks are active, run cancelled", key);
      }
      RunOverlap => {
        // 上一轮还停在 PENDING 时不叠加新任务，避免队首堆积
        // Do not pile on while the previous run is still PENDING
        if active.iter().any(|t| t.status == ScheduleStatus::Pending) {
          tracing::info!(
            "Cron job {} suppressed, a previous run never left PENDING",
            key
          );
        } else {
          self.state_manager.insert_tasks(configs).await?;
        }
      }
    }
    Ok(())
  }

  /// 终止匹配查询的任务
  /// Kill the tasks matching the query
  ///
  /// PENDING 任务被直接删除，其余活跃任务转入 KILLING；严格按作业限定的
  /// 查询还会移除该作业的 cron 注册
  /// PENDING tasks are deleted outright, other active tasks move to KILLING;
  /// a strictly job-scoped query additionally removes the job's cron
  /// registration
  pub async fn kill_tasks(&self, query: &TaskQuery, user: &str) -> Result<()> {
    let mut cron_removed = false;
    if query.is_only_job_scoped() {
      if let Some(key) = query.job_key.clone() {
        if self.cron.deschedule(&key) {
          self.store.write(|store| {
            store.remove_job(&key);
            Ok(())
          })?;
          cron_removed = true;
        }
      }
    }

    let matched = self.state_manager.fetch_tasks(query);
    let active_ids: BTreeSet<String> = matched
      .iter()
      .filter(|task| task.is_active())
      .map(|task| task.task_id().to_string())
      .collect();

    // 匹配到任务即为合法调用；重复或多余的转移由状态机静默丢弃
    // Matching any task makes the call legitimate; redundant transitions
    // are dropped silently by the state machine
    if matched.is_empty() && !cron_removed {
      return Err(Error::schedule("Query matched no tasks and no cron job"));
    }

    let mut killed = 0;
    if !active_ids.is_empty() {
      killed = self
        .state_manager
        .change_state(
          &TaskQuery::unscoped().by_ids(active_ids),
          ScheduleStatus::Killing,
          Some(format!("Killed by {user}")),
        )
        .await?;
    }

    tracing::info!("{} killed {} tasks", user, killed);
    Ok(())
  }

  /// 重启作业的指定实例
  /// Restart the given instances of a job
  ///
  /// 任一实例没有活跃任务即整体失败；PENDING 实例视作已在重启
  /// Fails outright when any instance has no active task; a PENDING
  /// instance counts as already restarting
  pub async fn restart_shards(
    &self,
    key: &JobKey,
    instance_ids: &BTreeSet<i32>,
    user: &str,
  ) -> Result<()> {
    if instance_ids.is_empty() {
      return Err(Error::schedule("No instances to restart"));
    }

    let query = TaskQuery::job_scoped(key)
      .by_instances(instance_ids.iter().copied())
      .active();
    let active = self.state_manager.fetch_tasks(&query);
    let present: BTreeSet<i32> = active.iter().map(|task| task.instance_id()).collect();
    let missing: Vec<i32> = instance_ids.difference(&present).copied().collect();
    if !missing.is_empty() {
      return Err(Error::schedule(format!(
        "Instances {missing:?} of {key} have no active task"
      )));
    }

    self
      .state_manager
      .change_state(
        &query,
        ScheduleStatus::Restarting,
        Some(format!("Restarted by {user}")),
      )
      .await?;
    Ok(())
  }

  /// 发起滚动更新，返回保护会话的令牌
  /// Initiate a rolling update, returning the token protecting the session
  ///
  /// cron 作业直接替换注册配置并返回 None，不做滚动更新
  /// For a cron job the registered configuration is replaced and None is
  /// returned, no rolling update takes place
  pub async fn initiate_job_update(&self, parsed: ParsedJob) -> Result<Option<String>> {
    let job = parsed.job().clone();

    if let JobFilterResult::Fail(reason) = self.job_filter.filter(&job) {
      return Err(Error::invalid_config(format!(
        "Job filter rejected {}: {}",
        job.key, reason
      )));
    }

    if self.cron.has_job(&job.key) {
      if !job.is_cron() {
        return Err(Error::invalid_config(format!(
          "Job {} is cron-managed, the update must keep a cron schedule",
          job.key
        )));
      }
      self.store.write(|store| {
        store.save_job(job.clone());
        Ok(())
      })?;
      self.cron.replace(job)?;
      return Ok(None);
    }
    if job.is_cron() {
      return Err(Error::schedule(format!(
        "Job {} is not registered as a cron job",
        job.key
      )));
    }

    let token = Uuid::new_v4().simple().to_string();
    let session_token = token.clone();
    self.store.write(move |store| {
      let active = store.fetch_tasks(&TaskQuery::job_scoped(&job.key).active());
      if active.is_empty() {
        return Err(Error::schedule(format!("Job not found: {}", job.key)));
      }
      if active.iter().any(|task| {
        matches!(
          task.status,
          ScheduleStatus::Updating | ScheduleStatus::Rollback | ScheduleStatus::Restarting
        )
      }) {
        return Err(Error::schedule(format!(
          "Job {} has instances in a rolling operation",
          job.key
        )));
      }
      if store.fetch_update(&job.key).is_some() {
        return Err(Error::schedule(format!(
          "An update is already in progress for {}",
          job.key
        )));
      }

      let old_tasks: BTreeMap<i32, TaskConfig> = active
        .iter()
        .map(|task| (task.instance_id(), task.assigned_task.task.clone()))
        .collect();
      store.save_update(UpdateSession {
        key: job.key.clone(),
        token: session_token,
        user: job.owner.user.clone(),
        job,
        old_tasks,
      });
      Ok(())
    })?;
    Ok(Some(token))
  }

  /// 将指定实例推进到更新后的配置
  /// Advance the given instances to the updated configuration
  pub async fn update_shards(
    &self,
    key: &JobKey,
    user: &str,
    instance_ids: &BTreeSet<i32>,
    token: &str,
  ) -> Result<BTreeMap<i32, ShardUpdateResult>> {
    let session = self.validated_session(key, Some(token))?;
    let new_job = session.job.clone();

    // 超出新实例数窗口的实例留给 finish_update 收尾
    // Instances beyond the new instance-count window are left for
    // finish_update to reap
    let targets = move |instance_id: i32| -> Option<TaskConfig> {
      (instance_id >= 0 && instance_id < new_job.instance_count)
        .then(|| new_job.task_for_instance(instance_id))
    };
    self.modify_shards(key, user, instance_ids, targets, false).await
  }

  /// 将指定实例回退到更新前的配置
  /// Roll the given instances back to the pre-update configuration
  pub async fn rollback_shards(
    &self,
    key: &JobKey,
    user: &str,
    instance_ids: &BTreeSet<i32>,
    token: &str,
  ) -> Result<BTreeMap<i32, ShardUpdateResult>> {
    let session = self.validated_session(key, Some(token))?;
    let old_tasks = session.old_tasks.clone();
    let targets = move |instance_id: i32| old_tasks.get(&instance_id).cloned();
    self.modify_shards(key, user, instance_ids, targets, true).await
  }

  /// update/rollback 的共同骨架
  /// The shared skeleton of update and rollback
  ///
  /// `target_config` 给出每个实例应收敛到的配置；None 表示该实例在目标
  /// 配置下不存在：更新时忽略（交给 finish_update），回滚时直接终止
  /// `target_config` yields the configuration each instance should converge
  /// on; None means the instance does not exist under the target: ignored
  /// during update (left to finish_update), killed outright during rollback
  async fn modify_shards(
    &self,
    key: &JobKey,
    user: &str,
    instance_ids: &BTreeSet<i32>,
    target_config: impl Fn(i32) -> Option<TaskConfig>,
    rollback: bool,
  ) -> Result<BTreeMap<i32, ShardUpdateResult>> {
    let target_state = if rollback {
      ScheduleStatus::Rollback
    } else {
      ScheduleStatus::Updating
    };

    let active = self.state_manager.fetch_tasks(
      &TaskQuery::job_scoped(key)
        .by_instances(instance_ids.iter().copied())
        .active(),
    );
    let by_instance: BTreeMap<i32, &ScheduledTask> = active
      .iter()
      .map(|task| (task.instance_id(), task))
      .collect();

    let mut results = BTreeMap::new();
    let mut to_transition = BTreeSet::new();
    let mut to_kill = BTreeSet::new();
    let mut to_rewrite: Vec<(String, TaskConfig)> = Vec::new();
    let mut to_add: Vec<TaskConfig> = Vec::new();

    for &instance_id in instance_ids {
      let target = target_config(instance_id);
      match (by_instance.get(&instance_id), target) {
        (Some(task), Some(config)) => {
          if task.assigned_task.task == config {
            results.insert(instance_id, ShardUpdateResult::Unchanged);
          } else if task.status == ScheduleStatus::Pending {
            // 未离开 PENDING 的任务原地换配置即可，无需终止
            // A task still PENDING is rewritten in place, nothing to kill
            to_rewrite.push((task.task_id().to_string(), config));
            results.insert(instance_id, ShardUpdateResult::Restarting);
          } else {
            to_transition.insert(task.task_id().to_string());
            results.insert(instance_id, ShardUpdateResult::Restarting);
          }
        }
        (Some(task), None) => {
          if rollback {
            // 更新新增的实例在回滚时直接终止，不再重调度
            // Instances the update added are killed outright on rollback
            to_kill.insert(task.task_id().to_string());
            results.insert(instance_id, ShardUpdateResult::Restarting);
          }
        }
        (None, Some(config)) => {
          to_add.push(config);
          results.insert(instance_id, ShardUpdateResult::Added);
        }
        (None, None) => {}
      }
    }

    if !to_rewrite.is_empty() {
      self.store.write(|store| {
        for (task_id, config) in &to_rewrite {
          store.mutate_task(task_id, &mut |task| {
            task.assigned_task.task = config.clone();
          });
        }
        Ok(())
      })?;
    }
    if !to_transition.is_empty() {
      self
        .state_manager
        .change_state(
          &TaskQuery::unscoped().by_ids(to_transition),
          target_state,
          Some(format!("Shard modified by {user}")),
        )
        .await?;
    }
    if !to_kill.is_empty() {
      self
        .state_manager
        .change_state(
          &TaskQuery::unscoped().by_ids(to_kill),
          ScheduleStatus::Killing,
          Some(format!("Instance removed by rollback from {user}")),
        )
        .await?;
    }
    if !to_add.is_empty() {
      self.state_manager.insert_tasks(to_add).await?;
    }

    Ok(results)
  }

  /// 结束更新会话并收敛实例集合
  /// Close the update session and converge the instance set
  ///
  /// SUCCESS 终止超出新实例数的孤儿实例；FAILED/TERMINATE 终止仅存在于
  /// 新配置下的实例。缺省令牌允许强制收尾
  /// SUCCESS reaps orphans beyond the new instance count; FAILED/TERMINATE
  /// reaps instances that exist only under the new configuration. An absent
  /// token allows a forced close
  pub async fn finish_update(
    &self,
    key: &JobKey,
    user: &str,
    token: Option<&str>,
    result: UpdateResult,
  ) -> Result<()> {
    let session = self.validated_session(key, token)?;

    let active = self
      .state_manager
      .fetch_tasks(&TaskQuery::job_scoped(key).active());
    let orphan_ids: BTreeSet<String> = active
      .iter()
      .filter(|task| match result {
        UpdateResult::Success => task.instance_id() >= session.job.instance_count,
        UpdateResult::Failed | UpdateResult::Terminate => {
          !session.old_tasks.contains_key(&task.instance_id())
        }
      })
      .map(|task| task.task_id().to_string())
      .collect();

    // 先撤会话再收尾，避免孤儿终止再次套用更新配置
    // Drop the session before reaping so the orphan kills do not re-apply
    // the update configuration
    self.store.write(|store| {
      store.remove_update(key);
      Ok(())
    })?;

    if !orphan_ids.is_empty() {
      self
        .state_manager
        .change_state(
          &TaskQuery::unscoped().by_ids(orphan_ids),
          ScheduleStatus::Killing,
          Some(format!("Instance removed when {user} closed the update")),
        )
        .await?;
    }
    tracing::info!("{} closed the update of {} as {:?}", user, key, result);
    Ok(())
  }

  /// 执行器状态回报入口，直接落到状态机
  /// Entry point of the executor status pipeline, fans out to the state
  /// machine
  pub async fn set_task_status(
    &self,
    query: &TaskQuery,
    status: ScheduleStatus,
    message: Option<String>,
  ) -> Result<usize> {
    self.state_manager.change_state(query, status, message).await
  }

  /// 下层报告任务所在机器丢失
  /// The layer below reports the tasks' machines as gone
  ///
  /// 活跃任务转入 LOST 并重调度；终止任务的记录被直接删除
  /// Active tasks move to LOST and reschedule; records of terminal tasks
  /// are deleted outright
  pub async fn tasks_deleted(&self, task_ids: &BTreeSet<String>) -> Result<()> {
    let tasks = self
      .state_manager
      .fetch_tasks(&TaskQuery::unscoped().by_ids(task_ids.iter().cloned()));

    let (active, terminal): (Vec<&ScheduledTask>, Vec<&ScheduledTask>) =
      tasks.iter().partition(|task| task.is_active());

    if !active.is_empty() {
      let ids: BTreeSet<String> = active
        .iter()
        .map(|task| task.task_id().to_string())
        .collect();
      self
        .state_manager
        .change_state(
          &TaskQuery::unscoped().by_ids(ids),
          ScheduleStatus::Lost,
          Some("Machine hosting the task is gone".to_string()),
        )
        .await?;
    }
    if !terminal.is_empty() {
      let ids: BTreeSet<String> = terminal
        .iter()
        .map(|task| task.task_id().to_string())
        .collect();
      self.state_manager.delete_tasks(&ids)?;
    }
    Ok(())
  }

  /// 校验更新会话与令牌
  /// Validate the update session and token
  fn validated_session(&self, key: &JobKey, token: Option<&str>) -> Result<UpdateSession> {
    let session = self
      .store
      .read(|store| store.fetch_update(key))
      .ok_or_else(|| Error::schedule(format!("No update in progress for {key}")))?;
    if let Some(token) = token {
      if token != session.token {
        return Err(Error::schedule(format!("Invalid update token for {key}")));
      }
    }
    Ok(session)
  }
}

//! cron 作业注册表与默认触发器
//! Cron job registry and default trigger
//!
//! 注册表维护 作业键 -> (作业配置, 调度句柄) 的映射；触发回调在构造时
//! 注入，注册表不反向持有调度器核心
//! The registry maps job key -> (job configuration, scheduling handle); the
//! trigger callback is injected at construction, the registry holds no
//! back-pointer to the scheduler core

use crate::base::{CronCallback, CronHandle, CronTrigger};
use crate::error::{Error, Result};
use crate::task::{JobConfig, JobKey};
use chrono::Utc;
use cron::Schedule;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// cron 触发时收到作业键的回调
/// Callback receiving the job key when a cron schedule fires
pub type CronJobCallback = Arc<dyn Fn(JobKey) + Send + Sync>;

/// 一条 cron 注册
/// One cron registration
#[derive(Clone)]
struct RegisteredJob {
  job: JobConfig,
  handle: CronHandle,
}

/// cron 作业注册表
/// Cron job registry
pub struct CronJobRegistry {
  trigger: Arc<dyn CronTrigger>,
  on_trigger: CronJobCallback,
  jobs: Mutex<BTreeMap<JobKey, RegisteredJob>>,
}

impl CronJobRegistry {
  /// 创建注册表
  /// Create a registry
  pub fn new(trigger: Arc<dyn CronTrigger>, on_trigger: CronJobCallback) -> Self {
    Self {
      trigger,
      on_trigger,
      jobs: Mutex::new(BTreeMap::new()),
    }
  }

  /// 校验 cron 表达式
  /// Validate a cron expression
  pub fn is_valid_schedule(&self, schedule: &str) -> bool {
    self.trigger.is_valid_schedule(schedule)
  }

  /// 注册作业并向触发器登记调度
  /// Register a job and install its schedule on the trigger
  pub fn schedule(&self, job: JobConfig) -> Result<()> {
    let schedule = job
      .cron_schedule
      .clone()
      .ok_or_else(|| Error::schedule(format!("Job {} has no cron schedule", job.key)))?;

    let key = job.key.clone();
    let callback: CronCallback = {
      let on_trigger = self.on_trigger.clone();
      let key = key.clone();
      Arc::new(move || on_trigger(key.clone()))
    };
    let handle = self.trigger.schedule(&schedule, callback)?;
    tracing::info!("Scheduled cron job {} with '{}'", key, schedule);

    let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
    jobs.insert(key, RegisteredJob { job, handle });
    Ok(())
  }

  /// 注销作业；未注册时返回 false
  /// Deschedule a job; returns false when it was not registered
  pub fn deschedule(&self, key: &JobKey) -> bool {
    let removed = {
      let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
      jobs.remove(key)
    };
    match removed {
      Some(entry) => {
        self.trigger.deschedule(&entry.handle);
        tracing::info!("Descheduled cron job {}", key);
        true
      }
      None => false,
    }
  }

  /// 替换注册：先注销旧配置，再登记新配置
  /// Replace a registration: deschedule the old configuration, then install
  /// the new one
  pub fn replace(&self, job: JobConfig) -> Result<()> {
    self.deschedule(&job.key);
    self.schedule(job)
  }

  /// 作业是否已注册
  /// Whether a job is registered
  pub fn has_job(&self, key: &JobKey) -> bool {
    let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
    jobs.contains_key(key)
  }

  /// 取单个注册的作业配置
  /// Fetch one registered job configuration
  pub fn job(&self, key: &JobKey) -> Option<JobConfig> {
    let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
    jobs.get(key).map(|entry| entry.job.clone())
  }

  /// 取所有注册的作业配置
  /// Fetch every registered job configuration
  pub fn jobs(&self) -> Vec<JobConfig> {
    let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
    jobs.values().map(|entry| entry.job.clone()).collect()
  }
}

/// 基于 tokio 的默认 cron 触发器
/// Default tokio-based cron trigger
///
/// 每条注册对应一个后台任务：计算下次触发时间、睡眠、调用回调
/// Each registration runs one background task: compute the next tick,
/// sleep, invoke the callback
#[derive(Default)]
pub struct TokioCronTrigger {
  workers: Mutex<HashMap<CronHandle, JoinHandle<()>>>,
}

impl TokioCronTrigger {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CronTrigger for TokioCronTrigger {
  fn is_valid_schedule(&self, schedule: &str) -> bool {
    Schedule::from_str(schedule).is_ok()
  }

  fn schedule(&self, schedule: &str, callback: CronCallback) -> Result<CronHandle> {
    let parsed = Schedule::from_str(schedule).map_err(|_| Error::InvalidCronSchedule {
      expr: schedule.to_string(),
    })?;
    let handle: CronHandle = Uuid::new_v4().simple().to_string();

    let worker = tokio::spawn(async move {
      loop {
        let now = Utc::now();
        let Some(next) = parsed.after(&now).next() else {
          // 表达式不会再触发
          // The expression will never fire again
          break;
        };
        let wait = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;
        callback();
      }
    });

    let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
    workers.insert(handle.clone(), worker);
    Ok(handle)
  }

  fn deschedule(&self, handle: &CronHandle) {
    let removed = {
      let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
      workers.remove(handle)
    };
    if let Some(worker) = removed {
      worker.abort();
    }
  }
}

impl Drop for TokioCronTrigger {
  fn drop(&mut self) {
    let workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
    for worker in workers.values() {
      worker.abort();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::task::{CronCollisionPolicy, Identity, TaskConfig};
  use std::sync::atomic::{AtomicUsize, Ordering};

  /// 记录调度与注销调用的假触发器
  /// Fake trigger recording schedule and deschedule calls
  #[derive(Default)]
  struct FakeTrigger {
    scheduled: AtomicUsize,
    descheduled: AtomicUsize,
  }

  impl CronTrigger for FakeTrigger {
    fn is_valid_schedule(&self, schedule: &str) -> bool {
      !schedule.is_empty()
    }

    fn schedule(&self, _schedule: &str, _callback: CronCallback) -> Result<CronHandle> {
      let n = self.scheduled.fetch_add(1, Ordering::SeqCst);
      Ok(format!("handle-{n}"))
    }

    fn deschedule(&self, _handle: &CronHandle) {
      self.descheduled.fetch_add(1, Ordering::SeqCst);
    }
  }

  fn cron_job(name: &str, schedule: &str) -> JobConfig {
    JobConfig {
      key: JobKey::new("role", "test", name),
      owner: Identity::new("role", "user"),
      instance_count: 1,
      task: TaskConfig {
        owner: Identity::new("role", "user"),
        environment: "test".to_string(),
        job_name: name.to_string(),
        instance_id: 0,
        num_cpus: 1.0,
        ram_mb: 64,
        disk_mb: 64,
        is_service: false,
        production: false,
        max_task_failures: 1,
        contact_email: None,
        requested_ports: Default::default(),
        constraints: Default::default(),
        executor_config: None,
        legacy_executor_data: None,
      },
      cron_schedule: Some(schedule.to_string()),
      cron_collision_policy: CronCollisionPolicy::default(),
    }
  }

  #[test]
  fn test_registry_round_trip() {
    let trigger = Arc::new(FakeTrigger::default());
    let registry = CronJobRegistry::new(trigger.clone(), Arc::new(|_| {}));
    let job = cron_job("nightly", "0 0 2 * * *");
    let key = job.key.clone();

    registry.schedule(job.clone()).unwrap();
    assert!(registry.has_job(&key));
    assert_eq!(registry.job(&key), Some(job));
    assert_eq!(registry.jobs().len(), 1);

    assert!(registry.deschedule(&key));
    assert!(!registry.has_job(&key));
    assert!(!registry.deschedule(&key));
    assert_eq!(trigger.descheduled.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_registry_rejects_non_cron_job() {
    let registry = CronJobRegistry::new(Arc::new(FakeTrigger::default()), Arc::new(|_| {}));
    let mut job = cron_job("nightly", "0 0 2 * * *");
    job.cron_schedule = None;
    assert!(registry.schedule(job).is_err());
  }

  #[test]
  fn test_replace_deschedules_old_registration() {
    let trigger = Arc::new(FakeTrigger::default());
    let registry = CronJobRegistry::new(trigger.clone(), Arc::new(|_| {}));

    registry.schedule(cron_job("nightly", "0 0 2 * * *")).unwrap();
    registry.replace(cron_job("nightly", "0 30 4 * * *")).unwrap();

    assert_eq!(trigger.scheduled.load(Ordering::SeqCst), 2);
    assert_eq!(trigger.descheduled.load(Ordering::SeqCst), 1);
    let stored = registry.job(&JobKey::new("role", "test", "nightly")).unwrap();
    assert_eq!(stored.cron_schedule.as_deref(), Some("0 30 4 * * *"));
  }

  #[tokio::test]
  async fn test_tokio_trigger_validates_expressions() {
    let trigger = TokioCronTrigger::new();
    assert!(trigger.is_valid_schedule("0 0 2 * * *"));
    assert!(!trigger.is_valid_schedule("not a schedule"));
    assert!(trigger
      .schedule("bogus", Arc::new(|| {}))
      .is_err());
  }

  #[tokio::test]
  async fn test_tokio_trigger_fires_callback() {
    let trigger = TokioCronTrigger::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    // 每秒触发一次
    // Fires every second
    let handle = trigger
      .schedule(
        "* * * * * *",
        Arc::new(move || {
          counter.fetch_add(1, Ordering::SeqCst);
        }),
      )
      .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
    trigger.deschedule(&handle);
    assert!(fired.load(Ordering::SeqCst) >= 1);
  }
}

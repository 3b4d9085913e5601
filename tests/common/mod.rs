//! 集成测试公共设施
//! Shared integration test fixtures
//!
//! 提供可控的时钟、记录型驱动与事件总线、假 cron 触发器，以及
//! 组装好的调度器测试环境
//! Provides a controllable clock, recording driver and event sink, a fake
//! cron trigger, and a pre-assembled scheduler test environment

#![allow(dead_code)]

use async_trait::async_trait;
use borealis::base::status::ScheduleStatus;
use borealis::base::{
  AcceptAllFilter, Clock, CronCallback, CronHandle, CronTrigger, Driver, EventSink, JobFilter,
  TaskStateChange,
};
use borealis::config::{host_limit_constraint, ParsedJob};
use borealis::core::SchedulerCore;
use borealis::error::Result;
use borealis::memdb::MemStore;
use borealis::query::TaskQuery;
use borealis::state_manager::StateManager;
use borealis::task::{
  CronCollisionPolicy, ExecutorConfig, Identity, JobConfig, JobKey, ScheduledTask, TaskConfig,
  TaskIdGenerator,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const ROLE_A: &str = "role-a";
pub const USER_A: &str = "user-a";
pub const ENV_A: &str = "test";
pub const JOB_A: &str = "job-a";

pub fn key_a() -> JobKey {
  JobKey::new(ROLE_A, ENV_A, JOB_A)
}

/// 可手动推进的时钟
/// A manually advanced clock
pub struct FakeClock {
  now: Mutex<DateTime<Utc>>,
}

impl FakeClock {
  pub fn new() -> Self {
    Self {
      now: Mutex::new(DateTime::from_timestamp(1_000_000_000, 0).expect("valid epoch")),
    }
  }

  pub fn advance(&self, seconds: i64) {
    let mut now = self.now.lock().unwrap();
    *now += Duration::seconds(seconds);
  }
}

impl Clock for FakeClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap()
  }
}

/// 记录终止指令的驱动
/// A driver recording kill instructions
#[derive(Default)]
pub struct RecordingDriver {
  kills: Mutex<Vec<String>>,
}

impl RecordingDriver {
  pub fn kills(&self) -> Vec<String> {
    self.kills.lock().unwrap().clone()
  }

  pub fn kill_count(&self) -> usize {
    self.kills.lock().unwrap().len()
  }
}

#[async_trait]
impl Driver for RecordingDriver {
  async fn kill_task(&self, task_id: &str) -> Result<()> {
    self.kills.lock().unwrap().push(task_id.to_string());
    Ok(())
  }
}

/// 记录状态变更事件的事件总线
/// An event sink recording state change events
#[derive(Default)]
pub struct RecordingEventSink {
  changes: Mutex<Vec<TaskStateChange>>,
}

impl RecordingEventSink {
  pub fn changes(&self) -> Vec<TaskStateChange> {
    self.changes.lock().unwrap().clone()
  }

  pub fn changes_for(&self, task_id: &str) -> Vec<TaskStateChange> {
    self
      .changes
      .lock()
      .unwrap()
      .iter()
      .filter(|change| change.task_id == task_id)
      .cloned()
      .collect()
  }
}

#[async_trait]
impl EventSink for RecordingEventSink {
  async fn publish(&self, change: TaskStateChange) -> Result<()> {
    self.changes.lock().unwrap().push(change);
    Ok(())
  }
}

/// 假 cron 触发器：登记回调，由测试手动触发
/// A fake cron trigger: records callbacks, fired manually by tests
#[derive(Default)]
pub struct FakeCronTrigger {
  schedules: Mutex<HashMap<CronHandle, (String, CronCallback)>>,
  counter: AtomicUsize,
}

impl FakeCronTrigger {
  pub fn scheduled_count(&self) -> usize {
    self.schedules.lock().unwrap().len()
  }

  pub fn expressions(&self) -> Vec<String> {
    self
      .schedules
      .lock()
      .unwrap()
      .values()
      .map(|(expr, _)| expr.clone())
      .collect()
  }

  /// 触发所有已登记的回调
  /// Fire every registered callback
  pub fn fire_all(&self) {
    let callbacks: Vec<CronCallback> = self
      .schedules
      .lock()
      .unwrap()
      .values()
      .map(|(_, callback)| callback.clone())
      .collect();
    for callback in callbacks {
      callback();
    }
  }
}

impl CronTrigger for FakeCronTrigger {
  fn is_valid_schedule(&self, schedule: &str) -> bool {
    !schedule.trim().is_empty() && schedule != "invalid"
  }

  fn schedule(&self, schedule: &str, callback: CronCallback) -> Result<CronHandle> {
    if !self.is_valid_schedule(schedule) {
      return Err(borealis::error::Error::InvalidCronSchedule {
        expr: schedule.to_string(),
      });
    }
    let handle = format!("cron-{}", self.counter.fetch_add(1, Ordering::SeqCst));
    self
      .schedules
      .lock()
      .unwrap()
      .insert(handle.clone(), (schedule.to_string(), callback));
    Ok(handle)
  }

  fn deschedule(&self, handle: &CronHandle) {
    self.schedules.lock().unwrap().remove(handle);
  }
}

/// 从 1 开始的顺序任务 ID 生成器：task-1, task-2, ...
/// Sequential task id generator starting at 1: task-1, task-2, ...
pub fn sequential_task_ids() -> TaskIdGenerator {
  let counter = AtomicUsize::new(0);
  Arc::new(move |_config: &TaskConfig| {
    format!("task-{}", counter.fetch_add(1, Ordering::SeqCst) + 1)
  })
}

/// 生产任务模板
/// Production task template
pub fn production_task() -> TaskConfig {
  TaskConfig {
    owner: Identity::new(ROLE_A, USER_A),
    environment: ENV_A.to_string(),
    job_name: JOB_A.to_string(),
    instance_id: 0,
    num_cpus: 1.0,
    ram_mb: 1024,
    disk_mb: 1024,
    is_service: false,
    production: true,
    max_task_failures: 1,
    contact_email: Some("testing@example.com".to_string()),
    requested_ports: Default::default(),
    // 宽松的主机约束，避免干扰放置无关的断言
    // A loose host limit, keeping placement out of the assertions
    constraints: [host_limit_constraint(100)].into_iter().collect(),
    executor_config: Some(ExecutorConfig::new("docker", "image:latest")),
    legacy_executor_data: None,
  }
}

/// 构造普通作业
/// Build a regular job
pub fn make_job(key: &JobKey, instance_count: i32) -> JobConfig {
  make_job_with(key, production_task(), instance_count)
}

/// 以给定任务模板构造作业
/// Build a job from the given task template
pub fn make_job_with(key: &JobKey, task: TaskConfig, instance_count: i32) -> JobConfig {
  JobConfig {
    key: key.clone(),
    owner: Identity::new(key.role.clone(), USER_A),
    instance_count,
    task,
    cron_schedule: None,
    cron_collision_policy: CronCollisionPolicy::default(),
  }
}

/// 构造 cron 作业
/// Build a cron job
pub fn make_cron_job(key: &JobKey, instance_count: i32, schedule: &str) -> JobConfig {
  let mut job = make_job(key, instance_count);
  job.cron_schedule = Some(schedule.to_string());
  job
}

/// 构造带冲突策略的 cron 作业
/// Build a cron job with a collision policy
pub fn make_cron_job_with_policy(
  key: &JobKey,
  instance_count: i32,
  schedule: &str,
  policy: CronCollisionPolicy,
) -> JobConfig {
  let mut job = make_cron_job(key, instance_count, schedule);
  job.cron_collision_policy = policy;
  job
}

/// 组装好的调度器测试环境
/// A pre-assembled scheduler test environment
pub struct TestScheduler {
  pub store: Arc<MemStore>,
  pub core: Arc<SchedulerCore<MemStore>>,
  pub driver: Arc<RecordingDriver>,
  pub events: Arc<RecordingEventSink>,
  pub cron_trigger: Arc<FakeCronTrigger>,
  pub clock: Arc<FakeClock>,
}

/// 测试环境构造器
/// Test environment builder
pub struct SchedulerBuilder {
  store: Arc<MemStore>,
  filter: Arc<dyn JobFilter>,
  task_ids: TaskIdGenerator,
}

impl SchedulerBuilder {
  pub fn new() -> Self {
    Self {
      store: Arc::new(MemStore::new()),
      filter: Arc::new(AcceptAllFilter),
      task_ids: sequential_task_ids(),
    }
  }

  pub fn store(mut self, store: Arc<MemStore>) -> Self {
    self.store = store;
    self
  }

  pub fn filter(mut self, filter: Arc<dyn JobFilter>) -> Self {
    self.filter = filter;
    self
  }

  pub fn task_ids(mut self, task_ids: TaskIdGenerator) -> Self {
    self.task_ids = task_ids;
    self
  }

  /// 组装并执行启动流程（回填 + cron 恢复）
  /// Assemble and run the startup flow (backfill + cron recovery)
  pub async fn build(self) -> TestScheduler {
    let driver = Arc::new(RecordingDriver::default());
    let events = Arc::new(RecordingEventSink::default());
    let clock = Arc::new(FakeClock::new());
    let cron_trigger = Arc::new(FakeCronTrigger::default());

    let state_manager = Arc::new(StateManager::new(
      self.store.clone(),
      driver.clone(),
      events.clone(),
      clock.clone(),
      self.task_ids,
    ));
    let core = SchedulerCore::new(
      self.store.clone(),
      state_manager,
      cron_trigger.clone(),
      self.filter,
      clock.clone(),
    );
    core.startup().await.expect("scheduler startup");

    TestScheduler {
      store: self.store,
      core,
      driver,
      events,
      cron_trigger,
      clock,
    }
  }
}

impl TestScheduler {
  pub async fn build() -> Self {
    SchedulerBuilder::new().build().await
  }

  /// 准入作业
  /// Admit a job
  pub async fn create(&self, job: JobConfig) -> Result<()> {
    self.core.create_job(ParsedJob::from_unparsed(job)?).await
  }

  /// 发起更新
  /// Initiate an update
  pub async fn initiate_update(&self, job: JobConfig) -> Result<Option<String>> {
    self
      .core
      .initiate_job_update(ParsedJob::from_unparsed(job)?)
      .await
  }

  pub fn tasks(&self, query: &TaskQuery) -> Vec<ScheduledTask> {
    self.core.state_manager().fetch_tasks(query)
  }

  pub fn only_task(&self, query: &TaskQuery) -> ScheduledTask {
    let mut tasks = self.tasks(query);
    assert_eq!(tasks.len(), 1, "expected exactly one task for {query:?}");
    tasks.pop().unwrap()
  }

  pub fn task_by_id(&self, task_id: &str) -> ScheduledTask {
    self.only_task(&TaskQuery::task_scoped(task_id))
  }

  pub fn by_status(&self, status: ScheduleStatus) -> Vec<ScheduledTask> {
    self.tasks(&TaskQuery::unscoped().by_status(status))
  }

  pub fn total_tasks(&self) -> usize {
    self.tasks(&TaskQuery::unscoped()).len()
  }

  /// 模拟执行器状态回报
  /// Simulate an executor status report
  pub async fn change(&self, query: &TaskQuery, status: ScheduleStatus) -> usize {
    self
      .core
      .set_task_status(query, status, None)
      .await
      .expect("status change")
  }

  pub async fn change_with_message(
    &self,
    query: &TaskQuery,
    status: ScheduleStatus,
    message: &str,
  ) -> usize {
    self
      .core
      .set_task_status(query, status, Some(message.to_string()))
      .await
      .expect("status change")
  }

  /// 把匹配查询的任务依次推进多个状态
  /// Walk the matching tasks through several statuses in order
  pub async fn drive(&self, query: &TaskQuery, statuses: &[ScheduleStatus]) {
    for &status in statuses {
      self.change(query, status).await;
    }
  }
}

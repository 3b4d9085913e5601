//! 配置校验模块
//! Configuration validation module
//!
//! 作业准入前的标识符与约束校验，以及缺省字段填充
//! Identifier and constraint validation ahead of job admission, plus
//! population of defaulted fields

use crate::base::constants::{DEFAULT_HOST_LIMIT, DEFAULT_MAX_TASK_FAILURES, LEGACY_EXECUTOR_NAME};
use crate::error::{Error, Result};
use crate::task::{Constraint, ExecutorConfig, JobConfig, TaskConfig, TaskConstraint};

/// 专用机约束的属性名
/// Attribute name of the dedicated-machine constraint
pub const DEDICATED_ATTRIBUTE: &str = "dedicated";

/// 主机维度的数量约束属性名
/// Attribute name of the per-host limit constraint
pub const HOST_ATTRIBUTE: &str = "host";

/// 构造主机数量约束
/// Build a per-host limit constraint
pub fn host_limit_constraint(limit: i32) -> Constraint {
  Constraint::limit(HOST_ATTRIBUTE, limit)
}

/// 校验角色、环境、作业名等标识符：`[A-Za-z0-9_.-]+`
/// Validate identifiers such as role, environment and job name:
/// `[A-Za-z0-9_.-]+`
pub fn is_good_identifier(identifier: &str) -> bool {
  !identifier.is_empty()
    && identifier
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn require_identifier(field: &str, value: &str) -> Result<()> {
  if is_good_identifier(value) {
    Ok(())
  } else {
    Err(Error::invalid_config(format!(
      "Identifier '{value}' for {field} is empty or contains illegal characters"
    )))
  }
}

/// 经过校验和缺省填充的作业配置
/// A job configuration that has been validated and populated with defaults
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedJob {
  job: JobConfig,
}

impl ParsedJob {
  /// 校验原始作业配置并填充缺省值
  /// Validate a raw job configuration and populate defaults
  pub fn from_unparsed(mut job: JobConfig) -> Result<Self> {
    validate_job(&job)?;
    populate_defaults(&mut job.task);
    job.task.owner = job.owner.clone();
    job.task.environment = job.key.environment.clone();
    job.task.job_name = job.key.name.clone();
    Ok(Self { job })
  }

  /// 作业配置
  /// The job configuration
  pub fn job(&self) -> &JobConfig {
    &self.job
  }

  /// 实例化 `[0, instance_count)` 的任务配置
  /// Materialize task configurations for `[0, instance_count)`
  pub fn task_configs(&self) -> Vec<TaskConfig> {
    (0..self.job.instance_count)
      .map(|instance_id| self.job.task_for_instance(instance_id))
      .collect()
  }
}

/// 校验作业配置
/// Validate a job configuration
pub fn validate_job(job: &JobConfig) -> Result<()> {
  require_identifier("role", &job.key.role)?;
  require_identifier("environment", &job.key.environment)?;
  require_identifier("job name", &job.key.name)?;
  require_identifier("owner role", &job.owner.role)?;
  require_identifier("owner user", &job.owner.user)?;

  if job.owner.role != job.key.role {
    return Err(Error::invalid_config(format!(
      "Role '{}' does not match job key role '{}'",
      job.owner.role, job.key.role
    )));
  }
  if job.instance_count < 1 {
    return Err(Error::invalid_config(
      "Job must have at least one instance",
    ));
  }
  if job.task.executor_config.is_none() && job.task.legacy_executor_data.is_none() {
    return Err(Error::invalid_config("Job lacks an executor configuration"));
  }
  if let Some(email) = &job.task.contact_email {
    if !email.contains('@') {
      return Err(Error::invalid_config(format!(
        "Contact email '{email}' is not a valid address"
      )));
    }
  }

  validate_dedicated_constraints(job)?;
  Ok(())
}

/// 校验专用机约束值：必须为 `role`、`role/<suffix>` 或作业的规范路径
/// Validate dedicated constraint values: each must be `role`,
/// `role/<suffix>` or the job's canonical path
fn validate_dedicated_constraints(job: &JobConfig) -> Result<()> {
  for constraint in &job.task.constraints {
    if constraint.name != DEDICATED_ATTRIBUTE {
      continue;
    }
    let values = match &constraint.constraint {
      TaskConstraint::Value(value) => &value.values,
      TaskConstraint::Limit(_) => {
        return Err(Error::invalid_config(
          "Dedicated constraint must be a value constraint",
        ));
      }
    };
    for value in values {
      let role = &job.key.role;
      let job_path = job.key.path();
      let valid = value == role
        || value == &job_path
        || value
          .strip_prefix(&format!("{role}/"))
          .is_some_and(|suffix| !suffix.is_empty());
      if !valid {
        return Err(Error::invalid_config(format!(
          "Invalid dedicated value '{value}' for role '{role}'"
        )));
      }
    }
  }
  Ok(())
}

/// 填充缺省字段
/// Populate defaulted fields
///
/// 对准入路径和启动回填路径使用同一套规则
/// The admission path and the startup backfill share the same rules
pub fn populate_defaults(task: &mut TaskConfig) {
  if task.max_task_failures == 0 {
    task.max_task_failures = DEFAULT_MAX_TASK_FAILURES;
  }
  if task.constraints.is_empty() {
    task.constraints.insert(host_limit_constraint(DEFAULT_HOST_LIMIT));
  }
  if task.executor_config.is_none() {
    if let Some(data) = task.legacy_executor_data.take() {
      task.executor_config = Some(ExecutorConfig::new(LEGACY_EXECUTOR_NAME, data));
    }
  }
}

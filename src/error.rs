//! 错误处理模块
//! Error handling module
//!
//! 定义了调度器核心使用的各种错误类型
//! Defines the error types used by the scheduler core

use thiserror::Error;

/// 调度器核心的结果类型
/// Result type for the scheduler core
pub type Result<T> = std::result::Result<T, Error>;

/// 调度器错误类型
/// Scheduler error type
#[derive(Error, Debug)]
pub enum Error {
  /// 无效的作业或任务配置
  /// Invalid job or task configuration
  #[error("Invalid configuration: {message}")]
  InvalidConfig { message: String },

  /// 无效的 cron 表达式
  /// Invalid cron expression
  #[error("Invalid cron schedule: {expr}")]
  InvalidCronSchedule { expr: String },

  /// 调用方可见的调度逻辑错误
  /// Caller-visible scheduling logic error
  #[error("Scheduling error: {message}")]
  Schedule { message: String },

  /// 任务未找到错误
  /// Task not found error
  #[error("Task not found: {id}")]
  TaskNotFound { id: String },

  /// 存储事务错误，事务已回滚
  /// Storage transaction error, the transaction has been rolled back
  #[error("Storage error: {message}")]
  Store { message: String },
}

impl Error {
  /// 创建配置错误
  /// Create a configuration error
  pub fn invalid_config<S: Into<String>>(message: S) -> Self {
    Self::InvalidConfig {
      message: message.into(),
    }
  }

  /// 创建调度错误
  /// Create a scheduling error
  pub fn schedule<S: Into<String>>(message: S) -> Self {
    Self::Schedule {
      message: message.into(),
    }
  }

  /// 创建存储错误
  /// Create a storage error
  pub fn store<S: Into<String>>(message: S) -> Self {
    Self::Store {
      message: message.into(),
    }
  }

  /// 检查是否为瞬时错误（重试可能成功）
  /// Check if the error is transient (a retry may succeed)
  pub fn is_transient(&self) -> bool {
    matches!(self, Error::Store { .. })
  }
}

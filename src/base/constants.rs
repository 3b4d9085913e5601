/// 生成的任务 ID 的最大字节长度
/// Maximum length in bytes of a generated task ID
pub const MAX_TASK_ID_LENGTH: usize = 255;

/// 默认最大任务失败次数
/// Default maximum task failure count
pub const DEFAULT_MAX_TASK_FAILURES: i32 = 1;

/// 未约束任务回填使用的主机数上限
/// Host limit applied when backfilling unconstrained tasks
pub const DEFAULT_HOST_LIMIT: i32 = 1;

/// 旧版执行器数据回填时使用的执行器名称
/// Executor name used when backfilling legacy executor data
pub const LEGACY_EXECUTOR_NAME: &str = "AuroraExecutor";

/// 版本信息
/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

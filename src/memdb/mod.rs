//! 内存存储后端
//! In-memory storage backend
//!
//! 不依赖外部服务的参考存储实现，同时作为一致性测试的基准
//! The reference store implementation with no external service dependencies,
//! also the baseline for conformance tests

mod store;

pub use store::MemStore;

//! 全局基础类型与错误定义

use thiserror::Error;

// ── ID 类型别名 ───────────────────────────────────────────────────────────────

/// 记录主键：单调递增，分片时原样拷贝、绝不重新生成
pub type RecordId = i64;

// ── 错误 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("manifest corrupt: {0}")]
    ManifestCorrupt(String),
    #[error("source unreadable: {0}")]
    SourceUnreadable(String),
    #[error("source store is empty")]
    EmptySource,
    #[error("invalid shard size ceiling: {0} MB")]
    InvalidCeiling(f64),
    #[error("store I/O error: {0}")]
    StoreIo(String),
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("compression error: {0}")]
    Compression(String),
    #[error("record id out of order: prev={prev} next={next}")]
    OutOfOrderId { prev: RecordId, next: RecordId },
    #[error("partition failed: {0}")]
    PartitionFailed(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

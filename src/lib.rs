//! # card-shard-store
//!
//! 银行卡记录数据集的分片存储与跨分片查询引擎：
//! - **存储层**：单个 Record Store 文件（块式 LZ4 行存 + 块级过滤索引）
//! - **分片层**：Partitioner 按大小上限把源库切成 N 个分片 + Manifest
//! - **查询层**：跨分片的过滤分页查询、精确总数、去重聚合
//!
//! ## 整体架构
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     query (serve 时)                      │
//! │   Manifest ──→ 有序分片列表                               │
//! │      │                                                    │
//! │   ShardQueryExecutor                                      │
//! │      ├─ 逐分片 probe（Absent / Unreadable / Open）        │
//! │      ├─ count_matching → total（全量计数，精确）           │
//! │      ├─ select（id 降序局部切片）                          │
//! │      └─ merge：全局按 id 降序排序后截断到 limit            │
//! │                                                           │
//! │                  partition (离线)                         │
//! │   源 RecordStore ──→ 估算 records_per_shard               │
//! │      ├─ staging 目录写出 cards_N.seg × N                  │
//! │      └─ manifest.json 最后落位（读者不会看到半成品）       │
//! │                                                           │
//! │   RecordStore 文件格式                                    │
//! │   ┌─────────────────────────────────────────────────┐     │
//! │   │  记录块 × N（≤1024 行，LZ4 + CRC32）             │     │
//! │   │  BlockFilter × N（token / trigram Bloom）        │     │
//! │   │  Footer（块元数据 + CRC + 长度 + MAGIC）         │     │
//! │   └─────────────────────────────────────────────────┘     │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod common;
pub mod record;
pub mod index;
pub mod block;
pub mod store;
pub mod manifest;
pub mod partition;
pub mod query;

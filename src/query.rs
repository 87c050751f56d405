//! 跨分片查询引擎
//!
//! 每个查询都是 (分片路径, 谓词, 窗口) 的纯函数：无进程级缓存，
//! 分片句柄只在自己的 count-then-fetch 期间持有，跨分片、跨查询都不保留。
//!
//! 访问顺序是 manifest 的**逆序**。manifest 按 id 升序区间排列分片，
//! 逆序访问即全局 id 降序，这样全局 offset 记账得到的切片集合与
//! 未分片单库的 `ORDER BY id DESC LIMIT/OFFSET` 完全一致；行凑满后
//! 只短路 fetch，计数仍覆盖每个活分片，`total` 对任何页都精确。
//!
//! 缺失分片跳过而不报错（可用性优先于严格一致性）；跳过原因
//! （Absent / Unreadable）记入结果，调用方与测试可以断言具体路径。

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::common::Result;
use crate::manifest::Manifest;
use crate::record::{CardFilter, CardRecord, DistinctColumn};
use crate::store::RecordStore;

// ── 窗口钳制 ──────────────────────────────────────────────────────────────────

pub const MIN_LIMIT: i64     = 1;
pub const MAX_LIMIT: i64     = 200;
pub const DEFAULT_LIMIT: i64 = 25;

pub fn clamp_limit(limit: i64) -> usize {
    limit.clamp(MIN_LIMIT, MAX_LIMIT) as usize
}

pub fn clamp_offset(offset: i64) -> u64 {
    offset.max(0) as u64
}

// ── 分片探测 ──────────────────────────────────────────────────────────────────

/// 跳过分片的原因：文件不存在，或存在但打不开/校验失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Absent,
    Unreadable(String),
}

#[derive(Debug, Clone)]
pub struct ShardSkip {
    pub path:   PathBuf,
    pub reason: SkipReason,
}

enum ShardProbe {
    Open(RecordStore),
    Skip(SkipReason),
}

fn probe_shard(path: &Path) -> ShardProbe {
    if !path.exists() {
        return ShardProbe::Skip(SkipReason::Absent);
    }
    match RecordStore::open(path) {
        Ok(store) => ShardProbe::Open(store),
        Err(e)    => ShardProbe::Skip(SkipReason::Unreadable(e.to_string())),
    }
}

fn log_skip(path: &Path, reason: &SkipReason) {
    match reason {
        SkipReason::Absent => debug!(shard = %path.display(), "shard absent, skipped"),
        SkipReason::Unreadable(e) => {
            warn!(shard = %path.display(), error = %e, "shard unreadable, skipped")
        }
    }
}

// ── 查询执行 ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct QueryResult {
    /// 全局按 id 降序的第 offset..offset+limit 条匹配行
    pub rows:    Vec<CardRecord>,
    /// 所有活分片的精确匹配总数，与窗口无关
    pub total:   u64,
    /// 本次查询跳过的分片
    pub skipped: Vec<ShardSkip>,
}

/// 跨分片执行过滤分页查询。
/// `shard_paths` 按 manifest 顺序（id 升序区间）传入。
pub fn execute(
    shard_paths: &[PathBuf],
    filter:      &CardFilter,
    limit:       i64,
    offset:      i64,
) -> Result<QueryResult> {
    let limit  = clamp_limit(limit);
    let offset = clamp_offset(offset);

    let mut rows: Vec<CardRecord> = Vec::with_capacity(limit);
    let mut total          = 0u64;
    let mut current_offset = 0u64;
    let mut skipped        = Vec::new();

    // 逆序 = 全局 id 降序
    for path in shard_paths.iter().rev() {
        let store = match probe_shard(path) {
            ShardProbe::Open(store) => store,
            ShardProbe::Skip(reason) => {
                log_skip(path, &reason);
                skipped.push(ShardSkip { path: path.clone(), reason });
                continue;
            }
        };

        // count-then-fetch 整体成功才入账：块级校验失败等读取错误
        // 按 Unreadable 跳过该分片，不拖垮整个查询
        match visit_shard(&store, filter, limit - rows.len(), offset, current_offset) {
            Ok((count, fetched)) => {
                total += count;
                rows.extend(fetched);
                current_offset += count;
            }
            Err(e) => {
                let reason = SkipReason::Unreadable(e.to_string());
                log_skip(path, &reason);
                skipped.push(ShardSkip { path: path.clone(), reason });
            }
        }
    }

    Ok(QueryResult { rows: merge_rows(rows, limit), total, skipped })
}

/// 单个分片的 count-then-fetch。`remaining` 是行累积器还差的行数。
/// 行凑满（remaining == 0）后只短路 fetch，计数照常进行。
fn visit_shard(
    store:          &RecordStore,
    filter:         &CardFilter,
    remaining:      usize,
    offset:         u64,
    current_offset: u64,
) -> Result<(u64, Vec<CardRecord>)> {
    let count = store.count_matching(filter)?;

    let mut fetched = Vec::new();
    if remaining > 0 && current_offset + count > offset {
        let local_offset = offset.saturating_sub(current_offset);
        let local_limit  = remaining.min((count - local_offset) as usize);
        if local_limit > 0 {
            fetched = store.select(filter, local_limit, local_offset)?;
        }
    }
    Ok((count, fetched))
}

/// Result Merger：重建全局序。各分片切片只保证局部有序，
/// 合并后统一按 id 降序排序并截断到 limit。
pub fn merge_rows(mut rows: Vec<CardRecord>, limit: usize) -> Vec<CardRecord> {
    rows.sort_unstable_by(|a, b| b.id.cmp(&a.id));
    rows.truncate(limit);
    rows
}

// ── 去重聚合 ──────────────────────────────────────────────────────────────────

/// 列的去重值并集：无条件访问每个活分片（正确性要求全覆盖），
/// 返回字典序升序、无重复的序列。缺失/不可读分片照常跳过。
pub fn distinct_values(
    shard_paths:   &[PathBuf],
    column:        DistinctColumn,
    scope_country: Option<&str>,
) -> Result<Vec<String>> {
    let mut set = BTreeSet::new();
    for path in shard_paths {
        let store = match probe_shard(path) {
            ShardProbe::Open(store)  => store,
            ShardProbe::Skip(reason) => {
                log_skip(path, &reason);
                continue;
            }
        };
        match store.distinct(column, scope_country) {
            Ok(mut values) => set.append(&mut values),
            Err(e) => {
                log_skip(path, &SkipReason::Unreadable(e.to_string()));
            }
        }
    }
    Ok(set.into_iter().collect())
}

// ── Manifest 入口 ─────────────────────────────────────────────────────────────

/// serve 路径的查询入口：经 manifest 解析分片列表后执行
pub fn query(
    manifest_path: &Path,
    filter:        &CardFilter,
    limit:         i64,
    offset:        i64,
) -> Result<QueryResult> {
    let manifest = Manifest::load(manifest_path)?;
    execute(&manifest.shard_paths(manifest_path), filter, limit, offset)
}

/// 默认窗口（前 [`DEFAULT_LIMIT`] 行）的便捷入口
pub fn query_first_page(manifest_path: &Path, filter: &CardFilter) -> Result<QueryResult> {
    query(manifest_path, filter, DEFAULT_LIMIT, 0)
}

pub fn distinct(
    manifest_path: &Path,
    column:        DistinctColumn,
    scope_country: Option<&str>,
) -> Result<Vec<String>> {
    let manifest = Manifest::load(manifest_path)?;
    distinct_values(&manifest.shard_paths(manifest_path), column, scope_country)
}

// ── 测试 ──────────────────────────────────────────────────────────────────────

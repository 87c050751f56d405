//! Partitioner：把单个源 Record Store 切成 N 个受限大小的分片 + Manifest
//!
//! 估算式切分：按源文件平均每行字节数推出 records_per_shard，规划成本 O(1)；
//! 行大小不均匀时实际分片大小可能偏离上限，这是接受的折衷。
//!
//! 写出协议：全部分片与 manifest 先写进输出目录下的 staging 子目录，
//! 成功后清除旧分片、逐个 rename 进位，manifest **最后**落位——
//! 读者任何时刻都不会看到引用缺失分片的 manifest。失败则移除 staging，
//! 输出目录原样不动。

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::common::{Result, StoreError};
use crate::manifest::{Manifest, MANIFEST_FILE};
use crate::store::{RecordStore, StoreWriter};

/// 默认单分片大小上限（MB）
pub const DEFAULT_CEILING_MB: f64 = 100.0;

const STAGING_DIR: &str = ".staging";

// ── 分片文件命名 ──────────────────────────────────────────────────────────────

/// 第 n 个分片的文件名（1 起）
pub fn shard_file_name(n: u64) -> String {
    format!("cards_{n}.seg")
}

/// 是否匹配分片命名模式 `cards_<数字>.seg`
fn is_shard_file(name: &str) -> bool {
    name.strip_prefix("cards_")
        .and_then(|rest| rest.strip_suffix(".seg"))
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

// ── 切分 ──────────────────────────────────────────────────────────────────────

/// `partition(source, output_dir, ceiling_mb) -> manifest 路径`
///
/// 幂等：同一源、同一上限重跑会整体替换旧分片与 manifest，
/// 并复现相同的 chunks / totalRecords / recordsPerChunk 与每片行数。
/// 记录 id 原样拷贝，绝不重新生成。
pub fn partition(source_path: &Path, output_dir: &Path, size_ceiling_mb: f64) -> Result<PathBuf> {
    if !(size_ceiling_mb > 0.0) {
        return Err(StoreError::InvalidCeiling(size_ceiling_mb));
    }

    let source = RecordStore::open(source_path)
        .map_err(|e| StoreError::SourceUnreadable(format!("{}: {e}", source_path.display())))?;
    let total = source.num_records();
    if total == 0 {
        return Err(StoreError::EmptySource);
    }

    let source_bytes = fs::metadata(source_path)
        .map_err(|e| StoreError::SourceUnreadable(format!("{}: {e}", source_path.display())))?
        .len();
    let source_mb = source_bytes as f64 / (1024.0 * 1024.0);

    let records_per_shard =
        ((size_ceiling_mb * total as f64 / source_mb).floor() as u64).max(1);
    let chunks = total.div_ceil(records_per_shard);

    info!(
        total,
        source_mb = format!("{source_mb:.2}"),
        records_per_shard,
        chunks,
        "partition plan"
    );

    let staging = output_dir.join(STAGING_DIR);
    match build_staging(&source, total, records_per_shard, chunks, &staging) {
        Ok(manifest) => commit(output_dir, &staging, &manifest),
        Err(e) => {
            let _ = fs::remove_dir_all(&staging);
            Err(e)
        }
    }
}

/// 以 [`DEFAULT_CEILING_MB`] 为上限切分
pub fn partition_default(source_path: &Path, output_dir: &Path) -> Result<PathBuf> {
    partition(source_path, output_dir, DEFAULT_CEILING_MB)
}

/// 把所有分片和 manifest 写进 staging 目录
fn build_staging(
    source:            &RecordStore,
    total:             u64,
    records_per_shard: u64,
    chunks:            u64,
    staging:           &Path,
) -> Result<Manifest> {
    if staging.exists() {
        fs::remove_dir_all(staging).map_err(|e| StoreError::PartitionFailed(e.to_string()))?;
    }
    fs::create_dir_all(staging).map_err(|e| StoreError::PartitionFailed(e.to_string()))?;

    let mut files = Vec::with_capacity(chunks as usize);
    for idx in 0..chunks {
        let name = shard_file_name(idx + 1);
        let rows = source.slice(idx * records_per_shard, records_per_shard)?;

        let mut writer = StoreWriter::create(&staging.join(&name))?;
        for rec in rows {
            writer.append(rec)?;
        }
        let stats = writer.finish()?;
        info!(
            shard = name,
            records = stats.num_records,
            mb = format!("{:.2}", stats.file_bytes as f64 / (1024.0 * 1024.0)),
            "shard written"
        );
        files.push(name);
    }

    let manifest = Manifest {
        chunks: chunks as u32,
        total_records: total,
        records_per_chunk: records_per_shard,
        files,
    };
    manifest.save(&staging.join(MANIFEST_FILE))?;
    Ok(manifest)
}

/// 清除旧分片，把 staging 内容 rename 进位；manifest 最后落位
fn commit(output_dir: &Path, staging: &Path, manifest: &Manifest) -> Result<PathBuf> {
    let entries =
        fs::read_dir(output_dir).map_err(|e| StoreError::PartitionFailed(e.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::PartitionFailed(e.to_string()))?;
        let name = entry.file_name();
        if name.to_str().is_some_and(is_shard_file) {
            fs::remove_file(entry.path())
                .map_err(|e| StoreError::PartitionFailed(e.to_string()))?;
            info!(stale = %name.to_string_lossy(), "removed stale shard");
        }
    }

    for name in &manifest.files {
        fs::rename(staging.join(name), output_dir.join(name))
            .map_err(|e| StoreError::PartitionFailed(e.to_string()))?;
    }
    let manifest_path = output_dir.join(MANIFEST_FILE);
    fs::rename(staging.join(MANIFEST_FILE), &manifest_path)
        .map_err(|e| StoreError::PartitionFailed(e.to_string()))?;
    let _ = fs::remove_dir_all(staging);

    info!(manifest = %manifest_path.display(), chunks = manifest.chunks, "partition complete");
    Ok(manifest_path)
}

// ── 测试 ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::sample;
    use tempfile::tempdir;

    /// 写一个 ids 1..=n 的源库，返回 (路径, 让 records_per_shard 约等于 per_shard 的上限 MB)
    fn build_source(dir: &Path, n: u64, per_shard: u64) -> (PathBuf, f64) {
        let path = dir.join("source.seg");
        let mut w = StoreWriter::create(&path).unwrap();
        for id in 1..=n {
            w.append(sample(id as i64)).unwrap();
        }
        w.finish().unwrap();

        // 从实测文件大小反推上限，使 floor(ceiling*n/mb) == per_shard
        let mb = fs::metadata(&path).unwrap().len() as f64 / (1024.0 * 1024.0);
        let ceiling = mb * (per_shard as f64 + 0.5) / n as f64;
        (path, ceiling)
    }

    #[test]
    fn partitions_250_records_into_3_chunks() {
        let dir = tempdir().unwrap();
        let (source, ceiling) = build_source(dir.path(), 250, 100);

        let manifest_path = partition(&source, dir.path(), ceiling).unwrap();
        let manifest = Manifest::load(&manifest_path).unwrap();

        assert_eq!(manifest.chunks, 3);
        assert_eq!(manifest.total_records, 250);
        assert_eq!(manifest.records_per_chunk, 100);
        assert_eq!(
            manifest.files,
            vec!["cards_1.seg", "cards_2.seg", "cards_3.seg"]
        );

        let counts: Vec<u64> = manifest
            .shard_paths(&manifest_path)
            .iter()
            .map(|p| RecordStore::open(p).unwrap().num_records())
            .collect();
        assert_eq!(counts, vec![100, 100, 50]);

        // id 原样拷贝、升序区间
        let shard3 = RecordStore::open(&manifest_path.parent().unwrap().join("cards_3.seg")).unwrap();
        assert_eq!(shard3.min_id(), Some(201));
        assert_eq!(shard3.max_id(), Some(250));

        assert!(!dir.path().join(STAGING_DIR).exists());
    }

    #[test]
    fn repartition_is_idempotent_and_replaces_stale_shards() {
        let dir = tempdir().unwrap();
        let (source, ceiling) = build_source(dir.path(), 250, 50);

        // 50 行/片 → 5 片
        let first = partition(&source, dir.path(), ceiling).unwrap();
        let m1 = Manifest::load(&first).unwrap();
        assert_eq!(m1.chunks, 5);

        // 同参数重跑 → manifest 与每片行数完全一致
        let second = partition(&source, dir.path(), ceiling).unwrap();
        let m2 = Manifest::load(&second).unwrap();
        assert_eq!(m1, m2);
        let counts = |m: &Manifest, p: &Path| -> Vec<u64> {
            m.shard_paths(p)
                .iter()
                .map(|q| RecordStore::open(q).unwrap().num_records())
                .collect()
        };
        assert_eq!(counts(&m1, &first), counts(&m2, &second));

        // 放大上限 → 更少分片；编号超出的旧分片必须被清掉
        let third = partition(&source, dir.path(), ceiling * 3.0).unwrap();
        let m3 = Manifest::load(&third).unwrap();
        assert!(m3.chunks < m1.chunks);
        for n in m3.chunks as u64 + 1..=m1.chunks as u64 {
            assert!(!dir.path().join(shard_file_name(n)).exists());
        }
    }

    #[test]
    fn default_ceiling_fits_small_source_in_one_chunk() {
        let dir = tempdir().unwrap();
        let (source, _) = build_source(dir.path(), 250, 100);

        // 测试源远小于 100 MB，默认上限下不该再切
        let manifest_path = partition_default(&source, dir.path()).unwrap();
        let manifest = Manifest::load(&manifest_path).unwrap();
        assert_eq!(manifest.chunks, 1);
        assert_eq!(manifest.total_records, 250);
        assert_eq!(manifest.files, vec!["cards_1.seg"]);
    }

    #[test]
    fn invalid_inputs_fail_loudly() {
        let dir = tempdir().unwrap();
        let (source, _) = build_source(dir.path(), 10, 5);

        assert!(matches!(
            partition(&source, dir.path(), 0.0),
            Err(StoreError::InvalidCeiling(_))
        ));
        assert!(matches!(
            partition(&dir.path().join("nope.seg"), dir.path(), 1.0),
            Err(StoreError::SourceUnreadable(_))
        ));

        // 空源
        let empty = dir.path().join("empty.seg");
        StoreWriter::create(&empty).unwrap().finish().unwrap();
        assert!(matches!(
            partition(&empty, dir.path(), 1.0),
            Err(StoreError::EmptySource)
        ));
    }

    #[test]
    fn shard_name_pattern() {
        assert!(is_shard_file("cards_1.seg"));
        assert!(is_shard_file("cards_42.seg"));
        assert!(!is_shard_file("cards_.seg"));
        assert!(!is_shard_file("cards_1.db"));
        assert!(!is_shard_file("source.seg"));
        assert!(!is_shard_file("cards_x1.seg"));
    }
}

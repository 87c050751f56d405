//! Manifest：分片集合的描述符
//!
//! JSON 文件，由 Partitioner 一次性写出、查询路径多次读取，绝不原地修改；
//! 重新分片时整体替换。分片路径相对 manifest 自身所在目录解析，
//! manifest 和它的分片可以作为整体搬迁。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::common::{Result, StoreError};

/// 数据目录内 manifest 的约定文件名
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// 分片数，>= 1
    pub chunks:            u32,
    /// 创建时各分片行数之和。查询期仅作参考：活分片的实测计数永远优先
    pub total_records:     u64,
    /// 名义上每片行数（估算切分的配额）
    pub records_per_chunk: u64,
    /// 有序分片文件名，len == chunks，按 id 升序区间排列
    pub files:             Vec<String>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::ManifestCorrupt(format!("{}: {e}", path.display())))?;
        let manifest: Manifest = serde_json::from_str(&text)
            .map_err(|e| StoreError::ManifestCorrupt(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| StoreError::ManifestCorrupt(e.to_string()))?;
        std::fs::write(path, text).map_err(|e| StoreError::StoreIo(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunks == 0 {
            return Err(StoreError::ManifestCorrupt("chunks must be >= 1".into()));
        }
        if self.records_per_chunk == 0 {
            return Err(StoreError::ManifestCorrupt("recordsPerChunk must be >= 1".into()));
        }
        if self.files.len() != self.chunks as usize {
            return Err(StoreError::ManifestCorrupt(format!(
                "files length {} != chunks {}",
                self.files.len(),
                self.chunks
            )));
        }
        Ok(())
    }

    /// 相对 manifest 所在目录解析分片路径
    pub fn shard_paths(&self, manifest_path: &Path) -> Vec<PathBuf> {
        let dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));
        self.files.iter().map(|f| dir.join(f)).collect()
    }
}

// ── 测试 ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Manifest {
        Manifest {
            chunks:            3,
            total_records:     250,
            records_per_chunk: 100,
            files: vec!["cards_1.seg".into(), "cards_2.seg".into(), "cards_3.seg".into()],
        }
    }

    #[test]
    fn save_load_roundtrip() {
        let dir  = tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        sample().save(&path).unwrap();
        assert_eq!(Manifest::load(&path).unwrap(), sample());
    }

    #[test]
    fn camel_case_wire_format() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(json.contains("\"totalRecords\""));
        assert!(json.contains("\"recordsPerChunk\""));
        assert!(json.contains("\"chunks\""));
    }

    #[test]
    fn malformed_manifest_is_corrupt() {
        let dir  = tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            Manifest::load(&path),
            Err(StoreError::ManifestCorrupt(_))
        ));
    }

    #[test]
    fn files_chunks_mismatch_is_corrupt() {
        let dir  = tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        let mut m = sample();
        m.files.pop();
        m.save(&path).unwrap();
        assert!(matches!(
            Manifest::load(&path),
            Err(StoreError::ManifestCorrupt(_))
        ));
    }

    #[test]
    fn missing_manifest_is_corrupt() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Manifest::load(&dir.path().join(MANIFEST_FILE)),
            Err(StoreError::ManifestCorrupt(_))
        ));
    }

    #[test]
    fn shard_paths_relative_to_manifest_dir() {
        let m = sample();
        let paths = m.shard_paths(Path::new("/data/cards/manifest.json"));
        assert_eq!(paths[0], PathBuf::from("/data/cards/cards_1.seg"));
        assert_eq!(paths[2], PathBuf::from("/data/cards/cards_3.seg"));
    }
}

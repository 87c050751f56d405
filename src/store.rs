//! Record Store 文件读写
//!
//! 文件格式：
//! ```text
//! ┌────────────────────────────────────┐
//! │  MAGIC  (8 bytes) "CARDSEG\0"      │
//! │  Version(4 bytes) = 1              │
//! ├────────────────────────────────────┤
//! │  DATA REGION                       │
//! │    [记录块 0]                      │ ← LZ4 + CRC32
//! │    [记录块 1]                      │
//! │    ...                             │
//! ├────────────────────────────────────┤
//! │  INDEX REGION                      │
//! │    [BlockFilter 块 0]              │
//! │    [BlockFilter 块 1]              │
//! │    ...                             │
//! ├────────────────────────────────────┤
//! │  FOOTER                            │
//! │    StoreFooter (自定义二进制)       │
//! │    Footer CRC32  (4 bytes)         │
//! │    Footer length (4 bytes)         │
//! │    MAGIC         (8 bytes)         │
//! └────────────────────────────────────┘
//! ```
//!
//! 行按 id 严格递增顺序追加，因此块内与块间都保持升序；
//! id 降序读取即反向块扫描。查询期只读，一次 `open` 整文件载入。

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::block::{decode_block, BlockBuilder};
use crate::common::{RecordId, Result, StoreError};
use crate::index::BlockFilter;
use crate::record::{CardFilter, CardRecord, DistinctColumn};

const MAGIC: &[u8; 8] = b"CARDSEG\0";
const VERSION: u32    = 1;

// ── Footer 结构 ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BlockMeta {
    pub offset:        u64,
    pub size:          u32,
    pub count:         u32,
    pub min_id:        RecordId,
    pub max_id:        RecordId,
    pub filter_offset: u64,
    pub filter_size:   u32,
}

#[derive(Debug)]
pub struct StoreFooter {
    pub num_records: u64,
    pub blocks:      Vec<BlockMeta>,
}

impl StoreFooter {
    fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.blocks.len() * 44);
        out.extend_from_slice(&self.num_records.to_le_bytes());
        out.extend_from_slice(&(self.blocks.len() as u32).to_le_bytes());
        for bm in &self.blocks {
            out.extend_from_slice(&bm.offset.to_le_bytes());
            out.extend_from_slice(&bm.size.to_le_bytes());
            out.extend_from_slice(&bm.count.to_le_bytes());
            out.extend_from_slice(&bm.min_id.to_le_bytes());
            out.extend_from_slice(&bm.max_id.to_le_bytes());
            out.extend_from_slice(&bm.filter_offset.to_le_bytes());
            out.extend_from_slice(&bm.filter_size.to_le_bytes());
        }
        out
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        let mut rd = Cursor::new(data);
        let err = |e: std::io::Error| StoreError::Encoding(format!("footer: {e}"));

        let num_records = rd.read_u64::<LittleEndian>().map_err(err)?;
        let num_blocks  = rd.read_u32::<LittleEndian>().map_err(err)? as usize;

        let mut blocks = Vec::with_capacity(num_blocks);
        for _ in 0..num_blocks {
            blocks.push(BlockMeta {
                offset:        rd.read_u64::<LittleEndian>().map_err(err)?,
                size:          rd.read_u32::<LittleEndian>().map_err(err)?,
                count:         rd.read_u32::<LittleEndian>().map_err(err)?,
                min_id:        rd.read_i64::<LittleEndian>().map_err(err)?,
                max_id:        rd.read_i64::<LittleEndian>().map_err(err)?,
                filter_offset: rd.read_u64::<LittleEndian>().map_err(err)?,
                filter_size:   rd.read_u32::<LittleEndian>().map_err(err)?,
            });
        }
        Ok(Self { num_records, blocks })
    }
}

// ── StoreWriter ───────────────────────────────────────────────────────────────

/// `finish()` 返回的写入统计
#[derive(Debug, Clone, Copy)]
pub struct StoreStats {
    pub num_records: u64,
    pub file_bytes:  u64,
}

struct PendingBlock {
    meta:         BlockMeta,
    filter_bytes: Vec<u8>,
}

/// 流式分片写入器：块写满即落盘，内存里只留块元数据与过滤索引
pub struct StoreWriter {
    out:     BufWriter<File>,
    builder: BlockBuilder,
    pending: Vec<PendingBlock>,
    pos:     u64,
    records: u64,
    last_id: Option<RecordId>,
}

impl StoreWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| StoreError::StoreIo(e.to_string()))?;
        let mut out = BufWriter::new(file);
        out.write_all(MAGIC).map_err(|e| StoreError::StoreIo(e.to_string()))?;
        out.write_all(&VERSION.to_le_bytes())
            .map_err(|e| StoreError::StoreIo(e.to_string()))?;
        Ok(Self {
            out,
            builder: BlockBuilder::new(),
            pending: Vec::new(),
            pos:     12,
            records: 0,
            last_id: None,
        })
    }

    /// 追加一行；id 必须严格递增
    pub fn append(&mut self, rec: CardRecord) -> Result<()> {
        if let Some(prev) = self.last_id {
            if rec.id <= prev {
                return Err(StoreError::OutOfOrderId { prev, next: rec.id });
            }
        }
        self.last_id = Some(rec.id);
        self.builder.add(rec);
        self.records += 1;
        if self.builder.is_full() {
            self.flush_block()?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.builder.is_empty() {
            return Ok(());
        }
        let builder = std::mem::take(&mut self.builder);
        let (bytes, filter, stats) = builder.build()?;

        self.out
            .write_all(&bytes)
            .map_err(|e| StoreError::StoreIo(e.to_string()))?;
        self.pending.push(PendingBlock {
            meta: BlockMeta {
                offset:        self.pos,
                size:          bytes.len() as u32,
                count:         stats.count,
                min_id:        stats.min_id,
                max_id:        stats.max_id,
                filter_offset: 0,
                filter_size:   0,
            },
            filter_bytes: filter.serialize(),
        });
        self.pos += bytes.len() as u64;
        Ok(())
    }

    /// 落盘 INDEX REGION 与 FOOTER，关闭写入
    pub fn finish(mut self) -> Result<StoreStats> {
        self.flush_block()?;

        // INDEX REGION
        for pb in &mut self.pending {
            pb.meta.filter_offset = self.pos;
            pb.meta.filter_size   = pb.filter_bytes.len() as u32;
            self.out
                .write_all(&pb.filter_bytes)
                .map_err(|e| StoreError::StoreIo(e.to_string()))?;
            self.pos += pb.filter_bytes.len() as u64;
        }

        // FOOTER
        let footer = StoreFooter {
            num_records: self.records,
            blocks:      self.pending.iter().map(|pb| pb.meta.clone()).collect(),
        };
        let footer_bytes = footer.serialize();
        let footer_crc   = crc32fast::hash(&footer_bytes);
        let footer_len   = footer_bytes.len() as u32;

        self.out
            .write_all(&footer_bytes)
            .map_err(|e| StoreError::StoreIo(e.to_string()))?;
        self.out
            .write_all(&footer_crc.to_le_bytes())
            .map_err(|e| StoreError::StoreIo(e.to_string()))?;
        self.out
            .write_all(&footer_len.to_le_bytes())
            .map_err(|e| StoreError::StoreIo(e.to_string()))?;
        self.out
            .write_all(MAGIC)
            .map_err(|e| StoreError::StoreIo(e.to_string()))?;
        self.pos += footer_bytes.len() as u64 + 16;

        self.out.flush().map_err(|e| StoreError::StoreIo(e.to_string()))?;
        Ok(StoreStats { num_records: self.records, file_bytes: self.pos })
    }
}

// ── RecordStore（读取端）──────────────────────────────────────────────────────

/// 只读 Record Store：一个分片或未分片的源库
pub struct RecordStore {
    data:   Vec<u8>,
    footer: StoreFooter,
}

impl RecordStore {
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .map_err(|e| StoreError::StoreIo(format!("{}: {e}", path.display())))?;
        Self::from_bytes(data)
    }

    fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let n = data.len();
        if n < 12 + 16 || &data[..8] != MAGIC || &data[n - 8..] != MAGIC {
            return Err(StoreError::StoreIo("invalid store magic".into()));
        }
        let footer_len = u32::from_le_bytes(data[n - 12..n - 8].try_into().unwrap()) as usize;
        let footer_crc = u32::from_le_bytes(data[n - 16..n - 12].try_into().unwrap());
        let footer_start = (n - 16)
            .checked_sub(footer_len)
            .filter(|&s| s >= 12)
            .ok_or_else(|| StoreError::StoreIo("footer length out of range".into()))?;
        let footer_bytes = &data[footer_start..footer_start + footer_len];

        if crc32fast::hash(footer_bytes) != footer_crc {
            return Err(StoreError::ChecksumMismatch);
        }
        let footer = StoreFooter::deserialize(footer_bytes)?;
        Ok(Self { data, footer })
    }

    pub fn num_records(&self) -> u64 {
        self.footer.num_records
    }

    pub fn min_id(&self) -> Option<RecordId> {
        self.footer.blocks.first().map(|b| b.min_id)
    }

    pub fn max_id(&self) -> Option<RecordId> {
        self.footer.blocks.last().map(|b| b.max_id)
    }

    fn block_filter(&self, meta: &BlockMeta) -> Result<BlockFilter> {
        let start = meta.filter_offset as usize;
        let end   = start + meta.filter_size as usize;
        if end > self.data.len() {
            return Err(StoreError::StoreIo("block filter out of range".into()));
        }
        Ok(BlockFilter::deserialize(&self.data[start..end]))
    }

    fn block_records(&self, meta: &BlockMeta) -> Result<Vec<CardRecord>> {
        let start = meta.offset as usize;
        let end   = start + meta.size as usize;
        if end > self.data.len() {
            return Err(StoreError::StoreIo("block out of range".into()));
        }
        decode_block(&self.data[start..end])
    }

    /// 匹配 `filter` 的总行数（全量精确计数，带块剪枝）
    pub fn count_matching(&self, filter: &CardFilter) -> Result<u64> {
        if filter.is_empty() {
            return Ok(self.footer.num_records);
        }
        let mut n = 0u64;
        for meta in &self.footer.blocks {
            if !self.block_filter(meta)?.may_match(filter) {
                continue;
            }
            n += self
                .block_records(meta)?
                .iter()
                .filter(|r| filter.matches(r))
                .count() as u64;
        }
        Ok(n)
    }

    /// 按 id 降序取匹配行的 `[offset, offset+limit)` 切片。
    /// 反向块扫描；无过滤条件时按块计数整块跳过。
    pub fn select(&self, filter: &CardFilter, limit: usize, offset: u64) -> Result<Vec<CardRecord>> {
        let mut out  = Vec::with_capacity(limit.min(256));
        let mut skip = offset;

        for meta in self.footer.blocks.iter().rev() {
            if out.len() >= limit {
                break;
            }
            if filter.is_empty() {
                if skip >= meta.count as u64 {
                    skip -= meta.count as u64;
                    continue;
                }
            } else if !self.block_filter(meta)?.may_match(filter) {
                continue;
            }
            for rec in self.block_records(meta)?.into_iter().rev() {
                if !filter.matches(&rec) {
                    continue;
                }
                if skip > 0 {
                    skip -= 1;
                    continue;
                }
                out.push(rec);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    /// 按 id 升序取未过滤的 `[offset, offset+limit)` 切片，供 Partitioner 拷贝用
    pub fn slice(&self, offset: u64, limit: u64) -> Result<Vec<CardRecord>> {
        let mut out  = Vec::new();
        let mut skip = offset;

        for meta in &self.footer.blocks {
            if out.len() as u64 >= limit {
                break;
            }
            if skip >= meta.count as u64 {
                skip -= meta.count as u64;
                continue;
            }
            for rec in self.block_records(meta)?.into_iter().skip(skip as usize) {
                out.push(rec);
                if out.len() as u64 >= limit {
                    break;
                }
            }
            skip = 0;
        }
        Ok(out)
    }

    /// 某列的非空去重值；`scope_country`（国家名精确匹配）只对 RegionName 生效
    pub fn distinct(
        &self,
        column:        DistinctColumn,
        scope_country: Option<&str>,
    ) -> Result<BTreeSet<String>> {
        let scoped = scope_country.filter(|_| column == DistinctColumn::RegionName);
        let mut set = BTreeSet::new();

        for meta in &self.footer.blocks {
            if let Some(country) = scoped {
                if !self.block_filter(meta)?.country_name_possible(country) {
                    continue;
                }
            }
            for rec in self.block_records(meta)? {
                if let Some(country) = scoped {
                    if rec.country_name.as_deref() != Some(country) {
                        continue;
                    }
                }
                if let Some(v) = column.value_of(&rec) {
                    set.insert(v.to_string());
                }
            }
        }
        Ok(set)
    }
}

// ── 测试 ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::sample;
    use tempfile::tempdir;

    fn varied(id: RecordId) -> CardRecord {
        let mut rec = sample(id);
        if id % 3 == 0 {
            rec.country_code = Some("FR".into());
            rec.country_name = Some("France".into());
            rec.region_code  = Some("IDF".into());
            rec.region_name  = Some("Île-de-France".into());
        }
        if id % 5 == 0 {
            rec.issuer_name = Some("Crédit Exemple".into());
        }
        rec
    }

    fn write_store(dir: &Path, name: &str, ids: impl Iterator<Item = RecordId>) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut w = StoreWriter::create(&path).unwrap();
        for id in ids {
            w.append(varied(id)).unwrap();
        }
        w.finish().unwrap();
        path
    }

    #[test]
    fn write_open_spanning_blocks() {
        let dir  = tempdir().unwrap();
        let path = write_store(dir.path(), "s.seg", 1..=2500);
        let store = RecordStore::open(&path).unwrap();

        assert_eq!(store.num_records(), 2500);
        assert_eq!(store.min_id(), Some(1));
        assert_eq!(store.max_id(), Some(2500));
    }

    #[test]
    fn select_descending_across_block_boundary() {
        let dir  = tempdir().unwrap();
        let path = write_store(dir.path(), "s.seg", 1..=2500);
        let store = RecordStore::open(&path).unwrap();

        // offset 1020 吃掉整个末块（452 行）并落入中间块
        let rows = store.select(&CardFilter::default(), 10, 1020).unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id).collect();
        let expect: Vec<_> = (0..10).map(|i| 2500 - 1020 - i).collect();
        assert_eq!(ids, expect);
    }

    #[test]
    fn count_and_select_filtered() {
        let dir  = tempdir().unwrap();
        let path = write_store(dir.path(), "s.seg", 1..=300);
        let store = RecordStore::open(&path).unwrap();

        let fr = CardFilter { country: Some("FR".into()), ..Default::default() };
        assert_eq!(store.count_matching(&fr).unwrap(), 100); // id % 3 == 0

        let rows = store.select(&fr, 5, 0).unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![300, 297, 294, 291, 288]);

        // 名称子串同样命中
        let by_name = CardFilter { country: Some("franc".into()), ..Default::default() };
        assert_eq!(store.count_matching(&by_name).unwrap(), 100);
    }

    #[test]
    fn slice_ascending() {
        let dir  = tempdir().unwrap();
        let path = write_store(dir.path(), "s.seg", 1..=2500);
        let store = RecordStore::open(&path).unwrap();

        let rows = store.slice(1100, 5).unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1101, 1102, 1103, 1104, 1105]);
    }

    #[test]
    fn distinct_scoped() {
        let dir  = tempdir().unwrap();
        let path = write_store(dir.path(), "s.seg", 1..=30);
        let store = RecordStore::open(&path).unwrap();

        let countries: Vec<_> = store
            .distinct(DistinctColumn::CountryName, None)
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(countries, vec!["France".to_string(), "United States".to_string()]);

        let fr_regions: Vec<_> = store
            .distinct(DistinctColumn::RegionName, Some("France"))
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(fr_regions, vec!["Île-de-France".to_string()]);

        // scope 只对 RegionName 生效
        let all = store.distinct(DistinctColumn::CountryName, Some("France")).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn out_of_order_id_rejected() {
        let dir  = tempdir().unwrap();
        let path = dir.path().join("s.seg");
        let mut w = StoreWriter::create(&path).unwrap();
        w.append(sample(10)).unwrap();
        let err = w.append(sample(10)).unwrap_err();
        assert!(matches!(err, StoreError::OutOfOrderId { prev: 10, next: 10 }));
    }

    #[test]
    fn truncated_file_rejected() {
        let dir  = tempdir().unwrap();
        let path = write_store(dir.path(), "s.seg", 1..=50);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 3);
        std::fs::write(&path, &bytes).unwrap();
        assert!(RecordStore::open(&path).is_err());
    }
}

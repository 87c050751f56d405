//! 记录块读写
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │ count        (u32 LE)            │
//! │ first_id     (i64 LE)            │
//! │ uncomp_size  (u32 LE)            │
//! │ data         (LZ4 压缩的行编码)   │
//! │ CRC32        (u32 LE)            │
//! └──────────────────────────────────┘
//! ```

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::common::{RecordId, Result, StoreError};
use crate::index::{BlockFilter, BlockFilterBuilder};
use crate::record::CardRecord;

/// 每块最多容纳的行数
pub const BLOCK_MAX_ROWS: usize = 1024;

const BLOCK_HEADER_LEN: usize = 16; // count + first_id + uncomp_size

// ── BlockBuilder ──────────────────────────────────────────────────────────────

/// 攒一个块的行，`build()` 产出块字节与块级过滤索引
pub struct BlockBuilder {
    records: Vec<CardRecord>,
    filter:  BlockFilterBuilder,
}

/// `build()` 附带的块统计，进 Footer 的 BlockMeta
pub struct BlockStats {
    pub count:  u32,
    pub min_id: RecordId,
    pub max_id: RecordId,
}

impl BlockBuilder {
    pub fn new() -> Self {
        Self {
            records: Vec::with_capacity(BLOCK_MAX_ROWS),
            filter:  BlockFilterBuilder::new(),
        }
    }

    pub fn add(&mut self, rec: CardRecord) {
        self.filter.add_record(&rec);
        self.records.push(rec);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= BLOCK_MAX_ROWS
    }

    /// 序列化为块字节（行编码 → LZ4 → header + CRC）
    pub fn build(self) -> Result<(Vec<u8>, BlockFilter, BlockStats)> {
        let count    = self.records.len() as u32;
        let first_id = self.records.first().map(|r| r.id).unwrap_or(0);
        let last_id  = self.records.last().map(|r| r.id).unwrap_or(0);

        let mut rows = Vec::new();
        for rec in &self.records {
            rec.encode(&mut rows);
        }
        let uncomp_size = rows.len() as u32;
        let compressed  = lz4::block::compress(&rows, None, false)
            .map_err(|e| StoreError::Compression(e.to_string()))?;

        let mut block = Vec::with_capacity(BLOCK_HEADER_LEN + compressed.len() + 4);
        block.extend_from_slice(&count.to_le_bytes());
        block.extend_from_slice(&first_id.to_le_bytes());
        block.extend_from_slice(&uncomp_size.to_le_bytes());
        block.extend_from_slice(&compressed);

        let crc = crc32fast::hash(&block);
        block.extend_from_slice(&crc.to_le_bytes());

        let stats = BlockStats { count, min_id: first_id, max_id: last_id };
        Ok((block, self.filter.build(), stats))
    }
}

impl Default for BlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ── 解码 ──────────────────────────────────────────────────────────────────────

/// 校验 CRC 后解压并解码整块的行
pub fn decode_block(data: &[u8]) -> Result<Vec<CardRecord>> {
    if data.len() < BLOCK_HEADER_LEN + 4 {
        return Err(StoreError::StoreIo("block data too short".into()));
    }
    let payload_end = data.len() - 4;
    let stored_crc  = u32::from_le_bytes(data[payload_end..].try_into().unwrap());
    if crc32fast::hash(&data[..payload_end]) != stored_crc {
        return Err(StoreError::ChecksumMismatch);
    }

    let mut rd = Cursor::new(&data[..BLOCK_HEADER_LEN]);
    let count = rd
        .read_u32::<LittleEndian>()
        .map_err(|e| StoreError::Encoding(e.to_string()))? as usize;
    let _first_id = rd
        .read_i64::<LittleEndian>()
        .map_err(|e| StoreError::Encoding(e.to_string()))?;
    let uncomp_size = rd
        .read_u32::<LittleEndian>()
        .map_err(|e| StoreError::Encoding(e.to_string()))? as usize;

    let raw = lz4::block::decompress(&data[BLOCK_HEADER_LEN..payload_end], Some(uncomp_size as i32))
        .map_err(|e| StoreError::Compression(e.to_string()))?;

    let mut rows = Vec::with_capacity(count);
    let mut cur  = Cursor::new(raw.as_slice());
    for _ in 0..count {
        rows.push(CardRecord::decode(&mut cur)?);
    }
    Ok(rows)
}

// ── 测试 ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::sample;

    #[test]
    fn block_roundtrip() {
        let mut b = BlockBuilder::new();
        for id in 1..=10 {
            b.add(sample(id));
        }
        let (bytes, _, stats) = b.build().unwrap();
        assert_eq!(stats.count, 10);
        assert_eq!(stats.min_id, 1);
        assert_eq!(stats.max_id, 10);

        let rows = decode_block(&bytes).unwrap();
        assert_eq!(rows.len(), 10);
        assert_eq!(rows[0], sample(1));
        assert_eq!(rows[9], sample(10));
    }

    #[test]
    fn corrupted_block_rejected() {
        let mut b = BlockBuilder::new();
        b.add(sample(1));
        let (mut bytes, _, _) = b.build().unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        assert!(matches!(decode_block(&bytes), Err(StoreError::ChecksumMismatch)));
    }
}

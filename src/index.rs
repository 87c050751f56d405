//! 块级过滤索引
//!
//! 每个记录块携带一个 **BlockFilter**：一个按列命名空间化的 Bloom Filter，
//! 过滤扫描时用于整块剪枝。键有两类：
//! - **token 键** — `cc:<code>` / `rc:<code>`，支持 code 精确匹配的剪枝
//! - **trigram 键** — `cn:` / `rn:` / `no:` / `hn:` / `in:` 前缀 + 小写值的
//!   3 字节滑动窗口，支持大小写不敏感子串匹配的剪枝
//!
//! 剪枝是保守的：只有当过滤条件**证明**块内不可能有匹配行时才跳过；
//! 子串长度不足 3 字节时不剪枝。

use crate::record::{CardFilter, CardRecord};

// ── 命名空间 ──────────────────────────────────────────────────────────────────

const NS_COUNTRY_CODE: &[u8] = b"cc:";
const NS_COUNTRY_NAME: &[u8] = b"cn:";
const NS_REGION_CODE:  &[u8] = b"rc:";
const NS_REGION_NAME:  &[u8] = b"rn:";
const NS_CARD_NUMBER:  &[u8] = b"no:";
const NS_HOLDER_NAME:  &[u8] = b"hn:";
const NS_ISSUER_NAME:  &[u8] = b"in:";

fn token_key(ns: &[u8], value: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(ns.len() + value.len());
    key.extend_from_slice(ns);
    key.extend_from_slice(value.as_bytes());
    key
}

/// 小写值的 3 字节滑动窗口键
fn trigram_keys(ns: &[u8], value: &str) -> Vec<Vec<u8>> {
    let lower = value.to_lowercase();
    let bytes = lower.as_bytes();
    if bytes.len() < 3 {
        return Vec::new();
    }
    bytes
        .windows(3)
        .map(|w| {
            let mut key = Vec::with_capacity(ns.len() + 3);
            key.extend_from_slice(ns);
            key.extend_from_slice(w);
            key
        })
        .collect()
}

// ── Bloom Filter ──────────────────────────────────────────────────────────────

/// 双哈希 Bloom Filter（FNV-1a），7 个探针，FPP ≈ 5%
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits:     Vec<u8>,
    num_bits: usize,
}

const NUM_PROBES: u64 = 7;

fn fnv_pair(value: &[u8]) -> (u64, u64) {
    let mut h1: u64 = 0xcbf29ce484222325;
    let mut h2: u64 = 0x517cc1b727220a95;
    for &b in value {
        h1 ^= b as u64;
        h1 = h1.wrapping_mul(0x100000001b3);
        h2 ^= b as u64;
        h2 = h2.wrapping_mul(0x00000100000001b3);
    }
    (h1, h2 | 1)
}

impl BloomFilter {
    /// 按期望键数创建（num_bits ≈ ndv × 10）
    pub fn new(expected_ndv: usize) -> Self {
        let num_bits  = (expected_ndv * 10).max(64);
        let num_bytes = num_bits.div_ceil(8);
        Self { bits: vec![0u8; num_bytes], num_bits }
    }

    pub fn add(&mut self, value: &[u8]) {
        let (h1, h2) = fnv_pair(value);
        for i in 0..NUM_PROBES {
            let bit = (h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits as u64) as usize;
            self.bits[bit / 8] |= 1 << (bit % 8);
        }
    }

    pub fn may_contain(&self, value: &[u8]) -> bool {
        if self.num_bits == 0 {
            return true;
        }
        let (h1, h2) = fnv_pair(value);
        for i in 0..NUM_PROBES {
            let bit = (h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits as u64) as usize;
            if self.bits[bit / 8] & (1 << (bit % 8)) == 0 {
                return false;
            }
        }
        true
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.bits.len());
        out.extend_from_slice(&(self.num_bits as u32).to_le_bytes());
        out.extend_from_slice(&self.bits);
        out
    }

    pub fn deserialize(data: &[u8]) -> Self {
        if data.len() < 4 {
            return Self { bits: vec![], num_bits: 0 };
        }
        let num_bits = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
        let bits     = data[4..].to_vec();
        // 头部声明的位数超出实际位数组 → 视为损坏，退化为不剪枝的过滤器
        if num_bits > bits.len() * 8 {
            return Self { bits: vec![], num_bits: 0 };
        }
        Self { bits, num_bits }
    }
}

// ── BlockFilter ───────────────────────────────────────────────────────────────

/// 一个记录块的已构建过滤索引
#[derive(Debug, Clone)]
pub struct BlockFilter {
    bloom: BloomFilter,
}

impl BlockFilter {
    pub fn deserialize(data: &[u8]) -> Self {
        Self { bloom: BloomFilter::deserialize(data) }
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.bloom.serialize()
    }

    /// 子串是否可能出现在该命名空间列的某个值里。
    /// 长度不足 3 字节时无法剪枝，返回 true。
    fn substring_possible(&self, ns: &[u8], needle: &str) -> bool {
        let keys = trigram_keys(ns, needle);
        if keys.is_empty() {
            return true;
        }
        keys.iter().all(|k| self.bloom.may_contain(k))
    }

    fn token_possible(&self, ns: &[u8], value: &str) -> bool {
        self.bloom.may_contain(&token_key(ns, value))
    }

    /// 去重聚合按国家名限定时的剪枝入口
    pub fn country_name_possible(&self, name: &str) -> bool {
        self.substring_possible(NS_COUNTRY_NAME, name)
    }

    /// 该块是否可能包含匹配 `filter` 的行
    pub fn may_match(&self, filter: &CardFilter) -> bool {
        if let Some(q) = &filter.country {
            // code 精确 或 name 子串，两条路都被排除才能剪枝
            if !self.token_possible(NS_COUNTRY_CODE, q)
                && !self.substring_possible(NS_COUNTRY_NAME, q)
            {
                return false;
            }
        }
        if let Some(q) = &filter.region {
            if !self.token_possible(NS_REGION_CODE, q)
                && !self.substring_possible(NS_REGION_NAME, q)
            {
                return false;
            }
        }
        if let Some(q) = &filter.card_number {
            if !self.substring_possible(NS_CARD_NUMBER, q) {
                return false;
            }
        }
        if let Some(q) = &filter.issuer_name {
            if !self.substring_possible(NS_ISSUER_NAME, q) {
                return false;
            }
        }
        if let Some(q) = &filter.holder_name {
            if !self.substring_possible(NS_HOLDER_NAME, q) {
                return false;
            }
        }
        true
    }
}

// ── 构建 ──────────────────────────────────────────────────────────────────────

/// 收集一个块内所有键，`build()` 时按实际键数定容构建 Bloom
#[derive(Debug, Default)]
pub struct BlockFilterBuilder {
    keys: std::collections::HashSet<Vec<u8>>,
}

impl BlockFilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&mut self, rec: &CardRecord) {
        if let Some(code) = &rec.country_code {
            self.keys.insert(token_key(NS_COUNTRY_CODE, code));
        }
        if let Some(code) = &rec.region_code {
            self.keys.insert(token_key(NS_REGION_CODE, code));
        }
        if let Some(name) = &rec.country_name {
            self.keys.extend(trigram_keys(NS_COUNTRY_NAME, name));
        }
        if let Some(name) = &rec.region_name {
            self.keys.extend(trigram_keys(NS_REGION_NAME, name));
        }
        if let Some(name) = &rec.issuer_name {
            self.keys.extend(trigram_keys(NS_ISSUER_NAME, name));
        }
        self.keys.extend(trigram_keys(NS_CARD_NUMBER, &rec.card_number));
        self.keys.extend(trigram_keys(NS_HOLDER_NAME, &rec.holder_name));
    }

    pub fn build(self) -> BlockFilter {
        let mut bloom = BloomFilter::new(self.keys.len());
        for key in &self.keys {
            bloom.add(key);
        }
        BlockFilter { bloom }
    }
}

// ── 测试 ──────────────────────────────────────────────────────────────────────

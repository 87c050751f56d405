//! 卡记录的行编码与过滤谓词
//!
//! 行编码（little-endian）：
//! ```text
//! id            i64
//! card_number   u32 长度前缀 + UTF-8
//! holder_name   u32 长度前缀 + UTF-8
//! 可空字符串×12  1 字节存在标记 [+ u32 长度前缀 + UTF-8]
//! latitude      1 字节存在标记 [+ f64]
//! longitude     1 字节存在标记 [+ f64]
//! ```

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::common::{RecordId, Result, StoreError};

// ── CardRecord ────────────────────────────────────────────────────────────────

/// 一条卡记录。`id` 在整个数据集内唯一且单调递增，是唯一排序键。
#[derive(Debug, Clone, PartialEq)]
pub struct CardRecord {
    pub id:           RecordId,
    pub card_number:  String,
    pub holder_name:  String,
    pub issuer_name:  Option<String>,
    pub issuer_url:   Option<String>,
    pub logo_ref:     Option<String>,
    pub expiry:       Option<String>,
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub region_code:  Option<String>,
    pub region_name:  Option<String>,
    pub city:         Option<String>,
    pub phone:        Option<String>,
    pub email:        Option<String>,
    pub latitude:     Option<f64>,
    pub longitude:    Option<f64>,
}

// ── 行编码 ────────────────────────────────────────────────────────────────────

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn put_opt_str(out: &mut Vec<u8>, s: &Option<String>) {
    match s {
        Some(s) => {
            out.push(1);
            put_str(out, s);
        }
        None => out.push(0),
    }
}

fn put_opt_f64(out: &mut Vec<u8>, v: &Option<f64>) {
    match v {
        Some(v) => {
            out.push(1);
            out.extend_from_slice(&v.to_le_bytes());
        }
        None => out.push(0),
    }
}

fn get_str<R: Read>(rd: &mut R) -> Result<String> {
    let len = rd
        .read_u32::<LittleEndian>()
        .map_err(|e| StoreError::Encoding(e.to_string()))? as usize;
    let mut buf = vec![0u8; len];
    rd.read_exact(&mut buf)
        .map_err(|e| StoreError::Encoding(e.to_string()))?;
    String::from_utf8(buf).map_err(|e| StoreError::Encoding(e.to_string()))
}

fn get_opt_str<R: Read>(rd: &mut R) -> Result<Option<String>> {
    let tag = rd.read_u8().map_err(|e| StoreError::Encoding(e.to_string()))?;
    match tag {
        0 => Ok(None),
        1 => Ok(Some(get_str(rd)?)),
        t => Err(StoreError::Encoding(format!("bad option tag {t}"))),
    }
}

fn get_opt_f64<R: Read>(rd: &mut R) -> Result<Option<f64>> {
    let tag = rd.read_u8().map_err(|e| StoreError::Encoding(e.to_string()))?;
    match tag {
        0 => Ok(None),
        1 => Ok(Some(
            rd.read_f64::<LittleEndian>()
                .map_err(|e| StoreError::Encoding(e.to_string()))?,
        )),
        t => Err(StoreError::Encoding(format!("bad option tag {t}"))),
    }
}

impl CardRecord {
    /// 追加编码到 `out`
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.id.to_le_bytes());
        put_str(out, &self.card_number);
        put_str(out, &self.holder_name);
        put_opt_str(out, &self.issuer_name);
        put_opt_str(out, &self.issuer_url);
        put_opt_str(out, &self.logo_ref);
        put_opt_str(out, &self.expiry);
        put_opt_str(out, &self.country_code);
        put_opt_str(out, &self.country_name);
        put_opt_str(out, &self.region_code);
        put_opt_str(out, &self.region_name);
        put_opt_str(out, &self.city);
        put_opt_str(out, &self.phone);
        put_opt_str(out, &self.email);
        put_opt_f64(out, &self.latitude);
        put_opt_f64(out, &self.longitude);
    }

    pub fn decode<R: Read>(rd: &mut R) -> Result<Self> {
        Ok(Self {
            id: rd
                .read_i64::<LittleEndian>()
                .map_err(|e| StoreError::Encoding(e.to_string()))?,
            card_number:  get_str(rd)?,
            holder_name:  get_str(rd)?,
            issuer_name:  get_opt_str(rd)?,
            issuer_url:   get_opt_str(rd)?,
            logo_ref:     get_opt_str(rd)?,
            expiry:       get_opt_str(rd)?,
            country_code: get_opt_str(rd)?,
            country_name: get_opt_str(rd)?,
            region_code:  get_opt_str(rd)?,
            region_name:  get_opt_str(rd)?,
            city:         get_opt_str(rd)?,
            phone:        get_opt_str(rd)?,
            email:        get_opt_str(rd)?,
            latitude:     get_opt_f64(rd)?,
            longitude:    get_opt_f64(rd)?,
        })
    }
}

// ── 过滤谓词 ──────────────────────────────────────────────────────────────────

/// 可选字段的合取谓词；缺省字段不施加约束。
///
/// 语义与单库查询一致：
/// - `country` / `region`：code 精确匹配 **或** name 大小写不敏感子串
/// - `card_number` / `issuer_name` / `holder_name`：大小写不敏感子串
///
/// 谓词无状态、与分片无关：同一个谓词原样作用于每个分片。
#[derive(Debug, Clone, Default)]
pub struct CardFilter {
    pub country:     Option<String>,
    pub region:      Option<String>,
    pub card_number: Option<String>,
    pub issuer_name: Option<String>,
    pub holder_name: Option<String>,
}

fn contains_ci(hay: &str, needle_lower: &str) -> bool {
    hay.to_lowercase().contains(needle_lower)
}

impl CardFilter {
    pub fn is_empty(&self) -> bool {
        self.country.is_none()
            && self.region.is_none()
            && self.card_number.is_none()
            && self.issuer_name.is_none()
            && self.holder_name.is_none()
    }

    pub fn matches(&self, rec: &CardRecord) -> bool {
        if let Some(q) = &self.country {
            let code_hit = rec.country_code.as_deref() == Some(q.as_str());
            let name_hit = rec
                .country_name
                .as_deref()
                .is_some_and(|n| contains_ci(n, &q.to_lowercase()));
            if !code_hit && !name_hit {
                return false;
            }
        }
        if let Some(q) = &self.region {
            let code_hit = rec.region_code.as_deref() == Some(q.as_str());
            let name_hit = rec
                .region_name
                .as_deref()
                .is_some_and(|n| contains_ci(n, &q.to_lowercase()));
            if !code_hit && !name_hit {
                return false;
            }
        }
        if let Some(q) = &self.card_number {
            if !contains_ci(&rec.card_number, &q.to_lowercase()) {
                return false;
            }
        }
        if let Some(q) = &self.issuer_name {
            if !rec
                .issuer_name
                .as_deref()
                .is_some_and(|v| contains_ci(v, &q.to_lowercase()))
            {
                return false;
            }
        }
        if let Some(q) = &self.holder_name {
            if !contains_ci(&rec.holder_name, &q.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

// ── 去重聚合列 ────────────────────────────────────────────────────────────────

/// 支持去重聚合的列
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistinctColumn {
    CountryName,
    RegionName,
}

impl DistinctColumn {
    pub fn value_of<'a>(&self, rec: &'a CardRecord) -> Option<&'a str> {
        match self {
            Self::CountryName => rec.country_name.as_deref(),
            Self::RegionName  => rec.region_name.as_deref(),
        }
    }
}

// ── 测试 ──────────────────────────────────────────────────────────────────────

/// 跨模块测试共用的样例记录
#[cfg(test)]
pub(crate) fn sample(id: RecordId) -> CardRecord {
    CardRecord {
        id,
        card_number:  format!("4111{:012}", id),
        holder_name:  format!("Holder {id}"),
        issuer_name:  Some("First Example Bank".into()),
        issuer_url:   Some("https://bank.example".into()),
        logo_ref:     None,
        expiry:       Some("12/29".into()),
        country_code: Some("US".into()),
        country_name: Some("United States".into()),
        region_code:  Some("CA".into()),
        region_name:  Some("California".into()),
        city:         Some("San Jose".into()),
        phone:        None,
        email:        None,
        latitude:     Some(37.33),
        longitude:    Some(-121.89),
    }
}

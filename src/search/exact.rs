//! 桶索引上的精确查找。
//!
//! 查询的前 W 个碱基打包成 key 直取桶，其余部分对语料做逐字节比对。
//! 前 W 碱基含歧义的查询不可能命中任何被索引的位置，按未命中处理。

use anyhow::{bail, Result};
use log::debug;

use crate::format::BucketFile;
use crate::util::dna;

#[derive(Debug, Clone, Copy)]
pub struct ExactOptions {
    /// 每条查询最多报告的命中数；None 不设限。
    pub max_hits: Option<usize>,
    /// 跳过溢出桶：高重复 k-mer 视为不可查。
    pub skip_overflow: bool,
}

impl Default for ExactOptions {
    fn default() -> Self {
        Self {
            max_hits: None,
            skip_overflow: false,
        }
    }
}

/// 返回命中的语料偏移，升序。`query` 必须已归一化。
pub fn find_exact(file: &BucketFile, query: &[u8], opt: &ExactOptions) -> Result<Vec<u32>> {
    let w = file.key_width() as usize;
    if query.len() < w {
        bail!(
            "query of {} bases is shorter than the index key width {}",
            query.len(),
            w
        );
    }

    let Some(key) = dna::pack_key(query, w as u32) else {
        debug!("ambiguous base inside key window, query cannot match");
        return Ok(Vec::new());
    };

    let bucket = file.bucket(key)?;
    if bucket.from_overflow && opt.skip_overflow {
        debug!("slot {} overflows and overflow search is off", key);
        return Ok(Vec::new());
    }

    let dna_buf = file.dna();
    let tail = &query[w..];
    let mut hits = Vec::new();
    for off in bucket.offsets.iter() {
        let start = off as usize + w;
        let end = start + tail.len();
        if end <= dna_buf.len() && &dna_buf[start..end] == tail {
            hits.push(off);
            if let Some(cap) = opt.max_hits {
                if hits.len() >= cap {
                    debug!("hit cap {} reached for slot {}", cap, key);
                    break;
                }
            }
        }
    }
    Ok(hits)
}

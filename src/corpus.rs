//! DNA 语料构建：把多条序列拼接为一个连续字节缓冲。
//!
//! 布局：开头一个 0 哨兵，随后每条序列的大写碱基 + 一个 0 哨兵，
//! 末尾再补至少 key 宽度个 0（避免序列尾部取窗口越界），
//! 总长向上取整到 4 字节边界。染色体表记录每条序列的名字、长度与语料内偏移。

use anyhow::{anyhow, bail, Result};
use std::collections::HashSet;

use crate::io::fasta::FastaRecord;
use crate::util::dna;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chrom {
    pub name: String,
    /// 碱基数，不含哨兵。
    pub size: u32,
    /// 语料内的字节偏移（首碱基位置）。
    pub offset: u64,
}

#[derive(Debug)]
pub struct Corpus {
    /// 拼接后的语料，含哨兵与尾部填充，长度即落盘长度。
    pub dna: Vec<u8>,
    /// 按载入顺序排列，offset 严格递增。
    pub chroms: Vec<Chrom>,
}

/// 预先算出语料的落盘长度：1 + Σ(size+1) + key 宽度，取整到 4。
pub fn disk_size(total_bases: u64, seq_count: u64, key_width: u32) -> u64 {
    let raw = 1 + total_bases + seq_count + u64::from(key_width);
    (raw + 3) & !3
}

/// `Chrom.size` 是 u32；更长的单条序列无法记录，拷贝前就拒绝。
fn chrom_size(id: &str, len: usize) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| anyhow!("sequence '{}' of {} bases exceeds the 32-bit size field", id, len))
}

impl Corpus {
    /// 两遍式构建：先精确定尺寸，再拷贝。重名或超出碱基上限立即失败，
    /// 不留下任何部分结果。
    pub fn build(records: &[FastaRecord], key_width: u32, max_total_bases: u64) -> Result<Self> {
        if records.is_empty() {
            bail!("no sequences in input");
        }

        // 第一遍：查重名、累计总量
        let mut seen: HashSet<&str> = HashSet::new();
        let mut total: u64 = 0;
        for rec in records {
            if !seen.insert(rec.id.as_str()) {
                bail!("duplicate sequence name '{}'", rec.id);
            }
            total += u64::from(chrom_size(&rec.id, rec.seq.len())?);
            if total > max_total_bases {
                bail!(
                    "too much sequence: {} bases exceeds limit of {}",
                    total,
                    max_total_bases
                );
            }
        }
        if total == 0 {
            bail!("input contains only empty sequences");
        }

        // 第二遍：拷贝归一化碱基
        let size = disk_size(total, records.len() as u64, key_width);
        let mut dna = vec![0u8; size as usize];
        let mut chroms = Vec::with_capacity(records.len());
        let mut at: u64 = 1; // dna[0] 是起始哨兵
        for rec in records {
            let offset = at;
            for (i, &b) in rec.seq.iter().enumerate() {
                dna[offset as usize + i] = dna::normalize_base(b);
            }
            at += rec.seq.len() as u64 + 1; // 序列间一个 0 哨兵
            chroms.push(Chrom {
                name: rec.id.clone(),
                size: rec.seq.len() as u32,
                offset,
            });
        }

        Ok(Self { dna, chroms })
    }

    pub fn total_disk_size(&self) -> u64 {
        self.dna.len() as u64
    }

    pub fn bases_total(&self) -> u64 {
        self.chroms.iter().map(|c| u64::from(c.size)).sum()
    }
}

/// 把语料偏移映射回 (染色体下标, 染色体内 0 基位置)。
/// 落在哨兵或填充上时返回 None。
pub fn find_chrom(chroms: &[Chrom], offset: u64) -> Option<(usize, u32)> {
    let mut lo = 0usize;
    let mut hi = chroms.len();
    while lo < hi {
        let mid = (lo + hi) / 2;
        let c = &chroms[mid];
        if offset < c.offset {
            hi = mid;
        } else if offset >= c.offset + u64::from(c.size) {
            lo = mid + 1;
        } else {
            return Some((mid, (offset - c.offset) as u32));
        }
    }
    None
}

//! 后缀数组构建（倍增法，O(n log n) 轮排序）与区间划分。
//!
//! 与桶索引是两种真正不同的结构：后缀数组支持任意前缀长度的二分收窄，
//! 因而能做替换容错搜索；桶索引只做定宽精确查找。此处的数组按语料原始
//! 字节序排序（哨兵 0 最小），随后过滤到可索引位置（窗口内无歧义字节），
//! 过滤不破坏后缀序。

use anyhow::{bail, Result};

use crate::util::dna;

/// 对整个语料做后缀排序，返回全部位置的后缀数组。
pub fn sort_suffixes(text: &[u8]) -> Vec<u32> {
    let n = text.len();
    if n == 0 {
        return Vec::new();
    }
    let mut sa: Vec<usize> = (0..n).collect();
    let mut rank: Vec<i32> = text.iter().map(|&b| i32::from(b)).collect();
    let mut tmp: Vec<i32> = vec![0; n];

    let mut k = 1usize;
    while k < n {
        sa.sort_unstable_by(|&i, &j| {
            let r1 = rank[i];
            let r2 = rank[j];
            if r1 != r2 {
                return r1.cmp(&r2);
            }
            let r1n = if i + k < n { rank[i + k] } else { -1 };
            let r2n = if j + k < n { rank[j + k] } else { -1 };
            r1n.cmp(&r2n)
        });

        tmp[sa[0]] = 0;
        for i in 1..n {
            let a = sa[i - 1];
            let b = sa[i];
            let prev = (rank[a], if a + k < n { rank[a + k] } else { -1 });
            let curr = (rank[b], if b + k < n { rank[b + k] } else { -1 });
            tmp[b] = tmp[a] + i32::from(curr != prev);
        }

        rank.copy_from_slice(&tmp);
        if rank[sa[n - 1]] as usize == n - 1 {
            break;
        }
        k <<= 1;
    }

    sa.into_iter().map(|x| x as u32).collect()
}

/// 数组元素是 u32 语料偏移，更长的语料无法表示，截断前拒绝。
fn check_offset_space(len: usize) -> Result<()> {
    if len > u32::MAX as usize {
        bail!("corpus of {} bytes exceeds 32-bit offset space", len);
    }
    Ok(())
}

/// 完整排序后过滤出可索引位置：前 `key_width` 个字节全为 ACGT。
/// 过滤保持相对顺序，结果仍是后缀序。
pub fn build_suffix_array(text: &[u8], key_width: u32) -> Result<Vec<u32>> {
    check_offset_space(text.len())?;
    let w = key_width as usize;
    Ok(sort_suffixes(text)
        .into_iter()
        .filter(|&p| {
            let p = p as usize;
            p + w <= text.len() && text[p..p + w].iter().all(|&b| dna::base_code(b).is_some())
        })
        .collect())
}

/// 越界当作 0（排序最前，永不等于任何碱基）。
#[inline]
fn byte_at(text: &[u8], pos: usize) -> u8 {
    text.get(pos).copied().unwrap_or(0)
}

/// 在共享 `depth` 字节前缀的 sa 区间 [start, start+size) 内，
/// 二分出 depth 处字节等于 `b` 的子区间。区间内该字节必然单调不减。
/// `sa_at` 是按下标取后缀偏移的访问器，磁盘映射的数组无需拷贝即可查。
pub fn partition_range(
    text: &[u8],
    sa_at: &impl Fn(usize) -> u32,
    start: usize,
    size: usize,
    depth: usize,
    b: u8,
) -> (usize, usize) {
    // 下界：第一个 >= b
    let mut lo = start;
    let mut hi = start + size;
    while lo < hi {
        let mid = (lo + hi) / 2;
        if byte_at(text, sa_at(mid) as usize + depth) < b {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    let lower = lo;
    // 上界：第一个 > b
    let mut hi = start + size;
    while lo < hi {
        let mid = (lo + hi) / 2;
        if byte_at(text, sa_at(mid) as usize + depth) <= b {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    (lower, lo - lower)
}

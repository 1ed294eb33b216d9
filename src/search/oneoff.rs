//! 后缀数组上的替换容错查找（分支限界递归）。
//!
//! 递归状态：已匹配前缀长度、当前 sa 子区间、已用替换数与预算。
//! 基例一：前缀吃完整条查询，区间内全部命中。
//! 基例二：预算耗尽，对剩余碱基做一次精确二分收窄，收得住才命中。
//! 递归例：按下一碱基（A、C、G、T 序）把区间分成四路，命中查询碱基的
//! 一路代价 0，其余代价 1；会超预算的分支直接剪掉，结果与“照样递归、
//! 由基例兜底”完全一致。同一替换数下每个数组位置只会经由一条路径到达，
//! 无需去重。

use anyhow::{bail, Result};

use crate::format::SuffixFile;
use crate::index::suffix::partition_range;

/// 返回命中的语料偏移，升序。`query` 必须已归一化。
/// `max_subs` 为 0 即后缀数组上的精确查找。
pub fn find_with_mismatches(file: &SuffixFile, query: &[u8], max_subs: u32) -> Result<Vec<u32>> {
    let w = file.key_width() as usize;
    if query.len() < w {
        bail!(
            "query of {} bases is shorter than the index key width {}",
            query.len(),
            w
        );
    }

    let dna = file.dna();
    let sa = file.suffix_array();
    let sa_at = |i: usize| sa.get(i); // 映射里的数组按需解码，不整体拷贝

    let mut hits = Vec::new();
    recurse(dna, &sa_at, query, 0, 0, sa.len(), 0, max_subs, &mut hits);
    hits.sort_unstable();
    Ok(hits)
}

fn emit(sa_at: &impl Fn(usize) -> u32, start: usize, size: usize, hits: &mut Vec<u32>) {
    hits.extend((start..start + size).map(sa_at));
}

fn recurse(
    dna: &[u8],
    sa_at: &impl Fn(usize) -> u32,
    query: &[u8],
    depth: usize,
    start: usize,
    size: usize,
    subs: u32,
    max_subs: u32,
    hits: &mut Vec<u32>,
) {
    if size == 0 {
        return;
    }
    if depth == query.len() {
        emit(sa_at, start, size, hits);
        return;
    }
    if subs == max_subs {
        // 预算耗尽：剩余部分必须逐碱基精确收窄。
        // 查询里的 N 只能靠替换消化，这里已无预算，直接判空。
        let mut s = start;
        let mut n = size;
        for d in depth..query.len() {
            if crate::util::dna::base_code(query[d]).is_none() {
                return;
            }
            let (ns, nn) = partition_range(dna, sa_at, s, n, d, query[d]);
            if nn == 0 {
                return;
            }
            s = ns;
            n = nn;
        }
        emit(sa_at, s, n, hits);
        return;
    }
    for b in [b'A', b'C', b'G', b'T'] {
        let cost = u32::from(b != query[depth]);
        if subs + cost > max_subs {
            continue;
        }
        let (ns, nn) = partition_range(dna, sa_at, start, size, depth, b);
        recurse(dna, sa_at, query, depth + 1, ns, nn, subs + cost, max_subs, hits);
    }
}

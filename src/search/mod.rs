//! 查询侧：桶索引精确查找与后缀数组容错查找。

pub mod exact;
pub mod oneoff;

use crate::util::dna;

/// 查询序列归一化：与语料同一张表（大写，U→T，杂字符→N）。
pub fn normalize_query(seq: &[u8]) -> Vec<u8> {
    seq.iter().map(|&b| dna::normalize_base(b)).collect()
}

/// 等长逐碱基替换计数（命中后的事后核对与展示用）。
pub fn count_mismatches(query: &[u8], target: &[u8]) -> u32 {
    debug_assert_eq!(query.len(), target.len());
    query
        .iter()
        .zip(target.iter())
        .filter(|(a, b)| a != b)
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_matches_corpus_rules() {
        assert_eq!(normalize_query(b"acgu-n"), b"ACGTNN");
    }

    #[test]
    fn mismatch_count() {
        assert_eq!(count_mismatches(b"ACGT", b"ACGT"), 0);
        assert_eq!(count_mismatches(b"ACGT", b"AGGA"), 2);
    }
}

//! W-mer 桶索引构建。
//!
//! 对语料做一遍滚动扫描：key 左移 2 bit 并入新碱基，摊还 O(1)；
//! 遇到歧义字节就推进 mask-until 指针，含歧义的窗口整体跳过。
//! 每个可索引位置按 key 挂入对应桶。桶内链表穿在两个平行扁平数组里
//! （arena 式，免去基因组规模下的逐节点堆分配），插入后整体反转，
//! 使桶内偏移升序。桶大小达到 255 的进独立的溢出表。

use anyhow::{bail, Result};
use log::debug;

use crate::corpus::Corpus;
use crate::util::dna;

/// slot 大小字节的溢出哨兵；真实大小进溢出表。
pub const OVERFLOW_SENTINEL: u8 = 255;

/// 桶大小达到该值即溢出。
pub const OVERFLOW_THRESHOLD: u32 = 255;

/// arena 链表的空标记。
const NIL: u32 = u32::MAX;

/// 构建完成的桶索引，各数组即落盘的各 section。
#[derive(Debug)]
pub struct BucketIndex {
    pub key_width: u32,
    pub bases_indexed: u64,
    /// 每 slot 一个字节，4^W 个；255 表示溢出。
    pub slot_sizes: Vec<u8>,
    /// 非溢出 slot 的偏移，按 key 序拼接，桶内升序。
    pub slot_offsets: Vec<u32>,
    /// 溢出 slot 的 key，升序（供二分查找）。
    pub overflow_keys: Vec<u32>,
    pub overflow_sizes: Vec<u32>,
    /// 溢出 slot 的偏移，按 key 序拼接，桶内升序。
    pub overflow_offsets: Vec<u32>,
}

impl BucketIndex {
    pub fn build(corpus: &Corpus, key_width: u32) -> Result<Self> {
        if key_width < 4 || key_width > dna::MAX_KEY_WIDTH {
            bail!("key width {} out of range 4..=16", key_width);
        }
        let n = corpus.dna.len();
        if n > u32::MAX as usize {
            bail!("corpus of {} bytes exceeds 32-bit offset space", n);
        }

        let w = key_width as usize;
        let mask = dna::key_mask(key_width);
        let nslots = dna::slot_count(key_width) as usize;

        let mut heads = vec![NIL; nslots];
        let mut arena_offsets: Vec<u32> = Vec::new();
        let mut arena_next: Vec<u32> = Vec::new();

        // 滚动 key + mask-until 扫描
        let mut key = 0u32;
        let mut mask_til = 0usize;
        for e in 0..n {
            match dna::base_code(corpus.dna[e]) {
                Some(code) => {
                    key = (key << 2 | u32::from(code)) & mask;
                    if e + 1 >= w && e >= mask_til {
                        let start = (e + 1 - w) as u32;
                        let free_pos = arena_offsets.len() as u32;
                        let slot = key as usize;
                        arena_offsets.push(start);
                        arena_next.push(heads[slot]);
                        heads[slot] = free_pos;
                    }
                }
                None => {
                    // 含该字节的窗口全部作废
                    mask_til = e + w;
                }
            }
        }

        let bases_indexed = arena_offsets.len() as u64;
        debug!("indexed {} positions over {} corpus bytes", bases_indexed, n);

        // 逐桶收链：链表是倒序插入的（桶内偏移降序），反转恢复升序
        let mut slot_sizes = vec![0u8; nslots];
        let mut slot_offsets: Vec<u32> = Vec::new();
        let mut overflow_keys: Vec<u32> = Vec::new();
        let mut overflow_sizes: Vec<u32> = Vec::new();
        let mut overflow_offsets: Vec<u32> = Vec::new();
        let mut bucket: Vec<u32> = Vec::new();

        for slot in 0..nslots {
            let mut at = heads[slot];
            if at == NIL {
                continue;
            }
            bucket.clear();
            while at != NIL {
                bucket.push(arena_offsets[at as usize]);
                at = arena_next[at as usize];
            }
            bucket.reverse();

            let size = bucket.len() as u32;
            if size >= OVERFLOW_THRESHOLD {
                slot_sizes[slot] = OVERFLOW_SENTINEL;
                overflow_keys.push(slot as u32); // slot 升序遍历，key 自然有序
                overflow_sizes.push(size);
                overflow_offsets.extend_from_slice(&bucket);
            } else {
                slot_sizes[slot] = size as u8;
                slot_offsets.extend_from_slice(&bucket);
            }
        }

        debug_assert_eq!(
            slot_offsets.len() as u64 + overflow_offsets.len() as u64,
            bases_indexed
        );

        Ok(Self {
            key_width,
            bases_indexed,
            slot_sizes,
            slot_offsets,
            overflow_keys,
            overflow_sizes,
            overflow_offsets,
        })
    }

    pub fn overflow_slot_count(&self) -> u64 {
        self.overflow_keys.len() as u64
    }

    pub fn overflow_base_count(&self) -> u64 {
        self.overflow_offsets.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::fasta::FastaRecord;

    fn rec(id: &str, seq: &[u8]) -> FastaRecord {
        FastaRecord {
            id: id.to_string(),
            desc: None,
            seq: seq.to_vec(),
        }
    }

    /// 朴素 O(N·W) 扫描，作为构建结果的对照。
    fn naive_positions(dna: &[u8], w: usize) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        for s in 0..dna.len().saturating_sub(w - 1) {
            if let Some(key) = dna::pack_key(&dna[s..], w as u32) {
                out.push((key, s as u32));
            }
        }
        out
    }

    fn collect_all(idx: &BucketIndex) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        let mut main_at = 0usize;
        let mut over_at = 0usize;
        let mut over_slot = 0usize;
        for (slot, &size) in idx.slot_sizes.iter().enumerate() {
            if size == OVERFLOW_SENTINEL {
                assert_eq!(idx.overflow_keys[over_slot], slot as u32);
                let n = idx.overflow_sizes[over_slot] as usize;
                for &off in &idx.overflow_offsets[over_at..over_at + n] {
                    out.push((slot as u32, off));
                }
                over_at += n;
                over_slot += 1;
            } else {
                for &off in &idx.slot_offsets[main_at..main_at + size as usize] {
                    out.push((slot as u32, off));
                }
                main_at += size as usize;
            }
        }
        out
    }

    #[test]
    fn matches_naive_scan() {
        let corpus = Corpus::build(
            &[rec("a", b"ACGTACGTACGTNNACGTACG"), rec("b", b"TTTTGGGG")],
            6,
            1_000,
        )
        .unwrap();
        let idx = BucketIndex::build(&corpus, 6).unwrap();
        let naive = naive_positions(&corpus.dna, 6);
        assert_eq!(idx.bases_indexed, naive.len() as u64);

        let mut got = collect_all(&idx);
        let mut want = naive;
        got.sort_unstable();
        want.sort_unstable();
        assert_eq!(got, want);
    }

    #[test]
    fn window_counts_per_chrom() {
        // 每条 20 碱基、W=12：各贡献 20-12+1=9 个窗口，互不越界
        let corpus = Corpus::build(
            &[rec("chrA", b"ACGTACGTACGTACGTACGT"), rec("chrB", b"TTTTGGGGCCCCAAAATTTT")],
            12,
            1_000,
        )
        .unwrap();
        let idx = BucketIndex::build(&corpus, 12).unwrap();
        assert_eq!(idx.bases_indexed, 18);
    }

    #[test]
    fn buckets_are_ascending() {
        let corpus = Corpus::build(&[rec("a", b"AAAAAAAAAA")], 4, 1_000).unwrap();
        let idx = BucketIndex::build(&corpus, 4).unwrap();
        // 唯一的 key 是 AAAA，偏移 1..=7 升序
        let slot = dna::pack_key(b"AAAA", 4).unwrap() as usize;
        assert_eq!(idx.slot_sizes[slot], 7);
        assert_eq!(idx.slot_offsets, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn mask_until_skips_n_windows() {
        let corpus = Corpus::build(&[rec("a", b"ACGTNACGTACGT")], 4, 1_000).unwrap();
        let idx = BucketIndex::build(&corpus, 4).unwrap();
        let naive = naive_positions(&corpus.dna, 4);
        assert_eq!(idx.bases_indexed, naive.len() as u64);
        // N 前 1 个完整窗口（偏移 1），N 后 9..13 不成窗，6..=10 共 5 个... 对照朴素扫描
        let got = collect_all(&idx);
        assert!(got.iter().all(|&(_, off)| {
            let w = &corpus.dna[off as usize..off as usize + 4];
            w.iter().all(|&b| dna::base_code(b).is_some())
        }));
    }

    #[test]
    fn overflow_threshold_routes_to_side_table() {
        // 300 个 A：AAAA 桶有 297 个窗口，必然溢出
        let corpus = Corpus::build(&[rec("a", &vec![b'A'; 300])], 4, 1_000).unwrap();
        let idx = BucketIndex::build(&corpus, 4).unwrap();
        let slot = dna::pack_key(b"AAAA", 4).unwrap();
        assert_eq!(idx.slot_sizes[slot as usize], OVERFLOW_SENTINEL);
        assert_eq!(idx.overflow_keys, vec![slot]);
        assert_eq!(idx.overflow_sizes, vec![297]);
        assert_eq!(idx.overflow_offsets.len(), 297);
        assert!(idx.slot_offsets.is_empty());
        // 总量守恒
        assert_eq!(
            idx.slot_offsets.len() as u64 + idx.overflow_base_count(),
            idx.bases_indexed
        );
    }

    #[test]
    fn rejects_bad_key_width() {
        let corpus = Corpus::build(&[rec("a", b"ACGT")], 4, 1_000).unwrap();
        assert!(BucketIndex::build(&corpus, 3).is_err());
        assert!(BucketIndex::build(&corpus, 17).is_err());
    }
}

//! 桶索引文件（`KIDX`）的写入与读取。
//!
//! section 顺序固定：名字块、染色体大小、语料、每 slot 大小字节（4^W）、
//! 非溢出偏移数组、溢出 key、溢出大小、溢出偏移。头部之外不落任何派生量；
//! 染色体偏移由大小累加还原，slot 起点由大小字节前缀和还原。

use anyhow::{bail, Context, Result};
use log::{debug, info};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::{
    names_block, parse_names, Header, LoadMode, SectionCursor, Storage, U32Section, BUCKET_MAGIC,
    HEADER_SIZE, MAJOR_VERSION, MINOR_VERSION,
};
use crate::corpus::{Chrom, Corpus};
use crate::index::bucket::{BucketIndex, OVERFLOW_SENTINEL};
use crate::util::dna;

fn write_u32s(w: &mut impl Write, values: &[u32]) -> std::io::Result<()> {
    for &v in values {
        w.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

/// 写出完整的桶索引文件，返回最终文件大小。
/// 先写全零占位头，section 落盘后 seek 回起点补写真头。
pub fn write_bucket_file(path: &Path, corpus: &Corpus, idx: &BucketIndex) -> Result<u64> {
    let file = File::create(path)
        .with_context(|| format!("cannot create index file '{}'", path.display()))?;
    let mut w = BufWriter::new(file);

    w.write_all(&[0u8; HEADER_SIZE])?;

    let names = names_block(corpus.chroms.iter().map(|c| c.name.as_str()));
    w.write_all(&names)?;
    let sizes: Vec<u32> = corpus.chroms.iter().map(|c| c.size).collect();
    write_u32s(&mut w, &sizes)?;
    w.write_all(&corpus.dna)?;
    w.write_all(&idx.slot_sizes)?;
    write_u32s(&mut w, &idx.slot_offsets)?;
    write_u32s(&mut w, &idx.overflow_keys)?;
    write_u32s(&mut w, &idx.overflow_sizes)?;
    write_u32s(&mut w, &idx.overflow_offsets)?;

    let file_size = (HEADER_SIZE
        + names.len()
        + sizes.len() * 4
        + corpus.dna.len()
        + idx.slot_sizes.len()
        + (idx.slot_offsets.len() + idx.overflow_keys.len() + idx.overflow_sizes.len() + idx.overflow_offsets.len()) * 4)
        as u64;

    let header = Header {
        magic: BUCKET_MAGIC,
        major: MAJOR_VERSION,
        minor: MINOR_VERSION,
        file_size,
        key_width: idx.key_width,
        chrom_count: corpus.chroms.len() as u32,
        name_block_size: names.len() as u32,
        bases_indexed: idx.bases_indexed,
        dna_disk_size: corpus.dna.len() as u64,
        overflow_slot_count: idx.overflow_slot_count(),
        overflow_base_count: idx.overflow_base_count(),
    };

    w.flush()?;
    let mut file = w
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flush of '{}' failed: {}", path.display(), e))?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header.to_bytes())?;

    info!(
        "wrote '{}': {} bytes, {} chroms, {} positions, {} overflow slots",
        path.display(),
        file_size,
        header.chrom_count,
        header.bases_indexed,
        header.overflow_slot_count
    );
    Ok(file_size)
}

/// 一个桶的查询视图。
#[derive(Debug, Clone, Copy)]
pub struct Bucket<'a> {
    pub size: u32,
    pub offsets: U32Section<'a>,
    pub from_overflow: bool,
}

/// 载入后的桶索引文件。storage 即文件字节本身（映射或缓冲），
/// 各 section 只记字节区间；派生表在载入时重建。
#[derive(Debug)]
pub struct BucketFile {
    path: PathBuf,
    header: Header,
    storage: Storage,
    chroms: Vec<Chrom>,
    dna: Range<usize>,
    slot_sizes: Range<usize>,
    slot_offsets: Range<usize>,
    overflow_keys: Range<usize>,
    overflow_sizes: Range<usize>,
    overflow_offsets: Range<usize>,
    /// 非溢出 slot 在偏移数组里的起始下标（元素计），按大小字节前缀和派生。
    slot_starts: Vec<u64>,
    /// 各溢出 slot 在溢出偏移数组里的起始下标。
    overflow_starts: Vec<u64>,
}

impl BucketFile {
    pub fn open(path: &Path, mode: LoadMode) -> Result<Self> {
        let t0 = Instant::now();
        let (storage, header) = Storage::load(path, mode, BUCKET_MAGIC)?;
        let bytes = storage.bytes();

        if header.overflow_base_count > header.bases_indexed {
            bail!(
                "corrupt header in '{}': {} overflow bases exceed {} indexed",
                path.display(),
                header.overflow_base_count,
                header.bases_indexed
            );
        }
        let nslots = dna::slot_count(header.key_width);
        let main_bases = header.bases_indexed - header.overflow_base_count;

        let mut cur = SectionCursor::new(path, bytes.len());
        let names = cur.take(u64::from(header.name_block_size), "chrom names")?;
        let sizes = cur.take(u64::from(header.chrom_count) * 4, "chrom sizes")?;
        let dna_range = cur.take(header.dna_disk_size, "dna")?;
        let slot_sizes = cur.take(nslots, "slot sizes")?;
        let slot_offsets = cur.take(main_bases * 4, "slot offsets")?;
        let overflow_keys = cur.take(header.overflow_slot_count * 4, "overflow keys")?;
        let overflow_sizes = cur.take(header.overflow_slot_count * 4, "overflow sizes")?;
        let overflow_offsets = cur.take(header.overflow_base_count * 4, "overflow offsets")?;
        cur.finish(header.file_size)?;

        // 染色体表：名字 + 大小落盘，偏移由大小累加还原
        let names = parse_names(&bytes[names], header.chrom_count, path)?;
        let sizes_view = U32Section::new(&bytes[sizes]);
        let mut chroms = Vec::with_capacity(names.len());
        let mut at: u64 = 1;
        for (i, name) in names.into_iter().enumerate() {
            let size = sizes_view.get(i);
            chroms.push(Chrom {
                name,
                size,
                offset: at,
            });
            at += u64::from(size) + 1;
        }

        // slot 起点：非溢出大小字节的前缀和
        let size_bytes = &bytes[slot_sizes.clone()];
        let mut slot_starts = Vec::with_capacity(size_bytes.len());
        let mut acc: u64 = 0;
        for &s in size_bytes {
            slot_starts.push(acc);
            if s != OVERFLOW_SENTINEL {
                acc += u64::from(s);
            }
        }
        if acc != main_bases {
            bail!(
                "corrupt index '{}': slot sizes sum to {}, header implies {}",
                path.display(),
                acc,
                main_bases
            );
        }

        let overflow_sizes_view = U32Section::new(&bytes[overflow_sizes.clone()]);
        let mut overflow_starts = Vec::with_capacity(overflow_sizes_view.len());
        let mut acc: u64 = 0;
        for i in 0..overflow_sizes_view.len() {
            overflow_starts.push(acc);
            acc += u64::from(overflow_sizes_view.get(i));
        }
        if acc != header.overflow_base_count {
            bail!(
                "corrupt index '{}': overflow sizes sum to {}, header says {}",
                path.display(),
                acc,
                header.overflow_base_count
            );
        }

        debug!(
            "opened '{}' ({:?}) in {:.3}s",
            path.display(),
            mode,
            t0.elapsed().as_secs_f64()
        );

        Ok(Self {
            path: path.to_path_buf(),
            header,
            storage,
            chroms,
            dna: dna_range,
            slot_sizes,
            slot_offsets,
            overflow_keys,
            overflow_sizes,
            overflow_offsets,
            slot_starts,
            overflow_starts,
        })
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        self.storage.bytes()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn key_width(&self) -> u32 {
        self.header.key_width
    }

    pub fn chroms(&self) -> &[Chrom] {
        &self.chroms
    }

    pub fn dna(&self) -> &[u8] {
        &self.bytes()[self.dna.clone()]
    }

    pub fn slot_count(&self) -> u64 {
        dna::slot_count(self.header.key_width)
    }

    /// slot 的大小字节；255 表示溢出。
    #[inline]
    pub fn slot_size_byte(&self, key: u32) -> u8 {
        self.bytes()[self.slot_sizes.start + key as usize]
    }

    pub fn overflow_keys(&self) -> U32Section<'_> {
        U32Section::new(&self.bytes()[self.overflow_keys.clone()])
    }

    pub fn overflow_sizes(&self) -> U32Section<'_> {
        U32Section::new(&self.bytes()[self.overflow_sizes.clone()])
    }

    /// 第 i 个溢出 slot 的偏移列表。
    pub fn overflow_offsets_for(&self, i: usize) -> U32Section<'_> {
        let start = self.overflow_starts[i] as usize * 4;
        let len = self.overflow_sizes().get(i) as usize * 4;
        let base = self.overflow_offsets.start;
        U32Section::new(&self.bytes()[base + start..base + start + len])
    }

    /// 按 key 取桶。溢出 slot 走按 key 有序的溢出表二分；
    /// 标为溢出却查不到属于索引自身损坏，是硬错误而非未命中。
    pub fn bucket(&self, key: u32) -> Result<Bucket<'_>> {
        let size = self.slot_size_byte(key);
        if size != OVERFLOW_SENTINEL {
            let start = self.slot_starts[key as usize] as usize * 4;
            let len = usize::from(size) * 4;
            let base = self.slot_offsets.start;
            return Ok(Bucket {
                size: u32::from(size),
                offsets: U32Section::new(&self.bytes()[base + start..base + start + len]),
                from_overflow: false,
            });
        }

        let keys = self.overflow_keys();
        let mut lo = 0usize;
        let mut hi = keys.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if keys.get(mid) < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo >= keys.len() || keys.get(lo) != key {
            bail!(
                "index corrupt in '{}': slot {} marked overflow but absent from overflow table",
                self.path.display(),
                key
            );
        }
        Ok(Bucket {
            size: self.overflow_sizes().get(lo),
            offsets: self.overflow_offsets_for(lo),
            from_overflow: true,
        })
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

    fn build(seqs: &[(&str, &[u8])], w: u32) -> (Corpus, BucketIndex) {
        let records: Vec<FastaRecord> = seqs.iter().map(|(n, s)| rec(n, s)).collect();
        let corpus = Corpus::build(&records, w, 1_000_000).unwrap();
        let idx = BucketIndex::build(&corpus, w).unwrap();
        (corpus, idx)
    }

    fn round_trip(mode: LoadMode) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.kix");
        let mut big = vec![b'A'; 300];
        big.extend_from_slice(b"CCGGTTGACT");
        let (corpus, idx) = build(&[("chrA", b"ACGTACGTACGTNNAC"), ("chrB", &big)], 4);
        let written = write_bucket_file(&path, &corpus, &idx).unwrap();
        assert_eq!(written, std::fs::metadata(&path).unwrap().len());

        let f = BucketFile::open(&path, mode).unwrap();
        assert_eq!(f.key_width(), 4);
        assert_eq!(f.chroms(), &corpus.chroms[..]);
        assert_eq!(f.dna(), &corpus.dna[..]);
        assert_eq!(f.header().bases_indexed, idx.bases_indexed);

        // 逐 slot 对齐构建结果
        let mut total: u64 = 0;
        for key in 0..f.slot_count() as u32 {
            if f.slot_size_byte(key) == 0 {
                continue;
            }
            let b = f.bucket(key).unwrap();
            total += u64::from(b.size);
            assert_eq!(b.from_overflow, f.slot_size_byte(key) == OVERFLOW_SENTINEL);
            // 桶内升序
            let offs: Vec<u32> = b.offsets.iter().collect();
            assert!(offs.windows(2).all(|w| w[0] < w[1]));
        }
        assert_eq!(total, idx.bases_indexed);
    }

    #[test]
    fn round_trip_buffered() {
        round_trip(LoadMode::Buffered);
    }

    #[test]
    fn round_trip_mmap() {
        round_trip(LoadMode::Mmap);
    }

    #[test]
    fn overflow_bucket_resolves_via_side_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.kix");
        let (corpus, idx) = build(&[("a", &vec![b'A'; 300])], 4);
        write_bucket_file(&path, &corpus, &idx).unwrap();

        let f = BucketFile::open(&path, LoadMode::Buffered).unwrap();
        let key = dna::pack_key(b"AAAA", 4).unwrap();
        let b = f.bucket(key).unwrap();
        assert!(b.from_overflow);
        assert_eq!(b.size, 297);
        assert_eq!(b.offsets.get(0), 1);
        assert_eq!(b.offsets.get(296), 297);
    }

    #[test]
    fn rejects_declared_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.kix");
        let (corpus, idx) = build(&[("a", b"ACGTACGT")], 4);
        write_bucket_file(&path, &corpus, &idx).unwrap();

        // 篡改头里的 file_size
        let mut bytes = std::fs::read(&path).unwrap();
        let bogus = (bytes.len() as u64 + 8).to_le_bytes();
        bytes[8..16].copy_from_slice(&bogus);
        std::fs::write(&path, &bytes).unwrap();

        assert!(BucketFile::open(&path, LoadMode::Mmap).is_err());
        assert!(BucketFile::open(&path, LoadMode::Buffered).is_err());
    }

    #[test]
    fn rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.kix");
        let (corpus, idx) = build(&[("a", b"ACGTACGT")], 4);
        write_bucket_file(&path, &corpus, &idx).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();

        assert!(BucketFile::open(&path, LoadMode::Mmap).is_err());
        assert!(BucketFile::open(&path, LoadMode::Buffered).is_err());
    }

    #[test]
    fn rejects_corrupt_key_width() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.kix");
        let (corpus, idx) = build(&[("a", b"ACGTACGT")], 4);
        write_bucket_file(&path, &corpus, &idx).unwrap();

        // 把头里的 key_width 改成 40：读取方必须报头损坏，而非移位溢出
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[16..20].copy_from_slice(&40u32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        for mode in [LoadMode::Mmap, LoadMode::Buffered] {
            let err = BucketFile::open(&path, mode).unwrap_err();
            assert!(err.to_string().contains("key width"));
        }
    }

    #[test]
    fn rejects_newer_major_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.kix");
        let (corpus, idx) = build(&[("a", b"ACGTACGT")], 4);
        write_bucket_file(&path, &corpus, &idx).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[4..6].copy_from_slice(&(MAJOR_VERSION + 1).to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let err = BucketFile::open(&path, LoadMode::Buffered).unwrap_err();
        assert!(err.to_string().contains("format version"));
    }
}

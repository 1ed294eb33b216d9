//! 后缀数组文件（`KSFA`）的写入与读取。
//!
//! 与桶索引格式刻意分离：magic 不同，section 只有名字块、染色体大小、
//! 语料与后缀数组本体。头部的 overflow 两项恒为零。

use anyhow::{bail, Context, Result};
use log::{debug, info};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::{
    names_block, parse_names, Header, LoadMode, SectionCursor, Storage, U32Section, HEADER_SIZE,
    MAJOR_VERSION, MINOR_VERSION, SUFFIX_MAGIC,
};
use crate::corpus::{Chrom, Corpus};

/// 写出后缀数组文件，返回最终文件大小。占位头先行、真头殿后，
/// 与桶索引写入方同一套崩溃安全纪律。
pub fn write_suffix_file(
    path: &Path,
    corpus: &Corpus,
    suffix_array: &[u32],
    key_width: u32,
) -> Result<u64> {
    let file = File::create(path)
        .with_context(|| format!("cannot create index file '{}'", path.display()))?;
    let mut w = BufWriter::new(file);

    w.write_all(&[0u8; HEADER_SIZE])?;

    let names = names_block(corpus.chroms.iter().map(|c| c.name.as_str()));
    w.write_all(&names)?;
    for c in &corpus.chroms {
        w.write_all(&c.size.to_le_bytes())?;
    }
    w.write_all(&corpus.dna)?;
    for &p in suffix_array {
        w.write_all(&p.to_le_bytes())?;
    }

    let file_size = (HEADER_SIZE
        + names.len()
        + corpus.chroms.len() * 4
        + corpus.dna.len()
        + suffix_array.len() * 4) as u64;

    let header = Header {
        magic: SUFFIX_MAGIC,
        major: MAJOR_VERSION,
        minor: MINOR_VERSION,
        file_size,
        key_width,
        chrom_count: corpus.chroms.len() as u32,
        name_block_size: names.len() as u32,
        bases_indexed: suffix_array.len() as u64,
        dna_disk_size: corpus.dna.len() as u64,
        overflow_slot_count: 0,
        overflow_base_count: 0,
    };

    w.flush()?;
    let mut file = w
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flush of '{}' failed: {}", path.display(), e))?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header.to_bytes())?;

    info!(
        "wrote '{}': {} bytes, {} chroms, {} suffixes",
        path.display(),
        file_size,
        header.chrom_count,
        header.bases_indexed
    );
    Ok(file_size)
}

/// 载入后的后缀数组文件。
#[derive(Debug)]
pub struct SuffixFile {
    path: PathBuf,
    header: Header,
    storage: Storage,
    chroms: Vec<Chrom>,
    dna: Range<usize>,
    suffix_array: Range<usize>,
}

impl SuffixFile {
    pub fn open(path: &Path, mode: LoadMode) -> Result<Self> {
        let t0 = Instant::now();
        let (storage, header) = Storage::load(path, mode, SUFFIX_MAGIC)?;
        let bytes = storage.bytes();

        if header.overflow_slot_count != 0 || header.overflow_base_count != 0 {
            bail!(
                "corrupt header in '{}': suffix-array file with overflow counts",
                path.display()
            );
        }

        let mut cur = SectionCursor::new(path, bytes.len());
        let names = cur.take(u64::from(header.name_block_size), "chrom names")?;
        let sizes = cur.take(u64::from(header.chrom_count) * 4, "chrom sizes")?;
        let dna_range = cur.take(header.dna_disk_size, "dna")?;
        let sa_range = cur.take(header.bases_indexed * 4, "suffix array")?;
        cur.finish(header.file_size)?;

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
            suffix_array: sa_range,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key_width(&self) -> u32 {
        self.header.key_width
    }

    pub fn chroms(&self) -> &[Chrom] {
        &self.chroms
    }

    pub fn dna(&self) -> &[u8] {
        &self.storage.bytes()[self.dna.clone()]
    }

    pub fn suffix_array(&self) -> U32Section<'_> {
        U32Section::new(&self.storage.bytes()[self.suffix_array.clone()])
    }
}

//! 索引文件的文本化诊断输出。只读，不碰文件一个字节。
//!
//! 每个 section 单独选择输出路径与条目上限；slot 的 key 同时给出
//! 数值与碱基字母两种写法，溢出 slot 的大小显示为 `lots`。

use anyhow::{Context, Result};
use std::io::Write;

use crate::corpus::Chrom;
use crate::format::{BucketFile, SuffixFile};
use crate::index::bucket::OVERFLOW_SENTINEL;
use crate::util::dna;

/// 染色体表：名字、碱基数、语料内偏移。
pub fn render_chroms(chroms: &[Chrom], out: &mut dyn Write, max_count: usize) -> Result<()> {
    writeln!(out, "#name\tsize\toffset")?;
    for c in chroms.iter().take(max_count) {
        writeln!(out, "{}\t{}\t{}", c.name, c.size, c.offset)?;
    }
    Ok(())
}

fn write_offsets(out: &mut dyn Write, offsets: impl Iterator<Item = u32>, cap: usize) -> Result<()> {
    for (i, off) in offsets.take(cap).enumerate() {
        if i > 0 {
            write!(out, ",")?;
        }
        write!(out, "{}", off)?;
    }
    Ok(())
}

/// 主表：非空 slot 的 key（数值与字母）、大小与前几个偏移。
/// 溢出 slot 在这里只标 `lots`，内容见溢出表。
pub fn render_slots(file: &BucketFile, out: &mut dyn Write, max_count: usize) -> Result<()> {
    let w = file.key_width();
    writeln!(out, "#key\tbases\tsize\toffsets")?;
    let mut shown = 0usize;
    for key in 0..file.slot_count() as u32 {
        let size = file.slot_size_byte(key);
        if size == 0 {
            continue;
        }
        if shown >= max_count {
            break;
        }
        write!(out, "{}\t{}\t", key, dna::unpack_key(key, w))?;
        if size == OVERFLOW_SENTINEL {
            write!(out, "lots\t")?;
        } else {
            write!(out, "{}\t", size)?;
            let bucket = file.bucket(key)?;
            write_offsets(out, bucket.offsets.iter(), max_count)?;
        }
        writeln!(out)?;
        shown += 1;
    }
    Ok(())
}

/// 溢出表：key、真实大小与前几个偏移。
pub fn render_overflow(file: &BucketFile, out: &mut dyn Write, max_count: usize) -> Result<()> {
    let w = file.key_width();
    let keys = file.overflow_keys();
    let sizes = file.overflow_sizes();
    writeln!(out, "#key\tbases\tsize\toffsets")?;
    for i in 0..keys.len().min(max_count) {
        let key = keys.get(i);
        write!(out, "{}\t{}\t{}\t", key, dna::unpack_key(key, w), sizes.get(i))?;
        write_offsets(out, file.overflow_offsets_for(i).iter(), max_count)?;
        writeln!(out)?;
    }
    Ok(())
}

/// 后缀数组文件：前几个后缀的偏移与起始碱基。
pub fn render_suffixes(file: &SuffixFile, out: &mut dyn Write, max_count: usize) -> Result<()> {
    let dna_buf = file.dna();
    let w = file.key_width() as usize;
    writeln!(out, "#rank\toffset\tsuffix")?;
    let sa = file.suffix_array();
    for i in 0..sa.len().min(max_count) {
        let p = sa.get(i) as usize;
        let end = (p + w.max(16)).min(dna_buf.len());
        let prefix: String = dna_buf[p..end]
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| char::from(b))
            .collect();
        writeln!(out, "{}\t{}\t{}", i, p, prefix)?;
    }
    Ok(())
}

/// 打开输出文件的小工具，错误带路径。
pub fn create_out(path: &std::path::Path) -> Result<Box<dyn Write>> {
    let f = std::fs::File::create(path)
        .with_context(|| format!("cannot create output file '{}'", path.display()))?;
    Ok(Box::new(std::io::BufWriter::new(f)))
}

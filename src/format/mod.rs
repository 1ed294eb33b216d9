//! 索引文件的二进制布局公共件：定长 64 字节头、两种载入方式、
//! 小端标量读取与 u32 section 视图。
//!
//! 两种文件格式（桶索引 `KIDX`、后缀数组 `KSFA`）共用同一头布局但 magic
//! 不同，互不兼容；读取方校验 magic 并拒绝比自身新的 major 版本。
//! 写入方先落一个全零的占位头，所有 section 写完后 seek 回去补写真头——
//! 中途崩溃留下的文件不可能被读取方误认为有效。

use anyhow::{anyhow, bail, Context, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

use crate::util::dna;

pub mod bucket_file;
pub mod suffix_file;

pub use bucket_file::BucketFile;
pub use suffix_file::SuffixFile;

/// 桶索引文件 magic："KIDX"。
pub const BUCKET_MAGIC: [u8; 4] = *b"KIDX";
/// 后缀数组文件 magic："KSFA"。
pub const SUFFIX_MAGIC: [u8; 4] = *b"KSFA";

pub const MAJOR_VERSION: u16 = 1;
pub const MINOR_VERSION: u16 = 0;

/// 定长文件头字节数。
pub const HEADER_SIZE: usize = 64;

/// 载入方式：mmap 零拷贝，或一次性读入单块缓冲。后续解析逻辑完全相同。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    Mmap,
    Buffered,
}

/// 定长小端文件头。后缀数组格式不用 overflow 两项，写零。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 4],
    pub major: u16,
    pub minor: u16,
    pub file_size: u64,
    pub key_width: u32,
    pub chrom_count: u32,
    /// 染色体名字块字节数，已补齐到 4。
    pub name_block_size: u32,
    pub bases_indexed: u64,
    /// 语料落盘字节数，已补齐到 4。
    pub dna_disk_size: u64,
    pub overflow_slot_count: u64,
    pub overflow_base_count: u64,
}

impl Header {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.magic);
        out[4..6].copy_from_slice(&self.major.to_le_bytes());
        out[6..8].copy_from_slice(&self.minor.to_le_bytes());
        out[8..16].copy_from_slice(&self.file_size.to_le_bytes());
        out[16..20].copy_from_slice(&self.key_width.to_le_bytes());
        out[20..24].copy_from_slice(&self.chrom_count.to_le_bytes());
        out[24..28].copy_from_slice(&self.name_block_size.to_le_bytes());
        // 28..32 保留
        out[32..40].copy_from_slice(&self.bases_indexed.to_le_bytes());
        out[40..48].copy_from_slice(&self.dna_disk_size.to_le_bytes());
        out[48..56].copy_from_slice(&self.overflow_slot_count.to_le_bytes());
        out[56..64].copy_from_slice(&self.overflow_base_count.to_le_bytes());
        out
    }

    /// 解析并校验文件头。magic 不符、major 超出支持范围都是硬错误。
    pub fn parse(bytes: &[u8], path: &Path, expect_magic: [u8; 4]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            bail!(
                "truncated header in '{}': {} bytes, need {}",
                path.display(),
                bytes.len(),
                HEADER_SIZE
            );
        }
        let magic: [u8; 4] = bytes[0..4].try_into().unwrap();
        if magic != expect_magic {
            bail!(
                "bad magic in '{}': not a {} index file",
                path.display(),
                String::from_utf8_lossy(&expect_magic)
            );
        }
        let major = read_u16(bytes, 4);
        let minor = read_u16(bytes, 6);
        if major > MAJOR_VERSION {
            bail!(
                "'{}' is format version {}.{} but this build supports up to {}.{}",
                path.display(),
                major,
                minor,
                MAJOR_VERSION,
                MINOR_VERSION
            );
        }
        // key_width 决定 4^W 的 slot 数，读取方所有段长计算都依赖它
        let key_width = read_u32(bytes, 16);
        if !(4..=dna::MAX_KEY_WIDTH).contains(&key_width) {
            bail!(
                "corrupt header in '{}': key width {} outside 4..=16",
                path.display(),
                key_width
            );
        }
        Ok(Self {
            magic,
            major,
            minor,
            file_size: read_u64(bytes, 8),
            key_width,
            chrom_count: read_u32(bytes, 20),
            name_block_size: read_u32(bytes, 24),
            bases_indexed: read_u64(bytes, 32),
            dna_disk_size: read_u64(bytes, 40),
            overflow_slot_count: read_u64(bytes, 48),
            overflow_base_count: read_u64(bytes, 56),
        })
    }
}

/// 文件内容的持有者。mmap 模式下映射本身就是内存表示，
/// 标量按需用 from_le_bytes 解码，不做整体拷贝。
#[derive(Debug)]
pub enum Storage {
    Mapped(memmap2::Mmap),
    Buffered(Vec<u8>),
}

impl Storage {
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        match self {
            Storage::Mapped(m) => m,
            Storage::Buffered(v) => v,
        }
    }

    /// 按选定方式载入整个文件。缓冲模式先读头取出声明的总长，
    /// 再回到起点一次读满；读不满即截断错误。
    pub fn load(path: &Path, mode: LoadMode, expect_magic: [u8; 4]) -> Result<(Self, Header)> {
        let mut file = File::open(path)
            .with_context(|| format!("cannot open index file '{}'", path.display()))?;
        match mode {
            LoadMode::Mmap => {
                let map = map_readonly(&file)
                    .with_context(|| format!("cannot mmap '{}'", path.display()))?;
                let header = Header::parse(&map, path, expect_magic)?;
                if header.file_size != map.len() as u64 {
                    bail!(
                        "size mismatch in '{}': header says {} bytes, file has {}",
                        path.display(),
                        header.file_size,
                        map.len()
                    );
                }
                Ok((Storage::Mapped(map), header))
            }
            LoadMode::Buffered => {
                let mut head = [0u8; HEADER_SIZE];
                file.read_exact(&mut head)
                    .map_err(|e| anyhow!("truncated header in '{}': {}", path.display(), e))?;
                let header = Header::parse(&head, path, expect_magic)?;
                let mut buf = vec![0u8; header.file_size as usize];
                file.seek(SeekFrom::Start(0))?;
                file.read_exact(&mut buf).map_err(|e| {
                    anyhow!(
                        "short read of '{}': expected {} bytes: {}",
                        path.display(),
                        header.file_size,
                        e
                    )
                })?;
                Ok((Storage::Buffered(buf), header))
            }
        }
    }
}

/// 只读文件头，不载入任何 section（dump 的快速路径、find 的格式嗅探）。
/// magic 两种格式都认，其他一律拒绝。
pub fn read_header_any(path: &Path) -> Result<Header> {
    let mut file = File::open(path)
        .with_context(|| format!("cannot open index file '{}'", path.display()))?;
    let mut head = [0u8; HEADER_SIZE];
    file.read_exact(&mut head)
        .map_err(|e| anyhow!("truncated header in '{}': {}", path.display(), e))?;
    let magic: [u8; 4] = head[0..4].try_into().unwrap();
    if magic != BUCKET_MAGIC && magic != SUFFIX_MAGIC {
        bail!("bad magic in '{}': not a kindex file", path.display());
    }
    Header::parse(&head, path, magic)
}

// Mmap::map 的签名是 unsafe（映射期间文件被外部改写属未定义行为）。
// 索引文件建成后只读，多个进程共享同一份映射是这里的预期用法。
#[allow(unsafe_code)]
fn map_readonly(file: &File) -> std::io::Result<memmap2::Mmap> {
    unsafe { memmap2::Mmap::map(file) }
}

#[inline]
pub(crate) fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes(bytes[at..at + 2].try_into().unwrap())
}

#[inline]
pub(crate) fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}

#[inline]
pub(crate) fn read_u64(bytes: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap())
}

/// 顺序消费各 section 的游标。每次取段都查界，段不够长立即报结构错误；
/// 解析完所有段后必须 `finish`，核对消费的总量等于头里声明的 file_size。
pub(crate) struct SectionCursor<'a> {
    path: &'a Path,
    total: usize,
    at: usize,
}

impl<'a> SectionCursor<'a> {
    pub fn new(path: &'a Path, total: usize) -> Self {
        Self {
            path,
            total,
            at: HEADER_SIZE,
        }
    }

    pub fn take(&mut self, len: u64, what: &str) -> Result<Range<usize>> {
        let len = len as usize;
        let end = self.at.checked_add(len).ok_or_else(|| {
            anyhow!("section '{}' overflows address space in '{}'", what, self.path.display())
        })?;
        if end > self.total {
            bail!(
                "'{}' is truncated: section '{}' needs bytes {}..{} but file has {}",
                self.path.display(),
                what,
                self.at,
                end,
                self.total
            );
        }
        let range = self.at..end;
        self.at = end;
        Ok(range)
    }

    /// 结构自洽校验：游标终点必须恰好是头部声明的总长。
    pub fn finish(self, declared: u64) -> Result<()> {
        if self.at as u64 != declared {
            bail!(
                "structural size mismatch in '{}': sections end at {}, header says {}",
                self.path.display(),
                self.at,
                declared
            );
        }
        Ok(())
    }
}

/// 只读 u32 数组视图：落盘的小端数组不拷贝，按下标现场解码。
#[derive(Debug, Clone, Copy)]
pub struct U32Section<'a> {
    bytes: &'a [u8],
}

impl<'a> U32Section<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        debug_assert_eq!(bytes.len() % 4, 0);
        Self { bytes }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len() / 4
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn get(&self, i: usize) -> u32 {
        read_u32(self.bytes, i * 4)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + 'a {
        let bytes = self.bytes;
        (0..bytes.len() / 4).map(move |i| read_u32(bytes, i * 4))
    }
}

/// 名字块：每个名字以 0 结尾，整块补齐到 4 字节。
pub(crate) fn names_block(names: impl Iterator<Item = impl AsRef<str>>) -> Vec<u8> {
    let mut block = Vec::new();
    for name in names {
        block.extend_from_slice(name.as_ref().as_bytes());
        block.push(0);
    }
    while block.len() % 4 != 0 {
        block.push(0);
    }
    block
}

/// 从名字块解析 `count` 个以 0 结尾的名字。
pub(crate) fn parse_names(block: &[u8], count: u32, path: &Path) -> Result<Vec<String>> {
    let mut names = Vec::with_capacity(count as usize);
    let mut at = 0usize;
    for i in 0..count {
        let end = block[at..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| at + p)
            .ok_or_else(|| {
                anyhow!(
                    "name block of '{}' ends inside name {} of {}",
                    path.display(),
                    i + 1,
                    count
                )
            })?;
        names.push(String::from_utf8_lossy(&block[at..end]).into_owned());
        at = end + 1;
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn header() -> Header {
        Header {
            magic: BUCKET_MAGIC,
            major: MAJOR_VERSION,
            minor: MINOR_VERSION,
            file_size: 1234,
            key_width: 8,
            chrom_count: 2,
            name_block_size: 12,
            bases_indexed: 77,
            dna_disk_size: 40,
            overflow_slot_count: 1,
            overflow_base_count: 300,
        }
    }

    #[test]
    fn header_round_trip() {
        let h = header();
        let bytes = h.to_bytes();
        let parsed = Header::parse(&bytes, &PathBuf::from("x.kix"), BUCKET_MAGIC).unwrap();
        assert_eq!(parsed, h);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut bytes = header().to_bytes();
        bytes[0] = b'Z';
        let err = Header::parse(&bytes, &PathBuf::from("x.kix"), BUCKET_MAGIC).unwrap_err();
        assert!(err.to_string().contains("bad magic"));
    }

    #[test]
    fn header_rejects_wrong_format_magic() {
        // 后缀数组文件喂给桶索引读取方
        let mut h = header();
        h.magic = SUFFIX_MAGIC;
        let err = Header::parse(&h.to_bytes(), &PathBuf::from("x.ksa"), BUCKET_MAGIC).unwrap_err();
        assert!(err.to_string().contains("bad magic"));
    }

    #[test]
    fn header_rejects_newer_major() {
        let mut h = header();
        h.major = MAJOR_VERSION + 1;
        let err = Header::parse(&h.to_bytes(), &PathBuf::from("x.kix"), BUCKET_MAGIC).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains(&format!("{}.{}", MAJOR_VERSION + 1, MINOR_VERSION)));
        assert!(msg.contains(&format!("{}.{}", MAJOR_VERSION, MINOR_VERSION)));
    }

    #[test]
    fn header_rejects_bad_key_width() {
        // key_width ≥ 32 会让 4^W 的移位溢出，必须在解析头时就拒绝
        for bad in [0u32, 3, 17, 40] {
            let mut h = header();
            h.key_width = bad;
            let err = Header::parse(&h.to_bytes(), &PathBuf::from("x.kix"), BUCKET_MAGIC).unwrap_err();
            assert!(err.to_string().contains("key width"), "width {}", bad);
        }
    }

    #[test]
    fn header_rejects_truncation() {
        let bytes = header().to_bytes();
        let err = Header::parse(&bytes[..32], &PathBuf::from("x.kix"), BUCKET_MAGIC).unwrap_err();
        assert!(err.to_string().contains("truncated header"));
    }

    #[test]
    fn zeroed_placeholder_header_is_invalid() {
        // 写入方崩溃在补写真头之前留下的就是这种文件
        let bytes = [0u8; HEADER_SIZE];
        assert!(Header::parse(&bytes, &PathBuf::from("x.kix"), BUCKET_MAGIC).is_err());
    }

    #[test]
    fn cursor_checks_bounds_and_total() {
        let path = PathBuf::from("x.kix");
        let mut c = SectionCursor::new(&path, 80);
        assert_eq!(c.take(8, "a").unwrap(), 64..72);
        assert!(c.take(100, "b").is_err());
    }

    #[test]
    fn cursor_finish_requires_exact_total() {
        let path = PathBuf::from("x.kix");
        let mut c = SectionCursor::new(&path, 80);
        c.take(16, "a").unwrap();
        let err = c.finish(100).unwrap_err();
        assert!(err.to_string().contains("structural size mismatch"));
    }

    #[test]
    fn names_block_round_trip() {
        let block = names_block(["chrA", "chrB2"].iter());
        assert_eq!(block.len() % 4, 0);
        let names = parse_names(&block, 2, &PathBuf::from("x")).unwrap();
        assert_eq!(names, vec!["chrA", "chrB2"]);
    }

    #[test]
    fn u32_section_decodes_little_endian() {
        let mut bytes = Vec::new();
        for v in [7u32, 0, u32::MAX] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let s = U32Section::new(&bytes);
        assert_eq!(s.len(), 3);
        assert_eq!(s.get(0), 7);
        assert_eq!(s.get(2), u32::MAX);
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![7, 0, u32::MAX]);
    }
}

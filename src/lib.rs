//! # kindex-rust
//!
//! 受 UCSC kent 工具集 `sufa`/`i16` 启发的 Rust 版短读段索引。
//!
//! 本 crate 把多条 DNA 序列拼成一个带哨兵分隔的连续语料，在其上提供两种
//! 互不兼容的磁盘索引：
//!
//! - **桶索引**（`KIDX`）：每个 W-mer（默认 W=16）2-bit 打包成 key 直取桶，
//!   桶大小达到 255 的进独立溢出表；只支持精确查找，O(1) 定位。
//! - **后缀数组**（`KSFA`）：可索引位置按后缀字典序排序，支持任意前缀
//!   二分收窄，从而支持带替换预算的分支限界容错查找。
//!
//! 两种文件都是定长 64 字节头 + 顺序 section 的小端布局，支持 mmap
//! 零拷贝与整块缓冲两种载入方式，载入后强制核对结构总长。
//!
//! ## 快速示例
//!
//! ```rust,no_run
//! # fn main() -> anyhow::Result<()> {
//! use kindex::corpus::Corpus;
//! use kindex::format::{bucket_file, BucketFile, LoadMode};
//! use kindex::index::bucket::BucketIndex;
//! use kindex::io::fasta::FastaRecord;
//! use kindex::search::exact::{find_exact, ExactOptions};
//!
//! let records = vec![FastaRecord {
//!     id: "chr1".to_string(),
//!     desc: None,
//!     seq: b"ACGTACGTACGTACGTACGT".to_vec(),
//! }];
//! let corpus = Corpus::build(&records, 16, 1 << 32)?;
//! let index = BucketIndex::build(&corpus, 16)?;
//! bucket_file::write_bucket_file("ref.kix".as_ref(), &corpus, &index)?;
//!
//! let file = BucketFile::open("ref.kix".as_ref(), LoadMode::Mmap)?;
//! let hits = find_exact(&file, b"ACGTACGTACGTACGT", &ExactOptions::default())?;
//! println!("{} hits", hits.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## 模块说明
//!
//! - [`io`] — FASTA 解析
//! - [`util`] — 2-bit 碱基编码与 key 打包
//! - [`corpus`] — 语料拼接与染色体表
//! - [`index`] — 桶索引与后缀数组构建
//! - [`format`] — 两种索引文件的读写（mmap / 缓冲）
//! - [`search`] — 精确与容错查找
//! - [`dump`] — 诊断输出

pub mod corpus;
pub mod dump;
pub mod format;
pub mod index;
pub mod io;
pub mod search;
pub mod util;

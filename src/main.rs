use anyhow::{bail, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use kindex::corpus::{self, Corpus};
use kindex::dump;
use kindex::format::{
    read_header_any, BucketFile, LoadMode, SuffixFile, BUCKET_MAGIC, SUFFIX_MAGIC,
};
use kindex::index::bucket::BucketIndex;
use kindex::index::suffix::build_suffix_array;
use kindex::io::fasta;
use kindex::search::exact::{find_exact, ExactOptions};
use kindex::search::oneoff::find_with_mismatches;
use kindex::search::{count_mismatches, normalize_query};

#[derive(Parser, Debug)]
#[command(
    name = "kindex",
    author,
    version,
    about = "K-mer bucket / suffix-array short-read index over DNA",
    arg_required_else_help = true
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build an index file from one or more FASTA inputs
    Build {
        /// Input FASTA files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output index path
        #[arg(short, long)]
        output: PathBuf,
        /// Key width in bases (4..=16)
        #[arg(long, default_value_t = 16)]
        key_width: u32,
        /// Upper bound on total input bases
        #[arg(long, default_value_t = 4_000_000_000)]
        max_bases: u64,
        /// Build a suffix-array index (supports mismatch search) instead of the bucket index
        #[arg(long)]
        suffix_array: bool,
    },
    /// Search an index with FASTA queries
    Find {
        /// Index file (.kix bucket or .ksa suffix array, detected by magic)
        index: PathBuf,
        /// Query FASTA file
        query: PathBuf,
        /// Output path (stdout if omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Memory-map the index instead of reading it into a buffer
        #[arg(long)]
        mmap: bool,
        /// Maximum substitutions per hit (suffix-array index only)
        #[arg(long, default_value_t = 0)]
        max_subs: u32,
        /// Cap on reported hits per query
        #[arg(long)]
        max_hits: Option<usize>,
        /// Do not search overflow buckets (treat highly repeated k-mers as unsearchable)
        #[arg(long)]
        skip_overflow: bool,
    },
    /// Render index sections to text for inspection
    Dump {
        /// Index file
        index: PathBuf,
        /// Write the chromosome table here
        #[arg(long)]
        chroms: Option<PathBuf>,
        /// Write the main slot table here (suffix-array files: the suffix list)
        #[arg(long)]
        slots: Option<PathBuf>,
        /// Write the overflow table here
        #[arg(long)]
        overflow: Option<PathBuf>,
        /// Cap on rendered entries per section
        #[arg(long, default_value_t = 10)]
        max_count: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Build {
            inputs,
            output,
            key_width,
            max_bases,
            suffix_array,
        } => run_build(&inputs, &output, key_width, max_bases, suffix_array),
        Commands::Find {
            index,
            query,
            out,
            mmap,
            max_subs,
            max_hits,
            skip_overflow,
        } => run_find(&index, &query, out.as_deref(), mmap, max_subs, max_hits, skip_overflow),
        Commands::Dump {
            index,
            chroms,
            slots,
            overflow,
            max_count,
        } => run_dump(&index, chroms.as_deref(), slots.as_deref(), overflow.as_deref(), max_count),
    }
}

fn run_build(
    inputs: &[PathBuf],
    output: &Path,
    key_width: u32,
    max_bases: u64,
    suffix_array: bool,
) -> Result<()> {
    let t0 = Instant::now();
    let mut records = Vec::new();
    for path in inputs {
        records.extend(fasta::read_fasta(path)?);
    }

    let corpus = Corpus::build(&records, key_width, max_bases)?;
    println!("sequences: {}", corpus.chroms.len());
    println!("total bases: {}", corpus.bases_total());

    let (file_size, positions) = if suffix_array {
        let sa = build_suffix_array(&corpus.dna, key_width)?;
        let n = sa.len() as u64;
        let size =
            kindex::format::suffix_file::write_suffix_file(output, &corpus, &sa, key_width)?;
        (size, n)
    } else {
        let idx = BucketIndex::build(&corpus, key_width)?;
        let n = idx.bases_indexed;
        let size = kindex::format::bucket_file::write_bucket_file(output, &corpus, &idx)?;
        (size, n)
    };

    println!("positions indexed: {}", positions);
    println!(
        "index saved: {} ({} bytes) in {:.2}s at {}",
        output.display(),
        file_size,
        t0.elapsed().as_secs_f64(),
        chrono::Utc::now().to_rfc3339()
    );
    Ok(())
}

enum AnyIndex {
    Bucket(BucketFile),
    Suffix(SuffixFile),
}

fn run_find(
    index_path: &Path,
    query_path: &Path,
    out_path: Option<&Path>,
    mmap: bool,
    max_subs: u32,
    max_hits: Option<usize>,
    skip_overflow: bool,
) -> Result<()> {
    let mode = if mmap { LoadMode::Mmap } else { LoadMode::Buffered };
    let header = read_header_any(index_path)?;
    let index = match header.magic {
        BUCKET_MAGIC => {
            if max_subs > 0 {
                bail!(
                    "'{}' is a bucket index; mismatch search needs an index built with --suffix-array",
                    index_path.display()
                );
            }
            AnyIndex::Bucket(BucketFile::open(index_path, mode)?)
        }
        SUFFIX_MAGIC => AnyIndex::Suffix(SuffixFile::open(index_path, mode)?),
        magic => bail!(
            "'{}' has unrecognized magic {:?}",
            index_path.display(),
            magic
        ),
    };

    let records = fasta::read_fasta(query_path)?;
    let mut out: Box<dyn Write> = match out_path {
        Some(p) => dump::create_out(p)?,
        None => Box::new(std::io::BufWriter::new(std::io::stdout())),
    };

    let exact_opt = ExactOptions {
        max_hits,
        skip_overflow,
    };
    for rec in &records {
        let query = normalize_query(&rec.seq);
        let hits = match &index {
            AnyIndex::Bucket(f) => find_exact(f, &query, &exact_opt)?,
            AnyIndex::Suffix(f) => {
                let mut hits = find_with_mismatches(f, &query, max_subs)?;
                if let Some(cap) = max_hits {
                    hits.truncate(cap);
                }
                hits
            }
        };

        let (chroms, dna) = match &index {
            AnyIndex::Bucket(f) => (f.chroms(), f.dna()),
            AnyIndex::Suffix(f) => (f.chroms(), f.dna()),
        };
        if hits.is_empty() {
            writeln!(out, ">{} no hits", rec.id)?;
            continue;
        }
        writeln!(out, ">{} {} hits", rec.id, hits.len())?;
        for &off in &hits {
            let place = match corpus::find_chrom(chroms, u64::from(off)) {
                Some((ci, pos)) => format!("{}:{}", chroms[ci].name, pos + 1),
                None => "?".to_string(),
            };
            let target = &dna[off as usize..off as usize + query.len()];
            writeln!(
                out,
                "{}\toffset {}\tmismatches {}",
                place,
                off,
                count_mismatches(&query, target)
            )?;
            writeln!(out, "  query  {}", String::from_utf8_lossy(&query))?;
            writeln!(out, "  target {}", String::from_utf8_lossy(target))?;
        }
    }
    Ok(())
}

fn run_dump(
    index_path: &Path,
    chroms: Option<&Path>,
    slots: Option<&Path>,
    overflow: Option<&Path>,
    max_count: usize,
) -> Result<()> {
    let header = read_header_any(index_path)?;
    let kind = if header.magic == BUCKET_MAGIC { "bucket" } else { "suffix array" };
    println!("file: {}", index_path.display());
    println!("format: {} v{}.{}", kind, header.major, header.minor);
    println!("file size: {}", header.file_size);
    println!("key width: {}", header.key_width);
    println!("sequences: {}", header.chrom_count);
    println!("bases indexed: {}", header.bases_indexed);
    println!("dna bytes: {}", header.dna_disk_size);
    if header.magic == BUCKET_MAGIC {
        println!("overflow slots: {}", header.overflow_slot_count);
        println!("overflow bases: {}", header.overflow_base_count);
    }

    if chroms.is_none() && slots.is_none() && overflow.is_none() {
        return Ok(()); // 只看头，不载入 section
    }

    if header.magic == BUCKET_MAGIC {
        let file = BucketFile::open(index_path, LoadMode::Mmap)?;
        if let Some(p) = chroms {
            dump::render_chroms(file.chroms(), &mut *dump::create_out(p)?, max_count)?;
        }
        if let Some(p) = slots {
            dump::render_slots(&file, &mut *dump::create_out(p)?, max_count)?;
        }
        if let Some(p) = overflow {
            dump::render_overflow(&file, &mut *dump::create_out(p)?, max_count)?;
        }
    } else {
        let file = SuffixFile::open(index_path, LoadMode::Mmap)?;
        if let Some(p) = chroms {
            dump::render_chroms(file.chroms(), &mut *dump::create_out(p)?, max_count)?;
        }
        if let Some(p) = slots {
            dump::render_suffixes(&file, &mut *dump::create_out(p)?, max_count)?;
        }
        if overflow.is_some() {
            bail!("suffix-array index '{}' has no overflow table", index_path.display());
        }
    }
    Ok(())
}

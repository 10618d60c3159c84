use clap::{Parser, Subcommand, ValueEnum};
use archiveprobe::dispatch::{FormatDispatcher, Selector};
use archiveprobe::field::EntryEncoding;
use archiveprobe::handle::OpenOptions;
use archiveprobe::io_stream::MarkReader;
use archiveprobe::signature::{signatures_for, ArchiveFormat, SignatureRule};
use archiveprobe::tar::LongNameMode;
use archiveprobe::tar::header::TarHeader;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

#[derive(Parser)]
#[command(name = "aprobe", about = "Archive format detection and tar header inspection")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the format of an archive, detected from its signature
    Detect {
        input: PathBuf,
    },
    /// List tar entries
    List {
        input: PathBuf,
        /// Skip detection and open as this format
        #[arg(short, long)]
        format: Option<String>,
        /// Entry-name encoding (default ISO-8859-1)
        #[arg(short, long)]
        encoding: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show known formats, their signatures and streaming capabilities
    Formats {
        #[arg(long)]
        json: bool,
    },
    /// Pack files into a tar archive
    Pack {
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long)]
        encoding: Option<String>,
        /// How to store names longer than 100 bytes
        #[arg(long, value_enum, default_value = "error")]
        long_names: LongNames,
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LongNames {
    Error,
    Truncate,
    Gnu,
}

impl From<LongNames> for LongNameMode {
    fn from(v: LongNames) -> Self {
        match v {
            LongNames::Error    => LongNameMode::Error,
            LongNames::Truncate => LongNameMode::Truncate,
            LongNames::Gnu      => LongNameMode::Gnu,
        }
    }
}

#[derive(Serialize)]
struct FormatInfo {
    format:          ArchiveFormat,
    stream_read:     bool,
    stream_write:    bool,
    signatures:      Vec<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {

        // ── Detect ───────────────────────────────────────────────────────────
        Commands::Detect { input } => {
            let mut stream = open_marked(&input)?;
            let format = archiveprobe::dispatch::detect(&mut stream)?;
            println!("{}", format);
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input, format, encoding, json } => {
            let dispatcher = match encoding {
                Some(name) => FormatDispatcher::with_entry_encoding(parse_encoding(&name)?),
                None       => FormatDispatcher::new(),
            };
            let selector = format.map(Selector::ByName).unwrap_or(Selector::AutoDetect);
            let mut reader = dispatcher.open_reader(selector, open_marked(&input)?)?;
            let format = reader.format();
            let Some(tar) = reader.as_tar_mut() else {
                return Err(format!("{}: listing {} entries needs an external reader", input.display(), format).into());
            };

            let mut entries = Vec::new();
            while let Some(entry) = tar.next_entry()? {
                entries.push(entry);
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                println!("Archive: {} ({})", input.display(), format);
                println!("{:<10} {:>12}  {:<19}  Name", "Mode", "Size", "Modified");
                for e in &entries {
                    println!("{:<10} {:>12}  {:<19}  {}", format!("{:06o}", e.mode), e.size, render_mtime(e.mtime), e.name);
                }
            }
        }

        // ── Formats ──────────────────────────────────────────────────────────
        Commands::Formats { json } => {
            let infos: Vec<FormatInfo> = ArchiveFormat::ALL
                .into_iter()
                .map(|format| FormatInfo {
                    format,
                    stream_read:  format.can_stream_read(),
                    stream_write: format.has_writer() && format.can_stream_write(),
                    signatures:   signatures_for(format).map(|s| render_rule(&s.rule)).collect(),
                })
                .collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&infos)?);
            } else {
                println!("{:<6} {:>5} {:>6}  Signatures", "Format", "Read", "Write");
                for info in &infos {
                    println!("{:<6} {:>5} {:>6}  {}",
                        info.format.name(), yes_no(info.stream_read), yes_no(info.stream_write),
                        info.signatures.join(", "));
                }
            }
        }

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { output, encoding, long_names, input } => {
            let mut opts = OpenOptions { long_names: long_names.into(), ..Default::default() };
            if let Some(name) = encoding {
                opts.entry_encoding = parse_encoding(&name)?;
            }
            let dispatcher = FormatDispatcher::new().with_options(opts);
            let mut writer = dispatcher.open_writer("tar", BufWriter::new(File::create(&output)?))?;
            let tar = writer.as_tar_mut().ok_or("tar writer expected")?;
            for path in &input {
                let header = header_for(path)?;
                tar.append(&header, BufReader::new(File::open(path)?))?;
                println!("  packed  {}", path.display());
            }
            writer.finish()?;
            println!("Created: {}", output.display());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn open_marked(path: &Path) -> Result<MarkReader<BufReader<File>>, Box<dyn std::error::Error>> {
    Ok(MarkReader::new(BufReader::new(File::open(path)?)))
}

fn parse_encoding(name: &str) -> Result<EntryEncoding, Box<dyn std::error::Error>> {
    EntryEncoding::from_name(name).ok_or_else(|| format!("Unknown encoding '{}'", name).into())
}

fn header_for(path: &Path) -> Result<TarHeader, Box<dyn std::error::Error>> {
    let meta = std::fs::metadata(path)?;
    let name = path
        .file_name()
        .ok_or_else(|| format!("{}: not a file path", path.display()))?
        .to_string_lossy();
    let mut header = TarHeader::new(name, meta.len());
    header.mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs());
    Ok(header)
}

fn render_mtime(mtime: u64) -> String {
    i64::try_from(mtime)
        .ok()
        .and_then(|secs| chrono::DateTime::<chrono::Utc>::from_timestamp(secs, 0))
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| mtime.to_string())
}

fn render_rule(rule: &SignatureRule) -> String {
    match rule {
        SignatureRule::Magic { offset, bytes } => format!("{}@{}", hex::encode(bytes), offset),
        SignatureRule::TarChecksum             => "header-checksum".into(),
    }
}

fn yes_no(b: bool) -> &'static str {
    if b { "yes" } else { "no" }
}

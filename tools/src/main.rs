use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use glob::Pattern;
use nextroute_tools::{
    decode_session_data, generate_keys, inspect_packet, inspect_relay_message, public_key,
    InspectReport, KeyKind,
};

#[derive(Parser)]
#[command(
    name = "nextroute-tools",
    version,
    about = "nextroute packet inspection and key tools"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode captured SDK packets into JSON.
    Inspect {
        /// Path to the packet bytes, or a directory of captures.
        packet_path: PathBuf,
        /// Optional glob filter when inspecting a directory.
        #[arg(long)]
        glob: Option<String>,
        /// Sort inspected packets.
        #[arg(long, value_enum)]
        sort: Option<InspectSort>,
        /// Limit the number of inspected packets (after sorting).
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Decode a relay update request or response.
    Relay {
        packet_file: PathBuf,
        /// Decode as a backend response instead of a relay request.
        #[arg(long)]
        response: bool,
    },
    /// Decode a hex-encoded session data blob.
    SessionData {
        /// Hex string, or `@path` to read it from a file.
        hex: String,
    },
    /// Generate a key pair, or print the public half of an existing secret.
    Keygen {
        #[arg(long, value_enum, default_value_t = KeyArg::Ed25519)]
        kind: KeyArg,
        /// Hex-encoded secret to derive the public key from.
        #[arg(long)]
        secret: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum InspectSort {
    Size,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KeyArg {
    Ed25519,
    X25519,
}

impl From<KeyArg> for KeyKind {
    fn from(arg: KeyArg) -> Self {
        match arg {
            KeyArg::Ed25519 => Self::Ed25519,
            KeyArg::X25519 => Self::X25519,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Inspect {
            packet_path,
            glob,
            sort,
            limit,
        } => {
            if packet_path.is_dir() {
                let entries = collect_packet_entries(&packet_path, glob.as_deref())?;
                let mut entries = maybe_sort_entries(entries, sort);
                let limit = limit.or(sort.map(|InspectSort::Size| 10));
                if let Some(limit) = limit {
                    entries.truncate(limit);
                }
                for entry in entries {
                    println!("== {} ({} bytes) ==", entry.path.display(), entry.size);
                    match read_and_inspect(&entry.path) {
                        Ok(report) => print_report(&report)?,
                        Err(err) => println!("error: {err:#}"),
                    }
                }
            } else {
                print_report(&read_and_inspect(&packet_path)?)?;
            }
        }
        Command::Relay {
            packet_file,
            response,
        } => {
            let bytes = fs::read(&packet_file)
                .with_context(|| format!("read packet {}", packet_file.display()))?;
            let value = inspect_relay_message(&bytes, response)?;
            print_json(&value)?;
        }
        Command::SessionData { hex } => {
            let hex = match hex.strip_prefix('@') {
                Some(path) => fs::read_to_string(path)
                    .with_context(|| format!("read session data {path}"))?,
                None => hex,
            };
            print_json(&decode_session_data(&hex)?)?;
        }
        Command::Keygen { kind, secret } => match secret {
            Some(secret) => println!("{}", public_key(kind.into(), &secret)?),
            None => print_json(&generate_keys(kind.into()))?,
        },
    }
    Ok(())
}

fn read_and_inspect(path: &Path) -> Result<InspectReport> {
    let bytes = fs::read(path).with_context(|| format!("read packet {}", path.display()))?;
    inspect_packet(&bytes)
}

fn print_report(report: &InspectReport) -> Result<()> {
    println!(
        "type: {:?} framing: {:?} size: {} bytes",
        report.packet_type, report.framing, report.size
    );
    print_json(&report.packet)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{json}");
    Ok(())
}

struct PacketEntry {
    path: PathBuf,
    size: u64,
}

fn collect_packet_entries(dir: &Path, glob: Option<&str>) -> Result<Vec<PacketEntry>> {
    let mut entries = Vec::new();
    let pattern = match glob {
        Some(value) => Some(Pattern::new(value).context("invalid glob pattern")?),
        None => None,
    };

    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(pattern) = &pattern {
            let matches_path = pattern.matches_path(&path);
            let matches_name = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| pattern.matches(name));
            if !matches_path && !matches_name {
                continue;
            }
        }
        let size = entry.metadata()?.len();
        entries.push(PacketEntry { path, size });
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

fn maybe_sort_entries(
    mut entries: Vec<PacketEntry>,
    sort: Option<InspectSort>,
) -> Vec<PacketEntry> {
    match sort {
        Some(InspectSort::Size) => {
            entries.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));
        }
        None => {}
    }
    entries
}

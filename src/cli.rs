//! `structopt` argument definitions for the five subcommands: `scan`,
//! `scan-text`, `format`, `compare`, `pointers`. Kept separate from
//! `main.rs`, with the `Args`/`Command` enum distinct from the command
//! dispatch functions.

use std::path::PathBuf;

use structopt::StructOpt;

use crate::pid::Target;

pub fn parse_hex_u64(value: &str) -> Result<u64, std::num::ParseIntError> {
    let value = value.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(value, 16)
}

fn parse_target_pid(value: &str) -> Result<usize, std::num::ParseIntError> {
    value.parse()
}

fn parse_hex_range(value: &str) -> Result<(u64, u64), String> {
    let (lo, hi) = value.split_once('-').ok_or_else(|| format!("expected <hex>-<hex>, got {:?}", value))?;
    let lo = parse_hex_u64(lo).map_err(|e| e.to_string())?;
    let hi = parse_hex_u64(hi).map_err(|e| e.to_string())?;
    Ok((lo, hi))
}

#[derive(Debug, StructOpt)]
#[structopt(name = "chainseer", about = "inverse-pointer chain discovery")]
pub struct Args {
    /// Enable debug-level logging (equivalent to RUST_LOG=debug).
    #[structopt(short, long)]
    pub debug: bool,

    /// Print results with `{:#?}` instead of `{:?}`.
    #[structopt(short, long)]
    pub verbose: bool,

    #[structopt(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, StructOpt)]
pub enum Command {
    /// Search for pointer chains from every static module to --addr, writing a binary chain file.
    Scan(Scan),
    /// Search for pointer chains and write the human-readable rendering directly, skipping the binary codec.
    ScanText(Scan),
    /// Render a previously written binary chain file as text.
    Format(Format),
    /// Diff two chain files (binary by default, text with --text) and report per-module overlap.
    Compare(Compare),
    /// Scan a process's memory for raw pointer-shaped values in an address range, without chasing chains.
    Pointers(Pointers),
}

#[derive(Debug, StructOpt)]
pub struct Scan {
    /// Numeric pid of the target process.
    #[structopt(long, parse(try_from_str = parse_target_pid), required_unless = "name", conflicts_with = "name")]
    pub pid: Option<usize>,

    /// Executable name of the target process (must be unambiguous).
    #[structopt(long, required_unless = "pid", conflicts_with = "pid")]
    pub name: Option<String>,

    /// Target address(es) to search backward from, in hex.
    #[structopt(long = "addr", parse(try_from_str = parse_hex_u64), required = true)]
    pub addrs: Vec<u64>,

    /// Maximum number of pointer hops to search.
    #[structopt(long, default_value = "7")]
    pub depth: usize,

    /// Maximum byte distance between a candidate pointer's value and a frontier address.
    #[structopt(long, parse(try_from_str = parse_hex_u64), default_value = "fff")]
    pub offset: u64,

    /// Caps the number of matches kept at any one level.
    #[structopt(long)]
    pub limit: Option<usize>,

    /// Output path for the chain file (binary for `scan`, text for `scan-text`).
    #[structopt(long, parse(from_os_str))]
    pub out: PathBuf,
}

impl Scan {
    pub fn target(&self) -> Target {
        match self.pid {
            Some(pid) => Target::Pid(pid),
            None => Target::Name(self.name.clone().unwrap()),
        }
    }
}

#[derive(Debug, StructOpt)]
pub struct Format {
    /// Binary chain file to render.
    #[structopt(parse(from_os_str))]
    pub input: PathBuf,

    /// Output path; defaults to stdout.
    #[structopt(long, parse(from_os_str))]
    pub out: Option<PathBuf>,

    /// Write one file per module instead of a single combined rendering.
    #[structopt(long)]
    pub per_module: bool,
}

#[derive(Debug, StructOpt)]
pub struct Compare {
    #[structopt(parse(from_os_str))]
    pub lhs: PathBuf,

    #[structopt(parse(from_os_str))]
    pub rhs: PathBuf,

    /// Parse both inputs as text chain dumps instead of the binary format.
    #[structopt(long)]
    pub text: bool,
}

#[derive(Debug, StructOpt)]
pub struct Pointers {
    #[structopt(long, parse(try_from_str = parse_target_pid), required_unless = "name", conflicts_with = "name")]
    pub pid: Option<usize>,

    #[structopt(long, required_unless = "pid", conflicts_with = "pid")]
    pub name: Option<String>,

    /// Address range to scan, as `<hex>-<hex>`.
    #[structopt(long, parse(try_from_str = parse_hex_range))]
    pub range: Option<(u64, u64)>,

    /// Restrict the scan to regions whose kind bit is set in this mask (hex).
    #[structopt(long, parse(try_from_str = parse_hex_u64))]
    pub mask: Option<u64>,
}

impl Pointers {
    pub fn target(&self) -> Target {
        match self.pid {
            Some(pid) => Target::Pid(pid),
            None => Target::Name(self.name.clone().unwrap()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_0x_prefixed_and_bare_hex() {
        assert_eq!(parse_hex_u64("0x1000").unwrap(), 0x1000);
        assert_eq!(parse_hex_u64("1000").unwrap(), 0x1000);
    }

    #[test]
    fn parses_a_hex_range() {
        assert_eq!(parse_hex_range("1000-2000").unwrap(), (0x1000, 0x2000));
        assert!(parse_hex_range("1000").is_err());
    }
}

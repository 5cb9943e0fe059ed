//! Binary chain-file codec. Ports `chainer::base<T>`'s
//! `cprog_header`/`cprog_sym<T>`/`cprog_llen`/`cprog_data<T>` layout and
//! `integr_data_to_file`/`parse_cprog_bin_data`.
//!
//! Unlike the original, the reader parses eagerly into owned structures
//! rather than reinterpreting a raw `mmap`'d buffer through pointer
//! casts: Rust's aliasing rules make that trick unsound to reproduce
//! directly, and a chain file is small enough (one `Dir` per pointer
//! hop, not per scanned byte) that an owned parse costs nothing an
//! analysis tool would notice.

pub mod text;

use std::{
    convert::TryFrom,
    io::{
        Read,
        Write,
    },
};

use crate::{
    chain::{
        bfs::BfsResult,
        ChainTree,
        Dir,
    },
    error::Error,
    word::WordSize,
};

const SIGN: &[u8] = b".bin from chainer";
const SIGN_LEN: usize = 128;
const NAME_LEN: usize = 64;
const VERSION: i32 = 101;

pub struct ChainSymbol {
    pub start: u64,
    pub name:  String,
    pub range: i32,
    pub count: i32,
    pub level: i32,
    pub results: Vec<Dir>,
}

/// A fully parsed chain file: one [`ChainSymbol`] per anchor module, plus
/// the compacted per-level content arrays that link each symbol's
/// `Dir.start..Dir.end` window to the level below it.
pub struct ChainFile {
    pub word_size: WordSize,
    pub symbols:   Vec<ChainSymbol>,
    pub contents:  Vec<Vec<Dir>>,
}

impl ChainFile {
    /// Builds the same in-memory shape [`write_chain_file`] serializes,
    /// directly from a finished BFS + tree pass, so the text renderer can
    /// run without a binary round trip (`scan-text`).
    pub fn from_bfs(
        bfs: &BfsResult,
        tree: &ChainTree,
        word_size: WordSize,
    ) -> ChainFile {
        let symbols = bfs
            .ranges
            .iter()
            .map(|range| ChainSymbol {
                start: range.module.start,
                name: range.module.name.clone(),
                range: range.module.kind.bit() as i32,
                count: range.module.index as i32,
                level: range.level as i32,
                results: range.results.as_slice().to_vec(),
            })
            .collect();

        let contents = tree
            .contents
            .iter()
            .enumerate()
            .map(|(level, indices)| {
                let frontier = bfs.dirs[level].as_slice();
                indices.iter().map(|&idx| frontier[idx as usize]).collect()
            })
            .collect();

        ChainFile { word_size, symbols, contents }
    }
}

fn write_i32(
    w: &mut dyn Write,
    value: i32,
) -> Result<(), Error> {
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn read_i32(r: &mut dyn Read) -> Result<i32, Error> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn write_u32(
    w: &mut dyn Write,
    value: u32,
) -> Result<(), Error> {
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn read_u32(r: &mut dyn Read) -> Result<u32, Error> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn write_word(
    w: &mut dyn Write,
    value: u64,
    word_size: WordSize,
) -> Result<(), Error> {
    match word_size {
        WordSize::W32 => w.write_all(&(value as u32).to_le_bytes())?,
        WordSize::W64 => w.write_all(&value.to_le_bytes())?,
    }
    Ok(())
}

fn read_word(
    r: &mut dyn Read,
    word_size: WordSize,
) -> Result<u64, Error> {
    match word_size {
        WordSize::W32 => {
            let mut buf = [0u8; 4];
            r.read_exact(&mut buf)?;
            Ok(u32::from_le_bytes(buf) as u64)
        }
        WordSize::W64 => {
            let mut buf = [0u8; 8];
            r.read_exact(&mut buf)?;
            Ok(u64::from_le_bytes(buf))
        }
    }
}

fn write_dir(
    w: &mut dyn Write,
    dir: &Dir,
    word_size: WordSize,
) -> Result<(), Error> {
    write_word(w, dir.address, word_size)?;
    write_word(w, dir.value, word_size)?;
    write_u32(w, dir.start)?;
    write_u32(w, dir.end)?;
    Ok(())
}

fn read_dir(
    r: &mut dyn Read,
    word_size: WordSize,
) -> Result<Dir, Error> {
    let address = read_word(r, word_size)?;
    let value = read_word(r, word_size)?;
    let start = read_u32(r)?;
    let end = read_u32(r)?;
    Ok(Dir { address, value, start, end })
}

fn pad_name(name: &str) -> [u8; NAME_LEN] {
    let mut buf = [0u8; NAME_LEN];
    let bytes = name.as_bytes();
    let n = bytes.len().min(NAME_LEN - 1);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}

fn read_name(buf: &[u8; NAME_LEN]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Writes `bfs`/`tree` to `out` in the chain binary format, returning the
/// total chain count (`0` and no bytes beyond the empty-file case if
/// `tree` has no sinks). Ports `integr_data_to_file`.
pub fn write_chain_file(
    out: &mut dyn Write,
    bfs: &BfsResult,
    tree: &ChainTree,
    word_size: WordSize,
) -> Result<u64, Error> {
    if bfs.ranges.is_empty() || tree.counts.is_empty() {
        return Ok(0);
    }

    let mut sign = [0u8; SIGN_LEN];
    sign[..SIGN.len()].copy_from_slice(SIGN);
    out.write_all(&sign)?;

    write_i32(out, bfs.ranges.len() as i32)?;
    write_i32(out, VERSION)?;
    write_i32(out, word_size.bytes() as i32)?;
    write_i32(out, tree.contents.len() as i32)?;

    for range in &bfs.ranges {
        let name = pad_name(&range.module.name);
        write_word(out, range.module.start, word_size)?;
        out.write_all(&name)?;
        write_i32(out, range.module.kind.bit() as i32)?;
        write_i32(out, range.module.index as i32)?;
        write_i32(out, range.results.len() as i32)?;
        write_i32(out, range.level as i32)?;

        for dir in range.results.as_slice() {
            write_dir(out, dir, word_size)?;
        }
    }

    for (level, indices) in tree.contents.iter().enumerate() {
        write_i32(out, 0)?;
        write_u32(out, indices.len() as u32)?;
        write_i32(out, level as i32)?;

        let frontier = bfs.dirs[level].as_slice();
        for &idx in indices {
            write_dir(out, &frontier[idx as usize], word_size)?;
        }
    }

    Ok(*tree.counts.last().and_then(|row| row.last()).unwrap_or(&0))
}

/// Parses a chain file written by [`write_chain_file`]. Ports
/// `base<T>::parse_cprog_bin_data`.
pub fn read_chain_file(input: &mut dyn Read) -> Result<ChainFile, Error> {
    let mut sign = [0u8; SIGN_LEN];
    input.read_exact(&mut sign)?;
    if !sign.starts_with(SIGN) {
        return Err(Error::malformed("<chain file>", "bad signature"));
    }

    let module_count = read_i32(input)?;
    let version = read_i32(input)?;
    let size = read_i32(input)?;
    let level = read_i32(input)?;

    if module_count < 0 || level < 0 {
        return Err(Error::malformed("<chain file>", "negative module_count or level"));
    }
    if version != VERSION {
        return Err(Error::malformed("<chain file>", format!("unsupported version {}", version)));
    }

    let word_size = WordSize::try_from(size as u8)?;

    let mut symbols = Vec::with_capacity(module_count as usize);
    for _ in 0..module_count {
        let start = read_word(input, word_size)?;
        let mut name_buf = [0u8; NAME_LEN];
        input.read_exact(&mut name_buf)?;
        let name = read_name(&name_buf);
        let range = read_i32(input)?;
        let count = read_i32(input)?;
        let pointer_count = read_i32(input)?;
        let sym_level = read_i32(input)?;

        if pointer_count < 0 {
            return Err(Error::malformed("<chain file>", "negative pointer_count"));
        }

        let mut results = Vec::with_capacity(pointer_count as usize);
        for _ in 0..pointer_count {
            results.push(read_dir(input, word_size)?);
        }

        symbols.push(ChainSymbol { start, name, range, count, level: sym_level, results });
    }

    let mut contents = Vec::with_capacity(level as usize);
    for expected_level in 0..level {
        let _module_count_unused = read_i32(input)?;
        let count = read_u32(input)?;
        let read_level = read_i32(input)?;
        if read_level != expected_level {
            return Err(Error::malformed("<chain file>", format!("level block out of order: expected {}, got {}", expected_level, read_level)));
        }

        let mut dirs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            dirs.push(read_dir(input, word_size)?);
        }
        contents.push(dirs);
    }

    Ok(ChainFile { word_size, symbols, contents })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::{
        chain::{
            Pointer,
            Range,
        },
        mem::{
            module::StaticModule,
            Kind,
        },
        spill::SpillQueue,
    };

    fn module(name: &str) -> StaticModule {
        StaticModule { name: name.to_string(), start: 0x7000_0000, end: 0x7000_1000, kind: Kind::CodeApp, index: 1 }
    }

    #[test]
    fn round_trips_a_single_sink_chain() {
        let mut results = SpillQueue::new().unwrap();
        results.push(Dir::root(Pointer { address: 0x7000_0100, value: 0 })).unwrap();

        let bfs = BfsResult { ranges: vec![Range { level: 0, module: module("lib.so"), results }], dirs: Vec::new() };
        let tree = ChainTree { counts: vec![vec![0, 1]], contents: Vec::new() };

        let mut buf = Vec::new();
        let total = write_chain_file(&mut buf, &bfs, &tree, WordSize::W64).unwrap();
        assert_eq!(total, 1);

        let parsed = read_chain_file(&mut Cursor::new(buf)).unwrap();
        assert_eq!(parsed.word_size, WordSize::W64);
        assert_eq!(parsed.symbols.len(), 1);
        assert_eq!(parsed.symbols[0].name, "lib.so");
        assert_eq!(parsed.symbols[0].results.len(), 1);
        assert_eq!(parsed.symbols[0].results[0].address, 0x7000_0100);
        assert!(parsed.contents.is_empty());
    }

    #[test]
    fn empty_tree_writes_nothing_and_reports_zero() {
        let bfs = BfsResult { ranges: Vec::new(), dirs: Vec::new() };
        let tree = ChainTree { counts: Vec::new(), contents: Vec::new() };

        let mut buf = Vec::new();
        let total = write_chain_file(&mut buf, &bfs, &tree, WordSize::W64).unwrap();
        assert_eq!(total, 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_bad_signature() {
        let mut bytes = vec![0u8; SIGN_LEN + 16];
        bytes[0] = b'X';
        let err = read_chain_file(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));
    }
}

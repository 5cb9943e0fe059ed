//! Chain-file comparator. Ports `chainer::ccompare<T>`: flattens
//! every chain in a file to `(module, module_index, offsets)` and
//! reports, per module, which offset sequences are common to both
//! files.

use std::{
    collections::{
        HashMap,
        HashSet,
    },
    io::{
        BufRead,
        Read,
    },
};

use crate::{
    chain::Dir,
    codec::{
        read_chain_file,
        ChainFile,
        ChainSymbol,
    },
    error::Error,
};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ModuleKey {
    name:  String,
    index: i32,
}

pub struct ModuleDiff {
    pub module_name:  String,
    pub module_index: i32,
    /// Offset sequences present in both files for this module.
    pub common:       Vec<Vec<u64>>,
}

pub struct CompareResult {
    pub lhs_total: usize,
    pub rhs_total: usize,
    pub unchanged: usize,
    pub modules:   Vec<ModuleDiff>,
}

struct ChainSignature {
    module_name:  String,
    module_index: i32,
    offsets:      Vec<u64>,
}

type ChainSet = HashSet<Vec<u64>>;
type ModuleChainMap = HashMap<ModuleKey, ChainSet>;

fn collect_from_dir(
    contents: &[Vec<Dir>],
    dir: Dir,
    level: usize,
    offsets: &mut Vec<u64>,
    module_name: &str,
    module_index: i32,
    out: &mut Vec<ChainSignature>,
) {
    if level == 0 {
        out.push(ChainSignature { module_name: module_name.to_string(), module_index, offsets: offsets.clone() });
        return;
    }

    let target_level = level - 1;
    if target_level >= contents.len() {
        return;
    }

    let child_level = &contents[target_level];
    for idx in dir.start..dir.end {
        if idx as usize >= child_level.len() {
            break;
        }
        let child = child_level[idx as usize];
        offsets.push(child.address.wrapping_sub(dir.value));
        collect_from_dir(contents, child, target_level, offsets, module_name, module_index, out);
        offsets.pop();
    }
}

fn collect_module_chains(
    chain: &ChainFile,
    sym: &ChainSymbol,
    out: &mut Vec<ChainSignature>,
) {
    for &dir in &sym.results {
        let mut offsets = vec![dir.address.wrapping_sub(sym.start)];
        collect_from_dir(&chain.contents, dir, sym.level as usize, &mut offsets, &sym.name, sym.count, out);
    }
}

fn parse_binary(input: &mut dyn Read) -> Result<Vec<ChainSignature>, Error> {
    let chain = read_chain_file(input)?;
    let mut out = Vec::new();
    for sym in &chain.symbols {
        collect_module_chains(&chain, sym, &mut out);
    }
    Ok(out)
}

/// Parses one `module[index] + 0xOFF -> + 0xOFF ...` line. Ports
/// `ccompare<T>::parse_txt_line`.
fn parse_text_line(line: &str) -> Option<ChainSignature> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let left = line.find('[')?;
    let right = line[left + 1..].find(']').map(|i| left + 1 + i)?;

    let module_name = line[..left].to_string();
    let module_index: i32 = line[left + 1..right].parse().ok()?;

    let rest = &line[right + 1..];
    let mut offsets = Vec::new();
    let mut cursor = 0;
    while let Some(found) = rest[cursor..].find("+ 0x") {
        let start = cursor + found + 4;
        let end = rest[start..].find(|c: char| !c.is_ascii_hexdigit()).map(|i| start + i).unwrap_or(rest.len());
        if end == start {
            break;
        }
        if let Ok(value) = u64::from_str_radix(&rest[start..end], 16) {
            offsets.push(value);
        }
        cursor = end;
    }

    if offsets.is_empty() {
        None
    } else {
        Some(ChainSignature { module_name, module_index, offsets })
    }
}

fn parse_text(input: &mut dyn BufRead) -> Result<Vec<ChainSignature>, Error> {
    let mut out = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        let n = input.read_line(&mut line)?;
        if n == 0 {
            break;
        }
        if let Some(sig) = parse_text_line(&line) {
            out.push(sig);
        }
    }
    Ok(out)
}

fn build_chain_map(chains: &[ChainSignature]) -> ModuleChainMap {
    let mut map: ModuleChainMap = HashMap::new();
    for chain in chains {
        let key = ModuleKey { name: chain.module_name.clone(), index: chain.module_index };
        map.entry(key).or_default().insert(chain.offsets.clone());
    }
    map
}

fn process_module_diff(
    key: &ModuleKey,
    lhs: Option<&ChainSet>,
    rhs: Option<&ChainSet>,
    modules: &mut Vec<ModuleDiff>,
    unchanged: &mut usize,
) {
    let mut common = Vec::new();

    if let (Some(lhs), Some(rhs)) = (lhs, rhs) {
        for chain in lhs {
            if rhs.contains(chain) {
                common.push(chain.clone());
                *unchanged += 1;
            }
        }
    }

    if !common.is_empty() {
        modules.push(ModuleDiff { module_name: key.name.clone(), module_index: key.index, common });
    }
}

fn compare_chains(
    lhs_chains: Vec<ChainSignature>,
    rhs_chains: Vec<ChainSignature>,
) -> CompareResult {
    let lhs_total = lhs_chains.len();
    let rhs_total = rhs_chains.len();

    let lhs_map = build_chain_map(&lhs_chains);
    let rhs_map = build_chain_map(&rhs_chains);

    let mut modules = Vec::new();
    let mut unchanged = 0;
    let mut visited = HashSet::with_capacity(lhs_map.len());

    for (key, lhs_set) in &lhs_map {
        visited.insert(key.clone());
        process_module_diff(key, Some(lhs_set), rhs_map.get(key), &mut modules, &mut unchanged);
    }

    for (key, rhs_set) in &rhs_map {
        if visited.contains(key) {
            continue;
        }
        process_module_diff(key, None, Some(rhs_set), &mut modules, &mut unchanged);
    }

    CompareResult { lhs_total, rhs_total, unchanged, modules }
}

pub fn compare_binary_files(
    lhs: &mut dyn Read,
    rhs: &mut dyn Read,
) -> Result<CompareResult, Error> {
    let lhs_chains = parse_binary(lhs)?;
    let rhs_chains = parse_binary(rhs)?;
    Ok(compare_chains(lhs_chains, rhs_chains))
}

pub fn compare_text_files(
    lhs: &mut dyn BufRead,
    rhs: &mut dyn BufRead,
) -> Result<CompareResult, Error> {
    let lhs_chains = parse_text(lhs)?;
    let rhs_chains = parse_text(rhs)?;
    Ok(compare_chains(lhs_chains, rhs_chains))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn parses_a_single_offset_line() {
        let sig = parse_text_line("lib.so[1] + 0x100").unwrap();
        assert_eq!(sig.module_name, "lib.so");
        assert_eq!(sig.module_index, 1);
        assert_eq!(sig.offsets, vec![0x100]);
    }

    #[test]
    fn parses_a_multi_hop_line() {
        let sig = parse_text_line("libfoo.so[2] + 0x10 -> + 0x20 -> + 0x8").unwrap();
        assert_eq!(sig.offsets, vec![0x10, 0x20, 0x8]);
    }

    #[test]
    fn blank_line_parses_to_none() {
        assert!(parse_text_line("   ").is_none());
    }

    #[test]
    fn identical_text_files_are_fully_unchanged() {
        let a = "lib.so[1] + 0x100 -> + 0x10\nlib.so[1] + 0x100 -> + 0x20\n";
        let b = a;

        let result = compare_text_files(&mut Cursor::new(a.as_bytes()), &mut Cursor::new(b.as_bytes())).unwrap();

        assert_eq!(result.lhs_total, 2);
        assert_eq!(result.rhs_total, 2);
        assert_eq!(result.unchanged, 2);
        assert_eq!(result.modules.len(), 1);
        assert_eq!(result.modules[0].common.len(), 2);
    }

    #[test]
    fn disjoint_modules_report_zero_unchanged() {
        let a = "lib.so[1] + 0x100\n";
        let b = "other.so[1] + 0x200\n";

        let result = compare_text_files(&mut Cursor::new(a.as_bytes()), &mut Cursor::new(b.as_bytes())).unwrap();

        assert_eq!(result.unchanged, 0);
        assert!(result.modules.is_empty());
        assert_eq!(result.lhs_total, 1);
        assert_eq!(result.rhs_total, 1);
    }

    #[test]
    fn partial_overlap_reports_only_shared_chains() {
        let a = "lib.so[1] + 0x100 -> + 0x10\nlib.so[1] + 0x100 -> + 0x20\n";
        let b = "lib.so[1] + 0x100 -> + 0x10\nlib.so[1] + 0x100 -> + 0x30\n";

        let result = compare_text_files(&mut Cursor::new(a.as_bytes()), &mut Cursor::new(b.as_bytes())).unwrap();

        assert_eq!(result.unchanged, 1);
        assert_eq!(result.modules[0].common, vec![vec![0x100, 0x10]]);
    }
}

//! Layered inverse-pointer search. Ports
//! `chainer::scan<T>::{filter_pointer_ranges,trans_to_pointer_pdata,
//! associate_data_index,create_assoc_dir_index}` plus the per-level
//! driver loop that in the original lives in the top-level `scan`/`csearch`
//! collaboration.

use std::sync::{
    atomic::{
        AtomicUsize,
        Ordering,
    },
    Arc,
    Mutex,
};

use super::{
    Dir,
    Pointer,
    Range,
};
use crate::{
    error::Error,
    mem::StaticModule,
    pool::ThreadPool,
    spill::SpillQueue,
};

/// Number of pointer-table / frontier entries handed to one worker task;
/// ports the original's `avg = 10000`.
const BLOCK_SIZE: usize = 10_000;

pub struct BfsResult {
    pub ranges: Vec<Range>,
    pub dirs:   Vec<SpillQueue<Dir>>,
}

fn lower_bound_by_address<T>(
    slice: &[T],
    target: u64,
    address: impl Fn(&T) -> u64,
) -> usize {
    slice.partition_point(|item| address(item) < target)
}

fn upper_bound_inclusive_by_address<T>(
    slice: &[T],
    target: u64,
    address: impl Fn(&T) -> u64,
) -> usize {
    slice.partition_point(|item| address(item) <= target)
}

/// Splits `candidates` (ascending by `.address`) into per-module sinks
/// (pushed to `ranges`) and the remaining continuation frontier, in
/// address order. Ports `filter_pointer_ranges` + `trans_to_pointer_pdata`.
fn partition_level(
    candidates: &[Pointer],
    modules: &[StaticModule],
    level: usize,
    ranges: &mut Vec<Range>,
) -> Result<Vec<Dir>, Error> {
    let mut taken = vec![false; candidates.len()];

    for module in modules {
        let lo = lower_bound_by_address(candidates, module.start, |p| p.address);
        let hi = lower_bound_by_address(candidates, module.end, |p| p.address);
        if lo >= hi {
            continue;
        }

        let mut results = SpillQueue::with_capacity(hi - lo)?;
        for p in &candidates[lo..hi] {
            results.push(Dir::root(*p))?;
        }
        for flag in &mut taken[lo..hi] {
            *flag = true;
        }

        ranges.push(Range {
            level,
            module: module.clone(),
            results,
        });
    }

    let continuation = candidates
        .iter()
        .zip(taken.iter())
        .filter(|(_, taken)| !**taken)
        .map(|(p, _)| Dir::root(*p))
        .collect();

    Ok(continuation)
}

/// Ports `associate_data_index`: for every `dir`, binds it to the slice
/// `[start, end)` of `prev` (sorted ascending by address) whose address
/// lies in `[dir.value, dir.value + offset]`.
fn associate_indices(
    dirs: &mut [Dir],
    prev: &[Dir],
    offset: u64,
) {
    for dir in dirs.iter_mut() {
        let start = lower_bound_by_address(prev, dir.value, |d| d.address);
        let end = upper_bound_inclusive_by_address(prev, dir.value.saturating_add(offset), |d| d.address);
        dir.start = start as u32;
        dir.end = end as u32;
    }
}

/// Scans the whole pointer table for entries whose `.value` lands within
/// `offset` of some entry of `frontier` (sorted ascending by address),
/// in parallel blocks of [`BLOCK_SIZE`]. Ports
/// `filter_pointer_to_block` + `filter_pointer_from_fmmap`.
fn collect_matches(
    pointer_table: &[Pointer],
    frontier: &[Dir],
    offset: u64,
    pool: &ThreadPool,
) -> Vec<Pointer> {
    let blocks: Vec<Vec<Pointer>> = pointer_table.chunks(BLOCK_SIZE).map(<[Pointer]>::to_vec).collect();
    let block_count = blocks.len();
    let results: Arc<Mutex<Vec<Vec<Pointer>>>> = Arc::new(Mutex::new(vec![Vec::new(); block_count]));
    let total = Arc::new(AtomicUsize::new(0));
    let frontier: Arc<Vec<Dir>> = Arc::new(frontier.to_vec());

    for (i, block) in blocks.into_iter().enumerate() {
        let results = Arc::clone(&results);
        let total = Arc::clone(&total);
        let frontier = Arc::clone(&frontier);

        pool.execute(move || {
            let mut hits = Vec::new();
            for p in &block {
                let lo = lower_bound_by_address(&frontier, p.value, |d| d.address);
                if lo >= frontier.len() {
                    continue;
                }
                if frontier[lo].address - p.value > offset {
                    continue;
                }
                hits.push(*p);
            }
            total.fetch_add(hits.len(), Ordering::SeqCst);
            results.lock().unwrap()[i] = hits;
        });
    }

    pool.wait();

    Arc::try_unwrap(results).unwrap().into_inner().unwrap().into_iter().flatten().collect()
}

/// Runs the full inverse-pointer BFS. `roots` are the target addresses;
/// `depth` bounds the number of levels; `offset` is the inclusive
/// per-step window; `cap`, when set, limits emitted pointers per level.
pub fn search(
    pointer_table: &[Pointer],
    modules: &[StaticModule],
    roots: &[u64],
    depth: usize,
    offset: u64,
    cap: Option<usize>,
    pool: &ThreadPool,
) -> Result<BfsResult, Error> {
    let mut ranges = Vec::new();
    let mut dirs: Vec<SpillQueue<Dir>> = Vec::new();

    if roots.is_empty() {
        return Ok(BfsResult { ranges, dirs });
    }

    let mut level0: Vec<Pointer> = roots.iter().map(|&address| Pointer { address, value: 0 }).collect();
    level0.sort_by_key(|p| p.address);

    let continuation = partition_level(&level0, modules, 0, &mut ranges)?;
    let mut level_queue = SpillQueue::with_capacity(continuation.len())?;
    level_queue.extend_from_slice(&continuation)?;
    dirs.push(level_queue);

    for level in 1..=depth {
        let prev_frontier = dirs[level - 1].as_slice().to_vec();
        if prev_frontier.is_empty() {
            break;
        }

        let mut matches = collect_matches(pointer_table, &prev_frontier, offset, pool);
        if let Some(cap) = cap {
            matches.truncate(cap);
        }
        matches.sort_by_key(|p| p.address);

        let mut continuation = partition_level(&matches, modules, level, &mut ranges)?;
        associate_indices(&mut continuation, &prev_frontier, offset);

        for range in ranges.iter_mut().filter(|r| r.level == level) {
            let slice = range.results.as_mut_slice();
            associate_indices(slice, &prev_frontier, offset);
        }

        if continuation.is_empty() {
            break;
        }

        let mut level_queue = SpillQueue::with_capacity(continuation.len())?;
        level_queue.extend_from_slice(&continuation)?;
        dirs.push(level_queue);
    }

    Ok(BfsResult { ranges, dirs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::Kind;

    fn module(
        name: &str,
        start: u64,
        end: u64,
    ) -> StaticModule {
        StaticModule { name: name.to_string(), start, end, kind: Kind::CodeApp, index: 1 }
    }

    #[test]
    fn empty_roots_returns_no_levels() {
        let pool = ThreadPool::new(1);
        let result = search(&[], &[], &[], 3, 0x10, None, &pool).unwrap();
        assert!(result.ranges.is_empty());
        assert!(result.dirs.is_empty());
    }

    #[test]
    fn direct_hit_in_module_becomes_a_level0_sink() {
        let modules = vec![module("lib.so", 0x7000_0000, 0x7000_1000)];
        let pool = ThreadPool::new(1);

        // target address itself lies in the module range
        let result = search(&[], &modules, &[0x7000_0100], 1, 0, None, &pool).unwrap();

        assert_eq!(result.ranges.len(), 1);
        assert_eq!(result.ranges[0].level, 0);
        assert_eq!(result.ranges[0].results.len(), 1);
        assert_eq!(result.ranges[0].results.as_slice()[0].address, 0x7000_0100);
    }

    #[test]
    fn one_hop_within_window_is_matched() {
        let modules = vec![module("lib.so", 0x7000_0000, 0x7000_1000)];
        let pointer_table = vec![Pointer { address: 0x7000_0100, value: 0xCAFE_0010 }];
        let pool = ThreadPool::new(1);

        let result = search(&pointer_table, &modules, &[0xCAFE_0010], 2, 0x20, None, &pool).unwrap();

        assert_eq!(result.ranges.len(), 1);
        assert_eq!(result.ranges[0].level, 1);
    }

    #[test]
    fn offset_window_excludes_out_of_range_hop() {
        let modules = vec![module("lib.so", 0x7000_0000, 0x7000_1000)];
        let pointer_table = vec![Pointer { address: 0x7000_0100, value: 0xCAFE_0000 }];
        let pool = ThreadPool::new(1);

        let result = search(&pointer_table, &modules, &[0xCAFE_0010], 2, 0x0F, None, &pool).unwrap();

        assert!(result.ranges.is_empty());
    }
}

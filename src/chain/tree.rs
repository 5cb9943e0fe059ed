//! Top-down directory-tree compaction. Ports
//! `chainer::scan<T>::{filter_suit_dir,merge_pointer_dirs,
//! stat_pointer_dir_count,build_pointer_dirs_tree}`.
//!
//! Each level's frontier (`dirs[level]`) generally contains far more
//! entries than are actually reachable from a sink discovered at a
//! shallower level. This pass walks from the deepest level with any
//! sink back to level 0, keeping only the `dirs[level - 1]` entries some
//! shallower sink or surviving entry still references, and rewrites
//! those references' `start`/`end` to index the compacted array instead
//! of the raw frontier.

use std::collections::HashMap;

use super::{
    bfs::BfsResult,
    ChainTree,
};

enum CitingSource {
    Range {
        range_idx:  usize,
        result_idx: usize,
    },
    Content {
        dir_idx: usize,
    },
}

struct Citing {
    start:  u32,
    end:    u32,
    source: CitingSource,
}

/// Builds the compacted tree from a finished BFS pass, rewriting every
/// surviving `Dir`'s `start`/`end` in place to index the compacted
/// content array of the level below it. Returns an empty tree if no
/// sink was ever reached.
pub fn build(bfs: &mut BfsResult) -> ChainTree {
    let max_level = match bfs.ranges.iter().map(|r| r.level).max() {
        Some(level) => level,
        None => return ChainTree { counts: Vec::new(), contents: Vec::new() },
    };

    let mut range_maps: HashMap<usize, Vec<usize>> = HashMap::new();
    for (idx, range) in bfs.ranges.iter().enumerate() {
        range_maps.entry(range.level).or_default().push(idx);
    }

    let mut contents: Vec<Vec<u32>> = vec![Vec::new(); max_level];

    for level in (1..=max_level).rev() {
        let mut citing: Vec<Citing> = Vec::new();

        if let Some(range_idxs) = range_maps.get(&level) {
            for &range_idx in range_idxs {
                let slice = bfs.ranges[range_idx].results.as_slice();
                for result_idx in 0..slice.len() {
                    let d = slice[result_idx];
                    citing.push(Citing { start: d.start, end: d.end, source: CitingSource::Range { range_idx, result_idx } });
                }
            }
        }

        let content_refs: &[u32] = if level < max_level { &contents[level] } else { &[] };
        if !content_refs.is_empty() {
            let frontier = bfs.dirs[level].as_slice();
            for &dir_idx in content_refs {
                let d = frontier[dir_idx as usize];
                citing.push(Citing { start: d.start, end: d.end, source: CitingSource::Content { dir_idx: dir_idx as usize } });
            }
        }

        citing.sort_by_key(|c| c.start);

        let mut dist: usize = 0;
        let mut right: usize = 0;
        let mut kept: Vec<u32> = Vec::new();

        for c in citing.iter_mut() {
            let (start, end) = (c.start as usize, c.end as usize);

            if right <= start {
                dist += start - right;
                for idx in start..end {
                    kept.push(idx as u32);
                }
                right = end;
            } else if right < end {
                for idx in right..end {
                    kept.push(idx as u32);
                }
                right = end;
            }

            c.start = (start - dist) as u32;
            c.end = (end - dist) as u32;
        }

        for c in &citing {
            match &c.source {
                CitingSource::Range { range_idx, result_idx } => {
                    let slice = bfs.ranges[*range_idx].results.as_mut_slice();
                    slice[*result_idx].start = c.start;
                    slice[*result_idx].end = c.end;
                }
                CitingSource::Content { dir_idx } => {
                    let slice = bfs.dirs[level].as_mut_slice();
                    slice[*dir_idx].start = c.start;
                    slice[*dir_idx].end = c.end;
                }
            }
        }

        if kept.is_empty() {
            return ChainTree { counts: Vec::new(), contents: Vec::new() };
        }

        contents[level - 1] = kept;
    }

    let mut counts: Vec<Vec<u64>> = vec![vec![0, 1]];
    for level in 1..=max_level {
        let prev_contents = &contents[level - 1];
        let prev_frontier = bfs.dirs[level - 1].as_slice();
        let mut row = vec![0u64; prev_contents.len() + 1];

        for (i, &dir_idx) in prev_contents.iter().enumerate() {
            let d = prev_frontier[dir_idx as usize];
            row[i + 1] = row[i] + (counts[level - 1][d.end as usize] - counts[level - 1][d.start as usize]);
        }

        counts.push(row);
    }

    ChainTree { counts, contents }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain::{
            Dir,
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
        StaticModule { name: name.to_string(), start: 0, end: 0x1000, kind: Kind::CodeApp, index: 1 }
    }

    #[test]
    fn single_level_zero_sink_is_one_chain() {
        let mut results = SpillQueue::new().unwrap();
        results.push(Dir::root(Pointer { address: 0x100, value: 0 })).unwrap();

        let mut bfs = BfsResult { ranges: vec![Range { level: 0, module: module("lib.so"), results }], dirs: Vec::new() };

        let tree = build(&mut bfs);
        assert_eq!(tree.counts, vec![vec![0, 1]]);
        assert!(tree.contents.is_empty());
    }

    #[test]
    fn two_level_chain_keeps_only_referenced_parent() {
        // dirs[0] has two entries; only index 0 is ever referenced by a
        // level-1 sink, so contents[0] should compact to just that entry.
        let mut dirs0 = SpillQueue::new().unwrap();
        dirs0.push(Dir { address: 0x10, value: 0, start: 0, end: 1 }).unwrap();
        dirs0.push(Dir { address: 0x20, value: 0, start: 0, end: 1 }).unwrap();

        let mut sink_results = SpillQueue::new().unwrap();
        sink_results.push(Dir { address: 0x900, value: 0x10, start: 0, end: 1 }).unwrap();

        let mut bfs = BfsResult {
            ranges: vec![Range { level: 1, module: module("lib.so"), results: sink_results }],
            dirs: vec![dirs0],
        };

        let tree = build(&mut bfs);

        assert_eq!(tree.contents.len(), 1);
        assert_eq!(tree.contents[0], vec![0]);
        assert_eq!(tree.counts[0], vec![0, 1]);
        assert_eq!(tree.counts[1], vec![0, 1]);

        let rewritten = bfs.ranges[0].results.as_slice()[0];
        assert_eq!(rewritten.start, 0);
        assert_eq!(rewritten.end, 1);
    }

    #[test]
    fn no_sinks_yields_empty_tree() {
        let mut bfs = BfsResult { ranges: Vec::new(), dirs: Vec::new() };
        let tree = build(&mut bfs);
        assert!(tree.counts.is_empty());
        assert!(tree.contents.is_empty());
    }
}

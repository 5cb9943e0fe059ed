//! Remote pointer scanner. Ports
//! `chainer::search<T>::{get_pointers,filter_pointer_to_fmmap,
//! output_pointer_to_file}`.
//!
//! A word-aligned scan of every readable region produces one global,
//! address-sorted [`Pointer`] table. The original parallelizes both the
//! remote read and the per-word masking/validation across a thread
//! pool and a `BufferPool` of reusable read buffers; here the read
//! itself (one syscall per region) runs on the calling thread and only
//! the CPU-bound masking/range-check fans out to the pool, since the
//! read primitive is a small trait ([`RemoteMemory`]) rather than a
//! `Send + Sync` handle every worker could share.

use std::sync::{
    Arc,
    Mutex,
};

use crate::{
    chain::Pointer,
    deps::log::debug,
    error::Error,
    mem::{
        Region,
        RemoteMemory,
    },
    pool::ThreadPool,
    spill::SpillQueue,
    word::WordSize,
};

pub struct ScanOptions {
    /// Read buffer size per region, ported from the original's 1 MiB
    /// merge buffer.
    pub buffer_size: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions { buffer_size: 1 << 20 }
    }
}

fn is_readable(region: &Region) -> bool {
    region.region.perms().to_string().contains('r')
}

/// Sorted, non-overlapping `[start, end)` bounds of every region, used to
/// binary-search whether a candidate value lands inside any mapped region.
fn sorted_bounds(regions: &[Region]) -> Vec<(u64, u64)> {
    let mut bounds: Vec<(u64, u64)> = regions.iter().map(|r| (r.start(), r.end())).collect();
    bounds.sort_unstable_by_key(|&(start, _)| start);
    bounds
}

/// Ports the original's "binary-search `v` in the ascending region vector,
/// keep if it falls within any mapped region" validation: finds the last
/// region starting at or before `v` and checks `v` actually lies inside it,
/// rather than merely within the overall min/max span (which would also
/// accept values landing in unmapped gaps between regions).
fn value_in_any_region(bounds: &[(u64, u64)], value: u64) -> bool {
    let idx = bounds.partition_point(|&(start, _)| start <= value);
    if idx == 0 {
        return false;
    }
    let (start, end) = bounds[idx - 1];
    value >= start && value < end
}

fn extract_words(
    buf: &[u8],
    start_addr: u64,
    word_size: WordSize,
    bounds: &[(u64, u64)],
) -> Vec<Pointer> {
    let word_bytes = word_size.bytes();
    let mask = word_size.mask();
    let mut hits = Vec::new();

    let mut offset = 0usize;
    while offset + word_bytes <= buf.len() {
        let raw = match word_size {
            WordSize::W32 => u32::from_ne_bytes(buf[offset..offset + 4].try_into().unwrap()) as u64,
            WordSize::W64 => u64::from_ne_bytes(buf[offset..offset + 8].try_into().unwrap()),
        };
        let value = raw & mask;
        if value_in_any_region(bounds, value) {
            hits.push(Pointer { address: start_addr + offset as u64, value });
        }
        offset += word_bytes;
    }

    hits
}

/// Scans every readable region of `regions` for word-aligned values that
/// look like pointers into the address space spanned by `regions`,
/// returning a single table sorted ascending by `.address`. Ports
/// `get_pointers(start, end, rest, count, size)` with `rest == false`
/// (whole-range scan); region selection by kind mask is the caller's
/// job via [`crate::mem::filter_by_kind_mask`].
pub fn scan_pointers(
    remote: &dyn RemoteMemory,
    regions: &[Region],
    word_size: WordSize,
    options: &ScanOptions,
    pool: &ThreadPool,
) -> Result<SpillQueue<Pointer>, Error> {
    let mut table = SpillQueue::new()?;
    if regions.is_empty() {
        return Ok(table);
    }

    let bounds: Arc<Vec<(u64, u64)>> = Arc::new(sorted_bounds(regions));

    let results: Arc<Mutex<Vec<Vec<Pointer>>>> = Arc::new(Mutex::new(vec![Vec::new(); regions.len()]));

    for (idx, region) in regions.iter().enumerate() {
        if !is_readable(region) {
            continue;
        }

        let len = (region.end() - region.start()) as usize;
        if len < word_size.bytes() {
            continue;
        }

        let mut buf = Vec::with_capacity(len);
        let chunk_len = (options.buffer_size / word_size.bytes()).max(1) * word_size.bytes();
        let mut offset = 0usize;
        let mut truncated = false;

        while offset < len {
            let want = chunk_len.min(len - offset);
            let mut chunk = vec![0u8; want];
            match remote.read_into(region.start() + offset as u64, &mut chunk) {
                Ok(n) if n == want => buf.extend_from_slice(&chunk),
                _ => {
                    truncated = true;
                    break;
                }
            }
            offset += want;
        }

        if truncated && buf.is_empty() {
            debug!("skipping unreadable region at {:#x} ({} bytes)", region.start(), len);
            continue;
        }

        let results = Arc::clone(&results);
        let bounds = Arc::clone(&bounds);
        let start_addr = region.start();

        pool.execute(move || {
            let hits = extract_words(&buf, start_addr, word_size, &bounds);
            results.lock().unwrap()[idx] = hits;
        });
    }

    pool.wait();

    for region_hits in Arc::try_unwrap(results).unwrap().into_inner().unwrap() {
        table.extend_from_slice(&region_hits)?;
    }

    debug!("scanned {} pointer candidates across {} regions", table.len(), regions.len());

    Ok(table)
}

#[cfg(test)]
mod tests {
    use std::{
        cell::RefCell,
        collections::HashMap,
    };

    use super::*;
    use crate::mem::{
        maps::MappedRegion,
        Kind,
    };

    struct FakeMemory {
        pages: RefCell<HashMap<u64, Vec<u8>>>,
    }

    impl RemoteMemory for FakeMemory {
        fn read_into(
            &self,
            addr: u64,
            buf: &mut [u8],
        ) -> Result<usize, Error> {
            let pages = self.pages.borrow();
            let bytes = pages.get(&addr).ok_or_else(|| Error::remote_read("unmapped"))?;
            let n = buf.len().min(bytes.len());
            buf[..n].copy_from_slice(&bytes[..n]);
            Ok(n)
        }
    }

    fn region(
        start: u64,
        end: u64,
    ) -> Region {
        let line = format!("{:08x}-{:08x} r--p 00000000 08:02 1 /data/app/a-1/base.apk", start, end);
        Region { region: MappedRegion::try_from(line.as_str()).unwrap(), kind: Kind::DataApp }
    }

    #[test]
    fn empty_region_list_yields_empty_table() {
        let mem = FakeMemory { pages: RefCell::new(HashMap::new()) };
        let pool = ThreadPool::new(1);
        let table = scan_pointers(&mem, &[], WordSize::W64, &ScanOptions::default(), &pool).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn in_range_word_is_kept_and_out_of_range_is_dropped() {
        let r = region(0x1000, 0x3000);
        let mut page = vec![0u8; 16];
        page[0..8].copy_from_slice(&0x2000u64.to_ne_bytes()); // inside the region
        page[8..16].copy_from_slice(&0xdeadbeefu64.to_ne_bytes()); // nowhere near it

        let mut pages = HashMap::new();
        pages.insert(0x1000, page);
        let mem = FakeMemory { pages: RefCell::new(pages) };
        let pool = ThreadPool::new(2);

        let table = scan_pointers(&mem, &[r], WordSize::W64, &ScanOptions::default(), &pool).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.as_slice()[0], Pointer { address: 0x1000, value: 0x2000 });
    }

    #[test]
    fn value_landing_in_the_gap_between_two_regions_is_dropped() {
        // Two disjoint regions with a gap in between. A word whose value
        // falls in that gap must be rejected even though it lies within
        // the overall min/max span of all regions combined. `hi` is never
        // actually read from (the fake has no page for it, so its scan
        // attempt is skipped) — it exists only to extend the bounds list.
        let lo = region(0x1000, 0x1018);
        let hi = region(0x5000, 0x6000);

        let mut page = vec![0u8; 24];
        page[0..8].copy_from_slice(&0x1004u64.to_ne_bytes()); // inside `lo`
        page[8..16].copy_from_slice(&0x3000u64.to_ne_bytes()); // in the gap
        page[16..24].copy_from_slice(&0x5004u64.to_ne_bytes()); // inside `hi`

        let mut pages = HashMap::new();
        pages.insert(0x1000, page);
        let mem = FakeMemory { pages: RefCell::new(pages) };
        let pool = ThreadPool::new(2);

        let table = scan_pointers(&mem, &[lo, hi], WordSize::W64, &ScanOptions::default(), &pool).unwrap();

        let mut values: Vec<u64> = table.as_slice().iter().map(|p| p.value).collect();
        values.sort_unstable();
        assert_eq!(values, vec![0x1004, 0x5004]);
    }

    #[test]
    fn unreadable_permission_is_skipped() {
        let line = "00400000-00401000 -w-p 00000000 08:02 1 /x";
        let r = Region { region: MappedRegion::try_from(line).unwrap(), kind: Kind::DataApp };
        let mem = FakeMemory { pages: RefCell::new(HashMap::new()) };
        let pool = ThreadPool::new(1);

        let table = scan_pointers(&mem, &[r], WordSize::W64, &ScanOptions::default(), &pool).unwrap();
        assert!(table.is_empty());
    }
}

//! Modeling a traced process's address space: parsed `/proc/[pid]/maps`
//! regions, their coarse [`kind::Kind`], and the derived static module
//! list that anchors the BFS search.

pub mod column;
pub mod kind;
pub mod maps;
pub mod module;
pub mod remote;

use std::convert::TryFrom;

pub use kind::Kind;
use maps::MappedRegion;
pub use module::StaticModule;
pub use remote::{
    read_pointer_chain,
    ProcessMemory,
    RemoteMemory,
};

use crate::{
    error::Error,
    paths,
};

/// One parsed and classified `/proc/[pid]/maps` line.
#[derive(Clone, Debug)]
pub struct Region {
    pub region: MappedRegion,
    pub kind:   Kind,
}

impl Region {
    pub fn start(&self) -> u64 {
        self.region.addr_range().start() as u64
    }

    pub fn end(&self) -> u64 {
        self.region.addr_range().end() as u64
    }

    pub fn contains(
        &self,
        addr: u64,
    ) -> bool {
        addr >= self.start() && addr < self.end()
    }
}

fn is_executable(region: &MappedRegion) -> bool {
    region.perms().to_string().contains('x')
}

/// Ports `memtool::extend::parse_process_maps` + `det_mem_range`: read and
/// classify every region of the target's address space, in ascending
/// address order (the order `/proc/[pid]/maps` is already emitted in).
pub fn read_process_regions(pid: Option<usize>) -> Result<Vec<Region>, Error> {
    let path = paths::proc_pid_maps_path(pid);
    let text = std::fs::read_to_string(&path)?;

    let mut regions = Vec::new();
    for line in text.lines() {
        let region = MappedRegion::try_from(line)?;
        let kind = kind::classify(region.pathname(), is_executable(&region));
        regions.push(Region { region, kind });
    }

    Ok(regions)
}

/// Ports `memtool::extend::parse_process_module`, driven off already
/// classified regions rather than re-deriving kind here.
pub fn derive_static_modules(regions: &[Region]) -> Vec<StaticModule> {
    let triples: Vec<(MappedRegion, Kind, bool)> = regions
        .iter()
        .map(|r| (r.region.clone(), r.kind, is_executable(&r.region)))
        .collect();

    module::derive_modules(&triples)
}

/// Regions whose kind bit is set in `mask` (see [`Kind::bit`] /
/// [`Kind::ALL`]), preserving address order.
pub fn filter_by_kind_mask(
    regions: &[Region],
    mask: u32,
) -> Vec<Region> {
    regions.iter().filter(|r| r.kind.bit() & mask != 0).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_contains_checks_half_open_range() {
        let region = MappedRegion::try_from("00400000-00401000 r-xp 00000000 08:02 1 /bin/x").unwrap();
        let r = Region { kind: Kind::CodeApp, region };
        assert!(r.contains(0x400000));
        assert!(!r.contains(0x401000));
    }
}

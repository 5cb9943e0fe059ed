//! Derives the static module list from a sequence of classified regions.
//!
//! Ports `memtool::extend::parse_process_module`: a run of `DataApp` or
//! `CodeApp` regions becomes one module named after the mapped file's
//! basename; an immediately following `Bss` region becomes a second
//! module named `<basename>:bss`. Modules that share a basename are
//! disambiguated by appending an occurrence count the first time the
//! name repeats, matching the original's `module_map` counter.

use std::collections::HashMap;

use super::{
    kind::Kind,
    maps::MappedRegion,
};

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct StaticModule {
    pub name:  String,
    pub start: u64,
    pub end:   u64,
    pub kind:  Kind,
    /// 1-based occurrence count of `name` among same-named modules, used
    /// to disambiguate modules that share a basename (e.g. two loaded
    /// copies of the same shared object).
    pub index: usize,
}

fn basename(pathname: &str) -> &str {
    pathname.rsplit('/').next().unwrap_or(pathname)
}

pub fn derive_modules(
    regions: &[(MappedRegion, Kind, bool)],
) -> Vec<StaticModule> {
    let mut modules = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();

    let mut prev: Option<(&MappedRegion, Kind)> = None;

    for (region, kind, executable) in regions {
        let _ = executable;

        if kind.is_static() {
            let name = basename(region.pathname().as_str()).to_string();
            let count = counts.entry(name.clone()).or_insert(0);
            *count += 1;

            modules.push(StaticModule {
                name,
                start: region.addr_range().start() as u64,
                end: region.addr_range().end() as u64,
                kind: *kind,
                index: *count,
            });
        } else if kind.is_bss() {
            if let Some((prev_region, prev_kind)) = prev {
                if prev_kind.is_static() {
                    let name = format!("{}:bss", basename(prev_region.pathname().as_str()));
                    let count = counts.entry(name.clone()).or_insert(0);
                    *count += 1;

                    modules.push(StaticModule {
                        name,
                        start: region.addr_range().start() as u64,
                        end: region.addr_range().end() as u64,
                        kind: *kind,
                        index: *count,
                    });
                }
            }
        }

        prev = Some((region, *kind));
    }

    modules
}

#[cfg(test)]
mod tests {
    use std::convert::TryFrom;

    use super::*;
    use crate::mem::{
        kind,
        maps::MappedRegion,
    };

    fn region(line: &str) -> MappedRegion {
        MappedRegion::try_from(line).unwrap()
    }

    #[test]
    fn code_region_followed_by_bss_yields_two_modules() {
        let lib = region("7fa200000000-7fa200010000 r-xp 00000000 08:02 1 /data/app/com.example-1/lib/arm64/libfoo.so");
        let bss = region("7fa200010000-7fa200012000 rw-p 00000000 00:00 0 [anon:.bss]");

        let lib_kind = kind::classify(lib.pathname(), true);
        let bss_kind = kind::classify(bss.pathname(), false);

        let regions = vec![(lib, lib_kind, true), (bss, bss_kind, false)];
        let modules = derive_modules(&regions);

        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].name, "libfoo.so");
        assert_eq!(modules[1].name, "libfoo.so:bss");
    }

    #[test]
    fn repeated_basenames_get_disambiguating_index() {
        let a = region("7fa200000000-7fa200010000 r-xp 00000000 08:02 1 /data/app/com.example-1/lib/arm64/libfoo.so");
        let b = region("7fa300000000-7fa300010000 r-xp 00000000 08:02 1 /data/app/com.example-2/lib/arm64/libfoo.so");

        let ka = kind::classify(a.pathname(), true);
        let kb = kind::classify(b.pathname(), true);

        let modules = derive_modules(&[(a, ka, true), (b, kb, true)]);

        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].index, 1);
        assert_eq!(modules[1].index, 2);
        assert_eq!(modules[0].name, modules[1].name);
    }

    #[test]
    fn bss_without_a_preceding_static_region_is_dropped() {
        let anon = region("7fa200000000-7fa200010000 rw-p 00000000 00:00 0");
        let bss = region("7fa200010000-7fa200012000 rw-p 00000000 00:00 0 [anon:.bss]");

        let ka = kind::classify(anon.pathname(), false);
        let kb = kind::classify(bss.pathname(), false);

        let modules = derive_modules(&[(anon, ka, false), (bss, kb, false)]);
        assert!(modules.is_empty());
    }
}

//! Classification of a mapped region into a coarse memory kind, following
//! the bitflag-style `memsetting` scheme: each region belongs to exactly
//! one kind, but a search can be restricted to a bitmask of kinds.

use super::column::PathName;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum Kind {
    Heap,
    AllocArena,
    Bss,
    DataApp,
    CodeApp,
    CodeSystem,
    Anon,
    Other,
}

impl Kind {
    pub fn bit(self) -> u32 {
        match self {
            Kind::Heap => 1 << 0,
            Kind::AllocArena => 1 << 2,
            Kind::Bss => 1 << 3,
            Kind::DataApp => 1 << 4,
            Kind::Anon => 1 << 5,
            Kind::CodeApp => 1 << 14,
            Kind::CodeSystem => 1 << 15,
            Kind::Other => 1 << 30,
        }
    }

    pub const ALL: u32 = !0;

    /// Is this region one of the static (file-backed, module-bearing)
    /// kinds that can seed a BFS root?
    pub fn is_static(self) -> bool {
        matches!(self, Kind::DataApp | Kind::CodeApp)
    }

    /// `.bss`-shaped anonymous mapping directly trailing a static module.
    pub fn is_bss(self) -> bool {
        matches!(self, Kind::Bss)
    }
}

/// Ports `memtool::extend::det_mem_range`: pathname + execute permission
/// decide the kind of a region.
pub fn classify(
    pathname: &PathName,
    executable: bool,
) -> Kind {
    let name = pathname.as_str();

    if name.is_empty() {
        return Kind::Anon;
    }

    if name == "[heap]" {
        return Kind::Heap;
    }

    if name.starts_with("[anon:libc_malloc") || name.starts_with("[anon:scudo:") {
        return Kind::AllocArena;
    }

    if name.contains("/data/app/") && executable && name.contains(".so") {
        return Kind::CodeApp;
    }

    if name.contains("/system/framework/") {
        return Kind::CodeSystem;
    }

    if name.contains("[anon:.bss]") {
        return Kind::Bss;
    }

    if name.contains("/data/app/") && name.contains(".so") {
        return Kind::DataApp;
    }

    Kind::Other
}

#[cfg(test)]
mod tests {
    use std::convert::TryFrom;

    use super::*;

    fn path(s: &str) -> PathName {
        PathName::try_from(s).unwrap()
    }

    #[test]
    fn anonymous_mapping_with_blank_name() {
        assert_eq!(classify(&path(""), false), Kind::Anon);
    }

    #[test]
    fn heap_pseudo_path() {
        assert_eq!(classify(&path("[heap]"), false), Kind::Heap);
    }

    #[test]
    fn executable_app_library_is_code() {
        assert_eq!(
            classify(&path("/data/app/com.example-1/lib/arm64/libfoo.so"), true),
            Kind::CodeApp
        );
    }

    #[test]
    fn non_executable_app_library_is_data() {
        assert_eq!(
            classify(&path("/data/app/com.example-1/lib/arm64/libfoo.so"), false),
            Kind::DataApp
        );
    }

    #[test]
    fn bss_shadow_anon_region() {
        assert_eq!(classify(&path("[anon:.bss]"), false), Kind::Bss);
    }

    #[test]
    fn unrecognized_path_is_other() {
        assert_eq!(classify(&path("/some/random/file"), false), Kind::Other);
    }
}

use std::path::{
    Path,
    PathBuf,
};

fn pid_to_path(pid: Option<usize>) -> String {
    pid.as_ref().map(ToString::to_string).unwrap_or(String::from("self"))
}


pub fn proc_pid_maps_path(pid: Option<usize>) -> PathBuf {
    Path::new("/").join("proc").join(pid_to_path(pid)).join("maps")
}


pub fn proc_pid_mem_path(pid: Option<usize>) -> PathBuf {
    Path::new("/").join("proc").join(pid_to_path(pid)).join("mem")
}


pub fn proc_pid_comm_path(pid: usize) -> PathBuf {
    Path::new("/").join("proc").join(pid.to_string()).join("comm")
}


pub fn proc_pid_exe_path(pid: usize) -> PathBuf {
    Path::new("/").join("proc").join(pid.to_string()).join("exe")
}


pub fn proc_pid_status_path(pid: usize) -> PathBuf {
    Path::new("/").join("proc").join(pid.to_string()).join("status")
}


pub fn proc_dir() -> &'static Path {
    Path::new("/proc")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_paths_use_self_alias() {
        assert_eq!(proc_pid_maps_path(None), PathBuf::from("/proc/self/maps"));
        assert_eq!(proc_pid_maps_path(Some(42)), PathBuf::from("/proc/42/maps"));
    }

    #[test]
    fn pid_paths_are_numeric() {
        assert_eq!(proc_pid_comm_path(7), PathBuf::from("/proc/7/comm"));
        assert_eq!(proc_pid_exe_path(7), PathBuf::from("/proc/7/exe"));
    }
}

//! Reading another process's virtual memory via `process_vm_readv(2)`.
//!
//! Ports `memtool::base::readv`: a single vectored read from the target's
//! address space into a local buffer, with no ptrace attach required as
//! long as the caller holds `PTRACE_MODE_ATTACH` permission on the pid.

use nix::sys::uio::{
    process_vm_readv,
    IoVec,
    RemoteIoVec,
};
use nix::unistd::Pid;

use crate::error::Error;

/// Abstraction over "read `len` bytes from `addr` in some process", so the
/// scanner and BFS can be exercised against an in-memory fixture instead
/// of a live `/proc` target.
pub trait RemoteMemory {
    fn read_into(
        &self,
        addr: u64,
        buf: &mut [u8],
    ) -> Result<usize, Error>;

    fn read_u64(
        &self,
        addr: u64,
    ) -> Result<u64, Error> {
        let mut buf = [0u8; 8];
        let n = self.read_into(addr, &mut buf)?;
        if n < 8 {
            return Err(Error::remote_read(format!(
                "short read at {:#x}: got {} of 8 bytes",
                addr, n
            )));
        }
        Ok(u64::from_ne_bytes(buf))
    }
}

pub struct ProcessMemory {
    pid: Pid,
}

impl ProcessMemory {
    pub fn new(pid: usize) -> Self {
        ProcessMemory { pid: Pid::from_raw(pid as i32) }
    }
}

impl RemoteMemory for ProcessMemory {
    fn read_into(
        &self,
        addr: u64,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        let local = [IoVec::from_mut_slice(buf)];
        let remote = [RemoteIoVec { base: addr as usize, len: buf.len() }];

        let n = process_vm_readv(self.pid, &local, &remote)
            .map_err(|source| Error::remote_read(format!("process_vm_readv at {:#x} failed: {}", addr, source)))?;
        Ok(n)
    }
}

/// Ports `memtool::base::read_pointer`: walk `start + offsets[0]`, then
/// repeatedly dereference and add the next offset.
pub fn read_pointer_chain(
    remote: &dyn RemoteMemory,
    start: u64,
    offsets: &[u64],
) -> Result<u64, Error> {
    let mut address = start.wrapping_add(*offsets.first().unwrap_or(&0));

    for offset in offsets.iter().skip(1) {
        address = remote.read_u64(address)?;
        address = address.wrapping_add(*offset);
    }

    Ok(address)
}

#[cfg(test)]
mod tests {
    use std::{
        cell::RefCell,
        collections::HashMap,
    };

    use super::*;

    struct FakeMemory {
        words: RefCell<HashMap<u64, u64>>,
    }

    impl RemoteMemory for FakeMemory {
        fn read_into(
            &self,
            addr: u64,
            buf: &mut [u8],
        ) -> Result<usize, Error> {
            let words = self.words.borrow();
            let value = words.get(&addr).copied().ok_or_else(|| Error::remote_read("unmapped address"))?;
            let bytes = value.to_ne_bytes();
            let n = buf.len().min(bytes.len());
            buf[..n].copy_from_slice(&bytes[..n]);
            Ok(n)
        }
    }

    #[test]
    fn single_offset_chain_is_pure_addition() {
        let mem = FakeMemory { words: RefCell::new(HashMap::new()) };
        let addr = read_pointer_chain(&mem, 0x1000, &[0x10]).unwrap();
        assert_eq!(addr, 0x1010);
    }

    #[test]
    fn multi_offset_chain_dereferences_between_hops() {
        let mut words = HashMap::new();
        words.insert(0x1010, 0x2000);
        words.insert(0x2008, 0x3000); // unused, sanity filler
        let mem = FakeMemory { words: RefCell::new(words) };

        let addr = read_pointer_chain(&mem, 0x1000, &[0x10, 0x8]).unwrap();
        assert_eq!(addr, 0x2008);
    }
}

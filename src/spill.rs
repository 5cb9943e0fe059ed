//! `SpillQueue<T>`: a growable, `mmap`-backed array of `Copy` records.
//!
//! Ports `utils::mapqueue<T>`. Every growth re-maps an anonymous tempfile
//! (`tempfile::tempfile()`, unlinked immediately by the OS on most
//! platforms) rather than growing a heap `Vec`, so a multi-gigabyte
//! pointer table or BFS frontier never has to fit inside process heap
//! memory at once — the kernel pages it in and out of the backing file
//! as needed. Android's `ashmem` fallback from the original is not
//! ported: a plain tmpfile mapping is sufficient on Linux and Android
//! both provide `/proc/[pid]/maps`-visible tmpfs-backed tempfiles.

use std::{
    convert::TryInto,
    marker::PhantomData,
    os::unix::io::AsRawFd,
    ptr::NonNull,
};

use nix::{
    sys::mman::{
        mmap,
        munmap,
        MapFlags,
        ProtFlags,
    },
    unistd::ftruncate,
};

use crate::{
    deps::log::debug,
    error::Error,
};

fn grow_capacity(
    capacity: usize,
    requested: usize,
) -> usize {
    let doubled = if capacity == 0 { 8 } else { capacity + capacity / 2 };
    doubled.max(requested)
}

/// A mmap-backed growable array of `T`. `T` must be `Copy` and have no
/// drop glue: elements live in raw mapped memory and are never dropped
/// individually, matching the original's `memcpy`-only element lifecycle.
pub struct SpillQueue<T: Copy> {
    file:     std::fs::File,
    ptr:      Option<NonNull<T>>,
    len:      usize,
    capacity: usize,
    _marker:  PhantomData<T>,
}

unsafe impl<T: Copy + Send> Send for SpillQueue<T> {}

impl<T: Copy> SpillQueue<T> {
    pub fn new() -> Result<Self, Error> {
        Ok(SpillQueue {
            file:     tempfile::tempfile()?,
            ptr:      None,
            len:      0,
            capacity: 0,
            _marker:  PhantomData,
        })
    }

    pub fn with_capacity(capacity: usize) -> Result<Self, Error> {
        let mut queue = Self::new()?;
        queue.reserve(capacity)?;
        Ok(queue)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn unmap(&mut self) -> Result<(), Error> {
        if let Some(ptr) = self.ptr.take() {
            let byte_len = self.capacity * std::mem::size_of::<T>();
            unsafe {
                munmap(ptr.as_ptr() as *mut std::ffi::c_void, byte_len)?;
            }
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Drops the mapping entirely, returning the queue to its freshly
    /// allocated state. Ports `mapqueue::shrink`.
    pub fn shrink(&mut self) -> Result<(), Error> {
        self.unmap()?;
        self.len = 0;
        self.capacity = 0;
        Ok(())
    }

    pub fn reserve(
        &mut self,
        new_capacity: usize,
    ) -> Result<(), Error> {
        if new_capacity <= self.capacity {
            return Ok(());
        }

        let elem_size = std::mem::size_of::<T>();
        let new_byte_len: u64 = (new_capacity * elem_size)
            .try_into()
            .map_err(|_| Error::out_of_memory("requested spill queue capacity overflows u64"))?;

        ftruncate(self.file.as_raw_fd(), new_byte_len as i64)?;

        let new_ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                new_byte_len as usize,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                self.file.as_raw_fd(),
                0,
            )?
        };

        debug!("spill queue grew to {} elements ({} bytes)", new_capacity, new_byte_len);

        self.unmap()?;
        self.ptr = NonNull::new(new_ptr as *mut T);
        self.capacity = new_capacity;

        Ok(())
    }

    fn as_ptr(&self) -> *const T {
        self.ptr.map(NonNull::as_ptr).unwrap_or(std::ptr::NonNull::dangling().as_ptr()) as *const T
    }

    fn as_mut_ptr(&mut self) -> *mut T {
        self.ptr.map(NonNull::as_ptr).unwrap_or(std::ptr::NonNull::dangling().as_ptr())
    }

    pub fn as_slice(&self) -> &[T] {
        if self.len == 0 {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len) }
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        if self.len == 0 {
            &mut []
        } else {
            unsafe { std::slice::from_raw_parts_mut(self.as_mut_ptr(), self.len) }
        }
    }

    pub fn get(
        &self,
        index: usize,
    ) -> Option<&T> {
        self.as_slice().get(index)
    }

    pub fn push(
        &mut self,
        value: T,
    ) -> Result<(), Error> {
        if self.len == self.capacity {
            self.reserve(grow_capacity(self.capacity, self.len + 1))?;
        }

        unsafe {
            self.as_mut_ptr().add(self.len).write(value);
        }
        self.len += 1;
        Ok(())
    }

    pub fn extend_from_slice(
        &mut self,
        values: &[T],
    ) -> Result<(), Error> {
        if self.len + values.len() > self.capacity {
            self.reserve(grow_capacity(self.capacity, self.len + values.len()))?;
        }

        unsafe {
            std::ptr::copy_nonoverlapping(values.as_ptr(), self.as_mut_ptr().add(self.len), values.len());
        }
        self.len += values.len();
        Ok(())
    }

    /// Takes ownership of `other`'s backing mapping, replacing this
    /// queue's contents. Ports `mapqueue::swap` used by the BFS to hand a
    /// freshly built frontier off to the next level without copying.
    pub fn adopt(
        &mut self,
        mut other: SpillQueue<T>,
    ) -> Result<(), Error> {
        self.unmap()?;
        self.file = std::mem::replace(&mut other.file, tempfile::tempfile()?);
        self.ptr = other.ptr.take();
        self.len = other.len;
        self.capacity = other.capacity;
        other.len = 0;
        other.capacity = 0;
        Ok(())
    }
}

impl<T: Copy> Drop for SpillQueue<T> {
    fn drop(&mut self) {
        if let Err(err) = self.unmap() {
            debug!("failed to unmap spill queue on drop: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_read_back() {
        let mut q: SpillQueue<u64> = SpillQueue::new().unwrap();
        for i in 0..20u64 {
            q.push(i).unwrap();
        }
        assert_eq!(q.len(), 20);
        assert_eq!(q.as_slice(), (0..20u64).collect::<Vec<_>>().as_slice());
    }

    #[test]
    fn capacity_grows_geometrically() {
        let mut q: SpillQueue<u32> = SpillQueue::new().unwrap();
        assert_eq!(q.capacity(), 0);
        q.push(1).unwrap();
        assert_eq!(q.capacity(), 8);
        for i in 0..8 {
            q.push(i).unwrap();
        }
        assert!(q.capacity() > 8);
    }

    #[test]
    fn clear_keeps_capacity_but_resets_len() {
        let mut q: SpillQueue<u8> = SpillQueue::with_capacity(16).unwrap();
        q.push(1).unwrap();
        q.clear();
        assert_eq!(q.len(), 0);
        assert_eq!(q.capacity(), 16);
    }

    #[test]
    fn extend_from_slice_appends_in_order() {
        let mut q: SpillQueue<u64> = SpillQueue::new().unwrap();
        q.extend_from_slice(&[1, 2, 3]).unwrap();
        q.extend_from_slice(&[4, 5]).unwrap();
        assert_eq!(q.as_slice(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn adopt_transfers_contents() {
        let mut a: SpillQueue<u64> = SpillQueue::new().unwrap();
        let mut b: SpillQueue<u64> = SpillQueue::new().unwrap();
        b.extend_from_slice(&[9, 8, 7]).unwrap();

        a.adopt(b).unwrap();
        assert_eq!(a.as_slice(), &[9, 8, 7]);
    }
}

use std::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::AtomicI64;

use memmap2::MmapMut;
use tracing::debug;

use crate::CACHE_LINE_SIZE;
use crate::error::{CountersError, Result};

/// Size of a counter value in bytes.
pub const SIZE_OF_I64: usize = size_of::<i64>();

/// A span of memory that may be read and written through atomics.
///
/// # Safety
///
/// Implementors must guarantee that `as_ptr()` returns the same pointer for
/// the whole life of the value, that `capacity()` bytes starting there are
/// valid for reads and writes, and that the memory is only ever accessed
/// through atomic operations by this crate (so handing it to several threads
/// is sound).
pub unsafe trait MemoryRegion: Send + Sync {
    /// Base address of the region.
    fn as_ptr(&self) -> *mut u8;

    /// Length of the region in bytes.
    fn capacity(&self) -> usize;

    /// Check that `length` bytes starting at `offset` fit inside the region.
    fn bounds_check(&self, offset: usize, length: usize) -> Result<()> {
        let capacity = self.capacity();
        match offset.checked_add(length) {
            Some(end) if end <= capacity => Ok(()),
            _ => Err(CountersError::OutOfBounds {
                offset,
                length,
                capacity,
            }),
        }
    }
}

unsafe impl<R: MemoryRegion + ?Sized> MemoryRegion for Arc<R> {
    fn as_ptr(&self) -> *mut u8 {
        (**self).as_ptr()
    }

    fn capacity(&self) -> usize {
        (**self).capacity()
    }
}

/// Resolve the 8-byte counter value at `offset`, checking bounds and alignment.
pub(crate) fn atomic_i64_at<R: MemoryRegion + ?Sized>(
    region: &R,
    offset: usize,
) -> Result<NonNull<AtomicI64>> {
    region.bounds_check(offset, SIZE_OF_I64)?;

    let address = region.as_ptr().wrapping_add(offset);
    if (address as usize) % align_of::<AtomicI64>() != 0 {
        return Err(CountersError::Misaligned {
            offset,
            alignment: align_of::<AtomicI64>(),
        });
    }

    NonNull::new(address as *mut AtomicI64)
        .ok_or_else(|| CountersError::InvalidArgument("region has a null base address".into()))
}

/// Zeroed, cache-line aligned heap memory.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(CountersError::InvalidArgument(
                "buffer capacity must be non-zero".into(),
            ));
        }

        let layout = Layout::from_size_align(capacity, *CACHE_LINE_SIZE).map_err(|err| {
            CountersError::InvalidArgument(format!("buffer of {capacity} bytes: {err}"))
        })?;

        let raw = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            handle_alloc_error(layout);
        };

        Ok(AlignedBuffer { ptr, layout })
    }
}

unsafe impl MemoryRegion for AlignedBuffer {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn capacity(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl std::fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("capacity", &self.layout.size())
            .finish()
    }
}

/// A file mapped into memory and shared with every other mapping of it.
pub struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
    path: PathBuf,
    map: MmapMut,
}

unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Create (or truncate) `path` to `len` zeroed bytes and map it.
    pub fn create(path: impl AsRef<Path>, len: usize) -> Result<Self> {
        let path = path.as_ref();
        if len == 0 {
            return Err(CountersError::InvalidArgument(
                "mapped region length must be non-zero".into(),
            ));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(len as u64)?;

        let map = unsafe { MmapMut::map_mut(&file)? };
        debug!(path = %path.display(), len, "created mapped counters region");
        Ok(Self::from_map(path, map))
    }

    /// Map an existing file in full.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Err(CountersError::InvalidArgument(format!(
                "{} is empty",
                path.display()
            )));
        }

        let map = unsafe { MmapMut::map_mut(&file)? };
        debug!(path = %path.display(), len, "opened mapped counters region");
        Ok(Self::from_map(path, map))
    }

    fn from_map(path: &Path, mut map: MmapMut) -> Self {
        let len = map.len();
        // Mappings are page aligned and never null
        let ptr = NonNull::new(map.as_mut_ptr()).unwrap_or(NonNull::dangling());

        MappedRegion {
            ptr,
            len,
            path: path.to_path_buf(),
            map,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush outstanding writes to the backing file.
    pub fn flush(&self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }
}

unsafe impl MemoryRegion for MappedRegion {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn capacity(&self) -> usize {
        self.len
    }
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("path", &self.path)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn aligned_buffer_is_zeroed_and_aligned() {
        let buffer = AlignedBuffer::new(1024).unwrap();
        assert_eq!(buffer.capacity(), 1024);
        assert_eq!(buffer.as_ptr() as usize % *CACHE_LINE_SIZE, 0);

        let bytes = unsafe { std::slice::from_raw_parts(buffer.as_ptr(), 1024) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(
            AlignedBuffer::new(0),
            Err(CountersError::InvalidArgument(_))
        ));
    }

    #[test]
    fn bounds_check() {
        let buffer = AlignedBuffer::new(64).unwrap();
        assert!(buffer.bounds_check(0, 64).is_ok());
        assert!(buffer.bounds_check(56, 8).is_ok());
        assert!(matches!(
            buffer.bounds_check(57, 8),
            Err(CountersError::OutOfBounds {
                offset: 57,
                length: 8,
                capacity: 64
            })
        ));
        assert!(buffer.bounds_check(usize::MAX, 8).is_err());
    }

    #[test]
    fn atomic_slot_resolution() {
        let buffer = AlignedBuffer::new(64).unwrap();

        let slot = atomic_i64_at(&buffer, 8).unwrap();
        unsafe { slot.as_ref().store(5, Ordering::Release) };

        let again = atomic_i64_at(&buffer, 8).unwrap();
        assert_eq!(unsafe { again.as_ref().load(Ordering::Acquire) }, 5);

        assert!(matches!(
            atomic_i64_at(&buffer, 4),
            Err(CountersError::Misaligned { offset: 4, .. })
        ));
        assert!(matches!(
            atomic_i64_at(&buffer, 64),
            Err(CountersError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn mapped_region_is_shared_between_mappings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counters.dat");

        let writer = MappedRegion::create(&path, 4096).unwrap();
        let reader = MappedRegion::open(&path).unwrap();
        assert_eq!(reader.capacity(), 4096);
        assert_eq!(reader.path(), path.as_path());

        let write_slot = atomic_i64_at(&writer, 128).unwrap();
        let read_slot = atomic_i64_at(&reader, 128).unwrap();

        unsafe { write_slot.as_ref().store(0x5eed, Ordering::Release) };
        assert_eq!(unsafe { read_slot.as_ref().load(Ordering::Acquire) }, 0x5eed);

        writer.flush().unwrap();
    }

    #[test]
    fn opening_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = MappedRegion::open(dir.path().join("absent.dat"));
        assert!(matches!(result, Err(CountersError::Io(_))));
    }
}

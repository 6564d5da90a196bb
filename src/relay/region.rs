use std::io;
use std::ptr::NonNull;
use std::sync::atomic::AtomicU8;

/// A named, fixed-size shared memory mapping.
///
/// The mapping is only ever touched through [`AtomicU8`] cells, so a writer in
/// one process and a reader in another never race on plain memory. Freshly
/// created regions are zero-filled, which is an empty, NUL-terminated text.
pub struct SharedRegion {
    name: String,
    ptr: NonNull<u8>,
    len: usize,
    owner: bool,
    #[cfg(windows)]
    handle: windows_sys::Win32::Foundation::HANDLE,
}

// SAFETY: the mapping lives until drop and all access goes through atomics.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Creates a new region. Fails if one with this name already exists.
    pub fn create(name: &str, len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "relay region must not be empty",
            ));
        }
        sys::create(name, len)
    }

    /// Opens a region created by another process.
    pub fn open(name: &str, len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "relay region must not be empty",
            ));
        }
        sys::open(name, len)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub(super) fn cells(&self) -> &[AtomicU8] {
        // SAFETY: `ptr` maps `len` bytes for the lifetime of `self`, and
        // `AtomicU8` has the same layout as `u8`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().cast::<AtomicU8>(), self.len) }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        sys::unmap(self);
    }
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("name", &self.name)
            .field("len", &self.len)
            .field("owner", &self.owner)
            .finish()
    }
}

#[cfg(unix)]
mod sys {
    use std::ffi::CString;
    use std::io;
    use std::ptr::NonNull;

    use super::SharedRegion;

    fn shm_name(name: &str) -> io::Result<CString> {
        CString::new(format!("/{name}")).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "region name contains NUL")
        })
    }

    pub fn create(name: &str, len: usize) -> io::Result<SharedRegion> {
        map(name, len, true)
    }

    pub fn open(name: &str, len: usize) -> io::Result<SharedRegion> {
        map(name, len, false)
    }

    fn map(name: &str, len: usize, create: bool) -> io::Result<SharedRegion> {
        let c_name = shm_name(name)?;
        let flags = if create {
            libc::O_CREAT | libc::O_EXCL | libc::O_RDWR
        } else {
            libc::O_RDWR
        };

        // SAFETY: plain libc calls on a NUL-terminated name; every failure
        // path closes the descriptor and unlinks what this call created.
        unsafe {
            let fd = libc::shm_open(c_name.as_ptr(), flags, 0o600);
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }

            let sized = if create {
                libc::ftruncate(fd, len as libc::off_t) == 0
            } else {
                let mut st: libc::stat = std::mem::zeroed();
                libc::fstat(fd, &mut st) == 0 && st.st_size as usize >= len
            };
            if !sized {
                let err = if create {
                    io::Error::last_os_error()
                } else {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("region {name} is smaller than {len} bytes"),
                    )
                };
                libc::close(fd);
                if create {
                    libc::shm_unlink(c_name.as_ptr());
                }
                return Err(err);
            }

            let addr = libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            );
            let map_err = io::Error::last_os_error();
            libc::close(fd);

            if addr == libc::MAP_FAILED {
                if create {
                    libc::shm_unlink(c_name.as_ptr());
                }
                return Err(map_err);
            }

            let ptr = NonNull::new(addr.cast::<u8>())
                .ok_or_else(|| io::Error::other("mmap returned a null mapping"))?;
            Ok(SharedRegion {
                name: name.to_string(),
                ptr,
                len,
                owner: create,
            })
        }
    }

    pub fn unmap(region: &mut SharedRegion) {
        // SAFETY: the pointer and length come from a successful mmap.
        unsafe {
            libc::munmap(region.ptr.as_ptr().cast(), region.len);
        }
        if region.owner {
            if let Ok(c_name) = shm_name(&region.name) {
                // SAFETY: NUL-terminated name.
                unsafe {
                    libc::shm_unlink(c_name.as_ptr());
                }
            }
        }
    }
}

#[cfg(windows)]
mod sys {
    use std::io;
    use std::ptr::NonNull;

    use windows_sys::Win32::Foundation::{
        CloseHandle, ERROR_ALREADY_EXISTS, GetLastError, HANDLE, INVALID_HANDLE_VALUE,
    };
    use windows_sys::Win32::System::Memory::{
        CreateFileMappingW, FILE_MAP_ALL_ACCESS, MEMORY_MAPPED_VIEW_ADDRESS, MapViewOfFile,
        OpenFileMappingW, PAGE_READWRITE, UnmapViewOfFile,
    };

    use super::SharedRegion;

    fn wide(name: &str) -> Vec<u16> {
        name.encode_utf16().chain(std::iter::once(0)).collect()
    }

    pub fn create(name: &str, len: usize) -> io::Result<SharedRegion> {
        let wname = wide(name);
        let size = len as u64;
        // SAFETY: pagefile-backed mapping with a NUL-terminated wide name.
        let handle = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                std::ptr::null(),
                PAGE_READWRITE,
                (size >> 32) as u32,
                size as u32,
                wname.as_ptr(),
            )
        };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: reads the thread's last error right after the call above.
        if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
            unsafe { CloseHandle(handle) };
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("region {name} already exists"),
            ));
        }
        view(name, len, handle, true)
    }

    pub fn open(name: &str, len: usize) -> io::Result<SharedRegion> {
        let wname = wide(name);
        // SAFETY: NUL-terminated wide name.
        let handle = unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS, 0, wname.as_ptr()) };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        view(name, len, handle, false)
    }

    fn view(name: &str, len: usize, handle: HANDLE, owner: bool) -> io::Result<SharedRegion> {
        // SAFETY: `handle` is a valid mapping handle owned by this function.
        let view = unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, len) };
        match NonNull::new(view.Value.cast::<u8>()) {
            Some(ptr) => Ok(SharedRegion {
                name: name.to_string(),
                ptr,
                len,
                owner,
                handle,
            }),
            None => {
                let err = io::Error::last_os_error();
                unsafe { CloseHandle(handle) };
                Err(err)
            }
        }
    }

    pub fn unmap(region: &mut SharedRegion) {
        // SAFETY: view and handle come from a successful `view` call.
        unsafe {
            UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS {
                Value: region.ptr.as_ptr().cast(),
            });
            CloseHandle(region.handle);
        }
    }
}

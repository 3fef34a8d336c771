//! C ABI
//!
//! A result crosses the boundary as one heap record owned by the caller until it is
//! handed back to [`modhash_free`]. Every allocation behind the record, the record
//! included, goes through the [`ModHashAllocator`] stored inside it, so the release
//! path never needs anything but the record itself. The layout is mirrored in
//! `include/modhash.h`.

use crate::error::{Error, Result};
use crate::extract::{ExtractMode, ExtractOptions, Extraction, Extractor};
use crate::metadata::SampleRecord;
use crate::module::Tuning;
use bitflags::bitflags;
use std::alloc::{self, Layout};
use std::ffi::{c_char, c_void, CStr};
use std::mem;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::ptr::{self, NonNull};
use std::slice;

bitflags! {
    /// Options accepted by the `_ex` entry points
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct HashFlags: u32 {
        /// Effect-aware traversal, sample records and instrument names
        const EXTENDED = 0x01;
        /// Per-cell trace events on target `modhash::cells`
        const VERBOSE = 0x02;
    }
}

pub const MODHASH_EXTENDED: u32 = HashFlags::EXTENDED.bits();
pub const MODHASH_VERBOSE: u32 = HashFlags::VERBOSE.bits();

pub const MODHASH_STATUS_OK: i32 = 0;
/// The sentinel cell was found; `hash` is 1 and only `channel_count` is filled in
pub const MODHASH_STATUS_SENTINEL: i32 = 1;

impl HashFlags {
    fn options(self) -> ExtractOptions {
        ExtractOptions {
            mode: if self.contains(HashFlags::EXTENDED) {
                ExtractMode::Extended
            } else {
                ExtractMode::Basic
            },
            verbose: self.contains(HashFlags::VERBOSE),
        }
    }
}

pub type AllocFn = unsafe extern "C" fn(size: usize, user_data: *mut c_void) -> *mut c_void;
pub type FreeFn = unsafe extern "C" fn(ptr: *mut c_void, user_data: *mut c_void);

/// Allocation strategy for a result record.
///
/// `alloc` must return memory aligned for any C type (as `malloc` does) or NULL.
/// A NULL table, or one missing either function, selects the system allocator.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ModHashAllocator {
    pub alloc: Option<AllocFn>,
    pub free: Option<FreeFn>,
    pub user_data: *mut c_void,
}

const SYSTEM_HEADER: usize = 16;

unsafe extern "C" fn system_alloc(size: usize, _user_data: *mut c_void) -> *mut c_void {
    let Some(total) = size.checked_add(SYSTEM_HEADER) else {
        return ptr::null_mut();
    };
    let Ok(layout) = Layout::from_size_align(total, SYSTEM_HEADER) else {
        return ptr::null_mut();
    };
    let base = alloc::alloc_zeroed(layout);
    if base.is_null() {
        return ptr::null_mut();
    }
    // The block size lives in front of the returned pointer
    (base as *mut usize).write(total);
    base.add(SYSTEM_HEADER) as *mut c_void
}

unsafe extern "C" fn system_free(ptr: *mut c_void, _user_data: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    let base = (ptr as *mut u8).sub(SYSTEM_HEADER);
    let total = (base as *const usize).read();
    alloc::dealloc(base, Layout::from_size_align_unchecked(total, SYSTEM_HEADER));
}

impl ModHashAllocator {
    pub fn system() -> Self {
        Self {
            alloc: Some(system_alloc),
            free: Some(system_free),
            user_data: ptr::null_mut(),
        }
    }

    /// # Safety
    /// `table` must be NULL or point to a valid allocator table.
    unsafe fn from_ptr(table: *const ModHashAllocator) -> Self {
        match table.as_ref() {
            Some(table) if table.alloc.is_some() && table.free.is_some() => *table,
            _ => Self::system(),
        }
    }

    fn allocate(&self, size: usize) -> Result<NonNull<c_void>> {
        let alloc = self.alloc.ok_or(Error::Allocation(size))?;
        // SAFETY: the function pointer comes from the caller's table or is ours
        let ptr = unsafe { alloc(size.max(1), self.user_data) };
        NonNull::new(ptr).ok_or(Error::Allocation(size))
    }

    unsafe fn release<T>(&self, ptr: *mut T) {
        if ptr.is_null() {
            return;
        }
        if let Some(free) = self.free {
            free(ptr as *mut c_void, self.user_data);
        }
    }
}

impl Default for ModHashAllocator {
    fn default() -> Self {
        Self::system()
    }
}

/// One sample record
#[repr(C)]
#[derive(Debug)]
pub struct ModHashSample {
    /// 1-based sample number
    pub id: u32,
    pub name: *mut c_char,
    /// Length in frames
    pub length: u32,
    pub length_bytes: u64,
    pub global_volume: u8,
    pub bits: u8,
    pub stereo: u8,
    pub has_panning: u8,
    pub panning: u16,
    pub volume: u16,
    /// Middle C rate in Hz, 0 when the sample is tuned relatively
    pub frequency: u32,
    pub relative_tone: i8,
    pub fine_tune: i8,
    pub vibrato_type: u8,
    pub vibrato_sweep: u8,
    pub vibrato_depth: u8,
    pub vibrato_rate: u8,
    /// Copy of the payload, NULL when none was loaded
    pub data: *mut u8,
    pub data_len: usize,
}

/// Result record
#[repr(C)]
#[derive(Debug)]
pub struct ModHashData {
    pub hash: u64,
    /// Instrument names then sample names, one per line; NULL unless basic mode
    pub sample_names: *mut c_char,
    pub artist: *mut c_char,
    pub comments: *mut c_char,
    pub channel_count: i32,
    pub status: i32,
    pub title: *mut c_char,
    pub samples: *mut ModHashSample,
    /// Entries in `samples` (0 unless extended mode)
    pub sample_count: usize,
    pub instrument_names: *mut *mut c_char,
    /// Entries in `instrument_names` (0 unless extended mode)
    pub instrument_count: usize,
    /// Samples in the module, in every mode
    pub num_samples: usize,
    /// Instruments in the module, in every mode
    pub num_instruments: usize,
    /// Allocator that owns every pointer above and the record itself
    pub allocator: ModHashAllocator,
}

/// Allocations made while a record is being built; released unless committed
struct Staging {
    allocator: ModHashAllocator,
    live: Vec<*mut c_void>,
}

impl Staging {
    fn new(allocator: ModHashAllocator) -> Self {
        Self {
            allocator,
            live: Vec::new(),
        }
    }

    fn alloc_bytes(&mut self, size: usize, align: usize) -> Result<*mut u8> {
        let ptr = self.allocator.allocate(size)?.as_ptr();
        self.live.push(ptr);
        if (ptr as usize) % align != 0 {
            tracing::warn!(size, align, "allocator returned a misaligned block");
            return Err(Error::Allocation(size));
        }
        Ok(ptr as *mut u8)
    }

    /// Copy `items` into one block; empty input stays NULL
    fn alloc_array<T>(&mut self, items: Vec<T>) -> Result<*mut T> {
        if items.is_empty() {
            return Ok(ptr::null_mut());
        }
        let size = mem::size_of::<T>()
            .checked_mul(items.len())
            .ok_or(Error::Allocation(usize::MAX))?;
        let base = self.alloc_bytes(size, mem::align_of::<T>())? as *mut T;
        for (i, item) in items.into_iter().enumerate() {
            // SAFETY: the block holds `len` properly aligned elements
            unsafe { base.add(i).write(item) };
        }
        Ok(base)
    }

    /// NUL-terminated copy, cut at the first interior NUL
    fn alloc_str(&mut self, text: &str) -> Result<*mut c_char> {
        let bytes = text.as_bytes();
        let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        let ptr = self.alloc_bytes(len + 1, 1)?;
        // SAFETY: the block is `len + 1` bytes long
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, len);
            ptr.add(len).write(0);
        }
        Ok(ptr as *mut c_char)
    }

    fn alloc_data(&mut self, data: &[u8]) -> Result<*mut u8> {
        if data.is_empty() {
            return Ok(ptr::null_mut());
        }
        let ptr = self.alloc_bytes(data.len(), 1)?;
        // SAFETY: the block is `data.len()` bytes long
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len()) };
        Ok(ptr)
    }

    fn commit(mut self) {
        self.live.clear();
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        for ptr in self.live.drain(..).rev() {
            // SAFETY: every entry came from this allocator and was never handed out
            unsafe { self.allocator.release(ptr) };
        }
    }
}

impl ModHashSample {
    fn stage(record: &SampleRecord, staging: &mut Staging) -> Result<Self> {
        let (frequency, relative_tone, fine_tune) = match record.tuning {
            Tuning::Frequency(hz) => (hz, 0, 0),
            Tuning::Relative {
                relative_tone,
                fine_tune,
            } => (0, relative_tone, fine_tune),
        };
        Ok(Self {
            id: record.id,
            name: staging.alloc_str(&record.name)?,
            length: record.length,
            length_bytes: record.length_bytes,
            global_volume: record.global_volume,
            bits: record.bits,
            stereo: record.stereo as u8,
            has_panning: record.panning.is_some() as u8,
            panning: record.panning.unwrap_or(0),
            volume: record.volume,
            frequency,
            relative_tone,
            fine_tune,
            vibrato_type: record.vibrato.kind,
            vibrato_sweep: record.vibrato.sweep,
            vibrato_depth: record.vibrato.depth,
            vibrato_rate: record.vibrato.rate,
            data: staging.alloc_data(&record.data)?,
            data_len: record.data.len(),
        })
    }
}

fn build_record(extraction: &Extraction, allocator: ModHashAllocator) -> Result<*mut ModHashData> {
    let mut staging = Staging::new(allocator);
    let bundle = &extraction.bundle;

    let (title, artist, comments) = if extraction.is_sentinel() {
        (ptr::null_mut(), ptr::null_mut(), ptr::null_mut())
    } else {
        (
            staging.alloc_str(&bundle.title)?,
            staging.alloc_str(&bundle.artist)?,
            staging.alloc_str(&bundle.comments)?,
        )
    };
    let sample_names = match &bundle.sample_names {
        Some(blob) => staging.alloc_str(blob)?,
        None => ptr::null_mut(),
    };

    let mut names = Vec::with_capacity(bundle.instrument_names.len());
    for name in &bundle.instrument_names {
        names.push(staging.alloc_str(name)?);
    }
    let instrument_count = names.len();
    let instrument_names = staging.alloc_array(names)?;

    let mut samples = Vec::with_capacity(bundle.samples.len());
    for record in &bundle.samples {
        samples.push(ModHashSample::stage(record, &mut staging)?);
    }
    let sample_count = samples.len();
    let samples = staging.alloc_array(samples)?;

    let record = ModHashData {
        hash: bundle.fingerprint,
        sample_names,
        artist,
        comments,
        channel_count: i32::try_from(bundle.channel_count).unwrap_or(i32::MAX),
        status: if extraction.is_sentinel() {
            MODHASH_STATUS_SENTINEL
        } else {
            MODHASH_STATUS_OK
        },
        title,
        samples,
        sample_count,
        instrument_names,
        instrument_count,
        num_samples: bundle.sample_count,
        num_instruments: bundle.instrument_count,
        allocator,
    };
    let record = staging.alloc_array(vec![record])?;
    staging.commit();
    Ok(record)
}

fn hash_with<F>(flags: u32, allocator: *const ModHashAllocator, load: F) -> *mut ModHashData
where
    F: FnOnce(&Extractor) -> Result<Extraction>,
{
    // SAFETY: callers pass NULL or a valid table
    let allocator = unsafe { ModHashAllocator::from_ptr(allocator) };
    let extractor = Extractor::new(HashFlags::from_bits_truncate(flags).options());

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let extraction = load(&extractor)?;
        build_record(&extraction, allocator)
    }));
    match result {
        Ok(Ok(record)) => record,
        Ok(Err(err)) => {
            tracing::debug!(error = %err, "no fingerprint produced");
            ptr::null_mut()
        }
        Err(_) => {
            tracing::error!("panic while fingerprinting");
            ptr::null_mut()
        }
    }
}

unsafe fn path_from_c(path: *const c_char) -> Option<PathBuf> {
    if path.is_null() {
        return None;
    }
    let bytes = CStr::from_ptr(path).to_bytes();
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        Some(PathBuf::from(std::ffi::OsStr::from_bytes(bytes)))
    }
    #[cfg(not(unix))]
    {
        std::str::from_utf8(bytes).ok().map(PathBuf::from)
    }
}

/// Fingerprint a file in basic mode with the system allocator.
///
/// Returns NULL when the file cannot be read or decoded.
///
/// # Safety
/// `path` must be NULL or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn modhash_hash_file(path: *const c_char) -> *mut ModHashData {
    modhash_hash_file_ex(path, 0, ptr::null())
}

/// Fingerprint a file with explicit flags and allocator (NULL for the system one)
///
/// # Safety
/// `path` must be NULL or a valid NUL-terminated string; `allocator` must be NULL or
/// point to a valid table.
#[no_mangle]
pub unsafe extern "C" fn modhash_hash_file_ex(
    path: *const c_char,
    flags: u32,
    allocator: *const ModHashAllocator,
) -> *mut ModHashData {
    let Some(path) = path_from_c(path) else {
        return ptr::null_mut();
    };
    hash_with(flags, allocator, |extractor| extractor.extract_file(&path))
}

/// Fingerprint an in-memory module
///
/// # Safety
/// `data` must point to `len` readable bytes (it may be NULL when `len` is 0);
/// `allocator` must be NULL or point to a valid table.
#[no_mangle]
pub unsafe extern "C" fn modhash_hash_buffer(
    data: *const u8,
    len: usize,
    flags: u32,
    allocator: *const ModHashAllocator,
) -> *mut ModHashData {
    let bytes: &[u8] = if data.is_null() {
        if len != 0 {
            return ptr::null_mut();
        }
        &[]
    } else {
        slice::from_raw_parts(data, len)
    };
    hash_with(flags, allocator, |extractor| extractor.extract_bytes(bytes))
}

/// Release a record and everything it owns. NULL is ignored.
///
/// # Safety
/// `data` must be NULL or a record returned by this library that has not been freed.
#[no_mangle]
pub unsafe extern "C" fn modhash_free(data: *mut ModHashData) {
    let Some(record) = data.as_ref() else {
        return;
    };
    let allocator = record.allocator;

    allocator.release(record.sample_names);
    allocator.release(record.artist);
    allocator.release(record.comments);
    allocator.release(record.title);

    if !record.samples.is_null() {
        for sample in slice::from_raw_parts(record.samples, record.sample_count) {
            allocator.release(sample.name);
            allocator.release(sample.data);
        }
        allocator.release(record.samples);
    }
    if !record.instrument_names.is_null() {
        for &name in slice::from_raw_parts(record.instrument_names, record.instrument_count) {
            allocator.release(name);
        }
        allocator.release(record.instrument_names);
    }

    allocator.release(data);
}

unsafe fn lossy(ptr: *const c_char) -> Option<String> {
    (!ptr.is_null()).then(|| CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

/// Owning handle for a record, freed on drop
#[derive(Debug)]
pub struct HashDataGuard {
    ptr: NonNull<ModHashData>,
}

impl HashDataGuard {
    /// Take ownership of a record; NULL yields `None`
    ///
    /// # Safety
    /// `ptr` must be NULL or an unfreed record from this library with no other owner.
    pub unsafe fn from_raw(ptr: *mut ModHashData) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr })
    }

    /// Give ownership back; the caller must eventually pass it to `modhash_free`
    pub fn into_raw(self) -> *mut ModHashData {
        let ptr = self.ptr.as_ptr();
        mem::forget(self);
        ptr
    }

    pub fn is_sentinel(&self) -> bool {
        self.status == MODHASH_STATUS_SENTINEL
    }

    pub fn sample_names(&self) -> Option<String> {
        // SAFETY: strings are NULL or NUL-terminated for the record's lifetime
        unsafe { lossy(self.sample_names) }
    }

    pub fn title(&self) -> Option<String> {
        unsafe { lossy(self.title) }
    }

    pub fn artist(&self) -> Option<String> {
        unsafe { lossy(self.artist) }
    }

    pub fn comments(&self) -> Option<String> {
        unsafe { lossy(self.comments) }
    }

    pub fn samples(&self) -> &[ModHashSample] {
        if self.samples.is_null() {
            return &[];
        }
        // SAFETY: `samples` holds `sample_count` initialized entries
        unsafe { slice::from_raw_parts(self.samples, self.sample_count) }
    }

    pub fn sample_name(&self, sample: &ModHashSample) -> String {
        unsafe { lossy(sample.name) }.unwrap_or_default()
    }

    pub fn instrument_names(&self) -> Vec<String> {
        if self.instrument_names.is_null() {
            return Vec::new();
        }
        // SAFETY: `instrument_names` holds `instrument_count` string pointers
        let names = unsafe { slice::from_raw_parts(self.instrument_names, self.instrument_count) };
        names
            .iter()
            .map(|&name| unsafe { lossy(name) }.unwrap_or_default())
            .collect()
    }
}

impl Deref for HashDataGuard {
    type Target = ModHashData;

    fn deref(&self) -> &ModHashData {
        // SAFETY: the guard owns a live record
        unsafe { self.ptr.as_ref() }
    }
}

impl Drop for HashDataGuard {
    fn drop(&mut self) {
        // SAFETY: the guard is the single owner
        unsafe { modhash_free(self.ptr.as_ptr()) }
    }
}

/// Fingerprint a buffer with the system allocator, wrapped in a guard
pub fn hash_buffer(data: &[u8], flags: HashFlags) -> Option<HashDataGuard> {
    // SAFETY: the slice is valid for the duration of the call
    unsafe {
        let record = modhash_hash_buffer(data.as_ptr(), data.len(), flags.bits(), ptr::null());
        HashDataGuard::from_raw(record)
    }
}

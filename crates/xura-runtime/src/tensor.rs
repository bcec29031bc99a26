use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};
use std::slice;

use tracing::debug;

use crate::alloc::{align_up, Allocator, Global};
use crate::dtype::DType;
use crate::shape::{self, DimsDisplay};
use crate::{Result, RuntimeError};

/// An n-dimensional array as exchanged with compiled native routines.
///
/// The tensor always owns its shape and strides arrays. It owns the data
/// buffer only when [`Tensor::owning`] is true; otherwise the buffer belongs
/// to a caller, to a tensor list, or to another tensor aliasing it.
///
/// The leading fields follow the layout native routines are compiled
/// against. Everything after `owning` is bookkeeping for Rust callers.
#[repr(C)]
pub struct Tensor<A: Allocator = Global> {
    allocated_ptr: *mut u8,
    aligned_ptr: *mut u8,
    offset: i64,
    shape: NonNull<i64>,
    strides: NonNull<i64>,
    rank: i64,
    dtype: DType,
    owning: bool,
    /// Readable bytes from `aligned_ptr` when this tensor allocated the
    /// buffer; `None` for caller-supplied buffers.
    capacity: Option<usize>,
    alloc: A,
}

impl Tensor {
    /// Wrap a caller-owned buffer. See [`Tensor::create_in`].
    ///
    /// # Safety
    ///
    /// Same contract as [`Tensor::create_in`].
    pub unsafe fn create(data: *mut u8, shape: &[i64], dtype: DType) -> Result<Self> {
        Self::create_in(data, shape, dtype, Global)
    }

    /// Wrap a buffer with explicit ownership. See [`Tensor::create_with_ownership_in`].
    ///
    /// # Safety
    ///
    /// Same contract as [`Tensor::create_with_ownership_in`].
    pub unsafe fn create_with_ownership(
        data: *mut u8,
        shape: &[i64],
        dtype: DType,
        owning: bool,
    ) -> Result<Self> {
        Self::create_with_ownership_in(data, shape, dtype, owning, Global)
    }

    /// Allocate a zeroed, owned buffer for `shape`.
    pub fn create_empty(shape: &[i64], dtype: DType) -> Result<Self> {
        Self::create_empty_in(shape, dtype, Global)
    }

    /// Allocate metadata only, for a tensor populated in a later step.
    pub fn create_untyped(rank: usize) -> Result<Self> {
        Self::create_untyped_in(rank, Global)
    }
}

impl<A: Allocator> Tensor<A> {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Wrap `data` without taking ownership of it. Strides are dense.
    ///
    /// # Safety
    ///
    /// `data` must be null, or aligned for `dtype` and valid for
    /// `num_elements * dtype.size()` bytes of whatever shape the tensor
    /// describes while it may read them.
    pub unsafe fn create_in(data: *mut u8, shape: &[i64], dtype: DType, alloc: A) -> Result<Self> {
        Self::create_with_ownership_in(data, shape, dtype, false, alloc)
    }

    /// Wrap `data`, releasing it on drop when `owning` is true.
    ///
    /// # Safety
    ///
    /// The contract of [`Tensor::create_in`], and when `owning` is true,
    /// `data` must come from `alloc.allocate` and must not be owned by anyone else.
    pub unsafe fn create_with_ownership_in(
        data: *mut u8,
        shape: &[i64],
        dtype: DType,
        owning: bool,
        alloc: A,
    ) -> Result<Self> {
        buffer_bytes(shape, dtype.size(), dtype)?;
        let mut tensor = Self::with_metadata(shape.len(), alloc)?;
        tensor.init_dense(shape, dtype);
        tensor.install(owning, data, data);
        Ok(tensor)
    }

    /// Allocate a zeroed buffer of exactly `num_elements * dtype.size()` bytes
    /// and wrap it with `owning = true`.
    pub fn create_empty_in(shape: &[i64], dtype: DType, alloc: A) -> Result<Self> {
        let elem_size = dtype.size();
        Self::create_owned_in(shape, dtype, elem_size, elem_size.max(1), alloc)
    }

    /// Allocate zero-filled shape and strides arrays and no data buffer.
    ///
    /// The result has dtype [`DType::Undefined`] and must have its shape,
    /// strides, dtype and data installed before elements are accessed.
    pub fn create_untyped_in(rank: usize, alloc: A) -> Result<Self> {
        Self::with_metadata(rank, alloc)
    }

    /// Shared path for every constructor that allocates the data buffer.
    ///
    /// The buffer comes first so a metadata failure exercises the release
    /// of an already allocated buffer.
    pub(crate) fn create_owned_in(
        shape: &[i64],
        dtype: DType,
        elem_size: usize,
        elem_align: usize,
        alloc: A,
    ) -> Result<Self> {
        let bytes = buffer_bytes(shape, elem_size, dtype)?;
        let padding = if elem_align > A::ALIGN { elem_align - 1 } else { 0 };
        let request = bytes
            .checked_add(padding)
            .ok_or_else(|| RuntimeError::SizeOverflow { shape: shape.to_vec(), dtype })?;

        let Some(allocated) = alloc.allocate(request) else {
            debug!(bytes = request, %dtype, "tensor data allocation failed");
            return Err(RuntimeError::AllocationFailed { bytes: request });
        };
        // SAFETY: `allocated` is valid for `request` bytes.
        unsafe { ptr::write_bytes(allocated.as_ptr(), 0, request) };

        let Some((shape_ptr, strides_ptr)) = alloc_metadata(&alloc, shape.len()) else {
            // SAFETY: allocated above and not handed out.
            unsafe { alloc.deallocate(allocated) };
            debug!(rank = shape.len(), "tensor metadata allocation failed, data released");
            return Err(RuntimeError::MetadataAllocation { rank: shape.len() });
        };

        let aligned = align_up(allocated.as_ptr(), elem_align);
        let mut tensor = Self::from_raw_parts(shape_ptr, strides_ptr, shape.len(), alloc);
        tensor.init_dense(shape, dtype);
        tensor.allocated_ptr = allocated.as_ptr();
        tensor.aligned_ptr = aligned;
        tensor.owning = true;
        tensor.capacity = Some(bytes);
        debug!(shape = %DimsDisplay(shape), %dtype, bytes, "created owned tensor");
        Ok(tensor)
    }

    fn with_metadata(rank: usize, alloc: A) -> Result<Self> {
        let Some((shape_ptr, strides_ptr)) = alloc_metadata(&alloc, rank) else {
            debug!(rank, "tensor metadata allocation failed");
            return Err(RuntimeError::MetadataAllocation { rank });
        };
        Ok(Self::from_raw_parts(shape_ptr, strides_ptr, rank, alloc))
    }

    fn from_raw_parts(shape: NonNull<i64>, strides: NonNull<i64>, rank: usize, alloc: A) -> Self {
        Self {
            allocated_ptr: ptr::null_mut(),
            aligned_ptr: ptr::null_mut(),
            offset: 0,
            shape,
            strides,
            rank: rank as i64,
            dtype: DType::Undefined,
            owning: false,
            capacity: Some(0),
            alloc,
        }
    }

    fn init_dense(&mut self, shape: &[i64], dtype: DType) {
        self.set_shape(shape);
        self.set_strides(&shape::compute_strides(shape));
        self.dtype = dtype;
    }

    // =========================================================================
    // Handles
    // =========================================================================

    /// Move the tensor to the heap and return its handle.
    pub fn into_raw(self) -> NonNull<Self> {
        NonNull::from(Box::leak(Box::new(self)))
    }

    /// Reclaim a handle produced by [`Tensor::into_raw`].
    ///
    /// # Safety
    ///
    /// `handle` must come from `into_raw` and must not be reclaimed twice.
    pub unsafe fn from_raw(handle: NonNull<Self>) -> Box<Self> {
        Box::from_raw(handle.as_ptr())
    }

    /// Destroy the tensor behind a handle. A null handle is ignored.
    ///
    /// # Safety
    ///
    /// Same as [`Tensor::from_raw`] for non-null handles.
    pub unsafe fn destroy(handle: *mut Self) {
        if let Some(handle) = NonNull::new(handle) {
            drop(Self::from_raw(handle));
        }
    }

    // =========================================================================
    // Data pointer and ownership
    // =========================================================================

    /// Address used for element indexing.
    pub fn data_ptr(&self) -> *mut u8 {
        self.aligned_ptr
    }

    /// Base address of the allocation backing the data.
    pub fn allocated_ptr(&self) -> *mut u8 {
        self.allocated_ptr
    }

    /// Install a new data buffer, releasing the current one first if owned.
    ///
    /// `aligned` defaults to `allocated`.
    ///
    /// Shape, strides and dtype may be installed before or after the buffer.
    ///
    /// # Safety
    ///
    /// `aligned` (or `allocated`) must be valid for the buffer size of every
    /// shape and dtype the tensor describes while it reads the buffer; when
    /// `owning` is true, `allocated` must come from this tensor's allocator
    /// and have no other owner.
    pub unsafe fn set_data_ptr(
        &mut self,
        owning: bool,
        allocated: *mut u8,
        aligned: Option<*mut u8>,
    ) {
        self.release_data();
        self.install(owning, allocated, aligned.unwrap_or(allocated));
    }

    fn install(&mut self, owning: bool, allocated: *mut u8, aligned: *mut u8) {
        self.allocated_ptr = allocated;
        self.aligned_ptr = aligned;
        self.owning = owning;
        self.capacity = if aligned.is_null() { Some(0) } else { None };
    }

    pub fn owning(&self) -> bool {
        self.owning
    }

    /// Change who is responsible for the buffer. Nothing is freed or allocated.
    ///
    /// # Safety
    ///
    /// Setting `true` requires the buffer to come from this tensor's allocator
    /// with no other owner.
    pub unsafe fn set_owning(&mut self, owning: bool) {
        self.owning = owning;
    }

    /// The allocator that releases owned data and metadata.
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    fn release_data(&mut self) {
        if self.owning {
            if let Some(data) = NonNull::new(self.allocated_ptr) {
                // SAFETY: an owning tensor's buffer came from `self.alloc`.
                unsafe { self.alloc.deallocate(data) };
            }
        }
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    pub fn rank(&self) -> usize {
        self.rank as usize
    }

    /// Element offset of the first logical element. Always zero for now.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn shape(&self) -> &[i64] {
        // SAFETY: the array holds `rank` initialized integers for our lifetime.
        unsafe { slice::from_raw_parts(self.shape.as_ptr(), self.rank()) }
    }

    /// Overwrite the extents in place. The data buffer is not resized.
    ///
    /// # Panics
    ///
    /// If the rank differs or an extent is negative.
    pub fn set_shape(&mut self, shape: &[i64]) {
        assert_eq!(
            shape.len(),
            self.rank(),
            "shape of rank {} set on a tensor of rank {}",
            shape.len(),
            self.rank
        );
        if let Some((axis, extent)) = shape.iter().enumerate().find(|(_, d)| **d < 0) {
            panic!("negative extent {extent} on axis {axis}");
        }
        // SAFETY: exclusive access, `rank` slots allocated.
        let slots = unsafe { slice::from_raw_parts_mut(self.shape.as_ptr(), self.rank()) };
        slots.copy_from_slice(shape);
    }

    pub fn strides(&self) -> &[i64] {
        // SAFETY: as for `shape`.
        unsafe { slice::from_raw_parts(self.strides.as_ptr(), self.rank()) }
    }

    /// Overwrite the element strides in place, e.g. to describe a view.
    pub fn set_strides(&mut self, strides: &[i64]) {
        assert_eq!(
            strides.len(),
            self.rank(),
            "strides of rank {} set on a tensor of rank {}",
            strides.len(),
            self.rank
        );
        // SAFETY: exclusive access, `rank` slots allocated.
        let slots = unsafe { slice::from_raw_parts_mut(self.strides.as_ptr(), self.rank()) };
        slots.copy_from_slice(strides);
    }

    /// Set strides given in bytes, as produced by foreign array libraries.
    pub fn set_strides_from_bytes(&mut self, byte_strides: &[i64]) {
        let elem_size = self.dtype.size() as i64;
        assert!(elem_size > 0, "byte strides need a sized dtype, got {}", self.dtype);
        let strides: shape::Dims = byte_strides.iter().map(|s| s / elem_size).collect();
        self.set_strides(&strides);
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn set_dtype(&mut self, dtype: DType) {
        self.dtype = dtype;
    }

    pub fn is_dense(&self) -> bool {
        shape::is_dense(self.shape(), self.strides())
    }

    /// Number of elements of a dense tensor.
    ///
    /// # Panics
    ///
    /// If the strides describe anything other than a dense row-major layout.
    pub fn num_elements(&self) -> i64 {
        let shape = self.shape();
        let strides = self.strides();
        let mut expected = 1i64;
        for axis in (0..shape.len()).rev() {
            assert_eq!(
                strides[axis], expected,
                "num_elements on a non-dense tensor: \
                 axis {axis} has stride {} where {expected} is dense",
                strides[axis]
            );
            expected *= shape[axis];
        }
        expected
    }

    /// Size of the data in bytes: `num_elements * dtype.size()`.
    ///
    /// Extents are never negative, since both construction and
    /// [`Tensor::set_shape`] reject them.
    pub fn buffer_size(&self) -> usize {
        self.num_elements() as usize * self.dtype.size()
    }

    /// Panic unless `end` bytes can be read from [`Tensor::data_ptr`].
    ///
    /// Buffers this tensor allocated are checked against their size.
    /// Caller-supplied buffers are taken on the word of their unsafe
    /// constructor or [`Tensor::set_data_ptr`].
    pub(crate) fn assert_readable(&self, end: usize) {
        assert!(!self.aligned_ptr.is_null(), "read of {end} bytes through a null data pointer");
        if let Some(capacity) = self.capacity {
            assert!(end <= capacity, "read of {end} bytes outside the {capacity}-byte buffer");
        }
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Type string such as `8x16x1xfloat`.
    pub fn type_string(&self) -> String {
        let mut s = String::new();
        for d in self.shape() {
            s.push_str(&d.to_string());
            s.push('x');
        }
        s.push_str(self.dtype.name());
        s
    }
}

impl<A: Allocator> Drop for Tensor<A> {
    fn drop(&mut self) {
        self.release_data();
        // SAFETY: both arrays came from `self.alloc` and are released once.
        unsafe {
            self.alloc.deallocate(self.shape.cast());
            self.alloc.deallocate(self.strides.cast());
        }
    }
}

impl<A: Allocator> fmt::Debug for Tensor<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor(shape={}, strides={}, dtype={}, owning={})",
            DimsDisplay(self.shape()),
            DimsDisplay(self.strides()),
            self.dtype,
            self.owning,
        )
    }
}

/// Allocate zeroed shape and strides arrays of `rank` slots, or nothing.
fn alloc_metadata<A: Allocator>(alloc: &A, rank: usize) -> Option<(NonNull<i64>, NonNull<i64>)> {
    let bytes = rank.checked_mul(mem::size_of::<i64>())?;
    let shape = alloc.allocate(bytes)?;
    let Some(strides) = alloc.allocate(bytes) else {
        // SAFETY: allocated just above.
        unsafe { alloc.deallocate(shape) };
        return None;
    };
    let (shape, strides) = (shape.cast::<i64>(), strides.cast::<i64>());
    // SAFETY: both blocks hold `rank` i64 slots.
    unsafe {
        ptr::write_bytes(shape.as_ptr(), 0, rank);
        ptr::write_bytes(strides.as_ptr(), 0, rank);
    }
    Some((shape, strides))
}

/// Checked `product(shape) * elem_size`, rejecting negative extents.
fn buffer_bytes(shape: &[i64], elem_size: usize, dtype: DType) -> Result<usize> {
    let mut count: usize = 1;
    for (axis, &extent) in shape.iter().enumerate() {
        if extent < 0 {
            return Err(RuntimeError::NegativeDimension { axis, extent });
        }
        count = count
            .checked_mul(extent as usize)
            .ok_or_else(|| RuntimeError::SizeOverflow { shape: shape.to_vec(), dtype })?;
    }
    count
        .checked_mul(elem_size)
        .ok_or_else(|| RuntimeError::SizeOverflow { shape: shape.to_vec(), dtype })
}

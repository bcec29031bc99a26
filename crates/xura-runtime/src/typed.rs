//! Typed convenience layer for host callers.
//!
//! Generated code only sees the raw constructors in [`crate::tensor`]; these
//! helpers infer the dtype from a Rust type and expose the buffer as slices.

use std::mem;
use std::slice;

use bytemuck::Pod;
use rand::distributions::uniform::SampleUniform;
use rand::Rng;

use crate::alloc::{Allocator, Global};
use crate::dtype::{dtype_of, Element};
use crate::random;
use crate::shape;
use crate::{Result, RuntimeError, Tensor};

impl Tensor {
    /// Owned, zeroed tensor whose dtype is inferred from `T`.
    ///
    /// Types without a known mapping get [`crate::DType::Undefined`] but
    /// still a buffer of `size_of::<T>()` bytes per element.
    pub fn with_shape<T: 'static>(shape: &[i64]) -> Result<Self> {
        Self::with_shape_in::<T>(shape, Global)
    }

    /// Owned tensor filled with independent uniform samples in `[lo, hi)`.
    ///
    /// Draws from the process-wide generator once [`random::define_seed`]
    /// has been called, otherwise from a freshly seeded one.
    ///
    /// # Panics
    ///
    /// If `lo >= hi`.
    pub fn with_random_data<T>(shape: &[i64], lo: T, hi: T) -> Result<Self>
    where
        T: SampleUniform + PartialOrd + Copy + 'static,
    {
        let mut tensor = Self::with_shape::<T>(shape)?;
        random::with_rng(|rng| tensor.fill_uniform(lo, hi, rng));
        Ok(tensor)
    }

    /// As [`Tensor::with_random_data`], drawing from `rng`.
    pub fn with_random_data_from<T, R>(shape: &[i64], lo: T, hi: T, rng: &mut R) -> Result<Self>
    where
        T: SampleUniform + PartialOrd + Copy + 'static,
        R: Rng + ?Sized,
    {
        let mut tensor = Self::with_shape::<T>(shape)?;
        tensor.fill_uniform(lo, hi, rng);
        Ok(tensor)
    }

    /// Owned copy of `data` laid out densely as `shape`.
    pub fn from_data<T: Element + Pod>(data: &[T], shape: &[i64]) -> Result<Self> {
        Self::from_data_in(data, shape, Global)
    }
}

impl<A: Allocator> Tensor<A> {
    pub fn with_shape_in<T: 'static>(shape: &[i64], alloc: A) -> Result<Self> {
        Self::create_owned_in(
            shape,
            dtype_of::<T>(),
            mem::size_of::<T>(),
            mem::align_of::<T>(),
            alloc,
        )
    }

    pub fn from_data_in<T: Element + Pod>(data: &[T], shape: &[i64], alloc: A) -> Result<Self> {
        let mut tensor = Self::with_shape_in::<T>(shape, alloc)?;
        let expected = tensor.num_elements() as usize;
        if data.len() != expected {
            return Err(RuntimeError::DataLength {
                shape: shape.to_vec(),
                expected,
                got: data.len(),
            });
        }
        tensor.as_bytes_mut().copy_from_slice(bytemuck::cast_slice(data));
        Ok(tensor)
    }

    fn fill_uniform<T, R>(&mut self, lo: T, hi: T, rng: &mut R)
    where
        T: SampleUniform + PartialOrd + Copy + 'static,
        R: Rng + ?Sized,
    {
        assert!(lo < hi, "random data needs an increasing range [lo, hi)");
        let n = self.num_elements() as usize;
        let data = self.data_ptr().cast::<T>();
        for i in 0..n {
            // SAFETY: the tensor was just allocated for `n` values of `T`.
            unsafe { data.add(i).write(rng.gen_range(lo..hi)) };
        }
    }

    // =========================================================================
    // Slice views
    // =========================================================================

    /// The dense buffer as `&[T]`.
    ///
    /// # Panics
    ///
    /// If `T` does not match the dtype or the tensor is not dense. Also if
    /// the data pointer is null, or a buffer the tensor allocated itself is
    /// smaller than the shape implies.
    pub fn as_slice<T: Element>(&self) -> &[T] {
        let n = self.checked_view::<T>();
        if n == 0 {
            return &[];
        }
        // SAFETY: checked_view verified dtype, alignment and extent.
        unsafe { slice::from_raw_parts(self.data_ptr().cast::<T>().add(self.offset() as usize), n) }
    }

    pub fn as_mut_slice<T: Element>(&mut self) -> &mut [T] {
        let n = self.checked_view::<T>();
        if n == 0 {
            return &mut [];
        }
        let first = self.offset() as usize;
        // SAFETY: as for `as_slice`, with exclusive access through `&mut self`.
        unsafe { slice::from_raw_parts_mut(self.data_ptr().cast::<T>().add(first), n) }
    }

    /// The dense buffer as raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        let n = self.buffer_size();
        if n == 0 {
            return &[];
        }
        self.assert_readable(n);
        // SAFETY: `n` bytes are readable from the data pointer.
        unsafe { slice::from_raw_parts(self.data_ptr(), n) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let n = self.buffer_size();
        if n == 0 {
            return &mut [];
        }
        self.assert_readable(n);
        // SAFETY: as for `as_bytes`, with exclusive access.
        unsafe { slice::from_raw_parts_mut(self.data_ptr(), n) }
    }

    fn checked_view<T: Element>(&self) -> usize {
        assert_eq!(
            self.dtype(),
            T::DTYPE,
            "{} view requested of a {} tensor",
            T::DTYPE,
            self.dtype()
        );
        let n = self.num_elements() as usize;
        if n == 0 {
            return 0;
        }
        let end = (n + self.offset() as usize) * mem::size_of::<T>();
        self.assert_readable(end);
        assert_eq!(
            self.data_ptr() as usize % mem::align_of::<T>(),
            0,
            "data pointer is not aligned for {}",
            T::DTYPE
        );
        n
    }

    // =========================================================================
    // Element access
    // =========================================================================

    /// Reference to the element at `indices`, following the stored strides.
    ///
    /// # Safety
    ///
    /// `T` must match the element type and `indices` must lie inside the shape.
    pub unsafe fn elem<T>(&self, indices: &[i64]) -> &T {
        self.elem_by_offset(shape::compute_elem_offset(self.strides(), indices))
    }

    /// # Safety
    ///
    /// As for [`Tensor::elem`].
    pub unsafe fn elem_mut<T>(&mut self, indices: &[i64]) -> &mut T {
        let offset = shape::compute_elem_offset(self.strides(), indices);
        self.elem_by_offset_mut(offset)
    }

    /// Reference to the element `offset` elements past the first one.
    ///
    /// # Safety
    ///
    /// `T` must match the element type and `offset` must lie inside the buffer.
    pub unsafe fn elem_by_offset<T>(&self, offset: i64) -> &T {
        &*self.data_ptr().cast::<T>().offset((offset + self.offset()) as isize)
    }

    /// # Safety
    ///
    /// As for [`Tensor::elem_by_offset`].
    pub unsafe fn elem_by_offset_mut<T>(&mut self, offset: i64) -> &mut T {
        &mut *self.data_ptr().cast::<T>().offset((offset + self.offset()) as isize)
    }

    /// Copy out the element at a strided offset, checked against the buffer.
    pub(crate) fn read_at<T: Copy>(&self, offset: i64) -> T {
        let offset = offset + self.offset();
        assert!(offset >= 0, "negative element offset {offset}");
        self.assert_readable((offset as usize + 1) * mem::size_of::<T>());
        // SAFETY: bounds checked above; alignment is part of the constructor contract.
        unsafe { self.data_ptr().cast::<T>().add(offset as usize).read() }
    }
}

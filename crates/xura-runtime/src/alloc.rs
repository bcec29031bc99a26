//! Heap allocation for tensor data and metadata.
//!
//! Buffers cross the native boundary in both directions, so whoever ends up
//! owning one must be able to release it without knowing how large it was.
//! The [`Allocator`] trait is therefore shaped like `malloc`/`free` rather
//! than like `std::alloc`.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Raw memory provider for tensors and tensor lists.
///
/// # Safety
///
/// Implementations must ensure:
/// - `allocate` returns a pointer aligned to at least [`Allocator::ALIGN`]
///   and valid for `size` bytes, or `None`
/// - `deallocate` accepts any pointer previously returned by `allocate` on
///   the same allocator and not yet released
pub unsafe trait Allocator {
    /// Alignment guaranteed for every returned pointer. Must be at least 8.
    const ALIGN: usize;

    /// Allocate `size` bytes. Zero-sized requests still return a unique pointer.
    fn allocate(&self, size: usize) -> Option<NonNull<u8>>;

    /// Release a block returned by [`Allocator::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this allocator and must not have
    /// been released already.
    unsafe fn deallocate(&self, ptr: NonNull<u8>);
}

/// The process heap. Each block carries its total size in a small header.
#[derive(Debug, Clone, Copy, Default)]
pub struct Global;

const HEADER: usize = 16;

unsafe impl Allocator for Global {
    const ALIGN: usize = HEADER;

    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let total = size.checked_add(HEADER)?;
        let layout = Layout::from_size_align(total, HEADER).ok()?;
        // SAFETY: layout is never zero-sized because of the header.
        let base = NonNull::new(unsafe { alloc::alloc(layout) })?;
        unsafe {
            base.as_ptr().cast::<usize>().write(total);
            Some(NonNull::new_unchecked(base.as_ptr().add(HEADER)))
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        let base = ptr.as_ptr().sub(HEADER);
        let total = base.cast::<usize>().read();
        alloc::dealloc(base, Layout::from_size_align_unchecked(total, HEADER));
    }
}

unsafe impl<A: Allocator> Allocator for &A {
    const ALIGN: usize = A::ALIGN;

    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        (**self).allocate(size)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        (**self).deallocate(ptr)
    }
}

/// Round `ptr` up to the next multiple of `align` (a power of two).
pub(crate) fn align_up(ptr: *mut u8, align: usize) -> *mut u8 {
    let addr = ptr as usize;
    let aligned = (addr + align - 1) & !(align - 1);
    ptr.wrapping_add(aligned - addr)
}

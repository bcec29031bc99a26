use std::fmt;
use std::mem::{self, ManuallyDrop};
use std::ptr::{self, NonNull};
use std::slice;

use tracing::debug;

use crate::alloc::{Allocator, Global};
use crate::{Result, RuntimeError, Tensor};

/// Tensor handle as stored in a list and passed to native routines.
pub type TensorHandle<A = Global> = NonNull<Tensor<A>>;

/// A fixed-size group of tensor handles, e.g. the inputs of one call.
///
/// A deep list destroys its tensors when it goes away; a shallow list only
/// releases its own slot array and leaves the tensors to whoever else holds them.
pub struct TensorList<A: Allocator = Global> {
    items: NonNull<TensorHandle<A>>,
    size: usize,
    shallow: bool,
    alloc: A,
}

impl TensorList {
    /// Deep list taking ownership of `tensors`.
    pub fn new(tensors: Vec<Tensor>) -> Result<Self> {
        Self::new_in(tensors, Global)
    }

    /// List over existing handles. See [`TensorList::from_handles_in`].
    ///
    /// # Safety
    ///
    /// Same contract as [`TensorList::from_handles_in`].
    pub unsafe fn from_handles(handles: &[TensorHandle], shallow: bool) -> Result<Self> {
        Self::from_handles_in(handles, shallow, Global)
    }
}

impl<A: Allocator> TensorList<A> {
    /// Deep list taking ownership of `tensors`; the slot array comes from `alloc`.
    ///
    /// On failure the tensors are dropped with the vector.
    pub fn new_in(tensors: Vec<Tensor<A>>, alloc: A) -> Result<Self> {
        let items = alloc_slots(&alloc, tensors.len())?;
        let size = tensors.len();
        for (i, tensor) in tensors.into_iter().enumerate() {
            // SAFETY: `items` has `size` slots.
            unsafe { items.as_ptr().add(i).write(tensor.into_raw()) };
        }
        Ok(Self {
            items,
            size,
            shallow: false,
            alloc,
        })
    }

    /// List over caller-supplied handles. The handles are copied, the tensors are not.
    ///
    /// # Safety
    ///
    /// Every handle must stay valid for the life of the list. When `shallow`
    /// is false, or when [`TensorList::destroy`] may be called, every handle
    /// must come from [`Tensor::into_raw`] and its ownership passes to the list.
    pub unsafe fn from_handles_in(
        handles: &[TensorHandle<A>],
        shallow: bool,
        alloc: A,
    ) -> Result<Self> {
        let items = alloc_slots(&alloc, handles.len())?;
        items.as_ptr().copy_from_nonoverlapping(handles.as_ptr(), handles.len());
        Ok(Self {
            items,
            size: handles.len(),
            shallow,
            alloc,
        })
    }

    /// Destroy every tensor, then the list. Ignores the shallow flag.
    pub fn destroy(self) {
        Self::consume(self, true);
    }

    /// Release only the list; the tensors are left untouched.
    pub fn destroy_shallow(self) {
        Self::consume(self, false);
    }

    fn consume(self, deep: bool) {
        let mut list = ManuallyDrop::new(self);
        list.release(deep);
        // SAFETY: `list` is never touched again and its drop glue never runs.
        unsafe { ptr::drop_in_place(&mut list.alloc) };
    }

    fn release(&mut self, deep: bool) {
        if deep {
            for &handle in self.handles() {
                // SAFETY: a deeply released list owns its handles.
                unsafe { Tensor::<A>::destroy(handle.as_ptr()) };
            }
        }
        debug!(size = self.size, deep, "releasing tensor list");
        // SAFETY: the slot array came from `self.alloc` and is released once.
        unsafe { self.alloc.deallocate(self.items.cast()) };
    }

    /// The raw handle array, as handed to native routines.
    pub fn handles(&self) -> &[TensorHandle<A>] {
        // SAFETY: `size` initialized slots.
        unsafe { slice::from_raw_parts(self.items.as_ptr(), self.size) }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_shallow(&self) -> bool {
        self.shallow
    }

    /// The `index`-th tensor.
    ///
    /// # Panics
    ///
    /// If `index >= len()`.
    pub fn get(&self, index: usize) -> &Tensor<A> {
        assert!(index < self.size, "tensor index {index} out of range for a list of {}", self.size);
        // SAFETY: handles are valid for the life of the list.
        unsafe { self.handles()[index].as_ref() }
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Tensor<A> {
        assert!(index < self.size, "tensor index {index} out of range for a list of {}", self.size);
        let mut handle = self.handles()[index];
        // SAFETY: as for `get`, with exclusive access through `&mut self`.
        unsafe { handle.as_mut() }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tensor<A>> + '_ {
        // SAFETY: as for `get`.
        self.handles().iter().map(|h| unsafe { h.as_ref() })
    }
}

impl<A: Allocator> Drop for TensorList<A> {
    fn drop(&mut self) {
        let deep = !self.shallow;
        self.release(deep);
    }
}

impl<A: Allocator> fmt::Debug for TensorList<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorList")
            .field("shallow", &self.shallow)
            .field("tensors", &self.iter().collect::<Vec<_>>())
            .finish()
    }
}

fn alloc_slots<A: Allocator>(alloc: &A, size: usize) -> Result<NonNull<TensorHandle<A>>> {
    let bytes = size
        .checked_mul(mem::size_of::<TensorHandle<A>>())
        .ok_or(RuntimeError::ListAllocation { size })?;
    match alloc.allocate(bytes) {
        Some(items) => Ok(items.cast()),
        None => {
            debug!(size, "tensor list allocation failed");
            Err(RuntimeError::ListAllocation { size })
        }
    }
}

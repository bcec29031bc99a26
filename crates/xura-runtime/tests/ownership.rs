use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::ptr::NonNull;

use xura_runtime::{Allocator, DType, Global, RuntimeError, Tensor, TensorHandle, TensorList};

/// Records every block and panics on a release of anything not live.
#[derive(Default)]
struct Tracking {
    live: RefCell<HashSet<usize>>,
    releases: RefCell<HashMap<usize, usize>>,
    requests: Cell<usize>,
    fail_at: Cell<Option<usize>>,
}

impl Tracking {
    fn failing_at(n: usize) -> Self {
        let alloc = Self::default();
        alloc.fail_at.set(Some(n));
        alloc
    }

    fn live(&self) -> usize {
        self.live.borrow().len()
    }

    fn is_live(&self, ptr: *mut u8) -> bool {
        self.live.borrow().contains(&(ptr as usize))
    }

    fn releases_of(&self, ptr: *mut u8) -> usize {
        self.releases.borrow().get(&(ptr as usize)).copied().unwrap_or(0)
    }
}

unsafe impl Allocator for Tracking {
    const ALIGN: usize = Global::ALIGN;

    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let n = self.requests.get();
        self.requests.set(n + 1);
        if self.fail_at.get() == Some(n) {
            return None;
        }
        let ptr = Global.allocate(size)?;
        self.live.borrow_mut().insert(ptr.as_ptr() as usize);
        Some(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        let addr = ptr.as_ptr() as usize;
        let was_live = self.live.borrow_mut().remove(&addr);
        assert!(was_live, "release of a block that is not live: {addr:#x}");
        *self.releases.borrow_mut().entry(addr).or_default() += 1;
        Global.deallocate(ptr);
    }
}

#[test]
fn set_data_ptr_releases_only_the_previous_buffer() {
    let alloc = Tracking::default();
    let mut t = Tensor::create_empty_in(&[2, 3], DType::F32, &alloc).unwrap();
    let first = t.allocated_ptr();
    let second = alloc.allocate(24).unwrap().as_ptr();

    unsafe { t.set_data_ptr(true, second, None) };
    assert_eq!(alloc.releases_of(first), 1);
    assert!(alloc.is_live(second));
    assert_eq!(t.data_ptr(), second);
    assert!(t.owning());

    drop(t);
    assert_eq!(alloc.releases_of(second), 1);
    assert_eq!(alloc.live(), 0);
}

#[test]
fn set_data_ptr_keeps_borrowed_buffer() {
    let alloc = Tracking::default();
    let mut backing = [0i32; 4];
    let mut t = Tensor::create_empty_in(&[4], DType::I32, &alloc).unwrap();
    unsafe { t.set_data_ptr(false, backing.as_mut_ptr().cast(), None) };
    t.as_mut_slice::<i32>()[2] = 9;
    drop(t);
    assert_eq!(alloc.live(), 0);
    assert_eq!(backing, [0, 0, 9, 0]);
}

#[test]
fn metadata_failure_releases_data_buffer() {
    for fail_at in [1, 2] {
        let alloc = Tracking::failing_at(fail_at);
        let err = Tensor::create_empty_in(&[2, 2], DType::F64, &alloc).unwrap_err();
        assert!(matches!(err, RuntimeError::MetadataAllocation { rank: 2 }));
        assert_eq!(alloc.live(), 0, "leak with failure at request {fail_at}");
    }
}

#[test]
fn data_failure_allocates_nothing() {
    let alloc = Tracking::failing_at(0);
    let err = Tensor::create_empty_in(&[8], DType::U8, &alloc).unwrap_err();
    assert!(matches!(err, RuntimeError::AllocationFailed { bytes: 8 }));
    assert_eq!(alloc.live(), 0);
}

#[test]
fn wrap_failure_leaves_caller_buffer_alone() {
    for fail_at in [0, 1] {
        let alloc = Tracking::failing_at(fail_at);
        let mut data = [1u16; 3];
        let result =
            unsafe { Tensor::create_in(data.as_mut_ptr().cast(), &[3], DType::U16, &alloc) };
        assert!(matches!(result, Err(RuntimeError::MetadataAllocation { rank: 1 })));
        assert_eq!(alloc.live(), 0);
        assert_eq!(data, [1, 1, 1]);
    }
}

#[test]
fn untyped_failure_carries_rank() {
    let alloc = Tracking::failing_at(1);
    let err = Tensor::create_untyped_in(5, &alloc).unwrap_err();
    assert!(matches!(err, RuntimeError::MetadataAllocation { rank: 5 }));
    assert_eq!(alloc.live(), 0);
}

#[test]
fn explicit_ownership_flag() {
    let alloc = Tracking::default();
    let owned = alloc.allocate(8).unwrap().as_ptr();
    let t = unsafe { Tensor::create_with_ownership_in(owned, &[2], DType::F32, true, &alloc) };
    let t = t.unwrap();
    drop(t);
    assert_eq!(alloc.releases_of(owned), 1);

    let kept = alloc.allocate(8).unwrap();
    let t = unsafe {
        Tensor::create_with_ownership_in(kept.as_ptr(), &[2], DType::F32, true, &alloc)
    };
    let mut t = t.unwrap();
    unsafe { t.set_owning(false) };
    drop(t);
    assert!(alloc.is_live(kept.as_ptr()));
    unsafe { alloc.deallocate(kept) };
    assert_eq!(alloc.live(), 0);
}

#[test]
fn over_aligned_elements_split_allocated_and_aligned() {
    #[repr(align(64))]
    #[derive(Clone, Copy)]
    struct Wide([u8; 64]);

    let alloc = Tracking::default();
    let t = Tensor::with_shape_in::<Wide>(&[3], &alloc).unwrap();
    assert_eq!(t.dtype(), DType::Undefined);
    assert_eq!(t.data_ptr() as usize % 64, 0);
    assert!(t.data_ptr() >= t.allocated_ptr());
    assert!(alloc.is_live(t.allocated_ptr()));
    drop(t);
    assert_eq!(alloc.live(), 0);
}

fn three_tensors(alloc: &Tracking) -> Vec<TensorHandle<&Tracking>> {
    (1..=3)
        .map(|n| Tensor::create_empty_in(&[n, 2], DType::I32, alloc).unwrap().into_raw())
        .collect()
}

#[test]
fn shallow_destroy_then_individual_destroy() {
    let alloc = Tracking::default();
    let handles = three_tensors(&alloc);
    let tensor_blocks = alloc.live();

    let list = unsafe { TensorList::from_handles_in(&handles, true, &alloc) }.unwrap();
    assert_eq!(alloc.live(), tensor_blocks + 1);
    list.destroy_shallow();
    assert_eq!(alloc.live(), tensor_blocks);

    for handle in handles {
        unsafe { Tensor::destroy(handle.as_ptr()) };
    }
    assert_eq!(alloc.live(), 0);
}

#[test]
fn deep_destroy_releases_everything() {
    let alloc = Tracking::default();
    let handles = three_tensors(&alloc);
    let list = unsafe { TensorList::from_handles_in(&handles, false, &alloc) }.unwrap();
    assert_eq!(list.get(2).shape(), &[3, 2]);
    list.destroy();
    assert_eq!(alloc.live(), 0);
}

#[test]
fn drop_follows_shallow_flag() {
    let alloc = Tracking::default();
    let handles = three_tensors(&alloc);
    let tensor_blocks = alloc.live();
    drop(unsafe { TensorList::from_handles_in(&handles, true, &alloc) }.unwrap());
    assert_eq!(alloc.live(), tensor_blocks);

    drop(unsafe { TensorList::from_handles_in(&handles, false, &alloc) }.unwrap());
    assert_eq!(alloc.live(), 0);
}

#[test]
fn owned_list_from_tensors() {
    let alloc = Tracking::default();
    let tensors: Vec<_> = (0..4)
        .map(|_| Tensor::create_empty_in(&[2], DType::F32, &alloc).unwrap())
        .collect();
    let list = TensorList::new_in(tensors, &alloc).unwrap();
    assert_eq!(list.len(), 4);
    drop(list);
    assert_eq!(alloc.live(), 0);
}

#[test]
fn list_slot_failure_releases_tensors() {
    // Two tensors take six requests; the seventh is the slot array.
    let alloc = Tracking::failing_at(6);
    let tensors: Vec<_> = (0..2)
        .map(|_| Tensor::create_empty_in(&[2], DType::F32, &alloc).unwrap())
        .collect();
    let err = TensorList::new_in(tensors, &alloc).unwrap_err();
    assert!(matches!(err, RuntimeError::ListAllocation { size: 2 }));
    assert_eq!(alloc.live(), 0);
}

use std::marker::PhantomData;

/// Mutable view of a slice that can be shared between invocations which write to
/// data-dependent indices (scatter writes). Callers are responsible for ensuring that no two
/// invocations write the same index during one dispatch.
pub struct ThreadSafeMutSlice<'a, T> {
    ptr: *mut T,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}
unsafe impl<'a, T: Send> Sync for ThreadSafeMutSlice<'a, T> {}
unsafe impl<'a, T: Send> Send for ThreadSafeMutSlice<'a, T> {}

impl<'a, T> ThreadSafeMutSlice<'a, T> {
    pub fn new(slice: &'a mut [T]) -> ThreadSafeMutSlice<'a, T> {
        ThreadSafeMutSlice {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Writes `value` to slot `idx`. Out-of-range indices are ignored.
    ///
    /// # Safety
    /// No other invocation may access slot `idx` while this write happens.
    pub unsafe fn write(&self, idx: usize, value: T) {
        if idx < self.len {
            *self.ptr.add(idx) = value;
        }
    }

    /// # Safety
    /// No other invocation may access slot `idx` while the returned reference is alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut(&self, idx: usize) -> Option<&mut T> {
        if idx < self.len {
            Some(&mut *self.ptr.add(idx))
        } else {
            None
        }
    }
}

#[test]
fn scatter_writes_through_shared_view() {
    use crate::concurrency::par_iter_mut0;

    let mut out = vec![0usize; 100];
    {
        let view = ThreadSafeMutSlice::new(&mut out);
        // reversal is a permutation, so every slot has exactly one writer
        par_iter_mut0(100, |i| unsafe { view.write(99 - i, i) });
        unsafe { view.write(1000, 1) };
    }
    for (slot, &value) in out.iter().enumerate() {
        assert_eq!(value, 99 - slot);
    }
}

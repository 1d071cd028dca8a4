//! Data-parallel dispatch primitives. Native builds run on the rayon pool; wasm32 builds
//! run every invocation sequentially in index order.

pub use internal::*;

#[cfg(target_arch = "wasm32")]
mod internal {

    /// Runs `kernel` once per workgroup. Workgroups execute in index order.
    pub fn dispatch_workgroups<F: Fn(usize) + Send + Sync>(num_groups: usize, kernel: F) {
        (0..num_groups).for_each(|group_id| {
            kernel(group_id);
        });
    }

    pub fn par_iter_mut0<F: Fn(usize) + Send + Sync>(n: usize, f: F) {
        (0..n).into_iter().for_each(|idx| {
            f(idx);
        });
    }

    pub fn par_iter_mut2<T1: Send + Sync, T2: Send + Sync, F: Fn(usize, &mut T1, &mut T2) + Send + Sync>(
        arr1: &mut [T1],
        arr2: &mut [T2],
        f: F,
    ) {
        arr1.into_iter()
            .zip(arr2.into_iter())
            .enumerate()
            .for_each(|(idx, (v1, v2))| {
                f(idx, v1, v2);
            });
    }

    pub fn par_map_reduce<X: Send, F: Fn(usize) -> X + Send + Sync, C: Fn(X, X) -> X + Send + Sync, I: Fn() -> X + Send + Sync>(
        n: usize,
        identity: I,
        combine: C,
        f: F,
    ) -> X {
        (0..n).map(|i| f(i)).fold(identity(), |acc, value| combine(acc, value))
    }
}

#[cfg(not(target_arch = "wasm32"))]
mod internal {
    use rayon::prelude::*;

    /// Runs `kernel` once per workgroup. Workgroups run concurrently on the pool without
    /// any ordering guarantee; the call returns after every workgroup has retired.
    ///
    /// Kernels that wait on other workgroups must only do so through plain spinning. Calling
    /// back into the pool while waiting could start a later workgroup on the same thread
    /// underneath the waiting one.
    pub fn dispatch_workgroups<F: Fn(usize) + Send + Sync>(num_groups: usize, kernel: F) {
        (0..num_groups).into_par_iter().for_each(|group_id| {
            kernel(group_id);
        });
    }

    pub fn par_iter_mut0<F: Fn(usize) + Send + Sync>(n: usize, f: F) {
        (0..n).into_par_iter().for_each(|idx| {
            f(idx);
        });
    }

    pub fn par_iter_mut2<T1: Send + Sync, T2: Send + Sync, F: Fn(usize, &mut T1, &mut T2) + Send + Sync>(
        arr1: &mut [T1],
        arr2: &mut [T2],
        f: F,
    ) {
        arr1.into_par_iter()
            .zip(arr2.into_par_iter())
            .enumerate()
            .for_each(|(idx, (v1, v2))| {
                f(idx, v1, v2);
            });
    }

    pub fn par_map_reduce<X: Send, F: Fn(usize) -> X + Send + Sync, C: Fn(X, X) -> X + Send + Sync, I: Fn() -> X + Send + Sync>(
        n: usize,
        identity: I,
        combine: C,
        f: F,
    ) -> X {
        (0..n).into_par_iter().map(|i| f(i)).reduce(identity, combine)
    }
}

#[test]
fn dispatch_visits_every_workgroup_once() {
    use std::sync::atomic::{AtomicU32, Ordering};

    let visits: Vec<AtomicU32> = (0..37).map(|_| AtomicU32::new(0)).collect();
    dispatch_workgroups(visits.len(), |group_id| {
        visits[group_id].fetch_add(1, Ordering::Relaxed);
    });
    assert!(visits.iter().all(|v| v.load(Ordering::Relaxed) == 1));
}

#[test]
fn map_reduce_sums() {
    let sum = par_map_reduce(1000, || 0u64, |a, b| a + b, |i| i as u64);
    assert_eq!(sum, 999 * 1000 / 2);
}

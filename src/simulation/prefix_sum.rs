//! Exclusive prefix sum over the per-cell particle counts.
//!
//! Each workgroup of `T` invocations scans a block of `2T` consecutive elements in its local
//! memory. The carry-in of a block is resolved either by a decoupled look-back over the
//! published states of its logical predecessors (one dispatch), or by scanning the block
//! totals recursively and adding them back (reduce-then-scan, O(log n) dispatches).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::{
    concurrency::dispatch_workgroups,
    simulation_parameters::{ScanStrategy, SimulationParams},
    thread_safe_ptr::ThreadSafeMutSlice,
};

/// Read access to the scan input.
pub trait CountSource: Sync {
    fn len(&self) -> usize;
    fn get(&self, i: usize) -> u32;
}

impl CountSource for [u32] {
    fn len(&self) -> usize {
        <[u32]>::len(self)
    }
    fn get(&self, i: usize) -> u32 {
        self[i]
    }
}

/// The counters are only read after the dispatch that incremented them has retired.
impl CountSource for [AtomicU32] {
    fn len(&self) -> usize {
        <[AtomicU32]>::len(self)
    }
    fn get(&self, i: usize) -> u32 {
        self[i].load(Ordering::Relaxed)
    }
}

/// Published state of one logical block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Pending,
    /// Sum of the block's own elements.
    AggregateKnown(u32),
    /// Sum of all elements up to and including the block.
    InclusiveKnown(u32),
}

const STATUS_SHIFT: u32 = 32;
const TAG_AGGREGATE: u64 = 1;
const TAG_INCLUSIVE: u64 = 2;

impl BlockStatus {
    fn pack(self) -> u64 {
        match self {
            BlockStatus::Pending => 0,
            BlockStatus::AggregateKnown(v) => (TAG_AGGREGATE << STATUS_SHIFT) | v as u64,
            BlockStatus::InclusiveKnown(v) => (TAG_INCLUSIVE << STATUS_SHIFT) | v as u64,
        }
    }

    fn unpack(packed: u64) -> BlockStatus {
        let value = packed as u32;
        match packed >> STATUS_SHIFT {
            TAG_AGGREGATE => BlockStatus::AggregateKnown(value),
            TAG_INCLUSIVE => BlockStatus::InclusiveKnown(value),
            _ => BlockStatus::Pending,
        }
    }
}

/// Cross-workgroup bookkeeping of the decoupled look-back. Must be reset before every scan.
pub struct ScanState {
    next_block: AtomicU32,
    blocks: Vec<AtomicU64>,

    look_back_steps: AtomicU64,
    fallbacks: AtomicU32,
}

impl ScanState {
    pub fn new(num_blocks: usize) -> ScanState {
        ScanState {
            next_block: AtomicU32::new(0),
            blocks: (0..num_blocks).map(|_| AtomicU64::new(BlockStatus::Pending.pack())).collect(),
            look_back_steps: AtomicU64::new(0),
            fallbacks: AtomicU32::new(0),
        }
    }

    pub fn reset(&mut self) {
        *self.next_block.get_mut() = 0;
        for block in self.blocks.iter_mut() {
            *block.get_mut() = BlockStatus::Pending.pack();
        }
        *self.look_back_steps.get_mut() = 0;
        *self.fallbacks.get_mut() = 0;
    }

    pub fn is_clear(&self) -> bool {
        self.next_block.load(Ordering::Relaxed) == 0
            && self.blocks.iter().all(|b| b.load(Ordering::Relaxed) == BlockStatus::Pending.pack())
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn status(&self, block: usize) -> BlockStatus {
        BlockStatus::unpack(self.blocks[block].load(Ordering::Acquire))
    }

    fn publish(&self, block: usize, status: BlockStatus) {
        self.blocks[block].store(status.pack(), Ordering::Release);
    }

    /// Predecessor states visited by all look-backs since the last reset.
    pub fn look_back_steps(&self) -> u64 {
        self.look_back_steps.load(Ordering::Relaxed)
    }

    /// Look-backs that exceeded the spin limit and recomputed their carry-in.
    pub fn fallbacks(&self) -> u32 {
        self.fallbacks.load(Ordering::Relaxed)
    }
}

pub fn num_scan_blocks(num_elements: usize, workgroup_size: usize) -> usize {
    let block_len = 2 * workgroup_size;
    (num_elements + block_len - 1) / block_len
}

/// Local memory and invocations of one workgroup.
struct Workgroup {
    size: usize,
    shared: Vec<u32>,
}

impl Workgroup {
    fn new(size: usize) -> Workgroup {
        Workgroup {
            size,
            shared: vec![0; 2 * size],
        }
    }

    /// Runs one barrier-delimited phase for all invocations. Returning is the barrier.
    fn for_each_invocation(&mut self, mut f: impl FnMut(usize, &mut [u32])) {
        for local_id in 0..self.size {
            f(local_id, &mut self.shared);
        }
    }

    /// Loads the block at `base` and turns local memory into its inclusive scan. Elements
    /// past the end of the input stay zero. Returns the block aggregate.
    fn load_and_scan<S: CountSource + ?Sized>(&mut self, input: &S, base: usize) -> u32 {
        let t = self.size;
        let n = input.len();

        self.for_each_invocation(|local_id, s| {
            for k in [local_id, local_id + t] {
                if base + k < n {
                    s[k] = input.get(base + k);
                }
            }
        });

        let mut half_size_group = 1;
        let mut size_group = 2;
        while half_size_group <= t {
            self.for_each_invocation(|local_id, s| {
                let gid = local_id / half_size_group;
                let tid = gid * size_group + half_size_group + local_id % half_size_group;
                s[tid] = s[tid].wrapping_add(s[gid * size_group + half_size_group - 1]);
            });
            half_size_group <<= 1;
            size_group <<= 1;
        }

        self.shared[2 * t - 1]
    }

    /// Writes `carry + exclusive local prefix` for every in-range element of the block.
    fn store_exclusive(&mut self, output: &ThreadSafeMutSlice<u32>, base: usize, carry: u32) {
        let t = self.size;
        let n = output.len();
        self.for_each_invocation(|local_id, s| {
            for k in [local_id, local_id + t] {
                if base + k < n {
                    let local_exclusive = if k == 0 { 0 } else { s[k - 1] };
                    // SAFETY: blocks cover disjoint ranges of the output
                    unsafe { output.write(base + k, carry.wrapping_add(local_exclusive)) };
                }
            }
        });
    }
}

/// Scans `input` into `output` with the strategy configured in `simulation_params`.
pub fn prefix_sum<S: CountSource + ?Sized>(
    simulation_params: &SimulationParams,
    input: &S,
    output: &mut [u32],
    state: &ScanState,
) {
    let workgroup_size = simulation_params.workgroup_size as usize;
    match simulation_params.scan_strategy {
        ScanStrategy::DecoupledLookBack => exclusive_scan_decoupled(
            input,
            output,
            state,
            workgroup_size,
            simulation_params.look_back_spin_limit,
        ),
        ScanStrategy::ReduceThenScan => exclusive_scan_reduce_then_scan(input, output, workgroup_size),
    }
}

/// Single-dispatch scan with dynamic block numbering and decoupled look-back.
///
/// Workgroups take their logical block index from a ticket counter when they start
/// executing, so a block only ever waits on blocks that are already running. `state` has to
/// be freshly reset and hold at least one record per block.
///
/// # Panics
///
/// Panics if `state` holds fewer than `num_scan_blocks(n, workgroup_size)` block records,
/// where `n` is the shorter of `input` and `output`.
pub fn exclusive_scan_decoupled<S: CountSource + ?Sized>(
    input: &S,
    output: &mut [u32],
    state: &ScanState,
    workgroup_size: usize,
    spin_limit: u32,
) {
    let n = input.len().min(output.len());
    let num_blocks = num_scan_blocks(n, workgroup_size);
    assert!(
        state.num_blocks() >= num_blocks,
        "scan state holds {} blocks but {} are needed",
        state.num_blocks(),
        num_blocks
    );
    debug_assert!(state.is_clear(), "scan state was not reset before the scan");

    let output = ThreadSafeMutSlice::new(&mut output[..n]);
    dispatch_workgroups(num_blocks, |_physical_group_id| {
        scan_block_decoupled(input, &output, state, workgroup_size, spin_limit);
    });
}

fn scan_block_decoupled<S: CountSource + ?Sized>(
    input: &S,
    output: &ThreadSafeMutSlice<u32>,
    state: &ScanState,
    workgroup_size: usize,
    spin_limit: u32,
) {
    let mut workgroup = Workgroup::new(workgroup_size);

    // invocation 0 draws the ticket, the others read it after the barrier
    let block = state.next_block.fetch_add(1, Ordering::Relaxed) as usize;
    let base = block * 2 * workgroup_size;

    let aggregate = workgroup.load_and_scan(input, base);
    let carry = look_back(input, state, block, base, aggregate, spin_limit);
    workgroup.store_exclusive(output, base, carry);
}

/// Resolves the carry-in of `block` and publishes its inclusive prefix.
fn look_back<S: CountSource + ?Sized>(
    input: &S,
    state: &ScanState,
    block: usize,
    base: usize,
    aggregate: u32,
    spin_limit: u32,
) -> u32 {
    if block == 0 {
        state.publish(0, BlockStatus::InclusiveKnown(aggregate));
        return 0;
    }

    state.publish(block, BlockStatus::AggregateKnown(aggregate));

    let mut carry: u32 = 0;
    let mut steps = 0;
    let mut j = block;
    while j > 0 {
        j -= 1;
        steps += 1;

        match wait_for_predecessor(state, j, spin_limit) {
            Some(BlockStatus::InclusiveKnown(prefix)) => {
                carry = carry.wrapping_add(prefix);
                break;
            }
            Some(BlockStatus::AggregateKnown(predecessor_aggregate)) => {
                carry = carry.wrapping_add(predecessor_aggregate);
            }
            Some(BlockStatus::Pending) | None => {
                log::warn!(
                    "look-back of block {} gave up on block {} after {} polls, recomputing carry-in",
                    block,
                    j,
                    spin_limit
                );
                state.fallbacks.fetch_add(1, Ordering::Relaxed);
                carry = (0..base).fold(0u32, |acc, i| acc.wrapping_add(input.get(i)));
                break;
            }
        }
    }
    state.look_back_steps.fetch_add(steps, Ordering::Relaxed);

    state.publish(block, BlockStatus::InclusiveKnown(aggregate.wrapping_add(carry)));
    carry
}

/// Polls the state of `block` until it is at least aggregate-known or the spin limit is hit.
fn wait_for_predecessor(state: &ScanState, block: usize, spin_limit: u32) -> Option<BlockStatus> {
    for poll in 0..spin_limit {
        match state.status(block) {
            BlockStatus::Pending => {
                if poll < 64 {
                    std::hint::spin_loop();
                } else {
                    std::thread::yield_now();
                }
            }
            status => return Some(status),
        }
    }
    None
}

/// Scan without inter-workgroup waiting: scan every block, scan the block totals
/// (recursively, until a single block covers them), then add the block offsets.
pub fn exclusive_scan_reduce_then_scan<S: CountSource + ?Sized>(input: &S, output: &mut [u32], workgroup_size: usize) {
    let n = input.len().min(output.len());
    let block_len = 2 * workgroup_size;
    let num_blocks = num_scan_blocks(n, workgroup_size);
    if num_blocks == 0 {
        return;
    }

    let mut block_sums = vec![0u32; num_blocks];
    {
        let output = ThreadSafeMutSlice::new(&mut output[..n]);
        let block_sums = ThreadSafeMutSlice::new(&mut block_sums);
        dispatch_workgroups(num_blocks, |block| {
            let mut workgroup = Workgroup::new(workgroup_size);
            let aggregate = workgroup.load_and_scan(input, block * block_len);
            workgroup.store_exclusive(&output, block * block_len, 0);
            // SAFETY: one writer per block
            unsafe { block_sums.write(block, aggregate) };
        });
    }

    if num_blocks == 1 {
        return;
    }

    let mut block_offsets = vec![0u32; num_blocks];
    exclusive_scan_reduce_then_scan(&block_sums[..], &mut block_offsets, workgroup_size);

    let output = ThreadSafeMutSlice::new(&mut output[..n]);
    dispatch_workgroups(num_blocks, |block| {
        let offset = block_offsets[block];
        for i in block * block_len..usize::min((block + 1) * block_len, n) {
            // SAFETY: one writer per block, and blocks cover disjoint ranges
            if let Some(value) = unsafe { output.get_mut(i) } {
                *value = value.wrapping_add(offset);
            }
        }
    });
}

#[cfg(test)]
fn reference_exclusive_scan(input: &[u32]) -> Vec<u32> {
    input
        .iter()
        .scan(0u32, |acc, &x| {
            let prefix = *acc;
            *acc += x;
            Some(prefix)
        })
        .collect()
}

#[test]
fn block_status_packing() {
    for status in [
        BlockStatus::Pending,
        BlockStatus::AggregateKnown(0),
        BlockStatus::AggregateKnown(u32::MAX),
        BlockStatus::InclusiveKnown(12345),
    ] {
        assert_eq!(BlockStatus::unpack(status.pack()), status);
    }
    // a zero aggregate must still be distinguishable from "not published"
    assert_ne!(BlockStatus::AggregateKnown(0).pack(), BlockStatus::Pending.pack());
}

#[test]
fn both_strategies_match_reference_at_block_edges() {
    let workgroup_size = 64;
    for n in [0, 1, 2, 127, 128, 129, 255, 256, 1000, 128 * 128 + 1] {
        let input: Vec<u32> = (0..n as u32).map(|i| (i * 7 + 3) % 5).collect();
        let expected = reference_exclusive_scan(&input);

        let mut output = vec![u32::MAX; n];
        let state = ScanState::new(num_scan_blocks(n, workgroup_size));
        exclusive_scan_decoupled(&input[..], &mut output, &state, workgroup_size, 1 << 20);
        assert_eq!(output, expected, "decoupled look-back, n={}", n);
        assert_eq!(state.fallbacks(), 0);

        let mut output = vec![u32::MAX; n];
        exclusive_scan_reduce_then_scan(&input[..], &mut output, workgroup_size);
        assert_eq!(output, expected, "reduce-then-scan, n={}", n);
    }
}

#[test]
fn every_block_ends_inclusive_known() {
    let input = vec![1u32; 1000];
    let mut output = vec![0; 1000];
    let state = ScanState::new(num_scan_blocks(1000, 4));
    exclusive_scan_decoupled(&input[..], &mut output, &state, 4, 1 << 20);

    for block in 0..state.num_blocks() {
        let end = usize::min((block + 1) * 8, 1000) as u32;
        assert_eq!(state.status(block), BlockStatus::InclusiveKnown(end));
    }
}

#[test]
fn stalled_predecessor_falls_back_to_recomputation() {
    let workgroup_size = 4;
    let input: Vec<u32> = (0..16).collect();
    let mut output = vec![0u32; 16];
    let state = ScanState::new(2);

    // block 0 never publishes: its ticket is taken but its workgroup never runs
    state.next_block.store(1, Ordering::Relaxed);
    {
        let output = ThreadSafeMutSlice::new(&mut output);
        scan_block_decoupled(&input[..], &output, &state, workgroup_size, 16);
    }

    let expected = reference_exclusive_scan(&input);
    assert_eq!(&output[8..], &expected[8..]);
    assert_eq!(state.fallbacks(), 1);
    assert_eq!(state.status(0), BlockStatus::Pending);
    assert_eq!(state.status(1), BlockStatus::InclusiveKnown(expected[15] + 15));
}

#[test]
fn reset_clears_state() {
    let input = vec![3u32; 300];
    let mut output = vec![0; 300];
    let mut state = ScanState::new(num_scan_blocks(300, 8));
    exclusive_scan_decoupled(&input[..], &mut output, &state, 8, 1 << 20);
    assert!(!state.is_clear());
    state.reset();
    assert!(state.is_clear());
    assert_eq!(state.look_back_steps(), 0);
}

#[test]
fn atomic_counters_are_a_count_source() {
    let counts: Vec<AtomicU32> = [2u32, 0, 5, 1].iter().map(|&c| AtomicU32::new(c)).collect();
    let mut output = vec![0; 4];
    exclusive_scan_reduce_then_scan(&counts[..], &mut output, 1);
    assert_eq!(output, vec![0, 2, 2, 7]);
}

#[test]
#[should_panic(expected = "scan state holds 1 blocks but 2 are needed")]
fn undersized_scan_state_panics() {
    let input = vec![1u32; 20];
    let mut output = vec![0; 20];
    let state = ScanState::new(1);
    exclusive_scan_decoupled(&input[..], &mut output, &state, 8, 1 << 10);
}

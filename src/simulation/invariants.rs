//! Post-frame consistency checks of the sort structures. Only run when `check_invariants` is set.

use thiserror::Error;

use crate::prefix_sum::CountSource;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("cell counts sum to {counted} but {expected} particles were hashed")]
    CountMismatch { counted: u64, expected: usize },
    #[error("cell {cell} starts at {start} which is before the end {previous_end} of the previous cell")]
    UnorderedCellStart { cell: usize, start: u32, previous_end: u64 },
    #[error("last cell ends at {end} instead of {expected}")]
    PartitionEnd { end: u64, expected: usize },
    #[error("sorted slot {slot} maps to particle {index} which is out of range")]
    IndexOutOfRange { slot: usize, index: u32 },
    #[error("particle {index} appears in sorted slots {first} and {second}")]
    DuplicateIndex { index: u32, first: usize, second: usize },
}

/// The ranges `[cell_start[h], cell_start[h] + count[h])` tile `[0, num_particles)` in cell order.
pub fn check_cell_partition<S: CountSource + ?Sized>(
    cell_start: &[u32],
    cell_count: &S,
    num_particles: usize,
) -> Result<(), InvariantViolation> {
    let counted: u64 = (0..cell_count.len()).map(|h| cell_count.get(h) as u64).sum();
    if counted != num_particles as u64 {
        return Err(InvariantViolation::CountMismatch {
            counted,
            expected: num_particles,
        });
    }

    let mut end: u64 = 0;
    for (cell, &start) in cell_start.iter().enumerate().take(cell_count.len()) {
        if start as u64 != end {
            return Err(InvariantViolation::UnorderedCellStart {
                cell,
                start,
                previous_end: end,
            });
        }
        end += cell_count.get(cell) as u64;
    }

    if end != num_particles as u64 {
        return Err(InvariantViolation::PartitionEnd {
            end,
            expected: num_particles,
        });
    }
    Ok(())
}

/// Every canonical index appears in the sorted-to-original map exactly once.
pub fn check_sort_bijection(original_index: &[u32]) -> Result<(), InvariantViolation> {
    let mut seen_at: Vec<Option<usize>> = vec![None; original_index.len()];
    for (slot, &index) in original_index.iter().enumerate() {
        let seen = seen_at
            .get_mut(index as usize)
            .ok_or(InvariantViolation::IndexOutOfRange { slot, index })?;
        if let Some(first) = *seen {
            return Err(InvariantViolation::DuplicateIndex {
                index,
                first,
                second: slot,
            });
        }
        *seen = Some(slot);
    }
    Ok(())
}

#[test]
fn partition_accepts_exclusive_scan() {
    let counts = vec![2, 0, 3, 1];
    let starts = vec![0, 2, 2, 5];
    assert_eq!(check_cell_partition(&starts, &counts[..], 6), Ok(()));
    assert_eq!(check_cell_partition(&[], &[0u32; 0][..], 0), Ok(()));
}

#[test]
fn partition_rejects_gaps_and_wrong_totals() {
    let counts = vec![2, 0, 3, 1];
    assert_eq!(
        check_cell_partition(&[0, 2, 3, 5], &counts[..], 6),
        Err(InvariantViolation::UnorderedCellStart {
            cell: 2,
            start: 3,
            previous_end: 2
        })
    );
    assert_eq!(
        check_cell_partition(&[0, 2, 2, 5], &counts[..], 7),
        Err(InvariantViolation::CountMismatch { counted: 6, expected: 7 })
    );
}

#[test]
fn bijection_detects_duplicates() {
    assert_eq!(check_sort_bijection(&[2, 0, 1]), Ok(()));
    assert_eq!(
        check_sort_bijection(&[2, 0, 2]),
        Err(InvariantViolation::DuplicateIndex {
            index: 2,
            first: 0,
            second: 2
        })
    );
    assert_eq!(
        check_sort_bijection(&[0, 3, 1]),
        Err(InvariantViolation::IndexOutOfRange { slot: 1, index: 3 })
    );
}

// CPU depth sort service
// View-space depth keys + 4-pass 8-bit LSD radix sort (one histogram/scatter per byte)
//
// With the `rayon` feature, jobs run on the rayon worker pool; otherwise they
// run inline on submit and the returned task is already complete.

use glam::{Mat4, Vec4};
use tracing::{debug, trace};

use crate::error::ServiceError;
use crate::services::{DepthSortService, SortRequest};
use crate::task::{spawn_job, task_channel, JobSlots, Task};

const RADIX: usize = 256;
const PASSES: u32 = 4;

/// Map an f32 to a u32 whose unsigned order matches the float order
#[inline]
pub fn depth_key(depth: f32) -> u32 {
    let bits = depth.to_bits();
    if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    }
}

/// Stable LSD radix sort of `keys`, applying the same permutation to `values`
pub fn radix_sort_pairs(keys: &mut Vec<u32>, values: &mut Vec<u32>) {
    let n = keys.len();
    debug_assert_eq!(n, values.len());
    let mut keys_temp = vec![0u32; n];
    let mut values_temp = vec![0u32; n];

    for pass in 0..PASSES {
        let shift = pass * 8;
        let mut histogram = [0usize; RADIX];

        for &key in keys.iter() {
            histogram[((key >> shift) & 0xFF) as usize] += 1;
        }

        // All keys share this digit; the pass would be the identity
        if histogram.iter().any(|&count| count == n) {
            continue;
        }

        // Exclusive prefix sum
        let mut sum = 0;
        for count in histogram.iter_mut() {
            let temp = *count;
            *count = sum;
            sum += temp;
        }

        for (&key, &value) in keys.iter().zip(values.iter()) {
            let digit = ((key >> shift) & 0xFF) as usize;
            let pos = histogram[digit];
            histogram[digit] += 1;
            keys_temp[pos] = key;
            values_temp[pos] = value;
        }

        std::mem::swap(keys, &mut keys_temp);
        std::mem::swap(values, &mut values_temp);
    }
}

#[cfg(feature = "rayon")]
fn depth_keys(positions: &[f32], row: Vec4) -> Vec<u32> {
    use rayon::prelude::*;
    positions
        .par_chunks_exact(3)
        .map(|p| depth_key(row.x * p[0] + row.y * p[1] + row.z * p[2] + row.w))
        .collect()
}

#[cfg(not(feature = "rayon"))]
fn depth_keys(positions: &[f32], row: Vec4) -> Vec<u32> {
    positions
        .chunks_exact(3)
        .map(|p| depth_key(row.x * p[0] + row.y * p[1] + row.z * p[2] + row.w))
        .collect()
}

/// Back-to-front draw order of `count` splats seen through `model_view`
///
/// View space looks down -z, so ascending view z is farthest first.
pub fn sort_by_depth(positions: &[f32], model_view: Mat4, count: usize) -> Result<Vec<u32>, ServiceError> {
    if positions.len() < count * 3 {
        return Err(ServiceError::new(format!(
            "sort request for {} splats carries only {} position components",
            count,
            positions.len()
        )));
    }
    if count > u32::MAX as usize {
        return Err(ServiceError::new(format!("{} splats exceed the u32 index range", count)));
    }

    let mut keys = depth_keys(&positions[..count * 3], model_view.row(2));
    let mut values: Vec<u32> = (0..count as u32).collect();
    radix_sort_pairs(&mut keys, &mut values);
    Ok(values)
}

/// Reference depth sorter with a bounded number of in-flight jobs
#[derive(Debug, Clone)]
pub struct CpuDepthSorter {
    slots: JobSlots,
}

impl Default for CpuDepthSorter {
    fn default() -> Self {
        Self::new(1)
    }
}

impl CpuDepthSorter {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            slots: JobSlots::new(max_in_flight),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.slots.in_use()
    }
}

impl DepthSortService for CpuDepthSorter {
    fn submit(&self, request: SortRequest) -> Option<Task<Vec<u32>>> {
        let Some(slot) = self.slots.try_acquire() else {
            trace!("Depth sorter busy ({} in flight)", self.in_flight());
            return None;
        };

        debug!("Depth sort submitted: {} splats (epoch {})", request.count, request.epoch);
        let (completer, task) = task_channel();
        let job = move || {
            let result = sort_by_depth(&request.positions, request.model_view, request.count);
            drop(slot);
            completer.complete(result);
        };
        spawn_job(job);

        Some(task)
    }
}

// Shared fixtures for the integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use glam::Vec3;
use rfs_gsplat_tiles::radix_sort::sort_by_depth;
use rfs_gsplat_tiles::{
    encode_splats, task_channel, DepthSortService, EncodeRequest, EncodedSplats, ServiceError, SortRequest, SplatEncodingService,
    Task, TaskCompleter, TileId, TileSplats,
};

/// Owned attribute buffers of one tile
#[derive(Debug, Clone)]
pub struct TileData {
    pub id: TileId,
    pub positions: Vec<f32>,
    pub rotations: Vec<f32>,
    pub scales: Vec<f32>,
    pub colors: Vec<u8>,
    pub original_ids: Option<Vec<u32>>,
    pub original_id_start: Option<u32>,
}

impl TileData {
    pub fn from_positions(id: u64, positions: &[Vec3]) -> Self {
        let n = positions.len();
        Self {
            id: TileId(id),
            positions: positions.iter().flat_map(|p| p.to_array()).collect(),
            rotations: [0.0, 0.0, 0.0, 1.0].repeat(n),
            scales: [0.2, 0.2, 0.2].repeat(n),
            colors: (0..n).flat_map(|i| [i as u8, 100, 200, 255]).collect(),
            original_ids: None,
            original_id_start: None,
        }
    }

    /// `n` splats spaced 1.0 apart along x, starting at `x0`
    pub fn line(id: u64, n: usize, x0: f32) -> Self {
        let positions: Vec<Vec3> = (0..n).map(|i| Vec3::new(x0 + i as f32, 0.0, -1.0)).collect();
        Self::from_positions(id, &positions)
    }

    pub fn with_original_ids(mut self, ids: Vec<u32>) -> Self {
        self.original_ids = Some(ids);
        self
    }

    pub fn with_original_id_start(mut self, start: u32) -> Self {
        self.original_id_start = Some(start);
        self
    }

    pub fn rgb(mut self) -> Self {
        self.colors = self
            .colors
            .chunks_exact(4)
            .flat_map(|c| [c[0], c[1], c[2]])
            .collect();
        self
    }

    pub fn tile(&self) -> TileSplats<'_> {
        let mut tile = TileSplats::new(self.id, &self.positions, &self.rotations, &self.scales, &self.colors);
        if let Some(ids) = &self.original_ids {
            tile = tile.with_original_ids(ids);
        }
        if let Some(start) = self.original_id_start {
            tile = tile.with_original_id_start(start);
        }
        tile
    }
}

pub fn tiles(data: &[TileData]) -> Vec<TileSplats<'_>> {
    data.iter().map(TileData::tile).collect()
}

/// Sorter whose requests are completed by the test
#[derive(Default)]
pub struct ManualSorter {
    pub busy: AtomicBool,
    pub pending: Mutex<Vec<(SortRequest, TaskCompleter<Vec<u32>>)>>,
    pub submissions: AtomicUsize,
}

impl ManualSorter {
    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Complete the oldest request with its correct depth order
    pub fn complete_next(&self) -> SortRequest {
        let (request, completer) = self.pending.lock().unwrap().remove(0);
        completer.complete(sort_by_depth(&request.positions, request.model_view, request.count));
        request
    }

    pub fn resolve_next(&self, order: Vec<u32>) -> SortRequest {
        let (request, completer) = self.pending.lock().unwrap().remove(0);
        completer.resolve(order);
        request
    }

    pub fn reject_next(&self, message: &str) -> SortRequest {
        let (request, completer) = self.pending.lock().unwrap().remove(0);
        completer.reject(ServiceError::new(message));
        request
    }
}

impl DepthSortService for ManualSorter {
    fn submit(&self, request: SortRequest) -> Option<Task<Vec<u32>>> {
        if self.busy.load(Ordering::SeqCst) {
            return None;
        }
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let (completer, task) = task_channel();
        self.pending.lock().unwrap().push((request, completer));
        Some(task)
    }
}

/// Sorter that answers synchronously with the correct order
#[derive(Default)]
pub struct ImmediateSorter {
    pub submissions: AtomicUsize,
    pub fail: AtomicBool,
}

impl DepthSortService for ImmediateSorter {
    fn submit(&self, request: SortRequest) -> Option<Task<Vec<u32>>> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Some(Task::ready(Err(ServiceError::new("sorter out of memory"))));
        }
        Some(Task::ready(sort_by_depth(&request.positions, request.model_view, request.count)))
    }
}

/// Encoder that answers synchronously and keeps the last request
#[derive(Default)]
pub struct ImmediateEncoder {
    pub submissions: AtomicUsize,
    pub fail: AtomicBool,
    pub last_colors: Mutex<Vec<u8>>,
}

impl ImmediateEncoder {
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn last_colors(&self) -> Vec<u8> {
        self.last_colors.lock().unwrap().clone()
    }
}

impl SplatEncodingService for ImmediateEncoder {
    fn submit(&self, request: EncodeRequest) -> Option<Task<EncodedSplats>> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        *self.last_colors.lock().unwrap() = request.colors.to_vec();
        if self.fail.load(Ordering::SeqCst) {
            return Some(Task::ready(Err(ServiceError::new("texture allocation failed"))));
        }
        Some(Task::ready(encode_splats(&request)))
    }
}

/// Encoder whose requests are completed by the test; can refuse while busy
#[derive(Default)]
pub struct ManualEncoder {
    pub busy: AtomicBool,
    pub pending: Mutex<Vec<(EncodeRequest, TaskCompleter<EncodedSplats>)>>,
    pub submissions: AtomicUsize,
    pub last_colors: Mutex<Vec<u8>>,
}

impl ManualEncoder {
    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn last_colors(&self) -> Vec<u8> {
        self.last_colors.lock().unwrap().clone()
    }

    /// Encode the oldest request and hand the result back
    pub fn complete_next(&self) {
        let (request, completer) = self.pending.lock().unwrap().remove(0);
        completer.complete(encode_splats(&request));
    }
}

impl SplatEncodingService for ManualEncoder {
    fn submit(&self, request: EncodeRequest) -> Option<Task<EncodedSplats>> {
        if self.busy.load(Ordering::SeqCst) {
            return None;
        }
        self.submissions.fetch_add(1, Ordering::SeqCst);
        *self.last_colors.lock().unwrap() = request.colors.to_vec();
        let (completer, task) = task_channel();
        self.pending.lock().unwrap().push((request, completer));
        Some(task)
    }
}

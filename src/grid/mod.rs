//! Spatial evidence grid.
//!
//! Cells are addressed by (level, morton code) and stored in a BTreeMap, so
//! iteration order is the deterministic ascending (level, morton) order by
//! construction. Batches apply in order with last-write-wins per key; a
//! batch that pushes the grid past capacity evicts deterministically before
//! returning.

pub mod morton;

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::fusion::mass::DsMass;

/// Grid resolution level, coarsest (L0) to finest (L6).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum GridLevel {
    L0 = 0,
    L1 = 1,
    L2 = 2,
    L3 = 3,
    L4 = 4,
    L5 = 5,
    L6 = 6,
}

/// Number of grid levels.
pub const LEVEL_COUNT: usize = 7;

impl GridLevel {
    pub const ALL: [GridLevel; LEVEL_COUNT] = [
        GridLevel::L0,
        GridLevel::L1,
        GridLevel::L2,
        GridLevel::L3,
        GridLevel::L4,
        GridLevel::L5,
        GridLevel::L6,
    ];

    pub fn from_index(index: u8) -> Result<Self> {
        Self::ALL
            .get(index as usize)
            .copied()
            .ok_or_else(|| anyhow!("grid level index out of range: {}", index))
    }

    pub fn index(self) -> u8 {
        self as u8
    }
}

/// Grid cell address: morton code plus level. Ordering is (level, morton).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpatialKey {
    pub level: GridLevel,
    pub morton_code: u64,
}

impl SpatialKey {
    pub fn new(level: GridLevel, morton_code: u64) -> Self {
        Self { level, morton_code }
    }

    /// Key for a world position at a given level and cell size.
    pub fn from_world(position: (f64, f64, f64), cell_size: f64, level: GridLevel) -> Result<Self> {
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(anyhow!("cell_size must be positive and finite, got {}", cell_size));
        }
        let q = (
            morton::quantize(position.0, cell_size),
            morton::quantize(position.1, cell_size),
            morton::quantize(position.2, cell_size),
        );
        Ok(Self {
            level,
            morton_code: morton::encode_quantized(q)?,
        })
    }
}

impl PartialOrd for SpatialKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SpatialKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.level
            .cmp(&other.level)
            .then(self.morton_code.cmp(&other.morton_code))
    }
}

/// Per-dimension observation confidences carried by a cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionalScores {
    pub brightness: f64,
    pub laplacian: f64,
    pub parallax: f64,
}

/// One evidence cell.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GridCell {
    pub patch_id: String,
    pub quantized_position: (i32, i32, i32),
    pub dimensional_scores: DimensionalScores,
    pub ds_mass: DsMass,
    pub level: GridLevel,
    pub directional_mask: u32,
    pub last_updated_ms: i64,
}

impl GridCell {
    /// Construct a cell; an invalid mass renormalizes rather than erroring.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        patch_id: String,
        quantized_position: (i32, i32, i32),
        dimensional_scores: DimensionalScores,
        ds_mass: DsMass,
        level: GridLevel,
        directional_mask: u32,
        last_updated_ms: i64,
    ) -> Self {
        let ds_mass = if ds_mass.is_valid() {
            ds_mass
        } else {
            DsMass::new(ds_mass.occupied, ds_mass.free, ds_mass.unknown)
        };
        Self {
            patch_id,
            quantized_position,
            dimensional_scores,
            ds_mass,
            level,
            directional_mask,
            last_updated_ms,
        }
    }

    pub fn key(&self) -> Result<SpatialKey> {
        Ok(SpatialKey {
            level: self.level,
            morton_code: morton::encode_quantized(self.quantized_position)?,
        })
    }
}

/// One mutation in a grid batch.
#[derive(Clone, Debug)]
pub enum GridOp {
    Insert { key: SpatialKey, cell: GridCell },
    Update { key: SpatialKey, cell: GridCell },
    Evict { key: SpatialKey },
}

/// Counters returned from a batch application.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GridApplyReport {
    pub inserted: usize,
    pub updated: usize,
    pub evicted: usize,
    /// Cells removed by the capacity policy after the batch applied.
    pub capacity_evicted: usize,
}

/// The bounded evidence grid.
#[derive(Clone, Debug)]
pub struct EvidenceGrid {
    cells: BTreeMap<SpatialKey, GridCell>,
    max_cells: usize,
}

impl EvidenceGrid {
    pub fn new(max_cells: usize) -> Result<Self> {
        if max_cells == 0 {
            return Err(anyhow!("max_cells must be nonzero"));
        }
        Ok(Self {
            cells: BTreeMap::new(),
            max_cells,
        })
    }

    /// Apply a batch atomically. Ops run in order; the last write to a key
    /// wins. Capacity is enforced once, after the whole batch has applied.
    pub fn apply(&mut self, batch: &[GridOp]) -> GridApplyReport {
        let mut report = GridApplyReport::default();
        for op in batch {
            match op {
                GridOp::Insert { key, cell } | GridOp::Update { key, cell } => {
                    let renormalized = if cell.ds_mass.is_valid() {
                        cell.clone()
                    } else {
                        let mut fixed = cell.clone();
                        fixed.ds_mass = DsMass::new(
                            cell.ds_mass.occupied,
                            cell.ds_mass.free,
                            cell.ds_mass.unknown,
                        );
                        fixed
                    };
                    if self.cells.insert(*key, renormalized).is_some() {
                        report.updated += 1;
                    } else {
                        report.inserted += 1;
                    }
                }
                GridOp::Evict { key } => {
                    if self.cells.remove(key).is_some() {
                        report.evicted += 1;
                    }
                }
            }
        }
        report.capacity_evicted = self.enforce_capacity();
        report
    }

    /// Evict by (ascending level, ascending last_updated_ms, ascending
    /// morton). Returns the number of cells dropped.
    fn enforce_capacity(&mut self) -> usize {
        if self.cells.len() <= self.max_cells {
            return 0;
        }
        let excess = self.cells.len() - self.max_cells;
        let mut victims: Vec<(GridLevel, i64, u64)> = self
            .cells
            .iter()
            .map(|(key, cell)| (key.level, cell.last_updated_ms, key.morton_code))
            .collect();
        victims.sort();
        for (level, _, morton_code) in victims.into_iter().take(excess) {
            self.cells.remove(&SpatialKey { level, morton_code });
        }
        excess
    }

    /// All cells, ascending by (level, morton). Two calls on the same state
    /// yield identical sequences.
    pub fn all_active_cells(&self) -> impl Iterator<Item = (&SpatialKey, &GridCell)> {
        self.cells.iter()
    }

    pub fn get(&self, key: &SpatialKey) -> Option<&GridCell> {
        self.cells.get(key)
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn max_cells(&self) -> usize {
        self.max_cells
    }

    /// Cell counts per level, L0..L6.
    pub fn level_breakdown(&self) -> [u64; LEVEL_COUNT] {
        let mut counts = [0u64; LEVEL_COUNT];
        for key in self.cells.keys() {
            counts[key.level.index() as usize] += 1;
        }
        counts
    }

    /// Occupancy-weighted coverage statistic in [0,1]: mean occupied mass
    /// over capacity-normalized cell count.
    pub fn coverage_fraction(&self, expected_cells: usize) -> f64 {
        if expected_cells == 0 {
            return 0.0;
        }
        let occupied: f64 = self.cells.values().map(|c| c.ds_mass.occupied).sum();
        (occupied / expected_cells as f64).clamp(0.0, 1.0)
    }
}

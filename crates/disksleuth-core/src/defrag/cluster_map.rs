//! Coarse per-cell occupancy map used only for the visual/report cluster
//! map (§3's `cluster_map`), never consulted by a correctness-sensitive
//! path — `free_regions`/`extent_index` are the source of truth there.
//!
//! Grounded in `map.c`'s "paint the grid" approach, recovered at the level
//! of detail spec.md's distillation preserved: a fixed-size grid of cells,
//! each covering an equal share of the volume's clusters, holding a single
//! dominant [`CellState`] used purely for the color swatch a report or UI
//! would render.

use super::types::{ClusterCount, Lcn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CellState {
    #[default]
    Free,
    Used,
    Fragmented,
    Mft,
    Unmovable,
}

#[derive(Debug, Clone)]
pub struct ClusterMap {
    cells: Vec<CellState>,
    clusters_per_cell: u64,
    total_clusters: u64,
}

impl ClusterMap {
    /// Builds an all-free map sized so each of `cell_count` cells covers an
    /// equal share of `total_clusters` (the last cell absorbs any
    /// remainder).
    pub fn new(total_clusters: ClusterCount, cell_count: usize) -> Self {
        let cell_count = cell_count.max(1);
        let clusters_per_cell = (total_clusters.0 / cell_count as u64).max(1);
        ClusterMap {
            cells: vec![CellState::default(); cell_count],
            clusters_per_cell,
            total_clusters: total_clusters.0,
        }
    }

    pub fn cells(&self) -> &[CellState] {
        &self.cells
    }

    fn cell_index(&self, lcn: Lcn) -> Option<usize> {
        if lcn.0 >= self.total_clusters {
            return None;
        }
        let idx = (lcn.0 / self.clusters_per_cell) as usize;
        Some(idx.min(self.cells.len() - 1))
    }

    /// Paints every cell touched by `[lcn, lcn+length)` with `state`. Later
    /// paints on an already-painted cell win, matching the reference's
    /// "last write wins" per-cell coloring since no cell ever needs to
    /// represent more than one dominant state at a time.
    pub fn paint(&mut self, lcn: Lcn, length: ClusterCount, state: CellState) {
        if length.is_zero() {
            return;
        }
        let start = match self.cell_index(lcn) {
            Some(i) => i,
            None => return,
        };
        let end = match self.cell_index(Lcn::new(lcn.0 + length.0 - 1)) {
            Some(i) => i,
            None => self.cells.len() - 1,
        };
        for cell in &mut self.cells[start..=end] {
            *cell = state;
        }
    }

    pub fn reset(&mut self) {
        self.cells.iter_mut().for_each(|c| *c = CellState::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paint_covers_touched_cells_only() {
        let mut map = ClusterMap::new(ClusterCount::new(1000), 10);
        map.paint(Lcn::new(0), ClusterCount::new(50), CellState::Used);
        assert_eq!(map.cells()[0], CellState::Used);
        assert_eq!(map.cells()[1], CellState::Free);
    }
}

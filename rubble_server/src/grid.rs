//! Spatial chunk grid for interest management.
//!
//! The playable area is divided into a fixed √C x √C grid of chunks, row
//! major. Chunks only answer "who needs to know about whom" — collision
//! detection stays entirely inside the physics engine. Membership sets are
//! ordered so iteration order is stable across ticks.

use std::collections::BTreeSet;

use rubble_shared::config::GameConfig;
use rubble_shared::math::Vec2;
use rubble_shared::protocol::{PlayerId, RockId};

/// Entity membership of one chunk. A cache over the arena, never the owner.
#[derive(Debug, Default, Clone)]
pub struct Chunk {
    pub players: BTreeSet<PlayerId>,
    pub rocks: BTreeSet<RockId>,
}

/// Row-major grid of chunks over the playable area.
#[derive(Debug)]
pub struct SpatialGrid {
    row_len: usize,
    cell: f32,
    border: f32,
    chunks: Vec<Chunk>,
}

impl SpatialGrid {
    pub fn new(cfg: &GameConfig) -> Self {
        let row_len = (cfg.chunk_count as f64).sqrt().round() as usize;
        Self {
            row_len,
            cell: cfg.playable_width() / row_len as f32,
            border: cfg.border_width,
            chunks: vec![Chunk::default(); cfg.chunk_count],
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn row_len(&self) -> usize {
        self.row_len
    }

    /// Maps a position to its chunk index. Out-of-range input clamps to the
    /// nearest edge chunk; boundary enforcement elsewhere keeps live entities
    /// inside the playable area.
    pub fn locate(&self, pos: Vec2) -> usize {
        let max = self.row_len as isize - 1;
        let col = (((pos.x - self.border) / self.cell).floor() as isize).clamp(0, max);
        let row = (((pos.y - self.border) / self.cell).floor() as isize).clamp(0, max);
        row as usize * self.row_len + col as usize
    }

    /// The 3x3 block centered on `chunk`, clipped at grid edges. No
    /// wraparound: an edge chunk simply has fewer neighbors.
    pub fn neighbors(&self, chunk: usize) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        let row = (chunk / self.row_len) as isize;
        let col = (chunk % self.row_len) as isize;
        let max = self.row_len as isize;
        for dy in -1..=1 {
            for dx in -1..=1 {
                let (r, c) = (row + dy, col + dx);
                if r < 0 || r >= max || c < 0 || c >= max {
                    continue;
                }
                out.insert(r as usize * self.row_len + c as usize);
            }
        }
        out
    }

    pub fn chunk(&self, idx: usize) -> &Chunk {
        &self.chunks[idx]
    }

    pub fn insert_player(&mut self, chunk: usize, id: PlayerId) {
        self.chunks[chunk].players.insert(id);
    }

    pub fn remove_player(&mut self, chunk: usize, id: PlayerId) {
        self.chunks[chunk].players.remove(&id);
    }

    pub fn insert_rock(&mut self, chunk: usize, id: RockId) {
        self.chunks[chunk].rocks.insert(id);
    }

    pub fn remove_rock(&mut self, chunk: usize, id: RockId) {
        self.chunks[chunk].rocks.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> SpatialGrid {
        SpatialGrid::new(&GameConfig::default())
    }

    #[test]
    fn locate_is_total_over_the_playable_area() {
        let g = grid();
        let cfg = GameConfig::default();
        let mut step = cfg.border_width;
        while step < cfg.world_width - cfg.border_width {
            let idx = g.locate(Vec2::new(step, step));
            assert!(idx < g.chunk_count());
            // Idempotent under repetition.
            assert_eq!(idx, g.locate(Vec2::new(step, step)));
            step += 1.7;
        }
    }

    #[test]
    fn locate_clamps_out_of_range_input() {
        let g = grid();
        assert_eq!(g.locate(Vec2::new(-50.0, -50.0)), 0);
        let last = g.chunk_count() - 1;
        assert_eq!(g.locate(Vec2::new(1e6, 1e6)), last);
    }

    #[test]
    fn neighbors_clip_at_edges_without_wrapping() {
        let g = grid();
        let row = g.row_len();

        // Corner chunk: itself plus 3 neighbors.
        let corner = g.neighbors(0);
        assert_eq!(corner.len(), 4);
        assert!(corner.iter().all(|&c| c < g.chunk_count()));
        // Nothing from the far column leaked in via wraparound.
        assert!(!corner.contains(&(row - 1)));

        // Edge (non-corner) chunk on the top row: 6 neighbors.
        assert_eq!(g.neighbors(1).len(), 6);

        // Interior chunk: full 3x3.
        let center = row + 1;
        assert_eq!(g.neighbors(center).len(), 9);
    }

    #[test]
    fn membership_moves_are_exact() {
        let mut g = grid();
        let id = RockId(5);
        g.insert_rock(3, id);
        assert!(g.chunk(3).rocks.contains(&id));
        g.remove_rock(3, id);
        g.insert_rock(4, id);
        assert!(!g.chunk(3).rocks.contains(&id));
        assert!(g.chunk(4).rocks.contains(&id));
    }
}

//! Configuration system.
//!
//! Loads server configuration from JSON strings/files (file IO left to app).
//! All parameters are read once at startup; there is no hot reload.

use serde::{Deserialize, Serialize};

/// Root configuration shared by server and tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Server listen address, e.g. `127.0.0.1:40000`.
    pub listen_addr: String,
    /// Fixed simulation tick rate.
    pub tick_hz: u32,
    /// World edge length, world units. The world is a square `[0, width]²`.
    #[serde(default = "default_world_width")]
    pub world_width: f32,
    /// Margin on every edge; entities past it are destroyed.
    #[serde(default = "default_border_width")]
    pub border_width: f32,
    /// Number of interest-management chunks. Must be a perfect square.
    #[serde(default = "default_chunk_count")]
    pub chunk_count: usize,
    /// Number of static backdrop tiles. Must be a perfect square.
    #[serde(default = "default_tile_count")]
    pub tile_count: usize,
    /// Target number of live rocks; the loop tops up one per tick below this.
    #[serde(default = "default_target_rocks")]
    pub target_rocks: usize,
}

fn default_world_width() -> f32 {
    300.0
}

fn default_border_width() -> f32 {
    20.0
}

fn default_chunk_count() -> usize {
    64
}

fn default_tile_count() -> usize {
    64
}

fn default_target_rocks() -> usize {
    60
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:40000".to_string(),
            tick_hz: 25,
            world_width: default_world_width(),
            border_width: default_border_width(),
            chunk_count: default_chunk_count(),
            tile_count: default_tile_count(),
            target_rocks: default_target_rocks(),
        }
    }
}

impl GameConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Rejects parameter combinations the grid cannot represent.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !is_perfect_square(self.chunk_count) {
            anyhow::bail!("chunk_count {} is not a perfect square", self.chunk_count);
        }
        if !is_perfect_square(self.tile_count) {
            anyhow::bail!("tile_count {} is not a perfect square", self.tile_count);
        }
        if self.world_width <= 2.0 * self.border_width {
            anyhow::bail!("world_width must exceed twice border_width");
        }
        if self.tick_hz == 0 {
            anyhow::bail!("tick_hz must be non-zero");
        }
        Ok(())
    }

    /// Edge length of the playable area (world minus both borders).
    pub fn playable_width(&self) -> f32 {
        self.world_width - 2.0 * self.border_width
    }

    /// True if `coord` lies outside the playable area on either axis.
    pub fn over_boundary(&self, coord: f32) -> bool {
        coord < self.border_width || coord > self.world_width - self.border_width
    }
}

fn is_perfect_square(n: usize) -> bool {
    let root = (n as f64).sqrt().round() as usize;
    root * root == n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        GameConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_non_square_chunk_count() {
        let cfg = GameConfig {
            chunk_count: 60,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn boundary_check_uses_border() {
        let cfg = GameConfig::default();
        assert!(cfg.over_boundary(10.0));
        assert!(cfg.over_boundary(295.0));
        assert!(!cfg.over_boundary(150.0));
    }
}

//! Tile coordinate generation and URL formatting.

use crate::config::{FixedMode, Pattern, TestConfig, TileBounds};
use rand::prelude::*;
use serde::{Deserialize, Serialize};

/// A tile coordinate (z/x/y).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    /// Zoom level
    pub z: u32,
    /// Column
    pub x: u32,
    /// Row
    pub y: u32,
}

impl TileCoord {
    pub fn new(z: u32, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }
}

/// Substitute `{z}`, `{x}` and `{y}` in a URL template.
///
/// Every occurrence is replaced; anything else in the template, including
/// other `{...}` tokens, passes through untouched.
pub fn format_url(template: &str, tile: TileCoord) -> String {
    template
        .replace("{z}", &tile.z.to_string())
        .replace("{x}", &tile.x.to_string())
        .replace("{y}", &tile.y.to_string())
}

/// Produces the coordinates one worker requests.
///
/// Each worker owns its generator, so nothing here is shared or locked.
pub struct TileGenerator {
    bounds: TileBounds,
    strategy: Strategy,
}

enum Strategy {
    Random(StdRng),
    Sweep { position: u64, len: u64 },
    Single(TileCoord),
}

impl TileGenerator {
    /// Build the generator for worker `worker` of `config.threads`.
    ///
    /// Random generators are seeded with `master_seed + worker`; sweeps start
    /// at an offset proportional to the worker index so workers do not move in
    /// lockstep over the same tiles.
    pub fn for_worker(config: &TestConfig, worker: usize, master_seed: u64) -> Self {
        match (config.pattern, config.fixed_mode) {
            (Pattern::Random, _) => {
                Self::random(config.bounds, master_seed.wrapping_add(worker as u64))
            }
            (Pattern::Fixed, FixedMode::Sweep) => {
                let len = config.bounds.tile_count() as u128;
                let workers = config.threads.max(1) as u128;
                let start = (worker as u128 * len / workers) as u64;
                Self::sweep(config.bounds, start)
            }
            (Pattern::Fixed, FixedMode::Single) => Self::single(config.bounds),
        }
    }

    /// Uniform random tiles inside `bounds`.
    ///
    /// `bounds` must already be validated; drawing from an inverted axis panics.
    pub fn random(bounds: TileBounds, seed: u64) -> Self {
        Self {
            bounds,
            strategy: Strategy::Random(StdRng::seed_from_u64(seed)),
        }
    }

    /// Row-major sweep (zoom, then row, then column) starting at linear index
    /// `start`, wrapping after the last tile.
    ///
    /// An inverted axis collapses to its minimum.
    pub fn sweep(bounds: TileBounds, start: u64) -> Self {
        let len = bounds.tile_count().max(1);
        Self {
            bounds,
            strategy: Strategy::Sweep {
                position: start % len,
                len,
            },
        }
    }

    /// The minimum corner of `bounds`, repeated.
    pub fn single(bounds: TileBounds) -> Self {
        let tile = TileCoord::new(bounds.min_zoom, bounds.min_x, bounds.min_y);
        Self {
            bounds,
            strategy: Strategy::Single(tile),
        }
    }

    /// Generate the next tile to request.
    pub fn next_tile(&mut self) -> TileCoord {
        let bounds = self.bounds;
        match &mut self.strategy {
            Strategy::Random(rng) => TileCoord {
                z: rng.gen_range(bounds.min_zoom..=bounds.max_zoom),
                x: rng.gen_range(bounds.min_x..=bounds.max_x),
                y: rng.gen_range(bounds.min_y..=bounds.max_y),
            },
            Strategy::Sweep { position, len } => {
                let tile = tile_at(&bounds, *position);
                *position = (*position + 1) % *len;
                tile
            }
            Strategy::Single(tile) => *tile,
        }
    }
}

/// Tile at a linear row-major index inside the box.
fn tile_at(bounds: &TileBounds, index: u64) -> TileCoord {
    let columns = bounds.columns();
    let per_zoom = columns.saturating_mul(bounds.rows());
    let within = index % per_zoom;
    TileCoord {
        z: bounds.min_zoom + (index / per_zoom) as u32,
        x: bounds.min_x + (within % columns) as u32,
        y: bounds.min_y + (within / columns) as u32,
    }
}

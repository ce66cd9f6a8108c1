//! Uniform square sector grid
//!
//! The world plane is cut into `sector_size` squares. Sectors are addressed by
//! integer coordinates clamped to the non-negative quadrant, so everything at
//! negative world coordinates piles into row/column 0.

use hashbrown::{HashMap, HashSet};
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;

use super::EntityId;
use crate::util::vec2::Vec2;

pub type IdSet = HashSet<EntityId, FxBuildHasher>;
pub type SectorSet = HashSet<SectorCoord, FxBuildHasher>;
pub type SectorMap = HashMap<SectorCoord, Sector, FxBuildHasher>;

/// Inline capacity covers the default radius-2 neighbourhood (5x5)
pub type ViewSectors = SmallVec<[SectorCoord; 25]>;

/// Integer address of a sector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectorCoord {
    pub x: i32,
    pub y: i32,
}

impl SectorCoord {
    #[inline]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Residents of one sector and the players currently subscribed to it
#[derive(Debug, Default)]
pub struct Sector {
    pub entities: IdSet,
    pub watchers: IdSet,
}

/// Pure coordinate math for the grid
#[derive(Debug, Clone, Copy)]
pub struct SectorGrid {
    sector_size: f32,
}

impl SectorGrid {
    /// Non-positive or non-finite sizes fall back to 1.0
    pub fn new(sector_size: f32) -> Self {
        let sector_size = if sector_size.is_finite() && sector_size > 0.0 {
            sector_size
        } else {
            1.0
        };
        Self { sector_size }
    }

    #[inline]
    pub fn sector_size(&self) -> f32 {
        self.sector_size
    }

    /// `floor(pos / size)` per axis, clamped to >= 0.
    ///
    /// NaN components land in sector 0 (saturating float cast).
    pub fn world_to_sector(&self, pos: Vec2) -> SectorCoord {
        let sx = (pos.x / self.sector_size).floor() as i32;
        let sy = (pos.y / self.sector_size).floor() as i32;
        SectorCoord::new(sx.max(0), sy.max(0))
    }

    /// The `(2R+1)^2` neighbourhood of `center`, row-major (y outer, x inner),
    /// with negative coordinates skipped.
    pub fn view_sectors(&self, center: SectorCoord, radius: i32) -> ViewSectors {
        let mut out = ViewSectors::new();
        for dy in -radius..=radius {
            let y = center.y.saturating_add(dy);
            if y < 0 {
                continue;
            }
            for dx in -radius..=radius {
                let x = center.x.saturating_add(dx);
                if x < 0 {
                    continue;
                }
                out.push(SectorCoord::new(x, y));
            }
        }
        out
    }
}

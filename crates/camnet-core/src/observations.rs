//! Observation data model: grid detections, triangulated world points, and
//! auxiliary point matches.

use crate::math::{Pt3, Real, Vec2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Index of a camera in the network.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct CamId(pub usize);

/// Index of a grid observation instant (one frame of the calibration target).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct GridId(pub usize);

impl fmt::Display for CamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cam{}", self.0)
    }
}

impl fmt::Display for GridId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grid{}", self.0)
    }
}

/// One detected calibration-target point in one camera's frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    /// Row coordinate on the physical target.
    pub row: i32,
    /// Column coordinate on the physical target.
    pub col: i32,
    /// Observed image position in pixels.
    pub pi: Vec2,
    /// Detected blob radius in pixels (diagnostic only).
    pub radius: Real,
}

impl GridPoint {
    pub fn new(row: i32, col: i32, pi: Vec2) -> Self {
        Self {
            row,
            col,
            pi,
            radius: 0.0,
        }
    }
}

/// Per-camera, per-frame table of grid detections.
///
/// `view(cam, grid)` is empty when that camera did not observe that frame.
/// After [`GridStore::filter_shared`], every camera covers the same
/// frame-index domain and every surviving frame is observed by at least two
/// cameras (unless the store holds exactly one camera).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GridStore {
    grids: Vec<Vec<Vec<GridPoint>>>,
}

impl GridStore {
    pub fn new(num_cameras: usize) -> Self {
        Self {
            grids: vec![Vec::new(); num_cameras],
        }
    }

    /// Build from raw per-camera frame tables, padding every camera to a
    /// common frame count.
    pub fn from_tables(mut tables: Vec<Vec<Vec<GridPoint>>>) -> Self {
        let num_frames = tables.iter().map(Vec::len).max().unwrap_or(0);
        for cam in tables.iter_mut() {
            cam.resize(num_frames, Vec::new());
        }
        Self { grids: tables }
    }

    pub fn num_cameras(&self) -> usize {
        self.grids.len()
    }

    pub fn num_grids(&self) -> usize {
        self.grids.first().map_or(0, Vec::len)
    }

    /// Observations of one grid by one camera (empty when unobserved).
    pub fn view(&self, cam: CamId, grid: GridId) -> &[GridPoint] {
        &self.grids[cam.0][grid.0]
    }

    /// True when the camera has a non-empty observation of the grid.
    pub fn observes(&self, cam: CamId, grid: GridId) -> bool {
        !self.view(cam, grid).is_empty()
    }

    /// Number of cameras with a non-empty observation of the grid.
    pub fn observer_count(&self, grid: GridId) -> usize {
        (0..self.num_cameras())
            .filter(|&c| self.observes(CamId(c), grid))
            .count()
    }

    /// Iterate over camera ids.
    pub fn cameras(&self) -> impl Iterator<Item = CamId> {
        (0..self.num_cameras()).map(CamId)
    }

    /// Iterate over grid ids.
    pub fn grid_ids(&self) -> impl Iterator<Item = GridId> {
        (0..self.num_grids()).map(GridId)
    }

    /// Replace a camera's table for one grid.
    pub fn set_view(&mut self, cam: CamId, grid: GridId, points: Vec<GridPoint>) {
        self.grids[cam.0][grid.0] = points;
    }

    /// Raw per-camera frame table (for file output).
    pub fn camera_table(&self, cam: CamId) -> &[Vec<GridPoint>] {
        &self.grids[cam.0]
    }

    /// Drop grids observed by fewer than two cameras and re-index.
    ///
    /// With exactly one camera in the store, every grid survives. Returns
    /// the number of grids kept.
    pub fn filter_shared(&mut self) -> usize {
        if self.num_cameras() <= 1 {
            return self.num_grids();
        }
        let keep: Vec<usize> = (0..self.num_grids())
            .filter(|&g| self.observer_count(GridId(g)) > 1)
            .collect();
        for cam in self.grids.iter_mut() {
            *cam = keep.iter().map(|&g| std::mem::take(&mut cam[g])).collect();
        }
        keep.len()
    }
}

/// A triangulated 3D grid corner, tagged with its source grid and its
/// physical target coordinate.
///
/// The `(row, col)` key is what lets a different camera's detection of the
/// same corner be matched to this point; detector ordering varies between
/// cameras.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldPoint {
    pub p: Pt3,
    pub grid: GridId,
    pub row: i32,
    pub col: i32,
}

/// An auxiliary point match: the same scene point observed in two or more
/// cameras, independent of the calibration grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointMatch {
    pub id: usize,
    /// Per-camera 2D observations.
    pub p2d: BTreeMap<CamId, Vec2>,
    /// Triangulated 3D position, once at least two observing cameras are set.
    pub p3d: Option<Pt3>,
}

impl PointMatch {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            p2d: BTreeMap::new(),
            p3d: None,
        }
    }

    /// Cameras observing this match.
    pub fn cameras(&self) -> impl Iterator<Item = CamId> + '_ {
        self.p2d.keys().copied()
    }

    pub fn num_views(&self) -> usize {
        self.p2d.len()
    }

    pub fn observation(&self, cam: CamId) -> Option<&Vec2> {
        self.p2d.get(&cam)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(row: i32, col: i32) -> GridPoint {
        GridPoint::new(row, col, Vec2::new(col as Real * 10.0, row as Real * 10.0))
    }

    fn store_with_pattern() -> GridStore {
        // 3 cameras, 4 grids. Grid 0: cams 0,1. Grid 1: cam 0 only.
        // Grid 2: cams 0,1,2. Grid 3: unobserved.
        let mut s = GridStore::from_tables(vec![
            vec![vec![pt(0, 0)], vec![pt(0, 1)], vec![pt(1, 0)], vec![]],
            vec![vec![pt(0, 0)], vec![], vec![pt(1, 0)], vec![]],
            vec![vec![], vec![], vec![pt(1, 0)], vec![]],
        ]);
        assert_eq!(s.num_grids(), 4);
        s.filter_shared();
        s
    }

    #[test]
    fn filter_keeps_only_shared_grids() {
        let s = store_with_pattern();
        assert_eq!(s.num_grids(), 2);
        for g in s.grid_ids() {
            assert!(s.observer_count(g) > 1);
        }
        // Frame domain stays equal across cameras.
        for c in s.cameras() {
            assert_eq!(s.camera_table(c).len(), 2);
        }
    }

    #[test]
    fn single_camera_store_keeps_everything() {
        let mut s = GridStore::from_tables(vec![vec![vec![pt(0, 0)], vec![], vec![pt(1, 1)]]]);
        assert_eq!(s.filter_shared(), 3);
        assert_eq!(s.num_grids(), 3);
    }

    #[test]
    fn point_match_views() {
        let mut m = PointMatch::new(7);
        m.p2d.insert(CamId(2), Vec2::new(1.0, 2.0));
        m.p2d.insert(CamId(0), Vec2::new(3.0, 4.0));
        assert_eq!(m.num_views(), 2);
        let cams: Vec<CamId> = m.cameras().collect();
        assert_eq!(cams, vec![CamId(0), CamId(2)]);
        assert!(m.observation(CamId(1)).is_none());
    }
}

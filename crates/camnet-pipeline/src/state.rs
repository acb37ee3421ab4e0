//! Mutable engine state threaded through the pipeline stages.

use camnet_core::{CamId, Calibration, GridId, GridStore, PointMatch, Vec2, WorldPoint};
use std::collections::HashMap;

use crate::steps::compute_sharing;

/// Complete state of the incremental calibration.
///
/// Cameras and grids move from unset to set and never back; stages mutate
/// the state only between iterations. `sharing` is computed once after grid
/// filtering and read-only afterwards.
#[derive(Debug, Clone)]
pub struct NetworkState {
    pub calibs: Vec<Calibration>,
    pub grids: GridStore,
    pub matches: Vec<PointMatch>,
    pub world_points: Vec<WorldPoint>,
    pub is_set_cam: Vec<bool>,
    pub is_set_grid: Vec<bool>,
    /// Symmetric count of grid frames visible by both cameras.
    pub sharing: Vec<Vec<usize>>,
    wp_index: HashMap<(GridId, i32, i32), usize>,
}

impl NetworkState {
    /// Build the initial state: filter unshared grids and compute the
    /// sharing matrix.
    pub fn new(calibs: Vec<Calibration>, mut grids: GridStore, matches: Vec<PointMatch>) -> Self {
        assert_eq!(calibs.len(), grids.num_cameras());
        grids.filter_shared();
        let sharing = compute_sharing(&grids);
        let num_cams = grids.num_cameras();
        let num_grids = grids.num_grids();
        Self {
            calibs,
            grids,
            matches,
            world_points: Vec::new(),
            is_set_cam: vec![false; num_cams],
            is_set_grid: vec![false; num_grids],
            sharing,
            wp_index: HashMap::new(),
        }
    }

    pub fn num_cameras(&self) -> usize {
        self.calibs.len()
    }

    pub fn is_cam_set(&self, cam: CamId) -> bool {
        self.is_set_cam[cam.0]
    }

    pub fn is_grid_set(&self, grid: GridId) -> bool {
        self.is_set_grid[grid.0]
    }

    /// Cameras with known pose, in index order.
    pub fn set_cams(&self) -> Vec<CamId> {
        (0..self.num_cameras())
            .map(CamId)
            .filter(|&c| self.is_cam_set(c))
            .collect()
    }

    /// Cameras still waiting for a pose.
    pub fn unset_cams(&self) -> Vec<CamId> {
        (0..self.num_cameras())
            .map(CamId)
            .filter(|&c| !self.is_cam_set(c))
            .collect()
    }

    /// Append a triangulated grid corner, keeping the lookup index current.
    pub fn add_world_point(&mut self, wp: WorldPoint) {
        self.wp_index
            .insert((wp.grid, wp.row, wp.col), self.world_points.len());
        self.world_points.push(wp);
    }

    /// Find the world point for a physical grid corner, if triangulated.
    pub fn world_point(&self, grid: GridId, row: i32, col: i32) -> Option<&WorldPoint> {
        self.wp_index
            .get(&(grid, row, col))
            .map(|&i| &self.world_points[i])
    }

    pub fn world_point_index(&self, grid: GridId, row: i32, col: i32) -> Option<usize> {
        self.wp_index.get(&(grid, row, col)).copied()
    }

    /// Undistorted pixel position of an observation in the given camera:
    /// what an ideal pinhole with the same K would have measured.
    pub fn ideal_pixel(&self, cam: CamId, pixel: &Vec2) -> Vec2 {
        let calib = &self.calibs[cam.0];
        let sensor = calib.intrinsics.pixel_to_sensor(pixel);
        let undistorted = calib.distortion.undistort(&sensor);
        calib.intrinsics.sensor_to_pixel(&undistorted)
    }
}

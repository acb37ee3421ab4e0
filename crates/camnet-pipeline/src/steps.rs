//! Step functions of the incremental calibration state machine.
//!
//! Each step mutates the [`NetworkState`] and reports what it achieved;
//! individual estimation failures are skip-and-retry, not errors. Cameras
//! and grids only ever move from unset to set.

use anyhow::{bail, Context, Result};
use camnet_core::{
    distance_between_rays, intersect_rays, BrownConrady5, CamId, GridId, GridPoint, GridStore,
    Iso3, Mat3, Mat34, Pt2, Pt3, RansacOptions, Ray, Real, Vec2, WorldPoint,
};
use camnet_linear::{
    dlt_homography, essential_from_fundamental, estimate_planar_pose, fundamental_8point,
    intrinsics_from_homographies, pnp_dlt_ransac, recover_pose, triangulate_point_linear,
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::config::NetworkConfig;
use crate::state::NetworkState;

/// Outcome of a single pose-estimation attempt.
///
/// `InsufficientData` and `ReprojectionTooHigh` are not errors: the camera
/// or grid stays unset and is retried on a later iteration once more of the
/// network is known.
#[derive(Debug, Clone, PartialEq)]
pub enum EstimationResult {
    Success(Iso3),
    InsufficientData,
    ReprojectionTooHigh(Real),
}

/// Symmetric matrix of grid frames visible by both cameras of each pair.
pub fn compute_sharing(grids: &GridStore) -> Vec<Vec<usize>> {
    let n = grids.num_cameras();
    let mut sharing = vec![vec![0usize; n]; n];
    for g in grids.grid_ids() {
        let observers: Vec<usize> = (0..n).filter(|&c| grids.observes(CamId(c), g)).collect();
        for (idx, &a) in observers.iter().enumerate() {
            for &b in &observers[idx + 1..] {
                sharing[a][b] += 1;
                sharing[b][a] += 1;
            }
        }
    }
    sharing
}

/// Physical target-plane position of a detected corner.
fn plane_point(gp: &GridPoint, cfg: &NetworkConfig) -> Pt2 {
    Pt2::new(
        gp.col as Real * cfg.grid_c_spacing,
        gp.row as Real * cfg.grid_r_spacing,
    )
}

/// Replace every camera's intrinsics with a Zhang closed-form estimate from
/// its own grid views.
///
/// Each usable view contributes one plane-to-image homography; a camera
/// needs at least three. Distortion is reset to zero and left for the final
/// refinement sweep to solve.
pub fn bootstrap_intrinsics(state: &mut NetworkState, cfg: &NetworkConfig) -> Result<usize> {
    let mut calibrated = 0;
    for cam in state.grids.cameras() {
        let mut homographies: Vec<Mat3> = Vec::new();
        for g in state.grids.grid_ids() {
            let view = state.grids.view(cam, g);
            if view.len() < 4 {
                continue;
            }
            let plane: Vec<Pt2> = view.iter().map(|gp| plane_point(gp, cfg)).collect();
            let image: Vec<Pt2> = view.iter().map(|gp| Pt2::from(gp.pi)).collect();
            match dlt_homography(&plane, &image) {
                Ok(h) => homographies.push(h),
                Err(err) => debug!(%cam, %g, %err, "homography estimation failed"),
            }
        }
        if homographies.len() < 3 {
            bail!(
                "cannot bootstrap intrinsics for {cam}: only {} usable grid views",
                homographies.len()
            );
        }
        let intr = intrinsics_from_homographies(&homographies)
            .with_context(|| format!("intrinsics bootstrap failed for {cam}"))?;
        info!(%cam, views = homographies.len(), f = intr.f, cx = intr.cx, cy = intr.cy,
            "bootstrapped intrinsics");
        state.calibs[cam.0].intrinsics = intr;
        state.calibs[cam.0].distortion = BrownConrady5::default();
        calibrated += 1;
    }
    Ok(calibrated)
}

/// Estimate the grid-to-camera pose of one grid from one camera's view.
///
/// Pixels are idealized (distortion removed) before the planar solve, then
/// the pose is validated by reprojecting through the full camera model.
pub fn estimate_grid_pose(
    state: &NetworkState,
    cfg: &NetworkConfig,
    cam: CamId,
    grid: GridId,
) -> EstimationResult {
    let view = state.grids.view(cam, grid);
    if view.len() < 4 {
        return EstimationResult::InsufficientData;
    }

    let plane: Vec<Pt2> = view.iter().map(|gp| plane_point(gp, cfg)).collect();
    let image: Vec<Pt2> = view
        .iter()
        .map(|gp| Pt2::from(state.ideal_pixel(cam, &gp.pi)))
        .collect();

    let calib = &state.calibs[cam.0];
    let pose = match estimate_planar_pose(&plane, &image, &calib.intrinsics.k_matrix()) {
        Ok(pose) => pose,
        Err(err) => {
            debug!(%cam, %grid, %err, "planar pose estimation failed");
            return EstimationResult::InsufficientData;
        }
    };

    // Validate against the raw observations through the full model.
    let mut sum = 0.0;
    let mut max = 0.0_f64;
    for (gp, plane_pt) in view.iter().zip(plane.iter()) {
        let pc = pose * Pt3::new(plane_pt.x, plane_pt.y, 0.0);
        let pw = calib.pose.inverse_transform_point(&pc);
        let Some(px) = calib.project(&pw) else {
            return EstimationResult::ReprojectionTooHigh(Real::INFINITY);
        };
        let err = (px - gp.pi).norm();
        sum += err;
        max = max.max(err);
    }
    let mean = sum / view.len() as Real;
    if mean > cfg.max_grid_mean_reproj || max > cfg.max_grid_max_reproj {
        return EstimationResult::ReprojectionTooHigh(mean.max(max));
    }
    EstimationResult::Success(pose)
}

/// Set every eligible unset grid by solving its pose from a set camera.
///
/// A grid is eligible when at least one set camera observes it and either a
/// candidate camera observes it too or more than one set camera does.
/// Returns the number of grids newly set.
pub fn initialise_grids(state: &mut NetworkState, cfg: &NetworkConfig, vari: &[CamId]) -> usize {
    let mut newly_set = 0;
    for g in state.grids.grid_ids() {
        if state.is_grid_set(g) {
            continue;
        }
        let set_observers: Vec<CamId> = state
            .set_cams()
            .into_iter()
            .filter(|&c| state.grids.observes(c, g))
            .collect();
        if set_observers.is_empty() {
            continue;
        }
        let vari_observes = vari.iter().any(|&c| state.grids.observes(c, g));
        if !vari_observes && set_observers.len() <= 1 {
            continue;
        }

        let cam = set_observers[0];
        match estimate_grid_pose(state, cfg, cam, g) {
            EstimationResult::Success(pose) => {
                let calib_pose = state.calibs[cam.0].pose;
                let view: Vec<GridPoint> = state.grids.view(cam, g).to_vec();
                for gp in view {
                    let plane_pt = plane_point(&gp, cfg);
                    let pc = pose * Pt3::new(plane_pt.x, plane_pt.y, 0.0);
                    let pw = calib_pose.inverse_transform_point(&pc);
                    state.add_world_point(WorldPoint {
                        p: pw,
                        grid: g,
                        row: gp.row,
                        col: gp.col,
                    });
                }
                state.is_set_grid[g.0] = true;
                newly_set += 1;
                debug!(%g, %cam, "grid set");
            }
            EstimationResult::ReprojectionTooHigh(err) => {
                debug!(%g, %cam, err, "grid rejected: reprojection too high");
            }
            EstimationResult::InsufficientData => {
                debug!(%g, %cam, "grid skipped: insufficient data");
            }
        }
    }
    if newly_set > 0 {
        info!(newly_set, total = state.world_points.len(), "grids initialised");
    }
    newly_set
}

/// Triangulate every auxiliary match visible by at least two set cameras.
///
/// Returns the number of matches newly triangulated.
pub fn initialise_aux_matches(state: &mut NetworkState) -> usize {
    let mut triangulated = 0;
    for m_idx in 0..state.matches.len() {
        if state.matches[m_idx].p3d.is_some() {
            continue;
        }
        let rays: Vec<Ray> = state.matches[m_idx]
            .p2d
            .iter()
            .filter(|(cam, _)| state.is_cam_set(**cam))
            .map(|(cam, px)| state.calibs[cam.0].unproject(px))
            .collect();
        if rays.len() < 2 {
            continue;
        }
        match intersect_rays(&rays) {
            Ok(p) => {
                state.matches[m_idx].p3d = Some(p);
                triangulated += 1;
            }
            Err(err) => {
                debug!(id = state.matches[m_idx].id, %err, "aux triangulation failed");
            }
        }
    }
    if triangulated > 0 {
        info!(triangulated, "aux matches triangulated");
    }
    triangulated
}

/// Drop auxiliary matches whose rays from set cameras disagree.
///
/// A match is removed when any pair of rays from set observing cameras
/// passes further apart than the configured threshold. Returns the number
/// of matches removed.
pub fn filter_matches_with_calib(state: &mut NetworkState, cfg: &NetworkConfig) -> usize {
    let calibs = &state.calibs;
    let is_set = &state.is_set_cam;
    let thresh = cfg.match_ray_distance_thresh;
    let before = state.matches.len();
    state.matches.retain(|m| {
        let rays: Vec<Ray> = m
            .p2d
            .iter()
            .filter(|(cam, _)| is_set[cam.0])
            .map(|(cam, px)| calibs[cam.0].unproject(px))
            .collect();
        if rays.len() < 2 {
            return true;
        }
        for (i, a) in rays.iter().enumerate() {
            for b in &rays[i + 1..] {
                if distance_between_rays(a, b) > thresh {
                    return false;
                }
            }
        }
        true
    });
    let removed = before - state.matches.len();
    if removed > 0 {
        info!(removed, kept = state.matches.len(), "aux matches filtered");
    }
    removed
}

/// Place one camera by PnP-RANSAC over all known 3D-2D correspondences.
///
/// Uses corners of set grids plus triangulated aux matches visible in the
/// camera. Needs correspondences from at least `min_grids_to_initialise_cam`
/// set grids unless more than four aux matches compensate.
pub fn estimate_cam_pos(
    state: &NetworkState,
    cfg: &NetworkConfig,
    cam: CamId,
) -> EstimationResult {
    let mut world = Vec::new();
    let mut image = Vec::new();
    let mut grids_used = HashSet::new();

    for g in state.grids.grid_ids() {
        if !state.is_grid_set(g) {
            continue;
        }
        for gp in state.grids.view(cam, g) {
            if let Some(wp) = state.world_point(g, gp.row, gp.col) {
                world.push(wp.p);
                image.push(state.ideal_pixel(cam, &gp.pi));
                grids_used.insert(g);
            }
        }
    }

    let mut aux_count = 0;
    for m in &state.matches {
        if let (Some(p3), Some(px)) = (m.p3d, m.observation(cam)) {
            world.push(p3);
            image.push(state.ideal_pixel(cam, px));
            aux_count += 1;
        }
    }

    if world.len() < 4 {
        return EstimationResult::InsufficientData;
    }
    if grids_used.len() < cfg.min_grids_to_initialise_cam && aux_count <= 4 {
        return EstimationResult::InsufficientData;
    }

    let opts = RansacOptions {
        max_iters: cfg.ransac_max_iters,
        thresh: cfg.ransac_thresh,
        ..RansacOptions::default()
    };
    match pnp_dlt_ransac(&world, &image, &state.calibs[cam.0].intrinsics, &opts) {
        Ok((pose, inliers)) => {
            debug!(%cam, inliers = inliers.len(), total = world.len(), "PnP-RANSAC placed camera");
            EstimationResult::Success(pose)
        }
        Err(err) => {
            debug!(%cam, %err, "PnP-RANSAC failed");
            EstimationResult::InsufficientData
        }
    }
}

fn projection_from_k_rt(k: &Mat3, pose: &Iso3) -> Mat34 {
    let mut rt = Mat34::zeros();
    rt.fixed_view_mut::<3, 3>(0, 0)
        .copy_from(pose.rotation.to_rotation_matrix().matrix());
    rt.set_column(3, &pose.translation.vector);
    k * rt
}

/// Fallback camera placement via an essential matrix against the set camera
/// sharing the most auxiliary matches.
///
/// The translation scale is unobservable from the essential matrix alone; it
/// is recovered as the median ratio of known to triangulated depth over the
/// corners of the first set grid both cameras observe.
pub fn estimate_cam_pos_from_f(
    state: &NetworkState,
    cfg: &NetworkConfig,
    cam: CamId,
) -> EstimationResult {
    // Partner: the set camera with the most shared matches.
    let mut best: Option<(CamId, usize)> = None;
    for s in state.set_cams() {
        let count = state
            .matches
            .iter()
            .filter(|m| m.observation(cam).is_some() && m.observation(s).is_some())
            .count();
        if best.map_or(true, |(_, b)| count > b) {
            best = Some((s, count));
        }
    }
    let Some((partner, shared)) = best else {
        return EstimationResult::InsufficientData;
    };
    if shared <= cfg.min_shared_points_for_essential {
        debug!(%cam, %partner, shared, "too few shared matches for essential fallback");
        return EstimationResult::InsufficientData;
    }

    let mut pts_partner = Vec::with_capacity(shared);
    let mut pts_cam = Vec::with_capacity(shared);
    for m in &state.matches {
        if let (Some(pa), Some(pc)) = (m.observation(partner), m.observation(cam)) {
            pts_partner.push(state.ideal_pixel(partner, pa));
            pts_cam.push(state.ideal_pixel(cam, pc));
        }
    }

    let k_partner = state.calibs[partner.0].intrinsics.k_matrix();
    let k_cam = state.calibs[cam.0].intrinsics.k_matrix();

    let rel = fundamental_8point(&pts_partner, &pts_cam)
        .and_then(|f| essential_from_fundamental(&f, &k_partner, &k_cam))
        .and_then(|e| recover_pose(&e, &k_partner, &k_cam, &pts_partner, &pts_cam));
    let rel = match rel {
        Ok(rel) => rel,
        Err(err) => {
            debug!(%cam, %partner, %err, "essential-matrix recovery failed");
            return EstimationResult::InsufficientData;
        }
    };

    // Recover absolute scale from the first set grid both cameras observe.
    let partner_pose = state.calibs[partner.0].pose;
    let p1 = projection_from_k_rt(&k_partner, &Iso3::identity());
    let p2 = projection_from_k_rt(&k_cam, &rel);

    let mut scale = None;
    for g in state.grids.grid_ids() {
        if !state.is_grid_set(g)
            || !state.grids.observes(partner, g)
            || !state.grids.observes(cam, g)
        {
            continue;
        }
        let cam_view: HashMap<(i32, i32), Vec2> = state
            .grids
            .view(cam, g)
            .iter()
            .map(|gp| ((gp.row, gp.col), state.ideal_pixel(cam, &gp.pi)))
            .collect();

        let mut ratios = Vec::new();
        for gp in state.grids.view(partner, g) {
            let Some(px_cam) = cam_view.get(&(gp.row, gp.col)) else {
                continue;
            };
            let Some(wp) = state.world_point(g, gp.row, gp.col) else {
                continue;
            };
            let px_partner = state.ideal_pixel(partner, &gp.pi);
            let Ok(x) = triangulate_point_linear(&[p1, p2], &[px_partner, *px_cam]) else {
                continue;
            };
            // Both depth estimates live in the partner's camera frame.
            let depth_tri = x.z;
            let depth_known = (partner_pose * wp.p).z;
            if depth_tri > 0.0 && depth_known > 0.0 {
                ratios.push(depth_known / depth_tri);
            }
        }
        if !ratios.is_empty() {
            ratios.sort_by(|a, b| a.total_cmp(b));
            scale = Some(ratios[ratios.len() / 2]);
            break;
        }
    }
    let Some(scale) = scale else {
        debug!(%cam, %partner, "no shared set grid to recover scale from");
        return EstimationResult::InsufficientData;
    };

    let scaled_rel = Iso3::from_parts((rel.translation.vector * scale).into(), rel.rotation);
    let pose = scaled_rel * partner_pose;
    info!(%cam, %partner, scale, "camera placed via essential-matrix fallback");
    EstimationResult::Success(pose)
}

/// Attempt to place every unset camera in `targets`.
///
/// Tries PnP first, then the essential-matrix fallback. Returns the number
/// of cameras newly set; the rest stay unset for a later iteration.
pub fn initialise_cams(state: &mut NetworkState, cfg: &NetworkConfig, targets: &[CamId]) -> usize {
    let mut newly_set = 0;
    for &cam in targets {
        if state.is_cam_set(cam) {
            continue;
        }
        let result = match estimate_cam_pos(state, cfg, cam) {
            EstimationResult::Success(pose) => EstimationResult::Success(pose),
            _ => estimate_cam_pos_from_f(state, cfg, cam),
        };
        match result {
            EstimationResult::Success(pose) => {
                state.calibs[cam.0].pose = pose;
                state.is_set_cam[cam.0] = true;
                newly_set += 1;
                info!(%cam, "camera set");
            }
            other => {
                debug!(%cam, ?other, "camera left unset");
            }
        }
    }
    newly_set
}

/// Decide the next candidate cameras; returns `true` when nothing more can
/// be added and the outer loop should finalize.
///
/// The first call (both lists empty) picks the root camera and the initial
/// candidates; later calls promote candidates to the anchored set and pick
/// the best-connected unset cameras, falling back to auxiliary-match counts
/// for rigs where the target was never co-visible.
pub fn pick_cameras(
    state: &mut NetworkState,
    cfg: &NetworkConfig,
    fixed: &mut Vec<CamId>,
    vari: &mut Vec<CamId>,
) -> Result<bool> {
    let n = state.num_cameras();
    let multi_view_matches = state.matches.iter().filter(|m| m.num_views() >= 2).count();

    if fixed.is_empty() && vari.is_empty() {
        for (i, row) in state.sharing.iter().enumerate() {
            debug!(cam = i, sharing = ?row, "grid sharing");
        }

        let root = match cfg.root_cam {
            Some(r) => {
                if r >= n {
                    bail!("configured root camera {r} out of range ({n} cameras)");
                }
                CamId(r)
            }
            None => {
                let connectivity = |i: usize| {
                    (0..n)
                        .filter(|&j| j != i && state.sharing[i][j] > cfg.min_shared_grids)
                        .count()
                };
                let best = (0..n).max_by_key(|&i| connectivity(i));
                match best.filter(|&i| connectivity(i) > 0) {
                    Some(i) => CamId(i),
                    None if multi_view_matches >= cfg.min_aux_matches_for_root => CamId(0),
                    None => bail!("cannot pick a root camera: no grids, no aux matches"),
                }
            }
        };
        state.is_set_cam[root.0] = true;
        info!(%root, "root camera selected");

        vari.push(root);
        // First companion: the unset camera best connected to the root.
        let companion = (0..n)
            .map(CamId)
            .filter(|&c| c != root && state.sharing[root.0][c.0] > cfg.min_shared_grids)
            .max_by_key(|&c| state.sharing[root.0][c.0]);
        if let Some(c) = companion {
            vari.push(c);
        } else if let Some(c) = pick_by_aux_matches(state, cfg, fixed) {
            vari.push(c);
        }
        info!(?vari, "initial candidate cameras");
        return Ok(false);
    }

    // Promote the previous round's candidates, whether or not they were
    // successfully placed; a failed camera is not proposed again.
    for &c in vari.iter() {
        if !fixed.contains(&c) {
            fixed.push(c);
        }
    }
    vari.clear();

    let total_sharing = |c: CamId| -> usize { fixed.iter().map(|f| state.sharing[c.0][f.0]).sum() };
    let mut candidates: Vec<CamId> = (0..n)
        .map(CamId)
        .filter(|&c| !state.is_cam_set(c) && !fixed.contains(&c))
        .filter(|&c| total_sharing(c) > cfg.min_shared_grids)
        .collect();
    candidates.sort_by_key(|&c| std::cmp::Reverse(total_sharing(c)));

    if !candidates.is_empty() {
        if cfg.force_one_cam {
            vari.push(candidates[0]);
        } else {
            vari.extend(candidates);
        }
    } else if let Some(c) = pick_by_aux_matches(state, cfg, fixed) {
        vari.push(c);
    }

    if vari.is_empty() {
        info!(set = state.set_cams().len(), total = n, "no more cameras to add");
        return Ok(true);
    }
    info!(?fixed, ?vari, "next calibration round");
    Ok(false)
}

/// Unset camera observed by the most multi-view auxiliary matches, when
/// that count clears the configured bar.
fn pick_by_aux_matches(
    state: &NetworkState,
    cfg: &NetworkConfig,
    fixed: &[CamId],
) -> Option<CamId> {
    (0..state.num_cameras())
        .map(CamId)
        .filter(|&c| !state.is_cam_set(c) && !fixed.contains(&c))
        .map(|c| {
            let count = state
                .matches
                .iter()
                .filter(|m| m.num_views() >= 2 && m.observation(c).is_some())
                .count();
            (c, count)
        })
        .filter(|&(_, count)| count > cfg.min_aux_matches_for_pick)
        .max_by_key(|&(_, count)| count)
        .map(|(c, _)| c)
}

/// Measure grid-corner spacing against the configured physical spacing and
/// rescale the whole reconstruction by a single factor.
///
/// Applies to every set camera translation, every world point, and every
/// triangulated aux match. Returns the factor, or `None` when no adjacent
/// corner pairs are available to measure.
pub fn check_and_fix_scale(state: &mut NetworkState, cfg: &NetworkConfig) -> Option<Real> {
    let mut corners: HashMap<GridId, HashMap<(i32, i32), Pt3>> = HashMap::new();
    for wp in &state.world_points {
        corners
            .entry(wp.grid)
            .or_default()
            .insert((wp.row, wp.col), wp.p);
    }

    let mut row_spacings = Vec::new();
    let mut col_spacings = Vec::new();
    for grid in corners.values() {
        for (&(r, c), p) in grid {
            if let Some(q) = grid.get(&(r + 1, c)) {
                row_spacings.push((p - q).norm());
            }
            if let Some(q) = grid.get(&(r, c + 1)) {
                col_spacings.push((p - q).norm());
            }
        }
    }

    let mean = |v: &[Real]| v.iter().sum::<Real>() / v.len() as Real;
    let mut ratios = Vec::new();
    if !row_spacings.is_empty() {
        ratios.push(cfg.grid_r_spacing / mean(&row_spacings));
    }
    if !col_spacings.is_empty() {
        ratios.push(cfg.grid_c_spacing / mean(&col_spacings));
    }
    if ratios.is_empty() {
        return None;
    }
    let scale = mean(&ratios);

    for (idx, calib) in state.calibs.iter_mut().enumerate() {
        if state.is_set_cam[idx] {
            calib.pose.translation.vector *= scale;
        }
    }
    for wp in &mut state.world_points {
        wp.p = Pt3::from(wp.p.coords * scale);
    }
    for m in &mut state.matches {
        if let Some(p) = m.p3d {
            m.p3d = Some(Pt3::from(p.coords * scale));
        }
    }
    if (scale - 1.0).abs() > 1e-6 {
        info!(scale, "reconstruction rescaled");
    } else {
        debug!(scale, "scale check");
    }
    Some(scale)
}

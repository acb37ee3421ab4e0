//! Plain-text file formats: grid detections, auxiliary matches, camera
//! calibrations, and the diagnostic outputs.
//!
//! All readers parse a whitespace token stream, so extra blank lines and
//! line-wrapping differences are tolerated; writers emit the canonical
//! layout.

use anyhow::{anyhow, bail, Context, Result};
use camnet_core::{
    CamId, Calibration, GridPoint, Intrinsics, Iso3, Mat3, Mat4, PointMatch, Real, Vec2,
};
use camnet_core::BrownConrady5;
use nalgebra::{Rotation3, Translation3, UnitQuaternion};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::report::grid_errors;
use crate::state::NetworkState;

struct Tokens<'a> {
    iter: std::str::SplitWhitespace<'a>,
    context: &'a str,
}

impl<'a> Tokens<'a> {
    fn new(text: &'a str, context: &'a str) -> Self {
        Self {
            iter: text.split_whitespace(),
            context,
        }
    }

    fn next_str(&mut self) -> Result<&'a str> {
        self.iter
            .next()
            .ok_or_else(|| anyhow!("unexpected end of {}", self.context))
    }

    fn next_usize(&mut self) -> Result<usize> {
        let tok = self.next_str()?;
        tok.parse()
            .with_context(|| format!("bad integer {:?} in {}", tok, self.context))
    }

    fn next_i32(&mut self) -> Result<i32> {
        let tok = self.next_str()?;
        tok.parse()
            .with_context(|| format!("bad integer {:?} in {}", tok, self.context))
    }

    fn next_real(&mut self) -> Result<Real> {
        let tok = self.next_str()?;
        tok.parse()
            .with_context(|| format!("bad number {:?} in {}", tok, self.context))
    }

    fn is_empty(&mut self) -> bool {
        self.iter.clone().next().is_none()
    }
}

/// Read one camera's grid-detection file.
///
/// Each record is `<frameIndex> <pointCount>` followed by `pointCount`
/// lines of `<row> <col> <x> <y>`. Frames not listed come back empty.
pub fn read_grids(path: &Path) -> Result<Vec<Vec<GridPoint>>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading grid file {}", path.display()))?;
    let mut tok = Tokens::new(&text, "grid file");
    let mut table: Vec<Vec<GridPoint>> = Vec::new();
    while !tok.is_empty() {
        let frame = tok.next_usize()?;
        let count = tok.next_usize()?;
        let mut points = Vec::with_capacity(count);
        for _ in 0..count {
            let row = tok.next_i32()?;
            let col = tok.next_i32()?;
            let x = tok.next_real()?;
            let y = tok.next_real()?;
            points.push(GridPoint::new(row, col, Vec2::new(x, y)));
        }
        if frame >= table.len() {
            table.resize(frame + 1, Vec::new());
        }
        table[frame] = points;
    }
    info!(path = %path.display(), frames = table.len(), "grid file loaded");
    Ok(table)
}

/// Write one camera's grid-detection file; empty frames are omitted.
pub fn write_grids(path: &Path, table: &[Vec<GridPoint>]) -> Result<()> {
    let mut out = String::new();
    for (frame, points) in table.iter().enumerate() {
        if points.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{} {}", frame, points.len());
        for gp in points {
            let _ = writeln!(out, "{} {} {} {}", gp.row, gp.col, gp.pi.x, gp.pi.y);
        }
    }
    fs::write(path, out).with_context(|| format!("writing grid file {}", path.display()))
}

/// Read an auxiliary match file.
///
/// Header: `<numSources>` then one camera name per line, `<numMatches>`.
/// Each match: `<id> <numViews>` then `<srcName> <x> <y> <w>` per view.
/// `names` maps source names to camera indices; unknown names are an error.
pub fn read_matches(path: &Path, names: &[String]) -> Result<Vec<PointMatch>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading match file {}", path.display()))?;
    let mut tok = Tokens::new(&text, "match file");

    let num_sources = tok.next_usize()?;
    let mut sources = Vec::with_capacity(num_sources);
    for _ in 0..num_sources {
        let name = tok.next_str()?;
        let cam = names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| anyhow!("unknown match source {:?}", name))?;
        sources.push(CamId(cam));
    }

    let num_matches = tok.next_usize()?;
    let mut matches = Vec::with_capacity(num_matches);
    for _ in 0..num_matches {
        let id = tok.next_usize()?;
        let num_views = tok.next_usize()?;
        let mut m = PointMatch::new(id);
        for _ in 0..num_views {
            let name = tok.next_str()?;
            let x = tok.next_real()?;
            let y = tok.next_real()?;
            let _w = tok.next_real()?;
            let cam = names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| anyhow!("unknown match source {:?}", name))?;
            m.p2d.insert(CamId(cam), Vec2::new(x, y));
        }
        matches.push(m);
    }
    info!(path = %path.display(), matches = matches.len(), "match file loaded");
    Ok(matches)
}

/// Write an auxiliary match file using the given camera names.
pub fn write_matches(path: &Path, names: &[String], matches: &[PointMatch]) -> Result<()> {
    let mut out = String::new();
    let _ = writeln!(out, "{}", names.len());
    for name in names {
        let _ = writeln!(out, "{name}");
    }
    let _ = writeln!(out, "{}", matches.len());
    for m in matches {
        let _ = writeln!(out, "{} {}", m.id, m.num_views());
        for (cam, px) in &m.p2d {
            let name = names
                .get(cam.0)
                .ok_or_else(|| anyhow!("camera {} has no name", cam))?;
            let _ = writeln!(out, "{} {} {} 1.0", name, px.x, px.y);
        }
    }
    fs::write(path, out).with_context(|| format!("writing match file {}", path.display()))
}

/// Read one camera's calibration file: `width height`, a row-major 3x3
/// intrinsic matrix, a row-major 4x4 world-to-camera transform, and five
/// distortion coefficients.
pub fn read_calibration(path: &Path) -> Result<Calibration> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading calibration {}", path.display()))?;
    let mut tok = Tokens::new(&text, "calibration file");

    let width = tok.next_usize()? as u32;
    let height = tok.next_usize()? as u32;

    let mut k = Mat3::zeros();
    for r in 0..3 {
        for c in 0..3 {
            k[(r, c)] = tok.next_real()?;
        }
    }
    let intrinsics = Intrinsics::from_k_matrix(&k)
        .with_context(|| format!("bad intrinsic matrix in {}", path.display()))?;

    let mut l = Mat4::zeros();
    for r in 0..4 {
        for c in 0..4 {
            l[(r, c)] = tok.next_real()?;
        }
    }
    let bottom = l.fixed_view::<1, 4>(3, 0).into_owned();
    if (bottom - nalgebra::RowVector4::new(0.0, 0.0, 0.0, 1.0)).norm() > 1e-9 {
        bail!("transform in {} is not rigid", path.display());
    }
    let rot = Rotation3::from_matrix(&l.fixed_view::<3, 3>(0, 0).into_owned());
    let pose = Iso3::from_parts(
        Translation3::new(l[(0, 3)], l[(1, 3)], l[(2, 3)]),
        UnitQuaternion::from_rotation_matrix(&rot),
    );

    let mut coeffs = [0.0; 5];
    for c in coeffs.iter_mut() {
        *c = tok.next_real()?;
    }

    Ok(Calibration {
        width,
        height,
        intrinsics,
        distortion: BrownConrady5::from_coeffs(coeffs),
        pose,
    })
}

/// Write one camera's calibration file.
pub fn write_calibration(path: &Path, calib: &Calibration) -> Result<()> {
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", calib.width, calib.height);
    let k = calib.intrinsics.k_matrix();
    for r in 0..3 {
        let _ = writeln!(out, "{} {} {}", k[(r, 0)], k[(r, 1)], k[(r, 2)]);
    }
    let l = calib.pose.to_homogeneous();
    for r in 0..4 {
        let _ = writeln!(
            out,
            "{} {} {} {}",
            l[(r, 0)],
            l[(r, 1)],
            l[(r, 2)],
            l[(r, 3)]
        );
    }
    let c = calib.distortion.coeffs();
    let _ = writeln!(out, "{} {} {} {} {}", c[0], c[1], c[2], c[3], c[4]);
    fs::write(path, out).with_context(|| format!("writing calibration {}", path.display()))
}

/// Write the triangulated grid corners, one `grid row col x y z` line per
/// world point.
pub fn write_grids_3d(path: &Path, state: &NetworkState) -> Result<()> {
    let mut out = String::new();
    for wp in &state.world_points {
        let _ = writeln!(
            out,
            "{} {} {} {} {} {}",
            wp.grid.0, wp.row, wp.col, wp.p.x, wp.p.y, wp.p.z
        );
    }
    fs::write(path, out).with_context(|| format!("writing world points {}", path.display()))
}

/// Write the per-(grid, camera) mean reprojection errors, one
/// `grid cam meanErr` line each.
pub fn write_grid_errors(path: &Path, state: &NetworkState) -> Result<()> {
    let mut out = String::new();
    for (g, cam, err) in grid_errors(state) {
        let _ = writeln!(out, "{} {} {}", g.0, cam.0, err);
    }
    fs::write(path, out).with_context(|| format!("writing grid errors {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn grid_file_round_trip_preserves_sparse_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grids.txt");
        let mut table = vec![Vec::new(); 5];
        table[1] = vec![
            GridPoint::new(0, 0, Vec2::new(10.5, 20.25)),
            GridPoint::new(0, 1, Vec2::new(30.0, 20.0)),
        ];
        table[4] = vec![GridPoint::new(2, 3, Vec2::new(-1.5, 99.0))];

        write_grids(&path, &table).unwrap();
        let back = read_grids(&path).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn match_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matches.txt");
        let names = vec!["front".to_string(), "left".to_string(), "right".to_string()];

        let mut a = PointMatch::new(3);
        a.p2d.insert(CamId(0), Vec2::new(1.0, 2.0));
        a.p2d.insert(CamId(2), Vec2::new(3.5, 4.5));
        let mut b = PointMatch::new(7);
        b.p2d.insert(CamId(1), Vec2::new(-2.0, 0.25));
        let matches = vec![a, b];

        write_matches(&path, &names, &matches).unwrap();
        let back = read_matches(&path, &names).unwrap();
        assert_eq!(back, matches);
    }

    #[test]
    fn unknown_match_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matches.txt");
        fs::write(&path, "1\nghost\n0\n").unwrap();
        assert!(read_matches(&path, &["front".to_string()]).is_err());
    }

    #[test]
    fn calibration_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calib.txt");
        let calib = Calibration {
            width: 1920,
            height: 1080,
            intrinsics: Intrinsics {
                f: 1450.0,
                aspect: 1.01,
                cx: 960.5,
                cy: 540.25,
                skew: 0.1,
            },
            distortion: BrownConrady5::from_coeffs([-0.1, 0.02, 1e-4, -2e-4, 0.0]),
            pose: Iso3::new(
                Vector3::new(10.0, -20.0, 300.0),
                Vector3::new(0.1, -0.2, 0.05),
            ),
        };
        write_calibration(&path, &calib).unwrap();
        let back = read_calibration(&path).unwrap();

        assert_eq!(back.width, calib.width);
        assert!((back.intrinsics.f - calib.intrinsics.f).abs() < 1e-9);
        assert!((back.intrinsics.skew - calib.intrinsics.skew).abs() < 1e-9);
        let dt = back.pose.translation.vector - calib.pose.translation.vector;
        assert!(dt.norm() < 1e-9);
        assert!(back.pose.rotation.angle_to(&calib.pose.rotation) < 1e-9);
        assert_eq!(back.distortion, calib.distortion);
    }

    #[test]
    fn non_rigid_transform_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calib.txt");
        let mut text = String::from("640 480\n");
        text.push_str("1000 0 320\n0 1000 240\n0 0 1\n");
        text.push_str("1 0 0 0\n0 1 0 0\n0 0 1 0\n0 0 2 1\n");
        text.push_str("0 0 0 0 0\n");
        fs::write(&path, text).unwrap();
        assert!(read_calibration(&path).is_err());
    }
}

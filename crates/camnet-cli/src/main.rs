use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use camnet_pipeline::io::{
    read_calibration, read_grids, read_matches, write_calibration, write_grid_errors,
    write_grids_3d,
};
use camnet_pipeline::{calibrate, CamReconError, NetworkConfig, NetworkState};
use camnet_core::GridStore;
use clap::Parser;
use serde::Deserialize;

mod logging;

/// Incremental multi-camera extrinsic calibration.
#[derive(Debug, Parser)]
#[command(author, version, about = "Camera-network calibration pipeline")]
struct Args {
    /// Path to the JSON run description (cameras, matches, output dir).
    #[arg(long)]
    run: PathBuf,

    /// Optional JSON NetworkConfig; defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Default to debug-level logging (RUST_LOG still overrides).
    #[arg(long, short)]
    verbose: bool,
}

/// One camera of the run: a name (referenced by the match file), its grid
/// detections, and its starting calibration.
#[derive(Debug, Deserialize)]
struct CameraInput {
    name: String,
    grids: PathBuf,
    calib: PathBuf,
}

/// Serialized run description.
#[derive(Debug, Deserialize)]
struct RunInput {
    cameras: Vec<CameraInput>,
    /// Optional auxiliary match file shared by all cameras.
    matches: Option<PathBuf>,
    out_dir: PathBuf,
}

fn load_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

fn load_state(run: &RunInput) -> Result<NetworkState> {
    ensure!(!run.cameras.is_empty(), "run describes no cameras");

    let mut calibs = Vec::with_capacity(run.cameras.len());
    let mut tables = Vec::with_capacity(run.cameras.len());
    for cam in &run.cameras {
        calibs.push(read_calibration(&cam.calib)?);
        tables.push(read_grids(&cam.grids)?);
    }

    let names: Vec<String> = run.cameras.iter().map(|c| c.name.clone()).collect();
    let matches = match &run.matches {
        Some(path) => read_matches(path, &names)?,
        None => Vec::new(),
    };

    Ok(NetworkState::new(
        calibs,
        GridStore::from_tables(tables),
        matches,
    ))
}

fn write_outputs(run: &RunInput, state: &NetworkState) -> Result<()> {
    fs::create_dir_all(&run.out_dir)
        .with_context(|| format!("creating {}", run.out_dir.display()))?;
    for (idx, cam) in run.cameras.iter().enumerate() {
        let path = run.out_dir.join(format!("{}.calib", cam.name));
        write_calibration(&path, &state.calibs[idx])?;
    }
    write_grids_3d(&run.out_dir.join("grids3D.txt"), state)?;
    write_grid_errors(&run.out_dir.join("gridErrors.txt"), state)?;
    Ok(())
}

fn run_calibration(run_path: &Path, config_path: Option<&Path>) -> Result<Vec<CamReconError>> {
    let run: RunInput = load_json_file(run_path)?;
    let cfg = match config_path {
        Some(path) => load_json_file::<NetworkConfig>(path)?,
        None => NetworkConfig::default(),
    };

    let mut state = load_state(&run)?;
    let report = calibrate(&mut state, &cfg)?;
    write_outputs(&run, &state)?;
    Ok(report)
}

fn main() {
    let args = Args::parse();
    logging::init_logger(args.verbose);
    if let Err(err) = try_main(&args) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn try_main(args: &Args) -> Result<()> {
    let report = run_calibration(&args.run, args.config.as_deref())?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camnet_core::{Calibration, GridPoint, Intrinsics, Iso3, Pt3, Real};
    use nalgebra::Vector3;
    use std::fs::File;
    use std::io::Write as _;

    fn camera(pose: Iso3) -> Calibration {
        Calibration {
            width: 1280,
            height: 1024,
            intrinsics: Intrinsics {
                f: 1100.0,
                aspect: 1.0,
                cx: 640.0,
                cy: 512.0,
                skew: 0.0,
            },
            pose,
            ..Calibration::default()
        }
    }

    /// Write a two-camera run with six synthetic grid frames to disk and
    /// calibrate it end to end through the file layer.
    #[test]
    fn run_from_files_produces_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let truth = [
            camera(Iso3::identity()),
            camera(Iso3::new(
                Vector3::new(100.0, 0.0, 10.0),
                Vector3::new(0.0, 0.06, 0.0),
            )),
        ];

        let spacing = 50.0;
        let grid_poses: Vec<Iso3> = (0..6)
            .map(|k| {
                let k = k as Real;
                Iso3::new(
                    Vector3::new(-80.0 + 35.0 * k, -50.0 + 22.0 * k, 700.0 + 50.0 * k),
                    Vector3::new(0.05 * k - 0.12, 0.18 - 0.06 * k, 0.02 * k),
                )
            })
            .collect();

        let mut run_cameras = Vec::new();
        for (idx, truth_cam) in truth.iter().enumerate() {
            let name = format!("cam{idx}");
            let grids_path = dir.path().join(format!("{name}.grids"));
            let calib_path = dir.path().join(format!("{name}.calib"));

            let mut table = Vec::new();
            for g_pose in &grid_poses {
                let mut view = Vec::new();
                for r in 0..4 {
                    for c in 0..4 {
                        let local = Pt3::new(c as Real * spacing, r as Real * spacing, 0.0);
                        if let Some(px) = truth_cam.project(&(g_pose * local)) {
                            view.push(GridPoint::new(r, c, px));
                        }
                    }
                }
                table.push(view);
            }
            camnet_pipeline::io::write_grids(&grids_path, &table).unwrap();

            // Extrinsics start unknown.
            let initial = Calibration {
                pose: Iso3::identity(),
                ..truth_cam.clone()
            };
            write_calibration(&calib_path, &initial).unwrap();

            run_cameras.push((name, grids_path, calib_path));
        }

        let out_dir = dir.path().join("out");
        let run_path = dir.path().join("run.json");
        let cameras_json: Vec<String> = run_cameras
            .iter()
            .map(|(name, grids, calib)| {
                format!(
                    r#"{{"name":"{name}","grids":{},"calib":{}}}"#,
                    serde_json::to_string(grids).unwrap(),
                    serde_json::to_string(calib).unwrap()
                )
            })
            .collect();
        let mut f = File::create(&run_path).unwrap();
        write!(
            f,
            r#"{{"cameras":[{}],"out_dir":{}}}"#,
            cameras_json.join(","),
            serde_json::to_string(&out_dir).unwrap()
        )
        .unwrap();

        let config_path = dir.path().join("config.json");
        fs::write(&config_path, r#"{"root_cam":0,"min_shared_grids":5}"#).unwrap();

        let report = run_calibration(&run_path, Some(&config_path)).unwrap();
        assert_eq!(report.len(), 2);
        for e in &report {
            assert!(e.max < 1e-3, "{}: max reprojection {}", e.cam, e.max);
        }

        assert!(out_dir.join("cam0.calib").exists());
        assert!(out_dir.join("cam1.calib").exists());
        assert!(out_dir.join("grids3D.txt").exists());
        assert!(out_dir.join("gridErrors.txt").exists());

        let recovered = read_calibration(&out_dir.join("cam1.calib")).unwrap();
        let dt = (recovered.pose.translation.vector - truth[1].pose.translation.vector).norm();
        assert!(dt < 1e-2, "cam1 translation off by {dt}");
    }

    #[test]
    fn missing_run_file_is_an_error() {
        let missing = Path::new("/nonexistent/run.json");
        assert!(run_calibration(missing, None).is_err());
    }
}

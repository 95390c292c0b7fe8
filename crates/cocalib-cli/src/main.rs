use std::{fs, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cocalib_pipeline::{
    flatten_sensors, run_cocalibration, CocalibConfig, CocalibInput, CocalibReport,
    FlattenReport,
};

/// LiDAR / fisheye camera co-calibration.
#[derive(Debug, Parser)]
#[command(author, version, about = "LiDAR to fisheye camera co-calibration pipeline")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write the flat raster images consumed by the external edge detector.
    Flatten(RunArgs),
    /// Calibrate over the bandwidth schedule and print the JSON report.
    Calibrate(RunArgs),
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    /// Path to JSON file containing CocalibInput.
    #[arg(long)]
    input: PathBuf,

    /// Optional path to JSON CocalibConfig. Defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory.
    #[arg(long)]
    out: PathBuf,
}

fn load_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data =
        fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    let value =
        serde_json::from_str(&data).with_context(|| format!("cannot parse {}", path.display()))?;
    Ok(value)
}

fn load_documents(args: &RunArgs) -> Result<(CocalibInput, CocalibConfig)> {
    let input: CocalibInput = load_json_file(&args.input)?;
    let config = match &args.config {
        Some(path) => load_json_file::<CocalibConfig>(path)?,
        None => CocalibConfig::default(),
    };
    Ok((input, config))
}

fn flatten_from_files(args: &RunArgs) -> Result<FlattenReport> {
    let (input, config) = load_documents(args)?;
    flatten_sensors(&input, &config, &args.out)
}

fn calibrate_from_files(args: &RunArgs) -> Result<CocalibReport> {
    let (input, config) = load_documents(args)?;
    run_cocalibration(&input, &config, &args.out)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = try_main() {
        eprintln!("{}", error_line(&err));
        std::process::exit(1);
    }
}

/// One-line error with every context level down to the root cause.
fn error_line(err: &anyhow::Error) -> String {
    format!("error: {err:#}")
}

fn try_main() -> Result<()> {
    let args = Args::parse();
    let json = match &args.command {
        Command::Flatten(run) => serde_json::to_string_pretty(&flatten_from_files(run)?)?,
        Command::Calibrate(run) => serde_json::to_string_pretty(&calibrate_from_files(run)?)?,
    };
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cocalib_core::{InverseModelKind, OmniIntrinsics, Vec3};
    use cocalib_pipeline::LidarSource;
    use image::{Rgb, RgbImage};
    use tempfile::{tempdir, NamedTempFile};

    fn write_json<T: serde::Serialize>(value: &T, path: &Path) {
        serde_json::to_writer_pretty(fs::File::create(path).unwrap(), value).unwrap();
    }

    fn small_config() -> CocalibConfig {
        let mut config = CocalibConfig::default();
        config.sensor.rows = 40;
        config.sensor.cols = 40;
        config.sensor.effective_radius.inner = 1.0;
        config.sensor.effective_radius.outer = 19.0;
        config.raster.cols = 40;
        config.raster.inverse_model = InverseModelKind::Spline;
        let mut initial = config.initial.clone();
        let k = OmniIntrinsics {
            u0: 20.0,
            v0: 20.0,
            a0: 0.0,
            a1: 12.0,
            a2: 0.0,
            a3: 0.0,
            a4: 0.0,
            c: 1.0,
            d: 0.0,
            e: 0.0,
        };
        initial[6..].copy_from_slice(&k.to_array());
        config.initial = initial;
        config
    }

    #[test]
    fn flatten_helper_smoke_test() {
        let dir = tempdir().unwrap();
        let image_path = dir.path().join("camera.png");
        RgbImage::from_pixel(40, 40, Rgb([90, 90, 90]))
            .save(&image_path)
            .unwrap();
        let points_path = dir.path().join("edges.txt");
        let p = Vec3::new(0.3, 0.1, 1.0);
        fs::write(&points_path, format!("{} {} {}\n", p.x, p.y, p.z)).unwrap();

        let input = CocalibInput {
            camera_image: image_path,
            camera_edge_mask: None,
            lidar: LidarSource::EdgePoints { path: points_path },
        };
        let input_file = NamedTempFile::new().unwrap();
        let config_file = NamedTempFile::new().unwrap();
        write_json(&input, input_file.path());
        write_json(&small_config(), config_file.path());

        let args = RunArgs {
            input: input_file.path().to_path_buf(),
            config: Some(config_file.path().to_path_buf()),
            out: dir.path().join("out"),
        };
        let report = flatten_from_files(&args).expect("flatten helper should succeed");
        assert_eq!(report.camera_image, "camera_flat.bmp");
        assert!(report.lidar.is_none());
        assert!(dir.path().join("out/camera_flat.bmp").is_file());

        // no camera edge mask: calibration must refuse
        assert!(calibrate_from_files(&args).is_err());
    }

    #[test]
    fn unreadable_input_is_reported() {
        let args = RunArgs {
            input: PathBuf::from("/nonexistent/input.json"),
            config: None,
            out: PathBuf::from("/nonexistent/out"),
        };
        let err = flatten_from_files(&args).unwrap_err();
        assert!(error_line(&err).contains("/nonexistent/input.json"));
    }

    #[test]
    fn error_line_keeps_the_root_cause() {
        let dir = tempdir().unwrap();
        let image_path = dir.path().join("camera.png");
        RgbImage::from_pixel(40, 40, Rgb([90, 90, 90]))
            .save(&image_path)
            .unwrap();
        let points_path = dir.path().join("edges.txt");
        fs::write(&points_path, "0.3 0.1 1.0\n").unwrap();
        let input = CocalibInput {
            camera_image: image_path,
            camera_edge_mask: None,
            lidar: LidarSource::EdgePoints { path: points_path },
        };
        let input_file = NamedTempFile::new().unwrap();
        write_json(&input, input_file.path());

        // default sensor is 2048x2448, the image is 40x40
        let args = RunArgs {
            input: input_file.path().to_path_buf(),
            config: None,
            out: dir.path().join("out"),
        };
        let line = error_line(&flatten_from_files(&args).unwrap_err());
        assert!(line.starts_with("error: "), "{line}");
        assert!(line.contains("[cocalib]"), "{line}");
        assert!(line.contains("camera image is 40x40"), "{line}");
        assert!(line.contains("2048x2448"), "{line}");
    }

    #[test]
    fn subcommands_parse() {
        let args = Args::try_parse_from([
            "cocalib",
            "calibrate",
            "--input",
            "in.json",
            "--out",
            "out",
        ])
        .unwrap();
        match args.command {
            Command::Calibrate(run) => {
                assert_eq!(run.input, PathBuf::from("in.json"));
                assert!(run.config.is_none());
            }
            Command::Flatten(_) => panic!("expected calibrate"),
        }
        assert!(Args::try_parse_from(["cocalib", "flatten", "--input", "in.json"]).is_err());
    }
}

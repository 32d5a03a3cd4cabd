// locus_node/src/cli.rs

use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;

/// Locus: map-based LiDAR localization.
///
/// Loads a reference map, then replays a directory of scans through the pose
/// tracker and reports where it ended up.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory of `.pcd` / `.ply` scans, replayed in lexical order.
    #[arg(short, long)]
    pub scans: Option<PathBuf>,

    /// Initial pose override as `x,y,z,yaw_deg`.
    #[arg(long, value_name = "X,Y,Z,YAW_DEG", allow_hyphen_values = true)]
    pub initial_pose: Option<PlanarPose>,

    /// Log filter directive (e.g. `debug`, `locus_core=trace`). Falls back to
    /// `RUST_LOG`, then `info`.
    #[arg(long)]
    pub log_level: Option<String>,
}

/// A pose on the ground plane plus height, as typed on the command line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanarPose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw_deg: f64,
}

impl FromStr for PlanarPose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("invalid number in '{s}': {e}"))?;
        match values.as_slice() {
            [x, y, z, yaw_deg] => Ok(Self {
                x: *x,
                y: *y,
                z: *z,
                yaw_deg: *yaw_deg,
            }),
            _ => Err(format!("expected 4 comma-separated values, got {}", values.len())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_full_command_line() {
        let cli = Cli::try_parse_from([
            "locus",
            "--config",
            "locus.toml",
            "--scans",
            "scans/",
            "--initial-pose",
            "-1.5,-2,0,90",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("locus.toml")));
        assert_eq!(
            cli.initial_pose,
            Some(PlanarPose {
                x: -1.5,
                y: -2.0,
                z: 0.0,
                yaw_deg: 90.0
            })
        );
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn test_rejects_short_pose() {
        assert!("1,2,3".parse::<PlanarPose>().is_err());
        assert!("1,2,x,4".parse::<PlanarPose>().is_err());
        assert!(Cli::try_parse_from(["locus", "--initial-pose", "1,2"]).is_err());
    }
}

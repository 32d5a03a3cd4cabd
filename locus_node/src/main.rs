// locus_node/src/main.rs

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use locus_node::prelude::*;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref())?;

    // --- 1. Configuration ---
    let mut config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(pose) = cli.initial_pose {
        config.initial_pose.set_planar(pose.x, pose.y, pose.z, pose.yaw_deg);
    }
    let base_frame = config.frames.base_frame_id.clone();
    let scan_period = config.scan.scan_period;

    // --- 2. Bring the node up; these are the only fatal errors ---
    let tf = Arc::new(TfBuffer::default());
    let mut lifecycle = LifecycleNode::new(config, tf);
    lifecycle.configure().context("configure failed")?;
    lifecycle.activate().context("activate failed")?;

    // --- 3. Replay scans through the event loop ---
    let scans = match &cli.scans {
        Some(dir) => scan_files(dir)?,
        None => Vec::new(),
    };
    info!("Replaying {} scans.", scans.len());

    let (node, sender) = LocalizationNode::new(lifecycle);
    let worker = thread::spawn(move || node.run());

    for (i, path) in scans.iter().enumerate() {
        let mut scan = match load_point_cloud(path) {
            Ok(scan) => scan,
            Err(e) => {
                warn!("Skipping {}: {e}", path.display());
                continue;
            }
        };
        scan.frame_id = base_frame.clone();
        scan.timestamp = (i + 1) as f64 * scan_period;
        if sender.send(NodeEvent::Scan(scan)).is_err() {
            break;
        }
    }
    // The loop may already be gone if it panicked; join reports that below.
    let _ = sender.send(NodeEvent::Shutdown);
    let lifecycle = worker.join().map_err(|_| anyhow!("node thread panicked"))?;

    // --- 4. Report ---
    let bus = lifecycle.bus();
    match bus.latest::<PoseWithCovarianceStamped>(POSE_TOPIC) {
        Some(pose) => {
            let t = pose.pose.translation;
            let (_, _, yaw) = pose.pose.rotation.euler_angles();
            println!(
                "final pose [{}]: x={:.3} y={:.3} z={:.3} yaw={:.2}deg",
                pose.frame_id,
                t.x,
                t.y,
                t.z,
                yaw.to_degrees()
            );
        }
        None => println!("no pose was published"),
    }
    let path_len = bus.latest::<Path>(PATH_TOPIC).map_or(0, Path::len);
    println!("trajectory length: {path_len}");
    Ok(())
}

fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(directive) => EnvFilter::try_new(directive).context("invalid --log-level")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

/// `.pcd` / `.ply` files directly inside `dir`, in lexical order.
fn scan_files(dir: &FsPath) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        let is_cloud = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pcd") || e.eq_ignore_ascii_case("ply"));
        if entry.file_type().is_file() && is_cloud {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

// locus_node/tests/map_activation.rs

//! Activation with a real map file and the built-in NDT oracle.

use approx::assert_abs_diff_eq;
use locus_node::prelude::*;
use nalgebra::{Isometry3, Vector3};
use std::io::Write;
use std::sync::Arc;

/// Four walls and a floor of an 11 m square room, sampled on a regular grid.
/// Walls sit mid-cell for the default 1 m NDT resolution.
fn room() -> Vec<Point> {
    let mut points = Vec::new();
    for i in 0..=44 {
        let a = -5.5 + 0.25 * f64::from(i);
        for k in 0..=12 {
            let z = 0.25 * f64::from(k);
            points.push(Point::new(a, 5.5, z));
            points.push(Point::new(a, -5.5, z));
            points.push(Point::new(5.5, a, z));
            points.push(Point::new(-5.5, a, z));
        }
        for j in 0..=22 {
            points.push(Point::new(a, -5.5 + 0.5 * f64::from(j), 0.3));
        }
    }
    points
}

fn write_pcd(points: &[Point]) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".pcd").tempfile().unwrap();
    writeln!(
        file,
        "# .PCD v0.7 - Point Cloud Data file format\nVERSION 0.7\nFIELDS x y z intensity\nSIZE 4 4 4 4\nTYPE F F F F\nCOUNT 1 1 1 1\nWIDTH {n}\nHEIGHT 1\nVIEWPOINT 0 0 0 1 0 0 0\nPOINTS {n}\nDATA ascii",
        n = points.len()
    )
    .unwrap();
    for p in points {
        writeln!(file, "{} {} {} 1", p.position.x, p.position.y, p.position.z).unwrap();
    }
    file.flush().unwrap();
    file
}

fn map_config(path: &std::path::Path) -> LocalizationConfig {
    let mut config = LocalizationConfig::default();
    config.map.use_pcd_map = true;
    config.map.map_path = path.to_path_buf();
    config.initial_pose.set_initial_pose = true;
    config
}

#[test]
fn test_activation_installs_and_echoes_map() {
    let file = write_pcd(&room());
    let mut node = LifecycleNode::new(map_config(file.path()), Arc::new(TfBuffer::default()));
    node.configure().unwrap();
    node.activate().unwrap();

    assert_eq!(node.state(), LifecycleState::Active);
    let tracker = node.tracker().unwrap();
    assert!(tracker.oracle().has_target());
    assert_eq!(tracker.state(), TrackingState::Ready);

    let echo = node.bus().latest::<PointCloud>(MAP_TOPIC).unwrap();
    assert_eq!(echo.frame_id, "map");
    assert_eq!(echo.len(), room().len());
}

#[test]
fn test_ndt_tracks_offset_scan_against_file_map() {
    let map = room();
    let file = write_pcd(&map);
    let mut node = LifecycleNode::new(map_config(file.path()), Arc::new(TfBuffer::default()));
    node.configure().unwrap();
    node.activate().unwrap();

    let truth = Isometry3::translation(0.1, -0.05, 0.0);
    let mut scan = PointCloud::new("base_link", 1.0, map);
    scan.transform_in_place(&truth.inverse(), "base_link");

    let event = node.handle(TrackerInput::Scan(&scan)).unwrap().unwrap();
    let TrackerEvent::ScanAccepted(report) = event else {
        panic!("unexpected event {event:?}");
    };
    assert_abs_diff_eq!(report.pose.translation.vector, Vector3::new(0.1, -0.05, 0.0), epsilon = 0.04);
    assert!(report.fitness_score < 2.0);
    assert_eq!(node.bus().latest::<Path>(PATH_TOPIC).map_or(0, Path::len), 2);
}

#[test]
fn test_ply_map_is_accepted() {
    let mut file = tempfile::Builder::new().suffix(".ply").tempfile().unwrap();
    let points = room();
    writeln!(
        file,
        "ply\nformat ascii 1.0\nelement vertex {}\nproperty float x\nproperty float y\nproperty float z\nend_header",
        points.len()
    )
    .unwrap();
    for p in &points {
        writeln!(file, "{} {} {}", p.position.x, p.position.y, p.position.z).unwrap();
    }
    file.flush().unwrap();

    let mut node = LifecycleNode::new(map_config(file.path()), Arc::new(TfBuffer::default()));
    node.configure().unwrap();
    node.activate().unwrap();
    assert!(node.tracker().unwrap().oracle().has_target());
}

#[test]
fn test_missing_map_file_fails_activation() {
    let mut node = LifecycleNode::new(
        map_config(std::path::Path::new("/no/such/dir/map.pcd")),
        Arc::new(TfBuffer::default()),
    );
    node.configure().unwrap();
    let err = node.activate().unwrap_err();
    assert!(matches!(err, LifecycleError::MapLoad(MapLoadError::Io { .. })));
    assert_eq!(node.state(), LifecycleState::Inactive);
    // Publication stays off after the failed activation.
    assert!(node.bus().latest::<PointCloud>(MAP_TOPIC).is_none());
}

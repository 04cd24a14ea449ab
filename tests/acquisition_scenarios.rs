//! End-to-end capture runs against the simulated rig.

use altcap::sim::{ScriptedViewer, SimBus, SimCamera, SimTracking, SteppingClock};
use altcap::sink::{POSE_LOG, POSITION_LOG, TIMESTAMPS_LOG};
use altcap::{
    AcquisitionLoop, CaptureSink, DeviceSessionManager, Environment, FrameGateway, LogStreams,
    NodeStatus, Placement, SessionState, ShutdownWatcher, SinkPaths, TickOutcome, Vec3,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const START_MS: i64 = 1_700_000_000_000;
const STEP_MS: i64 = 33;

fn camera() -> SimCamera {
    let mut camera = SimCamera::new(32, 24);
    camera.open(0).unwrap();
    camera
}

fn build(dir: &TempDir, track: Option<(&SimBus, &SimTracking)>) -> AcquisitionLoop {
    let sink = CaptureSink::open(
        SinkPaths::under(dir.path()),
        LogStreams::for_run(track.is_some()),
        10,
    )
    .unwrap();
    let acq = AcquisitionLoop::new(
        Box::new(camera()),
        Box::new(ScriptedViewer::new()),
        sink,
        Box::new(SteppingClock::new(START_MS, STEP_MS)),
        ShutdownWatcher::new(),
    );
    match track {
        Some((bus, tracking)) => {
            let environment = Arc::new(Environment::new(vec![Vec3::new(0.0, 0.0, 0.0)]));
            let manager =
                DeviceSessionManager::new(Box::new(bus.clone()), Box::new(tracking.clone()), environment);
            acq.with_tracking(manager, Placement::default())
        }
        None => acq,
    }
}

fn lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

fn count_files(dir: &Path) -> usize {
    fs::read_dir(dir).unwrap().count()
}

#[test]
fn scenario_a_tracking_disabled() {
    let dir = TempDir::new().unwrap();
    let summary = build(&dir, None).with_max_ticks(Some(5)).run().unwrap();

    assert_eq!(summary.ticks, 5);
    assert_eq!(lines(&dir.path().join(TIMESTAMPS_LOG)).len(), 5);
    assert!(!dir.path().join(POSE_LOG).exists());
    assert!(!dir.path().join(POSITION_LOG).exists());
    assert_eq!(count_files(&dir.path().join("images")), 5);
    assert_eq!(count_files(&dir.path().join("images_10fps")), 0);
    assert_eq!(summary.pose_records, 0);
}

#[test]
fn scenario_b_single_node_attached_once() {
    let dir = TempDir::new().unwrap();
    let bus = SimBus::with_idle_nodes(1);
    let tracking = SimTracking::new();
    let mut acq = build(&dir, Some((&bus, &tracking)));

    for _ in 0..12 {
        assert_eq!(acq.tick(), TickOutcome::Continue);
        assert_eq!(acq.manager().unwrap().state(), SessionState::SessionActive);
    }
    assert_eq!(acq.manager().unwrap().attaches(), 1);
    assert_eq!(acq.manager().unwrap().scans(), 1);
    let summary = acq.finish().unwrap();

    assert_eq!(tracking.sessions_started(), 1);
    assert_eq!(tracking.live_sessions(), 0);
    assert_eq!(summary.pose_records, 12);

    let times = lines(&dir.path().join(TIMESTAMPS_LOG));
    let poses = lines(&dir.path().join(POSE_LOG));
    let positions = lines(&dir.path().join(POSITION_LOG));
    assert_eq!(times.len(), 12);
    assert_eq!(poses.len(), 12);
    assert_eq!(positions.len(), 12);

    for (i, (time, pose)) in times.iter().zip(&poses).enumerate() {
        assert_eq!(time, &(START_MS + i as i64 * STEP_MS).to_string());
        let fields: Vec<&str> = pose.split(';').collect();
        assert_eq!(fields.len(), 7);
        assert_eq!(fields[0], time);
        // Position-only record repeats the combined record's position.
        assert_eq!(positions[i], fields[1..4].join(";"));
    }

    assert_eq!(count_files(&dir.path().join("images")), 12);
    let keyframes: Vec<_> = fs::read_dir(dir.path().join("images_10fps"))
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(keyframes, vec![format!("{}.jpeg", START_MS + 9 * STEP_MS)]);
}

#[test]
fn scenario_c_no_nodes_single_rescan() {
    let dir = TempDir::new().unwrap();
    let bus = SimBus::new();
    let tracking = SimTracking::new();
    let mut acq = build(&dir, Some((&bus, &tracking)));

    for tick in 1..=8 {
        if tick == 3 {
            bus.bump_version();
        }
        acq.tick();
        let manager = acq.manager().unwrap();
        assert_eq!(manager.state(), SessionState::NoDevice);
        let expected_scans = if tick < 3 { 0 } else { 1 };
        assert_eq!(manager.scans(), expected_scans, "tick {}", tick);
    }
    let summary = acq.finish().unwrap();

    assert_eq!(tracking.find_calls(), 1);
    assert_eq!(bus.enumerate_calls(), 1);
    assert_eq!(summary.pose_records, 0);
    assert_eq!(lines(&dir.path().join(TIMESTAMPS_LOG)).len(), 8);
    assert!(lines(&dir.path().join(POSE_LOG)).is_empty());
    assert!(lines(&dir.path().join(POSITION_LOG)).is_empty());
}

#[test]
fn replug_never_overlaps_sessions() {
    let dir = TempDir::new().unwrap();
    let bus = SimBus::new();
    let first = bus.add_node(NodeStatus::Idle);
    let tracking = SimTracking::new();
    let mut acq = build(&dir, Some((&bus, &tracking)));

    acq.tick();
    assert_eq!(acq.manager().unwrap().sampler().unwrap().node(), first);

    // Unplug: the task finishes, the manager drops the session.
    bus.remove_node(first);
    tracking.finish_sessions();
    acq.tick();
    assert_eq!(acq.manager().unwrap().state(), SessionState::NoDevice);

    // Replug on a new node.
    let second = bus.add_node(NodeStatus::Idle);
    acq.tick();
    assert_eq!(acq.manager().unwrap().sampler().unwrap().node(), second);

    let summary = acq.finish().unwrap();
    assert_eq!(tracking.sessions_started(), 2);
    assert_eq!(tracking.max_live_sessions(), 1);
    assert_eq!(tracking.live_sessions(), 0);
    // Ticks 1 and 3 had a session.
    assert_eq!(summary.pose_records, 2);
    assert_eq!(lines(&dir.path().join(POSE_LOG)).len(), 2);
    assert_eq!(lines(&dir.path().join(TIMESTAMPS_LOG)).len(), 3);
}

#[test]
fn keyframe_every_tenth_sequence() {
    let dir = TempDir::new().unwrap();
    let summary = build(&dir, None).with_max_ticks(Some(25)).run().unwrap();

    assert_eq!(summary.frames_written, 25);
    assert_eq!(summary.keyframes_written, 2);
    for sequence in [10i64, 20] {
        let name = format!("{}.jpeg", START_MS + (sequence - 1) * STEP_MS);
        assert!(dir.path().join("images_10fps").join(name).exists());
    }
}

#[test]
fn pose_query_errors_skip_only_pose_records() {
    let dir = TempDir::new().unwrap();
    let bus = SimBus::with_idle_nodes(1);
    let tracking = SimTracking::new();
    let mut acq = build(&dir, Some((&bus, &tracking)));

    for tick in 1..=5 {
        tracking.fail_queries(tick == 2 || tick == 3);
        assert_eq!(acq.tick(), TickOutcome::Continue);
        assert_eq!(acq.manager().unwrap().state(), SessionState::SessionActive);
    }
    let summary = acq.finish().unwrap();

    assert_eq!(summary.ticks, 5);
    assert_eq!(summary.frames_written, 5);
    assert_eq!(summary.pose_records, 3);
    assert_eq!(tracking.sessions_started(), 1);

    let times = lines(&dir.path().join(TIMESTAMPS_LOG));
    let poses = lines(&dir.path().join(POSE_LOG));
    assert_eq!(times.len(), 5);
    assert_eq!(lines(&dir.path().join(POSITION_LOG)).len(), 3);
    let pose_times: Vec<&str> = poses.iter().map(|l| l.split(';').next().unwrap()).collect();
    assert_eq!(pose_times, vec![times[0].as_str(), times[3].as_str(), times[4].as_str()]);
}

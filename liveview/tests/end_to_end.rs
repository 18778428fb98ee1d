use crossbeam_channel::Receiver;
use liveview::filters::dark_sub::write_mask;
use liveview::frame_source::mock::{MockEvent, MockFrameSource};
use liveview::save::{header_path, part_path};
use liveview::{
    CameraType, FrameGeometry, PipelineConfig, PipelineController, PipelineError, PipelineEvent,
    PlotMode, Severity,
};
use ndarray::Array2;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(10);

fn test_config(geometry: FrameGeometry) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.geometry = Some(geometry);
    config.std_dev_n = 4;
    config.mean_depth = 2;
    config.buffer_depth = 128;
    config.histogram_bins = 8;
    config.fps_report_interval = 5;
    config
}

/// Frames whose every sample equals the frame's index
fn ramp_source(geometry: FrameGeometry, frames: u16, delay: Duration) -> MockFrameSource {
    let frames = (0..frames)
        .map(|k| Array2::from_elem(geometry.shape(), k))
        .collect();
    MockFrameSource::new(geometry, frames)
        .repeating()
        .with_frame_delay(delay)
}

fn wait_for_event(
    rx: &Receiver<PipelineEvent>,
    mut pred: impl FnMut(&PipelineEvent) -> bool,
) -> Vec<PipelineEvent> {
    let deadline = Instant::now() + WAIT;
    let mut seen = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = rx
            .recv_timeout(remaining)
            .unwrap_or_else(|_| panic!("event not seen; got {seen:?}"));
        let done = pred(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn read_f32(path: &Path) -> Vec<f32> {
    fs::read(path)
        .unwrap()
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[test]
fn test_start_stop_lifecycle() {
    let geometry = FrameGeometry::new(8, 4);
    let source = MockFrameSource::new_constant(geometry, 100).with_frame_delay(Duration::from_millis(1));
    let controller = PipelineController::start(test_config(geometry), Box::new(source)).unwrap();
    let events = controller.events();

    let first = events.recv_timeout(WAIT).unwrap();
    assert_eq!(
        first,
        PipelineEvent::Started {
            camera: CameraType::Simulated,
            geometry
        }
    );
    assert!(controller.running());
    wait_for_event(&events, |e| matches!(e, PipelineEvent::FpsUpdated(_)));
    assert!(controller.fps() > 0.0);

    let frame = controller.frame().unwrap();
    assert_eq!(frame.dim(), (4, 8));
    assert_eq!(controller.spectral_mean().unwrap().len(), 4);
    assert_eq!(controller.spatial_mean().unwrap().len(), 8);
    assert_eq!(controller.frame_fft().unwrap().dim(), (4, 8));
    assert_eq!(controller.histogram().unwrap().total(), 32);

    controller.stop();
    controller.stop();
    wait_for_event(&events, |e| *e == PipelineEvent::Finished);
    assert!(!controller.running());
    controller.join();
}

#[test]
fn test_constant_stream_statistics() {
    let geometry = FrameGeometry::new(4, 3);
    let source = MockFrameSource::new_constant(geometry, 500);
    let controller = PipelineController::start(test_config(geometry), Box::new(source)).unwrap();

    wait_until(|| {
        controller
            .latest_frame()
            .map(|f| f.std_dev_fill.is_full())
            .unwrap_or(false)
    });
    let std_dev = controller.std_dev_frame().unwrap();
    assert!(std_dev.iter().all(|&v| v == 0.0));
    let snr = controller.snr_frame().unwrap();
    assert!(snr.iter().all(|&v| v == 0.0));
    let mean = controller.mean_frame().unwrap();
    assert!(mean.iter().all(|&v| v == 500.0));

    let hist = controller.std_dev_histogram().unwrap();
    assert_eq!(hist.counts[0], 12);
}

#[test]
fn test_crosshair_profiles() {
    let geometry = FrameGeometry::new(3, 2);
    let frame = Array2::from_shape_vec((2, 3), vec![1, 2, 3, 4, 5, 6]).unwrap();
    let source =
        MockFrameSource::new_repeating(geometry, frame).with_frame_delay(Duration::from_millis(1));
    let controller = PipelineController::start(test_config(geometry), Box::new(source)).unwrap();
    let events = controller.events();

    wait_until(|| controller.frame().is_some());
    assert_eq!(controller.spectral_mean().unwrap().to_vec(), vec![2.0, 5.0]);

    controller.set_plot_mode(PlotMode::Crosshair);
    controller.set_center(2.0, 1.0);
    assert_eq!(controller.center(), (2.0, 1.0));
    assert_eq!(controller.spectral_mean().unwrap().to_vec(), vec![3.0, 6.0]);
    assert_eq!(
        controller.spatial_mean().unwrap().to_vec(),
        vec![4.0, 5.0, 6.0]
    );
    wait_for_event(&events, |e| {
        *e == PipelineEvent::CrosshairChanged { x: 2.0, y: 1.0 }
    });
}

#[test]
fn test_saves_serviced_in_fifo_order() {
    let dir = TempDir::new().unwrap();
    let geometry = FrameGeometry::new(2, 2);
    let source = ramp_source(geometry, 2000, Duration::from_millis(1));
    let controller = PipelineController::start(test_config(geometry), Box::new(source)).unwrap();
    let events = controller.events();

    let path_a = dir.path().join("a.raw");
    let path_b = dir.path().join("b.raw");
    controller.save_frames(&path_a, 2, 1).unwrap();
    controller
        .capture_frames_remote(path_b.to_str().unwrap(), 3, 2)
        .unwrap();

    let mut completed = Vec::new();
    wait_for_event(&events, |e| {
        if let PipelineEvent::SaveCompleted { path, .. } = e {
            completed.push(path.clone());
        }
        completed.len() == 2
    });
    assert_eq!(completed, vec![path_a.clone(), path_b.clone()]);

    let a = read_f32(&path_a);
    let b = read_f32(&path_b);
    assert_eq!(a.len(), 2 * 4);
    assert_eq!(b.len(), 3 * 4);
    for frame in b.chunks_exact(4) {
        assert!(frame.iter().all(|&v| v == frame[0]));
        assert_eq!(frame[0].fract(), 0.5);
    }
    assert!(a[a.len() - 1] < b[0]);
    assert!(header_path(&path_a).exists());
    assert_eq!(controller.pending_saves(), 0);
}

#[test]
fn test_invalid_save_request() {
    let geometry = FrameGeometry::new(2, 2);
    let source = MockFrameSource::new_constant(geometry, 1);
    let controller = PipelineController::start(test_config(geometry), Box::new(source)).unwrap();
    assert!(controller.save_frames("/tmp/x.raw", 0, 1).is_err());
    assert!(controller.save_frames("/tmp/x.raw", 1, 0).is_err());
    assert_eq!(controller.pending_saves(), 0);
}

#[test]
fn test_stop_during_save_leaves_no_file() {
    let dir = TempDir::new().unwrap();
    let geometry = FrameGeometry::new(4, 4);
    let source =
        MockFrameSource::new_constant(geometry, 10).with_frame_delay(Duration::from_millis(2));
    let controller = PipelineController::start(test_config(geometry), Box::new(source)).unwrap();
    let events = controller.events();

    let path = dir.path().join("long.raw");
    controller.save_frames(&path, 1_000_000, 1).unwrap();
    wait_for_event(&events, |e| matches!(e, PipelineEvent::SaveStarted { .. }));
    std::thread::sleep(Duration::from_millis(20));
    controller.stop();

    let seen = wait_for_event(&events, |e| matches!(e, PipelineEvent::SaveFailed { .. }));
    match seen.last().unwrap() {
        PipelineEvent::SaveFailed { path: failed, error } => {
            assert_eq!(*failed, path);
            assert!(error.contains("interrupted"), "{error}");
        }
        other => panic!("unexpected {other:?}"),
    }
    controller.join();
    drop(controller);
    assert!(!path.exists());
    assert!(!part_path(&path).exists());
}

#[test]
fn test_mask_collection_and_apply() {
    let dir = TempDir::new().unwrap();
    let geometry = FrameGeometry::new(4, 2);
    let source =
        MockFrameSource::new_constant(geometry, 100).with_frame_delay(Duration::from_millis(1));
    let controller = PipelineController::start(test_config(geometry), Box::new(source)).unwrap();
    let events = controller.events();

    let mask_path = dir.path().join("dark.mask");
    controller
        .set_mask_settings(Some(mask_path.clone()), 5)
        .unwrap();
    assert!(controller.set_mask_settings(None, 0).is_err());
    controller.collect_mask().unwrap();

    let seen = wait_for_event(&events, |e| matches!(e, PipelineEvent::MaskCollected { .. }));
    assert_eq!(
        seen.last().unwrap(),
        &PipelineEvent::MaskCollected {
            frames: 5,
            path: Some(mask_path.clone())
        }
    );
    assert_eq!(fs::metadata(&mask_path).unwrap().len(), 4 * 2 * 4);
    wait_until(|| {
        controller
            .dark_subtracted_frame()
            .map(|f| f.iter().all(|&v| v == 0.0))
            .unwrap_or(false)
    });

    // a mask of the wrong size is rejected and the current reference kept
    let bad = dir.path().join("bad.mask");
    write_mask(&bad, &Array2::zeros((3, 3))).unwrap();
    controller.apply_mask(&bad).unwrap();
    wait_for_event(&events, |e| matches!(e, PipelineEvent::MaskFailed { .. }));
    std::thread::sleep(Duration::from_millis(10));
    assert!(controller
        .dark_subtracted_frame()
        .unwrap()
        .iter()
        .all(|&v| v == 0.0));

    // a valid mask replaces it
    let good = dir.path().join("good.mask");
    write_mask(&good, &Array2::from_elem((2, 4), 40.0)).unwrap();
    controller.apply_mask(&good).unwrap();
    wait_until(|| {
        controller
            .dark_subtracted_frame()
            .map(|f| f.iter().all(|&v| v == 60.0))
            .unwrap_or(false)
    });
}

#[test]
fn test_stop_collecting_mask_early() {
    let geometry = FrameGeometry::new(2, 2);
    let source =
        MockFrameSource::new_constant(geometry, 7).with_frame_delay(Duration::from_millis(1));
    let controller = PipelineController::start(test_config(geometry), Box::new(source)).unwrap();
    let events = controller.events();

    controller.set_mask_settings(None, 1_000_000).unwrap();
    controller.collect_mask().unwrap();
    std::thread::sleep(Duration::from_millis(20));
    controller.stop_collecting_mask().unwrap();

    let seen = wait_for_event(&events, |e| matches!(e, PipelineEvent::MaskFailed { .. }));
    match seen.last().unwrap() {
        PipelineEvent::MaskFailed { error } => assert!(error.contains("stopped after"), "{error}"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(controller
        .dark_subtracted_frame()
        .unwrap()
        .iter()
        .all(|&v| v == 7.0));
}

#[test]
fn test_geometry_mismatch_at_start_is_fatal() {
    let source = MockFrameSource::new_constant(FrameGeometry::new(640, 481), 0);
    let mut config = PipelineConfig::default();
    config.geometry = Some(FrameGeometry::new(640, 480));
    let err = PipelineController::start(config, Box::new(source))
        .err()
        .expect("start should fail");
    assert!(matches!(err, PipelineError::GeometryMismatch { .. }));
}

#[test]
fn test_geometry_mismatch_mid_stream_stops_acquisition() {
    let geometry = FrameGeometry::new(4, 4);
    let source = MockFrameSource::from_events(
        geometry,
        vec![
            MockEvent::Frame(Array2::from_elem((4, 4), 1)),
            MockEvent::Frame(Array2::from_elem((5, 4), 1)),
            MockEvent::Frame(Array2::from_elem((4, 4), 2)),
        ],
    );
    let controller = PipelineController::start(test_config(geometry), Box::new(source)).unwrap();
    let events = controller.events();

    let seen = wait_for_event(&events, |e| *e == PipelineEvent::Finished);
    assert!(seen.iter().any(|e| matches!(
        e,
        PipelineEvent::Error {
            severity: Severity::Fatal,
            ..
        }
    )));
    assert!(!controller.running());
    assert_eq!(controller.latest_frame().unwrap().sequence, 0);
}

#[test]
fn test_transient_errors_are_skipped() {
    let geometry = FrameGeometry::new(2, 2);
    let source = MockFrameSource::from_events(
        geometry,
        vec![
            MockEvent::Timeout,
            MockEvent::ReadError("checksum".to_string()),
            MockEvent::Frame(Array2::from_elem((2, 2), 9)),
        ],
    )
    .repeating();
    let controller = PipelineController::start(test_config(geometry), Box::new(source)).unwrap();
    let events = controller.events();

    let seen = wait_for_event(&events, |e| matches!(e, PipelineEvent::FpsUpdated(_)));
    let transient = seen
        .iter()
        .filter(|e| {
            matches!(
                e,
                PipelineEvent::Error {
                    severity: Severity::Transient,
                    ..
                }
            )
        })
        .count();
    assert_eq!(transient, 2);
    assert!(controller.running());
    assert_eq!(controller.frame().unwrap()[[0, 0]], 9.0);
}

#[test]
fn test_playback_backend_and_reset_dir() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let write = |dir: &Path, value: u16| {
        let bytes: Vec<u8> = std::iter::repeat(value.to_le_bytes())
            .take(8)
            .flatten()
            .collect();
        fs::write(dir.join("frame_000.raw"), bytes).unwrap();
    };
    write(first.path(), 11);
    write(second.path(), 22);

    let mut config = test_config(FrameGeometry::new(4, 2));
    config.camera = CameraType::Playback;
    config.playback_dir = Some(first.path().to_path_buf());
    config.frame_period_ms = 1;
    let controller = PipelineController::start_with_backend(config).unwrap();
    let events = controller.events();

    wait_until(|| controller.frame().map(|f| f[[0, 0]]) == Some(11.0));
    controller.reset_dir(second.path()).unwrap();
    wait_until(|| controller.frame().map(|f| f[[0, 0]]) == Some(22.0));

    let empty = TempDir::new().unwrap();
    controller.reset_dir(empty.path()).unwrap();
    wait_for_event(&events, |e| {
        matches!(
            e,
            PipelineEvent::Error {
                severity: Severity::Request,
                ..
            }
        )
    });
    assert!(controller.running());
    assert_eq!(controller.frame().unwrap()[[0, 0]], 22.0);
}

#[test]
fn test_simulated_backend_runs() {
    let mut config = PipelineConfig::for_camera(CameraType::Simulated);
    config.geometry = Some(FrameGeometry::new(32, 16));
    config.frame_period_ms = 1;
    let controller = PipelineController::start_with_backend(config).unwrap();
    wait_until(|| controller.latest_frame().is_some());
    assert_eq!(controller.geometry(), FrameGeometry::new(32, 16));
    assert_eq!(controller.camera_type(), CameraType::Simulated);
}

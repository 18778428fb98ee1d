//! Acquisition loop and the controller that owns it.
//!
//! One thread pulls frames from the source, runs them through the filter
//! chain and pushes the result into the frame buffer. Everything else talks
//! to that thread through shared atomics, read at the top of each
//! iteration, or through commands drained between frames, so a setting never
//! changes while a frame is being filtered.

use crossbeam_channel::{unbounded, Receiver, Sender};
use ndarray::{Array1, Array2};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::events::{EventSink, PipelineEvent, Severity};
use crate::filters::dark_sub::write_mask;
use crate::filters::{FilterChain, MaskError, MAX_MEAN_DEPTH, MAX_STD_DEV_N};
use crate::fps::FrameRateMeter;
use crate::frame::{CameraType, FrameGeometry, PlotMode, ProcessedFrame};
use crate::frame_buffer::FrameBuffer;
use crate::frame_source::{backend_for, FrameSource, SourceError};
use crate::save::{SaveCoordinator, SaveError, SaveRequest, SaveState};
use crate::stats::{self, Histogram, StatisticsEngine};

/// Settings shared lock-free between the controller and the acquisition loop.
#[derive(Debug)]
struct PipelineState {
    running: AtomicBool,
    pix_remap: AtomicBool,
    plot_mode: AtomicU8,
    std_dev_n: AtomicU32,
    /// f64 bit patterns
    crosshair_x: AtomicU64,
    crosshair_y: AtomicU64,
}

impl PipelineState {
    fn new(config: &PipelineConfig, geometry: FrameGeometry) -> Self {
        let (x, y) = geometry.center();
        Self {
            running: AtomicBool::new(true),
            pix_remap: AtomicBool::new(config.pix_remap),
            plot_mode: AtomicU8::new(config.plot_mode.to_u8()),
            std_dev_n: AtomicU32::new(config.std_dev_n as u32),
            crosshair_x: AtomicU64::new(x.to_bits()),
            crosshair_y: AtomicU64::new(y.to_bits()),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn pix_remap(&self) -> bool {
        self.pix_remap.load(Ordering::SeqCst)
    }

    fn plot_mode(&self) -> PlotMode {
        PlotMode::from_u8(self.plot_mode.load(Ordering::SeqCst))
    }

    fn std_dev_n(&self) -> usize {
        self.std_dev_n.load(Ordering::SeqCst) as usize
    }

    fn center(&self) -> (f64, f64) {
        (
            f64::from_bits(self.crosshair_x.load(Ordering::SeqCst)),
            f64::from_bits(self.crosshair_y.load(Ordering::SeqCst)),
        )
    }

    fn set_center(&self, x: f64, y: f64) {
        self.crosshair_x.store(x.to_bits(), Ordering::SeqCst);
        self.crosshair_y.store(y.to_bits(), Ordering::SeqCst);
    }

    /// Crosshair as pixel indices; negative or NaN coordinates become 0
    fn crosshair_pixel(&self) -> (usize, usize) {
        let (x, y) = self.center();
        (x as usize, y as usize)
    }
}

/// Requests applied by the acquisition loop between frames.
#[derive(Debug, Clone, PartialEq)]
enum ControlCommand {
    SetMeanDepth(usize),
    CollectMask {
        avg_frames: u64,
        path: Option<PathBuf>,
    },
    StopCollectingMask,
    ApplyMask(PathBuf),
    ResetDir(PathBuf),
}

#[derive(Debug, Clone)]
struct MaskSettings {
    path: Option<PathBuf>,
    avg_frames: u64,
}

/// State owned by the acquisition thread.
struct Acquisition {
    source: Box<dyn FrameSource>,
    chain: FilterChain,
    scratch: ProcessedFrame,
    state: Arc<PipelineState>,
    buffer: Arc<FrameBuffer>,
    fps: Arc<FrameRateMeter>,
    commands: Receiver<ControlCommand>,
    events: EventSink,
    fps_report_interval: u64,
    /// Output file and frame count of the collection in progress
    collecting: Option<(u64, Option<PathBuf>)>,
    frames: u64,
}

impl Acquisition {
    fn run(mut self) {
        info!("Acquisition started on {} source", self.source.name());

        while self.state.running() && self.step() {}

        self.state.running.store(false, Ordering::SeqCst);
        self.buffer.close();
        if let Err(e) = self.source.close() {
            warn!("Error closing frame source: {}", e);
        }
        info!("Acquisition finished after {} frames", self.frames);
        self.events.publish(PipelineEvent::Finished);
    }

    /// Apply pending settings, then acquire and publish one frame.
    /// Returns false once acquisition should stop.
    fn step(&mut self) -> bool {
        self.apply_settings();
        self.drain_commands();

        let raw = match self.source.next_frame() {
            Ok(raw) => raw,
            Err(e) if e.is_transient() => {
                debug!("Skipping frame: {}", e);
                self.events.error(Severity::Transient, e.to_string());
                return true;
            }
            Err(e) => {
                error!("Frame source failed: {}", e);
                self.events.error(Severity::Fatal, e.to_string());
                return false;
            }
        };

        // a frame that arrives after stop() is discarded
        if !self.state.running() {
            return false;
        }

        match self.chain.apply(&raw, &mut self.scratch) {
            Ok(Some(mask)) => self.mask_completed(mask),
            Ok(None) => {}
            Err(e) => {
                error!("Stopping acquisition: {}", e);
                self.events.error(Severity::Fatal, e.to_string());
                return false;
            }
        }

        self.buffer.push(&self.scratch);
        self.fps.record(Instant::now());
        self.frames += 1;
        if self.frames % self.fps_report_interval == 0 {
            let fps = self.fps.fps();
            debug!("{} frames, {:.1} fps", self.frames, fps);
            self.events.publish(PipelineEvent::FpsUpdated(fps));
        }
        true
    }

    fn apply_settings(&mut self) {
        self.chain.twos.set_remap(self.state.pix_remap());

        let requested = self.state.std_dev_n();
        let target = self
            .chain
            .std_dev
            .pending_window_size()
            .unwrap_or_else(|| self.chain.std_dev.window_size());
        if requested != target {
            debug!("Std-dev window {} -> {}", target, requested);
            self.chain.std_dev.set_window_size(requested);
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.handle(command);
        }
    }

    fn handle(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::SetMeanDepth(depth) => self.chain.mean.set_depth(depth),
            ControlCommand::CollectMask { avg_frames, path } => {
                match self.chain.dark.start_collecting(avg_frames) {
                    Ok(()) => {
                        info!("Collecting dark mask over {} frames", avg_frames);
                        self.collecting = Some((avg_frames, path));
                    }
                    Err(e) => self.mask_failed(e),
                }
            }
            ControlCommand::StopCollectingMask => {
                self.collecting = None;
                if let Err(e) = self.chain.dark.stop_collecting() {
                    match e {
                        MaskError::NotCollecting => {
                            self.events.error(Severity::Request, e.to_string())
                        }
                        e => self.mask_failed(e),
                    }
                }
            }
            ControlCommand::ApplyMask(path) => {
                if let Err(e) = self.chain.dark.load_mask(&path) {
                    warn!("Keeping previous dark mask: {}", e);
                    self.mask_failed(e);
                }
            }
            ControlCommand::ResetDir(dir) => match self.source.reset_dir(&dir) {
                Ok(()) => {
                    info!("Source directory reset to {}", dir.display());
                    self.chain.reset_statistics();
                }
                Err(e) => {
                    warn!("Directory reset to {} failed: {}", dir.display(), e);
                    self.events.error(Severity::Request, e.to_string());
                }
            },
        }
    }

    fn mask_completed(&mut self, mask: Array2<f32>) {
        let (frames, path) = self.collecting.take().unwrap_or((0, None));
        if let Some(path) = &path {
            if let Err(e) = write_mask(path, &mask) {
                error!("Failed to write dark mask to {}: {}", path.display(), e);
                self.mask_failed(e);
                return;
            }
            info!("Dark mask written to {}", path.display());
        }
        self.events
            .publish(PipelineEvent::MaskCollected { frames, path });
    }

    fn mask_failed(&self, e: MaskError) {
        self.events.publish(PipelineEvent::MaskFailed {
            error: e.to_string(),
        });
    }
}

/// Owns the acquisition thread, the frame buffer and the save worker, and
/// exposes everything a display or remote client needs.
pub struct PipelineController {
    camera: CameraType,
    geometry: FrameGeometry,
    state: Arc<PipelineState>,
    buffer: Arc<FrameBuffer>,
    fps: Arc<FrameRateMeter>,
    stats: StatisticsEngine,
    commands: Sender<ControlCommand>,
    mask_settings: Mutex<MaskSettings>,
    events: EventSink,
    event_rx: Receiver<PipelineEvent>,
    acquisition: Mutex<Option<JoinHandle<()>>>,
    saver: SaveCoordinator,
}

impl PipelineController {
    /// Start acquisition with the backend for `config.camera`.
    pub fn start_with_backend(config: PipelineConfig) -> PipelineResult<Self> {
        let source = backend_for(config.camera).map_err(|e| match e {
            SourceError::Unsupported { .. } => PipelineError::UnsupportedBackend(config.camera),
            other => other.into(),
        })?;
        Self::start(config, source)
    }

    /// Open `source`, check its geometry and start acquiring.
    ///
    /// # Errors
    /// Invalid configuration, a source that fails to open, or a source whose
    /// geometry differs from the configured one. Nothing is left running.
    pub fn start(config: PipelineConfig, mut source: Box<dyn FrameSource>) -> PipelineResult<Self> {
        config.validate()?;
        let geometry = config.geometry();

        let opened = source.open(&config.source_config())?;
        if opened != geometry {
            let _ = source.close();
            return Err(PipelineError::geometry_mismatch(geometry, opened.shape()));
        }

        let (events, event_rx) = EventSink::new();
        let mut chain = FilterChain::new(
            geometry,
            config.std_dev_n,
            config.mean_depth,
            config.pix_remap,
        );
        if let Some(mask) = config.mask_file.as_deref().filter(|p| p.exists()) {
            if let Err(e) = chain.dark.load_mask(mask) {
                warn!("Ignoring dark mask {}: {}", mask.display(), e);
                events.publish(PipelineEvent::MaskFailed {
                    error: e.to_string(),
                });
            }
        }

        let buffer = Arc::new(FrameBuffer::new(geometry, config.buffer_depth));
        let fps = Arc::new(FrameRateMeter::new());
        let state = Arc::new(PipelineState::new(&config, geometry));
        let saver = SaveCoordinator::spawn(buffer.clone(), events.clone())?;
        let (commands, command_rx) = unbounded();

        events.publish(PipelineEvent::Started {
            camera: config.camera,
            geometry,
        });
        info!(
            "Starting {} pipeline at {}, std-dev window {}, buffer depth {}",
            config.camera, geometry, config.std_dev_n, config.buffer_depth
        );

        let acquisition = Acquisition {
            source,
            chain,
            scratch: ProcessedFrame::zeros(geometry),
            state: state.clone(),
            buffer: buffer.clone(),
            fps: fps.clone(),
            commands: command_rx,
            events: events.clone(),
            fps_report_interval: config.fps_report_interval.max(1),
            collecting: None,
            frames: 0,
        };
        let handle = std::thread::Builder::new()
            .name("lv-acquire".to_string())
            .spawn(move || acquisition.run())
            .map_err(|source| PipelineError::Spawn {
                name: "acquisition",
                source,
            })?;

        Ok(Self {
            camera: config.camera,
            geometry,
            state,
            buffer,
            fps,
            stats: StatisticsEngine::new(config.histogram_bins),
            commands,
            mask_settings: Mutex::new(MaskSettings {
                path: config.mask_file.clone(),
                avg_frames: config.mask_avg_frames,
            }),
            events,
            event_rx,
            acquisition: Mutex::new(Some(handle)),
            saver,
        })
    }

    /// Ask the acquisition loop to exit. Safe to call repeatedly and from
    /// any thread; returns without waiting.
    pub fn stop(&self) {
        if self.state.running.swap(false, Ordering::SeqCst) {
            info!("Stop requested");
        }
    }

    /// Whether the acquisition loop is still pulling frames.
    pub fn running(&self) -> bool {
        self.state.running()
    }

    /// Wait for the acquisition thread to exit.
    pub fn join(&self) {
        let handle = self
            .acquisition
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.join() {
                error!("Acquisition thread panicked: {:?}", e);
            }
        }
    }

    pub fn camera_type(&self) -> CameraType {
        self.camera
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    /// Receiver for pipeline events. Every clone competes for the same
    /// events, so a single observer should own it.
    pub fn events(&self) -> Receiver<PipelineEvent> {
        self.event_rx.clone()
    }

    /// Shared handle for consumers that read the frame stream in order.
    pub fn frame_buffer(&self) -> Arc<FrameBuffer> {
        self.buffer.clone()
    }

    fn send(&self, command: ControlCommand) -> PipelineResult<()> {
        if !self.running() {
            return Err(PipelineError::NotRunning);
        }
        self.commands
            .send(command)
            .map_err(|_| PipelineError::NotRunning)
    }

    // Saving

    pub fn save_frames(
        &self,
        path: impl Into<PathBuf>,
        n_frames: u64,
        n_avgs: u64,
    ) -> Result<(), SaveError> {
        self.saver.submit(SaveRequest::new(path, n_frames, n_avgs))
    }

    /// Save request arriving from a remote client; queued behind local ones.
    pub fn capture_frames_remote(
        &self,
        path: &str,
        n_frames: u64,
        n_avgs: u64,
    ) -> Result<(), SaveError> {
        info!("Remote capture of {} frames to {}", n_frames, path);
        self.save_frames(path, n_frames, n_avgs)
    }

    pub fn save_state(&self) -> SaveState {
        self.saver.state()
    }

    /// Save requests queued or in progress
    pub fn pending_saves(&self) -> usize {
        self.saver.outstanding()
    }

    // Display settings

    pub fn set_center(&self, x: f64, y: f64) {
        self.state.set_center(x, y);
        self.events.publish(PipelineEvent::CrosshairChanged { x, y });
    }

    pub fn center(&self) -> (f64, f64) {
        self.state.center()
    }

    pub fn set_plot_mode(&self, mode: PlotMode) {
        self.state.plot_mode.store(mode.to_u8(), Ordering::SeqCst);
    }

    pub fn plot_mode(&self) -> PlotMode {
        self.state.plot_mode()
    }

    pub fn set_pix_remap(&self, remap: bool) {
        self.state.pix_remap.store(remap, Ordering::SeqCst);
    }

    pub fn pix_remap(&self) -> bool {
        self.state.pix_remap()
    }

    /// Request a new std-dev window, applied at the window's next rollover.
    pub fn set_std_dev_n(&self, n: usize) -> PipelineResult<()> {
        if n == 0 || n > MAX_STD_DEV_N {
            return Err(PipelineError::InvalidSetting(format!(
                "std-dev window {n} outside 1..={MAX_STD_DEV_N}"
            )));
        }
        self.state.std_dev_n.store(n as u32, Ordering::SeqCst);
        Ok(())
    }

    pub fn std_dev_n(&self) -> usize {
        self.state.std_dev_n()
    }

    pub fn set_mean_depth(&self, depth: usize) -> PipelineResult<()> {
        if depth == 0 || depth > MAX_MEAN_DEPTH {
            return Err(PipelineError::InvalidSetting(format!(
                "mean depth {depth} outside 1..={MAX_MEAN_DEPTH}"
            )));
        }
        self.send(ControlCommand::SetMeanDepth(depth))
    }

    // Dark mask

    /// Where the next collected mask is written and how many frames it averages.
    pub fn set_mask_settings(&self, path: Option<PathBuf>, avg_frames: u64) -> PipelineResult<()> {
        if avg_frames == 0 {
            return Err(PipelineError::InvalidSetting(
                "mask averaging requires at least one frame".to_string(),
            ));
        }
        let mut settings = self
            .mask_settings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        settings.path = path;
        settings.avg_frames = avg_frames;
        Ok(())
    }

    /// Start collecting a dark mask with the current mask settings.
    pub fn collect_mask(&self) -> PipelineResult<()> {
        let settings = self
            .mask_settings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        self.send(ControlCommand::CollectMask {
            avg_frames: settings.avg_frames,
            path: settings.path,
        })
    }

    pub fn stop_collecting_mask(&self) -> PipelineResult<()> {
        self.send(ControlCommand::StopCollectingMask)
    }

    /// Load a mask file as the dark reference.
    pub fn apply_mask(&self, path: impl Into<PathBuf>) -> PipelineResult<()> {
        self.send(ControlCommand::ApplyMask(path.into()))
    }

    /// Point a playback source at another directory.
    pub fn reset_dir(&self, dir: impl Into<PathBuf>) -> PipelineResult<()> {
        self.send(ControlCommand::ResetDir(dir.into()))
    }

    // Display export

    pub fn fps(&self) -> f32 {
        self.fps.fps()
    }

    pub fn latest_frame(&self) -> Option<ProcessedFrame> {
        self.buffer.latest()
    }

    /// Raw frame after two's-complement correction
    pub fn frame(&self) -> Option<Array2<f32>> {
        self.buffer.with_latest(|f| f.raw.clone())
    }

    pub fn dark_subtracted_frame(&self) -> Option<Array2<f32>> {
        self.buffer.with_latest(|f| f.dark_subtracted.clone())
    }

    pub fn std_dev_frame(&self) -> Option<Array2<f32>> {
        self.buffer.with_latest(|f| f.std_dev.clone())
    }

    pub fn mean_frame(&self) -> Option<Array2<f32>> {
        self.buffer.with_latest(|f| f.mean.clone())
    }

    pub fn snr_frame(&self) -> Option<Array2<f32>> {
        let (mean, std_dev) = self
            .buffer
            .with_latest(|f| (f.mean.clone(), f.std_dev.clone()))?;
        Some(stats::snr_frame(&mean, &std_dev))
    }

    pub fn histogram(&self) -> Option<Histogram> {
        let frame = self.dark_subtracted_frame()?;
        Some(self.stats.histogram(&frame, self.geometry))
    }

    pub fn std_dev_histogram(&self) -> Option<Histogram> {
        let frame = self.std_dev_frame()?;
        Some(self.stats.histogram(&frame, self.geometry))
    }

    pub fn spectral_mean(&self) -> Option<Array1<f32>> {
        let frame = self.dark_subtracted_frame()?;
        Some(stats::spectral_mean(
            &frame,
            self.geometry,
            self.state.plot_mode(),
            self.state.crosshair_pixel(),
        ))
    }

    pub fn spatial_mean(&self) -> Option<Array1<f32>> {
        let frame = self.dark_subtracted_frame()?;
        Some(stats::spatial_mean(
            &frame,
            self.geometry,
            self.state.plot_mode(),
            self.state.crosshair_pixel(),
        ))
    }

    /// FFT magnitude of the current mean frame
    pub fn frame_fft(&self) -> Option<Array2<f32>> {
        let mean = self.mean_frame()?;
        Some(self.stats.fft_magnitude(&mean))
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.stop();
        self.join();
        self.saver.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::WindowFill;
    use crate::frame_source::mock::MockFrameSource;
    use crate::frame_source::SourceConfig;
    use std::time::Duration;

    fn config(geometry: FrameGeometry) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.geometry = Some(geometry);
        config.std_dev_n = 4;
        config.mean_depth = 2;
        config.buffer_depth = 8;
        config.histogram_bins = 16;
        config
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_state_atomics() {
        let geometry = FrameGeometry::new(10, 4);
        let state = PipelineState::new(&config(geometry), geometry);
        assert_eq!(state.center(), (5.0, 2.0));
        state.set_center(-3.0, 2.9);
        assert_eq!(state.crosshair_pixel(), (0, 2));
        assert_eq!(state.plot_mode(), PlotMode::AllPixels);
        assert_eq!(state.std_dev_n(), 4);
    }

    fn acquisition(config: &PipelineConfig, source: MockFrameSource) -> Acquisition {
        let geometry = config.geometry();
        let mut source: Box<dyn FrameSource> = Box::new(source);
        source
            .open(&SourceConfig::new(CameraType::Simulated, geometry))
            .unwrap();
        let (events, _) = EventSink::new();
        let (_, commands) = unbounded();
        Acquisition {
            source,
            chain: FilterChain::new(geometry, config.std_dev_n, config.mean_depth, false),
            scratch: ProcessedFrame::zeros(geometry),
            state: Arc::new(PipelineState::new(config, geometry)),
            buffer: Arc::new(FrameBuffer::new(geometry, config.buffer_depth)),
            fps: Arc::new(FrameRateMeter::new()),
            commands,
            events,
            fps_report_interval: 100,
            collecting: None,
            frames: 0,
        }
    }

    #[test]
    fn test_std_dev_resize_waits_for_next_rollover() {
        let geometry = FrameGeometry::new(2, 2);
        let config = config(geometry);
        let mut acq = acquisition(&config, MockFrameSource::new_constant(geometry, 3));

        let fills: Vec<WindowFill> = (0..4)
            .map(|_| {
                assert!(acq.step());
                acq.scratch.std_dev_fill
            })
            .collect();
        assert_eq!(fills[2], WindowFill::Filling { seen: 3, target: 4 });
        assert_eq!(fills[3], WindowFill::Full { size: 4 });

        acq.state.std_dev_n.store(2, Ordering::SeqCst);
        for _ in 0..3 {
            assert!(acq.step());
            assert_eq!(acq.scratch.std_dev_fill, WindowFill::Full { size: 4 });
            assert_eq!(acq.chain.std_dev.pending_window_size(), Some(2));
        }

        assert!(acq.step());
        assert_eq!(acq.scratch.std_dev_fill, WindowFill::Full { size: 2 });
        assert_eq!(acq.chain.std_dev.pending_window_size(), None);
        assert_eq!(acq.buffer.latest().unwrap().sequence, 7);
    }

    #[test]
    fn test_settings_applied_between_frames() {
        let geometry = FrameGeometry::new(4, 2);
        let source = MockFrameSource::new_constant(geometry, 0x8000 | 7)
            .with_frame_delay(Duration::from_millis(1));
        let controller = PipelineController::start(config(geometry), Box::new(source)).unwrap();

        wait_until(|| controller.frame().is_some());
        assert_eq!(controller.frame().unwrap()[[0, 0]], (0x8000 | 7) as f32);

        controller.set_pix_remap(true);
        wait_until(|| controller.frame().map(|f| f[[0, 0]]) == Some(7.0));

        assert!(controller.set_std_dev_n(0).is_err());
        assert!(controller.set_std_dev_n(MAX_STD_DEV_N + 1).is_err());
        controller.set_std_dev_n(10).unwrap();
        assert_eq!(controller.std_dev_n(), 10);

        assert!(matches!(
            controller.set_mean_depth(0),
            Err(PipelineError::InvalidSetting(_))
        ));
        assert!(matches!(
            controller.set_mean_depth(MAX_MEAN_DEPTH + 1),
            Err(PipelineError::InvalidSetting(_))
        ));
        controller.set_mean_depth(MAX_MEAN_DEPTH).unwrap();

        controller.stop();
        controller.join();
        assert!(!controller.running());
    }

    #[test]
    fn test_unsupported_backend() {
        let config = PipelineConfig::for_camera(CameraType::FrameGrabber);
        assert!(matches!(
            PipelineController::start_with_backend(config),
            Err(PipelineError::UnsupportedBackend(CameraType::FrameGrabber))
        ));
    }

    #[test]
    fn test_commands_rejected_after_stop() {
        let geometry = FrameGeometry::new(2, 2);
        let source = MockFrameSource::new_constant(geometry, 1);
        let controller = PipelineController::start(config(geometry), Box::new(source)).unwrap();
        controller.stop();
        controller.join();
        assert!(matches!(
            controller.collect_mask(),
            Err(PipelineError::NotRunning)
        ));
    }
}

use ndarray::Array2;
use std::collections::VecDeque;
use std::time::Duration;

use super::{FrameSource, SourceConfig, SourceError, SourceResult};
use crate::frame::{FrameGeometry, RawFrame};

/// One scripted response from [`MockFrameSource`].
#[derive(Debug, Clone)]
pub enum MockEvent {
    Frame(Array2<u16>),
    Timeout,
    ReadError(String),
}

/// Scripted frame source for tests.
///
/// Replays a fixed list of frames and failures, then either repeats the last
/// frame forever or reports timeouts once the script runs out.
pub struct MockFrameSource {
    geometry: FrameGeometry,
    script: VecDeque<MockEvent>,
    repeat_last: Option<Array2<u16>>,
    repeat: bool,
    frame_delay: Duration,
    timeout: Duration,
    sequence: u64,
    elapsed: Duration,
    is_open: bool,
}

impl MockFrameSource {
    pub fn new(geometry: FrameGeometry, frames: Vec<Array2<u16>>) -> Self {
        Self::from_events(geometry, frames.into_iter().map(MockEvent::Frame).collect())
    }

    pub fn from_events(geometry: FrameGeometry, events: Vec<MockEvent>) -> Self {
        Self {
            geometry,
            script: events.into(),
            repeat_last: None,
            repeat: false,
            frame_delay: Duration::ZERO,
            timeout: Duration::from_millis(1),
            sequence: 0,
            elapsed: Duration::ZERO,
            is_open: false,
        }
    }

    /// A source that delivers `frame` forever.
    pub fn new_repeating(geometry: FrameGeometry, frame: Array2<u16>) -> Self {
        Self::new(geometry, vec![frame]).repeating()
    }

    /// A source delivering a constant-valued frame forever.
    pub fn new_constant(geometry: FrameGeometry, value: u16) -> Self {
        Self::new_repeating(geometry, Array2::from_elem(geometry.shape(), value))
    }

    /// Keep delivering the last scripted frame once the script is exhausted.
    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    /// Sleep this long before delivering each frame.
    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    /// Frames still in the script
    pub fn remaining(&self) -> usize {
        self.script.len()
    }

    fn emit(&mut self, data: Array2<u16>) -> RawFrame {
        self.elapsed += self.frame_delay;
        let frame = RawFrame::new(self.sequence, self.elapsed, data);
        self.sequence += 1;
        frame
    }
}

impl FrameSource for MockFrameSource {
    fn name(&self) -> &str {
        "mock"
    }

    fn open(&mut self, config: &SourceConfig) -> SourceResult<FrameGeometry> {
        self.timeout = config.timeout;
        self.is_open = true;
        Ok(self.geometry)
    }

    fn next_frame(&mut self) -> SourceResult<RawFrame> {
        if !self.is_open {
            return Err(SourceError::NotOpen);
        }
        if !self.frame_delay.is_zero() {
            std::thread::sleep(self.frame_delay);
        }

        match self.script.pop_front() {
            Some(MockEvent::Frame(data)) => {
                if self.repeat {
                    self.repeat_last = Some(data.clone());
                }
                Ok(self.emit(data))
            }
            Some(MockEvent::Timeout) => Err(SourceError::Timeout(self.timeout)),
            Some(MockEvent::ReadError(msg)) => Err(SourceError::Read(msg)),
            None => match self.repeat_last.clone() {
                Some(data) => Ok(self.emit(data)),
                None => {
                    // Stand in for a camera that has gone quiet.
                    std::thread::sleep(self.timeout.min(Duration::from_millis(5)));
                    Err(SourceError::Timeout(self.timeout))
                }
            },
        }
    }

    fn close(&mut self) -> SourceResult<()> {
        self.is_open = false;
        Ok(())
    }
}

//! Frame Source: seek-to-time and continuous sampling over a host decoder.
//!
//! [`FrameSource`] wraps a [`MediaBackend`] and a configured capture size.
//! Every [`Sample`] it produces has exactly the capture size, whatever the
//! natural size of the decoded frame.
//!
//! Seek-based sampling and continuous sampling both take `&mut self`, so
//! one source can never be seeked while it is being played forward.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use clipsmith::FrameSource;
//! use clipsmith::synthetic::SyntheticSource;
//!
//! let backend = SyntheticSource::solid(320, 240, 30.0, Duration::from_secs(2), [10, 20, 30]);
//! let mut source = FrameSource::open(backend)?;
//! source.set_capture_size(160, 120)?;
//!
//! let sample = source.seek_and_sample(Duration::from_millis(500))?;
//! assert_eq!(sample.raster.dimensions(), (160, 120));
//! # Ok::<(), clipsmith::PipelineError>(())
//! ```

use std::ops::ControlFlow;
use std::time::Duration;

use image::RgbaImage;
use image::imageops::{self, FilterType};

use crate::configuration::DEFAULT_SEEK_TIMEOUT;
use crate::error::PipelineError;
use crate::media::{AudioPacket, MediaBackend, SourceInfo};

/// A timestamped raster extracted from a source.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Playback position the raster was taken from.
    pub timestamp: Duration,
    /// RGBA pixels at the source's capture size.
    pub raster: RgbaImage,
}

/// A decodable media resource with a configured capture size.
pub struct FrameSource<B: MediaBackend> {
    backend: B,
    info: SourceInfo,
    capture_width: u32,
    capture_height: u32,
    seek_timeout: Duration,
}

impl<B: MediaBackend> FrameSource<B> {
    /// Open a source once its natural dimensions and duration are known.
    ///
    /// The capture size starts at the natural size.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Source`] if the backend cannot probe the resource or
    /// reports a zero width or height.
    pub fn open(mut backend: B) -> Result<Self, PipelineError> {
        let info = backend.probe()?;
        if info.width == 0 || info.height == 0 {
            return Err(PipelineError::source_error(format!(
                "source reports zero dimensions ({}x{})",
                info.width, info.height
            )));
        }

        log::info!(
            "Opened source {}x{} ({:.2}s, audio={})",
            info.width,
            info.height,
            info.duration.as_secs_f64(),
            info.audio.is_some(),
        );

        Ok(Self {
            capture_width: info.width,
            capture_height: info.height,
            backend,
            info,
            seek_timeout: DEFAULT_SEEK_TIMEOUT,
        })
    }

    /// Natural properties of the resource.
    pub fn info(&self) -> &SourceInfo {
        &self.info
    }

    /// Total duration of the resource.
    pub fn duration(&self) -> Duration {
        self.info.duration
    }

    /// Current capture size as `(width, height)`.
    pub fn capture_size(&self) -> (u32, u32) {
        (self.capture_width, self.capture_height)
    }

    /// Change the size of every subsequently produced sample.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Validation`] if either dimension is zero.
    pub fn set_capture_size(&mut self, width: u32, height: u32) -> Result<(), PipelineError> {
        if width == 0 || height == 0 {
            return Err(PipelineError::Validation(format!(
                "capture size must be non-zero, got {width}x{height}"
            )));
        }
        self.capture_width = width;
        self.capture_height = height;
        Ok(())
    }

    /// Set the upper bound on how long a seek may wait for a frame.
    pub fn set_seek_timeout(&mut self, timeout: Duration) {
        self.seek_timeout = timeout;
    }

    /// Seek to the first frame at or after `time` and sample it.
    ///
    /// Times past the end of the resource are clamped to its duration.
    ///
    /// # Errors
    ///
    /// [`PipelineError::SeekTimeout`] if no frame arrives within the seek
    /// bound; [`PipelineError::Source`] if decoding fails.
    pub fn seek_and_sample(&mut self, time: Duration) -> Result<Sample, PipelineError> {
        let time = time.min(self.info.duration);
        let decoded = self
            .backend
            .seek(time, self.seek_timeout)?
            .ok_or(PipelineError::SeekTimeout {
                timestamp: time,
                waited: self.seek_timeout,
            })?;

        log::debug!("Sampled frame at {:?} (requested {:?})", decoded.timestamp, time);

        Ok(Sample {
            timestamp: time,
            raster: self.fit(decoded.image),
        })
    }

    /// Play forward in real time from `from`, invoking `on_frame` once per
    /// displayed frame with the sample and the audio tapped alongside it.
    ///
    /// Playback ends when the resource ends, when `on_frame` returns
    /// [`ControlFlow::Break`], or when either side fails. The backend's
    /// playback is always stopped before this returns.
    pub fn sample_continuous<F>(&mut self, from: Duration, mut on_frame: F) -> Result<(), PipelineError>
    where
        F: FnMut(Sample, &[AudioPacket]) -> Result<ControlFlow<()>, PipelineError>,
    {
        let from = from.min(self.info.duration);
        self.backend.play(from)?;
        log::debug!("Continuous sampling started at {from:?}");

        let result = loop {
            let playback = match self.backend.next_frame() {
                Ok(Some(playback)) => playback,
                Ok(None) => {
                    log::debug!("Source ended");
                    break Ok(());
                }
                Err(error) => break Err(error),
            };

            let sample = Sample {
                timestamp: playback.frame.timestamp,
                raster: self.fit(playback.frame.image),
            };
            match on_frame(sample, &playback.audio) {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => break Ok(()),
                Err(error) => break Err(error),
            }
        };

        self.backend.stop();
        result
    }

    /// Release the source and return the backend.
    pub fn into_backend(self) -> B {
        self.backend
    }

    fn fit(&self, image: RgbaImage) -> RgbaImage {
        if image.dimensions() == (self.capture_width, self.capture_height) {
            image
        } else {
            imageops::resize(
                &image,
                self.capture_width,
                self.capture_height,
                FilterType::Triangle,
            )
        }
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use unix_ts::Timestamp;

use crate::{
    buffer::{BufferPool, DEFAULT_BUFFER_COUNT},
    fourcc::FourCC,
    v4l2::{self, Backend, Device, Fraction, PixFormat, V4l2Backend},
    Error, FrameFormat,
};

/// Times a signal-interrupted wait is retried before the error is surfaced.
const MAX_INTERRUPTED_WAITS: u32 = 8;

/// Lifecycle state of a [`Capture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureState {
    Closed,
    Opened,
    Streaming,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CaptureState::Closed => write!(f, "closed"),
            CaptureState::Opened => write!(f, "opened"),
            CaptureState::Streaming => write!(f, "streaming"),
        }
    }
}

/// Capture settings with a builder interface.
#[derive(Debug, Clone)]
pub struct Camera {
    /// video device file for the camera
    device: PathBuf,

    /// requested mode, the driver may adjust resolution and frame rate
    format: FrameFormat,

    /// number of driver buffers to request
    num_buffers: u32,
}

impl Camera {
    pub fn with_device(mut self, device: impl AsRef<Path>) -> Camera {
        self.device = device.as_ref().to_path_buf();
        self
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Camera {
        self.format.width = width;
        self.format.height = height;
        self
    }

    pub fn with_format(mut self, format: FourCC) -> Camera {
        self.format.fourcc = format;
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Camera {
        self.format.fps = fps;
        self
    }

    pub fn with_buffers(mut self, num_buffers: u32) -> Camera {
        self.num_buffers = num_buffers;
        self
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    pub fn requested_format(&self) -> FrameFormat {
        self.format
    }

    /// Open the device with these settings.
    pub fn open(self) -> Result<Capture, Error> {
        let mut capture = Capture::new().with_buffer_count(self.num_buffers);
        capture.open(&self.device, self.format)?;
        Ok(capture)
    }

    /// Pixel formats the device offers, without configuring it.
    pub fn formats(&self) -> Result<Vec<FourCC>, Error> {
        v4l2::check_char_device(&self.device)?;
        let mut device =
            v4l2::V4l2Device::open(&self.device).map_err(|source| Error::DeviceOpenFailed {
                path: self.device.clone(),
                source,
            })?;
        Ok(v4l2::formats(&mut device)?
            .into_iter()
            .map(|desc| desc.fourcc)
            .collect())
    }
}

impl Default for Camera {
    fn default() -> Camera {
        Camera {
            device: PathBuf::from("/dev/video0"),
            format: FrameFormat::new(FourCC::YUYV, 320, 240, 10),
            num_buffers: DEFAULT_BUFFER_COUNT,
        }
    }
}

pub fn create_camera() -> Camera {
    Camera::default()
}

/// Proof that a frame is checked out of the pool.
///
/// Produced by [`Capture::wait_frame`] and consumed by
/// [`Capture::release_frame`]. It cannot be cloned, and the bytes it refers to
/// are only reachable through [`Capture::frame_data`], whose borrow ends
/// before the token can be released.
#[derive(Debug)]
#[must_use = "a checked-out frame must be returned with Capture::release_frame"]
pub struct FrameToken {
    index: u32,
    generation: u64,
    bytes_used: u32,
    sequence: u32,
    timestamp: Timestamp,
}

impl FrameToken {
    /// Pool slot holding the frame.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Bytes written by the hardware.
    pub fn len(&self) -> usize {
        self.bytes_used as usize
    }

    pub fn is_empty(&self) -> bool {
        self.bytes_used == 0
    }

    /// Driver frame counter.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Capture time reported by the driver.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

struct Session<D: Device> {
    // declared before `device` so the mappings go away before the descriptor
    pool: BufferPool<D::Mapping>,
    device: D,
    path: PathBuf,
    format: FrameFormat,
    streaming: bool,
}

/// The capture engine.
///
/// Drives one device through `Closed → Opened → Streaming` and hands out at
/// most one filled buffer at a time. All methods must be called from a single
/// owner; [`wait_frame`](Capture::wait_frame) is the only call that blocks.
pub struct Capture<B: Backend = V4l2Backend> {
    backend: B,
    buffer_count: u32,
    session: Option<Session<B::Device>>,
}

impl Capture<V4l2Backend> {
    pub fn new() -> Self {
        Capture::with_backend(V4l2Backend)
    }
}

impl Default for Capture<V4l2Backend> {
    fn default() -> Self {
        Capture::new()
    }
}

impl<B: Backend> fmt::Debug for Capture<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Capture");
        s.field("state", &self.state());
        if let Some(session) = &self.session {
            s.field("device", &session.path)
                .field("format", &session.format)
                .field("buffers", &session.pool.len())
                .field("checked_out", &session.pool.checked_out());
        }
        s.finish()
    }
}

impl<B: Backend> Capture<B> {
    pub fn with_backend(backend: B) -> Self {
        Capture {
            backend,
            buffer_count: DEFAULT_BUFFER_COUNT,
            session: None,
        }
    }

    /// Number of buffers to request at the next [`open`](Capture::open).
    pub fn with_buffer_count(mut self, count: u32) -> Self {
        self.buffer_count = count;
        self
    }

    pub fn state(&self) -> CaptureState {
        match &self.session {
            None => CaptureState::Closed,
            Some(s) if s.streaming => CaptureState::Streaming,
            Some(_) => CaptureState::Opened,
        }
    }

    /// Open `path` and configure it for `requested`.
    ///
    /// The path must name a character device. The driver may adjust width,
    /// height and frame rate; the adjusted values are what
    /// [`format`](Capture::format) reports afterwards. A different pixel
    /// format is refused. On any failure nothing stays open or mapped.
    pub fn open(&mut self, path: impl AsRef<Path>, requested: FrameFormat) -> Result<(), Error> {
        if self.session.is_some() {
            return Err(Error::InvalidState {
                operation: "open",
                state: self.state(),
            });
        }
        check_positive(&requested)?;

        let path = path.as_ref();
        v4l2::check_char_device(path)?;

        let mut device = self
            .backend
            .open(path)
            .map_err(|source| Error::DeviceOpenFailed {
                path: path.to_path_buf(),
                source,
            })?;

        let caps = device
            .query_capabilities()
            .map_err(|source| Error::DeviceQuery {
                request: "VIDIOC_QUERYCAP",
                source,
            })?;
        log::debug!(
            "{}: {} ({}) caps 0x{:08x}",
            path.display(),
            caps.card,
            caps.driver,
            caps.effective()
        );
        if !caps.is_capture() || !caps.supports_streaming() {
            return Err(Error::UnsupportedDevice {
                path: path.to_path_buf(),
                capabilities: caps.effective(),
            });
        }

        let format = negotiate(&mut device, requested)?;
        let pool = BufferPool::allocate(&mut device, self.buffer_count)?;
        log::info!(
            "opened {} at {} with {} buffers",
            path.display(),
            format,
            pool.len()
        );

        self.session = Some(Session {
            pool,
            device,
            path: path.to_path_buf(),
            format,
            streaming: false,
        });
        Ok(())
    }

    /// Hand every buffer to the driver and turn streaming on.
    pub fn start(&mut self) -> Result<(), Error> {
        let state = self.state();
        let session = match self.session.as_mut() {
            Some(s) if !s.streaming => s,
            _ => {
                return Err(Error::InvalidState {
                    operation: "start",
                    state,
                })
            }
        };

        for index in 0..session.pool.len() as u32 {
            session
                .device
                .queue_buffer(index)
                .map_err(|source| Error::QueueFailed { index, source })?;
        }
        session.device.stream_on().map_err(Error::StreamOnFailed)?;
        session.pool.reset();
        session.streaming = true;

        log::info!("streaming from {}", session.path.display());
        Ok(())
    }

    /// Block until the driver fills a buffer or `timeout_ms` elapses.
    ///
    /// Returns `Ok(None)` on timeout. The returned token must be passed to
    /// [`release_frame`](Capture::release_frame) before the next call;
    /// waiting while a frame is still out fails with
    /// [`Error::FrameAlreadyCheckedOut`].
    pub fn wait_frame(&mut self, timeout_ms: u32) -> Result<Option<FrameToken>, Error> {
        let state = self.state();
        let session = match self.session.as_mut() {
            Some(s) if s.streaming => s,
            _ => {
                return Err(Error::InvalidState {
                    operation: "wait for a frame",
                    state,
                })
            }
        };
        session.pool.ensure_available()?;

        let mut interrupted = 0;
        loop {
            match session.device.wait_readable(timeout_ms) {
                Ok(true) => break,
                Ok(false) => {
                    log::trace!("no frame within {} ms", timeout_ms);
                    return Ok(None);
                }
                Err(err)
                    if err.kind() == io::ErrorKind::Interrupted
                        && interrupted < MAX_INTERRUPTED_WAITS =>
                {
                    interrupted += 1;
                    log::debug!("wait interrupted, retry {}", interrupted);
                }
                Err(err) => return Err(Error::WaitFailed(err)),
            }
        }

        let dequeued = match session.device.dequeue_buffer() {
            Ok(dequeued) => dequeued,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(err) => return Err(Error::DequeueFailed(err)),
        };

        let generation = match session.pool.check_out(dequeued.index) {
            Ok(generation) => generation,
            Err(err) => {
                log::error!("{}, ending the stream", err);
                if let Err(off) = session.device.stream_off() {
                    log::warn!("VIDIOC_STREAMOFF failed: {}", off);
                }
                session.streaming = false;
                session.pool.reset();
                return Err(err);
            }
        };

        log::trace!(
            "frame {} in buffer {} ({} bytes)",
            dequeued.sequence,
            dequeued.index,
            dequeued.bytes_used
        );
        Ok(Some(FrameToken {
            index: dequeued.index,
            generation,
            bytes_used: dequeued.bytes_used,
            sequence: dequeued.sequence,
            timestamp: dequeued.timestamp,
        }))
    }

    /// Bytes of the checked-out frame.
    pub fn frame_data(&self, token: &FrameToken) -> Result<&[u8], Error> {
        match &self.session {
            Some(session) => session.pool.view(token.index, token.generation, token.len()),
            None => Err(Error::NoOutstandingFrame { index: token.index }),
        }
    }

    /// Return a frame to the driver so the hardware can fill it again.
    ///
    /// A token from an earlier stream or session is refused with
    /// [`Error::NoOutstandingFrame`] even when its slot is held again.
    pub fn release_frame(&mut self, token: FrameToken) -> Result<(), Error> {
        let FrameToken { index, generation, .. } = token;
        let session = match self.session.as_mut() {
            Some(s) if s.pool.is_checked_out(index, generation) => s,
            _ => return Err(Error::NoOutstandingFrame { index }),
        };

        let queued = session
            .device
            .queue_buffer(index)
            .map_err(|source| Error::QueueFailed { index, source });
        session.pool.check_in(index, generation)?;
        queued
    }

    /// Wait for a frame and wrap it in a guard that releases it on drop.
    pub fn next_frame(&mut self, timeout_ms: u32) -> Result<Option<Frame<'_, B>>, Error> {
        match self.wait_frame(timeout_ms)? {
            Some(token) => Ok(Some(Frame {
                capture: self,
                token: Some(token),
            })),
            None => Ok(None),
        }
    }

    /// Turn streaming off. Buffers stay mapped for a later [`start`](Capture::start).
    pub fn stop(&mut self) -> Result<(), Error> {
        let state = self.state();
        let session = match self.session.as_mut() {
            Some(s) if s.streaming => s,
            _ => {
                return Err(Error::InvalidState {
                    operation: "stop",
                    state,
                })
            }
        };

        session.device.stream_off().map_err(Error::StreamOffFailed)?;
        session.streaming = false;
        session.pool.reset();

        log::info!("stopped {}", session.path.display());
        Ok(())
    }

    /// Stop if streaming, unmap every buffer and close the device.
    ///
    /// Closing a closed engine does nothing.
    pub fn close(&mut self) {
        if self.state() == CaptureState::Streaming {
            if let Err(err) = self.stop() {
                log::warn!("stop during close failed: {}", err);
            }
        }
        if let Some(session) = self.session.take() {
            log::info!("closing {}", session.path.display());
        }
    }

    /// Negotiated format, as stored at open or at the last set call.
    pub fn format(&self) -> Option<FrameFormat> {
        self.session.as_ref().map(|s| s.format)
    }

    /// Device path while open.
    pub fn path(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.path.as_path())
    }

    /// Number of mapped buffers, zero when closed.
    pub fn buffer_count(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.pool.len())
    }

    /// Query the device for its current format and frame rate.
    pub fn actual_format(&mut self) -> Result<FrameFormat, Error> {
        let session = self.open_session("query the format")?;
        let pix = session.device.format().map_err(|source| Error::DeviceQuery {
            request: "VIDIOC_G_FMT",
            source,
        })?;
        let fps = query_fps(&mut session.device)?;
        session.format = FrameFormat::new(pix.fourcc, pix.width, pix.height, fps);
        Ok(session.format)
    }

    /// Apply a new format and frame rate; returns what the driver chose.
    pub fn set_format(&mut self, requested: FrameFormat) -> Result<FrameFormat, Error> {
        check_positive(&requested)?;
        let session = self.open_session("set the format")?;
        session.format = negotiate(&mut session.device, requested)?;
        Ok(session.format)
    }

    pub fn frame_rate(&mut self) -> Result<u32, Error> {
        let session = self.open_session("query the frame rate")?;
        let fps = query_fps(&mut session.device)?;
        session.format.fps = fps;
        Ok(fps)
    }

    /// Apply a frame rate; returns the rate the driver chose.
    pub fn set_frame_rate(&mut self, fps: u32) -> Result<u32, Error> {
        if fps == 0 {
            return Err(Error::Config {
                key: "fps".to_owned(),
                reason: "frame rate must be positive".to_owned(),
            });
        }
        let session = self.open_session("set the frame rate")?;
        let fps = apply_fps(&mut session.device, fps)?;
        session.format.fps = fps;
        Ok(fps)
    }

    /// The open device, for capability enumeration.
    pub fn device_mut(&mut self) -> Result<&mut B::Device, Error> {
        Ok(&mut self.open_session("access the device")?.device)
    }

    fn open_session(&mut self, operation: &'static str) -> Result<&mut Session<B::Device>, Error> {
        self.session.as_mut().ok_or(Error::InvalidState {
            operation,
            state: CaptureState::Closed,
        })
    }
}

impl<B: Backend> Drop for Capture<B> {
    fn drop(&mut self) {
        self.close();
    }
}

fn check_positive(format: &FrameFormat) -> Result<(), Error> {
    if format.width == 0 || format.height == 0 || format.fps == 0 {
        return Err(Error::Config {
            key: "format".to_owned(),
            reason: format!("width, height and fps must be positive: {}", format),
        });
    }
    Ok(())
}

fn negotiate<D: Device>(device: &mut D, requested: FrameFormat) -> Result<FrameFormat, Error> {
    let pix = device
        .set_format(&PixFormat::new(
            requested.fourcc,
            requested.width,
            requested.height,
        ))
        .map_err(|source| Error::DeviceSet {
            request: "VIDIOC_S_FMT",
            source,
        })?;
    if pix.fourcc != requested.fourcc {
        return Err(Error::UnsupportedFormat {
            requested: requested.fourcc,
            actual: pix.fourcc,
        });
    }
    if pix.width != requested.width || pix.height != requested.height {
        log::info!(
            "driver adjusted {}x{} to {}x{}",
            requested.width,
            requested.height,
            pix.width,
            pix.height
        );
    }

    let fps = apply_fps(device, requested.fps)?;
    Ok(FrameFormat::new(pix.fourcc, pix.width, pix.height, fps))
}

/// Frame rate as the driver adjusted it; 0 when the driver reports no interval.
fn apply_fps<D: Device>(device: &mut D, fps: u32) -> Result<u32, Error> {
    let interval = device
        .set_frame_interval(Fraction::from_fps(fps))
        .map_err(|source| Error::DeviceSet {
            request: "VIDIOC_S_PARM",
            source,
        })?;
    let actual = interval.as_fps().unwrap_or(0);
    if actual != fps {
        log::info!("driver adjusted {} fps to {} fps", fps, actual);
    }
    Ok(actual)
}

fn query_fps<D: Device>(device: &mut D) -> Result<u32, Error> {
    let interval = device.frame_interval().map_err(|source| Error::DeviceQuery {
        request: "VIDIOC_G_PARM",
        source,
    })?;
    Ok(interval.as_fps().unwrap_or(0))
}

/// A checked-out frame that goes back to the driver when dropped.
///
/// Holds the engine mutably, so no other capture call can happen until the
/// frame is released.
pub struct Frame<'a, B: Backend = V4l2Backend> {
    capture: &'a mut Capture<B>,
    token: Option<FrameToken>,
}

impl<B: Backend> Frame<'_, B> {
    pub fn data(&self) -> &[u8] {
        match &self.token {
            Some(token) => self.capture.frame_data(token).unwrap_or_default(),
            None => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    pub fn sequence(&self) -> u32 {
        self.token.as_ref().map_or(0, |t| t.sequence)
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        self.token.as_ref().map(|t| t.timestamp)
    }

    /// Negotiated format of the stream this frame came from.
    pub fn format(&self) -> Option<FrameFormat> {
        self.capture.format()
    }

    /// Return the frame now and see whether the driver accepted it.
    pub fn release(mut self) -> Result<(), Error> {
        match self.token.take() {
            Some(token) => self.capture.release_frame(token),
            None => Ok(()),
        }
    }
}

impl<B: Backend> Drop for Frame<'_, B> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if let Err(err) = self.capture.release_frame(token) {
                log::warn!("release on drop failed: {}", err);
            }
        }
    }
}

impl<B: Backend> fmt::Display for Frame<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.format() {
            Some(format) => write!(f, "#{} {} {} bytes", self.sequence(), format, self.len()),
            None => write!(f, "#{} {} bytes", self.sequence(), self.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::time::Instant;

    #[test]
    fn test_camera_defaults() {
        let cam = create_camera();
        assert_eq!(cam.device(), Path::new("/dev/video0"));
        assert_eq!(
            cam.requested_format(),
            FrameFormat::new(FourCC::YUYV, 320, 240, 10)
        );

        let cam = cam
            .with_device("/dev/video3")
            .with_resolution(640, 480)
            .with_fps(30)
            .with_buffers(6);
        assert_eq!(cam.device(), Path::new("/dev/video3"));
        assert_eq!(cam.requested_format().width, 640);
        assert_eq!(cam.num_buffers, 6);
    }

    #[test]
    fn test_closed_engine_rejects_operations() {
        let mut cap = Capture::new();
        assert_eq!(cap.state(), CaptureState::Closed);
        assert!(matches!(
            cap.start(),
            Err(Error::InvalidState {
                state: CaptureState::Closed,
                ..
            })
        ));
        assert!(matches!(cap.stop(), Err(Error::InvalidState { .. })));
        assert!(matches!(cap.wait_frame(0), Err(Error::InvalidState { .. })));
        assert!(matches!(cap.actual_format(), Err(Error::InvalidState { .. })));
        cap.close();
        cap.close();
        assert_eq!(cap.state(), CaptureState::Closed);
    }

    #[ignore = "test requires a V4L2 camera at /dev/video0 (run with --include-ignored to enable)"]
    #[test]
    #[serial]
    fn test_capture() -> Result<(), Error> {
        let mut cam = create_camera().with_resolution(640, 480).open()?;
        println!("camera {:?}", cam.format());
        cam.start()?;

        for _ in 0..30 {
            let now = Instant::now();
            let Some(frame) = cam.next_frame(2000)? else {
                continue;
            };
            println!("{} [waited {:.2?}]", frame, now.elapsed());
            assert!(!frame.is_empty());
            frame.release()?;
        }

        cam.stop()?;
        cam.close();
        Ok(())
    }
}

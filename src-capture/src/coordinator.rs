//! Capture request orchestration.
//!
//! The coordinator owns the transfer buffers, the pixel channel and the
//! encode service, and drives every request through its state machine from
//! two per-frame hooks:
//!
//! - [`on_draw`](CaptureCoordinator::on_draw), at the end of the draw phase,
//!   issues asynchronous reads (and performs blocking reads for automatic
//!   captures).
//! - [`tick`](CaptureCoordinator::tick), in the update phase, maps finished
//!   reads, hands pixels to the workers, polls encode results and enforces
//!   timeouts. It is the only place a request changes state afterwards.
//!
//! Per frame the host calls `on_draw` first, then `tick`; the frame counter
//! advances at the end of `tick`. Nothing here blocks on the GPU or on a
//! worker, and every failure comes back as a [`CaptureOutcome`].

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use framecap_common::security::validate_output_path;
use framecap_common::{partial_path, Compression, EncodeJob, FrameSize, SegmentHandle};
use tracing::{debug, info, warn};

use crate::backend::ReadbackBackend;
use crate::channel::{HandOff, SharedPixelChannel};
use crate::config::{CaptureConfig, ReadbackMode};
use crate::error::CaptureError;
use crate::metrics::CaptureMetrics;
use crate::pool::{BufferCounts, TransferBufferPool};
use crate::readback::{
    FrameReadbackController, Issue, Readback, ReadbackFailure, ReadbackStage, Step,
};
use crate::workers::{EncodeService, EncodeTicket};

/// Resolved requests whose status stays queryable.
const STATUS_HISTORY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureMode {
    /// Player-triggered; uses the two-frame path and is never queued
    Manual,
    /// Screen-transition triggered; may queue and may block briefly
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Externally visible progress of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Waiting for the next draw phase
    Idle,
    ReadIssued,
    Mapped,
    /// Pixels are in the channel, job not yet submitted
    Extracted,
    Encoding,
    Saved,
    Failed,
}

/// A written screenshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFile {
    pub path: PathBuf,
    pub size: FrameSize,
    pub bytes_written: u64,
}

/// A request that resolved during a tick.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub id: RequestId,
    pub mode: CaptureMode,
    pub path: PathBuf,
    pub result: Result<CapturedFile, CaptureError>,
    pub metrics: CaptureMetrics,
}

impl CaptureOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// A job handed to the encode service.
#[derive(Debug)]
struct Submitted {
    ticket: EncodeTicket,
    size: FrameSize,
    /// Held while the worker may still read the segment
    lease: Option<SegmentHandle>,
    since: Instant,
    /// Wall-clock submit time, compared against the output's mtime
    submitted_at: SystemTime,
    /// A file already existed at the output path when the job was submitted
    replaces: bool,
    /// When the encode timeout fired and the job was cancelled
    cancelled_at: Option<Instant>,
}

#[derive(Debug)]
enum Stage {
    Idle,
    Reading(Readback),
    Extracted(HandOff),
    /// Includes timed-out jobs waiting for their worker to stop
    Encoding(Submitted),
}

#[derive(Debug)]
struct CaptureRequest {
    id: RequestId,
    mode: CaptureMode,
    path: PathBuf,
    requested_frame: u64,
    requested_at: Instant,
    stage: Stage,
    metrics: CaptureMetrics,
}

impl CaptureRequest {
    fn status(&self) -> RequestStatus {
        match &self.stage {
            Stage::Idle => RequestStatus::Idle,
            Stage::Reading(rb) => match rb.stage() {
                ReadbackStage::ReadIssued => RequestStatus::ReadIssued,
                ReadbackStage::Mapped => RequestStatus::Mapped,
                ReadbackStage::Extracted => RequestStatus::Extracted,
                ReadbackStage::Failed(_) => RequestStatus::Failed,
            },
            Stage::Extracted(_) => RequestStatus::Extracted,
            Stage::Encoding(_) => RequestStatus::Encoding,
        }
    }

    /// Whether this request may still touch the pixel channel.
    fn blocks_manual(&self) -> bool {
        match &self.stage {
            Stage::Idle | Stage::Reading(_) | Stage::Extracted(_) => true,
            Stage::Encoding(job) => job.lease.is_some(),
        }
    }

    fn waiting_for_pixels(&self) -> bool {
        matches!(self.stage, Stage::Idle | Stage::Reading(_))
    }
}

/// Orchestrates screenshot requests from request to PNG.
pub struct CaptureCoordinator<E: EncodeService> {
    enabled: bool,
    readback: FrameReadbackController,
    channel: SharedPixelChannel,
    encoder: E,
    requests: Vec<CaptureRequest>,
    /// Failures produced outside `tick`, reported by the next `tick`
    deferred: Vec<CaptureOutcome>,
    history: VecDeque<(RequestId, RequestStatus)>,
    frame: u64,
    next_id: u64,
    stage_timeout_ticks: u64,
    auto_queue_limit: usize,
    auto_readback: ReadbackMode,
    encode_timeout: Duration,
    compression: Compression,
    budget: Duration,
    pending_resize: Option<FrameSize>,
    last_metrics: Option<CaptureMetrics>,
    last_id: Option<RequestId>,
}

impl<E: EncodeService> CaptureCoordinator<E> {
    /// Allocate transfer buffers for the current surface and the pixel
    /// channel for the largest configured frame.
    pub fn new<B: ReadbackBackend + ?Sized>(
        config: &CaptureConfig,
        backend: &mut B,
        encoder: E,
    ) -> Result<Self, CaptureError> {
        config.validate().map_err(CaptureError::InvalidRequest)?;
        let pipeline = &config.pipeline;

        let surface = backend.surface_size();
        let transfer_len = backend.transfer_len(surface);
        let pool = TransferBufferPool::new(backend, pipeline.transfer_buffers, transfer_len)
            .map_err(|e| CaptureError::InvalidRequest(e.to_string()))?;

        let max = pipeline.max_frame();
        let channel = SharedPixelChannel::for_max_frame(max, backend.bytes_per_row(max.width))
            .map_err(|e| CaptureError::WorkerUnavailable(e.to_string()))?;

        info!(
            "Capture pipeline ready: {} transfer buffers for {}, channel {} bytes",
            pool.len(),
            surface,
            channel.capacity()
        );

        Ok(Self {
            enabled: config.enabled,
            readback: FrameReadbackController::new(pool, pipeline.map_retry_limit),
            channel,
            encoder,
            requests: Vec::new(),
            deferred: Vec::new(),
            history: VecDeque::new(),
            frame: 0,
            next_id: 1,
            stage_timeout_ticks: pipeline.stage_timeout_ticks,
            auto_queue_limit: pipeline.auto_queue_limit,
            auto_readback: pipeline.auto_readback,
            encode_timeout: Duration::from_millis(config.workers.encode_timeout_ms),
            compression: config.workers.compression,
            budget: Duration::from_micros(pipeline.budget_us),
            pending_resize: None,
            last_metrics: None,
            last_id: None,
        })
    }

    /// Ask for a screenshot of the next drawn frame.
    ///
    /// Manual captures are rejected while another manual capture has not yet
    /// been received by a worker, or while the pixel channel is leased.
    /// Automatic captures queue up to the configured limit.
    pub fn request_capture(
        &mut self,
        mode: CaptureMode,
        path: impl AsRef<Path>,
    ) -> Result<RequestId, CaptureError> {
        let started = Instant::now();
        let path = self.check_request(mode, path.as_ref())?;

        match mode {
            CaptureMode::Manual => {
                let manual_busy = self
                    .requests
                    .iter()
                    .any(|r| r.mode == CaptureMode::Manual && r.blocks_manual());
                if manual_busy || !self.channel.is_available() {
                    debug!("Manual capture rejected: previous capture still in progress");
                    return Err(CaptureError::CaptureInProgress);
                }
            }
            CaptureMode::Auto => {
                let queued = self
                    .requests
                    .iter()
                    .filter(|r| r.mode == CaptureMode::Auto && r.waiting_for_pixels())
                    .count();
                if queued >= self.auto_queue_limit {
                    warn!(
                        "Dropping automatic capture of {}: {} already queued",
                        path.display(),
                        queued
                    );
                    return Err(CaptureError::AutoQueueFull);
                }
            }
        }

        let id = self.push_request(mode, path, started);
        Ok(id)
    }

    /// Capture the frame currently in the framebuffer with a blocking read.
    ///
    /// For screen transitions, where the outgoing screen must be read before
    /// the next one is drawn. Needs the pixel channel to be free.
    pub fn capture_now<B: ReadbackBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        path: impl AsRef<Path>,
    ) -> Result<RequestId, CaptureError> {
        let started = Instant::now();
        let path = self.check_request(CaptureMode::Auto, path.as_ref())?;
        if !self.channel.is_available() {
            warn!(
                "Skipping immediate capture of {}: pixel channel busy",
                path.display()
            );
            return Err(CaptureError::CaptureInProgress);
        }

        let issue_started = Instant::now();
        let handoff = self
            .readback
            .read_blocking(backend, &mut self.channel)
            .map_err(CaptureError::from)?;
        let issue = issue_started.elapsed();

        let id = self.push_request(CaptureMode::Auto, path, started);
        if let Some(request) = self.requests.last_mut() {
            request.metrics.issue = issue;
            request.stage = Stage::Extracted(handoff);
        }
        Ok(id)
    }

    fn check_request(&self, mode: CaptureMode, path: &Path) -> Result<PathBuf, CaptureError> {
        if !self.enabled {
            return Err(CaptureError::Disabled);
        }
        let path = std::path::absolute(path)
            .map_err(|e| CaptureError::InvalidRequest(format!("{}: {}", path.display(), e)))?;
        validate_output_path(&path).map_err(|e| {
            if mode == CaptureMode::Auto {
                warn!("Rejecting automatic capture: {}", e);
            }
            CaptureError::InvalidRequest(e.to_string())
        })?;
        if self.requests.iter().any(|r| r.path == path) {
            return Err(CaptureError::PathInUse(path.display().to_string()));
        }
        Ok(path)
    }

    fn push_request(&mut self, mode: CaptureMode, path: PathBuf, started: Instant) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        debug!(
            "Capture {} ({:?}) requested at frame {} -> {}",
            id,
            mode,
            self.frame,
            path.display()
        );
        self.requests.push(CaptureRequest {
            id,
            mode,
            path,
            requested_frame: self.frame,
            requested_at: started,
            stage: Stage::Idle,
            metrics: CaptureMetrics {
                request: started.elapsed(),
                ..Default::default()
            },
        });
        id
    }

    /// Draw-phase hook: start reads for requests waiting on a frame.
    pub fn on_draw<B: ReadbackBackend + ?Sized>(&mut self, backend: &mut B) {
        self.sync_surface(backend);
        let frame = self.frame;

        for index in 0..self.requests.len() {
            if !matches!(self.requests[index].stage, Stage::Idle) {
                continue;
            }
            let mode = self.requests[index].mode;
            let split = mode == CaptureMode::Manual || self.auto_readback == ReadbackMode::Split;

            if split {
                let started = Instant::now();
                let issued = self.readback.issue(backend, frame);
                let elapsed = started.elapsed();
                let request = &mut self.requests[index];
                request.metrics.issue += elapsed;
                match issued {
                    Ok(Issue::Issued(rb)) => request.stage = Stage::Reading(rb),
                    Ok(Issue::NoBufferFree) if mode == CaptureMode::Auto => {
                        warn!("Dropping automatic capture {}: no transfer buffer", request.id);
                        self.fail_at(index, CaptureError::NoTransferBuffer);
                    }
                    Ok(Issue::NoBufferFree) => {
                        debug!("Capture {} deferred: no transfer buffer", request.id);
                    }
                    Err(failure) => self.fail_at(index, failure.into()),
                }
            } else if self.channel.is_available() {
                let started = Instant::now();
                let read = self.readback.read_blocking(backend, &mut self.channel);
                let request = &mut self.requests[index];
                request.metrics.issue += started.elapsed();
                match read {
                    Ok(handoff) => request.stage = Stage::Extracted(handoff),
                    Err(failure) => self.fail_at(index, failure.into()),
                }
            }
        }
        self.flush_failed();
    }

    /// Update-phase hook: advance every request by one step.
    pub fn tick<B: ReadbackBackend + ?Sized>(&mut self, backend: &mut B) -> Vec<CaptureOutcome> {
        let frame = self.frame;
        let mut outcomes = std::mem::take(&mut self.deferred);

        let mut index = 0;
        while index < self.requests.len() {
            match self.step(backend, index, frame) {
                Some(outcome) => {
                    self.requests.remove(index);
                    self.record(&outcome);
                    outcomes.push(outcome);
                }
                None => index += 1,
            }
        }

        if let Some(size) = self.pending_resize {
            self.try_resize(backend, size);
        }
        self.frame += 1;
        outcomes
    }

    fn step<B: ReadbackBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        index: usize,
        frame: u64,
    ) -> Option<CaptureOutcome> {
        let timeout = self.stage_timeout_ticks;
        let id = self.requests[index].id;
        let mode = self.requests[index].mode;
        let requested_frame = self.requests[index].requested_frame;
        let path = self.requests[index].path.clone();

        match &mut self.requests[index].stage {
            Stage::Idle => {
                if frame.saturating_sub(requested_frame) >= timeout {
                    let error = match mode {
                        CaptureMode::Manual => CaptureError::NoTransferBuffer,
                        CaptureMode::Auto => CaptureError::HandOffTimedOut,
                    };
                    warn!("Capture {} never started: {}", id, error);
                    return Some(self.outcome(index, Err(error)));
                }
                None
            }
            Stage::Reading(rb) => {
                let expired = frame.saturating_sub(rb.issued_frame()) >= timeout;
                match self.readback.advance(backend, rb, frame, &mut self.channel) {
                    Step::Waiting | Step::AwaitingChannel if expired => {
                        let failure = match rb.stage() {
                            ReadbackStage::Mapped => ReadbackFailure::HandOffTimedOut,
                            _ => ReadbackFailure::NotReady {
                                attempts: rb.map_attempts(),
                            },
                        };
                        self.readback.abandon(rb, failure.clone());
                        warn!("Capture {} timed out: {}", id, failure);
                        Some(self.outcome(index, Err(failure.into())))
                    }
                    Step::Waiting | Step::AwaitingChannel => None,
                    Step::Extracted(handoff) => {
                        let (map, copy) = (rb.map_time, rb.copy_time);
                        debug!(
                            "Capture {} read at frame {}, mapped at frame {:?}",
                            id,
                            rb.issued_frame(),
                            rb.mapped_frame()
                        );
                        let request = &mut self.requests[index];
                        request.metrics.map = map;
                        request.metrics.handoff = copy;
                        request.stage = Stage::Extracted(handoff);
                        self.submit(index, frame)
                    }
                    Step::Failed(failure) => {
                        warn!("Capture {} failed: {}", id, failure);
                        Some(self.outcome(index, Err(failure.into())))
                    }
                }
            }
            Stage::Extracted(_) => self.submit(index, frame),
            Stage::Encoding(job) => {
                if job.lease.is_some() && job.ticket.poll_receipt() {
                    if let Some(handle) = job.lease.take() {
                        release_lease(&mut self.channel, &handle);
                    }
                }
                let size = job.size;
                if let Some(result) = job.ticket.try_get_result() {
                    if let Some(handle) = job.lease.take() {
                        release_lease(&mut self.channel, &handle);
                    }
                    if job.cancelled_at.is_some() {
                        // The worker is gone; whatever it wrote is not a result
                        discard_output(&path, job.submitted_at, job.replaces);
                        debug!("Cancelled encode of capture {} resolved: {:?}", id, result);
                        return Some(self.outcome(index, Err(CaptureError::EncodeTimedOut)));
                    }
                    return Some(match result {
                        Ok(report) => {
                            self.requests[index].metrics.encode =
                                Some(Duration::from_micros(report.encode_us));
                            info!(
                                "Saved capture {} to {} ({} bytes)",
                                id,
                                report.path.display(),
                                report.bytes_written
                            );
                            self.outcome(
                                index,
                                Ok(CapturedFile {
                                    path: report.path,
                                    size,
                                    bytes_written: report.bytes_written,
                                }),
                            )
                        }
                        Err(e) => {
                            warn!("Capture {} failed to encode: {}", id, e);
                            self.outcome(index, Err(e.into()))
                        }
                    });
                }

                match job.cancelled_at {
                    None if job.since.elapsed() > self.encode_timeout => {
                        warn!(
                            "Capture {} gave up after {:?} waiting for the encoder; cancelling",
                            id, self.encode_timeout
                        );
                        self.encoder.cancel(id.value());
                        job.cancelled_at = Some(Instant::now());
                        None
                    }
                    Some(at) if at.elapsed() > self.encode_timeout => {
                        // The service never confirmed the cancel
                        if let Some(handle) = job.lease.take() {
                            release_lease(&mut self.channel, &handle);
                        }
                        discard_output(&path, job.submitted_at, job.replaces);
                        warn!("Encode job for capture {} did not stop after cancel", id);
                        Some(self.outcome(index, Err(CaptureError::EncodeTimedOut)))
                    }
                    _ => None,
                }
            }
        }
    }

    /// Build the encode job for an extracted request and hand it to a worker.
    fn submit(&mut self, index: usize, frame: u64) -> Option<CaptureOutcome> {
        let started = Instant::now();
        let request = &mut self.requests[index];
        let Stage::Extracted(handoff) = &request.stage else {
            return None;
        };
        let handoff = handoff.clone();

        let job = EncodeJob {
            job_id: request.id.value(),
            segment: handoff.handle.clone(),
            width: handoff.size.width,
            height: handoff.size.height,
            bytes_per_row: handoff.bytes_per_row,
            row_order: handoff.row_order,
            compression: self.compression,
            output_path: request.path.clone(),
        };

        let replaces = request.path.exists();
        let submitted_at = SystemTime::now();
        match self.encoder.submit(job) {
            Ok(ticket) => {
                request.stage = Stage::Encoding(Submitted {
                    ticket,
                    size: handoff.size,
                    lease: Some(handoff.handle),
                    since: Instant::now(),
                    submitted_at,
                    replaces,
                    cancelled_at: None,
                });
                request.metrics.submit = started.elapsed();
                request.metrics.latency = request.requested_at.elapsed();
                request.metrics.frames = frame.saturating_sub(request.requested_frame);
                request.metrics.finish_main_thread();
                let metrics = request.metrics;
                if !metrics.within_budget(self.budget) {
                    warn!(
                        "Capture {} exceeded main-thread budget: {}",
                        request.id, metrics
                    );
                } else {
                    debug!("Capture {} submitted: {}", request.id, metrics);
                }
                self.last_id = Some(request.id);
                self.last_metrics = Some(metrics);
                None
            }
            Err(e) => {
                release_lease(&mut self.channel, &handoff.handle);
                warn!("Capture {} could not be submitted: {}", request.id, e);
                Some(self.outcome(index, Err(e.into())))
            }
        }
    }

    /// Resize hook: fail reads of the old surface and resize the buffers.
    pub fn on_resize<B: ReadbackBackend + ?Sized>(&mut self, backend: &mut B, size: FrameSize) {
        for index in 0..self.requests.len() {
            let request = &mut self.requests[index];
            if let Stage::Reading(rb) = &mut request.stage {
                let failure = ReadbackFailure::SurfaceResized {
                    expected: rb.size(),
                    actual: size,
                };
                self.readback.abandon(rb, failure.clone());
                info!("Capture {} cancelled by resize to {}", request.id, size);
                self.fail_at(index, failure.into());
            }
        }
        self.flush_failed();
        self.try_resize(backend, size);
    }

    fn sync_surface<B: ReadbackBackend + ?Sized>(&mut self, backend: &mut B) {
        let size = backend.surface_size();
        if backend.transfer_len(size) != self.readback.pool().byte_len() {
            self.try_resize(backend, size);
        }
    }

    fn try_resize<B: ReadbackBackend + ?Sized>(&mut self, backend: &mut B, size: FrameSize) {
        match self.readback.resize(backend, size) {
            Ok(true) => {
                if self.pending_resize.take().is_some() {
                    debug!("Transfer buffers resized to {}", size);
                }
            }
            Ok(false) => self.pending_resize = Some(size),
            Err(e) => {
                warn!("Failed to resize transfer buffers to {}: {}", size, e);
                self.pending_resize = Some(size);
            }
        }
    }

    /// Mark a request failed outside of `tick`; removed by `flush_failed`.
    fn fail_at(&mut self, index: usize, error: CaptureError) {
        let outcome = self.outcome(index, Err(error));
        self.deferred.push(outcome);
    }

    fn flush_failed(&mut self) {
        let failed: Vec<RequestId> = self.deferred.iter().map(|o| o.id).collect();
        for id in failed {
            if let Some(pos) = self.requests.iter().position(|r| r.id == id) {
                self.requests.remove(pos);
                self.push_history(id, RequestStatus::Failed);
            }
        }
    }

    fn outcome(
        &self,
        index: usize,
        result: Result<CapturedFile, CaptureError>,
    ) -> CaptureOutcome {
        let request = &self.requests[index];
        CaptureOutcome {
            id: request.id,
            mode: request.mode,
            path: request.path.clone(),
            result,
            metrics: request.metrics,
        }
    }

    fn record(&mut self, outcome: &CaptureOutcome) {
        let status = if outcome.is_success() {
            RequestStatus::Saved
        } else {
            RequestStatus::Failed
        };
        self.push_history(outcome.id, status);
        if self.last_id == Some(outcome.id) {
            if let Some(last) = self.last_metrics.as_mut() {
                last.encode = outcome.metrics.encode;
            }
        }
    }

    fn push_history(&mut self, id: RequestId, status: RequestStatus) {
        if self.history.len() == STATUS_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back((id, status));
    }

    /// Current status of a live or recently resolved request.
    pub fn status(&self, id: RequestId) -> Option<RequestStatus> {
        self.requests
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.status())
            .or_else(|| {
                self.history
                    .iter()
                    .rev()
                    .find(|(h, _)| *h == id)
                    .map(|(_, s)| *s)
            })
    }

    /// Frame counter; advanced by every `tick`.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn buffer_counts(&self) -> BufferCounts {
        self.readback.buffer_counts()
    }

    pub fn in_flight(&self) -> usize {
        self.requests.len()
    }

    pub fn channel_available(&self) -> bool {
        self.channel.is_available()
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Metrics of the most recently submitted capture.
    pub fn last_metrics(&self) -> Option<CaptureMetrics> {
        self.last_metrics
    }

    /// Main-thread time of the most recently submitted capture.
    pub fn last_capture_duration(&self) -> Option<Duration> {
        self.last_metrics.map(|m| m.main_thread)
    }

    pub fn last_capture_duration_us(&self) -> Option<u64> {
        self.last_metrics.map(|m| m.main_thread_us())
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Whether the last capture stayed within the main-thread budget.
    pub fn within_budget(&self) -> bool {
        self.last_metrics
            .map(|m| m.within_budget(self.budget))
            .unwrap_or(true)
    }

    /// Free backend resources. Outstanding requests are dropped.
    pub fn shutdown<B: ReadbackBackend + ?Sized>(&mut self, backend: &mut B) {
        for request in &mut self.requests {
            if let Stage::Reading(rb) = &mut request.stage {
                self.readback
                    .abandon(rb, ReadbackFailure::Backend("shutting down".to_string()));
            }
        }
        if !self.requests.is_empty() {
            info!("Dropping {} unfinished captures", self.requests.len());
        }
        self.requests.clear();
        self.readback.destroy(backend);
    }
}

/// Remove what a stopped encode job left at `path`.
///
/// An existing file is only removed if it was modified after the job was
/// submitted, so an older screenshot at the same path survives.
fn discard_output(path: &Path, submitted_at: SystemTime, replaces: bool) {
    let partial = partial_path(path);
    match std::fs::remove_file(&partial) {
        Ok(()) => debug!("Removed {}", partial.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", partial.display(), e),
    }

    let written = match std::fs::metadata(path) {
        Ok(meta) => !replaces || meta.modified().is_ok_and(|t| t >= submitted_at),
        Err(_) => false,
    };
    if written {
        match std::fs::remove_file(path) {
            Ok(()) => info!("Removed {} written after its capture timed out", path.display()),
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}

fn release_lease(channel: &mut SharedPixelChannel, handle: &SegmentHandle) {
    if let Err(e) = channel.release(handle) {
        warn!("Pixel channel release failed: {}", e);
    }
}

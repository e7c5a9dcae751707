//! Out-of-process PNG encoding.
//!
//! A small, fixed set of `framecap-encoder` processes is started up front and
//! reused for every capture. Each worker gets one job at a time over its
//! stdin and answers over stdout using the length-prefixed JSON protocol in
//! `framecap_common::ipc`. Pixels never travel over the pipe; jobs only name
//! the shared segment.
//!
//! The pool runs on its own small tokio runtime so the render loop never has
//! to be async. Results come back through an [`EncodeTicket`] that the
//! coordinator polls once per tick.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use framecap_common::ipc::{read_json, write_json, IpcError, Request, Response};
use framecap_common::{EncodeFailure, EncodeJob, EncodeReport};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Name of the worker binary.
#[cfg(windows)]
pub const ENCODER_BINARY: &str = "framecap-encoder.exe";
#[cfg(not(windows))]
pub const ENCODER_BINARY: &str = "framecap-encoder";

/// How long dropping the pool waits for workers to exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Error type for pool management.
#[derive(Debug, Clone)]
pub enum WorkerPoolError {
    /// The encoder binary could not be located
    EncoderNotFound(String),
    /// A worker process failed to start
    Spawn(String),
    /// The pool's runtime could not be created
    Runtime(String),
    /// The pool has shut down
    Closed,
}

impl std::fmt::Display for WorkerPoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerPoolError::EncoderNotFound(msg) => write!(f, "Encoder not found: {}", msg),
            WorkerPoolError::Spawn(msg) => write!(f, "Failed to start encode worker: {}", msg),
            WorkerPoolError::Runtime(msg) => write!(f, "Failed to start worker runtime: {}", msg),
            WorkerPoolError::Closed => write!(f, "Encode worker pool is closed"),
        }
    }
}

impl std::error::Error for WorkerPoolError {}

/// Why an accepted job produced no file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The worker reported a failure
    Worker(EncodeFailure),
    /// The worker process died with the job in flight
    WorkerCrashed,
    /// No worker could be started for the job
    Unavailable(String),
    /// The pool shut down before the job finished
    PoolClosed,
    /// The job was cancelled; its worker is gone and wrote nothing further
    Cancelled,
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodeError::Worker(e) => write!(f, "{}", e),
            EncodeError::WorkerCrashed => write!(f, "Encode worker exited during the job"),
            EncodeError::Unavailable(msg) => write!(f, "No encode worker available: {}", msg),
            EncodeError::PoolClosed => write!(f, "Encode worker pool closed"),
            EncodeError::Cancelled => write!(f, "Encode job cancelled"),
        }
    }
}

impl std::error::Error for EncodeError {}

pub type EncodeResult = Result<EncodeReport, EncodeError>;

/// Handle to one submitted job, polled without blocking.
#[derive(Debug)]
pub struct EncodeTicket {
    job_id: u64,
    receipt: Option<oneshot::Receiver<()>>,
    received: bool,
    result: Option<oneshot::Receiver<EncodeResult>>,
}

/// Completion side of an [`EncodeTicket`].
#[derive(Debug)]
pub struct TicketSender {
    job_id: u64,
    receipt: Option<oneshot::Sender<()>>,
    result: oneshot::Sender<EncodeResult>,
}

impl EncodeTicket {
    /// Create a linked ticket and sender for `job_id`.
    pub fn pair(job_id: u64) -> (Self, TicketSender) {
        let (receipt_tx, receipt_rx) = oneshot::channel();
        let (result_tx, result_rx) = oneshot::channel();
        (
            Self {
                job_id,
                receipt: Some(receipt_rx),
                received: false,
                result: Some(result_rx),
            },
            TicketSender {
                job_id,
                receipt: Some(receipt_tx),
                result: result_tx,
            },
        )
    }

    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    /// Whether the worker has copied the pixels out of the shared segment.
    ///
    /// Stays `false` for jobs that fail before reading the segment; those are
    /// only seen through [`try_get_result`](Self::try_get_result).
    pub fn poll_receipt(&mut self) -> bool {
        if self.received {
            return true;
        }
        if let Some(rx) = self.receipt.as_mut() {
            match rx.try_recv() {
                Ok(()) => {
                    self.received = true;
                    self.receipt = None;
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
                Err(oneshot::error::TryRecvError::Closed) => self.receipt = None,
            }
        }
        self.received
    }

    /// The job's result, once. Returns `None` while encoding and after the
    /// result has been taken.
    pub fn try_get_result(&mut self) -> Option<EncodeResult> {
        let rx = self.result.as_mut()?;
        let result = match rx.try_recv() {
            Ok(result) => result,
            Err(oneshot::error::TryRecvError::Empty) => return None,
            Err(oneshot::error::TryRecvError::Closed) => Err(EncodeError::PoolClosed),
        };
        self.result = None;
        Some(result)
    }
}

impl TicketSender {
    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    /// Signal that the segment may be reused.
    pub fn confirm_receipt(&mut self) {
        if let Some(tx) = self.receipt.take() {
            let _ = tx.send(());
        }
    }

    pub fn complete(self, result: EncodeResult) {
        // The coordinator may have given up on the job already
        let _ = self.result.send(result);
    }
}

/// Anything that can take encode jobs.
pub trait EncodeService {
    fn submit(&self, job: EncodeJob) -> Result<EncodeTicket, WorkerPoolError>;

    /// Stop work on `job_id`.
    ///
    /// The job's ticket still resolves, either with the result the worker
    /// produced before it was stopped or with [`EncodeError::Cancelled`].
    /// Once it has, the worker can no longer touch the output path.
    fn cancel(&self, job_id: u64);
}

/// How to launch a worker.
#[derive(Debug, Clone)]
pub struct EncoderCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl EncoderCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Locate the encoder binary.
    ///
    /// An explicit path wins. Otherwise look next to the current executable
    /// (and one level up, for test binaries under `deps/`), then in PATH.
    pub fn discover(explicit: Option<&str>) -> Result<Self, WorkerPoolError> {
        if let Some(path) = explicit {
            let path = PathBuf::from(path);
            if path.is_file() {
                return Ok(Self::new(path));
            }
            return Err(WorkerPoolError::EncoderNotFound(format!(
                "{} does not exist",
                path.display()
            )));
        }

        if let Ok(exe) = std::env::current_exe() {
            let candidates = exe
                .parent()
                .into_iter()
                .flat_map(|dir| [Some(dir), dir.parent()])
                .flatten()
                .map(|dir| dir.join(ENCODER_BINARY));
            for candidate in candidates {
                if candidate.is_file() {
                    return Ok(Self::new(candidate));
                }
            }
        }

        which::which(ENCODER_BINARY)
            .map(Self::new)
            .map_err(|e| WorkerPoolError::EncoderNotFound(format!("{}: {}", ENCODER_BINARY, e)))
    }
}

enum PoolCommand {
    Submit { job: EncodeJob, ticket: TicketSender },
    Cancel { job_id: u64 },
    Shutdown(std::sync::mpsc::Sender<()>),
}

/// Fixed-size pool of encoder processes.
pub struct EncodeWorkerPool {
    runtime: Option<tokio::runtime::Runtime>,
    commands: mpsc::UnboundedSender<PoolCommand>,
    workers: usize,
}

impl EncodeWorkerPool {
    /// Start `workers` encoder processes.
    ///
    /// Fails if the first worker cannot be spawned; later spawn failures are
    /// logged and retried when work arrives.
    pub fn start(command: EncoderCommand, workers: usize) -> Result<Self, WorkerPoolError> {
        let workers = workers.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("framecap-encode")
            .enable_all()
            .build()
            .map_err(|e| WorkerPoolError::Runtime(e.to_string()))?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut dispatcher = Dispatcher::new(command, workers, events_tx);

        {
            let _guard = runtime.enter();
            for slot in 0..workers {
                if let Err(e) = dispatcher.spawn_worker(slot) {
                    if slot == 0 {
                        return Err(e);
                    }
                    warn!("Worker {} failed to start: {}", slot, e);
                }
            }
        }
        runtime.spawn(dispatcher.run(commands_rx, events_rx));

        info!("Encode worker pool started with {} workers", workers);
        Ok(Self {
            runtime: Some(runtime),
            commands: commands_tx,
            workers,
        })
    }

    /// Locate the encoder and start the pool.
    pub fn discover(explicit: Option<&str>, workers: usize) -> Result<Self, WorkerPoolError> {
        Self::start(EncoderCommand::discover(explicit)?, workers)
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }
}

impl EncodeService for EncodeWorkerPool {
    fn submit(&self, job: EncodeJob) -> Result<EncodeTicket, WorkerPoolError> {
        let (ticket, sender) = EncodeTicket::pair(job.job_id);
        self.commands
            .send(PoolCommand::Submit {
                job,
                ticket: sender,
            })
            .map_err(|_| WorkerPoolError::Closed)?;
        Ok(ticket)
    }

    fn cancel(&self, job_id: u64) {
        if self.commands.send(PoolCommand::Cancel { job_id }).is_err() {
            debug!("Cancel of job {} after pool shutdown", job_id);
        }
    }
}

impl Drop for EncodeWorkerPool {
    fn drop(&mut self) {
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        if self.commands.send(PoolCommand::Shutdown(done_tx)).is_ok()
            && done_rx.recv_timeout(SHUTDOWN_GRACE).is_err()
        {
            warn!("Encode workers did not shut down in time");
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Identifies one incarnation of a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WorkerKey {
    slot: usize,
    generation: u64,
}

enum WorkerEvent {
    Response { worker: WorkerKey, response: Response },
    Exited { worker: WorkerKey, reason: String },
}

struct LiveWorker {
    generation: u64,
    pid: Option<u32>,
    requests: mpsc::UnboundedSender<Request>,
    /// Kills the process when fired or dropped
    kill: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct WorkerSlot {
    live: Option<LiveWorker>,
    in_flight: Option<TicketSender>,
    generations: u64,
    /// The live worker is being killed; no new work until it has exited
    cancelling: bool,
}

struct Dispatcher {
    command: EncoderCommand,
    slots: Vec<WorkerSlot>,
    queue: VecDeque<(EncodeJob, TicketSender)>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl Dispatcher {
    fn new(
        command: EncoderCommand,
        workers: usize,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        Self {
            command,
            slots: (0..workers).map(|_| WorkerSlot::default()).collect(),
            queue: VecDeque::new(),
            events,
        }
    }

    /// Start a process for `slot`. Must run inside the pool runtime.
    fn spawn_worker(&mut self, slot: usize) -> Result<(), WorkerPoolError> {
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                WorkerPoolError::Spawn(format!("{}: {}", self.command.program.display(), e))
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.start_kill();
            return Err(WorkerPoolError::Spawn("worker pipes unavailable".to_string()));
        };

        let state = &mut self.slots[slot];
        state.generations += 1;
        let key = WorkerKey {
            slot,
            generation: state.generations,
        };
        let pid = child.id();
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(write_requests(key, stdin, requests_rx));
        tokio::spawn(supervise(key, child, stdout, kill_rx, self.events.clone()));

        state.cancelling = false;
        state.live = Some(LiveWorker {
            generation: key.generation,
            pid,
            requests: requests_tx,
            kill: Some(kill_tx),
        });
        debug!("Spawned encode worker {} (pid {:?})", slot, pid);
        Ok(())
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<PoolCommand>,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(PoolCommand::Submit { job, ticket }) => {
                        self.queue.push_back((job, ticket));
                        self.dispatch();
                    }
                    Some(PoolCommand::Cancel { job_id }) => self.cancel(job_id),
                    Some(PoolCommand::Shutdown(done)) => {
                        self.shutdown(&mut events).await;
                        let _ = done.send(());
                        return;
                    }
                    None => {
                        self.shutdown(&mut events).await;
                        return;
                    }
                },
                Some(event) = events.recv() => {
                    self.handle_event(event);
                    self.dispatch();
                }
            }
        }
    }

    /// Hand queued jobs to idle workers, respawning dead ones on demand.
    fn dispatch(&mut self) {
        for slot in 0..self.slots.len() {
            if self.queue.is_empty() {
                return;
            }
            if self.slots[slot].in_flight.is_some() || self.slots[slot].cancelling {
                continue;
            }
            if self.slots[slot].live.is_none() {
                if let Err(e) = self.spawn_worker(slot) {
                    warn!("Could not respawn encode worker {}: {}", slot, e);
                    continue;
                }
            }
            let Some((job, ticket)) = self.queue.pop_front() else {
                return;
            };
            let job_id = job.job_id;
            let sent = self.slots[slot]
                .live
                .as_ref()
                .map(|w| w.requests.send(Request::Encode { job }).is_ok())
                .unwrap_or(false);
            if sent {
                debug!("Job {} dispatched to worker {}", job_id, slot);
                self.slots[slot].in_flight = Some(ticket);
            } else {
                warn!("Encode worker {} is gone; job {} failed", slot, job_id);
                self.slots[slot].live = None;
                ticket.complete(Err(EncodeError::WorkerCrashed));
            }
        }

        // Nothing could be started at all; fail rather than queue forever
        if !self.queue.is_empty() && self.slots.iter().all(|s| s.live.is_none()) {
            for (job, ticket) in self.queue.drain(..) {
                error!("No encode worker available for job {}", job.job_id);
                ticket.complete(Err(EncodeError::Unavailable(
                    "all workers failed to start".to_string(),
                )));
            }
        }
    }

    /// Drop a queued job, or kill the worker running it.
    ///
    /// A running job's ticket resolves when the worker's exit is observed,
    /// so the caller never sees `Cancelled` while the process can still write.
    fn cancel(&mut self, job_id: u64) {
        if let Some(pos) = self.queue.iter().position(|(job, _)| job.job_id == job_id) {
            if let Some((_, ticket)) = self.queue.remove(pos) {
                debug!("Job {} cancelled before dispatch", job_id);
                ticket.complete(Err(EncodeError::Cancelled));
            }
            return;
        }

        let running = self.slots.iter_mut().enumerate().find(|(_, s)| {
            s.in_flight
                .as_ref()
                .is_some_and(|ticket| ticket.job_id() == job_id)
        });
        match running {
            Some((index, slot)) => {
                let pid = slot.live.as_ref().and_then(|w| w.pid);
                info!(
                    "Killing encode worker {} (pid {:?}) to cancel job {}",
                    index, pid, job_id
                );
                slot.cancelling = true;
                if let Some(kill) = slot.live.as_mut().and_then(|w| w.kill.take()) {
                    let _ = kill.send(());
                }
            }
            None => debug!("Cancel for job {} which already finished", job_id),
        }
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Response { worker, response } => {
                if !self.is_current(worker) {
                    return;
                }
                let slot = &mut self.slots[worker.slot];
                match response {
                    Response::Ready { pid } => {
                        debug!("Encode worker {} ready (pid {})", worker.slot, pid);
                    }
                    Response::Received { job_id } => match slot.in_flight.as_mut() {
                        Some(ticket) if ticket.job_id() == job_id => ticket.confirm_receipt(),
                        _ => warn!("Receipt for unknown job {}", job_id),
                    },
                    Response::Encoded(report) => {
                        match take_in_flight(slot, report.job_id) {
                            Some(ticket) => ticket.complete(Ok(report)),
                            None => warn!("Result for unknown job {}", report.job_id),
                        }
                    }
                    Response::Failed { job_id, error } => match take_in_flight(slot, job_id) {
                        Some(ticket) => ticket.complete(Err(EncodeError::Worker(error))),
                        None => warn!("Failure for unknown job {}", job_id),
                    },
                    Response::Pong => {}
                    Response::Error { message } => {
                        warn!("Encode worker {} rejected a request: {}", worker.slot, message);
                        if let Some(ticket) = slot.in_flight.take() {
                            ticket.complete(Err(EncodeError::Worker(EncodeFailure::Encode(
                                message,
                            ))));
                        }
                    }
                }
            }
            WorkerEvent::Exited { worker, reason } => {
                if !self.is_current(worker) {
                    return;
                }
                let slot = &mut self.slots[worker.slot];
                let pid = slot.live.take().and_then(|w| w.pid);
                let cancelled = std::mem::take(&mut slot.cancelling);
                match slot.in_flight.take() {
                    Some(ticket) if cancelled => {
                        debug!(
                            "Encode worker {} (pid {:?}) stopped; job {} cancelled",
                            worker.slot,
                            pid,
                            ticket.job_id()
                        );
                        ticket.complete(Err(EncodeError::Cancelled));
                    }
                    Some(ticket) => {
                        warn!(
                            "Encode worker {} (pid {:?}) exited with job {} in flight: {}",
                            worker.slot,
                            pid,
                            ticket.job_id(),
                            reason
                        );
                        ticket.complete(Err(EncodeError::WorkerCrashed));
                    }
                    None => info!(
                        "Encode worker {} (pid {:?}) exited: {}",
                        worker.slot, pid, reason
                    ),
                }
            }
        }
    }

    fn is_current(&self, worker: WorkerKey) -> bool {
        self.slots
            .get(worker.slot)
            .and_then(|s| s.live.as_ref())
            .is_some_and(|w| w.generation == worker.generation)
    }

    async fn shutdown(&mut self, events: &mut mpsc::UnboundedReceiver<WorkerEvent>) {
        for (_, ticket) in self.queue.drain(..) {
            ticket.complete(Err(EncodeError::PoolClosed));
        }

        let mut running = 0usize;
        for slot in &mut self.slots {
            if let Some(ticket) = slot.in_flight.take() {
                ticket.complete(Err(EncodeError::PoolClosed));
            }
            if let Some(worker) = slot.live.as_ref() {
                let _ = worker.requests.send(Request::Shutdown);
                running += 1;
            }
        }

        let wait = async {
            while running > 0 {
                match events.recv().await {
                    Some(WorkerEvent::Exited { worker, .. }) if self.is_current(worker) => {
                        self.slots[worker.slot].live = None;
                        running -= 1;
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE / 2, wait).await.is_err() {
            warn!("Timed out waiting for encode workers to exit");
        }
        // Dropping a live worker kills its process
        for slot in &mut self.slots {
            slot.live = None;
        }
        info!("Encode worker pool stopped");
    }
}

fn take_in_flight(slot: &mut WorkerSlot, job_id: u64) -> Option<TicketSender> {
    match slot.in_flight.as_ref() {
        Some(ticket) if ticket.job_id() == job_id => slot.in_flight.take(),
        _ => None,
    }
}

async fn write_requests(
    worker: WorkerKey,
    mut stdin: ChildStdin,
    mut requests: mpsc::UnboundedReceiver<Request>,
) {
    while let Some(request) = requests.recv().await {
        if let Err(e) = write_json(&mut stdin, &request).await {
            debug!("Worker {} stdin closed: {}", worker.slot, e);
            break;
        }
    }
    // Dropping stdin signals end of input to the worker
}

/// Forward responses until the worker's stdout ends; returns why it ended.
async fn read_responses(
    worker: WorkerKey,
    mut stdout: ChildStdout,
    events: mpsc::UnboundedSender<WorkerEvent>,
) -> String {
    loop {
        match read_json::<_, Response>(&mut stdout).await {
            Ok(response) => {
                if events
                    .send(WorkerEvent::Response { worker, response })
                    .is_err()
                {
                    return "pool closed".to_string();
                }
            }
            Err(IpcError::ConnectionClosed) => return "output closed".to_string(),
            Err(e) => return e.to_string(),
        }
    }
}

/// Own the worker process: kill it on request and report its exit after the
/// last response it wrote has been forwarded.
async fn supervise(
    worker: WorkerKey,
    mut child: Child,
    stdout: ChildStdout,
    kill: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let mut reader = tokio::spawn(read_responses(worker, stdout, events.clone()));
    let ended = tokio::select! {
        read = &mut reader => Some(read),
        _ = kill => None,
    };
    let reason = match ended {
        Some(read) => read.unwrap_or_else(|e| e.to_string()),
        None => {
            let _ = child.start_kill();
            // Replies written before the kill are still in the pipe
            let drained = reader.await.unwrap_or_else(|e| e.to_string());
            format!("killed, {}", drained)
        }
    };

    // A worker that broke the protocol is not trusted to exit on its own
    let _ = child.start_kill();
    let status = match child.wait().await {
        Ok(status) => status.to_string(),
        Err(e) => e.to_string(),
    };
    let _ = events.send(WorkerEvent::Exited {
        worker,
        reason: format!("{}, {}", reason, status),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn report(job_id: u64) -> EncodeReport {
        EncodeReport {
            job_id,
            path: PathBuf::from("/tmp/x.png"),
            bytes_written: 10,
            encode_us: 5,
        }
    }

    #[test]
    fn test_ticket_receipt_then_result() {
        let (mut ticket, mut sender) = EncodeTicket::pair(4);
        assert_eq!(ticket.job_id(), 4);
        assert!(!ticket.poll_receipt());
        assert!(ticket.try_get_result().is_none());

        sender.confirm_receipt();
        assert!(ticket.poll_receipt());
        // Receipt is sticky
        assert!(ticket.poll_receipt());

        sender.complete(Ok(report(4)));
        assert_eq!(ticket.try_get_result(), Some(Ok(report(4))));
        assert!(ticket.try_get_result().is_none());
    }

    #[test]
    fn test_ticket_failure_without_receipt() {
        let (mut ticket, sender) = EncodeTicket::pair(1);
        sender.complete(Err(EncodeError::WorkerCrashed));
        assert!(!ticket.poll_receipt());
        assert_eq!(ticket.try_get_result(), Some(Err(EncodeError::WorkerCrashed)));
    }

    #[test]
    fn test_dropped_sender_means_pool_closed() {
        let (mut ticket, sender) = EncodeTicket::pair(2);
        drop(sender);
        assert_eq!(ticket.try_get_result(), Some(Err(EncodeError::PoolClosed)));
    }

    #[test]
    fn test_discover_rejects_missing_explicit_path() {
        let result = EncoderCommand::discover(Some("/nonexistent/framecap-encoder"));
        assert!(matches!(result, Err(WorkerPoolError::EncoderNotFound(_))));
    }

    #[test]
    fn test_start_fails_for_missing_program() {
        let command = EncoderCommand::new("/nonexistent/framecap-encoder");
        assert!(matches!(
            EncodeWorkerPool::start(command, 1),
            Err(WorkerPoolError::Spawn(_))
        ));
    }

    #[cfg(unix)]
    fn job(job_id: u64) -> EncodeJob {
        use framecap_common::{Compression, RowOrder, SegmentHandle};

        EncodeJob {
            job_id,
            segment: SegmentHandle {
                name: "/framecap-none".to_string(),
                sequence: 1,
                len: 4,
            },
            width: 1,
            height: 1,
            bytes_per_row: 4,
            row_order: RowOrder::TopDown,
            compression: Compression::Fast,
            output_path: PathBuf::from("/tmp/never.png"),
        }
    }

    /// Pool whose workers run `script` under `sh`.
    #[cfg(unix)]
    fn shell_pool(script: &str, workers: usize) -> Option<EncodeWorkerPool> {
        let shell = which::which("sh").ok()?;
        let command = EncoderCommand::new(shell).arg("-c").arg(script);
        Some(EncodeWorkerPool::start(command, workers).unwrap())
    }

    #[cfg(unix)]
    fn wait_for(ticket: &mut EncodeTicket) -> EncodeResult {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(result) = ticket.try_get_result() {
                return result;
            }
            assert!(std::time::Instant::now() < deadline, "job never resolved");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_crashing_worker_fails_job() {
        // Exits immediately without answering
        let Some(pool) = shell_pool("exit 3", 1) else {
            return;
        };
        let mut ticket = pool.submit(job(11)).unwrap();
        assert!(matches!(
            wait_for(&mut ticket),
            Err(EncodeError::WorkerCrashed) | Err(EncodeError::Unavailable(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_cancel_kills_busy_worker() {
        // Takes the job and never answers
        let Some(pool) = shell_pool("exec sleep 30", 1) else {
            return;
        };
        let mut ticket = pool.submit(job(21)).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(ticket.try_get_result().is_none());

        pool.cancel(21);
        assert_eq!(wait_for(&mut ticket), Err(EncodeError::Cancelled));
    }

    #[cfg(unix)]
    #[test]
    fn test_cancel_drops_queued_job() {
        let Some(pool) = shell_pool("exec sleep 30", 1) else {
            return;
        };
        let mut running = pool.submit(job(31)).unwrap();
        let mut queued = pool.submit(job(32)).unwrap();

        pool.cancel(32);
        assert_eq!(wait_for(&mut queued), Err(EncodeError::Cancelled));
        assert!(running.try_get_result().is_none());

        pool.cancel(31);
        assert_eq!(wait_for(&mut running), Err(EncodeError::Cancelled));
    }
}

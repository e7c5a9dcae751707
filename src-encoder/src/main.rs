//! framecap encode worker
//!
//! Spawned by the capture pipeline. Reads jobs from stdin, copies each frame
//! out of the shared segment named in the job, acknowledges the copy so the
//! pipeline can reuse the segment, then writes the PNG and reports the result
//! on stdout. Logs go to stderr.

mod encode;

use framecap_common::ipc::{read_json, write_json, IpcError, Request, Response};
use framecap_common::shm::SharedSegment;
use framecap_common::{EncodeFailure, EncodeJob};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() {
    // stdout carries the protocol
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("framecap-encoder starting (pid: {})", std::process::id());

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create Tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(serve(tokio::io::stdin(), tokio::io::stdout())) {
        error!("Worker protocol error: {}", e);
        std::process::exit(1);
    }

    info!("framecap-encoder stopped");
}

/// Answer requests until the pipeline closes stdin or asks us to stop.
async fn serve<R, W>(mut reader: R, mut writer: W) -> Result<(), IpcError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_json(
        &mut writer,
        &Response::Ready {
            pid: std::process::id(),
        },
    )
    .await?;

    loop {
        let request: Request = match read_json(&mut reader).await {
            Ok(req) => req,
            Err(IpcError::ConnectionClosed) => {
                info!("Pipeline closed the job stream");
                return Ok(());
            }
            Err(IpcError::ParseError(e)) => {
                warn!("Unparsable request: {}", e);
                let response = Response::Error {
                    message: format!("Invalid request: {}", e),
                };
                write_json(&mut writer, &response).await?;
                continue;
            }
            Err(e) => return Err(e),
        };

        let rejected = request.validate().err();
        match request {
            Request::Ping => write_json(&mut writer, &Response::Pong).await?,
            Request::Shutdown => {
                info!("Shutdown requested");
                return Ok(());
            }
            Request::Encode { job } => {
                if let Some(e) = rejected {
                    warn!("Rejected job {}: {}", job.job_id, e);
                    let response = Response::Failed {
                        job_id: job.job_id,
                        error: e.into(),
                    };
                    write_json(&mut writer, &response).await?;
                    continue;
                }
                handle_encode(&mut writer, job).await?;
            }
        }
    }
}

/// Copy the job's pixels out of shared memory.
fn receive(job: &EncodeJob) -> Result<Vec<u8>, EncodeFailure> {
    let segment = SharedSegment::open(&job.segment.name)
        .map_err(|e| EncodeFailure::Segment(e.to_string()))?;
    segment
        .copy_out(&job.segment)
        .map_err(|e| EncodeFailure::Segment(e.to_string()))
}

async fn handle_encode<W>(writer: &mut W, job: EncodeJob) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
{
    let job_id = job.job_id;

    let pixels = match receive(&job) {
        Ok(pixels) => pixels,
        Err(error) => {
            warn!("Job {}: {}", job_id, error);
            return write_json(writer, &Response::Failed { job_id, error }).await;
        }
    };
    // The segment is free for the next capture from here on
    write_json(writer, &Response::Received { job_id }).await?;
    debug!(
        "Job {}: received {}x{} ({} bytes)",
        job_id,
        job.width,
        job.height,
        pixels.len()
    );

    let result = tokio::task::spawn_blocking(move || encode::encode_job(&job, &pixels))
        .await
        .unwrap_or_else(|e| Err(EncodeFailure::Encode(format!("Encoder task failed: {}", e))));

    let response = match result {
        Ok(report) => {
            info!(
                "Job {}: wrote {} ({} bytes, {} us)",
                job_id,
                report.path.display(),
                report.bytes_written,
                report.encode_us
            );
            Response::Encoded(report)
        }
        Err(error) => {
            warn!("Job {} failed: {}", job_id, error);
            Response::Failed { job_id, error }
        }
    };
    write_json(writer, &response).await
}

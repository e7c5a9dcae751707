//! CLI command implementations.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use framecap_common::{FrameSize, RowOrder};
use framecap_lib::config::{config_path as config_file_path, screenshot_dir};
use framecap_lib::{
    load_config, save_config, CaptureConfig, CaptureCoordinator, CaptureError, CaptureOutcome,
    EncodeWorkerPool, ReadbackMode, ScreenCaptures, SoftwareBackend,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::colors;
use crate::exit_codes::ExitCode;
use crate::DemoArgs;

/// Screens the demo cycles through.
const SCREENS: [&str; 5] = ["title", "menu", "level-1", "level-2", "credits"];

/// Extra time allowed for the last encodes after the final frame.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// One line of the demo report.
#[derive(Debug, Serialize)]
struct CaptureSummary {
    id: u64,
    mode: &'static str,
    path: String,
    saved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes: Option<u64>,
    main_thread_us: u64,
    latency_us: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    encode_us: Option<u64>,
    frames: u64,
}

impl From<&CaptureOutcome> for CaptureSummary {
    fn from(outcome: &CaptureOutcome) -> Self {
        let (bytes, error) = match &outcome.result {
            Ok(file) => (Some(file.bytes_written), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            id: outcome.id.value(),
            mode: match outcome.mode {
                framecap_lib::CaptureMode::Manual => "manual",
                framecap_lib::CaptureMode::Auto => "auto",
            },
            path: outcome.path.display().to_string(),
            saved: outcome.is_success(),
            error,
            bytes,
            main_thread_us: outcome.metrics.main_thread_us(),
            latency_us: outcome.metrics.latency.as_micros() as u64,
            encode_us: outcome.metrics.encode.map(|d| d.as_micros() as u64),
            frames: outcome.metrics.frames,
        }
    }
}

/// Requests that never produced an outcome.
#[derive(Debug, Serialize)]
struct Rejection {
    frame: u64,
    trigger: &'static str,
    reason: String,
}

#[derive(Debug, Serialize)]
struct DemoReport {
    frames: u64,
    elapsed_ms: u64,
    budget_us: u64,
    captures: Vec<CaptureSummary>,
    rejected: Vec<Rejection>,
    unfinished: usize,
}

/// Apply command-line overrides on top of the loaded config.
fn demo_config(args: &DemoArgs) -> CaptureConfig {
    let mut config = load_config();
    if let Some(workers) = args.workers {
        config.workers.count = workers;
    }
    if let Some(encoder) = &args.encoder {
        config.workers.encoder_path = Some(encoder.clone());
    }
    if args.split {
        config.pipeline.auto_readback = ReadbackMode::Split;
    }

    // The channel must hold the largest surface the demo will draw
    let mut widest = args.size;
    if let Some(size) = args.resize_to {
        widest.width = widest.width.max(size.width);
        widest.height = widest.height.max(size.height);
    }
    config.pipeline.max_width = config.pipeline.max_width.max(widest.width);
    config.pipeline.max_height = config.pipeline.max_height.max(widest.height);
    config
}

/// Animated test pattern; each screen gets its own tint.
fn draw_frame(backend: &mut SoftwareBackend, screen: usize, frame: u64) {
    let shift = (frame * 4) as u32;
    let tint = (screen as u32 * 50) % 256;
    backend.draw_with(|x, y| {
        [
            ((x + shift) % 256) as u8,
            ((y + shift / 2) % 256) as u8,
            tint as u8,
            255,
        ]
    });
}

fn output_dir(args: &DemoArgs, config: &CaptureConfig) -> Result<PathBuf, String> {
    let dir = args.output.clone().unwrap_or_else(|| screenshot_dir(config));
    std::path::absolute(&dir).map_err(|e| format!("Invalid output directory {:?}: {}", dir, e))
}

/// Run a simulated game loop and capture screenshots from it.
pub fn demo(args: &DemoArgs, json: bool, quiet: bool) -> ExitCode {
    let config = demo_config(args);
    if let Err(e) = config.validate() {
        if !quiet {
            eprintln!("{}", colors::error(&format!("Invalid configuration: {}", e)));
        }
        return ExitCode::InvalidArguments;
    }

    let dir = match output_dir(args, &config) {
        Ok(dir) => dir,
        Err(e) => {
            if !quiet {
                eprintln!("{}", colors::error(&e));
            }
            return ExitCode::InvalidArguments;
        }
    };
    let mut screens = match ScreenCaptures::new(&dir) {
        Ok(screens) => screens,
        Err(e) => {
            if !quiet {
                eprintln!(
                    "{}",
                    colors::error(&format!("Cannot create {}: {}", dir.display(), e))
                );
            }
            return ExitCode::InvalidArguments;
        }
    };

    let pool =
        match EncodeWorkerPool::discover(config.workers.encoder_path.as_deref(), config.workers.count) {
            Ok(pool) => pool,
            Err(e) => {
                if !quiet {
                    eprintln!("{}", colors::error(&e.to_string()));
                    eprintln!("Build framecap-encoder or pass --encoder <path>.");
                }
                return ExitCode::EncoderUnavailable;
            }
        };

    let mut backend = SoftwareBackend::new(args.size.width, args.size.height);
    if args.bottom_up {
        backend = backend.with_row_order(RowOrder::BottomUp);
    }

    let mut coordinator = match CaptureCoordinator::new(&config, &mut backend, pool) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            if !quiet {
                eprintln!("{}", colors::error(&e.to_string()));
            }
            return ExitCode::PipelineFailed;
        }
    };

    if !quiet && !json {
        println!(
            "{} {} frames at {}x{} into {}",
            colors::header("Rendering"),
            args.frames,
            args.size.width,
            args.size.height,
            colors::path(&dir.display().to_string())
        );
    }

    let manual_frames: BTreeSet<u64> = args.capture_at.iter().copied().collect();
    let frame_time = if args.fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(1.0 / args.fps as f64)
    };

    let started = Instant::now();
    let mut outcomes = Vec::new();
    let mut rejected = Vec::new();
    let mut screen = 0usize;

    for frame in 0..args.frames {
        let frame_start = Instant::now();

        if args.resize_at == Some(frame) {
            if let Some(size) = args.resize_to {
                info!("Resizing surface to {}x{}", size.width, size.height);
                backend.resize(size.width, size.height);
                coordinator.on_resize(&mut backend, FrameSize::new(size.width, size.height));
            }
        }

        let switch = frame == 0 || (args.screen_every > 0 && frame % args.screen_every == 0);
        if switch {
            if frame > 0 {
                screen = (screen + 1) % SCREENS.len();
            }
            if let Some(Err(e)) = screens.transition(&mut coordinator, &mut backend, SCREENS[screen]) {
                rejected.push(Rejection {
                    frame,
                    trigger: "exit",
                    reason: e.to_string(),
                });
            }
        }

        draw_frame(&mut backend, screen, frame);

        if let Some(Err(e)) = screens.frame_drawn(&mut coordinator) {
            rejected.push(Rejection {
                frame,
                trigger: "enter",
                reason: e.to_string(),
            });
        }
        if manual_frames.contains(&frame) {
            match screens.manual(&mut coordinator) {
                Ok(id) => debug!("Screenshot {} requested at frame {}", id, frame),
                Err(e) => {
                    if !quiet && !json {
                        let message = match &e {
                            CaptureError::CaptureInProgress => {
                                format!("Frame {}: capture in progress", frame)
                            }
                            other => format!("Frame {}: {}", frame, other),
                        };
                        eprintln!("{}", colors::warning(&message));
                    }
                    rejected.push(Rejection {
                        frame,
                        trigger: "manual",
                        reason: e.to_string(),
                    });
                }
            }
        }

        coordinator.on_draw(&mut backend);
        outcomes.extend(coordinator.tick(&mut backend));

        if let Some(rest) = frame_time.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    // Let outstanding encodes finish; a timed-out job gets one more timeout to stop
    let deadline =
        Instant::now() + Duration::from_millis(config.workers.encode_timeout_ms) * 2 + DRAIN_GRACE;
    while coordinator.in_flight() > 0 && Instant::now() < deadline {
        coordinator.on_draw(&mut backend);
        outcomes.extend(coordinator.tick(&mut backend));
        std::thread::sleep(Duration::from_millis(2));
    }
    let unfinished = coordinator.in_flight();
    coordinator.shutdown(&mut backend);

    let report = DemoReport {
        frames: args.frames,
        elapsed_ms: started.elapsed().as_millis() as u64,
        budget_us: coordinator.budget().as_micros() as u64,
        captures: outcomes.iter().map(CaptureSummary::from).collect(),
        rejected,
        unfinished,
    };

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("{}", colors::error(&e.to_string()));
                return ExitCode::GeneralError;
            }
        }
    } else if !quiet {
        print_report(&report);
    }

    if report.unfinished > 0 || report.captures.iter().any(|c| !c.saved) {
        ExitCode::CaptureFailed
    } else {
        ExitCode::Success
    }
}

fn print_report(report: &DemoReport) {
    println!();
    if report.captures.is_empty() {
        println!("{}", colors::dim("No captures."));
    } else {
        println!(
            "{}  {}  {}  {}  {}",
            colors::pad_left("ID", 4, colors::header),
            colors::pad_left("MODE", 6, colors::header),
            colors::pad_left("STATE", 7, colors::header),
            colors::pad_left("MAIN", 8, colors::header),
            colors::header("FILE")
        );
        println!(
            "{}  {}  {}  {}  {}",
            "-".repeat(4),
            "-".repeat(6),
            "-".repeat(7),
            "-".repeat(8),
            "-".repeat(4)
        );
        for capture in &report.captures {
            let state = if capture.saved { "saved" } else { "failed" };
            let detail = match &capture.error {
                Some(error) => colors::dim(error),
                None => colors::path(&capture.path),
            };
            println!(
                "{}  {:<6}  {}  {}  {}",
                colors::pad_left(&capture.id.to_string(), 4, colors::number),
                capture.mode,
                colors::pad_left(state, 7, colors::state),
                colors::pad_left(&format!("{}us", capture.main_thread_us), 8, |s| {
                    colors::timing(s, capture.main_thread_us >= report.budget_us)
                }),
                detail
            );
        }
    }

    for rejection in &report.rejected {
        println!(
            "{}  {:<6}  {}  frame {}: {}",
            colors::pad_left("-", 4, colors::dim),
            rejection.trigger,
            colors::pad_left("rejected", 7, colors::state),
            rejection.frame,
            rejection.reason
        );
    }

    let saved = report.captures.iter().filter(|c| c.saved).count();
    println!();
    println!(
        "{} {}/{} captures saved in {} ms",
        colors::bold("Done:"),
        saved,
        report.captures.len(),
        report.elapsed_ms
    );
    if report.unfinished > 0 {
        eprintln!(
            "{}",
            colors::warning(&format!("{} captures did not finish", report.unfinished))
        );
    }
}

/// Print the effective configuration.
pub fn config_show(json: bool) -> ExitCode {
    let config = load_config();
    match serde_json::to_string_pretty(&config) {
        Ok(text) => {
            if !json {
                if let Ok(path) = config_file_path() {
                    println!("{}", colors::dim(&format!("# {}", path.display())));
                }
            }
            println!("{}", text);
            ExitCode::Success
        }
        Err(e) => {
            eprintln!("{}", colors::error(&e.to_string()));
            ExitCode::GeneralError
        }
    }
}

/// Print the config file location.
pub fn config_path(json: bool) -> ExitCode {
    match config_file_path() {
        Ok(path) => {
            if json {
                println!("{}", serde_json::json!({ "path": path }));
            } else {
                println!("{}", path.display());
            }
            ExitCode::Success
        }
        Err(e) => {
            eprintln!("{}", colors::error(&e));
            ExitCode::GeneralError
        }
    }
}

/// Overwrite the config file with defaults.
pub fn config_reset(json: bool, quiet: bool) -> ExitCode {
    match save_config(&CaptureConfig::default()) {
        Ok(path) => {
            if json {
                println!("{}", serde_json::json!({ "reset": true, "path": path }));
            } else if !quiet {
                println!(
                    "{} {}",
                    colors::success("Configuration reset:"),
                    colors::path(&path.display().to_string())
                );
            }
            ExitCode::Success
        }
        Err(e) => {
            eprintln!("{}", colors::error(&e));
            ExitCode::GeneralError
        }
    }
}

/// Show version information.
pub fn version(json: bool) {
    let version = env!("CARGO_PKG_VERSION");
    if json {
        println!(r#"{{"version": "{}"}}"#, version);
    } else {
        println!("{} {}", colors::bold("framecap"), version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Size;
    use framecap_lib::{CaptureMetrics, CaptureMode, CapturedFile, RequestId};

    fn args() -> DemoArgs {
        DemoArgs {
            frames: 10,
            size: Size {
                width: 4000,
                height: 100,
            },
            fps: 0,
            capture_at: vec![],
            screen_every: 0,
            resize_at: Some(5),
            resize_to: Some(Size {
                width: 200,
                height: 2500,
            }),
            output: None,
            encoder: Some("/opt/framecap-encoder".to_string()),
            workers: Some(3),
            split: true,
            bottom_up: false,
        }
    }

    #[test]
    fn test_demo_config_overrides() {
        let config = demo_config(&args());
        assert_eq!(config.workers.count, 3);
        assert_eq!(
            config.workers.encoder_path.as_deref(),
            Some("/opt/framecap-encoder")
        );
        assert_eq!(config.pipeline.auto_readback, ReadbackMode::Split);
        // Large enough for both the initial and the resized surface
        assert!(config.pipeline.max_width >= 4000);
        assert!(config.pipeline.max_height >= 2500);
    }

    #[test]
    fn test_output_dir_is_absolute() {
        let mut demo = args();
        demo.output = Some(PathBuf::from("shots"));
        let dir = output_dir(&demo, &CaptureConfig::default()).unwrap();
        assert!(dir.is_absolute());
        assert!(dir.ends_with("shots"));
    }

    #[test]
    fn test_draw_frame_tints_screens() {
        let mut backend = SoftwareBackend::new(4, 4);
        draw_frame(&mut backend, 1, 0);
        assert_eq!(backend.pixel(0, 0), [0, 0, 50, 255]);
        draw_frame(&mut backend, 2, 1);
        assert_eq!(backend.pixel(1, 0), [5, 2, 100, 255]);
    }

    #[cfg(unix)]
    #[test]
    fn test_summary_from_outcome() {
        let outcome = CaptureOutcome {
            id: first_id(),
            mode: CaptureMode::Manual,
            path: PathBuf::from("/tmp/a.png"),
            result: Ok(CapturedFile {
                path: PathBuf::from("/tmp/a.png"),
                size: FrameSize::new(8, 8),
                bytes_written: 321,
            }),
            metrics: CaptureMetrics {
                main_thread: Duration::from_micros(900),
                encode: Some(Duration::from_micros(4000)),
                frames: 1,
                ..Default::default()
            },
        };
        let summary = CaptureSummary::from(&outcome);
        assert!(summary.saved);
        assert_eq!(summary.mode, "manual");
        assert_eq!(summary.bytes, Some(321));
        assert_eq!(summary.main_thread_us, 900);
        assert_eq!(summary.encode_us, Some(4000));

        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("error").is_none());

        let failed = CaptureOutcome {
            result: Err(CaptureError::ContextLost),
            ..outcome
        };
        let summary = CaptureSummary::from(&failed);
        assert!(!summary.saved);
        assert_eq!(summary.error.as_deref(), Some("Rendering context lost"));
    }

    /// A real request ID from a throwaway coordinator.
    #[cfg(unix)]
    fn first_id() -> RequestId {
        use framecap_lib::workers::{EncodeService, EncodeTicket, WorkerPoolError};
        use framecap_common::EncodeJob;

        struct Nothing;
        impl EncodeService for Nothing {
            fn submit(&self, job: EncodeJob) -> Result<EncodeTicket, WorkerPoolError> {
                Ok(EncodeTicket::pair(job.job_id).0)
            }

            fn cancel(&self, _job_id: u64) {}
        }

        let mut backend = SoftwareBackend::new(8, 8);
        let mut config = CaptureConfig::default();
        config.pipeline.max_width = 8;
        config.pipeline.max_height = 8;
        let mut coordinator = CaptureCoordinator::new(&config, &mut backend, Nothing).unwrap();
        coordinator
            .request_capture(
                framecap_lib::CaptureMode::Auto,
                std::env::temp_dir().join("framecap-cli-id.png"),
            )
            .unwrap()
    }
}

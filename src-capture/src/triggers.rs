//! Screen-level capture policy.
//!
//! Leaving a screen captures its last frame right away; entering one captures
//! the first frame drawn for it; the screenshot key captures the current
//! screen through the manual path.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::backend::ReadbackBackend;
use crate::coordinator::{CaptureCoordinator, CaptureMode, RequestId};
use crate::error::CaptureError;
use crate::naming::{capture_path, CaptureTrigger};
use crate::workers::EncodeService;

pub struct ScreenCaptures {
    dir: PathBuf,
    current: Option<String>,
    pending_enter: Option<String>,
}

impl ScreenCaptures {
    /// Capture into `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            current: None,
            pending_enter: None,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn current_screen(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// The game switches from the current screen to `next`.
    ///
    /// Call before anything of `next` is drawn. The outgoing screen is read
    /// immediately; the incoming one is captured on its first drawn frame.
    pub fn transition<B, E>(
        &mut self,
        coordinator: &mut CaptureCoordinator<E>,
        backend: &mut B,
        next: &str,
    ) -> Option<Result<RequestId, CaptureError>>
    where
        B: ReadbackBackend + ?Sized,
        E: EncodeService,
    {
        let leaving = self.current.replace(next.to_string());
        self.pending_enter = Some(next.to_string());

        let leaving = leaving?;
        let path = capture_path(&self.dir, &leaving, CaptureTrigger::Exit);
        let result = coordinator.capture_now(backend, &path);
        if let Err(e) = &result {
            warn!("Exit capture of {} skipped: {}", leaving, e);
        }
        Some(result)
    }

    /// Call once per frame after drawing, before `CaptureCoordinator::on_draw`.
    pub fn frame_drawn<E: EncodeService>(
        &mut self,
        coordinator: &mut CaptureCoordinator<E>,
    ) -> Option<Result<RequestId, CaptureError>> {
        let screen = self.pending_enter.take()?;
        let path = capture_path(&self.dir, &screen, CaptureTrigger::Enter);
        let result = coordinator.request_capture(CaptureMode::Auto, &path);
        match &result {
            Ok(id) => debug!("Enter capture {} of {}", id, screen),
            Err(e) => warn!("Enter capture of {} skipped: {}", screen, e),
        }
        Some(result)
    }

    /// Screenshot key pressed.
    pub fn manual<E: EncodeService>(
        &self,
        coordinator: &mut CaptureCoordinator<E>,
    ) -> Result<RequestId, CaptureError> {
        let screen = self.current.as_deref().unwrap_or("screen");
        let path = capture_path(&self.dir, screen, CaptureTrigger::Manual);
        coordinator.request_capture(CaptureMode::Manual, &path)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::config::CaptureConfig;
    use crate::workers::{EncodeTicket, TicketSender, WorkerPoolError};
    use framecap_common::EncodeJob;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        jobs: RefCell<Vec<(EncodeJob, TicketSender)>>,
    }

    impl EncodeService for Recorder {
        fn submit(&self, job: EncodeJob) -> Result<EncodeTicket, WorkerPoolError> {
            let (ticket, sender) = EncodeTicket::pair(job.job_id);
            self.jobs.borrow_mut().push((job, sender));
            Ok(ticket)
        }

        fn cancel(&self, _job_id: u64) {}
    }

    fn names(recorder: &Recorder) -> Vec<String> {
        recorder
            .jobs
            .borrow()
            .iter()
            .map(|(job, _)| {
                job.output_path
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }

    #[test]
    fn test_transition_captures_exit_then_enter() {
        let dir = std::env::temp_dir().join(format!("framecap-triggers-{}", std::process::id()));
        let mut screens = ScreenCaptures::new(&dir).unwrap();
        let mut backend = SoftwareBackend::new(8, 8);
        let mut config = CaptureConfig::default();
        config.pipeline.max_width = 64;
        config.pipeline.max_height = 64;
        let mut coordinator =
            CaptureCoordinator::new(&config, &mut backend, Recorder::default()).unwrap();

        // First screen: nothing to exit from
        assert!(screens
            .transition(&mut coordinator, &mut backend, "title")
            .is_none());
        assert!(matches!(screens.frame_drawn(&mut coordinator), Some(Ok(_))));
        coordinator.on_draw(&mut backend);
        coordinator.tick(&mut backend);
        for (_, sender) in coordinator.encoder().jobs.borrow_mut().iter_mut() {
            sender.confirm_receipt();
        }
        coordinator.tick(&mut backend);

        assert!(matches!(
            screens.transition(&mut coordinator, &mut backend, "game"),
            Some(Ok(_))
        ));
        assert_eq!(screens.current_screen(), Some("game"));
        coordinator.tick(&mut backend);

        let names = names(coordinator.encoder());
        assert_eq!(names.len(), 2);
        assert!(names[0].ends_with("_title_enter.png"));
        assert!(names[1].ends_with("_title_exit.png"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}

//! Per-capture timing.

use std::time::Duration;

/// Stage durations for one capture.
///
/// Everything except `latency` and `encode` is time spent on the render
/// thread; `main_thread` is their sum and is what the budget applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureMetrics {
    /// Validating and recording the request
    pub request: Duration,
    /// Issuing the GPU read (or the whole blocking read)
    pub issue: Duration,
    /// Map calls, including pending ones
    pub map: Duration,
    /// Copy into the shared segment
    pub handoff: Duration,
    /// Building and sending the encode job
    pub submit: Duration,
    pub main_thread: Duration,
    /// Wall clock from request to job submission
    pub latency: Duration,
    /// Worker-reported encode and write time
    pub encode: Option<Duration>,
    /// Frames between request and hand-off
    pub frames: u64,
}

impl CaptureMetrics {
    /// Recompute `main_thread` from the individual stages.
    pub fn finish_main_thread(&mut self) {
        self.main_thread = self.request + self.issue + self.map + self.handoff + self.submit;
    }

    pub fn main_thread_us(&self) -> u64 {
        self.main_thread.as_micros() as u64
    }

    pub fn within_budget(&self, budget: Duration) -> bool {
        self.main_thread < budget
    }
}

impl std::fmt::Display for CaptureMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "main {}us (request {}us, issue {}us, map {}us, handoff {}us, submit {}us), latency {}us over {} frames",
            self.main_thread.as_micros(),
            self.request.as_micros(),
            self.issue.as_micros(),
            self.map.as_micros(),
            self.handoff.as_micros(),
            self.submit.as_micros(),
            self.latency.as_micros(),
            self.frames
        )?;
        if let Some(encode) = self.encode {
            write!(f, ", encode {}us", encode.as_micros())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_thread_is_sum_of_stages() {
        let mut metrics = CaptureMetrics {
            request: Duration::from_micros(10),
            issue: Duration::from_micros(200),
            map: Duration::from_micros(30),
            handoff: Duration::from_micros(700),
            submit: Duration::from_micros(60),
            latency: Duration::from_millis(20),
            ..Default::default()
        };
        metrics.finish_main_thread();
        assert_eq!(metrics.main_thread_us(), 1000);
        assert!(metrics.within_budget(Duration::from_millis(2)));
        assert!(!metrics.within_budget(Duration::from_micros(1000)));
    }

    #[test]
    fn test_display_includes_encode_when_known() {
        let mut metrics = CaptureMetrics::default();
        assert!(!metrics.to_string().contains("encode"));
        metrics.encode = Some(Duration::from_micros(1500));
        assert!(metrics.to_string().ends_with("encode 1500us"));
    }
}

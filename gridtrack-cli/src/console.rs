//! Human-readable sweep progress on stdout.

use gridtrack_core::sweep::{
    ArtifactLogOutcome, FetchOutcome, PublishOutcome, SweepEvent, SweepObserver, SweepSummary,
    TrialReport,
};

/// Prints one line per notable sweep event.
///
/// In quiet mode only the final outcome is printed.
pub struct ConsoleObserver {
    quiet: bool,
}

impl ConsoleObserver {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    pub fn lines(&self, event: &SweepEvent<'_>) -> Vec<String> {
        match event {
            SweepEvent::Finished { summary } => finished_lines(summary),
            SweepEvent::Aborted { index, error } => {
                vec![format!("Sweep aborted at trial {index}: {error}")]
            }
            _ if self.quiet => Vec::new(),
            SweepEvent::Started {
                experiment,
                trials,
                max_parallel,
            } => vec![format!(
                "Sweeping {trials} configurations in experiment '{experiment}' ({max_parallel} at a time)"
            )],
            SweepEvent::TrialStarted { config } => {
                vec![format!("Training model with {}", config.label())]
            }
            SweepEvent::TrialCompleted { report } => report_lines(report),
            SweepEvent::TrialFailed { failure } => {
                vec![format!("Trial {} failed: {}", failure.index, failure.error)]
            }
        }
    }
}

impl SweepObserver for ConsoleObserver {
    fn on_event(&self, event: &SweepEvent<'_>) {
        for line in self.lines(event) {
            println!("{line}");
        }
    }
}

fn report_lines(report: &TrialReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Run {} | accuracy={:.4}, loss={:.4}",
        report.run_id, report.accuracy, report.loss
    )];
    if let ArtifactLogOutcome::Failed(reason) = &report.artifact_log {
        lines.push(format!("Failed to log model artifact: {reason}"));
    }
    match &report.publish {
        PublishOutcome::Pushed => lines.push("Metrics pushed to Pushgateway".to_string()),
        PublishOutcome::Failed(reason) => lines.push(format!("Failed to push metrics: {reason}")),
        PublishOutcome::Disabled => {}
    }
    match &report.fetch {
        Some(FetchOutcome::Downloaded { path }) => lines.push(format!(
            "Downloaded best model artifacts to {}",
            path.display()
        )),
        Some(FetchOutcome::Failed { reason }) => {
            lines.push(format!("Failed to download best model artifacts: {reason}"))
        }
        Some(FetchOutcome::Superseded) | None => {}
    }
    lines
}

fn finished_lines(summary: &SweepSummary) -> Vec<String> {
    let mut lines = Vec::new();
    if !summary.trials_failed.is_empty() {
        lines.push(format!(
            "{} of {} trials failed",
            summary.trials_failed.len(),
            summary.trials_planned
        ));
    }
    match &summary.best {
        Some(best) => lines.push(format!(
            "Best run: {} with accuracy={:.4}",
            best.run_id, best.accuracy
        )),
        None => lines.push("No trial completed, so there is no best run".to_string()),
    }
    lines
}

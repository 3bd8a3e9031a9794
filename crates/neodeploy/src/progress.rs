use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use neodeploy_cloud::{DeploymentRecord, DeploymentState};
use std::time::Duration;

/// One spinner per in-flight deployment
pub struct DeployProgress {
    multi: MultiProgress,
}

impl DeployProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
        }
    }

    pub fn add(&self, scenario: &str, resource_group: &str) -> DeploymentSpinner {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(format!("Deploying {} ({})...", scenario, resource_group));
        bar.enable_steady_tick(Duration::from_millis(120));
        DeploymentSpinner {
            bar,
            scenario: scenario.to_string(),
        }
    }
}

impl Default for DeployProgress {
    fn default() -> Self {
        Self::new()
    }
}

pub struct DeploymentSpinner {
    bar: ProgressBar,
    scenario: String,
}

impl DeploymentSpinner {
    pub fn finish(&self, record: &DeploymentRecord) {
        let message = match record.state {
            DeploymentState::Succeeded => format!("{} succeeded ✓", self.scenario),
            state => format!("{} ended {}", self.scenario, state),
        };
        self.bar.finish_with_message(message);
    }

    pub fn finish_error(&self, error: &str) {
        self.bar
            .finish_with_message(format!("{} failed: {}", self.scenario, error));
    }
}

use crate::config::PollSettings;
use crate::{Method, Transport};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Import task lifecycle as seen by the client.
///
/// ```text
/// Pending ──service: success──▶ Success
///    │    ──service: failed───▶ Failed
///    └────deadline elapsed────▶ Timeout
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportState {
    Pending,
    Success,
    Failed,
    Timeout,
}

impl ImportState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ImportState::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImportState::Pending => "pending",
            ImportState::Success => "success",
            ImportState::Failed => "failed",
            ImportState::Timeout => "timeout",
        }
    }

    /// Map a service-reported task state. Non-terminal or unknown states stay
    /// pending.
    fn from_service(state: &str) -> Self {
        match state {
            "success" | "completed" => ImportState::Success,
            "failed" => ImportState::Failed,
            _ => ImportState::Pending,
        }
    }
}

impl fmt::Display for ImportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tick-driven poller for one import task.
pub struct ImportPoller {
    task_id: String,
    url: String,
    settings: PollSettings,
    started: Option<Instant>,
    polls: u32,
    state: ImportState,
}

impl ImportPoller {
    pub fn new(task_id: &str, url: String, settings: PollSettings) -> Self {
        Self {
            task_id: task_id.to_owned(),
            url,
            settings,
            started: None,
            polls: 0,
            state: ImportState::Pending,
        }
    }

    pub fn state(&self) -> ImportState {
        self.state
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Advance by one step: check the deadline, wait one interval, query the
    /// task. Once terminal, further ticks are no-ops.
    pub fn tick(&mut self, transport: &dyn Transport) -> ImportState {
        if self.state.is_terminal() {
            return self.state;
        }
        let started = *self.started.get_or_insert_with(Instant::now);
        if started.elapsed() >= self.settings.timeout {
            warn!(
                "import task {} still pending after {:?}; giving up",
                self.task_id, self.settings.timeout
            );
            self.state = ImportState::Timeout;
            return self.state;
        }

        std::thread::sleep(self.settings.interval);
        self.polls += 1;
        let result = transport.request(Method::Get, &self.url, None);
        if result.status == 200 {
            let reported = result
                .field("state")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            debug!("import task {} poll {}: {reported}", self.task_id, self.polls);
            self.state = ImportState::from_service(reported);
        } else {
            debug!(
                "import task {} poll {} inconclusive: HTTP {}",
                self.task_id, self.polls, result.status
            );
        }
        self.state
    }

    /// Tick until a terminal state is reached.
    pub fn wait(mut self, transport: &dyn Transport) -> ImportState {
        info!("waiting for import task {}", self.task_id);
        loop {
            let state = self.tick(transport);
            if state.is_terminal() {
                info!("import task {} finished: {state}", self.task_id);
                return state;
            }
        }
    }
}

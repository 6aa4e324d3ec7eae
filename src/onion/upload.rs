//! Descriptor upload tracking
//!
//! After a service is created Tor uploads its descriptor to several HSDirs
//! and reports each attempt with `HS_DESC` events. The number of replicas
//! is not known up front; records appear as `UPLOAD` events arrive. The
//! tracker turns that stream into exactly one outcome.

use super::progress::Progress;
use crate::error::{OnionError, Result};
use crate::tor::{ControlConnection, EventSubscription, HsDescAction, HsDescEvent};
use tracing::{debug, info, warn};

/// When a tracker considers the upload finished
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UploadMode {
    /// Succeed on the first accepted upload
    #[default]
    FirstSuccess,
    /// Wait for every known replica to finish
    AwaitAll,
}

impl UploadMode {
    pub fn from_await_all(await_all: bool) -> Self {
        if await_all {
            UploadMode::AwaitAll
        } else {
            UploadMode::FirstSuccess
        }
    }
}

/// Per-replica upload state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadState {
    Pending,
    Uploaded,
    Failed(Option<String>),
}

impl UploadState {
    fn is_terminal(&self) -> bool {
        !matches!(self, UploadState::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub directory_id: String,
    pub state: UploadState,
}

/// Final result of tracking
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Directories that accepted the descriptor at resolution time
    Uploaded(Vec<String>),
    /// Every known directory failed
    Failed(Vec<(String, Option<String>)>),
}

impl UploadOutcome {
    pub fn into_result(self, service_id: &str) -> Result<Vec<String>> {
        match self {
            UploadOutcome::Uploaded(dirs) => Ok(dirs),
            UploadOutcome::Failed(failures) => Err(OnionError::UploadFailure {
                service_id: service_id.to_string(),
                failures,
            }),
        }
    }
}

/// State machine correlating `HS_DESC` events for one service id
#[derive(Debug)]
pub struct DescriptorUploadTracker {
    service_id: String,
    mode: UploadMode,
    /// In order of first appearance
    records: Vec<UploadRecord>,
    outcome: Option<UploadOutcome>,
}

impl DescriptorUploadTracker {
    pub fn new(service_id: &str, mode: UploadMode) -> Self {
        Self {
            service_id: service_id.to_string(),
            mode,
            records: Vec::new(),
            outcome: None,
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn records(&self) -> &[UploadRecord] {
        &self.records
    }

    pub fn outcome(&self) -> Option<&UploadOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn uploaded_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.state == UploadState::Uploaded)
            .count()
    }

    /// Apply one event. Returns false if it was ignored: another service,
    /// an uninteresting verb, or a tracker that already resolved.
    pub fn handle_event(&mut self, event: &HsDescEvent) -> bool {
        if self.is_resolved() || event.service_id != self.service_id {
            return false;
        }

        let state = match &event.action {
            HsDescAction::Upload => UploadState::Pending,
            HsDescAction::Uploaded => UploadState::Uploaded,
            HsDescAction::Failed => UploadState::Failed(event.reason.clone()),
            HsDescAction::Other(_) => return false,
        };

        match self
            .records
            .iter_mut()
            .find(|r| r.directory_id == event.directory_id)
        {
            // A repeated UPLOAD must not undo a result
            Some(_) if state == UploadState::Pending => {},
            Some(record) => record.state = state,
            None => self.records.push(UploadRecord {
                directory_id: event.directory_id.clone(),
                state,
            }),
        }

        self.outcome = self.evaluate();
        true
    }

    fn evaluate(&self) -> Option<UploadOutcome> {
        if self.records.is_empty() {
            return None;
        }
        let uploaded: Vec<String> = self
            .records
            .iter()
            .filter(|r| r.state == UploadState::Uploaded)
            .map(|r| r.directory_id.clone())
            .collect();
        let all_terminal = self.records.iter().all(|r| r.state.is_terminal());

        match self.mode {
            UploadMode::FirstSuccess if !uploaded.is_empty() => {
                Some(UploadOutcome::Uploaded(uploaded))
            },
            UploadMode::AwaitAll if all_terminal && !uploaded.is_empty() => {
                Some(UploadOutcome::Uploaded(uploaded))
            },
            _ if all_terminal => Some(UploadOutcome::Failed(self.failures())),
            _ => None,
        }
    }

    fn failures(&self) -> Vec<(String, Option<String>)> {
        self.records
            .iter()
            .filter_map(|r| match &r.state {
                UploadState::Failed(reason) => Some((r.directory_id.clone(), reason.clone())),
                _ => None,
            })
            .collect()
    }
}

/// Drive a tracker from a subscription until it resolves.
///
/// The subscription is always handed back to `control` before returning,
/// on success and failure alike.
pub(crate) async fn await_descriptor_upload(
    control: &dyn ControlConnection,
    mut subscription: EventSubscription,
    service_id: &str,
    mode: UploadMode,
    progress: &mut Progress,
) -> Result<Vec<String>> {
    let mut tracker = DescriptorUploadTracker::new(service_id, mode);
    debug!(service_id = %service_id, ?mode, "Waiting for descriptor upload");

    let result = loop {
        let Some(body) = subscription.next_event().await else {
            break Err(OnionError::Control(
                "event stream closed before descriptor upload finished".to_string(),
            ));
        };
        let Some(event) = HsDescEvent::parse(&body) else {
            debug!("Ignoring unparseable HS_DESC event: {:?}", body);
            continue;
        };
        if !tracker.handle_event(&event) {
            continue;
        }

        match event.action {
            HsDescAction::Upload => progress.report(
                progress.current(),
                "uploading",
                &format!("Upload to {} started", event.directory_id),
            ),
            HsDescAction::Uploaded => {
                info!(service_id = %service_id, hsdir = %event.directory_id, "Descriptor uploaded");
                progress.report(
                    Progress::upload_percent(tracker.uploaded_count(), tracker.records().len()),
                    "uploaded",
                    &format!("Successful upload to {}", event.directory_id),
                );
            },
            HsDescAction::Failed => warn!(
                service_id = %service_id,
                hsdir = %event.directory_id,
                reason = ?event.reason,
                "Descriptor upload failed"
            ),
            HsDescAction::Other(_) => {},
        }

        if let Some(outcome) = tracker.outcome() {
            break outcome.clone().into_result(service_id);
        }
    };

    if let Err(e) = control.unsubscribe(subscription).await {
        warn!("Failed to unsubscribe from HS_DESC events: {}", e);
    }

    match &result {
        Ok(_) => {
            let message = match mode {
                UploadMode::AwaitAll => "Completed descriptor uploads",
                UploadMode::FirstSuccess => "At least one descriptor uploaded",
            };
            progress.report(100.0, "wait_descriptor", message);
        },
        Err(e) => progress.report(100.0, "upload_failed", &e.to_string()),
    }
    result
}

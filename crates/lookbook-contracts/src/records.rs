use serde::{Deserialize, Serialize};

use crate::assets::ImageAsset;
use crate::SHOTS_PER_TARGET;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl RecordStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RecordStatus::Completed | RecordStatus::Error)
    }
}

/// Per-target progress and result tracking for one batch run.
///
/// Status moves `Pending -> Processing -> {Completed | Error}` and
/// never leaves a terminal state; a new batch replaces the record set
/// wholesale instead of reviving old records. The shot counter only
/// counts successfully produced outputs and stays within
/// `[0, SHOTS_PER_TARGET]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub target_id: String,
    pub target_label: String,
    pub images: Vec<String>,
    pub status: RecordStatus,
    pub error: Option<String>,
    pub completed_shots: u32,
}

impl GenerationRecord {
    pub fn pending(target: &ImageAsset) -> Self {
        Self {
            target_id: target.id.clone(),
            target_label: target.label.clone(),
            images: Vec::new(),
            status: RecordStatus::Pending,
            error: None,
            completed_shots: 0,
        }
    }

    /// `Pending -> Processing`. Ignored from any other state.
    pub fn begin(&mut self) {
        if self.status == RecordStatus::Pending {
            self.status = RecordStatus::Processing;
        }
    }

    /// Records incremental progress while processing. Clamped so the
    /// counter never exceeds the shots-per-target bound.
    pub fn note_progress(&mut self, produced: u32) {
        if self.status != RecordStatus::Processing {
            return;
        }
        self.completed_shots = produced.min(SHOTS_PER_TARGET);
    }

    /// `Processing -> Completed`, replacing the output sequence.
    pub fn complete(&mut self, images: Vec<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.images = images;
        self.completed_shots = SHOTS_PER_TARGET;
        self.status = RecordStatus::Completed;
        self.error = None;
    }

    /// `Processing -> Error`. Partial outputs accumulated before the
    /// failing shot are discarded; the error record carries none.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.images.clear();
        self.status = RecordStatus::Error;
        self.error = Some(message.into());
    }
}

#[cfg(test)]
mod tests {
    use crate::assets::ImageAsset;
    use crate::SHOTS_PER_TARGET;

    use super::{GenerationRecord, RecordStatus};

    fn record() -> GenerationRecord {
        let target = ImageAsset::new("cardigan", "/g/cardigan.png", "aGk=", "image/png");
        GenerationRecord::pending(&target)
    }

    #[test]
    fn pending_record_starts_empty() {
        let record = record();
        assert_eq!(record.status, RecordStatus::Pending);
        assert!(record.images.is_empty());
        assert_eq!(record.completed_shots, 0);
        assert!(record.error.is_none());
    }

    #[test]
    fn lifecycle_reaches_completed() {
        let mut record = record();
        record.begin();
        assert_eq!(record.status, RecordStatus::Processing);
        record.note_progress(1);
        record.note_progress(2);
        assert_eq!(record.completed_shots, 2);
        record.complete(vec!["img-a".into(), "img-b".into()]);
        assert_eq!(record.status, RecordStatus::Completed);
        assert_eq!(record.images.len(), 2);
        assert_eq!(record.completed_shots, SHOTS_PER_TARGET);
    }

    #[test]
    fn failure_discards_partial_outputs() {
        let mut record = record();
        record.begin();
        record.note_progress(1);
        record.images.push("partial".into());
        record.fail("Gemini returned status 429");
        assert_eq!(record.status, RecordStatus::Error);
        assert!(record.images.is_empty());
        assert_eq!(record.error.as_deref(), Some("Gemini returned status 429"));
    }

    #[test]
    fn terminal_states_are_sticky() {
        let mut record = record();
        record.begin();
        record.complete(vec!["img".into()]);
        record.fail("late failure");
        assert_eq!(record.status, RecordStatus::Completed);
        assert!(record.error.is_none());

        let mut failed = self::record();
        failed.begin();
        failed.fail("boom");
        failed.complete(vec!["img".into()]);
        assert_eq!(failed.status, RecordStatus::Error);
        assert!(failed.images.is_empty());
    }

    #[test]
    fn progress_is_clamped_and_gated_on_processing() {
        let mut record = record();
        record.note_progress(3);
        assert_eq!(record.completed_shots, 0);
        record.begin();
        record.note_progress(9);
        assert_eq!(record.completed_shots, SHOTS_PER_TARGET);
    }
}

//! Troubleshooting hints for failed attempts.

use serde::{Deserialize, Serialize};

use super::audit::AuditRecord;

/// Suggestion shown next to a failed analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Troubleshoot {
    pub title: String,
    pub message: String,
    pub suggested_actions: Vec<String>,
}

impl Troubleshoot {
    /// Only worker loss is recognised; everything else yields `None`.
    pub fn for_audit(audit: &AuditRecord) -> Option<Self> {
        let lost_worker = audit
            .exception_class
            .as_deref()
            .into_iter()
            .chain(audit.failure_trace.as_deref())
            .any(|text| text.contains("WorkerLostError"));

        lost_worker.then(|| Troubleshoot {
            title: "Analysis worker was lost".to_string(),
            message: "The worker running this analysis terminated unexpectedly, \
                      most likely because it ran out of memory."
                .to_string(),
            suggested_actions: vec![
                "Use a smaller analysis extent".to_string(),
                "Use smaller or simplified hazard and exposure layers".to_string(),
                "Rerun the analysis".to_string(),
            ],
        })
    }
}

//! Exported test results

use super::script::RunStatus;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

/// Report read/write errors
#[derive(Error, Debug)]
pub enum ReportError {
    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result record of one test run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    /// Test name
    pub test_name: String,
    /// Whether the run completed
    pub passed: bool,
    /// Final status
    pub status: RunStatus,
    /// Error that ended the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Run log in display order
    pub log: Vec<String>,
    /// Run start (or export time if the test never ran)
    pub timestamp: DateTime<Local>,
    /// Run identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    /// Wall time of the run
    pub duration_ms: u64,
}

impl TestReport {
    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write as JSON to `path`; parent directories are not created
    pub fn write_to(&self, path: &Path) -> Result<(), ReportError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Read a previously exported report
    pub fn read_from(path: &Path) -> Result<Self, ReportError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TestReport {
        TestReport {
            test_name: "SampleTest".to_string(),
            passed: true,
            status: RunStatus::Completed,
            error: None,
            log: vec!["start".to_string(), "stop".to_string()],
            timestamp: Local::now(),
            run_id: Some(Uuid::new_v4()),
            duration_ms: 12,
        }
    }

    #[test]
    fn test_json_shape() {
        let json: serde_json::Value = serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        assert_eq!(json["test_name"], "SampleTest");
        assert_eq!(json["passed"], true);
        assert_eq!(json["status"], "completed");
        assert_eq!(json["log"][1], "stop");
        assert!(json.get("error").is_none());
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        let report = sample();

        report.write_to(&path).unwrap();
        assert_eq!(TestReport::read_from(&path).unwrap(), report);
    }

    #[test]
    fn test_missing_parent_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("results.json");
        assert!(matches!(sample().write_to(&path), Err(ReportError::Io(_))));
    }
}

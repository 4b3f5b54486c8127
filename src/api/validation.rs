//! Purpose: Provide a structured, read-only integrity check of a queue file.
//! Exports: `ValidationReport`, `ValidationStatus`, `ValidationIssue`, `Queue::validate`.
//! Role: Diagnostics for operators and tests; never repairs or mutates the file.
//! Invariants: Every pending id in `[first_id, last_id)` is checked; one bad slot does not stop it.
//! Invariants: Header problems and a replaced file short-circuit the slot scan.

use crate::core::error::{Error, ErrorKind};
use crate::core::queue::Queue;
use std::path::PathBuf;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ValidationStatus {
    Ok,
    Corrupt,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidationIssue {
    pub code: String,
    pub message: String,
    pub id: Option<u64>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidationReport {
    pub path: PathBuf,
    pub status: ValidationStatus,
    pub checked: u64,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn ok(path: PathBuf) -> Self {
        Self {
            path,
            status: ValidationStatus::Ok,
            checked: 0,
            issues: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ValidationStatus::Ok
    }

    fn push(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
        self.status = ValidationStatus::Corrupt;
    }
}

impl Queue {
    /// Checks the header and the framing of every pending slot.
    ///
    /// Only I/O failures that prevent reading the header are returned as
    /// errors; everything else is reported as an issue.
    pub fn validate(&mut self) -> Result<ValidationReport, Error> {
        let mut report = ValidationReport::ok(self.path.clone());
        if self.is_replaced()? {
            report.push(ValidationIssue {
                code: "replaced".to_string(),
                message: "file at this path is not the one this handle holds open".to_string(),
                id: None,
            });
            return Ok(report);
        }
        let disk = self.read_disk_header()?;
        let file_size = self.file_len()?;

        if let Err(err) = disk.validate(file_size) {
            report.push(issue_from("header", &err, None));
            return Ok(report);
        }
        if disk.record_count != self.header.record_count
            || disk.record_size != self.header.record_size
        {
            report.push(ValidationIssue {
                code: "geometry".to_string(),
                message: "on-disk geometry differs from this handle".to_string(),
                id: None,
            });
            return Ok(report);
        }

        for id in disk.first_id..disk.last_id {
            report.checked += 1;
            match self.read_slot_len(&disk, id) {
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::Io => return Err(err),
                Err(err) => report.push(issue_from("slot", &err, Some(id))),
            }
        }
        Ok(report)
    }
}

fn issue_from(code: &str, err: &Error, id: Option<u64>) -> ValidationIssue {
    ValidationIssue {
        code: code.to_string(),
        message: err.message().unwrap_or("invalid").to_string(),
        id,
    }
}

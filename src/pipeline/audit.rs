use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{IoContext, StageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditTag {
    Ok,
    Skip,
    Miss,
    Warn,
    Err,
    Done,
}

impl AuditTag {
    pub fn label(self) -> &'static str {
        match self {
            AuditTag::Ok => "[OK]",
            AuditTag::Skip => "[SKIP]",
            AuditTag::Miss => "[MISS]",
            AuditTag::Warn => "[WARN]",
            AuditTag::Err => "[ERR]",
            AuditTag::Done => "[DONE]",
        }
    }
}

impl fmt::Display for AuditTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub tag: AuditTag,
    pub component: &'static str,
    /// `<sequence>/<variant>`, a sequence name, or `batch`.
    pub unit: String,
    pub message: String,
}

impl fmt::Display for AuditEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}: {}", self.tag, self.component, self.unit, self.message)
    }
}

/// Tagged record of everything a batch did, mirrored to the log and to a file.
pub struct AuditLog {
    path: PathBuf,
    file: File,
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    /// Open `path` for appending, so successive batches accumulate.
    pub fn create(path: &Path) -> StageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).at_path(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path).at_path(path)?;
        Ok(AuditLog { path: path.to_path_buf(), file, entries: Vec::new() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, tag: AuditTag, component: &'static str, unit: impl Into<String>, message: impl Into<String>) {
        let entry = AuditEntry { tag, component, unit: unit.into(), message: message.into() };
        match tag {
            AuditTag::Ok | AuditTag::Done => log::info!("{}", entry),
            AuditTag::Skip | AuditTag::Miss | AuditTag::Warn => log::warn!("{}", entry),
            AuditTag::Err => log::error!("{}", entry),
        }
        if let Err(e) = writeln!(self.file, "{}", entry).and_then(|_| self.file.flush()) {
            log::warn!("[Batch] Cannot append to {}: {}", self.path.display(), e);
        }
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn count(&self, tag: AuditTag) -> usize {
        self.entries.iter().filter(|e| e.tag == tag).count()
    }

    pub fn is_done(&self) -> bool {
        self.entries.last().map(|e| e.tag == AuditTag::Done).unwrap_or(false)
    }
}

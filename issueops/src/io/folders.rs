//! Working-folder allocation.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::core::folder_naming::{folder_timestamp, item_dir_name, operation_dir_name};

/// Collision suffixes tried before giving up (`-2` through this value).
const MAX_ATTEMPTS: u32 = 100;

/// A freshly created operation folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingFolder {
    pub path: PathBuf,
    pub work_item_id: String,
    pub operation: String,
    /// 14-digit creation timestamp.
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct WorkingFolderAllocator {
    root: PathBuf,
}

impl WorkingFolderAllocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn allocate(&self, work_item_id: &str, operation: &str) -> Result<WorkingFolder> {
        self.allocate_at(work_item_id, operation, Utc::now())
    }

    /// Create `<root>/item-<id>/op-<operation>-<timestamp>`, adding `-2`, `-3`, ...
    /// when an allocation in the same second already claimed the name.
    #[instrument(skip_all, fields(work_item_id = work_item_id, operation = operation))]
    pub fn allocate_at(
        &self,
        work_item_id: &str,
        operation: &str,
        now: DateTime<Utc>,
    ) -> Result<WorkingFolder> {
        let item_dir = self.root.join(item_dir_name(work_item_id));
        fs::create_dir_all(&item_dir)
            .with_context(|| format!("create item folder {}", item_dir.display()))?;

        let timestamp = folder_timestamp(now);
        for attempt in 1..=MAX_ATTEMPTS {
            let path = item_dir.join(operation_dir_name(operation, &timestamp, attempt));
            match fs::create_dir(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "working folder created");
                    return Ok(WorkingFolder {
                        path,
                        work_item_id: work_item_id.to_string(),
                        operation: operation.to_string(),
                        timestamp,
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("create working folder {}", path.display()));
                }
            }
        }
        Err(anyhow!(
            "no free working folder name for {operation} at {timestamp} in {}",
            item_dir.display()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn builds_sortable_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let allocator = WorkingFolderAllocator::new(temp.path());
        let now = Utc.with_ymd_and_hms(2026, 5, 6, 7, 8, 9).unwrap();
        let folder = allocator.allocate_at("ENG-1", "review", now).expect("allocate");
        assert_eq!(
            folder.path,
            temp.path().join("item-ENG-1").join("op-review-20260506070809")
        );
        assert!(folder.path.is_dir());
        assert_eq!(folder.timestamp, "20260506070809");
    }

    /// Two allocations in the same second get distinct folders.
    #[test]
    fn same_second_allocations_do_not_collide() {
        let temp = tempfile::tempdir().expect("tempdir");
        let allocator = WorkingFolderAllocator::new(temp.path());
        let now = Utc.with_ymd_and_hms(2026, 5, 6, 7, 8, 9).unwrap();
        let first = allocator.allocate_at("ENG-1", "review", now).expect("first");
        let second = allocator.allocate_at("ENG-1", "review", now).expect("second");
        assert_ne!(first.path, second.path);
        assert!(second.path.ends_with("op-review-20260506070809-2"));
    }

    #[cfg(unix)]
    #[test]
    fn creation_failure_names_the_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let blocker = temp.path().join("not-a-dir");
        fs::write(&blocker, "file").expect("write");
        let allocator = WorkingFolderAllocator::new(&blocker);
        let err = allocator.allocate("ENG-1", "review").unwrap_err();
        assert!(format!("{err:#}").contains("not-a-dir"));
    }
}

//! Working-folder naming: `item-<id>/op-<operation>-<YYYYMMDDHHMMSS>[-N]`.

use chrono::{DateTime, Utc};

/// Sortable 14-digit timestamp used in folder names.
pub fn folder_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d%H%M%S").to_string()
}

/// Restrict a path component to `[A-Za-z0-9_-]`; anything else becomes `-`.
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
                ch
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

pub fn item_dir_name(work_item_id: &str) -> String {
    format!("item-{}", sanitize_component(work_item_id))
}

/// Operation directory name; `attempt` 1 has no suffix, later ones get `-N`.
pub fn operation_dir_name(operation: &str, timestamp: &str, attempt: u32) -> String {
    let base = format!("op-{}-{}", sanitize_component(operation), timestamp);
    if attempt <= 1 {
        base
    } else {
        format!("{base}-{attempt}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_is_fourteen_sortable_digits() {
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(folder_timestamp(now), "20260304050607");
    }

    #[test]
    fn sanitizes_path_components() {
        assert_eq!(sanitize_component("ENG-12"), "ENG-12");
        assert_eq!(sanitize_component("../etc/passwd"), "---etc-passwd");
        assert_eq!(sanitize_component("  "), "unnamed");
    }

    #[test]
    fn collision_suffix_sorts_after_base() {
        let first = operation_dir_name("review", "20260304050607", 1);
        let second = operation_dir_name("review", "20260304050607", 2);
        assert_eq!(first, "op-review-20260304050607");
        assert_eq!(second, "op-review-20260304050607-2");
        assert!(first < second);
    }
}

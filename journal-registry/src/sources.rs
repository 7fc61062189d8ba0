//! Summary of the available journal sources.

use crate::file::{JournalFile, SourceType};
use crate::registry::FileRegistry;
use bytesize::ByteSize;
use journal_common::HashMap;
use journal_common::time::USEC_PER_SEC;
use serde::Serialize;
use std::time::Duration;

/// Aggregate over a group of journal files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSummary {
    pub name: String,
    pub files: usize,
    pub size: u64,
    pub first_ut: u64,
    pub last_ut: u64,
    pub info: String,
}

impl SourceSummary {
    fn new(name: &str) -> Self {
        Self {
            name: String::from(name),
            files: 0,
            size: 0,
            first_ut: 0,
            last_ut: 0,
            info: String::new(),
        }
    }

    fn add(&mut self, file: &JournalFile) {
        self.files += 1;
        self.size += file.size;

        if file.msg_first_ut != 0 && (self.first_ut == 0 || file.msg_first_ut < self.first_ut) {
            self.first_ut = file.msg_first_ut;
        }
        self.last_ut = self.last_ut.max(file.msg_last_ut);
    }

    fn finish(&mut self) {
        let covering = Duration::from_secs(self.last_ut.saturating_sub(self.first_ut) / USEC_PER_SEC);
        let last_entry = chrono::DateTime::from_timestamp_micros(self.last_ut as i64)
            .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
            .unwrap_or_else(|| String::from("unknown"));

        self.info = format!(
            "{} files, total size {}, covering {}, last entry at {}",
            self.files,
            ByteSize::b(self.size),
            humantime::format_duration(covering),
            last_entry
        );
    }
}

const GROUPS: [(&str, SourceType); 6] = [
    ("all-local-logs", SourceType::LOCAL_ALL),
    ("all-local-system-logs", SourceType::LOCAL_SYSTEM),
    ("all-local-user-logs", SourceType::LOCAL_USER),
    ("all-uncategorized", SourceType::LOCAL_OTHER),
    ("all-local-namespaces", SourceType::LOCAL_NAMESPACE),
    ("all-remote-systems", SourceType::REMOTE_ALL),
];

/// Source categories selected by a group name of [`summarize`].
pub fn group_source_type(name: &str) -> Option<SourceType> {
    if name == "all" {
        return Some(SourceType::ALL);
    }

    GROUPS
        .iter()
        .find(|(group, _)| *group == name)
        .map(|(_, kind)| *kind)
}

/// Group `files` into the well-known categories plus one group per source
/// label. Empty categories are left out, `all` is always present.
pub fn summarize(files: &[JournalFile]) -> Vec<SourceSummary> {
    let mut all = SourceSummary::new("all");
    let mut groups: Vec<SourceSummary> =
        GROUPS.iter().map(|(name, _)| SourceSummary::new(name)).collect();
    let mut labels: HashMap<&str, SourceSummary> = HashMap::default();

    for file in files {
        all.add(file);

        for (summary, (_, kind)) in groups.iter_mut().zip(GROUPS.iter()) {
            if file.source_type.intersects(*kind) {
                summary.add(file);
            }
        }

        if !file.source.is_empty() {
            labels
                .entry(file.source.as_str())
                .or_insert_with(|| SourceSummary::new(&file.source))
                .add(file);
        }
    }

    let mut labels: Vec<SourceSummary> = labels.into_values().collect();
    labels.sort_by(|a, b| a.name.cmp(&b.name));

    let mut out = vec![all];
    out.extend(groups.into_iter().filter(|g| g.files > 0));
    out.extend(labels);

    for summary in &mut out {
        summary.finish();
    }
    out
}

impl FileRegistry {
    pub fn sources(&self) -> Vec<SourceSummary> {
        summarize(&self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::DiscoveredMeta;

    fn file(path: &str, size: u64, first: u64, last: u64) -> JournalFile {
        let mut file = JournalFile::discovered(path, DiscoveredMeta::default());
        file.size = size;
        file.msg_first_ut = first;
        file.msg_last_ut = last;
        file
    }

    #[test]
    fn groups_by_category_and_label() {
        let files = vec![
            file("/var/log/journal/m/system.journal", 1024, 10 * USEC_PER_SEC, 70 * USEC_PER_SEC),
            file("/var/log/journal/m/user-1000.journal", 1024, 5 * USEC_PER_SEC, 20 * USEC_PER_SEC),
            file("/var/log/journal/m.ns/system.journal", 10, USEC_PER_SEC, 2 * USEC_PER_SEC),
            file("/var/log/journal/remote/remote-host1.journal", 10, 0, 3 * USEC_PER_SEC),
        ];

        let summary = summarize(&files);
        let names: Vec<&str> = summary.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "all",
                "all-local-logs",
                "all-local-system-logs",
                "all-local-user-logs",
                "all-local-namespaces",
                "all-remote-systems",
                "namespace-ns",
                "remote-host1",
            ]
        );

        let all = &summary[0];
        assert_eq!(all.files, 4);
        assert_eq!(all.size, 2068);
        assert_eq!(all.first_ut, USEC_PER_SEC);
        assert_eq!(all.last_ut, 70 * USEC_PER_SEC);
        assert!(all.info.starts_with("4 files, total size"));
        assert!(all.info.contains("covering 1m 9s"));
        assert!(all.info.ends_with("last entry at 1970-01-01T00:01:10Z"));

        let local = &summary[1];
        assert_eq!(local.files, 3);
    }

    #[test]
    fn group_names_map_to_source_types() {
        assert_eq!(group_source_type("all"), Some(SourceType::ALL));
        assert_eq!(
            group_source_type("all-remote-systems"),
            Some(SourceType::REMOTE_ALL)
        );
        assert_eq!(group_source_type("namespace-ns"), None);
    }

    #[test]
    fn empty_registry_still_reports_all() {
        let summary = summarize(&[]);
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].files, 0);
    }
}

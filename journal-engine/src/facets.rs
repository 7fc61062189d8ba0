//! Facet counting.
//!
//! Every facet value counts the rows in which all *other* facets match their
//! selections. That way, selecting a value of a field doesn't hide the
//! alternative values of that same field.

use journal_common::{HashMap, HashSet};
use serde::Serialize;
use std::collections::BTreeMap;

/// Value used for rows that lack a faceted field.
pub const FACET_VALUE_UNSET: &str = "-";

/// Longest field value handed out by readers.
pub const FACET_MAX_VALUE_LENGTH: usize = 8192;

/// Pseudo-field naming the file a row was read from.
pub const JOURNAL_FILE_FIELD: &str = "ND_JOURNAL_FILE";

/// Facets used when a request names none.
pub const DEFAULT_FACETS: &[&str] = &[
    "_HOSTNAME",
    "PRIORITY",
    "SYSLOG_FACILITY",
    "ERRNO",
    "SYSLOG_IDENTIFIER",
    "USER_UNIT",
    "MESSAGE_ID",
    "_BOOT_ID",
    "_SYSTEMD_OWNER_UID",
    "_UID",
    "OBJECT_SYSTEMD_OWNER_UID",
    "OBJECT_UID",
    "_GID",
    "OBJECT_GID",
    "_CAP_EFFECTIVE",
    "_AUDIT_LOGINUID",
    "OBJECT_AUDIT_LOGINUID",
    "CODE_FUNC",
    "ND_LOG_SOURCE",
    "CODE_FILE",
    "ND_ALERT_NAME",
    "ND_ALERT_CLASS",
    "_SELINUX_CONTEXT",
    "_MACHINE_ID",
    "ND_ALERT_TYPE",
    "_SYSTEMD_SLICE",
    "_EXE",
    "_NAMESPACE",
    "_TRANSPORT",
    "_RUNTIME_SCOPE",
    "_STREAM_ID",
    "ND_NIDL_CONTEXT",
    "ND_ALERT_STATUS",
    "ND_NIDL_NODE",
    "ND_ALERT_COMPONENT",
    "_COMM",
    "_SYSTEMD_USER_UNIT",
    "_SYSTEMD_USER_SLICE",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacetValueCount {
    pub value: String,
    pub count: u64,
    pub selected: bool,
}

/// Counted values of one facet, most frequent first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacetCounts {
    pub field: String,
    pub values: Vec<FacetValueCount>,
}

impl FacetCounts {
    pub fn count(&self, value: &str) -> Option<u64> {
        self.values.iter().find(|v| v.value == value).map(|v| v.count)
    }
}

#[derive(Debug)]
struct FacetKey {
    name: String,
    /// `None` when the request selects nothing for this field.
    selected: Option<HashSet<String>>,
    values: BTreeMap<String, u64>,
    current: Option<String>,
}

impl FacetKey {
    fn value(&self) -> &str {
        self.current.as_deref().unwrap_or(FACET_VALUE_UNSET)
    }

    fn row_selected(&self) -> bool {
        match &self.selected {
            None => true,
            Some(selected) => selected.contains(self.value()),
        }
    }
}

/// Per-query facet state.
#[derive(Debug)]
pub(crate) struct FacetCounter {
    keys: Vec<FacetKey>,
    index: HashMap<String, usize>,
}

impl FacetCounter {
    /// Facet on `facets` (or the defaults) plus every filtered field.
    pub(crate) fn new(facets: &[String], filters: &BTreeMap<String, Vec<String>>) -> Self {
        let mut counter = Self {
            keys: Vec::new(),
            index: HashMap::default(),
        };

        if facets.is_empty() {
            for name in DEFAULT_FACETS {
                counter.key(name);
            }
        } else {
            for name in facets {
                counter.key(name);
            }
        }

        for (name, values) in filters {
            if values.is_empty() {
                continue;
            }

            let idx = counter.key(name);
            let key = &mut counter.keys[idx];
            let selected = key.selected.get_or_insert_with(HashSet::default);
            for value in values {
                selected.insert(value.clone());
                key.values.entry(value.clone()).or_insert(0);
            }
        }

        counter
    }

    fn key(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }

        let idx = self.keys.len();
        self.keys.push(FacetKey {
            name: String::from(name),
            selected: None,
            values: BTreeMap::new(),
            current: None,
        });
        self.index.insert(String::from(name), idx);
        idx
    }

    /// Fields with a selection, with their selected values.
    pub(crate) fn filtered(&self) -> impl Iterator<Item = (&str, &HashSet<String>)> {
        self.keys
            .iter()
            .filter_map(|key| key.selected.as_ref().map(|s| (key.name.as_str(), s)))
    }

    /// Make `value` of `field` show up even if no row counts it.
    pub(crate) fn register_value(&mut self, field: &str, value: &str) {
        if let Some(&idx) = self.index.get(field) {
            self.keys[idx].values.entry(String::from(value)).or_insert(0);
        }
    }

    pub(crate) fn begin_row(&mut self) {
        for key in &mut self.keys {
            key.current = None;
        }
    }

    /// The first value of a field in a row wins.
    pub(crate) fn add_field(&mut self, name: &str, value: &[u8]) {
        if let Some(&idx) = self.index.get(name) {
            let key = &mut self.keys[idx];
            if key.current.is_none() {
                key.current = Some(String::from_utf8_lossy(value).into_owned());
            }
        }
    }

    /// Count the current row. Returns whether it matches every selection.
    pub(crate) fn finish_row(&mut self) -> bool {
        let total = self.keys.len();
        if total == 0 {
            return true;
        }

        let selected = self.keys.iter().filter(|k| k.row_selected()).count();

        if selected + 1 >= total {
            for key in &mut self.keys {
                let counted_by = selected + usize::from(!key.row_selected());
                if counted_by == total {
                    let value = key.value().to_string();
                    *key.values.entry(value).or_insert(0) += 1;
                }
            }
        }

        selected == total
    }

    pub(crate) fn result(&self) -> Vec<FacetCounts> {
        self.keys
            .iter()
            .filter(|key| !key.values.is_empty())
            .map(|key| {
                let mut values: Vec<FacetValueCount> = key
                    .values
                    .iter()
                    .map(|(value, &count)| FacetValueCount {
                        value: value.clone(),
                        count,
                        selected: key.selected.as_ref().is_some_and(|s| s.contains(value)),
                    })
                    .collect();
                values.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));

                FacetCounts {
                    field: key.name.clone(),
                    values,
                }
            })
            .collect()
    }
}

//! Static map from logical calendar name to remote collection path.

use serde::{Deserialize, Serialize};

/// One logical calendar as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEntry {
    /// Stable lookup key, e.g. "work".
    pub name: String,
    /// Collection segment under the account's base path, e.g. "work-cal".
    pub path: String,
    pub display_name: String,
}

/// A resolved calendar: entry plus its full remote collection path.
#[derive(Debug, Clone)]
pub struct CalendarCollection {
    pub name: String,
    pub display_name: String,
    /// Full collection path with trailing slash, e.g. "/calendars/u/work-cal/".
    pub path: String,
}

/// Immutable directory of the configured calendars, in configured order.
#[derive(Debug, Clone)]
pub struct CalendarDirectory {
    collections: Vec<CalendarCollection>,
}

impl CalendarDirectory {
    pub fn new(base_path: &str, entries: Vec<CalendarEntry>) -> Self {
        let base = base_path.trim_end_matches('/');
        let collections = entries
            .into_iter()
            .map(|entry| CalendarCollection {
                path: format!("{}/{}/", base, entry.path.trim_matches('/')),
                name: entry.name,
                display_name: entry.display_name,
            })
            .collect();
        CalendarDirectory { collections }
    }

    pub fn get(&self, name: &str) -> Option<&CalendarCollection> {
        self.collections.iter().find(|c| c.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CalendarCollection> {
        self.collections.iter()
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, path: &str) -> CalendarEntry {
        CalendarEntry {
            name: name.to_string(),
            path: path.to_string(),
            display_name: name.to_string(),
        }
    }

    #[test]
    fn test_paths_are_joined_and_normalized() {
        let dir = CalendarDirectory::new("/calendars/user/", vec![entry("work", "/work-cal/")]);

        let work = dir.get("work").unwrap();
        assert_eq!(work.path, "/calendars/user/work-cal/");
    }

    #[test]
    fn test_unknown_name_is_none() {
        let dir = CalendarDirectory::new("/calendars/user", vec![entry("work", "work-cal")]);
        assert!(dir.get("home").is_none());
    }
}

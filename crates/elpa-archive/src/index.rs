use std::collections::BTreeMap;

use elpa_package::{PackageDescriptor, Version};
use serde::{Deserialize, Serialize};

/// Package name → the highest-versioned descriptor seen for it.
///
/// Entries are only ever replaced by a strictly greater version, so which
/// version is indexed does not depend on merge order. Among equal versions
/// the first merged is kept.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveIndex {
    packages: BTreeMap<String, PackageDescriptor>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Replaced { previous: Version },
    /// The stored version is equal or newer; the descriptor was discarded.
    Kept,
}

impl ArchiveIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, descriptor: PackageDescriptor) -> MergeOutcome {
        match self.packages.get_mut(&descriptor.name) {
            None => {
                self.packages.insert(descriptor.name.clone(), descriptor);
                MergeOutcome::Inserted
            }
            Some(existing) if descriptor.version > existing.version => {
                let previous = std::mem::replace(existing, descriptor);
                MergeOutcome::Replaced {
                    previous: previous.version,
                }
            }
            Some(_) => MergeOutcome::Kept,
        }
    }

    pub fn get(&self, name: &str) -> Option<&PackageDescriptor> {
        self.packages.get(name)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Descriptors ordered by package name.
    pub fn packages(&self) -> impl Iterator<Item = &PackageDescriptor> + '_ {
        self.packages.values()
    }
}

impl FromIterator<PackageDescriptor> for ArchiveIndex {
    fn from_iter<I: IntoIterator<Item = PackageDescriptor>>(iter: I) -> Self {
        let mut index = ArchiveIndex::new();
        for descriptor in iter {
            index.merge(descriptor);
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elpa_package::PackageKind;

    fn desc(name: &str, version: &str, summary: &str) -> PackageDescriptor {
        PackageDescriptor {
            name: name.to_owned(),
            version: Version::parse(version).unwrap(),
            requirements: Vec::new(),
            summary: summary.to_owned(),
            kind: PackageKind::SingleFile,
            commentary: None,
        }
    }

    #[test]
    fn highest_version_wins() {
        let mut index = ArchiveIndex::new();
        assert_eq!(index.merge(desc("foo", "1.0", "a")), MergeOutcome::Inserted);
        assert_eq!(index.merge(desc("foo", "0.9", "b")), MergeOutcome::Kept);
        assert_eq!(
            index.merge(desc("foo", "1.2", "c")),
            MergeOutcome::Replaced {
                previous: Version::parse("1.0").unwrap()
            }
        );
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("foo").unwrap().version.to_string(), "1.2");
    }

    #[test]
    fn equal_versions_keep_the_first_entry() {
        let mut index = ArchiveIndex::new();
        index.merge(desc("foo", "1.0", "first"));
        assert_eq!(index.merge(desc("foo", "1", "second")), MergeOutcome::Kept);
        assert_eq!(index.get("foo").unwrap().summary, "first");
    }

    #[test]
    fn merge_result_is_order_independent() {
        let inputs = [
            desc("foo", "1.0", ""),
            desc("bar", "3", ""),
            desc("foo", "2.0.1", ""),
            desc("bar", "2.9", ""),
            desc("foo", "2.0", ""),
        ];
        let forward: ArchiveIndex = inputs.iter().cloned().collect();
        let backward: ArchiveIndex = inputs.iter().rev().cloned().collect();
        assert_eq!(forward, backward);

        let names: Vec<_> = forward.packages().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["bar", "foo"]);
        assert_eq!(forward.get("foo").unwrap().version.to_string(), "2.0.1");
    }
}

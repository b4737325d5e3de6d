//! Host/test/origin registry.
//!
//! Names are interned once and resolve to stable integer handles for
//! the life of the process, so status-log keys can be compared and
//! hashed without touching the strings. Lookup is case-insensitive.

use std::collections::HashMap;

/// Stable handle for an interned host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostId(pub u32);

/// Stable handle for an interned test column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TestId(pub u32);

/// Stable handle for an interned origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OriginId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    Normal,
    /// Synthetic aggregate reported by another server; stale logs on a
    /// summary host are dropped instead of going purple.
    Summary,
}

/// Latest "client" sub-report from a host, keyed by collector id.
#[derive(Debug, Clone)]
pub struct ClientReport {
    pub os: String,
    pub class: String,
    pub msg: String,
    pub timestamp: i64,
}

#[derive(Debug)]
pub struct HostEntry {
    pub name: String,
    pub ip: String,
    pub kind: HostKind,
    pub client_reports: HashMap<String, ClientReport>,
}

#[derive(Debug)]
pub struct TestEntry {
    pub name: String,
    /// Synthetic columns (info/trends) are recomputed on demand and
    /// never written to the checkpoint.
    pub checkpointed: bool,
}

/// The interning registry. Dropped hosts leave a tombstone so ids of
/// surviving entries stay stable.
#[derive(Debug, Default)]
pub struct Registry {
    hosts: Vec<Option<HostEntry>>,
    host_index: HashMap<String, HostId>,
    tests: Vec<TestEntry>,
    test_index: HashMap<String, TestId>,
    origins: Vec<String>,
    origin_index: HashMap<String, OriginId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_host(&self, name: &str) -> Option<HostId> {
        self.host_index.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn find_or_create_host(&mut self, name: &str, ip: &str, kind: HostKind) -> HostId {
        let key = name.to_ascii_lowercase();
        if let Some(&id) = self.host_index.get(&key) {
            return id;
        }
        let id = HostId(self.hosts.len() as u32);
        self.hosts.push(Some(HostEntry {
            name: name.to_string(),
            ip: ip.to_string(),
            kind,
            client_reports: HashMap::new(),
        }));
        self.host_index.insert(key, id);
        id
    }

    pub fn host(&self, id: HostId) -> Option<&HostEntry> {
        self.hosts.get(id.0 as usize).and_then(|h| h.as_ref())
    }

    pub fn host_mut(&mut self, id: HostId) -> Option<&mut HostEntry> {
        self.hosts.get_mut(id.0 as usize).and_then(|h| h.as_mut())
    }

    pub fn host_name(&self, id: HostId) -> &str {
        self.host(id).map_or("", |h| h.name.as_str())
    }

    pub fn drop_host(&mut self, id: HostId) {
        if let Some(slot) = self.hosts.get_mut(id.0 as usize) {
            if let Some(entry) = slot.take() {
                self.host_index.remove(&entry.name.to_ascii_lowercase());
            }
        }
    }

    /// Rename a host in place; the id is preserved. Fails when the new
    /// name is already taken.
    pub fn rename_host(&mut self, id: HostId, new_name: &str) -> bool {
        let new_key = new_name.to_ascii_lowercase();
        if self.host_index.contains_key(&new_key) {
            return false;
        }
        let Some(entry) = self.hosts.get_mut(id.0 as usize).and_then(|h| h.as_mut()) else {
            return false;
        };
        let old_key = entry.name.to_ascii_lowercase();
        entry.name = new_name.to_string();
        self.host_index.remove(&old_key);
        self.host_index.insert(new_key, id);
        true
    }

    pub fn find_test(&self, name: &str) -> Option<TestId> {
        self.test_index.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn create_test(&mut self, name: &str) -> TestId {
        let key = name.to_ascii_lowercase();
        if let Some(&id) = self.test_index.get(&key) {
            return id;
        }
        let id = TestId(self.tests.len() as u32);
        let checkpointed = !xymon_common::SYNTHETIC_TESTS.contains(&key.as_str());
        self.tests.push(TestEntry {
            name: name.to_string(),
            checkpointed,
        });
        self.test_index.insert(key, id);
        id
    }

    pub fn find_or_create_test(&mut self, name: &str) -> TestId {
        self.find_test(name).unwrap_or_else(|| self.create_test(name))
    }

    pub fn test(&self, id: TestId) -> Option<&TestEntry> {
        self.tests.get(id.0 as usize)
    }

    pub fn test_name(&self, id: TestId) -> &str {
        self.test(id).map_or("", |t| t.name.as_str())
    }

    pub fn find_or_create_origin(&mut self, name: &str) -> OriginId {
        let key = name.to_ascii_lowercase();
        if let Some(&id) = self.origin_index.get(&key) {
            return id;
        }
        let id = OriginId(self.origins.len() as u32);
        self.origins.push(name.to_string());
        self.origin_index.insert(key, id);
        id
    }

    pub fn origin_name(&self, id: OriginId) -> &str {
        self.origins.get(id.0 as usize).map_or("", |s| s.as_str())
    }

    pub fn hosts(&self) -> impl Iterator<Item = (HostId, &HostEntry)> {
        self.hosts
            .iter()
            .enumerate()
            .filter_map(|(i, h)| h.as_ref().map(|e| (HostId(i as u32), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_case_insensitive_and_stable() {
        let mut reg = Registry::new();
        let a = reg.find_or_create_host("WebSrv01", "10.0.0.1", HostKind::Normal);
        let b = reg.find_or_create_host("websrv01", "10.0.0.1", HostKind::Normal);
        assert_eq!(a, b);
        assert_eq!(reg.find_host("WEBSRV01"), Some(a));
        // display name keeps the first-seen case
        assert_eq!(reg.host_name(a), "WebSrv01");

        let t1 = reg.find_or_create_test("Disk");
        let t2 = reg.find_or_create_test("disk");
        assert_eq!(t1, t2);
    }

    #[test]
    fn test_synthetic_tests_not_checkpointed() {
        let mut reg = Registry::new();
        let info = reg.create_test("info");
        let disk = reg.create_test("disk");
        assert!(!reg.test(info).unwrap().checkpointed);
        assert!(reg.test(disk).unwrap().checkpointed);
    }

    #[test]
    fn test_drop_and_rename_host() {
        let mut reg = Registry::new();
        let a = reg.find_or_create_host("alpha", "10.0.0.1", HostKind::Normal);
        let b = reg.find_or_create_host("beta", "10.0.0.2", HostKind::Normal);

        assert!(reg.rename_host(a, "gamma"));
        assert_eq!(reg.find_host("gamma"), Some(a));
        assert_eq!(reg.find_host("alpha"), None);
        // collision refused
        assert!(!reg.rename_host(a, "beta"));

        reg.drop_host(a);
        assert_eq!(reg.find_host("gamma"), None);
        // surviving ids still resolve
        assert_eq!(reg.find_host("beta"), Some(b));
        assert_eq!(reg.hosts().count(), 1);
    }

    #[test]
    fn test_origin_interning() {
        let mut reg = Registry::new();
        let a = reg.find_or_create_origin("xymond");
        let b = reg.find_or_create_origin("XYMOND");
        assert_eq!(a, b);
        assert_eq!(reg.origin_name(a), "xymond");
    }
}

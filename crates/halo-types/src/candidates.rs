//! Scanned-candidate bookkeeping.

use crate::types::ScannedCandidate;

/// Ordered list of scanned candidates, unique by peripheral id.
///
/// Re-sightings replace the stored entry in place so the list keeps the
/// order in which devices were first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateList {
    entries: Vec<ScannedCandidate>,
}

impl CandidateList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a candidate. Returns `true` if the id was new.
    pub fn upsert(&mut self, candidate: ScannedCandidate) -> bool {
        match self.entries.iter_mut().find(|c| c.id == candidate.id) {
            Some(existing) => {
                *existing = candidate;
                false
            }
            None => {
                self.entries.push(candidate);
                true
            }
        }
    }

    /// Drop a candidate, typically once it has been paired.
    pub fn remove(&mut self, id: &str) -> Option<ScannedCandidate> {
        let pos = self.entries.iter().position(|c| c.id == id)?;
        Some(self.entries.remove(pos))
    }

    pub fn get(&self, id: &str) -> Option<&ScannedCandidate> {
        self.entries.iter().find(|c| c.id == id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_vec(&self) -> Vec<ScannedCandidate> {
        self.entries.clone()
    }
}

/// Merge locally scanned candidates with a remote registry listing.
///
/// Local entries win. A remote entry is appended only when no local entry
/// shares its id or (case-insensitively) its name, and duplicate remote
/// entries collapse to the first occurrence.
pub fn merge_candidates(
    local: &[ScannedCandidate],
    remote: &[ScannedCandidate],
) -> Vec<ScannedCandidate> {
    let mut merged: Vec<ScannedCandidate> = local.to_vec();
    for candidate in remote {
        let name = candidate.name.to_lowercase();
        let known = merged
            .iter()
            .any(|m| m.id == candidate.id || (!name.is_empty() && m.name.to_lowercase() == name));
        if !known {
            merged.push(candidate.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeviceKind, UNPAIRED_ROLE};

    fn candidate(id: &str, name: &str, rssi: i16) -> ScannedCandidate {
        ScannedCandidate {
            id: id.to_string(),
            name: name.to_string(),
            address: String::new(),
            rssi,
            kind: DeviceKind::from_name(name),
            role: UNPAIRED_ROLE.to_string(),
        }
    }

    #[test]
    fn test_upsert_dedupes_by_id() {
        let mut list = CandidateList::new();
        assert!(list.upsert(candidate("a", "HALO Shoe", -70)));
        assert!(list.upsert(candidate("b", "HALO Gun", -60)));
        assert!(!list.upsert(candidate("a", "HALO Shoe", -40)));

        assert_eq!(list.len(), 2);
        assert_eq!(list.get("a").map(|c| c.rssi), Some(-40));
        assert_eq!(list.to_vec()[0].id, "a");
    }

    #[test]
    fn test_remove_and_clear() {
        let mut list = CandidateList::new();
        list.upsert(candidate("a", "HALO Shoe", -70));
        list.upsert(candidate("b", "HALO Gun", -60));

        assert!(list.remove("a").is_some());
        assert!(list.remove("a").is_none());
        list.clear();
        assert!(list.is_empty());
    }

    #[test]
    fn test_merge_prefers_local() {
        let local = vec![candidate("a", "HALO Shoe-1", -50)];
        let remote = vec![
            candidate("a", "renamed", -90),
            candidate("x", "halo shoe-1", -90),
            candidate("y", "HALO Gun-2", -80),
            candidate("y", "HALO Gun-2", -80),
        ];

        let merged = merge_candidates(&local, &remote);
        let ids: Vec<&str> = merged.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["a", "y"]);
        assert_eq!(merged[0].rssi, -50);
    }

    #[test]
    fn test_merge_empty_names_only_match_by_id() {
        let local = vec![candidate("a", "", 0)];
        let remote = vec![candidate("b", "", 0)];
        assert_eq!(merge_candidates(&local, &remote).len(), 2);
    }
}

use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// What a caller wants to do with an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Read,
    Write,
    Execute,
    UpdatePerms,
}

/// Add or remove a tag from a permission list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermOp {
    Add,
    Remove,
}

/// Per-entry access control: four disjoint tag lists, one per mode.
/// A caller passes its tag set; access is granted when the intersection with
/// the mode's list is non-empty. A `None` tag set bypasses every check and is
/// reserved for trusted internal callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryPermissions {
    #[serde(default)]
    pub read_tags: Vec<String>,
    #[serde(default)]
    pub write_tags: Vec<String>,
    #[serde(default)]
    pub execute_tags: Vec<String>,
    #[serde(default)]
    pub update_perm_tags: Vec<String>,
}

impl EntryPermissions {
    pub fn tags_for(&self, mode: AccessMode) -> &[String] {
        match mode {
            AccessMode::Read => &self.read_tags,
            AccessMode::Write => &self.write_tags,
            AccessMode::Execute => &self.execute_tags,
            AccessMode::UpdatePerms => &self.update_perm_tags,
        }
    }

    pub fn tags_for_mut(&mut self, mode: AccessMode) -> &mut Vec<String> {
        match mode {
            AccessMode::Read => &mut self.read_tags,
            AccessMode::Write => &mut self.write_tags,
            AccessMode::Execute => &mut self.execute_tags,
            AccessMode::UpdatePerms => &mut self.update_perm_tags,
        }
    }

    pub fn is_allowed(&self, mode: AccessMode, tags: Option<&[String]>) -> bool {
        let Some(tags) = tags else {
            return true;
        };
        let check = self.tags_for(mode);
        tags.iter().any(|tag| check.contains(tag))
    }

    /// Safety rules for replacing the update-perm tag list itself:
    /// the caller must hold update-perm, may only add or remove tags it
    /// holds, and must keep at least one of its own tags in the result
    /// (no locking yourself out). A `None` tag set bypasses all four.
    pub fn can_update_perm_tags(&self, new_tags: &[String], user_tags: Option<&[String]>) -> bool {
        let Some(user_tags) = user_tags else {
            return true;
        };

        if !self.is_allowed(AccessMode::UpdatePerms, Some(user_tags)) {
            return false;
        }

        let current = &self.update_perm_tags;
        let owned = |tag: &String| user_tags.contains(tag);

        // Cannot add tags the caller does not own.
        for tag in new_tags {
            if !current.contains(tag) && !owned(tag) {
                return false;
            }
        }

        // Cannot remove tags the caller does not own.
        for tag in current {
            if !new_tags.contains(tag) && !owned(tag) {
                return false;
            }
        }

        // At least one of the caller's own tags must survive.
        user_tags.iter().any(|tag| new_tags.contains(tag))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntryTimestamps {
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
}

impl EntryTimestamps {
    pub fn now() -> Self {
        let now = Utc::now();
        EntryTimestamps {
            created_at: now,
            modified_at: now,
            accessed_at: now,
        }
    }
}

/// A named reference from a directory to a child entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryRef {
    pub name: String,
    pub ref_id: ObjectId,
}

/// One node of the virtual filesystem. Directories hold an ordered list of
/// named child references; files hold an optional blob reference (`None`
/// means an empty file). Exactly one entry in the store carries `is_root`.
#[derive(Debug, Clone)]
pub struct FsEntry {
    pub id: ObjectId,
    pub is_root: bool,
    pub kind: EntryKind,
    pub permissions: EntryPermissions,
    pub timestamps: EntryTimestamps,
    pub entries: Vec<EntryRef>,
    pub file_ref: Option<ObjectId>,
}

impl FsEntry {
    pub fn new_directory(permissions: EntryPermissions) -> Self {
        FsEntry {
            id: ObjectId::new(),
            is_root: false,
            kind: EntryKind::Directory,
            permissions,
            timestamps: EntryTimestamps::now(),
            entries: Vec::new(),
            file_ref: None,
        }
    }

    pub fn new_file(permissions: EntryPermissions, file_ref: Option<ObjectId>) -> Self {
        FsEntry {
            id: ObjectId::new(),
            is_root: false,
            kind: EntryKind::File,
            permissions,
            timestamps: EntryTimestamps::now(),
            entries: Vec::new(),
            file_ref,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn child(&self, name: &str) -> Option<&EntryRef> {
        self.entries.iter().find(|r| r.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn perms_with_update(update: &[&str]) -> EntryPermissions {
        EntryPermissions {
            update_perm_tags: tags(update),
            ..Default::default()
        }
    }

    #[test]
    fn allowed_on_non_empty_intersection() {
        let perms = EntryPermissions {
            read_tags: tags(&["pilot", "sysadmin"]),
            ..Default::default()
        };
        assert!(perms.is_allowed(AccessMode::Read, Some(&tags(&["pilot"]))));
        assert!(!perms.is_allowed(AccessMode::Read, Some(&tags(&["atc"]))));
        assert!(!perms.is_allowed(AccessMode::Write, Some(&tags(&["pilot"]))));
    }

    #[test]
    fn none_tags_bypass_all_checks() {
        let perms = EntryPermissions::default();
        assert!(perms.is_allowed(AccessMode::Write, None));
        assert!(perms.can_update_perm_tags(&tags(&["anything"]), None));
    }

    #[test]
    fn adding_a_tag_never_removes_access() {
        let perms = EntryPermissions {
            execute_tags: tags(&["user-alice"]),
            ..Default::default()
        };
        let before = tags(&["user-alice"]);
        let mut after = before.clone();
        after.push("pilot".into());
        assert!(perms.is_allowed(AccessMode::Execute, Some(&before)));
        assert!(perms.is_allowed(AccessMode::Execute, Some(&after)));
    }

    #[test]
    fn perm_update_requires_update_perm() {
        let perms = perms_with_update(&["sysadmin"]);
        assert!(!perms.can_update_perm_tags(&tags(&["pilot"]), Some(&tags(&["pilot"]))));
    }

    #[test]
    fn perm_update_rejects_adding_unowned_tags() {
        let perms = perms_with_update(&["user-alice"]);
        let user = tags(&["user-alice"]);
        assert!(!perms.can_update_perm_tags(&tags(&["user-alice", "sysadmin"]), Some(&user)));
        assert!(perms.can_update_perm_tags(&tags(&["user-alice"]), Some(&user)));
    }

    #[test]
    fn perm_update_rejects_removing_unowned_tags() {
        let perms = perms_with_update(&["user-alice", "sysadmin"]);
        let user = tags(&["user-alice"]);
        // dropping sysadmin's tag is not the caller's to do
        assert!(!perms.can_update_perm_tags(&tags(&["user-alice"]), Some(&user)));
        // keeping both is fine
        assert!(perms.can_update_perm_tags(&tags(&["user-alice", "sysadmin"]), Some(&user)));
    }

    #[test]
    fn perm_update_rejects_self_lockout() {
        let perms = perms_with_update(&["user-alice", "pilot"]);
        let user = tags(&["user-alice", "pilot"]);
        // removing every tag the caller holds would lock them out
        assert!(!perms.can_update_perm_tags(&[], Some(&user)));
        assert!(perms.can_update_perm_tags(&tags(&["pilot"]), Some(&user)));
    }

    #[test]
    fn directory_child_lookup_by_name() {
        let mut dir = FsEntry::new_directory(Default::default());
        let file = FsEntry::new_file(Default::default(), None);
        dir.entries.push(EntryRef {
            name: "notes.txt".into(),
            ref_id: file.id,
        });
        assert_eq!(dir.child("notes.txt").unwrap().ref_id, file.id);
        assert!(dir.child("missing").is_none());
    }
}

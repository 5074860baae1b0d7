use super::error::{FsErrorKind, FsResult};
use super::store::FsStore;
use super::types::{EntryPermissions, FsEntry};

/// Role tags granted traversal of the shared top-level directories. Every
/// account carries at least one of these; per-user data under
/// `/home/<user>` is locked down further by its own permission record.
pub const BASE_ACCESS_TAGS: &[&str] = &["sysadmin", "atc", "pilot", "edge-node", "user"];

fn tags(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn shared_dir_perms() -> EntryPermissions {
    EntryPermissions {
        read_tags: tags(BASE_ACCESS_TAGS),
        write_tags: tags(&["sysadmin"]),
        execute_tags: tags(BASE_ACCESS_TAGS),
        update_perm_tags: tags(&["sysadmin"]),
    }
}

fn sysadmin_dir_perms() -> EntryPermissions {
    EntryPermissions {
        read_tags: tags(&["sysadmin"]),
        write_tags: tags(&["sysadmin"]),
        execute_tags: tags(&["sysadmin"]),
        update_perm_tags: tags(&["sysadmin"]),
    }
}

/// Ensure the fixed tree exists: `/`, `/etc/passwd`, `/etc/sess`, `/home`.
/// Idempotent; run once at startup before serving.
pub async fn ensure_base_tree(store: &FsStore) -> FsResult<()> {
    let root = match store.lookup(None, "/").await {
        Ok(root) => root,
        Err(err) if err.kind() == FsErrorKind::NotExist => {
            let mut root = FsEntry::new_directory(shared_dir_perms());
            root.is_root = true;
            store.insert_root(&root).await?;
            tracing::info!(root_id = %root.id, "created filesystem root");
            root
        }
        Err(err) => return Err(err),
    };

    let etc = store
        .write_directory(None, root.id, "etc", Some(sysadmin_dir_perms()))
        .await?;
    store
        .write_directory(None, etc.id, "passwd", Some(sysadmin_dir_perms()))
        .await?;
    store
        .write_directory(None, etc.id, "sess", Some(sysadmin_dir_perms()))
        .await?;
    store
        .write_directory(None, root.id, "home", Some(shared_dir_perms()))
        .await?;

    Ok(())
}

/// Default permission record for a freshly signed-up user's home directory.
pub fn default_home_perms(owner_tag: &str) -> EntryPermissions {
    let owners = vec!["sysadmin".to_string(), owner_tag.to_string()];
    EntryPermissions {
        read_tags: owners.clone(),
        write_tags: owners.clone(),
        execute_tags: owners.clone(),
        update_perm_tags: owners,
    }
}

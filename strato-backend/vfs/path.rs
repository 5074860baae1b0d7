use super::error::{FsError, FsResult};

/// Normalize an absolute path: collapse `//` and `.`, resolve `..`.
/// Fails on empty input, relative input, or `..` past the root.
pub fn cleanup_abs_path(path: &str) -> FsResult<String> {
    if path.is_empty() {
        return Err(FsError::Invalid("path cannot be empty string".into()));
    }
    if !path.starts_with('/') {
        return Err(FsError::Invalid("abs path must start with a /".into()));
    }

    let mut result: Vec<&str> = Vec::new();
    for split in path[1..].split('/') {
        match split {
            "" | "." => continue,
            ".." => {
                if result.pop().is_none() {
                    return Err(FsError::Invalid("too many .. operators in path".into()));
                }
            }
            other => result.push(other),
        }
    }

    Ok(format!("/{}", result.join("/")))
}

/// Resolve `path` against `cwd` when it is relative, then normalize.
pub fn abs_path(cwd: &str, path: &str) -> FsResult<String> {
    if path.is_empty() {
        return Err(FsError::Invalid("path cannot be empty string".into()));
    }

    if path.starts_with('/') {
        cleanup_abs_path(path)
    } else {
        cleanup_abs_path(&format!("{cwd}/{path}"))
    }
}

/// Split an absolute path into (parent path, leaf name). Fails on `/`.
pub fn dir_up(path: &str) -> FsResult<(String, String)> {
    let cleaned = cleanup_abs_path(path)?;
    if cleaned == "/" {
        return Err(FsError::Invalid("cannot take the parent of /".into()));
    }

    let splits: Vec<&str> = cleaned[1..].split('/').collect();
    let parent = format!("/{}", splits[..splits.len() - 1].join("/"));
    let leaf = splits[splits.len() - 1].to_string();
    Ok((parent, leaf))
}

/// Split a normalized absolute path into its segments. `/` yields none.
pub fn segments(cleaned: &str) -> Vec<&str> {
    if cleaned == "/" {
        Vec::new()
    } else {
        cleaned[1..].split('/').collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::error::FsErrorKind;

    #[test]
    fn cleanup_collapses_dots_and_slashes() {
        assert_eq!(cleanup_abs_path("/a/b/c").unwrap(), "/a/b/c");
        assert_eq!(cleanup_abs_path("/a//b/./c/").unwrap(), "/a/b/c");
        assert_eq!(cleanup_abs_path("/a/b/../c").unwrap(), "/a/c");
        assert_eq!(cleanup_abs_path("/").unwrap(), "/");
        assert_eq!(cleanup_abs_path("/a/..").unwrap(), "/");
    }

    #[test]
    fn cleanup_rejects_bad_input() {
        assert_eq!(cleanup_abs_path("").unwrap_err().kind(), FsErrorKind::Invalid);
        assert_eq!(cleanup_abs_path("a/b").unwrap_err().kind(), FsErrorKind::Invalid);
        assert_eq!(cleanup_abs_path("/..").unwrap_err().kind(), FsErrorKind::Invalid);
        assert_eq!(cleanup_abs_path("/a/../..").unwrap_err().kind(), FsErrorKind::Invalid);
    }

    #[test]
    fn cleanup_is_idempotent() {
        for p in ["/a/b/../c", "/x//y/.", "/", "/home/alice/.."] {
            let once = cleanup_abs_path(p).unwrap();
            assert_eq!(cleanup_abs_path(&once).unwrap(), once);
        }
    }

    #[test]
    fn abs_path_resolves_relative_against_cwd() {
        assert_eq!(abs_path("/home/alice", "notes.txt").unwrap(), "/home/alice/notes.txt");
        assert_eq!(abs_path("/home/alice", "../bob").unwrap(), "/home/bob");
        assert_eq!(abs_path("/home/alice", "/etc").unwrap(), "/etc");
        assert!(abs_path("/home/alice", "").is_err());
    }

    #[test]
    fn dir_up_splits_parent_and_leaf() {
        assert_eq!(dir_up("/a/b/c").unwrap(), ("/a/b".into(), "c".into()));
        assert_eq!(dir_up("/a").unwrap(), ("/".into(), "a".into()));
        assert!(dir_up("/").is_err());
    }
}

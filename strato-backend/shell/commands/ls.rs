use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::shell::flags::{FlagValue, OptionDescriptor, parse_args};
use crate::vfs::path;
use crate::vfs::types::{EntryKind, EntryPermissions, FsEntry};

use super::{Command, CommandContext, yaml_crlf};

const ANSI_BLUE: &str = "\x1b[34m";
const ANSI_RESET: &str = "\x1b[0m";

#[derive(Serialize)]
struct LsRecord {
    name: String,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    permissions: Option<EntryPermissions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    modified_time: Option<DateTime<Utc>>,
}

/// List directory entries. Plain output prints one name per line with
/// directories in ANSI blue; `-y` switches to YAML records, and `-l` adds
/// permissions, counts, sizes, and modification times to them.
pub struct CmdLs;

#[async_trait]
impl Command for CmdLs {
    fn identifier(&self) -> &'static str {
        "ls"
    }

    async fn run(&self, ctx: &mut CommandContext) -> i32 {
        let options = [
            OptionDescriptor {
                identifier: "long",
                aliases: &["l"],
                default: FlagValue::Bool(false),
            },
            OptionDescriptor {
                identifier: "yaml",
                aliases: &["y"],
                default: FlagValue::Bool(false),
            },
        ];
        let (vals, rest) = match parse_args(&options, &ctx.args[1..]) {
            Ok(parsed) => parsed,
            Err(msg) => return ctx.fail(&msg).await,
        };
        let long = vals["long"].as_bool();
        let yaml = vals["yaml"].as_bool();

        let cwd = ctx.cwd();
        let tags = ctx.tags();
        let paths = if rest.is_empty() {
            vec![".".to_string()]
        } else {
            rest
        };
        let multiple = paths.len() > 1;

        let mut had_success = false;
        for raw_path in &paths {
            if multiple {
                let _ = ctx.stderr.write_str(&format!("{raw_path}:\r\n")).await;
            }

            let abs = match path::abs_path(&cwd, raw_path) {
                Ok(p) => p,
                Err(err) => {
                    let _ = ctx
                        .stderr
                        .write_str(&format!("error: invalid path: {err}\r\n\r\n"))
                        .await;
                    continue;
                }
            };

            let entry = match ctx.store.lookup(Some(&tags), &abs).await {
                Ok(e) => e,
                Err(err) => {
                    let _ = ctx
                        .stderr
                        .write_str(&format!("error looking up directory: {err}\r\n\r\n"))
                        .await;
                    continue;
                }
            };

            match list_entry(&mut *ctx, &abs, &entry, yaml, long).await {
                Ok(()) => had_success = true,
                Err(msg) => {
                    let _ = ctx.stderr.write_str(&format!("error: {msg}\r\n\r\n")).await;
                }
            }
        }

        if had_success { 0 } else { 1 }
    }
}

async fn list_entry(
    ctx: &mut CommandContext,
    abs: &str,
    entry: &FsEntry,
    yaml: bool,
    long: bool,
) -> Result<(), String> {
    // a file lists as itself
    let children: Vec<(String, FsEntry)> = if entry.is_dir() {
        let mut out = Vec::with_capacity(entry.entries.len());
        for reference in &entry.entries {
            if let Some(child) = ctx
                .store
                .get_entry(reference.ref_id)
                .await
                .map_err(|e| e.to_string())?
            {
                out.push((reference.name.clone(), child));
            }
        }
        out
    } else {
        let (_, leaf) = path::dir_up(abs).map_err(|e| e.to_string())?;
        vec![(leaf, entry.clone())]
    };

    if !yaml {
        for (name, child) in &children {
            let line = if child.is_dir() {
                format!("{ANSI_BLUE}{name}{ANSI_RESET}\r\n")
            } else {
                format!("{name}\r\n")
            };
            ctx.stdout.write_str(&line).await.map_err(|e| e.to_string())?;
        }
        return Ok(());
    }

    let mut records = Vec::with_capacity(children.len());
    for (name, child) in children {
        let kind = match child.kind {
            EntryKind::File => "file",
            EntryKind::Directory => "directory",
        };
        let mut record = LsRecord {
            name,
            kind,
            permissions: None,
            file_count: None,
            file_size: None,
            modified_time: None,
        };
        if long {
            record.permissions = Some(child.permissions.clone());
            record.modified_time = Some(child.timestamps.modified_at);
            match child.kind {
                EntryKind::Directory => record.file_count = Some(child.entries.len()),
                EntryKind::File => {
                    record.file_size = Some(match child.file_ref {
                        None => 0,
                        Some(id) => ctx
                            .store
                            .blobs()
                            .size(id)
                            .await
                            .map_err(|e| e.to_string())?,
                    });
                }
            }
        }
        records.push(record);
    }

    let yaml_out = yaml_crlf(&records)?;
    ctx.stdout
        .write_str(&yaml_out)
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::super::testutil::Harness;
    use super::*;

    async fn seed(harness: &Harness) {
        let root = harness.store.lookup(None, "/").await.unwrap();
        let docs = harness
            .store
            .write_directory(None, root.id, "docs", None)
            .await
            .unwrap();
        let blob = harness.store.write_blob(b"12345").await.unwrap();
        harness
            .store
            .write_file(None, docs.id, "notes.txt", Some(blob))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn plain_listing_colors_directories() {
        let harness = Harness::new().await;
        seed(&harness).await;
        let auth = harness.auth("alice", &["sysadmin"]);
        let listener = harness.events.subscribe();
        let mut ctx = harness.context(&auth, &["ls", "/"], &[("PWD", "/")]);

        assert_eq!(CmdLs.run(&mut ctx).await, 0);
        let (stdout, _) = Harness::drain(listener);
        assert!(stdout.contains("\x1b[34mdocs\x1b[0m\r\n"), "got {stdout:?}");
    }

    #[tokio::test]
    async fn yaml_long_listing_has_metadata() {
        let harness = Harness::new().await;
        seed(&harness).await;
        let auth = harness.auth("alice", &["sysadmin"]);
        let listener = harness.events.subscribe();
        let mut ctx = harness.context(&auth, &["ls", "-ly", "/docs"], &[("PWD", "/")]);

        assert_eq!(CmdLs.run(&mut ctx).await, 0);
        let (stdout, _) = Harness::drain(listener);
        assert!(stdout.contains("name: notes.txt"));
        assert!(stdout.contains("type: file"));
        assert!(stdout.contains("file_size: 5"));
        assert!(stdout.contains("read_tags"));
    }

    #[tokio::test]
    async fn default_path_is_the_cwd() {
        let harness = Harness::new().await;
        seed(&harness).await;
        let auth = harness.auth("alice", &["sysadmin"]);
        let listener = harness.events.subscribe();
        let mut ctx = harness.context(&auth, &["ls"], &[("PWD", "/docs")]);

        assert_eq!(CmdLs.run(&mut ctx).await, 0);
        let (stdout, _) = Harness::drain(listener);
        assert!(stdout.contains("notes.txt"));
    }

    #[tokio::test]
    async fn missing_path_fails_with_message() {
        let harness = Harness::new().await;
        let auth = harness.auth("alice", &["sysadmin"]);
        let listener = harness.events.subscribe();
        let mut ctx = harness.context(&auth, &["ls", "/nope"], &[("PWD", "/")]);

        assert_eq!(CmdLs.run(&mut ctx).await, 1);
        let (_, stderr) = Harness::drain(listener);
        assert!(stderr.contains("error looking up directory"));
    }

    #[tokio::test]
    async fn file_path_lists_the_file_itself() {
        let harness = Harness::new().await;
        seed(&harness).await;
        let auth = harness.auth("alice", &["sysadmin"]);
        let listener = harness.events.subscribe();
        let mut ctx = harness.context(&auth, &["ls", "/docs/notes.txt"], &[("PWD", "/")]);

        assert_eq!(CmdLs.run(&mut ctx).await, 0);
        let (stdout, _) = Harness::drain(listener);
        assert_eq!(stdout, "notes.txt\r\n");
    }
}

use async_trait::async_trait;

use crate::auth::session::{session_file_path, sysadmin_tags};
use crate::vfs::FsErrorKind;

use super::{Command, CommandContext};

/// End the caller's session by removing its file under `/etc/sess`. An
/// already-absent file counts as success.
pub struct CmdLogout;

#[async_trait]
impl Command for CmdLogout {
    fn identifier(&self) -> &'static str {
        "logout"
    }

    async fn run(&self, ctx: &mut CommandContext) -> i32 {
        let sess_path = match session_file_path(&ctx.auth.sess_id) {
            Ok(p) => p,
            Err(err) => {
                tracing::warn!(error = %err, "logout with malformed session id");
                return ctx.fail("failed to remove session").await;
            }
        };

        match ctx
            .store
            .remove_file(Some(&sysadmin_tags()), &sess_path, false, false)
            .await
        {
            Ok(_) => 0,
            Err(err) if err.kind() == FsErrorKind::NotExist => 0,
            Err(err) => {
                tracing::warn!(error = %err, "failed to remove session file");
                ctx.fail("failed to remove session").await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::Harness;
    use super::*;
    use crate::auth::session::create_session;

    #[tokio::test]
    async fn removes_the_session_file() {
        let harness = Harness::new().await;
        let sess_id = create_session(&harness.store, "alice").await.unwrap();
        let mut auth = harness.auth("alice", &["pilot"]);
        auth.sess_id = sess_id.clone();

        let mut ctx = harness.context(&auth, &["logout"], &[]);
        assert_eq!(CmdLogout.run(&mut ctx).await, 0);
        assert!(
            harness
                .store
                .lookup(None, &format!("/etc/sess/{sess_id}.sess"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn absent_session_file_is_success() {
        let harness = Harness::new().await;
        let auth = harness.auth("alice", &["pilot"]);
        let mut ctx = harness.context(&auth, &["logout"], &[]);
        assert_eq!(CmdLogout.run(&mut ctx).await, 0);
    }
}

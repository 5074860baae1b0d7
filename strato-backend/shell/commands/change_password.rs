use async_trait::async_trait;

use crate::auth::credentials::{check_pwd, hash_pwd};
use crate::auth::session::{load_credentials, store_credentials};

use super::{Command, CommandContext};

/// `change-password OLD NEW` — verify the old password against the login
/// file and rewrite it with the new hash.
pub struct CmdChangePassword;

#[async_trait]
impl Command for CmdChangePassword {
    fn identifier(&self) -> &'static str {
        "change-password"
    }

    async fn run(&self, ctx: &mut CommandContext) -> i32 {
        if ctx.args.len() != 3 {
            return ctx
                .fail("usage: change-password <old_password> <new_password>")
                .await;
        }
        let old_password = ctx.args[1].clone();
        let new_password = ctx.args[2].clone();

        let mut credentials = match load_credentials(&ctx.store, &ctx.auth.username).await {
            Ok(c) => c,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read login file");
                return ctx.fail("failed to get current user's credentials").await;
            }
        };

        if !check_pwd(&credentials.password, &old_password) {
            return ctx.fail("incorrect password").await;
        }

        credentials.password = match hash_pwd(&new_password) {
            Ok(h) => h,
            Err(_) => return ctx.fail("failed to hash pwd").await,
        };

        match store_credentials(&ctx.store, &ctx.auth.username, &credentials).await {
            Ok(()) => 0,
            Err(err) => {
                tracing::warn!(error = %err, "failed to rewrite login file");
                ctx.fail("failed to generate new login file").await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::Harness;
    use super::*;
    use crate::auth::credentials::CredentialsEntry;

    #[tokio::test]
    async fn rotates_the_password() {
        let harness = Harness::new().await;
        let auth = harness.auth("alice", &["pilot"]);
        store_credentials(
            &harness.store,
            "alice",
            &CredentialsEntry {
                password: hash_pwd("old-pw").unwrap(),
                tags: vec!["pilot".into()],
            },
        )
        .await
        .unwrap();

        let mut ctx = harness.context(&auth, &["change-password", "old-pw", "new-pw"], &[]);
        assert_eq!(CmdChangePassword.run(&mut ctx).await, 0);

        let stored = load_credentials(&harness.store, "alice").await.unwrap();
        assert!(check_pwd(&stored.password, "new-pw"));
        assert!(!check_pwd(&stored.password, "old-pw"));
        assert_eq!(stored.tags, vec!["pilot".to_string()], "tags survive");
    }

    #[tokio::test]
    async fn wrong_old_password_is_rejected() {
        let harness = Harness::new().await;
        let auth = harness.auth("alice", &["pilot"]);
        store_credentials(
            &harness.store,
            "alice",
            &CredentialsEntry {
                password: hash_pwd("right").unwrap(),
                tags: vec![],
            },
        )
        .await
        .unwrap();

        let mut ctx = harness.context(&auth, &["change-password", "wrong", "new"], &[]);
        assert_eq!(CmdChangePassword.run(&mut ctx).await, 1);

        let stored = load_credentials(&harness.store, "alice").await.unwrap();
        assert!(check_pwd(&stored.password, "right"));
    }

    #[tokio::test]
    async fn usage_errors() {
        let harness = Harness::new().await;
        let auth = harness.auth("alice", &[]);
        let mut ctx = harness.context(&auth, &["change-password", "only-one"], &[]);
        assert_eq!(CmdChangePassword.run(&mut ctx).await, 1);
    }
}

use async_trait::async_trait;

use super::{Command, CommandContext, yaml_crlf};

/// Print the caller's authorization record and their `user.profile` as two
/// YAML sections.
pub struct CmdWhoami;

#[async_trait]
impl Command for CmdWhoami {
    fn identifier(&self) -> &'static str {
        "whoami"
    }

    async fn run(&self, ctx: &mut CommandContext) -> i32 {
        let auth_yaml = match yaml_crlf(&ctx.auth) {
            Ok(y) => y,
            Err(err) => {
                return ctx
                    .fail(&format!("error: couldn't marshal auth status: {err}"))
                    .await;
            }
        };
        let _ = ctx
            .stdout
            .write_str(&format!("# AuthStatus\r\n{auth_yaml}"))
            .await;

        let tags = ctx.tags();
        let profile_path = format!("/home/{}/user.profile", ctx.auth.username);
        match ctx.store.lookup_read_all(Some(&tags), &profile_path).await {
            Ok(bytes) => {
                let _ = ctx
                    .stdout
                    .write_str(&format!(
                        "\r\n# user.profile\r\n{}",
                        String::from_utf8_lossy(&bytes)
                    ))
                    .await;
            }
            Err(err) => {
                let _ = ctx
                    .stderr
                    .write_str(&format!("error: couldn't read profile file: {err}"))
                    .await;
            }
        }
        0
    }
}

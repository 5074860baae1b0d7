use async_trait::async_trait;

use super::{Command, CommandContext, yaml_crlf};

/// Dump the server-side status of every client on the caller's own socket
/// session as YAML.
pub struct CmdClients;

#[async_trait]
impl Command for CmdClients {
    fn identifier(&self) -> &'static str {
        "clients"
    }

    async fn run(&self, ctx: &mut CommandContext) -> i32 {
        let Some(session) = ctx.session.clone() else {
            return ctx.fail("error: no socket session attached").await;
        };

        let statuses = session.client_statuses();
        match yaml_crlf(&statuses) {
            Ok(yaml) => {
                let _ = ctx.stdout.write_str(&yaml).await;
                0
            }
            Err(err) => ctx.fail(&format!("error: {err}")).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::testutil::Harness;
    use super::*;
    use crate::session::tracking::SessionRegistry;

    #[tokio::test]
    async fn lists_clients_on_the_session() {
        let harness = Harness::new().await;
        let auth = harness.auth("alice", &["pilot"]);
        let registry = Arc::new(SessionRegistry::new());
        let record = registry.attach("sock1", auth.clone());
        record.client_connected("c1");
        record.command_running("c1", "heartbeat -d 50");

        let listener = harness.events.subscribe();
        let mut ctx = harness.context(&auth, &["clients"], &[]);
        ctx.session = Some(record);

        assert_eq!(CmdClients.run(&mut ctx).await, 0);
        let (stdout, _) = Harness::drain(listener);
        assert!(stdout.contains("client_id: c1"));
        assert!(stdout.contains("command: heartbeat -d 50"));
    }

    #[tokio::test]
    async fn fails_without_a_session() {
        let harness = Harness::new().await;
        let auth = harness.auth("alice", &[]);
        let mut ctx = harness.context(&auth, &["clients"], &[]);
        assert_eq!(CmdClients.run(&mut ctx).await, 1);
    }
}

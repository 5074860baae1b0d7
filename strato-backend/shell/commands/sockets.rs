use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Command, CommandContext, yaml_crlf};

#[derive(Serialize)]
struct SocketRecord {
    socket_id: String,
    username: String,
    client_count: usize,
    connect_timestamp: DateTime<Utc>,
}

/// List every live socket session on the server. Restricted to holders of
/// the `sysadmin` tag.
pub struct CmdSockets;

#[async_trait]
impl Command for CmdSockets {
    fn identifier(&self) -> &'static str {
        "sockets"
    }

    async fn run(&self, ctx: &mut CommandContext) -> i32 {
        if !ctx.auth.tags.iter().any(|t| t == "sysadmin") {
            return ctx.fail("error: sockets requires the sysadmin tag").await;
        }

        let mut records = Vec::new();
        ctx.registry.each(|session| {
            let mut client_count = 0;
            session.each(|_| {
                client_count += 1;
                true
            });
            records.push(SocketRecord {
                socket_id: session.socket_id().to_string(),
                username: session.auth().username.clone(),
                client_count,
                connect_timestamp: session.connect_timestamp(),
            });
            true
        });
        records.sort_by(|a, b| a.socket_id.cmp(&b.socket_id));

        match yaml_crlf(&records) {
            Ok(yaml) => {
                let _ = ctx.stdout.write_str(&yaml).await;
                0
            }
            Err(err) => ctx.fail(&format!("error: {err}")).await,
        }
    }
}

mod cat;
mod change_password;
mod chmod;
mod clients;
mod copy;
mod echo;
mod encode;
mod error;
mod heartbeat;
mod help;
mod logout;
mod ls;
mod mkdir;
mod mv;
mod navigate;
mod random;
mod rm;
mod sockets;
mod tee;
mod whoami;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthStatus;
use crate::session::tracking::{SessionRecord, SessionRegistry};
use crate::shell::io::{EnvMap, InputStream, OutputStream};
use crate::vfs::FsStore;

/// Exit status reported when a command was cut short by an interrupt.
pub const EXIT_INTERRUPT: i32 = 130;

/// Everything one pipeline stage sees: expanded args, bound stdio, the
/// shared environment, the caller's authorization, and a cancellation
/// token it must poll at I/O boundaries.
pub struct CommandContext {
    pub args: Vec<String>,
    pub stdin: InputStream,
    pub stdout: OutputStream,
    pub stderr: OutputStream,
    pub env: EnvMap,
    pub auth: AuthStatus,
    pub store: FsStore,
    pub session: Option<Arc<SessionRecord>>,
    pub registry: Arc<SessionRegistry>,
    pub cancel: CancellationToken,
}

impl CommandContext {
    pub fn cwd(&self) -> String {
        self.env.get("PWD").unwrap_or_else(|| "/".to_string())
    }

    pub fn tags(&self) -> Vec<String> {
        self.auth.tags.clone()
    }

    /// Write a message to stderr and return exit code 1.
    pub async fn fail(&mut self, msg: &str) -> i32 {
        let _ = self.stderr.write_str(msg).await;
        1
    }
}

#[async_trait]
pub trait Command: Send + Sync {
    fn identifier(&self) -> &'static str;

    async fn run(&self, ctx: &mut CommandContext) -> i32;
}

/// The builtin registry, keyed by identifier.
#[derive(Default)]
pub struct CommandSet {
    commands: HashMap<&'static str, Arc<dyn Command>>,
}

impl CommandSet {
    pub fn register(&mut self, command: Arc<dyn Command>) {
        self.commands.insert(command.identifier(), command);
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<dyn Command>> {
        self.commands.get(identifier).cloned()
    }
}

/// The full builtin set served to every client.
pub fn init_commands() -> CommandSet {
    let mut set = CommandSet::default();
    set.register(Arc::new(echo::CmdEcho));
    set.register(Arc::new(error::CmdError));
    set.register(Arc::new(cat::CmdCat));
    set.register(Arc::new(ls::CmdLs));
    set.register(Arc::new(mkdir::CmdMkdir));
    set.register(Arc::new(tee::CmdTee));
    set.register(Arc::new(mv::CmdMv));
    set.register(Arc::new(copy::CmdCopy));
    set.register(Arc::new(rm::CmdRm));
    set.register(Arc::new(chmod::CmdChmod));
    set.register(Arc::new(navigate::CmdCd));
    set.register(Arc::new(whoami::CmdWhoami));
    set.register(Arc::new(clients::CmdClients));
    set.register(Arc::new(sockets::CmdSockets));
    set.register(Arc::new(help::CmdHelp));
    set.register(Arc::new(heartbeat::CmdHeartbeat));
    set.register(Arc::new(encode::CmdBase64));
    set.register(Arc::new(encode::CmdHex));
    set.register(Arc::new(random::CmdCryptoRand));
    set.register(Arc::new(change_password::CmdChangePassword));
    set.register(Arc::new(logout::CmdLogout));
    set
}

/// Serialize to YAML with CRLF line endings, the convention for all
/// structured builtin output.
pub fn yaml_crlf<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_yaml::to_string(value)
        .map(|s| s.replace('\n', "\r\n"))
        .map_err(|e| e.to_string())
}

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::AuthStatus;

/// Lines of per-client log kept in memory per session.
pub const LOG_RING_CAPACITY: usize = 256;

/// The command a client is running (or last ran), with accumulated stdio
/// for inspection via the `clients` builtin.
#[derive(Debug, Clone, Serialize)]
pub struct CommandStatus {
    pub command: String,
    pub input: String,
    pub output: String,
    pub error: String,
    pub run_timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_timestamp: Option<DateTime<Utc>>,
    pub command_result: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    pub client_id: String,
    pub connect_timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_status: Option<CommandStatus>,
}

/// Live bookkeeping for one socket session: per-client statuses and a ring
/// buffer of log lines. Reads take the read lock (`each`, status dumps);
/// connect/disconnect take write.
pub struct SessionRecord {
    socket_id: String,
    auth: AuthStatus,
    connect_timestamp: DateTime<Utc>,
    clients: RwLock<HashMap<String, ClientStatus>>,
    logs: RwLock<HashMap<String, VecDeque<String>>>,
}

impl SessionRecord {
    fn new(socket_id: String, auth: AuthStatus) -> Self {
        SessionRecord {
            socket_id,
            auth,
            connect_timestamp: Utc::now(),
            clients: RwLock::new(HashMap::new()),
            logs: RwLock::new(HashMap::new()),
        }
    }

    pub fn socket_id(&self) -> &str {
        &self.socket_id
    }

    pub fn auth(&self) -> &AuthStatus {
        &self.auth
    }

    pub fn connect_timestamp(&self) -> DateTime<Utc> {
        self.connect_timestamp
    }

    pub fn client_connected(&self, client_id: &str) {
        let mut clients = self.clients.write().unwrap();
        clients.insert(
            client_id.to_string(),
            ClientStatus {
                client_id: client_id.to_string(),
                connect_timestamp: Utc::now(),
                command_status: None,
            },
        );
    }

    pub fn client_disconnected(&self, client_id: &str) {
        self.clients.write().unwrap().remove(client_id);
        self.logs.write().unwrap().remove(client_id);
    }

    pub fn command_running(&self, client_id: &str, command: &str) {
        let mut clients = self.clients.write().unwrap();
        if let Some(client) = clients.get_mut(client_id) {
            client.command_status = Some(CommandStatus {
                command: command.to_string(),
                input: String::new(),
                output: String::new(),
                error: String::new(),
                run_timestamp: Utc::now(),
                finish_timestamp: None,
                command_result: 0,
            });
        }
    }

    pub fn command_finished(&self, client_id: &str, result: i32) {
        let mut clients = self.clients.write().unwrap();
        if let Some(status) = clients
            .get_mut(client_id)
            .and_then(|c| c.command_status.as_mut())
        {
            status.command_result = result;
            status.finish_timestamp = Some(Utc::now());
        }
    }

    fn append_stream(&self, client_id: &str, pick: impl Fn(&mut CommandStatus) -> &mut String, text: &str) {
        let mut clients = self.clients.write().unwrap();
        if let Some(status) = clients
            .get_mut(client_id)
            .and_then(|c| c.command_status.as_mut())
        {
            pick(status).push_str(text);
        }
    }

    pub fn stdin_chunk(&self, client_id: &str, text: &str) {
        self.append_stream(client_id, |s| &mut s.input, text);
    }

    pub fn stdout_chunk(&self, client_id: &str, text: &str) {
        self.append_stream(client_id, |s| &mut s.output, text);
    }

    pub fn stderr_chunk(&self, client_id: &str, text: &str) {
        self.append_stream(client_id, |s| &mut s.error, text);
    }

    /// Append a log line for a client, evicting the oldest past capacity.
    pub fn log_line(&self, client_id: &str, line: String) {
        let mut logs = self.logs.write().unwrap();
        let ring = logs.entry(client_id.to_string()).or_default();
        if ring.len() >= LOG_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(line);
    }

    pub fn logs(&self, client_id: &str) -> Vec<String> {
        let logs = self.logs.read().unwrap();
        logs.get(client_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn each(&self, mut f: impl FnMut(&ClientStatus) -> bool) {
        let clients = self.clients.read().unwrap();
        for status in clients.values() {
            if !f(status) {
                break;
            }
        }
    }

    /// Snapshot of every client, ordered by client id for stable output.
    pub fn client_statuses(&self) -> Vec<ClientStatus> {
        let clients = self.clients.read().unwrap();
        let mut statuses: Vec<ClientStatus> = clients.values().cloned().collect();
        statuses.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        statuses
    }
}

/// Process-wide registry of live socket sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionRecord>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, socket_id: &str, auth: AuthStatus) -> Arc<SessionRecord> {
        let record = Arc::new(SessionRecord::new(socket_id.to_string(), auth));
        self.sessions
            .write()
            .unwrap()
            .insert(socket_id.to_string(), record.clone());
        record
    }

    pub fn detach(&self, socket_id: &str) -> Option<Arc<SessionRecord>> {
        self.sessions.write().unwrap().remove(socket_id)
    }

    pub fn each(&self, mut f: impl FnMut(&Arc<SessionRecord>) -> bool) {
        let sessions = self.sessions.read().unwrap();
        for record in sessions.values() {
            if !f(record) {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> AuthStatus {
        AuthStatus {
            username: "alice".into(),
            tags: vec!["pilot".into()],
            sess_id: "s1".into(),
        }
    }

    #[test]
    fn command_lifecycle_accumulates_stdio() {
        let record = SessionRecord::new("sock1".into(), auth());
        record.client_connected("c1");
        record.command_running("c1", "cat");
        record.stdin_chunk("c1", "in");
        record.stdout_chunk("c1", "out1");
        record.stdout_chunk("c1", "out2");
        record.stderr_chunk("c1", "err");
        record.command_finished("c1", 0);

        let statuses = record.client_statuses();
        assert_eq!(statuses.len(), 1);
        let status = statuses[0].command_status.as_ref().unwrap();
        assert_eq!(status.command, "cat");
        assert_eq!(status.input, "in");
        assert_eq!(status.output, "out1out2");
        assert_eq!(status.error, "err");
        assert_eq!(status.command_result, 0);
        assert!(status.finish_timestamp.is_some());
    }

    #[test]
    fn stdio_for_unknown_client_is_dropped() {
        let record = SessionRecord::new("sock1".into(), auth());
        record.stdout_chunk("ghost", "ignored");
        assert!(record.client_statuses().is_empty());
    }

    #[test]
    fn disconnect_removes_client_and_logs() {
        let record = SessionRecord::new("sock1".into(), auth());
        record.client_connected("c1");
        record.log_line("c1", "hello".into());
        record.client_disconnected("c1");
        assert!(record.client_statuses().is_empty());
        assert!(record.logs("c1").is_empty());
    }

    #[test]
    fn log_ring_evicts_oldest() {
        let record = SessionRecord::new("sock1".into(), auth());
        record.client_connected("c1");
        for i in 0..(LOG_RING_CAPACITY + 10) {
            record.log_line("c1", format!("line {i}"));
        }
        let logs = record.logs("c1");
        assert_eq!(logs.len(), LOG_RING_CAPACITY);
        assert_eq!(logs[0], "line 10");
    }

    #[test]
    fn registry_attach_detach_and_each() {
        let registry = SessionRegistry::new();
        registry.attach("a", auth());
        registry.attach("b", auth());
        assert_eq!(registry.len(), 2);

        let mut seen = 0;
        registry.each(|_| {
            seen += 1;
            true
        });
        assert_eq!(seen, 2);

        assert!(registry.detach("a").is_some());
        assert!(registry.detach("a").is_none());
        assert_eq!(registry.len(), 1);
    }
}

use super::{
    decode_output, CommandOutput, ConnectionTarget, Connector, FileTransfer, RemoteError, RemoteShell,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct ScriptedShell {
    host: String,
    responses: HashMap<String, String>,
    existing_files: Vec<String>,
    pub log: Arc<Mutex<Vec<String>>>,
    pub closed: Arc<Mutex<bool>>,
}

impl ScriptedShell {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            ..Self::default()
        }
    }

    pub fn respond(mut self, command: &str, stdout: &str) -> Self {
        self.responses.insert(command.to_string(), stdout.to_string());
        self
    }

    // Raw console bytes, decoded the way the ssh transport decodes them.
    pub fn respond_bytes(mut self, command: &str, stdout: &[u8]) -> Self {
        self.responses
            .insert(command.to_string(), decode_output(stdout));
        self
    }

    pub fn with_file(mut self, remote: &str) -> Self {
        self.existing_files.push(remote.to_string());
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn was_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

#[async_trait]
impl RemoteShell for ScriptedShell {
    fn host(&self) -> &str {
        &self.host
    }

    async fn exec(&mut self, command: &str) -> Result<CommandOutput, RemoteError> {
        self.log.lock().unwrap().push(command.to_string());
        match self.responses.get(command) {
            Some(stdout) => Ok(CommandOutput {
                stdout: stdout.clone(),
                stderr: String::new(),
                exit_status: Some(0),
            }),
            None => Err(RemoteError::CommandTimeout {
                command: command.to_string(),
                timeout_ms: 5_000,
            }),
        }
    }

    async fn fetch_files(&mut self, transfers: &[FileTransfer]) -> Result<usize, RemoteError> {
        let mut copied = 0;
        for transfer in transfers {
            self.log
                .lock()
                .unwrap()
                .push(format!("fetch {}", transfer.remote));
            if self.existing_files.contains(&transfer.remote) {
                copied += 1;
            }
        }
        Ok(copied)
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

// Hosts without a script are unreachable.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    shells: HashMap<String, ScriptedShell>,
    pub attempts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConnector {
    pub fn with_shell(mut self, shell: ScriptedShell) -> Self {
        self.shells.insert(shell.host.clone(), shell);
        self
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Shell = ScriptedShell;

    async fn connect(&self, target: &ConnectionTarget) -> Result<ScriptedShell, RemoteError> {
        self.attempts.lock().unwrap().push(target.host.clone());
        self.shells
            .get(&target.host)
            .cloned()
            .ok_or_else(|| RemoteError::ConnectTimeout {
                host: target.host.clone(),
            })
    }
}

/*!
Scripted command gateway for tests without NVMe hardware

Replays canned output keyed by the full command line and records every
command issued, so tests can assert on what the engine asked for.
Unscripted commands fail with status 1 and empty output.
*/

use nvme_scan::gateway::{CommandGateway, CommandOutput, STATUS_TRANSPORT};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct ScriptedGateway {
    host: String,
    remote: bool,
    responses: Arc<Mutex<HashMap<String, CommandOutput>>>,
    issued: Arc<Mutex<Vec<String>>>,
}

impl ScriptedGateway {
    pub fn new<S: Into<String>>(host: S) -> Self {
        Self {
            host: host.into(),
            remote: false,
            responses: Arc::new(Mutex::new(HashMap::new())),
            issued: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Report itself as a remote gateway
    pub fn remote(mut self) -> Self {
        self.remote = true;
        self
    }

    /// Script the reply to `command` (tokens joined by single spaces)
    pub fn on<S: Into<String>>(&self, command: S, output: CommandOutput) -> &Self {
        self.responses.lock().unwrap().insert(command.into(), output);
        self
    }

    pub fn on_ok<S: Into<String>, O: Into<String>>(&self, command: S, stdout: O) -> &Self {
        self.on(command, CommandOutput::ok(stdout))
    }

    pub fn on_fail<S: Into<String>>(&self, command: S) -> &Self {
        self.on(command, CommandOutput::failed(""))
    }

    /// Forget every scripted reply, keeping the issued-command record
    pub fn clear_script(&self) {
        self.responses.lock().unwrap().clear();
    }

    /// Drop a scripted reply so the command falls back to failing
    pub fn forget(&self, command: &str) -> Option<CommandOutput> {
        self.responses.lock().unwrap().remove(command)
    }

    /// Every command line issued so far, in order
    pub fn issued(&self) -> Vec<String> {
        self.issued.lock().unwrap().clone()
    }

    pub fn issued_matching(&self, prefix: &str) -> Vec<String> {
        self.issued
            .lock()
            .unwrap()
            .iter()
            .filter(|cmd| cmd.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn clear_issued(&self) {
        self.issued.lock().unwrap().clear();
    }
}

impl CommandGateway for ScriptedGateway {
    async fn execute(&self, tokens: &[&str], _cwd: Option<&Path>) -> CommandOutput {
        if tokens.is_empty() {
            return CommandOutput::new(STATUS_TRANSPORT, "empty command");
        }
        let command = tokens.join(" ");
        self.issued.lock().unwrap().push(command.clone());

        let reply = self.responses.lock().unwrap().get(&command).cloned();
        match reply {
            Some(output) => output,
            None => {
                tracing::debug!("[SCRIPTED] no reply for {}", command);
                CommandOutput::failed("")
            }
        }
    }

    fn is_remote(&self) -> bool {
        self.remote
    }

    fn host_label(&self) -> String {
        self.host.clone()
    }
}

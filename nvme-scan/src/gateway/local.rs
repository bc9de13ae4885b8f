use super::{CommandGateway, CommandOutput, STATUS_TRANSPORT};
use crate::logging::SharedLogger;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, Level};

/// Runs commands as child processes of this host
pub struct LocalGateway {
    logger: SharedLogger,
}

impl LocalGateway {
    pub fn new(logger: SharedLogger) -> Self {
        Self { logger }
    }
}

impl CommandGateway for LocalGateway {
    async fn execute(&self, tokens: &[&str], cwd: Option<&Path>) -> CommandOutput {
        let command_line = tokens.join(" ");
        let Some((program, args)) = tokens.split_first() else {
            self.logger.log(Level::ERROR, "(EXCEPTION) failure executing empty command");
            return CommandOutput::new(STATUS_TRANSPORT, "empty command");
        };

        debug!("Executing local command: {}", command_line);

        let mut command = AsyncCommand::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        match command.output().await {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                // Killed by a signal: no exit code
                let status = output.status.code().unwrap_or(-1);
                if status != 0 {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    self.logger.log(
                        Level::ERROR,
                        &format!("failure executing {}, returned:\n{}", command_line, stderr),
                    );
                }
                CommandOutput::new(status, stdout)
            }
            Err(e) => {
                self.logger.log(
                    Level::ERROR,
                    &format!("(EXCEPTION) failure executing {}, returned:\n{}", command_line, e),
                );
                CommandOutput::new(STATUS_TRANSPORT, e.to_string())
            }
        }
    }

    fn is_remote(&self) -> bool {
        false
    }

    fn host_label(&self) -> String {
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "localhost".to_string())
    }
}

//! Command gateway: run a tool locally or over a remote shell
//!
//! Two strategies sit behind one contract:
//! - `LocalGateway` spawns a child process on this host
//! - `RemoteGateway` sends the joined command line over one remote session
//!
//! The strategy is chosen when the gateway is built and never changes.
//! Callers always get a `CommandOutput` back; failures are logged through
//! the injected `ScanLogger` and surfaced as a non-zero status.

mod local;
mod remote;
#[cfg(feature = "ssh")]
mod ssh;

pub use local::LocalGateway;
pub use remote::{RemoteGateway, RemoteLogin, RemoteReply, RemoteSession};
#[cfg(feature = "ssh")]
pub use ssh::SshSession;

use std::path::Path;

/// Command ran and exited cleanly
pub const STATUS_OK: i32 = 0;
/// Command failed, or no remote session to run it on
pub const STATUS_FAILED: i32 = 1;
/// Command could not be started, or the remote channel broke
pub const STATUS_TRANSPORT: i32 = 2;

/// Status code and captured standard output of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub output: String,
}

impl CommandOutput {
    pub fn new(status: i32, output: impl Into<String>) -> Self {
        Self {
            status,
            output: output.into(),
        }
    }

    pub fn ok(output: impl Into<String>) -> Self {
        Self::new(STATUS_OK, output)
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self::new(STATUS_FAILED, output)
    }

    pub fn success(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Executes external commands on behalf of the topology engine
///
/// Implementations never panic or return errors for a failed command.
/// There is no timeout at this layer: a hung tool blocks the caller.
#[allow(async_fn_in_trait)]
pub trait CommandGateway {
    /// Run `tokens[0]` with the remaining tokens as arguments
    async fn execute(&self, tokens: &[&str], cwd: Option<&Path>) -> CommandOutput;

    /// Convenience form splitting `command` on single spaces
    async fn execute_str(&self, command: &str, cwd: Option<&Path>) -> CommandOutput {
        let tokens: Vec<&str> = command.split(' ').collect();
        self.execute(&tokens, cwd).await
    }

    fn is_remote(&self) -> bool;

    /// Name of the host commands land on, recorded in snapshots
    fn host_label(&self) -> String;
}

impl<G: CommandGateway> CommandGateway for &G {
    async fn execute(&self, tokens: &[&str], cwd: Option<&Path>) -> CommandOutput {
        (**self).execute(tokens, cwd).await
    }

    fn is_remote(&self) -> bool {
        (**self).is_remote()
    }

    fn host_label(&self) -> String {
        (**self).host_label()
    }
}

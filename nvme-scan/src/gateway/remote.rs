use super::{CommandGateway, CommandOutput, STATUS_FAILED, STATUS_OK, STATUS_TRANSPORT};
use crate::error::Result;
use crate::logging::SharedLogger;
use std::io::{self, Read};
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{debug, Level};

const DRAIN_IDLE: Duration = Duration::from_millis(5);

/// Host and credentials for a remote shell session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLogin {
    pub server_ip: String,
    pub port: u16,
    pub user_name: String,
    pub user_pwd: String,
}

/// Text captured from one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteReply {
    pub stdout: String,
    pub stderr: String,
}

/// An authenticated remote shell able to run one command at a time
///
/// Not safe for concurrent use; a gateway owns exactly one session.
pub trait RemoteSession {
    /// Run `command` and collect both streams. `Err` means the channel
    /// itself failed, not that the command did.
    fn exec(&self, command: &str) -> Result<RemoteReply>;

    fn close(&self) {}
}

/// Runs commands over a pre-established remote session
///
/// The session is `None` when connecting failed or credentials were
/// incomplete; every command then fails with status 1 without being sent.
pub struct RemoteGateway<S> {
    host: String,
    session: Option<S>,
    logger: SharedLogger,
}

impl<S: RemoteSession> RemoteGateway<S> {
    pub fn new(host: impl Into<String>, session: Option<S>, logger: SharedLogger) -> Self {
        Self {
            host: host.into(),
            session,
            logger,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
    }
}

impl<S: RemoteSession> CommandGateway for RemoteGateway<S> {
    /// The working directory is not forwarded to the remote side.
    async fn execute(&self, tokens: &[&str], _cwd: Option<&Path>) -> CommandOutput {
        let Some(session) = &self.session else {
            self.logger.log(Level::ERROR, "ssh connection not established!");
            return CommandOutput::new(STATUS_FAILED, String::new());
        };

        let command_line = tokens.join(" ");
        debug!("Executing remote command on {}: {}", self.host, command_line);

        // ssh2 calls block; scans issue one command at a time anyway.
        match session.exec(&command_line) {
            Ok(reply) if !reply.stderr.is_empty() => {
                self.logger.log(
                    Level::ERROR,
                    &format!(
                        "failure executing ssh {}, returned:\n{}",
                        command_line, reply.stderr
                    ),
                );
                CommandOutput::new(STATUS_FAILED, reply.stderr)
            }
            Ok(reply) => CommandOutput::new(STATUS_OK, reply.stdout),
            Err(e) => {
                let text = format!(
                    "(EXCEPTION) failure executing ssh {}, returned:\n{}",
                    command_line, e
                );
                self.logger.log(Level::ERROR, &text);
                CommandOutput::new(STATUS_TRANSPORT, text)
            }
        }
    }

    fn is_remote(&self) -> bool {
        true
    }

    fn host_label(&self) -> String {
        self.host.clone()
    }
}

/// Read stdout and stderr of one command side by side until both end
///
/// Both readers must be non-blocking. `WouldBlock` means nothing is ready
/// yet; `Ok(0)` ends a stream only once `finished` reports the remote side
/// closed it. Reading one stream to the end first can stall when the other
/// fills its window.
#[cfg_attr(not(feature = "ssh"), allow(dead_code))]
pub(crate) fn drain_streams<O, E, F>(
    stdout: &mut O,
    stderr: &mut E,
    finished: F,
) -> io::Result<(String, String)>
where
    O: Read,
    E: Read,
    F: Fn() -> bool,
{
    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut out_done = false;
    let mut err_done = false;
    let mut buf = [0u8; 8192];

    while !(out_done && err_done) {
        let mut progress = false;
        if !out_done {
            match read_chunk(stdout, &mut buf, &mut out, &finished)? {
                Chunk::Data => progress = true,
                Chunk::End => out_done = true,
                Chunk::Pending => {}
            }
        }
        if !err_done {
            match read_chunk(stderr, &mut buf, &mut err, &finished)? {
                Chunk::Data => progress = true,
                Chunk::End => err_done = true,
                Chunk::Pending => {}
            }
        }
        if !progress && !(out_done && err_done) {
            thread::sleep(DRAIN_IDLE);
        }
    }

    Ok((
        String::from_utf8_lossy(&out).into_owned(),
        String::from_utf8_lossy(&err).into_owned(),
    ))
}

enum Chunk {
    Data,
    End,
    Pending,
}

fn read_chunk<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    sink: &mut Vec<u8>,
    finished: &impl Fn() -> bool,
) -> io::Result<Chunk> {
    match reader.read(buf) {
        Ok(0) if finished() => Ok(Chunk::End),
        Ok(0) => Ok(Chunk::Pending),
        Ok(n) => {
            sink.extend_from_slice(&buf[..n]);
            Ok(Chunk::Data)
        }
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
            Ok(Chunk::Pending)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanError;
    use crate::gateway::test_support::RecordingLogger;
    use std::cell::RefCell;
    use std::sync::Arc;

    /// Replies with a fixed result and remembers what it was asked
    struct FakeSession {
        reply: std::result::Result<RemoteReply, String>,
        seen: RefCell<Vec<String>>,
    }

    impl FakeSession {
        fn replying(stdout: &str, stderr: &str) -> Self {
            Self {
                reply: Ok(RemoteReply {
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                }),
                seen: RefCell::new(Vec::new()),
            }
        }

        fn broken(reason: &str) -> Self {
            Self {
                reply: Err(reason.to_string()),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl RemoteSession for FakeSession {
        fn exec(&self, command: &str) -> Result<RemoteReply> {
            self.seen.borrow_mut().push(command.to_string());
            self.reply.clone().map_err(ScanError::Transport)
        }
    }

    fn gateway(session: Option<FakeSession>) -> (RemoteGateway<FakeSession>, Arc<RecordingLogger>) {
        let logger = Arc::new(RecordingLogger::default());
        (RemoteGateway::new("10.0.0.7", session, logger.clone()), logger)
    }

    #[tokio::test]
    async fn test_no_session_fails_without_sending() {
        let (gw, logger) = gateway(None);
        let out = gw.execute(&["lspci", "-D"], None).await;

        assert_eq!(out, CommandOutput::new(STATUS_FAILED, ""));
        assert!(logger.contains("ssh connection not established!"));
        assert!(gw.is_remote());
        assert!(!gw.is_connected());
    }

    #[tokio::test]
    async fn test_joined_command_is_sent_once() {
        let (gw, _logger) = gateway(Some(FakeSession::replying("0000:01:00.0 NVMe\n", "")));
        let out = gw.execute(&["lspci", "-D"], None).await;

        assert!(out.success());
        assert_eq!(out.output, "0000:01:00.0 NVMe\n");
        let session = gw.session.as_ref().unwrap();
        assert_eq!(*session.seen.borrow(), vec!["lspci -D".to_string()]);
    }

    #[tokio::test]
    async fn test_stderr_output_means_failure() {
        let (gw, logger) = gateway(Some(FakeSession::replying("", "permission denied\n")));
        let out = gw.execute(&["nvme", "id-ctrl", "/dev/nvme0"], None).await;

        assert_eq!(out.status, STATUS_FAILED);
        assert_eq!(out.output, "permission denied\n");
        assert!(logger.contains("failure executing ssh nvme id-ctrl /dev/nvme0"));
    }

    #[tokio::test]
    async fn test_channel_failure_is_distinct_status() {
        let (gw, logger) = gateway(Some(FakeSession::broken("connection reset")));
        let out = gw.execute(&["find", "/dev"], None).await;

        assert_eq!(out.status, STATUS_TRANSPORT);
        assert!(out.output.contains("(EXCEPTION)"));
        assert!(out.output.contains("connection reset"));
        assert_eq!(logger.count(Level::ERROR), 1);
    }

    #[tokio::test]
    async fn test_disconnect_drops_session() {
        let (mut gw, _logger) = gateway(Some(FakeSession::replying("", "")));
        assert!(gw.is_connected());
        gw.disconnect();
        assert!(!gw.is_connected());
        assert_eq!(gw.execute(&["true"], None).await.status, STATUS_FAILED);
    }

    /// Non-blocking reader fed from a script of steps
    enum Step {
        Data(&'static str),
        Blocked,
    }

    struct ScriptedStream<'a> {
        steps: std::collections::VecDeque<Step>,
        // Stays blocked until the flag is raised
        wait_for: Option<&'a std::cell::Cell<bool>>,
        raise: Option<&'a std::cell::Cell<bool>>,
    }

    impl<'a> ScriptedStream<'a> {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: steps.into(),
                wait_for: None,
                raise: None,
            }
        }
    }

    impl Read for ScriptedStream<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if let Some(flag) = self.wait_for {
                if !flag.get() {
                    return Err(io::ErrorKind::WouldBlock.into());
                }
            }
            match self.steps.pop_front() {
                Some(Step::Data(text)) => {
                    buf[..text.len()].copy_from_slice(text.as_bytes());
                    if self.steps.is_empty() {
                        if let Some(flag) = self.raise {
                            flag.set(true);
                        }
                    }
                    Ok(text.len())
                }
                Some(Step::Blocked) => Err(io::ErrorKind::WouldBlock.into()),
                None => Ok(0),
            }
        }
    }

    #[test]
    fn test_stdout_waiting_on_stderr_still_completes() {
        let stderr_drained = std::cell::Cell::new(false);
        let mut stdout = ScriptedStream::new(vec![Step::Data("0000:01:00.0 NVMe\n")]);
        stdout.wait_for = Some(&stderr_drained);
        let mut stderr = ScriptedStream::new(vec![
            Step::Data("warning: "),
            Step::Blocked,
            Step::Data("slow device\n"),
        ]);
        stderr.raise = Some(&stderr_drained);

        let (out, err) = drain_streams(&mut stdout, &mut stderr, || true).unwrap();
        assert_eq!(out, "0000:01:00.0 NVMe\n");
        assert_eq!(err, "warning: slow device\n");
    }

    #[test]
    fn test_empty_read_before_close_is_not_the_end() {
        let polls = std::cell::Cell::new(0u32);
        let mut stdout = ScriptedStream::new(vec![Step::Blocked, Step::Data("nvme0\n")]);
        let mut stderr = ScriptedStream::new(Vec::new());

        // The channel reports closed only after a few polls
        let (out, err) = drain_streams(&mut stdout, &mut stderr, || {
            polls.set(polls.get() + 1);
            polls.get() > 3
        })
        .unwrap();
        assert_eq!(out, "nvme0\n");
        assert!(err.is_empty());
    }

    #[test]
    fn test_read_error_is_returned() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::ErrorKind::ConnectionReset.into())
            }
        }
        let mut stderr = ScriptedStream::new(Vec::new());
        let err = drain_streams(&mut Broken, &mut stderr, || true).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }
}

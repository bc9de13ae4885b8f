//! SSH session backed by libssh2
//!
//! Host keys are not verified, matching an auto-accept policy for lab hosts.

use super::remote::{drain_streams, RemoteGateway, RemoteLogin, RemoteReply, RemoteSession};
use crate::error::{Result, ScanError};
use crate::logging::SharedLogger;
use ssh2::Session;
use std::net::TcpStream;
use tracing::{info, Level};

impl From<ssh2::Error> for ScanError {
    fn from(err: ssh2::Error) -> Self {
        ScanError::Transport(err.to_string())
    }
}

pub struct SshSession {
    session: Session,
}

impl SshSession {
    /// Open a TCP connection, handshake and authenticate with a password
    pub fn connect(login: &RemoteLogin) -> Result<Self> {
        let tcp = TcpStream::connect((login.server_ip.as_str(), login.port))
            .map_err(|e| ScanError::Transport(format!("{}:{}: {}", login.server_ip, login.port, e)))?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;
        session.userauth_password(&login.user_name, &login.user_pwd)?;

        if !session.authenticated() {
            return Err(ScanError::Transport(format!(
                "authentication rejected for {}@{}",
                login.user_name, login.server_ip
            )));
        }

        info!("SSH session established with {}", login.server_ip);
        Ok(Self { session })
    }
}

impl RemoteSession for SshSession {
    fn exec(&self, command: &str) -> Result<RemoteReply> {
        let mut channel = self.session.channel_session()?;
        channel.exec(command)?;

        self.session.set_blocking(false);
        let drained = {
            let mut stdout = channel.stream(0);
            let mut stderr = channel.stderr();
            drain_streams(&mut stdout, &mut stderr, || channel.eof())
        };
        self.session.set_blocking(true);

        let (stdout, stderr) = drained?;
        channel.wait_close()?;
        Ok(RemoteReply { stdout, stderr })
    }

    fn close(&self) {
        let _ = self.session.disconnect(None, "nvme-scan finished", None);
    }
}

impl RemoteGateway<SshSession> {
    /// Build a remote gateway, connecting when credentials are complete
    ///
    /// A failed connection is logged and leaves the gateway without a
    /// session; it is still a remote gateway for its whole lifetime.
    pub fn connect(host: &str, login: Option<&RemoteLogin>, logger: SharedLogger) -> Self {
        let session = match login {
            Some(login) => match SshSession::connect(login) {
                Ok(session) => Some(session),
                Err(e) => {
                    logger.log(
                        Level::ERROR,
                        &format!(
                            "EXCEPTION: ssh connection to host {} failed; returned:\n{}",
                            login.server_ip, e
                        ),
                    );
                    None
                }
            },
            None => None,
        };
        RemoteGateway::new(host, session, logger)
    }
}

//! Role startup -- argument wiring and readiness synchronization.
//!
//! Startup order is fixed: entrypoint, then room, then client. With
//! [`StartupMode::Probe`] each service role is polled on its listening port
//! until it accepts a TCP connection, bounded by `readiness_timeout_ms`.
//! With [`StartupMode::Delay`] the fixed settle delays are used instead.

use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, info};

use ratecheck_core::config::{RatecheckConfig, StartupMode};
use ratecheck_core::error::CaseError;
use ratecheck_core::types::{PortAssignment, TestCase};

use crate::process::{Role, RoleProcess};
use crate::scope::CaseScope;

/// Entrypoint flags: headless, listening port, user credential dir, host key.
pub fn entrypoint_args(port: u16, users_dir: &Path, host_key: &Path) -> Vec<OsString> {
    vec![
        "-headless".into(),
        "-port".into(),
        port.to_string().into(),
        "-users".into(),
        users_dir.into(),
        "-hostkey".into(),
        host_key.into(),
    ]
}

/// Room flags: listening port, room name, entrypoint address, identity key,
/// upload ceiling, served-files directory.
pub fn room_args(
    port: u16,
    room: &str,
    entrypoint_addr: &str,
    identity: &Path,
    max_upload: &str,
    files_dir: &Path,
) -> Vec<OsString> {
    vec![
        "-port".into(),
        port.to_string().into(),
        "-room".into(),
        room.into(),
        "-entrypoint".into(),
        entrypoint_addr.into(),
        "-headless".into(),
        "-identity".into(),
        identity.into(),
        "-max-upload".into(),
        max_upload.into(),
        "-files".into(),
        files_dir.into(),
    ]
}

/// Client flags: batch mode, identity key, connection URI.
pub fn client_args(identity: &Path, uri: &str) -> Vec<OsString> {
    vec![
        "-batch".into(),
        "-identity".into(),
        identity.into(),
        uri.into(),
    ]
}

/// `ssh://<user>@<host>:<port>/<room>`
pub fn client_uri(user: &str, host: &str, port: u16, room: &str) -> String {
    format!("ssh://{user}@{host}:{port}/{room}")
}

/// Starts the service roles of one test case inside its [`CaseScope`].
pub struct Orchestrator<'a> {
    config: &'a RatecheckConfig,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a RatecheckConfig) -> Self {
        Self { config }
    }

    /// Start entrypoint then room and wait until both are reachable.
    ///
    /// Each process is attached to `scope` right after spawning, so it is
    /// torn down even if a later step fails.
    pub async fn start_services(
        &self,
        scope: &mut CaseScope,
        case: &TestCase,
        ports: PortAssignment,
    ) -> Result<(), CaseError> {
        let host = &self.config.identity.host;
        let users_dir = scope.fixture().users();
        let host_key = scope.fixture().host_key();
        let files_dir = scope.fixture().room_files();

        let entrypoint = RoleProcess::spawn_service(
            Role::Entrypoint,
            &self.config.binaries.entrypoint,
            entrypoint_args(ports.entrypoint, &users_dir, &host_key),
        )?;
        info!(
            pid = ?entrypoint.pid(),
            port = ports.entrypoint,
            "entrypoint started"
        );
        let entrypoint = scope.attach(entrypoint);
        self.await_ready(
            entrypoint,
            host,
            ports.entrypoint,
            self.config.timing.entrypoint_settle_ms,
        )
        .await?;

        let entrypoint_addr = format!("{host}:{}", ports.entrypoint);
        let room = RoleProcess::spawn_service(
            Role::Room,
            &self.config.binaries.room,
            room_args(
                ports.room,
                &self.config.identity.room,
                &entrypoint_addr,
                &self.config.identity.private_key,
                &case.rate_limit.raw,
                &files_dir,
            ),
        )?;
        info!(
            pid = ?room.pid(),
            port = ports.room,
            max_upload = %case.rate_limit,
            "room started"
        );
        let room = scope.attach(room);
        self.await_ready(room, host, ports.room, self.config.timing.room_settle_ms)
            .await?;

        if self.config.timing.startup_mode == StartupMode::Probe {
            // The room registers with the entrypoint after it starts listening.
            tokio::time::sleep(Duration::from_millis(
                self.config.timing.post_ready_settle_ms,
            ))
            .await;
        }

        Ok(())
    }

    async fn await_ready(
        &self,
        process: &mut RoleProcess,
        host: &str,
        port: u16,
        settle_ms: u64,
    ) -> Result<(), CaseError> {
        match self.config.timing.startup_mode {
            StartupMode::Probe => {
                wait_until_ready(
                    process,
                    host,
                    port,
                    self.config.timing.readiness_timeout(),
                    self.config.timing.probe_interval(),
                )
                .await
            }
            StartupMode::Delay => {
                tokio::time::sleep(Duration::from_millis(settle_ms)).await;
                match process.exit_status() {
                    Some(status) => Err(role_exited(process, status.to_string())),
                    None => Ok(()),
                }
            }
        }
    }
}

/// Poll `host:port` until it accepts a connection.
///
/// Fails with [`CaseError::RoleExited`] if the process dies while being
/// probed, or [`CaseError::NotReady`] once `timeout` elapses.
pub async fn wait_until_ready(
    process: &mut RoleProcess,
    host: &str,
    port: u16,
    timeout: Duration,
    interval: Duration,
) -> Result<(), CaseError> {
    let deadline = tokio::time::Instant::now() + timeout;
    let addr = format!("{host}:{port}");
    let mut attempts = 0u32;

    loop {
        if let Some(status) = process.exit_status() {
            return Err(role_exited(process, status.to_string()));
        }

        attempts += 1;
        match tokio::time::timeout(interval, TcpStream::connect(addr.as_str())).await {
            Ok(Ok(_)) => {
                debug!(role = %process.role(), addr = %addr, attempts, "role ready");
                return Ok(());
            }
            Ok(Err(_)) | Err(_) => {}
        }

        if tokio::time::Instant::now() + interval > deadline {
            return Err(CaseError::NotReady {
                role: process.role().to_string(),
                addr,
                timeout,
            });
        }
        tokio::time::sleep(interval).await;
    }
}

fn role_exited(process: &RoleProcess, status: String) -> CaseError {
    CaseError::RoleExited {
        role: process.role().to_string(),
        status,
        output: process.output_tail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entrypoint_args_match_cli_contract() {
        let args = entrypoint_args(44372, Path::new("fx/users"), Path::new("fx/host_key"));
        let args: Vec<_> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            [
                "-headless",
                "-port",
                "44372",
                "-users",
                "fx/users",
                "-hostkey",
                "fx/host_key"
            ]
        );
    }

    #[test]
    fn room_args_carry_rate_ceiling_verbatim() {
        let args = room_args(
            44373,
            "myroom",
            "localhost:44372",
            Path::new("keys/id"),
            "10KB",
            Path::new("fx/room_files"),
        );
        let args: Vec<_> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        let pos = args.iter().position(|a| a == "-max-upload").unwrap();
        assert_eq!(args[pos + 1], "10KB");
        let pos = args.iter().position(|a| a == "-entrypoint").unwrap();
        assert_eq!(args[pos + 1], "localhost:44372");
        assert!(args.contains(&"-headless".to_owned()));
    }

    #[test]
    fn client_uri_format() {
        assert_eq!(
            client_uri("maurits", "localhost", 44372, "myroom"),
            "ssh://maurits@localhost:44372/myroom"
        );
        let args = client_args(Path::new("keys/id"), "ssh://u@h:1/r");
        assert_eq!(args.len(), 4);
        assert_eq!(args[0], "-batch");
        assert_eq!(args[3], "ssh://u@h:1/r");
    }

    #[cfg(unix)]
    mod readiness {
        use super::*;

        fn sleeper() -> RoleProcess {
            RoleProcess::spawn_service(
                Role::Entrypoint,
                Path::new("/bin/sh"),
                ["-c", "exec sleep 10"],
            )
            .unwrap()
        }

        #[tokio::test]
        async fn ready_when_port_accepts() {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            let mut process = sleeper();

            let result = wait_until_ready(
                &mut process,
                "127.0.0.1",
                port,
                Duration::from_secs(2),
                Duration::from_millis(50),
            )
            .await;
            assert!(result.is_ok(), "{result:?}");
            process.kill().await;
        }

        #[tokio::test]
        async fn not_ready_after_timeout() {
            let port = {
                let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
                l.local_addr().unwrap().port()
            };
            let mut process = sleeper();

            let result = wait_until_ready(
                &mut process,
                "127.0.0.1",
                port,
                Duration::from_millis(300),
                Duration::from_millis(50),
            )
            .await;
            assert!(matches!(result, Err(CaseError::NotReady { .. })), "{result:?}");
            process.kill().await;
        }

        #[tokio::test]
        async fn exited_role_is_reported_with_output() {
            let mut process = RoleProcess::spawn_service(
                Role::Room,
                Path::new("/bin/sh"),
                ["-c", "echo 'listen: address in use'; exit 1"],
            )
            .unwrap();
            process.wait().await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;

            let result = wait_until_ready(
                &mut process,
                "127.0.0.1",
                1,
                Duration::from_secs(2),
                Duration::from_millis(50),
            )
            .await;
            match result {
                Err(CaseError::RoleExited { role, output, .. }) => {
                    assert_eq!(role, "room");
                    assert_eq!(output, vec!["listen: address in use"]);
                }
                other => panic!("expected RoleExited, got {other:?}"),
            }
        }
    }
}

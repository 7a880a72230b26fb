// Session controller: the top-level connect/advertise/dispatch loop.
//
// The worker keeps exactly one connection to the controller and services one
// command at a time. Every transport or transfer failure is recoverable: the
// connection is dropped, the worker sleeps a fixed backoff and reconnects.
// The only ways out of the loop are the `exit` command and the idle deadline.

use anvil_sdk::TraceWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::executor;
use crate::protocol::{self, Request};
use crate::resources::ResourceSnapshot;
use crate::transfer::{self, TransferError};
use crate::transport::{Connection, TransportError, TuneProfile};

/// Fixed backoff between reconnect attempts. This is the whole retry policy:
/// no exponential growth, no attempt cap.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Default per-operation transport timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Default idle-abort timeout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Session parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Controller host name or address.
    pub host: String,
    /// Controller TCP port.
    pub port: u16,
    /// Per-operation transport timeout. A fresh `now + timeout` deadline is
    /// computed before each transport call within an exchange, so multi-step
    /// exchanges (`put`'s read-then-stream) get a widened effective window.
    pub timeout: Duration,
    /// The worker self-terminates when no command completes for this long.
    pub idle_timeout: Duration,
    /// Optional socket buffer size (the `-w` flag).
    pub window: Option<u32>,
    /// Backoff between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Scratch directory for file transfers and subprocess execution.
    pub workdir: PathBuf,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, port: u16, workdir: PathBuf) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: DEFAULT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            window: None,
            reconnect_delay: RECONNECT_DELAY,
            workdir,
        }
    }
}

/// Why a command cycle ended without a usable connection.
#[derive(Debug, thiserror::Error)]
enum CycleError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

enum CycleOutcome {
    /// Command exchange completed; the idle deadline moves forward.
    Continue,
    /// `exit` received.
    Exit,
}

/// The worker's connection-and-command state machine.
pub struct Session {
    config: SessionConfig,
    resources: ResourceSnapshot,
    trace: Arc<dyn TraceWriter>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        resources: ResourceSnapshot,
        trace: Arc<dyn TraceWriter>,
    ) -> Self {
        Self {
            config,
            resources,
            trace,
        }
    }

    /// Run until `exit` or idle expiry. Returns the process exit code (0 for
    /// both graceful endings).
    pub async fn run(&self) -> i32 {
        let mut idle_deadline = Instant::now() + self.config.idle_timeout;
        let mut link: Option<Connection> = None;

        loop {
            if Instant::now() > idle_deadline {
                self.trace.info("idle timeout expired, shutting down");
                return 0;
            }

            if link.is_none() {
                match self.connect().await {
                    Ok(conn) => {
                        self.trace
                            .info(&format!("connected to controller at {}", conn.peer()));
                        link = Some(conn);
                    }
                    Err(e) => {
                        self.trace.warning(&format!("connect failed: {e}"));
                        sleep(self.config.reconnect_delay).await;
                        continue;
                    }
                }
            }
            let Some(conn) = link.as_mut() else {
                continue;
            };

            match self.run_cycle(conn).await {
                Ok(CycleOutcome::Continue) => {
                    idle_deadline = Instant::now() + self.config.idle_timeout;
                }
                Ok(CycleOutcome::Exit) => {
                    self.trace.info("exit command received, shutting down");
                    return 0;
                }
                Err(e) => {
                    self.trace.warning(&format!("dropping connection: {e}"));
                    link = None;
                    sleep(self.config.reconnect_delay).await;
                }
            }
        }
    }

    /// One command exchange: advertise readiness, read a request, dispatch,
    /// reply. The readiness line is resent at the top of every cycle — it
    /// doubles as the worker-is-free signal to the controller.
    async fn run_cycle(&self, conn: &mut Connection) -> Result<CycleOutcome, CycleError> {
        conn.write_line(&protocol::format_ready(&self.resources), self.deadline())
            .await?;

        let line = conn
            .read_line(protocol::REQUEST_LINE_MAX, self.deadline())
            .await?;
        self.trace.verbose(&format!("request: {line}"));

        match protocol::parse_request(&line) {
            Request::Work { length } => {
                let payload = conn.read_bytes(length as usize, self.deadline()).await?;
                let (status, output) =
                    executor::execute(&payload, &self.config.workdir, self.trace.as_ref()).await;
                conn.write_line(&protocol::format_result(status, output.len()), self.deadline())
                    .await?;
                conn.write_bytes(&output, self.deadline()).await?;
            }
            Request::Put {
                filename,
                length,
                mode,
            } => {
                transfer::receive_file(
                    conn,
                    &self.config.workdir,
                    &filename,
                    length,
                    mode,
                    self.deadline(),
                )
                .await?;
            }
            Request::Get { filename } => {
                match transfer::send_file(conn, &self.config.workdir, &filename, self.deadline())
                    .await
                {
                    Ok(size) => {
                        self.trace
                            .verbose(&format!("sent '{filename}' ({size} bytes)"));
                    }
                    Err(TransferError::NotFound) => {
                        self.trace
                            .verbose(&format!("'{filename}' not available, answering -1"));
                        conn.write_line(protocol::REPLY_NOT_FOUND, self.deadline())
                            .await
                            .map_err(CycleError::Transport)?;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Request::Exit => return Ok(CycleOutcome::Exit),
            Request::Unrecognized => {
                self.trace.warning(&format!("unrecognized request: {line}"));
                conn.write_line(protocol::REPLY_ERROR, self.deadline())
                    .await?;
            }
        }

        Ok(CycleOutcome::Continue)
    }

    async fn connect(&self) -> Result<Connection, TransportError> {
        let conn = Connection::connect(
            &self.config.host,
            self.config.port,
            self.config.window,
            self.deadline(),
        )
        .await?;
        conn.tune(TuneProfile::Interactive)?;
        Ok(conn)
    }

    /// Fresh absolute deadline for the next transport call.
    fn deadline(&self) -> Instant {
        Instant::now() + self.config.timeout
    }
}

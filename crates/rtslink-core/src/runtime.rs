//! Async client runtime
//!
//! `spawn_session` moves a `Session` into a tokio task that owns it
//! exclusively and `select!`s over inbound transport frames and commands from
//! `RobotClient` handles. All protocol work stays single-threaded inside that
//! task; callers only ever hold a cloneable handle and await oneshot
//! responses.

use core::future::Future;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{SessionConfig, TimeoutConfig};
use crate::errors::{CommandError, Result, RtsError};
use crate::keystore::KeyStore;
use crate::protocol::correlator::Ticket;
use crate::protocol::messages::{CommandKind, Request, Response, RtsMessage, RtsTag, WifiNetwork};
use crate::protocol::transfer::CompletedTransfer;
use crate::session::{IssuedRequest, Session, SessionEvent, SessionStats};

/// Receiving end of session events
pub type EventReceiver = mpsc::Receiver<SessionEvent>;

/// Result type of client command methods
pub type CommandOutcome<T> = core::result::Result<T, CommandError>;

// ----------------------------------------------------------------------------
// Client Commands
// ----------------------------------------------------------------------------

enum ClientCommand {
    Issue {
        request: Request,
        reply: oneshot::Sender<Result<IssuedRequest>>,
    },
    /// Caller gave up after a timeout
    Forget { kind: CommandKind, ticket: Ticket },
    /// Caller was interrupted by the operator
    Interrupt { kind: CommandKind, ticket: Ticket },
    SubmitPin {
        pin: String,
        reply: oneshot::Sender<Result<()>>,
    },
    CancelPairing {
        reply: oneshot::Sender<Result<()>>,
    },
    AuthorizeSsh {
        keys: Vec<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    Stats {
        reply: oneshot::Sender<SessionStats>,
    },
    Shutdown,
}

// ----------------------------------------------------------------------------
// Session Task
// ----------------------------------------------------------------------------

/// Task owning one session
pub struct SessionTask {
    session: Session<mpsc::UnboundedSender<Vec<u8>>>,
    inbound: mpsc::Receiver<Vec<u8>>,
    commands: mpsc::Receiver<ClientCommand>,
    events: mpsc::Sender<SessionEvent>,
    events_dropped: u64,
    commands_open: bool,
}

impl SessionTask {
    /// Run the task loop until the transport closes or shutdown is requested
    pub async fn run(mut self) -> Result<SessionStats> {
        info!("Session task for {} starting", self.session.peer_name());

        loop {
            tokio::select! {
                frame = self.inbound.recv() => {
                    match frame {
                        Some(frame) => {
                            if let Err(e) = self.on_frame(&frame) {
                                error!("Transport failure, closing session: {}", e);
                                self.close();
                                return Err(e);
                            }
                        }
                        None => {
                            info!("Transport for {} closed", self.session.peer_name());
                            self.close();
                            break;
                        }
                    }
                }

                command = self.commands.recv(), if self.commands_open => {
                    match command {
                        Some(ClientCommand::Shutdown) => {
                            info!("Shutdown requested for {}", self.session.peer_name());
                            self.close();
                            break;
                        }
                        Some(command) => self.on_command(command),
                        None => {
                            debug!("All client handles dropped");
                            self.commands_open = false;
                        }
                    }
                }
            }
        }

        Ok(self.stats())
    }

    fn on_frame(&mut self, frame: &[u8]) -> Result<()> {
        match self.session.handle_frame(frame) {
            Ok(Some(event)) => {
                self.emit(event);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e @ RtsError::Transport { .. }) => Err(e),
            Err(e) => {
                warn!("Error handling frame: {}", e);
                Ok(())
            }
        }
    }

    fn on_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Issue { request, reply } => {
                if let Err(Ok(issued)) = reply.send(self.session.issue(request)) {
                    debug!("Caller for {} request gave up before it was sent", issued.kind);
                    self.session.cancel_request(issued.kind, issued.ticket);
                }
            }
            ClientCommand::Forget { kind, ticket } => {
                self.session.cancel_request(kind, ticket);
            }
            ClientCommand::Interrupt { kind, ticket } => {
                if let Err(e) = self.session.interrupt(kind, ticket) {
                    warn!("Failed to interrupt {} request: {}", kind, e);
                }
            }
            ClientCommand::SubmitPin { pin, reply } => {
                let _ = reply.send(self.session.submit_pin(&pin));
            }
            ClientCommand::CancelPairing { reply } => {
                let _ = reply.send(self.session.cancel_pairing());
            }
            ClientCommand::AuthorizeSsh { keys, reply } => {
                let _ = reply.send(self.session.authorize_ssh_keys(&keys));
            }
            ClientCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            ClientCommand::Shutdown => {}
        }
    }

    fn close(&mut self) {
        self.session.teardown();
        self.emit(SessionEvent::Disconnected);
    }

    /// Queue an event without waiting; a full queue drops it
    fn emit(&mut self, event: SessionEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.events_dropped += 1;
                warn!(
                    "Event queue full, dropping {:?} ({} dropped)",
                    event, self.events_dropped
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Event receiver dropped");
            }
        }
    }

    fn stats(&self) -> SessionStats {
        SessionStats {
            events_dropped: self.events_dropped,
            ..self.session.stats().clone()
        }
    }
}

/// Spawn a task owning a new session
///
/// `inbound` delivers whole frames from the transport and `outbound` receives
/// whole frames to write.
pub fn spawn_session(
    config: SessionConfig,
    peer_name: impl Into<String>,
    inbound: mpsc::Receiver<Vec<u8>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    store: Option<Box<dyn KeyStore>>,
) -> (RobotClient, EventReceiver, JoinHandle<Result<SessionStats>>) {
    let (command_tx, command_rx) = mpsc::channel(config.command_buffer_size);
    let (event_tx, event_rx) = mpsc::channel(config.event_buffer_size);
    let timeouts = config.timeouts.clone();

    let mut session = Session::new(peer_name, config, outbound);
    if let Some(store) = store {
        session = session.with_key_store(store);
    }

    let task = SessionTask {
        session,
        inbound,
        commands: command_rx,
        events: event_tx,
        events_dropped: 0,
        commands_open: true,
    };
    let handle = tokio::spawn(task.run());

    let client = RobotClient {
        commands: command_tx,
        timeouts,
    };
    (client, event_rx, handle)
}

// ----------------------------------------------------------------------------
// Robot Client
// ----------------------------------------------------------------------------

/// Cloneable handle issuing commands to a session task
#[derive(Clone)]
pub struct RobotClient {
    commands: mpsc::Sender<ClientCommand>,
    timeouts: TimeoutConfig,
}

impl RobotClient {
    /// Send a request and wait for its response with the per-kind timeout
    pub async fn call(&self, request: Request) -> CommandOutcome<Response> {
        self.call_until(request, core::future::pending::<()>()).await
    }

    /// Like `call`, but give up early when `interrupt` resolves
    ///
    /// The timeout covers the whole exchange, including handing the request to
    /// the session task. An interrupted OTA wait also asks the robot to cancel
    /// the update.
    pub async fn call_until<I>(&self, request: Request, interrupt: I) -> CommandOutcome<Response>
    where
        I: Future<Output = ()>,
    {
        let kind = request.kind();
        let after = self.timeouts.for_kind(kind);
        let deadline = Instant::now() + after;
        tokio::pin!(interrupt);

        let issued = tokio::select! {
            issued = timeout_at(deadline, self.issue(request)) => match issued {
                Ok(issued) => issued?,
                Err(_) => {
                    debug!("{} request not accepted within {:?}", kind, after);
                    return Err(CommandError::NoResponse { kind, after });
                }
            },
            _ = &mut interrupt => return Err(CommandError::Cancelled { kind }),
        };
        let ticket = issued.ticket;

        tokio::select! {
            outcome = timeout_at(deadline, issued.response) => match outcome {
                Ok(result) => result,
                Err(_) => {
                    debug!("{} request timed out after {:?}", kind, after);
                    let _ = self.send(ClientCommand::Forget { kind, ticket }).await;
                    Err(CommandError::NoResponse { kind, after })
                }
            },
            _ = &mut interrupt => {
                let _ = self.send(ClientCommand::Interrupt { kind, ticket }).await;
                Err(CommandError::Cancelled { kind })
            }
        }
    }

    async fn issue(&self, request: Request) -> CommandOutcome<IssuedRequest> {
        let (reply, issued) = oneshot::channel();
        self.send(ClientCommand::Issue { request, reply }).await?;
        issued
            .await
            .map_err(|_| CommandError::Disconnected)?
            .map_err(|e| CommandError::NotSent {
                reason: e.to_string(),
            })
    }

    async fn call_message(&self, request: Request) -> CommandOutcome<RtsMessage> {
        let kind = request.kind();
        match self.call(request).await? {
            Response::Message(message) => Ok(message),
            Response::Transfer(_) => Err(CommandError::Unexpected {
                kind,
                tag: RtsTag::FileDownload,
            }),
        }
    }

    pub async fn wifi_scan(&self) -> CommandOutcome<Vec<WifiNetwork>> {
        match self.call_message(Request::WifiScan).await? {
            RtsMessage::WifiScanResponse { networks, .. } => Ok(networks),
            other => Err(unexpected(CommandKind::WifiScan, &other)),
        }
    }

    pub async fn wifi_connect(
        &self,
        ssid: &str,
        password: &str,
        timeout_secs: u8,
        auth_type: u8,
        hidden: bool,
    ) -> CommandOutcome<RtsMessage> {
        self.call_message(Request::WifiConnect {
            ssid: ssid.to_string(),
            password: password.to_string(),
            timeout_secs,
            auth_type,
            hidden,
        })
        .await
    }

    /// Forget one network, or all of them with `None`
    pub async fn wifi_forget(&self, ssid: Option<&str>) -> CommandOutcome<RtsMessage> {
        self.call_message(Request::WifiForget {
            ssid: ssid.map(str::to_string),
        })
        .await
    }

    pub async fn wifi_access_point(&self, enable: bool) -> CommandOutcome<RtsMessage> {
        self.call_message(Request::WifiAccessPoint { enable }).await
    }

    pub async fn wifi_ip(&self) -> CommandOutcome<RtsMessage> {
        self.call_message(Request::WifiIp).await
    }

    pub async fn status(&self) -> CommandOutcome<RtsMessage> {
        self.call_message(Request::Status).await
    }

    pub async fn cloud_session(
        &self,
        session_token: &str,
        client_name: &str,
        app_id: &str,
    ) -> CommandOutcome<RtsMessage> {
        self.call_message(Request::CloudSession {
            session_token: session_token.to_string(),
            client_name: client_name.to_string(),
            app_id: app_id.to_string(),
        })
        .await
    }

    pub async fn ota_start(&self, url: &str) -> CommandOutcome<RtsMessage> {
        self.call_message(Request::OtaStart {
            url: url.to_string(),
        })
        .await
    }

    pub async fn ota_cancel(&self) -> CommandOutcome<RtsMessage> {
        self.call_message(Request::OtaCancel).await
    }

    /// Wait for the next OTA progress report
    pub async fn ota_progress(&self) -> CommandOutcome<RtsMessage> {
        self.call_message(Request::OtaProgress).await
    }

    pub async fn set_connection_id(&self, connection_id: &str) -> CommandOutcome<RtsMessage> {
        self.call_message(Request::ConnectionId {
            connection_id: connection_id.to_string(),
        })
        .await
    }

    pub async fn sdk_proxy(
        &self,
        client_guid: &str,
        message_id: &str,
        url_path: &str,
        json: &str,
    ) -> CommandOutcome<RtsMessage> {
        self.call_message(Request::SdkProxy {
            client_guid: client_guid.to_string(),
            message_id: message_id.to_string(),
            url_path: url_path.to_string(),
            json: json.to_string(),
        })
        .await
    }

    /// Request a log bundle and wait until every packet has arrived
    pub async fn download_logs(&self, mode: u8, filter: Vec<String>) -> CommandOutcome<CompletedTransfer> {
        match self.call(Request::Logs { mode, filter }).await? {
            Response::Transfer(transfer) => Ok(transfer),
            Response::Message(other) => Err(unexpected(CommandKind::Logs, &other)),
        }
    }

    // ------------------------------------------------------------------------
    // Session Control
    // ------------------------------------------------------------------------

    /// Supply the PIN shown on the robot
    pub async fn submit_pin(&self, pin: &str) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send_control(ClientCommand::SubmitPin {
            pin: pin.to_string(),
            reply,
        })
        .await?;
        response
            .await
            .map_err(|_| RtsError::channel_error("Session task stopped"))?
    }

    pub async fn cancel_pairing(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send_control(ClientCommand::CancelPairing { reply }).await?;
        response
            .await
            .map_err(|_| RtsError::channel_error("Session task stopped"))?
    }

    /// Add SSH public keys to the robot's authorized keys; requires a paired session
    pub async fn authorize_ssh(&self, keys: Vec<String>) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send_control(ClientCommand::AuthorizeSsh { keys, reply }).await?;
        response
            .await
            .map_err(|_| RtsError::channel_error("Session task stopped"))?
    }

    pub async fn stats(&self) -> Result<SessionStats> {
        let (reply, response) = oneshot::channel();
        self.send_control(ClientCommand::Stats { reply }).await?;
        response
            .await
            .map_err(|_| RtsError::channel_error("Session task stopped"))
    }

    /// Tear the session down and stop its task
    pub async fn shutdown(&self) -> Result<()> {
        self.send_control(ClientCommand::Shutdown).await
    }

    async fn send(&self, command: ClientCommand) -> CommandOutcome<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| CommandError::Disconnected)
    }

    async fn send_control(&self, command: ClientCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RtsError::channel_error("Session task stopped"))
    }
}

fn unexpected(kind: CommandKind, message: &RtsMessage) -> CommandError {
    CommandError::Unexpected {
        kind,
        tag: message.tag(),
    }
}

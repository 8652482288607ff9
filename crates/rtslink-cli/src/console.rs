//! Interactive operator console
//!
//! Reads commands from stdin while watching session events. Each command that
//! talks to the robot waits for its response in place; Ctrl-C abandons the
//! wait (and stops an OTA update on the robot) without leaving the console.

use std::path::{Path, PathBuf};

use rtslink_core::protocol::messages::RtsMessage;
use rtslink_core::{
    CommandError, CommandOutcome, CompletedTransfer, EventReceiver, Request, Response,
    RobotClient, SessionEvent,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::error::Result;

/// Default wifi connect timeout handed to the robot, in seconds
const WIFI_CONNECT_TIMEOUT_SECS: u8 = 15;
/// WPA2-PSK
const DEFAULT_AUTH_TYPE: u8 = 6;

const HELP: &str = "\
Commands:
  pin <digits>                          submit the PIN shown on the robot
  status                                robot status
  wifi-scan                             list access points seen by the robot
  wifi-connect <ssid> <password> [secs] join a network
  wifi-forget <ssid>|all                forget one or every network
  wifi-ip                               current IP addresses
  ap on|off                             toggle the robot's access point
  cloud-session <token> <name> <app-id> authorize the robot with the cloud
  ota-start <url>                       start a firmware update
  ota-cancel                            cancel the update in progress
  ota-progress                          wait for the next progress report
  connection-id <id>                    set the app connection id
  sdk <guid> <message-id> <path> <json> proxy an SDK request
  logs [mode] [filter...]               download a log bundle
  ssh <public-key>                      add an SSH key to the robot
  stats                                 session counters
  cancel-pairing                        abort pairing and disconnect
  help                                  this text
  quit                                  disconnect and exit
Ctrl-C abandons the command in progress.";

// ----------------------------------------------------------------------------
// Command Parsing
// ----------------------------------------------------------------------------

/// One line typed at the console
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Pin(String),
    Robot(Request),
    /// One SSH public key line, spaces included
    AuthorizeSsh(String),
    Stats,
    CancelPairing,
    Help,
    Quit,
}

/// Parse a console line; `Ok(None)` for a blank line
pub fn parse_command(line: &str) -> core::result::Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    let Some((verb, rest)) = split_word(line) else {
        return Ok(None);
    };

    let command = match verb {
        "pin" => ConsoleCommand::Pin(required(rest, "pin <digits>")?.to_string()),
        "status" => ConsoleCommand::Robot(Request::Status),
        "wifi-scan" => ConsoleCommand::Robot(Request::WifiScan),
        "wifi-connect" => {
            let usage = "wifi-connect <ssid> <password> [secs]";
            let (ssid, rest) = split_word(rest).ok_or(usage)?;
            let (password, rest) = split_word(rest).ok_or(usage)?;
            let timeout_secs = match split_word(rest) {
                Some((secs, _)) => secs
                    .parse()
                    .map_err(|_| format!("invalid timeout '{}'", secs))?,
                None => WIFI_CONNECT_TIMEOUT_SECS,
            };
            ConsoleCommand::Robot(Request::WifiConnect {
                ssid: ssid.to_string(),
                password: password.to_string(),
                timeout_secs,
                auth_type: DEFAULT_AUTH_TYPE,
                hidden: false,
            })
        }
        "wifi-forget" => {
            let ssid = required(rest, "wifi-forget <ssid>|all")?;
            ConsoleCommand::Robot(Request::WifiForget {
                ssid: (ssid != "all").then(|| ssid.to_string()),
            })
        }
        "wifi-ip" => ConsoleCommand::Robot(Request::WifiIp),
        "ap" => {
            let enable = match required(rest, "ap on|off")? {
                "on" => true,
                "off" => false,
                other => return Err(format!("expected on or off, got '{}'", other)),
            };
            ConsoleCommand::Robot(Request::WifiAccessPoint { enable })
        }
        "cloud-session" => {
            let usage = "cloud-session <token> <name> <app-id>";
            let (session_token, rest) = split_word(rest).ok_or(usage)?;
            let (client_name, rest) = split_word(rest).ok_or(usage)?;
            let (app_id, _) = split_word(rest).ok_or(usage)?;
            ConsoleCommand::Robot(Request::CloudSession {
                session_token: session_token.to_string(),
                client_name: client_name.to_string(),
                app_id: app_id.to_string(),
            })
        }
        "ota-start" => ConsoleCommand::Robot(Request::OtaStart {
            url: required(rest, "ota-start <url>")?.to_string(),
        }),
        "ota-cancel" => ConsoleCommand::Robot(Request::OtaCancel),
        "ota-progress" => ConsoleCommand::Robot(Request::OtaProgress),
        "connection-id" => ConsoleCommand::Robot(Request::ConnectionId {
            connection_id: required(rest, "connection-id <id>")?.to_string(),
        }),
        "sdk" => {
            let usage = "sdk <guid> <message-id> <path> <json>";
            let (client_guid, rest) = split_word(rest).ok_or(usage)?;
            let (message_id, rest) = split_word(rest).ok_or(usage)?;
            let (url_path, rest) = split_word(rest).ok_or(usage)?;
            ConsoleCommand::Robot(Request::SdkProxy {
                client_guid: client_guid.to_string(),
                message_id: message_id.to_string(),
                url_path: url_path.to_string(),
                json: required(rest, usage)?.to_string(),
            })
        }
        "logs" => {
            let mut words = rest.split_whitespace();
            let mode = match words.next() {
                Some(mode) => mode.parse().map_err(|_| format!("invalid mode '{}'", mode))?,
                None => 0,
            };
            ConsoleCommand::Robot(Request::Logs {
                mode,
                filter: words.map(str::to_string).collect(),
            })
        }
        "ssh" => ConsoleCommand::AuthorizeSsh(required(rest, "ssh <public-key>")?.to_string()),
        "stats" => ConsoleCommand::Stats,
        "cancel-pairing" => ConsoleCommand::CancelPairing,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command '{}', try help", other)),
    };
    Ok(Some(command))
}

fn split_word(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start();
    if text.is_empty() {
        return None;
    }
    match text.find(char::is_whitespace) {
        Some(at) => Some((&text[..at], text[at..].trim_start())),
        None => Some((text, "")),
    }
}

fn required<'a>(rest: &'a str, usage: &str) -> core::result::Result<&'a str, String> {
    let rest = rest.trim();
    if rest.is_empty() {
        Err(format!("usage: {}", usage))
    } else {
        Ok(rest)
    }
}

/// File name for a downloaded log bundle
pub fn log_file_name(robot: &str, file_id: u32) -> String {
    let robot: String = robot
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{}-logs-{}.tar.bz2", robot, file_id)
}

// ----------------------------------------------------------------------------
// Console
// ----------------------------------------------------------------------------

/// Operator console bound to one robot session
pub struct Console {
    robot: String,
    client: RobotClient,
    events: EventReceiver,
    download_dir: PathBuf,
    pin: Option<String>,
}

impl Console {
    pub fn new(
        robot: impl Into<String>,
        client: RobotClient,
        events: EventReceiver,
        download_dir: PathBuf,
        pin: Option<String>,
    ) -> Self {
        Self {
            robot: robot.into(),
            client,
            events,
            download_dir,
            pin,
        }
    }

    /// Run until the operator quits or the robot disconnects
    pub async fn run(mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("Connected to {}. Waiting for pairing, type help for commands.", self.robot);

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    match event {
                        Some(SessionEvent::Disconnected) | None => {
                            println!("Disconnected from {}", self.robot);
                            return Ok(());
                        }
                        Some(event) => self.on_event(event).await?,
                    }
                }

                line = lines.next_line() => {
                    let Some(line) = line? else {
                        debug!("stdin closed");
                        break;
                    };
                    match parse_command(&line) {
                        Ok(Some(ConsoleCommand::Quit)) => break,
                        Ok(Some(command)) => self.execute(command).await?,
                        Ok(None) => {}
                        Err(message) => println!("{}", message),
                    }
                }
            }
        }

        self.client.shutdown().await?;
        Ok(())
    }

    async fn on_event(&mut self, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::HandshakeComplete { version } => {
                info!("Robot speaks protocol v{}", version);
            }
            SessionEvent::VersionMismatch { offered, supported } => {
                println!(
                    "Robot speaks protocol v{}, this client supports v{} only",
                    offered, supported
                );
            }
            SessionEvent::PinRequested => match self.pin.take() {
                Some(pin) => {
                    info!("Submitting PIN from the command line");
                    if let Err(e) = self.client.submit_pin(&pin).await {
                        println!("PIN rejected: {}", e);
                    }
                }
                None => println!("Enter the PIN shown on the robot's face: pin <digits>"),
            },
            SessionEvent::Paired { reconnected } => {
                if reconnected {
                    println!("Secure session resumed with saved keys");
                } else {
                    println!("Paired with {}", self.robot);
                }
            }
            SessionEvent::TransferComplete(transfer) => {
                let path = self.save_transfer(&transfer).await?;
                println!("Received file {} -> {}", transfer.file_id, path.display());
            }
            SessionEvent::OtaProgress {
                status,
                current,
                expected,
            } => print_ota_progress(status, current, expected),
            SessionEvent::PairingCancelled => println!("Robot cancelled pairing"),
            SessionEvent::Disconnected => {}
        }
        Ok(())
    }

    async fn execute(&mut self, command: ConsoleCommand) -> Result<()> {
        match command {
            ConsoleCommand::Pin(pin) => {
                if let Err(e) = self.client.submit_pin(&pin).await {
                    println!("{}", e);
                }
            }
            ConsoleCommand::Robot(request) => {
                let is_logs = matches!(request, Request::Logs { .. });
                let outcome = self.call_interruptible(request).await;
                self.report(outcome, is_logs).await?;
            }
            ConsoleCommand::Stats => {
                let stats = self.client.stats().await?;
                println!("{:#?}", stats);
            }
            ConsoleCommand::AuthorizeSsh(key) => match self.client.authorize_ssh(vec![key]).await {
                Ok(()) => println!("SSH key sent"),
                Err(e) => println!("Could not send SSH key: {}", e),
            },
            ConsoleCommand::CancelPairing => {
                self.client.cancel_pairing().await?;
                println!("Pairing cancelled");
            }
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::Quit => {}
        }
        Ok(())
    }

    async fn call_interruptible(&self, request: Request) -> CommandOutcome<Response> {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl-C: {}", e);
                core::future::pending::<()>().await;
            }
        };
        self.client.call_until(request, ctrl_c).await
    }

    async fn report(&self, outcome: CommandOutcome<Response>, is_logs: bool) -> Result<()> {
        match outcome {
            Ok(Response::Transfer(transfer)) => {
                let path = self.save_transfer(&transfer).await?;
                println!(
                    "Saved {} bytes in {} packets to {}",
                    transfer.data.len(),
                    transfer.packets,
                    path.display()
                );
            }
            Ok(Response::Message(message)) => print_message(&message)?,
            Err(CommandError::Cancelled { kind }) => println!("Stopped waiting for {}", kind),
            Err(e) if is_logs => println!("Log download failed: {}", e),
            Err(e) => println!("{}", e),
        }
        Ok(())
    }

    async fn save_transfer(&self, transfer: &CompletedTransfer) -> Result<PathBuf> {
        save_transfer(&self.download_dir, &self.robot, transfer).await
    }
}

/// Write a completed transfer into `dir`, returning its path
pub async fn save_transfer(dir: &Path, robot: &str, transfer: &CompletedTransfer) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(log_file_name(robot, transfer.file_id));
    tokio::fs::write(&path, &transfer.data).await?;
    Ok(path)
}

fn print_message(message: &RtsMessage) -> Result<()> {
    match message {
        RtsMessage::WifiScanResponse { networks, .. } => {
            if networks.is_empty() {
                println!("No networks found");
            }
            for network in networks {
                println!(
                    "{:<32} signal {} auth {}{}",
                    network.ssid(),
                    network.signal_strength,
                    network.auth_type,
                    if network.hidden { " (hidden)" } else { "" }
                );
            }
        }
        RtsMessage::OtaUpdateResponse {
            status,
            current,
            expected,
        } => print_ota_progress(*status, *current, *expected),
        other => println!("{}", serde_json::to_string_pretty(other)?),
    }
    Ok(())
}

fn print_ota_progress(status: u8, current: u64, expected: u64) {
    if expected > 0 {
        println!(
            "OTA status {}: {}/{} bytes ({}%)",
            status,
            current,
            expected,
            current.saturating_mul(100) / expected
        );
    } else {
        println!("OTA status {}", status);
    }
}

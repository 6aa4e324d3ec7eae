//! Tor Control Port client
//!
//! Communicates with the local Tor daemon via the control protocol. A
//! background reader task separates asynchronous `650` events from command
//! replies: replies go to the single outstanding command, events go to the
//! subscribers of their class.

use super::{ControlConnection, EventSubscription, ListenerId};
use crate::config::TorConfig;
use crate::error::{OnionError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, MutexGuard, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Common cookie file locations
const COOKIE_PATHS: &[&str] = &[
    "/run/tor/control.authcookie",
    "/var/run/tor/control.authcookie",
    "/var/lib/tor/control_auth_cookie",
];

type ReplySender = oneshot::Sender<Result<Vec<String>>>;

/// Commands written to Tor whose replies have not arrived yet, oldest first.
///
/// Tor answers commands strictly in order, so every reply belongs to the
/// front entry. A caller that gave up waiting leaves its entry in place;
/// the reply is read and discarded when it arrives.
#[derive(Debug, Default)]
struct ReplyQueue {
    next_id: u64,
    waiting: VecDeque<(u64, ReplySender)>,
    closed: bool,
}

type SharedReplies = Arc<std::sync::Mutex<ReplyQueue>>;

fn lock_replies(replies: &SharedReplies) -> MutexGuard<'_, ReplyQueue> {
    replies.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Queue slot of one in-flight command.
///
/// Dropped before the command was fully written, the slot is withdrawn so
/// the next reply is not attributed to it.
struct PendingReply<'a> {
    replies: &'a SharedReplies,
    id: u64,
    written: bool,
}

impl<'a> PendingReply<'a> {
    fn enqueue(replies: &'a SharedReplies, tx: ReplySender) -> Result<Self> {
        let mut queue = lock_replies(replies);
        if queue.closed {
            return Err(OnionError::Control("control connection closed".to_string()));
        }
        queue.next_id += 1;
        let id = queue.next_id;
        queue.waiting.push_back((id, tx));
        Ok(Self {
            replies,
            id,
            written: false,
        })
    }
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        if !self.written {
            lock_replies(self.replies).waiting.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Event subscribers, keyed by event class
#[derive(Debug, Default)]
pub struct EventListeners {
    next_id: ListenerId,
    listeners: HashMap<String, Vec<(ListenerId, mpsc::UnboundedSender<String>)>>,
}

impl EventListeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener and hand back its subscription
    pub fn add(&mut self, event: &str) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.next_id += 1;
        let id = self.next_id;
        self.listeners
            .entry(event.to_string())
            .or_default()
            .push((id, tx));
        EventSubscription::new(id, event, rx)
    }

    /// Remove a listener. Returns true if it was registered.
    pub fn remove(&mut self, event: &str, id: ListenerId) -> bool {
        let Some(list) = self.listeners.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.listeners.remove(event);
        }
        removed
    }

    pub fn is_subscribed(&self, event: &str) -> bool {
        self.listeners.contains_key(event)
    }

    /// Number of listeners currently registered for an event class
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.get(event).map_or(0, Vec::len)
    }

    /// Event classes with at least one listener, sorted
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.listeners.keys().cloned().collect();
        names.sort();
        names
    }

    /// Deliver an event body to every listener of `event`.
    /// Listeners whose subscription was dropped are pruned.
    pub fn dispatch(&mut self, event: &str, body: &str) {
        if let Some(list) = self.listeners.get_mut(event) {
            list.retain(|(_, tx)| tx.send(body.to_string()).is_ok());
            if list.is_empty() {
                self.listeners.remove(event);
            }
        }
    }

    /// Drop every listener, ending all subscriptions
    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}

/// Connection to Tor control port
pub struct TorController {
    /// Held for the whole command/response exchange
    writer: Mutex<OwnedWriteHalf>,
    replies: SharedReplies,
    listeners: Arc<Mutex<EventListeners>>,
    reader: JoinHandle<()>,
    version: String,
}

impl TorController {
    /// Connect, authenticate and read the Tor version
    pub async fn connect(config: &TorConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.control_host, config.control_port);
        debug!("Connecting to Tor control port: {}", addr);

        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| OnionError::Control(format!("failed to connect to Tor at {}: {}", addr, e)))?;
        let (read_half, write_half) = stream.into_split();

        let replies = SharedReplies::default();
        let listeners = Arc::new(Mutex::new(EventListeners::new()));
        let reader = tokio::spawn(read_loop(
            BufReader::new(read_half),
            Arc::clone(&replies),
            Arc::clone(&listeners),
        ));

        let mut controller = Self {
            writer: Mutex::new(write_half),
            replies,
            listeners,
            reader,
            version: String::new(),
        };

        if let Some(password) = &config.control_password {
            controller.authenticate_password(password).await?;
        } else {
            controller
                .authenticate_cookie(config.cookie_path.as_deref())
                .await?;
        }

        controller.version = match controller.get_info("version").await {
            Ok(reply) => reply
                .strip_prefix("version=")
                .unwrap_or(&reply)
                .trim()
                .to_string(),
            Err(e) => {
                warn!("Could not get Tor version: {}", e);
                String::from("unknown")
            },
        };
        info!(version = %controller.version, "Connected to Tor control port");

        Ok(controller)
    }

    /// Authenticate with password
    async fn authenticate_password(&self, password: &str) -> Result<()> {
        let cmd = format!("AUTHENTICATE \"{}\"", escape_tor_string(password));
        self.command(&cmd).await?;
        debug!("Authenticated with password");
        Ok(())
    }

    /// Authenticate with cookie file, falling back to null authentication
    async fn authenticate_cookie(&self, configured: Option<&Path>) -> Result<()> {
        let candidates = configured
            .into_iter()
            .map(Path::to_path_buf)
            .chain(COOKIE_PATHS.iter().map(|p| Path::new(p).to_path_buf()));

        for path in candidates {
            if let Ok(cookie) = tokio::fs::read(&path).await {
                let cookie_hex = data_encoding::HEXLOWER.encode(&cookie);
                match self.command(&format!("AUTHENTICATE {}", cookie_hex)).await {
                    Ok(_) => {
                        debug!("Authenticated with cookie from {:?}", path);
                        return Ok(());
                    },
                    Err(e) => {
                        debug!("Cookie auth failed with {:?}: {}", path, e);
                        continue;
                    },
                }
            }
        }

        debug!("Trying null authentication");
        self.command("AUTHENTICATE").await?;
        Ok(())
    }

    /// Get information about the Tor daemon
    pub async fn get_info(&self, keyword: &str) -> Result<String> {
        self.command(&format!("GETINFO {}", keyword)).await
    }

    /// Tell Tor which event classes we want
    async fn set_events(&self, events: &[String]) -> Result<()> {
        let cmd = if events.is_empty() {
            "SETEVENTS".to_string()
        } else {
            format!("SETEVENTS {}", events.join(" "))
        };
        self.command(&cmd).await?;
        Ok(())
    }

    /// Send a command and wait for its reply.
    ///
    /// Cancel safe: a caller that stops waiting does not shift the replies
    /// of later commands.
    async fn command(&self, cmd: &str) -> Result<String> {
        let mut writer = self.writer.lock().await;

        let (tx, rx) = oneshot::channel();
        let mut pending = PendingReply::enqueue(&self.replies, tx)?;

        debug!("Sending Tor command: {}", redact_command(cmd));
        let write = async {
            writer.write_all(cmd.as_bytes()).await?;
            writer.write_all(b"\r\n").await?;
            writer.flush().await
        };
        if let Err(e) = write.await {
            return Err(OnionError::Control(format!("failed to send command: {}", e)));
        }
        pending.written = true;

        let lines = rx
            .await
            .map_err(|_| OnionError::Control("connection closed before reply".to_string()))??;
        Ok(reply_text(lines))
    }
}

impl Drop for TorController {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl ControlConnection for TorController {
    async fn send_command(&self, command: &str) -> Result<String> {
        self.command(command).await
    }

    async fn subscribe(&self, event: &str) -> Result<EventSubscription> {
        let (subscription, names, changed) = {
            let mut listeners = self.listeners.lock().await;
            let changed = !listeners.is_subscribed(event);
            let subscription = listeners.add(event);
            (subscription, listeners.event_names(), changed)
        };

        if changed {
            if let Err(e) = self.set_events(&names).await {
                self.listeners.lock().await.remove(event, subscription.id());
                return Err(e);
            }
        }
        debug!(event = %event, id = subscription.id(), "Subscribed to events");
        Ok(subscription)
    }

    async fn unsubscribe(&self, subscription: EventSubscription) -> Result<()> {
        let event = subscription.event().to_string();
        let (names, changed) = {
            let mut listeners = self.listeners.lock().await;
            listeners.remove(&event, subscription.id());
            (listeners.event_names(), !listeners.is_subscribed(&event))
        };
        drop(subscription);

        if changed {
            self.set_events(&names).await?;
        }
        debug!(event = %event, "Unsubscribed from events");
        Ok(())
    }

    fn version(&self) -> &str {
        &self.version
    }
}

/// Reply accumulated by the reader task
#[derive(Debug, Default)]
struct ReplyParser {
    lines: Vec<String>,
    in_data_block: bool,
    event: Option<String>,
    event_in_data_block: bool,
}

/// One parsed unit of control-port output
#[derive(Debug, PartialEq, Eq)]
enum Parsed {
    /// Line consumed, nothing complete yet
    Partial,
    /// Complete reply to the outstanding command
    Reply(std::result::Result<Vec<String>, String>),
    /// Complete asynchronous event (`<CLASS> <body>`)
    Event(String),
}

impl ReplyParser {
    fn feed(&mut self, line: &str) -> Parsed {
        // Data blocks end with a lone "."
        if self.event_in_data_block {
            if line == "." {
                self.event_in_data_block = false;
            } else if let Some(event) = self.event.as_mut() {
                event.push('\n');
                event.push_str(line.strip_prefix('.').unwrap_or(line));
            }
            return Parsed::Partial;
        }
        if self.in_data_block {
            if line == "." {
                self.in_data_block = false;
            } else if let Some(last) = self.lines.last_mut() {
                last.push('\n');
                last.push_str(line.strip_prefix('.').unwrap_or(line));
            }
            return Parsed::Partial;
        }

        if line.len() < 4 || !line.is_char_boundary(3) || !line.is_char_boundary(4) {
            warn!("Ignoring malformed control line: {:?}", line);
            return Parsed::Partial;
        }
        let (code, separator, text) = (&line[..3], &line[3..4], &line[4..]);

        if code == "650" {
            let event = match self.event.take() {
                Some(mut buf) => {
                    buf.push('\n');
                    buf.push_str(text);
                    buf
                },
                None => text.to_string(),
            };
            return match separator {
                " " => Parsed::Event(event),
                "+" => {
                    self.event = Some(event);
                    self.event_in_data_block = true;
                    Parsed::Partial
                },
                _ => {
                    self.event = Some(event);
                    Parsed::Partial
                },
            };
        }

        self.lines.push(text.to_string());
        match separator {
            " " => {
                let lines = std::mem::take(&mut self.lines);
                if code.starts_with('2') {
                    Parsed::Reply(Ok(lines))
                } else {
                    Parsed::Reply(Err(format!("{} {}", code, lines.join("\n"))))
                }
            },
            "+" => {
                self.in_data_block = true;
                Parsed::Partial
            },
            _ => Parsed::Partial,
        }
    }
}

/// Reader task: route replies and events until the connection closes
async fn read_loop(
    reader: BufReader<OwnedReadHalf>,
    replies: SharedReplies,
    listeners: Arc<Mutex<EventListeners>>,
) {
    let mut lines = reader.lines();
    let mut parser = ReplyParser::default();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Tor control connection closed");
                break;
            },
            Err(e) => {
                warn!("Error reading from Tor control port: {}", e);
                break;
            },
        };

        match parser.feed(&line) {
            Parsed::Partial => {},
            Parsed::Event(event) => {
                let (class, body) = event.split_once(' ').unwrap_or((event.as_str(), ""));
                listeners.lock().await.dispatch(class, body);
            },
            Parsed::Reply(reply) => {
                let reply = reply.map_err(|status| {
                    warn!("Tor control error: {}", status);
                    OnionError::Control(status)
                });
                let next = lock_replies(&replies).waiting.pop_front();
                match next {
                    Some((_, tx)) => {
                        if tx.send(reply).is_err() {
                            debug!("Discarding reply to an abandoned command");
                        }
                    },
                    None => warn!("Dropping unsolicited control reply"),
                }
            },
        }
    }

    let waiting = {
        let mut queue = lock_replies(&replies);
        queue.closed = true;
        std::mem::take(&mut queue.waiting)
    };
    for (_, tx) in waiting {
        let _ = tx.send(Err(OnionError::Control(
            "control connection closed".to_string(),
        )));
    }
    listeners.lock().await.clear();
}

/// Join reply lines, dropping the trailing `OK` that follows data lines
fn reply_text(mut lines: Vec<String>) -> String {
    if lines.len() > 1 && lines.last().is_some_and(|l| l == "OK") {
        lines.pop();
    }
    lines.join("\n")
}

/// Hide key material and passwords from logs
fn redact_command(cmd: &str) -> String {
    if cmd.starts_with("AUTHENTICATE ") {
        return "AUTHENTICATE <redacted>".to_string();
    }
    cmd.split(' ')
        .map(|word| {
            if word.starts_with("RSA1024:") || word.starts_with("ED25519-V3:") {
                let (alg, _) = word.split_once(':').unwrap_or((word, ""));
                format!("{}:<redacted>", alg)
            } else if let Some((name, _)) = word
                .strip_prefix("ClientAuth=")
                .and_then(|rest| rest.split_once(':'))
            {
                format!("ClientAuth={}:<redacted>", name)
            } else {
                word.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Escape a string for Tor control protocol.
pub(crate) fn escape_tor_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

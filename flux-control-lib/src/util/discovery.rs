//! Broadcast discovery of bulbs on the local network.
//!
//! A scan session periodically broadcasts a fixed beacon on the discovery
//! port and parses the replies bulbs send back. Each distinct bulb is
//! reported once per session.

use std::collections::HashSet;
use std::future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant};

/// UDP port bulbs listen on for discovery beacons.
pub const DISCOVERY_PORT: u16 = 48899;

/// The fixed beacon text that provokes discovery replies.
pub const BEACON: &[u8] = b"HF-A11ASSISTHREAD";

/// How often the beacon is re-broadcast while scanning.
const BEACON_INTERVAL: Duration = Duration::from_secs(1);

/// One bulb's discovery announcement: its address, opaque id and model.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize)]
pub struct DiscoveredBulb {
    pub ip_address: Ipv4Addr,
    pub id: String,
    pub model: String,
}

/// Notifications emitted by a [`Scanner`], delivered in order to a single
/// subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// A scan session started.
    Scanning,
    /// A bulb announced itself for the first time this session.
    Bulb(DiscoveredBulb),
    /// The scan session ended, by explicit stop or timeout.
    Stopped,
}

/// Parse a discovery reply of the form `<ipv4>,<id>,<model>`.
///
/// The first two commas split the fields; the model keeps any further
/// commas. Replies whose first field is not a well-formed IPv4 address, or
/// with an empty id or model, are rejected.
pub fn parse_announcement(text: &str) -> Option<DiscoveredBulb> {
    let mut fields = text.splitn(3, ',');
    let ip_address: Ipv4Addr = fields.next()?.parse().ok()?;
    let id = fields.next()?;
    let model = fields.next()?;
    if id.is_empty() || model.is_empty() {
        return None;
    }
    Some(DiscoveredBulb {
        ip_address,
        id: id.to_string(),
        model: model.to_string(),
    })
}

/// A discovery session over one broadcast UDP socket.
///
/// Either idle or scanning; [`Scanner::scan`] and [`Scanner::stop_scanning`]
/// are idempotent. While scanning, a background task owns the socket and
/// reports bulbs through the event channel.
pub struct Scanner {
    bind_port: u16,
    target: SocketAddr,
    events: Option<mpsc::UnboundedSender<ScanEvent>>,
    stop: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl Default for Scanner {
    fn default() -> Self {
        Scanner::new()
    }
}

impl Scanner {
    /// A scanner for the standard discovery port and broadcast address.
    pub fn new() -> Self {
        Scanner::with_endpoints(
            DISCOVERY_PORT,
            SocketAddr::from((Ipv4Addr::BROADCAST, DISCOVERY_PORT)),
        )
    }

    /// A scanner with non-standard endpoints, for unusual network setups.
    pub fn with_endpoints(bind_port: u16, target: SocketAddr) -> Self {
        Scanner {
            bind_port,
            target,
            events: None,
            stop: Arc::new(Notify::new()),
            task: None,
        }
    }

    /// Subscribe to scan events, replacing any previous subscriber.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ScanEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    pub fn is_scanning(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Start a scan session, optionally auto-stopping after `timeout`.
    ///
    /// A no-op if a session is already running. Each session starts with an
    /// empty de-duplication set, so a bulb found in an earlier session is
    /// reported again.
    pub async fn scan(&mut self, timeout: Option<Duration>) -> anyhow::Result<()> {
        if self.is_scanning() {
            debug!("scan requested while already scanning");
            return Ok(());
        }

        let socket = UdpSocket::bind(("0.0.0.0", self.bind_port))
            .await
            .context("failed to bind discovery socket")?;
        socket
            .set_broadcast(true)
            .context("failed to enable broadcast on discovery socket")?;

        let stop = Arc::new(Notify::new());
        self.stop = stop.clone();
        // Emit before spawning so Scanning always precedes any Bulb event.
        emit(&self.events, ScanEvent::Scanning);
        self.task = Some(tokio::spawn(scan_loop(
            socket,
            self.target,
            timeout,
            stop,
            self.events.clone(),
        )));
        Ok(())
    }

    /// End the current scan session.
    ///
    /// A no-op if no session is running. [`ScanEvent::Stopped`] is emitted
    /// exactly once per session, whether it ends here or by timeout.
    pub async fn stop_scanning(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        self.stop.notify_one();
        let _ = task.await;
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// Broadcast for `timeout` and collect every bulb announced in that window.
pub async fn find_bulbs(timeout: Duration) -> anyhow::Result<Vec<DiscoveredBulb>> {
    let mut scanner = Scanner::new();
    let mut events = scanner.subscribe();
    scanner.scan(Some(timeout)).await?;

    let mut bulbs = Vec::new();
    while let Some(event) = events.recv().await {
        match event {
            ScanEvent::Bulb(bulb) => bulbs.push(bulb),
            ScanEvent::Stopped => break,
            ScanEvent::Scanning => {}
        }
    }
    Ok(bulbs)
}

/// Print discovered bulbs as an aligned plaintext table.
pub fn pretty_print_bulbs(bulbs: &[DiscoveredBulb]) {
    let ip_width = bulbs
        .iter()
        .map(|b| b.ip_address.to_string().len())
        .max()
        .unwrap_or(0)
        .max("IP Address".len())
        + 2;
    let id_width = bulbs
        .iter()
        .map(|b| b.id.len())
        .max()
        .unwrap_or(0)
        .max("ID".len())
        + 2;
    let model_width = bulbs
        .iter()
        .map(|b| b.model.len())
        .max()
        .unwrap_or(0)
        .max("Model".len())
        + 2;

    println!(
        "{:<ip_width$} {:<id_width$} {:<model_width$}",
        "IP Address", "ID", "Model",
    );
    println!(
        "{:<ip_width$} {:<id_width$} {:<model_width$}",
        "-".repeat(ip_width - 2),
        "-".repeat(id_width - 2),
        "-".repeat(model_width - 2),
    );
    for bulb in bulbs {
        println!(
            "{:<ip_width$} {:<id_width$} {:<model_width$}",
            bulb.ip_address, bulb.id, bulb.model,
        );
    }
}

async fn scan_loop(
    socket: UdpSocket,
    target: SocketAddr,
    timeout: Option<Duration>,
    stop: Arc<Notify>,
    events: Option<mpsc::UnboundedSender<ScanEvent>>,
) {
    let mut seen: HashSet<IpAddr> = HashSet::new();
    let mut malformed: u64 = 0;
    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    // First tick fires immediately, so the beacon goes out right away.
    let mut beacon_timer = interval(BEACON_INTERVAL);
    let mut buf = [0u8; 1024];

    loop {
        tokio::select! {
            _ = stop.notified() => break,
            _ = until(deadline) => break,
            _ = beacon_timer.tick() => {
                if let Err(err) = socket.send_to(BEACON, target).await {
                    warn!("failed to send discovery beacon: {err}");
                }
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, src)) => {
                    if let Some(bulb) =
                        handle_datagram(&mut seen, src, &buf[..len], &mut malformed)
                    {
                        info!(
                            "discovered bulb {} ({}) at {}",
                            bulb.id, bulb.model, bulb.ip_address
                        );
                        emit(&events, ScanEvent::Bulb(bulb));
                    }
                }
                Err(err) => {
                    warn!("discovery socket error: {err}");
                    break;
                }
            },
        }
    }

    if malformed > 0 {
        debug!("dropped {malformed} malformed discovery replies this session");
    }
    emit(&events, ScanEvent::Stopped);
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

/// Decide what one incoming datagram means for the session.
///
/// The loopback of our own beacon and repeat announcements from an
/// already-seen source address are ignored. Replies that do not parse are
/// dropped with a warning; scanning continues.
fn handle_datagram(
    seen: &mut HashSet<IpAddr>,
    src: SocketAddr,
    data: &[u8],
    malformed: &mut u64,
) -> Option<DiscoveredBulb> {
    if data == BEACON {
        return None;
    }
    if seen.contains(&src.ip()) {
        return None;
    }

    let Ok(text) = std::str::from_utf8(data) else {
        *malformed += 1;
        warn!("ignoring non-text discovery reply from {src}");
        return None;
    };
    match parse_announcement(text) {
        Some(bulb) => {
            seen.insert(src.ip());
            Some(bulb)
        }
        None => {
            *malformed += 1;
            warn!("ignoring malformed discovery reply from {src}: {text:?}");
            None
        }
    }
}

fn emit(events: &Option<mpsc::UnboundedSender<ScanEvent>>, event: ScanEvent) {
    if let Some(events) = events {
        // A dropped subscriber is not an error.
        let _ = events.send(event);
    }
}

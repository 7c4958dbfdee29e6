use std::time::Duration;

use bytes::Bytes;
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::ControlError;
use crate::protocol::{self, BulbState, LightMode, PowerState, ResponseMatcher, RGB};
use crate::util::discovery::DiscoveredBulb;

/// Default bound on how long a single command waits for its reply. The
/// protocol itself has no such bound; a bulb that drops off the network
/// would otherwise leave the caller waiting forever.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Notifications emitted by a [`ControlInterface`], delivered in order to a
/// single subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulbEvent {
    /// The TCP connection to the bulb was established.
    Connected,
    /// A state query completed and the bulb state was refreshed.
    StateUpdated(BulbState),
}

/// One control session with one bulb.
///
/// Owns the TCP connection and the bulb's last known state. Every operation
/// takes `&mut self`, which serializes the session: the receive buffer and
/// the pending-reply queue are never touched from two places at once.
pub struct ControlInterface {
    pub host: String,
    pub port: u16,
    /// Opaque device id, known only for bulbs that came from discovery.
    pub id: Option<String>,
    /// Model string, known only for bulbs that came from discovery.
    pub model: Option<String>,
    state: BulbState,
    stream: Option<TcpStream>,
    matcher: ResponseMatcher,
    events: Option<mpsc::UnboundedSender<BulbEvent>>,
    response_timeout: Duration,
}

impl ControlInterface {
    /// Create an unconnected session for a bulb at `host` on the default
    /// command port.
    pub fn new(host: &str) -> Self {
        ControlInterface {
            host: host.to_string(),
            port: protocol::DEFAULT_PORT,
            id: None,
            model: None,
            state: BulbState::default(),
            stream: None,
            matcher: ResponseMatcher::new(),
            events: None,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    /// Use a non-default command port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Create an unconnected session for a bulb found by discovery, carrying
    /// over its reported id and model.
    pub fn from_discovered(bulb: &DiscoveredBulb) -> Self {
        let mut interface = ControlInterface::new(&bulb.ip_address.to_string());
        interface.id = Some(bulb.id.clone());
        interface.model = Some(bulb.model.clone());
        interface
    }

    /// Bound the per-command wait for a reply.
    pub fn set_response_timeout(&mut self, response_timeout: Duration) {
        self.response_timeout = response_timeout;
    }

    /// Subscribe to session events, replacing any previous subscriber.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<BulbEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// The last state reported by the bulb.
    pub fn state(&self) -> BulbState {
        self.state
    }

    /// Open the TCP connection and immediately query the bulb's state.
    ///
    /// A no-op if the session is already connected.
    pub async fn connect(&mut self) -> Result<(), ControlError> {
        if self.stream.is_some() {
            return Ok(());
        }
        debug!("connecting to {}:{}", self.host, self.port);
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        self.stream = Some(stream);
        self.emit(BulbEvent::Connected);
        self.refresh_state().await?;
        Ok(())
    }

    /// Drop the connection.
    ///
    /// Any reply still pending resolves as failed rather than hanging.
    pub fn disconnect(&mut self) {
        self.stream = None;
        self.matcher.clear();
    }

    /// Query the bulb and update the stored state from its reply.
    pub async fn refresh_state(&mut self) -> Result<BulbState, ControlError> {
        let reply = self
            .request(&protocol::STATE_QUERY, protocol::STATE_REPLY_LEN)
            .await?;
        let state = protocol::decode_state_reply(&reply)?;
        self.state = state;
        self.emit(BulbEvent::StateUpdated(state));
        Ok(state)
    }

    /// Switch the bulb on.
    pub async fn turn_on(&mut self) -> Result<(), ControlError> {
        self.request(&protocol::POWER_ON, protocol::ACK_LEN).await?;
        self.state.power = PowerState::On;
        Ok(())
    }

    /// Switch the bulb off.
    pub async fn turn_off(&mut self) -> Result<(), ControlError> {
        self.request(&protocol::POWER_OFF, protocol::ACK_LEN).await?;
        self.state.power = PowerState::Off;
        Ok(())
    }

    /// Set a static RGB color.
    ///
    /// The stored state records the requested color once the bulb
    /// acknowledges, rather than re-querying the device.
    pub async fn set_color(&mut self, red: u8, green: u8, blue: u8) -> Result<(), ControlError> {
        let payload = protocol::set_color_command(red, green, blue);
        self.request(&payload, protocol::ACK_LEN).await?;
        self.state.mode = LightMode::Color;
        self.state.color = Some(RGB { red, green, blue });
        Ok(())
    }

    /// Send one framed command and wait for its fixed-length reply.
    ///
    /// The acknowledgement bytes the bulb sends back are never inspected;
    /// arrival alone is treated as success, as the firmware encodes nothing
    /// useful in them.
    async fn request(&mut self, payload: &[u8], reply_len: usize) -> Result<Bytes, ControlError> {
        let wait = self.response_timeout;
        let Self {
            stream, matcher, ..
        } = self;
        let stream = stream.as_mut().ok_or(ControlError::NotConnected)?;

        matcher.drop_abandoned();

        let frame = protocol::encode_frame(payload);
        stream.write_all(&frame).await?;
        debug!("sent frame {}", hex::encode(&frame));

        let mut rx = matcher.expect(reply_len);
        // Bytes over-delivered with an earlier reply may already satisfy
        // this expectation.
        matcher.on_bytes(&[]);

        let result = timeout(wait, async {
            let mut chunk = [0u8; 256];
            loop {
                tokio::select! {
                    reply = &mut rx => {
                        return reply.map_err(|_| ControlError::ConnectionClosed);
                    }
                    read = stream.read(&mut chunk) => {
                        match read {
                            Ok(0) => return Err(ControlError::ConnectionClosed),
                            Ok(n) => matcher.on_bytes(&chunk[..n]),
                            Err(err) => return Err(err.into()),
                        }
                    }
                }
            }
        })
        .await;

        match result {
            Ok(reply) => reply,
            Err(_) => {
                // Remove the abandoned expectation so a later request does
                // not match against a reply that never came.
                drop(rx);
                matcher.drop_abandoned();
                Err(ControlError::ResponseTimeout { waited: wait })
            }
        }
    }

    fn emit(&self, event: BulbEvent) {
        if let Some(events) = &self.events {
            // A dropped subscriber is not an error.
            let _ = events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const STATE_QUERY_FRAME: [u8; 4] = [0x81, 0x8a, 0x8b, 0x96];
    const POWER_ON_FRAME: [u8; 4] = [0x71, 0x23, 0x0f, 0xa3];

    fn on_color_reply() -> [u8; 14] {
        let mut reply = [0u8; 14];
        reply[2] = 0x23; // power on
        reply[3] = 0x61; // static pattern
        reply[6] = 10;
        reply[7] = 20;
        reply[8] = 30;
        reply[9] = 0; // warm-white off, so mode is color
        reply
    }

    async fn serve_state_query(sock: &mut tokio::net::TcpStream) {
        let mut frame = [0u8; 4];
        sock.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame, STATE_QUERY_FRAME);
        let reply = on_color_reply();
        // Deliver the reply in two chunks to exercise reassembly.
        sock.write_all(&reply[..5]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        sock.write_all(&reply[5..]).await.unwrap();
    }

    async fn connected_interface(
        listener: &TcpListener,
    ) -> (ControlInterface, mpsc::UnboundedReceiver<BulbEvent>) {
        let addr = listener.local_addr().unwrap();
        let mut interface =
            ControlInterface::new(&addr.ip().to_string()).with_port(addr.port());
        let events = interface.subscribe();
        (interface, events)
    }

    #[tokio::test]
    async fn test_connect_queries_state() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (mut interface, mut events) = connected_interface(&listener).await;

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            serve_state_query(&mut sock).await;
            sock
        });

        interface.connect().await.unwrap();
        server.await.unwrap();

        let state = interface.state();
        assert_eq!(state.power, PowerState::On);
        assert_eq!(state.mode, LightMode::Color);
        assert_eq!(
            state.color,
            Some(RGB {
                red: 10,
                green: 20,
                blue: 30
            })
        );

        assert_eq!(events.recv().await, Some(BulbEvent::Connected));
        assert_eq!(events.recv().await, Some(BulbEvent::StateUpdated(state)));

        // A second connect on a live session is a no-op.
        interface.connect().await.unwrap();
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_power_and_color_commands() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (mut interface, _events) = connected_interface(&listener).await;

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            serve_state_query(&mut sock).await;

            let mut frame = [0u8; 4];
            sock.read_exact(&mut frame).await.unwrap();
            assert_eq!(frame, POWER_ON_FRAME);
            sock.write_all(&[0x30]).await.unwrap();

            let mut frame = [0u8; 8];
            sock.read_exact(&mut frame).await.unwrap();
            assert_eq!(frame, [0x31, 10, 20, 30, 0x00, 0xf0, 0x0f, 0x6c]);
            sock.write_all(&[0x30]).await.unwrap();
        });

        interface.connect().await.unwrap();
        interface.turn_on().await.unwrap();
        assert_eq!(interface.state().power, PowerState::On);

        interface.set_color(10, 20, 30).await.unwrap();
        let state = interface.state();
        assert_eq!(state.mode, LightMode::Color);
        assert_eq!(
            state.color,
            Some(RGB {
                red: 10,
                green: 20,
                blue: 30
            })
        );

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let mut interface = ControlInterface::new("127.0.0.1");
        assert!(matches!(
            interface.turn_on().await,
            Err(ControlError::NotConnected)
        ));
        assert!(matches!(
            interface.refresh_state().await,
            Err(ControlError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_silent_bulb_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (mut interface, _events) = connected_interface(&listener).await;
        interface.set_response_timeout(Duration::from_millis(100));

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            serve_state_query(&mut sock).await;
            // Swallow the next command and never acknowledge it.
            let mut frame = [0u8; 4];
            sock.read_exact(&mut frame).await.unwrap();
            sock
        });

        interface.connect().await.unwrap();
        assert!(matches!(
            interface.turn_on().await,
            Err(ControlError::ResponseTimeout { .. })
        ));
        // Power state keeps its last known value after a failed command.
        assert_eq!(interface.state().power, PowerState::On);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_from_discovered_carries_identity() {
        let bulb = DiscoveredBulb {
            ip_address: "10.0.0.5".parse().unwrap(),
            id: "ABC123".to_string(),
            model: "AK001-ZJ2147".to_string(),
        };
        let interface = ControlInterface::from_discovered(&bulb);
        assert_eq!(interface.host, "10.0.0.5");
        assert_eq!(interface.port, protocol::DEFAULT_PORT);
        assert_eq!(interface.id.as_deref(), Some("ABC123"));
        assert_eq!(interface.model.as_deref(), Some("AK001-ZJ2147"));
        assert!(!interface.is_connected());
    }
}

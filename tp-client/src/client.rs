//! TCP connection to Touch Portal.
//!
//! The client pairs with Touch Portal, then two threads own the socket: a
//! reader that decodes inbound lines and forwards them over a channel, and
//! a writer that drains the outbound queue. Sending from any thread only
//! enqueues, so a stalled socket never blocks the caller.

use crate::error::ClientError;
use crate::message::{Inbound, Outbound};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Default address of the Touch Portal plugin socket.
pub const DEFAULT_ADDR: &str = "127.0.0.1:12136";

/// A write stuck this long drops the connection.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection state shared with the reader and writer threads.
#[derive(Default)]
struct Shared {
    /// Long connector id -> short id assigned by Touch Portal
    short_ids: RwLock<HashMap<String, String>>,

    /// Actions whose button is currently held down
    held: Mutex<HashSet<String>>,

    connected: AtomicBool,
}

/// A paired Touch Portal connection.
pub struct Client {
    plugin_id: String,
    /// Outbound queue; `None` once disconnecting.
    outbox: Mutex<Option<Sender<String>>>,
    socket: TcpStream,
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Connect to Touch Portal and pair as `plugin_id`.
    ///
    /// Returns the client and the receiving end of the inbound event channel.
    /// The channel closes when Touch Portal disconnects.
    pub fn connect(
        addr: &str,
        plugin_id: &str,
    ) -> Result<(Arc<Client>, Receiver<Inbound>), ClientError> {
        let mut stream = TcpStream::connect(addr).map_err(|source| ClientError::ConnectFailed {
            addr: addr.to_string(),
            source,
        })?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

        // Pairing is written inline so a dead socket fails the connect.
        let pair = Outbound::Pair {
            id: plugin_id.to_string(),
        }
        .to_line()?;
        stream.write_all(pair.as_bytes())?;

        let read_half = stream.try_clone()?;
        let write_half = stream.try_clone()?;

        let shared = Arc::new(Shared::default());
        shared.connected.store(true, Ordering::SeqCst);

        let (out_tx, out_rx) = mpsc::channel::<String>();
        let writer = std::thread::Builder::new()
            .name("tp-writer".to_string())
            .spawn({
                let shared = Arc::clone(&shared);
                move || write_loop(write_half, out_rx, shared)
            })?;

        let (tx, rx) = mpsc::channel();
        let reader = std::thread::Builder::new()
            .name("tp-reader".to_string())
            .spawn({
                let shared = Arc::clone(&shared);
                move || read_loop(read_half, shared, tx)
            })?;

        let client = Arc::new(Client {
            plugin_id: plugin_id.to_string(),
            outbox: Mutex::new(Some(out_tx)),
            socket: stream,
            shared,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
        });

        tracing::info!("Paired with Touch Portal at {} as {}", addr, plugin_id);
        Ok((client, rx))
    }

    /// The plugin id this client paired with.
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Queue a raw outbound message. Never waits on the socket.
    pub fn send(&self, message: &Outbound) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::Disconnected);
        }
        let line = message.to_line()?;
        self.outbox
            .lock()
            .as_ref()
            .ok_or(ClientError::Disconnected)?
            .send(line)
            .map_err(|_| ClientError::Disconnected)
    }

    pub fn state_update(&self, id: &str, value: &str) -> Result<(), ClientError> {
        self.send(&Outbound::StateUpdate {
            id: id.to_string(),
            value: value.to_string(),
        })
    }

    pub fn create_state(
        &self,
        id: &str,
        desc: &str,
        parent_group: &str,
        default_value: &str,
    ) -> Result<(), ClientError> {
        self.send(&Outbound::CreateState {
            id: id.to_string(),
            desc: desc.to_string(),
            default_value: default_value.to_string(),
            parent_group: parent_group.to_string(),
        })
    }

    pub fn remove_state(&self, id: &str) -> Result<(), ClientError> {
        self.send(&Outbound::RemoveState { id: id.to_string() })
    }

    /// Replace the values of a choice list, optionally for one action instance.
    pub fn choice_update(
        &self,
        id: &str,
        values: &[String],
        instance_id: Option<&str>,
    ) -> Result<(), ClientError> {
        self.send(&Outbound::ChoiceUpdate {
            id: id.to_string(),
            value: values.to_vec(),
            instance_id: instance_id.map(str::to_string),
        })
    }

    /// Move a slider addressed by its short id.
    pub fn connector_update(&self, short_id: &str, value: u8) -> Result<(), ClientError> {
        self.send(&Outbound::ConnectorUpdate {
            short_id: short_id.to_string(),
            value: value.min(100),
        })
    }

    /// Look up the short id Touch Portal assigned to a long connector id.
    pub fn short_id(&self, connector_id: &str) -> Option<String> {
        self.shared.short_ids.read().get(connector_id).cloned()
    }

    /// Whether the button for `action_id` is currently held.
    pub fn is_held(&self, action_id: &str) -> bool {
        self.shared.held.lock().contains(action_id)
    }

    /// Flush queued messages, close the socket and join both threads. Safe
    /// to call twice.
    pub fn disconnect(&self) {
        // Closing the queue lets the writer drain what is left and exit.
        drop(self.outbox.lock().take());
        if let Some(handle) = self.writer.lock().take() {
            if handle.join().is_err() {
                tracing::error!("Touch Portal writer thread panicked");
            }
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        let _ = self.socket.shutdown(Shutdown::Both);
        if let Some(handle) = self.reader.lock().take() {
            if handle.join().is_err() {
                tracing::error!("Touch Portal reader thread panicked");
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shared.connected.store(false, Ordering::SeqCst);
    }
}

fn write_loop(mut stream: TcpStream, lines: Receiver<String>, shared: Arc<Shared>) {
    for line in lines {
        if let Err(e) = stream.write_all(line.as_bytes()) {
            if shared.connected.swap(false, Ordering::SeqCst) {
                tracing::warn!("Touch Portal write failed: {}", e);
            }
            // Unblocks the reader too.
            let _ = stream.shutdown(Shutdown::Both);
            break;
        }
    }
    tracing::debug!("Touch Portal writer stopped");
}

fn read_loop(stream: TcpStream, shared: Arc<Shared>, tx: Sender<Inbound>) {
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                if shared.connected.load(Ordering::SeqCst) {
                    tracing::warn!("Touch Portal read failed: {}", e);
                }
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let message: Inbound = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping malformed message ({}): {}", e, line);
                continue;
            }
        };

        match &message {
            Inbound::ShortConnectorIdNotification {
                short_id,
                connector_id,
            } => {
                tracing::debug!("Short id {} bound to {}", short_id, connector_id);
                shared
                    .short_ids
                    .write()
                    .insert(connector_id.clone(), short_id.clone());
            }
            Inbound::Down { action_id, .. } => {
                shared.held.lock().insert(action_id.clone());
            }
            Inbound::Up { action_id, .. } => {
                shared.held.lock().remove(action_id);
            }
            _ => {}
        }

        let closing = matches!(message, Inbound::ClosePlugin);
        if tx.send(message).is_err() || closing {
            break;
        }
    }

    shared.connected.store(false, Ordering::SeqCst);
    tracing::debug!("Touch Portal reader stopped");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Instant;

    fn accept_pair() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    fn read_line(reader: &mut BufReader<TcpStream>) -> serde_json::Value {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[test]
    fn test_connect_sends_pair() {
        let (listener, addr) = accept_pair();
        let (client, _rx) = Client::connect(&addr, "test.plugin").unwrap();

        let (server, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(server);
        let pair = read_line(&mut reader);
        assert_eq!(pair["type"], "pair");
        assert_eq!(pair["id"], "test.plugin");

        client.state_update("some.state", "42").unwrap();
        let update = read_line(&mut reader);
        assert_eq!(update["type"], "stateUpdate");
        assert_eq!(update["value"], "42");

        client.disconnect();
    }

    #[test]
    fn test_short_id_and_hold_tracking() {
        let (listener, addr) = accept_pair();
        let (client, rx) = Client::connect(&addr, "test.plugin").unwrap();
        let (mut server, _) = listener.accept().unwrap();

        server
            .write_all(
                b"{\"type\":\"shortConnectorIdNotification\",\"pluginId\":\"test.plugin\",\"shortId\":\"s1\",\"connectorId\":\"pc_test.plugin_c|d=x\"}\n",
            )
            .unwrap();
        server
            .write_all(b"{\"type\":\"down\",\"pluginId\":\"test.plugin\",\"actionId\":\"a\",\"data\":[]}\n")
            .unwrap();

        // Events are forwarded after the shared maps are updated.
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(client.short_id("pc_test.plugin_c|d=x").as_deref(), Some("s1"));
        assert!(client.short_id("pc_test.plugin_c|d=y").is_none());
        assert!(client.is_held("a"));

        server
            .write_all(b"{\"type\":\"up\",\"pluginId\":\"test.plugin\",\"actionId\":\"a\",\"data\":[]}\n")
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!client.is_held("a"));

        client.disconnect();
    }

    #[test]
    fn test_close_plugin_ends_channel() {
        let (listener, addr) = accept_pair();
        let (client, rx) = Client::connect(&addr, "test.plugin").unwrap();
        let (mut server, _) = listener.accept().unwrap();

        server
            .write_all(b"not json\n{\"type\":\"closePlugin\",\"pluginId\":\"test.plugin\"}\n")
            .unwrap();

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Inbound::ClosePlugin
        );
        // Reader exits after closePlugin, dropping the sender.
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_err());

        client.disconnect();
        assert!(!client.is_connected());
        assert!(matches!(
            client.state_update("x", "y"),
            Err(ClientError::Disconnected)
        ));
    }

    #[test]
    fn test_send_does_not_wait_for_a_stalled_peer() {
        let (listener, addr) = accept_pair();
        let (client, _rx) = Client::connect(&addr, "test.plugin").unwrap();
        // Accepted but never read, so the socket buffers fill up.
        let (server, _) = listener.accept().unwrap();

        let value = "x".repeat(4096);
        let started = Instant::now();
        for i in 0..2048 {
            client.state_update(&format!("state.{}", i), &value).unwrap();
        }
        assert!(started.elapsed() < WRITE_TIMEOUT, "{:?}", started.elapsed());

        // Resetting the peer fails the pending write and ends the writer.
        drop(server);
        client.disconnect();
        assert!(!client.is_connected());
    }

    #[test]
    fn test_disconnect_flushes_queued_messages() {
        let (listener, addr) = accept_pair();
        let (client, _rx) = Client::connect(&addr, "test.plugin").unwrap();
        let (server, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(server);
        read_line(&mut reader);

        for i in 0..10 {
            client.state_update("queued", &i.to_string()).unwrap();
        }
        client.disconnect();

        for i in 0..10 {
            assert_eq!(read_line(&mut reader)["value"], i.to_string());
        }
    }

    #[test]
    fn test_connect_refused() {
        let (listener, addr) = accept_pair();
        drop(listener);
        assert!(matches!(
            Client::connect(&addr, "test.plugin"),
            Err(ClientError::ConnectFailed { .. })
        ));
    }
}

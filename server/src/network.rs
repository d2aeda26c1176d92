//! Server network layer handling WebSocket connections and message routing

use crate::error::ServerError;
use crate::matchmaker::{Matchmaker, Seat};
use crate::session_manager::{SessionRegistry, OUTBOX_CAPACITY};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{ClientUpdate, ServerMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// How long a departing connection may take to flush its queued messages.
const WRITER_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
        }
    }
}

/// Accepts connections and hands each one to its own task
pub struct Server {
    listener: TcpListener,
    matchmaker: Matchmaker,
}

impl Server {
    pub async fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let registry = Arc::new(RwLock::new(SessionRegistry::new()));
        Ok(Server {
            listener,
            matchmaker: Matchmaker::new(registry),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<RwLock<SessionRegistry>> {
        Arc::clone(self.matchmaker.registry())
    }

    /// Accept loop. Runs until the task is dropped.
    pub async fn run(self) -> Result<(), ServerError> {
        info!("Server started successfully");

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let matchmaker = self.matchmaker.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, matchmaker).await {
                            warn!("Connection {} ended with error: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

/// Runs one participant from handshake to teardown.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    matchmaker: Matchmaker,
) -> Result<(), ServerError> {
    let ws = accept_async(stream).await?;
    info!("Client connected from {}", addr);

    let (sink, mut source) = ws.split();
    let (outbox, inbox) = mpsc::channel(OUTBOX_CAPACITY);
    let mut writer = tokio::spawn(write_messages(sink, inbox, addr));

    let seat = matchmaker.join(outbox).await;
    let connection = Connection {
        seat,
        registry: Arc::clone(matchmaker.registry()),
    };

    let result = connection.read_messages(&mut source).await;
    connection.leave().await;
    info!("Client {} disconnected", addr);

    match timeout(WRITER_GRACE, &mut writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Writer task for {} panicked: {}", addr, e),
        Err(_) => {
            warn!("Client {} is not reading, dropping pending messages", addr);
            writer.abort();
        }
    }
    result
}

/// Drains a connection's outbound queue onto its socket. The queue closes
/// when the session is torn down, which closes the socket.
async fn write_messages(
    mut sink: WsSink,
    mut inbox: mpsc::Receiver<ServerMessage>,
    addr: SocketAddr,
) {
    while let Some(message) = inbox.recv().await {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode message for {}: {}", addr, e);
                continue;
            }
        };

        if let Err(e) = sink.send(Message::Text(text)).await {
            warn!("Failed to send to {}: {}", addr, e);
            return;
        }
    }

    if let Err(e) = sink.close().await {
        debug!("Error closing connection to {}: {}", addr, e);
    }
}

struct Connection {
    seat: Seat,
    registry: Arc<RwLock<SessionRegistry>>,
}

impl Connection {
    async fn read_messages(&self, source: &mut WsSource) -> Result<(), ServerError> {
        while let Some(frame) = source.next().await {
            let text = match frame? {
                Message::Text(text) => text,
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        debug!("Ignoring non-UTF-8 binary frame");
                        continue;
                    }
                },
                Message::Close(_) => break,
                _ => continue,
            };

            if !self.dispatch(ClientUpdate::decode(&text)).await {
                break;
            }
        }
        Ok(())
    }

    /// Applies one update under the session lock and queues the replies.
    /// Returns false once the connection has nothing left to do.
    async fn dispatch(&self, update: ClientUpdate) -> bool {
        let slot = self.seat.slot;

        let finished = {
            let mut entry = self.seat.session.lock().await;
            let outcome = match entry.game.apply_update(slot, &update) {
                Ok(outcome) => outcome,
                Err(e) => {
                    debug!("Dropping update from player {}: {}", slot, e);
                    return false;
                }
            };

            for message in outcome.to_caller {
                entry.deliver(slot, message);
            }
            for message in outcome.to_peer {
                entry.deliver(slot.opponent(), message);
            }
            if outcome.finished {
                entry.close();
            } else if !entry.is_connected(slot) {
                debug!("Player {} stopped reading, closing connection", slot);
                return false;
            }
            outcome.finished
        };

        // Session lock is released before the registry is touched.
        if finished {
            self.registry.write().await.cleanup(self.seat.session_id);
            return false;
        }
        true
    }

    /// Tears down the session and tells the remaining participant, if any.
    async fn leave(&self) {
        let removed = self.registry.write().await.cleanup(self.seat.session_id);
        let Some(session) = removed else {
            return;
        };

        let mut entry = session.lock().await;
        if let Some(peer) = entry.game.leave(self.seat.slot) {
            entry.deliver(peer, ServerMessage::opponent_disconnected());
        }
        entry.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::Phase;
    use shared::{Position, SessionId, Slot};

    fn matchmaker_for(registry: &Arc<RwLock<SessionRegistry>>) -> Matchmaker {
        Matchmaker::new(Arc::clone(registry))
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8000);
    }

    #[tokio::test]
    async fn test_server_binds_ephemeral_port() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
        };
        let server = Server::bind(&config).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert!(server.registry().read().await.is_empty());
    }

    #[tokio::test]
    async fn test_leave_notifies_peer_and_removes_session() {
        let registry = Arc::new(RwLock::new(SessionRegistry::new()));
        let matchmaker = matchmaker_for(&registry);
        let (tx1, mut rx1) = mpsc::channel(OUTBOX_CAPACITY);
        let (tx2, mut rx2) = mpsc::channel(OUTBOX_CAPACITY);

        let one = Connection {
            seat: matchmaker.join(tx1).await,
            registry: Arc::clone(&registry),
        };
        let two = Connection {
            seat: matchmaker.join(tx2).await,
            registry: Arc::clone(&registry),
        };
        assert!(matches!(rx1.recv().await, Some(ServerMessage::Init { .. })));
        assert!(matches!(rx2.recv().await, Some(ServerMessage::Init { .. })));

        two.leave().await;

        assert_eq!(rx1.recv().await, Some(ServerMessage::opponent_disconnected()));
        assert_eq!(rx1.recv().await, None);
        assert_eq!(rx2.recv().await, None);
        assert!(registry.read().await.get(one.seat.session_id).is_none());

        assert!(!one.dispatch(ClientUpdate::default()).await);
        one.leave().await;
    }

    #[tokio::test]
    async fn test_dispatch_replies_to_caller_only() {
        let registry = Arc::new(RwLock::new(SessionRegistry::new()));
        let matchmaker = matchmaker_for(&registry);
        let (tx1, mut rx1) = mpsc::channel(OUTBOX_CAPACITY);
        let (tx2, mut rx2) = mpsc::channel(OUTBOX_CAPACITY);

        let one = Connection {
            seat: matchmaker.join(tx1).await,
            registry: Arc::clone(&registry),
        };
        let _two = Connection {
            seat: matchmaker.join(tx2).await,
            registry: Arc::clone(&registry),
        };
        rx1.recv().await;
        rx2.recv().await;

        assert!(one.dispatch(ClientUpdate::default()).await);
        assert!(matches!(rx1.recv().await, Some(ServerMessage::Update(_))));
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_game_over_tears_down_session() {
        let registry = Arc::new(RwLock::new(SessionRegistry::new()));
        let matchmaker = matchmaker_for(&registry);
        let (tx1, mut rx1) = mpsc::channel(OUTBOX_CAPACITY);
        let (tx2, mut rx2) = mpsc::channel(OUTBOX_CAPACITY);

        let one = Connection {
            seat: matchmaker.join(tx1).await,
            registry: Arc::clone(&registry),
        };
        let two = Connection {
            seat: matchmaker.join(tx2).await,
            registry: Arc::clone(&registry),
        };
        assert_eq!(one.seat.session_id, SessionId(1));

        let heads = |cells: [(usize, usize); 3]| ClientUpdate {
            head_positions: Some(
                cells
                    .iter()
                    .map(|&(r, c)| Position::new(r, c).unwrap())
                    .collect(),
            ),
            ..ClientUpdate::default()
        };
        assert!(one.dispatch(heads([(0, 0), (0, 1), (0, 2)])).await);
        assert!(two.dispatch(heads([(5, 0), (5, 1), (5, 2)])).await);
        assert_eq!(one.seat.session.lock().await.game.phase(), Phase::Playing);

        let mut board_one = shared::Grid::new();
        let mut board_two = shared::Grid::new();
        for col in 0..3 {
            board_one.set(Position::new(5, col).unwrap());
            let shots = ClientUpdate {
                shots: Some(board_one),
                ..ClientUpdate::default()
            };
            let still_running = one.dispatch(shots).await;
            if col == 2 {
                assert!(!still_running);
                break;
            }
            assert!(still_running);

            board_two.set(Position::new(9, col).unwrap());
            let shots = ClientUpdate {
                shots: Some(board_two),
                ..ClientUpdate::default()
            };
            assert!(two.dispatch(shots).await);
        }

        assert!(registry.read().await.is_empty());

        let mut last_one = Vec::new();
        while let Some(message) = rx1.recv().await {
            last_one.push(message);
        }
        assert_eq!(last_one.last(), Some(&ServerMessage::game_over(Slot::One)));

        let mut last_two = Vec::new();
        while let Some(message) = rx2.recv().await {
            last_two.push(message);
        }
        assert_eq!(last_two.last(), Some(&ServerMessage::game_over(Slot::One)));

        one.leave().await;
        two.leave().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_fire_once_per_turn() {
        let registry = Arc::new(RwLock::new(SessionRegistry::new()));
        let matchmaker = matchmaker_for(&registry);
        let (tx1, _rx1) = mpsc::channel(OUTBOX_CAPACITY);
        let (tx2, _rx2) = mpsc::channel(OUTBOX_CAPACITY);

        let one = Arc::new(Connection {
            seat: matchmaker.join(tx1).await,
            registry: Arc::clone(&registry),
        });
        let two = Connection {
            seat: matchmaker.join(tx2).await,
            registry: Arc::clone(&registry),
        };

        let heads = |cells: [(usize, usize); 3]| ClientUpdate {
            head_positions: Some(
                cells
                    .iter()
                    .map(|&(r, c)| Position::new(r, c).unwrap())
                    .collect(),
            ),
            ..ClientUpdate::default()
        };
        assert!(one.dispatch(heads([(0, 0), (0, 1), (0, 2)])).await);
        assert!(two.dispatch(heads([(0, 0), (0, 1), (0, 2)])).await);
        assert_eq!(one.seat.session.lock().await.game.turn(), Slot::One);

        let mut handles = Vec::new();
        for i in 0..32 {
            let one = Arc::clone(&one);
            handles.push(tokio::spawn(async move {
                let mut board = shared::Grid::new();
                board.set(Position::new(6 + i / 10, i % 10).unwrap());
                let shots = ClientUpdate {
                    shots: Some(board),
                    ..ClientUpdate::default()
                };
                one.dispatch(shots).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        let entry = one.seat.session.lock().await;
        assert_eq!(entry.game.player(Slot::One).unwrap().shots().len(), 1);
        assert_eq!(entry.game.turn(), Slot::Two);
        assert_eq!(entry.game.phase(), Phase::Playing);
    }

    #[tokio::test]
    async fn test_client_that_stops_reading_is_dropped() {
        let registry = Arc::new(RwLock::new(SessionRegistry::new()));
        let matchmaker = matchmaker_for(&registry);
        let (tx1, _rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(OUTBOX_CAPACITY);

        let one = Connection {
            seat: matchmaker.join(tx1).await,
            registry: Arc::clone(&registry),
        };
        let two = Connection {
            seat: matchmaker.join(tx2).await,
            registry: Arc::clone(&registry),
        };
        rx2.recv().await;

        // Init plus three replies fill the queue; the next reply overflows it.
        for _ in 0..3 {
            assert!(one.dispatch(ClientUpdate::default()).await);
        }
        assert!(!one.dispatch(ClientUpdate::default()).await);
        assert!(!one.seat.session.lock().await.is_connected(Slot::One));

        one.leave().await;
        assert_eq!(rx2.recv().await, Some(ServerMessage::opponent_disconnected()));
        assert!(registry.read().await.is_empty());
        assert!(!two.dispatch(ClientUpdate::default()).await);
    }
}

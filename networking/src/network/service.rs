use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use fork_choice::{ChainError, ChainEvent};
use serde::{Deserialize, Serialize};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tokio::{select, task};
use tracing::{debug, error, info, trace, warn};

use super::codec::{read_message, write_message, Message, WireError};
use crate::sync::{PeerSession, SyncService, SYNC_TICK_INTERVAL_SECS};
use crate::types::{Direction, DisconnectReason, NetPermissions, SyncAction};

/// Delay before a dropped static peer is dialed again.
pub const RECONNECT_INTERVAL_SECS: u64 = 30;

const INBOUND_QUEUE_SIZE: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub listen: bool,
    pub listen_addr: SocketAddr,
    /// Operator-configured peers, dialed as manual connections.
    #[serde(default)]
    pub static_peers: Vec<SocketAddr>,
    pub magic: [u8; 4],
}

/// TCP transport for the sync service: accepts inbound connections, keeps
/// static peers dialed, and runs one task per connection.
pub struct NetworkService {
    config: Arc<NetworkConfig>,
    sync: SyncService,
    fatal_tx: mpsc::UnboundedSender<anyhow::Error>,
    fatal_rx: mpsc::UnboundedReceiver<anyhow::Error>,
}

impl NetworkService {
    pub fn new(config: NetworkConfig, sync: SyncService) -> Self {
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        Self {
            config: Arc::new(config),
            sync,
            fatal_tx,
            fatal_rx,
        }
    }

    pub fn sync(&self) -> &SyncService {
        &self.sync
    }

    /// Binds the listener if listening is enabled.
    pub async fn bind(&self) -> Result<Option<TcpListener>> {
        if !self.config.listen {
            info!("Inbound connections disabled");
            return Ok(None);
        }
        let listener = TcpListener::bind(self.config.listen_addr)
            .await
            .with_context(|| format!("failed to listen on {}", self.config.listen_addr))?;
        info!(address = %listener.local_addr()?, "Listening for peers");
        Ok(Some(listener))
    }

    pub async fn start(self) -> Result<()> {
        let listener = self.bind().await?;
        self.run(listener).await
    }

    /// Runs until a connection hits a corrupted chain state.
    pub async fn run(mut self, listener: Option<TcpListener>) -> Result<()> {
        for address in self.config.static_peers.clone() {
            task::spawn(dial_static_peer(
                self.config.clone(),
                self.sync.clone(),
                address,
                self.fatal_tx.clone(),
            ));
        }

        let Some(listener) = listener else {
            return match self.fatal_rx.recv().await {
                Some(err) => Err(err),
                None => Ok(()),
            };
        };

        loop {
            select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, address)) => {
                            task::spawn(handle_connection(
                                self.config.clone(),
                                self.sync.clone(),
                                stream,
                                address,
                                Direction::Inbound,
                                NetPermissions::default(),
                                self.fatal_tx.clone(),
                            ));
                        }
                        Err(err) => warn!(%err, "Failed to accept connection"),
                    }
                }
                fatal = self.fatal_rx.recv() => {
                    if let Some(err) = fatal {
                        return Err(err);
                    }
                }
            }
        }
    }
}

async fn dial_static_peer(
    config: Arc<NetworkConfig>,
    sync: SyncService,
    address: SocketAddr,
    fatal_tx: mpsc::UnboundedSender<anyhow::Error>,
) {
    loop {
        info!(%address, "Dialing static peer");
        match TcpStream::connect(address).await {
            Ok(stream) => {
                handle_connection(
                    config.clone(),
                    sync.clone(),
                    stream,
                    address,
                    Direction::Outbound,
                    NetPermissions::MANUAL,
                    fatal_tx.clone(),
                )
                .await;
            }
            Err(err) => warn!(%address, %err, "Failed to connect to static peer"),
        }
        if fatal_tx.is_closed() {
            return;
        }
        sleep(Duration::from_secs(RECONNECT_INTERVAL_SECS)).await;
    }
}

async fn handle_connection(
    config: Arc<NetworkConfig>,
    sync: SyncService,
    stream: TcpStream,
    address: SocketAddr,
    direction: Direction,
    permissions: NetPermissions,
    fatal_tx: mpsc::UnboundedSender<anyhow::Error>,
) {
    let session = match sync.connect(address, direction, permissions) {
        Ok(session) => session,
        Err(refusal) => {
            info!(%address, ?refusal, "Refusing connection");
            return;
        }
    };
    let peer_id = session.peer_id();
    info!(peer = %peer_id, %address, ?direction, "Connected to peer (total: {})", sync.peer_count());

    match run_session(&config, &sync, session, stream).await {
        Ok(reason) => info!(peer = %peer_id, %reason, "Disconnected from peer"),
        Err(err) => {
            if let Some(ChainError::Corrupted(_)) = err.downcast_ref::<ChainError>() {
                error!(peer = %peer_id, %err, "Chain state corrupted, stopping");
                let _ = fatal_tx.send(err);
            } else {
                warn!(peer = %peer_id, %err, "Connection failed");
            }
        }
    }
}

/// Drives one peer session until either side hangs up.
async fn run_session(
    config: &NetworkConfig,
    sync: &SyncService,
    mut session: PeerSession,
    stream: TcpStream,
) -> Result<DisconnectReason> {
    let magic = config.magic;
    let (reader, mut writer) = stream.into_split();

    // Frames are read on their own task: a read interrupted by select! would
    // lose its partial frame.
    let (inbound_tx, mut inbound_rx) = mpsc::channel(INBOUND_QUEUE_SIZE);
    let reader_task = task::spawn(read_loop(reader, magic, inbound_tx));

    let result = drive(sync, &mut session, &mut writer, magic, &mut inbound_rx).await;
    reader_task.abort();
    result
}

async fn drive(
    sync: &SyncService,
    session: &mut PeerSession,
    writer: &mut OwnedWriteHalf,
    magic: [u8; 4],
    inbound_rx: &mut mpsc::Receiver<Result<Message, WireError>>,
) -> Result<DisconnectReason> {
    let mut chain_events = sync.chain().subscribe();
    let mut ticker = interval(Duration::from_secs(SYNC_TICK_INTERVAL_SECS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let actions = session.start()?;
    if let Some(reason) = dispatch(writer, magic, actions).await? {
        return Ok(reason);
    }

    loop {
        let actions = select! {
            inbound = inbound_rx.recv() => match inbound {
                Some(Ok(message)) => handle_message(session, message)?,
                Some(Err(err)) => {
                    debug!(peer = %session.peer_id(), %err, "Dropping peer after read failure");
                    return Ok(DisconnectReason::ProtocolError);
                }
                None => return Ok(DisconnectReason::ProtocolError),
            },
            _ = ticker.tick() => {
                if sync.peer_manager().lock().banned_peers().contains(&session.peer_id()) {
                    return Ok(DisconnectReason::Discouraged);
                }
                session.tick()?
            }
            event = chain_events.recv() => match event {
                Ok(ChainEvent::TipUpdated { hash, .. }) => {
                    match sync.chain().record(&hash) {
                        Some(record) => {
                            let announcement = Message::Headers(vec![record.header]);
                            write_message(writer, magic, &announcement).await?;
                        }
                        None => trace!(%hash, "Tip vanished before announcement"),
                    }
                    Vec::new()
                }
                Ok(ChainEvent::ReorgRefused { .. }) => Vec::new(),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Chain event receiver lagged");
                    Vec::new()
                }
                Err(RecvError::Closed) => return Ok(DisconnectReason::Shutdown),
            },
        };

        if let Some(reason) = dispatch(writer, magic, actions).await? {
            return Ok(reason);
        }
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    magic: [u8; 4],
    inbound_tx: mpsc::Sender<Result<Message, WireError>>,
) {
    loop {
        let message = read_message(&mut reader, magic).await;
        let failed = message.is_err();
        if inbound_tx.send(message).await.is_err() || failed {
            return;
        }
    }
}

fn handle_message(session: &mut PeerSession, message: Message) -> Result<Vec<SyncAction>, ChainError> {
    match message {
        Message::GetHeaders { locator, stop, .. } => Ok(session.on_get_headers(&locator, &stop)),
        Message::Headers(headers) => session.on_headers(headers),
        Message::Other { command, .. } => {
            trace!(peer = %session.peer_id(), %command, "Ignoring message");
            Ok(Vec::new())
        }
    }
}

/// Performs the session's actions in order. Returns the disconnect reason if
/// one of them ends the connection.
async fn dispatch(
    writer: &mut OwnedWriteHalf,
    magic: [u8; 4],
    actions: Vec<SyncAction>,
) -> Result<Option<DisconnectReason>> {
    for action in actions {
        match action {
            SyncAction::Send(request) => {
                let message = Message::from(request);
                write_message(writer, magic, &message)
                    .await
                    .map_err(|err| anyhow!("failed to send {}: {err}", message.command()))?;
            }
            SyncAction::Disconnect(reason) => return Ok(Some(reason)),
        }
    }
    Ok(None)
}

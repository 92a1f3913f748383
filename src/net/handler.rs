//! Per-connection protocol handling
//!
//! Each accepted socket gets one reader loop (this module) and one
//! spawned writer task draining the client's event queue. The writer
//! announces the assigned client id before anything else.

use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::game::MatchCommand;
use crate::lobby::manager::Seat;
use crate::lobby::GameManager;
use crate::net::codec::{encode_event, read_command, ProtocolError};
use crate::net::protocol::{Command, Event};

pub async fn handle_client(socket: TcpStream, client_id: u32, manager: Arc<GameManager>) {
    let peer = socket
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    info!(client_id, peer = %peer, "Client connected");

    let (reader, writer) = socket.into_split();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let writer_task = tokio::spawn(write_events(writer, client_id, events_rx));

    let mut session = Session {
        client_id,
        manager: manager.clone(),
        events: events_tx,
        seat: None,
    };
    let mut reader = BufReader::new(reader);
    loop {
        match read_command(&mut reader).await {
            Ok(cmd) => {
                if !session.handle(cmd).await {
                    break;
                }
            }
            Err(ProtocolError::Io(e)) => {
                debug!(client_id, error = %e, "Client stream closed");
                break;
            }
            Err(e) => {
                warn!(client_id, error = %e, "Protocol violation, dropping client");
                break;
            }
        }
    }

    // The event sender drops with the session, which ends the writer.
    manager.disconnect(client_id).await;
    drop(session);
    let _ = writer_task.await;
    info!(client_id, "Client gone");
}

/// Writer half: id announcement first, then the event queue until it
/// closes or the socket dies.
async fn write_events(
    mut writer: OwnedWriteHalf,
    client_id: u32,
    mut events: mpsc::UnboundedReceiver<Event>,
) {
    let hello = encode_event(&Event::AssignedId { client_id });
    if writer.write_all(&hello).await.is_err() {
        return;
    }

    while let Some(event) = events.recv().await {
        let frame = encode_event(&event);
        if writer.write_all(&frame).await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

struct Session {
    client_id: u32,
    manager: Arc<GameManager>,
    events: mpsc::UnboundedSender<Event>,
    seat: Option<Seat>,
}

impl Session {
    /// Returns false when the connection should close
    async fn handle(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Move { code } => self.forward(MatchCommand::Move {
                client_id: self.client_id,
                code,
            }),
            Command::Upgrade { code } => self.forward(MatchCommand::Upgrade {
                client_id: self.client_id,
                code,
            }),
            Command::CreateLobby { model, name, maps } => {
                match self.manager.create_lobby(
                    self.client_id,
                    model,
                    name,
                    &maps,
                    self.events.clone(),
                ) {
                    Ok(seat) => self.seat = Some(seat),
                    Err(e) => {
                        warn!(client_id = self.client_id, error = %e, "Create lobby failed");
                        let _ = self.events.send(Event::JoinError);
                    }
                }
            }
            Command::JoinLobby {
                lobby_id,
                model,
                name,
            } => {
                match self.manager.join_lobby(
                    self.client_id,
                    lobby_id,
                    model,
                    name,
                    self.events.clone(),
                ) {
                    Ok(seat) => self.seat = Some(seat),
                    Err(e) => {
                        debug!(client_id = self.client_id, lobby_id, error = %e, "Join refused");
                        let _ = self.events.send(Event::JoinError);
                    }
                }
            }
            Command::StartLobby { lobby_id } => {
                self.manager.start_lobby(lobby_id);
            }
            Command::Disconnect => {
                self.manager.disconnect(self.client_id).await;
                self.seat = None;
            }
        }
        true
    }

    /// Hand a command to the seated match. A full queue means the match
    /// is badly behind; the input is dropped.
    fn forward(&self, cmd: MatchCommand) {
        if let Some(seat) = &self.seat {
            if seat.commands.try_send(cmd).is_err() {
                debug!(client_id = self.client_id, "Match queue unavailable, input dropped");
            }
        }
    }
}

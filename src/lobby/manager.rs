//! Lobby table and join/start/disconnect logic

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;
use crate::game::map::{GameMap, MapError};
use crate::game::MatchCommand;
use crate::net::protocol::Event;

use super::game::Game;

/// Lobby ids start here; the first free id from this base is reused
const FIRST_LOBBY_ID: u32 = 1001;
/// Seats per lobby, matching the start grid
const LOBBY_CAPACITY: usize = 8;

/// Why a client could not enter a lobby
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    #[error("Lobby {0} does not exist")]
    UnknownLobby(u32),

    #[error("Lobby {0} already started")]
    AlreadyStarted(u32),

    #[error("Lobby {0} is full")]
    Full(u32),

    #[error("Client already seated in lobby {0}")]
    AlreadyJoined(u32),

    #[error("Requested map {0:?} is not in the rotation")]
    UnknownMap(String),

    #[error("No maps configured")]
    EmptyRotation,

    #[error(transparent)]
    Map(#[from] MapError),
}

/// What a successful create or join hands back to the connection
pub struct Seat {
    pub lobby_id: u32,
    pub commands: mpsc::Sender<MatchCommand>,
}

/// All lobbies on the server. Connections talk to this; matches run on
/// their own tasks and only see their command queue.
pub struct GameManager {
    config: Arc<Config>,
    lobbies: Mutex<BTreeMap<u32, Game>>,
}

impl GameManager {
    pub fn new(config: Arc<Config>) -> GameManager {
        GameManager {
            config,
            lobbies: Mutex::new(BTreeMap::new()),
        }
    }

    /// Resolve requested map names against the configured rotation and
    /// load them. An empty request means the full rotation.
    fn load_maps(&self, requested: &[String]) -> Result<Vec<Arc<GameMap>>, LobbyError> {
        let rotation = &self.config.server.maps;

        let paths: Vec<String> = if requested.is_empty() {
            rotation.clone()
        } else {
            requested
                .iter()
                .map(|name| {
                    rotation
                        .iter()
                        .find(|p| {
                            *p == name
                                || Path::new(p)
                                    .file_stem()
                                    .is_some_and(|s| s == name.as_str())
                        })
                        .cloned()
                        .ok_or_else(|| LobbyError::UnknownMap(name.clone()))
                })
                .collect::<Result<_, _>>()?
        };
        if paths.is_empty() {
            return Err(LobbyError::EmptyRotation);
        }

        paths
            .iter()
            .map(|p| Ok(Arc::new(GameMap::from_file(Path::new(p))?)))
            .collect()
    }

    /// Create a lobby, seat the creator and broadcast the roster
    pub fn create_lobby(
        &self,
        client_id: u32,
        model: u8,
        name: String,
        requested_maps: &[String],
        events: mpsc::UnboundedSender<Event>,
    ) -> Result<Seat, LobbyError> {
        let maps = self.load_maps(requested_maps)?;

        let mut lobbies = self.lobbies.lock();
        let mut lobby_id = FIRST_LOBBY_ID;
        while lobbies.contains_key(&lobby_id) {
            lobby_id += 1;
        }

        let mut game = Game::spawn(lobby_id, maps, self.config.clone());
        game.add_player(client_id, model, name, events.clone());

        let _ = events.send(Event::JoinAccepted);
        game.registry().broadcast(&game.lobby_snapshot());

        let seat = Seat {
            lobby_id,
            commands: game.commands(),
        };
        lobbies.insert(lobby_id, game);
        info!(lobby_id, client_id, "Lobby created");
        Ok(seat)
    }

    /// Seat a client in an existing lobby
    pub fn join_lobby(
        &self,
        client_id: u32,
        lobby_id: u32,
        model: u8,
        name: String,
        events: mpsc::UnboundedSender<Event>,
    ) -> Result<Seat, LobbyError> {
        let mut lobbies = self.lobbies.lock();
        let game = lobbies
            .get_mut(&lobby_id)
            .ok_or(LobbyError::UnknownLobby(lobby_id))?;

        if game.is_started() {
            return Err(LobbyError::AlreadyStarted(lobby_id));
        }
        if game.player_count() >= LOBBY_CAPACITY {
            return Err(LobbyError::Full(lobby_id));
        }
        if game.has_player(client_id) {
            return Err(LobbyError::AlreadyJoined(lobby_id));
        }

        game.add_player(client_id, model, name, events.clone());
        let _ = events.send(Event::JoinAccepted);
        game.registry().broadcast(&game.lobby_snapshot());

        info!(lobby_id, client_id, "Client joined lobby");
        Ok(Seat {
            lobby_id,
            commands: game.commands(),
        })
    }

    /// Start a lobby's first race. Everyone seated is notified.
    pub fn start_lobby(&self, lobby_id: u32) -> bool {
        let mut lobbies = self.lobbies.lock();
        let Some(game) = lobbies.get_mut(&lobby_id) else {
            return false;
        };
        if !game.start() {
            return false;
        }
        game.registry().broadcast(&Event::LobbyStarted);
        true
    }

    /// Drop a client from whatever lobby holds them. A lobby left empty
    /// is shut down and awaited.
    pub async fn disconnect(&self, client_id: u32) {
        let mut to_stop = None;
        {
            let mut lobbies = self.lobbies.lock();
            let found = lobbies
                .iter()
                .find(|(_, g)| g.has_player(client_id))
                .map(|(&id, _)| id);
            if let Some(lobby_id) = found {
                let mut left_empty = false;
                if let Some(game) = lobbies.get_mut(&lobby_id) {
                    if game.is_started() {
                        game.registry().remove(client_id);
                        let commands = game.commands();
                        let _ = commands.try_send(MatchCommand::Disconnect { client_id });
                    } else {
                        game.remove_player(client_id);
                        game.registry().broadcast(&game.lobby_snapshot());
                    }
                    left_empty = game.is_empty();
                }
                if left_empty {
                    to_stop = lobbies.remove(&lobby_id);
                }
            }
        }

        if let Some(game) = to_stop {
            info!(lobby_id = game.lobby_id(), "Lobby empty, stopping match");
            game.stop().await;
        }
    }

    /// Drop lobbies whose match task exited and nobody is left in
    pub fn reap_finished(&self) {
        let mut lobbies = self.lobbies.lock();
        lobbies.retain(|lobby_id, g| {
            let dead = g.is_finished() && g.is_empty();
            if dead {
                info!(lobby_id, "Reaping finished lobby");
            }
            !dead
        });
    }

    /// Stop every match, used at server shutdown
    pub async fn stop_all(&self) {
        let games: Vec<Game> = {
            let mut lobbies = self.lobbies.lock();
            std::mem::take(&mut *lobbies).into_values().collect()
        };
        for game in games {
            game.stop().await;
        }
    }
}

impl Drop for GameManager {
    fn drop(&mut self) {
        let lobbies = self.lobbies.lock();
        if !lobbies.is_empty() {
            warn!(count = lobbies.len(), "Manager dropped with live lobbies");
        }
    }
}

//! One lobby and its match task

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::Config;
use crate::game::map::GameMap;
use crate::game::{Gameloop, MatchCommand};
use crate::net::protocol::{Event, LobbyPlayer, LobbySnapshot};

use super::registry::ClientRegistry;

/// Command queue depth per match
const COMMAND_QUEUE_DEPTH: usize = 256;

/// A lobby with its running gameloop task. The task starts simulating
/// only after [`Game::start`] pushes the roster through the queue.
pub struct Game {
    lobby_id: u32,
    commands: mpsc::Sender<MatchCommand>,
    registry: Arc<ClientRegistry>,
    /// name and model per seated player
    roster: BTreeMap<u32, (String, u8)>,
    started: bool,
    task: JoinHandle<()>,
}

impl Game {
    /// Create the lobby and spawn its match task
    pub fn spawn(lobby_id: u32, maps: Vec<Arc<GameMap>>, config: Arc<Config>) -> Game {
        let registry = Arc::new(ClientRegistry::new());
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let gameloop = Gameloop::new(lobby_id, maps, config, rx, registry.clone());
        let task = tokio::spawn(gameloop.run());
        Game {
            lobby_id,
            commands: tx,
            registry,
            roster: BTreeMap::new(),
            started: false,
            task,
        }
    }

    pub fn lobby_id(&self) -> u32 {
        self.lobby_id
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn commands(&self) -> mpsc::Sender<MatchCommand> {
        self.commands.clone()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn has_player(&self, client_id: u32) -> bool {
        self.roster.contains_key(&client_id)
    }

    pub fn player_count(&self) -> usize {
        self.roster.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn add_player(
        &mut self,
        client_id: u32,
        model: u8,
        name: String,
        events: mpsc::UnboundedSender<Event>,
    ) {
        self.registry.add(client_id, events);
        self.roster.insert(client_id, (name, model));
    }

    pub fn remove_player(&mut self, client_id: u32) {
        self.registry.remove(client_id);
        self.roster.remove(&client_id);
    }

    pub fn lobby_snapshot(&self) -> Event {
        Event::LobbySnapshot(LobbySnapshot {
            lobby_id: self.lobby_id,
            players: self
                .roster
                .values()
                .map(|(name, model)| LobbyPlayer {
                    name: name.clone(),
                    model: *model,
                })
                .collect(),
        })
    }

    /// Push the whole roster into the match and begin the first race.
    /// Returns false when already started.
    pub fn start(&mut self) -> bool {
        if self.started {
            return false;
        }
        self.started = true;

        for (&client_id, (name, model)) in &self.roster {
            let cmd = MatchCommand::NewCar {
                client_id,
                model: u16::from(*model),
                name: name.clone(),
            };
            if self.commands.try_send(cmd).is_err() {
                warn!(lobby_id = self.lobby_id, client_id, "Match queue rejected roster entry");
            }
        }
        if self.commands.try_send(MatchCommand::BeginRace).is_err() {
            warn!(lobby_id = self.lobby_id, "Match queue rejected race start");
        }
        debug!(lobby_id = self.lobby_id, players = self.roster.len(), "Lobby started");
        true
    }

    /// Ask the match to exit and wait for its task
    pub async fn stop(self) {
        let _ = self.commands.send(MatchCommand::Shutdown).await;
        let _ = self.task.await;
    }
}

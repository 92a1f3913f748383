//! Per-match simulation loop
//!
//! Each lobby runs one [`Gameloop`] on its own tokio task. Commands
//! arrive through a bounded queue, world state is broadcast through the
//! lobby's client registry. Closing the command queue is how the loop
//! shuts down.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::lobby::registry::ClientRegistry;
use crate::net::protocol::{Event, PlayerResult};

use super::map::GameMap;
use super::race::RaceContext;
use super::snapshot::SnapshotBuilder;
use super::MatchCommand;

/// Reveal frames on the final results screen
const RESULT_REVEAL_STEPS: u8 = 4;

/// Lifecycle of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    /// Lobby is open, no race yet
    WaitingForLobbyStart,
    /// A race is being simulated
    Running,
    /// Results table on screen after a non-final race
    ShowingResults,
    /// Clients browse the upgrade catalog
    ChoosingUpgrades,
    /// Waiting for every upgrade pick (or the timeout)
    WaitingUpgrades,
    /// Staged podium reveal after the last race
    ShowingResultsLastRace,
    /// Match over, loop exits
    Finished,
}

/// Per-player bookkeeping that survives across maps
#[derive(Debug, Default)]
struct PlayerSlot {
    name: String,
    total_time: f64,
    pending_upgrade: u8,
    upgrade_received: bool,
    applied_upgrades: Vec<u8>,
    disconnected: bool,
}

pub struct Gameloop {
    commands: mpsc::Receiver<MatchCommand>,
    registry: Arc<ClientRegistry>,
    config: Arc<Config>,
    lobby_id: u32,

    maps: Vec<Arc<GameMap>>,
    current_map_index: usize,
    race: RaceContext,
    players: BTreeMap<u32, PlayerSlot>,

    phase: GamePhase,
    race_with_countdown: f64,
    results_time_remaining: f64,
    reveal_elapsed: f64,
    reveal_frames_sent: u8,
    last_results: Vec<PlayerResult>,

    sim_accumulator: f64,
    snapshots: SnapshotBuilder,
}

impl Gameloop {
    pub fn new(
        lobby_id: u32,
        maps: Vec<Arc<GameMap>>,
        config: Arc<Config>,
        commands: mpsc::Receiver<MatchCommand>,
        registry: Arc<ClientRegistry>,
    ) -> Gameloop {
        debug_assert!(!maps.is_empty());
        let seed = context_seed(lobby_id, 0);
        let race = RaceContext::new(maps[0].clone(), config.clone(), seed);
        let timestep = race.timestep();
        Gameloop {
            commands,
            registry,
            race_with_countdown: config.race.total_time_seconds,
            results_time_remaining: config.race.results_screen_seconds,
            config,
            lobby_id,
            maps,
            current_map_index: 0,
            race,
            players: BTreeMap::new(),
            phase: GamePhase::WaitingForLobbyStart,
            reveal_elapsed: 0.0,
            reveal_frames_sent: 0,
            last_results: Vec::new(),
            sim_accumulator: 0.0,
            snapshots: SnapshotBuilder::new(timestep),
        }
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    /// Drive the match until it finishes or a shutdown arrives
    pub async fn run(mut self) {
        info!(lobby_id = self.lobby_id, "Match task started");

        let timestep = self.race.timestep();
        let mut ticker = interval(std::time::Duration::from_secs_f64(timestep));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut last = Instant::now();
        while self.phase != GamePhase::Finished {
            ticker.tick().await;

            self.drain_commands();

            let now = Instant::now();
            let dt = now.duration_since(last).as_secs_f64();
            last = now;

            self.update(dt);
        }

        info!(lobby_id = self.lobby_id, "Match task finished");
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            self.handle_command(cmd);
        }
    }

    pub fn handle_command(&mut self, cmd: MatchCommand) {
        match cmd {
            MatchCommand::Move { client_id, code } => {
                if self.phase != GamePhase::Running {
                    return;
                }
                let clock = self.race_with_countdown;
                if let Err(e) = self.race.handle_move(client_id, code, clock) {
                    warn!(lobby_id = self.lobby_id, client_id, %e, "Dropping bad move");
                }
            }
            MatchCommand::NewCar {
                client_id,
                model,
                name,
            } => {
                self.players.entry(client_id).or_default().name = name;
                self.race.spawn_car_for_player(client_id, model);
            }
            MatchCommand::BeginRace => {
                if self.phase == GamePhase::WaitingForLobbyStart {
                    self.send_pre_game_snapshot();
                    self.phase = GamePhase::Running;
                }
            }
            MatchCommand::Upgrade { client_id, code } => {
                if self.phase != GamePhase::WaitingUpgrades {
                    return;
                }
                let slot = self.players.entry(client_id).or_default();
                slot.pending_upgrade = code;
                slot.upgrade_received = true;
            }
            MatchCommand::Disconnect { client_id } => {
                if let Some(slot) = self.players.get_mut(&client_id) {
                    slot.disconnected = true;
                }
                self.race.kill(client_id);
            }
            MatchCommand::Shutdown => {
                info!(lobby_id = self.lobby_id, "Match shutting down");
                self.phase = GamePhase::Finished;
            }
        }
    }

    /// Advance the match by wall-clock `dt`: phase timers, then the
    /// fixed-step simulation, then due snapshots.
    pub fn update(&mut self, dt: f64) {
        self.sim_accumulator += dt;
        self.snapshots.accumulate(dt);

        self.update_phase(dt);
        self.step_simulation();
        self.send_snapshots();
    }

    fn update_phase(&mut self, dt: f64) {
        match self.phase {
            GamePhase::Running => {
                self.race_with_countdown -= dt;
                if self.race_with_countdown <= 0.0 || self.race.all_players_finished_or_dead() {
                    self.race_finished();
                }
            }
            GamePhase::ShowingResults => {
                self.results_time_remaining -= dt;
                if self.results_time_remaining <= 0.0 {
                    self.registry.broadcast(&Event::PhaseChange);
                    self.results_time_remaining = self.config.race.upgrades_screen_seconds;
                    self.phase = GamePhase::ChoosingUpgrades;
                }
            }
            GamePhase::ChoosingUpgrades => {
                self.results_time_remaining -= dt;
                if self.results_time_remaining <= 0.0 {
                    self.registry.broadcast(&Event::PhaseChange);
                    self.results_time_remaining = self.config.race.upgrades_screen_seconds;
                    self.phase = GamePhase::WaitingUpgrades;
                }
            }
            GamePhase::WaitingUpgrades => {
                self.results_time_remaining -= dt;
                let all_received = self
                    .players
                    .values()
                    .filter(|p| !p.disconnected)
                    .all(|p| p.upgrade_received);
                if all_received || self.results_time_remaining <= 0.0 {
                    self.apply_upgrade_penalties();
                    self.start_new_map();
                }
            }
            GamePhase::ShowingResultsLastRace => {
                self.results_time_remaining -= dt;
                self.reveal_elapsed += dt;
                self.send_reveal_frames();
                if self.results_time_remaining <= 0.0
                    && self.reveal_frames_sent >= RESULT_REVEAL_STEPS
                {
                    self.phase = GamePhase::Finished;
                    self.registry.broadcast(&Event::PhaseChange);
                    self.commands.close();
                }
            }
            GamePhase::WaitingForLobbyStart | GamePhase::Finished => {}
        }
    }

    fn step_simulation(&mut self) {
        let timestep = self.race.timestep();
        while self.sim_accumulator >= timestep {
            if self.phase == GamePhase::Running {
                let total = self.config.race.total_time_seconds;
                let countdown = self.config.race.countdown_seconds;
                // Traffic sits still through the countdown.
                if total - self.race_with_countdown >= countdown {
                    self.race.update_npcs();
                }
                self.race.apply_player_inputs();
                self.race.step_physics();
                self.race.handle_checkpoints(self.race_with_countdown);
            }
            self.sim_accumulator -= timestep;
        }
    }

    fn send_snapshots(&mut self) {
        while self.snapshots.ready() {
            if self.phase == GamePhase::Running {
                let (map, world) = self.race.snapshot_parts();
                let snap =
                    SnapshotBuilder::build_game_snapshot(map, world, self.race_with_countdown);
                if let Some(ev) = snap {
                    self.registry.broadcast(&ev);
                }
            }
            self.snapshots.consume();
        }
    }

    fn send_pre_game_snapshot(&mut self) {
        let remaining = self.maps.len().saturating_sub(self.current_map_index) as u16;
        let total = self.config.race.total_time_seconds;
        let move_enabled = total - self.config.race.countdown_seconds;
        let ev = SnapshotBuilder::build_pre_game(self.race.map(), remaining, total, move_enabled);
        self.registry.broadcast(&ev);
    }

    /// Build and sort this race's results table
    fn collect_results(&mut self) -> Vec<PlayerResult> {
        let race_duration =
            self.config.race.total_time_seconds - self.config.race.countdown_seconds;

        let ids: Vec<u32> = self.race.world().cars().keys().copied().collect();
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let finished_at = self
                .race
                .world()
                .progress()
                .get(&id)
                .map(|rp| rp.time_remaining_when_finished)
                .unwrap_or(0.0);

            let mut status = 1;
            let mut race_time = race_duration;
            if finished_at > 0.0 {
                race_time = (race_duration - finished_at).max(0.0);
                status = 0;
            }

            let slot = self.players.entry(id).or_default();
            slot.total_time += race_time;

            results.push(PlayerResult {
                id,
                name: slot.name.clone(),
                race_time_seconds: race_time as u32,
                total_time_seconds: slot.total_time as u32,
                status,
            });
        }

        results.sort_by(|a, b| {
            a.total_time_seconds
                .cmp(&b.total_time_seconds)
                .then(a.race_time_seconds.cmp(&b.race_time_seconds))
                .then(a.id.cmp(&b.id))
        });
        results
    }

    fn race_finished(&mut self) {
        if self.phase != GamePhase::Running {
            return;
        }
        info!(
            lobby_id = self.lobby_id,
            map = self.current_map_index,
            "Race over"
        );

        let results = self.collect_results();
        let is_last = self.current_map_index + 1 >= self.maps.len();

        if is_last {
            self.reveal_elapsed = 0.0;
            self.reveal_frames_sent = 0;
            self.results_time_remaining = self.config.race.results_screen_seconds;
            self.last_results = results;
            self.phase = GamePhase::ShowingResultsLastRace;
            return;
        }

        self.registry
            .broadcast(&SnapshotBuilder::build_results(results));
        self.create_new_race();
    }

    /// Rebuild the race context on the next map and respawn every car
    fn create_new_race(&mut self) {
        let models: Vec<(u32, u16)> = self
            .race
            .world()
            .cars()
            .iter()
            .map(|(&id, car)| (id, car.model))
            .collect();

        self.current_map_index += 1;
        self.race_with_countdown = self.config.race.total_time_seconds;
        self.results_time_remaining = self.config.race.results_screen_seconds;
        self.phase = GamePhase::ShowingResults;

        let seed = context_seed(self.lobby_id, self.current_map_index as u64);
        self.race = RaceContext::new(
            self.maps[self.current_map_index].clone(),
            self.config.clone(),
            seed,
        );
        for (id, model) in models {
            self.race.spawn_car_for_player(id, model);
        }

        for slot in self.players.values_mut() {
            slot.upgrade_received = false;
            slot.pending_upgrade = 0;
        }
    }

    /// Charge each player's pick and remember it for future maps
    fn apply_upgrade_penalties(&mut self) {
        for (id, slot) in &mut self.players {
            let up = slot.pending_upgrade;
            if (1..=9).contains(&up) {
                let level = (up - 1) % 3 + 1;
                slot.total_time += self.config.upgrades.penalty_for_level(level);
                slot.applied_upgrades.push(up);
                debug!(client_id = id, upgrade = up, "Upgrade applied");
            }
        }
    }

    fn start_new_map(&mut self) {
        // Fresh cars on the new map get every upgrade bought so far.
        let picks: Vec<(u32, Vec<u8>)> = self
            .players
            .iter()
            .map(|(&id, s)| (id, s.applied_upgrades.clone()))
            .collect();
        for (id, ups) in picks {
            for up in ups {
                self.race.upgrade_car(id, up);
            }
        }

        self.send_pre_game_snapshot();
        self.race_with_countdown = self.config.race.total_time_seconds;
        self.phase = GamePhase::Running;

        let gone: Vec<u32> = self
            .players
            .iter()
            .filter(|(_, s)| s.disconnected)
            .map(|(&id, _)| id)
            .collect();
        for id in gone {
            self.race.kill(id);
        }
    }

    /// Emit due podium reveal frames for the final results screen
    fn send_reveal_frames(&mut self) {
        let time_each =
            self.config.race.results_screen_seconds / f64::from(RESULT_REVEAL_STEPS);
        while self.reveal_frames_sent < RESULT_REVEAL_STEPS
            && time_each * f64::from(self.reveal_frames_sent) <= self.reveal_elapsed
        {
            let ev = SnapshotBuilder::build_results_last(
                self.last_results.clone(),
                self.reveal_frames_sent,
            );
            self.registry.broadcast(&ev);
            self.reveal_frames_sent += 1;
        }
    }
}

fn context_seed(lobby_id: u32, map_index: u64) -> u64 {
    (u64::from(lobby_id) << 16) ^ map_index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_map_loop() -> (Gameloop, mpsc::UnboundedReceiver<Event>) {
        let json = crate::game::map::tests::small_map_json();
        let map = Arc::new(GameMap::from_json(&json).unwrap());
        let maps = vec![map.clone(), map];

        let mut config = Config::default();
        config.race.total_time_seconds = 30.0;
        config.race.countdown_seconds = 2.0;
        config.race.results_screen_seconds = 4.0;
        config.race.upgrades_screen_seconds = 4.0;

        let registry = Arc::new(ClientRegistry::new());
        let (etx, erx) = mpsc::unbounded_channel();
        registry.add(1, etx);

        let (_ctx, crx) = mpsc::channel(16);
        let gl = Gameloop::new(1001, maps, Arc::new(config), crx, registry);
        (gl, erx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn join_and_start(gl: &mut Gameloop) {
        gl.handle_command(MatchCommand::NewCar {
            client_id: 1,
            model: 0,
            name: "ana".into(),
        });
        gl.handle_command(MatchCommand::BeginRace);
    }

    #[test]
    fn begin_race_sends_pre_game_and_runs() {
        let (mut gl, mut rx) = two_map_loop();
        assert_eq!(gl.phase(), GamePhase::WaitingForLobbyStart);

        join_and_start(&mut gl);
        assert_eq!(gl.phase(), GamePhase::Running);

        let events = drain(&mut rx);
        let Some(Event::PreGameSnapshot(pre)) = events.first() else {
            panic!("expected a pre-game snapshot, got {events:?}");
        };
        assert_eq!(pre.remaining_races, 2);
        assert_eq!(pre.total_time_seconds, 30);
        assert_eq!(pre.move_enabled_seconds, 28);
    }

    #[test]
    fn running_broadcasts_snapshots() {
        let (mut gl, mut rx) = two_map_loop();
        join_and_start(&mut gl);
        drain(&mut rx);

        for _ in 0..10 {
            gl.update(1.0 / 60.0);
        }
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::GameSnapshot(_))));
    }

    #[test]
    fn full_rotation_reaches_finished() {
        let (mut gl, mut rx) = two_map_loop();
        join_and_start(&mut gl);

        // Win the first race by cheat; results go out and the second
        // map is staged.
        gl.update(0.1);
        gl.handle_command(MatchCommand::Move {
            client_id: 1,
            code: 0x08,
        });
        gl.update(0.1);
        assert_eq!(gl.phase(), GamePhase::ShowingResults);
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::RaceResults { .. })));

        // Results screen then upgrade screens.
        gl.update(4.1);
        assert_eq!(gl.phase(), GamePhase::ChoosingUpgrades);
        gl.update(4.1);
        assert_eq!(gl.phase(), GamePhase::WaitingUpgrades);

        gl.handle_command(MatchCommand::Upgrade {
            client_id: 1,
            code: 5,
        });
        gl.update(0.1);
        assert_eq!(gl.phase(), GamePhase::Running);
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::PreGameSnapshot(p) if p.remaining_races == 1)));

        // Win the last race: staged podium reveal, then finished.
        gl.handle_command(MatchCommand::Move {
            client_id: 1,
            code: 0x08,
        });
        gl.update(0.1);
        assert_eq!(gl.phase(), GamePhase::ShowingResultsLastRace);

        gl.update(4.1);
        assert_eq!(gl.phase(), GamePhase::Finished);
        let events = drain(&mut rx);
        let reveals: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Event::RaceResultsLast { podium_count, .. } => Some(*podium_count),
                _ => None,
            })
            .collect();
        assert_eq!(reveals, vec![0, 1, 2, 3]);
        assert!(events.iter().any(|e| matches!(e, Event::PhaseChange)));
    }

    #[test]
    fn upgrade_penalty_lands_on_total_time() {
        let (mut gl, mut rx) = two_map_loop();
        join_and_start(&mut gl);

        gl.handle_command(MatchCommand::Move {
            client_id: 1,
            code: 0x08,
        });
        gl.update(0.1);
        drain(&mut rx);
        gl.update(4.1);
        gl.update(4.1);

        // Level 2 pick (code 5): 20 seconds on the total.
        gl.handle_command(MatchCommand::Upgrade {
            client_id: 1,
            code: 5,
        });
        gl.update(0.1);

        gl.handle_command(MatchCommand::Move {
            client_id: 1,
            code: 0x08,
        });
        gl.update(0.1);
        assert_eq!(gl.phase(), GamePhase::ShowingResultsLastRace);
        // The first reveal frame only goes out on the next tick.
        gl.update(0.1);
        let events = drain(&mut rx);
        let last = events
            .iter()
            .find_map(|e| match e {
                Event::RaceResultsLast { results, .. } => Some(results.clone()),
                _ => None,
            })
            .unwrap();
        let r = &last[0];
        assert_eq!(r.status, 0);
        assert!(r.total_time_seconds >= 20);
    }

    #[test]
    fn reveal_order_is_sorted_by_total_then_race_then_id() {
        let (mut gl, mut rx) = two_map_loop();
        gl.handle_command(MatchCommand::NewCar {
            client_id: 2,
            model: 0,
            name: "bob".into(),
        });
        gl.handle_command(MatchCommand::NewCar {
            client_id: 1,
            model: 0,
            name: "ana".into(),
        });
        gl.handle_command(MatchCommand::BeginRace);
        drain(&mut rx);

        // Player 1 wins quickly, player 2 never finishes.
        gl.update(1.0);
        gl.handle_command(MatchCommand::Move {
            client_id: 1,
            code: 0x08,
        });
        gl.handle_command(MatchCommand::Move {
            client_id: 2,
            code: 0x09,
        });
        gl.update(0.1);
        assert_eq!(gl.phase(), GamePhase::ShowingResults);

        let events = drain(&mut rx);
        let results = events
            .iter()
            .find_map(|e| match e {
                Event::RaceResults { results } => Some(results.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, 1);
        assert_eq!(results[0].status, 0);
        assert_eq!(results[1].id, 2);
        assert_eq!(results[1].status, 1);
        assert!(results[0].total_time_seconds <= results[1].total_time_seconds);
    }

    #[test]
    fn disconnected_players_die_on_the_next_map() {
        let (mut gl, mut rx) = two_map_loop();
        gl.handle_command(MatchCommand::NewCar {
            client_id: 1,
            model: 0,
            name: "ana".into(),
        });
        gl.handle_command(MatchCommand::NewCar {
            client_id: 2,
            model: 0,
            name: "bob".into(),
        });
        gl.handle_command(MatchCommand::BeginRace);

        gl.handle_command(MatchCommand::Disconnect { client_id: 2 });
        gl.handle_command(MatchCommand::Move {
            client_id: 1,
            code: 0x08,
        });
        gl.update(0.1);
        assert_eq!(gl.phase(), GamePhase::ShowingResults);
        gl.update(4.1);
        gl.update(4.1);
        gl.update(4.1);
        assert_eq!(gl.phase(), GamePhase::Running);
        drain(&mut rx);

        // The ghost slot got a fresh car on the new map but is killed
        // right away.
        assert!(gl.race.world().cars()[&2].is_destroyed());
        assert!(!gl.race.world().cars()[&1].is_destroyed());
    }

    #[test]
    fn disconnected_players_do_not_block_the_upgrade_round() {
        let (mut gl, mut rx) = two_map_loop();
        gl.handle_command(MatchCommand::NewCar {
            client_id: 1,
            model: 0,
            name: "ana".into(),
        });
        gl.handle_command(MatchCommand::NewCar {
            client_id: 2,
            model: 0,
            name: "bob".into(),
        });
        gl.handle_command(MatchCommand::BeginRace);

        gl.handle_command(MatchCommand::Disconnect { client_id: 2 });
        gl.handle_command(MatchCommand::Move {
            client_id: 1,
            code: 0x08,
        });
        gl.update(0.1);
        gl.update(4.1);
        gl.update(4.1);
        assert_eq!(gl.phase(), GamePhase::WaitingUpgrades);
        drain(&mut rx);

        // The one connected player picking is enough, no timeout wait.
        gl.handle_command(MatchCommand::Upgrade {
            client_id: 1,
            code: 2,
        });
        gl.update(0.1);
        assert_eq!(gl.phase(), GamePhase::Running);
    }

    #[test]
    fn shutdown_command_ends_the_match() {
        let (mut gl, _rx) = two_map_loop();
        join_and_start(&mut gl);
        gl.handle_command(MatchCommand::Shutdown);
        assert_eq!(gl.phase(), GamePhase::Finished);
    }

    #[test]
    fn moves_are_ignored_outside_running() {
        let (mut gl, mut rx) = two_map_loop();
        gl.handle_command(MatchCommand::NewCar {
            client_id: 1,
            model: 0,
            name: "ana".into(),
        });
        // Not started yet: the win cheat must do nothing.
        gl.handle_command(MatchCommand::Move {
            client_id: 1,
            code: 0x08,
        });
        gl.handle_command(MatchCommand::BeginRace);
        gl.update(0.1);
        assert_eq!(gl.phase(), GamePhase::Running);
        drain(&mut rx);
    }
}

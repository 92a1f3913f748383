//! Mutable race world: player cars, latched inputs, progress and NPCs

use std::collections::BTreeMap;

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use super::car::{Car, KeyState};
use super::map::Direction;
use super::physics::PhysicWorld;
use super::Vec2;

/// Minimum steps an NPC drives straight before it may turn again
const MIN_STEPS_BETWEEN_TURNS: u32 = 200;

/// Per-player checkpoint progress for the current map
#[derive(Debug, Clone, Copy)]
pub struct RaceProgress {
    /// Order of the next checkpoint this player must cross
    pub next_order: u32,
    /// Race clock value when the player crossed the goal; zero while
    /// still racing, written at most once.
    pub time_remaining_when_finished: f64,
}

impl Default for RaceProgress {
    fn default() -> Self {
        Self {
            next_order: 1,
            time_remaining_when_finished: 0.0,
        }
    }
}

/// Everything that moves on one map
pub struct WorldState {
    cars: BTreeMap<u32, Car>,
    inputs: BTreeMap<u32, KeyState>,
    progress: BTreeMap<u32, RaceProgress>,
    npc_cars: Vec<Car>,
    rng: ChaCha8Rng,
}

impl WorldState {
    pub fn new(rng: ChaCha8Rng) -> WorldState {
        WorldState {
            cars: BTreeMap::new(),
            inputs: BTreeMap::new(),
            progress: BTreeMap::new(),
            npc_cars: Vec::new(),
            rng,
        }
    }

    pub fn client_has_car(&self, client_id: u32) -> bool {
        self.cars.contains_key(&client_id)
    }

    pub fn number_of_players(&self) -> usize {
        self.cars.len()
    }

    pub fn add_player_car(&mut self, client_id: u32, car: Car) {
        self.cars.insert(client_id, car);
        self.inputs.insert(client_id, KeyState::default());
        self.progress.insert(client_id, RaceProgress::default());
    }

    pub fn keys_mut(&mut self, client_id: u32) -> &mut KeyState {
        self.inputs.entry(client_id).or_default()
    }

    pub fn cars(&self) -> &BTreeMap<u32, Car> {
        &self.cars
    }

    pub fn cars_mut(&mut self) -> &mut BTreeMap<u32, Car> {
        &mut self.cars
    }

    pub fn npc_cars(&self) -> &[Car] {
        &self.npc_cars
    }

    pub fn npc_cars_mut(&mut self) -> &mut Vec<Car> {
        &mut self.npc_cars
    }

    pub fn progress(&self) -> &BTreeMap<u32, RaceProgress> {
        &self.progress
    }

    pub fn progress_of(&mut self, client_id: u32) -> &mut RaceProgress {
        self.progress.entry(client_id).or_default()
    }

    /// Apply every player's latched keys to their car
    pub fn apply_player_inputs(&mut self, pw: &PhysicWorld) {
        for (client_id, keys) in &self.inputs {
            if let Some(car) = self.cars.get_mut(client_id) {
                let slow = pw.is_on_slow_zone(car);
                car.apply_input(*keys, slow);
            }
        }
    }

    /// One physics step over players and NPCs together
    pub fn step_physics(&mut self, pw: &PhysicWorld) {
        let mut all: Vec<&mut Car> = self
            .cars
            .values_mut()
            .chain(self.npc_cars.iter_mut())
            .collect();
        pw.step(&mut all);
    }

    /// Record the goal crossing time, first write wins
    pub fn set_race_finish(&mut self, client_id: u32, time_remaining: f64) {
        let rp = self.progress_of(client_id);
        if rp.time_remaining_when_finished == 0.0 {
            rp.time_remaining_when_finished = time_remaining;
        }
    }

    /// Finish the race for a player: freeze their time and ghost them
    pub fn win(&mut self, client_id: u32, time_remaining: f64) {
        self.set_race_finish(client_id, time_remaining);
        if let Some(car) = self.cars.get_mut(&client_id) {
            car.mark_finished();
            car.set_ghost(true);
        }
    }

    pub fn lose(&mut self, client_id: u32) {
        if let Some(car) = self.cars.get_mut(&client_id) {
            car.kill();
        }
    }

    pub fn set_god_mode(&mut self, client_id: u32) {
        if let Some(car) = self.cars.get_mut(&client_id) {
            car.set_god_mode(true);
        }
    }

    pub fn toggle_ghost(&mut self, client_id: u32) {
        if let Some(car) = self.cars.get_mut(&client_id) {
            let ghost = car.is_ghost();
            car.set_ghost(!ghost);
        }
    }

    pub fn spawn_npc(&mut self, mut car: Car, dir: Direction, speed: f32) {
        car.angle = dir.angle();
        car.make_npc(dir, speed);
        self.npc_cars.push(car);
    }

    /// All player cars destroyed or finished. An empty world never
    /// counts as finished.
    pub fn all_players_finished_or_dead(&self) -> bool {
        if self.cars.is_empty() {
            return false;
        }
        self.cars
            .values()
            .all(|c| c.is_destroyed() || c.is_finished())
    }

    /// Drive the traffic one tick: keep going straight where possible,
    /// turn at junctions once the straight-run counter allows it, and
    /// wreck any NPC that is boxed in on all four sides.
    pub fn update_npcs(&mut self, pw: &PhysicWorld) {
        for idx in 0..self.npc_cars.len() {
            let (dir, speed, steps) = match self.npc_cars[idx].npc_state() {
                Some(st) => (st.dir, st.speed, st.steps_since_last_turn),
                None => continue,
            };
            if self.npc_cars[idx].is_destroyed() || speed == 0.0 {
                continue;
            }
            self.npc_cars[idx].bump_npc_turn_counter();

            let car = &self.npc_cars[idx];
            let can_fwd = can_go(pw, car, dir, dir);
            let mut options = Vec::with_capacity(3);
            if can_fwd {
                options.push(dir);
            }
            if can_go(pw, car, dir.left(), dir) {
                options.push(dir.left());
            }
            if can_go(pw, car, dir.right(), dir) {
                options.push(dir.right());
            }
            let can_back = can_go(pw, car, dir.opposite(), dir);

            let new_dir = if steps + 1 > MIN_STEPS_BETWEEN_TURNS {
                if !options.is_empty() {
                    options[self.rng.gen_range(0..options.len())]
                } else if can_back {
                    dir.opposite()
                } else {
                    self.npc_cars[idx].kill();
                    continue;
                }
            } else if can_fwd {
                dir
            } else if !options.is_empty() {
                options[self.rng.gen_range(0..options.len())]
            } else if can_back {
                dir.opposite()
            } else {
                self.npc_cars[idx].kill();
                continue;
            };

            let car = &mut self.npc_cars[idx];
            if new_dir != dir {
                car.set_npc_dir(new_dir);
            }
            car.force_forward_speed(speed);
        }
    }
}

/// Whether an NPC can head in `dir`: probe the centerline one meter at
/// a time, farther when the move is a turn, plus one-meter side lanes
/// so the whole car fits.
fn can_go(pw: &PhysicWorld, car: &Car, dir: Direction, current: Direction) -> bool {
    let lookahead = if dir == current { 2 } else { 5 };
    let pos = car.pos;
    let unit = dir.unit();

    let clear = |offset: Vec2| -> bool {
        (1..=lookahead).all(|c| {
            let probe = pos + offset + unit.scaled(c as f32);
            pw.map().is_drivable_world(probe)
        })
    };

    if !clear(Vec2::ZERO) {
        return false;
    }
    match dir {
        Direction::Right | Direction::Left => {
            clear(Vec2::new(0.0, 1.0)) && clear(Vec2::new(0.0, -1.0))
        }
        Direction::Up | Direction::Down => {
            clear(Vec2::new(1.0, 0.0)) && clear(Vec2::new(-1.0, 0.0))
        }
    }
}

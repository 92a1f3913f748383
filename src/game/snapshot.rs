//! Snapshot building
//!
//! Snapshots ride their own accumulator so a slow tick catches up by
//! sending several in a row, same as the physics stepping.

use std::collections::BTreeMap;

use crate::net::protocol::{
    Coord, Event, GameSnapshot, NpcSnapshot, PlayerResult, PlayerSnapshot, PoleBox,
    PreGameSnapshot,
};

use super::car::Car;
use super::map::{Checkpoint, GameMap};
use super::world::WorldState;
use super::PIXELS_PER_METER;

/// Places on the final podium
pub const MAX_PODIUM_SLOTS: u8 = 3;

/// Accumulator-driven snapshot cadence
pub struct SnapshotBuilder {
    accumulator: f64,
    interval: f64,
}

impl SnapshotBuilder {
    pub fn new(interval: f64) -> Self {
        Self {
            accumulator: 0.0,
            interval,
        }
    }

    pub fn accumulate(&mut self, dt: f64) {
        self.accumulator += dt;
    }

    /// Whether at least one snapshot is due
    pub fn ready(&self) -> bool {
        self.accumulator >= self.interval
    }

    /// Consume one interval's worth of accumulated time
    pub fn consume(&mut self) {
        self.accumulator -= self.interval;
    }

    /// Build the per-tick world broadcast. Nothing is sent while the
    /// world has no player cars.
    pub fn build_game_snapshot(
        map: &GameMap,
        world: &mut WorldState,
        race_with_countdown: f64,
    ) -> Option<Event> {
        if world.cars().is_empty() {
            return None;
        }

        let remaining_seconds = if race_with_countdown <= 0.0 {
            0
        } else {
            race_with_countdown as u32
        };

        let next_orders: BTreeMap<u32, u32> = world
            .progress()
            .iter()
            .map(|(&id, rp)| (id, rp.next_order))
            .collect();
        let max_order = map.max_checkpoint_order();
        let height = map.height();

        let mut players = Vec::with_capacity(world.cars().len());
        for (&id, car) in world.cars_mut() {
            let (x_px, y_px, angle_deg) = car_transform_px(car, height);

            let next_order = next_orders.get(&id).copied().unwrap_or(1);
            let (next_checkpoint, next_is_goal) =
                checkpoint_coords(map.checkpoint_with_order(next_order));
            let second_checkpoint = if next_order < max_order {
                let (cells, goal) =
                    checkpoint_coords(map.checkpoint_with_order(next_order + 1));
                Some((cells, goal))
            } else {
                None
            };

            players.push(PlayerSnapshot {
                id,
                ghost: car.is_ghost() as u8,
                car_life: if car.is_destroyed() {
                    0
                } else {
                    car.health() as u16
                },
                model: car.model,
                animation: car.consume_animation(),
                sound: car.consume_sound(),
                x_px,
                y_px,
                layer: car.layer,
                angle_deg,
                next_checkpoint,
                next_is_goal,
                second_checkpoint,
            });
        }

        let mut npcs = Vec::with_capacity(world.npc_cars().len());
        for npc in world.npc_cars_mut() {
            let (x_px, y_px, angle_deg) = car_transform_px(npc, height);
            npcs.push(NpcSnapshot {
                model: npc.model,
                animation: npc.consume_animation(),
                x_px,
                y_px,
                layer: npc.layer,
                angle_deg,
            });
        }

        Some(Event::GameSnapshot(GameSnapshot {
            remaining_seconds,
            players,
            npcs,
        }))
    }

    /// Track staging info sent right before each race starts
    pub fn build_pre_game(
        map: &GameMap,
        remaining_races: u16,
        total_time_seconds: f64,
        move_enabled_seconds: f64,
    ) -> Event {
        let (x0_px, y0_px, x1_px, y1_px, dir) = map.pole.position_px();
        Event::PreGameSnapshot(PreGameSnapshot {
            pole: PoleBox {
                x0_px,
                y0_px,
                x1_px,
                y1_px,
                dir,
            },
            remaining_races,
            map_id: map.map_id as u8,
            total_time_seconds: total_time_seconds as u32,
            move_enabled_seconds: move_enabled_seconds as u32,
        })
    }

    /// Results table between races
    pub fn build_results(results: Vec<PlayerResult>) -> Event {
        Event::RaceResults { results }
    }

    /// Final results. `sent` is how many reveal frames went out so far,
    /// which caps the podium places the client may show.
    pub fn build_results_last(results: Vec<PlayerResult>, sent: u8) -> Event {
        Event::RaceResultsLast {
            results,
            podium_count: sent.min(MAX_PODIUM_SLOTS),
        }
    }
}

/// Image-space pixel transform of a car body
fn car_transform_px(car: &Car, map_height: u32) -> (u32, u32, u32) {
    let x_px = (car.pos.x * PIXELS_PER_METER) as u32;
    let y_px = ((map_height as f32 - car.pos.y) * PIXELS_PER_METER) as u32;

    let mut angle_deg = car.angle.to_degrees();
    while angle_deg < 0.0 {
        angle_deg += 360.0;
    }
    while angle_deg >= 360.0 {
        angle_deg -= 360.0;
    }
    (x_px, y_px, angle_deg as u32)
}

fn checkpoint_coords(cp: Option<&Checkpoint>) -> (Vec<Coord>, u8) {
    match cp {
        Some(cp) => {
            let coords = cp
                .cells
                .iter()
                .map(|c| {
                    let (x_px, y_px) = c.center_px();
                    Coord { x_px, y_px }
                })
                .collect();
            (coords, cp.goal as u8)
        }
        None => (Vec::new(), 0),
    }
}

//! Checkpoint progression and the per-map race facade

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::Config;

use super::car::{Car, CarParams};
use super::map::{GameMap, NpcSpawn};
use super::physics::PhysicWorld;
use super::world::WorldState;
use super::Vec2;

/// A movement byte outside the protocol's range. Clients never produce
/// these; getting one means a broken or hostile peer.
#[derive(Debug, thiserror::Error)]
#[error("Unknown movement code {0:#04x}")]
pub struct UnknownMoveCode(pub u8);

/// Advances player checkpoint progress from body overlaps
pub struct RaceSystem;

impl RaceSystem {
    /// One pass over every checkpoint: each non-ghost player car
    /// standing on its next checkpoint advances; crossing the goal
    /// checkpoint freezes the player's clock and ghosts them.
    pub fn handle_checkpoint_contacts(map: &GameMap, world: &mut WorldState, race_clock: f64) {
        for cp in &map.checkpoints {
            let visitors: Vec<u32> = world
                .cars()
                .iter()
                .filter(|(_, car)| !car.is_ghost())
                .filter(|(_, car)| {
                    cp.cells
                        .iter()
                        .any(|&cell| map.cell_at_world(car.pos) == Some(cell))
                })
                .map(|(&id, _)| id)
                .collect();

            for id in visitors {
                if world.progress_of(id).next_order != cp.order {
                    continue;
                }
                if cp.goal {
                    world.win(id, race_clock);
                }
                world.progress_of(id).next_order += 1;
            }
        }
    }
}

/// Everything that belongs to one map of the rotation: the parsed map,
/// its physical world and the mutable world state.
pub struct RaceContext {
    map: Arc<GameMap>,
    physics: PhysicWorld,
    world: WorldState,
    config: Arc<Config>,
}

impl RaceContext {
    pub fn new(map: Arc<GameMap>, config: Arc<Config>, seed: u64) -> RaceContext {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let mut npc_spawns = filter_spawns(&map, &config, &map.npc_spawns);
        let mut parked_spawns = filter_spawns(&map, &config, &map.parked_spawns);
        npc_spawns.shuffle(&mut rng);
        parked_spawns.shuffle(&mut rng);

        let physics = PhysicWorld::new(map.clone(), &config.physics);
        let mut world = WorldState::new(rng);

        let npc_params = CarParams::from_design(
            &config.cars.design(config.npcs.model),
            &config.cars,
        );
        for spawn in npc_spawns.iter().take(config.npcs.max_moving) {
            let pos = map.cell_center_world(spawn.cell);
            let car = Car::new(config.npcs.model, npc_params, pos, spawn.dir.angle());
            world.spawn_npc(car, spawn.dir, config.npcs.speed);
        }
        for spawn in parked_spawns.iter().take(config.npcs.max_parking) {
            let pos = map.cell_center_world(spawn.cell);
            let car = Car::new(config.npcs.model, npc_params, pos, spawn.dir.angle());
            world.spawn_npc(car, spawn.dir, 0.0);
        }

        RaceContext {
            map,
            physics,
            world,
            config,
        }
    }

    pub fn map(&self) -> &GameMap {
        &self.map
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut WorldState {
        &mut self.world
    }

    /// Map and world borrowed together, for snapshot assembly
    pub fn snapshot_parts(&mut self) -> (&GameMap, &mut WorldState) {
        (&self.map, &mut self.world)
    }

    pub fn timestep(&self) -> f64 {
        self.physics.timestep()
    }

    /// Put a new player on the next free start-grid slot
    pub fn spawn_car_for_player(&mut self, client_id: u32, model: u16) {
        let slot = self.world.number_of_players();
        let spawn = self.map.pole.spawn_for_index(slot);
        let params = CarParams::from_design(&self.config.cars.design(model), &self.config.cars);
        let car = Car::new(model, params, spawn.pos, spawn.angle);
        self.world.add_player_car(client_id, car);
    }

    /// Movement byte from a client: key latches plus the debug codes.
    /// Silently ignored for clients without a car.
    pub fn handle_move(
        &mut self,
        client_id: u32,
        code: u8,
        race_clock: f64,
    ) -> Result<(), UnknownMoveCode> {
        if !self.world.client_has_car(client_id) {
            return Ok(());
        }
        match code {
            0x00 => self.world.keys_mut(client_id).w = true,
            0x01 => self.world.keys_mut(client_id).a = true,
            0x02 => self.world.keys_mut(client_id).s = true,
            0x03 => self.world.keys_mut(client_id).d = true,
            0x04 => self.world.keys_mut(client_id).w = false,
            0x05 => self.world.keys_mut(client_id).a = false,
            0x06 => self.world.keys_mut(client_id).s = false,
            0x07 => self.world.keys_mut(client_id).d = false,
            0x08 => self.world.win(client_id, race_clock),
            0x09 => self.world.lose(client_id),
            0x10 => self.world.set_god_mode(client_id),
            0x11 => self.world.toggle_ghost(client_id),
            other => return Err(UnknownMoveCode(other)),
        }
        Ok(())
    }

    pub fn apply_player_inputs(&mut self) {
        self.world.apply_player_inputs(&self.physics);
    }

    pub fn step_physics(&mut self) {
        self.world.step_physics(&self.physics);
    }

    pub fn update_npcs(&mut self) {
        self.world.update_npcs(&self.physics);
    }

    pub fn handle_checkpoints(&mut self, race_clock: f64) {
        RaceSystem::handle_checkpoint_contacts(&self.map, &mut self.world, race_clock);
    }

    pub fn all_players_finished_or_dead(&self) -> bool {
        self.world.all_players_finished_or_dead()
    }

    pub fn upgrade_car(&mut self, client_id: u32, code: u8) {
        if let Some(car) = self.world.cars_mut().get_mut(&client_id) {
            car.apply_upgrade(code);
        }
    }

    pub fn kill(&mut self, client_id: u32) {
        self.world.lose(client_id);
    }
}

/// Drop spawns that sit too close to the start grid
fn filter_spawns(map: &GameMap, config: &Config, spawns: &[NpcSpawn]) -> Vec<NpcSpawn> {
    let pole_centers: Vec<Vec2> = map.pole.cell_centers(map.height());
    let min_dist = config.npcs.min_distance_to_pole;
    spawns
        .iter()
        .filter(|s| {
            let pos = map.cell_center_world(s.cell);
            pole_centers.iter().all(|&p| p.distance(pos) >= min_dist)
        })
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    // Straight strip with two ordered checkpoints before the goal.
    fn strip_map() -> Arc<GameMap> {
        let json = serde_json::json!({
            "grid": [
                [0, 0, 0, 0, 0, 0, 0, 0, 0],
                [0, 2, 1, 1, 1, 1, 1, 3, 0],
                [0, 2, 1, 1, 1, 1, 1, 3, 0],
                [0, 1, 1, 1, 1, 1, 1, 1, 0],
                [0, 0, 0, 0, 0, 0, 0, 0, 0],
            ],
            "checkpoints_order": [
                { "order": 1, "cells": [ { "col": 3, "row": 1 }, { "col": 3, "row": 2 } ] },
                { "order": 2, "cells": [ { "col": 5, "row": 1 }, { "col": 5, "row": 2 } ] }
            ],
            "direccion_salida": "derecha",
            "base_map": "LibertyCity",
            "npc_spawns": [ { "col": 6, "row": 3, "dir": "Left" } ],
            "npc_spawns_park": []
        })
        .to_string();
        Arc::new(GameMap::from_json(&json).unwrap())
    }

    fn ctx() -> RaceContext {
        RaceContext::new(strip_map(), Arc::new(Config::default()), 42)
    }

    fn put_player_at(ctx: &mut RaceContext, id: u32, pos: Vec2) {
        ctx.spawn_car_for_player(id, 0);
        let car = ctx.world_mut().cars_mut().get_mut(&id).unwrap();
        car.force_transform(pos, 0.0);
    }

    #[test]
    fn checkpoints_advance_in_order_only() {
        let mut ctx = ctx();
        put_player_at(&mut ctx, 1, Vec2::new(2.5, 2.5));
        assert_eq!(ctx.world().progress()[&1].next_order, 1);

        // Standing on checkpoint 2 does nothing while 1 is pending.
        ctx.world_mut()
            .cars_mut()
            .get_mut(&1)
            .unwrap()
            .force_transform(Vec2::new(5.5, 2.5), 0.0);
        ctx.handle_checkpoints(500.0);
        assert_eq!(ctx.world().progress()[&1].next_order, 1);

        // Cross them in order.
        ctx.world_mut()
            .cars_mut()
            .get_mut(&1)
            .unwrap()
            .force_transform(Vec2::new(3.5, 2.5), 0.0);
        ctx.handle_checkpoints(500.0);
        assert_eq!(ctx.world().progress()[&1].next_order, 2);

        ctx.world_mut()
            .cars_mut()
            .get_mut(&1)
            .unwrap()
            .force_transform(Vec2::new(5.5, 2.5), 0.0);
        ctx.handle_checkpoints(480.0);
        assert_eq!(ctx.world().progress()[&1].next_order, 3);
    }

    #[test]
    fn goal_only_counts_as_the_last_checkpoint() {
        let mut ctx = ctx();
        put_player_at(&mut ctx, 1, Vec2::new(7.5, 2.5));
        // Goal is order 3, the player still needs 1.
        ctx.handle_checkpoints(500.0);
        assert_eq!(ctx.world().progress()[&1].next_order, 1);
        assert!(!ctx.world().cars()[&1].is_finished());
    }

    #[test]
    fn crossing_the_goal_freezes_the_clock_once() {
        let mut ctx = ctx();
        put_player_at(&mut ctx, 1, Vec2::new(3.5, 2.5));
        ctx.handle_checkpoints(500.0);
        ctx.world_mut()
            .cars_mut()
            .get_mut(&1)
            .unwrap()
            .force_transform(Vec2::new(5.5, 2.5), 0.0);
        ctx.handle_checkpoints(490.0);
        ctx.world_mut()
            .cars_mut()
            .get_mut(&1)
            .unwrap()
            .force_transform(Vec2::new(7.5, 2.5), 0.0);
        ctx.handle_checkpoints(480.0);

        let car = &ctx.world().cars()[&1];
        assert!(car.is_finished());
        assert!(car.is_ghost());
        assert_eq!(
            ctx.world().progress()[&1].time_remaining_when_finished,
            480.0
        );

        // Lingering on the goal changes nothing.
        ctx.handle_checkpoints(470.0);
        assert_eq!(
            ctx.world().progress()[&1].time_remaining_when_finished,
            480.0
        );
    }

    #[test]
    fn npcs_never_advance_checkpoints() {
        let mut ctx = ctx();
        // The map has one NPC spawner, but NPCs are not in `cars()` at
        // all, so the checkpoint pass cannot see them.
        ctx.handle_checkpoints(500.0);
        assert!(ctx.world().progress().is_empty());
    }

    #[test]
    fn move_codes_latch_and_release_keys() {
        let mut ctx = ctx();
        put_player_at(&mut ctx, 1, Vec2::new(2.5, 2.5));
        ctx.handle_move(1, 0x00, 500.0).unwrap();
        ctx.handle_move(1, 0x03, 500.0).unwrap();
        let keys = *ctx.world_mut().keys_mut(1);
        assert!(keys.w && keys.d && !keys.a && !keys.s);

        ctx.handle_move(1, 0x04, 500.0).unwrap();
        assert!(!ctx.world_mut().keys_mut(1).w);
    }

    #[test]
    fn cheat_codes_win_lose_god_ghost() {
        let mut ctx = ctx();
        put_player_at(&mut ctx, 1, Vec2::new(2.5, 2.5));
        put_player_at(&mut ctx, 2, Vec2::new(2.5, 3.5));

        ctx.handle_move(1, 0x08, 321.0).unwrap();
        assert!(ctx.world().cars()[&1].is_finished());
        assert_eq!(
            ctx.world().progress()[&1].time_remaining_when_finished,
            321.0
        );

        ctx.handle_move(2, 0x09, 321.0).unwrap();
        assert!(ctx.world().cars()[&2].is_destroyed());
    }

    #[test]
    fn unknown_move_code_is_an_error() {
        let mut ctx = ctx();
        put_player_at(&mut ctx, 1, Vec2::new(2.5, 2.5));
        assert!(ctx.handle_move(1, 0x0c, 500.0).is_err());
        // Without a car the byte is dropped before validation.
        assert!(ctx.handle_move(99, 0x0c, 500.0).is_ok());
    }

    #[test]
    fn players_spawn_on_successive_grid_slots() {
        let mut ctx = ctx();
        ctx.spawn_car_for_player(1, 0);
        ctx.spawn_car_for_player(2, 3);
        let a = ctx.world().cars()[&1].pos;
        let b = ctx.world().cars()[&2].pos;
        assert_ne!(a, b);
        assert_eq!(ctx.world().cars()[&2].model, 3);
    }

    #[test]
    fn npc_spawns_respect_pole_distance() {
        // Default min distance is 20m and the map is tiny, so every
        // spawn is filtered out.
        let ctx = ctx();
        assert!(ctx.world().npc_cars().is_empty());

        let mut cfg = Config::default();
        cfg.npcs.min_distance_to_pole = 1.0;
        let ctx = RaceContext::new(strip_map(), Arc::new(cfg), 42);
        assert_eq!(ctx.world().npc_cars().len(), 1);
    }
}

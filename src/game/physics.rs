//! Fixed-timestep top-down physics
//!
//! A deliberately small rigid world: circle car bodies against the
//! map's cell grid, Box2D-style damping, and approach-speed hit events
//! for crash damage. Everything is deterministic for a given input
//! sequence.

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::PhysicsConfig;

use super::car::Car;
use super::map::GameMap;
use super::Vec2;

const LINEAR_DAMPING: f32 = 1.5;
const ANGULAR_DAMPING: f32 = 2.0;

/// Marker index for wall contacts in the per-step hit dedupe set
const WALL: usize = usize::MAX;

/// The physical world for one race map
pub struct PhysicWorld {
    map: Arc<GameMap>,
    timestep: f64,
    substeps: u32,
    hit_threshold: f32,
}

impl PhysicWorld {
    pub fn new(map: Arc<GameMap>, cfg: &PhysicsConfig) -> PhysicWorld {
        PhysicWorld {
            map,
            timestep: cfg.timestep_seconds,
            substeps: cfg.substeps.max(1),
            hit_threshold: cfg.hit_speed_threshold,
        }
    }

    pub fn map(&self) -> &GameMap {
        &self.map
    }

    pub fn timestep(&self) -> f64 {
        self.timestep
    }

    /// Advance every car one fixed step: integrate forces, resolve
    /// wall and car contacts, deliver crash damage, then run the
    /// bridge ramps. Force accumulators are cleared at the end.
    pub fn step(&self, cars: &mut [&mut Car]) {
        let sub_dt = (self.timestep / self.substeps as f64) as f32;
        // A contact deals damage at most once per full step.
        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        let mut hits: Vec<(usize, f32)> = Vec::new();

        for _ in 0..self.substeps {
            for car in cars.iter_mut() {
                integrate(car, sub_dt);
            }
            self.resolve_wall_contacts(cars, &mut seen, &mut hits);
            self.resolve_car_contacts(cars, &mut seen, &mut hits);
        }

        for (idx, speed) in hits {
            let car = &mut cars[idx];
            // Finished cars are already ghosts, crashes no longer count
            if !car.is_finished() {
                car.apply_damage(speed);
            }
        }

        self.handle_bridge_contacts(cars);

        for car in cars.iter_mut() {
            car.force = Vec2::ZERO;
            car.torque = 0.0;
        }
    }

    /// Whether the car's center sits on a slow-zone cell
    pub fn is_on_slow_zone(&self, car: &Car) -> bool {
        self.map
            .kind_at_world(car.pos)
            .map(|k| k.is_slow())
            .unwrap_or(false)
    }

    fn resolve_wall_contacts(
        &self,
        cars: &mut [&mut Car],
        seen: &mut HashSet<(usize, usize)>,
        hits: &mut Vec<(usize, f32)>,
    ) {
        let w = self.map.width() as i64;
        let h = self.map.height() as i64;

        for (idx, car) in cars.iter_mut().enumerate() {
            if car.is_ghost() {
                continue;
            }
            let r = car.params.radius();
            let cx = car.pos.x.floor() as i64;
            let cy = car.pos.y.floor() as i64;

            for gx in (cx - 1)..=(cx + 1) {
                for gy in (cy - 1)..=(cy + 1) {
                    let blocking = if gx < 0 || gy < 0 || gx >= w || gy >= h {
                        // The border is walled on both layers
                        true
                    } else {
                        let cell = super::map::GridCell {
                            col: gx as u32,
                            row: (h - 1 - gy) as u32,
                        };
                        self.map.kind_at(cell).blocks_layer(car.layer)
                    };
                    if !blocking {
                        continue;
                    }

                    // Closest point on the cell box to the car center
                    let px = car.pos.x.clamp(gx as f32, gx as f32 + 1.0);
                    let py = car.pos.y.clamp(gy as f32, gy as f32 + 1.0);
                    let delta = car.pos - Vec2::new(px, py);
                    let dist = delta.length();
                    if dist >= r {
                        continue;
                    }

                    let normal = if dist > 1e-6 {
                        delta.scaled(1.0 / dist)
                    } else {
                        // Center inside the box, push back along velocity
                        Vec2::ZERO - car.vel.normalized()
                    };

                    car.pos += normal.scaled(r - dist);
                    let approach = -car.vel.dot(normal);
                    if approach > 0.0 {
                        // Inelastic: remove the normal component
                        car.vel += normal.scaled(approach);
                        if approach >= self.hit_threshold && seen.insert((idx, WALL)) {
                            hits.push((idx, approach));
                        }
                    }
                }
            }
        }
    }

    fn resolve_car_contacts(
        &self,
        cars: &mut [&mut Car],
        seen: &mut HashSet<(usize, usize)>,
        hits: &mut Vec<(usize, f32)>,
    ) {
        for i in 0..cars.len() {
            for j in (i + 1)..cars.len() {
                let (left, right) = cars.split_at_mut(j);
                let a = &mut *left[i];
                let b = &mut *right[0];

                // Ghosts pass through everything; NPC traffic ignores
                // other NPCs; layers never mix.
                if a.is_ghost() || b.is_ghost() {
                    continue;
                }
                if a.is_npc() && b.is_npc() {
                    continue;
                }
                if a.layer != b.layer {
                    continue;
                }

                let ra = a.params.radius();
                let rb = b.params.radius();
                let delta = b.pos - a.pos;
                let dist = delta.length();
                let combined = ra + rb;
                if dist >= combined {
                    continue;
                }

                let normal = if dist > 1e-6 {
                    delta.scaled(1.0 / dist)
                } else {
                    Vec2::new(1.0, 0.0)
                };
                let push = (combined - dist) * 0.5 + 0.01;
                a.pos += normal.scaled(-push);
                b.pos += normal.scaled(push);

                let approach = (a.vel - b.vel).dot(normal);
                if approach > 0.0 {
                    a.vel += normal.scaled(-approach * 0.5);
                    b.vel += normal.scaled(approach * 0.5);
                    if approach >= self.hit_threshold && seen.insert((i, j)) {
                        hits.push((i, approach));
                        hits.push((j, approach));
                    }
                }
            }
        }
    }

    /// Move every car overlapping a bridge ramp to the ramp's target
    /// layer. Each car is handled once per step.
    fn handle_bridge_contacts(&self, cars: &mut [&mut Car]) {
        for car in cars.iter_mut() {
            if car.is_ghost() {
                continue;
            }
            if let Some(kind) = self.map.kind_at_world(car.pos) {
                if let Some(target) = kind.bridge_target() {
                    car.set_layer(target);
                }
            }
        }
    }
}

fn integrate(car: &mut Car, dt: f32) {
    let mass = car.params.mass();
    let inertia = car.params.inertia();

    car.vel += car.force.scaled(dt / mass);
    car.vel = car.vel.scaled(1.0 / (1.0 + LINEAR_DAMPING * dt));
    car.pos += car.vel.scaled(dt);

    car.angular_vel += car.torque / inertia * dt;
    car.angular_vel /= 1.0 + ANGULAR_DAMPING * dt;
    car.angle += car.angular_vel * dt;
}

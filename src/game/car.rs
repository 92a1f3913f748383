//! Car bodies: stat mapping, drive forces, damage and upgrades

use crate::config::{CarDesign, CarsConfig};

use super::map::Direction;
use super::Vec2;

/// Minimum forward speed for the brake key to count as braking
const MIN_FORWARD_SPEED_FOR_BRAKE: f32 = 6.0;
/// Angular velocity clamp while steering
const MAX_ANGULAR_VEL: f32 = 2.0;
/// Coast drag when neither pedal is pressed
const DRAG_COEFF: f32 = 0.8;
/// Always-on torque opposing spin
const EXTRA_ANGULAR_DAMPING: f32 = 2.5;
/// Crash tier boundaries on approach speed (m/s)
const CRASH_SPEED_LOW: f32 = 8.0;
const CRASH_SPEED_MED: f32 = 12.0;
/// One-shot animation code for the destruction event
const DESTROY_EVENT: u8 = 4;

pub const MAX_HEALTH: f32 = 100.0;

/// Sound codes in the snapshot, higher wins
pub const SOUND_GOAL: u8 = 2;
pub const SOUND_BRAKE: u8 = 1;

/// Latched key state for one player
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyState {
    pub w: bool,
    pub a: bool,
    pub s: bool,
    pub d: bool,
}

/// Physical parameters derived from a design's 0-100 stats
#[derive(Debug, Clone, Copy)]
pub struct CarParams {
    pub length: f32,
    pub width: f32,
    pub density: f32,
    pub max_speed: f32,
    pub engine_force: f32,
    pub turn_torque: f32,
    pub friction: f32,
    pub shield: f32,
    pub slow_zone_factor: f32,
    pub reverse_factor: f32,
    pub damage_low: f32,
    pub damage_mid: f32,
    pub damage_high: f32,
}

fn lerp(min: f32, max: f32, t: f32) -> f32 {
    min + (max - min) * t
}

impl CarParams {
    /// Map a design's stats into physical ranges. Heavier cars get a
    /// higher density (mass = density * area), so the same desired
    /// acceleration costs them a bigger engine force.
    pub fn from_design(design: &CarDesign, cfg: &CarsConfig) -> CarParams {
        let b = &cfg.bounds;
        let speed = design.stats.speed / 100.0;
        let engine = design.stats.engine / 100.0;
        let handling = design.stats.handling / 100.0;
        let weight = design.stats.weight / 100.0;
        let shield = design.stats.shield / 100.0;

        let length = design.length;
        let width = design.width;
        let area = length * width;

        let density = lerp(b.density_min, b.density_max, weight);
        let desired_accel = lerp(b.accel_min, b.accel_max, engine);
        let mass = density * area;

        CarParams {
            length,
            width,
            density,
            max_speed: lerp(b.max_speed_min, b.max_speed_max, speed),
            engine_force: mass * desired_accel,
            turn_torque: lerp(b.turn_torque_min, b.turn_torque_max, handling),
            friction: lerp(b.friction_min, b.friction_max, handling),
            shield: lerp(b.shield_min, b.shield_max, shield),
            slow_zone_factor: cfg.slow_zone_factor,
            reverse_factor: cfg.reverse_factor,
            damage_low: cfg.damage_low,
            damage_mid: cfg.damage_mid,
            damage_high: cfg.damage_high,
        }
    }

    pub fn mass(&self) -> f32 {
        self.density * self.length * self.width
    }

    /// Moment of inertia of the chassis box
    pub fn inertia(&self) -> f32 {
        self.mass() * (self.length * self.length + self.width * self.width) / 12.0
    }

    /// Collision circle radius used by the world
    pub fn radius(&self) -> f32 {
        self.width * 0.5
    }
}

/// NPC-only state
#[derive(Debug, Clone, Copy)]
pub struct NpcState {
    pub dir: Direction,
    pub speed: f32,
    pub steps_since_last_turn: u32,
}

/// An authoritative car body
#[derive(Debug, Clone)]
pub struct Car {
    pub model: u16,
    pub params: CarParams,

    pub pos: Vec2,
    pub vel: Vec2,
    pub angle: f32,
    pub angular_vel: f32,
    pub force: Vec2,
    pub torque: f32,
    /// Elevation layer: 0 ground, 1 bridge
    pub layer: u8,

    health: f32,
    ghost: bool,
    god_mode: bool,
    finished: bool,
    npc: Option<NpcState>,

    // One-shot feedback consumed by the snapshot
    crash_code: u8,
    destroy_event_pending: bool,
    brake_sound_pending: bool,
    goal_sound_pending: bool,
    was_braking: bool,
}

impl Car {
    pub fn new(model: u16, params: CarParams, pos: Vec2, angle: f32) -> Car {
        Car {
            model,
            params,
            pos,
            vel: Vec2::ZERO,
            angle,
            angular_vel: 0.0,
            force: Vec2::ZERO,
            torque: 0.0,
            layer: 0,
            health: MAX_HEALTH,
            ghost: false,
            god_mode: false,
            finished: false,
            npc: None,
            crash_code: 0,
            destroy_event_pending: true,
            brake_sound_pending: false,
            goal_sound_pending: false,
            was_braking: false,
        }
    }

    /// Turn this car into a traffic NPC. The turn counter starts high
    /// so it may turn at the first junction it meets.
    pub fn make_npc(&mut self, dir: Direction, speed: f32) {
        self.npc = Some(NpcState {
            dir,
            speed,
            steps_since_last_turn: 1000,
        });
    }

    pub fn is_npc(&self) -> bool {
        self.npc.is_some()
    }

    pub fn npc_state(&self) -> Option<NpcState> {
        self.npc
    }

    pub fn set_npc_dir(&mut self, dir: Direction) {
        if let Some(npc) = &mut self.npc {
            npc.dir = dir;
            npc.steps_since_last_turn = 0;
        }
        self.angle = dir.angle();
        self.angular_vel = 0.0;
    }

    pub fn bump_npc_turn_counter(&mut self) {
        if let Some(npc) = &mut self.npc {
            npc.steps_since_last_turn = npc.steps_since_last_turn.saturating_add(1);
        }
    }

    pub fn forward(&self) -> Vec2 {
        Vec2::from_angle(self.angle)
    }

    pub fn forward_speed(&self) -> f32 {
        self.vel.dot(self.forward())
    }

    /// Apply one tick of latched player input as forces on the body
    pub fn apply_input(&mut self, keys: KeyState, slow_zone: bool) {
        if self.is_destroyed() || self.finished {
            return;
        }

        let forward = self.forward();
        let speed_along = self.vel.dot(forward);
        let forward_speed = speed_along.max(0.0);

        let braking_now = keys.s && forward_speed > MIN_FORWARD_SPEED_FOR_BRAKE;
        if braking_now && !self.was_braking {
            self.brake_sound_pending = true;
        }
        self.was_braking = braking_now;

        // Pedals
        let mut fwd_force = self.params.engine_force;
        if slow_zone {
            fwd_force *= self.params.slow_zone_factor;
        }
        if keys.w && !keys.s {
            self.force += forward.scaled(fwd_force);
        } else if keys.s && !keys.w {
            self.force += forward.scaled(-fwd_force * self.params.reverse_factor);
        } else {
            self.force += self.vel.scaled(-DRAG_COEFF);
        }

        // Steering, only with real forward (or reverse) motion
        if speed_along.abs() > 0.2 {
            let mut turn_dir = 0.0;
            if keys.d {
                turn_dir -= 1.0;
            }
            if keys.a {
                turn_dir += 1.0;
            }
            if turn_dir != 0.0 {
                let sign = if speed_along >= 0.0 { 1.0 } else { -1.0 };
                self.torque += self.params.turn_torque * turn_dir * sign;
                if self.angular_vel.abs() > MAX_ANGULAR_VEL {
                    self.angular_vel = MAX_ANGULAR_VEL.copysign(self.angular_vel);
                }
            }
        }

        self.clamp_linear_speed();
        self.torque += -self.angular_vel * EXTRA_ANGULAR_DAMPING;
    }

    pub fn clamp_linear_speed(&mut self) {
        let speed = self.vel.length();
        if speed > self.params.max_speed {
            self.vel = self.vel.scaled(self.params.max_speed / speed);
        }
    }

    pub fn health(&self) -> f32 {
        self.health
    }

    pub fn is_destroyed(&self) -> bool {
        self.health <= 0.0
    }

    /// Crash damage from a contact at the given approach speed
    pub fn apply_damage(&mut self, approach_speed: f32) {
        if self.is_npc() {
            self.kill();
        }
        if self.god_mode {
            return;
        }
        if approach_speed < CRASH_SPEED_LOW {
            self.health -= self.params.damage_low * (1.0 - self.params.shield);
            self.crash_code = 1;
        } else if approach_speed < CRASH_SPEED_MED {
            self.health -= self.params.damage_mid * (1.0 - self.params.shield);
            self.crash_code = 2;
        } else {
            self.health -= self.params.damage_high * (1.0 - self.params.shield);
            self.crash_code = 3;
        }
        if self.is_destroyed() {
            self.kill();
        }
    }

    /// Instantly destroy. Player cars turn ghost; NPC wrecks stay
    /// solid so the traffic keeps piling into them.
    pub fn kill(&mut self) {
        self.health = 0.0;
        if !self.is_npc() {
            self.set_ghost(true);
        }
    }

    pub fn set_god_mode(&mut self, on: bool) {
        self.god_mode = on;
        self.health = MAX_HEALTH;
    }

    pub fn is_ghost(&self) -> bool {
        self.ghost
    }

    pub fn set_ghost(&mut self, ghost: bool) {
        self.ghost = ghost;
    }

    /// Layer changes are ignored for ghosts, which float outside the
    /// collision world entirely.
    pub fn set_layer(&mut self, layer: u8) {
        if self.ghost {
            return;
        }
        self.layer = layer;
    }

    pub fn mark_finished(&mut self) {
        if !self.finished {
            self.finished = true;
            self.goal_sound_pending = true;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Animation code for the snapshot: the one-shot destroy event for
    /// wrecks, otherwise the latest un-reported crash tier.
    pub fn consume_animation(&mut self) -> u8 {
        if self.is_destroyed() {
            if self.destroy_event_pending {
                self.destroy_event_pending = false;
                return DESTROY_EVENT;
            }
            return 0;
        }
        let code = self.crash_code;
        self.crash_code = 0;
        code
    }

    /// Sound code for the snapshot; the goal jingle outranks brakes
    pub fn consume_sound(&mut self) -> u8 {
        if self.goal_sound_pending {
            self.goal_sound_pending = false;
            self.brake_sound_pending = false;
            return SOUND_GOAL;
        }
        if self.brake_sound_pending {
            self.brake_sound_pending = false;
            return SOUND_BRAKE;
        }
        0
    }

    /// Upgrade codes 1-9: 1-3 top speed, 4-6 shield, 7-9 handling
    pub fn apply_upgrade(&mut self, code: u8) {
        match code {
            1 => {
                self.params.max_speed *= 1.08;
                self.params.engine_force *= 1.05;
            }
            2 => {
                self.params.max_speed *= 1.16;
                self.params.engine_force *= 1.10;
            }
            3 => {
                self.params.max_speed *= 1.25;
                self.params.engine_force *= 1.15;
            }
            4 => self.params.shield = (self.params.shield + 0.10).min(0.9),
            5 => self.params.shield = (self.params.shield + 0.20).min(0.9),
            6 => self.params.shield = (self.params.shield + 0.30).min(0.9),
            7 => {
                self.params.turn_torque *= 1.05;
                self.params.friction *= 1.05;
            }
            8 => {
                self.params.turn_torque *= 1.10;
                self.params.friction *= 1.10;
            }
            9 => {
                self.params.turn_torque *= 1.15;
                self.params.friction *= 1.15;
            }
            _ => {}
        }
    }

    /// NPCs move at a fixed cruise speed along their heading
    pub fn force_forward_speed(&mut self, speed: f32) {
        self.vel = self.forward().scaled(speed);
    }

    pub fn force_transform(&mut self, pos: Vec2, angle: f32) {
        self.pos = pos;
        self.angle = angle;
    }
}

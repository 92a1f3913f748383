//! Game simulation modules

pub mod car;
pub mod gameloop;
pub mod map;
pub mod physics;
pub mod race;
pub mod snapshot;
pub mod world;

pub use gameloop::Gameloop;

/// Pixels per meter used by every client-facing coordinate
pub const PIXELS_PER_METER: f32 = 16.0;

/// 2D vector in world meters
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn dot(self, other: Vec2) -> f32 {
        self.x * other.x + self.y * other.y
    }

    pub fn scaled(self, k: f32) -> Vec2 {
        Vec2::new(self.x * k, self.y * k)
    }

    /// Unit vector, or zero when the length is negligible
    pub fn normalized(self) -> Vec2 {
        let len = self.length();
        if len < 1e-6 {
            Vec2::ZERO
        } else {
            self.scaled(1.0 / len)
        }
    }

    pub fn from_angle(angle: f32) -> Vec2 {
        Vec2::new(angle.cos(), angle.sin())
    }

    pub fn distance(self, other: Vec2) -> f32 {
        (other - self).length()
    }
}

impl std::ops::Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Vec2) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

/// A command routed into a running match through its queue
#[derive(Debug, Clone)]
pub enum MatchCommand {
    /// Raw movement/cheat code from a client
    Move { client_id: u32, code: u8 },
    /// Adds a player and their car to the race
    NewCar {
        client_id: u32,
        model: u16,
        name: String,
    },
    /// Leaves the lobby phase and starts the first race
    BeginRace,
    /// Upgrade pick, only honored during the upgrade wait phase
    Upgrade { client_id: u32, code: u8 },
    /// Player is gone; their car gets killed
    Disconnect { client_id: u32 },
    /// Server shutdown, match exits on next tick
    Shutdown,
}

//! Wire message types
//!
//! One byte of opcode, then fixed big-endian fields. Strings travel as
//! a u16 length followed by the raw bytes. [`Command`] is what clients
//! send, [`Event`] what the server sends back.

/// Client to server opcodes
pub const OP_MOVE: u8 = 0x12;
pub const OP_CREATE_LOBBY: u8 = 0x16;
pub const OP_JOIN_LOBBY: u8 = 0x17;
pub const OP_START_LOBBY: u8 = 0x22;
pub const OP_UPGRADE: u8 = 0x33;
pub const OP_DISCONNECT: u8 = 0x34;

/// Server to client opcodes
pub const EV_GAME_SNAPSHOT: u8 = 0x01;
pub const EV_ASSIGNED_ID: u8 = 0x15;
pub const EV_JOIN_ERROR: u8 = 0x20;
pub const EV_LOBBY_SNAPSHOT: u8 = 0x21;
pub const EV_LOBBY_STARTED: u8 = 0x22;
pub const EV_PRE_GAME_SNAPSHOT: u8 = 0x23;
pub const EV_RACE_RESULTS: u8 = 0x24;
pub const EV_JOIN_ACCEPTED: u8 = 0x30;
pub const EV_PHASE_CHANGE: u8 = 0x32;

/// A decoded client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Move {
        code: u8,
    },
    CreateLobby {
        model: u8,
        name: String,
        maps: Vec<String>,
    },
    JoinLobby {
        lobby_id: u32,
        model: u8,
        name: String,
    },
    StartLobby {
        lobby_id: u32,
    },
    Upgrade {
        code: u8,
    },
    Disconnect,
}

/// A pixel coordinate in image space (Y down)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coord {
    pub x_px: u32,
    pub y_px: u32,
}

/// One player car inside a game snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSnapshot {
    pub id: u32,
    pub ghost: u8,
    pub car_life: u16,
    pub model: u16,
    pub animation: u8,
    pub sound: u8,
    pub x_px: u32,
    pub y_px: u32,
    pub layer: u8,
    pub angle_deg: u32,
    pub next_checkpoint: Vec<Coord>,
    pub next_is_goal: u8,
    /// Cells of the checkpoint after the next one, with its goal flag.
    /// Absent once the next checkpoint is the last.
    pub second_checkpoint: Option<(Vec<Coord>, u8)>,
}

/// One traffic car inside a game snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpcSnapshot {
    pub model: u16,
    pub animation: u8,
    pub x_px: u32,
    pub y_px: u32,
    pub layer: u8,
    pub angle_deg: u32,
}

/// The per-tick world broadcast while a race runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSnapshot {
    pub remaining_seconds: u32,
    pub players: Vec<PlayerSnapshot>,
    pub npcs: Vec<NpcSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyPlayer {
    pub name: String,
    pub model: u8,
}

/// Lobby roster, rebroadcast on every join and leave
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbySnapshot {
    pub lobby_id: u32,
    pub players: Vec<LobbyPlayer>,
}

/// Start grid bounding box in pixels plus the exit direction byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoleBox {
    pub x0_px: u32,
    pub y0_px: u32,
    pub x1_px: u32,
    pub y1_px: u32,
    pub dir: u8,
}

/// Sent before each race so clients can stage the track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreGameSnapshot {
    pub pole: PoleBox,
    pub remaining_races: u16,
    pub map_id: u8,
    pub total_time_seconds: u32,
    pub move_enabled_seconds: u32,
}

/// One row of the results table. Status 0 means the player crossed the
/// goal, 1 means time ran out (or the car was wrecked).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerResult {
    pub id: u32,
    pub name: String,
    pub race_time_seconds: u32,
    pub total_time_seconds: u32,
    pub status: u8,
}

/// A decoded server event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    GameSnapshot(GameSnapshot),
    AssignedId {
        client_id: u32,
    },
    JoinError,
    LobbySnapshot(LobbySnapshot),
    LobbyStarted,
    PreGameSnapshot(PreGameSnapshot),
    /// Plain results table shown between races
    RaceResults {
        results: Vec<PlayerResult>,
    },
    /// Final results with the staged podium reveal. `podium_count` is
    /// how many podium places the client may show so far (0 to 3).
    RaceResultsLast {
        results: Vec<PlayerResult>,
        podium_count: u8,
    },
    JoinAccepted,
    PhaseChange,
}

//! Race map parsing and world-space mapping
//!
//! Maps are JSON documents produced by the map editor (field names keep
//! the editor's Spanish vocabulary). The grid is stored top-down: row 0
//! is the top of the image, while physics Y grows upward. One cell is
//! one meter; clients work in pixels at 16 px/m.

use serde::Deserialize;

use super::{Vec2, PIXELS_PER_METER};

/// Cardinal direction, used for the start grid and NPC headings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Right,
    Left,
    Up,
    Down,
}

impl Direction {
    /// Wire byte for the pre-game snapshot
    pub fn code(self) -> u8 {
        match self {
            Direction::Right => 0x01,
            Direction::Left => 0x02,
            Direction::Up => 0x03,
            Direction::Down => 0x04,
        }
    }

    /// Heading in physics space (Y up)
    pub fn angle(self) -> f32 {
        use std::f32::consts::PI;
        match self {
            Direction::Right => 0.0,
            Direction::Left => PI,
            Direction::Up => 0.5 * PI,
            Direction::Down => -0.5 * PI,
        }
    }

    pub fn unit(self) -> Vec2 {
        match self {
            Direction::Right => Vec2::new(1.0, 0.0),
            Direction::Left => Vec2::new(-1.0, 0.0),
            Direction::Up => Vec2::new(0.0, 1.0),
            Direction::Down => Vec2::new(0.0, -1.0),
        }
    }

    pub fn left(self) -> Direction {
        match self {
            Direction::Right => Direction::Up,
            Direction::Up => Direction::Left,
            Direction::Left => Direction::Down,
            Direction::Down => Direction::Right,
        }
    }

    pub fn right(self) -> Direction {
        self.left().opposite()
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Right => Direction::Left,
            Direction::Left => Direction::Right,
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

/// Visual theme of a map, forwarded to clients as a byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapId {
    LibertyCity = 0,
    SanAndreas = 1,
    ViceCity = 2,
}

/// One grid cell's terrain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Wall,
    Road,
    Pole,
    Goal,
    Slow,
    WallUpperOnly,
    BridgeUp,
    WallGroundOnly,
    BridgeDown,
    BridgeDownPole,
    BridgeUpPole,
    BridgeDownGoal,
    BridgeUpGoal,
    BridgeDownCheckpoint,
    BridgeUpCheckpoint,
}

impl CellKind {
    fn from_code(code: i64) -> Option<CellKind> {
        Some(match code {
            0 => CellKind::Wall,
            1 => CellKind::Road,
            2 => CellKind::Pole,
            3 => CellKind::Goal,
            5 => CellKind::Slow,
            6 => CellKind::WallUpperOnly,
            7 => CellKind::BridgeUp,
            8 => CellKind::WallGroundOnly,
            9 => CellKind::BridgeDown,
            10 => CellKind::BridgeDownPole,
            11 => CellKind::BridgeUpPole,
            12 => CellKind::BridgeDownGoal,
            13 => CellKind::BridgeUpGoal,
            14 => CellKind::BridgeDownCheckpoint,
            15 => CellKind::BridgeUpCheckpoint,
            _ => return None,
        })
    }

    pub fn is_drivable(self) -> bool {
        !matches!(self, CellKind::Wall | CellKind::WallGroundOnly)
    }

    /// Whether the cell is solid for a car on the given elevation layer
    pub fn blocks_layer(self, layer: u8) -> bool {
        match self {
            CellKind::Wall => true,
            CellKind::WallUpperOnly => layer == 1,
            CellKind::WallGroundOnly => layer == 0,
            _ => false,
        }
    }

    /// Elevation layer a bridge ramp moves cars to
    pub fn bridge_target(self) -> Option<u8> {
        match self {
            CellKind::BridgeUp
            | CellKind::BridgeUpPole
            | CellKind::BridgeUpGoal
            | CellKind::BridgeUpCheckpoint => Some(1),
            CellKind::BridgeDown
            | CellKind::BridgeDownPole
            | CellKind::BridgeDownGoal
            | CellKind::BridgeDownCheckpoint => Some(0),
            _ => None,
        }
    }

    pub fn is_pole(self) -> bool {
        matches!(
            self,
            CellKind::Pole | CellKind::BridgeDownPole | CellKind::BridgeUpPole
        )
    }

    pub fn is_goal(self) -> bool {
        matches!(
            self,
            CellKind::Goal | CellKind::BridgeDownGoal | CellKind::BridgeUpGoal
        )
    }

    pub fn is_slow(self) -> bool {
        matches!(self, CellKind::Slow)
    }
}

/// A grid position (column, row) in matrix coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridCell {
    pub col: u32,
    pub row: u32,
}

impl GridCell {
    /// Client-facing pixel coordinates of the cell center (image space)
    pub fn center_px(self) -> (u32, u32) {
        let x = (self.col as f32 + 0.5) * PIXELS_PER_METER;
        let y = (self.row as f32 + 0.5) * PIXELS_PER_METER;
        (x as u32, y as u32)
    }
}

/// A checkpoint group: all cells sharing one order value
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub order: u32,
    pub goal: bool,
    pub cells: Vec<GridCell>,
}

/// An NPC spawn point from the map
#[derive(Debug, Clone, Copy)]
pub struct NpcSpawn {
    pub cell: GridCell,
    pub dir: Direction,
}

/// Start grid: the pole cells plus the race start direction
#[derive(Debug, Clone)]
pub struct Pole {
    cells: Vec<GridCell>,
    dir: Direction,
    map_height: u32,
}

/// A spawn transform in world meters
#[derive(Debug, Clone, Copy)]
pub struct Spawn {
    pub pos: Vec2,
    pub angle: f32,
}

const SLOT_SIDE: f32 = 2.0;
const SLOT_FORWARD: f32 = 3.75;

impl Pole {
    /// Grid slot for the n-th car: two lanes wide, rows extending
    /// backward from the pole tip.
    pub fn spawn_for_index(&self, index: usize) -> Spawn {
        let row = (index / 2) as f32;
        let lane = (index % 2) as f32;
        let tip = self.tip();
        let h = self.map_height as f32;

        match self.dir {
            Direction::Right => {
                let base_x = tip.col as f32 + 0.5;
                let base_y = (h - 1.0 - tip.row as f32) + 1.0;
                Spawn {
                    pos: Vec2::new(
                        base_x - SLOT_FORWARD * 0.5 - row * SLOT_FORWARD,
                        base_y - SLOT_SIDE * 0.5 - lane * SLOT_SIDE,
                    ),
                    angle: Direction::Right.angle(),
                }
            }
            Direction::Left => {
                let base_x = tip.col as f32 + 0.5;
                let base_y = (h - 1.0 - tip.row as f32) + 1.0;
                Spawn {
                    pos: Vec2::new(
                        base_x + SLOT_FORWARD * 0.5 + row * SLOT_FORWARD,
                        base_y - SLOT_SIDE * 0.5 - lane * SLOT_SIDE,
                    ),
                    angle: Direction::Left.angle(),
                }
            }
            Direction::Down => {
                let base_x = tip.col as f32;
                let base_y = (h - 1.0 - tip.row as f32) + 0.5;
                Spawn {
                    pos: Vec2::new(
                        base_x + SLOT_SIDE * 0.5 + lane * SLOT_SIDE,
                        base_y + SLOT_FORWARD * 0.5 + row * SLOT_FORWARD,
                    ),
                    angle: Direction::Down.angle(),
                }
            }
            Direction::Up => {
                let base_x = tip.col as f32 - 1.0;
                let base_y = (h - 1.0 - tip.row as f32) + 0.5;
                Spawn {
                    pos: Vec2::new(
                        base_x - SLOT_SIDE * 0.5 + lane * SLOT_SIDE,
                        base_y - SLOT_FORWARD * 0.5 - row * SLOT_FORWARD,
                    ),
                    angle: Direction::Up.angle(),
                }
            }
        }
    }

    /// The cell at the front of the grid for the start direction
    fn tip(&self) -> GridCell {
        let mut best = self.cells[0];
        for &c in &self.cells[1..] {
            let better = match self.dir {
                Direction::Right | Direction::Up => {
                    c.col > best.col || (c.col == best.col && c.row < best.row)
                }
                Direction::Left => c.col < best.col || (c.col == best.col && c.row < best.row),
                Direction::Down => c.col < best.col || (c.col == best.col && c.row > best.row),
            };
            if better {
                best = c;
            }
        }
        best
    }

    /// Bounding box in pixels plus the direction byte, for clients
    pub fn position_px(&self) -> (u32, u32, u32, u32, u8) {
        let mut min_col = self.cells[0].col;
        let mut max_col = min_col;
        let mut min_row = self.cells[0].row;
        let mut max_row = min_row;
        for c in &self.cells {
            min_col = min_col.min(c.col);
            max_col = max_col.max(c.col);
            min_row = min_row.min(c.row);
            max_row = max_row.max(c.row);
        }
        let ppm = PIXELS_PER_METER as u32;
        (
            min_col * ppm,
            min_row * ppm,
            (max_col + 1) * ppm,
            (max_row + 1) * ppm,
            self.dir.code(),
        )
    }

    pub fn dir(&self) -> Direction {
        self.dir
    }

    /// World-space centers of the pole cells
    pub fn cell_centers(&self, map_height: u32) -> Vec<Vec2> {
        self.cells
            .iter()
            .map(|c| cell_center_world(*c, map_height))
            .collect()
    }
}

/// World-space center of a grid cell
pub fn cell_center_world(cell: GridCell, map_height: u32) -> Vec2 {
    Vec2::new(
        cell.col as f32 + 0.5,
        (map_height - 1 - cell.row) as f32 + 0.5,
    )
}

/// An immutable parsed race map
#[derive(Debug, Clone)]
pub struct GameMap {
    width: u32,
    height: u32,
    cells: Vec<CellKind>,
    pub checkpoints: Vec<Checkpoint>,
    pub pole: Pole,
    pub map_id: MapId,
    pub npc_spawns: Vec<NpcSpawn>,
    pub parked_spawns: Vec<NpcSpawn>,
}

#[derive(Deserialize)]
struct RawCell {
    col: u32,
    row: u32,
}

#[derive(Deserialize)]
struct RawCheckpoint {
    order: u32,
    cells: Vec<RawCell>,
}

#[derive(Deserialize)]
struct RawSpawn {
    col: u32,
    row: u32,
    dir: String,
}

#[derive(Deserialize)]
struct RawMap {
    grid: Vec<Vec<i64>>,
    #[serde(default)]
    checkpoints_order: Vec<RawCheckpoint>,
    direccion_salida: String,
    base_map: String,
    #[serde(default)]
    npc_spawns: Vec<RawSpawn>,
    #[serde(default)]
    npc_spawns_park: Vec<RawSpawn>,
}

fn parse_exit_direction(s: &str) -> Result<Direction, MapError> {
    match s {
        "derecha" => Ok(Direction::Right),
        "izquierda" => Ok(Direction::Left),
        "arriba" => Ok(Direction::Up),
        "abajo" => Ok(Direction::Down),
        other => Err(MapError::UnknownDirection(other.to_string())),
    }
}

fn parse_spawn_direction(s: &str) -> Result<Direction, MapError> {
    match s {
        "Right" => Ok(Direction::Right),
        "Left" => Ok(Direction::Left),
        "Up" => Ok(Direction::Up),
        "Down" => Ok(Direction::Down),
        other => Err(MapError::UnknownDirection(other.to_string())),
    }
}

fn parse_map_id(s: &str) -> Result<MapId, MapError> {
    match s {
        "LibertyCity" => Ok(MapId::LibertyCity),
        "SanAndreas" => Ok(MapId::SanAndreas),
        "ViceCity" => Ok(MapId::ViceCity),
        other => Err(MapError::UnknownBaseMap(other.to_string())),
    }
}

impl GameMap {
    pub fn from_file(path: &std::path::Path) -> Result<GameMap, MapError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| MapError::Io(path.display().to_string(), e))?;
        Self::from_json(&raw)
    }

    pub fn from_json(json: &str) -> Result<GameMap, MapError> {
        let raw: RawMap = serde_json::from_str(json)?;

        let height = raw.grid.len() as u32;
        if height == 0 {
            return Err(MapError::EmptyGrid);
        }
        let width = raw.grid[0].len() as u32;
        if width == 0 {
            return Err(MapError::EmptyGrid);
        }

        let mut cells = Vec::with_capacity((width * height) as usize);
        for (row, line) in raw.grid.iter().enumerate() {
            if line.len() as u32 != width {
                return Err(MapError::RaggedGrid { row: row as u32 });
            }
            for (col, &code) in line.iter().enumerate() {
                let kind = CellKind::from_code(code).ok_or(MapError::UnknownCellCode {
                    code,
                    col: col as u32,
                    row: row as u32,
                })?;
                cells.push(kind);
            }
        }

        let map = GameMapBuilder {
            width,
            height,
            cells,
        };

        let mut checkpoints: Vec<Checkpoint> = raw
            .checkpoints_order
            .iter()
            .map(|c| Checkpoint {
                order: c.order,
                goal: false,
                cells: c
                    .cells
                    .iter()
                    .map(|rc| GridCell {
                        col: rc.col,
                        row: rc.row,
                    })
                    .collect(),
            })
            .collect();
        checkpoints.sort_by_key(|c| c.order);

        // Goal cells are an implicit final checkpoint
        let goal_cells: Vec<GridCell> = map.cells_where(CellKind::is_goal);
        if goal_cells.is_empty() {
            return Err(MapError::MissingGoal);
        }
        let max_order = checkpoints.last().map(|c| c.order).unwrap_or(0);
        checkpoints.push(Checkpoint {
            order: max_order + 1,
            goal: true,
            cells: goal_cells,
        });

        let pole_cells = map.cells_where(CellKind::is_pole);
        if pole_cells.is_empty() {
            return Err(MapError::MissingPole);
        }
        let dir = parse_exit_direction(&raw.direccion_salida)?;
        let pole = Pole {
            cells: pole_cells,
            dir,
            map_height: height,
        };

        let parse_spawns = |list: &[RawSpawn]| -> Result<Vec<NpcSpawn>, MapError> {
            list.iter()
                .map(|s| {
                    Ok(NpcSpawn {
                        cell: GridCell {
                            col: s.col,
                            row: s.row,
                        },
                        dir: parse_spawn_direction(&s.dir)?,
                    })
                })
                .collect()
        };

        Ok(GameMap {
            width,
            height,
            cells: map.cells,
            checkpoints,
            pole,
            map_id: parse_map_id(&raw.base_map)?,
            npc_spawns: parse_spawns(&raw.npc_spawns)?,
            parked_spawns: parse_spawns(&raw.npc_spawns_park)?,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn kind_at(&self, cell: GridCell) -> CellKind {
        self.cells[(cell.row * self.width + cell.col) as usize]
    }

    /// Grid cell containing a world position, if inside the map
    pub fn cell_at_world(&self, pos: Vec2) -> Option<GridCell> {
        if pos.x < 0.0 || pos.y < 0.0 {
            return None;
        }
        let col = pos.x as u32;
        let world_row = pos.y as u32;
        if col >= self.width || world_row >= self.height {
            return None;
        }
        Some(GridCell {
            col,
            row: self.height - 1 - world_row,
        })
    }

    pub fn kind_at_world(&self, pos: Vec2) -> Option<CellKind> {
        self.cell_at_world(pos).map(|c| self.kind_at(c))
    }

    /// Whether a car can occupy this world position (border included)
    pub fn is_drivable_world(&self, pos: Vec2) -> bool {
        match self.kind_at_world(pos) {
            Some(k) => k.is_drivable(),
            None => false,
        }
    }

    pub fn cell_center_world(&self, cell: GridCell) -> Vec2 {
        cell_center_world(cell, self.height)
    }

    /// All cells matching a predicate, in row-major order
    pub fn cells_matching(&self, pred: impl Fn(CellKind) -> bool) -> Vec<GridCell> {
        let mut out = Vec::new();
        for row in 0..self.height {
            for col in 0..self.width {
                let cell = GridCell { col, row };
                if pred(self.kind_at(cell)) {
                    out.push(cell);
                }
            }
        }
        out
    }

    /// Highest checkpoint order (the goal's order)
    pub fn max_checkpoint_order(&self) -> u32 {
        self.checkpoints.last().map(|c| c.order).unwrap_or(0)
    }

    pub fn checkpoint_with_order(&self, order: u32) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.order == order)
    }
}

/// Grid access before the full map is assembled
struct GameMapBuilder {
    width: u32,
    height: u32,
    cells: Vec<CellKind>,
}

impl GameMapBuilder {
    fn cells_where(&self, pred: impl Fn(CellKind) -> bool) -> Vec<GridCell> {
        let mut out = Vec::new();
        for row in 0..self.height {
            for col in 0..self.width {
                if pred(self.cells[(row * self.width + col) as usize]) {
                    out.push(GridCell { col, row });
                }
            }
        }
        out
    }
}

/// Map loading / validation errors
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("Failed to read map file {0}: {1}")]
    Io(String, #[source] std::io::Error),

    #[error("Invalid map JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Map grid is empty")]
    EmptyGrid,

    #[error("Map grid row {row} has a different width")]
    RaggedGrid { row: u32 },

    #[error("Unknown cell code {code} at ({col}, {row})")]
    UnknownCellCode { code: i64, col: u32, row: u32 },

    #[error("Unknown direction: {0}")]
    UnknownDirection(String),

    #[error("Unknown base map: {0}")]
    UnknownBaseMap(String),

    #[error("Map has no goal cells")]
    MissingGoal,

    #[error("Map has no pole cells")]
    MissingPole,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    // 6x6 track: border walls, pole on the left, goal on the right,
    // one explicit checkpoint in the middle.
    pub(crate) fn small_map_json() -> String
    {
        serde_json::json!({
            "grid": [
                [0, 0, 0, 0, 0, 0],
                [0, 2, 1, 1, 3, 0],
                [0, 2, 1, 1, 3, 0],
                [0, 1, 1, 5, 1, 0],
                [0, 1, 1, 1, 1, 0],
                [0, 0, 0, 0, 0, 0],
            ],
            "checkpoints_order": [
                { "order": 1, "cells": [ { "col": 3, "row": 1 }, { "col": 3, "row": 2 } ] }
            ],
            "direccion_salida": "derecha",
            "base_map": "LibertyCity",
            "npc_spawns": [ { "col": 2, "row": 4, "dir": "Right" } ],
            "npc_spawns_park": []
        })
        .to_string()
    }

    #[test]
    fn parses_grid_and_dimensions() {
        let map = GameMap::from_json(&small_map_json()).unwrap();
        assert_eq!(map.width(), 6);
        assert_eq!(map.height(), 6);
        assert_eq!(map.kind_at(GridCell { col: 0, row: 0 }), CellKind::Wall);
        assert_eq!(map.kind_at(GridCell { col: 1, row: 1 }), CellKind::Pole);
        assert_eq!(map.kind_at(GridCell { col: 3, row: 3 }), CellKind::Slow);
    }

    #[test]
    fn goal_cells_become_final_checkpoint() {
        let map = GameMap::from_json(&small_map_json()).unwrap();
        assert_eq!(map.checkpoints.len(), 2);
        let goal = map.checkpoints.last().unwrap();
        assert_eq!(goal.order, 2);
        assert!(goal.goal);
        assert_eq!(goal.cells.len(), 2);
        assert_eq!(map.max_checkpoint_order(), 2);
    }

    #[test]
    fn world_mapping_inverts_rows() {
        let map = GameMap::from_json(&small_map_json()).unwrap();
        // Row 1 in the matrix is near the top, so high world Y.
        let pos = map.cell_center_world(GridCell { col: 1, row: 1 });
        assert_eq!(pos.x, 1.5);
        assert_eq!(pos.y, 4.5);
        assert_eq!(map.cell_at_world(pos), Some(GridCell { col: 1, row: 1 }));
        assert!(!map.is_drivable_world(Vec2::new(0.5, 0.5)));
        assert!(map.is_drivable_world(Vec2::new(2.5, 2.5)));
        assert!(!map.is_drivable_world(Vec2::new(-1.0, 2.5)));
    }

    #[test]
    fn pole_tip_and_slots_face_right() {
        let map = GameMap::from_json(&small_map_json()).unwrap();
        // Pole cells at (1,1) and (1,2); going right the tip is max col,
        // min row, so (1,1).
        let s0 = map.pole.spawn_for_index(0);
        assert_eq!(s0.angle, 0.0);
        // base_x = 1.5, base_y = (6-1-1) + 1 = 5.0
        assert!((s0.pos.x - (1.5 - 1.875)).abs() < 1e-5);
        assert!((s0.pos.y - 4.0).abs() < 1e-5);
        let s1 = map.pole.spawn_for_index(1);
        assert!((s1.pos.y - 2.0).abs() < 1e-5);
        let s2 = map.pole.spawn_for_index(2);
        assert!((s2.pos.x - (1.5 - 1.875 - 3.75)).abs() < 1e-5);
    }

    #[test]
    fn pole_bbox_in_pixels() {
        let map = GameMap::from_json(&small_map_json()).unwrap();
        let (x0, y0, x1, y1, dir) = map.pole.position_px();
        assert_eq!((x0, y0), (16, 16));
        assert_eq!((x1, y1), (32, 48));
        assert_eq!(dir, 0x01);
    }

    #[test]
    fn rejects_bad_maps() {
        assert!(matches!(
            GameMap::from_json("{\"grid\": []}"),
            Err(MapError::Json(_)) | Err(MapError::EmptyGrid)
        ));
        let no_goal = serde_json::json!({
            "grid": [[0, 0], [0, 2]],
            "direccion_salida": "derecha",
            "base_map": "LibertyCity"
        })
        .to_string();
        assert!(matches!(
            GameMap::from_json(&no_goal),
            Err(MapError::MissingGoal)
        ));
        let bad_cell = serde_json::json!({
            "grid": [[0, 42], [2, 3]],
            "direccion_salida": "derecha",
            "base_map": "LibertyCity"
        })
        .to_string();
        assert!(matches!(
            GameMap::from_json(&bad_cell),
            Err(MapError::UnknownCellCode { code: 42, .. })
        ));
    }

    #[test]
    fn cell_px_centers() {
        let cell = GridCell { col: 3, row: 1 };
        assert_eq!(cell.center_px(), (56, 24));
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::num::ParseIntError;
use thiserror::Error;

pub mod airplane;

pub const GRID_SIZE: usize = 10;
pub const PLANES_PER_PLAYER: usize = 3;
pub const HEADS_TO_WIN: u8 = 3;

/// A cell on the 10x10 board. Always in range once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "(u8, u8)", into = "(u8, u8)")]
pub struct Position {
    row: u8,
    col: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("position ({row}, {col}) is outside the 10x10 grid")]
pub struct PositionOutOfRange {
    pub row: i64,
    pub col: i64,
}

impl Position {
    pub fn new(row: usize, col: usize) -> Option<Self> {
        (row < GRID_SIZE && col < GRID_SIZE).then(|| Self {
            row: row as u8,
            col: col as u8,
        })
    }

    pub fn try_new(row: i64, col: i64) -> Result<Self, PositionOutOfRange> {
        match (usize::try_from(row), usize::try_from(col)) {
            (Ok(r), Ok(c)) => Self::new(r, c).ok_or(PositionOutOfRange { row, col }),
            _ => Err(PositionOutOfRange { row, col }),
        }
    }

    pub fn row(&self) -> usize {
        self.row as usize
    }

    pub fn col(&self) -> usize {
        self.col as usize
    }

    /// The `"row,col"` key used in `shotResults`.
    pub fn key(&self) -> String {
        format!("{},{}", self.row, self.col)
    }

    /// Every cell in row-major order.
    pub fn all() -> impl Iterator<Item = Position> {
        (0..GRID_SIZE).flat_map(|row| (0..GRID_SIZE).map(move |col| Position::from_index(row, col)))
    }

    fn from_index(row: usize, col: usize) -> Self {
        Self {
            row: row as u8,
            col: col as u8,
        }
    }
}

impl TryFrom<(u8, u8)> for Position {
    type Error = PositionOutOfRange;

    fn try_from((row, col): (u8, u8)) -> Result<Self, Self::Error> {
        Self::try_new(row as i64, col as i64)
    }
}

impl From<Position> for (u8, u8) {
    fn from(pos: Position) -> Self {
        (pos.row, pos.col)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// One of the two seats in a session, assigned first-come-first-served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Slot {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::One, Slot::Two];

    pub fn opponent(self) -> Self {
        match self {
            Slot::One => Slot::Two,
            Slot::Two => Slot::One,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::One => f.write_str("1"),
            Slot::Two => f.write_str("2"),
        }
    }
}

/// Ascending per-process session identifier, carried as a string on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SessionId(pub u64);

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0.to_string()
    }
}

impl TryFrom<String> for SessionId {
    type Error = ParseIntError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse().map(SessionId)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShotOutcome {
    Miss,
    Hit,
    Head,
}

/// Decides what a shot at `target` struck. A head cell wins over body
/// occupancy of the same cell.
pub fn classify<F>(target: Position, opponent_heads: &[Position], occupied: F) -> ShotOutcome
where
    F: Fn(Position) -> bool,
{
    if opponent_heads.contains(&target) {
        ShotOutcome::Head
    } else if occupied(target) {
        ShotOutcome::Hit
    } else {
        ShotOutcome::Miss
    }
}

/// A 10x10 boolean board. Used as an occupancy grid during placement and as
/// the set of attempted cells when shooting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Grid {
    cells: [[bool; GRID_SIZE]; GRID_SIZE],
}

impl Grid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self, pos: Position) -> bool {
        self.cells[pos.row()][pos.col()]
    }

    pub fn set(&mut self, pos: Position) {
        self.cells[pos.row()][pos.col()] = true;
    }

    /// Set cells in row-major order.
    pub fn marked(&self) -> impl Iterator<Item = Position> + '_ {
        Position::all().filter(move |pos| self.is_set(*pos))
    }

    pub fn count(&self) -> usize {
        self.marked().count()
    }

    /// Lenient decode of a client board. Returns `None` unless the value is a
    /// 10x10 array of recognisable cell markers.
    pub fn from_json(value: &Value) -> Option<Self> {
        let rows = value.as_array()?;
        if rows.len() != GRID_SIZE {
            return None;
        }

        let mut grid = Grid::new();
        for (row, cells) in rows.iter().enumerate() {
            let cells = cells.as_array()?;
            if cells.len() != GRID_SIZE {
                return None;
            }
            for (col, cell) in cells.iter().enumerate() {
                grid.cells[row][col] = cell_is_set(cell)?;
            }
        }
        Some(grid)
    }
}

const EMPTY_COLOR: [u64; 3] = [255, 255, 255];

// Accepts booleans, numeric markers and RGB triples where white is empty.
fn cell_is_set(cell: &Value) -> Option<bool> {
    match cell {
        Value::Null => Some(false),
        Value::Bool(set) => Some(*set),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::Array(rgb) if rgb.len() == 3 => {
            let channels: Option<Vec<u64>> = rgb.iter().map(Value::as_u64).collect();
            channels.map(|c| c != EMPTY_COLOR)
        }
        _ => None,
    }
}

fn decode_positions(value: &Value) -> Option<Vec<Position>> {
    let entries = value.as_array()?;
    let positions = entries
        .iter()
        .filter_map(|entry| {
            let pair = entry.as_array()?;
            match pair.as_slice() {
                [row, col] => Position::try_new(row.as_i64()?, col.as_i64()?).ok(),
                _ => None,
            }
        })
        .collect();
    Some(positions)
}

/// Inbound client message. Every aspect is optional; a missing or malformed
/// field means "no update for that aspect".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid: Option<Grid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_positions: Option<Vec<Position>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shots: Option<Grid>,
}

impl ClientUpdate {
    /// Decodes a text frame. Anything that is not a JSON object is an empty
    /// update, which the session treats as a poll.
    pub fn decode(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::from_value(&value),
            Err(_) => Self::default(),
        }
    }

    pub fn from_value(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::default();
        };

        Self {
            grid: object.get("grid").and_then(Grid::from_json),
            head_positions: object
                .get("headPositions")
                .or_else(|| object.get("head_positions"))
                .and_then(decode_positions),
            shots: object.get("shots").and_then(Grid::from_json),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.grid.is_none() && self.head_positions.is_none() && self.shots.is_none()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Phase as shown to clients. Waiting for an opponent reads as placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseView {
    Placement,
    Playing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementStatus {
    pub your_planes: usize,
    pub opponent_planes: usize,
}

/// One participant's view of its session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameUpdate {
    pub opponent_ready: bool,
    pub your_turn: bool,
    pub phase: PhaseView,
    pub opponent_shots: Vec<Position>,
    pub heads_hit: u8,
    pub opponent_heads_hit: u8,
    pub shot_results: BTreeMap<String, ShotOutcome>,
    pub placement_status: PlacementStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Init {
        slot: Slot,
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    Update(GameUpdate),
    GameOver {
        #[serde(rename = "gameOver")]
        game_over: bool,
        winner: Slot,
    },
    OpponentDisconnected {
        #[serde(rename = "opponentDisconnected")]
        opponent_disconnected: bool,
    },
}

impl ServerMessage {
    pub fn game_over(winner: Slot) -> Self {
        ServerMessage::GameOver {
            game_over: true,
            winner,
        }
    }

    pub fn opponent_disconnected() -> Self {
        ServerMessage::OpponentDisconnected {
            opponent_disconnected: true,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

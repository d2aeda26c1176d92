//! Airplane geometry and the placement-legality predicate.
//!
//! The server never calls into this module: it trusts the grids clients send.
//! Clients use it to build self-consistent grids before submitting them.

use crate::{Grid, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Up,
    Down,
    Left,
    Right,
}

impl Orientation {
    pub const ALL: [Orientation; 4] = [
        Orientation::Up,
        Orientation::Down,
        Orientation::Left,
        Orientation::Right,
    ];
}

// (dcol, drow) of each cell for a plane pointing up, head first.
const UP_BODY: [(i64, i64); 10] = [
    (0, 0),
    (0, 1),
    (-2, 1),
    (-1, 1),
    (1, 1),
    (2, 1),
    (0, 2),
    (0, 3),
    (-1, 3),
    (1, 3),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Airplane {
    pub head: Position,
    pub orientation: Orientation,
}

impl Airplane {
    pub fn new(head: Position, orientation: Orientation) -> Self {
        Self { head, orientation }
    }

    /// All ten cells, head first. `None` if any cell falls off the grid.
    pub fn cells(&self) -> Option<Vec<Position>> {
        let head_row = self.head.row() as i64;
        let head_col = self.head.col() as i64;

        UP_BODY
            .iter()
            .map(|&(dx, dy)| {
                let (dx, dy) = match self.orientation {
                    Orientation::Up => (dx, dy),
                    Orientation::Down => (dx, -dy),
                    Orientation::Left => (-dy, dx),
                    Orientation::Right => (dy, dx),
                };
                Position::try_new(head_row + dy, head_col + dx).ok()
            })
            .collect()
    }
}

/// True when every cell of `airplane` is on the grid and unoccupied.
pub fn can_place(grid: &Grid, airplane: &Airplane) -> bool {
    airplane
        .cells()
        .is_some_and(|cells| cells.iter().all(|cell| !grid.is_set(*cell)))
}

/// Marks the airplane's cells on `grid`. Returns false and leaves the grid
/// untouched when the placement is illegal.
pub fn place(grid: &mut Grid, airplane: &Airplane) -> bool {
    if !can_place(grid, airplane) {
        return false;
    }
    if let Some(cells) = airplane.cells() {
        for cell in cells {
            grid.set(cell);
        }
    }
    true
}

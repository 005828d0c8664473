use game2048_host_runtime::controller::{GameEngine, MoveOutcome};
use game2048_host_runtime::protocol::BOARD_SIZE;
use game2048_host_runtime::{Board, Direction, EngineError};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;

const STARTING_TILES: usize = 2;

/// Classic slide-and-merge rules: tiles slide toward the move direction,
/// equal neighbors merge once per move, and a 2 (or 4, one time in ten)
/// spawns after every effective move.
pub struct SlideEngine {
    rng: RefCell<StdRng>,
}

impl SlideEngine {
    pub fn new() -> Self {
        Self {
            rng: RefCell::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn spawn_tile(&self, board: &mut Board) -> Result<(), EngineError> {
        let mut rng = self.rng.borrow_mut();
        let &(row, col) = board
            .empty_cells()
            .choose(&mut *rng)
            .ok_or_else(|| EngineError("no empty cell to spawn into".into()))?;
        let value = if rng.gen_bool(0.1) { 4 } else { 2 };
        board.set(row, col, value);
        Ok(())
    }
}

impl Default for SlideEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl GameEngine for SlideEngine {
    fn new_board(&self) -> Result<Board, EngineError> {
        let mut board = Board::empty();
        for _ in 0..STARTING_TILES {
            self.spawn_tile(&mut board)?;
        }
        Ok(board)
    }

    fn apply_move(&self, board: &Board, direction: Direction) -> Result<MoveOutcome, EngineError> {
        let (mut next, score_delta) = slide(board, direction);
        let moved = next != *board;
        if moved {
            self.spawn_tile(&mut next)?;
        }

        Ok(MoveOutcome {
            board: next,
            score_delta,
            moved,
            terminal: !has_moves(&next),
        })
    }
}

/// Slides every line of `board` toward `direction`. Pure; no tile spawns.
pub fn slide(board: &Board, direction: Direction) -> (Board, u64) {
    let mut next = Board::empty();
    let mut score = 0;

    for line in 0..BOARD_SIZE {
        let cells: Vec<(usize, usize)> = (0..BOARD_SIZE)
            .map(|step| cell_at(direction, line, step))
            .collect();
        let values: Vec<u32> = cells.iter().map(|&(row, col)| board.get(row, col)).collect();
        let (merged, gained) = merge_line(&values);
        score += gained;
        for (&(row, col), value) in cells.iter().zip(merged) {
            next.set(row, col, value);
        }
    }

    (next, score)
}

/// Coordinates of the `step`-th cell of `line`, counted from the edge the
/// tiles slide toward.
fn cell_at(direction: Direction, line: usize, step: usize) -> (usize, usize) {
    let last = BOARD_SIZE - 1;
    match direction {
        Direction::Left => (line, step),
        Direction::Right => (line, last - step),
        Direction::Up => (step, line),
        Direction::Down => (last - step, line),
    }
}

fn merge_line(values: &[u32]) -> (Vec<u32>, u64) {
    let mut tiles = values.iter().copied().filter(|value| *value != 0).peekable();
    let mut merged = Vec::with_capacity(values.len());
    let mut score = 0_u64;

    while let Some(tile) = tiles.next() {
        if tiles.peek() == Some(&tile) {
            tiles.next();
            merged.push(tile * 2);
            score += u64::from(tile * 2);
        } else {
            merged.push(tile);
        }
    }

    merged.resize(values.len(), 0);
    (merged, score)
}

fn has_moves(board: &Board) -> bool {
    if !board.empty_cells().is_empty() {
        return true;
    }
    (0..BOARD_SIZE).any(|row| {
        (0..BOARD_SIZE).any(|col| {
            let value = board.get(row, col);
            (col + 1 < BOARD_SIZE && board.get(row, col + 1) == value)
                || (row + 1 < BOARD_SIZE && board.get(row + 1, col) == value)
        })
    })
}

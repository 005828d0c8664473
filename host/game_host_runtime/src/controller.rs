//! Authoritative game state. The controller is the only writer; the view
//! only ever sees snapshots of it.

use serde_json::{Value, json};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::bridge::ViewBridge;
use crate::error::{ControllerError, EngineError};
use crate::host::{HostServices, KeyValueStore, Notifier};
use crate::protocol::{Board, ControllerMessage, Direction, GameSnapshot, GameStatus};
use crate::resilience::{ResilienceEngine, context};

pub const STORAGE_NAMESPACE: &str = "game2048.";
pub const GAME_STATE_KEY: &str = "game2048.gameState";
pub const BEST_SCORE_KEY: &str = "game2048.bestScore";

pub const WINNING_TILE: u32 = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    pub board: Board,
    pub score_delta: u64,
    pub moved: bool,
    /// No further move can change the board.
    pub terminal: bool,
}

/// Board rules. Implementations must be pure with respect to the board they
/// are given.
pub trait GameEngine {
    fn new_board(&self) -> Result<Board, EngineError>;

    fn apply_move(&self, board: &Board, direction: Direction) -> Result<MoveOutcome, EngineError>;
}

pub struct GameController {
    state: RefCell<GameSnapshot>,
    engine: Box<dyn GameEngine>,
    store: Rc<dyn KeyValueStore>,
    notifier: Rc<dyn Notifier>,
    bridge: RefCell<Weak<ViewBridge>>,
    resilience: Rc<ResilienceEngine>,
}

impl GameController {
    pub fn create(
        engine: Box<dyn GameEngine>,
        host: &HostServices,
        resilience: Rc<ResilienceEngine>,
    ) -> Result<Rc<Self>, ControllerError> {
        let board = engine.new_board()?;

        Ok(Rc::new(Self {
            state: RefCell::new(GameSnapshot::fresh(board, 0, 0)),
            engine,
            store: Rc::clone(&host.store),
            notifier: Rc::clone(&host.notifier),
            bridge: RefCell::new(Weak::new()),
            resilience,
        }))
    }

    pub fn attach_bridge(&self, bridge: &Rc<ViewBridge>) {
        *self.bridge.borrow_mut() = Rc::downgrade(bridge);
    }

    pub fn snapshot(&self) -> GameSnapshot {
        self.state.borrow().clone()
    }

    /// Restores persisted state (or starts fresh) and pushes it to the view.
    pub fn initialize(&self) -> Option<GameSnapshot> {
        let result = self.try_initialize();
        self.guard("initialize", result)
    }

    pub fn new_game(&self) -> Option<GameSnapshot> {
        let result = self.try_new_game();
        self.guard("newGame", result)
    }

    pub fn apply_move(&self, direction: Direction) -> Option<GameSnapshot> {
        let result = self.try_apply_move(direction);
        self.guard("move", result)
    }

    /// Reconciles a view-reported snapshot. The controller's own state always
    /// wins: a diverging report only triggers a re-push.
    pub fn receive_view_report(&self, report: &GameSnapshot) {
        let current = self.snapshot();
        if *report == current {
            tracing::trace!(revision = current.revision, "view report matches");
            return;
        }

        tracing::debug!(
            view_revision = report.revision,
            revision = current.revision,
            "view reported diverging state; re-sending authoritative snapshot"
        );
        self.push(ControllerMessage::game_state_update(current));
    }

    pub fn push_current_state(&self) {
        self.push(ControllerMessage::game_state_update(self.snapshot()));
    }

    pub fn share_score(&self) {
        let snapshot = self.snapshot();
        self.notifier.show_information(&format!(
            "I scored {} points in 2048! (best: {})",
            snapshot.score, snapshot.best_score
        ));
    }

    pub(crate) fn try_initialize(&self) -> Result<GameSnapshot, ControllerError> {
        let restored = match self.load_persisted() {
            Ok(restored) => restored,
            Err(err) => {
                self.resilience.handle_error(
                    err.kind(),
                    format!("failed to restore saved game: {err}"),
                    context([("key", Value::from(GAME_STATE_KEY))]),
                );
                None
            }
        };

        let revision = self.state.borrow().revision + 1;
        let next = match restored {
            Some(saved) => GameSnapshot { revision, ..saved },
            None => {
                let best_score = self.state.borrow().best_score;
                let fresh = GameSnapshot::fresh(self.engine.new_board()?, best_score, revision);
                self.persist(&fresh)?;
                fresh
            }
        };

        *self.state.borrow_mut() = next.clone();
        tracing::info!(revision, score = next.score, "game state initialized");
        self.push(ControllerMessage::game_state_update(next.clone()));

        Ok(next)
    }

    fn try_new_game(&self) -> Result<GameSnapshot, ControllerError> {
        let board = self.engine.new_board()?;
        let next = {
            let current = self.state.borrow();
            GameSnapshot::fresh(board, current.best_score, current.revision + 1)
        };

        self.persist(&next)?;
        *self.state.borrow_mut() = next.clone();
        tracing::info!(revision = next.revision, "new game started");
        self.push(ControllerMessage::new_game(next.clone()));

        Ok(next)
    }

    fn try_apply_move(&self, direction: Direction) -> Result<GameSnapshot, ControllerError> {
        let current = self.snapshot();
        if current.status == GameStatus::Over {
            tracing::debug!(?direction, "game is over; ignoring move");
            self.push(ControllerMessage::game_state_update(current.clone()));
            return Ok(current);
        }

        let outcome = self.engine.apply_move(&current.board, direction)?;
        let next = if outcome.moved {
            let score = current.score + outcome.score_delta;
            GameSnapshot {
                board: outcome.board,
                score,
                best_score: current.best_score.max(score),
                status: status_after(&outcome, current.status),
                revision: current.revision + 1,
            }
        } else {
            current
        };

        if outcome.moved {
            self.persist(&next)?;
            *self.state.borrow_mut() = next.clone();
            tracing::debug!(?direction, revision = next.revision, score = next.score, "move applied");
        }

        self.push(ControllerMessage::game_state_update(next.clone()));
        Ok(next)
    }

    fn load_persisted(&self) -> Result<Option<GameSnapshot>, ControllerError> {
        let best_score = self
            .store
            .get(BEST_SCORE_KEY)?
            .and_then(|value| value.as_u64())
            .unwrap_or(0);

        let Some(saved) = self.store.get(GAME_STATE_KEY)? else {
            self.state.borrow_mut().best_score = best_score;
            return Ok(None);
        };

        let mut snapshot: GameSnapshot = serde_json::from_value(saved)?;
        snapshot.best_score = snapshot.best_score.max(best_score);
        Ok(Some(snapshot))
    }

    fn persist(&self, snapshot: &GameSnapshot) -> Result<(), ControllerError> {
        self.store.set(GAME_STATE_KEY, serde_json::to_value(snapshot)?)?;
        self.store.set(BEST_SCORE_KEY, json!(snapshot.best_score))?;
        Ok(())
    }

    fn push(&self, message: ControllerMessage) {
        let bridge = self.bridge.borrow().upgrade();
        match bridge {
            Some(bridge) => {
                bridge.post_message(&message);
            }
            None => tracing::trace!(tag = %message.tag(), "no view bridge attached"),
        }
    }

    fn guard(
        &self,
        operation: &str,
        result: Result<GameSnapshot, ControllerError>,
    ) -> Option<GameSnapshot> {
        match result {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                self.resilience.handle_error(
                    err.kind(),
                    format!("{operation} failed: {err}"),
                    context([("operation", Value::from(operation))]),
                );
                self.push(ControllerMessage::error(
                    format!("Could not complete {operation}; the game was left unchanged."),
                    true,
                ));
                None
            }
        }
    }
}

fn status_after(outcome: &MoveOutcome, previous: GameStatus) -> GameStatus {
    if outcome.terminal {
        GameStatus::Over
    } else if outcome.board.max_tile() >= WINNING_TILE {
        GameStatus::Won
    } else {
        previous
    }
}

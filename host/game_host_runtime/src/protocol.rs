use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::ProtocolError;
use crate::theme::ThemeProfile;

pub const VIEW_TO_HOST_CAP: usize = 65_536;
pub const HOST_TO_VIEW_CAP: usize = 1_048_576;

pub const BOARD_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// Row-major tile grid; `0` marks an empty cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Board(pub [[u32; BOARD_SIZE]; BOARD_SIZE]);

impl Board {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, row: usize, col: usize) -> u32 {
        self.0[row][col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: u32) {
        self.0[row][col] = value;
    }

    pub fn cells(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().flat_map(|row| row.iter().copied())
    }

    pub fn max_tile(&self) -> u32 {
        self.cells().max().unwrap_or(0)
    }

    pub fn empty_cells(&self) -> Vec<(usize, usize)> {
        let mut cells = Vec::new();
        for (row, values) in self.0.iter().enumerate() {
            for (col, value) in values.iter().enumerate() {
                if *value == 0 {
                    cells.push((row, col));
                }
            }
        }
        cells
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    #[default]
    Playing,
    Won,
    Over,
}

/// Full, self-contained copy of the game. Snapshots sharing a revision are
/// identical, so the view may drop anything older than what it rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub board: Board,
    pub score: u64,
    pub best_score: u64,
    pub status: GameStatus,
    pub revision: u64,
}

impl GameSnapshot {
    pub fn fresh(board: Board, best_score: u64, revision: u64) -> Self {
        Self {
            board,
            score: 0,
            best_score,
            status: GameStatus::Playing,
            revision,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "camelCase")]
pub enum ControllerTag {
    NewGame,
    GameStateUpdate,
    ThemeChanged,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "camelCase")]
pub enum ViewTag {
    RequestNewGame,
    GameStateUpdate,
    RequestTheme,
    Move,
}

/// Messages pushed from the host to the view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControllerMessage {
    #[serde(rename = "newGame")]
    NewGame {
        #[serde(rename = "gameState")]
        game_state: GameSnapshot,
    },

    #[serde(rename = "gameStateUpdate")]
    GameStateUpdate {
        #[serde(rename = "gameState")]
        game_state: GameSnapshot,
    },

    #[serde(rename = "themeChanged")]
    ThemeChanged { theme: ThemeProfile },

    #[serde(rename = "error")]
    Error { message: String, recoverable: bool },
}

/// Messages sent by the view to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ViewMessage {
    #[serde(rename = "requestNewGame")]
    RequestNewGame,

    #[serde(rename = "gameStateUpdate")]
    GameStateUpdate {
        #[serde(rename = "gameState")]
        game_state: GameSnapshot,
    },

    #[serde(rename = "requestTheme")]
    RequestTheme,

    #[serde(rename = "move")]
    Move { direction: Direction },
}

impl ControllerMessage {
    /// Builds a message from an untyped payload, rejecting unknown tags and
    /// payloads that miss or mistype a required field.
    pub fn create(tag: &str, payload: Value) -> Result<Self, ProtocolError> {
        tag.parse::<ControllerTag>().map_err(|_| {
            ProtocolError::malformed(tag, "tag is not part of the controller vocabulary")
        })?;
        decode_tagged(tag, payload)
    }

    pub fn new_game(game_state: GameSnapshot) -> Self {
        Self::NewGame { game_state }
    }

    pub fn game_state_update(game_state: GameSnapshot) -> Self {
        Self::GameStateUpdate { game_state }
    }

    pub fn theme_changed(theme: ThemeProfile) -> Self {
        Self::ThemeChanged { theme }
    }

    pub fn error(message: impl Into<String>, recoverable: bool) -> Self {
        Self::Error {
            message: message.into(),
            recoverable,
        }
    }

    pub fn tag(&self) -> ControllerTag {
        match self {
            Self::NewGame { .. } => ControllerTag::NewGame,
            Self::GameStateUpdate { .. } => ControllerTag::GameStateUpdate,
            Self::ThemeChanged { .. } => ControllerTag::ThemeChanged,
            Self::Error { .. } => ControllerTag::Error,
        }
    }
}

impl ViewMessage {
    pub fn create(tag: &str, payload: Value) -> Result<Self, ProtocolError> {
        tag.parse::<ViewTag>().map_err(|_| {
            ProtocolError::malformed(tag, "tag is not part of the view vocabulary")
        })?;
        decode_tagged(tag, payload)
    }

    /// Interprets an inbound body. Never panics: a missing or foreign `type`
    /// is `UnknownMessageType`, a known tag with a bad payload is
    /// `MalformedPayload`.
    pub fn decode(body: &Value) -> Result<Self, ProtocolError> {
        let tag = message_tag(body).ok_or_else(|| ProtocolError::unknown("<missing>"))?;
        tag.parse::<ViewTag>()
            .map_err(|_| ProtocolError::unknown(tag))?;

        serde_json::from_value(body.clone())
            .map_err(|err| ProtocolError::malformed(tag, err.to_string()))
    }

    pub fn tag(&self) -> ViewTag {
        match self {
            Self::RequestNewGame => ViewTag::RequestNewGame,
            Self::GameStateUpdate { .. } => ViewTag::GameStateUpdate,
            Self::RequestTheme => ViewTag::RequestTheme,
            Self::Move { .. } => ViewTag::Move,
        }
    }
}

/// Returns the `type` field of a message body, if it is a string.
pub fn message_tag(body: &Value) -> Option<&str> {
    body.get("type").and_then(Value::as_str)
}

pub fn is_view_message(body: &Value, tag: ViewTag) -> bool {
    let expected: &'static str = tag.into();
    message_tag(body) == Some(expected) && ViewMessage::decode(body).is_ok()
}

pub fn is_controller_message(body: &Value, tag: ControllerTag) -> bool {
    let expected: &'static str = tag.into();
    message_tag(body) == Some(expected)
        && serde_json::from_value::<ControllerMessage>(body.clone()).is_ok()
}

fn decode_tagged<T: serde::de::DeserializeOwned>(
    tag: &str,
    payload: Value,
) -> Result<T, ProtocolError> {
    let mut body = match payload {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(ProtocolError::malformed(
                tag,
                format!("payload must be an object, got {other}"),
            ));
        }
    };

    body.insert("type".to_string(), Value::String(tag.to_string()));
    serde_json::from_value(Value::Object(body))
        .map_err(|err| ProtocolError::malformed(tag, err.to_string()))
}

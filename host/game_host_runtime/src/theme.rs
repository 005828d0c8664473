use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw theme information as reported by the host. `kind` follows the host's
/// numeric theme classification and may carry values this crate does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeDescriptor {
    pub kind: i64,
}

impl ThemeDescriptor {
    pub fn new(kind: i64) -> Self {
        Self { kind }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThemeKind {
    Light,
    Dark,
    HighContrast,
    HighContrastLight,
}

impl ThemeKind {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Light),
            2 => Some(Self::Dark),
            3 => Some(Self::HighContrast),
            4 => Some(Self::HighContrastLight),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Light => 1,
            Self::Dark => 2,
            Self::HighContrast => 3,
            Self::HighContrastLight => 4,
        }
    }

    pub fn is_dark(self) -> bool {
        matches!(self, Self::Dark | Self::HighContrast)
    }

    pub fn is_high_contrast(self) -> bool {
        matches!(self, Self::HighContrast | Self::HighContrastLight)
    }
}

/// Color roles the view needs to render the board. Replaced wholesale on
/// every theme change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeProfile {
    pub is_dark: bool,
    pub is_high_contrast: bool,
    pub background: String,
    pub foreground: String,
    pub accent: String,
    pub board_background: String,
    pub empty_cell: String,
    pub tile_colors: BTreeMap<u32, String>,
    pub text_on_light: String,
    pub text_on_dark: String,
    pub text_shadow: String,
}

impl ThemeProfile {
    pub fn tile_color(&self, value: u32) -> Option<&str> {
        self.tile_colors.get(&value).map(String::as_str)
    }
}

pub trait ThemeAdapter {
    /// Absent or unrecognized descriptors must yield the dark profile.
    fn profile_for(&self, descriptor: Option<&ThemeDescriptor>) -> ThemeProfile;
}

/// Built-in palette table keyed by [`ThemeKind`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultThemeAdapter;

impl ThemeAdapter for DefaultThemeAdapter {
    fn profile_for(&self, descriptor: Option<&ThemeDescriptor>) -> ThemeProfile {
        let kind = match descriptor.map(|d| ThemeKind::from_code(d.kind)) {
            Some(Some(kind)) => kind,
            Some(None) => {
                tracing::debug!(
                    kind = descriptor.map(|d| d.kind),
                    "unrecognized theme kind; using dark profile"
                );
                ThemeKind::Dark
            }
            None => ThemeKind::Dark,
        };

        palette(kind)
    }
}

const NO_SHADOW: &str = "none";

fn palette(kind: ThemeKind) -> ThemeProfile {
    let (background, foreground, accent, board, empty, on_light, on_dark, shadow, tiles) =
        match kind {
            ThemeKind::Light => (
                "#faf8ef",
                "#776e65",
                "#8f7a66",
                "#bbada0",
                "#cdc1b4",
                "#776e65",
                "#f9f6f2",
                "0 1px 1px rgba(0, 0, 0, 0.15)",
                LIGHT_TILES,
            ),
            ThemeKind::Dark => (
                "#1e1e1e",
                "#cccccc",
                "#ff9500",
                "#2d2d30",
                "#3c3c3c",
                "#1e1e1e",
                "#f2f2f2",
                "0 1px 2px rgba(0, 0, 0, 0.45)",
                DARK_TILES,
            ),
            ThemeKind::HighContrast => (
                "#000000",
                "#ffffff",
                "#f38518",
                "#000000",
                "#1a1a1a",
                "#000000",
                "#ffffff",
                NO_SHADOW,
                HIGH_CONTRAST_TILES,
            ),
            ThemeKind::HighContrastLight => (
                "#ffffff",
                "#000000",
                "#0f4a85",
                "#ffffff",
                "#e6e6e6",
                "#000000",
                "#ffffff",
                NO_SHADOW,
                HIGH_CONTRAST_LIGHT_TILES,
            ),
        };

    ThemeProfile {
        is_dark: kind.is_dark(),
        is_high_contrast: kind.is_high_contrast(),
        background: background.to_string(),
        foreground: foreground.to_string(),
        accent: accent.to_string(),
        board_background: board.to_string(),
        empty_cell: empty.to_string(),
        tile_colors: tiles
            .iter()
            .map(|(value, color)| (*value, color.to_string()))
            .collect(),
        text_on_light: on_light.to_string(),
        text_on_dark: on_dark.to_string(),
        text_shadow: shadow.to_string(),
    }
}

type TileTable = &'static [(u32, &'static str)];

const LIGHT_TILES: TileTable = &[
    (2, "#eee4da"),
    (4, "#ede0c8"),
    (8, "#f2b179"),
    (16, "#f59563"),
    (32, "#f67c5f"),
    (64, "#f65e3b"),
    (128, "#edcf72"),
    (256, "#edcc61"),
    (512, "#edc850"),
    (1024, "#edc53f"),
    (2048, "#edc22e"),
];

const DARK_TILES: TileTable = &[
    (2, "#3a3a3c"),
    (4, "#48484a"),
    (8, "#ff9500"),
    (16, "#ff7a00"),
    (32, "#ff5e3a"),
    (64, "#ff3b30"),
    (128, "#ffcc00"),
    (256, "#ffd60a"),
    (512, "#34c759"),
    (1024, "#30d158"),
    (2048, "#0a84ff"),
];

const HIGH_CONTRAST_TILES: TileTable = &[
    (2, "#ffffff"),
    (4, "#ffff00"),
    (8, "#f38518"),
    (16, "#ff6b00"),
    (32, "#ff0000"),
    (64, "#ff00ff"),
    (128, "#00ffff"),
    (256, "#00ff00"),
    (512, "#3794ff"),
    (1024, "#b180d7"),
    (2048, "#ffd700"),
];

const HIGH_CONTRAST_LIGHT_TILES: TileTable = &[
    (2, "#f2f2f2"),
    (4, "#d9d9d9"),
    (8, "#b5200d"),
    (16, "#8f1a0a"),
    (32, "#6c0000"),
    (64, "#5a0066"),
    (128, "#0f4a85"),
    (256, "#00528a"),
    (512, "#006400"),
    (1024, "#004d00"),
    (2048, "#000000"),
];

use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::theme::ThemeProfile;

const NONCE_LEN: usize = 32;

pub fn nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

/// CSS custom property for each named color role, keyed by the role's
/// field name in the serialized [`ThemeProfile`]. Tile colors are emitted
/// separately as `--tile-<value>`.
const ROLE_VARIABLES: [(&str, &str); 8] = [
    ("--game-background", "background"),
    ("--game-foreground", "foreground"),
    ("--game-accent", "accent"),
    ("--board-background", "boardBackground"),
    ("--empty-cell", "emptyCell"),
    ("--text-on-light", "textOnLight"),
    ("--text-on-dark", "textOnDark"),
    ("--tile-text-shadow", "textShadow"),
];

fn role_value<'a>(profile: &'a ThemeProfile, role: &str) -> &'a str {
    match role {
        "background" => &profile.background,
        "foreground" => &profile.foreground,
        "accent" => &profile.accent,
        "boardBackground" => &profile.board_background,
        "emptyCell" => &profile.empty_cell,
        "textOnLight" => &profile.text_on_light,
        "textOnDark" => &profile.text_on_dark,
        "textShadow" => &profile.text_shadow,
        _ => "",
    }
}

/// Static document installed into a fresh view: structure, theme variables,
/// and the script bootstrap. Only scripts carrying `nonce` may run.
pub fn render(profile: &ThemeProfile, nonce: &str) -> String {
    let mut variables: Vec<(String, &str)> = ROLE_VARIABLES
        .iter()
        .map(|(name, role)| (name.to_string(), role_value(profile, role)))
        .collect();
    variables.extend(
        profile
            .tile_colors
            .iter()
            .map(|(value, color)| (format!("--tile-{value}"), color.as_str())),
    );

    let root_rules: String = variables
        .iter()
        .map(|(name, value)| format!("      {name}: {};\n", css_value(value)))
        .collect();

    TEMPLATE
        .replace("{{ROOT_RULES}}", &root_rules)
        .replace("{{ROLE_VARIABLES}}", &role_table())
        .replace("{{NONCE}}", nonce)
        .replace("{{COLOR_SCHEME}}", if profile.is_dark { "dark" } else { "light" })
}

/// `ROLE_VARIABLES` as a script object literal.
fn role_table() -> String {
    let entries: Vec<String> = ROLE_VARIABLES
        .iter()
        .map(|(name, role)| format!("'{name}': '{role}'"))
        .collect();
    format!("{{ {} }}", entries.join(", "))
}

/// Drops anything that could terminate the style block or inject markup.
fn css_value(raw: &str) -> String {
    raw.chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || "#(),.% -".contains(*ch))
        .collect()
}

const TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta http-equiv="Content-Security-Policy" content="default-src 'none'; style-src 'nonce-{{NONCE}}'; script-src 'nonce-{{NONCE}}';">
  <meta name="color-scheme" content="{{COLOR_SCHEME}}">
  <title>2048</title>
  <style nonce="{{NONCE}}">
    :root {
{{ROOT_RULES}}    }
    body { background: var(--game-background); color: var(--game-foreground); font-family: sans-serif; }
    #board { display: grid; grid-template-columns: repeat(4, 64px); gap: 8px; padding: 8px; background: var(--board-background); border-radius: 6px; width: max-content; }
    .cell { height: 64px; display: flex; align-items: center; justify-content: center; font-weight: bold; border-radius: 4px; background: var(--empty-cell); text-shadow: var(--tile-text-shadow); }
    #notice { color: var(--game-accent); min-height: 1.5em; }
  </style>
</head>
<body>
  <header><span id="score">0</span> / <span id="best">0</span> <button id="new-game">New Game</button></header>
  <div id="notice"></div>
  <div id="board"></div>
  <script nonce="{{NONCE}}">
    const host = window.hostChannel;
    let rendered = null;
    let theme = null;
    const roles = {{ROLE_VARIABLES}};
    const send = (message) => host.postMessage(message);
    function applyTheme(next) {
      theme = next;
      const root = document.documentElement.style;
      for (const [name, role] of Object.entries(roles)) {
        if (typeof next[role] === 'string') { root.setProperty(name, next[role]); }
      }
      for (const [value, color] of Object.entries(next.tileColors || {})) {
        root.setProperty(`--tile-${value}`, color);
      }
      root.colorScheme = next.isDark ? 'dark' : 'light';
    }
    function render(state) {
      if (rendered && state.revision < rendered.revision) { return; }
      rendered = state;
      document.getElementById('score').textContent = state.score;
      document.getElementById('best').textContent = state.bestScore;
      const board = document.getElementById('board');
      board.replaceChildren(...state.board.flat().map((value) => {
        const cell = document.createElement('div');
        cell.className = 'cell';
        if (value > 0) {
          cell.textContent = value;
          cell.style.background = `var(--tile-${value}, var(--game-accent))`;
          cell.style.color = value <= 4 ? 'var(--text-on-light)' : 'var(--text-on-dark)';
        }
        return cell;
      }));
      document.getElementById('notice').textContent = state.status === 'playing' ? '' : state.status;
    }
    window.addEventListener('message', (event) => {
      const message = event.data;
      switch (message && message.type) {
        case 'newGame':
        case 'gameStateUpdate': render(message.gameState); break;
        case 'themeChanged': applyTheme(message.theme); break;
        case 'error': document.getElementById('notice').textContent = message.message; break;
      }
    });
    const keys = { ArrowUp: 'up', ArrowDown: 'down', ArrowLeft: 'left', ArrowRight: 'right' };
    window.addEventListener('keydown', (event) => {
      if (keys[event.key]) { send({ type: 'move', direction: keys[event.key] }); }
    });
    document.getElementById('new-game').addEventListener('click', () => send({ type: 'requestNewGame' }));
    send({ type: 'requestTheme' });
  </script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theme::{DefaultThemeAdapter, ThemeAdapter};

    #[test]
    fn nonce_is_alphanumeric_and_unique() {
        let first = nonce();
        let second = nonce();
        assert_eq!(first.len(), NONCE_LEN);
        assert!(first.chars().all(|ch| ch.is_ascii_alphanumeric()));
        assert_ne!(first, second);
    }

    #[test]
    fn render_embeds_nonce_and_theme_variables() {
        let profile = DefaultThemeAdapter.profile_for(None);
        let markup = render(&profile, "abc123");

        assert!(markup.contains("script-src 'nonce-abc123'"));
        assert!(markup.contains(r#"<script nonce="abc123">"#));
        assert!(markup.contains("--tile-8: #ff9500;"));
        assert!(markup.contains(r#"content="dark""#));
        assert!(!markup.contains("{{"));
    }

    #[test]
    fn theme_push_rewrites_every_emitted_variable() {
        let profile = DefaultThemeAdapter.profile_for(None);
        let markup = render(&profile, "abc123");

        assert!(markup.contains("case 'themeChanged': applyTheme(message.theme)"));
        assert!(markup.contains("root.setProperty(`--tile-${value}`, color)"));
        for (name, role) in ROLE_VARIABLES {
            assert!(markup.contains(&format!("      {name}: ")), "{name} not emitted");
            assert!(markup.contains(&format!("'{name}': '{role}'")), "{name} not applied");
        }
        assert!(markup.contains("'--game-background': 'background'"));

        let wire = serde_json::to_value(&profile).expect("profile json");
        for (_, role) in ROLE_VARIABLES {
            assert!(wire[role].is_string(), "{role} missing from themeChanged payload");
        }
        assert!(wire["tileColors"]["8"].is_string());
    }

    #[test]
    fn css_values_cannot_escape_the_style_block() {
        assert_eq!(css_value("#fff;}</style><script>"), "#fffstylescript");
        assert_eq!(
            css_value("0 1px 2px rgba(0, 0, 0, 0.45)"),
            "0 1px 2px rgba(0, 0, 0, 0.45)"
        );
    }
}

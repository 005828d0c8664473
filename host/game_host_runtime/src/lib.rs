pub mod bridge;
pub mod commands;
pub mod controller;
pub mod error;
pub mod host;
pub mod markup;
pub mod protocol;
pub mod resilience;
pub mod theme;

#[cfg(test)]
pub(crate) mod testing;

use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::bridge::ViewBridge;
use crate::commands::VIEW_TYPE;
use crate::controller::{GameController, GameEngine};
use crate::host::{Clock, SystemClock};
use crate::resilience::{ErrorKind, context, panic_message};
use crate::theme::{DefaultThemeAdapter, ThemeAdapter};

pub use crate::bridge::{NEW_GAME_FALLBACK_MESSAGE, SessionId, ViewState};
pub use crate::error::{ActivationError, ControllerError, EngineError, HostError, ProtocolError};
pub use crate::host::{CommandHost, HostServices, KeyValueStore, Notifier, Responder, ViewPanel};
pub use crate::protocol::{
    Board, ControllerMessage, Direction, GameSnapshot, GameStatus, HOST_TO_VIEW_CAP,
    VIEW_TO_HOST_CAP, ViewMessage,
};
pub use crate::resilience::{ResilienceConfig, ResilienceEngine, Severity};
pub use crate::theme::ThemeDescriptor;
pub use serde_json;

#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub resilience: ResilienceConfig,
    /// Theme active when the runtime starts; `None` falls back to the dark palette.
    pub theme: Option<ThemeDescriptor>,
}

/// Everything activation wires together. Dropping it releases the
/// controller; command handlers left with the host then report instead of
/// acting.
pub struct App {
    pub resilience: Rc<ResilienceEngine>,
    pub controller: Rc<GameController>,
    pub bridge: Rc<ViewBridge>,
}

impl App {
    pub fn deactivate(&self) {
        if let Some(session) = self.bridge.active_session() {
            self.bridge.dispose(session);
        }
        tracing::info!(
            errors = self.resilience.error_count(),
            "2048 runtime deactivated"
        );
    }
}

pub fn activate(
    host: HostServices,
    engine: Box<dyn GameEngine>,
    config: RuntimeConfig,
) -> Result<App, ActivationError> {
    activate_with(
        host,
        engine,
        Box::new(DefaultThemeAdapter),
        Rc::new(SystemClock),
        config,
    )
}

/// Composition root. Critical failures are reported to the resilience engine
/// and then handed back to the host. A panic anywhere in composition aborts
/// activation.
pub fn activate_with(
    host: HostServices,
    engine: Box<dyn GameEngine>,
    theme_adapter: Box<dyn ThemeAdapter>,
    clock: Rc<dyn Clock>,
    config: RuntimeConfig,
) -> Result<App, ActivationError> {
    let RuntimeConfig { resilience, theme } = config;
    let resilience = ResilienceEngine::with_clock(resilience, host.clone(), clock);

    let composed = panic::catch_unwind(AssertUnwindSafe(|| {
        compose(&host, engine, theme_adapter, theme, &resilience)
    }));
    match composed {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            resilience.handle_error(
                ErrorKind::ActivationFailure,
                message.clone(),
                context([("phase", Value::from("activate"))]),
            );
            Err(ActivationError::Aborted(message))
        }
    }
}

fn compose(
    host: &HostServices,
    engine: Box<dyn GameEngine>,
    theme_adapter: Box<dyn ThemeAdapter>,
    theme: Option<ThemeDescriptor>,
    resilience: &Rc<ResilienceEngine>,
) -> Result<App, ActivationError> {
    let controller = match GameController::create(engine, host, Rc::clone(resilience)) {
        Ok(controller) => controller,
        Err(err) => {
            resilience.handle_error(
                ErrorKind::ControllerCreationFailure,
                err.to_string(),
                context([("phase", Value::from("createController"))]),
            );
            return Err(ActivationError::ControllerCreation(err));
        }
    };
    resilience.attach_controller(&controller);

    let bridge = Rc::new(ViewBridge::new(
        theme_adapter,
        theme,
        Rc::clone(&host.commands),
        Rc::clone(resilience),
    ));
    bridge.attach_controller(&controller);
    controller.attach_bridge(&bridge);
    resilience.attach_bridge(&bridge);

    if let Err(err) = host.commands.register_view_provider(VIEW_TYPE) {
        resilience.handle_error(
            ErrorKind::ViewProviderRegistrationFailure,
            err.to_string(),
            context([("viewType", Value::from(VIEW_TYPE))]),
        );
        return Err(ActivationError::ViewProviderRegistration(err));
    }

    if let Err(err) = commands::register_all(host.commands.as_ref(), &controller, resilience) {
        resilience.handle_error(
            ErrorKind::CommandRegistrationError,
            err.to_string(),
            context([("phase", Value::from("registerCommands"))]),
        );
    }

    controller.initialize();
    tracing::info!(view_type = VIEW_TYPE, "2048 runtime activated");

    Ok(App {
        resilience: Rc::clone(resilience),
        controller,
        bridge,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{GAME_STATE_KEY, MoveOutcome};
    use crate::testing::{Harness, NoticeLevel, ScriptedEngine};

    struct BrokenEngine;

    impl GameEngine for BrokenEngine {
        fn new_board(&self) -> Result<Board, EngineError> {
            Err(EngineError("no randomness available".into()))
        }

        fn apply_move(&self, _: &Board, _: Direction) -> Result<MoveOutcome, EngineError> {
            Err(EngineError("unreachable".into()))
        }
    }

    struct PanickingEngine;

    impl GameEngine for PanickingEngine {
        fn new_board(&self) -> Result<Board, EngineError> {
            panic!("board generator poisoned");
        }

        fn apply_move(&self, _: &Board, _: Direction) -> Result<MoveOutcome, EngineError> {
            panic!("board generator poisoned");
        }
    }

    struct PanickingThemeAdapter;

    impl ThemeAdapter for PanickingThemeAdapter {
        fn profile_for(&self, _: Option<&ThemeDescriptor>) -> theme::ThemeProfile {
            panic!("palette table missing");
        }
    }

    fn activate_engine(harness: &Harness, engine: Box<dyn GameEngine>) -> Result<App, ActivationError> {
        activate_with(
            harness.services(),
            engine,
            Box::new(DefaultThemeAdapter),
            harness.clock.clone(),
            RuntimeConfig::default(),
        )
    }

    #[test]
    fn activation_registers_provider_and_persists_initial_game() {
        let harness = Harness::new();

        let app = harness.activate(ScriptedEngine::new()).expect("activate");

        assert_eq!(harness.commands.view_providers(), vec![VIEW_TYPE.to_string()]);
        assert!(harness.commands.is_registered(commands::NEW_GAME_COMMAND));
        assert!(harness.store.get_value(GAME_STATE_KEY).is_some());
        assert_eq!(app.controller.snapshot().revision, 1);
        assert_eq!(app.bridge.state(), ViewState::Unresolved);
        assert!(app.resilience.records().is_empty());
    }

    #[test]
    fn controller_creation_failure_is_reported_and_raised() {
        let harness = Harness::new();

        let result = activate_engine(&harness, Box::new(BrokenEngine));

        match result {
            Err(ActivationError::ControllerCreation(_)) => {}
            Err(other) => panic!("expected controller creation error, got {other:?}"),
            Ok(_) => panic!("expected controller creation error, got an app"),
        }
        assert_eq!(harness.notifier.count(NoticeLevel::Error), 1);
        assert!(harness.commands.view_providers().is_empty());
    }

    #[test]
    fn panicking_controller_creation_aborts_activation() {
        let harness = Harness::new();

        let result = activate_engine(&harness, Box::new(PanickingEngine));

        match result {
            Err(ActivationError::Aborted(message)) => assert!(message.contains("poisoned")),
            Err(other) => panic!("expected aborted activation, got {other:?}"),
            Ok(_) => panic!("expected aborted activation, got an app"),
        }
        let error = harness.notifier.last(NoticeLevel::Error).expect("critical notice");
        assert!(error.message.contains("poisoned"));
    }

    #[test]
    fn panic_after_controller_creation_aborts_activation() {
        let harness = Harness::new();

        let result = activate_with(
            harness.services(),
            Box::new(ScriptedEngine::new()),
            Box::new(PanickingThemeAdapter),
            harness.clock.clone(),
            RuntimeConfig::default(),
        );

        match result {
            Err(ActivationError::Aborted(message)) => assert!(message.contains("palette table")),
            Err(other) => panic!("expected aborted activation, got {other:?}"),
            Ok(_) => panic!("expected aborted activation, got an app"),
        }
        let error = harness.notifier.last(NoticeLevel::Error).expect("critical notice");
        assert!(error.message.contains("palette table"));
        assert!(harness.commands.view_providers().is_empty());
    }

    #[test]
    fn view_provider_registration_failure_is_raised() {
        let harness = Harness::new();
        harness.commands.fail_view_provider(true);

        let result = harness.activate(ScriptedEngine::new());

        match result {
            Err(ActivationError::ViewProviderRegistration(HostError::Registration {
                target, ..
            })) => assert_eq!(target, VIEW_TYPE),
            Err(other) => panic!("expected view provider registration error, got {other:?}"),
            Ok(_) => panic!("expected view provider registration error, got an app"),
        }
        assert_eq!(harness.notifier.count(NoticeLevel::Error), 1);
    }

    #[test]
    fn deactivate_disposes_the_view() {
        let harness = Harness::new();
        let app = harness.activate(ScriptedEngine::new()).expect("activate");
        app.bridge
            .resolve_view(crate::testing::FakePanel::new())
            .expect("session");

        app.deactivate();

        assert_eq!(app.bridge.state(), ViewState::Disposed);
        assert_eq!(app.bridge.active_session(), None);
    }
}

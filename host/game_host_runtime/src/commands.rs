use serde_json::Value;
use std::rc::Rc;

use crate::controller::GameController;
use crate::error::{BridgeError, HostError};
use crate::host::CommandHost;
use crate::resilience::{ErrorKind, ResilienceEngine, context};

pub const NEW_GAME_COMMAND: &str = "game2048.newGame";
pub const SHARE_SCORE_COMMAND: &str = "game2048.shareScore";
pub const VIEW_TYPE: &str = "game2048.gameView";

/// Registers every command this runtime contributes. Handlers hold only a
/// weak relation to the controller and are firewalled by the resilience
/// engine, so they always report success to the host.
pub fn register_all(
    commands: &dyn CommandHost,
    controller: &Rc<GameController>,
    resilience: &Rc<ResilienceEngine>,
) -> Result<(), HostError> {
    let target = Rc::downgrade(controller);
    let new_game = resilience.wrap(
        ErrorKind::NewGameCommandError,
        context([("command", Value::from(NEW_GAME_COMMAND))]),
        move |()| {
            let controller = target.upgrade().ok_or(BridgeError::ControllerUnavailable)?;
            controller.new_game();
            Ok::<_, BridgeError>(())
        },
    );
    commands.register_command(
        NEW_GAME_COMMAND,
        Rc::new(move || {
            new_game(());
            Ok(())
        }),
    )?;

    let target = Rc::downgrade(controller);
    let share_score = resilience.wrap(
        ErrorKind::ShareScoreCommandError,
        context([("command", Value::from(SHARE_SCORE_COMMAND))]),
        move |()| {
            let controller = target.upgrade().ok_or(BridgeError::ControllerUnavailable)?;
            controller.share_score();
            Ok::<_, BridgeError>(())
        },
    );
    commands.register_command(
        SHARE_SCORE_COMMAND,
        Rc::new(move || {
            share_score(());
            Ok(())
        }),
    )?;

    tracing::debug!("commands registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, NoticeLevel, ScriptedEngine};

    #[test]
    fn registered_commands_drive_the_controller() {
        let harness = Harness::new();
        let app = harness.activate(ScriptedEngine::new()).expect("activate");
        let revision = app.controller.snapshot().revision;

        harness.commands.execute_command(NEW_GAME_COMMAND).expect("new game");
        harness.commands.execute_command(SHARE_SCORE_COMMAND).expect("share");

        assert_eq!(app.controller.snapshot().revision, revision + 1);
        assert_eq!(harness.notifier.messages(NoticeLevel::Information).len(), 1);
    }

    #[test]
    fn handlers_outliving_the_controller_report_instead_of_failing() {
        let harness = Harness::new();
        let app = harness.activate(ScriptedEngine::new()).expect("activate");
        let resilience = Rc::clone(&app.resilience);
        drop(app);

        harness
            .commands
            .execute_command(NEW_GAME_COMMAND)
            .expect("wrapped handler never fails");

        let records = resilience.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, ErrorKind::NewGameCommandError);
    }

    #[test]
    fn registration_failure_is_recovered_by_re_registering() {
        let harness = Harness::new();
        harness.commands.fail_registrations(1);

        let app = harness.activate(ScriptedEngine::new()).expect("activate");

        let records = app.resilience.records();
        assert_eq!(records[0].kind, ErrorKind::CommandRegistrationError);
        assert!(harness.commands.is_registered(NEW_GAME_COMMAND));
        assert!(harness.commands.is_registered(SHARE_SCORE_COMMAND));
    }
}

//! Lifecycle of the sandboxed view and the message relay between it and the
//! game controller.

use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use crate::commands::NEW_GAME_COMMAND;
use crate::controller::GameController;
use crate::error::BridgeError;
use crate::host::{CommandHost, ViewPanel};
use crate::markup;
use crate::protocol::{ControllerMessage, ViewMessage};
use crate::resilience::{ErrorKind, ResilienceEngine, context, panic_message};
use crate::theme::{ThemeAdapter, ThemeDescriptor, ThemeProfile};

pub const NEW_GAME_FALLBACK_MESSAGE: &str = "Failed to start a new game. Please try again.";

pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    Unresolved,
    Resolving,
    Active,
    Disposed,
}

struct ViewSession {
    id: SessionId,
    panel: Option<Rc<dyn ViewPanel>>,
    active: bool,
}

pub struct ViewBridge {
    state: Cell<ViewState>,
    session: RefCell<Option<ViewSession>>,
    next_session_id: Cell<SessionId>,
    theme_adapter: Box<dyn ThemeAdapter>,
    theme: RefCell<Option<ThemeDescriptor>>,
    profile: RefCell<ThemeProfile>,
    commands: Rc<dyn CommandHost>,
    controller: RefCell<Weak<GameController>>,
    resilience: Rc<ResilienceEngine>,
}

impl ViewBridge {
    pub fn new(
        theme_adapter: Box<dyn ThemeAdapter>,
        theme: Option<ThemeDescriptor>,
        commands: Rc<dyn CommandHost>,
        resilience: Rc<ResilienceEngine>,
    ) -> Self {
        let profile = theme_adapter.profile_for(theme.as_ref());
        Self {
            state: Cell::new(ViewState::Unresolved),
            session: RefCell::new(None),
            next_session_id: Cell::new(1),
            theme_adapter,
            theme: RefCell::new(theme),
            profile: RefCell::new(profile),
            commands,
            controller: RefCell::new(Weak::new()),
            resilience,
        }
    }

    pub fn attach_controller(&self, controller: &Rc<GameController>) {
        *self.controller.borrow_mut() = Rc::downgrade(controller);
    }

    pub fn state(&self) -> ViewState {
        self.state.get()
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.session
            .borrow()
            .as_ref()
            .filter(|session| session.active)
            .map(|session| session.id)
    }

    pub fn dropped_messages(&self) -> u64 {
        self.live_panel()
            .map_or(0, |(_, panel)| panel.dropped_messages())
    }

    pub fn theme_profile(&self) -> ThemeProfile {
        self.profile.borrow().clone()
    }

    /// Constructs a new view session on `panel`, superseding any live one.
    /// Returns `None` when the view could not be installed; the failure has
    /// already been reported.
    pub fn resolve_view(&self, panel: Rc<dyn ViewPanel>) -> Option<SessionId> {
        if let Some(previous) = self.active_session() {
            tracing::info!(session = previous, "superseding view session");
            self.dispose(previous);
        }

        let id = self.next_session_id.get();
        self.next_session_id.set(id + 1);
        self.state.set(ViewState::Resolving);

        let profile = self.refresh_profile();
        let document = markup::render(&profile, &markup::nonce());

        if let Err(err) = panel.install_markup(&document) {
            self.state.set(ViewState::Disposed);
            self.resilience.handle_error(
                ErrorKind::ViewProviderError,
                format!("failed to install view markup: {err}"),
                context([("sessionId", Value::from(id))]),
            );
            return None;
        }

        *self.session.borrow_mut() = Some(ViewSession {
            id,
            panel: Some(panel),
            active: true,
        });
        self.state.set(ViewState::Active);
        tracing::info!(session = id, "view session active");

        Some(id)
    }

    /// Disposal hook for the host. Idempotent: unknown, superseded, or
    /// already disposed sessions are ignored.
    pub fn dispose(&self, session: SessionId) -> bool {
        let released = {
            let mut slot = self.session.borrow_mut();
            match slot.as_mut() {
                Some(current) if current.id == session && current.active => {
                    current.active = false;
                    current.panel.take()
                }
                _ => None,
            }
        };

        match released {
            Some(_panel) => {
                self.state.set(ViewState::Disposed);
                tracing::info!(session, "view session disposed");
                true
            }
            None => {
                tracing::debug!(session, "dispose ignored; session is not active");
                false
            }
        }
    }

    /// Inbound entry point for a message from the view of `session`.
    /// Never propagates failures; each message is handled in isolation.
    pub fn receive(&self, session: SessionId, body: Value) {
        if self.active_session() != Some(session) {
            tracing::debug!(session, "dropping message from inactive view session");
            return;
        }

        let message = match ViewMessage::decode(&body) {
            Ok(message) => message,
            Err(err) => {
                self.resilience.handle_error(
                    err.kind(),
                    err.to_string(),
                    context([("payload", body)]),
                );
                return;
            }
        };

        tracing::debug!(session, tag = %message.tag(), "view message received");

        let failure = match panic::catch_unwind(AssertUnwindSafe(|| self.route(&message))) {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };
        self.resilience.handle_error(
            ErrorKind::ViewProviderError,
            format!("failed to handle '{}' from view: {failure}", message.tag()),
            context([("payload", body)]),
        );
    }

    /// Single outbound primitive. Returns whether the message reached the
    /// view channel; failures are reported, never raised.
    pub fn post_message(&self, message: &ControllerMessage) -> bool {
        let Some((session, panel)) = self.live_panel() else {
            tracing::trace!(tag = %message.tag(), "no active view session; message dropped");
            return false;
        };

        let body = match serde_json::to_value(message) {
            Ok(body) => body,
            Err(err) => {
                self.resilience.handle_error(
                    ErrorKind::ViewProviderError,
                    format!("failed to encode '{}': {err}", message.tag()),
                    context([("sessionId", Value::from(session))]),
                );
                return false;
            }
        };

        match panel.post(&body) {
            Ok(()) => true,
            Err(err) => {
                self.resilience.handle_error(
                    ErrorKind::ViewProviderError,
                    format!("failed to post '{}' to view: {err}", message.tag()),
                    context([
                        ("sessionId", Value::from(session)),
                        ("messageType", Value::from(message.tag().to_string())),
                    ]),
                );
                false
            }
        }
    }

    /// Host theme-change notification.
    pub fn on_theme_changed(&self, theme: Option<ThemeDescriptor>) {
        *self.theme.borrow_mut() = theme;
        let profile = self.refresh_profile();
        tracing::info!(is_dark = profile.is_dark, "theme changed");
        self.post_message(&ControllerMessage::theme_changed(profile));
    }

    fn route(&self, message: &ViewMessage) -> Result<(), BridgeError> {
        match message {
            ViewMessage::RequestNewGame => {
                if let Err(err) = self.commands.execute_command(NEW_GAME_COMMAND) {
                    self.post_message(&ControllerMessage::error(NEW_GAME_FALLBACK_MESSAGE, true));
                    return Err(err.into());
                }
            }
            ViewMessage::Move { direction } => {
                self.controller()?.apply_move(*direction);
            }
            ViewMessage::GameStateUpdate { game_state } => {
                self.controller()?.receive_view_report(game_state);
            }
            ViewMessage::RequestTheme => {
                self.post_message(&ControllerMessage::theme_changed(self.theme_profile()));
                self.controller()?.push_current_state();
            }
        }

        Ok(())
    }

    fn controller(&self) -> Result<Rc<GameController>, BridgeError> {
        self.controller
            .borrow()
            .upgrade()
            .ok_or(BridgeError::ControllerUnavailable)
    }

    fn live_panel(&self) -> Option<(SessionId, Rc<dyn ViewPanel>)> {
        let slot = self.session.borrow();
        let session = slot.as_ref().filter(|session| session.active)?;
        let panel = session.panel.as_ref()?;
        Some((session.id, Rc::clone(panel)))
    }

    fn refresh_profile(&self) -> ThemeProfile {
        let profile = self.theme_adapter.profile_for(self.theme.borrow().as_ref());
        *self.profile.borrow_mut() = profile.clone();
        profile
    }
}

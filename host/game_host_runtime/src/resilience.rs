//! Error taxonomy, bounded recovery, and escalation.
//!
//! One [`ResilienceEngine`] exists per host process. It is created by the
//! composition root and shared by `Rc`; every caught failure in the runtime
//! ends up in [`ResilienceEngine::handle_error`]. The engine is the only
//! writer of the error log and the error counter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::time::Duration;
use std::time::Instant;
use strum::{Display as StrumDisplay, EnumIter, EnumString, IntoStaticStr};

use crate::bridge::ViewBridge;
use crate::commands;
use crate::controller::{GameController, STORAGE_NAMESPACE};
use crate::error::RecoveryError;
use crate::host::{Clock, HostServices, Responder, SystemClock};

pub const DEFAULT_MAX_ERRORS: u32 = 10;
pub const DEFAULT_DECAY_COOLDOWN: Duration = Duration::from_secs(60);
pub const DEFAULT_LOG_CAPACITY: usize = 100;

pub const RELOAD_WINDOW_COMMAND: &str = "workbench.action.reloadWindow";

pub const ACTION_SHOW_DIAGNOSTICS: &str = "Show Diagnostics";
pub const ACTION_RELOAD_WINDOW: &str = "Reload Window";
pub const ACTION_REPORT_ISSUE: &str = "Report Issue";

/// Structured context attached to an [`ErrorRecord`].
pub type Context = BTreeMap<String, Value>;

pub fn context<const N: usize>(pairs: [(&str, Value); N]) -> Context {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    StrumDisplay,
    EnumString,
    IntoStaticStr,
    EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ActivationFailure,
    ControllerCreationFailure,
    ViewProviderRegistrationFailure,
    GameControllerError,
    ViewProviderError,
    CommandRegistrationError,
    StorageError,
    NewGameCommandError,
    ShareScoreCommandError,
    UnhandledRejection,
    UncaughtException,
    RecoveryFailure,
    MalformedPayload,
    UnknownMessageType,
}

impl ErrorKind {
    /// Kinds that always bypass automatic recovery.
    pub fn is_critical(self) -> bool {
        matches!(
            self,
            Self::ActivationFailure
                | Self::ControllerCreationFailure
                | Self::ViewProviderRegistrationFailure
        )
    }

    pub fn code(self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Recoverable,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub sequence: u64,
    pub kind: ErrorKind,
    pub message: String,
    pub context: Context,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub max_errors: u32,
    pub decay_cooldown: Duration,
    pub log_capacity: usize,
    /// Target of the "Report Issue" action; the action is not offered when unset.
    pub issue_url: Option<String>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_errors: DEFAULT_MAX_ERRORS,
            decay_cooldown: DEFAULT_DECAY_COOLDOWN,
            log_capacity: DEFAULT_LOG_CAPACITY,
            issue_url: None,
        }
    }
}

pub struct ResilienceEngine {
    config: ResilienceConfig,
    host: HostServices,
    clock: Rc<dyn Clock>,
    records: RefCell<VecDeque<ErrorRecord>>,
    next_sequence: Cell<u64>,
    error_count: Cell<u32>,
    pending_decays: RefCell<VecDeque<Instant>>,
    controller: RefCell<Weak<GameController>>,
    bridge: RefCell<Weak<ViewBridge>>,
    self_ref: Weak<ResilienceEngine>,
}

impl ResilienceEngine {
    pub fn new(config: ResilienceConfig, host: HostServices) -> Rc<Self> {
        Self::with_clock(config, host, Rc::new(SystemClock))
    }

    pub fn with_clock(
        config: ResilienceConfig,
        host: HostServices,
        clock: Rc<dyn Clock>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|self_ref| Self {
            config,
            host,
            clock,
            records: RefCell::new(VecDeque::new()),
            next_sequence: Cell::new(1),
            error_count: Cell::new(0),
            pending_decays: RefCell::new(VecDeque::new()),
            controller: RefCell::new(Weak::new()),
            bridge: RefCell::new(Weak::new()),
            self_ref: self_ref.clone(),
        })
    }

    /// Retains a relation to the controller for the recovery strategies that
    /// need it. The engine never keeps the controller alive.
    pub fn attach_controller(&self, controller: &Rc<GameController>) {
        *self.controller.borrow_mut() = Rc::downgrade(controller);
    }

    /// The bridge only feeds the diagnostics report.
    pub fn attach_bridge(&self, bridge: &Rc<ViewBridge>) {
        *self.bridge.borrow_mut() = Rc::downgrade(bridge);
    }

    pub fn handle_error(
        &self,
        kind: ErrorKind,
        message: impl Into<String>,
        context: Context,
    ) -> Severity {
        self.dispatch(kind, message.into(), context, true)
    }

    /// Result-based boundary: reports the failure branch and yields `None`.
    pub fn capture<T, E: Display>(
        &self,
        kind: ErrorKind,
        context: Context,
        result: Result<T, E>,
    ) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.handle_error(kind, err.to_string(), context);
                None
            }
        }
    }

    /// Firewalls a host-invoked entry point. The returned callable reports
    /// failures and panics instead of propagating them, yielding `None`.
    pub fn wrap<A, T, E, F>(
        &self,
        kind: ErrorKind,
        context: Context,
        f: F,
    ) -> impl Fn(A) -> Option<T> + use<A, T, E, F>
    where
        A: 'static,
        T: 'static,
        E: Display + 'static,
        F: Fn(A) -> Result<T, E> + 'static,
    {
        let engine = self.self_ref.clone();
        move |args| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(args)));
            let Some(engine) = engine.upgrade() else {
                tracing::warn!(kind = %kind, "resilience engine dropped; discarding wrapped result");
                return outcome.ok().and_then(Result::ok);
            };

            match outcome {
                Ok(result) => engine.capture(kind, context.clone(), result),
                Err(payload) => {
                    engine.handle_error(kind, panic_message(payload.as_ref()), context.clone());
                    None
                }
            }
        }
    }

    /// Applies every decay whose cooldown has elapsed. Returns how many
    /// decrements were applied.
    pub fn poll_decay(&self) -> usize {
        let now = self.clock.now();
        let mut released = 0;
        {
            let mut pending = self.pending_decays.borrow_mut();
            while pending.front().is_some_and(|due| *due <= now) {
                pending.pop_front();
                released += 1;
            }
        }

        if released > 0 {
            let remaining = self
                .error_count
                .get()
                .saturating_sub(u32::try_from(released).unwrap_or(u32::MAX));
            self.error_count.set(remaining);
            tracing::debug!(released, remaining, "error counter decayed");
        }

        released
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.get()
    }

    pub fn pending_decays(&self) -> usize {
        self.pending_decays.borrow().len()
    }

    pub fn records(&self) -> Vec<ErrorRecord> {
        self.records.borrow().iter().cloned().collect()
    }

    /// Explicit recovery action: forget accumulated errors and pending decays.
    pub fn reset(&self) {
        self.error_count.set(0);
        self.pending_decays.borrow_mut().clear();
        tracing::info!("error counter reset");
    }

    pub fn diagnostics_report(&self) -> String {
        let records = self.records.borrow();
        let mut report = format!(
            "2048 diagnostics: {} error(s) counted, {} record(s) retained\n",
            self.error_count.get(),
            records.len()
        );
        if let Some(bridge) = self.bridge.borrow().upgrade() {
            report.push_str(&format!(
                "view: {:?}, {} outbound message(s) dropped\n",
                bridge.state(),
                bridge.dropped_messages()
            ));
        }

        for record in records.iter() {
            let context = serde_json::to_string(&record.context).unwrap_or_default();
            report.push_str(&format!(
                "#{} {} {} {} {}\n",
                record.sequence,
                record.timestamp.to_rfc3339(),
                record.kind,
                record.message,
                context
            ));
        }

        report
    }

    fn dispatch(
        &self,
        kind: ErrorKind,
        message: String,
        context: Context,
        allow_recovery: bool,
    ) -> Severity {
        self.poll_decay();

        let record = self.append_record(kind, message, context);
        let count = self.error_count.get().saturating_add(1);
        self.error_count.set(count);

        if kind.is_critical() || count >= self.config.max_errors {
            self.escalate(&record, count);
            return Severity::Critical;
        }

        self.notify_recoverable(&record);

        if allow_recovery {
            if let Err(err) = self.recover(&record) {
                self.report_recovery_failure(&record, &err);
            }
        } else {
            self.schedule_decay();
        }

        Severity::Recoverable
    }

    fn append_record(&self, kind: ErrorKind, message: String, context: Context) -> ErrorRecord {
        let sequence = self.next_sequence.get();
        self.next_sequence.set(sequence + 1);

        let record = ErrorRecord {
            sequence,
            kind,
            message,
            context,
            timestamp: Utc::now(),
        };

        tracing::warn!(
            sequence,
            kind = %record.kind,
            context = ?record.context,
            "{}",
            record.message
        );

        let mut records = self.records.borrow_mut();
        if records.len() >= self.config.log_capacity.max(1) {
            records.pop_front();
        }
        records.push_back(record.clone());

        record
    }

    fn notify_recoverable(&self, record: &ErrorRecord) {
        let message = user_message(record.kind);
        let actions: &[&str] = match record.kind {
            // Reconstruction is owned by the host; the only remedy we offer
            // is reloading the window.
            ErrorKind::ViewProviderError => &[ACTION_RELOAD_WINDOW],
            _ => &[],
        };

        self.host
            .notifier
            .show_warning(&message, actions, self.action_responder());
    }

    fn recover(&self, record: &ErrorRecord) -> Result<(), RecoveryError> {
        match record.kind {
            ErrorKind::GameControllerError => {
                let controller = self.controller.borrow().upgrade();
                if let Some(controller) = controller {
                    tracing::info!("re-initializing game controller");
                    controller.try_initialize()?;
                }
                Ok(())
            }
            ErrorKind::ViewProviderError => Ok(()),
            ErrorKind::CommandRegistrationError => {
                let controller = self
                    .controller
                    .borrow()
                    .upgrade()
                    .ok_or(RecoveryError::ControllerUnavailable)?;
                let engine = self
                    .self_ref
                    .upgrade()
                    .ok_or(RecoveryError::EngineUnavailable)?;
                tracing::info!("re-registering commands");
                commands::register_all(self.host.commands.as_ref(), &controller, &engine)?;
                Ok(())
            }
            ErrorKind::StorageError => {
                let keys = self.host.store.keys()?;
                let mut cleared = 0_usize;
                for key in keys.iter().filter(|key| key.starts_with(STORAGE_NAMESPACE)) {
                    self.host.store.remove(key)?;
                    cleared += 1;
                }
                tracing::info!(cleared, "cleared namespaced storage keys");
                self.host
                    .notifier
                    .show_information("2048 saved state was reset.");
                Ok(())
            }
            _ => {
                self.schedule_decay();
                Ok(())
            }
        }
    }

    fn report_recovery_failure(&self, original: &ErrorRecord, err: &RecoveryError) {
        let mut context = context([
            ("originalKind", Value::String(original.kind.code().to_string())),
            ("originalSequence", Value::from(original.sequence)),
        ]);
        if !original.context.is_empty() {
            context.insert(
                "originalContext".to_string(),
                Value::Object(original.context.clone().into_iter().collect()),
            );
        }

        self.dispatch(
            ErrorKind::RecoveryFailure,
            format!("recovery for {} failed: {err}", original.kind),
            context,
            false,
        );
    }

    fn schedule_decay(&self) {
        let due = self.clock.now() + self.config.decay_cooldown;
        self.pending_decays.borrow_mut().push_back(due);
    }

    fn escalate(&self, record: &ErrorRecord, count: u32) {
        tracing::error!(
            sequence = record.sequence,
            kind = %record.kind,
            count,
            "critical error; waiting for user action"
        );

        let message = if record.kind.is_critical() {
            format!("2048 failed: {}", record.message)
        } else {
            format!(
                "2048 keeps running into errors ({count} recently). The extension may be unstable."
            )
        };

        let mut actions = vec![ACTION_SHOW_DIAGNOSTICS, ACTION_RELOAD_WINDOW];
        if self.config.issue_url.is_some() {
            actions.push(ACTION_REPORT_ISSUE);
        }

        self.host
            .notifier
            .show_error(&message, &actions, self.action_responder());
    }

    fn action_responder(&self) -> Responder {
        let engine = self.self_ref.clone();
        Box::new(move |choice| {
            let (Some(engine), Some(choice)) = (engine.upgrade(), choice) else {
                return;
            };
            engine.perform_action(&choice);
        })
    }

    fn perform_action(&self, action: &str) {
        tracing::info!(action, "user selected recovery action");
        match action {
            ACTION_SHOW_DIAGNOSTICS => {
                self.host.notifier.show_diagnostics(&self.diagnostics_report());
            }
            ACTION_RELOAD_WINDOW => match self.host.commands.execute_command(RELOAD_WINDOW_COMMAND) {
                Ok(()) => self.reset(),
                Err(err) => tracing::warn!(error = %err, "reload command failed"),
            },
            ACTION_REPORT_ISSUE => {
                let Some(url) = self.config.issue_url.as_deref() else {
                    return;
                };
                if let Err(err) = self.host.notifier.open_external(url) {
                    tracing::warn!(error = %err, url, "failed to open issue tracker");
                }
            }
            other => tracing::debug!(action = other, "ignoring unknown action"),
        }
    }
}

fn user_message(kind: ErrorKind) -> String {
    match kind {
        ErrorKind::GameControllerError => {
            "2048 hit an error while updating the game. Your last action was not applied.".into()
        }
        ErrorKind::ViewProviderError => {
            "The 2048 view ran into a problem. Reload the window to restore it.".into()
        }
        ErrorKind::CommandRegistrationError => {
            "Some 2048 commands could not be registered. Retrying.".into()
        }
        ErrorKind::StorageError => "2048 could not access its saved game.".into(),
        ErrorKind::NewGameCommandError => "Could not start a new 2048 game.".into(),
        ErrorKind::ShareScoreCommandError => "Could not share your 2048 score.".into(),
        other => format!("2048 encountered an unexpected problem ({other})."),
    }
}

pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked with a non-string payload".to_string()
    }
}

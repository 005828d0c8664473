//! Seams to the host process. Everything the runtime needs from its
//! embedding (notifications, commands, storage, the view channel, time)
//! comes through these traits so the core stays testable without a host.

use serde_json::Value;
use std::rc::Rc;
use std::time::Instant;

use crate::error::HostError;

/// Receives the label of the action the user picked, or `None` when the
/// notice was dismissed. May be invoked long after the notice was shown.
pub type Responder = Box<dyn FnOnce(Option<String>)>;

pub type CommandHandler = Rc<dyn Fn() -> Result<(), HostError>>;

pub trait Notifier {
    fn show_information(&self, message: &str);

    fn show_warning(&self, message: &str, actions: &[&str], respond: Responder);

    /// Blocking-style notice used for critical conditions.
    fn show_error(&self, message: &str, actions: &[&str], respond: Responder);

    fn show_diagnostics(&self, report: &str);

    fn open_external(&self, url: &str) -> Result<(), HostError>;
}

pub trait CommandHost {
    fn register_command(&self, name: &str, handler: CommandHandler) -> Result<(), HostError>;

    fn execute_command(&self, name: &str) -> Result<(), HostError>;

    fn register_view_provider(&self, view_type: &str) -> Result<(), HostError>;
}

/// Key/value storage scoped to this extension.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Value>, HostError>;

    fn set(&self, key: &str, value: Value) -> Result<(), HostError>;

    fn remove(&self, key: &str) -> Result<(), HostError>;

    fn keys(&self) -> Result<Vec<String>, HostError>;
}

/// Handle to one sandboxed view instance.
pub trait ViewPanel {
    fn install_markup(&self, markup: &str) -> Result<(), HostError>;

    fn post(&self, body: &Value) -> Result<(), HostError>;

    /// Messages accepted by `post` but never delivered, for panels that shed
    /// load instead of failing.
    fn dropped_messages(&self) -> u64 {
        0
    }
}

pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Clone)]
pub struct HostServices {
    pub notifier: Rc<dyn Notifier>,
    pub commands: Rc<dyn CommandHost>,
    pub store: Rc<dyn KeyValueStore>,
}

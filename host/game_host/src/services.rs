//! In-process stand-ins for the host primitives: a command registry, a
//! console notifier, and a JSON file store.

use game2048_host_runtime::host::CommandHandler;
use game2048_host_runtime::resilience::RELOAD_WINDOW_COMMAND;
use game2048_host_runtime::{CommandHost, HostError, KeyValueStore, Notifier, Responder};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use crate::transport::{Directive, HostEvent};

pub struct LocalCommandHost {
    handlers: RefCell<HashMap<String, CommandHandler>>,
    view_providers: RefCell<Vec<String>>,
    events: Sender<HostEvent>,
}

impl LocalCommandHost {
    pub fn new(events: Sender<HostEvent>) -> Self {
        Self {
            handlers: RefCell::new(HashMap::new()),
            view_providers: RefCell::new(Vec::new()),
            events,
        }
    }
}

impl CommandHost for LocalCommandHost {
    fn register_command(&self, name: &str, handler: CommandHandler) -> Result<(), HostError> {
        let replaced = self
            .handlers
            .borrow_mut()
            .insert(name.to_string(), handler)
            .is_some();
        tracing::debug!(command = name, replaced, "command registered");
        Ok(())
    }

    fn execute_command(&self, name: &str) -> Result<(), HostError> {
        if name == RELOAD_WINDOW_COMMAND {
            // Handled by the main loop once the current event finishes.
            return self
                .events
                .send(HostEvent::Directive(Directive::Reload))
                .map_err(|_| HostError::command(name, "event loop is gone"));
        }

        let handler = self.handlers.borrow().get(name).cloned();
        let Some(handler) = handler else {
            return Err(HostError::UnknownCommand(name.to_string()));
        };
        handler()
    }

    fn register_view_provider(&self, view_type: &str) -> Result<(), HostError> {
        let mut providers = self.view_providers.borrow_mut();
        if providers.iter().any(|existing| existing == view_type) {
            return Err(HostError::Registration {
                target: view_type.to_string(),
                reason: "a provider is already registered".into(),
            });
        }
        providers.push(view_type.to_string());
        Ok(())
    }
}

/// Headless notifier. Notices go to the log; prompts resolve with no
/// selection since nobody can click them.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn show_information(&self, message: &str) {
        tracing::info!(target: "game2048::notice", "{message}");
    }

    fn show_warning(&self, message: &str, actions: &[&str], respond: Responder) {
        tracing::warn!(target: "game2048::notice", ?actions, "{message}");
        respond(None);
    }

    fn show_error(&self, message: &str, actions: &[&str], respond: Responder) {
        tracing::error!(target: "game2048::notice", ?actions, "{message}");
        respond(None);
    }

    fn show_diagnostics(&self, report: &str) {
        for line in report.lines() {
            tracing::info!(target: "game2048::diagnostics", "{line}");
        }
    }

    fn open_external(&self, url: &str) -> Result<(), HostError> {
        tracing::info!(target: "game2048::notice", url, "open in browser");
        Ok(())
    }
}

/// Key/value store persisted as one JSON object. Every write replaces the
/// file through a temporary sibling.
pub struct FileStore {
    path: PathBuf,
    values: RefCell<BTreeMap<String, Value>>,
}

impl FileStore {
    /// A missing file starts empty. An unreadable one is set aside so the
    /// runtime can start over.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, HostError> {
        let path = path.into();
        let values = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, Value>>(&bytes) {
                Ok(values) => values,
                Err(err) => {
                    let aside = path.with_extension("corrupt");
                    tracing::warn!(
                        path = %path.display(),
                        aside = %aside.display(),
                        error = %err,
                        "state file unreadable; starting empty"
                    );
                    fs::rename(&path, &aside).map_err(|err| {
                        HostError::storage(format!("failed to move {}: {err}", path.display()))
                    })?;
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(HostError::storage(format!(
                    "failed to read {}: {err}",
                    path.display()
                )));
            }
        };

        tracing::debug!(path = %path.display(), keys = values.len(), "state file opened");
        Ok(Self {
            path,
            values: RefCell::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, values: &BTreeMap<String, Value>) -> Result<(), HostError> {
        let object: Map<String, Value> = values
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let encoded = serde_json::to_vec_pretty(&Value::Object(object))
            .map_err(|err| HostError::storage(format!("failed to encode state: {err}")))?;

        let tmp_path = self.path.with_extension("tmp");
        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let mut tmp_file = File::create(&tmp_path)?;
            tmp_file.write_all(&encoded)?;
            tmp_file.sync_all()?;
            drop(tmp_file);
            fs::rename(&tmp_path, &self.path)
        };

        write().map_err(|err| {
            HostError::storage(format!("failed to write {}: {err}", self.path.display()))
        })
    }

    fn update(&self, change: impl FnOnce(&mut BTreeMap<String, Value>)) -> Result<(), HostError> {
        let mut next = self.values.borrow().clone();
        change(&mut next);
        self.save(&next)?;
        *self.values.borrow_mut() = next;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, HostError> {
        Ok(self.values.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), HostError> {
        self.update(|values| {
            values.insert(key.to_string(), value);
        })
    }

    fn remove(&self, key: &str) -> Result<(), HostError> {
        if !self.values.borrow().contains_key(key) {
            return Ok(());
        }
        self.update(|values| {
            values.remove(key);
        })
    }

    fn keys(&self) -> Result<Vec<String>, HostError> {
        Ok(self.values.borrow().keys().cloned().collect())
    }
}

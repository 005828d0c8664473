//! In-memory host fakes shared by the unit tests.

use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::controller::{GameEngine, MoveOutcome};
use crate::error::{ActivationError, EngineError, HostError};
use crate::host::{
    Clock, CommandHandler, CommandHost, HostServices, KeyValueStore, Notifier, Responder,
    ViewPanel,
};
use crate::protocol::{Board, ControllerMessage, Direction, GameSnapshot};
use crate::theme::DefaultThemeAdapter;
use crate::{App, RuntimeConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Information,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub actions: Vec<String>,
}

/// Records notices and answers every actionable one with a preset choice.
/// The choice only counts when the notice actually offers it.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: RefCell<Vec<Notice>>,
    choice: RefCell<Option<String>>,
    diagnostics: RefCell<Vec<String>>,
    opened: RefCell<Vec<String>>,
}

impl RecordingNotifier {
    pub fn respond_with(&self, choice: Option<&str>) {
        *self.choice.borrow_mut() = choice.map(str::to_string);
    }

    pub fn count(&self, level: NoticeLevel) -> usize {
        self.notices
            .borrow()
            .iter()
            .filter(|notice| notice.level == level)
            .count()
    }

    pub fn last(&self, level: NoticeLevel) -> Option<Notice> {
        self.notices
            .borrow()
            .iter()
            .rev()
            .find(|notice| notice.level == level)
            .cloned()
    }

    pub fn messages(&self, level: NoticeLevel) -> Vec<String> {
        self.notices
            .borrow()
            .iter()
            .filter(|notice| notice.level == level)
            .map(|notice| notice.message.clone())
            .collect()
    }

    pub fn diagnostics(&self) -> Vec<String> {
        self.diagnostics.borrow().clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.borrow().clone()
    }

    fn record(&self, level: NoticeLevel, message: &str, actions: &[&str], respond: Responder) {
        let actions: Vec<String> = actions.iter().map(|action| action.to_string()).collect();
        let choice = self
            .choice
            .borrow()
            .clone()
            .filter(|choice| actions.contains(choice));
        self.notices.borrow_mut().push(Notice {
            level,
            message: message.to_string(),
            actions,
        });
        respond(choice);
    }
}

impl Notifier for RecordingNotifier {
    fn show_information(&self, message: &str) {
        self.notices.borrow_mut().push(Notice {
            level: NoticeLevel::Information,
            message: message.to_string(),
            actions: Vec::new(),
        });
    }

    fn show_warning(&self, message: &str, actions: &[&str], respond: Responder) {
        self.record(NoticeLevel::Warning, message, actions, respond);
    }

    fn show_error(&self, message: &str, actions: &[&str], respond: Responder) {
        self.record(NoticeLevel::Error, message, actions, respond);
    }

    fn show_diagnostics(&self, report: &str) {
        self.diagnostics.borrow_mut().push(report.to_string());
    }

    fn open_external(&self, url: &str) -> Result<(), HostError> {
        self.opened.borrow_mut().push(url.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeCommandHost {
    handlers: RefCell<HashMap<String, CommandHandler>>,
    executed: RefCell<Vec<String>>,
    failing: RefCell<Vec<String>>,
    registration_failures: Cell<usize>,
    view_providers: RefCell<Vec<String>>,
    fail_view_provider: Cell<bool>,
}

impl FakeCommandHost {
    pub fn executed(&self) -> Vec<String> {
        self.executed.borrow().clone()
    }

    /// Makes every execution of `name` fail before its handler runs.
    pub fn fail_command(&self, name: &str) {
        self.failing.borrow_mut().push(name.to_string());
    }

    /// Fails the next `count` command registrations.
    pub fn fail_registrations(&self, count: usize) {
        self.registration_failures.set(count);
    }

    pub fn fail_view_provider(&self, fail: bool) {
        self.fail_view_provider.set(fail);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.handlers.borrow().contains_key(name)
    }

    pub fn view_providers(&self) -> Vec<String> {
        self.view_providers.borrow().clone()
    }
}

impl CommandHost for FakeCommandHost {
    fn register_command(&self, name: &str, handler: CommandHandler) -> Result<(), HostError> {
        let remaining = self.registration_failures.get();
        if remaining > 0 {
            self.registration_failures.set(remaining - 1);
            return Err(HostError::Registration {
                target: name.to_string(),
                reason: "registry locked".into(),
            });
        }
        self.handlers.borrow_mut().insert(name.to_string(), handler);
        Ok(())
    }

    fn execute_command(&self, name: &str) -> Result<(), HostError> {
        self.executed.borrow_mut().push(name.to_string());
        if self.failing.borrow().iter().any(|failing| failing == name) {
            return Err(HostError::command(name, "scripted failure"));
        }

        let handler = self.handlers.borrow().get(name).cloned();
        match handler {
            Some(handler) => handler(),
            None => Ok(()),
        }
    }

    fn register_view_provider(&self, view_type: &str) -> Result<(), HostError> {
        if self.fail_view_provider.get() {
            return Err(HostError::Registration {
                target: view_type.to_string(),
                reason: "provider already registered".into(),
            });
        }
        self.view_providers.borrow_mut().push(view_type.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    values: RefCell<BTreeMap<String, Value>>,
    fail_writes: Cell<bool>,
    fail_removes: Cell<bool>,
    writes: Cell<usize>,
}

impl MemoryStore {
    /// Seeds a value without counting it as a write.
    pub fn insert(&self, key: &str, value: Value) {
        self.values.borrow_mut().insert(key.to_string(), value);
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.values.borrow().get(key).cloned()
    }

    pub fn keys_snapshot(&self) -> Vec<String> {
        self.values.borrow().keys().cloned().collect()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    pub fn fail_removes(&self, fail: bool) {
        self.fail_removes.set(fail);
    }

    pub fn writes(&self) -> usize {
        self.writes.get()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, HostError> {
        Ok(self.get_value(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), HostError> {
        if self.fail_writes.get() {
            return Err(HostError::storage(format!("write to {key} refused")));
        }
        self.insert(key, value);
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), HostError> {
        if self.fail_removes.get() {
            return Err(HostError::storage(format!("remove of {key} refused")));
        }
        self.values.borrow_mut().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, HostError> {
        Ok(self.keys_snapshot())
    }
}

/// View stand-in. Tracks what a real view would render, ignoring
/// snapshots older than the one on screen.
#[derive(Default)]
pub struct FakePanel {
    markup: RefCell<Option<String>>,
    posted: RefCell<Vec<Value>>,
    rendered: RefCell<Option<GameSnapshot>>,
    fail_markup: Cell<bool>,
    fail_posts: Cell<bool>,
    drop_posts: Cell<bool>,
    dropped: Cell<u64>,
}

impl FakePanel {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn markup(&self) -> Option<String> {
        self.markup.borrow().clone()
    }

    pub fn posted(&self) -> Vec<Value> {
        self.posted.borrow().clone()
    }

    pub fn rendered(&self) -> Option<GameSnapshot> {
        self.rendered.borrow().clone()
    }

    pub fn fail_markup(&self, fail: bool) {
        self.fail_markup.set(fail);
    }

    pub fn fail_posts(&self, fail: bool) {
        self.fail_posts.set(fail);
    }

    /// Accepts posts without delivering them, like a full outbound queue.
    pub fn drop_posts(&self, enabled: bool) {
        self.drop_posts.set(enabled);
    }
}

impl ViewPanel for FakePanel {
    fn install_markup(&self, markup: &str) -> Result<(), HostError> {
        if self.fail_markup.get() {
            return Err(HostError::view("markup rejected"));
        }
        *self.markup.borrow_mut() = Some(markup.to_string());
        Ok(())
    }

    fn post(&self, body: &Value) -> Result<(), HostError> {
        if self.fail_posts.get() {
            return Err(HostError::view("channel closed"));
        }
        if self.drop_posts.get() {
            self.dropped.set(self.dropped.get() + 1);
            return Ok(());
        }
        self.posted.borrow_mut().push(body.clone());

        let snapshot = match serde_json::from_value::<ControllerMessage>(body.clone()) {
            Ok(ControllerMessage::NewGame { game_state })
            | Ok(ControllerMessage::GameStateUpdate { game_state }) => game_state,
            _ => return Ok(()),
        };
        let mut rendered = self.rendered.borrow_mut();
        let stale = rendered
            .as_ref()
            .is_some_and(|current| snapshot.revision < current.revision);
        if !stale {
            *rendered = Some(snapshot);
        }
        Ok(())
    }

    fn dropped_messages(&self) -> u64 {
        self.dropped.get()
    }
}

pub struct ManualClock {
    origin: Instant,
    offset: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Cell::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.offset.get()
    }
}

enum Scripted {
    Move(MoveOutcome),
    Failure(String),
    Panic(String),
}

/// Engine that replays queued outcomes. With nothing queued, moves leave
/// the board untouched.
#[derive(Default)]
pub struct ScriptedEngine {
    script: RefCell<VecDeque<Scripted>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial_board() -> Board {
        board_with(&[(0, 0, 2), (3, 3, 2)])
    }

    pub fn queue_move(&self, board: Board, score_delta: u64, terminal: bool) {
        self.script.borrow_mut().push_back(Scripted::Move(MoveOutcome {
            board,
            score_delta,
            moved: true,
            terminal,
        }));
    }

    pub fn queue_failure(&self, message: &str) {
        self.script
            .borrow_mut()
            .push_back(Scripted::Failure(message.to_string()));
    }

    pub fn queue_panic(&self, message: &str) {
        self.script
            .borrow_mut()
            .push_back(Scripted::Panic(message.to_string()));
    }
}

impl GameEngine for ScriptedEngine {
    fn new_board(&self) -> Result<Board, EngineError> {
        Ok(Self::initial_board())
    }

    fn apply_move(&self, board: &Board, _direction: Direction) -> Result<MoveOutcome, EngineError> {
        let next = self.script.borrow_mut().pop_front();
        match next {
            Some(Scripted::Move(outcome)) => Ok(outcome),
            Some(Scripted::Failure(message)) => Err(EngineError(message)),
            Some(Scripted::Panic(message)) => panic!("{message}"),
            None => Ok(MoveOutcome {
                board: *board,
                score_delta: 0,
                moved: false,
                terminal: false,
            }),
        }
    }
}

pub fn board_with(tiles: &[(usize, usize, u32)]) -> Board {
    let mut board = Board::empty();
    for &(row, col, value) in tiles {
        board.set(row, col, value);
    }
    board
}

pub struct Harness {
    pub notifier: Rc<RecordingNotifier>,
    pub commands: Rc<FakeCommandHost>,
    pub store: Rc<MemoryStore>,
    pub clock: Rc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            notifier: Rc::new(RecordingNotifier::default()),
            commands: Rc::new(FakeCommandHost::default()),
            store: Rc::new(MemoryStore::default()),
            clock: Rc::new(ManualClock::new()),
        }
    }

    pub fn services(&self) -> HostServices {
        HostServices {
            notifier: self.notifier.clone(),
            commands: self.commands.clone(),
            store: self.store.clone(),
        }
    }

    pub fn activate(&self, engine: ScriptedEngine) -> Result<App, ActivationError> {
        crate::activate_with(
            self.services(),
            Box::new(engine),
            Box::new(DefaultThemeAdapter),
            self.clock.clone(),
            RuntimeConfig::default(),
        )
    }
}

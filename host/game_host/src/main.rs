mod config;
mod engine;
mod services;
mod transport;

use anyhow::Context as _;
use game2048_host_runtime::commands::{NEW_GAME_COMMAND, SHARE_SCORE_COMMAND};
use game2048_host_runtime::resilience::{ErrorKind, context, panic_message};
use game2048_host_runtime::{App, HostServices, SessionId, ThemeDescriptor, activate};
use serde_json::Value;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use tracing_subscriber::EnvFilter;

use crate::config::HostConfig;
use crate::engine::SlideEngine;
use crate::services::{ConsoleNotifier, FileStore, LocalCommandHost};
use crate::transport::{Directive, HostEvent, StdioPanel, reader_loop, writer_loop};

fn main() {
    init_tracing();
    if let Err(err) = run() {
        tracing::error!("game2048_host fatal error: {err:#}");
        process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn run() -> anyhow::Result<()> {
    let config = HostConfig::from_env();
    tracing::info!(session = %config.session_label, "game2048 host starting");

    let (event_tx, event_rx) = mpsc::channel();
    let (view_tx, view_rx) = mpsc::sync_channel(config.outbound_queue_cap);

    let writer_handle = thread::spawn(move || writer_loop(view_rx, io::stdout().lock()));
    let reader_tx = event_tx.clone();
    let reader_handle = thread::spawn(move || reader_loop(io::stdin().lock(), reader_tx));
    spawn_ticker(event_tx.clone(), config.tick);

    let store = FileStore::open(&config.state_file)
        .with_context(|| format!("failed to open state file {}", config.state_file.display()))?;
    tracing::info!(path = %store.path().display(), "state file ready");

    let services = HostServices {
        notifier: Rc::new(ConsoleNotifier),
        commands: Rc::new(LocalCommandHost::new(event_tx)),
        store: Rc::new(store),
    };
    let app = activate(services.clone(), Box::new(SlideEngine::new()), config.runtime_config())
        .context("activation failed")?;

    let panel = Rc::new(StdioPanel::new(
        view_tx,
        config.outbound_queue_cap,
        config.markup_file.clone(),
    ));
    let session = app.bridge.resolve_view(panel.clone());

    event_loop(&app, &services, &panel, session, event_rx);

    app.deactivate();
    if panel.dropped() > 0 {
        tracing::warn!(dropped = panel.dropped(), "view messages were dropped on a full queue");
    }
    // Release the last sender so the writer drains and exits.
    drop(panel);
    drop(app);
    drop(services);

    if reader_handle.is_finished() {
        match reader_handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(error = %err, "reader thread returned error"),
            Err(err) => tracing::warn!("reader thread join failed: {err:?}"),
        }
    } else {
        tracing::debug!("reader thread still blocked on stdin; skipping join");
    }

    match writer_handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(error = %err, "writer thread returned error"),
        Err(err) => tracing::warn!("writer thread join failed: {err:?}"),
    }

    tracing::info!("game2048 host stopped");
    Ok(())
}

fn spawn_ticker(events: Sender<HostEvent>, every: std::time::Duration) {
    thread::spawn(move || {
        loop {
            thread::sleep(every);
            if events.send(HostEvent::Tick).is_err() {
                return;
            }
        }
    });
}

/// Runs until view input ends. A panic while handling one event is
/// reported and the loop carries on with the next.
fn event_loop(
    app: &App,
    services: &HostServices,
    panel: &Rc<StdioPanel>,
    mut session: Option<SessionId>,
    events: Receiver<HostEvent>,
) {
    for event in events {
        let stop = matches!(event, HostEvent::InputClosed | HostEvent::InputFailed(_));
        let handled = panic::catch_unwind(AssertUnwindSafe(|| {
            handle_event(app, services, panel, &mut session, event);
        }));
        if let Err(payload) = handled {
            app.resilience.handle_error(
                ErrorKind::UncaughtException,
                panic_message(payload.as_ref()),
                context([("phase", Value::from("eventLoop"))]),
            );
        }
        if stop {
            return;
        }
    }
}

fn handle_event(
    app: &App,
    services: &HostServices,
    panel: &Rc<StdioPanel>,
    session: &mut Option<SessionId>,
    event: HostEvent,
) {
    match event {
        HostEvent::View(body) => match *session {
            Some(id) => app.bridge.receive(id, body),
            None => tracing::debug!("no view session; dropping view message"),
        },
        HostEvent::Malformed(reason) => {
            app.resilience.handle_error(
                ErrorKind::MalformedPayload,
                reason,
                context([("source", Value::from("stdin"))]),
            );
        }
        HostEvent::Directive(directive) => apply_directive(app, services, panel, session, directive),
        HostEvent::Tick => {
            app.resilience.poll_decay();
        }
        HostEvent::InputFailed(reason) => {
            app.resilience.handle_error(
                ErrorKind::UnhandledRejection,
                format!("view input failed: {reason}"),
                context([("source", Value::from("stdin"))]),
            );
        }
        HostEvent::InputClosed => tracing::info!("view input closed"),
    }
}

fn apply_directive(
    app: &App,
    services: &HostServices,
    panel: &Rc<StdioPanel>,
    session: &mut Option<SessionId>,
    directive: Directive,
) {
    tracing::debug!(?directive, "host directive");
    match directive {
        Directive::Theme(kind) => app.bridge.on_theme_changed(Some(ThemeDescriptor::new(kind))),
        Directive::Reload => {
            *session = app.bridge.resolve_view(panel.clone());
        }
        Directive::Close => {
            if let Some(id) = session.take() {
                app.bridge.dispose(id);
            }
        }
        Directive::NewGame => execute(services, NEW_GAME_COMMAND),
        Directive::Share => execute(services, SHARE_SCORE_COMMAND),
        Directive::Diagnostics => services
            .notifier
            .show_diagnostics(&app.resilience.diagnostics_report()),
    }
}

fn execute(services: &HostServices, command: &str) {
    if let Err(err) = services.commands.execute_command(command) {
        tracing::warn!(command, error = %err, "command failed");
    }
}

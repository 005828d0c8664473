use game2048_host_runtime::{HOST_TO_VIEW_CAP, HostError, VIEW_TO_HOST_CAP, ViewPanel};
use serde_json::Value;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, SyncSender, TrySendError};

/// Everything the main loop reacts to. Produced by the stdin reader, the
/// ticker, and the in-process command host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    View(Value),
    Directive(Directive),
    Malformed(String),
    InputFailed(String),
    InputClosed,
    Tick,
}

/// Console lines starting with `:` stand in for host UI events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Theme(i64),
    Reload,
    Close,
    NewGame,
    Share,
    Diagnostics,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Line {
    Text(String),
    Oversized(usize),
}

pub fn parse_directive(raw: &str) -> Result<Directive, String> {
    let mut parts = raw.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let directive = match name {
        "theme" => {
            let kind = parts
                .next()
                .ok_or_else(|| "':theme' needs a numeric kind".to_string())?;
            let kind = kind
                .parse::<i64>()
                .map_err(|_| format!("invalid theme kind '{kind}'"))?;
            Directive::Theme(kind)
        }
        "reload" => Directive::Reload,
        "close" => Directive::Close,
        "new" => Directive::NewGame,
        "share" => Directive::Share,
        "diag" => Directive::Diagnostics,
        other => return Err(format!("unknown directive ':{other}'")),
    };

    if let Some(extra) = parts.next() {
        return Err(format!("unexpected argument '{extra}' for ':{name}'"));
    }
    Ok(directive)
}

/// Maps one inbound line to an event. Blank lines yield `None`.
pub fn classify(line: &str) -> Option<HostEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Some(directive) = line.strip_prefix(':') {
        return Some(match parse_directive(directive) {
            Ok(directive) => HostEvent::Directive(directive),
            Err(reason) => {
                tracing::warn!(line, "{reason}");
                return None;
            }
        });
    }

    Some(match serde_json::from_str::<Value>(line) {
        Ok(body) => HostEvent::View(body),
        Err(err) => HostEvent::Malformed(format!("invalid JSON from view: {err}")),
    })
}

/// Reads one newline-terminated line. Lines longer than `max_len` are
/// consumed to their end and reported as oversized.
pub fn read_message_line(reader: &mut impl BufRead, max_len: usize) -> io::Result<Option<Line>> {
    let mut buf = Vec::new();
    let mut total = 0_usize;
    let mut saw_any = false;

    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            break;
        }
        saw_any = true;

        let (chunk, done) = match available.iter().position(|byte| *byte == b'\n') {
            Some(end) => (&available[..end], Some(end + 1)),
            None => (available, None),
        };

        total += chunk.len();
        if total <= max_len {
            buf.extend_from_slice(chunk);
        }

        let consumed = done.unwrap_or(chunk.len());
        reader.consume(consumed);
        if done.is_some() {
            break;
        }
    }

    if !saw_any {
        return Ok(None);
    }
    if total > max_len {
        return Ok(Some(Line::Oversized(total)));
    }

    let text = String::from_utf8(buf).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    Ok(Some(Line::Text(text.trim_end_matches('\r').to_string())))
}

pub fn reader_loop(mut reader: impl BufRead, events: Sender<HostEvent>) -> io::Result<()> {
    loop {
        let event = match read_message_line(&mut reader, VIEW_TO_HOST_CAP) {
            Ok(Some(Line::Text(text))) => classify(&text),
            Ok(Some(Line::Oversized(len))) => Some(HostEvent::Malformed(format!(
                "view message too large: {len} > {VIEW_TO_HOST_CAP}"
            ))),
            Ok(None) => {
                let _ = events.send(HostEvent::InputClosed);
                return Ok(());
            }
            Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                Some(HostEvent::Malformed(format!("view message is not UTF-8: {err}")))
            }
            Err(err) => {
                let _ = events.send(HostEvent::InputFailed(err.to_string()));
                return Err(err);
            }
        };

        let Some(event) = event else {
            continue;
        };
        if events.send(event).is_err() {
            return Ok(());
        }
    }
}

pub fn writer_loop(rx: Receiver<Value>, mut writer: impl Write) -> io::Result<()> {
    for body in rx {
        let line = serde_json::to_string(&body).map_err(json_error)?;
        if line.len() > HOST_TO_VIEW_CAP {
            tracing::warn!(
                len = line.len(),
                cap = HOST_TO_VIEW_CAP,
                "outbound view message too large; dropped"
            );
            continue;
        }
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }

    Ok(())
}

fn json_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// View handle backed by the stdout writer thread.
pub struct StdioPanel {
    tx: SyncSender<Value>,
    queue_capacity: usize,
    dropped: AtomicU64,
    markup_file: Option<PathBuf>,
}

impl StdioPanel {
    pub fn new(tx: SyncSender<Value>, queue_capacity: usize, markup_file: Option<PathBuf>) -> Self {
        Self {
            tx,
            queue_capacity,
            dropped: AtomicU64::new(0),
            markup_file,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ViewPanel for StdioPanel {
    fn install_markup(&self, markup: &str) -> Result<(), HostError> {
        match &self.markup_file {
            Some(path) => {
                fs::write(path, markup).map_err(|err| {
                    HostError::view(format!("failed to write markup to {}: {err}", path.display()))
                })?;
                tracing::info!(path = %path.display(), "view markup written");
            }
            None => tracing::debug!(len = markup.len(), "view markup installed"),
        }
        Ok(())
    }

    fn post(&self, body: &Value) -> Result<(), HostError> {
        match self.tx.try_send(body.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_body)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped.is_power_of_two() {
                    tracing::warn!(
                        cap = self.queue_capacity,
                        dropped,
                        "view outbound queue full; dropping messages"
                    );
                }
                Ok(())
            }
            Err(TrySendError::Disconnected(_body)) => {
                Err(HostError::view("view output channel is closed"))
            }
        }
    }

    fn dropped_messages(&self) -> u64 {
        self.dropped()
    }
}

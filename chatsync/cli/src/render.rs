//! Incremental text rendering of engine snapshots
//!
//! Turns a stream of [`SyncSnapshot`]s into append-only terminal output:
//! each snapshot yields only what has not been printed yet.

use std::collections::HashMap;
use std::fmt::Write;

use chatsync_core::{ConnectionStatus, DisplayRecord, MessageId, MessageRole, SyncSnapshot};
use serde_json::Value;

#[derive(Debug, Default)]
struct Printed {
    chars: usize,
    finished: bool,
}

/// Tracks what has already been written for each message
#[derive(Debug, Default)]
pub struct Renderer {
    printed: HashMap<MessageId, Printed>,
    open_line: Option<MessageId>,
    status: Option<ConnectionStatus>,
    last_error: Option<String>,
}

impl Renderer {
    /// Output produced by `snapshot` since the previous call
    pub fn render(&mut self, snapshot: &SyncSnapshot) -> String {
        let mut out = String::new();

        if self.status != Some(snapshot.status) {
            self.break_line(&mut out);
            let _ = writeln!(out, "[{}]", snapshot.status);
            self.status = Some(snapshot.status);
        }
        if snapshot.last_error.is_some() && snapshot.last_error != self.last_error {
            if let Some(error) = &snapshot.last_error {
                self.break_line(&mut out);
                let _ = writeln!(out, "[error: {error}]");
            }
        }
        self.last_error.clone_from(&snapshot.last_error);

        for record in &snapshot.messages {
            if record.role.is_revealed() || record.revealing {
                self.render_revealed(record, &mut out);
            } else {
                self.render_whole(record, &mut out);
            }
        }

        out
    }

    fn break_line(&mut self, out: &mut String) {
        if self.open_line.take().is_some() {
            out.push('\n');
        }
    }

    fn render_whole(&mut self, record: &DisplayRecord, out: &mut String) {
        if self.printed.contains_key(&record.id) {
            return;
        }
        self.break_line(out);

        match (&record.role, &record.auxiliary) {
            (MessageRole::User, _) => {
                let _ = writeln!(out, "you: {}", record.content);
            }
            (_, Some(aux)) => {
                let name = match &aux.plugin {
                    Some(Value::String(name)) => name.clone(),
                    Some(other) => other.to_string(),
                    None => "widget".to_string(),
                };
                let data = aux.data.as_ref().map(ToString::to_string).unwrap_or_default();
                let _ = writeln!(out, "[{name}] {data}");
            }
            _ => {
                let _ = writeln!(out, "{}", record.content);
            }
        }

        self.printed.insert(
            record.id.clone(),
            Printed {
                chars: record.content.chars().count(),
                finished: true,
            },
        );
    }

    fn render_revealed(&mut self, record: &DisplayRecord, out: &mut String) {
        let shown = record.content.chars().count();
        let already = self.printed.get(&record.id).map_or(0, |p| p.chars);
        let finished = self.printed.get(&record.id).is_some_and(|p| p.finished);

        if shown > already {
            if self.open_line.as_ref() != Some(&record.id) {
                self.break_line(out);
                let label = if already == 0 { "assistant: " } else { "assistant (cont.): " };
                out.push_str(label);
                self.open_line = Some(record.id.clone());
            }
            out.extend(record.content.chars().skip(already));
        }

        let done = !record.revealing;
        if done && !finished && self.open_line.as_ref() == Some(&record.id) {
            out.push('\n');
            self.open_line = None;
        }

        let entry = self.printed.entry(record.id.clone()).or_default();
        entry.chars = entry.chars.max(shown);
        entry.finished = done && shown > 0;
    }
}

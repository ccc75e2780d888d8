//! Headless editing session driven by line input.
//!
//! Each line is either new content for the current document or a command:
//! - `:save` - persist the current document (merge if it has an id, create otherwise)
//! - `:load <id>` - load a document, from the cache when possible
//! - `:reload <id>` - fetch a document from the store, skipping the cache
//! - `:show` - print the current document
//! - `:quit` - end the session

use doc_sync_core::{Document, PersistenceClient, RealtimeChannel, SyncController, SyncError};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Edit(String),
    Save,
    Load(String),
    Reload(String),
    Show,
    Quit,
    Invalid(&'static str),
}

/// What the caller should do after applying an input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Reply(String),
    Silent,
    Quit,
}

pub fn parse_input(line: &str) -> Input {
    let Some(command) = line.strip_prefix(':') else {
        return Input::Edit(line.to_string());
    };

    let mut parts = command.trim().splitn(2, char::is_whitespace);
    match (parts.next(), parts.next().map(str::trim)) {
        (Some("save"), None) => Input::Save,
        (Some("show"), None) => Input::Show,
        (Some("quit" | "q"), None) => Input::Quit,
        (Some("load"), Some(id)) if !id.is_empty() => Input::Load(id.to_string()),
        (Some("load"), _) => Input::Invalid("usage: :load <id>"),
        (Some("reload"), Some(id)) if !id.is_empty() => Input::Reload(id.to_string()),
        (Some("reload"), _) => Input::Invalid("usage: :reload <id>"),
        _ => Input::Invalid("unknown command (try :save, :load <id>, :reload <id>, :show, :quit)"),
    }
}

pub async fn apply<P, C>(ctl: &SyncController<P, C>, input: Input) -> Outcome
where
    P: PersistenceClient + ?Sized,
    C: RealtimeChannel + ?Sized,
{
    debug!("Applying {:?}", input);
    match input {
        Input::Edit(content) => {
            ctl.edit_content(content);
            Outcome::Silent
        }
        Input::Save => {
            let current = ctl.current();
            let result = match current.id.clone() {
                Some(id) => {
                    let content = current.content.unwrap_or_default();
                    ctl.merge_current(&id, content).await
                }
                None => ctl.save(current).await,
            };
            reply("saved", result)
        }
        Input::Load(id) => reply("loaded", ctl.load(&id).await),
        Input::Reload(id) => reply("reloaded", ctl.refresh(&id).await),
        Input::Show => Outcome::Reply(render(&ctl.current())),
        Input::Quit => Outcome::Quit,
        Input::Invalid(usage) => Outcome::Reply(usage.to_string()),
    }
}

fn reply(verb: &str, result: Result<Document, SyncError>) -> Outcome {
    match result {
        Ok(doc) => Outcome::Reply(format!("{} {}", verb, render(&doc))),
        Err(SyncError::Busy) => Outcome::Reply("busy, try again".to_string()),
        Err(e) => Outcome::Reply(format!("error: {}", e)),
    }
}

/// One-line summary of a document.
pub fn render(doc: &Document) -> String {
    format!(
        "[{} v{}] {}",
        doc.id().unwrap_or("unsaved"),
        doc.version.map_or_else(|| "-".to_string(), |v| v.to_string()),
        doc.content().unwrap_or("")
    )
}

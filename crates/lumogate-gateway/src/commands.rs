use tracing::warn;

use crate::app::AppState;

/// Split a leading `/command` token off the front of a user message, à la
/// a chat slash command. Returns `(command, rest)` with `rest` trimmed;
/// `None` if the message doesn't start with one.
pub fn split_leading_command(text: &str) -> Option<(&str, String)> {
    let trimmed = text.trim_start();
    if !trimmed.starts_with('/') {
        return None;
    }
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let command = parts.next()?.trim_start_matches('/');
    if command.is_empty() {
        return None;
    }
    let rest = parts.next().unwrap_or("").trim().to_string();
    Some((command, rest))
}

/// Recognized slash commands intercepted before a turn reaches upstream.
/// Returns the text to hand back to the client in place of an upstream
/// reply, or `None` if `command` isn't one of these (the message passes
/// through to upstream as-is).
pub async fn dispatch(command: &str, state: &AppState, conversation_id: &str) -> Option<String> {
    match command {
        "save" => Some(handle_save(state, conversation_id).await),
        "sync" => Some(handle_sync(state).await),
        _ => None,
    }
}

async fn handle_save(state: &AppState, conversation_id: &str) -> String {
    let Some(sync) = &state.sync else {
        return "Sync is not enabled on this gateway.".to_string();
    };
    match sync.push(conversation_id).await {
        Ok(()) => "Conversation saved.".to_string(),
        Err(e) => {
            warn!(error = %e, conversation_id, "manual /save failed");
            format!("Save failed: {e}")
        }
    }
}

async fn handle_sync(state: &AppState) -> String {
    let Some(sync) = &state.sync else {
        return "Sync is not enabled on this gateway.".to_string();
    };
    match sync.pull_on_startup().await {
        Ok(n) => format!("Pulled {n} conversation(s) from sync storage."),
        Err(e) => {
            warn!(error = %e, "manual /sync pull failed");
            format!("Sync failed: {e}")
        }
    }
}

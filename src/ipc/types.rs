use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One newline-delimited request from the host UI. `id` is echoed back on the
/// matching response line; `params` stays raw JSON so each handler can pick
/// its own fields apart.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Sidecar session state. Both fields stay `None` until `workspace.select`
/// opens (or creates) the workspace database.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

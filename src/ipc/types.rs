use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One request line on the wire: `{id, method, params}`, answered by an
/// `{id, ok, ...}` envelope on stdout.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Daemon state. Both fields stay None until `workspace.select` opens the
/// workspace database.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

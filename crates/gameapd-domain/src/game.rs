//! Game and game-mod metadata delivered by the control plane.

use serde::{Deserialize, Serialize};

/// Game the server runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    #[serde(default)]
    pub code: String,

    /// Shortcode value substituted for `{game}` in command templates.
    #[serde(default)]
    pub start_code: String,

    /// Installation source candidates.
    #[serde(default)]
    pub remote_repository: String,
    #[serde(default)]
    pub local_repository: String,
}

/// Mod layered on top of a game, with its own installation sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameMod {
    #[serde(default)]
    pub id: i64,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub remote_repository: String,
    #[serde(default)]
    pub local_repository: String,
}

//! REST endpoint handlers for the query API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Online count and all known identifiers |
//! | `GET` | `/{steamID}` | One player, with live values and profiles |

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use playtime_core::snapshot::{encode_player, PlayerRecord};
use playtime_core::SteamId;
use serde::Serialize;
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

/// Body of `GET /`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexResponse {
    /// Players currently online.
    #[serde(rename = "playerCount")]
    pub player_count: usize,
    /// Every known player, ascending.
    #[serde(rename = "steamIDs")]
    pub steam_ids: Vec<SteamId>,
}

/// Body of `GET /{steamID}`: the snapshot schema plus the profile count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerResponse {
    /// The player as it would be written to the snapshot now.
    #[serde(flatten)]
    pub player: PlayerRecord,
    /// Number of profiles this player owns.
    #[serde(rename = "profileCount")]
    pub profile_count: usize,
}

/// Online count and identifier list.
pub async fn index(State(state): State<Arc<AppState>>) -> Json<IndexResponse> {
    let store = state.store.read().await;
    Json(IndexResponse {
        player_count: store.count_online(),
        steam_ids: store.steam_ids().cloned().collect(),
    })
}

/// One player's presence and playtime, derived at request time.
pub async fn get_player(
    State(state): State<Arc<AppState>>,
    Path(steam_id): Path<String>,
) -> Result<Json<PlayerResponse>, ApiError> {
    let steam_id = SteamId::new(steam_id);
    let store = state.store.read().await;

    let player = store.find(&steam_id).ok_or_else(|| {
        debug!(steam_id = %steam_id, "query for unknown player");
        ApiError::PlayerNotFound
    })?;

    Ok(Json(PlayerResponse {
        player: encode_player(player, state.clock.now()),
        profile_count: player.profile_count(),
    }))
}

//! Administration locale des listes de lecture (JSON).
//!
//! Ce n'est pas une surface cliente : les clients DAAP sont en lecture
//! seule. Ces points d'entrée servent l'outillage local (interface d'admin,
//! scripts) et se contentent de projeter l'API du catalogue.

use crate::DaapError;
use crate::state::DaapState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use luccatalog::PlaylistKind;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub(crate) struct NewPlaylist {
    pub name: String,
    /// "smart", "static", "file" ou "xml"
    #[serde(default = "default_kind")]
    pub kind: String,
    pub clause: Option<String>,
    pub path: Option<String>,
    #[serde(default)]
    pub index: i32,
}

fn default_kind() -> String {
    "static".to_string()
}

#[derive(Debug, Serialize)]
pub(crate) struct PlaylistCreated {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PlaylistEdit {
    pub name: String,
    pub clause: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NewPlaylistItem {
    pub song_id: i64,
}

fn parse_kind(kind: &str) -> Result<PlaylistKind, DaapError> {
    match kind {
        "smart" => Ok(PlaylistKind::Smart),
        "static" => Ok(PlaylistKind::StaticWeb),
        "file" => Ok(PlaylistKind::StaticFile),
        "xml" => Ok(PlaylistKind::StaticXml),
        _ => Err(DaapError::Catalog(luccatalog::CatalogError::InvalidType)),
    }
}

/// POST /admin/playlists
pub(crate) async fn add_playlist(
    State(state): State<Arc<DaapState>>,
    Json(body): Json<NewPlaylist>,
) -> Result<(StatusCode, Json<PlaylistCreated>), DaapError> {
    let kind = parse_kind(&body.kind)?;
    let id = state.catalog.add_playlist(
        &body.name,
        kind,
        body.clause.as_deref(),
        body.path.as_deref(),
        body.index,
    )?;
    Ok((StatusCode::CREATED, Json(PlaylistCreated { id })))
}

/// PUT /admin/playlists/{id}
pub(crate) async fn edit_playlist(
    State(state): State<Arc<DaapState>>,
    Path(id): Path<i64>,
    Json(body): Json<PlaylistEdit>,
) -> Result<StatusCode, DaapError> {
    state
        .catalog
        .edit_playlist(id, &body.name, body.clause.as_deref())?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /admin/playlists/{id}
pub(crate) async fn delete_playlist(
    State(state): State<Arc<DaapState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, DaapError> {
    state.catalog.delete_playlist(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /admin/playlists/{id}/items
pub(crate) async fn add_playlist_item(
    State(state): State<Arc<DaapState>>,
    Path(id): Path<i64>,
    Json(body): Json<NewPlaylistItem>,
) -> Result<StatusCode, DaapError> {
    state.catalog.add_playlist_item(id, body.song_id)?;
    Ok(StatusCode::CREATED)
}

/// DELETE /admin/playlists/{id}/items/{song_id}
pub(crate) async fn delete_playlist_item(
    State(state): State<Arc<DaapState>>,
    Path((id, song_id)): Path<(i64, i64)>,
) -> Result<StatusCode, DaapError> {
    state.catalog.delete_playlist_item(id, song_id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DaapConfig;
    use axum::response::IntoResponse;
    use luccatalog::Catalog;

    fn test_state() -> (tempfile::TempDir, Arc<DaapState>) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join("songs.db"), false).unwrap();
        let state = DaapState::new(
            catalog,
            DaapConfig {
                server_name: "Salon".into(),
                ..Default::default()
            },
        );
        (dir, Arc::new(state))
    }

    #[tokio::test]
    async fn test_create_and_delete_playlist() {
        let (_dir, state) = test_state();

        let (status, created) = add_playlist(
            State(state.clone()),
            Json(NewPlaylist {
                name: "Rock".into(),
                kind: "static".into(),
                clause: None,
                path: None,
                index: 0,
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let status = delete_playlist(State(state.clone()), Path(created.0.id))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_smart_playlist_without_clause_is_bad_request() {
        let (_dir, state) = test_state();

        let err = add_playlist(
            State(state),
            Json(NewPlaylist {
                name: "Vide".into(),
                kind: "smart".into(),
                clause: None,
                path: None,
                index: 0,
            }),
        )
        .await
        .unwrap_err();

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_duplicate_playlist_conflicts() {
        let (_dir, state) = test_state();
        state
            .catalog
            .add_playlist("Rock", PlaylistKind::StaticWeb, None, None, 0)
            .unwrap();

        let err = add_playlist(
            State(state),
            Json(NewPlaylist {
                name: "Rock".into(),
                kind: "static".into(),
                clause: None,
                path: None,
                index: 0,
            }),
        )
        .await
        .unwrap_err();

        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }
}

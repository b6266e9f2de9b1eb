//! # lucdaap - Le répartiteur DAAP
//!
//! Traduit les requêtes HTTP des clients DAAP en descripteurs de requête
//! pour le catalogue, assemble les réponses DMAP en deux passes (taille puis
//! émission), sert les flux audio (direct, reprise par Range, transcodage,
//! insertion de pochette) et tient le long-poll de `/update` sur le compteur
//! de révision.
//!
//! ## Surface
//!
//! | Chemin | Rôle |
//! |---|---|
//! | `/server-info`, `/content-codes` | capacités et registre des tags |
//! | `/login`, `/logout`, `/update` | session et révision |
//! | `/databases`, `/databases/{id}` | bases |
//! | `/databases/{id}/items` | morceaux (filtre + projection) |
//! | `/databases/{id}/containers[/{pid}/items]` | listes de lecture |
//! | `/databases/{id}/browse/{axis}` | navigation par axe |
//! | `/databases/{id}/items/{sid}.{ext}` | flux audio |
//! | `/admin/...` | administration locale des listes |

mod admin;
mod dispatch;
mod output;
mod params;
mod state;
mod stream;

pub use state::{ArtSplicer, DaapConfig, DaapState};
pub use stream::transcoder_args;

use axum::Router;
use axum::routing::{delete, get, post, put};
use std::sync::Arc;

/// Version annoncée dans l'en-tête `DAAP-Server`
pub const SERVER_VERSION: &str = concat!("luciole/", env!("CARGO_PKG_VERSION"));

/// Erreurs de la couche DAAP
#[derive(Debug, thiserror::Error)]
pub enum DaapError {
    #[error(transparent)]
    Catalog(#[from] luccatalog::CatalogError),

    #[error("unknown resource")]
    NotFound,

    #[error("response assembly failed: {0}")]
    Assembly(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Type Result spécialisé pour lucdaap
pub type Result<T> = std::result::Result<T, DaapError>;

/// Construit le routeur DAAP complet
pub fn router(state: Arc<DaapState>) -> Router {
    Router::new()
        .route("/server-info", get(dispatch::server_info))
        .route("/content-codes", get(dispatch::content_codes))
        .route("/login", get(dispatch::login))
        .route("/logout", get(dispatch::logout))
        .route("/update", get(dispatch::update))
        .route("/databases", get(dispatch::databases))
        .route("/databases/{id}", get(dispatch::databases))
        .route("/databases/{id}/items", get(dispatch::items))
        .route("/databases/{id}/items/{file}", get(stream::stream_song))
        .route("/databases/{id}/containers", get(dispatch::playlists))
        .route(
            "/databases/{id}/containers/{pid}/items",
            get(dispatch::playlist_items),
        )
        .route("/databases/{id}/browse/{axis}", get(dispatch::browse))
        .route("/admin/playlists", post(admin::add_playlist))
        .route(
            "/admin/playlists/{id}",
            put(admin::edit_playlist).delete(admin::delete_playlist),
        )
        .route("/admin/playlists/{id}/items", post(admin::add_playlist_item))
        .route(
            "/admin/playlists/{id}/items/{song_id}",
            delete(admin::delete_playlist_item),
        )
        .with_state(state)
}

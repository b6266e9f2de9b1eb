//! Gestionnaires de la surface DAAP hors flux audio.

use crate::output::{Envelope, daap_response, run_listing};
use crate::params::Params;
use crate::state::DaapState;
use crate::DaapError;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use luccatalog::{CountKind, MetaBits, MetaField, QueryDescriptor, QueryType};
use lucdmap::codec::{add_byte, add_container, add_int, add_short, add_string, add_version};
use lucdmap::tags::TAGS;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Prépare un descripteur avec les paramètres communs (projection, filtre,
/// tranche, session, codecs transcodés)
fn descriptor(
    state: &DaapState,
    params: &Params,
    query_type: QueryType,
    default_meta: MetaBits,
) -> QueryDescriptor {
    let mut desc = QueryDescriptor::new(query_type);
    desc.meta = params.meta(default_meta);
    desc.filter = params.filter();
    desc.index = params.index();
    desc.session_id = params.session_id();
    desc.transcode_codecs = state.config.transcode_codecs.clone();
    desc
}

/// GET /server-info
pub(crate) async fn server_info(
    State(state): State<Arc<DaapState>>,
    headers: HeaderMap,
    RawQuery(raw): RawQuery,
) -> Response {
    let params = Params::parse(raw.as_deref());
    let name = &state.config.server_name;

    // mpro/apro s'ajustent à la version annoncée par le client
    let client_version = headers
        .get("Client-DAAP-Version")
        .and_then(|v| v.to_str().ok());
    let (mpro, apro) = match client_version {
        Some("1.0") => ((1, 0), (1, 0)),
        Some("2.0") => ((1, 0), (2, 0)),
        _ => ((2, 0), (3, 0)),
    };

    let inner_len = (122 + name.len()) as u32;
    let mut buf = Vec::with_capacity(inner_len as usize + 8);
    add_container(&mut buf, b"msrv", inner_len);
    add_int(&mut buf, b"mstt", 200);
    add_version(&mut buf, b"mpro", mpro.0, mpro.1, 0);
    add_version(&mut buf, b"apro", apro.0, apro.1, 0);
    add_int(&mut buf, b"mstm", 1800);
    add_string(&mut buf, b"minm", name);
    add_byte(
        &mut buf,
        b"msau",
        if state.config.password.is_some() { 2 } else { 0 },
    );
    add_byte(&mut buf, b"msex", 0);
    add_byte(&mut buf, b"msix", 0);
    add_byte(&mut buf, b"msbr", 0);
    add_byte(&mut buf, b"msqy", 0);
    add_byte(&mut buf, b"msup", 0);
    add_int(&mut buf, b"msdc", 1);

    daap_response(buf, &params)
}

/// GET /content-codes : vidage du registre des tags
pub(crate) async fn content_codes(RawQuery(raw): RawQuery) -> Response {
    let params = Params::parse(raw.as_deref());

    let inner: u32 = 12
        + TAGS
            .iter()
            .map(|info| 8 + 12 + 10 + 8 + info.description.len() as u32)
            .sum::<u32>();

    let mut buf = Vec::with_capacity(inner as usize + 8);
    add_container(&mut buf, b"mccr", inner);
    add_int(&mut buf, b"mstt", 200);

    for info in TAGS {
        let entry_len = (12 + 10 + 8 + info.description.len()) as u32;
        add_container(&mut buf, b"mdcl", entry_len);
        add_string(
            &mut buf,
            b"mcnm",
            std::str::from_utf8(info.tag).unwrap_or("????"),
        );
        add_string(&mut buf, b"mcna", info.description);
        add_short(&mut buf, b"mcty", info.kind.code() as i16);
    }

    daap_response(buf, &params)
}

/// GET /login : alloue une session
pub(crate) async fn login(
    State(state): State<Arc<DaapState>>,
    RawQuery(raw): RawQuery,
) -> Response {
    let params = Params::parse(raw.as_deref());
    let session = state.next_session();
    debug!(session, "New DAAP session");

    let mut buf = Vec::with_capacity(32);
    add_container(&mut buf, b"mlog", 24);
    add_int(&mut buf, b"mstt", 200);
    add_int(&mut buf, b"mlid", session);

    daap_response(buf, &params)
}

/// GET /logout
pub(crate) async fn logout(RawQuery(raw): RawQuery) -> Response {
    let params = Params::parse(raw.as_deref());
    debug!(session = params.session_id(), "DAAP session closed");
    StatusCode::NO_CONTENT.into_response()
}

/// GET /update : long-poll sur le compteur de révision.
///
/// Tant que la révision du client égale la nôtre, l'attente se suspend sur le
/// canal de révision, revérifiée toutes les 30 s ; la déconnexion du client
/// abandonne l'attente (la futur est lâchée).
pub(crate) async fn update(
    State(state): State<Arc<DaapState>>,
    RawQuery(raw): RawQuery,
) -> Response {
    let params = Params::parse(raw.as_deref());
    let client_revision = params.revision_number();
    let mut revisions = state.catalog.subscribe();

    let current = loop {
        let current = *revisions.borrow();
        if current != client_revision {
            break current;
        }
        match tokio::time::timeout(Duration::from_secs(30), revisions.changed()).await {
            Ok(Ok(())) => continue,
            Ok(Err(_)) => break *revisions.borrow(), // catalogue parti
            Err(_) => continue,                      // délai : revérifie
        }
    };

    let mut buf = Vec::with_capacity(32);
    add_container(&mut buf, b"mupd", 24);
    add_int(&mut buf, b"mstt", 200);
    add_int(&mut buf, b"musr", current as i32);

    daap_response(buf, &params)
}

/// GET /databases et /databases/{id} : l'unique base et ses comptes
pub(crate) async fn databases(
    State(state): State<Arc<DaapState>>,
    RawQuery(raw): RawQuery,
) -> std::result::Result<Response, DaapError> {
    let params = Params::parse(raw.as_deref());
    let name = &state.config.server_name;

    let songs = state.catalog.count(CountKind::Songs)?;
    let playlists = state.catalog.count(CountKind::Playlists)?;

    let mut buf = Vec::with_capacity(128 + name.len());
    add_container(&mut buf, b"avdb", (105 + name.len()) as u32);
    add_int(&mut buf, b"mstt", 200);
    add_byte(&mut buf, b"muty", 0);
    add_int(&mut buf, b"mtco", 1);
    add_int(&mut buf, b"mrco", 1);
    add_container(&mut buf, b"mlcl", (52 + name.len()) as u32);
    add_container(&mut buf, b"mlit", (44 + name.len()) as u32);
    add_int(&mut buf, b"miid", 1);
    add_string(&mut buf, b"minm", name);
    add_int(&mut buf, b"mimc", songs as i32);
    add_int(&mut buf, b"mctc", playlists as i32);

    Ok(daap_response(buf, &params))
}

/// GET /databases/{id}/items : morceaux filtrés et projetés
pub(crate) async fn items(
    State(state): State<Arc<DaapState>>,
    Path(_db_id): Path<i64>,
    RawQuery(raw): RawQuery,
) -> std::result::Result<Response, DaapError> {
    let params = Params::parse(raw.as_deref());
    let desc = descriptor(&state, &params, QueryType::Items, MetaBits::all());

    let bytes = run_listing(
        &state,
        desc,
        Envelope {
            root: b"adbs",
            listing: b"mlcl",
            with_muty: true,
        },
    )?;
    Ok(daap_response(bytes, &params))
}

/// GET /databases/{id}/containers : listes de lecture
pub(crate) async fn playlists(
    State(state): State<Arc<DaapState>>,
    Path(_db_id): Path<i64>,
    RawQuery(raw): RawQuery,
) -> std::result::Result<Response, DaapError> {
    let params = Params::parse(raw.as_deref());
    let desc = descriptor(&state, &params, QueryType::Playlists, MetaBits::all());

    let bytes = run_listing(
        &state,
        desc,
        Envelope {
            root: b"aply",
            listing: b"mlcl",
            with_muty: true,
        },
    )?;
    Ok(daap_response(bytes, &params))
}

/// GET /databases/{id}/containers/{pid}/items : contenu d'une liste
pub(crate) async fn playlist_items(
    State(state): State<Arc<DaapState>>,
    Path((_db_id, playlist_id)): Path<(i64, i64)>,
    RawQuery(raw): RawQuery,
) -> std::result::Result<Response, DaapError> {
    let params = Params::parse(raw.as_deref());

    let default_meta = MetaBits::none()
        .with(MetaField::ItemId)
        .with(MetaField::ItemName)
        .with(MetaField::ItemKind)
        .with(MetaField::ContainerItemId)
        .with(MetaField::ParentContainerId);

    let mut desc = descriptor(&state, &params, QueryType::PlaylistItems, default_meta);
    desc.playlist_id = playlist_id;

    let bytes = run_listing(
        &state,
        desc,
        Envelope {
            root: b"apso",
            listing: b"mlcl",
            with_muty: true,
        },
    )?;
    Ok(daap_response(bytes, &params))
}

/// GET /databases/{id}/browse/{axis} : index de navigation
pub(crate) async fn browse(
    State(state): State<Arc<DaapState>>,
    Path((_db_id, axis)): Path<(i64, String)>,
    RawQuery(raw): RawQuery,
) -> std::result::Result<Response, DaapError> {
    let params = Params::parse(raw.as_deref());

    let (query_type, listing): (QueryType, &'static [u8; 4]) = match axis.as_str() {
        "artists" => (QueryType::BrowseArtists, b"abar"),
        "albums" => (QueryType::BrowseAlbums, b"abal"),
        "genres" => (QueryType::BrowseGenres, b"abgn"),
        "composers" => (QueryType::BrowseComposers, b"abcp"),
        _ => return Err(DaapError::NotFound),
    };

    let desc = descriptor(&state, &params, query_type, MetaBits::all());

    let bytes = run_listing(
        &state,
        desc,
        Envelope {
            root: b"abro",
            listing,
            with_muty: false,
        },
    )?;
    Ok(daap_response(bytes, &params))
}

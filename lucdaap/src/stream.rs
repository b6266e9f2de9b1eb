//! Le pipeline de diffusion d'un morceau.
//!
//! 1. Le morceau est retrouvé par identifiant (404 s'il manque).
//! 2. Selon le codec et la configuration, le fichier est servi tel quel ou à
//!    travers le transcodeur (producteur de WAV recevant chemin, offset de
//!    départ et durée annoncée).
//! 3. Un en-tête `Range: bytes=<offset>-` déclenche une reprise : seek pour
//!    un fichier direct, offset passé au transcodeur sinon.
//! 4. Pour un flux direct, une pochette trouvée dans le répertoire du
//!    morceau est insérée dans les premières trames (mp3/m4a) ; pour m4a la
//!    comptabilité d'offset est rebasée de `taille + 24`.
//! 5. Copie en boucle jusqu'à épuisement de la source ou erreur du puits.

use crate::params::Params;
use crate::state::DaapState;
use crate::{DaapError, SERVER_VERSION};
use axum::body::Body;
use axum::extract::{Path as UrlPath, RawQuery, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use luccatalog::Song;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncSeekExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// Décode `Range: bytes=<offset>-` ; seule la borne basse est honorée
pub(crate) fn parse_range(headers: &HeaderMap) -> u64 {
    let Some(value) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) else {
        return 0;
    };
    let Some(rest) = value.strip_prefix("bytes=") else {
        return 0;
    };
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// Ligne de commande du transcodeur : programme configuré, puis chemin,
/// offset en octets et durée `secondes.millis`
pub fn transcoder_args(command: &str, path: &str, offset: u64, len_ms: u32) -> Vec<String> {
    let mut args = lucutils::makeargv(command, " \t");
    args.push(path.to_string());
    args.push(offset.to_string());
    args.push(format!("{}.{:03}", len_ms / 1000, len_ms % 1000));
    args
}

/// Fichier de pochette dans le répertoire du morceau, si configuré
fn art_path_for(state: &DaapState, song_path: &Path) -> Option<PathBuf> {
    let art_filename = state.config.art_filename.as_ref()?;
    let candidate = song_path.parent()?.join(art_filename);
    if candidate.is_file() {
        Some(candidate)
    } else {
        None
    }
}

fn audio_headers(song: &Song) -> [(header::HeaderName, String); 3] {
    let content_type = match song.format.as_deref() {
        Some(fmt) => format!("audio/{fmt}"),
        None => "application/octet-stream".to_string(),
    };
    [
        (header::CONTENT_TYPE, content_type),
        (header::CONNECTION, "close".to_string()),
        (header::ACCEPT_RANGES, "bytes".to_string()),
    ]
}

/// GET /databases/{id}/items/{sid}.{ext}
pub(crate) async fn stream_song(
    State(state): State<Arc<DaapState>>,
    UrlPath((_db_id, file)): UrlPath<(i64, String)>,
    headers: HeaderMap,
    RawQuery(raw): RawQuery,
) -> std::result::Result<Response, DaapError> {
    let params = Params::parse(raw.as_deref());

    let song_id: i64 = file
        .split('.')
        .next()
        .and_then(|id| id.parse().ok())
        .ok_or(DaapError::NotFound)?;

    let song = state.catalog.fetch_item(song_id)?;
    let offset = parse_range(&headers);

    info!(
        session = params.session_id(),
        song = %song.fname,
        offset,
        "Streaming file"
    );

    if state.will_transcode(song.codectype.as_deref()) {
        stream_transcoded(&state, &song, offset).await
    } else {
        stream_direct(&state, &song, offset).await
    }
}

/// Flux transcodé : le convertisseur reçoit l'offset et la durée, sa sortie
/// est copiée telle quelle. Pas de Content-Length, la taille convertie n'est
/// pas connue d'avance.
async fn stream_transcoded(
    state: &DaapState,
    song: &Song,
    offset: u64,
) -> std::result::Result<Response, DaapError> {
    let command = state
        .config
        .transcode_command
        .as_deref()
        .ok_or(DaapError::NotFound)?;

    let args = transcoder_args(command, &song.path, offset, song.song_length.max(0) as u32);
    debug!(?args, "Launching transcoder");

    let mut child = tokio::process::Command::new(&args[0])
        .args(&args[1..])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| {
            warn!(error = %e, command = %args[0], "Could not launch transcoder");
            DaapError::NotFound
        })?;

    let stdout = child.stdout.take().ok_or_else(|| {
        DaapError::Assembly("transcoder has no stdout".to_string())
    })?;

    let mut builder = Response::builder();
    for (key, value) in audio_headers(song) {
        builder = builder.header(key, value);
    }
    builder = builder.header("DAAP-Server", SERVER_VERSION);

    let builder = if offset == 0 {
        builder.status(StatusCode::OK)
    } else {
        builder
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_RANGE, format!("bytes {offset}-*/*"))
    };

    builder
        .body(Body::from_stream(ReaderStream::new(stdout)))
        .map_err(|e| DaapError::Assembly(e.to_string()))
}

/// Flux direct : seek à l'offset, Content-Length exact, pochette insérée en
/// tête pour mp3/m4a quand un fichier de pochette est présent
async fn stream_direct(
    state: &DaapState,
    song: &Song,
    mut offset: u64,
) -> std::result::Result<Response, DaapError> {
    let mut media = tokio::fs::File::open(&song.path).await.map_err(|e| {
        warn!(path = %song.path, error = %e, "Could not open song file");
        DaapError::NotFound
    })?;

    let mut real_len = media
        .metadata()
        .await
        .map_err(DaapError::Io)?
        .len();
    let resume = offset > 0;

    // Ajustement pour la pochette insérée : le flux annoncé est plus long
    // que le fichier, et un offset client se rebase dans le flux ajusté
    let format = song.format.as_deref().unwrap_or("");
    let spliceable = matches!(format, "mp3" | "m4a");
    let art = if spliceable {
        art_path_for(state, Path::new(&song.path)).zip(state.art_splicer.as_ref())
    } else {
        None
    };

    if let Some((art_path, splicer)) = &art {
        let art_len = std::fs::metadata(art_path).map_err(DaapError::Io)?.len();
        let added = splicer.added_len(format, art_len);
        if format == "m4a" {
            real_len += added;
            if offset > added {
                offset -= added;
            }
        }
    }

    let file_len = real_len.saturating_sub(offset);

    let mut builder = Response::builder();
    for (key, value) in audio_headers(song) {
        builder = builder.header(key, value);
    }
    builder = builder
        .header("DAAP-Server", SERVER_VERSION)
        .header(header::CONTENT_LENGTH, file_len);

    let builder = if offset == 0 {
        builder.status(StatusCode::OK)
    } else {
        // la borne haute historique dépasse d'un octet ; les clients s'en
        // servent pour sonder la fin de flux, elle est préservée telle quelle
        builder.status(StatusCode::PARTIAL_CONTENT).header(
            header::CONTENT_RANGE,
            format!("bytes {offset}-{real_len}/{}", real_len + 1),
        )
    };

    // l'insertion de pochette ne se fait qu'en début de flux ; une reprise
    // repart du fichier brut à l'offset rebasé
    let body = match &art {
        Some((art_path, splicer)) if !resume => {
            debug!(art = %art_path.display(), song = %song.fname, "Dynamic add artwork");
            let reader = splicer
                .splice(art_path, Path::new(&song.path), 0, format)
                .map_err(DaapError::Io)?;
            Body::from_stream(ReaderStream::new(reader))
        }
        _ => {
            if offset > 0 {
                media
                    .seek(SeekFrom::Start(offset))
                    .await
                    .map_err(DaapError::Io)?;
            }
            Body::from_stream(ReaderStream::new(media))
        }
    };

    builder
        .body(body)
        .map_err(|e| DaapError::Assembly(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DaapConfig;
    use luccatalog::Catalog;

    fn header_map(range: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(range) = range {
            headers.insert(header::RANGE, range.parse().unwrap());
        }
        headers
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range(&header_map(None)), 0);
        assert_eq!(parse_range(&header_map(Some("bytes=100-"))), 100);
        assert_eq!(parse_range(&header_map(Some("bytes=0-"))), 0);
        assert_eq!(parse_range(&header_map(Some("bogus"))), 0);
    }

    #[test]
    fn test_transcoder_args() {
        let args = transcoder_args("wavstreamer -o -", "/m/a.ogg", 1024, 204_500);
        assert_eq!(
            args,
            vec!["wavstreamer", "-o", "-", "/m/a.ogg", "1024", "204.500"]
        );
    }

    fn state_with_song(dir: &tempfile::TempDir, bytes: &[u8]) -> (Arc<DaapState>, i64) {
        let media_path = dir.path().join("a.mp3");
        std::fs::write(&media_path, bytes).unwrap();

        let catalog = Catalog::open(dir.path().join("songs.db"), false).unwrap();
        let song = Song {
            path: media_path.to_string_lossy().into_owned(),
            fname: "a.mp3".into(),
            title: Some("A".into()),
            format: Some("mp3".into()),
            codectype: Some("mpeg".into()),
            song_length: 1_000,
            file_size: bytes.len() as i64,
            ..Song::default()
        };
        let id = catalog.add(&song).unwrap();
        let state = DaapState::new(
            catalog,
            DaapConfig {
                server_name: "Salon".into(),
                ..Default::default()
            },
        );
        (Arc::new(state), id)
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        let mut body = response.into_body().into_data_stream();
        let mut out = Vec::new();
        use futures::StreamExt;
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_direct_stream_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let payload: Vec<u8> = (0..=255u8).collect();
        let (state, id) = state_with_song(&dir, &payload);
        let song = state.catalog.fetch_item(id).unwrap();

        let response = stream_direct(&state, &song, 0).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_LENGTH)
                .unwrap()
                .to_str()
                .unwrap(),
            "256"
        );
        assert_eq!(body_bytes(response).await, payload);
    }

    #[tokio::test]
    async fn test_range_resume_delivers_from_offset() {
        let dir = tempfile::tempdir().unwrap();
        let payload: Vec<u8> = (0..=255u8).collect();
        let (state, id) = state_with_song(&dir, &payload);
        let song = state.catalog.fetch_item(id).unwrap();

        let response = stream_direct(&state, &song, 100).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);

        // borne haute historique : longueur réelle, total réel + 1
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_RANGE)
                .unwrap()
                .to_str()
                .unwrap(),
            "bytes 100-256/257"
        );

        let body = body_bytes(response).await;
        assert_eq!(body.len(), 156);
        assert_eq!(body[0], 100);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (state, id) = state_with_song(&dir, b"x");
        let song = state.catalog.fetch_item(id).unwrap();
        std::fs::remove_file(&song.path).unwrap();

        let err = stream_direct(&state, &song, 0).await.unwrap_err();
        assert!(matches!(err, DaapError::NotFound));
    }

    #[tokio::test]
    async fn test_unknown_song_id() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state_with_song(&dir, b"x");
        assert!(state.catalog.fetch_item(999).is_err());
    }

    struct PrependSplicer;

    impl crate::ArtSplicer for PrependSplicer {
        fn added_len(&self, _kind: &str, art_len: u64) -> u64 {
            art_len + 24
        }

        fn splice(
            &self,
            art_path: &Path,
            media_path: &Path,
            offset: u64,
            _kind: &str,
        ) -> std::io::Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>> {
            // mutateur de test : pochette devant le média, offset dans le
            // flux combiné
            let mut combined = std::fs::read(art_path)?;
            combined.extend_from_slice(&std::fs::read(media_path)?);
            let combined = combined.split_off((offset as usize).min(combined.len()));
            Ok(Box::new(std::io::Cursor::new(combined)))
        }
    }

    #[tokio::test]
    async fn test_art_splice_adjusts_m4a_length() {
        let dir = tempfile::tempdir().unwrap();
        let payload = vec![7u8; 100];
        std::fs::write(dir.path().join("cover.jpg"), vec![1u8; 50]).unwrap();

        let media_path = dir.path().join("a.m4a");
        std::fs::write(&media_path, &payload).unwrap();

        let catalog = Catalog::open(dir.path().join("songs.db"), false).unwrap();
        let song = Song {
            path: media_path.to_string_lossy().into_owned(),
            fname: "a.m4a".into(),
            format: Some("m4a".into()),
            codectype: Some("mp4a".into()),
            file_size: 100,
            ..Song::default()
        };
        let id = catalog.add(&song).unwrap();

        let state = DaapState::new(
            catalog,
            DaapConfig {
                server_name: "Salon".into(),
                art_filename: Some("cover.jpg".into()),
                ..Default::default()
            },
        )
        .with_art_splicer(Arc::new(PrependSplicer));
        let state = Arc::new(state);

        let song = state.catalog.fetch_item(id).unwrap();
        let response = stream_direct(&state, &song, 0).await.unwrap();

        // 100 octets de média + 50 de pochette + 24 d'en-tête de trame
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_LENGTH)
                .unwrap()
                .to_str()
                .unwrap(),
            "174"
        );
    }
}

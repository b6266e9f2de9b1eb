//! Assemblage des réponses : enveloppes DMAP en deux passes, branche XML.

use crate::params::Params;
use crate::state::DaapState;
use crate::{DaapError, Result, SERVER_VERSION};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use luccatalog::QueryDescriptor;
use lucdmap::codec::{add_byte, add_container, add_int};
use lucdmap::xml::XmlRenderer;
use tracing::{debug, error};

/// Forme de l'enveloppe externe d'une réponse de liste.
///
/// Les réponses de morceaux et de listes portent `mstt, muty, mtco, mrco`
/// puis un conteneur `mlcl` ; la navigation omet `muty` et type son conteneur
/// par axe (`abar`, `abal`, `abgn`, `abcp`).
pub(crate) struct Envelope {
    pub root: &'static [u8; 4],
    pub listing: &'static [u8; 4],
    pub with_muty: bool,
}

impl Envelope {
    /// Octets fixes entre la racine et le conteneur de liste
    fn fixed_len(&self) -> u32 {
        // mstt 12 + mtco 12 + mrco 12 + enveloppe de liste 8 (+ muty 9)
        if self.with_muty { 53 } else { 44 }
    }

    /// Écrit l'enveloppe ; retourne le nombre d'octets émis
    fn emit(&self, buf: &mut Vec<u8>, count: u32, list_len: u32) -> usize {
        let mut written = 0;
        written += add_container(buf, self.root, self.fixed_len() + list_len);
        written += add_int(buf, b"mstt", 200);
        if self.with_muty {
            written += add_byte(buf, b"muty", 0);
        }
        written += add_int(buf, b"mtco", count as i32);
        written += add_int(buf, b"mrco", count as i32);
        written += add_container(buf, self.listing, list_len);
        written
    }
}

/// Déroule une énumération complète : taille, enveloppe, émission.
///
/// Le dimensionnement est contractuel : si les octets émis ne correspondent
/// pas à la taille annoncée, la réponse est abandonnée plutôt qu'envoyée
/// fausse (les clients consomment le Content-Length sans tolérance).
pub(crate) fn run_listing(
    state: &DaapState,
    desc: QueryDescriptor,
    envelope: Envelope,
) -> Result<Vec<u8>> {
    let cursor = state.catalog.enum_begin(desc)?;

    let (count, list_len) = match cursor.size() {
        Ok(size) => size,
        Err(e) => {
            let _ = cursor.end();
            return Err(e.into());
        }
    };

    debug!(count, list_len, "Enumeration sized");

    let mut buf = Vec::with_capacity(list_len as usize + 64);
    let header_len = envelope.emit(&mut buf, count, list_len);

    loop {
        let block = match cursor.fetch() {
            Ok(block) => block,
            Err(e) => {
                let _ = cursor.end();
                return Err(e.into());
            }
        };
        if block.is_empty() {
            break;
        }
        buf.extend_from_slice(&block);
    }
    cursor.end()?;

    let expected = header_len + list_len as usize;
    if buf.len() != expected {
        error!(
            expected,
            got = buf.len(),
            "Sizing pass mismatch, dropping response"
        );
        return Err(DaapError::Assembly(format!(
            "sized {expected} bytes, emitted {}",
            buf.len()
        )));
    }

    Ok(buf)
}

/// Transforme les octets DMAP en réponse HTTP, en basculant sur XML si le
/// client l'a demandé. La branche XML force la fermeture de connexion.
pub(crate) fn daap_response(bytes: Vec<u8>, params: &Params) -> Response {
    match params.xml_output() {
        None => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/x-dmap-tagged"),
                (header::ACCEPT_RANGES, "bytes"),
                (header::HeaderName::from_static("daap-server"), SERVER_VERSION),
            ],
            bytes,
        )
            .into_response(),
        Some(readable) => {
            let mut renderer = XmlRenderer::new(readable);
            let xml = renderer
                .write(&bytes)
                .and_then(|_| renderer.finish())
                .unwrap_or_else(|e| {
                    error!(error = %e, "XML rendering failed");
                    String::new()
                });
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/xml"),
                    (header::CONNECTION, "close"),
                    (header::HeaderName::from_static("daap-server"), SERVER_VERSION),
                ],
                xml,
            )
                .into_response()
        }
    }
}

impl IntoResponse for DaapError {
    fn into_response(self) -> Response {
        use luccatalog::CatalogError;

        let status = match &self {
            DaapError::NotFound => StatusCode::NOT_FOUND,
            DaapError::Catalog(
                CatalogError::InvalidPlaylist(_)
                | CatalogError::InvalidSongId(_)
                | CatalogError::Parse(_),
            ) => StatusCode::NOT_FOUND,
            DaapError::Catalog(CatalogError::DuplicatePlaylist(_)) => StatusCode::CONFLICT,
            DaapError::Catalog(CatalogError::NoClause | CatalogError::InvalidType) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "Request failed");
        }

        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_fixed_lengths() {
        let mut buf = Vec::new();
        let envelope = Envelope {
            root: b"adbs",
            listing: b"mlcl",
            with_muty: true,
        };
        let written = envelope.emit(&mut buf, 3, 100);
        assert_eq!(written, buf.len());
        assert_eq!(written, 61);

        let mut buf = Vec::new();
        let envelope = Envelope {
            root: b"abro",
            listing: b"abar",
            with_muty: false,
        };
        assert_eq!(envelope.emit(&mut buf, 3, 100), 52);
    }

    #[test]
    fn test_envelope_declares_inner_size() {
        let mut buf = Vec::new();
        let envelope = Envelope {
            root: b"adbs",
            listing: b"mlcl",
            with_muty: true,
        };
        envelope.emit(&mut buf, 2, 40);

        // la racine annonce 53 + liste, la liste annonce sa taille
        let declared = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        assert_eq!(declared, 93);
        let tail = &buf[buf.len() - 8..];
        assert_eq!(&tail[..4], b"mlcl");
        assert_eq!(u32::from_be_bytes([tail[4], tail[5], tail[6], tail[7]]), 40);
    }
}

//! Écriture et décodage des éléments DMAP.
//!
//! Les fonctions `add_*` sérialisent un champ typé à la fin d'un tampon et
//! retournent le nombre d'octets écrits, ce qui permet au code appelant de
//! vérifier l'exactitude du dimensionnement en deux passes.

use crate::tags::{DmapType, lookup_tag};

/// Erreurs du codec DMAP
#[derive(Debug, thiserror::Error)]
pub enum DmapError {
    #[error("Truncated DMAP block: {0} bytes left, 8 needed for an envelope")]
    Truncated(usize),

    #[error("DMAP payload overruns block: tag {tag}, declared {declared}, available {available}")]
    Overrun {
        tag: String,
        declared: usize,
        available: usize,
    },

    #[error("Unknown DMAP tag: {0}")]
    UnknownTag(String),

    #[error("Bad payload size for tag {tag}: got {got}, wanted {wanted}")]
    BadSize { tag: String, got: usize, wanted: usize },

    #[error("Invalid UTF-8 in string payload of tag {0}")]
    BadUtf8(String),
}

fn put_envelope(buf: &mut Vec<u8>, tag: &[u8; 4], len: u32) {
    buf.extend_from_slice(tag);
    buf.extend_from_slice(&len.to_be_bytes());
}

/// Champ octet signé (type 0x01)
pub fn add_byte(buf: &mut Vec<u8>, tag: &[u8; 4], value: i8) -> usize {
    put_envelope(buf, tag, 1);
    buf.push(value as u8);
    9
}

/// Champ short big-endian (type 0x03)
pub fn add_short(buf: &mut Vec<u8>, tag: &[u8; 4], value: i16) -> usize {
    put_envelope(buf, tag, 2);
    buf.extend_from_slice(&value.to_be_bytes());
    10
}

/// Champ int big-endian (type 0x05) ; sert aussi aux dates (0x0A)
pub fn add_int(buf: &mut Vec<u8>, tag: &[u8; 4], value: i32) -> usize {
    put_envelope(buf, tag, 4);
    buf.extend_from_slice(&value.to_be_bytes());
    12
}

/// Champ long big-endian (type 0x07)
pub fn add_long(buf: &mut Vec<u8>, tag: &[u8; 4], value: i64) -> usize {
    put_envelope(buf, tag, 8);
    buf.extend_from_slice(&value.to_be_bytes());
    16
}

/// Champ chaîne UTF-8 (type 0x09), non terminée par un nul
pub fn add_string(buf: &mut Vec<u8>, tag: &[u8; 4], value: &str) -> usize {
    put_envelope(buf, tag, value.len() as u32);
    buf.extend_from_slice(value.as_bytes());
    8 + value.len()
}

/// Charge brute de longueur fixe (codes codec sur 4 octets, etc.)
pub fn add_literal(buf: &mut Vec<u8>, tag: &[u8; 4], value: &[u8], len: usize) -> usize {
    put_envelope(buf, tag, len as u32);
    let mut payload = value.to_vec();
    payload.resize(len, 0);
    buf.extend_from_slice(&payload);
    8 + len
}

/// Enveloppe de conteneur (type 0x0C) ; les enfants sont écrits à la suite
pub fn add_container(buf: &mut Vec<u8>, tag: &[u8; 4], inner_len: u32) -> usize {
    put_envelope(buf, tag, inner_len);
    8
}

/// Version empaquetée major.minor.patch (type 0x0B)
pub fn add_version(buf: &mut Vec<u8>, tag: &[u8; 4], major: u16, minor: u8, patch: u8) -> usize {
    put_envelope(buf, tag, 4);
    buf.extend_from_slice(&major.to_be_bytes());
    buf.push(minor);
    buf.push(patch);
    12
}

/// Valeur DMAP décodée
#[derive(Debug, Clone, PartialEq)]
pub enum DmapValue {
    Byte(i8),
    UByte(u8),
    Short(i16),
    Int(i32),
    Long(i64),
    Date(i32),
    Str(String),
    Version(u16, u8, u8),
    Container(Vec<([u8; 4], DmapValue)>),
}

/// Décode le prochain élément d'un bloc : `(tag, type, charge, reste)`.
///
/// La charge retournée est une tranche du bloc d'entrée ; pour un conteneur
/// elle contient la concaténation brute des enfants.
pub fn decode_next(buf: &[u8]) -> crate::Result<([u8; 4], DmapType, &[u8], &[u8])> {
    if buf.len() < 8 {
        return Err(DmapError::Truncated(buf.len()));
    }

    let mut tag = [0u8; 4];
    tag.copy_from_slice(&buf[..4]);
    let len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;

    let info = lookup_tag(&tag)
        .ok_or_else(|| DmapError::UnknownTag(String::from_utf8_lossy(&tag).into_owned()))?;

    if buf.len() - 8 < len {
        return Err(DmapError::Overrun {
            tag: String::from_utf8_lossy(&tag).into_owned(),
            declared: len,
            available: buf.len() - 8,
        });
    }

    Ok((tag, info.kind, &buf[8..8 + len], &buf[8 + len..]))
}

fn check_size(tag: &[u8; 4], payload: &[u8], wanted: usize) -> crate::Result<()> {
    if payload.len() != wanted {
        return Err(DmapError::BadSize {
            tag: String::from_utf8_lossy(tag).into_owned(),
            got: payload.len(),
            wanted,
        });
    }
    Ok(())
}

fn decode_value(tag: &[u8; 4], kind: DmapType, payload: &[u8]) -> crate::Result<DmapValue> {
    Ok(match kind {
        DmapType::Byte => {
            check_size(tag, payload, 1)?;
            DmapValue::Byte(payload[0] as i8)
        }
        DmapType::UByte => {
            check_size(tag, payload, 1)?;
            DmapValue::UByte(payload[0])
        }
        DmapType::Short => {
            check_size(tag, payload, 2)?;
            DmapValue::Short(i16::from_be_bytes([payload[0], payload[1]]))
        }
        DmapType::Int => {
            // ascd transporte quatre caractères de codec dans un int
            check_size(tag, payload, 4)?;
            DmapValue::Int(i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]))
        }
        DmapType::Date => {
            check_size(tag, payload, 4)?;
            DmapValue::Date(i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]))
        }
        DmapType::Long => {
            check_size(tag, payload, 8)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(payload);
            DmapValue::Long(i64::from_be_bytes(raw))
        }
        DmapType::Str => DmapValue::Str(
            std::str::from_utf8(payload)
                .map_err(|_| DmapError::BadUtf8(String::from_utf8_lossy(tag).into_owned()))?
                .to_string(),
        ),
        DmapType::Version => {
            check_size(tag, payload, 4)?;
            DmapValue::Version(
                u16::from_be_bytes([payload[0], payload[1]]),
                payload[2],
                payload[3],
            )
        }
        DmapType::Container => DmapValue::Container(decode_all(payload)?),
    })
}

/// Décode récursivement un bloc complet en arbre de valeurs
pub fn decode_all(mut buf: &[u8]) -> crate::Result<Vec<([u8; 4], DmapValue)>> {
    let mut out = Vec::new();
    while !buf.is_empty() {
        let (tag, kind, payload, rest) = decode_next(buf)?;
        out.push((tag, decode_value(&tag, kind, payload)?));
        buf = rest;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_int_layout() {
        let mut buf = Vec::new();
        assert_eq!(add_int(&mut buf, b"mstt", 200), 12);
        assert_eq!(&buf[..4], b"mstt");
        assert_eq!(&buf[4..8], &[0, 0, 0, 4]);
        assert_eq!(&buf[8..], &[0, 0, 0, 200]);
    }

    #[test]
    fn test_add_string_not_nul_terminated() {
        let mut buf = Vec::new();
        assert_eq!(add_string(&mut buf, b"minm", "abc"), 11);
        assert_eq!(&buf[4..8], &[0, 0, 0, 3]);
        assert_eq!(&buf[8..], b"abc");
    }

    #[test]
    fn test_roundtrip_tree() {
        // Un mlit typique : encode puis décode, structure et feuilles égales
        let mut inner = Vec::new();
        add_int(&mut inner, b"miid", 7);
        add_string(&mut inner, b"minm", "Chanson d'été");
        add_short(&mut inner, b"asyr", 1997);
        add_byte(&mut inner, b"asdb", 1);
        add_long(&mut inner, b"mper", 0x1122334455667788);

        let mut buf = Vec::new();
        add_container(&mut buf, b"mlit", inner.len() as u32);
        buf.extend_from_slice(&inner);

        let tree = decode_all(&buf).unwrap();
        assert_eq!(tree.len(), 1);
        let (tag, value) = &tree[0];
        assert_eq!(tag, b"mlit");
        let DmapValue::Container(children) = value else {
            panic!("expected container");
        };
        assert_eq!(children[0], (*b"miid", DmapValue::Int(7)));
        assert_eq!(children[1], (*b"minm", DmapValue::Str("Chanson d'été".into())));
        assert_eq!(children[2], (*b"asyr", DmapValue::Short(1997)));
        assert_eq!(children[3], (*b"asdb", DmapValue::Byte(1)));
        assert_eq!(children[4], (*b"mper", DmapValue::Long(0x1122334455667788)));
    }

    #[test]
    fn test_decode_truncated() {
        assert!(matches!(decode_next(&[0x6d, 0x73]), Err(DmapError::Truncated(2))));
    }

    #[test]
    fn test_decode_overrun() {
        let mut buf = Vec::new();
        add_int(&mut buf, b"mstt", 200);
        buf.truncate(10);
        assert!(matches!(decode_next(&buf), Err(DmapError::Overrun { .. })));
    }

    #[test]
    fn test_decode_unknown_tag() {
        let mut buf = b"zzzz".to_vec();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        assert!(matches!(decode_next(&buf), Err(DmapError::UnknownTag(_))));
    }

    #[test]
    fn test_add_version() {
        let mut buf = Vec::new();
        assert_eq!(add_version(&mut buf, b"mpro", 2, 0, 0), 12);
        let tree = decode_all(&buf).unwrap();
        assert_eq!(tree[0].1, DmapValue::Version(2, 0, 0));
    }

    #[test]
    fn test_add_literal_pads_to_len() {
        let mut buf = Vec::new();
        assert_eq!(add_literal(&mut buf, b"ascd", b"ogg", 4), 12);
        assert_eq!(&buf[8..], &[b'o', b'g', b'g', 0]);
    }
}

//! Noms DNS : suites d'étiquettes préfixées par leur longueur.
//!
//! Une étiquette fait 1 à 63 octets ; un nom complet tient dans 255 octets,
//! terminateur compris. Au décodage, un pointeur de compression doit viser un
//! offset strictement antérieur et tomber sur un octet de longueur : un
//! pointeur vers un pointeur invalide le nom. À l'encodage, la compression ne
//! référence que des noms déjà écrits dans le même message.

use crate::{MdnsError, Result};
use std::collections::HashMap;
use std::fmt;

pub const MAX_LABEL: usize = 63;
pub const MAX_NAME: usize = 255;

/// Un nom DNS (sans l'étiquette racine)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DnsName {
    labels: Vec<Vec<u8>>,
}

impl DnsName {
    /// Construit depuis une forme texte (`salon._daap._tcp.local`).
    ///
    /// Les échappements `\.`, `\\` et `\DDD` sont acceptés.
    pub fn parse_text(text: &str) -> Result<Self> {
        let mut labels = Vec::new();
        let mut current: Vec<u8> = Vec::new();
        let mut bytes = text.bytes();

        while let Some(b) = bytes.next() {
            match b {
                b'.' => {
                    if !current.is_empty() {
                        labels.push(std::mem::take(&mut current));
                    }
                }
                b'\\' => match bytes.next() {
                    Some(d @ b'0'..=b'9') => {
                        let d2 = bytes.next().ok_or(MdnsError::BadName)?;
                        let d3 = bytes.next().ok_or(MdnsError::BadName)?;
                        if !d2.is_ascii_digit() || !d3.is_ascii_digit() {
                            return Err(MdnsError::BadName);
                        }
                        let value = (d - b'0') as u32 * 100
                            + (d2 - b'0') as u32 * 10
                            + (d3 - b'0') as u32;
                        if value > 255 {
                            return Err(MdnsError::BadName);
                        }
                        current.push(value as u8);
                    }
                    Some(escaped) => current.push(escaped),
                    None => return Err(MdnsError::BadName),
                },
                _ => current.push(b),
            }
        }
        if !current.is_empty() {
            labels.push(current);
        }

        let name = DnsName { labels };
        name.check()?;
        Ok(name)
    }

    pub fn from_labels(labels: Vec<Vec<u8>>) -> Result<Self> {
        let name = DnsName { labels };
        name.check()?;
        Ok(name)
    }

    fn check(&self) -> Result<()> {
        let mut total = 1; // étiquette racine
        for label in &self.labels {
            if label.is_empty() || label.len() > MAX_LABEL {
                return Err(MdnsError::BadName);
            }
            total += 1 + label.len();
        }
        if total > MAX_NAME {
            return Err(MdnsError::BadName);
        }
        Ok(())
    }

    pub fn labels(&self) -> &[Vec<u8>] {
        &self.labels
    }

    /// Première étiquette (le nom d'instance d'un service)
    pub fn first_label(&self) -> Option<&[u8]> {
        self.labels.first().map(|l| l.as_slice())
    }

    /// Remplace la première étiquette
    pub fn set_first_label(&mut self, label: Vec<u8>) -> Result<()> {
        if self.labels.is_empty() {
            return Err(MdnsError::BadName);
        }
        self.labels[0] = label;
        self.check()
    }

    /// Ajoute un suffixe (ex. instance + type de service)
    pub fn join(&self, suffix: &DnsName) -> Result<Self> {
        let mut labels = self.labels.clone();
        labels.extend(suffix.labels.iter().cloned());
        Self::from_labels(labels)
    }

    /// Égalité DNS (insensible à la casse ASCII)
    pub fn equal_ignore_case(&self, other: &DnsName) -> bool {
        self.labels.len() == other.labels.len()
            && self
                .labels
                .iter()
                .zip(&other.labels)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }

    /// Clef de compression : étiquettes en minuscules jointes par des points
    fn compression_key(labels: &[Vec<u8>]) -> Vec<u8> {
        let mut key = Vec::new();
        for label in labels {
            key.extend(label.iter().map(|b| b.to_ascii_lowercase()));
            key.push(b'.');
        }
        key
    }

    /// Encode dans `buf`, avec compression vers les noms déjà écrits.
    ///
    /// `offsets` associe un suffixe de nom à l'offset où il a été écrit.
    pub fn emit(&self, buf: &mut Vec<u8>, offsets: &mut HashMap<Vec<u8>, u16>) {
        for i in 0..self.labels.len() {
            let key = Self::compression_key(&self.labels[i..]);
            if let Some(&offset) = offsets.get(&key) {
                buf.push(0xC0 | ((offset >> 8) as u8 & 0x3F));
                buf.push(offset as u8);
                return;
            }
            if buf.len() <= 0x3FFF {
                offsets.insert(key, buf.len() as u16);
            }
            let label = &self.labels[i];
            buf.push(label.len() as u8);
            buf.extend_from_slice(label);
        }
        buf.push(0);
    }

    /// Encodage sans compression (comparaison de rdata, calculs de taille)
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut offsets = HashMap::new();
        // tampon neuf : aucune occasion de compresser
        self.emit(&mut buf, &mut offsets);
        buf
    }

    /// Décode un nom à la position `pos` du message.
    ///
    /// Retourne le nom et la position après sa représentation (après le
    /// premier pointeur rencontré, le cas échéant).
    pub fn decode(message: &[u8], pos: usize) -> Result<(Self, usize)> {
        let mut labels = Vec::new();
        let mut cursor = pos;
        let mut end_after: Option<usize> = None;
        let mut followed_pointer = false;
        let mut total = 1;

        loop {
            let len = *message.get(cursor).ok_or(MdnsError::BadName)? as usize;

            match len & 0xC0 {
                0x00 => {
                    if len == 0 {
                        let end = end_after.unwrap_or(cursor + 1);
                        let name = DnsName { labels };
                        name.check()?;
                        return Ok((name, end));
                    }
                    total += 1 + len;
                    if total > MAX_NAME {
                        return Err(MdnsError::BadName);
                    }
                    let label = message
                        .get(cursor + 1..cursor + 1 + len)
                        .ok_or(MdnsError::BadName)?;
                    labels.push(label.to_vec());
                    cursor += 1 + len;
                }
                0xC0 => {
                    // une seule indirection, strictement vers l'arrière
                    if followed_pointer {
                        return Err(MdnsError::BadName);
                    }
                    let low = *message.get(cursor + 1).ok_or(MdnsError::BadName)? as usize;
                    let target = ((len & 0x3F) << 8) | low;
                    if target >= cursor {
                        return Err(MdnsError::BadName);
                    }
                    let landing = *message.get(target).ok_or(MdnsError::BadName)?;
                    if landing & 0xC0 != 0 {
                        return Err(MdnsError::BadName);
                    }
                    end_after = Some(cursor + 2);
                    followed_pointer = true;
                    cursor = target;
                }
                _ => return Err(MdnsError::BadName),
            }
        }
    }
}

impl fmt::Display for DnsName {
    /// Forme texte avec échappement des points et des octets non imprimables
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, label) in self.labels.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            for &b in label {
                match b {
                    b'.' => write!(f, "\\.")?,
                    b'\\' => write!(f, "\\\\")?,
                    0x20..=0x7E => write!(f, "{}", b as char)?,
                    _ => write!(f, "\\{b:03}")?,
                }
            }
        }
        Ok(())
    }
}

/// Renomme une étiquette après un conflit : « Salon » devient « Salon2 »,
/// « Salon2 » devient « Salon3 », etc.
pub fn increment_label_suffix(label: &[u8]) -> Vec<u8> {
    let mut stem_end = label.len();
    let mut value: u64 = 0;
    let mut multiplier: u64 = 1;

    while stem_end > 0 && label[stem_end - 1].is_ascii_digit() {
        value += (label[stem_end - 1] - b'0') as u64 * multiplier;
        multiplier *= 10;
        stem_end -= 1;
    }

    let value = if multiplier > 1 && value < 999_999 {
        value + 1
    } else {
        2
    };

    let digits = value.to_string();
    let mut out = label[..stem_end].to_vec();
    out.truncate(MAX_LABEL - digits.len());
    out.extend_from_slice(digits.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let name = DnsName::parse_text("salon._daap._tcp.local").unwrap();
        assert_eq!(name.labels().len(), 4);
        assert_eq!(name.to_string(), "salon._daap._tcp.local");
    }

    #[test]
    fn test_escaped_dot_in_label() {
        let name = DnsName::parse_text("a\\.b.local").unwrap();
        assert_eq!(name.labels().len(), 2);
        assert_eq!(name.labels()[0], b"a.b");
        assert_eq!(name.to_string(), "a\\.b.local");
    }

    #[test]
    fn test_oversized_label_rejected() {
        let long = "x".repeat(64);
        assert!(DnsName::parse_text(&format!("{long}.local")).is_err());
    }

    #[test]
    fn test_oversized_name_rejected() {
        let label = "x".repeat(60);
        let parts = vec![label.as_str(); 5].join(".");
        assert!(DnsName::parse_text(&parts).is_err());
    }

    #[test]
    fn test_wire_roundtrip() {
        let name = DnsName::parse_text("salon._daap._tcp.local").unwrap();
        let wire = name.to_wire();
        let (decoded, end) = DnsName::decode(&wire, 0).unwrap();
        assert!(decoded.equal_ignore_case(&name));
        assert_eq!(end, wire.len());
    }

    #[test]
    fn test_compression_roundtrip() {
        let a = DnsName::parse_text("_daap._tcp.local").unwrap();
        let b = DnsName::parse_text("salon._daap._tcp.local").unwrap();

        let mut buf = Vec::new();
        let mut offsets = HashMap::new();
        a.emit(&mut buf, &mut offsets);
        let b_start = buf.len();
        b.emit(&mut buf, &mut offsets);

        // le second nom pointe vers le premier
        assert!(buf.len() < b_start + b.to_wire().len());

        let (da, _) = DnsName::decode(&buf, 0).unwrap();
        let (db, _) = DnsName::decode(&buf, b_start).unwrap();
        assert!(da.equal_ignore_case(&a));
        assert!(db.equal_ignore_case(&b));
    }

    #[test]
    fn test_forward_pointer_rejected() {
        // pointeur vers l'offset 4, situé après lui-même
        let buf = [0xC0, 0x04, 0x00, 0x00, 0x01, b'a', 0x00];
        assert!(DnsName::decode(&buf, 0).is_err());
    }

    #[test]
    fn test_pointer_to_pointer_rejected() {
        // offset 0 : pointeur ; offset 4 : pointeur vers 0
        let mut buf = vec![0xC0, 0x02, 0x01, b'a'];
        buf.push(0x00);
        let start = buf.len();
        buf.extend_from_slice(&[0xC0, 0x00]);
        assert!(DnsName::decode(&buf, start).is_err());
    }

    #[test]
    fn test_bad_length_byte_rejected() {
        // 0x80 : type d'étiquette réservé
        let buf = [0x80, 0x00];
        assert!(DnsName::decode(&buf, 0).is_err());
    }

    #[test]
    fn test_case_insensitive_equality() {
        let a = DnsName::parse_text("Salon.LOCAL").unwrap();
        let b = DnsName::parse_text("salon.local").unwrap();
        assert!(a.equal_ignore_case(&b));
    }

    #[test]
    fn test_increment_label_suffix() {
        assert_eq!(increment_label_suffix(b"Salon"), b"Salon2");
        assert_eq!(increment_label_suffix(b"Salon2"), b"Salon3");
        assert_eq!(increment_label_suffix(b"Salon9"), b"Salon10");
        assert_eq!(increment_label_suffix(b"Disco1999999"), b"Disco2");
    }
}

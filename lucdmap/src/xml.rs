//! Rendu XML d'un flux DMAP (`output=xml` / `output=readable`).
//!
//! Le sérialiseur consomme les mêmes blocs DMAP que la sortie binaire : il
//! marche sur les éléments émis, empile les conteneurs ouverts et referme
//! chaque balise quand son compte d'octets tombe à zéro. Dans une réponse de
//! navigation (`abro`), `mlit` transporte une chaîne nue et est rendu comme
//! du texte, pas comme un conteneur.

use crate::codec::DmapError;
use crate::tags::{DmapType, lookup_tag};

/// Échappement des entités XML
pub fn xml_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '>' => out.push_str("&gt;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '&' => out.push_str("&amp;"),
            _ => out.push(c),
        }
    }
    out
}

struct OpenContainer {
    description: &'static str,
    bytes_left: i64,
}

/// Sérialiseur XML incrémental pour blocs DMAP
pub struct XmlRenderer {
    readable: bool,
    browse_response: bool,
    stack: Vec<OpenContainer>,
    out: String,
}

impl XmlRenderer {
    pub fn new(readable: bool) -> Self {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>");
        if readable {
            out.push('\n');
        }
        XmlRenderer {
            readable,
            browse_response: false,
            stack: Vec::new(),
            out,
        }
    }

    fn indent(&mut self) {
        if self.readable {
            for _ in 0..self.stack.len() {
                self.out.push(' ');
            }
        }
    }

    fn newline(&mut self) {
        if self.readable {
            self.out.push('\n');
        }
    }

    /// Consomme un bloc de données DMAP complet (enveloppes entières)
    pub fn write(&mut self, block: &[u8]) -> crate::Result<()> {
        let mut current = block;

        while !current.is_empty() {
            if current.len() < 8 {
                return Err(DmapError::Truncated(current.len()));
            }

            let mut tag = [0u8; 4];
            tag.copy_from_slice(&current[..4]);
            let declared =
                u32::from_be_bytes([current[4], current[5], current[6], current[7]]) as usize;
            let data = &current[8..];

            if &tag == b"abro" {
                // les mlit d'une réponse browse sont des chaînes
                self.browse_response = true;
            }

            let info = lookup_tag(&tag)
                .ok_or_else(|| DmapError::UnknownTag(String::from_utf8_lossy(&tag).into_owned()))?;

            let browse_string = self.browse_response && &tag == b"mlit";
            let consumed: usize;

            if info.kind == DmapType::Container && !browse_string {
                // Conteneur : on empile, les enfants suivent dans le flux.
                // bytes_left compte l'enveloppe en plus pour que la soustraction
                // commune ci-dessous tombe juste.
                self.indent();
                self.out.push('<');
                self.out.push_str(info.description);
                self.out.push('>');
                self.newline();
                self.stack.push(OpenContainer {
                    description: info.description,
                    bytes_left: declared as i64 + 8,
                });
                consumed = 8;
            } else {
                if data.len() < declared {
                    return Err(DmapError::Overrun {
                        tag: String::from_utf8_lossy(&tag).into_owned(),
                        declared,
                        available: data.len(),
                    });
                }
                let payload = &data[..declared];
                self.indent();
                self.out.push('<');
                self.out.push_str(info.description);
                self.out.push('>');
                self.render_leaf(&tag, info.kind, payload, browse_string)?;
                self.out.push_str("</");
                self.out.push_str(info.description);
                self.out.push('>');
                self.newline();
                consumed = 8 + declared;
            }

            current = &current[consumed..];

            // Décompte des conteneurs ouverts ; fermeture quand ils sont pleins
            let mut idx = self.stack.len();
            while idx > 0 {
                idx -= 1;
                self.stack[idx].bytes_left -= consumed as i64;
                if self.stack[idx].bytes_left < 0 {
                    return Err(DmapError::BadSize {
                        tag: self.stack[idx].description.to_string(),
                        got: 0,
                        wanted: 0,
                    });
                }
                if self.stack[idx].bytes_left == 0 {
                    let closed = self.stack.remove(idx);
                    self.indent();
                    self.out.push_str("</");
                    self.out.push_str(closed.description);
                    self.out.push('>');
                    self.newline();
                }
            }
        }

        Ok(())
    }

    fn render_leaf(
        &mut self,
        tag: &[u8; 4],
        kind: DmapType,
        payload: &[u8],
        browse_string: bool,
    ) -> crate::Result<()> {
        use std::fmt::Write;

        let bad = |wanted: usize| DmapError::BadSize {
            tag: String::from_utf8_lossy(tag).into_owned(),
            got: payload.len(),
            wanted,
        };

        if browse_string {
            self.out
                .push_str(&xml_escape(&String::from_utf8_lossy(payload)));
            return Ok(());
        }

        match kind {
            DmapType::Byte => {
                if payload.len() != 1 {
                    return Err(bad(1));
                }
                let _ = write!(self.out, "{}", payload[0] as i8);
            }
            DmapType::UByte => {
                if payload.len() != 1 {
                    return Err(bad(1));
                }
                let _ = write!(self.out, "{}", payload[0]);
            }
            DmapType::Short => {
                if payload.len() != 2 {
                    return Err(bad(2));
                }
                let _ = write!(self.out, "{}", i16::from_be_bytes([payload[0], payload[1]]));
            }
            DmapType::Int | DmapType::Date => {
                if payload.len() != 4 {
                    return Err(bad(4));
                }
                let _ = write!(
                    self.out,
                    "{}",
                    i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
                );
            }
            DmapType::Long => {
                if payload.len() != 8 {
                    return Err(bad(8));
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(payload);
                let _ = write!(self.out, "{}", i64::from_be_bytes(raw));
            }
            DmapType::Str => {
                self.out
                    .push_str(&xml_escape(&String::from_utf8_lossy(payload)));
            }
            DmapType::Version => {
                if payload.len() != 4 {
                    return Err(bad(4));
                }
                let _ = write!(
                    self.out,
                    "{}.{}.{}",
                    u16::from_be_bytes([payload[0], payload[1]]),
                    payload[2],
                    payload[3]
                );
            }
            DmapType::Container => unreachable!("containers handled by caller"),
        }

        Ok(())
    }

    /// Termine le rendu et retourne le document
    pub fn finish(self) -> crate::Result<String> {
        if !self.stack.is_empty() {
            tracing::warn!(open = self.stack.len(), "Badly formed xml, containers left open");
        }
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{add_container, add_int, add_string};

    #[test]
    fn test_xml_escape() {
        assert_eq!(xml_escape("a<b>&'\""), "a&lt;b&gt;&amp;&apos;&quot;");
    }

    #[test]
    fn test_render_simple_container() {
        let mut inner = Vec::new();
        add_int(&mut inner, b"mstt", 200);
        add_int(&mut inner, b"mlid", 42);
        let mut buf = Vec::new();
        add_container(&mut buf, b"mlog", inner.len() as u32);
        buf.extend_from_slice(&inner);

        let mut renderer = XmlRenderer::new(false);
        renderer.write(&buf).unwrap();
        let xml = renderer.finish().unwrap();
        assert!(xml.contains(
            "<dmap.loginresponse><dmap.status>200</dmap.status>\
             <dmap.sessionid>42</dmap.sessionid></dmap.loginresponse>"
        ));
    }

    #[test]
    fn test_browse_mlit_rendered_as_string() {
        let mut listing = Vec::new();
        add_string(&mut listing, b"mlit", "Les Ogres");
        let mut abar = Vec::new();
        add_container(&mut abar, b"abar", listing.len() as u32);
        abar.extend_from_slice(&listing);
        let mut buf = Vec::new();
        add_container(&mut buf, b"abro", abar.len() as u32);
        buf.extend_from_slice(&abar);

        let mut renderer = XmlRenderer::new(false);
        renderer.write(&buf).unwrap();
        let xml = renderer.finish().unwrap();
        assert!(xml.contains("<dmap.listingitem>Les Ogres</dmap.listingitem>"));
    }

    #[test]
    fn test_readable_adds_newlines() {
        let mut buf = Vec::new();
        add_int(&mut buf, b"mstt", 200);
        let mut renderer = XmlRenderer::new(true);
        renderer.write(&buf).unwrap();
        let xml = renderer.finish().unwrap();
        assert!(xml.ends_with("</dmap.status>\n"));
    }

    #[test]
    fn test_incremental_blocks() {
        // L'enveloppe et les enfants arrivent dans des blocs séparés,
        // comme pendant une énumération
        let mut child = Vec::new();
        add_int(&mut child, b"mstt", 200);

        let mut envelope = Vec::new();
        add_container(&mut envelope, b"mupd", child.len() as u32);

        let mut renderer = XmlRenderer::new(false);
        renderer.write(&envelope).unwrap();
        renderer.write(&child).unwrap();
        let xml = renderer.finish().unwrap();
        assert!(xml.contains("</dmap.updateresponse>"));
    }
}

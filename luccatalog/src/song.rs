//! Lignes du catalogue : morceaux et listes de lecture.

use rusqlite::Row;

/// Un morceau tel que livré par le scanner et stocké dans `songs`.
///
/// `path` est unique ; les champs texte sont nettoyés en UTF-8 valide à
/// l'insertion (octets fautifs remplacés par `?`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Song {
    pub id: i64,
    pub path: String,
    pub fname: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub comment: Option<String>,
    /// Étiquette courte de format ("mp3", "m4a", "wav"...) ; colonne `type`
    pub format: Option<String>,
    pub composer: Option<String>,
    pub orchestra: Option<String>,
    pub conductor: Option<String>,
    pub grouping: Option<String>,
    pub url: Option<String>,
    pub bitrate: i32,
    pub samplerate: i32,
    /// Durée en millisecondes
    pub song_length: i32,
    pub file_size: i64,
    pub year: i32,
    pub track: i32,
    pub total_tracks: i32,
    pub disc: i32,
    pub total_discs: i32,
    pub bpm: i32,
    pub compilation: i32,
    pub rating: i32,
    pub play_count: i32,
    pub data_kind: i32,
    pub item_kind: i32,
    pub description: Option<String>,
    pub time_added: i32,
    pub time_modified: i32,
    pub time_played: i32,
    pub db_timestamp: i32,
    pub disabled: i32,
    pub sample_count: i64,
    pub force_update: i32,
    /// Code codec à quatre caractères ("mpeg", "mp4a", "ogg"...)
    pub codectype: Option<String>,
    pub idx: i32,
}

impl Song {
    /// Reconstruit un morceau depuis une ligne `SELECT * FROM songs`
    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Song {
            id: row.get(0)?,
            path: row.get(1)?,
            fname: row.get(2)?,
            title: row.get(3)?,
            artist: row.get(4)?,
            album: row.get(5)?,
            genre: row.get(6)?,
            comment: row.get(7)?,
            format: row.get(8)?,
            composer: row.get(9)?,
            orchestra: row.get(10)?,
            conductor: row.get(11)?,
            grouping: row.get(12)?,
            url: row.get(13)?,
            bitrate: row.get(14)?,
            samplerate: row.get(15)?,
            song_length: row.get(16)?,
            file_size: row.get(17)?,
            year: row.get(18)?,
            track: row.get(19)?,
            total_tracks: row.get(20)?,
            disc: row.get(21)?,
            total_discs: row.get(22)?,
            bpm: row.get(23)?,
            compilation: row.get(24)?,
            rating: row.get(25)?,
            play_count: row.get(26)?,
            data_kind: row.get(27)?,
            item_kind: row.get(28)?,
            description: row.get(29)?,
            time_added: row.get(30)?,
            time_modified: row.get(31)?,
            time_played: row.get(32)?,
            db_timestamp: row.get(33)?,
            disabled: row.get(34)?,
            sample_count: row.get(35)?,
            force_update: row.get(36)?,
            codectype: row.get(37)?,
            idx: row.get(38)?,
        })
    }

    /// Nettoie les champs texte en place ; retourne vrai si un octet a été
    /// remplacé
    pub fn sanitize_utf8(&mut self) -> bool {
        let mut dirty = false;
        for field in [
            &mut self.title,
            &mut self.artist,
            &mut self.album,
            &mut self.genre,
            &mut self.comment,
            &mut self.composer,
            &mut self.orchestra,
            &mut self.conductor,
            &mut self.grouping,
            &mut self.url,
        ] {
            if let Some(value) = field {
                let (clean, changed) = sanitize_utf8_bytes(value.as_bytes());
                if changed {
                    *value = clean;
                    dirty = true;
                }
            }
        }
        dirty
    }
}

/// Valide une suite d'octets : une tête `0xxxxxxx` passe, une tête
/// `110/1110/11110` doit être suivie du bon nombre de continuations
/// `10xxxxxx`. Chaque octet fautif est remplacé par `?`. Retourne la chaîne
/// corrigée et vrai si au moins un octet a été remplacé.
///
/// C'est le point d'entrée du scanner : les étiquettes extraites des fichiers
/// arrivent en octets bruts.
pub fn sanitize_utf8_bytes(bytes: &[u8]) -> (String, bool) {
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut dirty = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b & 0x80 == 0 {
            out.push(b);
            i += 1;
            continue;
        }

        let run = if b & 0xE0 == 0xC0 {
            1
        } else if b & 0xF0 == 0xE0 {
            2
        } else if b & 0xF8 == 0xF0 {
            3
        } else {
            0
        };

        if run == 0 {
            out.push(b'?');
            dirty = true;
            i += 1;
            continue;
        }

        let mut ok = true;
        for k in 1..=run {
            match bytes.get(i + k) {
                Some(c) if c & 0xC0 == 0x80 => {}
                _ => {
                    ok = false;
                    break;
                }
            }
        }

        if ok {
            out.extend_from_slice(&bytes[i..=i + run]);
            i += 1 + run;
        } else {
            out.push(b'?');
            dirty = true;
            i += 1;
        }
    }

    (String::from_utf8_lossy(&out).into_owned(), dirty)
}

/// Types de liste de lecture (valeurs de la colonne `type`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum PlaylistKind {
    /// Statique, entretenue par l'API d'administration
    StaticWeb = 0,
    /// Intelligente : l'appartenance découle de l'expression `query`
    Smart = 1,
    /// Statique, issue d'un fichier m3u
    StaticFile = 2,
    /// Statique, issue d'un export XML
    StaticXml = 3,
}

impl PlaylistKind {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(PlaylistKind::StaticWeb),
            1 => Some(PlaylistKind::Smart),
            2 => Some(PlaylistKind::StaticFile),
            3 => Some(PlaylistKind::StaticXml),
            _ => None,
        }
    }
}

/// Une liste de lecture
#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    pub id: i64,
    pub title: String,
    pub kind: PlaylistKind,
    /// Compte d'éléments mis en cache, recalculé à chaque écriture
    pub items: i32,
    pub query: Option<String>,
    pub db_timestamp: i32,
    pub path: Option<String>,
    pub idx: i32,
}

impl Playlist {
    /// Reconstruit une liste depuis une ligne `SELECT * FROM playlists`
    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let raw_kind: i32 = row.get(2)?;
        Ok(Playlist {
            id: row.get(0)?,
            title: row.get(1)?,
            kind: PlaylistKind::from_i32(raw_kind).unwrap_or(PlaylistKind::StaticWeb),
            items: row.get(3)?,
            query: row.get(4)?,
            db_timestamp: row.get(5)?,
            path: row.get(6)?,
            idx: row.get(7)?,
        })
    }
}

/// Ce que `count` doit compter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountKind {
    Songs,
    Playlists,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_clean_string_untouched() {
        let (clean, dirty) = sanitize_utf8_bytes("Déjà vu, 寿司".as_bytes());
        assert!(!dirty);
        assert_eq!(clean, "Déjà vu, 寿司");
    }

    #[test]
    fn test_sanitize_replaces_stray_continuation() {
        // 0x80 seul n'est pas une tête valide
        let (clean, dirty) = sanitize_utf8_bytes(&[b'a', 0x80, b'b']);
        assert!(dirty);
        assert_eq!(clean, "a?b");
    }

    #[test]
    fn test_sanitize_truncated_sequence() {
        // Tête de séquence à deux octets sans continuation
        let (clean, dirty) = sanitize_utf8_bytes(&[0xC3, b'x']);
        assert!(dirty);
        assert_eq!(clean, "?x");
    }

    #[test]
    fn test_sanitize_invalid_lead_byte() {
        let (clean, dirty) = sanitize_utf8_bytes(&[0xFF, 0xFE]);
        assert!(dirty);
        assert_eq!(clean, "??");
    }

    #[test]
    fn test_song_sanitize_clean_fields() {
        let mut song = Song {
            artist: Some("Les Ogres".into()),
            ..Song::default()
        };
        assert!(!song.sanitize_utf8());
        assert_eq!(song.artist.as_deref(), Some("Les Ogres"));
    }

    #[test]
    fn test_playlist_kind_roundtrip() {
        assert_eq!(PlaylistKind::from_i32(1), Some(PlaylistKind::Smart));
        assert_eq!(PlaylistKind::from_i32(9), None);
    }
}

//! Dimensionnement et émission DMAP par ligne.
//!
//! Le contrat est l'égalité stricte : pour toute ligne et toute projection,
//! `row_size(...) == row_emit(...).len()`. Les clients consomment le
//! Content-Length annoncé sans tolérance ; une borne supérieure ne suffit
//! pas. Les deux fonctions suivent donc la même table de décisions champ par
//! champ.

use crate::descriptor::QueryDescriptor;
use crate::song::{Playlist, PlaylistKind, Song};
use lucdmap::codec::{add_byte, add_container, add_int, add_literal, add_short, add_string};
use lucdmap::{MetaBits, MetaField};

/// Une ligne matérialisée par le curseur d'énumération
#[derive(Debug, Clone)]
pub enum Row {
    Song(Box<Song>),
    Playlist(Playlist),
    /// Valeur distincte d'un axe de navigation (artiste, album...)
    Browse(Option<String>),
}

/// Chaîne émissible : non nulle, et non vide sauf si le descripteur demande
/// les chaînes vides
fn emittable<'a>(value: &'a Option<String>, empty_strings: bool) -> Option<&'a str> {
    match value.as_deref() {
        Some(s) if !s.is_empty() || empty_strings => Some(s),
        _ => None,
    }
}

/// Taille DMAP exacte d'une ligne sous une projection donnée.
///
/// Une ligne de navigation sans valeur pèse zéro octet et n'est pas comptée
/// dans `mtco`.
pub fn row_size(desc: &QueryDescriptor, row: &Row) -> usize {
    match row {
        Row::Browse(value) => match emittable(value, desc.empty_strings) {
            Some(s) => 8 + s.len(),
            None => 0,
        },
        Row::Playlist(pl) => playlist_size(desc.meta, pl),
        Row::Song(song) => song_size(desc, song),
    }
}

/// Émet une ligne complète (conteneur `mlit` compris)
pub fn row_emit(desc: &QueryDescriptor, row: &Row) -> Vec<u8> {
    let mut buf = Vec::new();
    match row {
        Row::Browse(value) => {
            if let Some(s) = emittable(value, desc.empty_strings) {
                add_string(&mut buf, b"mlit", s);
            }
        }
        Row::Playlist(pl) => {
            let total = playlist_size(desc.meta, pl);
            add_container(&mut buf, b"mlit", (total - 8) as u32);
            emit_playlist_fields(&mut buf, desc.meta, pl);
        }
        Row::Song(song) => {
            let total = song_size(desc, song);
            add_container(&mut buf, b"mlit", (total - 8) as u32);
            emit_song_fields(&mut buf, desc, song);
        }
    }
    buf
}

fn playlist_size(meta: MetaBits, pl: &Playlist) -> usize {
    let mut size = 8; // mlit
    size += 12; // mimc, servi qu'on le veuille ou non
    if meta.wants(MetaField::ItemId) {
        size += 12;
    }
    if meta.wants(MetaField::ItunesSmartPlaylist) && pl.kind == PlaylistKind::Smart {
        size += 9;
    }
    if meta.wants(MetaField::ItemName) {
        size += 8 + pl.title.len();
    }
    if pl.kind == PlaylistKind::Smart && meta.wants(MetaField::PlaylistSpec) {
        size += 8 + pl.query.as_deref().unwrap_or("").len();
    }
    if meta.wants(MetaField::PlaylistType) {
        size += 9;
    }
    size
}

fn emit_playlist_fields(buf: &mut Vec<u8>, meta: MetaBits, pl: &Playlist) {
    if meta.wants(MetaField::ItemId) {
        add_int(buf, b"miid", pl.id as i32);
    }
    add_int(buf, b"mimc", pl.items);
    if meta.wants(MetaField::ItunesSmartPlaylist) && pl.kind == PlaylistKind::Smart {
        add_byte(buf, b"aeSP", 1);
    }
    if meta.wants(MetaField::ItemName) {
        add_string(buf, b"minm", &pl.title);
    }
    if pl.kind == PlaylistKind::Smart && meta.wants(MetaField::PlaylistSpec) {
        add_string(buf, b"MSPS", pl.query.as_deref().unwrap_or(""));
    }
    if meta.wants(MetaField::PlaylistType) {
        add_byte(buf, b"MPTY", pl.kind as i32 as i8);
    }
}

/// Le bitrate annoncé pour un flux transcodé : stéréo 16 bits supposé
fn transcode_bitrate(samplerate: i32) -> i16 {
    ((samplerate * 4 * 8) / 1000) as i16
}

fn song_size(desc: &QueryDescriptor, song: &Song) -> usize {
    let meta = desc.meta;
    let empty = desc.empty_strings;
    let transcode = desc.will_transcode(song.codectype.as_deref());
    let mut size = 8; // mlit

    // Champs modifiés par le transcodage : format devient "wav", description
    // "wav audio file", bitrate est estimé depuis le taux d'échantillonnage.
    // La taille de fichier n'est volontairement pas corrigée.

    if meta.wants(MetaField::ItemKind) {
        size += 9;
    }
    if meta.wants(MetaField::SongDataKind) {
        size += 9;
    }
    if let Some(s) = emittable(&song.url, empty) {
        if meta.wants(MetaField::SongDataUrl) {
            size += 8 + s.len();
        }
    }
    if let Some(s) = emittable(&song.album, empty) {
        if meta.wants(MetaField::SongAlbum) {
            size += 8 + s.len();
        }
    }
    if let Some(s) = emittable(&song.artist, empty) {
        if meta.wants(MetaField::SongArtist) {
            size += 8 + s.len();
        }
    }
    if song.bpm != 0 && meta.wants(MetaField::SongBpm) {
        size += 10;
    }
    if meta.wants(MetaField::SongBitRate) {
        if transcode {
            if song.samplerate != 0 {
                size += 10;
            }
        } else if song.bitrate != 0 {
            size += 10;
        }
    }
    if let Some(s) = emittable(&song.comment, empty) {
        if meta.wants(MetaField::SongComment) {
            size += 8 + s.len();
        }
    }
    if song.compilation != 0 && meta.wants(MetaField::SongCompilation) {
        size += 9;
    }
    if let Some(s) = emittable(&song.composer, empty) {
        if meta.wants(MetaField::SongComposer) {
            size += 8 + s.len();
        }
    }
    if let Some(s) = emittable(&song.grouping, empty) {
        if meta.wants(MetaField::SongGrouping) {
            size += 8 + s.len();
        }
    }
    if song.time_added != 0 && meta.wants(MetaField::SongDateAdded) {
        size += 12;
    }
    if song.time_modified != 0 && meta.wants(MetaField::SongDateModified) {
        size += 12;
    }
    if song.total_discs != 0 && meta.wants(MetaField::SongDiscCount) {
        size += 10;
    }
    if song.disc != 0 && meta.wants(MetaField::SongDiscNumber) {
        size += 10;
    }
    if let Some(s) = emittable(&song.genre, empty) {
        if meta.wants(MetaField::SongGenre) {
            size += 8 + s.len();
        }
    }
    if meta.wants(MetaField::ItemId) {
        size += 12;
    }
    if let Some(s) = emittable(&song.format, empty) {
        if meta.wants(MetaField::SongFormat) {
            size += if transcode { 8 + 3 } else { 8 + s.len() };
        }
    }
    if let Some(s) = emittable(&song.description, empty) {
        if meta.wants(MetaField::SongDescription) {
            size += if transcode {
                8 + "wav audio file".len()
            } else {
                8 + s.len()
            };
        }
    }
    if let Some(s) = emittable(&song.title, empty) {
        if meta.wants(MetaField::ItemName) {
            size += 8 + s.len();
        }
    }
    if song.disabled != 0 && meta.wants(MetaField::SongDisabled) {
        size += 9;
    }
    if song.samplerate != 0 && meta.wants(MetaField::SongSampleRate) {
        size += 12;
    }
    if song.file_size != 0 && meta.wants(MetaField::SongSize) {
        size += 12;
    }
    if song.song_length != 0 && meta.wants(MetaField::SongTime) {
        size += 12;
    }
    if song.total_tracks != 0 && meta.wants(MetaField::SongTrackCount) {
        size += 10;
    }
    if song.track != 0 && meta.wants(MetaField::SongTrackNumber) {
        size += 10;
    }
    if song.rating != 0 && meta.wants(MetaField::SongUserRating) {
        size += 9;
    }
    if song.year != 0 && meta.wants(MetaField::SongYear) {
        size += 10;
    }
    if emittable(&song.codectype, empty).is_some() && meta.wants(MetaField::SongCodecType) {
        size += 12;
    }
    if meta.wants(MetaField::ContainerItemId) {
        size += 12;
    }

    size
}

fn emit_song_fields(buf: &mut Vec<u8>, desc: &QueryDescriptor, song: &Song) {
    let meta = desc.meta;
    let empty = desc.empty_strings;
    let transcode = desc.will_transcode(song.codectype.as_deref());

    if meta.wants(MetaField::ItemKind) {
        add_byte(buf, b"mikd", song.item_kind as i8);
    }
    if meta.wants(MetaField::SongDataKind) {
        add_byte(buf, b"asdk", song.data_kind as i8);
    }
    if let Some(s) = emittable(&song.url, empty) {
        if meta.wants(MetaField::SongDataUrl) {
            add_string(buf, b"asul", s);
        }
    }
    if let Some(s) = emittable(&song.album, empty) {
        if meta.wants(MetaField::SongAlbum) {
            add_string(buf, b"asal", s);
        }
    }
    if let Some(s) = emittable(&song.artist, empty) {
        if meta.wants(MetaField::SongArtist) {
            add_string(buf, b"asar", s);
        }
    }
    if song.bpm != 0 && meta.wants(MetaField::SongBpm) {
        add_short(buf, b"asbt", song.bpm as i16);
    }
    if meta.wants(MetaField::SongBitRate) {
        if transcode {
            if song.samplerate != 0 {
                add_short(buf, b"asbr", transcode_bitrate(song.samplerate));
            }
        } else if song.bitrate != 0 {
            add_short(buf, b"asbr", song.bitrate as i16);
        }
    }
    if let Some(s) = emittable(&song.comment, empty) {
        if meta.wants(MetaField::SongComment) {
            add_string(buf, b"ascm", s);
        }
    }
    if song.compilation != 0 && meta.wants(MetaField::SongCompilation) {
        add_byte(buf, b"asco", song.compilation as i8);
    }
    if let Some(s) = emittable(&song.composer, empty) {
        if meta.wants(MetaField::SongComposer) {
            add_string(buf, b"ascp", s);
        }
    }
    if let Some(s) = emittable(&song.grouping, empty) {
        if meta.wants(MetaField::SongGrouping) {
            add_string(buf, b"agrp", s);
        }
    }
    if song.time_added != 0 && meta.wants(MetaField::SongDateAdded) {
        add_int(buf, b"asda", song.time_added);
    }
    if song.time_modified != 0 && meta.wants(MetaField::SongDateModified) {
        add_int(buf, b"asdm", song.time_modified);
    }
    if song.total_discs != 0 && meta.wants(MetaField::SongDiscCount) {
        add_short(buf, b"asdc", song.total_discs as i16);
    }
    if song.disc != 0 && meta.wants(MetaField::SongDiscNumber) {
        add_short(buf, b"asdn", song.disc as i16);
    }
    if let Some(s) = emittable(&song.genre, empty) {
        if meta.wants(MetaField::SongGenre) {
            add_string(buf, b"asgn", s);
        }
    }
    if meta.wants(MetaField::ItemId) {
        add_int(buf, b"miid", song.id as i32);
    }
    if let Some(s) = emittable(&song.format, empty) {
        if meta.wants(MetaField::SongFormat) {
            add_string(buf, b"asfm", if transcode { "wav" } else { s });
        }
    }
    if let Some(s) = emittable(&song.description, empty) {
        if meta.wants(MetaField::SongDescription) {
            add_string(buf, b"asdt", if transcode { "wav audio file" } else { s });
        }
    }
    if let Some(s) = emittable(&song.title, empty) {
        if meta.wants(MetaField::ItemName) {
            add_string(buf, b"minm", s);
        }
    }
    if song.disabled != 0 && meta.wants(MetaField::SongDisabled) {
        add_byte(buf, b"asdb", song.disabled as i8);
    }
    if song.samplerate != 0 && meta.wants(MetaField::SongSampleRate) {
        add_int(buf, b"assr", song.samplerate);
    }
    if song.file_size != 0 && meta.wants(MetaField::SongSize) {
        add_int(buf, b"assz", song.file_size as i32);
    }
    if song.song_length != 0 && meta.wants(MetaField::SongTime) {
        add_int(buf, b"astm", song.song_length);
    }
    if song.total_tracks != 0 && meta.wants(MetaField::SongTrackCount) {
        add_short(buf, b"astc", song.total_tracks as i16);
    }
    if song.track != 0 && meta.wants(MetaField::SongTrackNumber) {
        add_short(buf, b"astn", song.track as i16);
    }
    if song.rating != 0 && meta.wants(MetaField::SongUserRating) {
        add_byte(buf, b"asur", song.rating as i8);
    }
    if song.year != 0 && meta.wants(MetaField::SongYear) {
        add_short(buf, b"asyr", song.year as i16);
    }
    if let Some(s) = emittable(&song.codectype, empty) {
        if meta.wants(MetaField::SongCodecType) {
            add_literal(buf, b"ascd", s.as_bytes(), 4);
        }
    }
    if meta.wants(MetaField::ContainerItemId) {
        add_int(buf, b"mcti", song.id as i32);
    }
}

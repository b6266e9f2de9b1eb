//! Bitmap de projection : quels champs de métadonnées le client veut-il ?
//!
//! Le client envoie une liste de noms DMAP séparés par des virgules dans le
//! paramètre `meta=` ; le serveur la replie en un jeu de bits sur 64 bits.

use tracing::warn;

/// Champs de métadonnées adressables par `meta=` (numéros de bit)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MetaField {
    ItemId = 0,
    ItemName,
    ItemKind,
    PersistentId,
    ContainerItemId,
    ParentContainerId,
    SongAlbum,
    SongArtist,
    SongBitRate,
    SongBpm,
    SongComment,
    SongCompilation,
    SongComposer,
    SongDataKind,
    SongDataUrl,
    SongDateAdded,
    SongDateModified,
    SongDescription,
    SongDisabled,
    SongDiscCount,
    SongDiscNumber,
    SongEqPreset,
    SongFormat,
    SongGenre,
    SongGrouping,
    SongRelativeVolume,
    SongSampleRate,
    SongSize,
    SongStartTime,
    SongStopTime,
    SongTime,
    SongTrackCount,
    SongTrackNumber,
    SongUserRating,
    SongYear,
    SongCodecType,
    SongCodecSubType,
    ItunesNormVolume,
    ItmsSongId,
    ItmsArtistId,
    ItmsPlaylistId,
    ItmsComposerId,
    ItmsGenreId,
    ItmsStorefrontId,
    ItunesSmartPlaylist,
    PlaylistSpec,
    PlaylistType,
}

/// Correspondance nom DMAP → bit
static META_MAP: &[(&str, MetaField)] = &[
    ("dmap.itemid", MetaField::ItemId),
    ("dmap.itemname", MetaField::ItemName),
    ("dmap.itemkind", MetaField::ItemKind),
    ("dmap.persistentid", MetaField::PersistentId),
    ("dmap.containeritemid", MetaField::ContainerItemId),
    ("dmap.parentcontainerid", MetaField::ParentContainerId),
    ("daap.songalbum", MetaField::SongAlbum),
    ("daap.songartist", MetaField::SongArtist),
    ("daap.songbitrate", MetaField::SongBitRate),
    ("daap.songbeatsperminute", MetaField::SongBpm),
    ("daap.songcomment", MetaField::SongComment),
    ("daap.songcompilation", MetaField::SongCompilation),
    ("daap.songcomposer", MetaField::SongComposer),
    ("daap.songdatakind", MetaField::SongDataKind),
    ("daap.songdataurl", MetaField::SongDataUrl),
    ("daap.songdateadded", MetaField::SongDateAdded),
    ("daap.songdatemodified", MetaField::SongDateModified),
    ("daap.songdescription", MetaField::SongDescription),
    ("daap.songdisabled", MetaField::SongDisabled),
    ("daap.songdisccount", MetaField::SongDiscCount),
    ("daap.songdiscnumber", MetaField::SongDiscNumber),
    ("daap.songeqpreset", MetaField::SongEqPreset),
    ("daap.songformat", MetaField::SongFormat),
    ("daap.songgenre", MetaField::SongGenre),
    ("daap.songgrouping", MetaField::SongGrouping),
    ("daap.songrelativevolume", MetaField::SongRelativeVolume),
    ("daap.songsamplerate", MetaField::SongSampleRate),
    ("daap.songsize", MetaField::SongSize),
    ("daap.songstarttime", MetaField::SongStartTime),
    ("daap.songstoptime", MetaField::SongStopTime),
    ("daap.songtime", MetaField::SongTime),
    ("daap.songtrackcount", MetaField::SongTrackCount),
    ("daap.songtracknumber", MetaField::SongTrackNumber),
    ("daap.songuserrating", MetaField::SongUserRating),
    ("daap.songyear", MetaField::SongYear),
    ("daap.songcodectype", MetaField::SongCodecType),
    ("daap.songcodecsubtype", MetaField::SongCodecSubType),
    ("com.apple.itunes.norm-volume", MetaField::ItunesNormVolume),
    ("com.apple.itunes.itms-songid", MetaField::ItmsSongId),
    ("com.apple.itunes.itms-artistid", MetaField::ItmsArtistId),
    ("com.apple.itunes.itms-playlistid", MetaField::ItmsPlaylistId),
    ("com.apple.itunes.itms-composerid", MetaField::ItmsComposerId),
    ("com.apple.itunes.itms-genreid", MetaField::ItmsGenreId),
    ("com.apple.itunes.itms-storefrontid", MetaField::ItmsStorefrontId),
    ("com.apple.itunes.smart-playlist", MetaField::ItunesSmartPlaylist),
    ("org.mt-daapd.smart-playlist-spec", MetaField::PlaylistSpec),
    ("org.mt-daapd.playlist-type", MetaField::PlaylistType),
];

/// Jeu de bits de projection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaBits(pub u64);

impl MetaBits {
    /// Tous les champs
    pub fn all() -> Self {
        MetaBits(u64::MAX)
    }

    /// Aucun champ
    pub fn none() -> Self {
        MetaBits(0)
    }

    /// Construit le bitmap depuis la valeur du paramètre `meta=`.
    ///
    /// Les noms inconnus sont journalisés puis ignorés.
    pub fn from_meta_str(meta: &str) -> Self {
        let mut bits = 0u64;
        for name in meta.split(',').filter(|s| !s.is_empty()) {
            match META_MAP.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
                Some((_, field)) => bits |= 1u64 << (*field as u8),
                None => warn!(name, "Unknown meta code"),
            }
        }
        MetaBits(bits)
    }

    /// Le client veut-il ce champ ?
    pub fn wants(self, field: MetaField) -> bool {
        self.0 & (1u64 << (field as u8)) != 0
    }

    /// Union de deux jeux
    pub fn with(self, field: MetaField) -> Self {
        MetaBits(self.0 | (1u64 << (field as u8)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_meta_str() {
        let bits = MetaBits::from_meta_str("dmap.itemid,dmap.itemname");
        assert!(bits.wants(MetaField::ItemId));
        assert!(bits.wants(MetaField::ItemName));
        assert!(!bits.wants(MetaField::SongArtist));
    }

    #[test]
    fn test_unknown_names_are_skipped() {
        let bits = MetaBits::from_meta_str("dmap.itemid,daap.bogusfield");
        assert!(bits.wants(MetaField::ItemId));
        assert_eq!(bits.0.count_ones(), 1);
    }

    #[test]
    fn test_empty_string_is_empty_set() {
        assert_eq!(MetaBits::from_meta_str("").0, 0);
    }

    #[test]
    fn test_all_wants_everything() {
        let all = MetaBits::all();
        assert!(all.wants(MetaField::PlaylistType));
        assert!(all.wants(MetaField::ItemId));
    }

    #[test]
    fn test_case_insensitive_match() {
        let bits = MetaBits::from_meta_str("DMAP.ItemId");
        assert!(bits.wants(MetaField::ItemId));
    }
}

//! Registre fermé des champs interrogeables.
//!
//! Associe les noms DMAP visibles des clients aux colonnes du catalogue et à
//! leur type. Un nom hors registre fait échouer le parse.

/// Type de la colonne sous-jacente
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    I32,
    I64,
    Str,
}

/// Un champ interrogeable : nom client, colonne, type
#[derive(Debug)]
pub struct QueryField {
    pub ftype: FieldType,
    pub name: &'static str,
    pub column: &'static str,
}

macro_rules! field {
    ($ftype:ident, $name:literal, $column:literal) => {
        QueryField {
            ftype: FieldType::$ftype,
            name: $name,
            column: $column,
        }
    };
}

/// Champs des morceaux
pub static SONG_FIELDS: &[QueryField] = &[
    field!(Str, "dmap.itemname", "title"),
    field!(I32, "dmap.itemid", "id"),
    field!(Str, "daap.songalbum", "album"),
    field!(Str, "daap.songartist", "artist"),
    field!(I32, "daap.songbitrate", "bitrate"),
    field!(Str, "daap.songcomment", "comment"),
    field!(I32, "daap.songcompilation", "compilation"),
    field!(Str, "daap.songcomposer", "composer"),
    field!(I32, "daap.songdatakind", "data_kind"),
    field!(Str, "daap.songdataurl", "url"),
    field!(I32, "daap.songdateadded", "time_added"),
    field!(I32, "daap.songdatemodified", "time_modified"),
    field!(Str, "daap.songdescription", "description"),
    field!(I32, "daap.songdisccount", "total_discs"),
    field!(I32, "daap.songdiscnumber", "disc"),
    field!(Str, "daap.songformat", "type"),
    field!(Str, "daap.songgenre", "genre"),
    field!(I32, "daap.songsamplerate", "samplerate"),
    field!(I32, "daap.songsize", "file_size"),
    field!(I32, "daap.songstoptime", "song_length"),
    field!(I32, "daap.songtime", "song_length"),
    field!(I32, "daap.songtrackcount", "total_tracks"),
    field!(I32, "daap.songtracknumber", "track"),
    field!(I32, "daap.songyear", "year"),
];

/// Alias courts acceptés par la grammaire des listes intelligentes.
///
/// L'interface d'administration historique nomme les champs sans préfixe ;
/// les noms DMAP complets restent acceptés.
pub static SMART_ALIASES: &[(&str, &str)] = &[
    ("title", "dmap.itemname"),
    ("artist", "daap.songartist"),
    ("album", "daap.songalbum"),
    ("genre", "daap.songgenre"),
    ("composer", "daap.songcomposer"),
    ("comment", "daap.songcomment"),
    ("year", "daap.songyear"),
    ("bitrate", "daap.songbitrate"),
    ("track", "daap.songtracknumber"),
    ("format", "daap.songformat"),
];

/// Recherche un champ par nom DMAP (insensible à la casse)
pub fn find_field(name: &str) -> Option<&'static QueryField> {
    SONG_FIELDS
        .iter()
        .find(|f| f.name.eq_ignore_ascii_case(name))
}

/// Recherche un champ par nom DMAP ou alias court
pub fn find_field_or_alias(name: &str) -> Option<&'static QueryField> {
    if let Some(field) = find_field(name) {
        return Some(field);
    }
    SMART_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
        .and_then(|(_, full)| find_field(full))
}

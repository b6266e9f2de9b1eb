//! Descripteur de requête : ce que le répartiteur demande au catalogue.

use lucdmap::MetaBits;
use std::collections::HashSet;

/// Famille de vue demandée
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    /// Morceaux de la base
    Items,
    /// Listes de lecture
    Playlists,
    /// Contenu d'une liste de lecture
    PlaylistItems,
    BrowseArtists,
    BrowseAlbums,
    BrowseGenres,
    BrowseComposers,
}

impl QueryType {
    /// Les vues de navigation renvoient des `mlit` chaîne, pas des conteneurs
    pub fn is_browse(self) -> bool {
        matches!(
            self,
            QueryType::BrowseArtists
                | QueryType::BrowseAlbums
                | QueryType::BrowseGenres
                | QueryType::BrowseComposers
        )
    }
}

/// Tranchage du résultat (paramètre `index=`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexClause {
    #[default]
    None,
    /// Les N premiers
    First(u32),
    /// Les N derniers (nécessite le compte total)
    Last(u32),
    /// Demi-intervalle `[lo, hi)`
    Sub(u32, u32),
}

/// Descripteur construit par le répartiteur pour une requête de vue.
///
/// `filter` est le prédicat déjà abaissé en SQL (grammaire client) ;
/// `transcode_codecs` liste les codecs servis après conversion, dont la passe
/// de dimensionnement doit corriger bitrate, format et description.
#[derive(Debug, Clone)]
pub struct QueryDescriptor {
    pub query_type: QueryType,
    pub index: IndexClause,
    pub playlist_id: i64,
    pub session_id: i32,
    pub filter: Option<String>,
    pub meta: MetaBits,
    /// Émettre aussi les chaînes vides (par défaut elles sont omises)
    pub empty_strings: bool,
    pub transcode_codecs: HashSet<String>,
}

impl QueryDescriptor {
    pub fn new(query_type: QueryType) -> Self {
        QueryDescriptor {
            query_type,
            index: IndexClause::None,
            playlist_id: 0,
            session_id: 0,
            filter: None,
            meta: MetaBits::all(),
            empty_strings: false,
            transcode_codecs: HashSet::new(),
        }
    }

    /// Le morceau sera-t-il transcodé à la diffusion ?
    pub fn will_transcode(&self, codectype: Option<&str>) -> bool {
        match codectype {
            Some(codec) => self.transcode_codecs.contains(codec),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_browse() {
        assert!(QueryType::BrowseGenres.is_browse());
        assert!(!QueryType::Items.is_browse());
    }

    #[test]
    fn test_will_transcode() {
        let mut desc = QueryDescriptor::new(QueryType::Items);
        desc.transcode_codecs.insert("ogg".to_string());
        assert!(desc.will_transcode(Some("ogg")));
        assert!(!desc.will_transcode(Some("mpeg")));
        assert!(!desc.will_transcode(None));
    }
}

//! Paramètres de requête reconnus par la surface DAAP.

use luccatalog::{IndexClause, MetaBits};
use std::collections::HashMap;
use tracing::warn;

/// Paramètres décodés d'une URL DAAP
#[derive(Debug, Default)]
pub struct Params {
    map: HashMap<String, String>,
}

impl Params {
    /// Décode la chaîne de requête brute (`a=1&b=2`)
    pub fn parse(raw: Option<&str>) -> Self {
        let mut map = HashMap::new();
        if let Some(raw) = raw {
            for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
                map.insert(key.into_owned(), value.into_owned());
            }
        }
        Params { map }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// `session-id`, 0 si absent
    pub fn session_id(&self) -> i32 {
        self.get("session-id")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// `revision-number`, 1 si absent (première interrogation d'un client)
    pub fn revision_number(&self) -> u32 {
        self.get("revision-number")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1)
    }

    /// Projection `meta=` ; vide ou absent retombe sur `default`
    pub fn meta(&self, default: MetaBits) -> MetaBits {
        match self.get("meta") {
            Some(meta) if !meta.is_empty() => MetaBits::from_meta_str(meta),
            _ => default,
        }
    }

    /// Sortie XML demandée ? (`output=xml` ou `output=readable`)
    pub fn xml_output(&self) -> Option<bool> {
        match self.get("output") {
            Some(v) if v.eq_ignore_ascii_case("readable") => Some(true),
            Some(_) => Some(false),
            None => None,
        }
    }

    /// Prédicat client `query=` / `filter=`, abaissé en SQL.
    ///
    /// Une expression inanalysable est ignorée (résultat non filtré), avec
    /// une ligne de journal.
    pub fn filter(&self) -> Option<String> {
        let expr = self.get("query").or_else(|| self.get("filter"))?;
        match lucquery::daap::build_sql(expr) {
            Ok(clause) => clause,
            Err(e) => {
                warn!(expr, error = %e, "Unparseable query, ignoring filter");
                None
            }
        }
    }

    /// Tranchage `index=` : `lo-hi` (bornes incluses), `-N` les N derniers,
    /// `N` les N premiers
    pub fn index(&self) -> IndexClause {
        let Some(raw) = self.get("index") else {
            return IndexClause::None;
        };

        if let Some(last) = raw.strip_prefix('-') {
            if let Ok(n) = last.parse() {
                return IndexClause::Last(n);
            }
        } else if let Some((lo, hi)) = raw.split_once('-') {
            if let (Ok(lo), Ok(hi)) = (lo.parse::<u32>(), hi.parse::<u32>()) {
                if hi >= lo {
                    return IndexClause::Sub(lo, hi + 1);
                }
            }
        } else if let Ok(n) = raw.parse() {
            return IndexClause::First(n);
        }

        warn!(raw, "Bad index parameter, ignored");
        IndexClause::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luccatalog::MetaField;

    #[test]
    fn test_basic_parsing() {
        let params = Params::parse(Some("session-id=42&revision-number=7"));
        assert_eq!(params.session_id(), 42);
        assert_eq!(params.revision_number(), 7);
    }

    #[test]
    fn test_defaults() {
        let params = Params::parse(None);
        assert_eq!(params.session_id(), 0);
        assert_eq!(params.revision_number(), 1);
        assert_eq!(params.index(), IndexClause::None);
        assert!(params.xml_output().is_none());
    }

    #[test]
    fn test_meta_falls_back_on_empty() {
        let params = Params::parse(Some("meta="));
        assert_eq!(params.meta(MetaBits::all()), MetaBits::all());

        let params = Params::parse(Some("meta=dmap.itemid"));
        let bits = params.meta(MetaBits::all());
        assert!(bits.wants(MetaField::ItemId));
        assert!(!bits.wants(MetaField::SongArtist));
    }

    #[test]
    fn test_filter_decodes_and_lowers() {
        let params = Params::parse(Some("query=%27daap.songartist%3ABeatles%27"));
        assert_eq!(params.filter().unwrap(), "(artist='Beatles')");
    }

    #[test]
    fn test_bad_filter_is_skipped() {
        let params = Params::parse(Some("query=%27daap.bogus%3Ax%27"));
        assert!(params.filter().is_none());
    }

    #[test]
    fn test_index_forms() {
        assert_eq!(
            Params::parse(Some("index=0-9")).index(),
            IndexClause::Sub(0, 10)
        );
        assert_eq!(Params::parse(Some("index=-5")).index(), IndexClause::Last(5));
        assert_eq!(Params::parse(Some("index=3")).index(), IndexClause::First(3));
        assert_eq!(Params::parse(Some("index=x")).index(), IndexClause::None);
    }

    #[test]
    fn test_output_modes() {
        assert_eq!(Params::parse(Some("output=xml")).xml_output(), Some(false));
        assert_eq!(
            Params::parse(Some("output=readable")).xml_output(),
            Some(true)
        );
    }
}

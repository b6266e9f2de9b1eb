//! Registre statique des content-codes DMAP/DAAP.
//!
//! Chaque tag possède un type et une description ; le tableau est exposé tel
//! quel par l'endpoint `content-codes` (un `mdcl` par entrée).

/// Type de charge d'un élément DMAP (codes numériques du protocole)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum DmapType {
    Byte = 1,
    UByte = 2,
    Short = 3,
    Int = 5,
    Long = 7,
    Str = 9,
    Date = 10,
    Version = 11,
    Container = 12,
}

impl DmapType {
    /// Code numérique émis dans `mcty`
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// Une entrée du registre
#[derive(Debug, Clone, Copy)]
pub struct TagInfo {
    pub tag: &'static [u8; 4],
    pub kind: DmapType,
    pub description: &'static str,
}

macro_rules! tag {
    ($kind:ident, $tag:literal, $descr:literal) => {
        TagInfo {
            tag: $tag,
            kind: DmapType::$kind,
            description: $descr,
        }
    };
}

/// Le registre complet. L'ordre est celui du dump `content-codes`.
pub static TAGS: &[TagInfo] = &[
    tag!(Int, b"miid", "dmap.itemid"),
    tag!(Str, b"minm", "dmap.itemname"),
    tag!(Byte, b"mikd", "dmap.itemkind"),
    tag!(Long, b"mper", "dmap.persistentid"),
    tag!(Container, b"mcon", "dmap.container"),
    tag!(Int, b"mcti", "dmap.containeritemid"),
    tag!(Int, b"mpco", "dmap.parentcontainerid"),
    tag!(Int, b"mstt", "dmap.status"),
    tag!(Str, b"msts", "dmap.statusstring"),
    tag!(Int, b"mimc", "dmap.itemcount"),
    tag!(Int, b"mctc", "dmap.containercount"),
    tag!(Int, b"mrco", "dmap.returnedcount"),
    tag!(Int, b"mtco", "dmap.specifiedtotalcount"),
    tag!(Container, b"mlcl", "dmap.listing"),
    tag!(Container, b"mlit", "dmap.listingitem"),
    tag!(Container, b"mbcl", "dmap.bag"),
    tag!(Container, b"mdcl", "dmap.dictionary"),
    tag!(Container, b"msrv", "dmap.serverinforesponse"),
    tag!(Byte, b"msau", "dmap.authenticationmethod"),
    tag!(Byte, b"mslr", "dmap.loginrequired"),
    tag!(Version, b"mpro", "dmap.protocolversion"),
    tag!(Byte, b"msal", "dmap.supportsautologout"),
    tag!(Byte, b"msup", "dmap.supportsupdate"),
    tag!(Byte, b"mspi", "dmap.supportspersistentids"),
    tag!(Byte, b"msex", "dmap.supportsextensions"),
    tag!(Byte, b"msbr", "dmap.supportsbrowse"),
    tag!(Byte, b"msqy", "dmap.supportsquery"),
    tag!(Byte, b"msix", "dmap.supportsindex"),
    tag!(Byte, b"msrs", "dmap.supportsresolve"),
    tag!(Int, b"mstm", "dmap.timeoutinterval"),
    tag!(Int, b"msdc", "dmap.databasescount"),
    tag!(Container, b"mlog", "dmap.loginresponse"),
    tag!(Int, b"mlid", "dmap.sessionid"),
    tag!(Container, b"mupd", "dmap.updateresponse"),
    tag!(Int, b"musr", "dmap.serverrevision"),
    tag!(Byte, b"muty", "dmap.updatetype"),
    tag!(Container, b"mudl", "dmap.deletedidlisting"),
    tag!(Container, b"mccr", "dmap.contentcodesresponse"),
    tag!(Str, b"mcnm", "dmap.contentcodesnumber"),
    tag!(Str, b"mcna", "dmap.contentcodesname"),
    tag!(Short, b"mcty", "dmap.contentcodestype"),
    tag!(Version, b"apro", "daap.protocolversion"),
    tag!(Container, b"avdb", "daap.serverdatabases"),
    tag!(Container, b"abro", "daap.databasebrowse"),
    tag!(Container, b"abal", "daap.browsealbumlisting"),
    tag!(Container, b"abar", "daap.browseartistlisting"),
    tag!(Container, b"abcp", "daap.browsecomposerlisting"),
    tag!(Container, b"abgn", "daap.browsegenrelisting"),
    tag!(Container, b"adbs", "daap.databasesongs"),
    tag!(Str, b"asal", "daap.songalbum"),
    tag!(Str, b"asar", "daap.songartist"),
    tag!(Short, b"asbt", "daap.songbeatsperminute"),
    tag!(Short, b"asbr", "daap.songbitrate"),
    tag!(Str, b"ascm", "daap.songcomment"),
    tag!(Byte, b"asco", "daap.songcompilation"),
    tag!(Str, b"ascp", "daap.songcomposer"),
    tag!(Date, b"asda", "daap.songdateadded"),
    tag!(Date, b"asdm", "daap.songdatemodified"),
    tag!(Short, b"asdc", "daap.songdisccount"),
    tag!(Short, b"asdn", "daap.songdiscnumber"),
    tag!(Byte, b"asdb", "daap.songdisabled"),
    tag!(Str, b"aseq", "daap.songeqpreset"),
    tag!(Str, b"asfm", "daap.songformat"),
    tag!(Str, b"asgn", "daap.songgenre"),
    tag!(Str, b"asdt", "daap.songdescription"),
    tag!(UByte, b"asrv", "daap.songrelativevolume"),
    tag!(Int, b"assr", "daap.songsamplerate"),
    tag!(Int, b"assz", "daap.songsize"),
    tag!(Int, b"asst", "daap.songstarttime"),
    tag!(Int, b"assp", "daap.songstoptime"),
    tag!(Int, b"astm", "daap.songtime"),
    tag!(Short, b"astc", "daap.songtrackcount"),
    tag!(Short, b"astn", "daap.songtracknumber"),
    tag!(Byte, b"asur", "daap.songuserrating"),
    tag!(Short, b"asyr", "daap.songyear"),
    tag!(Byte, b"asdk", "daap.songdatakind"),
    tag!(Str, b"asul", "daap.songdataurl"),
    tag!(Container, b"aply", "daap.databaseplaylists"),
    tag!(Byte, b"abpl", "daap.baseplaylist"),
    tag!(Container, b"apso", "daap.playlistsongs"),
    tag!(Container, b"arsv", "daap.resolve"),
    tag!(Container, b"arif", "daap.resolveinfo"),
    tag!(Int, b"aeNV", "com.apple.itunes.norm-volume"),
    tag!(Byte, b"aeSP", "com.apple.itunes.smart-playlist"),
    tag!(Byte, b"msas", "dmap.authenticationschemes"),
    tag!(Int, b"ascd", "daap.songcodectype"),
    tag!(Int, b"ascs", "daap.songcodecsubtype"),
    tag!(Str, b"agrp", "daap.songgrouping"),
    tag!(Int, b"aeSV", "com.apple.itunes.music-sharing-version"),
    tag!(Int, b"aePI", "com.apple.itunes.itms-playlistid"),
    tag!(Int, b"aeCI", "com.apple.iTunes.itms-composerid"),
    tag!(Int, b"aeGI", "com.apple.iTunes.itms-genreid"),
    tag!(Int, b"aeAI", "com.apple.iTunes.itms-artistid"),
    tag!(Int, b"aeSI", "com.apple.iTunes.itms-songid"),
    tag!(Int, b"aeSF", "com.apple.iTunes.itms-storefrontid"),
    tag!(Str, b"MSPS", "org.mt-daapd.smart-playlist-spec"),
    tag!(Byte, b"MPTY", "org.mt-daapd.playlist-type"),
    tag!(Container, b"MAPR", "org.mt-daapd.addplaylist"),
    tag!(Container, b"MAPI", "org.mt-daapd.addplaylistitem"),
];

/// Recherche un tag dans le registre
pub fn lookup_tag(tag: &[u8]) -> Option<&'static TagInfo> {
    TAGS.iter().find(|info| info.tag[..] == tag[..4.min(tag.len())])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_tags() {
        assert_eq!(lookup_tag(b"mlit").unwrap().kind, DmapType::Container);
        assert_eq!(lookup_tag(b"minm").unwrap().kind, DmapType::Str);
        assert_eq!(lookup_tag(b"mstt").unwrap().kind, DmapType::Int);
        assert_eq!(lookup_tag(b"asyr").unwrap().kind, DmapType::Short);
    }

    #[test]
    fn test_lookup_unknown_tag() {
        assert!(lookup_tag(b"zzzz").is_none());
    }

    #[test]
    fn test_registry_is_well_formed() {
        // Tags ASCII de 4 octets, descriptions non vides, pas de doublon
        let mut seen = std::collections::HashSet::new();
        for info in TAGS {
            assert!(info.tag.iter().all(|b| b.is_ascii() && *b != 0));
            assert!(!info.description.is_empty());
            assert!(seen.insert(info.tag), "duplicate tag {:?}", info.tag);
        }
    }
}

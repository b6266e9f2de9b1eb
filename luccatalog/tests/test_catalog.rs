use luccatalog::{
    Catalog, CatalogError, CountKind, IndexClause, MetaBits, PlaylistKind, QueryDescriptor,
    QueryType, Song,
};

/// Crée un catalogue temporaire pour les tests
fn create_test_catalog() -> (tempfile::TempDir, Catalog) {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Catalog::open(dir.path().join("songs.db"), false).unwrap();
    (dir, catalog)
}

fn song(path: &str, title: &str, artist: &str, year: i32) -> Song {
    Song {
        path: path.to_string(),
        fname: path.rsplit('/').next().unwrap_or(path).to_string(),
        title: Some(title.to_string()),
        artist: Some(artist.to_string()),
        album: Some("Album".to_string()),
        genre: Some("Rock".to_string()),
        format: Some("mp3".to_string()),
        codectype: Some("mpeg".to_string()),
        bitrate: 192,
        samplerate: 44100,
        song_length: 180_000,
        file_size: 4_000_000,
        year,
        item_kind: 2,
        ..Song::default()
    }
}

#[test]
fn test_open_creates_library_playlist() {
    let (_dir, catalog) = create_test_catalog();
    assert_eq!(catalog.count(CountKind::Playlists).unwrap(), 1);
}

#[test]
fn test_add_and_fetch_song() {
    let (_dir, catalog) = create_test_catalog();
    let id = catalog.add(&song("/m/a.mp3", "A", "X", 1990)).unwrap();

    let fetched = catalog.fetch_item(id).unwrap();
    assert_eq!(fetched.title.as_deref(), Some("A"));
    assert_eq!(fetched.path, "/m/a.mp3");
    assert!(fetched.time_added > 0);
    assert!(fetched.db_timestamp > 0);

    let by_path = catalog.fetch_path("/m/a.mp3").unwrap();
    assert_eq!(by_path.id, id);
}

#[test]
fn test_fetch_unknown_song_is_invalid_songid() {
    let (_dir, catalog) = create_test_catalog();
    assert!(matches!(
        catalog.fetch_item(42),
        Err(CatalogError::InvalidSongId(42))
    ));
}

#[test]
fn test_add_same_path_updates_in_place() {
    let (_dir, catalog) = create_test_catalog();
    let id = catalog.add(&song("/m/a.mp3", "A", "X", 1990)).unwrap();

    let mut changed = song("/m/a.mp3", "A2", "X", 1991);
    changed.bitrate = 320;
    catalog.add(&changed).unwrap();

    assert_eq!(catalog.count(CountKind::Songs).unwrap(), 1);
    let fetched = catalog.fetch_item(id).unwrap();
    assert_eq!(fetched.title.as_deref(), Some("A2"));
    assert_eq!(fetched.bitrate, 320);
    assert_eq!(fetched.year, 1991);
}

#[test]
fn test_revision_increments_on_writes_only() {
    let (_dir, catalog) = create_test_catalog();
    let before = catalog.revision();

    catalog.add(&song("/m/a.mp3", "A", "X", 1990)).unwrap();
    assert_eq!(catalog.revision(), before + 1);

    // Une écriture en échec ne bouge pas la révision
    let failing = catalog.add_playlist("Library", PlaylistKind::Smart, Some("1"), None, 0);
    assert!(failing.is_err());
    assert_eq!(catalog.revision(), before + 1);

    catalog
        .add_playlist("Rock", PlaylistKind::StaticWeb, None, None, 0)
        .unwrap();
    assert_eq!(catalog.revision(), before + 2);
}

#[test]
fn test_playlist_errors() {
    let (_dir, catalog) = create_test_catalog();
    let id = catalog.add(&song("/m/a.mp3", "A", "X", 1990)).unwrap();

    // Doublon (insensible à la casse)
    let rock = catalog
        .add_playlist("Rock", PlaylistKind::StaticWeb, None, None, 0)
        .unwrap();
    assert!(matches!(
        catalog.add_playlist("ROCK", PlaylistKind::StaticWeb, None, None, 0),
        Err(CatalogError::DuplicatePlaylist(_))
    ));

    // Intelligente sans clause
    assert!(matches!(
        catalog.add_playlist("Vide", PlaylistKind::Smart, None, None, 0),
        Err(CatalogError::NoClause)
    ));

    // Clause invalide
    assert!(matches!(
        catalog.add_playlist("Cassée", PlaylistKind::Smart, Some("bogus ==="), None, 0),
        Err(CatalogError::Parse(_))
    ));

    // Ajout d'élément à une liste intelligente
    assert!(matches!(
        catalog.add_playlist_item(1, id),
        Err(CatalogError::InvalidType)
    ));

    // Liste inexistante
    assert!(matches!(
        catalog.add_playlist_item(999, id),
        Err(CatalogError::InvalidPlaylist(999))
    ));

    // Morceau inexistant
    assert!(matches!(
        catalog.add_playlist_item(rock, 999),
        Err(CatalogError::InvalidSongId(999))
    ));
}

#[test]
fn test_static_playlist_items_in_insertion_order() {
    let (_dir, catalog) = create_test_catalog();
    let a = catalog.add(&song("/m/a.mp3", "A", "X", 1990)).unwrap();
    let b = catalog.add(&song("/m/b.mp3", "B", "Y", 1991)).unwrap();
    let c = catalog.add(&song("/m/c.mp3", "C", "Z", 1992)).unwrap();

    let pl = catalog
        .add_playlist("Mix", PlaylistKind::StaticWeb, None, None, 0)
        .unwrap();
    // Insérés dans le désordre volontairement
    catalog.add_playlist_item(pl, c).unwrap();
    catalog.add_playlist_item(pl, a).unwrap();
    catalog.add_playlist_item(pl, b).unwrap();

    let mut desc = QueryDescriptor::new(QueryType::PlaylistItems);
    desc.playlist_id = pl;
    desc.meta = MetaBits::from_meta_str("dmap.itemid");
    let cursor = catalog.enum_begin(desc).unwrap();
    let (count, _) = cursor.size().unwrap();
    assert_eq!(count, 3);

    let mut ids = Vec::new();
    loop {
        let block = cursor.fetch().unwrap();
        if block.is_empty() {
            break;
        }
        let tree = lucdmap::decode_all(&block).unwrap();
        let lucdmap::DmapValue::Container(children) = &tree[0].1 else {
            panic!("expected container");
        };
        let lucdmap::DmapValue::Int(id) = children[0].1 else {
            panic!("expected miid");
        };
        ids.push(id as i64);
    }
    cursor.end().unwrap();

    assert_eq!(ids, vec![c, a, b]);
}

#[test]
fn test_enum_size_matches_emitted_bytes() {
    let (_dir, catalog) = create_test_catalog();
    catalog.add(&song("/m/a.mp3", "A", "X", 1990)).unwrap();
    catalog.add(&song("/m/b.mp3", "Chanson d'été", "Y", 0)).unwrap();

    for meta in [
        MetaBits::all(),
        MetaBits::from_meta_str("dmap.itemid,dmap.itemname"),
        MetaBits::from_meta_str("daap.songartist,daap.songyear"),
    ] {
        let mut desc = QueryDescriptor::new(QueryType::Items);
        desc.meta = meta;
        let cursor = catalog.enum_begin(desc).unwrap();
        let (count, declared) = cursor.size().unwrap();
        assert_eq!(count, 2);

        let mut emitted = 0u32;
        loop {
            let block = cursor.fetch().unwrap();
            if block.is_empty() {
                break;
            }
            emitted += block.len() as u32;
        }
        cursor.end().unwrap();

        assert_eq!(declared, emitted);
    }
}

#[test]
fn test_enum_filter_and_browse() {
    let (_dir, catalog) = create_test_catalog();
    catalog.add(&song("/m/a.mp3", "A", "Beatles", 1965)).unwrap();
    catalog.add(&song("/m/b.mp3", "B", "Beatles", 1967)).unwrap();
    catalog.add(&song("/m/c.mp3", "C", "Kinks", 1966)).unwrap();

    // Filtre client abaissé en SQL
    let mut desc = QueryDescriptor::new(QueryType::Items);
    desc.filter = lucquery::daap::build_sql("'daap.songartist:Beatles'").unwrap();
    let cursor = catalog.enum_begin(desc).unwrap();
    assert_eq!(cursor.size().unwrap().0, 2);
    cursor.end().unwrap();

    // Navigation par artiste : une valeur distincte par artiste
    let desc = QueryDescriptor::new(QueryType::BrowseArtists);
    let cursor = catalog.enum_begin(desc).unwrap();
    let (count, _) = cursor.size().unwrap();
    assert_eq!(count, 2);

    let block = cursor.fetch().unwrap();
    let (tag, kind, payload, _) = lucdmap::decode_next(&block).unwrap();
    assert_eq!(&tag, b"mlit");
    assert_eq!(kind, lucdmap::DmapType::Str);
    assert!(!payload.is_empty());
    cursor.end().unwrap();
}

#[test]
fn test_index_slicing() {
    let (_dir, catalog) = create_test_catalog();
    for i in 0..5 {
        catalog
            .add(&song(&format!("/m/{i}.mp3"), &format!("T{i}"), "X", 1990))
            .unwrap();
    }

    let slice_count = |index: IndexClause| {
        let mut desc = QueryDescriptor::new(QueryType::Items);
        desc.index = index;
        let cursor = catalog.enum_begin(desc).unwrap();
        let count = cursor.size().unwrap().0;
        cursor.end().unwrap();
        count
    };

    assert_eq!(slice_count(IndexClause::None), 5);
    assert_eq!(slice_count(IndexClause::First(2)), 2);
    assert_eq!(slice_count(IndexClause::Last(2)), 2);
    assert_eq!(slice_count(IndexClause::Sub(1, 4)), 3);
    // « les N derniers » avec N >= total se comporte comme « les N premiers »
    assert_eq!(slice_count(IndexClause::Last(10)), 5);
}

#[test]
fn test_smart_playlist_membership_and_count() {
    let (_dir, catalog) = create_test_catalog();
    catalog.add(&song("/m/a.mp3", "A", "Beatles", 1965)).unwrap();
    catalog.add(&song("/m/b.mp3", "B", "Kinks", 1966)).unwrap();

    let pl = catalog
        .add_playlist(
            "Fab",
            PlaylistKind::Smart,
            Some("daap.songartist is \"Beatles\""),
            None,
            0,
        )
        .unwrap();

    let mut desc = QueryDescriptor::new(QueryType::PlaylistItems);
    desc.playlist_id = pl;
    let cursor = catalog.enum_begin(desc).unwrap();
    assert_eq!(cursor.size().unwrap().0, 1);
    cursor.end().unwrap();

    // Le compte en cache est recalculé à l'écriture
    let mut desc = QueryDescriptor::new(QueryType::Playlists);
    desc.meta = MetaBits::from_meta_str("dmap.itemid,dmap.itemname");
    let cursor = catalog.enum_begin(desc).unwrap();
    let mut fab_items = None;
    loop {
        let block = cursor.fetch().unwrap();
        if block.is_empty() {
            break;
        }
        let tree = lucdmap::decode_all(&block).unwrap();
        let lucdmap::DmapValue::Container(children) = &tree[0].1 else {
            panic!("expected container");
        };
        let is_fab = children
            .iter()
            .any(|(t, v)| t == b"minm" && *v == lucdmap::DmapValue::Str("Fab".into()));
        if is_fab {
            let mimc = children.iter().find(|(t, _)| t == b"mimc").unwrap();
            let lucdmap::DmapValue::Int(n) = mimc.1 else {
                panic!("expected int");
            };
            fab_items = Some(n);
        }
    }
    cursor.end().unwrap();
    assert_eq!(fab_items, Some(1));
}

#[test]
fn test_incremental_scan_removes_untouched_songs() {
    let (_dir, catalog) = create_test_catalog();
    catalog.add(&song("/m/a.mp3", "A", "X", 1990)).unwrap();
    catalog.add(&song("/m/b.mp3", "B", "X", 1990)).unwrap();
    catalog.add(&song("/m/c.mp3", "C", "X", 1990)).unwrap();
    assert_eq!(catalog.count(CountKind::Songs).unwrap(), 3);

    // Nouveau scan : seuls a et c sont revus
    catalog.start_scan().unwrap();
    assert!(catalog.scanning());
    catalog.add(&song("/m/a.mp3", "A", "X", 1990)).unwrap();
    catalog.add(&song("/m/c.mp3", "C", "X", 1990)).unwrap();
    catalog.end_song_scan().unwrap();
    catalog.end_scan().unwrap();
    assert!(!catalog.scanning());

    assert_eq!(catalog.count(CountKind::Songs).unwrap(), 2);
    assert!(catalog.fetch_path("/m/b.mp3").is_err());
}

#[test]
fn test_scan_idempotence() {
    let (_dir, catalog) = create_test_catalog();

    let run_scan = |titles: &[(&str, &str)]| {
        catalog.start_scan().unwrap();
        for (path, title) in titles {
            catalog.add(&song(path, title, "X", 1990)).unwrap();
        }
        catalog.end_song_scan().unwrap();
        catalog.end_scan().unwrap();
    };

    let set = [("/m/a.mp3", "A"), ("/m/b.mp3", "B")];
    run_scan(&set);
    let a1 = catalog.fetch_path("/m/a.mp3").unwrap();
    let b1 = catalog.fetch_path("/m/b.mp3").unwrap();

    run_scan(&set);
    let a2 = catalog.fetch_path("/m/a.mp3").unwrap();
    let b2 = catalog.fetch_path("/m/b.mp3").unwrap();

    // Bit-identique au db_timestamp et à time_modified près
    let normalize = |mut s: Song| {
        s.db_timestamp = 0;
        s.time_modified = 0;
        s
    };
    assert_eq!(normalize(a1), normalize(a2));
    assert_eq!(normalize(b1), normalize(b2));
    assert_eq!(catalog.count(CountKind::Songs).unwrap(), 2);
}

#[test]
fn test_update_blocks_behind_open_cursor() {
    let (_dir, catalog) = create_test_catalog();
    catalog.add(&song("/m/a.mp3", "A", "X", 1990)).unwrap();

    let desc = QueryDescriptor::new(QueryType::Items);
    let cursor = catalog.enum_begin(desc).unwrap();
    let (count, _) = cursor.size().unwrap();
    assert_eq!(count, 1);

    // Une écriture soumise pendant l'énumération attend la fermeture
    let writer = {
        let catalog = catalog.clone();
        std::thread::spawn(move || catalog.add(&song("/m/b.mp3", "B", "X", 1990)))
    };

    std::thread::sleep(std::time::Duration::from_millis(50));
    assert!(!writer.is_finished());

    // Le curseur voit toujours l'ensemble figé
    assert_eq!(cursor.size().unwrap().0, 1);
    cursor.end().unwrap();

    writer.join().unwrap().unwrap();
    assert_eq!(catalog.count(CountKind::Songs).unwrap(), 2);
}

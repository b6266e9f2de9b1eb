//! Le fil de travail du catalogue.
//!
//! Le moteur de stockage sous-jacent n'est pas réentrant : toutes les
//! opérations passent par un fil dédié qui possède la connexion. Les
//! appelants soumettent un travail typé sur un canal et bloquent sur le canal
//! de réponse. Pendant une énumération, le fil sert exclusivement le canal du
//! curseur : tout autre travail attend derrière, ce qui empêche l'ensemble de
//! lignes de bouger sous un client qui a déjà reçu l'enveloppe de taille.

use crate::descriptor::{IndexClause, QueryDescriptor, QueryType};
use crate::emit::{Row, row_emit, row_size};
use crate::schema;
use crate::song::{CountKind, Playlist, PlaylistKind, Song};
use crate::{CatalogError, Result};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use rusqlite::{Connection, params};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

pub(crate) type Reply<T> = Sender<Result<T>>;

/// Travaux soumis au fil du catalogue
pub(crate) enum Job {
    AddSong {
        song: Box<Song>,
        reply: Reply<i64>,
    },
    AddPlaylist {
        title: String,
        kind: PlaylistKind,
        clause: Option<String>,
        path: Option<String>,
        index: i32,
        reply: Reply<i64>,
    },
    AddPlaylistItem {
        playlist_id: i64,
        song_id: i64,
        reply: Reply<()>,
    },
    DeletePlaylist {
        playlist_id: i64,
        reply: Reply<()>,
    },
    DeletePlaylistItem {
        playlist_id: i64,
        song_id: i64,
        reply: Reply<()>,
    },
    EditPlaylist {
        playlist_id: i64,
        title: String,
        clause: Option<String>,
        reply: Reply<()>,
    },
    FetchItem {
        id: i64,
        reply: Reply<Song>,
    },
    FetchPath {
        path: String,
        reply: Reply<Song>,
    },
    FetchPlaylist {
        path: String,
        index: i32,
        reply: Reply<Playlist>,
    },
    Count {
        kind: CountKind,
        reply: Reply<u32>,
    },
    StartScan {
        reply: Reply<()>,
    },
    EndSongScan {
        reply: Reply<()>,
    },
    EndScan {
        reply: Reply<()>,
    },
    EnumBegin {
        desc: Box<QueryDescriptor>,
        reply: Reply<Sender<CursorJob>>,
    },
    Close {
        reply: Reply<()>,
    },
}

/// Travaux servis pendant qu'un curseur est ouvert
pub(crate) enum CursorJob {
    /// Balayage complet : (lignes comptées, octets DMAP totaux), puis rembobinage
    Size(Reply<(u32, u32)>),
    /// Ligne suivante encodée en `mlit` ; vide à l'épuisement
    Fetch(Reply<Vec<u8>>),
    Reset(Reply<()>),
    End(Reply<()>),
}

/// Démarre le fil du catalogue ; retourne le canal de soumission une fois la
/// base ouverte, migrée et initialisée.
pub(crate) fn spawn(
    db_path: PathBuf,
    reload: bool,
) -> Result<(Sender<Job>, std::thread::JoinHandle<()>)> {
    let (job_tx, job_rx) = unbounded::<Job>();
    let (ready_tx, ready_rx) = bounded::<Result<()>>(1);

    let handle = std::thread::Builder::new()
        .name("luc-catalog".to_string())
        .spawn(move || {
            let mut worker = match Worker::open(&db_path, reload) {
                Ok(worker) => {
                    let _ = ready_tx.send(Ok(()));
                    worker
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            worker.run(job_rx);
        })
        .map_err(|e| CatalogError::ProcessStart(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok((job_tx, handle)),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(CatalogError::ProcessStart("catalog worker died".into())),
    }
}

struct Worker {
    conn: Connection,
    reload: bool,
    in_scan: bool,
    in_playlist_scan: bool,
}

fn now() -> i32 {
    chrono::Utc::now().timestamp() as i32
}

impl Worker {
    fn open(db_path: &std::path::Path, reload_requested: bool) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // Contention : 10 reprises espacées de 100 µs avant d'abandonner le pas
        conn.busy_handler(Some(|count| {
            if count < 10 {
                std::thread::sleep(Duration::from_micros(100));
                true
            } else {
                false
            }
        }))?;

        // L'index peut manquer si un scan précédent a été interrompu
        let _ = conn.execute("CREATE INDEX idx_path ON songs(path)", []);

        schema::migrate(&conn, db_path)?;

        let rescan_flag: bool = conn
            .query_row(
                "SELECT value FROM config WHERE term='rescan'",
                [],
                |row| row.get::<_, String>(0),
            )
            .map(|v| v == "1")
            .unwrap_or(false);

        let items: u32 =
            conn.query_row("SELECT COUNT(*) FROM songs", [], |row| row.get(0))?;

        let reload = reload_requested || rescan_flag || items == 0;

        if reload {
            info!("Full catalog reload");
            let _ = conn.execute("DROP INDEX idx_path", []);
            conn.execute("DELETE FROM songs", [])?;
        } else {
            conn.execute_batch("VACUUM")?;
        }

        Ok(Worker {
            conn,
            reload,
            in_scan: false,
            in_playlist_scan: false,
        })
    }

    fn run(&mut self, jobs: Receiver<Job>) {
        while let Ok(job) = jobs.recv() {
            match job {
                Job::AddSong { song, reply } => {
                    let _ = reply.send(self.add_song(*song));
                }
                Job::AddPlaylist {
                    title,
                    kind,
                    clause,
                    path,
                    index,
                    reply,
                } => {
                    let _ = reply.send(self.add_playlist(&title, kind, clause, path, index));
                }
                Job::AddPlaylistItem {
                    playlist_id,
                    song_id,
                    reply,
                } => {
                    let _ = reply.send(self.add_playlist_item(playlist_id, song_id));
                }
                Job::DeletePlaylist { playlist_id, reply } => {
                    let _ = reply.send(self.delete_playlist(playlist_id));
                }
                Job::DeletePlaylistItem {
                    playlist_id,
                    song_id,
                    reply,
                } => {
                    let _ = reply.send(self.delete_playlist_item(playlist_id, song_id));
                }
                Job::EditPlaylist {
                    playlist_id,
                    title,
                    clause,
                    reply,
                } => {
                    let _ = reply.send(self.edit_playlist(playlist_id, &title, clause));
                }
                Job::FetchItem { id, reply } => {
                    let _ = reply.send(self.fetch_item(id));
                }
                Job::FetchPath { path, reply } => {
                    let _ = reply.send(self.fetch_path(&path));
                }
                Job::FetchPlaylist { path, index, reply } => {
                    let _ = reply.send(self.fetch_playlist(&path, index));
                }
                Job::Count { kind, reply } => {
                    let _ = reply.send(self.count(kind));
                }
                Job::StartScan { reply } => {
                    let _ = reply.send(self.start_scan());
                }
                Job::EndSongScan { reply } => {
                    let _ = reply.send(self.end_song_scan());
                }
                Job::EndScan { reply } => {
                    let _ = reply.send(self.end_scan());
                }
                Job::EnumBegin { desc, reply } => {
                    self.enum_begin(*desc, reply);
                }
                Job::Close { reply } => {
                    let _ = reply.send(Ok(()));
                    break;
                }
            }
        }
    }

    // ---- Morceaux ----

    fn add_song(&mut self, mut song: Song) -> Result<i64> {
        if song.time_added == 0 {
            song.time_added = now();
        }
        if song.time_modified == 0 {
            song.time_modified = now();
        }
        song.db_timestamp = now();

        if !self.reload {
            let existing: u32 = self.conn.query_row(
                "SELECT COUNT(*) FROM songs WHERE path=?1",
                params![song.path],
                |row| row.get(0),
            )?;
            if existing == 1 {
                return self.update_song(&song);
            }
        }

        self.conn.execute(
            "INSERT INTO songs VALUES (NULL,?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,
             ?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24,?25,0,?26,?27,?28,?29,?30,0,?31,
             ?32,?33,0,?34,?35)",
            params![
                song.path,
                song.fname,
                song.title,
                song.artist,
                song.album,
                song.genre,
                song.comment,
                song.format,
                song.composer,
                song.orchestra,
                song.conductor,
                song.grouping,
                song.url,
                song.bitrate,
                song.samplerate,
                song.song_length,
                song.file_size,
                song.year,
                song.track,
                song.total_tracks,
                song.disc,
                song.total_discs,
                song.bpm,
                song.compilation,
                song.rating,
                song.data_kind,
                song.item_kind,
                song.description,
                song.time_added,
                song.time_modified,
                song.db_timestamp,
                song.disabled,
                song.sample_count,
                song.codectype,
                song.idx,
            ],
        )?;

        let id = self.conn.last_insert_rowid();

        if self.in_scan && !self.reload {
            self.conn
                .execute("INSERT INTO updated VALUES (?1)", params![id])?;
        }
        if !self.in_scan && !self.in_playlist_scan {
            self.update_playlists()?;
        }

        Ok(id)
    }

    fn update_song(&mut self, song: &Song) -> Result<i64> {
        self.conn.execute(
            "UPDATE songs SET title=?1, artist=?2, album=?3, genre=?4, comment=?5,
             type=?6, composer=?7, orchestra=?8, conductor=?9, grouping=?10, url=?11,
             bitrate=?12, samplerate=?13, song_length=?14, file_size=?15, year=?16,
             track=?17, total_tracks=?18, disc=?19, total_discs=?20, time_modified=?21,
             db_timestamp=?22, bpm=?23, disabled=?24, compilation=?25, rating=?26,
             sample_count=?27, codectype=?28 WHERE path=?29",
            params![
                song.title,
                song.artist,
                song.album,
                song.genre,
                song.comment,
                song.format,
                song.composer,
                song.orchestra,
                song.conductor,
                song.grouping,
                song.url,
                song.bitrate,
                song.samplerate,
                song.song_length,
                song.file_size,
                song.year,
                song.track,
                song.total_tracks,
                song.disc,
                song.total_discs,
                song.time_modified,
                song.db_timestamp,
                song.bpm,
                song.disabled,
                song.compilation,
                song.rating,
                song.sample_count,
                song.codectype,
                song.path,
            ],
        )?;

        if self.in_scan && !self.reload {
            self.conn.execute(
                "INSERT INTO updated (id) SELECT id FROM songs WHERE path=?1",
                params![song.path],
            )?;
        }
        if !self.in_scan && !self.in_playlist_scan {
            self.update_playlists()?;
        }

        let id = self.conn.query_row(
            "SELECT id FROM songs WHERE path=?1",
            params![song.path],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn fetch_item(&self, id: i64) -> Result<Song> {
        let song = self
            .conn
            .query_row("SELECT * FROM songs WHERE id=?1", params![id], |row| {
                Song::from_row(row)
            })
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => CatalogError::InvalidSongId(id),
                other => CatalogError::Sql(other),
            })?;

        if self.in_scan && !self.reload {
            self.conn
                .execute("INSERT INTO updated VALUES (?1)", params![id])?;
        }
        Ok(song)
    }

    fn fetch_path(&self, path: &str) -> Result<Song> {
        let song = self
            .conn
            .query_row("SELECT * FROM songs WHERE path=?1", params![path], |row| {
                Song::from_row(row)
            })
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => CatalogError::InvalidSongId(0),
                other => CatalogError::Sql(other),
            })?;

        if self.in_scan && !self.reload {
            self.conn
                .execute("INSERT INTO updated VALUES (?1)", params![song.id])?;
        }
        Ok(song)
    }

    fn fetch_playlist(&self, path: &str, index: i32) -> Result<Playlist> {
        let playlist = self
            .conn
            .query_row(
                "SELECT * FROM playlists WHERE path=?1 AND idx=?2",
                params![path, index],
                |row| Playlist::from_row(row),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => CatalogError::InvalidPlaylist(0),
                other => CatalogError::Sql(other),
            })?;

        if self.in_playlist_scan && !self.reload {
            self.conn
                .execute("INSERT INTO plupdated VALUES (?1)", params![playlist.id])?;
        }
        Ok(playlist)
    }

    fn count(&self, kind: CountKind) -> Result<u32> {
        let sql = match kind {
            CountKind::Songs => "SELECT COUNT(*) FROM songs",
            CountKind::Playlists => "SELECT COUNT(*) FROM playlists",
        };
        Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
    }

    // ---- Listes de lecture ----

    fn add_playlist(
        &mut self,
        title: &str,
        kind: PlaylistKind,
        clause: Option<String>,
        path: Option<String>,
        index: i32,
    ) -> Result<i64> {
        let duplicates: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM playlists WHERE upper(title)=upper(?1)",
            params![title],
            |row| row.get(0),
        )?;
        if duplicates > 0 {
            return Err(CatalogError::DuplicatePlaylist(title.to_string()));
        }

        match kind {
            PlaylistKind::Smart => {
                let clause = clause.ok_or(CatalogError::NoClause)?;
                lucquery::smart::parse(&clause)
                    .map_err(|e| CatalogError::Parse(e.to_string()))?;
                self.conn.execute(
                    "INSERT INTO playlists (title,type,items,query,db_timestamp,idx)
                     VALUES (?1,?2,0,?3,?4,0)",
                    params![title, kind as i32, clause, now()],
                )?;
            }
            PlaylistKind::StaticWeb | PlaylistKind::StaticFile | PlaylistKind::StaticXml => {
                self.conn.execute(
                    "INSERT INTO playlists (title,type,items,query,db_timestamp,path,idx)
                     VALUES (?1,?2,0,NULL,?3,?4,?5)",
                    params![title, kind as i32, now(), path, index],
                )?;
            }
        }

        let id = self.conn.last_insert_rowid();

        if matches!(kind, PlaylistKind::StaticFile | PlaylistKind::StaticXml)
            && self.in_playlist_scan
            && !self.reload
        {
            self.conn
                .execute("INSERT INTO plupdated VALUES (?1)", params![id])?;
        }

        Ok(id)
    }

    fn playlist_kind(&self, playlist_id: i64) -> Result<PlaylistKind> {
        let raw: i32 = self
            .conn
            .query_row(
                "SELECT type FROM playlists WHERE id=?1",
                params![playlist_id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    CatalogError::InvalidPlaylist(playlist_id)
                }
                other => CatalogError::Sql(other),
            })?;
        PlaylistKind::from_i32(raw).ok_or(CatalogError::InvalidType)
    }

    fn add_playlist_item(&mut self, playlist_id: i64, song_id: i64) -> Result<()> {
        if self.playlist_kind(playlist_id)? == PlaylistKind::Smart {
            return Err(CatalogError::InvalidType);
        }

        let songs: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM songs WHERE id=?1",
            params![song_id],
            |row| row.get(0),
        )?;
        if songs == 0 {
            return Err(CatalogError::InvalidSongId(song_id));
        }

        self.conn.execute(
            "INSERT INTO playlistitems (playlistid, songid) VALUES (?1,?2)",
            params![playlist_id, song_id],
        )?;

        if !self.in_scan && !self.in_playlist_scan {
            self.update_playlists()?;
        }
        Ok(())
    }

    fn delete_playlist(&mut self, playlist_id: i64) -> Result<()> {
        self.playlist_kind(playlist_id)?;
        self.conn
            .execute("DELETE FROM playlists WHERE id=?1", params![playlist_id])?;
        self.conn.execute(
            "DELETE FROM playlistitems WHERE playlistid=?1",
            params![playlist_id],
        )?;
        Ok(())
    }

    fn delete_playlist_item(&mut self, playlist_id: i64, song_id: i64) -> Result<()> {
        if self.playlist_kind(playlist_id)? == PlaylistKind::Smart {
            return Err(CatalogError::InvalidType);
        }

        let present: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM playlistitems WHERE playlistid=?1 AND songid=?2",
            params![playlist_id, song_id],
            |row| row.get(0),
        )?;
        if present == 0 {
            return Err(CatalogError::InvalidSongId(song_id));
        }

        self.conn.execute(
            "DELETE FROM playlistitems WHERE playlistid=?1 AND songid=?2",
            params![playlist_id, song_id],
        )?;

        if !self.in_scan && !self.in_playlist_scan {
            self.update_playlists()?;
        }
        Ok(())
    }

    fn edit_playlist(
        &mut self,
        playlist_id: i64,
        title: &str,
        clause: Option<String>,
    ) -> Result<()> {
        let kind = self.playlist_kind(playlist_id)?;

        if kind != PlaylistKind::Smart {
            self.conn.execute(
                "UPDATE playlists SET title=?1 WHERE id=?2",
                params![title, playlist_id],
            )?;
            return Ok(());
        }

        let clause = clause.ok_or(CatalogError::NoClause)?;
        lucquery::smart::parse(&clause).map_err(|e| CatalogError::Parse(e.to_string()))?;
        self.conn.execute(
            "UPDATE playlists SET title=?1, query=?2 WHERE id=?3",
            params![title, clause, playlist_id],
        )?;

        if !self.in_scan && !self.in_playlist_scan {
            self.update_playlists()?;
        }
        Ok(())
    }

    /// Recalcule le compte d'éléments de chaque liste
    fn update_playlists(&self) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, type, query FROM playlists")?;
        let playlists: Vec<(i64, i32, Option<String>)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);

        for (id, kind, query) in playlists {
            if kind == PlaylistKind::Smart as i32 {
                let clause = query.as_deref().unwrap_or("1");
                match lucquery::smart::to_predicate(clause) {
                    Ok(predicate) => {
                        self.conn.execute(
                            &format!(
                                "UPDATE playlists SET items=(SELECT COUNT(*) FROM songs \
                                 WHERE {predicate}) WHERE id=?1"
                            ),
                            params![id],
                        )?;
                    }
                    Err(e) => {
                        warn!(playlist = id, error = %e, "Unparseable smart playlist, skipped");
                    }
                }
            } else {
                self.conn.execute(
                    "UPDATE playlists SET items=(SELECT COUNT(*) FROM playlistitems \
                     WHERE playlistid=?1) WHERE id=?1",
                    params![id],
                )?;
            }
        }
        Ok(())
    }

    // ---- Transactions de scan ----

    fn start_scan(&mut self) -> Result<()> {
        if self.reload {
            self.conn.execute_batch(
                "PRAGMA synchronous = OFF;
                 BEGIN TRANSACTION;",
            )?;
        } else {
            let _ = self.conn.execute("DROP TABLE updated", []);
            self.conn
                .execute("CREATE TEMP TABLE updated (id INT)", [])?;
            let _ = self.conn.execute("DROP TABLE plupdated", []);
            self.conn
                .execute("CREATE TEMP TABLE plupdated (id INT)", [])?;
        }

        self.in_scan = true;
        self.in_playlist_scan = false;
        Ok(())
    }

    fn end_song_scan(&mut self) -> Result<()> {
        if self.reload {
            self.conn.execute_batch("COMMIT TRANSACTION")?;
            self.conn
                .execute("CREATE INDEX idx_path ON songs(path)", [])?;
            let _ = self
                .conn
                .execute("DELETE FROM config WHERE term='rescan'", []);
        } else {
            self.conn.execute(
                "DELETE FROM songs WHERE id NOT IN (SELECT id FROM updated)",
                [],
            )?;
            self.conn.execute("UPDATE songs SET force_update=0", [])?;
            self.conn.execute("DROP TABLE updated", [])?;
        }

        self.conn.execute_batch("BEGIN TRANSACTION")?;

        self.in_scan = false;
        self.in_playlist_scan = true;
        Ok(())
    }

    fn end_scan(&mut self) -> Result<()> {
        self.conn.execute_batch("END TRANSACTION")?;

        if self.reload {
            self.conn.execute_batch("PRAGMA synchronous = NORMAL")?;
        } else {
            self.conn.execute(
                "DELETE FROM playlists WHERE ((type=?1) OR (type=?2)) \
                 AND id NOT IN (SELECT id FROM plupdated)",
                params![
                    PlaylistKind::StaticFile as i32,
                    PlaylistKind::StaticXml as i32
                ],
            )?;
            self.conn.execute(
                "DELETE FROM playlistitems WHERE playlistid NOT IN \
                 (SELECT DISTINCT id FROM playlists)",
                [],
            )?;
            self.conn.execute("DROP TABLE plupdated", [])?;
        }

        self.update_playlists()?;
        self.reload = false;
        self.in_playlist_scan = false;
        Ok(())
    }

    // ---- Énumération ----

    fn enum_begin(&mut self, desc: QueryDescriptor, reply: Reply<Sender<CursorJob>>) {
        let sql = match self.build_enum_sql(&desc) {
            Ok(sql) => sql,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        debug!(sql = %sql, "Opening enumeration cursor");

        let (cursor_tx, cursor_rx) = unbounded::<CursorJob>();

        // La compilation valide la requête ; les erreurs d'exécution seront
        // remontées au premier pas du curseur
        match self.conn.prepare(&sql) {
            Ok(mut stmt) => {
                let _ = reply.send(Ok(cursor_tx));
                serve_cursor(&desc, &mut stmt, cursor_rx);
            }
            Err(e) => {
                let _ = reply.send(Err(CatalogError::Sql(e)));
            }
        }
    }

    /// Construit le SELECT de l'énumération : base par type de vue, prédicat
    /// client, tranchage
    fn build_enum_sql(&self, desc: &QueryDescriptor) -> Result<String> {
        let mut where_parts: Vec<String> = Vec::new();
        let mut order: Option<&str> = None;

        let (select, count_base): (String, String) = match desc.query_type {
            QueryType::Items => (
                "SELECT * FROM songs".into(),
                "SELECT COUNT(*) FROM songs".into(),
            ),
            QueryType::Playlists => (
                "SELECT * FROM playlists".into(),
                "SELECT COUNT(*) FROM playlists".into(),
            ),
            QueryType::PlaylistItems => {
                let (kind, query): (i32, Option<String>) = self
                    .conn
                    .query_row(
                        "SELECT type, query FROM playlists WHERE id=?1",
                        params![desc.playlist_id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .map_err(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => {
                            CatalogError::InvalidPlaylist(desc.playlist_id)
                        }
                        other => CatalogError::Sql(other),
                    })?;

                if kind == PlaylistKind::Smart as i32 {
                    let clause = query.as_deref().unwrap_or("1");
                    let predicate = lucquery::smart::to_predicate(clause)
                        .map_err(|e| CatalogError::Parse(e.to_string()))?;
                    where_parts.push(predicate);
                    (
                        "SELECT * FROM songs".into(),
                        "SELECT COUNT(id) FROM songs".into(),
                    )
                } else {
                    // L'ordre de lecture est l'ordre d'insertion dans la liste
                    where_parts
                        .push(format!("playlistitems.playlistid={}", desc.playlist_id));
                    order = Some(" ORDER BY playlistitems.id");
                    (
                        "SELECT songs.* FROM songs JOIN playlistitems \
                         ON songs.id=playlistitems.songid"
                            .into(),
                        "SELECT COUNT(songs.id) FROM songs JOIN playlistitems \
                         ON songs.id=playlistitems.songid"
                            .into(),
                    )
                }
            }
            QueryType::BrowseArtists => (
                "SELECT DISTINCT artist FROM songs".into(),
                "SELECT COUNT(DISTINCT artist) FROM songs".into(),
            ),
            QueryType::BrowseAlbums => (
                "SELECT DISTINCT album FROM songs".into(),
                "SELECT COUNT(DISTINCT album) FROM songs".into(),
            ),
            QueryType::BrowseGenres => (
                "SELECT DISTINCT genre FROM songs".into(),
                "SELECT COUNT(DISTINCT genre) FROM songs".into(),
            ),
            QueryType::BrowseComposers => (
                "SELECT DISTINCT composer FROM songs".into(),
                "SELECT COUNT(DISTINCT composer) FROM songs".into(),
            ),
        };

        if let Some(filter) = &desc.filter {
            where_parts.push(format!("({filter})"));
        }

        let where_clause = if where_parts.is_empty() {
            String::new()
        } else {
            format!(" WHERE ({})", where_parts.join(") AND ("))
        };

        let mut sql = format!("{select}{where_clause}{}", order.unwrap_or(""));

        match desc.index {
            IndexClause::None => {}
            IndexClause::First(n) => {
                sql.push_str(&format!(" LIMIT {n}"));
            }
            IndexClause::Last(n) => {
                // « les N derniers » exige le compte total sous le même filtre
                let count_sql = format!("{count_base}{where_clause}");
                let total: u32 =
                    self.conn.query_row(&count_sql, [], |row| row.get(0))?;
                if n >= total {
                    sql.push_str(&format!(" LIMIT {n}"));
                } else {
                    sql.push_str(&format!(" LIMIT {n} OFFSET {}", total - n));
                }
            }
            IndexClause::Sub(lo, hi) => {
                sql.push_str(&format!(" LIMIT {} OFFSET {lo}", hi.saturating_sub(lo)));
            }
        }

        Ok(sql)
    }
}

fn map_row(query_type: QueryType, row: &rusqlite::Row) -> rusqlite::Result<Row> {
    Ok(match query_type {
        QueryType::Items | QueryType::PlaylistItems => {
            Row::Song(Box::new(Song::from_row(row)?))
        }
        QueryType::Playlists => Row::Playlist(Playlist::from_row(row)?),
        _ => Row::Browse(row.get(0)?),
    })
}

/// Sert les travaux du curseur jusqu'à `End`. Tant que cette boucle tourne,
/// le fil du catalogue ne traite rien d'autre : c'est l'exclusivité
/// d'écriture tenue sur toute la durée de l'énumération. Le rembobinage
/// rejoue la requête préparée, ce qui repositionne sur la première ligne.
fn serve_cursor(
    desc: &QueryDescriptor,
    stmt: &mut rusqlite::Statement<'_>,
    jobs: Receiver<CursorJob>,
) {
    let mut rows = stmt.query([]).ok();

    while let Ok(job) = jobs.recv() {
        match job {
            CursorJob::Size(reply) => {
                if rows.is_none() {
                    rows = None;
                    match stmt.query([]) {
                        Ok(fresh) => rows = Some(fresh),
                        Err(e) => {
                            let _ = reply.send(Err(CatalogError::Sql(e)));
                            continue;
                        }
                    }
                }

                let mut count = 0u32;
                let mut total = 0u32;
                let mut failed: Option<rusqlite::Error> = None;

                if let Some(active) = rows.as_mut() {
                    loop {
                        match active.next() {
                            Ok(Some(row)) => match map_row(desc.query_type, row) {
                                Ok(mapped) => {
                                    let size = row_size(desc, &mapped) as u32;
                                    if size > 0 {
                                        total += size;
                                        count += 1;
                                    }
                                }
                                Err(e) => {
                                    failed = Some(e);
                                    break;
                                }
                            },
                            Ok(None) => break,
                            Err(e) => {
                                failed = Some(e);
                                break;
                            }
                        }
                    }
                }

                // Rembobinage : la passe d'émission repart de la première ligne
                rows = None;
                rows = stmt.query([]).ok();

                let _ = reply.send(match failed {
                    Some(e) => Err(CatalogError::Sql(e)),
                    None => Ok((count, total)),
                });
            }
            CursorJob::Fetch(reply) => {
                if rows.is_none() {
                    rows = None;
                    match stmt.query([]) {
                        Ok(fresh) => rows = Some(fresh),
                        Err(e) => {
                            let _ = reply.send(Err(CatalogError::Sql(e)));
                            continue;
                        }
                    }
                }
                let _ = reply.send(fetch_next(desc, &mut rows));
            }
            CursorJob::Reset(reply) => {
                rows = None;
                match stmt.query([]) {
                    Ok(fresh) => {
                        rows = Some(fresh);
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(CatalogError::Sql(e)));
                    }
                }
            }
            CursorJob::End(reply) => {
                let _ = reply.send(Ok(()));
                return;
            }
        }
    }
}

fn fetch_next(desc: &QueryDescriptor, rows: &mut Option<rusqlite::Rows>) -> Result<Vec<u8>> {
    let Some(active) = rows.as_mut() else {
        return Ok(Vec::new());
    };

    loop {
        match active.next() {
            Ok(Some(row)) => {
                let mapped = map_row(desc.query_type, row).map_err(CatalogError::Sql)?;
                let bytes = row_emit(desc, &mapped);
                if !bytes.is_empty() {
                    return Ok(bytes);
                }
                // ligne de taille nulle (navigation sans valeur) : suivante
            }
            Ok(None) => return Ok(Vec::new()),
            Err(e) => return Err(CatalogError::Sql(e)),
        }
    }
}

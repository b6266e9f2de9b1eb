//! # luccatalog - Le catalogue persistant
//!
//! Moteur de stockage des morceaux et listes de lecture, avec :
//!
//! - Schéma SQLite versionné, migrations avec sauvegarde préalable
//! - Fil de travail unique possédant la connexion (le backend n'est pas
//!   réentrant) ; les appelants soumettent des travaux typés et bloquent sur
//!   la réponse
//! - Transactions de scan (rechargement complet ou incrémental avec tables
//!   temporaires `updated`/`plupdated` et suppressions par anti-jointure)
//! - Protocole d'énumération en deux passes : dimensionnement exact puis
//!   émission DMAP ligne à ligne
//! - Compteur de révision monotone publié sur un canal `watch` pour le
//!   long-poll de `/update`
//!
//! ## Exemple
//!
//! ```no_run
//! use luccatalog::{Catalog, Song};
//!
//! # fn main() -> luccatalog::Result<()> {
//! let catalog = Catalog::open("songs.db", false)?;
//! let mut song = Song::default();
//! song.path = "/music/a.mp3".into();
//! song.fname = "a.mp3".into();
//! song.title = Some("Petite fleur".into());
//! catalog.add(&song)?;
//! assert_eq!(catalog.count(luccatalog::CountKind::Songs)?, 1);
//! # Ok(())
//! # }
//! ```

mod descriptor;
mod emit;
mod schema;
mod song;
mod worker;

pub use descriptor::{IndexClause, QueryDescriptor, QueryType};
pub use emit::{Row, row_emit, row_size};
pub use lucdmap::{MetaBits, MetaField};
pub use song::{CountKind, Playlist, PlaylistKind, Song, sanitize_utf8_bytes};

use crossbeam_channel::{Sender, bounded};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::info;
use worker::{CursorJob, Job, Reply};

/// Erreurs du catalogue (taxonomie de la couche de stockage)
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Le backend a signalé une erreur de syntaxe ou de contrainte
    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("duplicate playlist: {0}")]
    DuplicatePlaylist(String),

    /// Création de liste intelligente sans expression
    #[error("smart playlist needs a clause")]
    NoClause,

    /// Opération interdite pour ce type de liste
    #[error("operation invalid for this playlist type")]
    InvalidType,

    #[error("invalid playlist id: {0}")]
    InvalidPlaylist(i64),

    #[error("invalid song id: {0}")]
    InvalidSongId(i64),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("catalog version {found} is newer than this build supports (max {max})")]
    VersionTooNew { found: u32, max: u32 },

    #[error("migration error: {0}")]
    Migration(String),

    #[error("could not start catalog worker: {0}")]
    ProcessStart(String),

    /// Le fil du catalogue a disparu (canal fermé)
    #[error("catalog worker is gone")]
    WorkerGone,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Type Result spécialisé pour luccatalog
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Le catalogue : poignée publique vers le fil de stockage.
///
/// Clonable à volonté ; toutes les poignées parlent au même fil. La dernière
/// poignée fermée arrête le fil.
pub struct Catalog {
    jobs: Sender<Job>,
    revision: Arc<tokio::sync::watch::Sender<u32>>,
    scanning: Arc<RwLock<bool>>,
    db_path: PathBuf,
}

impl Clone for Catalog {
    fn clone(&self) -> Self {
        Catalog {
            jobs: self.jobs.clone(),
            revision: self.revision.clone(),
            scanning: self.scanning.clone(),
            db_path: self.db_path.clone(),
        }
    }
}

impl Catalog {
    /// Ouvre (et migre si besoin) le catalogue ; `reload` force un
    /// rechargement complet au prochain scan
    pub fn open(db_path: impl AsRef<Path>, reload: bool) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let (jobs, _handle) = worker::spawn(db_path.clone(), reload)?;
        info!(path = %db_path.display(), "Catalog open");

        // La révision démarre à 2 : un client qui interroge avec la valeur
        // initiale 1 reçoit une réponse immédiate, puis se bloque sur 2
        let (revision, _) = tokio::sync::watch::channel(2u32);

        Ok(Catalog {
            jobs,
            revision: Arc::new(revision),
            scanning: Arc::new(RwLock::new(false)),
            db_path,
        })
    }

    fn submit<T>(&self, make: impl FnOnce(Reply<T>) -> Job) -> Result<T> {
        let (tx, rx) = bounded(1);
        self.jobs
            .send(make(tx))
            .map_err(|_| CatalogError::WorkerGone)?;
        rx.recv().map_err(|_| CatalogError::WorkerGone)?
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    // ---- Révision et état de scan ----

    /// Révision courante du catalogue
    pub fn revision(&self) -> u32 {
        *self.revision.borrow()
    }

    /// Abonnement aux changements de révision (long-poll de `/update`)
    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<u32> {
        self.revision.subscribe()
    }

    /// Un scan est-il en cours ?
    pub fn scanning(&self) -> bool {
        self.scanning.read().map(|guard| *guard).unwrap_or(false)
    }

    /// Chemin du fichier de base
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // ---- Surface du scanner ----

    /// Ajoute un morceau, ou le met à jour s'il existe déjà (apparié sur
    /// `path`). Les champs texte sont nettoyés en UTF-8 valide, avec une
    /// ligne de journal par morceau corrigé.
    pub fn add(&self, song: &Song) -> Result<i64> {
        let mut song = song.clone();
        if song.sanitize_utf8() {
            tracing::warn!(path = %song.path, "Invalid UTF-8 in song tags");
        }
        let id = self.submit(|reply| Job::AddSong {
            song: Box::new(song),
            reply,
        })?;
        self.bump_revision();
        Ok(id)
    }

    /// Ouvre une transaction de scan
    pub fn start_scan(&self) -> Result<()> {
        self.submit(|reply| Job::StartScan { reply })?;
        if let Ok(mut guard) = self.scanning.write() {
            *guard = true;
        }
        Ok(())
    }

    /// Fin de la passe morceaux : purge les disparus, ouvre la passe listes
    pub fn end_song_scan(&self) -> Result<()> {
        self.submit(|reply| Job::EndSongScan { reply })
    }

    /// Fin de scan : purge les listes statiques disparues et les éléments
    /// orphelins, recalcule les comptes
    pub fn end_scan(&self) -> Result<()> {
        self.submit(|reply| Job::EndScan { reply })?;
        if let Ok(mut guard) = self.scanning.write() {
            *guard = false;
        }
        Ok(())
    }

    // ---- Lectures ----

    /// Morceau par identifiant
    pub fn fetch_item(&self, id: i64) -> Result<Song> {
        self.submit(|reply| Job::FetchItem { id, reply })
    }

    /// Morceau par chemin absolu
    pub fn fetch_path(&self, path: &str) -> Result<Song> {
        let path = path.to_string();
        self.submit(|reply| Job::FetchPath { path, reply })
    }

    /// Liste de lecture par chemin source et index
    pub fn fetch_playlist(&self, path: &str, index: i32) -> Result<Playlist> {
        let path = path.to_string();
        self.submit(|reply| Job::FetchPlaylist { path, index, reply })
    }

    /// Compte de morceaux ou de listes
    pub fn count(&self, kind: CountKind) -> Result<u32> {
        self.submit(|reply| Job::Count { kind, reply })
    }

    // ---- Listes de lecture ----

    /// Crée une liste ; `clause` est obligatoire pour une liste intelligente
    pub fn add_playlist(
        &self,
        title: &str,
        kind: PlaylistKind,
        clause: Option<&str>,
        path: Option<&str>,
        index: i32,
    ) -> Result<i64> {
        let title = title.to_string();
        let clause = clause.map(str::to_string);
        let path = path.map(str::to_string);
        let id = self.submit(|reply| Job::AddPlaylist {
            title,
            kind,
            clause,
            path,
            index,
            reply,
        })?;
        self.bump_revision();
        Ok(id)
    }

    /// Ajoute un morceau à une liste statique
    pub fn add_playlist_item(&self, playlist_id: i64, song_id: i64) -> Result<()> {
        self.submit(|reply| Job::AddPlaylistItem {
            playlist_id,
            song_id,
            reply,
        })?;
        self.bump_revision();
        Ok(())
    }

    /// Supprime une liste et ses éléments
    pub fn delete_playlist(&self, playlist_id: i64) -> Result<()> {
        self.submit(|reply| Job::DeletePlaylist { playlist_id, reply })?;
        self.bump_revision();
        Ok(())
    }

    /// Retire un morceau d'une liste statique
    pub fn delete_playlist_item(&self, playlist_id: i64, song_id: i64) -> Result<()> {
        self.submit(|reply| Job::DeletePlaylistItem {
            playlist_id,
            song_id,
            reply,
        })?;
        self.bump_revision();
        Ok(())
    }

    /// Renomme une liste ; change aussi l'expression d'une liste intelligente
    pub fn edit_playlist(
        &self,
        playlist_id: i64,
        title: &str,
        clause: Option<&str>,
    ) -> Result<()> {
        let title = title.to_string();
        let clause = clause.map(str::to_string);
        self.submit(|reply| Job::EditPlaylist {
            playlist_id,
            title,
            clause,
            reply,
        })?;
        self.bump_revision();
        Ok(())
    }

    // ---- Énumération ----

    /// Ouvre un curseur d'énumération. Le fil du catalogue est réservé au
    /// curseur jusqu'à `end` (ou l'abandon de la poignée) : les autres
    /// opérations attendent derrière.
    pub fn enum_begin(&self, desc: QueryDescriptor) -> Result<Cursor> {
        let tx = self.submit(|reply| Job::EnumBegin {
            desc: Box::new(desc),
            reply,
        })?;
        Ok(Cursor {
            tx: Some(tx),
        })
    }

    /// Ferme proprement le fil du catalogue. Les poignées restantes
    /// recevront [`CatalogError::WorkerGone`] ; lâcher la dernière poignée
    /// sans appeler `close` arrête aussi le fil.
    pub fn close(self) -> Result<()> {
        self.submit(|reply| Job::Close { reply })
    }
}

/// Curseur d'énumération ouvert sur le catalogue.
///
/// Les instantanés de ligne rendus par [`Cursor::fetch`] sont déjà encodés en
/// conteneurs `mlit` ; ils ne sont valides que pour cette révision du
/// catalogue, que le curseur fige le temps de sa vie.
pub struct Cursor {
    tx: Option<Sender<CursorJob>>,
}

impl Cursor {
    fn call<T>(&self, make: impl FnOnce(Reply<T>) -> CursorJob) -> Result<T> {
        let tx = self.tx.as_ref().ok_or(CatalogError::WorkerGone)?;
        let (reply_tx, reply_rx) = bounded(1);
        tx.send(make(reply_tx)).map_err(|_| CatalogError::WorkerGone)?;
        reply_rx.recv().map_err(|_| CatalogError::WorkerGone)?
    }

    /// Balaye tout le résultat et retourne `(lignes, octets DMAP)` exacts,
    /// puis rembobine
    pub fn size(&self) -> Result<(u32, u32)> {
        self.call(CursorJob::Size)
    }

    /// Ligne suivante, encodée ; tampon vide à l'épuisement
    pub fn fetch(&self) -> Result<Vec<u8>> {
        self.call(CursorJob::Fetch)
    }

    /// Repositionne sur la première ligne
    pub fn reset(&self) -> Result<()> {
        self.call(CursorJob::Reset)
    }

    /// Ferme le curseur et libère le fil du catalogue
    pub fn end(mut self) -> Result<()> {
        let result = self.call(CursorJob::End);
        self.tx = None;
        result
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        // Déroulage : une connexion fermée côté client doit libérer le fil
        if let Some(tx) = self.tx.take() {
            let (reply_tx, _reply_rx) = bounded(1);
            let _ = tx.send(CursorJob::End(reply_tx));
        }
    }
}

//! Schéma du catalogue et scripts de migration.
//!
//! Les scripts forment un tableau indexé par version : tant que la version
//! sur disque est inférieure à la cible, `scripts[version]` est appliqué puis
//! la version est relue. Avant le premier script, une copie octet à octet de
//! la base est faite dans `<chemin>.version-NN` ; elle est supprimée en cas
//! de succès et conservée en cas d'échec.

use crate::{CatalogError, Result};
use rusqlite::Connection;
use std::fs;
use std::path::Path;
use tracing::{error, info};

/// Scripts de mise à niveau, indexés par version de départ
pub static UPGRADE_SCRIPTS: &[&str] = &[
    // version 0 -> version 1 : schéma initial
    "CREATE TABLE songs (
       id              INTEGER PRIMARY KEY NOT NULL,
       path            VARCHAR(4096) UNIQUE NOT NULL,
       fname           VARCHAR(255) NOT NULL,
       title           VARCHAR(1024) DEFAULT NULL,
       artist          VARCHAR(1024) DEFAULT NULL,
       album           VARCHAR(1024) DEFAULT NULL,
       genre           VARCHAR(255) DEFAULT NULL,
       comment         VARCHAR(4096) DEFAULT NULL,
       type            VARCHAR(255) DEFAULT NULL,
       composer        VARCHAR(1024) DEFAULT NULL,
       orchestra       VARCHAR(1024) DEFAULT NULL,
       conductor       VARCHAR(1024) DEFAULT NULL,
       grouping        VARCHAR(1024) DEFAULT NULL,
       url             VARCHAR(1024) DEFAULT NULL,
       bitrate         INTEGER DEFAULT 0,
       samplerate      INTEGER DEFAULT 0,
       song_length     INTEGER DEFAULT 0,
       file_size       INTEGER DEFAULT 0,
       year            INTEGER DEFAULT 0,
       track           INTEGER DEFAULT 0,
       total_tracks    INTEGER DEFAULT 0,
       disc            INTEGER DEFAULT 0,
       total_discs     INTEGER DEFAULT 0,
       bpm             INTEGER DEFAULT 0,
       compilation     INTEGER DEFAULT 0,
       rating          INTEGER DEFAULT 0,
       play_count      INTEGER DEFAULT 0,
       data_kind       INTEGER DEFAULT 0,
       item_kind       INTEGER DEFAULT 0,
       description     VARCHAR(1024) DEFAULT NULL,
       time_added      INTEGER DEFAULT 0,
       time_modified   INTEGER DEFAULT 0,
       time_played     INTEGER DEFAULT 0,
       db_timestamp    INTEGER DEFAULT 0,
       disabled        INTEGER DEFAULT 0,
       sample_count    INTEGER DEFAULT 0,
       force_update    INTEGER DEFAULT 0,
       codectype       VARCHAR(5) DEFAULT NULL,
       idx             INTEGER NOT NULL
     );
     CREATE INDEX idx_path ON songs(path);
     CREATE TABLE config (
       term            VARCHAR(255)    NOT NULL,
       subterm         VARCHAR(255)    DEFAULT NULL,
       value           VARCHAR(1024)   NOT NULL
     );
     CREATE TABLE playlists (
       id             INTEGER PRIMARY KEY NOT NULL,
       title          VARCHAR(255) NOT NULL,
       type           INTEGER NOT NULL,
       items          INTEGER NOT NULL,
       query          VARCHAR(1024),
       db_timestamp   INTEGER NOT NULL,
       path           VARCHAR(4096),
       idx            INTEGER NOT NULL
     );
     CREATE TABLE playlistitems (
       id             INTEGER PRIMARY KEY NOT NULL,
       playlistid     INTEGER NOT NULL,
       songid         INTEGER NOT NULL
     );
     INSERT INTO config VALUES ('version','','1');
     INSERT INTO playlists VALUES (1,'Library',1,0,'1',0,NULL,0);",
];

/// Lit la version du schéma ; 0 pour une base vierge
pub fn get_version(conn: &Connection) -> u32 {
    conn.query_row(
        "SELECT value FROM config WHERE term='version'",
        [],
        |row| row.get::<_, String>(0),
    )
    .ok()
    .and_then(|v| v.parse().ok())
    .unwrap_or(0)
}

/// Applique les scripts en attente avec les mêmes garanties que la source :
/// sauvegarde avant le premier script, abandon si la base vient du futur.
pub fn migrate(conn: &Connection, db_path: &Path) -> Result<()> {
    migrate_with(conn, db_path, UPGRADE_SCRIPTS)
}

pub(crate) fn migrate_with(conn: &Connection, db_path: &Path, scripts: &[&str]) -> Result<()> {
    let mut version = get_version(conn);

    if version as usize > scripts.len() {
        return Err(CatalogError::VersionTooNew {
            found: version,
            max: scripts.len() as u32,
        });
    }

    let mut backup: Option<std::path::PathBuf> = None;

    while (version as usize) < scripts.len() {
        info!(from = version, to = version + 1, "Upgrading catalog schema");

        if backup.is_none() {
            let backup_path =
                std::path::PathBuf::from(format!("{}.version-{version:02}", db_path.display()));
            fs::copy(db_path, &backup_path)?;
            backup = Some(backup_path);
        }

        if let Err(e) = conn.execute_batch(scripts[version as usize]) {
            error!(
                version,
                backup = %backup.as_ref().map(|p| p.display().to_string()).unwrap_or_default(),
                "Error upgrading catalog, backup copy retained"
            );
            return Err(CatalogError::Sql(e));
        }

        let new_version = get_version(conn);
        if new_version <= version {
            return Err(CatalogError::Migration(format!(
                "script {version} did not advance the schema version"
            )));
        }
        version = new_version;
    }

    if let Some(path) = backup {
        let _ = fs::remove_file(path);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_in_dir() -> (tempfile::TempDir, Connection, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("songs.db");
        let conn = Connection::open(&path).unwrap();
        (dir, conn, path)
    }

    #[test]
    fn test_fresh_database_reaches_current_version() {
        let (_dir, conn, path) = open_in_dir();
        migrate(&conn, &path).unwrap();
        assert_eq!(get_version(&conn), UPGRADE_SCRIPTS.len() as u32);

        // La liste Library est immortelle : id 1, smart, requête "1"
        let (title, kind, query): (String, i32, String) = conn
            .query_row(
                "SELECT title, type, query FROM playlists WHERE id=1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(title, "Library");
        assert_eq!(kind, 1);
        assert_eq!(query, "1");
    }

    #[test]
    fn test_backup_removed_on_success() {
        let (dir, conn, path) = open_in_dir();
        migrate(&conn, &path).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("version-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_backup_retained_on_failure() {
        let (dir, conn, path) = open_in_dir();
        let scripts: &[&str] = &["THIS IS NOT SQL;"];
        assert!(migrate_with(&conn, &path, scripts).is_err());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("version-00"))
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_version_from_the_future_aborts() {
        let (_dir, conn, path) = open_in_dir();
        migrate(&conn, &path).unwrap();
        conn.execute("UPDATE config SET value='99' WHERE term='version'", [])
            .unwrap();
        assert!(matches!(
            migrate(&conn, &path),
            Err(CatalogError::VersionTooNew { found: 99, .. })
        ));
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let (_dir, conn, path) = open_in_dir();
        migrate(&conn, &path).unwrap();
        migrate(&conn, &path).unwrap();
        assert_eq!(get_version(&conn), UPGRADE_SCRIPTS.len() as u32);
    }

    #[test]
    fn test_script_that_forgets_version_bump_is_an_error() {
        let (_dir, conn, path) = open_in_dir();
        let scripts: &[&str] = &["CREATE TABLE t (x INTEGER);"];
        assert!(matches!(
            migrate_with(&conn, &path, scripts),
            Err(CatalogError::Migration(_))
        ));
    }
}

//! Contexte de serveur passé à tous les gestionnaires.
//!
//! Pas d'état global : le catalogue, la configuration et l'allocateur de
//! sessions voyagent dans une valeur explicite, ce qui permet d'instancier
//! plusieurs serveurs indépendants dans un même processus (et dans les
//! tests).

use luccatalog::Catalog;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use tokio::io::AsyncRead;

/// Configuration de la couche DAAP
#[derive(Debug, Clone, Default)]
pub struct DaapConfig {
    /// Nom annoncé dans `server-info` et la base unique
    pub server_name: String,
    /// Mot de passe de lecture ; `None` désactive l'authentification
    pub password: Option<String>,
    /// Types de codec servis après transcodage en WAV
    pub transcode_codecs: HashSet<String>,
    /// Ligne de commande du transcodeur
    pub transcode_command: Option<String>,
    /// Nom du fichier de pochette cherché à côté du morceau
    pub art_filename: Option<String>,
}

/// Insertion de pochette dans les premières trames d'un flux : collaborateur
/// externe, le serveur ne fait que le câblage (découverte du fichier,
/// correction des tailles, rebasage d'offset).
pub trait ArtSplicer: Send + Sync {
    /// Taille ajoutée au flux pour une pochette de `art_len` octets
    fn added_len(&self, kind: &str, art_len: u64) -> u64;

    /// Ouvre le flux média avec la pochette insérée, à partir de `offset`
    /// dans le flux ajusté
    fn splice(
        &self,
        art_path: &Path,
        media_path: &Path,
        offset: u64,
        kind: &str,
    ) -> std::io::Result<Box<dyn AsyncRead + Send + Unpin>>;
}

/// L'état partagé du répartiteur
pub struct DaapState {
    pub catalog: Catalog,
    pub config: DaapConfig,
    pub art_splicer: Option<Arc<dyn ArtSplicer>>,
    next_session: AtomicI32,
}

impl DaapState {
    pub fn new(catalog: Catalog, config: DaapConfig) -> Self {
        DaapState {
            catalog,
            config,
            art_splicer: None,
            next_session: AtomicI32::new(0),
        }
    }

    pub fn with_art_splicer(mut self, splicer: Arc<dyn ArtSplicer>) -> Self {
        self.art_splicer = Some(splicer);
        self
    }

    /// Alloue un identifiant de session (monotone, jamais réutilisé)
    pub fn next_session(&self) -> i32 {
        self.next_session.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Le morceau sera-t-il transcodé à la diffusion ?
    pub fn will_transcode(&self, codectype: Option<&str>) -> bool {
        if self.config.transcode_command.is_none() {
            return false;
        }
        match codectype {
            Some(codec) => self.config.transcode_codecs.contains(codec),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> (tempfile::TempDir, DaapState) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join("songs.db"), false).unwrap();
        let mut config = DaapConfig {
            server_name: "Salon".into(),
            ..DaapConfig::default()
        };
        config.transcode_codecs.insert("ogg".into());
        config.transcode_command = Some("wavstreamer".into());
        (dir, DaapState::new(catalog, config))
    }

    #[test]
    fn test_sessions_are_monotonic() {
        let (_dir, state) = test_state();
        let a = state.next_session();
        let b = state.next_session();
        assert!(b > a);
    }

    #[test]
    fn test_will_transcode_needs_command_and_codec() {
        let (_dir, state) = test_state();
        assert!(state.will_transcode(Some("ogg")));
        assert!(!state.will_transcode(Some("mpeg")));
        assert!(!state.will_transcode(None));
    }
}

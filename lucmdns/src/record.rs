//! Enregistrements possédés par le répondeur et leur machine à états.
//!
//! ```text
//! Unique --(sondes épuisées)--> Verified --(annonce)--> Active
//! Unique --(conflit pendant la sonde)--> renommé, retour à Unique
//! Active --(conflit observé)--> renommé, retour à Unique
//! Active --(retrait demandé)--> Deregistering --(adieu émis)--> libéré
//! ```

use crate::message::ResourceRecord;
use std::time::{Duration, Instant};

/// Nombre de sondes avant validation d'un enregistrement unique
pub const PROBE_COUNT: u8 = 3;
/// Espacement des sondes
pub const PROBE_INTERVAL: Duration = Duration::from_millis(250);
/// Espacement initial des annonces
pub const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1);
/// Au-delà, les enregistrements partagés cessent de se réannoncer
pub const ANNOUNCE_MAX_INTERVAL: Duration = Duration::from_secs(16);

/// État d'un enregistrement possédé
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// Unique en cours de sondage ; `sent` transmissions déjà faites
    Probing { sent: u8 },
    /// Sondes passées sans conflit, annonce imminente
    Verified,
    /// Annoncé et servi
    Active,
    /// En cours de retrait : l'adieu part puis l'enregistrement est libéré
    Deregistering,
}

/// Un enregistrement que nous possédons et défendons
#[derive(Debug, Clone)]
pub struct OwnedRecord {
    pub rr: ResourceRecord,
    /// Unique (sondé, bit cache-flush) ou partagé (PTR de service)
    pub unique: bool,
    pub state: RecordState,
    pub next_send: Instant,
    /// Annonces déjà émises depuis le passage à Active
    pub announces_sent: u8,
    pub announce_interval: Duration,
    /// Enregistrements joints aux réponses (Additional1/Additional2)
    pub additionals: Vec<usize>,
    /// Groupe de service pour les renommages solidaires
    pub group: Option<usize>,
}

impl OwnedRecord {
    pub fn new(rr: ResourceRecord, unique: bool, now: Instant) -> Self {
        let state = if unique {
            RecordState::Probing { sent: 0 }
        } else {
            // les partagés ne se sondent pas : annonce directe
            RecordState::Active
        };
        OwnedRecord {
            rr,
            unique,
            state,
            next_send: now,
            announces_sent: 0,
            announce_interval: ANNOUNCE_INTERVAL,
            additionals: Vec::new(),
            group: None,
        }
    }

    /// L'enregistrement peut-il servir de réponse ?
    pub fn answerable(&self) -> bool {
        matches!(self.state, RecordState::Verified | RecordState::Active)
    }

    /// Retour à l'état de sondage avec le compte complet
    pub fn restart_probing(&mut self, now: Instant) {
        if self.unique {
            self.state = RecordState::Probing { sent: 0 };
        } else {
            self.state = RecordState::Active;
        }
        self.next_send = now;
        self.announces_sent = 0;
        self.announce_interval = ANNOUNCE_INTERVAL;
    }
}

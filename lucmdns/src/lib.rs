//! # lucmdns - Répondeur mDNS/DNS-SD
//!
//! Répondeur multicast DNS coopératif pour l'annonce des services sur le
//! lien local (`224.0.0.251:5353`).
//!
//! ## Fonctionnalités
//!
//! - Possession d'enregistrements avec machine à états complète : sondage
//!   (3 × 250 ms), annonce, résolution de conflits par renommage, retrait
//!   avec adieux
//! - Réponse aux questions reçues : correspondance (nom, type, classe),
//!   suppression des réponses connues, enregistrements joints, réponse
//!   unicast ou multicast différée
//! - Cache LRU borné des enregistrements observés, re-demandes à 80/90/95 %
//!   du TTL, adieux d'expiration aux abonnés
//! - Sommeil/réveil idempotents
//!
//! ## Exemple
//!
//! ```no_run
//! use lucmdns::Responder;
//!
//! # fn main() -> lucmdns::Result<()> {
//! let responder = Responder::start("grenier", None)?;
//! responder.register_service("Salon", "_daap._tcp.local", 3689, &[])?;
//! responder.register_service("Salon", "_http._tcp.local", 3689, &[])?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod message;
pub mod name;
pub mod record;
pub mod responder;

pub use message::{
    DnsMessage, Question, RData, ResourceRecord, TYPE_A, TYPE_CNAME, TYPE_PTR, TYPE_SRV,
    TYPE_TXT,
};
pub use name::DnsName;
pub use responder::{MDNS_GROUP, MDNS_PORT, Responder, txt_from_pairs};

/// Erreurs du répondeur
#[derive(Debug, thiserror::Error)]
pub enum MdnsError {
    /// Nom malformé : étiquette hors bornes, pointeur avant, double
    /// indirection
    #[error("invalid DNS name")]
    BadName,

    #[error("truncated DNS message")]
    Truncated,

    #[error("malformed resource record")]
    BadRecord,

    #[error("responder state poisoned")]
    Poisoned,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Type Result spécialisé pour lucmdns
pub type Result<T> = std::result::Result<T, MdnsError>;

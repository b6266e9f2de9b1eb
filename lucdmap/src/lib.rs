//! # lucdmap - Codec DMAP
//!
//! Encodage et décodage du format DMAP (Digital Media Access Protocol),
//! le cadrage binaire `[tag 4 octets][longueur big-endian 4 octets][charge]`
//! utilisé par DAAP.
//!
//! ## Fonctionnalités
//!
//! - [`tags`] : registre statique des content-codes (tag, type, description)
//! - [`codec`] : écriture typée dans un tampon et décodage inverse
//! - [`meta`] : bitmap de projection construit depuis le paramètre `meta=`
//! - [`xml`] : rendu XML d'un flux DMAP pour `output=xml|readable`
//!
//! Les conteneurs sont émis en deux passes : la taille interne est calculée
//! d'abord (voir `luccatalog`), l'enveloppe est écrite ensuite. Les chaînes ne
//! sont pas terminées par un nul sur le fil ; la longueur de l'enveloppe fait
//! foi.

pub mod codec;
pub mod meta;
pub mod tags;
pub mod xml;

pub use codec::{DmapError, DmapValue, decode_all, decode_next};
pub use meta::{MetaBits, MetaField};
pub use tags::{DmapType, TagInfo, lookup_tag};

/// Type Result spécialisé pour lucdmap
pub type Result<T> = std::result::Result<T, DmapError>;

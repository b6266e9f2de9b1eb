/// Utilitaires partagés de Luciole.
///
/// Ce crate regroupe les petites briques sans dépendance métier :
///
/// - [`guess_local_ip`] : devine l'adresse IP locale annoncée par mDNS
/// - [`list_ipv4_addrs`] : liste les adresses IPv4 non-loopback
/// - [`makeargv`] : découpe une ligne de commande en arguments
mod argv;
mod ip_utils;

pub use argv::makeargv;
pub use ip_utils::{guess_local_ip, list_ipv4_addrs};

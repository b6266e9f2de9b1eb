//! Cache des enregistrements reçus.
//!
//! LRU borné ; la fraîcheur est datée de la réception. Un enregistrement est
//! re-demandé à 80 %, 90 % et 95 % de son TTL (« avant-dernière chance »,
//! « dernière chance », « toute dernière chance ») ; à expiration il est
//! retiré et signalé en adieu aux questions abonnées.

use crate::message::ResourceRecord;
use crate::name::DnsName;
use std::time::Instant;

/// Taille maximale du cache
const CACHE_CAP: usize = 500;

/// Seuils de re-demande, en pourcentage du TTL
const REQUERY_STAGES: [u32; 3] = [80, 90, 95];

#[derive(Debug, Clone)]
struct CacheEntry {
    rr: ResourceRecord,
    received: Instant,
    /// Étapes de re-demande déjà franchies (0 à 3)
    requeried: u8,
}

/// Résultat d'une passe d'entretien
#[derive(Debug, Default)]
pub struct CacheTick {
    /// Couples (nom, type) à re-demander
    pub requeries: Vec<(DnsName, u16)>,
    /// Enregistrements expirés, à signaler en adieu
    pub expired: Vec<ResourceRecord>,
}

/// Le cache du répondeur
#[derive(Debug, Default)]
pub struct Cache {
    entries: Vec<CacheEntry>,
}

impl Cache {
    pub fn new() -> Self {
        Cache::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Range un enregistrement reçu.
    ///
    /// Un TTL nul est un adieu : l'entrée correspondante est retirée et
    /// retournée. Le bit cache-flush invalide les autres entrées de même
    /// (nom, type).
    pub fn store(&mut self, rr: ResourceRecord, now: Instant) -> Option<ResourceRecord> {
        if rr.ttl == 0 {
            if let Some(pos) = self.entries.iter().position(|e| {
                e.rr.same_identity(&rr) && e.rr.rdata == rr.rdata
            }) {
                return Some(self.entries.remove(pos).rr);
            }
            return None;
        }

        if rr.cache_flush {
            self.entries
                .retain(|e| !(e.rr.same_identity(&rr) && e.rr.rdata != rr.rdata));
        }

        match self
            .entries
            .iter_mut()
            .find(|e| e.rr.same_identity(&rr) && e.rr.rdata == rr.rdata)
        {
            Some(entry) => {
                entry.rr.ttl = rr.ttl;
                entry.received = now;
                entry.requeried = 0;
            }
            None => {
                if self.entries.len() >= CACHE_CAP {
                    // éviction de la plus ancienne réception
                    if let Some((oldest, _)) = self
                        .entries
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, e)| e.received)
                    {
                        self.entries.remove(oldest);
                    }
                }
                self.entries.push(CacheEntry {
                    rr,
                    received: now,
                    requeried: 0,
                });
            }
        }
        None
    }

    /// Entretien périodique : re-demandes et expirations
    pub fn tick(&mut self, now: Instant) -> CacheTick {
        let mut result = CacheTick::default();

        self.entries.retain_mut(|entry| {
            let age_ms = now.duration_since(entry.received).as_millis() as u64;
            let ttl_ms = entry.rr.ttl as u64 * 1000;

            if age_ms >= ttl_ms {
                result.expired.push(entry.rr.clone());
                return false;
            }

            while (entry.requeried as usize) < REQUERY_STAGES.len() {
                let threshold = ttl_ms * REQUERY_STAGES[entry.requeried as usize] as u64 / 100;
                if age_ms < threshold {
                    break;
                }
                result
                    .requeries
                    .push((entry.rr.name.clone(), entry.rr.rrtype()));
                entry.requeried += 1;
            }

            true
        });

        result
    }

    /// Enregistrements en cache répondant à une question
    pub fn lookup(&self, question: &crate::message::Question) -> Vec<&ResourceRecord> {
        self.entries
            .iter()
            .filter(|e| e.rr.answers(question))
            .map(|e| &e.rr)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Question, RData, TYPE_A};
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn name(text: &str) -> DnsName {
        DnsName::parse_text(text).unwrap()
    }

    fn a_record(host: &str, ttl: u32, last_octet: u8) -> ResourceRecord {
        ResourceRecord::new(
            name(host),
            ttl,
            RData::A(Ipv4Addr::new(192, 168, 1, last_octet)),
            true,
        )
    }

    #[test]
    fn test_store_and_lookup() {
        let mut cache = Cache::new();
        let now = Instant::now();
        cache.store(a_record("a.local", 120, 1), now);

        let hits = cache.lookup(&Question::new(name("a.local"), TYPE_A));
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_goodbye_removes_entry() {
        let mut cache = Cache::new();
        let now = Instant::now();
        cache.store(a_record("a.local", 120, 1), now);
        let removed = cache.store(a_record("a.local", 0, 1), now);
        assert!(removed.is_some());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_flush_evicts_other_rdata() {
        let mut cache = Cache::new();
        let now = Instant::now();
        cache.store(a_record("a.local", 120, 1), now);
        cache.store(a_record("a.local", 120, 2), now);
        assert_eq!(cache.len(), 1);
        let hits = cache.lookup(&Question::new(name("a.local"), TYPE_A));
        assert_eq!(hits[0].rdata, RData::A(Ipv4Addr::new(192, 168, 1, 2)));
    }

    #[test]
    fn test_requery_stages_fire_once_each() {
        let mut cache = Cache::new();
        let start = Instant::now();
        cache.store(a_record("a.local", 100, 1), start);

        // 80 % de 100 s
        let tick = cache.tick(start + Duration::from_secs(81));
        assert_eq!(tick.requeries.len(), 1);

        // toujours la même étape : rien de neuf
        let tick = cache.tick(start + Duration::from_secs(82));
        assert!(tick.requeries.is_empty());

        // 90 % puis 95 %
        let tick = cache.tick(start + Duration::from_secs(91));
        assert_eq!(tick.requeries.len(), 1);
        let tick = cache.tick(start + Duration::from_secs(96));
        assert_eq!(tick.requeries.len(), 1);
    }

    #[test]
    fn test_expiry_delivers_goodbye() {
        let mut cache = Cache::new();
        let start = Instant::now();
        cache.store(a_record("a.local", 10, 1), start);

        let tick = cache.tick(start + Duration::from_secs(11));
        assert_eq!(tick.expired.len(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_bounded_capacity() {
        let mut cache = Cache::new();
        let start = Instant::now();
        for i in 0..600u32 {
            let host = format!("h{i}.local");
            cache.store(
                a_record(&host, 120, (i % 250) as u8),
                start + Duration::from_millis(i as u64),
            );
        }
        assert!(cache.len() <= 500);
    }
}

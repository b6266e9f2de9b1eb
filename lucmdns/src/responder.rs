//! Le répondeur mDNS/DNS-SD coopératif.
//!
//! Un fil dédié possède le socket multicast et déroule la boucle
//! d'événements : lecture avec délai court, traitement des datagrammes,
//! minuteries (sondes à 250 ms, annonces, réponses différées, entretien du
//! cache). Toute la logique d'état vit dans [`Inner`], pilotée par des
//! horloges passées en paramètre, ce qui la rend testable sans réseau.

use crate::cache::Cache;
use crate::message::{
    DnsMessage, QTYPE_ANY, Question, RData, ResourceRecord, TYPE_A, TYPE_PTR, TYPE_SRV, TYPE_TXT,
};
use crate::name::{DnsName, increment_label_suffix};
use crate::record::{
    ANNOUNCE_INTERVAL, ANNOUNCE_MAX_INTERVAL, OwnedRecord, PROBE_COUNT, PROBE_INTERVAL,
    RecordState,
};
use crate::{MdnsError, Result};
use rand::Rng as _;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Groupe multicast mDNS IPv4
pub const MDNS_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
/// Port mDNS
pub const MDNS_PORT: u16 = 5353;

/// TTL annoncé pour les enregistrements d'hôte
const HOST_TTL: u32 = 120;
/// TTL annoncé pour les PTR de service
const SERVICE_TTL: u32 = 4500;

/// Fenêtre de suppression des sondes après un conflit sur un enregistrement
/// actif
const PROBE_SUPPRESSION: Duration = Duration::from_secs(1);

/// Un datagramme à émettre
#[derive(Debug)]
pub(crate) enum Outgoing {
    Multicast(DnsMessage),
    Unicast(DnsMessage, SocketAddr),
}

/// Réponse multicast différée de 20 à 120 ms
struct PendingReply {
    due: Instant,
    message: DnsMessage,
}

/// Question entretenue pour un abonné
struct ActiveQuestion {
    question: Question,
    callback: Box<dyn Fn(&ResourceRecord, bool) + Send>,
}

/// Description d'un service enregistré (pour les renommages solidaires)
struct ServiceGroup {
    instance: Vec<u8>,
    type_name: DnsName,
}

pub(crate) struct Inner {
    records: Vec<Option<OwnedRecord>>,
    groups: Vec<ServiceGroup>,
    hostname: DnsName,
    addr: Ipv4Addr,
    suppress_probes_until: Option<Instant>,
    pending: Vec<PendingReply>,
    cache: Cache,
    questions: Vec<ActiveQuestion>,
    sleeping: bool,
}

impl Inner {
    fn new(hostname: DnsName, addr: Ipv4Addr) -> Self {
        Inner {
            records: Vec::new(),
            groups: Vec::new(),
            hostname,
            addr,
            suppress_probes_until: None,
            pending: Vec::new(),
            cache: Cache::new(),
            questions: Vec::new(),
            sleeping: false,
        }
    }

    fn push_record(&mut self, record: OwnedRecord) -> usize {
        self.records.push(Some(record));
        self.records.len() - 1
    }

    fn live_records(&self) -> impl Iterator<Item = (usize, &OwnedRecord)> {
        self.records
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().map(|r| (i, r)))
    }

    /// Enregistre l'hôte (A) s'il ne l'est pas déjà ; retourne son index
    fn ensure_host_record(&mut self, now: Instant) -> usize {
        if let Some((idx, _)) = self
            .live_records()
            .find(|(_, r)| r.rr.rrtype() == TYPE_A && r.rr.name.equal_ignore_case(&self.hostname))
        {
            return idx;
        }
        let rr = ResourceRecord::new(self.hostname.clone(), HOST_TTL, RData::A(self.addr), true);
        self.push_record(OwnedRecord::new(rr, true, now))
    }

    /// Enregistre un service : PTR partagé + SRV/TXT uniques + A de l'hôte
    fn register_service(
        &mut self,
        instance: &str,
        type_name: &str,
        port: u16,
        txt: Vec<u8>,
        now: Instant,
    ) -> Result<()> {
        let type_name = DnsName::parse_text(type_name)?;
        let instance_label = instance.as_bytes().to_vec();
        let service_name =
            DnsName::from_labels(vec![instance_label.clone()])?.join(&type_name)?;

        let host_idx = self.ensure_host_record(now);
        let group = self.groups.len();
        self.groups.push(ServiceGroup {
            instance: instance_label,
            type_name: type_name.clone(),
        });

        let srv = ResourceRecord::new(
            service_name.clone(),
            HOST_TTL,
            RData::Srv {
                priority: 0,
                weight: 0,
                port,
                target: self.hostname.clone(),
            },
            true,
        );
        let mut srv = OwnedRecord::new(srv, true, now);
        srv.group = Some(group);
        srv.additionals.push(host_idx);
        let srv_idx = self.push_record(srv);

        let txt_rr = ResourceRecord::new(service_name.clone(), HOST_TTL, RData::Txt(txt), true);
        let mut txt_rec = OwnedRecord::new(txt_rr, true, now);
        txt_rec.group = Some(group);
        let txt_idx = self.push_record(txt_rec);

        let ptr = ResourceRecord::new(
            type_name,
            SERVICE_TTL,
            RData::Ptr(service_name),
            false,
        );
        let mut ptr_rec = OwnedRecord::new(ptr, false, now);
        ptr_rec.group = Some(group);
        ptr_rec.additionals.push(srv_idx);
        ptr_rec.additionals.push(txt_idx);
        // le PTR attend que le SRV soit validé avant de s'annoncer
        ptr_rec.next_send = now + PROBE_INTERVAL * PROBE_COUNT as u32;
        self.push_record(ptr_rec);

        Ok(())
    }

    /// Passe de minuterie : sondes, annonces, adieux, réponses différées,
    /// entretien du cache
    fn tick(&mut self, now: Instant) -> Vec<Outgoing> {
        let mut out = Vec::new();

        if let Some(until) = self.suppress_probes_until {
            if now >= until {
                self.suppress_probes_until = None;
            }
        }

        let mut probe = DnsMessage::query();
        let mut announce = DnsMessage::response();
        let mut goodbye = DnsMessage::response();
        let mut freed: Vec<usize> = Vec::new();

        for idx in 0..self.records.len() {
            let Some(record) = self.records[idx].as_mut() else {
                continue;
            };
            if now < record.next_send {
                continue;
            }

            match record.state {
                RecordState::Probing { sent } => {
                    if self.suppress_probes_until.is_some() {
                        record.next_send = now + PROBE_INTERVAL;
                        continue;
                    }
                    if sent < PROBE_COUNT {
                        // la sonde interroge le nom et propose la donnée en
                        // section autorité
                        if !probe
                            .questions
                            .iter()
                            .any(|q| q.name.equal_ignore_case(&record.rr.name))
                        {
                            probe
                                .questions
                                .push(Question::new(record.rr.name.clone(), QTYPE_ANY));
                        }
                        probe.authorities.push(record.rr.clone());
                        record.state = RecordState::Probing { sent: sent + 1 };
                        record.next_send = now + PROBE_INTERVAL;
                    } else {
                        record.state = RecordState::Verified;
                        record.next_send = now;
                    }
                }
                RecordState::Verified => {
                    record.state = RecordState::Active;
                    record.announces_sent = 0;
                    record.announce_interval = ANNOUNCE_INTERVAL;
                    record.next_send = now;
                }
                RecordState::Active => {
                    let keep_announcing = if record.unique {
                        record.announces_sent < 2
                    } else {
                        record.announces_sent < 2
                            || record.announce_interval <= ANNOUNCE_MAX_INTERVAL
                    };
                    if keep_announcing && !self.sleeping {
                        announce.answers.push(record.rr.clone());
                        record.announces_sent += 1;
                        record.next_send = now + record.announce_interval;
                        if !record.unique && record.announces_sent >= 2 {
                            record.announce_interval *= 2;
                        }
                    } else {
                        // plus rien à envoyer : repousse loin
                        record.next_send = now + Duration::from_secs(3600);
                    }
                }
                RecordState::Deregistering => {
                    let mut rr = record.rr.clone();
                    rr.ttl = 0;
                    goodbye.answers.push(rr);
                    freed.push(idx);
                }
            }
        }

        for idx in freed {
            debug!(record = %self.records[idx].as_ref().map(|r| r.rr.name.to_string()).unwrap_or_default(),
                   "Record freed after goodbye");
            self.records[idx] = None;
        }

        if !probe.questions.is_empty() {
            out.push(Outgoing::Multicast(probe));
        }
        if !announce.answers.is_empty() {
            out.push(Outgoing::Multicast(announce));
        }
        if !goodbye.answers.is_empty() {
            out.push(Outgoing::Multicast(goodbye));
        }

        // réponses multicast différées arrivées à échéance
        let mut still_pending = Vec::new();
        for reply in self.pending.drain(..) {
            if reply.due <= now {
                out.push(Outgoing::Multicast(reply.message));
            } else {
                still_pending.push(reply);
            }
        }
        self.pending = still_pending;

        // entretien du cache : re-demandes et adieux d'expiration
        let cache_tick = self.cache.tick(now);
        if !cache_tick.requeries.is_empty() {
            let mut requery = DnsMessage::query();
            for (name, rrtype) in cache_tick.requeries {
                requery.questions.push(Question::new(name, rrtype));
            }
            out.push(Outgoing::Multicast(requery));
        }
        for expired in cache_tick.expired {
            for question in &self.questions {
                if expired.answers(&question.question) {
                    (question.callback)(&expired, true);
                }
            }
        }

        out
    }

    /// Traite un datagramme reçu
    fn handle_packet(&mut self, bytes: &[u8], src: SocketAddr, now: Instant) -> Vec<Outgoing> {
        let message = match DnsMessage::parse(bytes) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, %src, "Dropping malformed datagram");
                return Vec::new();
            }
        };

        if message.is_response() {
            self.handle_response(message, now);
            Vec::new()
        } else {
            self.handle_query(message, src, now)
        }
    }

    /// Réponse reçue : détection de conflits puis mise en cache
    fn handle_response(&mut self, message: DnsMessage, now: Instant) {
        for rr in message
            .answers
            .iter()
            .chain(&message.additionals)
        {
            self.note_conflict(rr, now);

            if let Some(gone) = self.cache.store(rr.clone(), now) {
                for question in &self.questions {
                    if gone.answers(&question.question) {
                        (question.callback)(&gone, true);
                    }
                }
            } else {
                for question in &self.questions {
                    if rr.answers(&question.question) {
                        (question.callback)(rr, false);
                    }
                }
            }
        }
    }

    /// Un enregistrement observé entre-t-il en conflit avec les nôtres ?
    fn note_conflict(&mut self, seen: &ResourceRecord, now: Instant) {
        let mut conflicts: Vec<usize> = Vec::new();

        for (idx, record) in self.live_records() {
            if !record.unique || !record.rr.same_identity(seen) {
                continue;
            }
            if record.rr.rdata == seen.rdata {
                continue; // même donnée : pas un conflit
            }
            conflicts.push(idx);
        }

        for idx in conflicts {
            let (was_active, group) = {
                // un renommage de groupe a pu déjà écarter ce conflit
                let record = self.records[idx]
                    .as_ref()
                    .filter(|r| r.rr.same_identity(seen));
                match record {
                    Some(r) => (matches!(r.state, RecordState::Active), r.group),
                    None => continue,
                }
            };

            if was_active {
                // étouffe les nouvelles sondes une seconde, sinon deux hôtes
                // en conflit se relancent en rafale
                self.suppress_probes_until = Some(now + PROBE_SUPPRESSION);
            }
            self.rename_after_conflict(idx, group, now);
        }
    }

    /// Sonde simultanée : le rdata qui trie le premier gagne
    fn note_simultaneous_probe(&mut self, proposed: &ResourceRecord, now: Instant) {
        let mut losers: Vec<(usize, Option<usize>)> = Vec::new();

        for (idx, record) in self.live_records() {
            if !matches!(record.state, RecordState::Probing { .. }) {
                continue;
            }
            if !record.rr.same_identity(proposed) || record.rr.rdata == proposed.rdata {
                continue;
            }
            if proposed.probe_order(&record.rr) == std::cmp::Ordering::Less {
                losers.push((idx, record.group));
            }
        }

        for (idx, group) in losers {
            let still_conflicting = self.records[idx]
                .as_ref()
                .is_some_and(|r| r.rr.same_identity(proposed));
            if still_conflicting {
                self.rename_after_conflict(idx, group, now);
            }
        }
    }

    /// Renomme l'enregistrement (et son groupe de service) puis relance les
    /// sondes
    fn rename_after_conflict(&mut self, idx: usize, group: Option<usize>, now: Instant) {
        match group {
            Some(group_id) => {
                let new_instance = {
                    let group = &mut self.groups[group_id];
                    group.instance = increment_label_suffix(&group.instance);
                    group.instance.clone()
                };
                let type_name = self.groups[group_id].type_name.clone();
                info!(
                    instance = %String::from_utf8_lossy(&new_instance),
                    "Name conflict, service renamed"
                );

                let renamed = DnsName::from_labels(vec![new_instance])
                    .and_then(|n| n.join(&type_name));
                let Ok(service_name) = renamed else {
                    warn!("Renamed service name is invalid, record kept as-is");
                    return;
                };

                for record in self.records.iter_mut().flatten() {
                    if record.group != Some(group_id) {
                        continue;
                    }
                    match &mut record.rr.rdata {
                        RData::Ptr(target) => *target = service_name.clone(),
                        _ => record.rr.name = service_name.clone(),
                    }
                    record.restart_probing(now);
                }
            }
            None => {
                let Some(record) = self.records[idx].as_mut() else {
                    return;
                };
                if let Some(first) = record.rr.name.first_label() {
                    let renamed = increment_label_suffix(first);
                    info!(
                        name = %record.rr.name,
                        "Name conflict, record relabeled"
                    );
                    let _ = record.rr.name.set_first_label(renamed);
                }
                record.restart_probing(now);
            }
        }
    }

    /// Question reçue : réponses locales avec suppression des réponses
    /// connues et enregistrements joints
    fn handle_query(
        &mut self,
        message: DnsMessage,
        src: SocketAddr,
        now: Instant,
    ) -> Vec<Outgoing> {
        // une requête avec section autorité est une sonde concurrente
        for proposed in &message.authorities {
            self.note_simultaneous_probe(proposed, now);
        }

        let mut answers: Vec<ResourceRecord> = Vec::new();
        let mut additional_idx: Vec<usize> = Vec::new();
        let mut wants_unicast = src.port() != MDNS_PORT;
        let mut all_questions_answered = !message.questions.is_empty();

        for question in &message.questions {
            if question.wants_unicast_reply() {
                wants_unicast = true;
            }

            let mut answered = false;
            for (_, record) in self.live_records() {
                if !record.answerable() || !record.rr.answers(question) {
                    continue;
                }

                // suppression des réponses connues : le demandeur tient déjà
                // la donnée avec au moins la moitié du TTL
                let known = message.answers.iter().any(|known| {
                    known.same_identity(&record.rr)
                        && known.rdata == record.rr.rdata
                        && known.ttl >= record.rr.ttl / 2
                });
                if known {
                    answered = true;
                    continue;
                }

                if !answers
                    .iter()
                    .any(|a| a.same_identity(&record.rr) && a.rdata == record.rr.rdata)
                {
                    answers.push(record.rr.clone());
                    additional_idx.extend(&record.additionals);
                    answered = true;
                }
            }

            if !answered {
                all_questions_answered = false;
            }
        }

        if answers.is_empty() {
            return Vec::new();
        }

        // enregistrements joints : les chaînes Additional sont suivies de
        // proche en proche, et chaque SRV entraîne l'A de sa cible
        let mut additionals: Vec<ResourceRecord> = Vec::new();
        let mut visited: Vec<usize> = Vec::new();
        let mut worklist = additional_idx;

        while let Some(idx) = worklist.pop() {
            if visited.contains(&idx) {
                continue;
            }
            visited.push(idx);
            if let Some(Some(record)) = self.records.get(idx) {
                if record.answerable() {
                    if !additionals
                        .iter()
                        .any(|a| a.same_identity(&record.rr) && a.rdata == record.rr.rdata)
                    {
                        additionals.push(record.rr.clone());
                    }
                    worklist.extend(&record.additionals);
                }
            }
        }

        let srv_targets: Vec<DnsName> = answers
            .iter()
            .chain(&additionals)
            .filter_map(|rr| match &rr.rdata {
                RData::Srv { target, .. } => Some(target.clone()),
                _ => None,
            })
            .collect();
        for target in srv_targets {
            for (_, record) in self.live_records() {
                if record.answerable()
                    && record.rr.rrtype() == TYPE_A
                    && record.rr.name.equal_ignore_case(&target)
                    && !additionals
                        .iter()
                        .any(|a| a.same_identity(&record.rr) && a.rdata == record.rr.rdata)
                {
                    additionals.push(record.rr.clone());
                }
            }
        }

        additionals.retain(|a| {
            !answers
                .iter()
                .any(|ans| ans.same_identity(a) && ans.rdata == a.rdata)
        });

        let mut response = DnsMessage::response();
        response.id = if wants_unicast { message.id } else { 0 };
        response.answers = answers;
        response.additionals = additionals;

        if wants_unicast {
            vec![Outgoing::Unicast(response, src)]
        } else if all_questions_answered {
            vec![Outgoing::Multicast(response)]
        } else {
            // réponse partielle : différée de 20 à 120 ms pour laisser les
            // autres répondeurs se dédoublonner
            let delay = Duration::from_millis(rand::rng().random_range(20..=120));
            self.pending.push(PendingReply {
                due: now + delay,
                message: response,
            });
            Vec::new()
        }
    }

    /// Mise en sommeil : adieu des enregistrements partagés
    fn sleep(&mut self, _now: Instant) -> Vec<Outgoing> {
        if self.sleeping {
            return Vec::new();
        }
        self.sleeping = true;

        let mut goodbye = DnsMessage::response();
        for (_, record) in self.live_records() {
            if !record.unique {
                let mut rr = record.rr.clone();
                rr.ttl = 0;
                goodbye.answers.push(rr);
            }
        }

        if goodbye.answers.is_empty() {
            Vec::new()
        } else {
            vec![Outgoing::Multicast(goodbye)]
        }
    }

    /// Réveil : chaque enregistrement validé repart en sondage complet, les
    /// questions actives repartent immédiatement
    fn wake(&mut self, now: Instant) -> Vec<Outgoing> {
        if !self.sleeping {
            return Vec::new();
        }
        self.sleeping = false;

        for record in self.records.iter_mut().flatten() {
            record.restart_probing(now);
        }

        let mut requery = DnsMessage::query();
        for question in &self.questions {
            requery.questions.push(question.question.clone());
        }

        if requery.questions.is_empty() {
            Vec::new()
        } else {
            vec![Outgoing::Multicast(requery)]
        }
    }

    /// Demande le retrait de tous les enregistrements
    fn deregister_all(&mut self, now: Instant) {
        for record in self.records.iter_mut().flatten() {
            record.state = RecordState::Deregistering;
            record.next_send = now;
        }
    }
}

/// Le répondeur public
pub struct Responder {
    inner: Arc<Mutex<Inner>>,
    socket: Arc<UdpSocket>,
    running: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

fn open_socket(iface: Ipv4Addr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MDNS_PORT).into())?;
    socket.join_multicast_v4(&MDNS_GROUP, &iface)?;
    socket.set_multicast_ttl_v4(255)?;
    socket.set_multicast_loop_v4(false)?;
    socket.set_read_timeout(Some(Duration::from_millis(50)))?;
    Ok(socket.into())
}

impl Responder {
    /// Démarre le répondeur sur l'interface portant `addr` (devinée si
    /// absente) et annonce `hostname`.local
    pub fn start(hostname: &str, addr: Option<Ipv4Addr>) -> Result<Self> {
        let addr = addr.unwrap_or_else(lucutils::guess_local_ip);
        let hostname = DnsName::parse_text(hostname)?.join(&DnsName::parse_text("local")?)?;

        let socket = Arc::new(open_socket(addr).map_err(MdnsError::Io)?);
        let inner = Arc::new(Mutex::new(Inner::new(hostname.clone(), addr)));
        let running = Arc::new(AtomicBool::new(true));

        let loop_inner = inner.clone();
        let loop_socket = socket.clone();
        let loop_running = running.clone();

        let handle = std::thread::Builder::new()
            .name("luc-mdns".to_string())
            .spawn(move || {
                event_loop(loop_inner, loop_socket, loop_running);
            })
            .map_err(|e| MdnsError::Io(std::io::Error::other(e)))?;

        info!(hostname = %hostname, %addr, "mDNS responder started");

        Ok(Responder {
            inner,
            socket,
            running,
            handle: Some(handle),
        })
    }

    /// Annonce un service (`_daap._tcp.local`, etc.) sur le port donné
    pub fn register_service(
        &self,
        instance: &str,
        type_name: &str,
        port: u16,
        txt: &[(&str, &str)],
    ) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| MdnsError::Poisoned)?;
        inner.register_service(instance, type_name, port, txt_from_pairs(txt), Instant::now())
    }

    /// S'abonne aux enregistrements répondant à `(name, rrtype)` ; le rappel
    /// reçoit l'enregistrement et vrai s'il s'agit d'un adieu
    pub fn subscribe(
        &self,
        name: &str,
        rrtype: u16,
        callback: impl Fn(&ResourceRecord, bool) + Send + 'static,
    ) -> Result<()> {
        let name = DnsName::parse_text(name)?;
        let mut inner = self.inner.lock().map_err(|_| MdnsError::Poisoned)?;
        inner.questions.push(ActiveQuestion {
            question: Question::new(name.clone(), rrtype),
            callback: Box::new(callback),
        });

        let mut query = DnsMessage::query();
        query.questions.push(Question::new(name, rrtype));
        drop(inner);
        self.send(Outgoing::Multicast(query));
        Ok(())
    }

    /// Mise en sommeil (adieux des enregistrements partagés), idempotente
    pub fn sleep(&self) {
        let out = match self.inner.lock() {
            Ok(mut inner) => inner.sleep(Instant::now()),
            Err(_) => return,
        };
        for message in out {
            self.send(message);
        }
    }

    /// Réveil : resondage complet et relance des questions, idempotent
    pub fn wake(&self) {
        let out = match self.inner.lock() {
            Ok(mut inner) => inner.wake(Instant::now()),
            Err(_) => return,
        };
        for message in out {
            self.send(message);
        }
    }

    fn send(&self, outgoing: Outgoing) {
        send_on(&self.socket, outgoing);
    }

    /// Retire les annonces puis arrête la boucle
    pub fn shutdown(mut self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.deregister_all(Instant::now());
        }
        // laisse un tour de boucle émettre les adieux
        std::thread::sleep(Duration::from_millis(120));
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn send_on(socket: &UdpSocket, outgoing: Outgoing) {
    let (message, target): (DnsMessage, SocketAddr) = match outgoing {
        Outgoing::Multicast(m) => (m, SocketAddrV4::new(MDNS_GROUP, MDNS_PORT).into()),
        Outgoing::Unicast(m, target) => (m, target),
    };
    if let Err(e) = socket.send_to(&message.emit(), target) {
        warn!(error = %e, %target, "mDNS send failed");
    }
}

fn event_loop(inner: Arc<Mutex<Inner>>, socket: Arc<UdpSocket>, running: Arc<AtomicBool>) {
    let mut buf = [0u8; 9000];

    while running.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((len, src)) => {
                let out = match inner.lock() {
                    Ok(mut inner) => inner.handle_packet(&buf[..len], src, Instant::now()),
                    Err(_) => break,
                };
                for message in out {
                    send_on(&socket, message);
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                warn!(error = %e, "mDNS receive failed");
                std::thread::sleep(Duration::from_millis(100));
            }
        }

        let out = match inner.lock() {
            Ok(mut inner) => inner.tick(Instant::now()),
            Err(_) => break,
        };
        for message in out {
            send_on(&socket, message);
        }
    }
}

/// Construit un rdata TXT à partir de paires clef/valeur ; un TXT vide est
/// un octet nul unique
pub fn txt_from_pairs(pairs: &[(&str, &str)]) -> Vec<u8> {
    if pairs.is_empty() {
        return vec![0];
    }
    let mut out = Vec::new();
    for (key, value) in pairs {
        let entry = format!("{key}={value}");
        let bytes = entry.as_bytes();
        let len = bytes.len().min(255);
        out.push(len as u8);
        out.extend_from_slice(&bytes[..len]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(text: &str) -> DnsName {
        DnsName::parse_text(text).unwrap()
    }

    fn test_inner() -> Inner {
        Inner::new(name("grenier.local"), Ipv4Addr::new(192, 168, 1, 42))
    }

    fn register(inner: &mut Inner, instance: &str, now: Instant) {
        inner
            .register_service(instance, "_daap._tcp.local", 3689, txt_from_pairs(&[]), now)
            .unwrap();
    }

    fn drain_multicast(out: Vec<Outgoing>) -> Vec<DnsMessage> {
        out.into_iter()
            .map(|o| match o {
                Outgoing::Multicast(m) => m,
                Outgoing::Unicast(m, _) => m,
            })
            .collect()
    }

    /// Fait avancer le répondeur jusqu'à stabilisation, en comptant les
    /// transmissions de sondes
    fn settle(inner: &mut Inner, start: Instant, seconds: u64) -> (u32, Vec<DnsMessage>) {
        let mut probes = 0;
        let mut messages = Vec::new();
        for ms in (0..seconds * 1000).step_by(50) {
            let now = start + Duration::from_millis(ms);
            for message in drain_multicast(inner.tick(now)) {
                if !message.is_response() && !message.authorities.is_empty() {
                    probes += 1;
                }
                messages.push(message);
            }
        }
        (probes, messages)
    }

    #[test]
    fn test_unique_records_probe_exactly_three_times() {
        let mut inner = test_inner();
        let start = Instant::now();
        register(&mut inner, "Salon", start);

        let (probes, messages) = settle(&mut inner, start, 3);
        assert_eq!(probes, 3);

        // après les sondes, les annonces portent les enregistrements
        let announced: Vec<_> = messages
            .iter()
            .filter(|m| m.is_response())
            .flat_map(|m| &m.answers)
            .collect();
        assert!(announced.iter().any(|r| r.rrtype() == TYPE_SRV));
        assert!(announced.iter().any(|r| r.rrtype() == TYPE_PTR));
        assert!(announced.iter().any(|r| r.rrtype() == TYPE_A));
        assert!(announced.iter().any(|r| r.rrtype() == TYPE_TXT));
    }

    #[test]
    fn test_probe_carries_authority_section() {
        let mut inner = test_inner();
        let start = Instant::now();
        register(&mut inner, "Salon", start);

        let messages = drain_multicast(inner.tick(start));
        let probe = messages.iter().find(|m| !m.is_response()).unwrap();
        assert!(!probe.questions.is_empty());
        assert_eq!(probe.questions[0].qtype, QTYPE_ANY);
        assert!(!probe.authorities.is_empty());
    }

    #[test]
    fn test_answers_matching_query() {
        let mut inner = test_inner();
        let start = Instant::now();
        register(&mut inner, "Salon", start);
        settle(&mut inner, start, 3);

        let mut query = DnsMessage::query();
        query
            .questions
            .push(Question::new(name("_daap._tcp.local"), TYPE_PTR));
        let src: SocketAddr = "192.168.1.9:5353".parse().unwrap();

        let now = start + Duration::from_secs(4);
        let out = inner.handle_packet(&query.emit(), src, now);
        // toutes les questions ont une réponse locale : multicast immédiat
        assert_eq!(out.len(), 1);
        let Outgoing::Multicast(response) = &out[0] else {
            panic!("expected multicast reply");
        };
        assert!(response.is_response());
        assert_eq!(response.answers.len(), 1);
        assert_eq!(response.answers[0].rrtype(), TYPE_PTR);
        // le SRV, le TXT et l'A suivent en enregistrements joints
        assert!(response.additionals.iter().any(|r| r.rrtype() == TYPE_SRV));
        assert!(response.additionals.iter().any(|r| r.rrtype() == TYPE_A));
    }

    #[test]
    fn test_unicast_reply_for_legacy_source_port() {
        let mut inner = test_inner();
        let start = Instant::now();
        register(&mut inner, "Salon", start);
        settle(&mut inner, start, 3);

        let mut query = DnsMessage::query();
        query.id = 0x1234;
        query
            .questions
            .push(Question::new(name("_daap._tcp.local"), TYPE_PTR));
        let src: SocketAddr = "192.168.1.9:49152".parse().unwrap();

        let out = inner.handle_packet(&query.emit(), src, start + Duration::from_secs(4));
        assert_eq!(out.len(), 1);
        let Outgoing::Unicast(response, target) = &out[0] else {
            panic!("expected unicast reply");
        };
        assert_eq!(*target, src);
        assert_eq!(response.id, 0x1234);
    }

    #[test]
    fn test_known_answer_suppression() {
        let mut inner = test_inner();
        let start = Instant::now();
        register(&mut inner, "Salon", start);
        settle(&mut inner, start, 3);

        let mut query = DnsMessage::query();
        query
            .questions
            .push(Question::new(name("_daap._tcp.local"), TYPE_PTR));
        // le demandeur connaît déjà le PTR avec un TTL confortable
        query.answers.push(ResourceRecord::new(
            name("_daap._tcp.local"),
            SERVICE_TTL,
            RData::Ptr(name("Salon._daap._tcp.local")),
            false,
        ));
        let src: SocketAddr = "192.168.1.9:5353".parse().unwrap();

        let out = inner.handle_packet(&query.emit(), src, start + Duration::from_secs(4));
        assert!(out.is_empty());
        assert!(inner.pending.is_empty());
    }

    #[test]
    fn test_known_answer_with_low_ttl_not_suppressed() {
        let mut inner = test_inner();
        let start = Instant::now();
        register(&mut inner, "Salon", start);
        settle(&mut inner, start, 3);

        let mut query = DnsMessage::query();
        query
            .questions
            .push(Question::new(name("_daap._tcp.local"), TYPE_PTR));
        query.answers.push(ResourceRecord::new(
            name("_daap._tcp.local"),
            SERVICE_TTL / 2 - 1,
            RData::Ptr(name("Salon._daap._tcp.local")),
            false,
        ));
        let src: SocketAddr = "192.168.1.9:5353".parse().unwrap();

        let out = inner.handle_packet(&query.emit(), src, start + Duration::from_secs(4));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_probe_conflict_renames_and_restarts() {
        let mut inner = test_inner();
        let start = Instant::now();
        register(&mut inner, "Salon", start);
        // première sonde émise
        inner.tick(start);

        // un concurrent répond avec un SRV différent sous le même nom
        let mut response = DnsMessage::response();
        response.answers.push(ResourceRecord::new(
            name("Salon._daap._tcp.local"),
            120,
            RData::Srv {
                priority: 0,
                weight: 0,
                port: 9999,
                target: name("autre.local"),
            },
            true,
        ));
        inner.handle_response(response, start + Duration::from_millis(100));

        let renamed: Vec<String> = inner
            .live_records()
            .filter(|(_, r)| r.rr.rrtype() == TYPE_SRV)
            .map(|(_, r)| r.rr.name.to_string())
            .collect();
        assert_eq!(renamed, vec!["Salon2._daap._tcp.local".to_string()]);

        // et les sondes repartent de zéro
        let srv = inner
            .live_records()
            .find(|(_, r)| r.rr.rrtype() == TYPE_SRV)
            .unwrap()
            .1;
        assert_eq!(srv.state, RecordState::Probing { sent: 0 });
    }

    #[test]
    fn test_simultaneous_probe_tiebreak() {
        // notre rdata trie en premier : le concurrent dont la donnée trie
        // après nous ne nous déloge pas
        let mut inner = test_inner();
        let start = Instant::now();
        register(&mut inner, "Salon", start);
        inner.tick(start);

        let ours = inner
            .live_records()
            .find(|(_, r)| r.rr.rrtype() == TYPE_SRV)
            .unwrap()
            .1
            .rr
            .clone();

        // concurrent avec un port plus grand : son rdata trie après le nôtre
        let mut competing = ours.clone();
        if let RData::Srv { port, .. } = &mut competing.rdata {
            *port = 65000;
        }
        let mut probe = DnsMessage::query();
        probe
            .questions
            .push(Question::new(ours.name.clone(), QTYPE_ANY));
        probe.authorities.push(competing);
        let src: SocketAddr = "192.168.1.9:5353".parse().unwrap();
        inner.handle_packet(&probe.emit(), src, start + Duration::from_millis(10));

        let srv_name = inner
            .live_records()
            .find(|(_, r)| r.rr.rrtype() == TYPE_SRV)
            .unwrap()
            .1
            .rr
            .name
            .to_string();
        assert_eq!(srv_name, "Salon._daap._tcp.local");

        // concurrent dont le rdata trie avant le nôtre : nous perdons
        let mut winning = ours.clone();
        if let RData::Srv { port, .. } = &mut winning.rdata {
            *port = 1;
        }
        let mut probe = DnsMessage::query();
        probe
            .questions
            .push(Question::new(ours.name.clone(), QTYPE_ANY));
        probe.authorities.push(winning);
        inner.handle_packet(&probe.emit(), src, start + Duration::from_millis(20));

        let srv_name = inner
            .live_records()
            .find(|(_, r)| r.rr.rrtype() == TYPE_SRV)
            .unwrap()
            .1
            .rr
            .name
            .to_string();
        assert_eq!(srv_name, "Salon2._daap._tcp.local");
    }

    #[test]
    fn test_active_conflict_suppresses_probes_for_one_second() {
        let mut inner = test_inner();
        let start = Instant::now();
        register(&mut inner, "Salon", start);
        settle(&mut inner, start, 3);

        let mut response = DnsMessage::response();
        response.answers.push(ResourceRecord::new(
            name("Salon._daap._tcp.local"),
            120,
            RData::Srv {
                priority: 0,
                weight: 0,
                port: 9999,
                target: name("autre.local"),
            },
            true,
        ));
        let now = start + Duration::from_secs(4);
        inner.handle_response(response, now);

        assert!(inner.suppress_probes_until.is_some());

        // pendant la fenêtre de suppression, aucune sonde ne part
        let out = drain_multicast(inner.tick(now + Duration::from_millis(100)));
        assert!(
            out.iter()
                .all(|m| m.is_response() || m.authorities.is_empty())
        );

        // après la fenêtre, le sondage reprend
        let (probes, _) = settle(&mut inner, now + Duration::from_secs(2), 2);
        assert_eq!(probes, 3);
    }

    #[test]
    fn test_sleep_sends_shared_goodbyes_and_wake_reprobes() {
        let mut inner = test_inner();
        let start = Instant::now();
        register(&mut inner, "Salon", start);
        settle(&mut inner, start, 3);

        let now = start + Duration::from_secs(4);
        let out = drain_multicast(inner.sleep(now));
        assert_eq!(out.len(), 1);
        assert!(out[0].answers.iter().all(|r| r.ttl == 0));
        assert!(out[0].answers.iter().any(|r| r.rrtype() == TYPE_PTR));

        // idempotent
        assert!(inner.sleep(now).is_empty());

        inner.wake(now + Duration::from_secs(1));
        let unique_states: Vec<RecordState> = inner
            .live_records()
            .filter(|(_, r)| r.unique)
            .map(|(_, r)| r.state)
            .collect();
        assert!(
            unique_states
                .iter()
                .all(|s| *s == RecordState::Probing { sent: 0 })
        );

        // idempotent aussi
        assert!(inner.wake(now + Duration::from_secs(2)).is_empty());
    }

    #[test]
    fn test_deregister_emits_goodbye_then_frees() {
        let mut inner = test_inner();
        let start = Instant::now();
        register(&mut inner, "Salon", start);
        settle(&mut inner, start, 3);

        let now = start + Duration::from_secs(5);
        inner.deregister_all(now);
        let out = drain_multicast(inner.tick(now));

        let goodbyes: Vec<_> = out
            .iter()
            .filter(|m| m.is_response())
            .flat_map(|m| &m.answers)
            .collect();
        assert!(!goodbyes.is_empty());
        assert!(goodbyes.iter().all(|r| r.ttl == 0));
        assert_eq!(inner.live_records().count(), 0);
    }

    #[test]
    fn test_txt_from_pairs() {
        assert_eq!(txt_from_pairs(&[]), vec![0]);
        let txt = txt_from_pairs(&[("txtvers", "1")]);
        assert_eq!(txt[0], 9);
        assert_eq!(&txt[1..], b"txtvers=1");
    }
}

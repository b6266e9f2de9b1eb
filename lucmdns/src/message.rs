//! Cadrage RFC-1035 des messages DNS sur UDP.
//!
//! Seuls les types utilisés par DNS-SD sont compris : A, PTR, TXT, SRV,
//! CNAME. Le bit « cache-flush » est le bit de poids fort du champ classe et
//! doit être posé sur les enregistrements uniques.

use crate::name::DnsName;
use crate::{MdnsError, Result};
use std::collections::HashMap;
use std::net::Ipv4Addr;

pub const TYPE_A: u16 = 1;
pub const TYPE_CNAME: u16 = 5;
pub const TYPE_PTR: u16 = 12;
pub const TYPE_TXT: u16 = 16;
pub const TYPE_SRV: u16 = 33;
pub const QTYPE_ANY: u16 = 255;

pub const CLASS_IN: u16 = 1;
/// Bit cache-flush (réponses) / unicast-response (questions)
pub const CLASS_UNIQUE: u16 = 0x8000;

pub const FLAG_RESPONSE: u16 = 0x8000;
pub const FLAG_AUTHORITATIVE: u16 = 0x0400;

/// Une question
#[derive(Debug, Clone)]
pub struct Question {
    pub name: DnsName,
    pub qtype: u16,
    /// Classe avec l'éventuel bit unicast-response
    pub qclass: u16,
}

impl Question {
    pub fn new(name: DnsName, qtype: u16) -> Self {
        Question {
            name,
            qtype,
            qclass: CLASS_IN,
        }
    }

    pub fn wants_unicast_reply(&self) -> bool {
        self.qclass & CLASS_UNIQUE != 0
    }

    pub fn class(&self) -> u16 {
        self.qclass & !CLASS_UNIQUE
    }
}

/// Données d'un enregistrement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    Ptr(DnsName),
    Cname(DnsName),
    Txt(Vec<u8>),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: DnsName,
    },
}

impl RData {
    pub fn rrtype(&self) -> u16 {
        match self {
            RData::A(_) => TYPE_A,
            RData::Ptr(_) => TYPE_PTR,
            RData::Cname(_) => TYPE_CNAME,
            RData::Txt(_) => TYPE_TXT,
            RData::Srv { .. } => TYPE_SRV,
        }
    }

    /// Forme filaire non compressée (comparaisons, départage de sondes)
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            RData::A(addr) => buf.extend_from_slice(&addr.octets()),
            RData::Ptr(name) | RData::Cname(name) => buf.extend_from_slice(&name.to_wire()),
            RData::Txt(data) => buf.extend_from_slice(data),
            RData::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                buf.extend_from_slice(&priority.to_be_bytes());
                buf.extend_from_slice(&weight.to_be_bytes());
                buf.extend_from_slice(&port.to_be_bytes());
                buf.extend_from_slice(&target.to_wire());
            }
        }
        buf
    }
}

/// Un enregistrement de ressource
#[derive(Debug, Clone)]
pub struct ResourceRecord {
    pub name: DnsName,
    /// Bit cache-flush : posé sur les enregistrements uniques
    pub cache_flush: bool,
    pub class: u16,
    pub ttl: u32,
    pub rdata: RData,
}

impl ResourceRecord {
    pub fn new(name: DnsName, ttl: u32, rdata: RData, unique: bool) -> Self {
        ResourceRecord {
            name,
            cache_flush: unique,
            class: CLASS_IN,
            ttl,
            rdata,
        }
    }

    pub fn rrtype(&self) -> u16 {
        self.rdata.rrtype()
    }

    /// Même (nom, type, classe) ?
    pub fn same_identity(&self, other: &ResourceRecord) -> bool {
        self.rrtype() == other.rrtype()
            && self.class == other.class
            && self.name.equal_ignore_case(&other.name)
    }

    /// Cet enregistrement répond-il à la question ? CNAME répond à tout
    /// qtype ; `ANY` accepte tous les types.
    pub fn answers(&self, question: &Question) -> bool {
        if self.rrtype() != TYPE_CNAME
            && self.rrtype() != question.qtype
            && question.qtype != QTYPE_ANY
        {
            return false;
        }
        self.class == question.class() && self.name.equal_ignore_case(&question.name)
    }

    /// Ordre lexicographique (classe, type, rdata) pour départager deux
    /// sondes simultanées
    pub fn probe_order(&self, other: &ResourceRecord) -> std::cmp::Ordering {
        (self.class, self.rrtype(), self.rdata.to_wire()).cmp(&(
            other.class,
            other.rrtype(),
            other.rdata.to_wire(),
        ))
    }

    fn emit(&self, buf: &mut Vec<u8>, offsets: &mut HashMap<Vec<u8>, u16>) {
        self.name.emit(buf, offsets);
        buf.extend_from_slice(&self.rrtype().to_be_bytes());
        let class = if self.cache_flush {
            self.class | CLASS_UNIQUE
        } else {
            self.class
        };
        buf.extend_from_slice(&class.to_be_bytes());
        buf.extend_from_slice(&self.ttl.to_be_bytes());

        // longueur inscrite après coup : la compression du rdata la change
        let len_pos = buf.len();
        buf.extend_from_slice(&[0, 0]);
        match &self.rdata {
            RData::A(addr) => buf.extend_from_slice(&addr.octets()),
            RData::Ptr(name) | RData::Cname(name) => name.emit(buf, offsets),
            RData::Txt(data) => buf.extend_from_slice(data),
            RData::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                buf.extend_from_slice(&priority.to_be_bytes());
                buf.extend_from_slice(&weight.to_be_bytes());
                buf.extend_from_slice(&port.to_be_bytes());
                target.emit(buf, offsets);
            }
        }
        let rdlen = (buf.len() - len_pos - 2) as u16;
        buf[len_pos..len_pos + 2].copy_from_slice(&rdlen.to_be_bytes());
    }
}

/// Un message complet
#[derive(Debug, Clone, Default)]
pub struct DnsMessage {
    pub id: u16,
    pub flags: u16,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authorities: Vec<ResourceRecord>,
    pub additionals: Vec<ResourceRecord>,
}

impl DnsMessage {
    pub fn query() -> Self {
        DnsMessage::default()
    }

    pub fn response() -> Self {
        DnsMessage {
            flags: FLAG_RESPONSE | FLAG_AUTHORITATIVE,
            ..DnsMessage::default()
        }
    }

    pub fn is_response(&self) -> bool {
        self.flags & FLAG_RESPONSE != 0
    }

    /// Sérialise le message ; la compression ne référence que le message
    /// en cours
    pub fn emit(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(512);
        let mut offsets: HashMap<Vec<u8>, u16> = HashMap::new();

        buf.extend_from_slice(&self.id.to_be_bytes());
        buf.extend_from_slice(&self.flags.to_be_bytes());
        buf.extend_from_slice(&(self.questions.len() as u16).to_be_bytes());
        buf.extend_from_slice(&(self.answers.len() as u16).to_be_bytes());
        buf.extend_from_slice(&(self.authorities.len() as u16).to_be_bytes());
        buf.extend_from_slice(&(self.additionals.len() as u16).to_be_bytes());

        for question in &self.questions {
            question.name.emit(&mut buf, &mut offsets);
            buf.extend_from_slice(&question.qtype.to_be_bytes());
            buf.extend_from_slice(&question.qclass.to_be_bytes());
        }
        for record in self
            .answers
            .iter()
            .chain(&self.authorities)
            .chain(&self.additionals)
        {
            record.emit(&mut buf, &mut offsets);
        }

        buf
    }

    /// Analyse un datagramme ; toute malformation interrompt l'analyse
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 12 {
            return Err(MdnsError::Truncated);
        }

        let id = u16::from_be_bytes([bytes[0], bytes[1]]);
        let flags = u16::from_be_bytes([bytes[2], bytes[3]]);
        let qd = u16::from_be_bytes([bytes[4], bytes[5]]) as usize;
        let an = u16::from_be_bytes([bytes[6], bytes[7]]) as usize;
        let ns = u16::from_be_bytes([bytes[8], bytes[9]]) as usize;
        let ar = u16::from_be_bytes([bytes[10], bytes[11]]) as usize;

        let mut pos = 12;
        let mut questions = Vec::with_capacity(qd);
        for _ in 0..qd {
            let (name, next) = DnsName::decode(bytes, pos)?;
            let qtype = read_u16(bytes, next)?;
            let qclass = read_u16(bytes, next + 2)?;
            pos = next + 4;
            questions.push(Question {
                name,
                qtype,
                qclass,
            });
        }

        let mut sections = [
            Vec::with_capacity(an),
            Vec::with_capacity(ns),
            Vec::with_capacity(ar),
        ];
        for (section, count) in sections.iter_mut().zip([an, ns, ar]) {
            for _ in 0..count {
                let (record, next) = parse_record(bytes, pos)?;
                pos = next;
                if let Some(record) = record {
                    section.push(record);
                }
            }
        }

        let [answers, authorities, additionals] = sections;
        Ok(DnsMessage {
            id,
            flags,
            questions,
            answers,
            authorities,
            additionals,
        })
    }
}

fn read_u16(bytes: &[u8], pos: usize) -> Result<u16> {
    let slice = bytes.get(pos..pos + 2).ok_or(MdnsError::Truncated)?;
    Ok(u16::from_be_bytes([slice[0], slice[1]]))
}

fn read_u32(bytes: &[u8], pos: usize) -> Result<u32> {
    let slice = bytes.get(pos..pos + 4).ok_or(MdnsError::Truncated)?;
    Ok(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

/// Analyse un enregistrement ; `None` pour un type que nous ne gérons pas
/// (l'enregistrement est sauté, pas le message)
fn parse_record(bytes: &[u8], pos: usize) -> Result<(Option<ResourceRecord>, usize)> {
    let (name, next) = DnsName::decode(bytes, pos)?;
    let rrtype = read_u16(bytes, next)?;
    let raw_class = read_u16(bytes, next + 2)?;
    let ttl = read_u32(bytes, next + 4)?;
    let rdlen = read_u16(bytes, next + 8)? as usize;
    let rdata_start = next + 10;
    let rdata_bytes = bytes
        .get(rdata_start..rdata_start + rdlen)
        .ok_or(MdnsError::Truncated)?;
    let end = rdata_start + rdlen;

    let rdata = match rrtype {
        TYPE_A => {
            if rdlen != 4 {
                return Err(MdnsError::BadRecord);
            }
            Some(RData::A(Ipv4Addr::new(
                rdata_bytes[0],
                rdata_bytes[1],
                rdata_bytes[2],
                rdata_bytes[3],
            )))
        }
        TYPE_PTR | TYPE_CNAME => {
            let (target, _) = DnsName::decode(bytes, rdata_start)?;
            if rrtype == TYPE_PTR {
                Some(RData::Ptr(target))
            } else {
                Some(RData::Cname(target))
            }
        }
        TYPE_TXT => Some(RData::Txt(rdata_bytes.to_vec())),
        TYPE_SRV => {
            if rdlen < 7 {
                return Err(MdnsError::BadRecord);
            }
            let (target, _) = DnsName::decode(bytes, rdata_start + 6)?;
            Some(RData::Srv {
                priority: read_u16(bytes, rdata_start)?,
                weight: read_u16(bytes, rdata_start + 2)?,
                port: read_u16(bytes, rdata_start + 4)?,
                target,
            })
        }
        _ => None,
    };

    Ok((
        rdata.map(|rdata| ResourceRecord {
            name,
            cache_flush: raw_class & CLASS_UNIQUE != 0,
            class: raw_class & !CLASS_UNIQUE,
            ttl,
            rdata,
        }),
        end,
    ))
}

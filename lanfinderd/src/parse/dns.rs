//! DNS message decoding for mDNS traffic, on top of `hickory-proto`.
//!
//! Records are read one at a time so a single bad record does not hide the
//! rest: a record hickory cannot decode is skipped by its RDLENGTH, and a
//! record section that ends early keeps the records decoded so far. Only the
//! record types discovery cares about are kept.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use hickory_proto::error::ProtoResult;
use hickory_proto::op;
use hickory_proto::rr::{self, RData};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncodable};
use crate::error::ParseError;

const HEADER_LEN: usize = 12;

/// A domain name as a list of labels. Labels may themselves contain dots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Name {
    labels: Vec<String>,
}

impl Name {
    /// Parses a dotted name, rejecting labels DNS cannot encode.
    pub fn parse(dotted: &str) -> Option<Self> {
        let labels: Vec<String> = dotted
            .trim_end_matches('.')
            .split('.')
            .map(str::to_string)
            .collect();

        if labels.iter().any(|l| l.is_empty()) {
            return None;
        }
        let name = Self { labels };
        name.to_wire().ok().map(|_| name)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Everything after the first label, e.g. the service type of an instance name.
    pub fn parent(&self) -> Name {
        Name {
            labels: self.labels.iter().skip(1).cloned().collect(),
        }
    }

    /// Case-insensitive comparison key.
    pub fn key(&self) -> String {
        self.to_string().to_ascii_lowercase()
    }

    /// Labels are carried as raw bytes, without IDNA mapping.
    fn to_wire(&self) -> ProtoResult<rr::Name> {
        rr::Name::from_labels(self.labels.iter().map(|l| l.as_bytes()))
    }
}

impl From<&rr::Name> for Name {
    fn from(name: &rr::Name) -> Self {
        Self {
            labels: name
                .iter()
                .map(|label| String::from_utf8_lossy(label).into_owned())
                .collect(),
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.labels.join("."))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
    Ptr(Name),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: Name,
    },
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    /// Key/value pairs in wire order; boolean attributes have an empty value
    Txt(Vec<(String, String)>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: Name,
    /// 0 announces that the record is going away
    pub ttl: u32,
    pub data: RecordData,
}

impl Record {
    /// `None` for record types discovery does not use.
    fn from_wire(record: &rr::Record) -> Option<Self> {
        let data = match record.data()? {
            RData::A(a) => RecordData::A(a.0),
            RData::AAAA(aaaa) => RecordData::Aaaa(aaaa.0),
            RData::PTR(ptr) => RecordData::Ptr(Name::from(&ptr.0)),
            RData::SRV(srv) => RecordData::Srv {
                priority: srv.priority(),
                weight: srv.weight(),
                port: srv.port(),
                target: Name::from(srv.target()),
            },
            RData::TXT(txt) => RecordData::Txt(txt_entries(txt.txt_data())),
            _ => return None,
        };

        Some(Self {
            name: Name::from(record.name()),
            ttl: record.ttl(),
            data,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: op::Header,
    pub questions: Vec<Name>,
    pub records: Vec<Record>,
    /// Records of unrecognized type or with malformed RDATA
    pub skipped: usize,
    /// Set when the record section ended early
    pub truncated: bool,
}

impl Message {
    pub fn decode(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < HEADER_LEN {
            return Err(ParseError::Truncated(buf.len()));
        }

        let mut decoder = BinDecoder::new(buf);
        let header = op::Header::read(&mut decoder).map_err(|_| ParseError::Truncated(buf.len()))?;
        let declared = header.answer_count() as usize
            + header.name_server_count() as usize
            + header.additional_count() as usize;

        let mut questions = Vec::with_capacity(header.query_count() as usize);
        for _ in 0..header.query_count() {
            let start = decoder.index();
            match op::Query::read(&mut decoder) {
                Ok(query) => questions.push(Name::from(query.name())),
                Err(e) => {
                    tracing::debug!("DNS question at offset {} undecodable: {}", start, e);
                    return Err(if declared > 0 {
                        ParseError::NoRecords(declared)
                    } else {
                        ParseError::BadName(start)
                    });
                }
            }
        }

        let mut records = Vec::new();
        let mut skipped = 0;
        let mut truncated = false;
        for _ in 0..declared {
            let start = decoder.index();
            match <rr::Record as BinDecodable>::read(&mut decoder) {
                Ok(record) => match Record::from_wire(&record) {
                    Some(record) => records.push(record),
                    None => skipped += 1,
                },
                Err(e) => match skip_record(buf, start) {
                    Some(rest) => {
                        tracing::trace!("Skipping malformed DNS record at offset {}: {}", start, e);
                        skipped += 1;
                        decoder = rest;
                    }
                    None => {
                        tracing::debug!("DNS record section ended early at offset {}: {}", start, e);
                        truncated = true;
                        break;
                    }
                },
            }
        }

        if truncated && records.is_empty() && skipped == 0 {
            return Err(ParseError::NoRecords(declared));
        }

        Ok(Self {
            header,
            questions,
            records,
            skipped,
            truncated,
        })
    }

    pub fn is_response(&self) -> bool {
        self.header.message_type() == op::MessageType::Response
    }
}

/// Steps over the record envelope at `start`, ignoring its RDATA.
/// `None` when the envelope itself does not fit in the buffer.
fn skip_record(buf: &[u8], start: usize) -> Option<BinDecoder<'_>> {
    let mut decoder = BinDecoder::new(buf);
    decoder.read_slice(start).ok()?;
    rr::Name::read(&mut decoder).ok()?;
    decoder.read_u16().ok()?; // type
    decoder.read_u16().ok()?; // class
    decoder.read_u32().ok()?; // ttl
    let rdlength = decoder.read_u16().ok()?.unverified() as usize;
    decoder.read_slice(rdlength).ok()?;
    Some(decoder)
}

fn txt_entries(strings: &[Box<[u8]>]) -> Vec<(String, String)> {
    strings
        .iter()
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let text = String::from_utf8_lossy(entry);
            let (key, value) = match text.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (text.into_owned(), String::new()),
            };
            (!key.is_empty()).then_some((key, value))
        })
        .collect()
}

/// Encodes a multicast PTR query (ID 0, QM questions) for the given names.
pub fn encode_query(names: &[Name]) -> ProtoResult<Vec<u8>> {
    let mut message = op::Message::new();
    message
        .set_id(0)
        .set_message_type(op::MessageType::Query)
        .set_op_code(op::OpCode::Query)
        .set_recursion_desired(false);

    for name in names {
        message.add_query(op::Query::query(name.to_wire()?, rr::RecordType::PTR));
    }
    message.to_bytes()
}

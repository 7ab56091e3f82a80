//! Minimal DNS message codec for the two exchanges the backend needs:
//! NOTIFY (RFC 1996) and an SOA query to read back the served serial.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

pub const OPCODE_QUERY: u8 = 0;
pub const OPCODE_NOTIFY: u8 = 4;

pub const TYPE_SOA: u16 = 6;
pub const CLASS_IN: u16 = 1;

pub const RCODE_NOERROR: u8 = 0;
pub const RCODE_NXDOMAIN: u8 = 3;
pub const RCODE_REFUSED: u8 = 5;
pub const RCODE_NOTAUTH: u8 = 9;

const HEADER_LEN: usize = 12;
const FLAG_QR: u16 = 0x8000;
const FLAG_AA: u16 = 0x0400;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("message truncated")]
    Truncated,
    #[error("label too long in {0}")]
    LabelTooLong(String),
    #[error("invalid label type 0x{0:02x}")]
    BadLabel(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
}

/// What the backend cares about in a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub header: Header,
    /// Serial of the first SOA in the answer section
    pub soa_serial: Option<u32>,
}

fn encode_name(buf: &mut BytesMut, name: &str) -> Result<(), WireError> {
    for label in name.trim_end_matches('.').split('.').filter(|l| !l.is_empty()) {
        if label.len() > 63 {
            return Err(WireError::LabelTooLong(name.to_string()));
        }
        buf.put_u8(label.len() as u8);
        buf.put_slice(label.as_bytes());
    }
    buf.put_u8(0);
    Ok(())
}

fn encode_question(id: u16, flags: u16, zone: &str) -> Result<Bytes, WireError> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + zone.len() + 6);
    buf.put_u16(id);
    buf.put_u16(flags);
    buf.put_u16(1); // QDCOUNT
    buf.put_u16(0); // ANCOUNT
    buf.put_u16(0); // NSCOUNT
    buf.put_u16(0); // ARCOUNT
    encode_name(&mut buf, zone)?;
    buf.put_u16(TYPE_SOA);
    buf.put_u16(CLASS_IN);
    Ok(buf.freeze())
}

/// NOTIFY for `zone`: opcode 4, AA set, one SOA question
pub fn notify_message(id: u16, zone: &str) -> Result<Bytes, WireError> {
    encode_question(id, (OPCODE_NOTIFY as u16) << 11 | FLAG_AA, zone)
}

/// Non-recursive SOA query for `zone`
pub fn soa_query(id: u16, zone: &str) -> Result<Bytes, WireError> {
    encode_question(id, (OPCODE_QUERY as u16) << 11, zone)
}

fn need(buf: &impl Buf, n: usize) -> Result<(), WireError> {
    if buf.remaining() < n {
        return Err(WireError::Truncated);
    }
    Ok(())
}

/// Skip an encoded name; a compression pointer always ends it
fn skip_name(buf: &mut &[u8]) -> Result<(), WireError> {
    loop {
        need(&*buf, 1)?;
        let len = buf.get_u8();
        match len & 0xC0 {
            0xC0 => {
                need(&*buf, 1)?;
                buf.advance(1);
                return Ok(());
            }
            0x00 if len == 0 => return Ok(()),
            0x00 => {
                need(&*buf, len as usize)?;
                buf.advance(len as usize);
            }
            _ => return Err(WireError::BadLabel(len)),
        }
    }
}

pub fn parse_response(message: &[u8]) -> Result<Response, WireError> {
    let mut buf = message;
    need(&buf, HEADER_LEN)?;

    let id = buf.get_u16();
    let flags = buf.get_u16();
    let qdcount = buf.get_u16();
    let ancount = buf.get_u16();
    buf.advance(4); // NSCOUNT, ARCOUNT

    let header = Header {
        id,
        qr: flags & FLAG_QR != 0,
        opcode: ((flags >> 11) & 0x0F) as u8,
        aa: flags & FLAG_AA != 0,
        rcode: (flags & 0x000F) as u8,
        qdcount,
        ancount,
    };

    for _ in 0..qdcount {
        skip_name(&mut buf)?;
        need(&buf, 4)?;
        buf.advance(4);
    }

    let mut soa_serial = None;
    for _ in 0..ancount {
        skip_name(&mut buf)?;
        need(&buf, 10)?;
        let rtype = buf.get_u16();
        buf.advance(6); // class, ttl
        let rdlength = buf.get_u16() as usize;
        need(&buf, rdlength)?;

        let (rdata, rest) = buf.split_at(rdlength);
        buf = rest;

        if rtype == TYPE_SOA && soa_serial.is_none() {
            let mut rdata = rdata;
            skip_name(&mut rdata)?; // MNAME
            skip_name(&mut rdata)?; // RNAME
            need(&rdata, 4)?;
            soa_serial = Some(rdata.get_u32());
        }
    }

    Ok(Response { header, soa_serial })
}

/// Server-side message builders for exercising the backend against a fake
/// name server
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Turn `query` into a response with the given rcode and, optionally,
    /// an authoritative SOA answer carrying `serial`
    pub fn respond(query: &[u8], rcode: u8, serial: Option<u32>) -> Vec<u8> {
        let mut out = BytesMut::from(query);
        let flags = u16::from_be_bytes([query[2], query[3]]);
        let mut flags = flags | FLAG_QR | rcode as u16;
        if serial.is_some() {
            flags |= FLAG_AA;
        }
        out[2..4].copy_from_slice(&flags.to_be_bytes());

        if let Some(serial) = serial {
            out[6..8].copy_from_slice(&1u16.to_be_bytes());
            out.put_u16(0xC00C); // pointer to the question name
            out.put_u16(TYPE_SOA);
            out.put_u16(CLASS_IN);
            out.put_u32(3600);

            let mut rdata = BytesMut::new();
            encode_name(&mut rdata, "ns1.example.net.").unwrap();
            rdata.put_u16(0xC00C);
            rdata.put_u32(serial);
            rdata.put_u32(3600);
            rdata.put_u32(600);
            rdata.put_u32(86400);
            rdata.put_u32(300);

            out.put_u16(rdata.len() as u16);
            out.put_slice(&rdata);
        }
        out.to_vec()
    }

    pub fn opcode(query: &[u8]) -> u8 {
        (query[2] >> 3) & 0x0F
    }
}

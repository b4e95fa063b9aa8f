//! Minimal ISO-BMFF box reader/writer.
//!
//! Only `moov` is ever loaded into memory; media data is streamed when a file is
//! rewritten.

use std::io::{Read, Seek, SeekFrom};

use crate::error::{Result, StemError};

pub type FourCc = [u8; 4];

pub const MOOV: FourCc = *b"moov";
pub const MOOF: FourCc = *b"moof";
pub const UDTA: FourCc = *b"udta";
pub const STCO: FourCc = *b"stco";
pub const CO64: FourCc = *b"co64";

/// Boxes whose payload is nothing but child boxes, on the paths we edit.
const CONTAINERS: [FourCc; 8] = [
    *b"moov", *b"trak", *b"mdia", *b"minf", *b"stbl", *b"udta", *b"edts", *b"dinf",
];

fn fourcc_str(kind: &FourCc) -> String {
    String::from_utf8_lossy(kind).into_owned()
}

/// Location of a box inside a file or buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoxHeader {
    pub kind: FourCc,
    pub offset: u64,
    pub header_len: u64,
    /// Total size including the header.
    pub size: u64,
}

impl BoxHeader {
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    pub fn payload_len(&self) -> u64 {
        self.size - self.header_len
    }
}

/// Parses the box header at the start of `buf`. `remaining` is what is left of
/// the enclosing region and resolves size 0 ("to the end").
pub fn parse_header(buf: &[u8], offset: u64, remaining: u64) -> Result<BoxHeader> {
    if buf.len() < 8 {
        return Err(StemError::StemBlock(format!("truncated box header at {offset}")));
    }
    let size32 = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as u64;
    let kind: FourCc = [buf[4], buf[5], buf[6], buf[7]];

    let (size, header_len) = match size32 {
        0 => (remaining, 8),
        1 => {
            if buf.len() < 16 {
                return Err(StemError::StemBlock(format!(
                    "truncated 64-bit header for `{}` at {offset}",
                    fourcc_str(&kind)
                )));
            }
            let mut large = [0u8; 8];
            large.copy_from_slice(&buf[8..16]);
            (u64::from_be_bytes(large), 16)
        }
        n => (n, 8),
    };

    if size < header_len || size > remaining {
        return Err(StemError::StemBlock(format!(
            "box `{}` at {offset} has invalid size {size}",
            fourcc_str(&kind)
        )));
    }

    Ok(BoxHeader {
        kind,
        offset,
        header_len,
        size,
    })
}

/// Lists the top-level boxes of a seekable stream.
pub fn scan_top_level<R: Read + Seek>(reader: &mut R) -> Result<Vec<BoxHeader>> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    let mut headers = Vec::new();
    let mut offset = 0u64;

    while offset < file_len {
        reader.seek(SeekFrom::Start(offset))?;
        let want = (file_len - offset).min(16) as usize;
        let mut buf = vec![0u8; want];
        reader.read_exact(&mut buf)?;
        let header = parse_header(&buf, offset, file_len - offset)?;
        offset = header.end();
        headers.push(header);
    }

    Ok(headers)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AtomBody {
    Leaf(Vec<u8>),
    Container(Vec<Atom>),
}

/// An owned box tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Atom {
    pub kind: FourCc,
    pub body: AtomBody,
}

impl Atom {
    pub fn leaf(kind: FourCc, data: Vec<u8>) -> Self {
        Self {
            kind,
            body: AtomBody::Leaf(data),
        }
    }

    pub fn container(kind: FourCc) -> Self {
        Self {
            kind,
            body: AtomBody::Container(Vec::new()),
        }
    }

    /// Builds an atom from its kind and payload, descending into known containers.
    pub fn parse(kind: FourCc, payload: &[u8]) -> Result<Self> {
        if CONTAINERS.contains(&kind) {
            Ok(Self {
                kind,
                body: AtomBody::Container(parse_children(payload)?),
            })
        } else {
            Ok(Self::leaf(kind, payload.to_vec()))
        }
    }

    /// Parses a complete box (header included).
    pub fn parse_box(buf: &[u8]) -> Result<Self> {
        let header = parse_header(buf, 0, buf.len() as u64)?;
        let payload = &buf[header.header_len as usize..header.size as usize];
        Self::parse(header.kind, payload)
    }

    pub fn children(&self) -> &[Atom] {
        match &self.body {
            AtomBody::Container(c) => c,
            AtomBody::Leaf(_) => &[],
        }
    }

    pub fn child(&self, kind: FourCc) -> Option<&Atom> {
        self.children().iter().find(|a| a.kind == kind)
    }

    pub fn child_mut(&mut self, kind: FourCc) -> Option<&mut Atom> {
        match &mut self.body {
            AtomBody::Container(c) => c.iter_mut().find(|a| a.kind == kind),
            AtomBody::Leaf(_) => None,
        }
    }

    /// Returns the child container `kind`, appending an empty one when absent.
    pub fn ensure_container(&mut self, kind: FourCc) -> Result<&mut Atom> {
        let children = match &mut self.body {
            AtomBody::Container(c) => c,
            AtomBody::Leaf(_) => {
                return Err(StemError::StemBlock(format!(
                    "`{}` is not a container",
                    fourcc_str(&self.kind)
                )))
            }
        };
        let pos = match children.iter().position(|a| a.kind == kind) {
            Some(p) => p,
            None => {
                children.push(Atom::container(kind));
                children.len() - 1
            }
        };
        Ok(&mut children[pos])
    }

    /// Replaces the first child of the same kind, or appends.
    pub fn set_child(&mut self, atom: Atom) -> Result<()> {
        match &mut self.body {
            AtomBody::Container(c) => {
                match c.iter_mut().find(|a| a.kind == atom.kind) {
                    Some(slot) => *slot = atom,
                    None => c.push(atom),
                }
                Ok(())
            }
            AtomBody::Leaf(_) => Err(StemError::StemBlock(format!(
                "`{}` is not a container",
                fourcc_str(&self.kind)
            ))),
        }
    }

    pub fn data(&self) -> Option<&[u8]> {
        match &self.body {
            AtomBody::Leaf(d) => Some(d),
            AtomBody::Container(_) => None,
        }
    }

    fn payload_len(&self) -> u64 {
        match &self.body {
            AtomBody::Leaf(d) => d.len() as u64,
            AtomBody::Container(c) => c.iter().map(Atom::encoded_len).sum(),
        }
    }

    pub fn encoded_len(&self) -> u64 {
        let payload = self.payload_len();
        if payload + 8 > u32::MAX as u64 {
            payload + 16
        } else {
            payload + 8
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let size = self.encoded_len();
        if size > u32::MAX as u64 {
            out.extend_from_slice(&1u32.to_be_bytes());
            out.extend_from_slice(&self.kind);
            out.extend_from_slice(&size.to_be_bytes());
        } else {
            out.extend_from_slice(&(size as u32).to_be_bytes());
            out.extend_from_slice(&self.kind);
        }
        match &self.body {
            AtomBody::Leaf(d) => out.extend_from_slice(d),
            AtomBody::Container(c) => c.iter().for_each(|a| a.encode(out)),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len() as usize);
        self.encode(&mut out);
        out
    }

    /// Adds `delta` to every `stco`/`co64` entry pointing at or past `from`.
    pub fn shift_chunk_offsets(&mut self, from: u64, delta: i64) -> Result<()> {
        let kind = self.kind;
        match &mut self.body {
            AtomBody::Container(c) => c
                .iter_mut()
                .try_for_each(|a| a.shift_chunk_offsets(from, delta)),
            AtomBody::Leaf(data) if kind == STCO => shift_table::<4>(data, from, delta),
            AtomBody::Leaf(data) if kind == CO64 => shift_table::<8>(data, from, delta),
            AtomBody::Leaf(_) => Ok(()),
        }
    }
}

pub fn parse_children(mut payload: &[u8]) -> Result<Vec<Atom>> {
    let mut atoms = Vec::new();
    let mut offset = 0u64;
    while !payload.is_empty() {
        let header = parse_header(payload, offset, payload.len() as u64)?;
        let body = &payload[header.header_len as usize..header.size as usize];
        atoms.push(Atom::parse(header.kind, body)?);
        payload = &payload[header.size as usize..];
        offset += header.size;
    }
    Ok(atoms)
}

/// Rewrites a chunk offset table of `W`-byte big-endian entries in place.
fn shift_table<const W: usize>(data: &mut [u8], from: u64, delta: i64) -> Result<()> {
    if data.len() < 8 {
        return Err(StemError::StemBlock("truncated chunk offset table".into()));
    }
    let count = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;
    let entries = &mut data[8..];
    if entries.len() < count * W {
        return Err(StemError::StemBlock(format!(
            "chunk offset table declares {count} entries but holds {}",
            entries.len() / W
        )));
    }

    for entry in entries.chunks_exact_mut(W).take(count) {
        let old = if W == 4 {
            u32::from_be_bytes([entry[0], entry[1], entry[2], entry[3]]) as u64
        } else {
            let mut b = [0u8; 8];
            b.copy_from_slice(entry);
            u64::from_be_bytes(b)
        };
        if old < from {
            continue;
        }
        let new = old
            .checked_add_signed(delta)
            .ok_or_else(|| StemError::StemBlock(format!("chunk offset {old} out of range")))?;
        if W == 4 {
            let new = u32::try_from(new).map_err(|_| {
                StemError::StemBlock(format!("chunk offset {new} does not fit stco"))
            })?;
            entry.copy_from_slice(&new.to_be_bytes());
        } else {
            entry.copy_from_slice(&new.to_be_bytes());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_and_large_headers() {
        let compact = [0, 0, 0, 16, b'f', b'r', b'e', b'e'];
        let h = parse_header(&compact, 0, 100).unwrap();
        assert_eq!((h.kind, h.size, h.header_len), (*b"free", 16, 8));

        let mut large = vec![0, 0, 0, 1, b'm', b'd', b'a', b't'];
        large.extend_from_slice(&40u64.to_be_bytes());
        let h = parse_header(&large, 8, 40).unwrap();
        assert_eq!((h.size, h.header_len, h.end()), (40, 16, 48));
    }

    #[test]
    fn zero_size_extends_to_region_end() {
        let h = parse_header(&[0, 0, 0, 0, b'm', b'd', b'a', b't'], 32, 68).unwrap();
        assert_eq!(h.size, 68);
    }

    #[test]
    fn rejects_sizes_past_region() {
        assert!(parse_header(&[0, 0, 1, 0, b'm', b'o', b'o', b'v'], 0, 16).is_err());
        assert!(parse_header(&[0, 0, 0, 4, b'm', b'o', b'o', b'v'], 0, 16).is_err());
    }

    #[test]
    fn shifts_only_offsets_past_threshold() {
        let mut data = vec![0, 0, 0, 0, 0, 0, 0, 2];
        data.extend_from_slice(&10u32.to_be_bytes());
        data.extend_from_slice(&500u32.to_be_bytes());
        let mut stco = Atom::leaf(STCO, data);
        stco.shift_chunk_offsets(100, 24).unwrap();

        let d = stco.data().unwrap();
        assert_eq!(&d[8..12], &10u32.to_be_bytes());
        assert_eq!(&d[12..16], &524u32.to_be_bytes());
    }

    #[test]
    fn container_round_trips() {
        let mut moov = Atom::container(MOOV);
        moov.ensure_container(UDTA)
            .unwrap()
            .set_child(Atom::leaf(*b"stem", b"{}".to_vec()))
            .unwrap();
        let bytes = moov.to_bytes();
        assert_eq!(bytes.len() as u64, moov.encoded_len());
        assert_eq!(Atom::parse_box(&bytes).unwrap(), moov);
    }
}

//! MDF 4.x (MF4) file reader - the primary binary decoder
//!
//! Implements the subset of the ASAM MDF 4 block tree needed to enumerate
//! channels and pull their samples: ID/HD/DG/CG/CN/TX/MD/CC headers, DT data
//! blocks (directly or behind DL/HL lists), byte-aligned integer and float
//! channel values, and linear or identity value conversion. Compressed (DZ)
//! data and non-numeric channels degrade to empty reads rather than errors.
//!
//! Channel and unit texts are decoded defensively: TX payloads are lossy
//! UTF-8, MD payloads have their `<TX>` element extracted from the XML.

use super::{ChannelData, ChannelSource};
use crate::types::{EngineError, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashMap;
use std::path::Path;

const BLOCK_HEADER_LEN: usize = 24;

/// Value conversion attached to a channel
#[derive(Debug, Clone, Copy, PartialEq)]
enum Conversion {
    Identity,
    /// phys = offset + factor * raw
    Linear { offset: f64, factor: f64 },
}

impl Conversion {
    fn apply(&self, raw: f64) -> f64 {
        match self {
            Conversion::Identity => raw,
            Conversion::Linear { offset, factor } => offset + factor * raw,
        }
    }
}

#[derive(Debug, Clone)]
struct Channel {
    name: String,
    unit: String,
    cn_type: u8,
    data_type: u8,
    bit_offset: u8,
    byte_offset: usize,
    bit_count: u32,
    conversion: Conversion,
}

struct ChannelGroup {
    /// Record payload bytes for this group, concatenated
    records: Vec<u8>,
    /// Stride of one record (data bytes + invalidation bytes)
    record_len: usize,
    channels: Vec<Channel>,
    /// Index of the master (time) channel within `channels`
    master: Option<usize>,
}

/// An MDF 4.x file fully indexed for channel reads
pub struct Mdf4File {
    groups: Vec<ChannelGroup>,
    names: Vec<String>,
    /// First occurrence wins for duplicated names across groups
    index: HashMap<String, (usize, usize)>,
}

impl Mdf4File {
    /// Open and index an MDF 4.x file
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    /// Parse an in-memory MDF 4.x image
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 64 + BLOCK_HEADER_LEN {
            return Err(EngineError::FormatError("file too short for MDF".into()));
        }
        if &data[0..4] != b"MDF " {
            return Err(EngineError::FormatError("missing MDF identification".into()));
        }
        if data[8] != b'4' {
            return Err(EngineError::FormatError(format!(
                "not an MDF 4.x file (version tag '{}')",
                data[8] as char
            )));
        }

        let hd = Block::read(data, 64)?;
        if &hd.id != b"##HD" {
            return Err(EngineError::FormatError("header block not found".into()));
        }

        let mut groups = Vec::new();
        let mut names = Vec::new();
        let mut index: HashMap<String, (usize, usize)> = HashMap::new();

        let mut dg_link = hd.link(0);
        while dg_link != 0 {
            let dg = Block::read(data, dg_link as usize)?;
            if &dg.id != b"##DG" {
                return Err(EngineError::FormatError("expected DG block".into()));
            }
            let rec_id_size = *dg.data(data).first().unwrap_or(&0) as usize;

            // Channel group descriptions for this data group
            let mut cgs: Vec<(u64, u32, ChannelGroup)> = Vec::new();
            let mut cg_link = dg.link(1);
            while cg_link != 0 {
                let cg = Block::read(data, cg_link as usize)?;
                if &cg.id != b"##CG" {
                    return Err(EngineError::FormatError("expected CG block".into()));
                }
                let cg_data = cg.data(data);
                if cg_data.len() < 32 {
                    return Err(EngineError::FormatError("CG block truncated".into()));
                }
                let record_id = LittleEndian::read_u64(&cg_data[0..8]);
                let flags = LittleEndian::read_u16(&cg_data[16..18]);
                let data_bytes = LittleEndian::read_u32(&cg_data[24..28]);
                let inval_bytes = LittleEndian::read_u32(&cg_data[28..32]);

                // VLSD groups carry string payloads, not channel records
                if flags & 0x01 == 0 {
                    let (channels, master) = read_channels(data, cg.link(1))?;
                    cgs.push((
                        record_id,
                        data_bytes + inval_bytes,
                        ChannelGroup {
                            records: Vec::new(),
                            record_len: (data_bytes + inval_bytes) as usize,
                            channels,
                            master,
                        },
                    ));
                }
                cg_link = cg.link(0);
            }

            // Distribute record payloads onto the groups
            let payload = collect_data_payload(data, dg.link(2))?;
            distribute_records(&payload, rec_id_size, &mut cgs);

            for (_, _, group) in cgs {
                let g = groups.len();
                for (c, ch) in group.channels.iter().enumerate() {
                    if !ch.name.is_empty() {
                        names.push(ch.name.clone());
                        index.entry(ch.name.clone()).or_insert((g, c));
                    }
                }
                groups.push(group);
            }

            dg_link = dg.link(0);
        }

        log::debug!(
            "MDF4 index built: {} group(s), {} channel name(s)",
            groups.len(),
            names.len()
        );
        Ok(Self {
            groups,
            names,
            index,
        })
    }

    /// Decode every record of one channel within its group
    fn decode_channel(&self, g: usize, c: usize) -> Vec<Option<f64>> {
        let group = &self.groups[g];
        let ch = &group.channels[c];
        if group.record_len == 0 {
            return Vec::new();
        }
        let count = group.records.len() / group.record_len;

        // Virtual master: the record index is the raw value
        if ch.cn_type == 3 {
            return (0..count)
                .map(|i| Some(ch.conversion.apply(i as f64)))
                .collect();
        }

        (0..count)
            .map(|i| {
                let record = &group.records[i * group.record_len..(i + 1) * group.record_len];
                decode_value(record, ch).map(|raw| ch.conversion.apply(raw))
            })
            .collect()
    }
}

impl ChannelSource for Mdf4File {
    fn channels(&self) -> &[String] {
        &self.names
    }

    fn read(&self, name: &str) -> ChannelData {
        let Some(&(g, c)) = self.index.get(name) else {
            return ChannelData::default();
        };
        let group = &self.groups[g];
        let values = self.decode_channel(g, c);
        let times: Vec<Option<f64>> = match group.master {
            Some(m) => self.decode_channel(g, m),
            // No master channel: the record index stands in for time
            None => (0..values.len()).map(|i| Some(i as f64)).collect(),
        };

        let mut data = ChannelData {
            unit: group.channels[c].unit.clone(),
            ..Default::default()
        };
        for (t, v) in times.into_iter().zip(values.into_iter()) {
            if let (Some(t), Some(v)) = (t, v) {
                data.timestamps.push(t);
                data.values.push(v);
            }
        }
        data
    }
}

/// One parsed block header
struct Block {
    id: [u8; 4],
    links: Vec<u64>,
    data_start: usize,
    data_end: usize,
}

impl Block {
    fn read(data: &[u8], at: usize) -> Result<Self> {
        let header = data
            .get(at..at + BLOCK_HEADER_LEN)
            .ok_or_else(|| EngineError::FormatError("block header out of bounds".into()))?;
        let mut id = [0u8; 4];
        id.copy_from_slice(&header[0..4]);
        let length = LittleEndian::read_u64(&header[8..16]) as usize;
        let link_count = LittleEndian::read_u64(&header[16..24]) as usize;

        if length < BLOCK_HEADER_LEN + link_count * 8 || at + length > data.len() {
            return Err(EngineError::FormatError(format!(
                "malformed {} block at offset {}",
                String::from_utf8_lossy(&id),
                at
            )));
        }

        let links_raw = &data[at + BLOCK_HEADER_LEN..at + BLOCK_HEADER_LEN + link_count * 8];
        let links = links_raw
            .chunks_exact(8)
            .map(LittleEndian::read_u64)
            .collect();

        Ok(Self {
            id,
            links,
            data_start: at + BLOCK_HEADER_LEN + link_count * 8,
            data_end: at + length,
        })
    }

    fn link(&self, i: usize) -> u64 {
        self.links.get(i).copied().unwrap_or(0)
    }

    fn data<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.data_start..self.data_end]
    }
}

/// Read the channel list of one channel group, returning the channels in file
/// order and the index of the master channel if one exists.
fn read_channels(data: &[u8], cn_first: u64) -> Result<(Vec<Channel>, Option<usize>)> {
    let mut channels = Vec::new();
    let mut master = None;

    let mut cn_link = cn_first;
    while cn_link != 0 {
        let cn = Block::read(data, cn_link as usize)?;
        if &cn.id != b"##CN" {
            return Err(EngineError::FormatError("expected CN block".into()));
        }
        let cn_data = cn.data(data);
        if cn_data.len() < 24 {
            return Err(EngineError::FormatError("CN block truncated".into()));
        }

        let name = read_text(data, cn.link(2));
        let unit = read_text(data, cn.link(6));
        let conversion = read_conversion(data, cn.link(4));

        let channel = Channel {
            name,
            unit,
            cn_type: cn_data[0],
            data_type: cn_data[2],
            bit_offset: cn_data[3],
            byte_offset: LittleEndian::read_u32(&cn_data[4..8]) as usize,
            bit_count: LittleEndian::read_u32(&cn_data[8..12]),
            conversion,
        };

        // cn_type 2 = master, 3 = virtual master
        if (channel.cn_type == 2 || channel.cn_type == 3) && master.is_none() {
            master = Some(channels.len());
        }
        channels.push(channel);
        cn_link = cn.link(0);
    }

    Ok((channels, master))
}

/// Resolve a text link: TX blocks hold a zero-terminated string, MD blocks
/// hold XML whose `<TX>` element carries the displayable text.
fn read_text(data: &[u8], link: u64) -> String {
    if link == 0 {
        return String::new();
    }
    let Ok(block) = Block::read(data, link as usize) else {
        return String::new();
    };
    let payload = block.data(data);
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    let text = String::from_utf8_lossy(&payload[..end]).into_owned();

    match &block.id {
        b"##TX" => text.trim().to_string(),
        b"##MD" => extract_tx_element(&text),
        _ => String::new(),
    }
}

/// Pull the `<TX>` element body out of an MD comment without a full XML parse
fn extract_tx_element(xml: &str) -> String {
    let Some(start) = xml.find("<TX>") else {
        return String::new();
    };
    let rest = &xml[start + 4..];
    let Some(end) = rest.find("</TX>") else {
        return String::new();
    };
    rest[..end].trim().to_string()
}

/// Read a channel conversion. Only identity and linear conversions produce a
/// transformation; anything else passes raw values through.
fn read_conversion(data: &[u8], link: u64) -> Conversion {
    if link == 0 {
        return Conversion::Identity;
    }
    let Ok(cc) = Block::read(data, link as usize) else {
        return Conversion::Identity;
    };
    if &cc.id != b"##CC" {
        return Conversion::Identity;
    }
    let cc_data = cc.data(data);
    if cc_data.len() < 24 {
        return Conversion::Identity;
    }
    let cc_type = cc_data[0];
    let val_count = LittleEndian::read_u16(&cc_data[6..8]) as usize;

    if cc_type == 1 && val_count >= 2 && cc_data.len() >= 24 + 16 {
        let offset = LittleEndian::read_f64(&cc_data[24..32]);
        let factor = LittleEndian::read_f64(&cc_data[32..40]);
        return Conversion::Linear { offset, factor };
    }
    if cc_type != 0 {
        log::debug!("Unsupported CC conversion type {}, passing raw values", cc_type);
    }
    Conversion::Identity
}

/// Gather raw record payload bytes behind a dg_data link. Handles a direct DT
/// block, DL lists of DT blocks, and HL headers in front of a DL. Compressed
/// DZ payloads are skipped with a warning.
fn collect_data_payload(data: &[u8], dg_data: u64) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    if dg_data == 0 {
        return Ok(payload);
    }
    let block = Block::read(data, dg_data as usize)?;
    match &block.id {
        b"##DT" | b"##DV" => payload.extend_from_slice(block.data(data)),
        b"##HL" => {
            // Header list: first link points at the DL chain
            return collect_data_payload(data, block.link(0));
        }
        b"##DL" => {
            let mut dl = block;
            loop {
                for i in 1..dl.links.len() {
                    let child = dl.link(i);
                    if child == 0 {
                        continue;
                    }
                    let data_block = Block::read(data, child as usize)?;
                    match &data_block.id {
                        b"##DT" | b"##DV" => payload.extend_from_slice(data_block.data(data)),
                        b"##DZ" => {
                            log::warn!("Compressed DZ data block skipped");
                        }
                        other => {
                            log::warn!(
                                "Unexpected data block {} in DL list",
                                String::from_utf8_lossy(other)
                            );
                        }
                    }
                }
                let next = dl.link(0);
                if next == 0 {
                    break;
                }
                dl = Block::read(data, next as usize)?;
            }
        }
        b"##DZ" => log::warn!("Compressed DZ data block skipped"),
        other => {
            return Err(EngineError::FormatError(format!(
                "unsupported data block {}",
                String::from_utf8_lossy(other)
            )))
        }
    }
    Ok(payload)
}

/// Walk the raw payload and append each record's bytes to its channel group.
/// Sorted files (no record ids, single group) take the fast path.
fn distribute_records(payload: &[u8], rec_id_size: usize, cgs: &mut [(u64, u32, ChannelGroup)]) {
    if cgs.is_empty() {
        return;
    }
    if rec_id_size == 0 {
        // Sorted data group: all records belong to the single CG
        let group = &mut cgs[0].2;
        let stride = group.record_len;
        if stride > 0 {
            let whole = payload.len() - payload.len() % stride;
            group.records.extend_from_slice(&payload[..whole]);
        }
        return;
    }

    let mut pos = 0;
    while pos + rec_id_size <= payload.len() {
        let id = match rec_id_size {
            1 => payload[pos] as u64,
            2 => LittleEndian::read_u16(&payload[pos..pos + 2]) as u64,
            4 => LittleEndian::read_u32(&payload[pos..pos + 4]) as u64,
            8 => LittleEndian::read_u64(&payload[pos..pos + 8]),
            _ => return,
        };
        pos += rec_id_size;

        let Some(entry) = cgs.iter_mut().find(|(rid, _, _)| *rid == id) else {
            // Record for a group we skipped (e.g. VLSD); cannot resync
            return;
        };
        let stride = entry.2.record_len;
        if pos + stride > payload.len() {
            return;
        }
        entry.2.records.extend_from_slice(&payload[pos..pos + stride]);
        pos += stride;
    }
}

/// Decode one raw channel value out of a record. Returns None for data types
/// or bit layouts this reader does not support.
fn decode_value(record: &[u8], ch: &Channel) -> Option<f64> {
    let bit_count = ch.bit_count;
    if bit_count == 0 || bit_count > 64 {
        return None;
    }
    let byte_span = ((ch.bit_offset as u32 + bit_count + 7) / 8) as usize;
    let bytes = record.get(ch.byte_offset..ch.byte_offset + byte_span)?;

    match ch.data_type {
        // Unsigned / signed little-endian integers, arbitrary bit layout
        0 | 2 => {
            let mut raw: u64 = 0;
            for (i, b) in bytes.iter().enumerate().take(8) {
                raw |= (*b as u64) << (8 * i);
            }
            raw >>= ch.bit_offset;
            if bit_count < 64 {
                raw &= (1u64 << bit_count) - 1;
            }
            if ch.data_type == 2 {
                // Sign extension
                let shift = 64 - bit_count;
                Some(((raw << shift) as i64 >> shift) as f64)
            } else {
                Some(raw as f64)
            }
        }
        // Big-endian integers, byte-aligned only
        1 | 3 => {
            if ch.bit_offset != 0 || bit_count % 8 != 0 {
                return None;
            }
            let mut raw: u64 = 0;
            for b in bytes.iter().take(8) {
                raw = (raw << 8) | *b as u64;
            }
            if ch.data_type == 3 {
                let shift = 64 - bit_count;
                Some(((raw << shift) as i64 >> shift) as f64)
            } else {
                Some(raw as f64)
            }
        }
        // IEEE floats
        4 => match bit_count {
            32 => Some(LittleEndian::read_f32(bytes) as f64),
            64 => Some(LittleEndian::read_f64(bytes)),
            _ => None,
        },
        5 => match bit_count {
            32 => Some(byteorder::BigEndian::read_f32(bytes) as f64),
            64 => Some(byteorder::BigEndian::read_f64(bytes)),
            _ => None,
        },
        // Strings, byte arrays, CANopen types: not numeric
        _ => None,
    }
}

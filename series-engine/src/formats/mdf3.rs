//! MDF 3.x file reader - the fallback binary decoder
//!
//! Older instrumentation still produces MDF 3.x recordings, which use 16-bit
//! block headers and 32-bit links instead of the 4.x block tree. The reader
//! mirrors the 4.x decoder's shape: index channel groups at open, decode
//! samples on demand, degrade unsupported layouts to empty reads.

use super::{ChannelData, ChannelSource};
use crate::types::{EngineError, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Conversion {
    Identity,
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
    is_time: bool,
    data_type: u16,
    bit_offset: u16,
    bit_count: u16,
    conversion: Conversion,
}

struct ChannelGroup {
    records: Vec<u8>,
    record_len: usize,
    channels: Vec<Channel>,
    master: Option<usize>,
}

/// An MDF 3.x file indexed for channel reads
pub struct Mdf3File {
    groups: Vec<ChannelGroup>,
    names: Vec<String>,
    index: HashMap<String, (usize, usize)>,
}

impl Mdf3File {
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    /// Parse an in-memory MDF 3.x image
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 64 + 4 {
            return Err(EngineError::FormatError("file too short for MDF".into()));
        }
        if &data[0..4] != b"MDF " {
            return Err(EngineError::FormatError("missing MDF identification".into()));
        }
        if data[8] != b'2' && data[8] != b'3' {
            return Err(EngineError::FormatError(format!(
                "not an MDF 3.x file (version tag '{}')",
                data[8] as char
            )));
        }

        let hd = block_content(data, 64, b"HD")?;
        let mut dg_link = LittleEndian::read_u32(&hd[0..4]);

        let mut groups = Vec::new();
        let mut names = Vec::new();
        let mut index: HashMap<String, (usize, usize)> = HashMap::new();

        while dg_link != 0 {
            let dg = block_content(data, dg_link as usize, b"DG")?;
            if dg.len() < 20 {
                return Err(EngineError::FormatError("DG block truncated".into()));
            }
            let cg_first = LittleEndian::read_u32(&dg[4..8]);
            let data_link = LittleEndian::read_u32(&dg[12..16]);
            let rec_id_size = LittleEndian::read_u16(&dg[18..20]) as usize;

            let mut cgs: Vec<(u16, usize, ChannelGroup)> = Vec::new();
            let mut cg_link = cg_first;
            while cg_link != 0 {
                let cg = block_content(data, cg_link as usize, b"CG")?;
                if cg.len() < 22 {
                    return Err(EngineError::FormatError("CG block truncated".into()));
                }
                let cn_first = LittleEndian::read_u32(&cg[4..8]);
                let record_id = LittleEndian::read_u16(&cg[12..14]);
                let record_len = LittleEndian::read_u16(&cg[16..18]) as usize;
                let cycle_count = if cg.len() >= 22 {
                    LittleEndian::read_u32(&cg[18..22]) as usize
                } else {
                    0
                };

                let (channels, master) = read_channels(data, cn_first)?;
                cgs.push((
                    record_id,
                    cycle_count,
                    ChannelGroup {
                        records: Vec::new(),
                        record_len,
                        channels,
                        master,
                    },
                ));
                cg_link = LittleEndian::read_u32(&cg[0..4]);
            }

            if data_link != 0 {
                distribute_records(data, data_link as usize, rec_id_size, &mut cgs);
            }

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

            dg_link = LittleEndian::read_u32(&dg[0..4]);
        }

        log::debug!(
            "MDF3 index built: {} group(s), {} channel name(s)",
            groups.len(),
            names.len()
        );
        Ok(Self {
            groups,
            names,
            index,
        })
    }

    fn decode_channel(&self, g: usize, c: usize) -> Vec<Option<f64>> {
        let group = &self.groups[g];
        let ch = &group.channels[c];
        if group.record_len == 0 {
            return Vec::new();
        }
        let count = group.records.len() / group.record_len;
        (0..count)
            .map(|i| {
                let record = &group.records[i * group.record_len..(i + 1) * group.record_len];
                decode_value(record, ch).map(|raw| ch.conversion.apply(raw))
            })
            .collect()
    }
}

impl ChannelSource for Mdf3File {
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

/// Read an MDF3 block (2-char id + u16 size) and return its content slice
fn block_content<'a>(data: &'a [u8], at: usize, expect: &[u8; 2]) -> Result<&'a [u8]> {
    let header = data
        .get(at..at + 4)
        .ok_or_else(|| EngineError::FormatError("block header out of bounds".into()))?;
    if &header[0..2] != expect {
        return Err(EngineError::FormatError(format!(
            "expected {} block at offset {}, found {}",
            String::from_utf8_lossy(expect),
            at,
            String::from_utf8_lossy(&header[0..2])
        )));
    }
    let size = LittleEndian::read_u16(&header[2..4]) as usize;
    if size < 4 || at + size > data.len() {
        return Err(EngineError::FormatError(format!(
            "malformed {} block at offset {}",
            String::from_utf8_lossy(expect),
            at
        )));
    }
    Ok(&data[at + 4..at + size])
}

/// Walk a CN chain; returns channels in file order plus the master index
fn read_channels(data: &[u8], cn_first: u32) -> Result<(Vec<Channel>, Option<usize>)> {
    let mut channels = Vec::new();
    let mut master = None;

    let mut cn_link = cn_first;
    while cn_link != 0 {
        let cn = block_content(data, cn_link as usize, b"CN")?;
        if cn.len() < 188 {
            return Err(EngineError::FormatError("CN block truncated".into()));
        }

        let cc_link = LittleEndian::read_u32(&cn[4..8]);
        let channel_type = LittleEndian::read_u16(&cn[20..22]);
        let short_name = decode_fixed_text(&cn[22..54]);
        let bit_offset = LittleEndian::read_u16(&cn[182..184]);
        let bit_count = LittleEndian::read_u16(&cn[184..186]);
        let data_type = LittleEndian::read_u16(&cn[186..188]);

        // Long name TX link supersedes the 32-byte short name when present
        let name = if cn.len() >= 218 {
            let tx_link = LittleEndian::read_u32(&cn[214..218]);
            let long = read_tx(data, tx_link);
            if long.is_empty() {
                short_name
            } else {
                long
            }
        } else {
            short_name
        };

        let (conversion, unit) = read_conversion(data, cc_link);

        let channel = Channel {
            name,
            unit,
            is_time: channel_type == 1,
            data_type,
            bit_offset,
            bit_count,
            conversion,
        };
        if channel.is_time && master.is_none() {
            master = Some(channels.len());
        }
        channels.push(channel);
        cn_link = LittleEndian::read_u32(&cn[0..4]);
    }

    Ok((channels, master))
}

/// Fixed-width channel name field; device suffixes after a backslash are part
/// of the name in some tools and are kept as written.
fn decode_fixed_text(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).trim().to_string()
}

fn read_tx(data: &[u8], link: u32) -> String {
    if link == 0 {
        return String::new();
    }
    match block_content(data, link as usize, b"TX") {
        Ok(content) => decode_fixed_text(content),
        Err(_) => String::new(),
    }
}

/// CC conversion block: unit text plus (for type 0) linear parameters
fn read_conversion(data: &[u8], link: u32) -> (Conversion, String) {
    if link == 0 {
        return (Conversion::Identity, String::new());
    }
    let Ok(cc) = block_content(data, link as usize, b"CC") else {
        return (Conversion::Identity, String::new());
    };
    if cc.len() < 42 {
        return (Conversion::Identity, String::new());
    }
    let unit = decode_fixed_text(&cc[18..38]);
    let conversion_type = LittleEndian::read_u16(&cc[38..40]);

    let conversion = if conversion_type == 0 && cc.len() >= 58 {
        Conversion::Linear {
            offset: LittleEndian::read_f64(&cc[42..50]),
            factor: LittleEndian::read_f64(&cc[50..58]),
        }
    } else {
        if conversion_type != 65535 && conversion_type != 0 {
            log::debug!(
                "Unsupported MDF3 conversion type {}, passing raw values",
                conversion_type
            );
        }
        Conversion::Identity
    };
    (conversion, unit)
}

/// Distribute the record stream at `data_at` onto the channel groups.
/// `rec_id_size` 0 means a sorted group; 1 or 2 means each record carries a
/// one-byte id (2 repeats it after the record).
fn distribute_records(
    data: &[u8],
    data_at: usize,
    rec_id_size: usize,
    cgs: &mut [(u16, usize, ChannelGroup)],
) {
    if cgs.is_empty() || data_at >= data.len() {
        return;
    }
    let payload = &data[data_at..];

    if rec_id_size == 0 {
        // Sorted group: the stream carries no ids and no length, so clamp to
        // the CG's declared cycle count (the data block need not be last)
        let (_, cycles, group) = &mut cgs[0];
        let stride = group.record_len;
        if stride > 0 {
            let mut whole = payload.len() - payload.len() % stride;
            if *cycles > 0 {
                whole = whole.min(*cycles * stride);
            }
            group.records.extend_from_slice(&payload[..whole]);
        }
        return;
    }

    let trailer = if rec_id_size >= 2 { 1 } else { 0 };
    let mut pos = 0;
    while pos + 1 <= payload.len() {
        let id = payload[pos] as u16;
        pos += 1;
        let Some((_, _, group)) = cgs.iter_mut().find(|(rid, _, _)| *rid == id) else {
            return;
        };
        let stride = group.record_len;
        if pos + stride + trailer > payload.len() {
            return;
        }
        group.records.extend_from_slice(&payload[pos..pos + stride]);
        pos += stride + trailer;
    }
}

/// Decode one raw value. MDF3 data types: 0 uint, 1 sint, 2 float, 3 double
/// (little-endian default), 9-12 the big-endian counterparts.
fn decode_value(record: &[u8], ch: &Channel) -> Option<f64> {
    let bit_count = ch.bit_count as u32;
    if bit_count == 0 || bit_count > 64 {
        return None;
    }
    let byte_offset = (ch.bit_offset / 8) as usize;
    let bit_shift = (ch.bit_offset % 8) as u32;
    let byte_span = ((bit_shift + bit_count + 7) / 8) as usize;
    let bytes = record.get(byte_offset..byte_offset + byte_span)?;

    match ch.data_type {
        0 | 1 => {
            let mut raw: u64 = 0;
            for (i, b) in bytes.iter().enumerate().take(8) {
                raw |= (*b as u64) << (8 * i);
            }
            raw >>= bit_shift;
            if bit_count < 64 {
                raw &= (1u64 << bit_count) - 1;
            }
            if ch.data_type == 1 {
                let shift = 64 - bit_count;
                Some(((raw << shift) as i64 >> shift) as f64)
            } else {
                Some(raw as f64)
            }
        }
        2 | 3 => match bit_count {
            32 => Some(LittleEndian::read_f32(bytes) as f64),
            64 => Some(LittleEndian::read_f64(bytes)),
            _ => None,
        },
        9 | 10 => {
            if bit_shift != 0 || bit_count % 8 != 0 {
                return None;
            }
            let mut raw: u64 = 0;
            for b in bytes.iter().take(8) {
                raw = (raw << 8) | *b as u64;
            }
            if ch.data_type == 10 {
                let shift = 64 - bit_count;
                Some(((raw << shift) as i64 >> shift) as f64)
            } else {
                Some(raw as f64)
            }
        }
        11 | 12 => match bit_count {
            32 => Some(BigEndian::read_f32(bytes) as f64),
            64 => Some(BigEndian::read_f64(bytes)),
            _ => None,
        },
        // Strings and byte arrays are not numeric channels
        _ => None,
    }
}

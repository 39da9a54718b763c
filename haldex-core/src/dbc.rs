//! Table driven signal codec.
//!
//! Signals are described the way a DBC file describes them: a start bit, a
//! length, byte order, signedness, and a linear scale. Little endian (Intel)
//! signals gather LSB first upward from `start_bit`. Big endian (Motorola)
//! signals name their MSB in `start_bit` and walk the usual sawtooth
//! numbering: down within a byte, then to bit 7 of the next byte.

pub mod vw_pq;

/// multiplexing role of a signal inside its frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mux {
    None,
    /// the selector whose raw value picks the active multiplexed group
    Selector,
    /// only valid while the selector reads exactly this value
    Value(u16),
}

/// one compiled-in signal description
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DbcSignal {
    pub frame_id: u32,
    pub name: &'static str,
    pub start_bit: u16,
    pub length: u8,
    pub little_endian: bool,
    pub signed: bool,
    pub scale: f32,
    pub offset: f32,
    pub min: f32,
    pub max: f32,
    pub unit: &'static str,
    pub mux: Mux,
}

/// bit position of every bit of the signal in gather order, `None` once a
/// position leaves the 64 bit payload
fn next_bit(pos: u16, little_endian: bool) -> Option<u16> {
    let next = if little_endian {
        pos + 1
    } else if pos % 8 == 0 {
        pos + 15
    } else {
        pos - 1
    };
    (next < 64).then_some(next)
}

fn fits(start_bit: u16, length: u8, little_endian: bool) -> bool {
    if length == 0 || length > 64 || start_bit >= 64 {
        return false;
    }
    let mut pos = start_bit;
    for _ in 1..length {
        match next_bit(pos, little_endian) {
            Some(next) => pos = next,
            None => return false,
        }
    }
    true
}

/// gather the raw, unsigned bits of a signal from a payload
///
/// Bits that would fall outside the 8 byte payload are not read; the result
/// then holds only the bits gathered so far.
pub fn extract_raw(data: &[u8; 8], start_bit: u16, length: u8, little_endian: bool) -> u64 {
    if length == 0 || start_bit >= 64 {
        return 0;
    }
    let length = length.min(64);
    let mut raw: u64 = 0;
    let mut pos = start_bit;
    for i in 0..length {
        let bit = ((data[(pos / 8) as usize] >> (pos % 8)) & 1) as u64;
        if little_endian {
            raw |= bit << i;
        } else {
            raw = (raw << 1) | bit;
        }
        match next_bit(pos, little_endian) {
            Some(next) => pos = next,
            None => break,
        }
    }
    raw
}

/// physical value of a signal, NaN when the description does not fit a
/// classic CAN payload
///
/// Callers treat any non-finite result as "no value".
pub fn decode(signal: &DbcSignal, data: &[u8; 8]) -> f32 {
    if !fits(signal.start_bit, signal.length, signal.little_endian) {
        return f32::NAN;
    }
    let raw = extract_raw(data, signal.start_bit, signal.length, signal.little_endian);
    let value = if signal.signed && signal.length < 64 && raw & (1 << (signal.length - 1)) != 0 {
        (raw as i64 - (1i64 << signal.length)) as f32
    } else if signal.signed {
        raw as i64 as f32
    } else {
        raw as f32
    };
    value * signal.scale + signal.offset
}

/// whether a multiplexed signal is live in this payload
///
/// Signals without a mux value always match. A multiplexed signal whose
/// frame has no selector in `table` never matches.
pub fn mux_matches(table: &[DbcSignal], signal: &DbcSignal, data: &[u8; 8]) -> bool {
    let Mux::Value(wanted) = signal.mux else {
        return true;
    };
    let Some(selector) = table.iter().find(|s| s.frame_id == signal.frame_id && s.mux == Mux::Selector) else {
        return false;
    };
    extract_raw(data, selector.start_bit, selector.length, selector.little_endian) == wanted as u64
}

fn normalized(name: &str) -> impl Iterator<Item = u8> + '_ {
    name.trim_matches(|c: char| c == '_' || c.is_whitespace())
        .bytes()
        .map(|b| if b == b'_' { b' ' } else { b.to_ascii_lowercase() })
}

/// compare signal names with underscores read as spaces, surrounding
/// whitespace ignored and ASCII case folded
pub fn name_matches(a: &str, b: &str) -> bool {
    normalized(a).eq(normalized(b))
}

/// look a signal up by frame, name and unit
///
/// A signal whose unit also matches wins; otherwise the first signal with a
/// matching name is returned.
pub fn find_signal(table: &'static [DbcSignal], frame_id: u32, name: &str, unit: &str) -> Option<&'static DbcSignal> {
    let mut name_match = None;
    for signal in table.iter().filter(|s| s.frame_id == frame_id) {
        if !name_matches(signal.name, name) {
            continue;
        }
        if signal.unit.trim().eq_ignore_ascii_case(unit.trim()) {
            return Some(signal);
        }
        if name_match.is_none() {
            name_match = Some(signal);
        }
    }
    name_match
}

//! TON cells: bit-level builder and slice, bag-of-cells codec, addresses
//!
//! A cell holds up to 1023 data bits and up to 4 references to child cells.
//! Getter responses carry cells as base64 bag-of-cells (BoC) strings, and
//! outgoing messages are serialized the same way before submission.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE},
    Engine as _,
};
use crc::{Crc, CRC_16_XMODEM, CRC_32_ISCSI};
use sha2::{Digest, Sha256};

use crate::error::EncodingError;

/// Maximum number of data bits in one cell
pub const MAX_BITS: usize = 1023;

/// Maximum number of child references in one cell
pub const MAX_REFS: usize = 4;

const BOC_MAGIC: [u8; 4] = [0xb5, 0xee, 0x9c, 0x72];
const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Bytes of string payload that fit in the head cell after the length prefix
const STRING_HEAD_BYTES: usize = (MAX_BITS - 16) / 8;
/// Bytes of string payload that fit in each continuation cell
const STRING_TAIL_BYTES: usize = MAX_BITS / 8;

/// An ordinary (non-exotic) cell
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Cell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
}

impl Cell {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Data bytes; bits past `bit_len` in the last byte are zero
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn refs(&self) -> &[Arc<Cell>] {
        &self.refs
    }

    /// Start reading this cell from its first bit and first reference
    pub fn parse(&self) -> CellSlice<'_> {
        CellSlice {
            cell: self,
            bit_pos: 0,
            ref_pos: 0,
        }
    }

    pub fn depth(&self) -> u16 {
        self.refs
            .iter()
            .map(|r| r.depth() + 1)
            .max()
            .unwrap_or(0)
    }

    /// Representation hash (SHA-256 over descriptors, padded data, child depths and hashes)
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.descriptors());
        hasher.update(self.padded_data());
        for r in &self.refs {
            hasher.update(r.depth().to_be_bytes());
        }
        for r in &self.refs {
            hasher.update(r.hash());
        }
        hasher.finalize().into()
    }

    fn descriptors(&self) -> [u8; 2] {
        let d1 = self.refs.len() as u8;
        let d2 = (self.bit_len / 8 + self.bit_len.div_ceil(8)) as u8;
        [d1, d2]
    }

    /// Data with the completion tag appended when the last byte is partial
    fn padded_data(&self) -> Vec<u8> {
        let mut data = self.data.clone();
        let rem = self.bit_len % 8;
        if rem != 0 {
            if let Some(last) = data.last_mut() {
                *last |= 0x80 >> rem;
            }
        }
        data
    }

    /// Build a length-prefixed string cell, snaking the tail into child cells
    pub fn from_string(value: &str) -> Result<Self, EncodingError> {
        let bytes = value.as_bytes();
        let len = u16::try_from(bytes.len()).map_err(|_| {
            EncodingError::InvalidString(format!("{} bytes exceeds 16-bit length", bytes.len()))
        })?;

        let head_len = bytes.len().min(STRING_HEAD_BYTES);
        let (head, rest) = bytes.split_at(head_len);

        let mut tail: Option<Cell> = None;
        for chunk in rest.chunks(STRING_TAIL_BYTES).rev() {
            let mut builder = CellBuilder::new();
            builder.store_bytes(chunk)?;
            if let Some(next) = tail.take() {
                builder.store_ref(next)?;
            }
            tail = Some(builder.build());
        }

        let mut builder = CellBuilder::new();
        builder.store_uint(len as u64, 16)?.store_bytes(head)?;
        if let Some(next) = tail {
            builder.store_ref(next)?;
        }
        Ok(builder.build())
    }

    /// Parse a BoC given as base64 (standard or url-safe) or as hex
    pub fn from_boc_str(encoded: &str) -> Result<Self, EncodingError> {
        let encoded = encoded.trim();
        let looks_hex = encoded.len() % 2 == 0
            && encoded.len() >= 8
            && encoded[..8].eq_ignore_ascii_case("b5ee9c72")
            && encoded.chars().all(|c| c.is_ascii_hexdigit());

        let bytes = if looks_hex {
            hex::decode(encoded).map_err(|e| EncodingError::InvalidBoc(e.to_string()))?
        } else {
            STANDARD
                .decode(encoded)
                .or_else(|_| URL_SAFE.decode(encoded))
                .map_err(|e| EncodingError::InvalidBoc(format!("bad base64: {}", e)))?
        };

        Self::from_boc(&bytes)
    }

    /// Deserialize a single-root bag of cells
    pub fn from_boc(bytes: &[u8]) -> Result<Self, EncodingError> {
        let mut reader = ByteReader::new(bytes);

        if reader.take(4)? != BOC_MAGIC {
            return Err(EncodingError::InvalidBoc("bad magic".into()));
        }

        let flags = reader.byte()?;
        let has_idx = flags & 0x80 != 0;
        let has_crc = flags & 0x40 != 0;
        let size = (flags & 0x07) as usize;
        if size == 0 || size > 4 {
            return Err(EncodingError::InvalidBoc(format!("bad ref size {}", size)));
        }

        let off_bytes = reader.byte()? as usize;
        if off_bytes == 0 || off_bytes > 8 {
            return Err(EncodingError::InvalidBoc(format!("bad offset size {}", off_bytes)));
        }

        let cells_num = reader.uint(size)?;
        let roots_num = reader.uint(size)?;
        let _absent = reader.uint(size)?;
        let tot_cells_size = reader.uint(off_bytes)?;

        if roots_num != 1 {
            return Err(EncodingError::InvalidBoc(format!(
                "expected one root, got {}",
                roots_num
            )));
        }
        let root_index = reader.uint(size)?;
        // every cell takes at least its two descriptor bytes
        if cells_num == 0 || cells_num > reader.remaining() / 2 {
            return Err(EncodingError::InvalidBoc(format!(
                "cell count {} exceeds available data",
                cells_num
            )));
        }
        if root_index >= cells_num {
            return Err(EncodingError::InvalidBoc("root index out of range".into()));
        }
        if has_idx {
            reader.take(cells_num * off_bytes)?;
        }

        let cells_start = reader.pos;
        let mut raw = Vec::with_capacity(cells_num);
        for index in 0..cells_num {
            raw.push(read_raw_cell(&mut reader, size, index, cells_num)?);
        }
        if reader.pos - cells_start != tot_cells_size {
            return Err(EncodingError::InvalidBoc("cell data size mismatch".into()));
        }

        if has_crc {
            let body_end = reader.pos;
            let expected = u32::from_le_bytes(
                reader
                    .take(4)?
                    .try_into()
                    .map_err(|_| EncodingError::InvalidBoc("truncated crc".into()))?,
            );
            let actual = CRC32C.checksum(&bytes[..body_end]);
            if expected != actual {
                return Err(EncodingError::InvalidBoc("crc32c mismatch".into()));
            }
        }

        // References always point forward, so build from the last cell back
        let mut built: Vec<Option<Arc<Cell>>> = vec![None; cells_num];
        for (index, (data, bit_len, ref_indices)) in raw.into_iter().enumerate().rev() {
            let mut refs = Vec::with_capacity(ref_indices.len());
            for r in ref_indices {
                let child = built[r]
                    .clone()
                    .ok_or_else(|| EncodingError::InvalidBoc(format!("dangling ref {}", r)))?;
                refs.push(child);
            }
            built[index] = Some(Arc::new(Cell { data, bit_len, refs }));
        }

        let root = built
            .get(root_index)
            .cloned()
            .flatten()
            .ok_or_else(|| EncodingError::InvalidBoc("root index out of range".into()))?;

        Ok(Arc::unwrap_or_clone(root))
    }

    /// Serialize as a single-root bag of cells with a CRC-32C trailer
    pub fn to_boc(&self) -> Vec<u8> {
        let mut flat: Vec<(&Cell, Vec<usize>)> = Vec::new();
        flatten(self, &mut flat);

        let size = bytes_needed(flat.len());
        let tot_cells_size: usize = flat
            .iter()
            .map(|(cell, refs)| 2 + cell.data.len() + refs.len() * size)
            .sum();
        let off_bytes = bytes_needed(tot_cells_size);

        let mut out = Vec::with_capacity(16 + tot_cells_size);
        out.extend_from_slice(&BOC_MAGIC);
        out.push(0x40 | size as u8);
        out.push(off_bytes as u8);
        push_be(&mut out, flat.len(), size);
        push_be(&mut out, 1, size);
        push_be(&mut out, 0, size);
        push_be(&mut out, tot_cells_size, off_bytes);
        push_be(&mut out, 0, size);

        for (cell, refs) in &flat {
            out.extend_from_slice(&cell.descriptors());
            out.extend_from_slice(&cell.padded_data());
            for r in refs {
                push_be(&mut out, *r, size);
            }
        }

        let crc = CRC32C.checksum(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    pub fn to_boc_base64(&self) -> String {
        STANDARD.encode(self.to_boc())
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("bits", &self.bit_len)
            .field("data", &hex::encode(&self.data))
            .field("refs", &self.refs)
            .finish()
    }
}

type RawCell = (Vec<u8>, usize, Vec<usize>);

fn read_raw_cell(
    reader: &mut ByteReader<'_>,
    size: usize,
    index: usize,
    cells_num: usize,
) -> Result<RawCell, EncodingError> {
    let d1 = reader.byte()?;
    let d2 = reader.byte()?;

    let refs_num = (d1 & 0x07) as usize;
    if refs_num > MAX_REFS {
        return Err(EncodingError::InvalidBoc(format!("cell {} has {} refs", index, refs_num)));
    }
    if d1 & 0x08 != 0 {
        return Err(EncodingError::InvalidBoc(format!("cell {} is exotic", index)));
    }
    if d1 & 0x10 != 0 {
        let level_mask = d1 >> 5;
        let hash_count = level_mask.count_ones() as usize + 1;
        reader.take(hash_count * (32 + 2))?;
    }

    let data_len = (d2 as usize).div_ceil(2);
    let mut data = reader.take(data_len)?.to_vec();
    let bit_len = if d2 % 2 == 0 {
        data_len * 8
    } else {
        let last = data
            .last_mut()
            .ok_or_else(|| EncodingError::InvalidBoc(format!("cell {} has no data", index)))?;
        if *last == 0 {
            return Err(EncodingError::InvalidBoc(format!("cell {} lacks completion tag", index)));
        }
        let trailing = last.trailing_zeros() as usize;
        *last &= !(1u8 << trailing);
        data_len * 8 - trailing - 1
    };
    if bit_len > MAX_BITS {
        return Err(EncodingError::InvalidBoc(format!("cell {} has {} bits", index, bit_len)));
    }

    let mut refs = Vec::with_capacity(refs_num);
    for _ in 0..refs_num {
        let r = reader.uint(size)?;
        if r <= index || r >= cells_num {
            return Err(EncodingError::InvalidBoc(format!(
                "cell {} has invalid ref {}",
                index, r
            )));
        }
        refs.push(r);
    }

    Ok((data, bit_len, refs))
}

fn flatten<'a>(cell: &'a Cell, out: &mut Vec<(&'a Cell, Vec<usize>)>) -> usize {
    let index = out.len();
    out.push((cell, Vec::new()));
    let refs = cell.refs.iter().map(|r| flatten(r, out)).collect();
    out[index].1 = refs;
    index
}

fn bytes_needed(value: usize) -> usize {
    let mut n = 1;
    while n < 8 && value >> (n * 8) != 0 {
        n += 1;
    }
    n
}

fn push_be(out: &mut Vec<u8>, value: usize, bytes: usize) {
    let be = (value as u64).to_be_bytes();
    out.extend_from_slice(&be[8 - bytes..]);
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], EncodingError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| EncodingError::InvalidBoc("unexpected end of data".into()))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn byte(&mut self) -> Result<u8, EncodingError> {
        Ok(self.take(1)?[0])
    }

    fn uint(&mut self, n: usize) -> Result<usize, EncodingError> {
        Ok(self
            .take(n)?
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize))
    }
}

/// Incremental cell writer
#[derive(Debug, Clone, Default)]
pub struct CellBuilder {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
}

impl CellBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn store_bit(&mut self, bit: bool) -> Result<&mut Self, EncodingError> {
        if self.bit_len >= MAX_BITS {
            return Err(EncodingError::CellOverflow(format!(
                "more than {} bits",
                MAX_BITS
            )));
        }
        if self.bit_len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            let last = self.data.len() - 1;
            self.data[last] |= 0x80 >> (self.bit_len % 8);
        }
        self.bit_len += 1;
        Ok(self)
    }

    pub fn store_uint(&mut self, value: u64, bits: usize) -> Result<&mut Self, EncodingError> {
        if bits > 64 || (bits < 64 && value >> bits != 0) {
            return Err(EncodingError::Overflow {
                value: value.to_string(),
                bits: bits as u32,
            });
        }
        for i in (0..bits).rev() {
            self.store_bit((value >> i) & 1 == 1)?;
        }
        Ok(self)
    }

    pub fn store_int(&mut self, value: i64, bits: usize) -> Result<&mut Self, EncodingError> {
        let fits = match bits {
            0 => value == 0,
            64 => true,
            b if b < 64 => {
                let bound = 1i64 << (b - 1);
                (-bound..bound).contains(&value)
            }
            _ => false,
        };
        if !fits {
            return Err(EncodingError::Overflow {
                value: value.to_string(),
                bits: bits as u32,
            });
        }
        let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
        self.store_uint(value as u64 & mask, bits)
    }

    pub fn store_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self, EncodingError> {
        for b in bytes {
            self.store_uint(*b as u64, 8)?;
        }
        Ok(self)
    }

    /// Store a `VarUInteger 16` amount (4-bit byte length, then big-endian bytes)
    pub fn store_coins(&mut self, amount: u128) -> Result<&mut Self, EncodingError> {
        let len = (128 - amount.leading_zeros() as usize).div_ceil(8);
        if len > 15 {
            return Err(EncodingError::Overflow {
                value: amount.to_string(),
                bits: 120,
            });
        }
        self.store_uint(len as u64, 4)?;
        self.store_bytes(&amount.to_be_bytes()[16 - len..])
    }

    /// Store `addr_none` for `None`, otherwise `addr_std` without anycast
    pub fn store_address(&mut self, address: Option<&TonAddress>) -> Result<&mut Self, EncodingError> {
        match address {
            None => self.store_uint(0b00, 2),
            Some(addr) => {
                self.store_uint(0b10, 2)?
                    .store_bit(false)?
                    .store_int(addr.workchain as i64, 8)?
                    .store_bytes(&addr.hash)
            }
        }
    }

    pub fn store_ref(&mut self, cell: impl Into<Arc<Cell>>) -> Result<&mut Self, EncodingError> {
        if self.refs.len() >= MAX_REFS {
            return Err(EncodingError::CellOverflow(format!(
                "more than {} refs",
                MAX_REFS
            )));
        }
        self.refs.push(cell.into());
        Ok(self)
    }

    /// Append all bits and references of another cell
    pub fn store_cell_contents(&mut self, cell: &Cell) -> Result<&mut Self, EncodingError> {
        let mut slice = cell.parse();
        while slice.remaining_bits() > 0 {
            let bit = slice.load_bit()?;
            self.store_bit(bit)?;
        }
        for r in cell.refs() {
            self.store_ref(Arc::clone(r))?;
        }
        Ok(self)
    }

    pub fn build(&self) -> Cell {
        Cell {
            data: self.data.clone(),
            bit_len: self.bit_len,
            refs: self.refs.clone(),
        }
    }
}

/// Read cursor over a cell's bits and references
#[derive(Debug, Clone)]
pub struct CellSlice<'a> {
    cell: &'a Cell,
    bit_pos: usize,
    ref_pos: usize,
}

impl<'a> CellSlice<'a> {
    pub fn remaining_bits(&self) -> usize {
        self.cell.bit_len - self.bit_pos
    }

    pub fn remaining_refs(&self) -> usize {
        self.cell.refs.len() - self.ref_pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining_bits() == 0 && self.remaining_refs() == 0
    }

    fn ensure_bits(&self, needed: usize) -> Result<(), EncodingError> {
        let available = self.remaining_bits();
        if needed > available {
            return Err(EncodingError::CellUnderflow { needed, available });
        }
        Ok(())
    }

    pub fn load_bit(&mut self) -> Result<bool, EncodingError> {
        self.ensure_bits(1)?;
        let byte = self.cell.data[self.bit_pos / 8];
        let bit = (byte >> (7 - self.bit_pos % 8)) & 1 == 1;
        self.bit_pos += 1;
        Ok(bit)
    }

    pub fn load_uint(&mut self, bits: usize) -> Result<u64, EncodingError> {
        if bits > 64 {
            return Err(EncodingError::Overflow {
                value: format!("{}-bit read", bits),
                bits: 64,
            });
        }
        self.ensure_bits(bits)?;
        let mut value = 0u64;
        for _ in 0..bits {
            value = (value << 1) | self.load_bit()? as u64;
        }
        Ok(value)
    }

    pub fn load_int(&mut self, bits: usize) -> Result<i64, EncodingError> {
        let raw = self.load_uint(bits)?;
        Ok(match bits {
            0 => 0,
            64 => raw as i64,
            b => ((raw << (64 - b)) as i64) >> (64 - b),
        })
    }

    pub fn load_bytes(&mut self, n: usize) -> Result<Vec<u8>, EncodingError> {
        self.ensure_bits(n * 8)?;
        (0..n).map(|_| Ok(self.load_uint(8)? as u8)).collect()
    }

    pub fn load_coins(&mut self) -> Result<u128, EncodingError> {
        let len = self.load_uint(4)? as usize;
        let bytes = self.load_bytes(len)?;
        Ok(bytes.iter().fold(0u128, |acc, b| (acc << 8) | *b as u128))
    }

    /// Read a `MsgAddressInt`; `addr_none` yields `None`
    pub fn load_address(&mut self) -> Result<Option<TonAddress>, EncodingError> {
        match self.load_uint(2)? {
            0b00 => Ok(None),
            0b10 => {
                if self.load_bit()? {
                    return Err(EncodingError::InvalidAddress("anycast is not supported".into()));
                }
                let workchain = self.load_int(8)? as i8;
                let hash: [u8; 32] = self
                    .load_bytes(32)?
                    .try_into()
                    .map_err(|_| EncodingError::InvalidAddress("short hash".into()))?;
                Ok(Some(TonAddress { workchain, hash }))
            }
            tag => Err(EncodingError::InvalidAddress(format!(
                "unsupported address tag {:02b}",
                tag
            ))),
        }
    }

    pub fn load_ref(&mut self) -> Result<&'a Cell, EncodingError> {
        let cell: &'a Cell = self.cell;
        let child = cell.refs.get(self.ref_pos).ok_or(EncodingError::RefUnderflow)?;
        self.ref_pos += 1;
        Ok(child.as_ref())
    }

    /// Read a 16-bit length-prefixed UTF-8 string.
    ///
    /// When the current cell runs out of bits the payload continues in its
    /// next unread reference, and so on down the chain.
    pub fn load_string(&mut self) -> Result<String, EncodingError> {
        let len = self.load_uint(16)? as usize;
        let mut bytes = Vec::with_capacity(len);

        let take = len.min(self.remaining_bits() / 8);
        bytes.extend(self.load_bytes(take)?);

        let mut current: Option<CellSlice<'a>> = None;
        while bytes.len() < len {
            let next = match current.as_mut() {
                Some(slice) => slice.load_ref(),
                None => self.load_ref(),
            }
            .map_err(|_| {
                EncodingError::InvalidString(format!(
                    "payload truncated at {} of {} bytes",
                    bytes.len(),
                    len
                ))
            })?;

            let mut slice = next.parse();
            let take = (len - bytes.len()).min(slice.remaining_bits() / 8);
            if take == 0 {
                return Err(EncodingError::InvalidString("empty continuation cell".into()));
            }
            bytes.extend(slice.load_bytes(take)?);
            current = Some(slice);
        }

        String::from_utf8(bytes).map_err(|e| EncodingError::InvalidString(e.to_string()))
    }
}

/// Standard internal address: workchain plus 256-bit account id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TonAddress {
    pub workchain: i8,
    pub hash: [u8; 32],
}

impl TonAddress {
    /// User-friendly form: base64url over flags, workchain, hash and CRC-16
    pub fn to_friendly(&self, bounceable: bool, testnet: bool) -> String {
        let mut bytes = Vec::with_capacity(36);
        let mut flags = if bounceable { 0x11 } else { 0x51 };
        if testnet {
            flags |= 0x80;
        }
        bytes.push(flags);
        bytes.push(self.workchain as u8);
        bytes.extend_from_slice(&self.hash);
        bytes.extend_from_slice(&CRC16.checksum(&bytes).to_be_bytes());
        URL_SAFE.encode(bytes)
    }

    fn parse_raw(value: &str) -> Result<Self, EncodingError> {
        let (wc, hash_hex) = value
            .split_once(':')
            .ok_or_else(|| EncodingError::InvalidAddress(value.to_string()))?;
        let workchain: i8 = wc
            .parse()
            .map_err(|_| EncodingError::InvalidAddress(format!("bad workchain {:?}", wc)))?;
        let hash: [u8; 32] = hex::decode(hash_hex)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| EncodingError::InvalidAddress(format!("bad account id {:?}", hash_hex)))?;
        Ok(Self { workchain, hash })
    }

    fn parse_friendly(value: &str) -> Result<Self, EncodingError> {
        let bytes = URL_SAFE
            .decode(value)
            .or_else(|_| STANDARD.decode(value))
            .map_err(|_| EncodingError::InvalidAddress(value.to_string()))?;
        if bytes.len() != 36 {
            return Err(EncodingError::InvalidAddress(format!(
                "expected 36 bytes, got {}",
                bytes.len()
            )));
        }
        let expected = u16::from_be_bytes([bytes[34], bytes[35]]);
        if CRC16.checksum(&bytes[..34]) != expected {
            return Err(EncodingError::InvalidAddress("checksum mismatch".into()));
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[2..34]);
        Ok(Self {
            workchain: bytes[1] as i8,
            hash,
        })
    }
}

impl FromStr for TonAddress {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains(':') {
            Self::parse_raw(s)
        } else {
            Self::parse_friendly(s)
        }
    }
}

impl fmt::Display for TonAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.workchain, hex::encode(self.hash))
    }
}

impl TryFrom<String> for TonAddress {
    type Error = EncodingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TonAddress> for String {
    fn from(value: TonAddress) -> Self {
        value.to_string()
    }
}

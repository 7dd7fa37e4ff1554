//! Getter response stack decoding
//!
//! A getter call returns its results as an ordered stack of typed,
//! string-encoded items. Callers must read them in exactly the order the
//! contract ABI lists them; every read consumes the front item.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::cell::Cell;
use crate::error::EncodingError;

/// One slot in a getter call's result stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub value: String,
}

impl StackItem {
    pub fn num(value: impl Into<String>) -> Self {
        Self {
            item_type: "num".to_string(),
            value: value.into(),
        }
    }

    pub fn cell(value: impl Into<String>) -> Self {
        Self {
            item_type: "cell".to_string(),
            value: value.into(),
        }
    }

    /// Numeric item rendered the way the chain renders it (`0x..` / `-0x..`)
    pub fn from_int(value: i64) -> Self {
        if value < 0 {
            Self::num(format!("-0x{:x}", value.unsigned_abs()))
        } else {
            Self::num(format!("0x{:x}", value))
        }
    }

    pub fn from_cell(cell: &Cell) -> Self {
        Self::cell(cell.to_boc_base64())
    }
}

/// A cell item taken off the stack, not yet interpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackCell {
    raw: String,
}

impl StackCell {
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Decode the bag of cells behind this item
    pub fn parse(&self) -> Result<Cell, EncodingError> {
        Cell::from_boc_str(&self.raw)
    }
}

const NUM_TYPES: &[&str] = &["num", "int"];
const CELL_TYPES: &[&str] = &["cell", "slice", "tvm.Cell", "tvm.Slice"];

/// Destructive, front-to-back reader over a getter result stack
#[derive(Debug, Clone, Default)]
pub struct StackReader {
    items: VecDeque<StackItem>,
}

impl StackReader {
    pub fn new(items: impl IntoIterator<Item = StackItem>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.items.len()
    }

    fn pop(&mut self, expected: &'static str, accepted: &[&str]) -> Result<StackItem, EncodingError> {
        let item = self.items.pop_front().ok_or(EncodingError::StackExhausted)?;
        if !accepted.contains(&item.item_type.as_str()) {
            return Err(EncodingError::UnexpectedType {
                expected,
                actual: item.item_type,
            });
        }
        Ok(item)
    }

    /// Take the front item as an opaque cell
    pub fn read_as_cell(&mut self) -> Result<StackCell, EncodingError> {
        let item = self.pop("cell", CELL_TYPES)?;
        Ok(StackCell { raw: item.value })
    }

    /// Take the front item as a hex integer narrowed to 32 bits
    pub fn read_as_int(&mut self) -> Result<i32, EncodingError> {
        let item = self.pop("num", NUM_TYPES)?;
        let wide = parse_hex_i64(&item.value)?;
        i32::try_from(wide).map_err(|_| EncodingError::Overflow {
            value: item.value,
            bits: 32,
        })
    }

    /// Take the front item as a 64-bit hex integer
    pub fn read_as_long(&mut self) -> Result<i64, EncodingError> {
        let item = self.pop("num", NUM_TYPES)?;
        parse_hex_i64(&item.value)
    }

    /// Take the front item as a cell holding a length-prefixed string
    pub fn read_as_string(&mut self) -> Result<String, EncodingError> {
        let cell = self.read_as_cell()?.parse()?;
        cell.parse().load_string()
    }

    /// Fail if any items were left unread
    pub fn finish(self) -> Result<(), EncodingError> {
        match self.items.len() {
            0 => Ok(()),
            n => Err(EncodingError::TrailingItems(n)),
        }
    }
}

/// Parse `[-][0x]<hex digits>` as a signed 64-bit integer
fn parse_hex_i64(raw: &str) -> Result<i64, EncodingError> {
    let invalid = || EncodingError::InvalidHex(raw.to_string());

    let (negative, rest) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let digits = rest
        .strip_prefix("0x")
        .or_else(|| rest.strip_prefix("0X"))
        .unwrap_or(rest);

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }

    let magnitude = u64::from_str_radix(digits, 16).map_err(|_| EncodingError::Overflow {
        value: raw.to_string(),
        bits: 64,
    })?;

    let overflow = || EncodingError::Overflow {
        value: raw.to_string(),
        bits: 64,
    };
    if negative {
        0i64.checked_sub_unsigned(magnitude).ok_or_else(overflow)
    } else {
        i64::try_from(magnitude).map_err(|_| overflow())
    }
}

//! Lottery contract ABI: getter names, stack layouts and message bodies
//!
//! `get_composite_state` returns, in order:
//!
//! | # | field                            | item  |
//! |---|----------------------------------|-------|
//! | 1 | owner                            | slice |
//! | 2 | version                          | cell (length-prefixed string) |
//! | 3 | required_numbers_count           | num   |
//! | 4 | max_number_range                 | num   |
//! | 5 | max_jackpot_range                | num   |
//! | 6 | max_repeats_per_draw             | num   |
//! | 7 | default_repeat_selection         | num   |
//! | 8 | days_per_draw                    | num   |
//! | 9 | discount_for_every               | num   |
//! | 10| discount_get                     | num   |
//! | 11| jackpot_rollover_balance         | num   |
//! | 12| past_repeated_purchases_balance  | num   |
//! | 13| current_period_balance           | num   |
//! | 14| latest_draw                      | cell  |
//! | 15| latest_draw_at (unix s, 0 = none)| num   |

use chrono::{DateTime, Utc};

use crate::cell::{Cell, CellBuilder};
use crate::error::EncodingError;
use crate::stack::{StackItem, StackReader};
use crate::types::{CompositeState, ContractConfig, ContractState, DiscountFactor, Draw};

pub const GET_COMPOSITE_STATE: &str = "get_composite_state";
pub const WALLET_SEQNO: &str = "seqno";

pub const OP_SET_STATE: u32 = 0x5e7a_57a7;
pub const OP_INITIATE_DRAW: u32 = 0x1d2a_77e3;

/// Draw numbers are stored as `count:uint8` followed by `count` x `uint32`
const DRAW_COUNT_BITS: usize = 8;
const DRAW_NUMBER_BITS: usize = 32;
pub const MAX_DRAW_NUMBERS: usize = (crate::cell::MAX_BITS - DRAW_COUNT_BITS) / DRAW_NUMBER_BITS;

fn read_count(reader: &mut StackReader, field: &'static str) -> Result<u32, EncodingError> {
    let value = reader.read_as_int()?;
    u32::try_from(value).map_err(|_| EncodingError::NegativeValue {
        field,
        value: value as i64,
    })
}

fn read_balance(reader: &mut StackReader, field: &'static str) -> Result<u64, EncodingError> {
    let value = reader.read_as_long()?;
    u64::try_from(value).map_err(|_| EncodingError::NegativeValue { field, value })
}

fn timestamp(secs: i64) -> Result<Option<DateTime<Utc>>, EncodingError> {
    match secs {
        0 => Ok(None),
        s if s < 0 => Err(EncodingError::NegativeValue {
            field: "latest_draw_at",
            value: s,
        }),
        s => DateTime::from_timestamp(s, 0)
            .map(Some)
            .ok_or_else(|| EncodingError::Overflow {
                value: s.to_string(),
                bits: 64,
            }),
    }
}

fn unix_secs(at: Option<DateTime<Utc>>) -> Result<u64, EncodingError> {
    match at {
        None => Ok(0),
        Some(t) => u64::try_from(t.timestamp()).map_err(|_| EncodingError::NegativeValue {
            field: "latest_draw_at",
            value: t.timestamp(),
        }),
    }
}

/// Decode the `get_composite_state` stack in ABI order
pub fn decode_composite_state(reader: &mut StackReader) -> Result<CompositeState, EncodingError> {
    let owner = reader
        .read_as_cell()?
        .parse()?
        .parse()
        .load_address()?
        .ok_or_else(|| EncodingError::InvalidAddress("owner is addr_none".into()))?;
    let version = reader.read_as_string()?;

    let config = ContractConfig {
        owner,
        version,
        required_numbers_count: read_count(reader, "required_numbers_count")?,
        max_number_range: read_count(reader, "max_number_range")?,
        max_jackpot_range: read_count(reader, "max_jackpot_range")?,
        max_repeats_per_draw: read_count(reader, "max_repeats_per_draw")?,
        default_repeat_selection: read_count(reader, "default_repeat_selection")?,
        days_per_draw: read_count(reader, "days_per_draw")?,
        discount: DiscountFactor {
            for_every: read_count(reader, "discount_for_every")?,
            get: read_count(reader, "discount_get")?,
        },
    };

    let jackpot_rollover_balance = read_balance(reader, "jackpot_rollover_balance")?;
    let past_repeated_purchases_balance = read_balance(reader, "past_repeated_purchases_balance")?;
    let current_period_balance = read_balance(reader, "current_period_balance")?;
    let numbers = parse_draw_cell(&reader.read_as_cell()?.parse()?)?;
    let drawn_at = timestamp(reader.read_as_long()?)?;

    Ok(CompositeState {
        config,
        state: ContractState {
            jackpot_rollover_balance,
            past_repeated_purchases_balance,
            current_period_balance,
            latest_draw: Draw { numbers, drawn_at },
        },
    })
}

/// Render a composite state as the stack `get_composite_state` returns
pub fn encode_composite_state(composite: &CompositeState) -> Result<Vec<StackItem>, EncodingError> {
    let CompositeState { config, state } = composite;

    let mut owner = CellBuilder::new();
    owner.store_address(Some(&config.owner))?;

    let balance = |v: u64| {
        i64::try_from(v)
            .map(StackItem::from_int)
            .map_err(|_| EncodingError::Overflow {
                value: v.to_string(),
                bits: 64,
            })
    };

    Ok(vec![
        StackItem {
            item_type: "slice".to_string(),
            value: owner.build().to_boc_base64(),
        },
        StackItem::from_cell(&Cell::from_string(&config.version)?),
        StackItem::from_int(config.required_numbers_count as i64),
        StackItem::from_int(config.max_number_range as i64),
        StackItem::from_int(config.max_jackpot_range as i64),
        StackItem::from_int(config.max_repeats_per_draw as i64),
        StackItem::from_int(config.default_repeat_selection as i64),
        StackItem::from_int(config.days_per_draw as i64),
        StackItem::from_int(config.discount.for_every as i64),
        StackItem::from_int(config.discount.get as i64),
        balance(state.jackpot_rollover_balance)?,
        balance(state.past_repeated_purchases_balance)?,
        balance(state.current_period_balance)?,
        StackItem::from_cell(&draw_cell(&state.latest_draw.numbers)?),
        StackItem::from_int(unix_secs(state.latest_draw.drawn_at)? as i64),
    ])
}

pub fn draw_cell(numbers: &[u32]) -> Result<Cell, EncodingError> {
    if numbers.len() > MAX_DRAW_NUMBERS {
        return Err(EncodingError::CellOverflow(format!(
            "{} draw numbers, at most {} fit",
            numbers.len(),
            MAX_DRAW_NUMBERS
        )));
    }
    let mut b = CellBuilder::new();
    b.store_uint(numbers.len() as u64, DRAW_COUNT_BITS)?;
    for n in numbers {
        b.store_uint(*n as u64, DRAW_NUMBER_BITS)?;
    }
    Ok(b.build())
}

pub fn parse_draw_cell(cell: &Cell) -> Result<Vec<u32>, EncodingError> {
    let mut s = cell.parse();
    let count = s.load_uint(DRAW_COUNT_BITS)? as usize;
    (0..count)
        .map(|_| Ok(s.load_uint(DRAW_NUMBER_BITS)? as u32))
        .collect()
}

/// `set_state#5e7a57a7 query_id:uint64 rollover:Coins repeated:Coins current:Coins drawn_at:uint64 draw:^Cell`
pub fn set_state_body(state: &ContractState, query_id: u64) -> Result<Cell, EncodingError> {
    let mut b = CellBuilder::new();
    b.store_uint(OP_SET_STATE as u64, 32)?
        .store_uint(query_id, 64)?
        .store_coins(state.jackpot_rollover_balance as u128)?
        .store_coins(state.past_repeated_purchases_balance as u128)?
        .store_coins(state.current_period_balance as u128)?
        .store_uint(unix_secs(state.latest_draw.drawn_at)?, 64)?
        .store_ref(draw_cell(&state.latest_draw.numbers)?)?;
    Ok(b.build())
}

/// Decode a `set_state` body into its query id and state
pub fn parse_set_state_body(body: &Cell) -> Result<(u64, ContractState), EncodingError> {
    let mut s = body.parse();
    let op = s.load_uint(32)? as u32;
    if op != OP_SET_STATE {
        return Err(EncodingError::InvalidBoc(format!("unexpected op {:#010x}", op)));
    }
    let query_id = s.load_uint(64)?;
    let coins = |v: u128, field: &'static str| {
        u64::try_from(v).map_err(|_| EncodingError::Overflow {
            value: format!("{}={}", field, v),
            bits: 64,
        })
    };
    let jackpot_rollover_balance = coins(s.load_coins()?, "jackpot_rollover_balance")?;
    let past_repeated_purchases_balance = coins(s.load_coins()?, "past_repeated_purchases_balance")?;
    let current_period_balance = coins(s.load_coins()?, "current_period_balance")?;
    let drawn_at_raw = s.load_uint(64)?;
    let drawn_at = timestamp(i64::try_from(drawn_at_raw).map_err(|_| EncodingError::Overflow {
        value: drawn_at_raw.to_string(),
        bits: 63,
    })?)?;
    let numbers = parse_draw_cell(s.load_ref()?)?;

    Ok((
        query_id,
        ContractState {
            jackpot_rollover_balance,
            past_repeated_purchases_balance,
            current_period_balance,
            latest_draw: Draw { numbers, drawn_at },
        },
    ))
}

/// `initiate_draw#1d2a77e3 query_id:uint64`
pub fn initiate_draw_body(query_id: u64) -> Result<Cell, EncodingError> {
    let mut b = CellBuilder::new();
    b.store_uint(OP_INITIATE_DRAW as u64, 32)?.store_uint(query_id, 64)?;
    Ok(b.build())
}

/// Op code of a message body, if it has one
pub fn body_op(body: &Cell) -> Option<u32> {
    body.parse().load_uint(32).ok().map(|op| op as u32)
}

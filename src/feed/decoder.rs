// =============================================================================
// Packet Decoder: fixed-layout little-endian market feed packets
// =============================================================================
//
// Every packet starts with an 8-byte header:
//
//   offset 0  u8   feed code
//   offset 1  i16  message length
//   offset 3  u8   exchange segment
//   offset 4  i32  security id
//
// Ticker packets (feed code 2) carry a further 8 bytes:
//
//   offset 8  f32  last traded price
//   offset 12 i32  last trade time (epoch seconds)
//
// All other feed codes are valid protocol messages that this feed ignores.
// =============================================================================

use crate::error::DecodeError;

/// Feed code of the ticker packet.
pub const TICKER_FEED_CODE: u8 = 2;

/// Length of the common packet header.
pub const HEADER_LEN: usize = 8;

/// Minimum length of a packet that can yield a tick.
pub const TICKER_PACKET_LEN: usize = 16;

/// Common header present on every binary packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub feed_code: u8,
    pub message_length: i16,
    pub exchange_segment: u8,
    pub security_id: i32,
}

/// Payload of a ticker packet, as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickerPayload {
    pub last_traded_price: f32,
    pub last_trade_time: i32,
}

/// A validated price observation ready for aggregation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickRecord {
    pub price: f64,
    pub exchange_timestamp: i64,
}

/// Result of decoding one binary frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decoded {
    Tick(TickRecord),
    /// Well-formed packet with a feed code this feed does not consume.
    Ignored { feed_code: u8 },
}

fn ensure_len(bytes: &[u8], needed: usize) -> Result<(), DecodeError> {
    if bytes.len() < needed {
        return Err(DecodeError::Truncated {
            needed,
            got: bytes.len(),
        });
    }
    Ok(())
}

/// Read the 8-byte header.
pub fn decode_header(bytes: &[u8]) -> Result<PacketHeader, DecodeError> {
    ensure_len(bytes, HEADER_LEN)?;
    Ok(PacketHeader {
        feed_code: bytes[0],
        message_length: i16::from_le_bytes([bytes[1], bytes[2]]),
        exchange_segment: bytes[3],
        security_id: i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
    })
}

/// Read the ticker payload at offsets 8..16. Does not look at the feed code.
pub fn decode_ticker_payload(bytes: &[u8]) -> Result<TickerPayload, DecodeError> {
    ensure_len(bytes, TICKER_PACKET_LEN)?;
    Ok(TickerPayload {
        last_traded_price: f32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        last_trade_time: i32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
    })
}

/// Decode a full binary frame into a tick.
///
/// Frames shorter than [`TICKER_PACKET_LEN`] are rejected before the header is
/// inspected, so a short packet of any feed code is a [`DecodeError`].
pub fn decode_packet(bytes: &[u8]) -> Result<Decoded, DecodeError> {
    ensure_len(bytes, TICKER_PACKET_LEN)?;

    let header = decode_header(bytes)?;
    if header.feed_code != TICKER_FEED_CODE {
        return Ok(Decoded::Ignored {
            feed_code: header.feed_code,
        });
    }

    let payload = decode_ticker_payload(bytes)?;
    let price = f64::from(payload.last_traded_price);
    if !price.is_finite() || price <= 0.0 {
        return Err(DecodeError::InvalidPrice(price));
    }

    Ok(Decoded::Tick(TickRecord {
        price,
        exchange_timestamp: i64::from(payload.last_trade_time),
    }))
}

/// Build a ticker packet. Used by tests and the local feed simulator in the
/// connection tests.
#[cfg(test)]
pub fn encode_ticker(
    exchange_segment: u8,
    security_id: i32,
    price: f32,
    trade_time: i32,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(TICKER_PACKET_LEN);
    buf.push(TICKER_FEED_CODE);
    buf.extend_from_slice(&(TICKER_PACKET_LEN as i16).to_le_bytes());
    buf.push(exchange_segment);
    buf.extend_from_slice(&security_id.to_le_bytes());
    buf.extend_from_slice(&price.to_le_bytes());
    buf.extend_from_slice(&trade_time.to_le_bytes());
    buf
}

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};

use crate::board::BoardType;
use crate::score::ScoreValue;
use crate::{OutteError, OutteResult};

pub const RESPONSE_HEADER_LEN: usize = 16;
pub const BLOCK_HEADER_LEN: usize = 30;
/// Separates sublevels in the stored encoding; never a valid input byte.
pub const SUBLEVEL_DELIMITER: u8 = b'&';

const EPISODE_MAGIC: u32 = 0xffc0_038e;
const STORY_MAGIC: u32 = 0xff38_00ce;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayHeader {
    pub replay_type: u32,
    pub replay_id: u32,
    pub board_id: u32,
    pub user_id: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedReplay {
    pub header: ReplayHeader,
    pub sublevels: Vec<Vec<u8>>,
}

impl ParsedReplay {
    pub fn framecount(&self) -> i64 {
        self.sublevels.iter().map(|s| s.len() as i64).sum()
    }
}

/// Inputs held during one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInput {
    pub jump: bool,
    pub right: bool,
    pub left: bool,
    pub suicide: bool,
}

impl FrameInput {
    pub fn from_byte(byte: u8) -> Self {
        if byte == 0x0c {
            return Self {
                suicide: true,
                ..Self::default()
            };
        }
        Self {
            jump: byte & 0b001 != 0,
            right: byte & 0b010 != 0,
            left: byte & 0b100 != 0,
            suicide: false,
        }
    }
}

/// Gold collected in a run, derived from its time and real frame count.
pub fn gold(score: ScoreValue, framecount: i64) -> i64 {
    let frames = (score.frames() + framecount) as f64;
    ((frames / ScoreValue::FRAMES_PER_SECOND as f64 - 90.0) / 2.0).round() as i64
}

/// Splits an upstream replay response into per-sublevel frame sequences.
///
/// The caller handles the empty "not found" response before getting here.
pub fn parse_response(bytes: &[u8], board_type: BoardType) -> OutteResult<ParsedReplay> {
    if bytes.len() < RESPONSE_HEADER_LEN {
        return Err(OutteError::integrity(format!(
            "replay response too short: {} bytes",
            bytes.len()
        )));
    }
    let header = ReplayHeader {
        replay_type: read_u32(bytes, 0)?,
        replay_id: read_u32(bytes, 4)?,
        board_id: read_u32(bytes, 8)?,
        user_id: read_u32(bytes, 12)?,
    };
    let data = inflate(&bytes[RESPONSE_HEADER_LEN..])?;

    let count = board_type.sublevel_count();
    let (lengths, mut offset) = match board_type {
        BoardType::Level => (vec![read_u32(&data, 1)? as usize], 0),
        BoardType::Episode => (read_lengths(&data, 4, count)?, 4 + 4 * count),
        BoardType::Story => (read_lengths(&data, 8, count)?, 8 + 4 * count),
    };

    let mut sublevels = Vec::with_capacity(count);
    for length in lengths {
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| {
                OutteError::integrity(format!(
                    "replay {} block at {offset} overruns payload of {} bytes",
                    header.replay_id,
                    data.len()
                ))
            })?;
        if length < BLOCK_HEADER_LEN {
            return Err(OutteError::integrity(format!(
                "replay {} block shorter than its header",
                header.replay_id
            )));
        }
        // The frame right after the block header is never played.
        let frames = data[offset + BLOCK_HEADER_LEN..end]
            .get(1..)
            .unwrap_or_default();
        sublevels.push(frames.to_vec());
        offset = end;
    }
    Ok(ParsedReplay { header, sublevels })
}

/// Inverse of [`parse_response`], used to produce upstream-format payloads.
pub fn compose_response(
    board_type: BoardType,
    header: ReplayHeader,
    sublevels: &[Vec<u8>],
) -> OutteResult<Vec<u8>> {
    if sublevels.len() != board_type.sublevel_count() {
        return Err(OutteError::validation(format!(
            "{board_type} replay needs {} sublevels, got {}",
            board_type.sublevel_count(),
            sublevels.len()
        )));
    }
    let blocks: Vec<Vec<u8>> = sublevels
        .iter()
        .map(|frames| {
            let length = (BLOCK_HEADER_LEN + 1 + frames.len()) as u32;
            let mut block = vec![0u8; BLOCK_HEADER_LEN];
            block[1..5].copy_from_slice(&length.to_le_bytes());
            block[9..13].copy_from_slice(&(frames.len() as u32 + 1).to_le_bytes());
            block.push(0);
            block.extend_from_slice(frames);
            block
        })
        .collect();

    let mut data = Vec::new();
    match board_type {
        BoardType::Level => {}
        BoardType::Episode => data.extend_from_slice(&EPISODE_MAGIC.to_le_bytes()),
        BoardType::Story => {
            data.extend_from_slice(&STORY_MAGIC.to_le_bytes());
            let size: usize = blocks.iter().map(Vec::len).sum();
            data.extend_from_slice(&(size as u32).to_le_bytes());
        }
    }
    if board_type != BoardType::Level {
        for block in &blocks {
            data.extend_from_slice(&(block.len() as u32).to_le_bytes());
        }
    }
    for block in &blocks {
        data.extend_from_slice(block);
    }

    let mut out = Vec::with_capacity(RESPONSE_HEADER_LEN + data.len());
    for field in [
        header.replay_type,
        header.replay_id,
        header.board_id,
        header.user_id,
    ] {
        out.extend_from_slice(&field.to_le_bytes());
    }
    out.extend_from_slice(&deflate(&data)?);
    Ok(out)
}

/// Stored form of a demo: sublevels joined by the delimiter, zlib at best compression.
pub fn encode(sublevels: &[Vec<u8>]) -> OutteResult<Vec<u8>> {
    if sublevels.is_empty() {
        return Err(OutteError::validation("demo has no sublevels"));
    }
    if sublevels
        .iter()
        .any(|frames| frames.contains(&SUBLEVEL_DELIMITER))
    {
        return Err(OutteError::validation(
            "demo frames contain the sublevel delimiter",
        ));
    }
    let joined = sublevels.join(&SUBLEVEL_DELIMITER);
    deflate(&joined)
}

pub fn decode(payload: &[u8]) -> OutteResult<Vec<Vec<u8>>> {
    let joined = inflate(payload)?;
    Ok(joined
        .split(|byte| *byte == SUBLEVEL_DELIMITER)
        .map(<[u8]>::to_vec)
        .collect())
}

fn deflate(data: &[u8]) -> OutteResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(data)
        .map_err(|err| OutteError::integrity(format!("deflate: {err}")))?;
    encoder
        .finish()
        .map_err(|err| OutteError::integrity(format!("deflate: {err}")))
}

fn inflate(data: &[u8]) -> OutteResult<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|err| OutteError::integrity(format!("inflate: {err}")))?;
    Ok(out)
}

fn read_u32(data: &[u8], at: usize) -> OutteResult<u32> {
    data.get(at..at + 4)
        .and_then(|slice| slice.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| OutteError::integrity(format!("truncated length field at byte {at}")))
}

fn read_lengths(data: &[u8], start: usize, count: usize) -> OutteResult<Vec<usize>> {
    (0..count)
        .map(|i| read_u32(data, start + 4 * i).map(|len| len as usize))
        .collect()
}

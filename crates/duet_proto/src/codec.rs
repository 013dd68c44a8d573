//! 帧编解码
//!
//! 帧布局（大端）：
//!
//! ```text
//! [discriminant: u8][song_id: u32][payload_len: u32][payload ...]
//! ```
//!
//! discriminant 低 4 位为命令类型，0x80 表示应答，0x40 表示失败应答。
//! 传输层负责帧边界，每次调用只处理一帧。

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

use crate::{
    Command, CommandType, FailureKind, ProtoError, Reply, ReplyBody, ReplyOutcome, Request,
    RequestKind, ServerFailure, SongInfo, SongSettings,
};

pub const FRAME_HEADER_LEN: usize = 9;
pub const REPLY_FLAG: u8 = 0x80;
pub const FAILURE_FLAG: u8 = 0x40;
const TYPE_MASK: u8 = 0x0F;

/// 编码一条命令
pub fn encode(command: &Command) -> Vec<u8> {
    let mut frame = Vec::new();
    // 写入 Vec 不会失败
    let _ = write_frame(&mut frame, command);
    frame
}

fn write_frame<W: Write>(w: &mut W, command: &Command) -> io::Result<()> {
    let payload = encode_payload(command)?;
    w.write_u8(discriminant(command))?;
    w.write_u32::<BigEndian>(command.song_id())?;
    w.write_u32::<BigEndian>(payload.len() as u32)?;
    w.write_all(&payload)?;
    Ok(())
}

/// 解码一帧
pub fn decode(frame: &[u8]) -> Result<Command, ProtoError> {
    if frame.len() < FRAME_HEADER_LEN {
        return Err(ProtoError::MalformedFrame("frame shorter than header"));
    }

    let mut cur = Cursor::new(frame);
    let discriminant = cur.read_u8()?;
    let song_id = cur.read_u32::<BigEndian>()?;
    let payload_len = cur.read_u32::<BigEndian>()? as usize;

    let payload = &frame[FRAME_HEADER_LEN..];
    if payload.len() != payload_len {
        return Err(ProtoError::MalformedFrame("payload length mismatch"));
    }

    if discriminant & !(REPLY_FLAG | FAILURE_FLAG | TYPE_MASK) != 0 {
        return Err(ProtoError::MalformedFrame("reserved discriminant bits set"));
    }

    let command_type = CommandType::from_u8(discriminant & TYPE_MASK)
        .ok_or(ProtoError::MalformedFrame("unknown command type"))?;
    let is_reply = discriminant & REPLY_FLAG != 0;
    let is_failure = discriminant & FAILURE_FLAG != 0;

    match (is_reply, is_failure) {
        (false, false) => decode_request(song_id, command_type, payload).map(Command::Request),
        (false, true) => Err(ProtoError::MalformedFrame("failure flag on request")),
        (true, true) => decode_failure(song_id, command_type, payload).map(Command::Reply),
        (true, false) => decode_reply(song_id, command_type, payload).map(Command::Reply),
    }
}

fn discriminant(command: &Command) -> u8 {
    let base = command.command_type() as u8;
    match command {
        Command::Request(_) => base,
        Command::Reply(reply) => match reply.outcome {
            ReplyOutcome::Success(_) => REPLY_FLAG | base,
            ReplyOutcome::Failure { .. } => REPLY_FLAG | FAILURE_FLAG | base,
        },
    }
}

fn encode_payload(command: &Command) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    match command {
        Command::Request(req) => match req.kind {
            RequestKind::Open | RequestKind::Close => {}
            RequestKind::Read { byte_count } => buf.write_u32::<BigEndian>(byte_count)?,
            RequestKind::Seek { position } => buf.write_u32::<BigEndian>(position)?,
        },
        Command::Reply(reply) => match &reply.outcome {
            ReplyOutcome::Success(ReplyBody::Opened(info)) => write_song_info(&mut buf, info)?,
            ReplyOutcome::Success(ReplyBody::Data(bytes)) => buf.write_all(bytes)?,
            ReplyOutcome::Success(ReplyBody::Closed | ReplyBody::Sought) => {}
            ReplyOutcome::Failure { failure, .. } => {
                buf.write_u8(failure.kind as u8)?;
                buf.write_all(failure.message.as_bytes())?;
            }
        },
    }
    Ok(buf)
}

fn write_song_info<W: Write>(w: &mut W, info: &SongInfo) -> io::Result<()> {
    w.write_u32::<BigEndian>(info.length)?;
    write_short_str(w, &info.artist)?;
    write_short_str(w, &info.title)?;
    // 默认参数不写入，解码端将空尾部视为默认值
    if !info.settings.is_empty() {
        serde_json::to_writer(&mut *w, &info.settings)?;
    }
    Ok(())
}

/// 写入 u16 长度前缀字符串，超长时在字符边界处截断
fn write_short_str<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    let mut end = s.len().min(u16::MAX as usize);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    w.write_u16::<BigEndian>(end as u16)?;
    w.write_all(&s.as_bytes()[..end])
}

fn read_short_str(cur: &mut Cursor<&[u8]>) -> Result<String, ProtoError> {
    let len = cur.read_u16::<BigEndian>()? as usize;
    let mut raw = vec![0u8; len];
    cur.read_exact(&mut raw)?;
    String::from_utf8(raw).map_err(|_| ProtoError::MalformedFrame("invalid utf-8 string"))
}

fn decode_request(
    song_id: u32,
    command_type: CommandType,
    payload: &[u8],
) -> Result<Request, ProtoError> {
    let kind = match command_type {
        CommandType::Open | CommandType::Close => {
            if !payload.is_empty() {
                return Err(ProtoError::MalformedFrame("unexpected request payload"));
            }
            if command_type == CommandType::Open {
                RequestKind::Open
            } else {
                RequestKind::Close
            }
        }
        CommandType::Read => RequestKind::Read {
            byte_count: read_u32_payload(payload)?,
        },
        CommandType::Seek => RequestKind::Seek {
            position: read_u32_payload(payload)?,
        },
    };

    Ok(Request { song_id, kind })
}

fn read_u32_payload(payload: &[u8]) -> Result<u32, ProtoError> {
    let bytes: [u8; 4] = payload
        .try_into()
        .map_err(|_| ProtoError::MalformedFrame("request payload must be 4 bytes"))?;
    Ok(u32::from_be_bytes(bytes))
}

fn decode_reply(
    song_id: u32,
    command_type: CommandType,
    payload: &[u8],
) -> Result<Reply, ProtoError> {
    let body = match command_type {
        CommandType::Open => ReplyBody::Opened(decode_song_info(payload)?),
        CommandType::Read => ReplyBody::Data(payload.to_vec()),
        CommandType::Close | CommandType::Seek => {
            if !payload.is_empty() {
                return Err(ProtoError::MalformedFrame("unexpected acknowledgement payload"));
            }
            if command_type == CommandType::Close {
                ReplyBody::Closed
            } else {
                ReplyBody::Sought
            }
        }
    };

    Ok(Reply::success(song_id, body))
}

fn decode_song_info(payload: &[u8]) -> Result<SongInfo, ProtoError> {
    let mut cur = Cursor::new(payload);
    let length = cur.read_u32::<BigEndian>()?;
    let artist = read_short_str(&mut cur)?;
    let title = read_short_str(&mut cur)?;

    let rest = &payload[cur.position() as usize..];
    let settings = if rest.is_empty() {
        SongSettings::default()
    } else {
        serde_json::from_slice(rest)
            .map_err(|_| ProtoError::MalformedFrame("invalid song settings"))?
    };

    Ok(SongInfo {
        length,
        artist,
        title,
        settings,
    })
}

fn decode_failure(
    song_id: u32,
    command_type: CommandType,
    payload: &[u8],
) -> Result<Reply, ProtoError> {
    let (&kind, message) = payload
        .split_first()
        .ok_or(ProtoError::MalformedFrame("failure reply without kind"))?;
    let message = std::str::from_utf8(message)
        .map_err(|_| ProtoError::MalformedFrame("invalid utf-8 string"))?;

    Ok(Reply::failure(
        song_id,
        command_type,
        ServerFailure::new(FailureKind::from_u8(kind), message),
    ))
}

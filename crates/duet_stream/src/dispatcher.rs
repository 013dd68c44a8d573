//! 请求分发器
//!
//! 独占传输层；每首歌同一时刻至多一个在途请求，
//! 因此应答按 (song_id, command_type) 配对即可，无需序号。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use duet_proto::{Command, CommandType, ProtoError, Reply, Request, SongId};
use tracing::{debug, warn};

use crate::{Transport, TransportError};

/// 分发错误
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Request already in flight for song {song_id}: {pending:?}")]
    RequestInFlight {
        song_id: SongId,
        pending: CommandType,
    },

    #[error("Unexpected reply for song {song_id}: {command_type:?}")]
    UnexpectedReply {
        song_id: SongId,
        command_type: CommandType,
    },

    #[error("Request timed out for song {song_id}: {command_type:?}")]
    RequestTimeout {
        song_id: SongId,
        command_type: CommandType,
    },

    #[error("Protocol error: {0}")]
    Proto(#[from] ProtoError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// 请求的最终结果
pub type Outcome = Result<Reply, DispatchError>;

/// 在途请求
#[derive(Debug)]
pub struct PendingRequest {
    pub request: Request,
    pub issued_at: Instant,
    slot: Option<Sender<Outcome>>,
}

/// 已结束的请求（收到应答或超时）
#[derive(Debug, Clone)]
pub struct Resolved {
    pub request: Request,
    pub outcome: Outcome,
}

/// 请求句柄，可非阻塞地查询结果
#[derive(Debug)]
pub struct RequestHandle {
    pub song_id: SongId,
    pub command_type: CommandType,
    slot: Receiver<Outcome>,
}

impl RequestHandle {
    /// 结果未到达时返回 `None`
    pub fn try_outcome(&self) -> Option<Outcome> {
        self.slot.try_recv().ok()
    }
}

/// 请求分发器
pub struct Dispatcher {
    transport: Box<dyn Transport>,
    pending: HashMap<SongId, PendingRequest>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(transport: Box<dyn Transport>, timeout: Duration) -> Self {
        Self {
            transport,
            pending: HashMap::new(),
            timeout,
        }
    }

    /// 发送请求并返回结果句柄
    pub fn send(&mut self, request: Request) -> Result<RequestHandle, DispatchError> {
        let (tx, rx) = bounded(1);
        self.send_with_slot(request, Some(tx))?;
        Ok(RequestHandle {
            song_id: request.song_id,
            command_type: request.command_type(),
            slot: rx,
        })
    }

    /// 发送请求，结果只通过 [`Dispatcher::on_frame_received`] / [`Dispatcher::tick`] 返回
    pub fn submit(&mut self, request: Request) -> Result<(), DispatchError> {
        self.send_with_slot(request, None)
    }

    fn send_with_slot(
        &mut self,
        request: Request,
        slot: Option<Sender<Outcome>>,
    ) -> Result<(), DispatchError> {
        if let Some(pending) = self.pending.get(&request.song_id) {
            return Err(DispatchError::RequestInFlight {
                song_id: request.song_id,
                pending: pending.request.command_type(),
            });
        }

        self.transport
            .send_frame(Command::Request(request).to_frame())?;
        debug!(song_id = request.song_id, kind = ?request.kind, "request sent");

        self.pending.insert(
            request.song_id,
            PendingRequest {
                request,
                issued_at: Instant::now(),
                slot,
            },
        );
        Ok(())
    }

    /// 发送不跟踪应答的请求（CLOSE），不受在途限制
    pub fn send_untracked(&mut self, request: Request) -> Result<(), DispatchError> {
        self.transport
            .send_frame(Command::Request(request).to_frame())?;
        debug!(song_id = request.song_id, kind = ?request.kind, "untracked request sent");
        Ok(())
    }

    /// 处理一帧入站数据
    pub fn on_frame_received(&mut self, frame: &[u8]) -> Result<Resolved, DispatchError> {
        let reply = match duet_proto::decode(frame)? {
            Command::Reply(reply) => reply,
            Command::Request(req) => {
                warn!(song_id = req.song_id, "request received on client side, dropped");
                return Err(DispatchError::UnexpectedReply {
                    song_id: req.song_id,
                    command_type: req.command_type(),
                });
            }
        };

        let song_id = reply.song_id;
        let command_type = reply.command_type();
        match self.pending.remove(&song_id) {
            Some(pending) if pending.request.command_type() == command_type => {
                Ok(Self::resolve(pending, Ok(reply)))
            }
            other => {
                if let Some(pending) = other {
                    self.pending.insert(song_id, pending);
                }
                debug!(song_id, ?command_type, "unmatched reply dropped");
                Err(DispatchError::UnexpectedReply {
                    song_id,
                    command_type,
                })
            }
        }
    }

    /// 从传输层取出一帧已到达的入站数据
    pub fn poll_frame(&mut self) -> Result<Option<Vec<u8>>, DispatchError> {
        Ok(self.transport.try_recv_frame()?)
    }

    /// 将超时的在途请求以超时结果结束并移除
    pub fn tick(&mut self, now: Instant) -> Vec<Resolved> {
        let expired: Vec<SongId> = self
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.issued_at) >= self.timeout)
            .map(|(id, _)| *id)
            .collect();

        let mut resolved = Vec::with_capacity(expired.len());
        for song_id in expired {
            if let Some(pending) = self.pending.remove(&song_id) {
                let command_type = pending.request.command_type();
                warn!(song_id, ?command_type, "request timed out");
                resolved.push(Self::resolve(
                    pending,
                    Err(DispatchError::RequestTimeout {
                        song_id,
                        command_type,
                    }),
                ));
            }
        }
        resolved
    }

    /// 放弃某首歌的在途请求（不在线路上取消，其应答到达时会被丢弃）
    pub fn abandon(&mut self, song_id: SongId) -> Option<Request> {
        self.pending.remove(&song_id).map(|p| p.request)
    }

    pub fn pending(&self, song_id: SongId) -> Option<&PendingRequest> {
        self.pending.get(&song_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn resolve(pending: PendingRequest, outcome: Outcome) -> Resolved {
        if let Some(slot) = &pending.slot {
            let _ = slot.try_send(outcome.clone());
        }
        Resolved {
            request: pending.request,
            outcome,
        }
    }
}

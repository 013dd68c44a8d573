//! 传输层接口
//!
//! 传输层按发送顺序可靠地投递完整的帧，连接管理不在此处。

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

/// 传输错误
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Peer disconnected")]
    Disconnected,
}

/// 帧传输
pub trait Transport: Send {
    /// 发送一帧（不阻塞等待应答）
    fn send_frame(&mut self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// 取出一帧已到达的入站数据，没有则返回 `None`
    fn try_recv_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(None)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send_frame(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        (**self).send_frame(frame)
    }

    fn try_recv_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        (**self).try_recv_frame()
    }
}

/// 进程内通道传输，一对端点互为收发
pub struct ChannelTransport {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl ChannelTransport {
    pub fn pair() -> (ChannelTransport, ChannelTransport) {
        let (a_tx, b_rx) = unbounded();
        let (b_tx, a_rx) = unbounded();
        (
            ChannelTransport { tx: a_tx, rx: a_rx },
            ChannelTransport { tx: b_tx, rx: b_rx },
        )
    }

    /// 阻塞等待下一帧（服务端线程使用）
    pub fn recv_frame(&self) -> Result<Vec<u8>, TransportError> {
        self.rx.recv().map_err(|_| TransportError::Disconnected)
    }
}

impl Transport for ChannelTransport {
    fn send_frame(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Disconnected)
    }

    fn try_recv_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.rx.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::Disconnected),
        }
    }
}

//! In-memory transport for tests: a full mesh of length-framed
//! bincode-encoded duplex pipes, one communicator per party.

use std::cell::{Cell, RefCell};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use itertools::izip;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio_serde::formats::Bincode;
use tokio_util::codec::LengthDelimitedCodec;

use crate::error::{MpcError, Result};
use crate::ring::RingArray;
use crate::Communicator;

const MAX_BUF_SIZE: usize = 1 << 22;

/// One transfer between two test parties.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestMessage {
    pub tag: String,
    pub arrays: Vec<RingArray>,
}

/// Length-framed Bincode-encoded messages channel.
pub type BincodeStreamSink<T, C> =
    tokio_serde::Framed<tokio_util::codec::Framed<C, LengthDelimitedCodec>, T, T, Bincode<T, T>>;

/// Length-framed Bincode-encoded tokio's Duplex stream.
pub type BincodeDuplex<T> = BincodeStreamSink<T, DuplexStream>;

/// Create length-framed Bincode-encoded message channel from AsyncRead/Write.
fn wrap_channel_with_bincode<T, C>(channel: C) -> BincodeStreamSink<T, C>
where
    C: AsyncRead + AsyncWrite,
{
    let length_delimited = tokio_util::codec::Framed::new(channel, LengthDelimitedCodec::new());
    tokio_serde::Framed::new(length_delimited, Bincode::default())
}

/// A party's endpoint into the mesh. Counts communication rounds so tests can
/// assert on protocol cost, not just on results.
pub struct DuplexCommunicator {
    rank: usize,
    channels: Vec<Option<RefCell<BincodeDuplex<TestMessage>>>>,
    rounds: Cell<usize>,
}

impl DuplexCommunicator {
    /// Create a fully connected in-memory mesh of `world_size` parties.
    pub fn mesh(world_size: usize) -> Vec<DuplexCommunicator> {
        let mut channels: Vec<Vec<Option<RefCell<BincodeDuplex<TestMessage>>>>> = (0..world_size)
            .map(|_| (0..world_size).map(|_| None).collect())
            .collect();
        for i in 0..world_size {
            for j in (i + 1)..world_size {
                let (a, b) = tokio::io::duplex(MAX_BUF_SIZE);
                channels[i][j] = Some(RefCell::new(wrap_channel_with_bincode(a)));
                channels[j][i] = Some(RefCell::new(wrap_channel_with_bincode(b)));
            }
        }
        channels
            .into_iter()
            .enumerate()
            .map(|(rank, channels)| DuplexCommunicator {
                rank,
                channels,
                rounds: Cell::new(0),
            })
            .collect()
    }

    /// Number of communication rounds this party has taken part in.
    pub fn rounds(&self) -> usize {
        self.rounds.get()
    }

    fn peers(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.channels.len()).filter(move |&r| r != self.rank)
    }

    async fn send_msg(&self, to: usize, msg: TestMessage) -> Result<()> {
        let mut channel = self.channels[to]
            .as_ref()
            .ok_or_else(|| MpcError::Comm(format!("no channel to rank {to}")))?
            .borrow_mut();
        channel
            .send(msg)
            .await
            .map_err(|e| MpcError::Comm(format!("send to rank {to}: {e}")))
    }

    async fn recv_msg(&self, from: usize) -> Result<TestMessage> {
        let mut channel = self.channels[from]
            .as_ref()
            .ok_or_else(|| MpcError::Comm(format!("no channel to rank {from}")))?
            .borrow_mut();
        match channel.next().await {
            Some(Ok(msg)) => Ok(msg),
            Some(Err(e)) => Err(MpcError::Comm(format!("recv from rank {from}: {e}"))),
            None => Err(MpcError::Comm(format!("channel to rank {from} closed"))),
        }
    }
}

#[async_trait(?Send)]
impl Communicator for DuplexCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.channels.len()
    }

    async fn all_reduce_add(&self, x: RingArray, tag: &str) -> Result<RingArray> {
        let mut out = self.all_reduce_add_batch(vec![x], tag).await?;
        out.pop()
            .ok_or_else(|| MpcError::Comm("empty reduction".into()))
    }

    async fn all_reduce_add_batch(&self, xs: Vec<RingArray>, tag: &str) -> Result<Vec<RingArray>> {
        self.rounds.set(self.rounds.get() + 1);
        for peer in self.peers() {
            self.send_msg(
                peer,
                TestMessage {
                    tag: tag.to_string(),
                    arrays: xs.clone(),
                },
            )
            .await?;
        }
        let mut sums = xs;
        for peer in self.peers() {
            let msg = self.recv_msg(peer).await?;
            if msg.arrays.len() != sums.len() {
                return Err(MpcError::Comm(format!(
                    "reduction '{tag}' got {} arrays from rank {peer}, expected {}",
                    msg.arrays.len(),
                    sums.len()
                )));
            }
            for (sum, x) in izip!(&mut sums, msg.arrays) {
                *sum = sum.add(&x)?;
            }
        }
        Ok(sums)
    }

    async fn send(&self, to: usize, x: RingArray, tag: &str) -> Result<()> {
        self.rounds.set(self.rounds.get() + 1);
        self.send_msg(
            to,
            TestMessage {
                tag: tag.to_string(),
                arrays: vec![x],
            },
        )
        .await
    }

    async fn recv(&self, from: usize, tag: &str) -> Result<RingArray> {
        let mut msg = self.recv_msg(from).await?;
        if msg.arrays.len() != 1 {
            return Err(MpcError::Comm(format!(
                "recv '{tag}' got {} arrays from rank {from}, expected 1",
                msg.arrays.len()
            )));
        }
        Ok(msg.arrays.pop().expect("length checked above"))
    }

    async fn gather(&self, x: RingArray, root: usize, tag: &str) -> Result<Vec<RingArray>> {
        self.rounds.set(self.rounds.get() + 1);
        if self.rank != root {
            self.send_msg(
                root,
                TestMessage {
                    tag: tag.to_string(),
                    arrays: vec![x],
                },
            )
            .await?;
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(self.world_size());
        for rank in 0..self.world_size() {
            if rank == self.rank {
                out.push(x.clone());
            } else {
                let mut msg = self.recv_msg(rank).await?;
                if msg.arrays.len() != 1 {
                    return Err(MpcError::Comm(format!(
                        "gather '{tag}' got {} arrays from rank {rank}, expected 1",
                        msg.arrays.len()
                    )));
                }
                out.push(msg.arrays.pop().expect("length checked above"));
            }
        }
        Ok(out)
    }
}

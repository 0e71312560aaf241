use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::DispatchJob;
use crate::{Error, Result};

/// watcher 把一批任务推给发送端的出口
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn send(&self, jobs: Vec<DispatchJob>) -> Result<()>;
}

/// 进程内队列，一端一个，接收端交给该链的 dispatcher
#[derive(Clone)]
pub struct ChannelQueue {
    name: String,
    sender: mpsc::Sender<Vec<DispatchJob>>,
}

impl ChannelQueue {
    pub fn bounded(
        name: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Vec<DispatchJob>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                name: name.into(),
                sender,
            },
            receiver,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl JobQueue for ChannelQueue {
    async fn send(&self, jobs: Vec<DispatchJob>) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }
        self.sender
            .send(jobs)
            .await
            .map_err(|_| Error::Queue(format!("queue {} is closed", self.name)))
    }
}

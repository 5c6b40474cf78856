mod handle;
mod state;
mod worker;

pub use handle::{DebateSessionHandle, SessionCanceller};

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use crate::orchestrator::config::SessionConfig;
use crate::orchestrator::constants::COMMAND_CAPACITY;
use crate::orchestrator::traits::EventStream;
use crate::orchestrator::types::{DebateSession, DebateSetup};

use self::worker::{SessionWorker, StreamItem};

pub(crate) fn spawn_session(
    config: SessionConfig,
    setup: DebateSetup,
    session: DebateSession,
    stream: Box<dyn EventStream>,
) -> DebateSessionHandle {
    let (frame_tx, frame_rx) = mpsc::channel(config.event_queue_capacity.max(1));
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (updates_tx, _) = broadcast::channel(config.update_capacity.max(1));
    let (close_tx, close_rx) = oneshot::channel();
    let session_id = session.session_id.clone();
    let close_grace = config.close_grace;

    let reader = tokio::spawn(pump_stream(session_id.clone(), stream, frame_tx, close_rx));
    let worker = SessionWorker::new(
        config,
        setup,
        session,
        frame_rx,
        command_rx,
        updates_tx.clone(),
        close_tx,
    )
    .spawn();

    DebateSessionHandle::new(session_id, close_grace, command_tx, updates_tx, worker, reader)
}

/// Moves frames from the transport into the bounded queue until the stream
/// ends or the worker asks for it to be closed.
async fn pump_stream(
    session_id: String,
    mut stream: Box<dyn EventStream>,
    frame_tx: mpsc::Sender<StreamItem>,
    mut close_rx: oneshot::Receiver<()>,
) {
    loop {
        let item = tokio::select! {
            _ = &mut close_rx => break,
            next = stream.next_frame() => match next {
                Some(Ok(frame)) => StreamItem::Frame(frame),
                Some(Err(err)) => StreamItem::Failed(format!("{err:#}")),
                None => StreamItem::Closed,
            },
        };
        let last = !matches!(item, StreamItem::Frame(_));

        // A full queue stalls the reader, never the worker.
        tokio::select! {
            _ = &mut close_rx => break,
            sent = frame_tx.send(item) => {
                if sent.is_err() || last {
                    break;
                }
            }
        }
    }

    if let Err(err) = stream.close().await {
        debug!(
            target: "debate_orchestrator",
            %session_id,
            %err,
            "event stream close reported an error"
        );
    }
}

//! Tasks connecting a supervisor to its worker's pipes.
//!
//! The control task owns the worker's stdin and forwards signals. The reader
//! task owns the worker's stdout, mirrors lifecycle changes into the host
//! [`ControlBlock`] and pushes frames into the host [`FrameChannel`].

use std::sync::Arc;

use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use crate::channel::{FrameChannel, PushOutcome};
use crate::control::ControlBlock;
use crate::ipc::{send_control, ControlMessage, FrameReader, Incoming};
use crate::supervisor::SessionCounters;

/// Forward control messages until an exit was sent or the sender is dropped.
///
/// The host refresh flag means "not yet delivered": it is consumed here, so
/// several requests issued before one is written collapse into one message.
/// Dropping stdin on return gives the worker EOF.
pub(crate) async fn forward_control(
    mut stdin: ChildStdin,
    mut messages: UnboundedReceiver<ControlMessage>,
    control: Arc<ControlBlock>,
) {
    while let Some(message) = messages.recv().await {
        if message == ControlMessage::Refresh && !control.take_refresh() {
            continue;
        }
        if let Err(e) = send_control(&mut stdin, message).await {
            tracing::debug!(error = %e, ?message, "Control pipe closed");
            break;
        }
        tracing::trace!(?message, "Control message sent");
        if message == ControlMessage::Exit {
            break;
        }
    }
}

/// Read worker output until EOF, a protocol error or cancellation.
///
/// The host lifecycle is forced to `Stopped` when the output ends, whatever
/// the worker reported last.
pub(crate) async fn mirror_worker_output(
    stdout: ChildStdout,
    control: Arc<ControlBlock>,
    frames: Arc<FrameChannel>,
    counters: Arc<SessionCounters>,
    cancel: CancellationToken,
) {
    let mut reader = FrameReader::new(stdout);
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!("Reader cancelled");
                break;
            }
            next = reader.next() => next,
        };

        match next {
            Ok(Some(Incoming::State(state))) => {
                control.transition(state);
            }
            Ok(Some(Incoming::Frame(frame))) => {
                let outcome = frames.push(frame);
                counters.record_frame(matches!(
                    outcome,
                    PushOutcome::ReplacedOldest | PushOutcome::Discarded
                ));
                if outcome == PushOutcome::Closed {
                    break;
                }
            }
            Ok(None) => {
                tracing::debug!("Worker output closed");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Invalid worker output, no longer reading");
                break;
            }
        }
    }
    control.mark_stopped();
}

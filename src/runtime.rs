//! Real-time driver: runs a [`ProbeEngine`] on a raw ICMP socket.

use anyhow::Context;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};

use crate::config::ProbeConfig;
use crate::engine::{EngineTimer, Identity, ProbeEngine};
use crate::icmp::{IcmpReceiver, IcmpSocket, decode_reply};
use crate::observer::EventSink;
use crate::stats::Report;
use crate::timer::EventQueue;
use crate::transport::Transport;

/// How long the reader thread blocks before checking whether it is still wanted.
const RECV_POLL: Duration = Duration::from_millis(200);
const INBOUND_QUEUE: usize = 1024;

type Datagram = (Vec<u8>, IpAddr);

/// Probe until the engine stops on its own or `shutdown` fires, then return
/// the final report. Dropping the shutdown sender leaves the run to finish
/// by itself.
pub async fn run<S: EventSink>(
    config: ProbeConfig,
    identity: Identity,
    sink: S,
    shutdown: oneshot::Receiver<()>,
) -> anyhow::Result<Report> {
    let epoch = Instant::now();
    let mut queue: EventQueue<EngineTimer> = EventQueue::new();
    let mut engine = ProbeEngine::new(config, identity, IcmpSocket::new(), sink);

    engine.start(&mut queue).context("failed to start probing")?;

    let receiver = engine
        .transport()
        .receiver(RECV_POLL)
        .context("failed to set up the receive path")?;
    let (tx, mut rx) = mpsc::channel::<Datagram>(INBOUND_QUEUE);
    let reader = tokio::task::spawn_blocking(move || receive_loop(receiver, tx));

    drive(&mut engine, &mut queue, epoch, &mut rx, shutdown).await;

    drop(rx);
    if let Err(e) = reader.await {
        log::warn!("receive thread ended abnormally: {}", e);
    }

    engine
        .report()
        .cloned()
        .context("engine stopped without producing a report")
}

/// Dispatch timers, inbound datagrams and the shutdown request to a started
/// engine until it stops.
async fn drive<T: Transport, S: EventSink>(
    engine: &mut ProbeEngine<T, S>,
    queue: &mut EventQueue<EngineTimer>,
    epoch: Instant,
    inbound: &mut mpsc::Receiver<Datagram>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut listening = true;

    while !engine.is_stopped() {
        let deadline = queue.next_deadline().and_then(|at| epoch.checked_add(at));

        tokio::select! {
            _ = sleep_until_deadline(deadline) => {
                let now = epoch.elapsed();
                queue.advance_to(now);
                while let Some((_, timer)) = queue.pop_due(now) {
                    engine.on_timer(timer, queue);
                }
            }
            Some((data, source)) = inbound.recv() => {
                queue.advance_to(epoch.elapsed());
                match decode_reply(&data, source) {
                    Ok(reply) => engine.on_reply(&reply, queue),
                    Err(e) => log::debug!("discarding datagram from {}: {}", source, e),
                }
            }
            result = &mut shutdown, if listening => {
                listening = false;
                match result {
                    Ok(()) => {
                        log::debug!("shutdown requested");
                        queue.advance_to(epoch.elapsed());
                        engine.stop(queue);
                    }
                    Err(_) => log::debug!("shutdown sender dropped, running until done"),
                }
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Forward datagrams until the engine side hangs up.
fn receive_loop(receiver: IcmpReceiver, tx: mpsc::Sender<Datagram>) {
    while !tx.is_closed() {
        match receiver.recv() {
            Ok(Some(datagram)) => {
                if tx.blocking_send(datagram).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!("receive failed: {}", e);
                break;
            }
        }
    }
    log::debug!("receive thread exiting");
}

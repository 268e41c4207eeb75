//! Loopback peer used by the unit tests.
//!
//! Accepts connections on `127.0.0.1`, records every sentinel-delimited frame
//! it receives and (optionally) echoes it back. Tests can drop all live
//! connections, stop the listener, and start it again on the same port.

use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Default)]
struct PeerState {
    frames: Mutex<Vec<Vec<u8>>>,
    accepted: AtomicUsize,
}

pub(crate) struct EchoPeer {
    addr: SocketAddr,
    echo: bool,
    state: Arc<PeerState>,
    kill_tx: watch::Sender<u64>,
    accept_task: Option<JoinHandle<()>>,
}

impl EchoPeer {
    /// Start an echoing peer on a random port.
    pub async fn start() -> Self {
        Self::start_on(0, true).await
    }

    /// Start a peer that records frames without answering.
    pub async fn silent() -> Self {
        Self::start_on(0, false).await
    }

    pub async fn start_on(port: u16, echo: bool) -> Self {
        let (kill_tx, _) = watch::channel(0);
        let mut peer = Self {
            addr: SocketAddr::from(([127, 0, 0, 1], port)),
            echo,
            state: Arc::new(PeerState::default()),
            kill_tx,
            accept_task: None,
        };
        peer.listen().await;
        peer
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Connections accepted so far, across restarts.
    pub fn accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    /// Frames received so far, without delimiters.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.state.frames.lock().unwrap().clone()
    }

    /// Drop every live connection, keeping the listener up.
    pub fn kill_connections(&self) {
        self.kill_tx.send_modify(|epoch| *epoch += 1);
    }

    /// Stop listening and drop every live connection.
    pub fn stop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        self.kill_connections();
    }

    /// Listen again on the same port after `stop()`.
    pub async fn restart(&mut self) {
        self.stop();
        self.listen().await;
    }

    /// Wait until `count` connections have been accepted.
    pub async fn wait_for_accepted(&self, count: usize) -> bool {
        wait_until(|| self.accepted() >= count).await
    }

    /// Wait until at least `count` frames have been received.
    pub async fn wait_for_frames(&self, count: usize) -> bool {
        wait_until(|| self.frames().len() >= count).await
    }

    async fn listen(&mut self) {
        // The port may still be releasing after stop(); retry briefly.
        let mut listener = None;
        for _ in 0..50 {
            match TcpListener::bind(self.addr).await {
                Ok(l) => {
                    listener = Some(l);
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
        let listener = listener.expect("peer should bind");
        self.addr = listener.local_addr().unwrap();

        let state = self.state.clone();
        let kill_rx = self.kill_tx.subscribe();
        let echo = self.echo;
        self.accept_task = Some(tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                state.accepted.fetch_add(1, Ordering::SeqCst);
                let state = state.clone();
                let mut kill_rx = kill_rx.clone();
                kill_rx.borrow_and_update();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = serve(stream, state, echo) => {}
                        _ = kill_rx.changed() => {}
                    }
                });
            }
        }));
    }
}

impl Drop for EchoPeer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve(mut stream: TcpStream, state: Arc<PeerState>, echo: bool) {
    let mut buf = BytesMut::with_capacity(64 * 1024);
    loop {
        match stream.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        while let Some(pos) = buf.iter().position(|&b| b == 0) {
            let frame = buf.split_to(pos + 1);
            state
                .frames
                .lock()
                .unwrap()
                .push(frame[..frame.len() - 1].to_vec());
            if echo && stream.write_all(&frame).await.is_err() {
                return;
            }
        }
    }
}

/// Poll `condition` for up to five seconds.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..250 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

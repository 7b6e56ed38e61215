//! The tandem API servers.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use zino_core::events::Event;

use super::auth;
use super::legacy;
use super::notify::{lines_for, NotifyChannel};
use crate::engine::Engine;
use crate::scheduler::Scheduler;

/// Default command server port.
pub const API_PORT: u16 = 8001;

/// Default notify server port.
pub const NOTIFY_PORT: u16 = 8002;

/// State shared between command sessions, notify sessions and the event
/// observer: the engine handles plus the nonce-keyed channel registry.
pub struct ApiShared {
    pub engine: Engine,
    pub scheduler: Scheduler,
    channels: Mutex<HashMap<String, Arc<NotifyChannel>>>,
}

impl ApiShared {
    pub fn new(engine: Engine, scheduler: Scheduler) -> Self {
        Self {
            engine,
            scheduler,
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_channel(&self) -> Arc<NotifyChannel> {
        let channel = Arc::new(NotifyChannel::new(auth::generate_challenge()));
        self.channels
            .lock()
            .unwrap()
            .insert(channel.nonce.clone(), channel.clone());
        channel
    }

    pub fn unregister_channel(&self, nonce: &str) {
        self.channels.lock().unwrap().remove(nonce);
    }

    pub fn channel(&self, nonce: &str) -> Option<Arc<NotifyChannel>> {
        self.channels.lock().unwrap().get(nonce).cloned()
    }

    /// Fans one event change out to every tied notify session. Called from
    /// the store's observer hook, on the committing task's stack.
    pub fn broadcast(&self, event: &Event, old: Option<&Event>) {
        let lines = lines_for(event, old);
        if lines.is_empty() {
            return;
        }
        for channel in self.channels.lock().unwrap().values() {
            if !channel.is_tied() {
                continue;
            }
            for line in &lines {
                channel.push(line.clone());
            }
        }
    }
}

/// The two listeners working in tandem.
pub struct ZinoServer {
    pub shared: Arc<ApiShared>,
    api_listener: TcpListener,
    notify_listener: TcpListener,
}

impl ZinoServer {
    /// Binds both ports and registers the notification observer on the
    /// event store. Bind failures bubble up so main can exit(2).
    pub async fn bind(
        engine: Engine,
        scheduler: Scheduler,
        address: &str,
        api_port: u16,
        notify_port: u16,
    ) -> io::Result<Self> {
        let api_listener = TcpListener::bind((address, api_port)).await?;
        let notify_listener = TcpListener::bind((address, notify_port)).await?;
        info!(
            api = %api_listener.local_addr()?,
            notify = %notify_listener.local_addr()?,
            "serving legacy API"
        );

        let shared = Arc::new(ApiShared::new(engine.clone(), scheduler));
        let observer_shared = shared.clone();
        engine
            .state()
            .events
            .register_observer(Box::new(move |event, old| {
                observer_shared.broadcast(event, old);
            }));

        Ok(Self {
            shared,
            api_listener,
            notify_listener,
        })
    }

    pub fn local_api_port(&self) -> u16 {
        self.api_listener.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    pub fn local_notify_port(&self) -> u16 {
        self.notify_listener.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    /// Accepts connections on both ports until shutdown.
    pub async fn run(self, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                accepted = self.api_listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "new command connection");
                        let shared = self.shared.clone();
                        tokio::spawn(async move {
                            if let Err(err) = legacy::serve_command_client(stream, shared).await {
                                debug!(%peer, %err, "command session ended with error");
                            }
                        });
                    }
                    Err(err) => warn!(%err, "command accept failed"),
                },
                accepted = self.notify_listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "new notification channel");
                        let shared = self.shared.clone();
                        tokio::spawn(async move {
                            serve_notify_client(stream, shared).await;
                        });
                    }
                    Err(err) => warn!(%err, "notify accept failed"),
                },
            }
        }
    }
}

/// Serves one notify connection: send the nonce, then stream queued lines.
async fn serve_notify_client(stream: tokio::net::TcpStream, shared: Arc<ApiShared>) {
    let channel = shared.register_channel();
    let mut stream = stream;
    if stream
        .write_all(format!("{}\r\n", channel.nonce).as_bytes())
        .await
        .is_err()
    {
        shared.unregister_channel(&channel.nonce);
        return;
    }

    loop {
        channel.wait().await;
        let lines = channel.drain();
        for line in lines {
            if stream.write_all(format!("{line}\r\n").as_bytes()).await.is_err() {
                debug!(nonce = %channel.nonce, "notify client went away");
                shared.unregister_channel(&channel.nonce);
                return;
            }
        }
        if stream.flush().await.is_err() {
            shared.unregister_channel(&channel.nonce);
            return;
        }
        if channel.is_closed() {
            let _ = stream
                .write_all(b"Normal quit from client, closing down\r\n")
                .await;
            shared.unregister_channel(&channel.nonce);
            return;
        }
    }
}

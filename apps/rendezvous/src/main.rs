use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use rendezvous::config::{Cli, Config};
use rendezvous::media::{DataCallback, DataChannelEvent, DataEventKind, RemoteTrack, StreamEvent};
use rendezvous::native::{NativePeer, WebRtcOptions, WebRtcPeer};
use rendezvous::session::{SessionNotice, SessionOptions, SignalingSession};
use rendezvous::telemetry::logging;
use rendezvous::transport::HttpSignalTransport;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

const PUMP_INTERVAL: Duration = Duration::from_millis(20);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    logging::init(&cli.log_config()).context("failed to initialize logging")?;
    let config = Config::from_cli(&cli).context("invalid configuration")?;

    info!(
        server = %config.server,
        local = %config.local_peer,
        remote = %config.remote_peer,
        role = %config.role,
        "starting rendezvous peer"
    );

    let transport = Arc::new(HttpSignalTransport::new(config.server.clone()));
    let webrtc_options = WebRtcOptions::from(&config);
    let created: Arc<OnceLock<Arc<WebRtcPeer>>> = Arc::default();
    let slot = Arc::clone(&created);
    let mut session = SignalingSession::connect(
        SessionOptions::from(&config),
        transport,
        move |sink| async move {
            let peer = WebRtcPeer::connect(webrtc_options, sink).await?;
            let _ = slot.set(Arc::clone(&peer));
            Ok(peer as Arc<dyn NativePeer>)
        },
    )
    .await
    .context("failed to create peer connection")?;
    let peer = created
        .get()
        .cloned()
        .context("peer connection was not created")?;

    session.media_mut().add_listener(|event, slot| {
        let Some(RemoteTrack::Data(track)) = slot.track() else {
            return;
        };
        match event {
            StreamEvent::Started => {
                info!(track = track.name(), "data channel streaming");
                let print: DataCallback = Arc::new(|event: DataChannelEvent<'_>| {
                    if let DataChannelEvent::Message { binary: false, data } = event {
                        println!("{}", String::from_utf8_lossy(data));
                    }
                });
                track.set_callback(DataEventKind::Message, Some(print));
                let state: DataCallback = Arc::new(|event: DataChannelEvent<'_>| {
                    if let DataChannelEvent::State(state) = event {
                        info!(?state, "data channel state");
                    }
                });
                track.set_callback(DataEventKind::State, Some(state));
            }
            StreamEvent::Stopped => info!(track = track.name(), "data channel stopped"),
        }
    });

    let mut notices = session.subscribe();
    session.start();

    let mut tick = tokio::time::interval(PUMP_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let result = loop {
        tokio::select! {
            _ = tick.tick() => {
                session.pump();
            }
            notice = notices.recv() => match notice {
                Ok(SessionNotice::StateChanged { from, to }) => {
                    info!(%from, %to, "session state changed");
                }
                Ok(SessionNotice::Failed(err)) => {
                    error!(error = %err, "session failed");
                    break Err(anyhow::Error::new(err));
                }
                Err(RecvError::Lagged(skipped)) => {
                    info!(skipped, "session notices lagged");
                }
                Err(RecvError::Closed) => break Ok(()),
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if let Err(err) = peer.send_text(line).await {
                        warn!(error = %err, "message not sent");
                    }
                }
                Ok(None) => stdin_open = false,
                Err(err) => {
                    warn!(error = %err, "stdin closed");
                    stdin_open = false;
                }
            },
            _ = &mut ctrl_c => {
                info!("interrupted, shutting down");
                if let Err(err) = peer.close_channel().await {
                    info!(error = %err, "data channel was not open");
                }
                session.pump();
                break Ok(());
            }
        }
    };

    session.shutdown();
    result
}

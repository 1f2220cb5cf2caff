use super::handle::{Session, SessionChannels};
use super::registry::RegistryInner;
use crate::domain::protocol::LINE_TERMINATOR;
use crate::domain::session::CloseReason;
use crate::ports::transport_port::BackendWriter;
use crate::ports::{BackendStream, BackendTransport};
use std::sync::{Arc, Weak};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 8 * 1024;

/// Owns the backend stream for one session until it ends, then reports the
/// close to the registry unless the session was detached.
pub(crate) async fn drive_connection(
    registry: Weak<RegistryInner>,
    transport: Arc<dyn BackendTransport>,
    session: Arc<Session>,
    channels: SessionChannels,
) {
    let reason = pump(&registry, transport.as_ref(), &session, channels).await;
    let user = session.user();
    let session_id = session.id();

    match &reason {
        CloseReason::TransportFailure(error) => {
            warn!(%user, %session_id, %error, "backend connection failed");
        }
        CloseReason::RemoteClosed => {
            info!(%user, %session_id, "backend closed connection");
        }
        CloseReason::Detached => {
            debug!(%user, %session_id, "connection task stopped");
        }
    }

    let Some(registry) = registry.upgrade() else {
        return;
    };
    if session.is_detached() {
        return;
    }
    if matches!(reason, CloseReason::TransportFailure(_)) {
        registry.record_transport_error();
    }
    if let Some(event) = session.mark_closed(reason) {
        registry.forget(&session).await;
        registry.publish(event);
    }
}

async fn pump(
    registry: &Weak<RegistryInner>,
    transport: &dyn BackendTransport,
    session: &Session,
    channels: SessionChannels,
) -> CloseReason {
    let SessionChannels {
        mut outbound,
        mut shutdown,
    } = channels;
    let user = session.user();

    let opened = tokio::select! {
        biased;
        _ = &mut shutdown => return CloseReason::Detached,
        opened = transport.open(&user) => opened,
    };
    let BackendStream {
        mut reader,
        mut writer,
    } = match opened {
        Ok(stream) => stream,
        Err(err) => return CloseReason::TransportFailure(err.to_string()),
    };

    if let Some(event) = session.mark_connected() {
        info!(%user, session_id = %session.id(), target = %transport.describe(), "backend session connected");
        if let Some(registry) = registry.upgrade() {
            registry.publish(event);
        }
    }

    let login = format!("{}{}", user, LINE_TERMINATOR);
    if let Err(err) = write_line(&mut writer, &login).await {
        return CloseReason::TransportFailure(err.to_string());
    }

    let mut chunk = vec![0u8; READ_CHUNK];
    let reason = loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break CloseReason::Detached,
            line = outbound.recv() => match line {
                Some(line) => {
                    if let Err(err) = write_line(&mut writer, &line).await {
                        break CloseReason::TransportFailure(err.to_string());
                    }
                }
                None => break CloseReason::Detached,
            },
            read = reader.read(&mut chunk) => match read {
                Ok(0) => break CloseReason::RemoteClosed,
                Ok(n) => session.inbox().append(&chunk[..n]),
                Err(err) => break CloseReason::TransportFailure(err.to_string()),
            },
        }
    };

    if let Err(err) = writer.shutdown().await {
        debug!(%user, %err, "backend stream shutdown");
    }
    reason
}

async fn write_line(writer: &mut BackendWriter, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

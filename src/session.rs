use crate::dispatch::{SessionContext, dispatch_frame};
use crate::notify::NotificationService;
use crate::persist::{PersistJob, PersistenceGateway, spawn_writer};
use crate::protocol::frame::{Ack, AvlFrameCodec, Frame};
use crate::{Error, Result};
use futures::{SinkExt, StreamExt};
use std::io::ErrorKind;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// One device connection: owns the frame buffer and the device identity,
/// drives decode → dispatch → ACK for every inbound chunk. A session dies
/// with its socket; a reconnecting device starts a fresh handshake.
pub async fn handle_device<G, N>(
    ctx: SessionContext<G, N>,
    socket: TcpStream,
    addr: SocketAddr,
) -> Result<()>
where
    G: PersistenceGateway,
    N: NotificationService,
{
    let mut framed = Framed::new(socket, AvlFrameCodec::new());
    let (writer, writer_done) = spawn_writer(ctx.gateway.clone());

    let result = drive(&ctx, &mut framed, &writer, addr).await;

    // Let the write queue drain before the session goes away.
    drop(writer);
    let _ = writer_done.await;
    result
}

async fn drive<G, N>(
    ctx: &SessionContext<G, N>,
    framed: &mut Framed<TcpStream, AvlFrameCodec>,
    writer: &mpsc::Sender<PersistJob>,
    addr: SocketAddr,
) -> Result<()>
where
    G: PersistenceGateway,
    N: NotificationService,
{
    let mut imei: Option<String> = None;

    while let Some(next) = framed.next().await {
        match next {
            Ok(Frame::Handshake { imei: announced }) => {
                match &imei {
                    None => info!(%addr, imei = %announced, "device identified"),
                    Some(old) if *old != announced => {
                        warn!(%addr, old = %old, new = %announced, "device re-identified mid-stream")
                    }
                    Some(_) => debug!(%addr, "handshake repeated"),
                }
                imei = Some(announced);
                framed.send(Ack::Accept).await?;
            }
            Ok(Frame::Data(frame)) => {
                let Some(imei) = imei.as_deref() else {
                    // The codec only yields data frames after a handshake.
                    warn!(%addr, "data frame before handshake, dropped");
                    continue;
                };
                let ack = dispatch_frame(ctx, writer, imei, &frame).await;
                framed.send(ack).await?;
            }
            Err(Error::Io(err)) if is_disconnect(&err) => {
                debug!(%addr, "device hung up");
                return Ok(());
            }
            Err(err) => return Err(err),
        }
    }

    debug!(%addr, "connection closed");
    Ok(())
}

/// Resets and broken pipes are ordinary ends of a session, not faults.
pub fn is_disconnect(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ConnectionReset | ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof
    )
}

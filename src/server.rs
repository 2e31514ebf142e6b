use crate::dispatch::SessionContext;
use crate::notify::NotificationService;
use crate::persist::PersistenceGateway;
use crate::session::{handle_device, is_disconnect};
use crate::throttle::NotificationThrottle;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub speed_limit_kmh: u16,
    pub cooldown: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5027,
            speed_limit_kmh: crate::events::DEFAULT_SPEED_LIMIT_KMH,
            cooldown: crate::throttle::DEFAULT_COOLDOWN,
        }
    }
}

/// Bind and serve until the process stops.
pub async fn run<G, N>(config: ServerConfig, gateway: Arc<G>, notifier: Arc<N>) -> Result<()>
where
    G: PersistenceGateway,
    N: NotificationService,
{
    let address = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&address).await?;
    info!(%address, "AVL listener up");
    serve(listener, config, gateway, notifier).await
}

/// Accept loop over an already-bound listener (lets tests bind port 0).
/// A single connection's failure never takes the listener down.
pub async fn serve<G, N>(
    listener: TcpListener,
    config: ServerConfig,
    gateway: Arc<G>,
    notifier: Arc<N>,
) -> Result<()>
where
    G: PersistenceGateway,
    N: NotificationService,
{
    let throttle = Arc::new(NotificationThrottle::new(config.cooldown));

    loop {
        let (socket, addr) = listener.accept().await?;
        debug!(%addr, "device connected");
        let ctx = SessionContext {
            gateway: gateway.clone(),
            notifier: notifier.clone(),
            throttle: throttle.clone(),
            speed_limit_kmh: config.speed_limit_kmh,
        };
        tokio::spawn(async move {
            match handle_device(ctx, socket, addr).await {
                Ok(()) => {}
                Err(Error::Io(err)) if is_disconnect(&err) => {
                    debug!(%addr, "session closed by peer");
                }
                Err(err) => error!(%addr, %err, "session ended with error"),
            }
        });
    }
}

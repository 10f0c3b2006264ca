mod telemetry;

use anyhow::{Context, Result};
use clap::Parser;
use splashconf::SplashConfig;
use splashcore::RootObject;
use splashnet::{ChannelConfig, Link, LocalHub, SocketServer, SyncState, WebsocketServer};
use splashproto::IdAllocator;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A Splash world: owns the replicated tree, links to its peers and serves
/// remote clients over TCP and WebSockets.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file read in place of ./splash.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Name of this process's root object
    #[arg(short, long)]
    name: Option<String>,

    /// Port of the TCP tree server
    #[arg(long)]
    socket_port: Option<u16>,

    /// Port of the WebSocket tree server
    #[arg(long)]
    websocket_port: Option<u16>,

    /// Root to link to at startup (repeatable)
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Run the peers in this process over in-process channels instead of ZMQ
    #[arg(long)]
    local: bool,
}

impl Cli {
    /// Command line values win over every config source.
    fn apply(&self, config: &mut SplashConfig) {
        if let Some(name) = &self.name {
            config.bootstrap.root_name = name.clone();
        }
        if let Some(port) = self.socket_port {
            config.infra.bind.socket_port = port;
        }
        if let Some(port) = self.websocket_port {
            config.infra.bind.websocket_port = port;
        }
        if !self.peers.is_empty() {
            config.bootstrap.peers = self.peers.clone();
        }
    }
}

/// Roots living in this process when running with `--local`.
struct LocalPeers {
    _hub: LocalHub,
    roots: Vec<Arc<RootObject>>,
    _links: Vec<Link>,
}

impl LocalPeers {
    fn update(&self) {
        for root in &self.roots {
            root.update();
        }
    }
}

struct World {
    root: Arc<RootObject>,
    link: Link,
    sync: Arc<SyncState>,
    socket_server: SocketServer,
    websocket_server: WebsocketServer,
    local_peers: Option<LocalPeers>,
    buffer_wait: Duration,
}

impl World {
    async fn start(config: &SplashConfig, local: bool) -> Result<Self> {
        let name = config.bootstrap.root_name.as_str();
        let root = Arc::new(RootObject::new(name, IdAllocator::new()));
        root.set_propagate(true);
        root.tree().set_notify_on_unchanged(config.infra.sync.notify_on_unchanged);

        let (link, local_peers) = if local {
            let hub = LocalHub::new();
            let link = Link::local(root.clone(), name, &hub).context("Failed to register the world link")?;
            let mut roots = Vec::new();
            let mut links = Vec::new();
            for peer in &config.bootstrap.peers {
                let peer_root = Arc::new(RootObject::new(peer.as_str(), IdAllocator::new()));
                let peer_link = Link::local(peer_root.clone(), peer, &hub)
                    .with_context(|| format!("Failed to start local peer {}", peer))?;
                links.push(peer_link);
                roots.push(peer_root);
            }
            let peers = LocalPeers {
                _hub: hub,
                roots,
                _links: links,
            };
            (link, Some(peers))
        } else {
            let channels = ChannelConfig::from_config(config);
            let link = Link::zmq(root.clone(), name, &channels).context("Failed to bind the world link")?;
            (link, None)
        };

        for peer in &config.bootstrap.peers {
            match link.connect_to(peer).await {
                Ok(()) => info!("Linked to {}", peer),
                Err(e) => warn!("Could not link to {}: {}", peer, e),
            }
        }

        let host: IpAddr = config
            .infra
            .bind
            .host
            .parse()
            .with_context(|| format!("Invalid bind host {}", config.infra.bind.host))?;
        // `tick` drains the update list for the link and the servers alike.
        let sync = Arc::new(SyncState::broadcast_only(root.tree_handle()));
        let socket_server = SocketServer::bind(SocketAddr::new(host, config.infra.bind.socket_port), sync.clone())
            .await
            .context("Failed to start the TCP tree server")?;
        let websocket_server =
            WebsocketServer::bind(SocketAddr::new(host, config.infra.bind.websocket_port), sync.clone())
                .await
                .context("Failed to start the WebSocket tree server")?;

        Ok(Self {
            root,
            link,
            sync,
            socket_server,
            websocket_server,
            local_peers,
            buffer_wait: Duration::from_millis(config.infra.sync.buffer_wait_ms),
        })
    }

    /// One main-loop step: apply what arrived, then send what changed.
    async fn tick(&self) {
        let report = self.root.update();
        if report.applied + report.dropped > 0 {
            debug!("Tree update: {:?}", report);
        }
        self.root.update_tree_from_objects();

        let seeds = self.root.tree().get_update_seed_list();
        if !seeds.is_empty() {
            self.link.send_tree_seeds(&seeds);
            self.sync.broadcast(&seeds);
        }
        if !self.link.wait_for_buffer_sending(self.buffer_wait).await {
            debug!("Buffers still in flight after {:?}", self.buffer_wait);
        }

        if let Some(peers) = &self.local_peers {
            peers.update();
        }
    }

    async fn shutdown(self) {
        for peer in self.link.peers() {
            if let Err(e) = self.link.disconnect_from(&peer).await {
                warn!("Could not unlink {}: {}", peer, e);
            }
        }
        self.socket_server.stop().await;
        self.websocket_server.stop().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) =
        SplashConfig::load_with_sources_from(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply(&mut config);

    telemetry::init(&config.infra.telemetry.log_level)?;
    for file in &sources.files {
        info!("Loaded config from {}", file.display());
    }

    let world = World::start(&config, cli.local).await?;
    info!(
        "World {} running: tcp {}, websocket {}",
        config.bootstrap.root_name,
        world.socket_server.local_addr(),
        world.websocket_server.local_addr()
    );

    let mut interval = tokio::time::interval(Duration::from_millis(config.infra.sync.update_interval_ms.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = interval.tick() => world.tick().await,
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Could not listen for ctrl-c: {}", e);
                }
                break;
            }
        }
    }

    info!("Shutting down");
    world.shutdown().await;
    Ok(())
}

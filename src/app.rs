//! Application struct that encapsulates server assembly and serving logic.

use crate::cli::RunArgs;
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use workbench_core::config::{Config, ConfigWatcher};
use workbench_core::file_store::LocalFileStore;
use workbench_core::lifecycle::signal::SignalHandler;
use workbench_core::lifecycle::{self, Lifecycle};
use workbench_core::metrics::Metrics;
use workbench_core::repo::Repository;
use workbench_executor::{FlowRunner, RequestExecutor};
use workbench_server::AppState;
use workbench_store::SqliteStore;

pub struct Application {
    config: Arc<ArcSwap<Config>>,
    config_path: String,
    app_router: axum::Router,
    lifecycle: Box<dyn Lifecycle>,
    shutdown_timeout: u64,
    #[cfg(unix)]
    _pid_file: Option<workbench_core::lifecycle::pid_file::PidFile>,
}

impl Application {
    /// Build the application from CLI args: load config, open the store,
    /// assemble the executor/flow runner/router, and acquire the PID file.
    pub async fn build(args: &RunArgs) -> anyhow::Result<Self> {
        let mut config = Config::load(&args.config).unwrap_or_else(|e| {
            tracing::warn!(
                "Failed to load config from '{}': {e}, using defaults",
                args.config
            );
            Config::default()
        });

        // CLI overrides
        if let Some(ref host) = args.host {
            config.host = host.clone();
        }
        if let Some(port) = args.port {
            config.port = port;
        }
        if let Some(ref pid_file) = args.pid_file {
            config.daemon.pid_file = pid_file.clone();
        }
        if let Some(timeout) = args.shutdown_timeout {
            config.daemon.shutdown_timeout = timeout;
        }

        let shutdown_timeout = config.daemon.shutdown_timeout;

        #[cfg(unix)]
        let _pid_file = if args.daemon {
            Some(workbench_core::lifecycle::pid_file::PidFile::acquire(
                &config.daemon.pid_file,
            )?)
        } else {
            None
        };

        let store = SqliteStore::connect(&config.db_path).await?;
        let repo: Arc<dyn Repository> = Arc::new(store);
        let file_store = Arc::new(LocalFileStore::new(config.file_store_dir.clone()).await?);

        let executor = Arc::new(RequestExecutor::new(
            repo.clone(),
            file_store.clone(),
            config.connect_timeout,
            config.request_timeout,
        ));
        let flow_runner = Arc::new(FlowRunner::new(repo.clone(), executor.clone(), config.limits.clone()));
        let metrics = Arc::new(Metrics::new());

        tracing::info!(
            db_path = %config.db_path,
            file_store_dir = %config.file_store_dir,
            "Storage initialized"
        );

        let config = Arc::new(ArcSwap::from_pointee(config));

        let state = AppState {
            config: config.clone(),
            repo,
            file_store,
            executor,
            flow_runner,
            metrics,
            start_time: Instant::now(),
        };
        let app_router = workbench_server::build_router(state);

        let lc = lifecycle::detect_lifecycle();

        Ok(Self {
            config,
            config_path: args.config.clone(),
            app_router,
            lifecycle: lc,
            shutdown_timeout,
            #[cfg(unix)]
            _pid_file,
        })
    }

    /// Start serving HTTP/HTTPS, handle signals, and drain gracefully.
    pub async fn serve(self) -> anyhow::Result<()> {
        let Self {
            config,
            config_path,
            app_router,
            lifecycle,
            shutdown_timeout,
            #[cfg(unix)]
            _pid_file,
        } = self;

        // Start config file watcher. The workbench surface has no live-updatable
        // fields besides what's read fresh from `config` on each request, so the
        // reload callback only logs; the atomic swap itself is what matters.
        let _watcher = ConfigWatcher::start(config_path.clone(), config.clone(), move |new_cfg| {
            tracing::info!(host = %new_cfg.host, port = new_cfg.port, "Config reloaded");
        });

        let (signal_handler, shutdown_rx) = SignalHandler::new();

        let reload_config = config.clone();
        let reload_path = config_path.clone();
        let reload_lifecycle: Arc<dyn Lifecycle> = Arc::from(lifecycle::detect_lifecycle());
        let reload_fn = move || {
            reload_lifecycle.on_reloading();
            match Config::load(&reload_path) {
                Ok(new_cfg) => {
                    tracing::info!(host = %new_cfg.host, port = new_cfg.port, "SIGHUP reload");
                    reload_config.store(Arc::new(new_cfg));
                    reload_lifecycle.on_reloaded();
                }
                Err(e) => {
                    tracing::error!("SIGHUP config reload failed: {e}");
                }
            }
        };

        tokio::spawn(signal_handler.run(reload_fn));

        let cfg = config.load();
        let addr = format!("{}:{}", cfg.host, cfg.port);

        if cfg.tls.enable {
            serve_tls(&addr, &cfg, app_router, shutdown_rx, &*lifecycle, shutdown_timeout).await?;
        } else {
            serve_http(&addr, app_router, shutdown_rx, &*lifecycle, shutdown_timeout).await?;
        }

        tracing::info!("Server shut down.");
        Ok(())
    }
}

async fn serve_http(
    addr: &str,
    app_router: axum::Router,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    lifecycle: &dyn Lifecycle,
    shutdown_timeout: u64,
) -> anyhow::Result<()> {
    tracing::info!("Starting HTTP server on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    lifecycle.on_ready();

    let shutdown = async move {
        let _ = shutdown_rx.wait_for(|v| *v).await;
    };

    axum::serve(listener, app_router)
        .with_graceful_shutdown(shutdown)
        .await?;

    lifecycle.on_stopping();
    tokio::time::sleep(Duration::from_secs(shutdown_timeout.min(1))).await;
    Ok(())
}

async fn serve_tls(
    addr: &str,
    cfg: &Config,
    app_router: axum::Router,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    lifecycle: &dyn Lifecycle,
    shutdown_timeout: u64,
) -> anyhow::Result<()> {
    let cert_path = cfg.tls.cert.as_ref().expect("TLS cert required");
    let key_path = cfg.tls.key.as_ref().expect("TLS key required");

    use rustls_pki_types::pem::PemObject;
    use rustls_pki_types::{CertificateDer, PrivateKeyDer};

    let certs: Vec<CertificateDer<'static>> =
        CertificateDer::pem_file_iter(cert_path)?.collect::<Result<Vec<_>, _>>()?;
    let key = PrivateKeyDer::from_pem_file(key_path)?;

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    let tls_acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(tls_config));

    tracing::info!("Starting HTTPS server on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    lifecycle.on_ready();

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = result?;
                let acceptor = tls_acceptor.clone();
                let router = app_router.clone();
                tokio::spawn(async move {
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            let io = hyper_util::rt::TokioIo::new(tls_stream);
                            let service = hyper::service::service_fn(
                                move |req: hyper::Request<hyper::body::Incoming>| {
                                    let router = router.clone();
                                    async move {
                                        let (parts, body) = req.into_parts();
                                        let body = axum::body::Body::new(body);
                                        let req = axum::http::Request::from_parts(parts, body);
                                        Ok::<_, std::convert::Infallible>(
                                            tower::ServiceExt::oneshot(router, req)
                                                .await
                                                .expect("infallible"),
                                        )
                                    }
                                },
                            );
                            if let Err(e) = hyper_util::server::conn::auto::Builder::new(
                                hyper_util::rt::TokioExecutor::new(),
                            )
                            .serve_connection(io, service)
                            .await
                            {
                                tracing::error!("TLS connection error from {peer_addr}: {e}");
                            }
                        }
                        Err(e) => tracing::error!("TLS accept error from {peer_addr}: {e}"),
                    }
                });
            }
            _ = shutdown_rx.wait_for(|v| *v) => {
                tracing::info!("Stopping TLS listener, waiting for connections to drain...");
                break;
            }
        }
    }

    lifecycle.on_stopping();
    tokio::time::sleep(Duration::from_secs(shutdown_timeout.min(5))).await;
    Ok(())
}

use std::sync::Arc;

use actix_web::{dev::Server, middleware::Logger, web, App, HttpServer};
use bitvoice_engine::{
    events::FeedEvent,
    kv::RedbKv,
    start_sweep_worker,
    Clock,
    HttpWebhookSender,
    InvoiceApi,
    InvoiceStore,
    NotificationDispatcher,
    PaymentWatcher,
    StateMachine,
    SystemClock,
};
use log::*;
use tokio::sync::mpsc;

use crate::{
    config::ServerConfig,
    errors::ServerError,
    routes::{self, Api},
    wallet::RestWalletBackend,
};

/// Open the store, start the background workers and serve the REST API until shutdown.
pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let kv = RedbKv::open(&config.database_path).map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let store = InvoiceStore::new(kv);
    store.open().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let machine = StateMachine::new(config.policy.clone());

    let sender =
        HttpWebhookSender::new(config.webhook_timeout).map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let dispatcher = NotificationDispatcher::new(store.clone(), sender, Arc::clone(&clock), config.dispatcher.clone());
    let wake = dispatcher.waker();
    tokio::spawn(dispatcher.run());

    let (watcher, feed) = PaymentWatcher::new(store.clone(), machine.clone(), Arc::clone(&clock), Arc::clone(&wake));
    tokio::spawn(watcher.run());
    start_sweep_worker(store.clone(), machine, Arc::clone(&clock), wake, config.sweep_interval);

    let wallet =
        RestWalletBackend::new(&config.wallet_url).map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let api = InvoiceApi::new(store, wallet, config.policy.clone(), clock);

    let srv = create_server_instance(&config, api, feed)?;
    srv.await?;
    Ok(())
}

pub fn create_server_instance(
    config: &ServerConfig,
    api: Api,
    feed: mpsc::Sender<FeedEvent>,
) -> Result<Server, ServerError> {
    let bind_address = format!("{}:{}", config.host, config.port);
    info!("💻️ Invoice gateway listening on {bind_address}");
    let srv = HttpServer::new(move || {
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("bvg::access_log"))
            .app_data(web::Data::new(api.clone()))
            .app_data(web::Data::new(feed.clone()))
            .service(routes::health)
            .service(routes::create_invoice)
            .service(routes::invoice_status)
            .service(routes::list_invoices)
            .service(routes::wallet_tx)
            .service(routes::wallet_reorg)
    })
    .bind(bind_address.clone())
    .map_err(|e| ServerError::InitializeError(format!("Could not bind {bind_address}: {e}")))?
    .run();
    Ok(srv)
}

//! Request handler definitions.
//!
//! Handlers stay thin: deserialize, call into the engine, map errors through [`ServerError`]. Anything longer
//! belongs in the engine, not here.

use actix_web::{get, post, web, HttpResponse, Responder};
use bitvoice_engine::{
    db_types::{InvoiceId, NewInvoice},
    events::FeedEvent,
    invoice_objects::InvoiceResult,
    kv::RedbKv,
    InvoiceApi,
};
use log::*;
use tokio::sync::mpsc;

use crate::{
    data_objects::{
        CreateInvoiceRequest,
        InvoiceListResult,
        JsonResponse,
        ListQuery,
        ReorgNotification,
        TokenQuery,
        TxObservedNotification,
    },
    errors::ServerError,
    wallet::RestWalletBackend,
};

/// The concrete invoice API the server wires up.
pub type Api = InvoiceApi<RedbKv, RestWalletBackend>;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 100;

#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

#[post("/invoices")]
pub async fn create_invoice(
    req: web::Json<CreateInvoiceRequest>,
    api: web::Data<Api>,
) -> Result<HttpResponse, ServerError> {
    let new_invoice = NewInvoice::try_from(req.into_inner())?;
    let invoice = api.create_invoice(new_invoice).await?;
    Ok(HttpResponse::Ok().json(InvoiceResult::from(&invoice)))
}

#[get("/invoices/{id}")]
pub async fn invoice_status(
    path: web::Path<String>,
    query: web::Query<TokenQuery>,
    api: web::Data<Api>,
) -> Result<HttpResponse, ServerError> {
    let id = InvoiceId(path.into_inner());
    let invoice = api.invoice_with_token(&id, &query.token).await?;
    Ok(HttpResponse::Ok().json(InvoiceResult::from(&invoice)))
}

#[get("/invoices")]
pub async fn list_invoices(query: web::Query<ListQuery>, api: web::Data<Api>) -> Result<HttpResponse, ServerError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let (invoices, next_cursor) = api.list_invoices(query.cursor, limit).await?;
    let result =
        InvoiceListResult { invoices: invoices.iter().map(InvoiceResult::from).collect(), next_cursor };
    Ok(HttpResponse::Ok().json(result))
}

#[post("/wallet/tx")]
pub async fn wallet_tx(
    body: web::Json<TxObservedNotification>,
    feed: web::Data<mpsc::Sender<FeedEvent>>,
) -> Result<HttpResponse, ServerError> {
    let event = FeedEvent::from(body.into_inner());
    debug!("💻️ Wallet observation for invoice {}", event.invoice_id());
    feed.send(event).await.map_err(|e| ServerError::FeedUnavailable(e.to_string()))?;
    Ok(HttpResponse::Ok().json(JsonResponse::success("Event queued")))
}

#[post("/wallet/reorg")]
pub async fn wallet_reorg(
    body: web::Json<ReorgNotification>,
    feed: web::Data<mpsc::Sender<FeedEvent>>,
) -> Result<HttpResponse, ServerError> {
    let event = FeedEvent::from(body.into_inner());
    warn!("💻️ Wallet reported a reorg affecting invoice {}", event.invoice_id());
    feed.send(event).await.map_err(|e| ServerError::FeedUnavailable(e.to_string()))?;
    Ok(HttpResponse::Ok().json(JsonResponse::success("Event queued")))
}

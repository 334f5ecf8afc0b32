use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use payment_recon_engine::{ConfirmationApi, SqliteDatabase, WebhookFlowApi};

use crate::{
    config::ServerConfig,
    errors::ServerError,
    integrations::{CheckoutApi, ProcessorApi},
    routes::{additional_action, health, webhook},
    validator::WebhookValidator,
};

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let srv = create_server_instance(config, db)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

pub fn create_server_instance(config: ServerConfig, db: SqliteDatabase) -> Result<Server, ServerError> {
    let checkout = CheckoutApi::new(config.checkout.clone())?;
    let processor = ProcessorApi::new(config.processor.clone(), &config.gateway.merchant_account)?;
    let host = config.host.clone();
    let port = config.port;
    let srv = HttpServer::new(move || {
        let validator = WebhookValidator::new(&config.gateway);
        let gateway_id = config.gateway.gateway_id.clone();
        let flow = WebhookFlowApi::new(
            db.clone(),
            checkout.clone(),
            processor.clone(),
            gateway_id.clone(),
            config.gateway.auto_capture,
        );
        let confirmation = ConfirmationApi::new(db.clone(), checkout.clone(), processor.clone(), gateway_id);
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("prg::access_log"))
            .app_data(web::Data::new(validator))
            .app_data(web::Data::new(flow))
            .app_data(web::Data::new(confirmation))
            .service(health)
            .service(
                web::resource("/webhooks")
                    .route(web::post().to(webhook::<SqliteDatabase, CheckoutApi, ProcessorApi>)),
            )
            .service(
                web::resource("/additional-actions")
                    .route(web::get().to(additional_action::<SqliteDatabase, CheckoutApi, ProcessorApi>))
                    .route(web::post().to(additional_action::<SqliteDatabase, CheckoutApi, ProcessorApi>)),
            )
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((host.as_str(), port))?
    .run();
    Ok(srv)
}

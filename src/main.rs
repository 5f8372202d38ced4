use actix_cors::Cors;
use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::http::{header, StatusCode};
use actix_web::{get, post, web, App, HttpRequest, HttpResponse, HttpServer};
use clap::Parser;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod allocation;
mod config;
mod credential;
mod error;
mod extraction;
mod ledger;
mod posting;
mod roster;
mod schemas;

use crate::config::Config;
use crate::credential::ledger_credential;
use crate::error::{ExtractionError, PostingError};
use crate::ledger::SplitwiseClient;
use crate::posting::{AllocationOutcome, PostingMode};
use crate::schemas::{
    format_money, AddedShare, FailedShareJson, FriendsSplitResponse, GroupSplitResponse,
    SplitRequestJson,
};

struct AppState {
    config: Config,
    http: reqwest::Client,
}

impl AppState {
    fn ledger_for(&self, request: &HttpRequest) -> Option<SplitwiseClient> {
        let token = ledger_credential(request, self.config.splitwise_api_key.as_deref())?;
        Some(SplitwiseClient::new(
            self.http.clone(),
            &self.config.splitwise_base_url,
            token,
        ))
    }
}

#[derive(Serialize)]
struct ErrorJson {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(ErrorJson {
        error: message.into(),
    })
}

fn posting_error_response(err: PostingError) -> HttpResponse {
    error!(error = %err, "split failed");
    error_response(err.status_code(), err.to_string())
}

fn missing_credential() -> HttpResponse {
    error_response(StatusCode::UNAUTHORIZED, "Missing ledger credential")
}

fn today() -> chrono::NaiveDate {
    chrono::Utc::now().date_naive()
}

#[get("/health")]
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

#[post("/bills/extract")]
async fn extract_bill(
    state: web::Data<AppState>,
    request: HttpRequest,
    image: web::Bytes,
) -> HttpResponse {
    if image.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "No file uploaded");
    }
    let Some(vision) = state.config.vision_client(state.http.clone()) else {
        let err = ExtractionError::NotConfigured;
        return error_response(err.status_code(), err.to_string());
    };
    let media_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .filter(|value| value.starts_with("image/"))
        .unwrap_or("image/jpeg");

    match vision.extract(&image, media_type).await {
        Ok(bill) => HttpResponse::Ok().json(json!({ "success": true, "billData": bill })),
        Err(err) => {
            error!(error = %err, "bill extraction failed");
            error_response(err.status_code(), err.to_string())
        }
    }
}

#[post("/expenses/group")]
async fn split_with_group(
    state: web::Data<AppState>,
    request: HttpRequest,
    json: web::Json<SplitRequestJson>,
) -> HttpResponse {
    let split = json.into_inner();
    let Some(ledger) = state.ledger_for(&request) else {
        return missing_credential();
    };
    let Some(target) = state.config.group_target(split.group_id) else {
        return posting_error_response(PostingError::MissingGroup);
    };
    let mode = PostingMode::Group(target);

    match posting::post(
        &ledger,
        &mode,
        state.config.share_sum_check,
        &split.bill_total(),
        &split.expenses,
        today(),
    )
    .await
    {
        Ok(outcome) => {
            let message = outcome.summary(mode.roster_label());
            let expense_details = outcome
                .created
                .first()
                .map(|expense| expense.details.clone())
                .unwrap_or(Value::Null);
            HttpResponse::Ok().json(GroupSplitResponse {
                success: true,
                message,
                not_found: outcome.unresolved,
                expense_details,
            })
        }
        Err(err) => posting_error_response(err),
    }
}

#[post("/expenses/friends")]
async fn split_with_friends(
    state: web::Data<AppState>,
    request: HttpRequest,
    json: web::Json<SplitRequestJson>,
) -> HttpResponse {
    let split = json.into_inner();
    let Some(ledger) = state.ledger_for(&request) else {
        return missing_credential();
    };
    let mode = PostingMode::Friends;

    match posting::post(
        &ledger,
        &mode,
        state.config.share_sum_check,
        &split.bill_total(),
        &split.expenses,
        today(),
    )
    .await
    {
        Ok(outcome) => HttpResponse::Ok().json(friends_response(&mode, outcome)),
        Err(err) => posting_error_response(err),
    }
}

fn friends_response(mode: &PostingMode, outcome: AllocationOutcome) -> FriendsSplitResponse {
    let message = outcome.summary(mode.roster_label());
    FriendsSplitResponse {
        success: true,
        message,
        not_found: outcome.unresolved,
        added: outcome
            .posted
            .into_iter()
            .map(|posted| AddedShare {
                name: posted.name,
                amount: format_money(posted.amount),
                expense_id: posted.expense.id,
            })
            .collect(),
        errors: outcome
            .errors
            .into_iter()
            .map(|failed| FailedShareJson {
                name: failed.name,
                message: failed.message,
            })
            .collect(),
    }
}

fn cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allowed_headers(vec![header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(3600)
}

/// Malformed split bodies get the same `{error}` shape as every other failure.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err: JsonPayloadError, _request| {
        let response = error_response(StatusCode::BAD_REQUEST, err.to_string());
        InternalError::from_response(err, response).into()
    })
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .service(health)
        .service(extract_bill)
        .service(split_with_group)
        .service(split_with_friends);
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = Config::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_level.clone().into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let http = config.http_client().map_err(std::io::Error::other)?;
    let listen = config.listen.clone();
    let max_image_bytes = config.max_image_bytes;
    info!(listen = %listen, group_id = ?config.group_id, "starting bill splitter");

    let state = web::Data::new(AppState { config, http });
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(web::PayloadConfig::new(max_image_bytes))
            .wrap(cors())
            .configure(routes)
    })
    .bind(listen)?
    .run()
    .await
}

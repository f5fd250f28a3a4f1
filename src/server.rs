use crate::io_struct::ChatFailureBody;
use crate::relay_state::{RelayConfig, RelayError, RelayState};
use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, HttpServer, get, options, post, web};
use serde::Serialize;
use std::io::Write;

/// Fixed header set attached to every envelope, success or failure.
pub const ENVELOPE_HEADERS: [(&str, &str); 4] = [
    ("Content-Type", "application/json"),
    ("Access-Control-Allow-Origin", "*"),
    (
        "Access-Control-Allow-Headers",
        "Content-Type,X-Amz-Date,Authorization,X-Api-Key,X-Amz-Security-Token",
    ),
    ("Access-Control-Allow-Methods", "OPTIONS,POST"),
];

fn envelope<T: Serialize>(status: StatusCode, body: &T) -> HttpResponse {
    let mut builder = HttpResponse::build(status);
    for (name, value) in ENVELOPE_HEADERS {
        builder.insert_header((name, value));
    }
    match serde_json::to_string(body) {
        Ok(json) => builder.body(json),
        Err(_) => builder.body(r#"{"success":false,"error":"failed to encode response body"}"#),
    }
}

fn failure_envelope(err: &RelayError) -> HttpResponse {
    envelope(
        StatusCode::INTERNAL_SERVER_ERROR,
        &ChatFailureBody {
            success: false,
            error: err.to_string(),
            error_code: err.error_code().map(str::to_string),
        },
    )
}

#[get("/health")]
pub async fn health(_req: HttpRequest, _: web::Data<RelayState>) -> HttpResponse {
    HttpResponse::Ok().body("Ok")
}

#[post("/chat")]
pub async fn chat(
    _req: HttpRequest,
    body: web::Bytes,
    app_state: web::Data<RelayState>,
) -> HttpResponse {
    match app_state.handle_chat(&body).await {
        Ok(success) => envelope(StatusCode::OK, &success),
        Err(e) => {
            log::error!("Chat request failed: {}", e);
            failure_envelope(&e)
        }
    }
}

#[options("/chat")]
pub async fn chat_preflight(_req: HttpRequest) -> HttpResponse {
    let mut builder = HttpResponse::Ok();
    for (name, value) in ENVELOPE_HEADERS {
        builder.insert_header((name, value));
    }
    builder.finish()
}

pub async fn startup(config: RelayConfig, state: RelayState) -> std::io::Result<()> {
    let app_state = web::Data::new(state);

    println!("Starting server at {}:{}", config.host, config.port);

    // default level is info
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info)
        .init();

    HttpServer::new(move || {
        actix_web::App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(app_state.clone())
            .service(health)
            .service(chat)
            .service(chat_preflight)
    })
    .bind((config.host, config.port))?
    .run()
    .await?;

    std::io::Result::Ok(())
}

use actix::dev::ToEnvelope;
use actix::{Addr, Handler, Message, SyncContext};
use actix_web::dev::Server;
use actix_web::error::{InternalError, PayloadError, UrlencodedError};
use actix_web::http::header::ContentType;
use actix_web::{middleware, web, App, HttpRequest, HttpResponse, HttpServer, ResponseError};
use failure::Error;
use log::{debug, info};
use serde::Serialize;
use uuid::Uuid;

use crate::config::Config;
use crate::dashboard::{self, Renderer};
use crate::db::{self, DbExecutor};
use crate::import::{ImportPlan, ImportStep};
use crate::proto::http::{self, FormFields};
use crate::proto::Error as ServiceError;
use crate::proto::{NewEntryResponse, NewRuleResponse, TickEntryValue, TickRule};

type HttpResult = Result<HttpResponse, ServiceError>;

pub struct AppState {
    pub db: Addr<DbExecutor>,
    pub renderer: Renderer,
    pub identity_header: String,
    pub entry_limit: i64,
    pub max_form_bytes: usize,
    pub max_csv_bytes: usize,
}

impl AppState {
    pub fn new(config: &Config, db: Addr<DbExecutor>) -> Self {
        AppState {
            db,
            renderer: Renderer::new(config.dashboard.template.clone()),
            identity_header: config.auth.identity_header.clone(),
            entry_limit: config.dashboard.entry_limit,
            max_form_bytes: config.network.max_form_bytes,
            max_csv_bytes: config.network.max_csv_bytes,
        }
    }
}

fn json_response<D: Serialize>(data: &D) -> HttpResult {
    let body = serde_json::to_string(data).map_err(|e| ServiceError::Serialization {
        error: e.to_string(),
    })?;

    Ok(HttpResponse::Ok()
        .content_type(ContentType::json())
        .body(body))
}

async fn db_send<D, M>(state: &AppState, message: M) -> Result<D, ServiceError>
where
    M: Message<Result = Result<D, Error>> + Send + 'static,
    D: Send + 'static,
    DbExecutor: Handler<M>,
    SyncContext<DbExecutor>: ToEnvelope<DbExecutor, M>,
{
    let result = state
        .db
        .send(message)
        .await
        .map_err(|e| ServiceError::Storage {
            error: format!("storage executor unavailable: {}", e),
        })?;

    result.map_err(ServiceError::from)
}

trait ExtractIdentity {
    fn identity(&self, header: &str) -> Result<String, ServiceError>;
}

impl ExtractIdentity for HttpRequest {
    fn identity(&self, header: &str) -> Result<String, ServiceError> {
        // raw bytes, so internationalised addresses pass
        let identity = self
            .headers()
            .get(header)
            .and_then(|value| std::str::from_utf8(value.as_bytes()).ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(ServiceError::Unauthorized)?;

        Ok(identity.to_owned())
    }
}

async fn root(req: HttpRequest, state: web::Data<AppState>) -> HttpResult {
    let identity = req.identity(&state.identity_header)?;
    let message = db::GetDashboard {
        identity,
        entry_limit: state.entry_limit,
    };

    let dashboard = match db_send(&state, message).await {
        Ok(dashboard) => dashboard,
        Err(err @ ServiceError::SettingsNotFound { .. }) => {
            return Ok(HttpResponse::NotFound()
                .content_type(ContentType::html())
                .body(dashboard::create_user_prompt(&err)?));
        }
        Err(err) => return Err(err),
    };

    let html = state.renderer.render(&dashboard)?;
    Ok(HttpResponse::Ok().content_type(ContentType::html()).body(html))
}

async fn get_rules(req: HttpRequest, state: web::Data<AppState>) -> HttpResult {
    let identity = req.identity(&state.identity_header)?;
    let message = db::GetDashboard {
        identity,
        entry_limit: state.entry_limit,
    };

    json_response(&db_send(&state, message).await?)
}

async fn create_user(req: HttpRequest, state: web::Data<AppState>) -> HttpResult {
    let identity = req.identity(&state.identity_header)?;
    let settings = db_send(&state, db::CreateUser { identity }).await?;
    json_response(&settings)
}

async fn create_rule(
    req: HttpRequest,
    form: FormFields<http::CreateRule>,
    state: web::Data<AppState>,
) -> HttpResult {
    let identity = req.identity(&state.identity_header)?;
    let form = form.into_inner();

    let name = http::required(&form.name)
        .ok_or_else(|| ServiceError::invalid_field("name", "rule name is required"))?;
    let rule = TickRule::new(name, form.bucket.as_deref().unwrap_or_default());

    let (key, rule) = db_send(&state, db::CreateRule { identity, rule }).await?;
    json_response(&NewRuleResponse::new(key.to_string(), rule))
}

async fn tick(
    req: HttpRequest,
    form: FormFields<http::Tick>,
    state: web::Data<AppState>,
) -> HttpResult {
    let identity = req.identity(&state.identity_header)?;
    let form = form.into_inner();

    let key = http::required(&form.key)
        .ok_or_else(|| ServiceError::invalid_field("key", "key not set"))?;
    let rule_key = Uuid::parse_str(key)
        .map_err(|e| ServiceError::invalid_field("key", format!("malformed rule key: {}", e)))?;
    let value = http::required(&form.value)
        .ok_or_else(|| ServiceError::invalid_field("value", "value not set"))?
        .parse::<i64>()
        .map_err(|e| ServiceError::invalid_field("value", e.to_string()))?;

    let message = db::RecordTick {
        identity,
        rule_key,
        entry: TickEntryValue::now(value),
    };
    let (key, entry) = db_send(&state, message).await?;
    json_response(&NewEntryResponse::new(key.to_string(), entry))
}

async fn tick_csv(
    req: HttpRequest,
    body: Result<web::Bytes, actix_web::Error>,
    state: web::Data<AppState>,
) -> HttpResult {
    let identity = req.identity(&state.identity_header)?;
    let body = body.map_err(|e| match e.as_error::<PayloadError>() {
        Some(PayloadError::Overflow) => ServiceError::PayloadTooLarge {
            limit: state.max_csv_bytes,
        },
        _ => ServiceError::invalid_field("body", e.to_string()),
    })?;
    debug!("csv import of {} bytes for {}", body.len(), identity);

    let mut current_rule = None;
    for step in ImportPlan::new(&body[..]) {
        match step? {
            ImportStep::StartRule(name) => {
                let message = db::CreateRule {
                    identity: identity.clone(),
                    rule: TickRule::daily(name),
                };
                let (key, _) = db_send(&state, message).await?;
                current_rule = Some(key);
            }
            ImportStep::Flush(entries) => {
                // ImportPlan never flushes before the first rule
                let rule_key = current_rule.ok_or_else(|| ServiceError::Storage {
                    error: "entries flushed without a rule".into(),
                })?;
                let message = db::InsertTicks {
                    identity: identity.clone(),
                    rule_key,
                    entries,
                };
                db_send(&state, message).await?;
            }
        }
    }

    info!("csv import for {} done", identity);

    Ok(HttpResponse::Ok()
        .content_type(ContentType::plaintext())
        .body("All Done"))
}

fn wrong_method(req: &HttpRequest, expected: &str) -> ServiceError {
    ServiceError::WrongMethod {
        expected: expected.into(),
        method: req.method().to_string(),
    }
}

async fn must_get(req: HttpRequest) -> HttpResult {
    Err(wrong_method(&req, "GET"))
}

async fn must_post(req: HttpRequest) -> HttpResult {
    Err(wrong_method(&req, "POST"))
}

/// Registers the routes and extractor configuration on an app.
pub fn configure(state: web::Data<AppState>, cfg: &mut web::ServiceConfig) {
    let form_limit = state.max_form_bytes;
    let form_config = web::FormConfig::default()
        .limit(form_limit)
        .error_handler(move |err, _req| {
            let error = match &err {
                UrlencodedError::Overflow { limit, .. } => ServiceError::PayloadTooLarge { limit: *limit },
                UrlencodedError::Payload(PayloadError::Overflow) => {
                    ServiceError::PayloadTooLarge { limit: form_limit }
                }
                _ => ServiceError::invalid_field("form", err.to_string()),
            };
            InternalError::from_response(err, error.error_response()).into()
        });

    cfg.app_data(state.clone())
        .app_data(form_config)
        .app_data(web::PayloadConfig::new(state.max_csv_bytes))
        .service(
            web::resource("/")
                .route(web::get().to(root))
                .default_service(web::to(must_get)),
        )
        .service(
            web::resource("/rules")
                .route(web::get().to(get_rules))
                .default_service(web::to(must_get)),
        )
        .service(
            web::resource("/create_user")
                .route(web::post().to(create_user))
                .default_service(web::to(must_post)),
        )
        .service(
            web::resource(["/create_rule", "/create_rule/"])
                .route(web::post().to(create_rule))
                .default_service(web::to(must_post)),
        )
        .service(
            web::resource(["/tick", "/tick/"])
                .route(web::post().to(tick))
                .default_service(web::to(must_post)),
        )
        .service(
            web::resource("/tick_csv")
                .route(web::post().to(tick_csv))
                .default_service(web::to(must_post)),
        );
}

pub fn start(config: Config, db_addr: Addr<DbExecutor>) -> Result<Server, Error> {
    let state = web::Data::new(AppState::new(&config, db_addr));

    let server = HttpServer::new(move || {
        let state = state.clone();
        App::new()
            .wrap(middleware::Logger::default())
            .configure(move |cfg| configure(state, cfg))
    })
    .bind(&config.network.addr)?
    .run();

    info!("listening on {}", config.network.addr);

    Ok(server)
}

use crate::{
    cli::CLI,
    clock::SystemClock,
    controller::{AccessDenied, Controller, MemberDetail, PeriodListing},
    dashboard::{Actor, Dashboard},
    db::{self, Database},
    entity::{
        contribution::{self, PaymentStatus},
        expense, expense_category, member, notification,
    },
    expenses::{ExpenseEntry, ExpenseInput},
    ledger::LedgerEntry,
    notifications::NotificationInput,
    registry::MemberAttrs,
};
use anyhow::Context;
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_EMAIL_HEADER: &str = "x-actor-email";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
}

/// Opens the configured database and brings its schema up to date.
pub async fn open_database() -> anyhow::Result<Database> {
    let db = Database::new(&CLI.database, Arc::new(SystemClock))
        .await
        .with_context(|| format!("Failed to connect to database {:?}", CLI.database))?;
    db.apply_migrations()
        .await
        .context("Failed to apply database migrations")?;
    Ok(db)
}

pub async fn run() -> anyhow::Result<()> {
    info!("Starting dues ledger...");
    let db = open_database().await?;
    let app = app().with_state(AppState { db });

    let listener = tokio::net::TcpListener::bind(CLI.listen)
        .await
        .with_context(|| format!("Failed to bind {}", CLI.listen))?;
    info!(addr = %CLI.listen, "Ready for requests...");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(?err, "Failed to listen for ctrl-c");
    }
    info!("Shutting down...");
}

pub fn app() -> Router<AppState> {
    Router::new()
        .route("/health-check", get(health_check))
        .route("/dashboard", get(dashboard))
        .route("/payment-history", get(payment_history))
        // ----- Members
        .route("/members", get(list_members).post(create_member))
        .route(
            "/members/:id",
            get(show_member).put(update_member).delete(delete_member),
        )
        // ----- Contributions
        .route(
            "/contributions",
            get(list_contributions).post(record_payment),
        )
        .route(
            "/contributions/:id",
            get(show_contribution).put(correct_contribution),
        )
        // ----- Expenses
        .route("/expenses", get(list_expenses).post(add_expense))
        .route(
            "/expenses/:id",
            get(show_expense).put(update_expense).delete(delete_expense),
        )
        .route(
            "/expense-categories",
            get(list_categories).post(create_category),
        )
        // ----- Notifications
        .route(
            "/notifications",
            get(list_notifications).post(create_notification),
        )
        .route("/notifications/:id/sent", post(mark_notification_sent))
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Failed(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(err)
    }
}

fn classify(err: &anyhow::Error) -> (StatusCode, serde_json::Value) {
    if err.downcast_ref::<AccessDenied>().is_some() {
        return (StatusCode::FORBIDDEN, json!({ "error": format!("{err:#}") }));
    }
    match err.downcast_ref::<db::Error>() {
        Some(db::Error::NotFound { .. }) => {
            (StatusCode::NOT_FOUND, json!({ "error": format!("{err:#}") }))
        }
        Some(db::Error::Validation(fields)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "error": "Validation failed", "fields": fields }),
        ),
        Some(db::Error::Duplicate(_)) | Some(db::Error::InvalidState(_)) => {
            (StatusCode::CONFLICT, json!({ "error": format!("{err:#}") }))
        }
        _ => {
            error!("Request failed: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Internal server error" }),
            )
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "Missing or invalid actor headers" }),
            ),
            Self::Failed(err) => classify(&err),
        };
        (status, Json(body)).into_response()
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };

        let user_id = header(ACTOR_ID_HEADER).and_then(|v| v.parse::<i64>().ok());
        let email = header(ACTOR_EMAIL_HEADER);
        let role = header(ACTOR_ROLE_HEADER).and_then(|v| v.parse().ok());
        match (user_id, email, role) {
            (Some(user_id), Some(email), Some(role)) => Ok(Actor {
                user_id,
                email: email.to_owned(),
                role,
            }),
            _ => Err(ApiError::Unauthorized),
        }
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;
type Created<T> = Result<(StatusCode, Json<T>), ApiError>;

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    pub month: Option<u32>,
    pub year: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct RecordPaymentReq {
    pub contribution_id: i64,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct CorrectContributionReq {
    pub amount: Decimal,
    pub status: PaymentStatus,
}

#[derive(Debug, Deserialize)]
pub struct CategoryReq {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": state.db.now().to_rfc3339(),
    }))
}

async fn dashboard(State(state): State<AppState>, actor: Actor) -> ApiResult<Dashboard> {
    let ctl = Controller::new(&state.db, &actor);
    Ok(Json(ctl.dashboard().await?))
}

async fn payment_history(
    State(state): State<AppState>,
    actor: Actor,
) -> ApiResult<Vec<contribution::Model>> {
    let ctl = Controller::new(&state.db, &actor);
    Ok(Json(ctl.payment_history().await?))
}

async fn list_members(State(state): State<AppState>, actor: Actor) -> ApiResult<Vec<member::Model>> {
    let ctl = Controller::new(&state.db, &actor);
    Ok(Json(ctl.list_members().await?))
}

async fn create_member(
    State(state): State<AppState>,
    actor: Actor,
    Json(attrs): Json<MemberAttrs>,
) -> Created<member::Model> {
    let ctl = Controller::new(&state.db, &actor);
    Ok((StatusCode::CREATED, Json(ctl.create_member(attrs).await?)))
}

async fn show_member(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> ApiResult<MemberDetail> {
    let ctl = Controller::new(&state.db, &actor);
    Ok(Json(ctl.show_member(id).await?))
}

async fn update_member(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(attrs): Json<MemberAttrs>,
) -> ApiResult<member::Model> {
    let ctl = Controller::new(&state.db, &actor);
    Ok(Json(ctl.update_member(id, attrs).await?))
}

async fn delete_member(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let ctl = Controller::new(&state.db, &actor);
    ctl.delete_member(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_contributions(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<PeriodQuery>,
) -> ApiResult<PeriodListing> {
    let ctl = Controller::new(&state.db, &actor);
    Ok(Json(ctl.list_contributions(query.month, query.year).await?))
}

async fn record_payment(
    State(state): State<AppState>,
    actor: Actor,
    Json(req): Json<RecordPaymentReq>,
) -> ApiResult<contribution::Model> {
    let ctl = Controller::new(&state.db, &actor);
    Ok(Json(ctl.record_payment(req.contribution_id, req.amount).await?))
}

async fn show_contribution(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> ApiResult<LedgerEntry> {
    let ctl = Controller::new(&state.db, &actor);
    Ok(Json(ctl.show_contribution(id).await?))
}

async fn correct_contribution(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(req): Json<CorrectContributionReq>,
) -> ApiResult<contribution::Model> {
    let ctl = Controller::new(&state.db, &actor);
    Ok(Json(
        ctl.correct_contribution(id, req.amount, req.status).await?,
    ))
}

async fn list_expenses(
    State(state): State<AppState>,
    actor: Actor,
) -> ApiResult<Vec<ExpenseEntry>> {
    let ctl = Controller::new(&state.db, &actor);
    Ok(Json(ctl.list_expenses().await?))
}

async fn add_expense(
    State(state): State<AppState>,
    actor: Actor,
    Json(input): Json<ExpenseInput>,
) -> Created<expense::Model> {
    let ctl = Controller::new(&state.db, &actor);
    Ok((StatusCode::CREATED, Json(ctl.add_expense(input).await?)))
}

async fn show_expense(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> ApiResult<ExpenseEntry> {
    let ctl = Controller::new(&state.db, &actor);
    Ok(Json(ctl.show_expense(id).await?))
}

async fn update_expense(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(input): Json<ExpenseInput>,
) -> ApiResult<expense::Model> {
    let ctl = Controller::new(&state.db, &actor);
    Ok(Json(ctl.update_expense(id, input).await?))
}

async fn delete_expense(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let ctl = Controller::new(&state.db, &actor);
    ctl.delete_expense(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_categories(
    State(state): State<AppState>,
    actor: Actor,
) -> ApiResult<Vec<expense_category::Model>> {
    let ctl = Controller::new(&state.db, &actor);
    Ok(Json(ctl.list_categories().await?))
}

async fn create_category(
    State(state): State<AppState>,
    actor: Actor,
    Json(req): Json<CategoryReq>,
) -> Created<expense_category::Model> {
    let ctl = Controller::new(&state.db, &actor);
    let category = ctl.create_category(&req.name, &req.description).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

async fn list_notifications(
    State(state): State<AppState>,
    actor: Actor,
) -> ApiResult<Vec<notification::Model>> {
    let ctl = Controller::new(&state.db, &actor);
    Ok(Json(ctl.list_notifications().await?))
}

async fn create_notification(
    State(state): State<AppState>,
    actor: Actor,
    Json(input): Json<NotificationInput>,
) -> Created<notification::Model> {
    let ctl = Controller::new(&state.db, &actor);
    Ok((StatusCode::CREATED, Json(ctl.create_notification(input).await?)))
}

async fn mark_notification_sent(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> ApiResult<notification::Model> {
    let ctl = Controller::new(&state.db, &actor);
    Ok(Json(ctl.mark_notification_sent(id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{
            testing::{admin, fresh_db},
            FieldError,
        },
        entity::user::Role,
    };
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    async fn actor_from(headers: &[(&str, &str)]) -> Result<Actor, ApiError> {
        let mut builder = Request::builder();
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        Actor::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn actor_comes_from_headers() {
        let actor = actor_from(&[
            (ACTOR_ID_HEADER, "7"),
            (ACTOR_EMAIL_HEADER, "member@example.com"),
            (ACTOR_ROLE_HEADER, "member"),
        ])
        .await
        .unwrap();
        assert_eq!(
            actor,
            Actor {
                user_id: 7,
                email: "member@example.com".to_owned(),
                role: Role::Member,
            }
        );
    }

    #[tokio::test]
    async fn incomplete_headers_are_unauthorized() {
        let missing_role = actor_from(&[
            (ACTOR_ID_HEADER, "7"),
            (ACTOR_EMAIL_HEADER, "member@example.com"),
        ])
        .await;
        assert!(matches!(missing_role, Err(ApiError::Unauthorized)));

        let bad_id = actor_from(&[
            (ACTOR_ID_HEADER, "seven"),
            (ACTOR_EMAIL_HEADER, "member@example.com"),
            (ACTOR_ROLE_HEADER, "admin"),
        ])
        .await;
        assert!(matches!(bad_id, Err(ApiError::Unauthorized)));
    }

    #[test]
    fn errors_map_to_statuses() {
        let status = |err: anyhow::Error| classify(&err).0;

        assert_eq!(
            status(anyhow::Error::new(AccessDenied {
                required: Role::Admin
            })),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status(anyhow::Error::new(db::Error::NotFound {
                entity: "member",
                id: 1
            })
            .context("Retrieving member failed")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(anyhow::Error::new(db::Error::InvalidState("x".into()))),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(anyhow::Error::new(db::Error::Duplicate("x".into()))),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(anyhow::anyhow!("boom")),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let (status, body) = classify(&anyhow::Error::new(db::Error::Validation(vec![
            FieldError::new("amount", "Amount must be at least 0."),
        ])));
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["fields"][0]["field"], "amount");
    }

    async fn api_call(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
        actor: Option<&Actor>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(actor) = actor {
            let role = match actor.role {
                Role::Admin => "admin",
                Role::Member => "member",
            };
            builder = builder
                .header(ACTOR_ID_HEADER, actor.user_id.to_string())
                .header(ACTOR_EMAIL_HEADER, actor.email.as_str())
                .header(ACTOR_ROLE_HEADER, role);
        }
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        let body = match body {
            Some(v) => Body::from(serde_json::to_string(&v).unwrap()),
            None => Body::empty(),
        };
        let resp = router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::json!(null)
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::json!(null))
        };
        (status, json)
    }

    async fn router_with_admin() -> (Router, Actor) {
        let db = fresh_db().await;
        let user = admin(&db).await;
        let actor = Actor {
            user_id: user.id,
            email: user.email,
            role: user.role,
        };
        (app().with_state(AppState { db }), actor)
    }

    #[tokio::test]
    async fn requests_without_actor_are_unauthorized() {
        let (router, _) = router_with_admin().await;

        let (status, body) = api_call(&router, "GET", "/dashboard", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Missing or invalid actor headers");

        let (status, body) = api_call(&router, "GET", "/health-check", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn members_are_forbidden_from_admin_routes() {
        let (router, _) = router_with_admin().await;
        let member = Actor {
            user_id: 99,
            email: "john@example.com".to_owned(),
            role: Role::Member,
        };

        let (status, _) = api_call(&router, "GET", "/members", None, Some(&member)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = api_call(&router, "GET", "/dashboard", None, Some(&member)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["view"], "missing_profile");
    }

    #[tokio::test]
    async fn admin_pays_dues_over_http() {
        let (router, admin) = router_with_admin().await;

        let (status, created) = api_call(
            &router,
            "POST",
            "/members",
            Some(json!({
                "name": "John",
                "email": "john@example.com",
                "phone": "555-0100",
            })),
            Some(&admin),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "active");

        let (status, listing) = api_call(
            &router,
            "GET",
            "/contributions?month=3&year=2024",
            None,
            Some(&admin),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let rows = listing["contributions"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["member"]["id"], created["id"]);
        let contribution_id = rows[0]["id"].clone();

        let (status, body) = api_call(
            &router,
            "POST",
            "/contributions",
            Some(json!({ "contribution_id": contribution_id, "amount": "-5" })),
            Some(&admin),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["fields"][0]["field"], "amount");

        let (status, paid) = api_call(
            &router,
            "POST",
            "/contributions",
            Some(json!({ "contribution_id": contribution_id, "amount": "30000" })),
            Some(&admin),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(paid["status"], "paid");

        let (status, _) = api_call(&router, "GET", "/members/4242", None, Some(&admin)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let uri = format!("/members/{}", created["id"]);
        let (status, _) = api_call(&router, "DELETE", &uri, None, Some(&admin)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
}

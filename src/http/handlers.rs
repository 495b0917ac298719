use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use ulid::Ulid;

use super::AppState;
use super::auth::Caller;
use super::dto::*;
use super::error::ApiError;
use crate::manager::HoldRequest;
use crate::model::CourtId;

pub async fn health() -> &'static str {
    "ok"
}

pub async fn create_hold(
    State(state): State<AppState>,
    caller: Caller,
    ApiJson(body): ApiJson<HoldBody>,
) -> Result<(StatusCode, Json<ReservationView>), ApiError> {
    let user_id = caller.acting_user(body.user_id)?;
    let reservation = state
        .manager
        .create_hold(HoldRequest {
            court_id: body.court_id,
            user_id,
            start: body.start_time.timestamp_millis(),
            end: body.end_time.timestamp_millis(),
            players_count: body.players_count,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(reservation.into())))
}

pub async fn confirm(
    State(state): State<AppState>,
    caller: Caller,
    ApiPath(id): ApiPath<Ulid>,
    ApiJson(body): ApiJson<ConfirmBody>,
) -> Result<Json<ReservationView>, ApiError> {
    let user_id = caller.acting_user(body.user_id)?;
    let reservation = state.manager.confirm(id, &user_id).await?;
    Ok(Json(reservation.into()))
}

pub async fn cancel(
    State(state): State<AppState>,
    caller: Caller,
    ApiPath(id): ApiPath<Ulid>,
    ApiJson(body): ApiJson<CancelBody>,
) -> Result<Json<ReservationView>, ApiError> {
    let user_id = caller.acting_user(body.user_id)?;
    let reservation = state
        .manager
        .cancel(id, &user_id, body.reason.as_deref())
        .await?;
    Ok(Json(reservation.into()))
}

pub async fn my_reservations(
    State(state): State<AppState>,
    caller: Caller,
    ApiQuery(query): ApiQuery<UserQuery>,
) -> Result<Json<Vec<ReservationView>>, ApiError> {
    let user_id = caller.acting_user(query.user_id)?;
    let reservations = state.manager.reservations_for_user(&user_id).await?;
    Ok(Json(reservations.into_iter().map(Into::into).collect()))
}

pub async fn get_reservation(
    State(state): State<AppState>,
    caller: Caller,
    ApiPath(id): ApiPath<Ulid>,
    ApiQuery(query): ApiQuery<UserQuery>,
) -> Result<Json<ReservationView>, ApiError> {
    let user_id = caller.acting_user(query.user_id)?;
    let reservation = state.manager.get(id, &user_id).await?;
    Ok(Json(reservation.into()))
}

pub async fn availability(
    State(state): State<AppState>,
    ApiPath(court_id): ApiPath<CourtId>,
    ApiQuery(query): ApiQuery<AvailabilityQuery>,
) -> Result<Json<AvailabilityView>, ApiError> {
    let available = state
        .manager
        .is_court_available(&court_id, query.start.timestamp_millis(), query.end.timestamp_millis())
        .await?;
    Ok(Json(AvailabilityView {
        court_id,
        start: query.start,
        end: query.end,
        available,
    }))
}

//! Wire shapes. Instants are RFC 3339 on the wire and unix millis inside.

use axum::extract::{FromRequest, FromRequestParts};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::model::*;

/// `axum::Json` with rejections rendered as [`ApiError`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldBody {
    pub court_id: CourtId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub user_id: Option<UserId>,
    pub players_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmBody {
    pub user_id: Option<UserId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelBody {
    pub user_id: Option<UserId>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub user_id: Option<UserId>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

fn instant(ms: Ms) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReservationView {
    pub id: String,
    pub user_id: UserId,
    pub court_id: CourtId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub players_count: u32,
    pub price_total: Money,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub hold_expires_at: Option<DateTime<Utc>>,
}

impl From<Reservation> for ReservationView {
    fn from(r: Reservation) -> Self {
        Self {
            id: r.id.to_string(),
            user_id: r.user_id,
            court_id: r.court_id,
            start_time: instant(r.span.start),
            end_time: instant(r.span.end),
            players_count: r.players_count,
            price_total: r.price_total,
            status: r.status.as_str().to_string(),
            created_at: instant(r.created_at),
            hold_expires_at: r.hold_expires_at.map(instant),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityView {
    pub court_id: CourtId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub available: bool,
}

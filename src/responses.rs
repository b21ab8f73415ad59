//! Success envelopes and per-request metadata shared by every handler.

use axum::{
    Json,
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Identifies one API call in envelopes, error bodies and logs.
#[derive(Clone, Debug, Serialize)]
pub struct RequestMeta {
    pub request_id: String,
    pub request_at: DateTime<Utc>,
    pub timestamp: i64, // unix seconds
}

impl RequestMeta {
    /// Reuses a caller supplied `x-request-id` when it is usable, otherwise
    /// mints a fresh one.
    pub fn from_headers(headers: &HeaderMap, now: DateTime<Utc>) -> Self {
        let request_id = headers
            .get(&REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty() && id.len() <= 128)
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
        Self {
            request_id,
            request_at: now,
            timestamp: now.timestamp(),
        }
    }
}

pub async fn meta_middleware(mut req: Request<Body>, next: Next) -> Response {
    let meta = RequestMeta::from_headers(req.headers(), Utc::now());
    let echoed = HeaderValue::from_str(&meta.request_id).ok();
    req.extensions_mut().insert(meta);

    let mut response = next.run(req).await;
    if let Some(id) = echoed {
        response.headers_mut().insert(REQUEST_ID_HEADER, id);
    }
    response
}

#[derive(Clone, Debug, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub total_pages: u32,
}

impl Pagination {
    pub fn new(page: u32, per_page: u32, total: u64) -> Self {
        let per_page = per_page.max(1);
        let total_pages = total.div_ceil(u64::from(per_page)) as u32;
        Self {
            page,
            per_page,
            total,
            total_pages,
        }
    }
}

/// Cuts one page out of an already loaded list. Pages are 1-based.
pub fn paginate<T>(items: Vec<T>, page: u32, per_page: u32) -> (Vec<T>, Pagination) {
    let page = page.max(1);
    let pagination = Pagination::new(page, per_page, items.len() as u64);
    let skip = (page as usize - 1) * pagination.per_page as usize;
    let data = items
        .into_iter()
        .skip(skip)
        .take(pagination.per_page as usize)
        .collect();
    (data, pagination)
}

#[derive(Serialize)]
pub struct SuccessEnvelope<T> {
    pub message: String,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    pub meta: RequestMeta,
}

pub struct ApiOk<T> {
    status: StatusCode,
    body: SuccessEnvelope<T>,
}

impl<T> ApiOk<T> {
    fn with_status(status: StatusCode, message: impl Into<String>, data: T, meta: RequestMeta) -> Self {
        Self {
            status,
            body: SuccessEnvelope {
                message: message.into(),
                data,
                pagination: None,
                meta,
            },
        }
    }

    pub fn ok(message: impl Into<String>, data: T, meta: RequestMeta) -> Self {
        Self::with_status(StatusCode::OK, message, data, meta)
    }

    pub fn created(message: impl Into<String>, data: T, meta: RequestMeta) -> Self {
        Self::with_status(StatusCode::CREATED, message, data, meta)
    }
}

impl<T> ApiOk<Vec<T>> {
    /// A `200` carrying one page of `items`.
    pub fn page(
        message: impl Into<String>,
        items: Vec<T>,
        page: u32,
        per_page: u32,
        meta: RequestMeta,
    ) -> Self {
        let (data, pagination) = paginate(items, page, per_page);
        let mut ok = Self::ok(message, data, meta);
        ok.body.pagination = Some(pagination);
        ok
    }
}

impl<T: Serialize> IntoResponse for ApiOk<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

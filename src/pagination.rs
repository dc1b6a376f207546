//! `paginate` middleware: when `page` is in the query string, count matching rows, set the
//! `X-Page-*` headers and hand the computed window to `list` as a request extension.

use crate::controller::Controller;
use crate::error::AppError;
use crate::query::{parse_int_prefix, Direction, ListParams, OrderBy};
use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use serde_json::Value;

pub const DEFAULT_PAGE_LIMIT: u64 = 25;

/// LIMIT and OFFSET are bigint in SQL.
const MAX_WINDOW: u64 = i64::MAX as u64;

pub const HEADER_TOTAL_ITEMS: &str = "x-page-total-items";
pub const HEADER_CURRENT: &str = "x-page-current";
pub const HEADER_LIMIT: &str = "x-page-limit";
pub const HEADER_TOTAL_PAGES: &str = "x-page-total-pages";

/// Window computed from `page`/`limit`/`orderBy`. Overrides the raw query values in `list`.
#[derive(Clone, Debug, PartialEq)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub offset: u64,
    pub order: OrderBy,
}

impl Pagination {
    /// `None` when the request has no `page` parameter.
    pub fn from_params(params: &ListParams, primary_key: &str) -> Result<Option<Self>, AppError> {
        let Some(page) = params.page.as_deref() else {
            return Ok(None);
        };
        let page = parse_int_prefix(page).filter(|p| *p > 1).unwrap_or(1) as u64;
        let limit = params
            .limit
            .as_deref()
            .and_then(parse_int_prefix)
            .filter(|l| *l > 0)
            .map(|l| l as u64)
            .unwrap_or(DEFAULT_PAGE_LIMIT);
        let order = params.order()?.unwrap_or_else(|| OrderBy {
            column: primary_key.to_string(),
            direction: Direction::Asc,
        });
        Ok(Some(Pagination {
            page,
            limit,
            offset: limit.saturating_mul(page - 1).min(MAX_WINDOW),
            order,
        }))
    }

    pub fn total_pages(&self, count: u64) -> u64 {
        count.div_ceil(self.limit)
    }
}

pub async fn paginate(State(ctrl): State<Controller>, req: Request, next: Next) -> Result<Response, AppError> {
    let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(req.uri())
        .map_err(|e| AppError::BadRequest(e.body_text()))?;
    let params = ListParams::from_pairs(&pairs);
    let model = ctrl.model();
    let Some(pagination) = Pagination::from_params(&params, model.primary_key())? else {
        return Ok(next.run(req).await);
    };

    // The body is read here for the filter and handed on untouched.
    let (mut parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| AppError::BadRequest(format!("failed to read body: {}", e)))?;
    let json: Option<Value> = if bytes.is_empty() {
        None
    } else {
        serde_json::from_slice(&bytes).ok()
    };
    let filter = params.filter(json.as_ref())?;
    let count = model.count(&filter).await?;
    tracing::debug!(model = %model.name(), count, page = pagination.page, limit = pagination.limit, "paginate");

    let total_pages = pagination.total_pages(count);
    let (page, limit) = (pagination.page, pagination.limit);
    parts.extensions.insert(pagination);
    let mut res = next.run(Request::from_parts(parts, Body::from(bytes))).await;
    if res.status().is_success() {
        let headers = res.headers_mut();
        headers.insert(HEADER_TOTAL_ITEMS, HeaderValue::from(count));
        headers.insert(HEADER_CURRENT, HeaderValue::from(page));
        headers.insert(HEADER_LIMIT, HeaderValue::from(limit));
        headers.insert(HEADER_TOTAL_PAGES, HeaderValue::from(total_pages));
    }
    Ok(res)
}

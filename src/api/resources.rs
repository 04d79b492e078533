//! Generic CRUD handlers shared by every entity route. The entity kind is
//! attached to each route as an `Extension`.

use axum::{
  extract::{Path, Query, State},
  Extension,
};
use serde::Deserialize;
use serde_json::Value;

use super::access::{authorize, scope_for};
use super::envelope::{created, ok, ok_with, ApiResult, Created, Payload};
use super::error::AppError;
use super::{ApiSettings, AppState};
use crate::crm::{EntityKind, PartnerScope};
use crate::db::User;
use crate::types::{FindOptions, OrderBySpec, OrderDirection, StructuredFilter};

/// Which references to embed in the response.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ExpandSpec {
  #[default]
  None,
  All,
  Only(Vec<String>),
}

impl ExpandSpec {
  /// `true`/`all`/`1` expand everything, anything else is a comma-separated alias list.
  pub fn parse(raw: Option<&str>) -> Self {
    match raw.map(str::trim) {
      None | Some("") | Some("false") | Some("0") => Self::None,
      Some("true") | Some("all") | Some("1") => Self::All,
      Some(list) => Self::Only(
        list
          .split(',')
          .map(|s| s.trim().to_string())
          .filter(|s| !s.is_empty())
          .collect(),
      ),
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ExpandBody {
  Flag(bool),
  Aliases(Vec<String>),
}

impl From<Option<ExpandBody>> for ExpandSpec {
  fn from(body: Option<ExpandBody>) -> Self {
    match body {
      None | Some(ExpandBody::Flag(false)) => Self::None,
      Some(ExpandBody::Flag(true)) => Self::All,
      Some(ExpandBody::Aliases(aliases)) => Self::Only(aliases),
    }
  }
}

/// Query string of `GET /api/{resource}`.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
  pub filter: Option<String>,
  pub sort: Option<String>,
  pub order: Option<String>,
  pub limit: Option<String>,
  pub skip: Option<String>,
  pub expand: Option<String>,
  pub partner: Option<String>,
}

/// Body of `POST /api/{resource}/search`.
#[derive(Debug, Default, Deserialize)]
pub struct SearchRequest {
  pub filter: Option<StructuredFilter>,
  pub sort: Option<String>,
  pub order: Option<OrderDirection>,
  pub limit: Option<usize>,
  pub skip: Option<usize>,
  pub expand: Option<ExpandBody>,
  pub partner: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecordParams {
  pub expand: Option<String>,
}

fn parse_number(name: &str, raw: Option<&str>) -> Result<Option<usize>, AppError> {
  raw
    .filter(|s| !s.is_empty())
    .map(|s| {
      s.parse::<usize>()
        .map_err(|_| AppError::BadRequest(format!("{}: must be a non-negative integer", name)))
    })
    .transpose()
}

fn parse_order(raw: Option<&str>) -> Result<OrderDirection, AppError> {
  match raw.map(str::to_ascii_lowercase).as_deref() {
    None | Some("") | Some("asc") => Ok(OrderDirection::Asc),
    Some("desc") => Ok(OrderDirection::Desc),
    Some(other) => Err(AppError::BadRequest(format!(
      "order: expected 'asc' or 'desc', got '{}'",
      other
    ))),
  }
}

fn find_options(
  settings: &ApiSettings,
  filter: Option<StructuredFilter>,
  sort: Option<String>,
  order: OrderDirection,
  limit: Option<usize>,
  skip: Option<usize>,
) -> FindOptions {
  FindOptions {
    filter,
    order: sort.filter(|s| !s.is_empty()).map(|field| OrderBySpec {
      field,
      direction: order,
    }),
    limit: Some(settings.page_size(limit)),
    skip: skip.filter(|s| *s > 0),
  }
}

impl ListParams {
  fn into_options(self, settings: &ApiSettings) -> Result<(FindOptions, ExpandSpec), AppError> {
    let filter = self
      .filter
      .as_deref()
      .filter(|f| !f.trim().is_empty())
      .map(serde_json::from_str::<StructuredFilter>)
      .transpose()
      .map_err(|e| AppError::BadRequest(format!("Invalid filter: {}", e)))?;
    let limit = parse_number("limit", self.limit.as_deref())?;
    let skip = parse_number("skip", self.skip.as_deref())?;
    let order = parse_order(self.order.as_deref())?;
    Ok((
      find_options(settings, filter, self.sort, order, limit, skip),
      ExpandSpec::parse(self.expand.as_deref()),
    ))
  }
}

async fn run_query(
  state: &AppState,
  kind: EntityKind,
  scope: &PartnerScope,
  options: FindOptions,
  expand: ExpandSpec,
) -> ApiResult<Vec<Value>> {
  let mut records = state.repo.query(kind, scope, options).await?;
  expand_records(state, kind, scope, &mut records, &expand).await?;
  ok(records)
}

async fn expand_records(
  state: &AppState,
  kind: EntityKind,
  scope: &PartnerScope,
  records: &mut [Value],
  expand: &ExpandSpec,
) -> Result<(), AppError> {
  match expand {
    ExpandSpec::None => Ok(()),
    ExpandSpec::All => Ok(state.repo.expand(kind, scope, records, None).await?),
    ExpandSpec::Only(aliases) => Ok(state.repo.expand(kind, scope, records, Some(aliases)).await?),
  }
}

/// GET /api/{resource}
pub async fn list_records(
  State(state): State<AppState>,
  Extension(kind): Extension<EntityKind>,
  Extension(user): Extension<User>,
  Query(params): Query<ListParams>,
) -> ApiResult<Vec<Value>> {
  authorize(&user, kind)?;
  let scope = scope_for(&user, params.partner.as_deref());
  let (options, expand) = params.into_options(&state.settings)?;
  run_query(&state, kind, &scope, options, expand).await
}

/// POST /api/{resource}/search
pub async fn search_records(
  State(state): State<AppState>,
  Extension(kind): Extension<EntityKind>,
  Extension(user): Extension<User>,
  Payload(req): Payload<SearchRequest>,
) -> ApiResult<Vec<Value>> {
  authorize(&user, kind)?;
  let scope = scope_for(&user, req.partner.as_deref());
  let options = find_options(
    &state.settings,
    req.filter,
    req.sort,
    req.order.unwrap_or_default(),
    req.limit,
    req.skip,
  );
  run_query(&state, kind, &scope, options, req.expand.into()).await
}

/// POST /api/{resource}
pub async fn create_record(
  State(state): State<AppState>,
  Extension(kind): Extension<EntityKind>,
  Extension(user): Extension<User>,
  Payload(body): Payload<Value>,
) -> Created<Value> {
  authorize(&user, kind)?;
  let scope = scope_for(&user, None);
  let record = state.repo.insert(kind, &scope, body).await?;
  tracing::info!(collection = kind.collection(), user = %user.id, "Record created");
  created(record, format!("{} created", kind.label()))
}

/// GET /api/{resource}/{id}
pub async fn get_record(
  State(state): State<AppState>,
  Extension(kind): Extension<EntityKind>,
  Extension(user): Extension<User>,
  Path(id): Path<String>,
  Query(params): Query<RecordParams>,
) -> ApiResult<Value> {
  authorize(&user, kind)?;
  let scope = scope_for(&user, None);
  let record = state.repo.get(kind, &scope, &id).await?;
  let mut records = [record];
  expand_records(
    &state,
    kind,
    &scope,
    &mut records,
    &ExpandSpec::parse(params.expand.as_deref()),
  )
  .await?;
  let [record] = records;
  ok(record)
}

/// PUT /api/{resource}/{id}
pub async fn update_record(
  State(state): State<AppState>,
  Extension(kind): Extension<EntityKind>,
  Extension(user): Extension<User>,
  Path(id): Path<String>,
  Payload(changes): Payload<Value>,
) -> ApiResult<Value> {
  authorize(&user, kind)?;
  let scope = scope_for(&user, None);
  let record = state.repo.update(kind, &scope, &id, changes).await?;
  ok_with(record, format!("{} updated", kind.label()))
}

/// DELETE /api/{resource}/{id}
pub async fn delete_record(
  State(state): State<AppState>,
  Extension(kind): Extension<EntityKind>,
  Extension(user): Extension<User>,
  Path(id): Path<String>,
) -> ApiResult<Value> {
  authorize(&user, kind)?;
  let scope = scope_for(&user, None);
  let record = state.repo.delete(kind, &scope, &id).await?;
  tracing::info!(collection = kind.collection(), id = %id, user = %user.id, "Record deleted");
  ok_with(record, format!("{} deleted", kind.label()))
}

use axum::{
  extract::{FromRequest, Request},
  http::StatusCode,
  Json,
};
use serde::{de::DeserializeOwned, Serialize};

use super::error::AppError;

/// Success body: `{ "data": ..., "message": ... }`.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
  pub data: T,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
}

pub type ApiResult<T> = Result<Json<Envelope<T>>, AppError>;

pub type Created<T> = Result<(StatusCode, Json<Envelope<T>>), AppError>;

pub fn ok<T: Serialize>(data: T) -> ApiResult<T> {
  Ok(Json(Envelope {
    data,
    message: None,
  }))
}

pub fn ok_with<T: Serialize>(data: T, message: impl Into<String>) -> ApiResult<T> {
  Ok(Json(Envelope {
    data,
    message: Some(message.into()),
  }))
}

pub fn created<T: Serialize>(data: T, message: impl Into<String>) -> Created<T> {
  Ok((
    StatusCode::CREATED,
    Json(Envelope {
      data,
      message: Some(message.into()),
    }),
  ))
}

/// JSON request body whose rejections use the `{ "error" }` envelope.
pub struct Payload<T>(pub T);

impl<S, T> FromRequest<S> for Payload<T>
where
  T: DeserializeOwned + Send,
  S: Send + Sync,
{
  type Rejection = AppError;

  async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
    match Json::<T>::from_request(req, state).await {
      Ok(Json(value)) => Ok(Self(value)),
      Err(rejection) => Err(AppError::BadRequest(rejection.body_text())),
    }
  }
}

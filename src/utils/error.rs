/* VEIL Proxy (AGPL-3.0)

Copyright (C) 2025 - VEIL Contributors

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU Affero General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU Affero General Public License for more details.

You should have received a copy of the GNU Affero General Public License
along with this program.  If not, see <https://www.gnu.org/licenses/>.

*/

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type ProxyResult<T> = Result<T, ProxyError>;

/// Router-visible error taxonomy. The router is the single error boundary:
/// every handler returns `ProxyResult<Response>` and this type decides the
/// status code and the `{ error, message }` JSON body the browser sees.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Invalid encoded URL")]
    MalformedToken,

    #[error("Missing required parameter: {0}")]
    MissingParam(&'static str),

    #[error("URL not allowed: {0}")]
    Forbidden(String),

    #[error("Not found")]
    NotFound,

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ProxyError {
    fn status(&self) -> StatusCode {
        match self {
            ProxyError::MalformedToken => StatusCode::BAD_REQUEST,
            ProxyError::MissingParam(_) => StatusCode::BAD_REQUEST,
            ProxyError::Forbidden(_) => StatusCode::BAD_REQUEST,
            ProxyError::NotFound => StatusCode::NOT_FOUND,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ProxyError::MalformedToken => "Invalid encoded URL",
            ProxyError::MissingParam(_) => "Missing parameter",
            ProxyError::Forbidden(_) => "Forbidden target",
            ProxyError::NotFound => "Not found",
            ProxyError::Upstream(_) => "Bad gateway",
            ProxyError::Internal(_) => "Internal Server Error",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "request rejected");
        }

        // Bodies carry short messages only; secrets (upstream password, full
        // session ids) never reach this type.
        let body = json!({
            "error": self.label(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

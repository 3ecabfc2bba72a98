#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
struct HttpApiError {
    status: StatusCode,
    error: ApiError,
}

impl HttpApiError {
    fn bad_request(code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: ApiError::new(code, message, details),
        }
    }

    fn invalid_body(rejection: JsonRejection) -> Self {
        Self::bad_request(
            ErrorCode::ValidationFailed,
            "request body is not valid JSON for this endpoint",
            Some(rejection.body_text()),
        )
    }

    fn internal(code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: ApiError::new(code, message, details),
        }
    }

    fn from_ledger(err: LedgerError) -> Self {
        match err {
            LedgerError::Authentication(detail) => Self::bad_request(
                ErrorCode::AuthenticationFailed,
                "notification signature rejected",
                Some(detail),
            ),
            LedgerError::MalformedEvent(detail) => {
                Self::bad_request(ErrorCode::MalformedEvent, "malformed event", Some(detail))
            }
            LedgerError::Validation(detail) => {
                Self::bad_request(ErrorCode::ValidationFailed, detail, None)
            }
            LedgerError::EntryNotFound(entry_id) => Self {
                status: StatusCode::NOT_FOUND,
                error: ApiError::new(
                    ErrorCode::EntryNotFound,
                    "entry not found",
                    Some(format!("entry_id={entry_id}")),
                ),
            },
            LedgerError::TransactionConflict(detail) => Self::internal(
                ErrorCode::TransactionConflict,
                "ledger update conflicted; retry later",
                Some(detail),
            ),
            LedgerError::StoreTimeout(millis) => Self::internal(
                ErrorCode::StoreTimeout,
                "ledger store timed out",
                Some(format!("timeout_ms={millis}")),
            ),
            LedgerError::StoreUnavailable(detail) => Self::internal(
                ErrorCode::StoreUnavailable,
                "ledger store unavailable",
                Some(detail),
            ),
        }
    }

    fn from_service(err: ServiceError) -> Self {
        let mapped = match err {
            ServiceError::Ledger(err) => Self::from_ledger(err),
            ServiceError::Gateway(err) => Self {
                status: StatusCode::BAD_GATEWAY,
                error: ApiError::new(
                    ErrorCode::GatewayError,
                    "failed to create checkout session",
                    Some(err.to_string()),
                ),
            },
            other => Self::internal(
                ErrorCode::InternalError,
                "internal error",
                Some(other.to_string()),
            ),
        };

        if mapped.status.is_server_error() {
            error!(
                status = mapped.status.as_u16(),
                code = ?mapped.error.error_code,
                details = mapped.error.details.as_deref().unwrap_or(""),
                "request failed"
            );
        } else {
            warn!(
                status = mapped.status.as_u16(),
                code = ?mapped.error.error_code,
                "request rejected"
            );
        }
        mapped
    }
}

impl IntoResponse for HttpApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}

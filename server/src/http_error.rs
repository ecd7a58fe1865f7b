use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use eyre;
use tube_core::{
    ingest::{IngestError, IngestErrorKind},
    streaming::StreamError,
};

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    err: eyre::Error,
}

impl HttpError {
    pub fn new(status: StatusCode, err: impl Into<eyre::Error>) -> Self {
        HttpError {
            status,
            err: err.into(),
        }
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        HttpError::new(StatusCode::NOT_FOUND, eyre::eyre!("{} not found", what))
    }

    pub fn bad_request(msg: impl std::fmt::Display) -> Self {
        HttpError::new(StatusCode::BAD_REQUEST, eyre::eyre!("{}", msg))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, "{:#}", self.err);
        } else {
            tracing::debug!(status = %self.status, "{:#}", self.err);
        }
        (self.status, format!("{:#}", self.err)).into_response()
    }
}

macro_rules! impl_from {
    ($from:ty) => {
        impl From<$from> for HttpError {
            fn from(err: $from) -> Self {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, err)
            }
        }
    };
}

impl_from!(std::io::Error);
impl_from!(color_eyre::Report);

impl From<IngestError> for HttpError {
    fn from(err: IngestError) -> Self {
        let status = match (&err, err.kind()) {
            (IngestError::SizeExceeded { .. }, _) => StatusCode::PAYLOAD_TOO_LARGE,
            (_, IngestErrorKind::Validation) => StatusCode::BAD_REQUEST,
            (_, IngestErrorKind::Overloaded) => StatusCode::SERVICE_UNAVAILABLE,
            (_, IngestErrorKind::Process | IngestErrorKind::Publish | IngestErrorKind::Internal) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err)
    }
}

impl From<StreamError> for HttpError {
    fn from(err: StreamError) -> Self {
        let status = match err {
            StreamError::Busy => StatusCode::SERVICE_UNAVAILABLE,
            StreamError::Process(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err)
    }
}

impl From<axum::extract::multipart::MultipartError> for HttpError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        Self::new(err.status(), err)
    }
}

pub type ApiResult<T> = Result<T, HttpError>;

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.err)
    }
}

//! Mapping from HTTP status codes to outcomes.

use crate::error::ApiError;

/// What a status code means to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    NotAuthorized,
    NotFound,
    Duplicate,
    InvalidRequest,
    MultipleChoices,
    ServerError,
    Unknown(u16),
}

/// Classify a status code. Pure; the body is attached later by `into_result`.
pub fn classify(status: u16) -> Outcome {
    match status {
        200 | 201 | 202 | 204 => Outcome::Success,
        401 | 403 => Outcome::NotAuthorized,
        404 => Outcome::NotFound,
        409 => Outcome::Duplicate,
        400 => Outcome::InvalidRequest,
        300 => Outcome::MultipleChoices,
        500 => Outcome::ServerError,
        other => Outcome::Unknown(other),
    }
}

impl Outcome {
    pub fn is_success(self) -> bool {
        self == Outcome::Success
    }

    /// Turn a failed outcome into the matching `ApiError`, carrying `body`.
    pub fn into_result(self, body: String) -> Result<(), ApiError> {
        match self {
            Outcome::Success => Ok(()),
            Outcome::NotAuthorized => Err(ApiError::NotAuthorized(body)),
            Outcome::NotFound => Err(ApiError::NotFound(body)),
            Outcome::Duplicate => Err(ApiError::Duplicate(body)),
            Outcome::InvalidRequest => Err(ApiError::InvalidRequest(body)),
            Outcome::MultipleChoices => Err(ApiError::MultipleChoices(body)),
            Outcome::ServerError => Err(ApiError::ServerError(body)),
            Outcome::Unknown(status) => Err(ApiError::Unknown { status, body }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_codes() {
        for status in [200, 201, 202, 204] {
            assert_eq!(classify(status), Outcome::Success, "{status}");
            assert!(classify(status).into_result(String::new()).is_ok());
        }
    }

    #[test]
    fn mapped_error_codes() {
        let cases = [
            (401, Outcome::NotAuthorized),
            (403, Outcome::NotAuthorized),
            (404, Outcome::NotFound),
            (409, Outcome::Duplicate),
            (400, Outcome::InvalidRequest),
            (300, Outcome::MultipleChoices),
            (500, Outcome::ServerError),
        ];
        for (status, expected) in cases {
            assert_eq!(classify(status), expected, "{status}");
        }
    }

    #[test]
    fn unlisted_codes_are_unknown() {
        for status in [100, 203, 206, 301, 302, 304, 402, 405, 418, 429, 501, 502, 503] {
            assert_eq!(classify(status), Outcome::Unknown(status), "{status}");
        }
    }

    #[test]
    fn errors_carry_body_text() {
        let err = classify(403).into_result("token expired".to_string()).unwrap_err();
        assert!(matches!(err, ApiError::NotAuthorized(ref body) if body == "token expired"));

        let err = classify(300).into_result("pick one".to_string()).unwrap_err();
        assert!(matches!(err, ApiError::MultipleChoices(ref body) if body == "pick one"));

        let err = classify(500).into_result("boom".to_string()).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn unknown_error_message_includes_code_and_body() {
        let err = classify(418).into_result("teapot".to_string()).unwrap_err();
        assert!(matches!(err, ApiError::Unknown { status: 418, .. }));
        let msg = err.to_string();
        assert!(msg.contains("418"));
        assert!(msg.contains("teapot"));
    }
}

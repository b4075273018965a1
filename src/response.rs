use serde::Serialize;

/// Success envelope: `{statusCode, message, data}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub status_code: u16,
    pub message: String,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(status_code: u16, message: impl Into<String>, data: T) -> Self {
        Self {
            status_code,
            message: message.into(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_camel_case() {
        let body = ApiResponse::new(200, "OK", "Health check is passed");
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(
            json,
            r#"{"statusCode":200,"message":"OK","data":"Health check is passed"}"#
        );
    }
}

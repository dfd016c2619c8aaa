use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            message: None,
        }
    }

    /// Success carrying a user-facing notice, e.g. "Banned a@x.com".
    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub success: bool,
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.error.details = Some(details);
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub checks: Vec<HealthCheck>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthResponse {
    pub fn healthy(service: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            service: service.into(),
            version: version.into(),
            checks: Vec::new(),
        }
    }

    /// Adds a dependency check; one unhealthy check makes the whole report unhealthy.
    pub fn with_check(mut self, name: impl Into<String>, result: Result<(), String>) -> Self {
        let check = match result {
            Ok(()) => HealthCheck {
                name: name.into(),
                status: HealthStatus::Healthy,
                message: None,
            },
            Err(message) => HealthCheck {
                name: name.into(),
                status: HealthStatus::Unhealthy,
                message: Some(message),
            },
        };
        if check.status == HealthStatus::Unhealthy {
            self.status = HealthStatus::Unhealthy;
        }
        self.checks.push(check);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failing_check_marks_unhealthy() {
        let health = HealthResponse::healthy("roomguard", "0.1.0")
            .with_check("store", Ok(()))
            .with_check("redis", Err("connection refused".into()));

        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.checks.len(), 2);
        assert_eq!(health.checks[1].message.as_deref(), Some("connection refused"));
    }

    #[test]
    fn notice_is_serialized() {
        let resp = ApiResponse::ok_with_message(serde_json::json!({}), "Banned a@x.com");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["message"], "Banned a@x.com");
        assert_eq!(json["success"], true);
    }
}

//! Line-delimited JSON front end used by `till run`
//!
//! Each input line is one request object tagged by `op`:
//!
//! ```text
//! {"op":"login","username":"alice","password":"..."}
//! {"op":"verify_session","access_token":"..."}
//! ```
//!
//! Each request gets exactly one response line, either
//! `{"ok":true,"result":...}` or
//! `{"ok":false,"error":{"code":"...","message":"..."}}`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use till_auth::{AuthError, AuthService, ChangePasswordRequest, LoginRequest};

// Missing fields default to empty so the service reports them as
// validation or missing-token errors rather than parse failures.
#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    Login {
        #[serde(default)]
        username: String,
        #[serde(default)]
        password: String,
    },
    Logout {
        #[serde(default)]
        access_token: String,
        #[serde(default)]
        refresh_token: String,
    },
    VerifySession {
        #[serde(default)]
        access_token: String,
    },
    CurrentUser {
        #[serde(default)]
        access_token: String,
    },
    ChangePassword {
        #[serde(default)]
        access_token: String,
        #[serde(default)]
        current_password: String,
        #[serde(default)]
        new_password: String,
    },
    Refresh {
        #[serde(default)]
        refresh_token: String,
    },
    Cleanup,
    Stats,
}

/// Handle one request line and build its response
pub async fn handle_line(service: &AuthService, line: &str) -> Value {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            return json!({
                "ok": false,
                "error": { "code": "BAD_REQUEST", "message": e.to_string() },
            })
        }
    };

    match dispatch(service, request).await {
        Ok(result) => json!({ "ok": true, "result": result }),
        Err(e) => {
            let mut error = json!({ "code": e.code(), "message": e.to_string() });
            if let AuthError::Validation(violations) = &e {
                error["details"] = json!(violations);
            }
            json!({ "ok": false, "error": error })
        }
    }
}

async fn dispatch(service: &AuthService, request: Request) -> Result<Value, AuthError> {
    match request {
        Request::Login { username, password } => {
            to_json(&service.login(LoginRequest::new(username, password)).await?)
        }
        Request::Logout {
            access_token,
            refresh_token,
        } => {
            service.logout(&access_token, &refresh_token).await?;
            Ok(Value::Null)
        }
        Request::VerifySession { access_token } => {
            to_json(&service.verify_session(&access_token).await?)
        }
        Request::CurrentUser { access_token } => {
            to_json(&service.get_current_user(&access_token).await?)
        }
        Request::ChangePassword {
            access_token,
            current_password,
            new_password,
        } => {
            service
                .change_password(
                    &access_token,
                    ChangePasswordRequest::new(current_password, new_password),
                )
                .await?;
            Ok(Value::Null)
        }
        Request::Refresh { refresh_token } => {
            to_json(&service.refresh_access_token(&refresh_token).await?)
        }
        Request::Cleanup => to_json(&service.cleanup_expired_sessions()),
        Request::Stats => to_json(&service.stats()),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, AuthError> {
    serde_json::to_value(value).map_err(|e| AuthError::Internal(e.to_string()))
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use validator::Validate;

/// A customer's bank account. Each user holds at most one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub id: i64,
    pub user_id: i64,
    pub balance: i64,
}

/// Role requested for a newly registered user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Client,
    Moderator,
    Administrator,
}

/// Registration payload. Forwarded as-is to the identity service, which
/// creates the user and answers with its id.
#[derive(Clone, Serialize, Deserialize, Validate)]
pub struct CreateAccountRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 1, max = 100))]
    pub surname: String,
    #[validate(length(min = 5, max = 20))]
    pub phone: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    pub permission: Permission,
}

impl fmt::Debug for CreateAccountRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateAccountRequest")
            .field("name", &self.name)
            .field("surname", &self.surname)
            .field("phone", &self.phone)
            .field("city", &self.city)
            .field("password", &"***")
            .field("permission", &self.permission)
            .finish()
    }
}

/// Administrative balance correction.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateAccountRequest {
    #[validate(range(min = 0))]
    pub balance: i64,
}

#[derive(Debug, Serialize)]
pub struct CreatedAccountResponse {
    #[serde(flatten)]
    pub account: Account,
    /// Fields the identity service returned for the new user.
    pub profile: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> CreateAccountRequest {
        serde_json::from_value(json!({
            "name": "Ada",
            "surname": "Lovelace",
            "phone": "+44123456",
            "city": "London",
            "password": "correct-horse",
            "permission": "client"
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_request() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_short_password_is_rejected() {
        let mut req = request();
        req.password = "short".to_string();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_unknown_permission_is_rejected() {
        let result: Result<CreateAccountRequest, _> = serde_json::from_value(json!({
            "name": "Ada",
            "surname": "Lovelace",
            "phone": "+44123456",
            "city": "London",
            "password": "correct-horse",
            "permission": "root"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_hides_password() {
        assert!(!format!("{:?}", request()).contains("correct-horse"));
    }

    #[test]
    fn test_negative_balance_is_rejected() {
        assert!(UpdateAccountRequest { balance: -1 }.validate().is_err());
        assert!(UpdateAccountRequest { balance: 0 }.validate().is_ok());
    }
}

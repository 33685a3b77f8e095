use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct UserId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Consumer,
    Retailer,
    Admin,
}

text_enum!(Role {
    Consumer => "consumer",
    Retailer => "retailer",
    Admin => "admin",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    NotVerified,
    Verified,
}

text_enum!(Verification {
    NotVerified => "not_verified",
    Verified => "verified",
});

/// Display tier, not tied to the balance by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rank {
    Bronze,
    Silver,
    Gold,
}

text_enum!(Rank {
    Bronze => "bronze",
    Silver => "silver",
    Gold => "gold",
});

/// Base `app_user` table model
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserAccount {
    pub id: UserId,
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub shop_name: Option<String>,
    #[sqlx(try_from = "String")]
    pub verification: Verification,
    #[sqlx(try_from = "String")]
    pub rank: Rank,
    pub points: i64,
    pub free_spins: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserAccount {
    pub fn is_consumer(&self) -> bool {
        self.role == Role::Consumer
    }

    pub fn is_verified_retailer(&self) -> bool {
        self.role == Role::Retailer && self.verification == Verification::Verified
    }
}

/// What the api hands back for an account; never carries the password hash
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shop_name: Option<String>,
    pub verification: Verification,
    pub rank: Rank,
    pub points: i64,
    pub free_spins: i32,
    pub created_at: DateTime<Utc>,
}

impl From<UserAccount> for AccountView {
    fn from(value: UserAccount) -> Self {
        Self {
            id: value.id,
            email: value.email,
            display_name: value.display_name,
            role: value.role,
            shop_name: value.shop_name,
            verification: value.verification,
            rank: value.rank,
            points: value.points,
            free_spins: value.free_spins,
            created_at: value.created_at,
        }
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        UserId(value)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        UserId(value.to_string())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}


#[cfg(test)]
mod test {
    use super::fixture::TestAccount;
    use super::*;

    #[test]
    fn test_text_enum_round_trip_through_strings() {
        assert_eq!("retailer".parse::<Role>().unwrap(), Role::Retailer);
        assert_eq!(Verification::NotVerified.as_str(), "not_verified");
        assert!("platinum".parse::<Rank>().is_err());
    }

    #[test]
    fn test_retailer_must_be_verified() {
        let mut retailer = UserAccount::generate_test_account(Role::Retailer, 0);
        assert!(retailer.is_verified_retailer());

        retailer.verification = Verification::NotVerified;
        assert!(!retailer.is_verified_retailer());

        let consumer = UserAccount::generate_test_account(Role::Consumer, 0);
        assert!(consumer.is_consumer());
        assert!(!consumer.is_verified_retailer());
    }

    #[test]
    fn test_view_hides_password() {
        let account = UserAccount::generate_test_account(Role::Consumer, 12);
        let json = serde_json::to_value(AccountView::from(account)).unwrap();

        assert!(json.get("passwordHash").is_none());
        assert_eq!(json["points"], 12);
        assert_eq!(json["role"], "consumer");
    }
}

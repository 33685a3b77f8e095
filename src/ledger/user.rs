use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::db::models::counter::RemainingView;
use crate::db::models::user::{
    AccountView, Rank, Role, UserAccount, UserId, Verification,
};
use crate::db::prelude::{CounterRepository, Repository, UserRepository};
use crate::ledger::{Ledger, LedgerError, LedgerResult, required, required_str};
use crate::util::new_id;
use crate::util::password::{hash_password, verify_password};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub display_name: Option<String>,
    pub role: Option<Role>,
    #[serde(default)]
    pub shop_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub verification: Option<Verification>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    #[serde(flatten)]
    pub account: AccountView,
    pub daily: Vec<RemainingView>,
}

/// Validated registration, everything but the password hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub role: Role,
    pub shop_name: Option<String>,
}

pub fn validate_registration(req: RegisterRequest) -> LedgerResult<Registration> {
    let email = required_str(req.email, "email")?.to_lowercase();
    let password = required(req.password, "password")?;
    let display_name = required_str(req.display_name, "displayName")?;
    let role = required(req.role, "role")?;

    if !email.contains('@') {
        return Err(LedgerError::InvalidInput(String::from(
            "email address is malformed",
        )));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(LedgerError::InvalidInput(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let shop_name = match role {
        Role::Admin => {
            return Err(LedgerError::InvalidInput(String::from(
                "admin accounts cannot be self-registered",
            )));
        }
        Role::Retailer => Some(required_str(req.shop_name, "shopName")?),
        Role::Consumer => None,
    };

    Ok(Registration {
        email,
        password,
        display_name,
        role,
        shop_name,
    })
}

impl Ledger {
    /// Creates an account with the configured starting balance. Retailers start unverified and
    /// can't credit redemptions until an admin verifies them.
    #[instrument(skip(self, req))]
    pub async fn register(&self, req: RegisterRequest) -> LedgerResult<AccountView> {
        let reg = validate_registration(req)?;
        let now = Utc::now();

        let account = UserAccount {
            id: UserId(new_id()),
            email: reg.email,
            password_hash: hash_password(&reg.password)?,
            display_name: reg.display_name,
            role: reg.role,
            shop_name: reg.shop_name,
            verification: Verification::NotVerified,
            rank: Rank::Bronze,
            points: self.starting_points,
            free_spins: 0,
            created_at: now,
            updated_at: now,
        };

        UserRepository::new(self.pool)
            .insert(&account)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    if db.constraint().is_some_and(|c| c.contains("shop_name")) {
                        LedgerError::ShopNameTaken
                    } else {
                        LedgerError::EmailTaken
                    }
                }
                other => other.into(),
            })?;

        tracing::info!(user = %account.id, role = %account.role, "account registered");
        Ok(account.into())
    }

    #[instrument(skip(self, req))]
    pub async fn login(&self, req: LoginRequest) -> LedgerResult<AccountView> {
        let email = required_str(req.email, "email")?;
        let password = required(req.password, "password")?;

        let account = UserRepository::new(self.pool)
            .get_by_email(&email)
            .await?
            .ok_or(LedgerError::InvalidCredentials)?;

        if !verify_password(&password, &account.password_hash)? {
            return Err(LedgerError::InvalidCredentials);
        }

        Ok(account.into())
    }

    #[instrument(skip(self))]
    pub async fn account(&self, user_id: &UserId) -> LedgerResult<AccountSummary> {
        let account = UserRepository::new(self.pool)
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(user_id.clone()))?;

        let now = Utc::now();
        let daily = CounterRepository::new(self.pool)
            .get_all(user_id)
            .await?
            .iter()
            .map(|counter| self.limiter.status(counter, now))
            .collect();

        Ok(AccountSummary {
            account: account.into(),
            daily,
        })
    }

    #[instrument(skip(self))]
    pub async fn set_verification(&self, user_id: &UserId, req: VerifyRequest) -> LedgerResult<AccountView> {
        let verification = required(req.verification, "verification")?;
        let repo = UserRepository::new(self.pool);

        let account = repo
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(user_id.clone()))?;
        if account.role != Role::Retailer {
            return Err(LedgerError::InvalidRetailer);
        }

        let updated = repo
            .set_verification(user_id, verification)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(user_id.clone()))?;

        tracing::info!(user = %user_id, %verification, "retailer verification changed");
        Ok(updated.into())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn request(role: Role) -> RegisterRequest {
        RegisterRequest {
            email: Some(String::from(" Jo@Example.com ")),
            password: Some(String::from("correct horse")),
            display_name: Some(String::from("Jo")),
            role: Some(role),
            shop_name: None,
        }
    }

    #[test]
    fn test_consumer_registration() {
        let reg = validate_registration(request(Role::Consumer)).unwrap();

        assert_eq!(reg.email, "jo@example.com");
        assert_eq!(reg.shop_name, None);
    }

    #[test]
    fn test_retailer_needs_shop_name() {
        assert!(matches!(
            validate_registration(request(Role::Retailer)),
            Err(LedgerError::MissingField("shopName"))
        ));

        let with_shop = RegisterRequest {
            shop_name: Some(String::from("ShopA")),
            ..request(Role::Retailer)
        };
        assert_eq!(
            validate_registration(with_shop).unwrap().shop_name.as_deref(),
            Some("ShopA")
        );
    }

    #[test]
    fn test_rejected_registrations() {
        assert!(matches!(
            validate_registration(request(Role::Admin)),
            Err(LedgerError::InvalidInput(_))
        ));

        let short = RegisterRequest {
            password: Some(String::from("short")),
            ..request(Role::Consumer)
        };
        assert!(matches!(
            validate_registration(short),
            Err(LedgerError::InvalidInput(_))
        ));

        let no_at = RegisterRequest {
            email: Some(String::from("not-an-email")),
            ..request(Role::Consumer)
        };
        assert!(matches!(
            validate_registration(no_at),
            Err(LedgerError::InvalidInput(_))
        ));

        assert!(matches!(
            validate_registration(RegisterRequest::default()),
            Err(LedgerError::MissingField("email"))
        ));
    }
}

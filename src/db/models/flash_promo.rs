use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Base `flash_promo` table model
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FlashPromo {
    pub id: String,
    pub name: String,
    pub multiplier: f64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub is_active: bool,
    pub max_participants: i32,
    pub current_participants: i32,
    pub created_at: DateTime<Utc>,
}

impl FlashPromo {
    /// Flagged active and `now` inside `[starts_at, ends_at]`
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.starts_at <= now && now <= self.ends_at
    }

    pub fn is_full(&self) -> bool {
        self.current_participants >= self.max_participants
    }
}

#[cfg(test)]
mod test {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_is_live_window() {
        let now = Utc::now();
        let mut promo = FlashPromo {
            id: String::from("p"),
            name: String::from("double points hour"),
            multiplier: 2.0,
            starts_at: now - Duration::minutes(5),
            ends_at: now + Duration::minutes(55),
            is_active: true,
            max_participants: 10,
            current_participants: 0,
            created_at: now,
        };

        assert!(promo.is_live(now));
        assert!(!promo.is_live(now + Duration::hours(2)));

        promo.is_active = false;
        assert!(!promo.is_live(now));
    }
}

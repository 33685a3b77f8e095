use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::HISTORY_PAGE_MAX;

/// Maps a fieldless enum onto the lowercase `TEXT` values stored in postgres.
///
/// Rows decode these through `#[sqlx(try_from = "String")]`, queries bind `as_str()`.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl core::str::FromStr for $name {
            type Err = $crate::db::models::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err($crate::db::models::UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::db::models::UnknownVariant;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

pub mod counter;
pub mod flash_promo;
pub mod game;
pub mod promo;
pub mod reward;
pub mod user;

#[derive(Debug, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

#[inline]
const fn default_offset() -> i64 {
    0
}

#[inline]
const fn default_limit() -> i64 {
    25
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default = "default_offset")]
    pub page: i64,
}

impl Pagination {
    /// `(limit, offset)` with the limit clamped to a sane page size
    pub fn bounds(&self) -> (i64, i64) {
        let limit = self.limit.clamp(1, HISTORY_PAGE_MAX);
        let page = self.page.max(0);
        (limit, page * limit)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            page: default_offset(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub total_items: i64,
    pub total_pages: i64,
    pub page_size: i64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total_items: i64, page_size: i64, page: i64) -> Self {
        let total_pages = (total_items as f64 / page_size.max(1) as f64).ceil() as i64;
        Self {
            items,
            page,
            page_size,
            total_items,
            total_pages,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pagination_bounds_clamp() {
        let p = Pagination {
            limit: 10_000,
            page: 2,
        };
        assert_eq!(p.bounds(), (HISTORY_PAGE_MAX, 2 * HISTORY_PAGE_MAX));

        let p = Pagination { limit: 0, page: -3 };
        assert_eq!(p.bounds(), (1, 0));
    }

    #[test]
    fn test_total_pages_rounds_up() {
        let res = PaginatedResponse::new(vec![1, 2, 3], 51, 25, 0);
        assert_eq!(res.total_pages, 3);
    }
}

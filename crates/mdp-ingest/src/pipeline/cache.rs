//! Advisory reference cache
//!
//! In-memory view of the reference tables (exhibition codes, rating surrogate
//! keys, department surrogate keys), primed once at startup and refreshed
//! incrementally as the batch loader inserts exhibitions. Saves an
//! existence-check round-trip per fact insert; the database foreign keys stay
//! the final authority, so a stale entry can only produce a constraint
//! violation that is handled as a normal rejection.

use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use mdp_common::types::{ExhibitionCode, RatingValue};

#[derive(Debug, Default)]
pub struct ReferenceCache {
    exhibitions: RwLock<HashSet<String>>,
    // rating scale value -> rating_id
    ratings: RwLock<HashMap<i16, i16>>,
    // (title, floor) -> department_id
    departments: RwLock<HashMap<(String, String), i32>>,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-load the current contents of the reference tables.
    pub async fn prime(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        let codes: Vec<(String,)> =
            sqlx::query_as("SELECT exhibition_id FROM exhibition").fetch_all(pool).await?;
        let ratings: Vec<(i16, i16)> =
            sqlx::query_as("SELECT rating, rating_id FROM rating").fetch_all(pool).await?;
        let departments: Vec<(String, String, i32)> =
            sqlx::query_as("SELECT title, floor, department_id FROM department")
                .fetch_all(pool)
                .await?;

        {
            let mut set = self.exhibitions.write().unwrap_or_else(|e| e.into_inner());
            set.clear();
            // CHAR(6) columns come back space-padded from shorter test data
            set.extend(codes.into_iter().map(|(c,)| c.trim_end().to_string()));
        }
        {
            let mut map = self.ratings.write().unwrap_or_else(|e| e.into_inner());
            map.clear();
            map.extend(ratings);
        }
        {
            let mut map = self.departments.write().unwrap_or_else(|e| e.into_inner());
            map.clear();
            map.extend(
                departments
                    .into_iter()
                    .map(|(title, floor, id)| ((title, floor), id)),
            );
        }

        tracing::info!(
            exhibitions = self.exhibition_count(),
            ratings = self.rating_count(),
            departments = self.department_count(),
            "Reference cache primed"
        );

        Ok(())
    }

    pub fn exhibition_exists(&self, code: &ExhibitionCode) -> bool {
        self.exhibitions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(code.as_str())
    }

    pub fn remember_exhibition(&self, code: &ExhibitionCode) {
        self.exhibitions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(code.as_str().to_string());
    }

    pub fn rating_id(&self, rating: RatingValue) -> Option<i16> {
        self.ratings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&rating.value())
            .copied()
    }

    pub fn department_id(&self, title: &str, floor: &str) -> Option<i32> {
        self.departments
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(title.to_string(), floor.to_string()))
            .copied()
    }

    pub fn exhibition_count(&self) -> usize {
        self.exhibitions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn rating_count(&self) -> usize {
        self.ratings.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn department_count(&self) -> usize {
        self.departments
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    #[cfg(test)]
    pub(crate) fn insert_rating(&self, rating: RatingValue, id: i16) {
        self.ratings
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(rating.value(), id);
    }
}

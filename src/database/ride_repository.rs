use crate::database::error::DatabaseError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

/// Named boarding location, offset in minutes from departure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PickupPoint {
    pub name: String,
    pub offset_minutes: i64,
}

/// Ride entity. `seats_available` is only ever mutated by the seat
/// reservation stored procedures, never by application-side writes.
#[derive(Debug, Clone, FromRow)]
pub struct Ride {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub seats_available: i32,
    pub price: BigDecimal,
    pub currency: String,
    pub departure_time: DateTime<Utc>,
    pub pickup_points: serde_json::Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ride {
    pub fn is_cancelled(&self) -> bool {
        self.status == "cancelled"
    }

    pub fn pickup_points(&self) -> Vec<PickupPoint> {
        serde_json::from_value(self.pickup_points.clone()).unwrap_or_default()
    }

    /// Resolve a pickup point by name and compute its boarding time.
    pub fn resolve_pickup(&self, name: &str) -> Option<(PickupPoint, DateTime<Utc>)> {
        let point = self
            .pickup_points()
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))?;
        let pickup_time = self.departure_time + Duration::minutes(point.offset_minutes);
        Some((point, pickup_time))
    }
}

pub struct RideRepository {
    pool: PgPool,
}

impl RideRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Ride>, DatabaseError> {
        sqlx::query_as::<_, Ride>(
            "SELECT id, driver_id, seats_available, price, currency, departure_time,
                    pickup_points, status, created_at, updated_at
             FROM rides WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    fn ride_with_pickups(departure: DateTime<Utc>, points: serde_json::Value) -> Ride {
        Ride {
            id: Uuid::new_v4(),
            driver_id: Uuid::new_v4(),
            seats_available: 4,
            price: BigDecimal::from_str("1000").expect("valid decimal"),
            currency: "XAF".to_string(),
            departure_time: departure,
            pickup_points: points,
            status: "scheduled".to_string(),
            created_at: departure,
            updated_at: departure,
        }
    }

    #[test]
    fn pickup_time_is_departure_plus_offset() {
        let departure = DateTime::parse_from_rfc3339("2026-03-01T08:00:00Z")
            .expect("valid timestamp")
            .with_timezone(&Utc);
        let ride = ride_with_pickups(
            departure,
            json!([
                {"name": "Carrefour Bastos", "offset_minutes": 0},
                {"name": "Rond-point Nlongkak", "offset_minutes": 15},
            ]),
        );

        let (point, pickup_time) = ride
            .resolve_pickup("rond-point nlongkak")
            .expect("known pickup point");
        assert_eq!(point.offset_minutes, 15);
        assert_eq!(
            pickup_time,
            DateTime::parse_from_rfc3339("2026-03-01T08:15:00Z")
                .expect("valid timestamp")
                .with_timezone(&Utc)
        );
    }

    #[test]
    fn unknown_pickup_point_resolves_to_none() {
        let ride = ride_with_pickups(Utc::now(), json!([{"name": "Gare", "offset_minutes": 5}]));
        assert!(ride.resolve_pickup("Aéroport").is_none());
    }

    #[test]
    fn malformed_pickup_points_yield_empty_list() {
        let ride = ride_with_pickups(Utc::now(), json!({"not": "a list"}));
        assert!(ride.pickup_points().is_empty());
    }
}

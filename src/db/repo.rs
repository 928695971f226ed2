//! Simulated user storage.
//!
//! There is no database behind this: records are fabricated from the id with a
//! seeded generator, and every lookup sleeps for a random duration to mimic a
//! slow query.

use std::ops::RangeInclusive;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use fake::Fake;
use fake::faker::internet::raw::FreeEmailProvider;
use fake::faker::name::raw::{FirstName, LastName};
use fake::locales::EN;
use rand::RngExt;
use rand::rng;
use rand_chacha::ChaCha8Rng;
use rand_chacha::rand_core::SeedableRng;
use tracing::debug;

use crate::db::models::User;

/// Fabricated `createdAt` values fall before this instant (2025-01-01T00:00:00Z).
const REFERENCE_EPOCH_SECS: i64 = 1_735_689_600;

/// How far back from the reference instant a record may have been created.
const CREATED_WINDOW_MS: i64 = 10 * 24 * 60 * 60 * 1000;

/// Lookup port used by the RPC layer.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_user(&self, id: u64) -> User;
}

/// Repository that fabricates users after an artificial delay.
#[derive(Debug, Clone)]
pub struct SimulatedUserRepository {
    delay_ms: RangeInclusive<u64>,
}

impl SimulatedUserRepository {
    /// `delay_ms` must be a non-empty range; [`crate::config::Config`] checks this.
    pub fn new(delay_ms: RangeInclusive<u64>) -> Self {
        Self { delay_ms }
    }

    fn next_delay(&self) -> Duration {
        let (min, max) = (*self.delay_ms.start(), *self.delay_ms.end());
        if min >= max {
            return Duration::from_millis(min);
        }
        let mut rng = rng();
        Duration::from_millis(rng.random_range(min..=max))
    }
}

#[async_trait]
impl UserRepository for SimulatedUserRepository {
    async fn get_user(&self, id: u64) -> User {
        let delay = self.next_delay();
        debug!(user_id = id, delay_ms = delay.as_millis() as u64, "simulating slow lookup");
        tokio::time::sleep(delay).await;
        fabricate_user(id)
    }
}

/// Builds the record for `id`. The same id always yields the same record.
pub fn fabricate_user(id: u64) -> User {
    let mut rng = ChaCha8Rng::seed_from_u64(id);

    let first: String = FirstName(EN).fake_with_rng(&mut rng);
    let last: String = LastName(EN).fake_with_rng(&mut rng);
    let provider: String = FreeEmailProvider(EN).fake_with_rng(&mut rng);
    let age_ms: i64 = (0..CREATED_WINDOW_MS).fake_with_rng(&mut rng);

    let email = format!(
        "{}.{}@{}",
        email_local_part(&first),
        email_local_part(&last),
        provider
    );

    User {
        id,
        name: format!("{first} {last}"),
        email,
        created_at: reference_epoch() - TimeDelta::milliseconds(age_ms),
    }
}

fn reference_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(REFERENCE_EPOCH_SECS)
}

fn email_local_part(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

//! Time source.

use chrono::{DateTime, Utc};
use di::{inject, injectable};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

#[injectable(Clock)]
impl SystemClock {
    #[inject]
    pub fn create() -> SystemClock {
        SystemClock
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

use chrono::NaiveDateTime;

/// Injected current-time source. The resolver's "today" cutoff and the hold
/// TTL both read the clock through this trait so they are deterministic in
/// tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Wall-clock local time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Test clock that only moves when told to.
#[cfg(test)]
pub struct ManualClock(std::sync::Mutex<NaiveDateTime>);

#[cfg(test)]
impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self(std::sync::Mutex::new(now))
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.0.lock().unwrap() = now;
    }

    pub fn advance_min(&self, minutes: i64) {
        let mut guard = self.0.lock().unwrap();
        *guard += chrono::Duration::minutes(minutes);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.0.lock().unwrap()
    }
}

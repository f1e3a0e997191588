use chrono::{DateTime, NaiveDate, Utc};

/// Source of "now" for report windows and sample data
pub trait DateProvider: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemDateProvider;

impl DateProvider for SystemDateProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Pins the calendar date and keeps the current wall-clock time of day
pub struct OverrideDateProvider {
    override_date: NaiveDate,
}

impl OverrideDateProvider {
    pub fn new(override_date: NaiveDate) -> Self {
        Self { override_date }
    }
}

impl DateProvider for OverrideDateProvider {
    fn now(&self) -> DateTime<Utc> {
        let time_of_day = Utc::now().time();
        self.override_date.and_time(time_of_day).and_utc()
    }
}

/// Provider for an optional `--override-date`
pub fn date_provider_for(override_date: Option<NaiveDate>) -> Box<dyn DateProvider> {
    match override_date {
        Some(date) => Box::new(OverrideDateProvider::new(date)),
        None => Box::new(SystemDateProvider),
    }
}

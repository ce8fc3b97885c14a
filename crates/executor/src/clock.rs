use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use configuration::MarketConfig;

/// Answers whether the exchange is in its regular session.
///
/// Open Monday to Friday between `open` and `close` (both inclusive) in the
/// exchange's local civil time. There is no holiday calendar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketClock {
    session: Session,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Session {
    Regular {
        timezone: Tz,
        open: NaiveTime,
        close: NaiveTime,
    },
    AlwaysOpen,
}

impl MarketClock {
    pub fn new(timezone: Tz, open: NaiveTime, close: NaiveTime) -> Self {
        Self {
            session: Session::Regular {
                timezone,
                open,
                close,
            },
        }
    }

    /// A clock that reports the market open at every instant.
    pub fn always_open() -> Self {
        Self {
            session: Session::AlwaysOpen,
        }
    }

    pub fn from_config(config: &MarketConfig) -> Self {
        if config.always_open {
            Self::always_open()
        } else {
            Self::new(config.timezone, config.open, config.close)
        }
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        match self.session {
            Session::AlwaysOpen => true,
            Session::Regular {
                timezone,
                open,
                close,
            } => {
                let local = now.with_timezone(&timezone);
                if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
                    return false;
                }
                let time = local.time();
                open <= time && time <= close
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn nyse() -> MarketClock {
        MarketClock::new(
            chrono_tz::America::New_York,
            NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        )
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn session_bounds_are_inclusive() {
        // Monday 2025-03-03, New York on EST (UTC-5)
        let clock = nyse();
        assert!(!clock.is_open(utc(2025, 3, 3, 14, 29, 59)));
        assert!(clock.is_open(utc(2025, 3, 3, 14, 30, 0)));
        assert!(clock.is_open(utc(2025, 3, 3, 21, 0, 0)));
        assert!(!clock.is_open(utc(2025, 3, 3, 21, 0, 1)));
    }

    #[test]
    fn follows_daylight_saving_time() {
        // Monday 2025-07-07, New York on EDT (UTC-4)
        let clock = nyse();
        assert!(!clock.is_open(utc(2025, 7, 7, 13, 29, 0)));
        assert!(clock.is_open(utc(2025, 7, 7, 13, 30, 0)));
        assert!(clock.is_open(utc(2025, 7, 7, 20, 0, 0)));
    }

    #[test]
    fn closed_on_weekends() {
        let clock = nyse();
        // Saturday and Sunday at what would be midday in New York
        assert!(!clock.is_open(utc(2025, 3, 1, 17, 0, 0)));
        assert!(!clock.is_open(utc(2025, 3, 2, 17, 0, 0)));
        // Friday evening UTC is still Friday afternoon in New York
        assert!(clock.is_open(utc(2025, 3, 7, 20, 0, 0)));
    }

    #[test]
    fn always_open_ignores_calendar() {
        let clock = MarketClock::always_open();
        assert!(clock.is_open(utc(2025, 3, 1, 3, 0, 0)));
    }

    #[test]
    fn built_from_config() {
        let config = MarketConfig::default();
        assert_eq!(MarketClock::from_config(&config), nyse());
    }
}

use time::{OffsetDateTime, UtcOffset};

pub trait Timezone {
    fn to_localtime(&self) -> OffsetDateTime;
    fn to_log_string(&self) -> String;
}

impl Timezone for OffsetDateTime {
    fn to_localtime(&self) -> OffsetDateTime {
        // `UtcOffset::current_local_offset` refuses to run in multi-threaded
        // processes on unix, ask chrono for the offset instead
        let tz_offset_sec = chrono::Local::now().offset().local_minus_utc();
        match UtcOffset::from_whole_seconds(tz_offset_sec) {
            Ok(offset) => self.to_offset(offset),
            Err(_) => *self,
        }
    }

    // 2025-06-01 12:34:56.789 (millisecond precision, no offset)
    fn to_log_string(&self) -> String {
        format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}",
            self.year(),
            u8::from(self.month()),
            self.day(),
            self.hour(),
            self.minute(),
            self.second(),
            self.millisecond()
        )
    }
}

pub fn now_local() -> String {
    OffsetDateTime::now_utc().to_localtime().to_log_string()
}

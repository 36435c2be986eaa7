use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub type Timestamp = DateTime<Utc>;

pub fn now() -> Timestamp {
    Utc::now()
}

/// Stored form: RFC 3339 in UTC with a `Z` suffix, so text ordering matches time ordering.
/// Whole seconds only; `parse_ts` refuses anything finer.
pub fn fmt_ts(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_ts(raw: &str) -> Result<Timestamp, String> {
    let t = DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp {:?}: {}", raw, e))?;
    if t.timestamp_subsec_nanos() != 0 {
        return Err(format!("timestamp {:?} must be whole seconds", raw));
    }
    Ok(t)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeWindow {
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self, String> {
        if start > end {
            return Err(format!(
                "start time {} is after end time {}",
                fmt_ts(&start),
                fmt_ts(&end)
            ));
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, String> {
        Self::new(parse_ts(start)?, parse_ts(end)?)
    }

    pub fn contains(&self, other: &TimeWindow) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn union(&self, other: &TimeWindow) -> TimeWindow {
        TimeWindow {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            pub fn parse(raw: &str) -> Result<Self, String> {
                match raw.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(
                        "{} must be one of: {} (got {:?})",
                        stringify!($name),
                        [$($text),+].join(", "),
                        other
                    )),
                }
            }
        }
    };
}

string_enum!(CourseType {
    Content => "content",
    Live => "live",
});

string_enum!(LessonType {
    Online => "online",
    Offline => "offline",
});

string_enum!(LessonStatus {
    NotStarted => "not_started",
    InProgress => "in_progress",
    Completed => "completed",
});

string_enum!(SchedulingStatus {
    Draft => "draft",
    Published => "published",
    Canceled => "canceled",
    Completed => "completed",
});

string_enum!(LinkStatus {
    Active => "active",
    Inactive => "inactive",
});

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub school_id: String,
    pub name: String,
    pub subject: Option<String>,
    pub grade: Option<i64>,
    pub country: Option<String>,
    pub course_type: CourseType,
    pub window: Option<TimeWindow>,
    pub study_plan_id: Option<String>,
    pub teacher_ids: Vec<String>,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: String,
    pub course_id: String,
    pub teacher_id: String,
    pub name: String,
    pub window: TimeWindow,
    pub lesson_type: LessonType,
    pub status: LessonStatus,
    pub scheduling_status: SchedulingStatus,
    pub control_settings: Option<serde_json::Value>,
    pub center_id: Option<String>,
    pub group_id: Option<String>,
    pub topic_id: Option<String>,
    pub schedule_id: Option<String>,
}

impl Lesson {
    /// True when the lesson's name/window live on the topic/schedule pair.
    pub fn has_legacy_triple(&self) -> bool {
        self.topic_id.is_some() && self.schedule_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_rejects_start_after_end() {
        let err = TimeWindow::parse("2024-01-10T02:00:00Z", "2024-01-10T00:00:00Z")
            .expect_err("inverted window");
        assert!(err.contains("after end"));
    }

    #[test]
    fn window_union_and_contains() {
        let a = TimeWindow::parse("2024-01-10T00:00:00Z", "2024-01-10T02:00:00Z").expect("a");
        let b = TimeWindow::parse("2024-01-12T00:00:00Z", "2024-01-15T00:00:00Z").expect("b");
        let u = a.union(&b);
        assert!(u.contains(&a));
        assert!(u.contains(&b));
        assert!(!a.contains(&b));
        assert_eq!(fmt_ts(&u.start), "2024-01-10T00:00:00Z");
        assert_eq!(fmt_ts(&u.end), "2024-01-15T00:00:00Z");
    }

    #[test]
    fn offsets_normalize_to_utc() {
        let t = parse_ts("2024-01-10T09:00:00+09:00").expect("parse");
        assert_eq!(fmt_ts(&t), "2024-01-10T00:00:00Z");
    }

    #[test]
    fn fractional_seconds_are_refused() {
        assert!(parse_ts("2024-01-10T00:00:00.500Z").is_err());
        assert!(TimeWindow::parse("2024-01-10T00:00:00Z", "2024-01-10T02:00:00.001Z").is_err());
        let t = parse_ts("2024-01-10T00:00:00.000Z").expect("zero fraction");
        assert_eq!(fmt_ts(&t), "2024-01-10T00:00:00Z");
    }

    #[test]
    fn enum_parse_is_case_insensitive() {
        assert_eq!(LessonType::parse("Online"), Ok(LessonType::Online));
        assert!(CourseType::parse("hybrid").is_err());
        assert_eq!(SchedulingStatus::Canceled.as_str(), "canceled");
    }
}

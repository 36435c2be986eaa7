//! One logical lesson write, serialized either as a flattened lesson row or as the
//! legacy topic + weekly schedule + lesson triple. The triple is always written as
//! a unit from here.

use crate::flags::SchemaPath;
use crate::model::{Lesson, Timestamp};
use crate::store::legacy::{self, ScheduleWeekly, Topic};
use crate::store::lessons;
use rusqlite::Connection;
use uuid::Uuid;

const TOPIC_TYPE_LIVE_LESSON: &str = "live_lesson";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Strategy {
    Flattened,
    Triple,
}

impl From<SchemaPath> for Strategy {
    fn from(path: SchemaPath) -> Self {
        match path {
            SchemaPath::Current => Strategy::Flattened,
            SchemaPath::Legacy => Strategy::Triple,
        }
    }
}

pub(crate) struct LessonWriteSet {
    pub lesson: Lesson,
    strategy: Strategy,
}

impl LessonWriteSet {
    pub fn new(lesson: Lesson, strategy: Strategy) -> Self {
        Self { lesson, strategy }
    }

    fn write_triple(
        &mut self,
        conn: &Connection,
        study_plan_id: Option<&str>,
        now: &Timestamp,
    ) -> rusqlite::Result<()> {
        let topic = Topic {
            id: Uuid::new_v4().to_string(),
            course_id: self.lesson.course_id.clone(),
            name: self.lesson.name.clone(),
            topic_type: TOPIC_TYPE_LIVE_LESSON.to_string(),
        };
        legacy::insert_topic(conn, &topic, now)?;
        let schedule = ScheduleWeekly {
            id: Uuid::new_v4().to_string(),
            course_id: self.lesson.course_id.clone(),
            study_plan_id: study_plan_id.map(str::to_string),
            topic_id: topic.id.clone(),
            window: self.lesson.window,
        };
        legacy::insert_schedule(conn, &schedule, now)?;
        self.lesson.topic_id = Some(topic.id);
        self.lesson.schedule_id = Some(schedule.id);
        Ok(())
    }

    pub fn insert(
        &mut self,
        conn: &Connection,
        study_plan_id: Option<&str>,
        now: &Timestamp,
    ) -> rusqlite::Result<()> {
        match self.strategy {
            Strategy::Flattened => lessons::insert(conn, &self.lesson, true, now),
            Strategy::Triple => {
                self.write_triple(conn, study_plan_id, now)?;
                lessons::insert(conn, &self.lesson, false, now)
            }
        }
    }

    fn sync_triple(
        &self,
        conn: &Connection,
        topic: &Topic,
        schedule: &ScheduleWeekly,
        now: &Timestamp,
    ) -> rusqlite::Result<()> {
        if topic.name != self.lesson.name {
            legacy::update_topic_name(conn, &topic.id, &self.lesson.name, now)?;
        }
        if schedule.window != self.lesson.window {
            legacy::update_schedule_window(conn, &schedule.id, &self.lesson.window, now)?;
        }
        Ok(())
    }

    /// Writes the lesson over its stored state. `triple` is the re-fetched
    /// topic/schedule pair; it is brought in line under either strategy, and its
    /// rows are touched only when their fields differ.
    pub fn update(
        &mut self,
        conn: &Connection,
        triple: Option<(&Topic, &ScheduleWeekly)>,
        study_plan_id: Option<&str>,
        now: &Timestamp,
    ) -> rusqlite::Result<usize> {
        match (self.strategy, triple) {
            (Strategy::Flattened, Some((topic, schedule))) => {
                self.sync_triple(conn, topic, schedule, now)?;
                lessons::update(conn, &self.lesson, true, now)
            }
            (Strategy::Flattened, None) => lessons::update(conn, &self.lesson, true, now),
            (Strategy::Triple, Some((topic, schedule))) => {
                self.sync_triple(conn, topic, schedule, now)?;
                lessons::update(conn, &self.lesson, false, now)
            }
            // Written by the flattened schema: give it a triple now.
            (Strategy::Triple, None) => {
                self.write_triple(conn, study_plan_id, now)?;
                lessons::update(conn, &self.lesson, false, now)
            }
        }
    }
}

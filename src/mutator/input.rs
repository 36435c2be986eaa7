use crate::error::{OrchestratorError, Result};
use crate::model::{CourseType, LessonStatus, LessonType, SchedulingStatus, TimeWindow};
use serde::Deserialize;
use std::collections::BTreeSet;

fn required(field: &str, value: &str) -> Result<String> {
    let v = value.trim();
    if v.is_empty() {
        return Err(OrchestratorError::invalid(format!("missing {}", field)));
    }
    Ok(v.to_string())
}

fn optional(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Trimmed, de-duplicated, order-preserving id list.
pub(crate) fn clean_ids(ids: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    ids.iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseInput {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub school_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub grade: Option<i64>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub course_type: Option<String>,
    #[serde(default)]
    pub teacher_ids: Vec<String>,
    #[serde(default)]
    pub class_ids: Vec<String>,
}

pub(crate) struct ValidCourse {
    pub id: Option<String>,
    pub school_id: String,
    pub name: String,
    pub subject: Option<String>,
    pub grade: Option<i64>,
    pub country: Option<String>,
    pub course_type: CourseType,
    pub teacher_ids: Vec<String>,
    pub class_ids: Vec<String>,
}

impl CourseInput {
    pub(crate) fn validate(&self) -> Result<ValidCourse> {
        let course_type = match optional(&self.course_type) {
            Some(raw) => CourseType::parse(&raw).map_err(OrchestratorError::InvalidArgument)?,
            None => CourseType::Live,
        };
        if let Some(g) = self.grade {
            if !(0..=16).contains(&g) {
                return Err(OrchestratorError::invalid("grade must be in 0..=16"));
            }
        }
        Ok(ValidCourse {
            id: optional(&self.id),
            school_id: required("school id", &self.school_id)?,
            name: required("course name", &self.name)?,
            subject: optional(&self.subject),
            grade: self.grade,
            country: optional(&self.country),
            course_type,
            teacher_ids: clean_ids(&self.teacher_ids),
            class_ids: clean_ids(&self.class_ids),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonInput {
    /// Set by the sync ingestor to the envelope's natural key; generated otherwise.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub course_id: String,
    #[serde(default)]
    pub teacher_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    #[serde(default)]
    pub lesson_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub scheduling_status: Option<String>,
    #[serde(default)]
    pub control_settings: Option<serde_json::Value>,
    #[serde(default)]
    pub center_id: Option<String>,
    #[serde(default)]
    pub external_group_id: Option<String>,
    #[serde(default)]
    pub student_ids: Vec<String>,
}

pub(crate) struct ValidLesson {
    pub id: Option<String>,
    pub course_id: String,
    pub teacher_id: String,
    pub name: String,
    pub window: TimeWindow,
    pub lesson_type: LessonType,
    pub status: LessonStatus,
    pub scheduling_status: SchedulingStatus,
    pub control_settings: Option<serde_json::Value>,
    pub center_id: Option<String>,
    pub external_group_id: Option<String>,
    pub student_ids: Vec<String>,
}

impl LessonInput {
    pub(crate) fn validate(&self) -> Result<ValidLesson> {
        let course_id = required("course id", &self.course_id)?;
        let teacher_id = required("teacher id", &self.teacher_id)?;
        let name = required("lesson name", &self.name)?;
        let window = TimeWindow::parse(
            &required("start time", &self.start_time)?,
            &required("end time", &self.end_time)?,
        )
        .map_err(OrchestratorError::InvalidArgument)?;
        let lesson_type = match optional(&self.lesson_type) {
            Some(raw) => LessonType::parse(&raw).map_err(OrchestratorError::InvalidArgument)?,
            None => LessonType::Online,
        };
        let status = match optional(&self.status) {
            Some(raw) => LessonStatus::parse(&raw).map_err(OrchestratorError::InvalidArgument)?,
            None => LessonStatus::NotStarted,
        };
        let scheduling_status = match optional(&self.scheduling_status) {
            Some(raw) => SchedulingStatus::parse(&raw).map_err(OrchestratorError::InvalidArgument)?,
            None => SchedulingStatus::Published,
        };
        Ok(ValidLesson {
            id: optional(&self.id),
            course_id,
            teacher_id,
            name,
            window,
            lesson_type,
            status,
            scheduling_status,
            control_settings: self.control_settings.clone().filter(|v| !v.is_null()),
            center_id: optional(&self.center_id),
            external_group_id: optional(&self.external_group_id),
            student_ids: clean_ids(&self.student_ids),
        })
    }
}

/// Fields left as `None` keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonPatch {
    #[serde(default)]
    pub lesson_id: String,
    #[serde(default)]
    pub teacher_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub lesson_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub scheduling_status: Option<String>,
    #[serde(default)]
    pub control_settings: Option<serde_json::Value>,
    #[serde(default)]
    pub center_id: Option<String>,
}

impl LessonPatch {
    /// Builds a patch that sets every field of a full lesson payload.
    pub fn from_input(lesson_id: &str, input: &LessonInput) -> Self {
        Self {
            lesson_id: lesson_id.to_string(),
            teacher_id: Some(input.teacher_id.clone()),
            name: Some(input.name.clone()),
            start_time: Some(input.start_time.clone()),
            end_time: Some(input.end_time.clone()),
            lesson_type: input.lesson_type.clone(),
            status: input.status.clone(),
            scheduling_status: input.scheduling_status.clone(),
            control_settings: input.control_settings.clone(),
            center_id: input.center_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lesson_input_defaults_and_errors() {
        let mut input = LessonInput {
            course_id: "c1".into(),
            teacher_id: "t1".into(),
            name: "Algebra".into(),
            start_time: "2024-01-10T00:00:00Z".into(),
            end_time: "2024-01-10T02:00:00Z".into(),
            student_ids: vec!["a".into(), " a ".into(), "".into(), "b".into()],
            ..Default::default()
        };
        let v = input.validate().expect("valid");
        assert_eq!(v.lesson_type, LessonType::Online);
        assert_eq!(v.student_ids, vec!["a".to_string(), "b".to_string()]);

        input.end_time = "2024-01-09T00:00:00Z".into();
        assert!(matches!(input.validate(), Err(OrchestratorError::InvalidArgument(_))));
        input.end_time = "2024-01-10T02:00:00Z".into();
        input.course_id = "  ".into();
        let err = input.validate().err().expect("missing course");
        assert_eq!(err.to_string(), "missing course id");
    }

    #[test]
    fn course_input_rejects_unknown_type() {
        let input = CourseInput {
            school_id: "s1".into(),
            name: "Math".into(),
            course_type: Some("hybrid".into()),
            ..Default::default()
        };
        assert!(matches!(input.validate(), Err(OrchestratorError::InvalidArgument(_))));
    }
}

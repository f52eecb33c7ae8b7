use serde::{Deserialize, Serialize};

pub type CtfId = i64;
pub type TaskId = i64;
pub type ProfileId = i64;

/// A competitive event. Its title doubles as the Discord category and role name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ctf {
    pub id: CtfId,
    pub title: String,
}

/// A challenge inside a CTF. The title is the channel topic used to find its channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub ctf_id: CtfId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub flag: String,
    #[serde(default)]
    pub pad_url: String,
}

impl Task {
    pub fn is_solved(&self) -> bool {
        !self.flag.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: ProfileId,
    pub username: String,
    #[serde(default)]
    pub discord_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub ctf_id: CtfId,
    pub profile_id: ProfileId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub ctf_id: CtfId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub flag: String,
    #[serde(default)]
    pub pad_url: String,
}

/// Partial task update. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub flag: Option<String>,
}

impl TaskPatch {
    pub fn apply(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(flag) = &self.flag {
            task.flag = flag.clone();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CtfPatch {
    #[serde(default)]
    pub title: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        Task {
            id: 1,
            ctf_id: 7,
            title: "pwn-100".to_string(),
            description: "overflow".to_string(),
            flag: String::new(),
            pad_url: String::new(),
        }
    }

    #[test]
    fn task_patch_only_touches_present_fields() {
        let mut task = sample_task();
        TaskPatch {
            flag: Some("CTF{x}".to_string()),
            ..TaskPatch::default()
        }
        .apply(&mut task);
        assert_eq!(task.title, "pwn-100");
        assert_eq!(task.description, "overflow");
        assert!(task.is_solved());
    }

    #[test]
    fn task_patch_deserializes_graphql_style_keys() {
        let patch: TaskPatch =
            serde_json::from_value(serde_json::json!({"title": "web-200", "flag": null}))
                .expect("patch");
        assert_eq!(patch.title.as_deref(), Some("web-200"));
        assert_eq!(patch.flag, None);
        assert_eq!(patch.description, None);
    }
}

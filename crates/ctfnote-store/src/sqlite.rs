//! SQLite `CtfStore` and `WorkspaceLinks` implementation with durable persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use ctfnote_core::{
    Ctf, CtfId, CtfPatch, CtfStore, Invitation, LinkKind, NewTask, Profile, ProfileId,
    StoreError, StoreResult, Task, TaskId, TaskPatch, WorkspaceLinks,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Persistent store backed by a single SQLite file.
#[derive(Debug)]
pub struct SqliteCtfStore {
    db_path: PathBuf,
}

enum Failure {
    Sql(rusqlite::Error),
    Store(StoreError),
}

impl From<rusqlite::Error> for Failure {
    fn from(error: rusqlite::Error) -> Self {
        Self::Sql(error)
    }
}

impl From<StoreError> for Failure {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}

impl From<Failure> for StoreError {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Sql(error) => StoreError::Backend(error.to_string()),
            Failure::Store(error) => error,
        }
    }
}

type SqlResult<T> = Result<T, Failure>;

const TASK_COLUMNS: &str = "id, ctf_id, title, description, flag, pad_url";

impl SqliteCtfStore {
    /// Opens (or creates) the database at `path` and ensures the schema exists.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|error| {
                StoreError::Backend(format!("failed to create {}: {error}", parent.display()))
            })?;
        }

        let store = Self { db_path };
        store.run(|connection| {
            initialize_schema(connection)?;
            Ok(())
        })?;
        tracing::debug!(path = %store.db_path.display(), "sqlite store ready");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open_connection(&self) -> SqlResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        Ok(connection)
    }

    fn run<T>(&self, operation: impl FnOnce(&mut Connection) -> SqlResult<T>) -> StoreResult<T> {
        let mut connection = self.open_connection()?;
        Ok(operation(&mut connection)?)
    }
}

fn initialize_schema(connection: &Connection) -> SqlResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS ctf (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS task (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ctf_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            flag TEXT NOT NULL DEFAULT '',
            pad_url TEXT NOT NULL DEFAULT '',
            UNIQUE (ctf_id, title),
            FOREIGN KEY(ctf_id) REFERENCES ctf(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS profile (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL,
            discord_id TEXT NULL
        );

        CREATE TABLE IF NOT EXISTS invitation (
            ctf_id INTEGER NOT NULL,
            profile_id INTEGER NOT NULL,
            PRIMARY KEY (ctf_id, profile_id),
            FOREIGN KEY(ctf_id) REFERENCES ctf(id) ON DELETE CASCADE,
            FOREIGN KEY(profile_id) REFERENCES profile(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS work_on_task (
            task_id INTEGER NOT NULL,
            profile_id INTEGER NOT NULL,
            PRIMARY KEY (task_id, profile_id),
            FOREIGN KEY(task_id) REFERENCES task(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS workspace_link (
            kind TEXT NOT NULL,
            entity_id INTEGER NOT NULL,
            object_id TEXT NOT NULL,
            PRIMARY KEY (kind, entity_id)
        );
        "#,
    )?;
    Ok(())
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        ctf_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        flag: row.get(4)?,
        pad_url: row.get(5)?,
    })
}

fn ctf_from_row(row: &Row<'_>) -> rusqlite::Result<Ctf> {
    Ok(Ctf {
        id: row.get(0)?,
        title: row.get(1)?,
    })
}

fn load_task(connection: &Connection, id: TaskId) -> SqlResult<Task> {
    connection
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM task WHERE id = ?1"),
            params![id],
            task_from_row,
        )
        .optional()?
        .ok_or(Failure::Store(StoreError::TaskNotFound(id)))
}

fn load_ctf(connection: &Connection, id: CtfId) -> SqlResult<Ctf> {
    connection
        .query_row(
            "SELECT id, title FROM ctf WHERE id = ?1",
            params![id],
            ctf_from_row,
        )
        .optional()?
        .ok_or(Failure::Store(StoreError::CtfNotFound(id)))
}

fn row_exists(
    connection: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> SqlResult<bool> {
    Ok(connection
        .query_row(sql, params, |row| row.get::<_, i64>(0))
        .optional()?
        .is_some())
}

fn ensure_unique_task_title(
    connection: &Connection,
    ctf_id: CtfId,
    title: &str,
    except: Option<TaskId>,
) -> SqlResult<()> {
    let taken = row_exists(
        connection,
        "SELECT 1 FROM task WHERE ctf_id = ?1 AND title = ?2 AND id != ?3",
        params![ctf_id, title, except.unwrap_or(-1)],
    )?;
    if taken {
        return Err(Failure::Store(StoreError::DuplicateTaskTitle {
            ctf_id,
            title: title.to_string(),
        }));
    }
    Ok(())
}

fn require_title(title: &str) -> SqlResult<()> {
    if title.trim().is_empty() {
        return Err(Failure::Store(StoreError::InvalidInput(
            "title cannot be empty".to_string(),
        )));
    }
    Ok(())
}

#[async_trait]
impl CtfStore for SqliteCtfStore {
    async fn ctf(&self, id: CtfId) -> StoreResult<Ctf> {
        self.run(|connection| load_ctf(connection, id))
    }

    async fn ctf_by_title(&self, title: &str) -> StoreResult<Option<Ctf>> {
        self.run(|connection| {
            Ok(connection
                .query_row(
                    "SELECT id, title FROM ctf WHERE title = ?1",
                    params![title],
                    ctf_from_row,
                )
                .optional()?)
        })
    }

    async fn ctfs(&self) -> StoreResult<Vec<Ctf>> {
        self.run(|connection| {
            let mut statement = connection.prepare("SELECT id, title FROM ctf ORDER BY id")?;
            let rows = statement
                .query_map([], ctf_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    async fn create_ctf(&self, title: &str) -> StoreResult<Ctf> {
        self.run(|connection| {
            require_title(title)?;
            let transaction = connection.transaction()?;
            if row_exists(
                &transaction,
                "SELECT 1 FROM ctf WHERE title = ?1",
                params![title],
            )? {
                return Err(Failure::Store(StoreError::DuplicateCtfTitle(
                    title.to_string(),
                )));
            }
            transaction.execute("INSERT INTO ctf (title) VALUES (?1)", params![title])?;
            let ctf = Ctf {
                id: transaction.last_insert_rowid(),
                title: title.to_string(),
            };
            transaction.commit()?;
            Ok(ctf)
        })
    }

    async fn update_ctf(&self, id: CtfId, patch: &CtfPatch) -> StoreResult<Ctf> {
        self.run(|connection| {
            let transaction = connection.transaction()?;
            let mut ctf = load_ctf(&transaction, id)?;
            if let Some(title) = &patch.title {
                require_title(title)?;
                if row_exists(
                    &transaction,
                    "SELECT 1 FROM ctf WHERE title = ?1 AND id != ?2",
                    params![title, id],
                )? {
                    return Err(Failure::Store(StoreError::DuplicateCtfTitle(title.clone())));
                }
                transaction.execute(
                    "UPDATE ctf SET title = ?1 WHERE id = ?2",
                    params![title, id],
                )?;
                ctf.title = title.clone();
            }
            transaction.commit()?;
            Ok(ctf)
        })
    }

    async fn task(&self, id: TaskId) -> StoreResult<Task> {
        self.run(|connection| load_task(connection, id))
    }

    async fn tasks_for_ctf(&self, ctf_id: CtfId) -> StoreResult<Vec<Task>> {
        self.run(|connection| {
            let mut statement = connection.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM task WHERE ctf_id = ?1 ORDER BY id"
            ))?;
            let rows = statement
                .query_map(params![ctf_id], task_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    async fn create_task(&self, task: NewTask) -> StoreResult<Task> {
        self.run(|connection| {
            require_title(&task.title)?;
            let transaction = connection.transaction()?;
            load_ctf(&transaction, task.ctf_id)?;
            ensure_unique_task_title(&transaction, task.ctf_id, &task.title, None)?;
            transaction.execute(
                r#"
                INSERT INTO task (ctf_id, title, description, flag, pad_url)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    task.ctf_id,
                    task.title,
                    task.description,
                    task.flag,
                    task.pad_url
                ],
            )?;
            let created = Task {
                id: transaction.last_insert_rowid(),
                ctf_id: task.ctf_id,
                title: task.title,
                description: task.description,
                flag: task.flag,
                pad_url: task.pad_url,
            };
            transaction.commit()?;
            Ok(created)
        })
    }

    async fn update_task(&self, id: TaskId, patch: &TaskPatch) -> StoreResult<Task> {
        self.run(|connection| {
            let transaction = connection.transaction()?;
            let mut task = load_task(&transaction, id)?;
            if let Some(title) = &patch.title {
                require_title(title)?;
                ensure_unique_task_title(&transaction, task.ctf_id, title, Some(id))?;
            }
            patch.apply(&mut task);
            transaction.execute(
                "UPDATE task SET title = ?1, description = ?2, flag = ?3 WHERE id = ?4",
                params![task.title, task.description, task.flag, id],
            )?;
            transaction.commit()?;
            Ok(task)
        })
    }

    async fn delete_task(&self, id: TaskId) -> StoreResult<Task> {
        self.run(|connection| {
            let transaction = connection.transaction()?;
            let task = load_task(&transaction, id)?;
            transaction.execute("DELETE FROM task WHERE id = ?1", params![id])?;
            transaction.commit()?;
            Ok(task)
        })
    }

    async fn profile(&self, id: ProfileId) -> StoreResult<Profile> {
        self.run(|connection| {
            connection
                .query_row(
                    "SELECT id, username, discord_id FROM profile WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok(Profile {
                            id: row.get(0)?,
                            username: row.get(1)?,
                            discord_id: row.get(2)?,
                        })
                    },
                )
                .optional()?
                .ok_or(Failure::Store(StoreError::ProfileNotFound(id)))
        })
    }

    async fn create_profile(
        &self,
        username: &str,
        discord_id: Option<&str>,
    ) -> StoreResult<Profile> {
        self.run(|connection| {
            if username.trim().is_empty() {
                return Err(Failure::Store(StoreError::InvalidInput(
                    "username cannot be empty".to_string(),
                )));
            }
            connection.execute(
                "INSERT INTO profile (username, discord_id) VALUES (?1, ?2)",
                params![username, discord_id],
            )?;
            Ok(Profile {
                id: connection.last_insert_rowid(),
                username: username.to_string(),
                discord_id: discord_id.map(str::to_string),
            })
        })
    }

    async fn create_invitation(&self, invitation: Invitation) -> StoreResult<Invitation> {
        self.run(|connection| {
            let transaction = connection.transaction()?;
            load_ctf(&transaction, invitation.ctf_id)?;
            if !row_exists(
                &transaction,
                "SELECT 1 FROM profile WHERE id = ?1",
                params![invitation.profile_id],
            )? {
                return Err(Failure::Store(StoreError::ProfileNotFound(
                    invitation.profile_id,
                )));
            }
            transaction.execute(
                "INSERT OR IGNORE INTO invitation (ctf_id, profile_id) VALUES (?1, ?2)",
                params![invitation.ctf_id, invitation.profile_id],
            )?;
            transaction.commit()?;
            Ok(invitation)
        })
    }

    async fn delete_invitation(&self, invitation: Invitation) -> StoreResult<Invitation> {
        self.run(|connection| {
            let deleted = connection.execute(
                "DELETE FROM invitation WHERE ctf_id = ?1 AND profile_id = ?2",
                params![invitation.ctf_id, invitation.profile_id],
            )?;
            if deleted == 0 {
                return Err(Failure::Store(StoreError::InvitationNotFound {
                    ctf_id: invitation.ctf_id,
                    profile_id: invitation.profile_id,
                }));
            }
            Ok(invitation)
        })
    }

    async fn invitations_for_ctf(&self, ctf_id: CtfId) -> StoreResult<Vec<Invitation>> {
        self.run(|connection| {
            let mut statement = connection.prepare(
                "SELECT ctf_id, profile_id FROM invitation WHERE ctf_id = ?1 ORDER BY profile_id",
            )?;
            let rows = statement
                .query_map(params![ctf_id], |row| {
                    Ok(Invitation {
                        ctf_id: row.get(0)?,
                        profile_id: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    async fn start_working_on(&self, task_id: TaskId, profile_id: ProfileId) -> StoreResult<()> {
        self.run(|connection| {
            load_task(connection, task_id)?;
            connection.execute(
                "INSERT OR IGNORE INTO work_on_task (task_id, profile_id) VALUES (?1, ?2)",
                params![task_id, profile_id],
            )?;
            Ok(())
        })
    }

    async fn stop_working_on(&self, task_id: TaskId, profile_id: ProfileId) -> StoreResult<()> {
        self.run(|connection| {
            load_task(connection, task_id)?;
            connection.execute(
                "DELETE FROM work_on_task WHERE task_id = ?1 AND profile_id = ?2",
                params![task_id, profile_id],
            )?;
            Ok(())
        })
    }

    async fn working_on(&self, task_id: TaskId) -> StoreResult<Vec<ProfileId>> {
        self.run(|connection| {
            let mut statement = connection.prepare(
                "SELECT profile_id FROM work_on_task WHERE task_id = ?1 ORDER BY profile_id",
            )?;
            let rows = statement
                .query_map(params![task_id], |row| row.get::<_, i64>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }
}

#[async_trait]
impl WorkspaceLinks for SqliteCtfStore {
    async fn link(&self, kind: LinkKind, entity_id: i64) -> StoreResult<Option<String>> {
        self.run(|connection| {
            Ok(connection
                .query_row(
                    "SELECT object_id FROM workspace_link WHERE kind = ?1 AND entity_id = ?2",
                    params![kind.as_str(), entity_id],
                    |row| row.get::<_, String>(0),
                )
                .optional()?)
        })
    }

    async fn set_link(&self, kind: LinkKind, entity_id: i64, object_id: &str) -> StoreResult<()> {
        self.run(|connection| {
            connection.execute(
                r#"
                INSERT INTO workspace_link (kind, entity_id, object_id) VALUES (?1, ?2, ?3)
                ON CONFLICT (kind, entity_id) DO UPDATE SET object_id = excluded.object_id
                "#,
                params![kind.as_str(), entity_id, object_id],
            )?;
            Ok(())
        })
    }

    async fn clear_link(&self, kind: LinkKind, entity_id: i64) -> StoreResult<()> {
        self.run(|connection| {
            connection.execute(
                "DELETE FROM workspace_link WHERE kind = ?1 AND entity_id = ?2",
                params![kind.as_str(), entity_id],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteCtfStore;
    use ctfnote_core::{
        CtfPatch, CtfStore, Invitation, LinkKind, NewTask, StoreError, TaskPatch, WorkspaceLinks,
    };
    use tempfile::tempdir;

    fn new_task(ctf_id: i64, title: &str) -> NewTask {
        NewTask {
            ctf_id,
            title: title.to_string(),
            description: "desc".to_string(),
            flag: String::new(),
            pad_url: String::new(),
        }
    }

    #[tokio::test]
    async fn persists_rows_and_links_across_reopen() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("state").join("ctfnote.sqlite");

        let (ctf_id, task_id) = {
            let store = SqliteCtfStore::new(&path).expect("store");
            let ctf = store.create_ctf("Google CTF").await.expect("ctf");
            let task = store
                .create_task(new_task(ctf.id, "crypto-1"))
                .await
                .expect("task");
            store
                .set_link(LinkKind::TaskChannel, task.id, "998877")
                .await
                .expect("link");
            (ctf.id, task.id)
        };

        let reopened = SqliteCtfStore::new(&path).expect("reopen");
        let task = reopened.task(task_id).await.expect("task");
        assert_eq!(task.ctf_id, ctf_id);
        assert_eq!(task.title, "crypto-1");
        assert_eq!(
            reopened
                .link(LinkKind::TaskChannel, task_id)
                .await
                .expect("link"),
            Some("998877".to_string())
        );
    }

    #[tokio::test]
    async fn set_link_overwrites_previous_object() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteCtfStore::new(temp.path().join("db.sqlite")).expect("store");
        store
            .set_link(LinkKind::CtfRole, 1, "a")
            .await
            .expect("first");
        store
            .set_link(LinkKind::CtfRole, 1, "b")
            .await
            .expect("second");
        assert_eq!(
            store.link(LinkKind::CtfRole, 1).await.expect("link"),
            Some("b".to_string())
        );
        store.clear_link(LinkKind::CtfRole, 1).await.expect("clear");
        assert_eq!(store.link(LinkKind::CtfRole, 1).await.expect("link"), None);
    }

    #[tokio::test]
    async fn update_and_delete_task_enforce_existence_and_uniqueness() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteCtfStore::new(temp.path().join("db.sqlite")).expect("store");
        let ctf = store.create_ctf("ctf").await.expect("ctf");
        let a = store.create_task(new_task(ctf.id, "a")).await.expect("a");
        store.create_task(new_task(ctf.id, "b")).await.expect("b");

        let solved = store
            .update_task(
                a.id,
                &TaskPatch {
                    flag: Some("FLAG{ok}".to_string()),
                    ..TaskPatch::default()
                },
            )
            .await
            .expect("solve");
        assert!(solved.is_solved());
        assert_eq!(solved.description, "desc");

        let collision = store
            .update_task(
                a.id,
                &TaskPatch {
                    title: Some("b".to_string()),
                    ..TaskPatch::default()
                },
            )
            .await
            .expect_err("collision");
        assert!(matches!(collision, StoreError::DuplicateTaskTitle { .. }));

        let deleted = store.delete_task(a.id).await.expect("delete");
        assert_eq!(deleted.title, "a");
        assert!(store.task(a.id).await.expect_err("gone").is_not_found());
    }

    #[tokio::test]
    async fn ctf_rename_and_invitations() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteCtfStore::new(temp.path().join("db.sqlite")).expect("store");
        let ctf = store.create_ctf("old").await.expect("ctf");
        let renamed = store
            .update_ctf(
                ctf.id,
                &CtfPatch {
                    title: Some("new".to_string()),
                },
            )
            .await
            .expect("rename");
        assert_eq!(renamed.title, "new");
        assert_eq!(
            store.ctf_by_title("new").await.expect("lookup").map(|c| c.id),
            Some(ctf.id)
        );

        let profile = store.create_profile("bob", None).await.expect("profile");
        let invitation = Invitation {
            ctf_id: ctf.id,
            profile_id: profile.id,
        };
        store.create_invitation(invitation).await.expect("invite");
        assert_eq!(
            store.invitations_for_ctf(ctf.id).await.expect("list").len(),
            1
        );
        store.delete_invitation(invitation).await.expect("uninvite");
        assert!(store
            .delete_invitation(invitation)
            .await
            .expect_err("missing")
            .is_not_found());
    }

    #[tokio::test]
    async fn working_on_markers_follow_task_lifetime() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteCtfStore::new(temp.path().join("db.sqlite")).expect("store");
        let ctf = store.create_ctf("ctf").await.expect("ctf");
        let task = store.create_task(new_task(ctf.id, "a")).await.expect("a");
        let profile = store.create_profile("carol", None).await.expect("profile");

        store
            .start_working_on(task.id, profile.id)
            .await
            .expect("start");
        assert_eq!(
            store.working_on(task.id).await.expect("list"),
            vec![profile.id]
        );
        store
            .stop_working_on(task.id, profile.id)
            .await
            .expect("stop");
        assert!(store.working_on(task.id).await.expect("list").is_empty());
        assert!(store
            .start_working_on(999, profile.id)
            .await
            .expect_err("no task")
            .is_not_found());
    }
}

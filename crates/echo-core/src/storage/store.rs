use crate::errors::EchoError;
use crate::model::{new_id, Dataset, Experiment, TargetAgent, TestCase};
use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Sqlite-backed dataset, agent and history store.
///
/// Datasets are stored as whole documents: every write replaces the previous
/// version (last write wins, no optimistic locking).
#[derive(Clone)]
pub struct Store {
    pub conn: Arc<Mutex<Connection>>,
}

pub struct StoreStats {
    pub agents: u64,
    pub datasets: u64,
    pub experiments: u64,
    pub last_experiment_at: Option<String>,
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("failed to open sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(crate::storage::schema::DDL)?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("store connection lock poisoned"))
    }

    // agents

    pub fn put_agent(&self, agent: &TargetAgent) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO agents(id, kind, agent_json, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                kind=excluded.kind,
                agent_json=excluded.agent_json,
                updated_at=excluded.updated_at",
            params![
                agent.id,
                agent.kind.as_str(),
                serde_json::to_string(agent)?,
                now_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn get_agent(&self, id: &str) -> anyhow::Result<Option<TargetAgent>> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT agent_json FROM agents WHERE id=?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        raw.map(|s| serde_json::from_str(&s).context("corrupt agent row"))
            .transpose()
    }

    pub fn list_agents(&self) -> anyhow::Result<Vec<TargetAgent>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT agent_json FROM agents ORDER BY id")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(serde_json::from_str(&r?).context("corrupt agent row")?);
        }
        Ok(out)
    }

    pub fn delete_agent(&self, id: &str) -> anyhow::Result<bool> {
        let conn = self.lock()?;
        let n = conn.execute("DELETE FROM agents WHERE id=?1", params![id])?;
        Ok(n > 0)
    }

    // datasets

    /// Inserts a new dataset, assigning ids to the dataset and to any case without one.
    pub fn add_dataset(&self, mut dataset: Dataset) -> anyhow::Result<Dataset> {
        if dataset.id.is_empty() {
            dataset.id = new_id();
        }
        assign_case_ids(&mut dataset.test_cases);
        check_unique_case_ids(&dataset)?;

        let conn = self.lock()?;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM datasets WHERE id=?1",
                params![dataset.id],
                |r| r.get(0),
            )
            .optional()?;
        if exists.is_some() {
            anyhow::bail!("dataset '{}' already exists", dataset.id);
        }
        write_dataset(&conn, &dataset)?;
        Ok(dataset)
    }

    pub fn get_dataset(&self, id: &str) -> anyhow::Result<Option<Dataset>> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT dataset_json FROM datasets WHERE id=?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        raw.map(|s| serde_json::from_str(&s).context("corrupt dataset row"))
            .transpose()
    }

    pub fn dataset_exists(&self, id: &str) -> anyhow::Result<bool> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM datasets WHERE id=?1", params![id], |r| {
                r.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    /// Replaces the stored dataset with the same id. The caller supplies the full document.
    pub fn update_dataset(&self, dataset: &Dataset) -> anyhow::Result<()> {
        let mut dataset = dataset.clone();
        assign_case_ids(&mut dataset.test_cases);
        check_unique_case_ids(&dataset)?;

        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE datasets SET name=?2, target_agent_id=?3, dataset_json=?4, updated_at=?5
             WHERE id=?1",
            params![
                dataset.id,
                dataset.name,
                dataset.target_agent_id,
                serde_json::to_string(&dataset)?,
                now_rfc3339()
            ],
        )?;
        if n == 0 {
            return Err(EchoError::DatasetNotFound(dataset.id.clone()).into());
        }
        Ok(())
    }

    /// Insert-or-replace, used when importing datasets from a config file.
    pub fn save_dataset(&self, dataset: &Dataset) -> anyhow::Result<Dataset> {
        if !dataset.id.is_empty() && self.dataset_exists(&dataset.id)? {
            self.update_dataset(dataset)?;
            return self
                .get_dataset(&dataset.id)?
                .ok_or_else(|| EchoError::DatasetNotFound(dataset.id.clone()).into());
        }
        self.add_dataset(dataset.clone())
    }

    pub fn delete_dataset(&self, id: &str) -> anyhow::Result<bool> {
        let conn = self.lock()?;
        let n = conn.execute("DELETE FROM datasets WHERE id=?1", params![id])?;
        Ok(n > 0)
    }

    pub fn list_datasets(&self) -> anyhow::Result<Vec<Dataset>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT dataset_json FROM datasets ORDER BY name, id")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(serde_json::from_str(&r?).context("corrupt dataset row")?);
        }
        Ok(out)
    }

    // test cases (read-modify-replace of the owning dataset)

    pub fn add_case(&self, dataset_id: &str, mut case: TestCase) -> anyhow::Result<TestCase> {
        let mut ds = self.require_dataset(dataset_id)?;
        if case.id.is_empty() {
            case.id = new_id();
        }
        ds.test_cases.push(case.clone());
        self.update_dataset(&ds)?;
        Ok(case)
    }

    pub fn update_case(&self, dataset_id: &str, case: &TestCase) -> anyhow::Result<()> {
        let mut ds = self.require_dataset(dataset_id)?;
        let slot = ds
            .test_cases
            .iter_mut()
            .find(|c| c.id == case.id)
            .ok_or_else(|| {
                anyhow::anyhow!("test case '{}' not found in '{}'", case.id, dataset_id)
            })?;
        *slot = case.clone();
        self.update_dataset(&ds)
    }

    pub fn delete_case(&self, dataset_id: &str, case_id: &str) -> anyhow::Result<bool> {
        let mut ds = self.require_dataset(dataset_id)?;
        let before = ds.test_cases.len();
        ds.test_cases.retain(|c| c.id != case_id);
        if ds.test_cases.len() == before {
            return Ok(false);
        }
        self.update_dataset(&ds)?;
        Ok(true)
    }

    fn require_dataset(&self, id: &str) -> anyhow::Result<Dataset> {
        self.get_dataset(id)?
            .ok_or_else(|| EchoError::DatasetNotFound(id.to_string()).into())
    }

    // history

    pub fn append_history(&self, exp: &Experiment) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO experiments(
                id, dataset_id, status, started_at, completed_at, passed, total, experiment_json
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                exp.id,
                exp.dataset_id,
                exp.status.as_str(),
                exp.started_at.to_rfc3339(),
                exp.completed_at.map(|t| t.to_rfc3339()),
                exp.passed_count() as i64,
                exp.total_cases as i64,
                serde_json::to_string(exp)?
            ],
        )
        .with_context(|| format!("failed to append experiment {} to history", exp.id))?;
        Ok(())
    }

    /// Most recent first.
    pub fn history(&self, limit: u32) -> anyhow::Result<Vec<Experiment>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT experiment_json FROM experiments ORDER BY seq DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(serde_json::from_str(&r?).context("corrupt experiment row")?);
        }
        Ok(out)
    }

    pub fn get_experiment(&self, id: &str) -> anyhow::Result<Option<Experiment>> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT experiment_json FROM experiments WHERE id=?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        raw.map(|s| serde_json::from_str(&s).context("corrupt experiment row"))
            .transpose()
    }

    pub fn stats(&self) -> anyhow::Result<StoreStats> {
        let conn = self.lock()?;
        let count = |table: &str| -> anyhow::Result<u64> {
            let n: i64 = conn.query_row(&format!("SELECT count(*) FROM {}", table), [], |r| {
                r.get(0)
            })?;
            Ok(n as u64)
        };
        let last_experiment_at: Option<String> = conn
            .query_row(
                "SELECT started_at FROM experiments ORDER BY seq DESC LIMIT 1",
                [],
                |r| r.get(0),
            )
            .optional()?;
        Ok(StoreStats {
            agents: count("agents")?,
            datasets: count("datasets")?,
            experiments: count("experiments")?,
            last_experiment_at,
        })
    }
}

fn write_dataset(conn: &Connection, dataset: &Dataset) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO datasets(id, name, target_agent_id, dataset_json, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            dataset.id,
            dataset.name,
            dataset.target_agent_id,
            serde_json::to_string(dataset)?,
            now_rfc3339()
        ],
    )?;
    Ok(())
}

fn assign_case_ids(cases: &mut [TestCase]) {
    for c in cases.iter_mut().filter(|c| c.id.is_empty()) {
        c.id = new_id();
    }
}

fn check_unique_case_ids(dataset: &Dataset) -> anyhow::Result<()> {
    let mut seen = HashSet::new();
    for c in &dataset.test_cases {
        if !seen.insert(c.id.as_str()) {
            anyhow::bail!("dataset '{}' has duplicate test case id '{}'", dataset.id, c.id);
        }
    }
    Ok(())
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

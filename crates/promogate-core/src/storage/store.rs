use super::Repository;
use crate::model::{
    CheckKey, CheckRunState, CheckStatus, ConstraintState, Metadata, Pin, PromotionStatus, Veto,
};
use crate::stages::StageDescriptor;
use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct Store {
    pub conn: Arc<Mutex<Connection>>,
}

/// A job accepted by the in-process task backend.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: String,
    pub application: String,
    pub environment: String,
    pub description: String,
    pub correlation_id: Option<String>,
    pub subject: String,
    pub stages: Vec<StageDescriptor>,
    pub submitted_by: String,
    pub submitted_at: DateTime<Utc>,
    pub canceled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VetoRecord {
    pub veto: Veto,
    pub vetoed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PinRecord {
    pub pin: Pin,
    pub pinned_at: DateTime<Utc>,
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("failed to open sqlite db")?;
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
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(super::schema::DDL)
            .context("failed to create schema")?;
        Ok(())
    }

    // --- pins ---

    pub fn remove_pin(
        &self,
        delivery_config: &str,
        environment: &str,
        reference: &str,
    ) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM pins WHERE delivery_config=?1 AND environment=?2 AND reference=?3",
            params![delivery_config, environment, reference],
        )?;
        Ok(n > 0)
    }

    pub fn get_pin(
        &self,
        delivery_config: &str,
        environment: &str,
        reference: &str,
    ) -> anyhow::Result<Option<PinRecord>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, String, Option<String>, String)> = conn
            .query_row(
                "SELECT version, pinned_by, comment, pinned_at FROM pins
                 WHERE delivery_config=?1 AND environment=?2 AND reference=?3",
                params![delivery_config, environment, reference],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?;
        row.map(|(version, pinned_by, comment, pinned_at)| {
            Ok(PinRecord {
                pin: Pin {
                    environment: environment.to_string(),
                    reference: reference.to_string(),
                    version,
                    comment: comment.unwrap_or_default(),
                    pinned_by,
                },
                pinned_at: parse_ts(&pinned_at)?,
            })
        })
        .transpose()
    }

    // --- vetoes ---

    pub fn list_vetoes(&self, delivery_config: &str) -> anyhow::Result<Vec<VetoRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT environment, reference, version, vetoed_by, comment, vetoed_at
             FROM vetoes WHERE delivery_config=?1
             ORDER BY vetoed_at ASC, environment ASC, version ASC",
        )?;
        let rows = stmt
            .query_map(params![delivery_config], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, Option<String>>(4)?,
                    r.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::new();
        for (environment, reference, version, vetoed_by, comment, vetoed_at) in rows {
            out.push(VetoRecord {
                veto: Veto {
                    environment,
                    reference,
                    version,
                    vetoed_by,
                    comment: comment.unwrap_or_default(),
                },
                vetoed_at: parse_ts(&vetoed_at)?,
            });
        }
        Ok(out)
    }

    pub fn is_vetoed(
        &self,
        delivery_config: &str,
        environment: &str,
        reference: &str,
        version: &str,
    ) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM vetoes
             WHERE delivery_config=?1 AND environment=?2 AND reference=?3 AND version=?4",
            params![delivery_config, environment, reference, version],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    // --- state listings for status views ---

    pub fn list_check_states(
        &self,
        delivery_config: &str,
    ) -> anyhow::Result<Vec<(CheckKey, CheckRunState)>> {
        let keys: Vec<CheckKey> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT environment, artifact_reference, version, check_id FROM check_states
                 WHERE delivery_config=?1
                 ORDER BY environment, artifact_reference, version, check_id",
            )?;
            let rows = stmt.query_map(params![delivery_config], |r| {
                Ok(CheckKey {
                    delivery_config: delivery_config.to_string(),
                    environment: r.get(0)?,
                    artifact_reference: r.get(1)?,
                    version: r.get(2)?,
                    check_id: r.get(3)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut out = Vec::new();
        for key in keys {
            if let Some(state) = self.get_check_state(&key)? {
                out.push((key, state));
            }
        }
        Ok(out)
    }

    pub fn list_constraint_states(
        &self,
        delivery_config: &str,
    ) -> anyhow::Result<Vec<ConstraintState>> {
        let keys: Vec<CheckKey> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT environment, artifact_reference, version, constraint_type FROM constraint_states
                 WHERE delivery_config=?1
                 ORDER BY environment, artifact_reference, version, constraint_type",
            )?;
            let rows = stmt.query_map(params![delivery_config], |r| {
                Ok(CheckKey {
                    delivery_config: delivery_config.to_string(),
                    environment: r.get(0)?,
                    artifact_reference: r.get(1)?,
                    version: r.get(2)?,
                    check_id: r.get(3)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut out = Vec::new();
        for key in keys {
            if let Some(state) = self.get_constraint_state(&key)? {
                out.push(state);
            }
        }
        Ok(out)
    }

    // --- tasks (local backend) ---

    /// Stores a new job and returns its generated id.
    pub fn insert_task(&self, task: &TaskRecord) -> anyhow::Result<String> {
        let conn = self.conn.lock().unwrap();
        let next: i64 = conn.query_row("SELECT COUNT(*) + 1 FROM tasks", [], |r| r.get(0))?;
        let id = format!("local-{:08}", next);
        conn.execute(
            "INSERT INTO tasks(id, application, environment, description, correlation_id, subject,
                               stages_json, submitted_by, submitted_at, canceled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL)",
            params![
                id,
                task.application,
                task.environment,
                task.description,
                task.correlation_id,
                task.subject,
                serde_json::to_string(&task.stages)?,
                task.submitted_by,
                ts(&task.submitted_at),
            ],
        )
        .context("insert task")?;
        Ok(id)
    }

    pub fn get_task(&self, id: &str) -> anyhow::Result<Option<TaskRecord>> {
        let rows = self.query_tasks("WHERE id = ?1", params![id])?;
        Ok(rows.into_iter().next())
    }

    pub fn list_tasks(&self, application: &str, limit: usize) -> anyhow::Result<Vec<TaskRecord>> {
        let limit = limit as i64;
        self.query_tasks(
            "WHERE application = ?1 ORDER BY submitted_at DESC, id DESC LIMIT ?2",
            params![application, limit],
        )
    }

    pub fn tasks_with_correlation(&self, correlation_id: &str) -> anyhow::Result<Vec<TaskRecord>> {
        self.query_tasks(
            "WHERE correlation_id = ?1 ORDER BY submitted_at DESC, id DESC",
            params![correlation_id],
        )
    }

    pub fn cancel_task(&self, id: &str, at: DateTime<Utc>) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE tasks SET canceled_at = ?2 WHERE id = ?1 AND canceled_at IS NULL",
            params![id, ts(&at)],
        )?;
        Ok(n > 0)
    }

    fn query_tasks(
        &self,
        clause: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> anyhow::Result<Vec<TaskRecord>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT id, application, environment, description, correlation_id, subject,
                    stages_json, submitted_by, submitted_at, canceled_at
             FROM tasks {}",
            clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let raw = stmt
            .query_map(args, |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, Option<String>>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, String>(6)?,
                    r.get::<_, String>(7)?,
                    r.get::<_, String>(8)?,
                    r.get::<_, Option<String>>(9)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::with_capacity(raw.len());
        for (
            id,
            application,
            environment,
            description,
            correlation_id,
            subject,
            stages_json,
            submitted_by,
            submitted_at,
            canceled_at,
        ) in raw
        {
            out.push(TaskRecord {
                id,
                application,
                environment,
                description,
                correlation_id,
                subject,
                stages: serde_json::from_str(&stages_json).context("decode task stages")?,
                submitted_by,
                submitted_at: parse_ts(&submitted_at)?,
                canceled_at: canceled_at.as_deref().map(parse_ts).transpose()?,
            });
        }
        Ok(out)
    }

    pub fn count_rows(&self, table: &str) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        // Validation to prevent SQL injection (simple allowlist)
        if ![
            "check_states",
            "constraint_states",
            "pins",
            "vetoes",
            "promotions",
            "tasks",
        ]
        .contains(&table)
        {
            anyhow::bail!("Invalid table name for count_rows: {}", table);
        }
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let n: i64 = conn.query_row(&sql, [], |r| r.get(0))?;
        Ok(n)
    }
}

impl Repository for Store {
    fn get_pinned_version(
        &self,
        delivery_config: &str,
        environment: &str,
        reference: &str,
    ) -> anyhow::Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let v: Option<String> = conn
            .query_row(
                "SELECT version FROM pins WHERE delivery_config=?1 AND environment=?2 AND reference=?3",
                params![delivery_config, environment, reference],
                |r| r.get(0),
            )
            .optional()?;
        Ok(v.filter(|s| !s.is_empty()))
    }

    fn get_version_by_promotion_status(
        &self,
        delivery_config: &str,
        environment: &str,
        reference: &str,
        status: PromotionStatus,
    ) -> anyhow::Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let v = conn
            .query_row(
                "SELECT version FROM promotions
                 WHERE delivery_config=?1 AND environment=?2 AND reference=?3 AND status=?4
                 ORDER BY seq DESC LIMIT 1",
                params![delivery_config, environment, reference, status.as_str()],
                |r| r.get(0),
            )
            .optional()?;
        Ok(v)
    }

    fn set_promotion_status(
        &self,
        delivery_config: &str,
        environment: &str,
        reference: &str,
        version: &str,
        status: PromotionStatus,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO promotions(delivery_config, environment, reference, version, status, seq, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, (SELECT COALESCE(MAX(seq), 0) + 1 FROM promotions), ?6)
             ON CONFLICT(delivery_config, environment, reference, version)
             DO UPDATE SET status=excluded.status, seq=excluded.seq, updated_at=excluded.updated_at",
            params![
                delivery_config,
                environment,
                reference,
                version,
                status.as_str(),
                ts(&Utc::now())
            ],
        )?;
        Ok(())
    }

    fn get_promotion_status(
        &self,
        delivery_config: &str,
        environment: &str,
        reference: &str,
        version: &str,
    ) -> anyhow::Result<Option<PromotionStatus>> {
        let conn = self.conn.lock().unwrap();
        let raw: Option<String> = conn
            .query_row(
                "SELECT status FROM promotions
                 WHERE delivery_config=?1 AND environment=?2 AND reference=?3 AND version=?4",
                params![delivery_config, environment, reference, version],
                |r| r.get(0),
            )
            .optional()?;
        raw.map(|s| {
            PromotionStatus::parse(&s)
                .ok_or_else(|| anyhow::anyhow!("unknown promotion status in store: {}", s))
        })
        .transpose()
    }

    fn latest_approved_version(
        &self,
        delivery_config: &str,
        environment: &str,
        reference: &str,
    ) -> anyhow::Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let v = conn
            .query_row(
                "SELECT p.version FROM promotions p
                 WHERE p.delivery_config=?1 AND p.environment=?2 AND p.reference=?3
                   AND p.status IN ('APPROVED', 'DEPLOYING', 'CURRENT')
                   AND NOT EXISTS (
                     SELECT 1 FROM vetoes v
                     WHERE v.delivery_config=p.delivery_config AND v.environment=p.environment
                       AND v.reference=p.reference AND v.version=p.version
                   )
                 ORDER BY p.seq DESC LIMIT 1",
                params![delivery_config, environment, reference],
                |r| r.get(0),
            )
            .optional()?;
        Ok(v)
    }

    fn apply_veto(&self, delivery_config: &str, veto: &Veto) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO vetoes(delivery_config, environment, reference, version, vetoed_by, comment, vetoed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(delivery_config, environment, reference, version)
             DO UPDATE SET vetoed_by=excluded.vetoed_by, comment=excluded.comment, vetoed_at=excluded.vetoed_at",
            params![
                delivery_config,
                veto.environment,
                veto.reference,
                veto.version,
                veto.vetoed_by,
                veto.comment,
                ts(&Utc::now())
            ],
        )
        .context("apply veto")?;
        // a recorded version keeps its place in the ordering
        conn.execute(
            "UPDATE promotions SET status='VETOED', updated_at=?5
             WHERE delivery_config=?1 AND environment=?2 AND reference=?3 AND version=?4",
            params![
                delivery_config,
                veto.environment,
                veto.reference,
                veto.version,
                ts(&Utc::now())
            ],
        )
        .context("mark promotion vetoed")?;
        Ok(())
    }

    fn apply_pin(&self, delivery_config: &str, pin: &Pin) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO pins(delivery_config, environment, reference, version, pinned_by, comment, pinned_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(delivery_config, environment, reference)
             DO UPDATE SET version=excluded.version, pinned_by=excluded.pinned_by,
                           comment=excluded.comment, pinned_at=excluded.pinned_at",
            params![
                delivery_config,
                pin.environment,
                pin.reference,
                pin.version,
                pin.pinned_by,
                pin.comment,
                ts(&Utc::now())
            ],
        )
        .context("apply pin")?;
        Ok(())
    }

    fn get_constraint_state(&self, key: &CheckKey) -> anyhow::Result<Option<ConstraintState>> {
        let conn = self.conn.lock().unwrap();
        type Row = (
            String,
            String,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
        );
        let row: Option<Row> = conn
            .query_row(
                "SELECT status, created_at, judged_at, judged_by, comment, attributes_json
                 FROM constraint_states
                 WHERE delivery_config=?1 AND environment=?2 AND artifact_reference=?3
                   AND version=?4 AND constraint_type=?5",
                params![
                    key.delivery_config,
                    key.environment,
                    key.artifact_reference,
                    key.version,
                    key.check_id
                ],
                |r| {
                    Ok((
                        r.get(0)?,
                        r.get(1)?,
                        r.get(2)?,
                        r.get(3)?,
                        r.get(4)?,
                        r.get(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((status, created_at, judged_at, judged_by, comment, attributes)) = row else {
            return Ok(None);
        };

        Ok(Some(ConstraintState {
            key: key.clone(),
            status: parse_status(&status)?,
            created_at: parse_ts(&created_at)?,
            judged_at: judged_at.as_deref().map(parse_ts).transpose()?,
            judged_by,
            comment,
            attributes: attributes
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .context("decode constraint attributes")?,
        }))
    }

    fn store_constraint_state(&self, state: &ConstraintState) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        let key = &state.key;
        let attributes = state
            .attributes
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        // created_at is fixed by the first write
        conn.execute(
            "INSERT INTO constraint_states(delivery_config, environment, artifact_reference, version,
                                           constraint_type, status, created_at, judged_at, judged_by,
                                           comment, attributes_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(delivery_config, environment, artifact_reference, version, constraint_type)
             DO UPDATE SET status=excluded.status, judged_at=excluded.judged_at,
                           judged_by=excluded.judged_by, comment=excluded.comment,
                           attributes_json=excluded.attributes_json",
            params![
                key.delivery_config,
                key.environment,
                key.artifact_reference,
                key.version,
                key.check_id,
                state.status.as_str(),
                ts(&state.created_at),
                state.judged_at.as_ref().map(ts),
                state.judged_by,
                state.comment,
                attributes,
            ],
        )
        .context("store constraint state")?;
        Ok(())
    }

    fn get_check_state(&self, key: &CheckKey) -> anyhow::Result<Option<CheckRunState>> {
        let conn = self.conn.lock().unwrap();
        type Row = (String, String, Option<String>, Option<String>, String);
        let row: Option<Row> = conn
            .query_row(
                "SELECT status, started_at, ended_at, link, metadata_json
                 FROM check_states
                 WHERE delivery_config=?1 AND environment=?2 AND artifact_reference=?3
                   AND version=?4 AND check_id=?5",
                params![
                    key.delivery_config,
                    key.environment,
                    key.artifact_reference,
                    key.version,
                    key.check_id
                ],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .optional()?;

        let Some((status, started_at, ended_at, link, metadata)) = row else {
            return Ok(None);
        };

        let metadata: Metadata =
            serde_json::from_str(&metadata).context("decode check metadata")?;
        Ok(Some(CheckRunState {
            status: parse_status(&status)?,
            started_at: parse_ts(&started_at)?,
            ended_at: ended_at.as_deref().map(parse_ts).transpose()?,
            link,
            metadata,
        }))
    }

    fn store_check_state(&self, key: &CheckKey, state: &CheckRunState) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO check_states(delivery_config, environment, artifact_reference, version, check_id,
                                      status, started_at, ended_at, link, metadata_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(delivery_config, environment, artifact_reference, version, check_id)
             DO UPDATE SET status=excluded.status, started_at=excluded.started_at,
                           ended_at=excluded.ended_at, link=excluded.link,
                           metadata_json=excluded.metadata_json, updated_at=excluded.updated_at",
            params![
                key.delivery_config,
                key.environment,
                key.artifact_reference,
                key.version,
                key.check_id,
                state.status.as_str(),
                ts(&state.started_at),
                state.ended_at.as_ref().map(ts),
                state.link,
                serde_json::to_string(&state.metadata)?,
                ts(&Utc::now()),
            ],
        )
        .context("store check state")?;
        Ok(())
    }
}

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("bad timestamp in store: {}", s))?
        .with_timezone(&Utc))
}

fn parse_status(s: &str) -> anyhow::Result<CheckStatus> {
    CheckStatus::parse(s).ok_or_else(|| anyhow::anyhow!("unknown check status in store: {}", s))
}

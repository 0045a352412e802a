use std::collections::{BTreeMap, HashMap};

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::metrics::RunMetrics;
use crate::record::PredictionRecord;

/// Durable state of a run: the prediction table plus, per sequence, the
/// number of rows written when the sequence completed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Checkpoint {
    pub records: Vec<PredictionRecord>,
    pub completed: BTreeMap<String, usize>,
}

impl Checkpoint {
    pub fn rows_for(&self, sequence_id: &str) -> usize {
        self.records
            .iter()
            .filter(|r| r.sequence_id == sequence_id)
            .count()
    }

    /// True when `sequence_id` was marked complete with `expected_frames` rows
    /// and exactly that many rows are present.
    pub fn is_complete(&self, sequence_id: &str, expected_frames: usize) -> bool {
        self.completed.get(sequence_id) == Some(&expected_frames)
            && self.rows_for(sequence_id) == expected_frames
    }

    /// Append the rows of one fully scored sequence.
    pub fn push_sequence(&mut self, sequence_id: &str, rows: Vec<PredictionRecord>) {
        self.completed.insert(sequence_id.to_string(), rows.len());
        self.records.extend(rows);
    }

    /// Drop every row and the completion marker of `sequence_id`.
    pub fn discard_sequence(&mut self, sequence_id: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.sequence_id != sequence_id);
        self.completed.remove(sequence_id);
        before - self.records.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Run-keyed store for prediction tables and metrics summaries.
pub trait PredictionStore {
    fn load_checkpoint(&mut self, run_id: &str) -> Result<Option<Checkpoint>>;

    /// Overwrite the stored table of `run_id` with `checkpoint`.
    fn save_checkpoint(&mut self, run_id: &str, checkpoint: &Checkpoint) -> Result<()>;

    fn save_metrics(&mut self, run_id: &str, metrics: &RunMetrics) -> Result<()>;

    fn load_metrics(&mut self, run_id: &str) -> Result<Option<RunMetrics>>;
}

pub struct SqlitePredictionStore {
    conn: Connection,
}

impl SqlitePredictionStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS predictions (
              run_id TEXT NOT NULL,
              row_index INTEGER NOT NULL,
              sequence_id TEXT NOT NULL,
              image TEXT NOT NULL,
              sequence_label INTEGER NOT NULL,
              ground_truth_boxes TEXT NOT NULL,
              image_label INTEGER NOT NULL,
              prediction INTEGER NOT NULL,
              confidence REAL NOT NULL,
              timedelta TEXT NOT NULL,
              PRIMARY KEY (run_id, row_index)
            );

            CREATE TABLE IF NOT EXISTS completed_sequences (
              run_id TEXT NOT NULL,
              sequence_id TEXT NOT NULL,
              frame_count INTEGER NOT NULL,
              PRIMARY KEY (run_id, sequence_id)
            );

            CREATE TABLE IF NOT EXISTS run_metrics (
              run_id TEXT PRIMARY KEY,
              created_at INTEGER NOT NULL,
              metrics_json TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn read_records(&self, run_id: &str) -> Result<Vec<PredictionRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT sequence_id, image, sequence_label, ground_truth_boxes,
                   image_label, prediction, confidence, timedelta
            FROM predictions WHERE run_id = ?1 ORDER BY row_index ASC
            "#,
        )?;
        let mut rows = stmt.query(params![run_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let boxes_json: String = row.get(3)?;
            let confidence: f64 = row.get(6)?;
            out.push(PredictionRecord {
                sequence_id: row.get(0)?,
                image: row.get(1)?,
                sequence_label: row.get(2)?,
                ground_truth_boxes: serde_json::from_str(&boxes_json)
                    .map_err(|e| anyhow!("corrupt prediction row: ground_truth_boxes: {}", e))?,
                image_label: row.get(4)?,
                prediction: row.get(5)?,
                confidence: confidence as f32,
                timedelta: row.get(7)?,
            });
        }
        Ok(out)
    }

    fn read_completed(&self, run_id: &str) -> Result<BTreeMap<String, usize>> {
        let mut stmt = self.conn.prepare(
            "SELECT sequence_id, frame_count FROM completed_sequences WHERE run_id = ?1",
        )?;
        let mut rows = stmt.query(params![run_id])?;
        let mut out = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let frame_count: i64 = row.get(1)?;
            let frame_count = usize::try_from(frame_count)
                .map_err(|_| anyhow!("corrupt completion marker: negative frame count"))?;
            let sequence_id: String = row.get(0)?;
            out.insert(sequence_id, frame_count);
        }
        Ok(out)
    }
}

impl PredictionStore for SqlitePredictionStore {
    fn load_checkpoint(&mut self, run_id: &str) -> Result<Option<Checkpoint>> {
        let records = self.read_records(run_id)?;
        let completed = self.read_completed(run_id)?;
        if records.is_empty() && completed.is_empty() {
            return Ok(None);
        }
        Ok(Some(Checkpoint { records, completed }))
    }

    fn save_checkpoint(&mut self, run_id: &str, checkpoint: &Checkpoint) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM predictions WHERE run_id = ?1", params![run_id])?;
        tx.execute(
            "DELETE FROM completed_sequences WHERE run_id = ?1",
            params![run_id],
        )?;
        {
            let mut insert = tx.prepare(
                r#"
                INSERT INTO predictions(run_id, row_index, sequence_id, image, sequence_label,
                  ground_truth_boxes, image_label, prediction, confidence, timedelta)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )?;
            for (idx, record) in checkpoint.records.iter().enumerate() {
                let boxes_json = serde_json::to_string(&record.ground_truth_boxes)?;
                insert.execute(params![
                    run_id,
                    idx as i64,
                    record.sequence_id,
                    record.image,
                    record.sequence_label,
                    boxes_json,
                    record.image_label,
                    record.prediction,
                    record.confidence as f64,
                    record.timedelta,
                ])?;
            }

            let mut mark = tx.prepare(
                "INSERT INTO completed_sequences(run_id, sequence_id, frame_count) VALUES (?1, ?2, ?3)",
            )?;
            for (sequence_id, frame_count) in &checkpoint.completed {
                mark.execute(params![run_id, sequence_id, *frame_count as i64])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn save_metrics(&mut self, run_id: &str, metrics: &RunMetrics) -> Result<()> {
        let metrics_json = serde_json::to_string(metrics)?;
        self.conn.execute(
            r#"
            INSERT INTO run_metrics(run_id, created_at, metrics_json) VALUES (?1, ?2, ?3)
            ON CONFLICT(run_id) DO UPDATE SET
              created_at = excluded.created_at,
              metrics_json = excluded.metrics_json
            "#,
            params![run_id, chrono::Utc::now().timestamp(), metrics_json],
        )?;
        Ok(())
    }

    fn load_metrics(&mut self, run_id: &str) -> Result<Option<RunMetrics>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT metrics_json FROM run_metrics WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryPredictionStore {
    checkpoints: HashMap<String, Checkpoint>,
    metrics: HashMap<String, RunMetrics>,
}

impl InMemoryPredictionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PredictionStore for InMemoryPredictionStore {
    fn load_checkpoint(&mut self, run_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.checkpoints.get(run_id).cloned())
    }

    fn save_checkpoint(&mut self, run_id: &str, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints
            .insert(run_id.to_string(), checkpoint.clone());
        Ok(())
    }

    fn save_metrics(&mut self, run_id: &str, metrics: &RunMetrics) -> Result<()> {
        self.metrics.insert(run_id.to_string(), metrics.clone());
        Ok(())
    }

    fn load_metrics(&mut self, run_id: &str) -> Result<Option<RunMetrics>> {
        Ok(self.metrics.get(run_id).cloned())
    }
}

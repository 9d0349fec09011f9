//! Chunked, concurrent insertion of pending rows.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::core::{Row, RowKey, TableHandle};
use crate::error::{ErrorKind, MigrateError, Result};
use crate::store::{extract_key, RowSink};

/// A row that could not be inserted.
#[derive(Debug, Clone, Serialize)]
pub struct RowFailure {
    /// Identity key, or `None` when the row had no usable key.
    pub key: Option<RowKey>,
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome of one chunk.
#[derive(Debug, Clone, Default)]
pub struct ChunkResult {
    /// Position of the chunk within the pending set.
    pub index: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: Vec<RowFailure>,
}

/// Splits pending rows into chunks and inserts them with bounded concurrency.
pub struct BatchMigrator {
    target: Arc<dyn RowSink>,
    chunk_size: usize,
    max_concurrent_chunks: usize,
}

impl BatchMigrator {
    /// Zero sizes are raised to 1.
    pub fn new(target: Arc<dyn RowSink>, chunk_size: usize, max_concurrent_chunks: usize) -> Self {
        Self {
            target,
            chunk_size: chunk_size.max(1),
            max_concurrent_chunks: max_concurrent_chunks.max(1),
        }
    }

    /// Insert every row, returning one result per chunk in chunk order.
    ///
    /// Row failures never abort the batch; they are recorded in the owning
    /// chunk's result.
    pub async fn migrate(&self, table: &TableHandle, rows: Vec<Row>) -> Result<Vec<ChunkResult>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let table = Arc::new(table.clone());
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_chunks));
        let mut handles = Vec::new();

        let mut remaining = rows.into_iter().peekable();
        let mut index = 0;
        while remaining.peek().is_some() {
            let chunk: Vec<Row> = remaining.by_ref().take(self.chunk_size).collect();

            // Keys are taken up front so a panicked task can still be
            // reported row by row.
            let keys: Vec<Option<RowKey>> = chunk
                .iter()
                .map(|row| extract_key(&table, row).ok())
                .collect();

            let permit = semaphore.clone().acquire_owned().await.map_err(|e| {
                MigrateError::transfer(&table.name, format!("worker pool closed: {}", e))
            })?;

            let target = self.target.clone();
            let table_clone = table.clone();
            let handle = tokio::spawn(async move {
                let result = insert_chunk(target.as_ref(), &table_clone, index, chunk).await;
                drop(permit);
                result
            });

            handles.push((index, keys, handle));
            index += 1;
        }

        let mut results = Vec::with_capacity(handles.len());
        for (index, keys, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!("{}: chunk {} task panicked - {}", table.name, index, e);
                    let message = format!("Task panicked: {}", e);
                    results.push(ChunkResult {
                        index,
                        attempted: keys.len(),
                        succeeded: 0,
                        failed: keys
                            .into_iter()
                            .map(|key| RowFailure {
                                key,
                                kind: ErrorKind::Transfer,
                                message: message.clone(),
                            })
                            .collect(),
                    });
                }
            }
        }

        Ok(results)
    }
}

async fn insert_chunk(target: &dyn RowSink, table: &TableHandle, index: usize, rows: Vec<Row>) -> ChunkResult {
    let mut result = ChunkResult {
        index,
        attempted: rows.len(),
        ..Default::default()
    };

    for row in &rows {
        match target.insert(table, row).await {
            Ok(_) => result.succeeded += 1,
            Err(e) => {
                let key = extract_key(table, row).ok();
                warn!(
                    "{}: insert of {} failed: {}",
                    table.name,
                    key.as_ref().map_or_else(|| "<no key>".to_string(), |k| k.to_string()),
                    e
                );
                result.failed.push(RowFailure {
                    key,
                    kind: e.kind(),
                    message: e.to_string(),
                });
            }
        }
    }

    debug!(
        "{}: chunk {} done ({}/{} inserted)",
        table.name, index, result.succeeded, result.attempted
    );
    result
}

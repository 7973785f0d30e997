//! In-memory session that records statements and replays scripted rows

use super::{Row, Session, Statement};
use async_trait::async_trait;
use std::collections::VecDeque;

/// Test double for [`Session`]
///
/// Every statement is recorded. `fetch_all` pops the next scripted result
/// (empty when the script runs out); `execute` pops the next scripted error
/// if one was queued with [`RecordingSession::fail_next_execute`].
#[derive(Debug, Default)]
pub struct RecordingSession {
    pub statements: Vec<Statement>,
    pub commits: usize,
    results: VecDeque<Vec<Row>>,
    execute_errors: VecDeque<String>,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the rows returned by the next `fetch_all`
    pub fn push_result(&mut self, rows: Vec<Row>) -> &mut Self {
        self.results.push_back(rows);
        self
    }

    /// Make the next `execute` fail with a protocol error
    pub fn fail_next_execute(&mut self, message: &str) -> &mut Self {
        self.execute_errors.push_back(message.to_string());
        self
    }

    /// SQL text of every recorded statement
    pub fn sql(&self) -> Vec<&str> {
        self.statements.iter().map(|s| s.sql()).collect()
    }

    pub fn last(&self) -> &Statement {
        self.statements.last().expect("no statement recorded")
    }
}

#[async_trait]
impl Session for RecordingSession {
    async fn execute(&mut self, statement: &Statement) -> Result<u64, sqlx::Error> {
        self.statements.push(statement.clone());
        match self.execute_errors.pop_front() {
            Some(message) => Err(sqlx::Error::Protocol(message)),
            None => Ok(0),
        }
    }

    async fn fetch_all(&mut self, statement: &Statement) -> Result<Vec<Row>, sqlx::Error> {
        self.statements.push(statement.clone());
        Ok(self.results.pop_front().unwrap_or_default())
    }

    async fn commit(&mut self) -> Result<(), sqlx::Error> {
        self.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), sqlx::Error> {
        Ok(())
    }
}

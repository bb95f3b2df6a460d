//! Scripted in-memory executor for tests
//!
//! Responses and failures are matched by SQL substring. When several
//! responses are queued for one pattern they are consumed in order and the
//! last one repeats.

use crate::context::OpContext;
use crate::db::executor::Executor;
use crate::db::query::{Record, Statement};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

type ErrorFactory = Box<dyn Fn() -> Error + Send + Sync>;

#[derive(Default)]
struct Inner {
    responses: Vec<(String, VecDeque<Vec<Record>>)>,
    failures: Vec<(String, ErrorFactory)>,
    statements: Vec<Statement>,
    writes: Vec<Statement>,
}

#[derive(Default)]
pub struct FakeExecutor {
    inner: Mutex<Inner>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue rows for queries containing `pattern`
    pub fn respond(&self, pattern: &str, rows: Vec<Record>) {
        let mut inner = self.inner.lock().unwrap();
        match inner.responses.iter_mut().find(|(p, _)| p == pattern) {
            Some((_, queue)) => queue.push_back(rows),
            None => inner
                .responses
                .push((pattern.to_string(), VecDeque::from(vec![rows]))),
        }
    }

    /// Fail every statement containing `pattern`
    pub fn fail(&self, pattern: &str, make: impl Fn() -> Error + Send + Sync + 'static) {
        let mut inner = self.inner.lock().unwrap();
        inner.failures.push((pattern.to_string(), Box::new(make)));
    }

    /// Every statement seen, queries included
    pub fn statements(&self) -> Vec<Statement> {
        self.inner.lock().unwrap().statements.clone()
    }

    /// SQL text of statements sent through `execute`
    pub fn writes(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .writes
            .iter()
            .map(|s| s.sql.clone())
            .collect()
    }

    fn check_failure(inner: &Inner, stmt: &Statement) -> Result<()> {
        for (pattern, make) in &inner.failures {
            if stmt.sql.contains(pattern.as_str()) {
                return Err(make());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn execute(&self, ctx: &OpContext, stmt: &Statement) -> Result<u64> {
        if ctx.is_cancelled() {
            return Err(Error::Transient("operation cancelled".to_string()));
        }
        let mut inner = self.inner.lock().unwrap();
        inner.statements.push(stmt.clone());
        Self::check_failure(&inner, stmt)?;
        inner.writes.push(stmt.clone());
        Ok(0)
    }

    async fn query(&self, ctx: &OpContext, stmt: &Statement) -> Result<Vec<Record>> {
        if ctx.is_cancelled() {
            return Err(Error::Transient("operation cancelled".to_string()));
        }
        let mut inner = self.inner.lock().unwrap();
        inner.statements.push(stmt.clone());
        Self::check_failure(&inner, stmt)?;
        for (pattern, queue) in inner.responses.iter_mut() {
            if stmt.sql.contains(pattern.as_str()) {
                let rows = if queue.len() > 1 {
                    queue.pop_front().unwrap_or_default()
                } else {
                    queue.front().cloned().unwrap_or_default()
                };
                return Ok(rows);
            }
        }
        Ok(Vec::new())
    }
}

//! Statements sent to the backend and the rows they return

use crate::error::{Error, Result};

/// A bound parameter (`@P1`, `@P2`, ...)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Param {
    Str(String),
    Int(i64),
}

/// A T-SQL statement plus its bound parameters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
    /// The SQL text inlines a secret and must not be logged
    pub sensitive: bool,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            sensitive: false,
        }
    }

    pub fn bind_str(mut self, value: impl Into<String>) -> Self {
        self.params.push(Param::Str(value.into()));
        self
    }

    pub fn bind_int(mut self, value: i64) -> Self {
        self.params.push(Param::Int(value));
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// SQL text safe to put in a log line
    pub fn loggable(&self) -> &str {
        if self.sensitive {
            "<redacted>"
        } else {
            &self.sql
        }
    }
}

impl std::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.loggable())
    }
}

/// Represents a cell value in a result row
#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    String(String),
    Binary(Vec<u8>),
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Null => write!(f, "NULL"),
            CellValue::Bool(v) => write!(f, "{}", if *v { "true" } else { "false" }),
            CellValue::Int(v) => write!(f, "{}", v),
            CellValue::String(v) => write!(f, "{}", v),
            CellValue::Binary(v) => write!(f, "0x{}", hex::encode(v)),
        }
    }
}

/// One result row, addressed by column position
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    pub values: Vec<CellValue>,
}

impl Record {
    pub fn new(values: Vec<CellValue>) -> Self {
        Self { values }
    }

    fn cell(&self, index: usize) -> Result<&CellValue> {
        self.values
            .get(index)
            .ok_or_else(|| Error::unknown(format!("result row has no column {}", index)))
    }

    pub fn get_i64(&self, index: usize) -> Result<i64> {
        match self.cell(index)? {
            CellValue::Int(v) => Ok(*v),
            CellValue::Bool(v) => Ok(i64::from(*v)),
            CellValue::Null => Ok(0),
            other => Err(Error::unknown(format!("column {} is not an integer: {}", index, other))),
        }
    }

    pub fn get_bool(&self, index: usize) -> Result<bool> {
        match self.cell(index)? {
            CellValue::Bool(v) => Ok(*v),
            CellValue::Int(v) => Ok(*v != 0),
            CellValue::Null => Ok(false),
            other => Err(Error::unknown(format!("column {} is not a bit: {}", index, other))),
        }
    }

    /// String column, verbatim; NULL reads as empty
    pub fn get_string(&self, index: usize) -> Result<String> {
        match self.cell(index)? {
            CellValue::String(v) => Ok(v.clone()),
            CellValue::Null => Ok(String::new()),
            CellValue::Binary(_) => Err(Error::unknown(format!("column {} is binary", index))),
            other => Ok(other.to_string()),
        }
    }

    /// Fixed-width `char(n)` code column such as a principal type; blank padding is dropped
    pub fn get_code(&self, index: usize) -> Result<String> {
        Ok(self.get_string(index)?.trim_end().to_string())
    }

    pub fn get_opt_string(&self, index: usize) -> Result<Option<String>> {
        let value = self.get_string(index)?;
        Ok(if value.is_empty() { None } else { Some(value) })
    }
}

// Helper for hex encoding binary data
mod hex {
    pub fn encode(data: &[u8]) -> String {
        data.iter().map(|b| format!("{:02X}", b)).collect()
    }
}

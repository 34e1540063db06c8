//! CSV bulk import.
//!
//! The upload is a sequence of blocks. A block opens with a marker row
//! `-,<rule name>` and continues with `DD/MM/YYYY,<value>` rows:
//!
//! ```text
//! -,Weight
//! 01/01/2020,80
//! 02/01/2020,79
//! -,Steps
//! 01/01/2020,5000
//! ```
//!
//! [`ImportPlan`] turns the rows into [`ImportStep`]s in the order they must
//! hit storage: the entries buffered for a rule are flushed right before the
//! next rule starts, and once more at the end of input. Nothing is rolled back
//! when a later row fails.

use std::io::Read;
use std::mem;

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter, Trim};

use crate::proto::Error as ServiceError;
use crate::proto::TickEntryValue;

pub const RULE_MARKER: &str = "-";
pub const DATE_FORMAT: &str = "%d/%m/%Y";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImportStep {
    /// Create a daily rule with this name, it receives the following flushes.
    StartRule(String),
    /// Insert these entries under the current rule in one write.
    Flush(Vec<TickEntryValue>),
}

enum Row {
    Marker(String),
    Entry(TickEntryValue),
}

pub struct ImportPlan<R> {
    records: StringRecordsIntoIter<R>,
    pending: Vec<TickEntryValue>,
    queued: Option<ImportStep>,
    has_rule: bool,
    done: bool,
}

impl<R: Read> ImportPlan<R> {
    pub fn new(input: R) -> Self {
        let records = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(input)
            .into_records();

        ImportPlan {
            records,
            pending: Vec::new(),
            queued: None,
            has_rule: false,
            done: false,
        }
    }

    fn flush(&mut self) -> Option<ImportStep> {
        if self.pending.is_empty() {
            None
        } else {
            Some(ImportStep::Flush(mem::take(&mut self.pending)))
        }
    }

    fn parse_row(&self, record: &StringRecord) -> Result<Row, ServiceError> {
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let invalid = |hint: String| ServiceError::InvalidCsvRow { line, hint };

        if record.len() < 2 {
            return Err(invalid(format!(
                "expected at least 2 fields, found {}",
                record.len()
            )));
        }

        if &record[0] == RULE_MARKER {
            let name = &record[1];
            if name.is_empty() {
                return Err(invalid("rule marker without a name".into()));
            }
            return Ok(Row::Marker(name.to_owned()));
        }

        if !self.has_rule {
            return Err(invalid("entry before any rule marker".into()));
        }

        let date = NaiveDate::parse_from_str(&record[0], DATE_FORMAT)
            .map_err(|e| invalid(format!("invalid date {:?}: {}", &record[0], e)))?;
        let value = record[1]
            .parse::<i64>()
            .map_err(|e| invalid(format!("invalid value {:?}: {}", &record[1], e)))?;

        Ok(Row::Entry(TickEntryValue {
            when: date.and_time(chrono::NaiveTime::MIN).and_utc(),
            value,
        }))
    }
}

impl<R: Read> Iterator for ImportPlan<R> {
    type Item = Result<ImportStep, ServiceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(step) = self.queued.take() {
            return Some(Ok(step));
        }

        if self.done {
            return None;
        }

        loop {
            let record = match self.records.next() {
                Some(Ok(record)) => record,
                Some(Err(e)) => {
                    self.done = true;
                    let line = e.position().map(|p| p.line()).unwrap_or(0);
                    return Some(Err(ServiceError::InvalidCsvRow {
                        line,
                        hint: e.to_string(),
                    }));
                }
                None => {
                    self.done = true;
                    return self.flush().map(Ok);
                }
            };

            match self.parse_row(&record) {
                Ok(Row::Entry(entry)) => self.pending.push(entry),
                Ok(Row::Marker(name)) => {
                    self.has_rule = true;
                    let start = ImportStep::StartRule(name);
                    return match self.flush() {
                        Some(flush) => {
                            self.queued = Some(start);
                            Some(Ok(flush))
                        }
                        None => Some(Ok(start)),
                    };
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

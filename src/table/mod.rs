//! Tabular output of a workbook: named columns and rows of text.

pub mod projection;

use serde::Serialize;

/// Table projected from one sheet.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Table {
    /// Name of the source sheet
    pub name: String,
    /// Column names, in position order; not necessarily unique
    pub columns: Vec<String>,
    /// Data rows; each has exactly `columns.len()` values
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Returns true if the table has neither columns nor rows.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.rows.is_empty()
    }

    /// Looks up the position of a column by name; the first match wins.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }
}

/// Tables of a workbook in sheet order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Dataset {
    pub tables: Vec<Table>,
}

impl Dataset {
    /// Adds a table; empty tables are left out.
    pub(crate) fn push(&mut self, table: Table) {
        if table.is_empty() {
            log::debug!("Omit empty table '{}'", table.name);
        } else {
            self.tables.push(table);
        }
    }

    /// Looks up a table by its sheet name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|table| table.name == name)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

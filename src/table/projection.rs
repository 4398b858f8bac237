//! Sheet to table projection.
//!
//! The column span is fixed once from the first populated row. With a header,
//! that row names the columns (one per present cell) and data starts on the
//! next row; without one, the columns are named `Column1`, `Column2`, ... and
//! data starts on the first populated row itself.
//!
//! Each data row is read from its own first present cell up to the end of the
//! span and written from position 0, so a row that starts further right is
//! shifted left. A value that lands beyond the last column is rejected.

use crate::error::Error;
use crate::spreadsheet::sheet::Row;
use crate::spreadsheet::sheet::Sheet;
use crate::table::Table;

/// Projects a sheet onto a table of text values.
pub fn project(sheet: &Sheet, header: bool) -> Result<Table, Error> {
    let mut table = Table {
        name: sheet.name().to_owned(),
        ..Table::default()
    };
    let (Some(first_row), Some(last_row)) = (sheet.first_row_num(), sheet.last_row_num()) else {
        log::debug!("Sheet '{}' has no rows", sheet.name());
        return Ok(table);
    };
    let Some(head) = sheet.row(first_row) else {
        return Ok(table);
    };

    let first_cell = head.first_cell_num();
    let span_end = head.last_cell_num();
    let start = if header {
        table.columns = (first_cell..span_end)
            .filter_map(|col| head.cell(col))
            .map(|cell| cell.text())
            .collect();
        first_row + 1
    } else {
        table.columns = (1..=span_end - first_cell)
            .map(|position| format!("Column{position}"))
            .collect();
        first_row
    };

    for index in start..=last_row {
        match sheet.row(index) {
            Some(row) => table.rows.push(project_row(sheet, &row, span_end, table.columns.len())?),
            None => log::trace!("Skip absent row {} of sheet '{}'", index + 1, sheet.name()),
        }
    }

    log::debug!(
        "Projected sheet '{}' onto {} column(s) and {} row(s)",
        sheet.name(),
        table.columns.len(),
        table.rows.len()
    );
    Ok(table)
}

/// Builds one data row of `width` values, aligned on the row's first present cell.
fn project_row(sheet: &Sheet, row: &Row<'_>, span_end: usize, width: usize) -> Result<Vec<String>, Error> {
    let mut values = vec![String::new(); width];
    let offset = row.first_cell_num();
    for cell in row.cells().iter().take_while(|cell| cell.col() < span_end) {
        let position = cell.col() - offset;
        match values.get_mut(position) {
            Some(value) => *value = cell.text(),
            None => {
                return Err(Error::MalformedSheet {
                    sheet: sheet.name().to_owned(),
                    reference: cell.reference(),
                    width,
                })
            }
        }
    }
    Ok(values)
}

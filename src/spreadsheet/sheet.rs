use crate::spreadsheet::cell::Cell;

/// One decoded worksheet: a sparse grid of present cells.
///
/// Cells are kept in a single row-major vector; `rows` indexes the populated
/// rows into that vector. A row exists only if at least one of its cells does,
/// so an absent row and an absent cell are both `None` at the API surface.
#[derive(Clone, Debug, Default)]
pub struct Sheet {
    /// Sheet name
    pub(crate) name: String,
    /// All present cells, sorted by (row, col) after `finish`
    cells: Vec<Cell>,
    /// Populated rows:
    /// 1. row index
    /// 2. cells lower index
    /// 3. cells upper index
    rows: Vec<(usize, usize, usize)>,
}

/// Borrowed view of one populated row.
#[derive(Clone, Copy, Debug)]
pub struct Row<'a> {
    index: usize,
    cells: &'a [Cell],
}

impl Sheet {
    /// Creates an empty sheet; cells are added with `push` and indexed by `finish`.
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            cells: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Builds a finished sheet from cells in any order.
    #[cfg(test)]
    pub(crate) fn from_cells(name: &str, cells: impl IntoIterator<Item = Cell>) -> Self {
        let mut sheet = Self::new(name);
        for cell in cells {
            sheet.push(cell);
        }
        sheet.finish();
        sheet
    }

    /// Adds a cell to the sheet.
    pub(crate) fn push(&mut self, cell: Cell) {
        self.cells.push(cell);
    }

    /// Sorts the cells and builds the row index.
    /// A position written twice keeps the value written last.
    pub(crate) fn finish(&mut self) {
        self.cells.sort_by_key(|cell| (cell.row, cell.col));
        self.cells.dedup_by(|later, earlier| {
            if later.row == earlier.row && later.col == earlier.col {
                std::mem::swap(later, earlier);
                true
            } else {
                false
            }
        });

        self.rows.clear();
        let mut lower = 0usize;
        for upper in 1..=self.cells.len() {
            if upper == self.cells.len() || self.cells[upper].row != self.cells[lower].row {
                self.rows.push((self.cells[lower].row, lower, upper));
                lower = upper;
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if the sheet contains no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Index of the first populated row.
    pub fn first_row_num(&self) -> Option<usize> {
        self.rows.first().map(|(row, _, _)| *row)
    }

    /// Index of the last populated row.
    pub fn last_row_num(&self) -> Option<usize> {
        self.rows.last().map(|(row, _, _)| *row)
    }

    /// Number of populated rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Looks up a row; `None` means the row holds no cells.
    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        let position = self.rows.binary_search_by_key(&index, |(row, _, _)| *row).ok()?;
        let (row, lower, upper) = self.rows[position];
        Some(Row { index: row, cells: &self.cells[lower..upper] })
    }

    /// Iterates the populated rows in order.
    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows
            .iter()
            .map(|(row, lower, upper)| Row { index: *row, cells: &self.cells[*lower..*upper] })
    }

    /// Looks up a single cell.
    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.row(row)?.cell(col)
    }
}

impl<'a> Row<'a> {
    /// Row index within the sheet (0-based).
    pub fn index(&self) -> usize {
        self.index
    }

    /// Column of the first present cell.
    pub fn first_cell_num(&self) -> usize {
        self.cells.first().map(|cell| cell.col).unwrap_or_default()
    }

    /// One past the column of the last present cell.
    pub fn last_cell_num(&self) -> usize {
        self.cells.last().map(|cell| cell.col + 1).unwrap_or_default()
    }

    /// Looks up a cell; `None` means no cell at that column.
    pub fn cell(&self, col: usize) -> Option<&'a Cell> {
        let cells: &'a [Cell] = self.cells;
        cells
            .binary_search_by_key(&col, |cell| cell.col)
            .ok()
            .map(|position| &cells[position])
    }

    /// Present cells in column order.
    pub fn cells(&self) -> &'a [Cell] {
        self.cells
    }
}

// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!
The table storage contract, and an in-memory implementation of it.

The splitting engine never touches a storage format directly. It reads and
writes through [`VisTable`], whose typed cell access is modeled on the CASA
table API: whole columns come back as vectors, single cells can be read and
written, rows can be appended, and the structure of a table can be copied
without its rows. [`MemTable`] keeps everything in memory and is what the
test suite and embedding applications without a table system of their own
use.

*/

use msplit_core::{Array2, Vis};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors arising from table access.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TableError {
    #[error("no such column \"{0}\"")]
    NoSuchColumn(String),

    #[error("column \"{0}\" already exists")]
    ColumnExists(String),

    #[error("column \"{column}\" holds {actual} data, but {expected} was requested")]
    UnexpectedType {
        column: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("row {row} of column \"{column}\" is out of range; the table has {n_rows} rows")]
    RowOutOfRange {
        column: String,
        row: usize,
        n_rows: usize,
    },

    #[error("column \"{column}\" needs {expected} values but {actual} were given")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("no such subtable \"{0}\"")]
    NoSuchSubtable(String),
}

/// The contents of one column.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnData {
    Bool(Vec<bool>),
    Int(Vec<i32>),
    Double(Vec<f64>),
    String(Vec<String>),
    IntVec(Vec<Vec<i32>>),
    FloatVec(Vec<Vec<f32>>),
    DoubleVec(Vec<Vec<f64>>),
    VisMatrix(Vec<Array2<Vis>>),
    FloatMatrix(Vec<Array2<f32>>),
    BoolMatrix(Vec<Array2<bool>>),
}

macro_rules! each_variant {
    ($value:expr, $v:ident => $body:expr) => {
        match $value {
            ColumnData::Bool($v) => $body,
            ColumnData::Int($v) => $body,
            ColumnData::Double($v) => $body,
            ColumnData::String($v) => $body,
            ColumnData::IntVec($v) => $body,
            ColumnData::FloatVec($v) => $body,
            ColumnData::DoubleVec($v) => $body,
            ColumnData::VisMatrix($v) => $body,
            ColumnData::FloatMatrix($v) => $body,
            ColumnData::BoolMatrix($v) => $body,
        }
    };
}

impl ColumnData {
    pub fn len(&self) -> usize {
        each_variant!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The name of the cell type held in this column.
    pub fn type_name(&self) -> &'static str {
        match self {
            ColumnData::Bool(_) => bool::TYPE_NAME,
            ColumnData::Int(_) => i32::TYPE_NAME,
            ColumnData::Double(_) => f64::TYPE_NAME,
            ColumnData::String(_) => String::TYPE_NAME,
            ColumnData::IntVec(_) => Vec::<i32>::TYPE_NAME,
            ColumnData::FloatVec(_) => Vec::<f32>::TYPE_NAME,
            ColumnData::DoubleVec(_) => Vec::<f64>::TYPE_NAME,
            ColumnData::VisMatrix(_) => Array2::<Vis>::TYPE_NAME,
            ColumnData::FloatMatrix(_) => Array2::<f32>::TYPE_NAME,
            ColumnData::BoolMatrix(_) => Array2::<bool>::TYPE_NAME,
        }
    }

    /// An empty column of the same type.
    fn empty_like(&self) -> ColumnData {
        match self {
            ColumnData::Bool(_) => ColumnData::Bool(Vec::new()),
            ColumnData::Int(_) => ColumnData::Int(Vec::new()),
            ColumnData::Double(_) => ColumnData::Double(Vec::new()),
            ColumnData::String(_) => ColumnData::String(Vec::new()),
            ColumnData::IntVec(_) => ColumnData::IntVec(Vec::new()),
            ColumnData::FloatVec(_) => ColumnData::FloatVec(Vec::new()),
            ColumnData::DoubleVec(_) => ColumnData::DoubleVec(Vec::new()),
            ColumnData::VisMatrix(_) => ColumnData::VisMatrix(Vec::new()),
            ColumnData::FloatMatrix(_) => ColumnData::FloatMatrix(Vec::new()),
            ColumnData::BoolMatrix(_) => ColumnData::BoolMatrix(Vec::new()),
        }
    }

    /// Grow (or shrink) the column to `n` cells, filling with empty values.
    fn resize(&mut self, n: usize) {
        each_variant!(self, v => v.resize_with(n, Default::default))
    }

    /// Copy one cell into another column of the same type.
    fn copy_cell(&self, row: usize, dest: &mut ColumnData, dest_row: usize) -> bool {
        match (self, dest) {
            (ColumnData::Bool(s), ColumnData::Bool(d)) => d[dest_row] = s[row],
            (ColumnData::Int(s), ColumnData::Int(d)) => d[dest_row] = s[row],
            (ColumnData::Double(s), ColumnData::Double(d)) => d[dest_row] = s[row],
            (ColumnData::String(s), ColumnData::String(d)) => d[dest_row] = s[row].clone(),
            (ColumnData::IntVec(s), ColumnData::IntVec(d)) => d[dest_row] = s[row].clone(),
            (ColumnData::FloatVec(s), ColumnData::FloatVec(d)) => d[dest_row] = s[row].clone(),
            (ColumnData::DoubleVec(s), ColumnData::DoubleVec(d)) => d[dest_row] = s[row].clone(),
            (ColumnData::VisMatrix(s), ColumnData::VisMatrix(d)) => d[dest_row] = s[row].clone(),
            (ColumnData::FloatMatrix(s), ColumnData::FloatMatrix(d)) => {
                d[dest_row] = s[row].clone()
            }
            (ColumnData::BoolMatrix(s), ColumnData::BoolMatrix(d)) => {
                d[dest_row] = s[row].clone()
            }
            _ => return false,
        }

        true
    }
}

/// A type that can be stored in a table cell.
///
/// Array-valued cell types default to empty arrays, which play the role of
/// "undefined" cells in freshly added rows.
pub trait CellData: Clone + Default + Sized {
    const TYPE_NAME: &'static str;

    #[doc(hidden)]
    fn wrap(values: Vec<Self>) -> ColumnData;

    #[doc(hidden)]
    fn unwrap_ref(col: &ColumnData) -> Option<&Vec<Self>>;

    #[doc(hidden)]
    fn unwrap_mut(col: &mut ColumnData) -> Option<&mut Vec<Self>>;
}

macro_rules! impl_cell_data {
    ($type:ty, $variant:ident, $name:expr) => {
        impl CellData for $type {
            const TYPE_NAME: &'static str = $name;

            fn wrap(values: Vec<Self>) -> ColumnData {
                ColumnData::$variant(values)
            }

            fn unwrap_ref(col: &ColumnData) -> Option<&Vec<Self>> {
                match col {
                    ColumnData::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn unwrap_mut(col: &mut ColumnData) -> Option<&mut Vec<Self>> {
                match col {
                    ColumnData::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_cell_data! { bool, Bool, "boolean" }
impl_cell_data! { i32, Int, "integer" }
impl_cell_data! { f64, Double, "double" }
impl_cell_data! { String, String, "string" }
impl_cell_data! { Vec<i32>, IntVec, "integer vector" }
impl_cell_data! { Vec<f32>, FloatVec, "float vector" }
impl_cell_data! { Vec<f64>, DoubleVec, "double vector" }
impl_cell_data! { Array2<Vis>, VisMatrix, "complex matrix" }
impl_cell_data! { Array2<f32>, FloatMatrix, "float matrix" }
impl_cell_data! { Array2<bool>, BoolMatrix, "boolean matrix" }

/// The storage contract used by the splitting engine.
pub trait VisTable: Sized {
    fn n_rows(&self) -> usize;

    fn column_names(&self) -> Vec<String>;

    fn has_column(&self, col_name: &str) -> bool;

    /// Read an entire column.
    fn get_col_as_vec<T: CellData>(&self, col_name: &str) -> Result<Vec<T>, TableError>;

    fn get_cell<T: CellData>(&self, col_name: &str, row: usize) -> Result<T, TableError>;

    fn put_cell<T: CellData>(&mut self, col_name: &str, row: usize, value: T)
        -> Result<(), TableError>;

    /// Replace the contents of an entire column. The number of values must
    /// match the number of rows.
    fn put_column<T: CellData>(&mut self, col_name: &str, values: Vec<T>)
        -> Result<(), TableError>;

    /// Add a column of the given type, filled with empty values.
    fn add_column<T: CellData>(&mut self, col_name: &str) -> Result<(), TableError>;

    fn remove_column(&mut self, col_name: &str) -> Result<(), TableError>;

    /// Append `n_rows` rows with empty cells.
    fn add_rows(&mut self, n_rows: usize) -> Result<(), TableError>;

    /// Create a table with the same columns as this one but no rows.
    fn deep_copy_no_rows(&self) -> Self;

    /// Copy every cell of `row` into row `dest_row` of `dest`, which must
    /// have the same structure.
    fn copy_row_to(&self, row: usize, dest: &mut Self, dest_row: usize) -> Result<(), TableError>;

    /// Append all of the rows of this table to `dest`.
    fn copy_rows_to(&self, dest: &mut Self) -> Result<(), TableError> {
        let base = dest.n_rows();
        dest.add_rows(self.n_rows())?;

        for row in 0..self.n_rows() {
            self.copy_row_to(row, dest, base + row)?;
        }

        Ok(())
    }
}

/// A table held entirely in memory.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemTable {
    n_rows: usize,
    columns: BTreeMap<String, ColumnData>,
}

impl MemTable {
    pub fn new() -> Self {
        MemTable::default()
    }

    /// Add a column populated with `values`, builder-style.
    ///
    /// The first column added to an empty table sets its number of rows.
    pub fn with_column<T: CellData>(mut self, col_name: &str, values: Vec<T>) -> Result<Self, TableError> {
        if self.columns.contains_key(col_name) {
            return Err(TableError::ColumnExists(col_name.to_owned()));
        }

        if self.columns.is_empty() && self.n_rows == 0 {
            self.n_rows = values.len();
        }

        if values.len() != self.n_rows {
            return Err(TableError::LengthMismatch {
                column: col_name.to_owned(),
                expected: self.n_rows,
                actual: values.len(),
            });
        }

        self.columns.insert(col_name.to_owned(), T::wrap(values));
        Ok(self)
    }

    fn column(&self, col_name: &str) -> Result<&ColumnData, TableError> {
        self.columns
            .get(col_name)
            .ok_or_else(|| TableError::NoSuchColumn(col_name.to_owned()))
    }

    fn typed<T: CellData>(&self, col_name: &str) -> Result<&Vec<T>, TableError> {
        let col = self.column(col_name)?;

        T::unwrap_ref(col).ok_or_else(|| TableError::UnexpectedType {
            column: col_name.to_owned(),
            expected: T::TYPE_NAME,
            actual: col.type_name(),
        })
    }

    fn typed_mut<T: CellData>(&mut self, col_name: &str) -> Result<&mut Vec<T>, TableError> {
        let col = self
            .columns
            .get_mut(col_name)
            .ok_or_else(|| TableError::NoSuchColumn(col_name.to_owned()))?;
        let actual = col.type_name();

        T::unwrap_mut(col).ok_or_else(|| TableError::UnexpectedType {
            column: col_name.to_owned(),
            expected: T::TYPE_NAME,
            actual,
        })
    }

    fn check_row(&self, col_name: &str, row: usize) -> Result<(), TableError> {
        if row >= self.n_rows {
            Err(TableError::RowOutOfRange {
                column: col_name.to_owned(),
                row,
                n_rows: self.n_rows,
            })
        } else {
            Ok(())
        }
    }
}

impl VisTable for MemTable {
    fn n_rows(&self) -> usize {
        self.n_rows
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    fn has_column(&self, col_name: &str) -> bool {
        self.columns.contains_key(col_name)
    }

    fn get_col_as_vec<T: CellData>(&self, col_name: &str) -> Result<Vec<T>, TableError> {
        Ok(self.typed::<T>(col_name)?.clone())
    }

    fn get_cell<T: CellData>(&self, col_name: &str, row: usize) -> Result<T, TableError> {
        let col = self.typed::<T>(col_name)?;
        self.check_row(col_name, row)?;
        Ok(col[row].clone())
    }

    fn put_cell<T: CellData>(
        &mut self,
        col_name: &str,
        row: usize,
        value: T,
    ) -> Result<(), TableError> {
        self.check_row(col_name, row)?;
        self.typed_mut::<T>(col_name)?[row] = value;
        Ok(())
    }

    fn put_column<T: CellData>(&mut self, col_name: &str, values: Vec<T>) -> Result<(), TableError> {
        if values.len() != self.n_rows {
            return Err(TableError::LengthMismatch {
                column: col_name.to_owned(),
                expected: self.n_rows,
                actual: values.len(),
            });
        }

        *self.typed_mut::<T>(col_name)? = values;
        Ok(())
    }

    fn add_column<T: CellData>(&mut self, col_name: &str) -> Result<(), TableError> {
        if self.columns.contains_key(col_name) {
            return Err(TableError::ColumnExists(col_name.to_owned()));
        }

        let mut col = T::wrap(Vec::new());
        col.resize(self.n_rows);
        self.columns.insert(col_name.to_owned(), col);
        Ok(())
    }

    fn remove_column(&mut self, col_name: &str) -> Result<(), TableError> {
        self.columns
            .remove(col_name)
            .map(|_| ())
            .ok_or_else(|| TableError::NoSuchColumn(col_name.to_owned()))
    }

    fn add_rows(&mut self, n_rows: usize) -> Result<(), TableError> {
        self.n_rows += n_rows;

        for col in self.columns.values_mut() {
            col.resize(self.n_rows);
        }

        Ok(())
    }

    fn deep_copy_no_rows(&self) -> Self {
        MemTable {
            n_rows: 0,
            columns: self
                .columns
                .iter()
                .map(|(k, v)| (k.clone(), v.empty_like()))
                .collect(),
        }
    }

    fn copy_row_to(&self, row: usize, dest: &mut Self, dest_row: usize) -> Result<(), TableError> {
        for (name, col) in &self.columns {
            self.check_row(name, row)?;
            dest.check_row(name, dest_row)?;

            let dcol = dest
                .columns
                .get_mut(name)
                .ok_or_else(|| TableError::NoSuchColumn(name.clone()))?;

            let expected = col.type_name();
            let actual = dcol.type_name();

            if !col.copy_cell(row, dcol, dest_row) {
                return Err(TableError::UnexpectedType {
                    column: name.clone(),
                    expected,
                    actual,
                });
            }
        }

        Ok(())
    }
}

/// A main table plus its named subtables.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dataset<T> {
    pub main: T,
    subtables: BTreeMap<String, T>,
}

impl<T: VisTable> Dataset<T> {
    pub fn new(main: T) -> Self {
        Dataset {
            main,
            subtables: BTreeMap::new(),
        }
    }

    /// Attach a subtable, builder-style.
    pub fn with_subtable(mut self, name: &str, table: T) -> Self {
        self.subtables.insert(name.to_owned(), table);
        self
    }

    pub fn insert_subtable(&mut self, name: &str, table: T) {
        self.subtables.insert(name.to_owned(), table);
    }

    pub fn has_subtable(&self, name: &str) -> bool {
        self.subtables.contains_key(name)
    }

    pub fn subtable(&self, name: &str) -> Result<&T, TableError> {
        self.subtables
            .get(name)
            .ok_or_else(|| TableError::NoSuchSubtable(name.to_owned()))
    }

    pub fn subtable_mut(&mut self, name: &str) -> Result<&mut T, TableError> {
        self.subtables
            .get_mut(name)
            .ok_or_else(|| TableError::NoSuchSubtable(name.to_owned()))
    }

    pub fn subtable_names(&self) -> impl Iterator<Item = &str> {
        self.subtables.keys().map(|k| k.as_ref())
    }
}

// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!
Carve a reduced dataset out of radio interferometric visibility data.

Given a dataset in the CASA Measurement Set layout and a [`SplitConfig`],
this crate selects a subset of its rows, renumbers every categorical
identifier densely, optionally forms derived polarization products, reduces
the channel axis, and averages in time, producing a new, self-consistent
dataset whose subtables match its relabeled main table.

```rust,ignore
use msplit::{SplitConfig, Splitter};

let config = SplitConfig {
    time_bin: 30.,
    correlation: Some("I".to_owned()),
    ..SplitConfig::default()
};

let output = Splitter::new(&input, &config)
    .select(nb)?
    .shape(nb)?
    .fill(nb)?;
```

Table storage is abstracted behind the [`VisTable`] trait; [`MemTable`] is
an in-memory implementation of it.

*/

#[macro_use]
mod errors;

pub mod average;
pub mod config;
pub mod fill;
pub mod remap;
pub mod select;
pub mod slots;
pub mod subtables;
pub mod table;

#[cfg(test)]
mod testutil;

pub use config::{
    parse_data_columns, parse_spw_selection, ChannelSelection, ClapSplitArgsExt, DataColumn,
    RowFilter, SpwSelection, SplitConfig,
};
pub use errors::{Result, SplitError};
pub use fill::{Remappers, SelectedSplit, ShapedSplit, Splitter, Strategy};
pub use remap::{Category, IndexRemapper};
pub use table::{CellData, ColumnData, Dataset, MemTable, TableError, VisTable};

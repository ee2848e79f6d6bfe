//! Schema model and table runtime (Component C): Table, Column, Options,
//! the extractor/data-source contracts, and the derived per-table
//! dependency DAG. See spec §3, §4.1.

mod column;
mod data_source;
mod extractor;
mod table;
mod table_options;

pub use column::{Column, ColumnType, MAX_COLUMN_NAME_LEN};
pub use data_source::{result_channel, CancelToken, DataSource, PullContext, ResultSender};
pub use extractor::{ClientHandle, ClientMeta, ExtractContext, Extractor, ItemBag};
pub use table::{SchemaError, Table, TableRuntime};
pub use table_options::{ForeignKey, Index, TableOptions};

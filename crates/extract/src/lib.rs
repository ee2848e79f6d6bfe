//! Built-in column-value extractors (Component E, spec §4.3). A column
//! without an explicit extractor uses [`Default`].

mod builtin;
mod util;

pub use builtin::{
    ClientMetaGetItem, ColumnsValueMd5, Constant, Default, Nil, ParentColumnValue,
    ParentPrimaryKeysID, ParentResultStructSelector, PrimaryKeysID, StructSelector, Uuid4, Wrapper,
};

pub mod result_set;
pub mod row;

pub use result_set::{GENERATED_KEY_COLUMN, ResultSet};
pub use row::{CustomDbRow, FromRowValue};

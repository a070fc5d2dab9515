mod attribute_row;
mod predicate;
mod schema;
mod table_row;
mod value;

pub use attribute_row::*;
pub use predicate::*;
pub use schema::*;
pub use table_row::*;
pub use value::*;

// Core modules: values, rows, the table engine, the delimited-text codec, and errors.
pub mod codec;
pub mod error;
pub mod row;
pub mod table;
pub mod value;

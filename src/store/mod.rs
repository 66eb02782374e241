pub mod label_store;
pub mod query;

pub use label_store::{LabelStore, TEST_TABLE, TRAIN_TABLE};
pub use query::{Identifier, TableQuery};
